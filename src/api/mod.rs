//! Backend boundary
//!
//! This module owns everything that touches the wire:
//! - Call descriptions and normalized responses
//! - The transport trait, its reqwest implementation, and a scripted fake
//! - The authenticated request pipeline with refresh-and-retry-once

mod call;
mod pipeline;
mod transport;

pub use call::{ApiCall, ApiResponse, Method, RemoteError, IDEMPOTENCY_KEY_HEADER};
pub use pipeline::Pipeline;
pub use transport::{FakeTransport, HttpTransport, RecordedCall, Transport};
