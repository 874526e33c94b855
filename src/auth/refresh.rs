//! Single-flight credential refresh
//!
//! Collapses concurrent refresh demand into one exchange. The refresh
//! token is single-use: the backend invalidates it on every successful
//! exchange, so two concurrent exchanges would have the loser rejected
//! and a naive loser would then wipe the credentials the winner just
//! stored. All concurrent callers therefore await one shared attempt and
//! observe the identical outcome.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use crate::api::{ApiCall, Transport};
use super::credentials::{self, CredentialPair, CredentialStore, REFRESH_TOKEN_KEY};

const REFRESH_PATH: &str = "/v1/auth/refresh";

type SharedAttempt = Shared<BoxFuture<'static, Option<CredentialPair>>>;

/// Token grant returned by the refresh endpoint
#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Coordinates credential refreshes so at most one runs at a time
///
/// Cheap to clone; clones share the same in-flight cell. One instance is
/// injected into both the session manager and the request pipeline.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    in_flight: Mutex<Option<SharedAttempt>>,
}

impl RefreshCoordinator {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Exchange the stored refresh token for a new credential pair
    ///
    /// Joins the attempt already in flight when there is one; otherwise
    /// starts a new one. Resolves to `None` when no refresh token is
    /// stored or the exchange fails - this coordinator never errors, so
    /// callers have a single non-exceptional "refresh didn't work" path.
    /// The in-flight cell is cleared inside the attempt itself, before any
    /// waiter observes the result, so the next authorization failure can
    /// start a fresh attempt.
    pub async fn refresh(&self) -> Option<CredentialPair> {
        let attempt = {
            let mut slot = self.inner.in_flight.lock().unwrap();
            match slot.as_ref() {
                Some(running) => running.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let attempt = async move {
                        let outcome = inner.exchange().await;
                        *inner.in_flight.lock().unwrap() = None;
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }
}

impl Inner {
    async fn exchange(&self) -> Option<CredentialPair> {
        let refresh_token = match self.store.get(REFRESH_TOKEN_KEY) {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!("no stored refresh token, skipping exchange");
                return None;
            }
            Err(err) => {
                tracing::warn!(error = %err, "credential store read failed during refresh");
                return None;
            }
        };

        let call = ApiCall::post(REFRESH_PATH).json(json!({ "refresh_token": refresh_token }));

        let response = match self.transport.execute(&call, None).await {
            Ok(response) => response,
            Err(err) => {
                // Fail closed: a failed exchange ends the session, whether
                // the token was rejected or the backend was unreachable.
                tracing::warn!(error = %err, "refresh exchange failed, clearing stored credentials");
                let _ = credentials::clear(self.store.as_ref());
                return None;
            }
        };

        if !response.is_success() {
            let remote = response.remote_error();
            tracing::warn!(code = %remote.code, "refresh token rejected, clearing stored credentials");
            let _ = credentials::clear(self.store.as_ref());
            return None;
        }

        let grant: TokenGrant = match response.decode() {
            Ok(grant) => grant,
            Err(err) => {
                tracing::warn!(error = %err, "malformed refresh grant, clearing stored credentials");
                let _ = credentials::clear(self.store.as_ref());
                return None;
            }
        };

        let pair = CredentialPair::new(grant.access_token, grant.refresh_token, grant.expires_in);
        if let Err(err) = credentials::save(self.store.as_ref(), &pair) {
            tracing::warn!(error = %err, "failed to persist refreshed credentials");
            return None;
        }

        tracing::debug!("credentials refreshed");
        Some(pair)
    }
}
