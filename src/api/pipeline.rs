//! Authenticated request pipeline
//!
//! Attaches the stored access token to an outbound call and recovers from
//! exactly one class of failure: an authorization rejection triggers one
//! coordinated refresh, then one retry. Every other outcome is returned
//! to the caller untouched - this layer never interprets business-level
//! error bodies.

use std::sync::Arc;
use crate::Result;
use crate::auth::credentials::{CredentialStore, ACCESS_TOKEN_KEY};
use crate::auth::RefreshCoordinator;
use crate::error::Error;
use super::call::{ApiCall, ApiResponse};
use super::transport::Transport;

/// Request pipeline shared by every authenticated backend operation
#[derive(Clone)]
pub struct Pipeline {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    refresher: RefreshCoordinator,
}

impl Pipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        refresher: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            store,
            refresher,
        }
    }

    /// Execute a call with the current credentials, refreshing at most once
    ///
    /// Fails fast with [`Error::NotAuthenticated`] when no access token is
    /// stored - no network call is made. On a 401, the refresh coordinator
    /// runs (or is joined, when already running) and, only if it yields a
    /// new pair, the call is reissued once; that second response is
    /// returned as-is, 401 included. A call may therefore execute twice;
    /// callers own making that safe (see [`ApiCall::with_idempotency_key`]).
    pub async fn send(&self, call: &ApiCall) -> Result<ApiResponse> {
        let token = self
            .store
            .get(ACCESS_TOKEN_KEY)?
            .ok_or(Error::NotAuthenticated)?;

        let response = self.transport.execute(call, Some(&token)).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        tracing::debug!(path = %call.path, "access token rejected, refreshing");
        let pair = match self.refresher.refresh().await {
            Some(pair) => pair,
            None => return Err(Error::NotAuthenticated),
        };

        self.transport.execute(call, Some(&pair.access_token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FakeTransport;
    use crate::auth::credentials::{self, CredentialPair, InMemoryCredentialStore};
    use serde_json::{json, Value};

    fn pipeline_with(
        responses: Vec<Result<ApiResponse>>,
        store: Arc<InMemoryCredentialStore>,
    ) -> (Pipeline, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::new(responses));
        let refresher = RefreshCoordinator::new(transport.clone(), store.clone());
        (
            Pipeline::new(transport.clone(), store, refresher),
            transport,
        )
    }

    fn authed_store() -> Arc<InMemoryCredentialStore> {
        Arc::new(InMemoryCredentialStore::with_pair(&CredentialPair::new(
            "a0".to_string(),
            "r0".to_string(),
            None,
        )))
    }

    fn grant_response() -> ApiResponse {
        ApiResponse::new(
            200,
            json!({"access_token": "a1", "refresh_token": "r1", "expires_in": 900}),
        )
    }

    #[tokio::test]
    async fn test_fail_fast_without_token() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let (pipeline, transport) = pipeline_with(vec![], store);

        let result = pipeline.send(&ApiCall::get("/v1/users/me")).await;
        assert!(matches!(result, Err(Error::NotAuthenticated)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let (pipeline, transport) = pipeline_with(
            vec![Ok(ApiResponse::new(200, json!({"items": []})))],
            authed_store(),
        );

        let response = pipeline.send(&ApiCall::get("/v1/favorites")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.calls()[0].token.as_deref(), Some("a0"));
    }

    #[tokio::test]
    async fn test_retry_once_after_refresh() {
        let (pipeline, transport) = pipeline_with(
            vec![
                Ok(ApiResponse::new(401, Value::Null)),
                Ok(grant_response()),
                Ok(ApiResponse::new(200, json!({"items": ["x"]}))),
            ],
            authed_store(),
        );

        let response = pipeline.send(&ApiCall::get("/v1/favorites")).await.unwrap();
        assert_eq!(response.status, 200);

        // Original call, refresh exchange, retry - nothing more
        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].token.as_deref(), Some("a0"));
        assert_eq!(calls[1].path, "/v1/auth/refresh");
        assert_eq!(calls[2].token.as_deref(), Some("a1"));
        assert_eq!(calls[2].path, "/v1/favorites");
    }

    #[tokio::test]
    async fn test_second_rejection_is_surfaced_not_retried() {
        let (pipeline, transport) = pipeline_with(
            vec![
                Ok(ApiResponse::new(401, Value::Null)),
                Ok(grant_response()),
                Ok(ApiResponse::new(401, Value::Null)),
            ],
            authed_store(),
        );

        let response = pipeline.send(&ApiCall::get("/v1/users/me")).await.unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_surfaces_not_authenticated() {
        let store = authed_store();
        let (pipeline, transport) = pipeline_with(
            vec![
                Ok(ApiResponse::new(401, Value::Null)),
                Ok(ApiResponse::new(
                    401,
                    json!({"error": {"code": "invalid_grant", "message": "used"}}),
                )),
            ],
            store.clone(),
        );

        let result = pipeline.send(&ApiCall::get("/v1/users/me")).await;
        assert!(matches!(result, Err(Error::NotAuthenticated)));
        assert_eq!(transport.call_count(), 2);
        assert!(credentials::load(store.as_ref()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_business_errors_returned_untouched() {
        let (pipeline, transport) = pipeline_with(
            vec![Ok(ApiResponse::new(
                422,
                json!({"error": {"code": "out_of_stock", "message": "item gone"}}),
            ))],
            authed_store(),
        );

        let response = pipeline
            .send(&ApiCall::post("/v1/cart/items").json(json!({"item": "x"})))
            .await
            .unwrap();
        assert_eq!(response.status, 422);
        assert_eq!(response.remote_error().code, "out_of_stock");
        // No refresh was attempted for a non-authorization failure
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_network_error_surfaced_without_refresh() {
        let (pipeline, transport) = pipeline_with(
            vec![Err(Error::Network("timed out".to_string()))],
            authed_store(),
        );

        let result = pipeline.send(&ApiCall::get("/v1/users/me")).await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(transport.call_count(), 1);
    }
}
