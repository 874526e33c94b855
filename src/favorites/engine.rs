//! Local/remote reconciliation for the favorites set
//!
//! Local state answers instantly and survives being offline or signed
//! out; the remote copy is authoritative when reachable. Merging is
//! additive only: reconciliation never asks the backend to remove an
//! item, so a locally-added favorite outlives a temporarily-inconsistent
//! remote.

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use crate::Result;
use crate::api::{ApiCall, Pipeline};
use crate::error::Error;
use super::FavoritesCache;

const FAVORITES_PATH: &str = "/v1/favorites";

/// Namespace used by single-account devices
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Deserialize)]
struct FavoritesPayload {
    items: Vec<String>,
}

/// Keeps one preference set responsive offline and convergent online
pub struct FavoritesEngine {
    pipeline: Pipeline,
    cache: Arc<dyn FavoritesCache>,
    namespace: String,
    // One reconciliation pass at a time; a late caller waits for the
    // running pass to finish, then runs its own over the settled state.
    reconcile_pass: Mutex<()>,
}

impl FavoritesEngine {
    pub fn new(pipeline: Pipeline, cache: Arc<dyn FavoritesCache>, namespace: impl Into<String>) -> Self {
        Self {
            pipeline,
            cache,
            namespace: namespace.into(),
            reconcile_pass: Mutex::new(()),
        }
    }

    async fn fetch_remote(&self) -> Result<HashSet<String>> {
        let response = self.pipeline.send(&ApiCall::get(FAVORITES_PATH)).await?;
        let payload: FavoritesPayload = response.into_result()?;
        Ok(payload.items.into_iter().collect())
    }

    /// Fetch the authoritative set, falling back to the local cache
    ///
    /// On success the remote result replaces the cache. Offline,
    /// unauthenticated, or rejected reads degrade to whatever is cached
    /// (empty if never populated); only a broken cache fails this call.
    pub async fn load(&self) -> Result<HashSet<String>> {
        match self.fetch_remote().await {
            Ok(remote) => {
                self.cache.write_all(&self.namespace, &remote)?;
                Ok(remote)
            }
            Err(Error::Storage(err)) => Err(Error::Storage(err)),
            Err(err) => {
                tracing::debug!(error = %err, "favorites fetch failed, serving cached set");
                self.cache.read_all(&self.namespace)
            }
        }
    }

    /// Merge the local and remote sets into their union
    ///
    /// Every element present locally but absent remotely is pushed to the
    /// backend; the union is written back to the cache and returned.
    /// Intended to run once after authentication is established. When the
    /// remote set is unreachable the pass is skipped and the local set
    /// returned unchanged.
    pub async fn reconcile(&self) -> Result<HashSet<String>> {
        let _pass = self.reconcile_pass.lock().await;

        let local = self.cache.read_all(&self.namespace)?;
        let remote = match self.fetch_remote().await {
            Ok(remote) => remote,
            Err(Error::Storage(err)) => return Err(Error::Storage(err)),
            Err(err) => {
                tracing::debug!(error = %err, "reconcile skipped, keeping local set");
                return Ok(local);
            }
        };

        for item_id in local.difference(&remote) {
            let call = ApiCall::post(format!("{}/{}", FAVORITES_PATH, item_id));
            match self.pipeline.send(&call).await {
                Ok(response) if !response.is_success() => {
                    tracing::debug!(item_id = %item_id, code = %response.remote_error().code, "push-add rejected");
                }
                Err(err) => {
                    tracing::debug!(item_id = %item_id, error = %err, "push-add failed");
                }
                Ok(_) => {}
            }
        }

        let merged: HashSet<String> = local.union(&remote).cloned().collect();
        self.cache.write_all(&self.namespace, &merged)?;

        tracing::debug!(
            local = local.len(),
            remote = remote.len(),
            merged = merged.len(),
            "favorites reconciled"
        );
        Ok(merged)
    }

    /// Flip membership of one item, optimistically
    ///
    /// The local mutation applies immediately and is never rolled back;
    /// the remote add/remove is best-effort, and any divergence is
    /// corrected by the next `reconcile` or `load`. Returns the new local
    /// membership.
    pub async fn toggle(&self, item_id: &str) -> Result<bool> {
        let mut local = self.cache.read_all(&self.namespace)?;
        let now_favorite = if local.remove(item_id) {
            false
        } else {
            local.insert(item_id.to_string());
            true
        };
        self.cache.write_all(&self.namespace, &local)?;

        let call = if now_favorite {
            ApiCall::post(format!("{}/{}", FAVORITES_PATH, item_id))
        } else {
            ApiCall::delete(format!("{}/{}", FAVORITES_PATH, item_id))
        };
        match self.pipeline.send(&call).await {
            Ok(response) if !response.is_success() => {
                tracing::debug!(item_id = %item_id, code = %response.remote_error().code, "remote favorite update rejected");
            }
            Err(err) => {
                tracing::debug!(item_id = %item_id, error = %err, "remote favorite update failed");
            }
            Ok(_) => {}
        }

        Ok(now_favorite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, FakeTransport, Method};
    use crate::auth::credentials::InMemoryCredentialStore;
    use crate::auth::{CredentialPair, RefreshCoordinator};
    use crate::favorites::InMemoryFavoritesCache;
    use serde_json::json;

    fn engine_with(
        responses: Vec<Result<ApiResponse>>,
        cache: Arc<InMemoryFavoritesCache>,
        authenticated: bool,
    ) -> (FavoritesEngine, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::new(responses));
        let store = if authenticated {
            Arc::new(InMemoryCredentialStore::with_pair(&CredentialPair::new(
                "a0".to_string(),
                "r0".to_string(),
                None,
            )))
        } else {
            Arc::new(InMemoryCredentialStore::new())
        };
        let refresher = RefreshCoordinator::new(transport.clone(), store.clone());
        let pipeline = Pipeline::new(transport.clone(), store, refresher);
        (
            FavoritesEngine::new(pipeline, cache, DEFAULT_NAMESPACE),
            transport,
        )
    }

    fn set_of(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reconcile_merges_to_union() {
        let cache = Arc::new(InMemoryFavoritesCache::with_items(DEFAULT_NAMESPACE, &["A", "B"]));
        let (engine, transport) = engine_with(
            vec![
                Ok(ApiResponse::new(200, json!({"items": ["B", "C"]}))),
                Ok(ApiResponse::new(200, json!({}))),
            ],
            cache.clone(),
            true,
        );

        let merged = engine.reconcile().await.unwrap();
        assert_eq!(merged, set_of(&["A", "B", "C"]));
        assert_eq!(cache.read_all(DEFAULT_NAMESPACE).unwrap(), merged);

        // One fetch plus a push-add for A only - B and C are never pushed
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].method, Method::Get);
        assert_eq!(calls[1].method, Method::Post);
        assert_eq!(calls[1].path, "/v1/favorites/A");
    }

    #[tokio::test]
    async fn test_reconcile_offline_keeps_local() {
        let cache = Arc::new(InMemoryFavoritesCache::with_items(DEFAULT_NAMESPACE, &["A"]));
        let (engine, transport) = engine_with(
            vec![Err(Error::Network("offline".to_string()))],
            cache.clone(),
            true,
        );

        let result = engine.reconcile().await.unwrap();
        assert_eq!(result, set_of(&["A"]));
        assert_eq!(cache.read_all(DEFAULT_NAMESPACE).unwrap(), set_of(&["A"]));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_unauthenticated_keeps_local() {
        let cache = Arc::new(InMemoryFavoritesCache::with_items(DEFAULT_NAMESPACE, &["A"]));
        let (engine, transport) = engine_with(vec![], cache, false);

        let result = engine.reconcile().await.unwrap();
        assert_eq!(result, set_of(&["A"]));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_push_failure_still_merges_locally() {
        let cache = Arc::new(InMemoryFavoritesCache::with_items(DEFAULT_NAMESPACE, &["A"]));
        let (engine, _) = engine_with(
            vec![
                Ok(ApiResponse::new(200, json!({"items": ["B"]}))),
                Err(Error::Network("flaky".to_string())),
            ],
            cache.clone(),
            true,
        );

        let merged = engine.reconcile().await.unwrap();
        assert_eq!(merged, set_of(&["A", "B"]));
        assert_eq!(cache.read_all(DEFAULT_NAMESPACE).unwrap(), merged);
    }

    #[tokio::test]
    async fn test_load_overwrites_cache_with_remote() {
        let cache = Arc::new(InMemoryFavoritesCache::with_items(DEFAULT_NAMESPACE, &["A"]));
        let (engine, _) = engine_with(
            vec![Ok(ApiResponse::new(200, json!({"items": ["B"]})))],
            cache.clone(),
            true,
        );

        let loaded = engine.load().await.unwrap();
        assert_eq!(loaded, set_of(&["B"]));
        assert_eq!(cache.read_all(DEFAULT_NAMESPACE).unwrap(), set_of(&["B"]));
    }

    #[tokio::test]
    async fn test_load_degrades_to_cache() {
        let cache = Arc::new(InMemoryFavoritesCache::with_items(DEFAULT_NAMESPACE, &["A"]));
        let (engine, _) = engine_with(
            vec![Err(Error::Network("offline".to_string()))],
            cache,
            true,
        );

        assert_eq!(engine.load().await.unwrap(), set_of(&["A"]));
    }

    #[tokio::test]
    async fn test_load_empty_when_never_populated() {
        let cache = Arc::new(InMemoryFavoritesCache::new());
        let (engine, _) = engine_with(vec![], cache, false);

        assert!(engine.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_is_optimistic() {
        let cache = Arc::new(InMemoryFavoritesCache::new());
        let (engine, transport) = engine_with(
            vec![Err(Error::Network("offline".to_string()))],
            cache.clone(),
            true,
        );

        // Remote leg fails, local mutation stands
        assert!(engine.toggle("sku-1").await.unwrap());
        assert_eq!(cache.read_all(DEFAULT_NAMESPACE).unwrap(), set_of(&["sku-1"]));
        assert_eq!(transport.calls()[0].method, Method::Post);
        assert_eq!(transport.calls()[0].path, "/v1/favorites/sku-1");
    }

    #[tokio::test]
    async fn test_double_toggle_restores_original_state() {
        let cache = Arc::new(InMemoryFavoritesCache::with_items(DEFAULT_NAMESPACE, &["A"]));
        let (engine, transport) = engine_with(
            vec![
                Err(Error::Network("offline".to_string())),
                Err(Error::Network("offline".to_string())),
            ],
            cache.clone(),
            true,
        );

        assert!(engine.toggle("sku-1").await.unwrap());
        assert!(!engine.toggle("sku-1").await.unwrap());
        assert_eq!(cache.read_all(DEFAULT_NAMESPACE).unwrap(), set_of(&["A"]));

        let calls = transport.calls();
        assert_eq!(calls[0].method, Method::Post);
        assert_eq!(calls[1].method, Method::Delete);
    }

    #[tokio::test]
    async fn test_toggle_works_signed_out() {
        let cache = Arc::new(InMemoryFavoritesCache::new());
        let (engine, transport) = engine_with(vec![], cache.clone(), false);

        assert!(engine.toggle("sku-1").await.unwrap());
        assert_eq!(cache.read_all(DEFAULT_NAMESPACE).unwrap(), set_of(&["sku-1"]));
        // Fail-fast pipeline: no network call was attempted
        assert_eq!(transport.call_count(), 0);
    }
}
