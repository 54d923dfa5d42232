//! Bounded-concurrency dispatch of request batches.

use futures::future::join_all;
use serde_json::Value;

use crate::cache::SessionCache;
use crate::error::{self, CloudError};
use crate::metrics;
use crate::progress::{Postprocess, ProgressSink};
use crate::request::RequestDescriptor;
use crate::resource_manager::ResourceManager;
use crate::transport::Transport;

/// Runs batches of requests against a transport.
///
/// Every request first consults the session cache. Misses acquire a request permit from the
/// [ResourceManager] before calling the transport, so the number of requests in flight never
/// exceeds its limit. An optional session limit is acquired first, capping one session below the
/// shared limit.
#[derive(Debug)]
pub struct Dispatcher<'a, T> {
    transport: &'a T,
    cache: &'a SessionCache,
    resource_manager: &'a ResourceManager,
    session_limit: Option<&'a ResourceManager>,
}

impl<'a, T: Transport> Dispatcher<'a, T> {
    /// Return a new Dispatcher.
    pub fn new(
        transport: &'a T,
        cache: &'a SessionCache,
        resource_manager: &'a ResourceManager,
    ) -> Self {
        Self {
            transport,
            cache,
            resource_manager,
            session_limit: None,
        }
    }

    /// Also bound requests by a limit private to one session.
    pub fn with_session_limit(mut self, session_limit: &'a ResourceManager) -> Self {
        self.session_limit = Some(session_limit);
        self
    }

    /// Fetch a single request, from the cache if possible.
    ///
    /// Successful GET responses are stored in the cache.
    pub async fn fetch(&self, request: &RequestDescriptor) -> Result<Value, CloudError> {
        let key = request.cache_key();
        if request.is_cacheable() {
            if let Some(payload) = self.cache.get(&key).await {
                return Ok(payload);
            }
        }
        let payload = {
            // Acquire request permits to be freed via drop when this block ends
            let _session_permit = match self.session_limit {
                Some(session_limit) => session_limit.request().await?,
                None => None,
            };
            let _permit = self.resource_manager.request().await?;
            self.transport.send(request).await?
        };
        if request.is_cacheable() {
            self.cache.put(key, payload.clone()).await;
        }
        Ok(payload)
    }

    async fn run_job(
        &self,
        index: usize,
        request: &RequestDescriptor,
        progress: &dyn ProgressSink,
        postprocess: &dyn Postprocess,
    ) -> Result<Value, CloudError> {
        let result = self
            .fetch(request)
            .await
            .map(|payload| postprocess.apply(index, payload));
        if let Err(err) = &result {
            metrics::record_failure(err.kind());
        }
        progress.advance(1);
        result
    }

    /// Run a batch of requests, returning their results in submission order.
    ///
    /// All requests run to completion and the progress sink is advanced once for each, whether
    /// it succeeded, failed or was served from the cache. If any request failed, the batch fails
    /// with [CloudError::BatchFailed] wrapping the first failure in submission order. Cached
    /// responses of the requests that succeeded are kept.
    ///
    /// # Arguments
    ///
    /// * `jobs`: Requests to send
    /// * `progress`: Progress sink
    /// * `postprocess`: Applied to each successful payload with its index in `jobs`
    #[tracing::instrument(level = "DEBUG", skip_all, fields(jobs = jobs.len()))]
    pub async fn dispatch(
        &self,
        jobs: &[RequestDescriptor],
        progress: &dyn ProgressSink,
        postprocess: &dyn Postprocess,
    ) -> Result<Vec<Value>, CloudError> {
        let results = join_all(
            jobs.iter()
                .enumerate()
                .map(|(index, request)| self.run_job(index, request, progress, postprocess)),
        )
        .await;

        let failed = results.iter().filter(|result| result.is_err()).count();
        if failed == 0 {
            return results.into_iter().collect();
        }
        let total = results.len();
        let (index, source) = results
            .into_iter()
            .enumerate()
            .find_map(|(index, result)| result.err().map(|err| (index, err)))
            .ok_or(CloudError::EmptyInput {
                operation: "dispatch",
            })?;
        let err = CloudError::BatchFailed {
            failed,
            total,
            index,
            request: jobs[index].to_string(),
            source: Box::new(source),
        };
        error::log_error(&err);
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use serde_json::json;

    use crate::cache::{CacheRegistry, DomainCache};
    use crate::progress::{NoPostprocess, NoProgress};
    use crate::test_utils::{CountingProgress, MockTransport};

    fn session_cache() -> SessionCache {
        SessionCache::new(Arc::new(DomainCache::default()), true)
    }

    fn jobs(n: usize) -> Vec<RequestDescriptor> {
        (0..n)
            .map(|i| RequestDescriptor::get(format!("http://mock/item/{}/", i)))
            .collect()
    }

    fn mock_items(n: usize) -> MockTransport {
        let transport = MockTransport::new().with_random_latency(20);
        for i in 0..n {
            transport.respond(&format!("http://mock/item/{}/", i), json!({ "item": i }));
        }
        transport
    }

    #[tokio::test]
    async fn results_in_submission_order() {
        let transport = mock_items(30);
        let cache = session_cache();
        let rm = ResourceManager::new(Some(4));
        let dispatcher = Dispatcher::new(&transport, &cache, &rm);
        let results = dispatcher
            .dispatch(&jobs(30), &NoProgress, &NoPostprocess)
            .await
            .unwrap();
        let expected: Vec<Value> = (0..30).map(|i| json!({ "item": i })).collect();
        assert_eq!(expected, results);
        assert!(transport.max_in_flight() <= 4);
        assert_eq!(30, transport.calls());
    }

    #[tokio::test]
    async fn results_in_submission_order_for_every_batch_size() {
        let transport = MockTransport::new().with_random_latency(4);
        for i in 0..50 {
            transport.respond(&format!("http://mock/item/{}/", i), json!({ "item": i }));
        }
        let rm = ResourceManager::new(Some(6));
        for _ in 0..3 {
            for n in 1..=50 {
                // A fresh cache per batch so every job goes through the transport.
                let cache = session_cache();
                let dispatcher = Dispatcher::new(&transport, &cache, &rm);
                let results = dispatcher
                    .dispatch(&jobs(n), &NoProgress, &NoPostprocess)
                    .await
                    .unwrap();
                let expected: Vec<Value> = (0..n).map(|i| json!({ "item": i })).collect();
                assert_eq!(expected, results, "batch of {}", n);
            }
        }
        assert!(transport.max_in_flight() <= 6);
    }

    #[tokio::test]
    async fn session_limit_caps_shared_limit() {
        let transport = mock_items(20);
        let cache = session_cache();
        let shared = ResourceManager::new(Some(8));
        let session_limit = ResourceManager::new(Some(2));
        let dispatcher =
            Dispatcher::new(&transport, &cache, &shared).with_session_limit(&session_limit);
        dispatcher
            .dispatch(&jobs(20), &NoProgress, &NoPostprocess)
            .await
            .unwrap();
        assert!(transport.max_in_flight() <= 2);
        assert_eq!(20, transport.calls());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let transport = mock_items(20);
        let cache = session_cache();
        let rm = ResourceManager::new(Some(1));
        let dispatcher = Dispatcher::new(&transport, &cache, &rm);
        dispatcher
            .dispatch(&jobs(20), &NoProgress, &NoPostprocess)
            .await
            .unwrap();
        assert_eq!(1, transport.max_in_flight());
    }

    #[tokio::test]
    async fn cache_hits_skip_transport() {
        let transport = mock_items(5);
        let cache = session_cache();
        let rm = ResourceManager::new(Some(10));
        let dispatcher = Dispatcher::new(&transport, &cache, &rm);
        let first = dispatcher
            .dispatch(&jobs(5), &NoProgress, &NoPostprocess)
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(&jobs(5), &NoProgress, &NoPostprocess)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(5, transport.calls());
    }

    #[tokio::test]
    async fn disabled_cache_always_fetches() {
        let transport = mock_items(5);
        let registry = CacheRegistry::new();
        let cache = SessionCache::new(registry.domain("http://mock").await, false);
        let rm = ResourceManager::new(Some(10));
        let dispatcher = Dispatcher::new(&transport, &cache, &rm);
        for _ in 0..2 {
            dispatcher
                .dispatch(&jobs(5), &NoProgress, &NoPostprocess)
                .await
                .unwrap();
        }
        assert_eq!(10, transport.calls());
        assert_eq!(0, registry.len("http://mock").await);
    }

    #[tokio::test]
    async fn progress_ticks_once_per_job() {
        let transport = mock_items(6);
        transport.fail(
            "http://mock/item/3/",
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        );
        let cache = session_cache();
        // Prime the cache with one entry.
        cache
            .put("http://mock/item/0/".to_string(), json!({ "item": 0 }))
            .await;
        let rm = ResourceManager::new(Some(2));
        let dispatcher = Dispatcher::new(&transport, &cache, &rm);
        let progress = CountingProgress::default();
        let result = dispatcher
            .dispatch(&jobs(6), &progress, &NoPostprocess)
            .await;
        assert!(result.is_err());
        assert_eq!(6, progress.ticks());
    }

    #[tokio::test]
    async fn first_failure_in_submission_order() {
        let transport = mock_items(8);
        transport.fail("http://mock/item/5/", reqwest::StatusCode::NOT_FOUND);
        transport.fail("http://mock/item/2/", reqwest::StatusCode::FORBIDDEN);
        let cache = session_cache();
        let rm = ResourceManager::new(Some(8));
        let dispatcher = Dispatcher::new(&transport, &cache, &rm);
        let err = dispatcher
            .dispatch(&jobs(8), &NoProgress, &NoPostprocess)
            .await
            .unwrap_err();
        match err {
            CloudError::BatchFailed {
                failed,
                total,
                index,
                request,
                source,
            } => {
                assert_eq!(2, failed);
                assert_eq!(8, total);
                assert_eq!(2, index);
                assert_eq!("GET http://mock/item/2/", request);
                assert!(matches!(
                    *source,
                    CloudError::HttpStatus {
                        status: reqwest::StatusCode::FORBIDDEN,
                        ..
                    }
                ));
            }
            _ => panic!("unexpected error {:?}", err),
        }
    }

    #[tokio::test]
    async fn succeeded_jobs_stay_cached_after_failure() {
        let transport = mock_items(4);
        transport.fail("http://mock/item/1/", reqwest::StatusCode::BAD_GATEWAY);
        let cache = session_cache();
        let rm = ResourceManager::new(Some(4));
        let dispatcher = Dispatcher::new(&transport, &cache, &rm);
        assert!(dispatcher
            .dispatch(&jobs(4), &NoProgress, &NoPostprocess)
            .await
            .is_err());
        assert_eq!(3, cache.domain_cache().len().await);
        assert!(cache.get("http://mock/item/1/").await.is_none());
        assert!(cache.get("http://mock/item/2/").await.is_some());
    }

    #[tokio::test]
    async fn postprocess_sees_submission_index() {
        let transport = mock_items(10);
        let cache = session_cache();
        let rm = ResourceManager::new(Some(3));
        let dispatcher = Dispatcher::new(&transport, &cache, &rm);
        let tag = |i: usize, mut v: Value| {
            v["index"] = json!(i);
            v
        };
        let results = dispatcher
            .dispatch(&jobs(10), &NoProgress, &tag)
            .await
            .unwrap();
        for (i, result) in results.iter().enumerate() {
            assert_eq!(json!(i), result["item"]);
            assert_eq!(json!(i), result["index"]);
        }
    }

    #[tokio::test]
    async fn posts_are_not_cached() {
        let transport = MockTransport::new();
        transport.respond("http://mock/post/", json!({"ok": true}));
        let cache = session_cache();
        let rm = ResourceManager::new(Some(3));
        let dispatcher = Dispatcher::new(&transport, &cache, &rm);
        let jobs = vec![RequestDescriptor::post("http://mock/post/", json!({"a": 1})); 2];
        dispatcher
            .dispatch(&jobs, &NoProgress, &NoPostprocess)
            .await
            .unwrap();
        assert_eq!(2, transport.calls());
        assert!(cache.domain_cache().is_empty().await);
    }

    #[tokio::test]
    async fn empty_batch() {
        let transport = MockTransport::new();
        let cache = session_cache();
        let rm = ResourceManager::new(Some(3));
        let dispatcher = Dispatcher::new(&transport, &cache, &rm);
        let results = dispatcher
            .dispatch(&[], &NoProgress, &NoPostprocess)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
