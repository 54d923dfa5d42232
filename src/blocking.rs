//! Blocking wrappers around [CloudSession] for callers without an async runtime.
//!
//! A [WorkerPool] owns a multi-threaded Tokio runtime together with the cache registry and
//! resource manager. It is created once and shared by every [BlockingSession], so repeated session
//! construction never starts new threads.
//!
//! The methods here block the calling thread and must not be called from within an async context.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Runtime;

use crate::cache::CacheRegistry;
use crate::error::CloudError;
use crate::models::SessionConfig;
use crate::progress::{Postprocess, ProgressSink};
use crate::request::QueryArgs;
use crate::resource_manager::ResourceManager;
use crate::session::CloudSession;
use crate::transport::{HttpTransport, Transport};

/// Threads and shared state used by blocking sessions.
#[derive(Debug)]
pub struct WorkerPool {
    runtime: Runtime,
    registry: CacheRegistry,
    resource_manager: Arc<ResourceManager>,
}

impl WorkerPool {
    /// Start a worker pool.
    ///
    /// # Arguments
    ///
    /// * `worker_threads`: Number of runtime threads
    /// * `request_limit`: Maximum number of requests in flight across all sessions. Must be
    ///   positive.
    pub fn new(worker_threads: usize, request_limit: usize) -> Result<Self, CloudError> {
        if request_limit == 0 {
            return Err(CloudError::InvalidRequestLimit(request_limit));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("iotile-worker")
            .enable_all()
            .build()
            .map_err(CloudError::Runtime)?;
        Ok(Self {
            runtime,
            registry: CacheRegistry::new(),
            resource_manager: Arc::new(ResourceManager::new(Some(request_limit))),
        })
    }

    /// The cache registry shared by sessions on this pool.
    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }
}

/// A [CloudSession] whose operations block until complete.
///
/// Requests are bounded by both the pool's request limit and the session's `concurrency`.
#[derive(Debug)]
pub struct BlockingSession<T = HttpTransport> {
    pool: Arc<WorkerPool>,
    session: CloudSession<T>,
}

impl BlockingSession<HttpTransport> {
    /// Open an HTTP session on a worker pool.
    pub fn connect(pool: Arc<WorkerPool>, config: SessionConfig) -> Result<Self, CloudError> {
        let transport = pool.runtime.block_on(async { HttpTransport::new(&config) })?;
        Self::new(pool, config, transport)
    }
}

impl<T: Transport> BlockingSession<T> {
    /// Open a session on a worker pool with the given transport.
    pub fn new(
        pool: Arc<WorkerPool>,
        config: SessionConfig,
        transport: T,
    ) -> Result<Self, CloudError> {
        let session = pool.runtime.block_on(CloudSession::new(
            config,
            transport,
            &pool.registry,
            pool.resource_manager.clone(),
        ))?;
        Ok(Self { pool, session })
    }

    /// The wrapped async session.
    pub fn session(&self) -> &CloudSession<T> {
        &self.session
    }

    /// See [CloudSession::fetch].
    pub fn fetch(&self, resource: &str, args: &QueryArgs) -> Result<Value, CloudError> {
        self.pool.runtime.block_on(self.session.fetch(resource, args))
    }

    /// See [CloudSession::fetch_all].
    pub fn fetch_all(
        &self,
        resource: &str,
        page_size: usize,
        args: &QueryArgs,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Value>, CloudError> {
        self.pool
            .runtime
            .block_on(self.session.fetch_all(resource, page_size, args, progress))
    }

    /// See [CloudSession::fetch_multiple].
    pub fn fetch_multiple<S: AsRef<str>>(
        &self,
        resources: &[S],
        per_resource_args: Option<&[QueryArgs]>,
        shared_args: &QueryArgs,
        postprocess: &dyn Postprocess,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Value>, CloudError> {
        self.pool.runtime.block_on(self.session.fetch_multiple(
            resources,
            per_resource_args,
            shared_args,
            postprocess,
            progress,
        ))
    }

    /// See [CloudSession::post_multiple].
    pub fn post_multiple<S: AsRef<str>>(
        &self,
        resources: &[S],
        bodies: &[Value],
        per_call_headers: Option<&[BTreeMap<String, String>]>,
        include_auth: bool,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Value>, CloudError> {
        self.pool.runtime.block_on(self.session.post_multiple(
            resources,
            bodies,
            per_call_headers,
            include_auth,
            progress,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use url::Url;

    use crate::progress::{NoPostprocess, NoProgress};
    use crate::test_utils::{records, MockTransport};

    fn config() -> SessionConfig {
        SessionConfig::new(Url::parse("http://mock").unwrap())
    }

    #[test]
    fn blocking_fetch_all() {
        let pool = Arc::new(WorkerPool::new(2, 3).unwrap());
        let transport = MockTransport::new().with_random_latency(5);
        transport.paginate("http://mock/api/v1/data/", records(120));
        let session = BlockingSession::new(pool.clone(), config(), transport).unwrap();
        let results = session
            .fetch_all("data/", 10, &QueryArgs::new(), &NoProgress)
            .unwrap();
        assert_eq!(records(120), results);
        assert!(session.session().transport().max_in_flight() <= 3);
    }

    #[test]
    fn sessions_share_pool_cache() {
        let pool = Arc::new(WorkerPool::new(1, 2).unwrap());
        let transport = MockTransport::new();
        transport.paginate("http://mock/api/v1/data/", records(3));
        let first = BlockingSession::new(pool.clone(), config(), transport).unwrap();
        first
            .fetch_multiple(
                &["data/"],
                None,
                &QueryArgs::new(),
                &NoPostprocess,
                &NoProgress,
            )
            .unwrap();

        let second = BlockingSession::new(pool.clone(), config(), MockTransport::new()).unwrap();
        let result = second.fetch("data/", &QueryArgs::new()).unwrap();
        assert_eq!(3, result["count"]);
        assert_eq!(0, second.session().transport().calls());
    }

    #[test]
    fn zero_request_limit() {
        let err = WorkerPool::new(2, 0).unwrap_err();
        assert!(matches!(err, CloudError::InvalidRequestLimit(0)));
        assert!(err.is_caller_error());
    }

    #[test]
    fn session_concurrency_honoured() {
        let pool = Arc::new(WorkerPool::new(2, 8).unwrap());
        let transport = MockTransport::new().with_random_latency(5);
        transport.paginate("http://mock/api/v1/data/", records(200));
        let config = SessionConfig {
            concurrency: 1,
            ..config()
        };
        let session = BlockingSession::new(pool, config, transport).unwrap();
        let results = session
            .fetch_all("data/", 10, &QueryArgs::new(), &NoProgress)
            .unwrap();
        assert_eq!(records(200), results);
        assert_eq!(1, session.session().transport().max_in_flight());
    }
}
