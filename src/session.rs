//! Cloud sessions and the paginated fetch operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use validator::Validate;

use crate::cache::{CacheRegistry, SessionCache};
use crate::dispatcher::Dispatcher;
use crate::error::CloudError;
use crate::models::{Page, SessionConfig};
use crate::progress::{NoPostprocess, Postprocess, ProgressSink};
use crate::request::{QueryArgs, RequestDescriptor};
use crate::resource_manager::ResourceManager;
use crate::transport::{HttpTransport, Transport};

/// Query parameters owned by [CloudSession::fetch_all].
const RESERVED_PARAMETERS: [&str; 2] = ["page", "page_size"];

/// A session with a cloud domain.
///
/// A session combines a transport, a view of its domain's request cache and a shared
/// [ResourceManager] that bounds the number of requests in flight. Sessions are cheap to create;
/// the cache registry and resource manager are meant to be shared between them.
///
/// Each session is additionally bounded by its own `concurrency` setting, so a session never has
/// more requests in flight than either its configuration or the shared manager allows.
#[derive(Debug)]
pub struct CloudSession<T = HttpTransport> {
    config: SessionConfig,
    transport: T,
    cache: SessionCache,
    resource_manager: Arc<ResourceManager>,
    session_limit: ResourceManager,
}

impl CloudSession<HttpTransport> {
    /// Open an HTTP session bounded only by its own `concurrency` setting.
    ///
    /// # Arguments
    ///
    /// * `config`: Session configuration
    /// * `registry`: Cache registry shared between sessions
    pub async fn connect(
        config: SessionConfig,
        registry: &CacheRegistry,
    ) -> Result<Self, CloudError> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        let resource_manager = Arc::new(ResourceManager::new(None));
        Self::new(config, transport, registry, resource_manager).await
    }
}

impl<T: Transport> CloudSession<T> {
    /// Open a session.
    ///
    /// Records the configured user as logged in to the domain, which clears the domain's cache if
    /// a different user was logged in before.
    ///
    /// # Arguments
    ///
    /// * `config`: Session configuration
    /// * `transport`: Transport used to send requests
    /// * `registry`: Cache registry shared between sessions
    /// * `resource_manager`: Resource manager shared between sessions
    pub async fn new(
        config: SessionConfig,
        transport: T,
        registry: &CacheRegistry,
        resource_manager: Arc<ResourceManager>,
    ) -> Result<Self, CloudError> {
        config.validate()?;
        let domain = config.domain_key();
        registry.login(&domain, &config.identity()).await;
        let cache = SessionCache::new(registry.domain(&domain).await, config.cache_enabled);
        tracing::debug!("Opened session to {}", domain);
        let session_limit = ResourceManager::new(Some(config.concurrency));
        Ok(Self {
            config,
            transport,
            cache,
            resource_manager,
            session_limit,
        })
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Transport used to send requests.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Enable or disable the request cache for this session.
    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache = SessionCache::new(self.cache.domain_cache().clone(), enabled);
    }

    /// Full URL of a resource.
    ///
    /// Absolute `http` and `https` URLs are used as they are. Anything else is a path relative to
    /// the domain's API root. A query string in `resource` is kept and merged into the request's
    /// parameters when the request is built.
    pub fn resource_url(&self, resource: &str) -> String {
        if resource.starts_with("http://") || resource.starts_with("https://") {
            resource.to_string()
        } else {
            self.config.api_url(resource)
        }
    }

    fn dispatcher(&self) -> Dispatcher<'_, T> {
        Dispatcher::new(&self.transport, &self.cache, &self.resource_manager)
            .with_session_limit(&self.session_limit)
    }

    /// Fetch a single resource, from the cache if possible.
    ///
    /// # Arguments
    ///
    /// * `resource`: Resource path or URL
    /// * `args`: Query arguments
    #[tracing::instrument(level = "DEBUG", skip(self, args))]
    pub async fn fetch(&self, resource: &str, args: &QueryArgs) -> Result<Value, CloudError> {
        let request = RequestDescriptor::get(self.resource_url(resource)).with_params(args);
        self.dispatcher().fetch(&request).await
    }

    /// Fetch and concatenate all pages of a resource.
    ///
    /// A first request for page 1 finds the total record count. The remaining pages are then
    /// fetched in parallel and their records appended in page order. If any page fails the whole
    /// fetch fails.
    ///
    /// # Arguments
    ///
    /// * `resource`: Resource path or URL
    /// * `page_size`: Number of records per page
    /// * `args`: Query arguments. Must not contain `page` or `page_size`.
    /// * `progress`: Progress sink, advanced once per page
    #[tracing::instrument(level = "DEBUG", skip(self, args, progress))]
    pub async fn fetch_all(
        &self,
        resource: &str,
        page_size: usize,
        args: &QueryArgs,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Value>, CloudError> {
        let base = RequestDescriptor::get(self.resource_url(resource)).with_params(args);
        if let Some(key) = RESERVED_PARAMETERS
            .iter()
            .find(|key| base.params().contains_key(**key))
        {
            return Err(CloudError::ReservedParameter(key.to_string()));
        }
        if page_size == 0 {
            return Err(CloudError::InvalidPageSize(page_size));
        }
        let first = base.with_param("page_size", i64::try_from(page_size)?);
        progress.start(1);
        let result = self.fetch_pages(&first, page_size, progress).await;
        progress.finish();
        result
    }

    async fn fetch_pages(
        &self,
        first: &RequestDescriptor,
        page_size: usize,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Value>, CloudError> {
        let dispatcher = self.dispatcher();
        let page = dispatcher
            .fetch(first)
            .await
            .and_then(|payload| Page::from_payload(&first.cache_key(), payload));
        progress.advance(1);
        let page = page?;
        if page.count <= page_size {
            return Ok(page.results);
        }

        let pages = page.count.div_ceil(page_size);
        progress.set_total(pages);
        tracing::info!(
            "Fetching {} records of {} in {} pages",
            page.count,
            first.url(),
            pages
        );
        let jobs = (2..=pages)
            .map(|n| -> Result<RequestDescriptor, CloudError> {
                Ok(first.clone().with_param("page", i64::try_from(n)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let payloads = dispatcher.dispatch(&jobs, progress, &NoPostprocess).await?;

        let mut records = page.results;
        records.reserve(page.count.saturating_sub(records.len()));
        for (job, payload) in jobs.iter().zip(payloads) {
            records.extend(Page::from_payload(&job.cache_key(), payload)?.results);
        }
        Ok(records)
    }

    /// Fetch several resources in parallel.
    ///
    /// Results are returned in the order of `resources`.
    ///
    /// # Arguments
    ///
    /// * `resources`: Resource paths or URLs
    /// * `per_resource_args`: Optional query arguments for each resource. Must have the same
    ///   length as `resources`. These take precedence over `shared_args`.
    /// * `shared_args`: Query arguments for every resource
    /// * `postprocess`: Applied to each result with its index in `resources`
    /// * `progress`: Progress sink, advanced once per resource
    #[tracing::instrument(level = "DEBUG", skip_all, fields(resources = resources.len()))]
    pub async fn fetch_multiple<S: AsRef<str>>(
        &self,
        resources: &[S],
        per_resource_args: Option<&[QueryArgs]>,
        shared_args: &QueryArgs,
        postprocess: &dyn Postprocess,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Value>, CloudError> {
        if let Some(per_resource_args) = per_resource_args {
            check_length("per_resource_args", resources.len(), per_resource_args.len())?;
        }
        let jobs: Vec<RequestDescriptor> = resources
            .iter()
            .enumerate()
            .map(|(i, resource)| {
                let request = RequestDescriptor::get(self.resource_url(resource.as_ref()))
                    .with_params(shared_args);
                match per_resource_args {
                    Some(per_resource_args) => request.with_params(&per_resource_args[i]),
                    None => request,
                }
            })
            .collect();
        self.run_batch(&jobs, postprocess, progress).await
    }

    /// POST JSON bodies to several resources in parallel.
    ///
    /// Responses are never cached. Results are returned in the order of `resources`.
    ///
    /// # Arguments
    ///
    /// * `resources`: Resource paths or URLs
    /// * `bodies`: One JSON body per resource
    /// * `per_call_headers`: Optional extra headers for each call
    /// * `include_auth`: Whether to send the session's authorization header
    /// * `progress`: Progress sink, advanced once per resource
    #[tracing::instrument(level = "DEBUG", skip_all, fields(resources = resources.len()))]
    pub async fn post_multiple<S: AsRef<str>>(
        &self,
        resources: &[S],
        bodies: &[Value],
        per_call_headers: Option<&[BTreeMap<String, String>]>,
        include_auth: bool,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Value>, CloudError> {
        check_length("bodies", resources.len(), bodies.len())?;
        if let Some(per_call_headers) = per_call_headers {
            check_length("per_call_headers", resources.len(), per_call_headers.len())?;
        }
        let jobs: Vec<RequestDescriptor> = resources
            .iter()
            .zip(bodies)
            .enumerate()
            .map(|(i, (resource, body))| {
                let request =
                    RequestDescriptor::post(self.resource_url(resource.as_ref()), body.clone());
                let request = match per_call_headers {
                    Some(headers) => headers[i]
                        .iter()
                        .fold(request, |request, (name, value)| {
                            request.with_header(name.clone(), value.clone())
                        }),
                    None => request,
                };
                if include_auth {
                    request
                } else {
                    request.without_auth()
                }
            })
            .collect();
        self.run_batch(&jobs, &NoPostprocess, progress).await
    }

    async fn run_batch(
        &self,
        jobs: &[RequestDescriptor],
        postprocess: &dyn Postprocess,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Value>, CloudError> {
        progress.start(jobs.len());
        let result = self.dispatcher().dispatch(jobs, progress, postprocess).await;
        progress.finish();
        result
    }
}

/// Check that a parallel argument list has one entry per resource.
fn check_length(what: &'static str, expected: usize, actual: usize) -> Result<(), CloudError> {
    if expected != actual {
        return Err(CloudError::ArgumentMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
