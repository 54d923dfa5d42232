//! Resource management

use crate::error::CloudError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] bounds the number of cloud requests in flight.
/// Resource management is performed using a Tokio Semaphore. A single manager is typically shared
/// by every session in the process.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for in-flight requests.
    requests: Option<Semaphore>,

    /// Optional request limit.
    request_limit: Option<usize>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    ///
    /// # Arguments
    ///
    /// * `request_limit`: Maximum number of requests in flight, or `None` for no limit
    pub fn new(request_limit: Option<usize>) -> Self {
        Self {
            requests: request_limit.map(Semaphore::new),
            request_limit,
        }
    }

    /// Maximum number of requests in flight, if limited.
    pub fn request_limit(&self) -> Option<usize> {
        self.request_limit
    }

    /// Acquire a request resource.
    pub async fn request(&self) -> Result<Option<SemaphorePermit>, CloudError> {
        optional_acquire(&self.requests, 1).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, CloudError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
