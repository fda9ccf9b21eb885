use std::sync::Arc;

use url::Url;

use crate::Object;
use crate::ObjectSummary;
use crate::PutRequest;
use crate::Result;
use crate::memory::MemoryBucket;
use crate::s3::S3Bucket;

#[derive(Clone)]
pub struct Client {
    inner: ClientInner,
}

#[derive(Clone)]
enum ClientInner {
    S3(S3Bucket),
    /// Keeps objects in the process memory. This should not be used in production.
    Memory(Arc<MemoryBucket>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct S3Config {
    /// Custom endpoint of an S3-compatible service, AWS is used when unset
    pub endpoint: Option<Url>,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Required by most self-hosted services (MinIO, Garage...)
    pub force_path_style: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Config {
    Memory,
    S3(S3Config),
}

impl Client {
    pub async fn new(config: Config) -> Self {
        let inner = match config {
            Config::Memory => ClientInner::Memory(Arc::default()),
            Config::S3(config) => ClientInner::S3(S3Bucket::connect(config).await),
        };
        Self { inner }
    }

    pub fn new_memory() -> Self {
        Self {
            inner: ClientInner::Memory(Arc::default()),
        }
    }

    /// A short label of the backend, reported by the health check
    pub fn backend_name(&self) -> &str {
        match &self.inner {
            ClientInner::S3(bucket) => bucket.bucket(),
            ClientInner::Memory(_) => "memory",
        }
    }

    /// Writes an object, replacing any object stored under the same key
    #[tracing::instrument(skip_all, fields(key = request.key, size = request.data.len()), err)]
    pub async fn put(&self, request: PutRequest<'_>) -> Result<()> {
        match &self.inner {
            ClientInner::S3(bucket) => bucket.put(request).await,
            ClientInner::Memory(bucket) => bucket.put(request).await,
        }
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn get(&self, key: &str) -> Result<Object> {
        match &self.inner {
            ClientInner::S3(bucket) => bucket.get(key).await,
            ClientInner::Memory(bucket) => bucket.get(key).await,
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match &self.inner {
            ClientInner::S3(bucket) => bucket.exists(key).await,
            ClientInner::Memory(bucket) => bucket.exists(key).await,
        }
    }

    /// Removes an object. Deleting a missing key is not an error.
    #[tracing::instrument(skip(self), err)]
    pub async fn delete(&self, key: &str) -> Result<()> {
        match &self.inner {
            ClientInner::S3(bucket) => bucket.delete(key).await,
            ClientInner::Memory(bucket) => bucket.delete(key).await,
        }
    }

    /// Lists every object whose key starts with `prefix`, ordered by key
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let mut objects = match &self.inner {
            ClientInner::S3(bucket) => bucket.list(prefix).await?,
            ClientInner::Memory(bucket) => bucket.list(prefix).await?,
        };
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    pub async fn ping(&self) -> Result<()> {
        match &self.inner {
            ClientInner::S3(bucket) => bucket.ping().await,
            ClientInner::Memory(bucket) => bucket.ping().await,
        }
    }

    /// Creates the configured bucket if needed, returns `true` when it was created
    pub async fn ensure_bucket(&self) -> Result<bool> {
        match &self.inner {
            ClientInner::S3(bucket) => bucket.ensure_bucket().await,
            ClientInner::Memory(_) => Ok(false),
        }
    }

    /// Makes every subsequent `operation` fail on a memory backend
    ///
    /// Has no effect on an S3 backend.
    #[cfg(any(test, feature = "testing"))]
    pub async fn inject_fault(&self, operation: crate::Operation) {
        if let ClientInner::Memory(bucket) = &self.inner {
            bucket.set_fault(operation, true).await;
        }
    }

    #[cfg(any(test, feature = "testing"))]
    pub async fn clear_fault(&self, operation: crate::Operation) {
        if let ClientInner::Memory(bucket) = &self.inner {
            bucket.set_fault(operation, false).await;
        }
    }
}
