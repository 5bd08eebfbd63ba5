use async_trait::async_trait;
use bytes::Bytes;
use log::debug;

use crate::config::PDF_CONTENT_TYPE;
use crate::engine::Locator;
use crate::error::SessionError;
use crate::objects::{ObjectRegistry, ScopedObject};

/// Turns an engine's output locator into a downloadable local object.
#[async_trait]
pub trait ResultFetcher: Send + Sync {
    /// Copies the bytes behind `output` into a new scoped object without
    /// transforming them, then releases `output` if it was temporary.
    async fn materialize(&self, output: &Locator) -> Result<ScopedObject, SessionError>;

    /// Releases `output` without reading it, for results nobody wants anymore.
    fn release(&self, _output: &Locator) {}
}

#[derive(Debug, Clone)]
pub struct ObjectFetcher {
    registry: ObjectRegistry,
}

impl ObjectFetcher {
    pub fn new(registry: ObjectRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ResultFetcher for ObjectFetcher {
    async fn materialize(&self, output: &Locator) -> Result<ScopedObject, SessionError> {
        let bytes = match output {
            Locator::Object(url) => {
                let blob = self.registry.resolve(url).ok_or_else(|| {
                    SessionError::ResultFetch(format!("{} is not a live object", url))
                })?;
                self.registry.revoke(url);
                blob.bytes
            }
            Locator::File(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| SessionError::ResultFetch(format!("{}: {}", path.display(), e)))?,
        };

        debug!("materialized {} ({} bytes)", output, bytes.len());
        Ok(self.registry.create_scoped(bytes, PDF_CONTENT_TYPE))
    }

    fn release(&self, output: &Locator) {
        if let Locator::Object(url) = output {
            self.registry.revoke(url);
        }
    }
}
