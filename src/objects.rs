//! Revocable, locally resolvable references to in-memory byte objects.
//!
//! An [`ObjectRegistry`] plays the role of a browser's object-URL table: bytes
//! are registered under an [`ObjectUrl`], anyone holding the URL can resolve
//! it while it is live, and the owner revokes it when done. [`ScopedObject`]
//! ties revocation to ownership so that every exit path releases the object.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, trace};
use parking_lot::Mutex;

use crate::config::OBJECT_URL_PREFIX;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUrl(String);

impl ObjectUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved content of a live object.
#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    objects: HashMap<ObjectUrl, Blob>,
}

#[derive(Clone, Default)]
pub struct ObjectRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a temporary object. The caller is responsible for revoking it.
    pub fn create(&self, bytes: Bytes, content_type: &str) -> ObjectUrl {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let url = ObjectUrl(format!("{}{}", OBJECT_URL_PREFIX, inner.next_id));
        trace!("created {} ({} bytes, {})", url, bytes.len(), content_type);
        inner.objects.insert(
            url.clone(),
            Blob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        url
    }

    /// Register an object that is revoked when the returned handle is dropped.
    pub fn create_scoped(&self, bytes: Bytes, content_type: &str) -> ScopedObject {
        let url = self.create(bytes, content_type);
        ScopedObject {
            url,
            registry: self.clone(),
        }
    }

    pub fn resolve(&self, url: &ObjectUrl) -> Option<Blob> {
        self.inner.lock().objects.get(url).cloned()
    }

    pub fn contains(&self, url: &ObjectUrl) -> bool {
        self.inner.lock().objects.contains_key(url)
    }

    /// Returns `false` if the object was already revoked.
    pub fn revoke(&self, url: &ObjectUrl) -> bool {
        let removed = self.inner.lock().objects.remove(url).is_some();
        if removed {
            debug!("revoked {}", url);
        }
        removed
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().objects.len()
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("live", &self.live_count())
            .finish()
    }
}

/// Exclusive owner of a registered object.
pub struct ScopedObject {
    url: ObjectUrl,
    registry: ObjectRegistry,
}

impl ScopedObject {
    pub fn url(&self) -> &ObjectUrl {
        &self.url
    }

    pub fn resolve(&self) -> Option<Blob> {
        self.registry.resolve(&self.url)
    }
}

impl fmt::Debug for ScopedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopedObject").field(&self.url).finish()
    }
}

impl Drop for ScopedObject {
    fn drop(&mut self) {
        self.registry.revoke(&self.url);
    }
}
