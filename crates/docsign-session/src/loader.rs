//! Document binary loading for the renderer
//!
//! The loader fetches each `(document, version)` once, coalescing concurrent
//! requests for the same target, and hands out [`ResourceHandle`]s the PDF
//! renderer can read from. Exactly one handle is live at a time: activating
//! a new document replaces the live handle and releases the previous one
//! after a short grace window, so a handle is never revoked mid-paint.
//!
//! Binaries stay cached for the loader's lifetime (one package session).
//! Releasing a handle revokes that handle only; going back to a document
//! issues a fresh handle over the cached bytes without refetching.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use crate::api::SigningApi;
use crate::error::ResourceLoadError;
use crate::lock;

/// Identity of a document binary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub document_id: String,
    pub version_id: String,
}

impl DocumentKey {
    pub fn new(document_id: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            version_id: version_id.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.document_id, self.version_id)
    }
}

/// Locally addressable handle to a fetched document binary
#[derive(Clone)]
pub struct ResourceHandle {
    id: u64,
    key: DocumentKey,
    bytes: Arc<[u8]>,
    released: Arc<AtomicBool>,
}

impl ResourceHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// The PDF bytes, or `None` once the handle has been released
    pub fn bytes(&self) -> Option<&[u8]> {
        if self.is_released() {
            None
        } else {
            Some(&self.bytes)
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn revoke(&self) {
        self.released.store(true, Ordering::Release);
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("len", &self.bytes.len())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Result of [`DocumentResourceLoader::activate`]
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The handle is now the live one
    Live(ResourceHandle),
    /// A newer activation superseded this one; the result was discarded
    Stale,
}

type CacheCell = Arc<OnceCell<Arc<[u8]>>>;

struct LoaderInner {
    api: Arc<dyn SigningApi>,
    cache: Mutex<HashMap<DocumentKey, CacheCell>>,
    live: Mutex<Option<ResourceHandle>>,
    generation: AtomicU64,
    next_id: AtomicU64,
    grace: Duration,
}

impl Drop for LoaderInner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.live).take() {
            handle.revoke();
        }
    }
}

#[derive(Clone)]
pub struct DocumentResourceLoader {
    inner: Arc<LoaderInner>,
}

impl DocumentResourceLoader {
    pub fn new(api: Arc<dyn SigningApi>, grace: Duration) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                api,
                cache: Mutex::new(HashMap::new()),
                live: Mutex::new(None),
                generation: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                grace,
            }),
        }
    }

    /// Fetch (or reuse) the binary for `key` and issue a new handle.
    ///
    /// Does not change which handle is live.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn load(&self, key: &DocumentKey) -> Result<ResourceHandle, ResourceLoadError> {
        let cell = lock(&self.inner.cache)
            .entry(key.clone())
            .or_default()
            .clone();

        let bytes = cell
            .get_or_try_init(|| async {
                debug!("Fetching document binary");
                self.inner
                    .api
                    .fetch_document(&key.document_id, &key.version_id)
                    .await
                    .map(Arc::<[u8]>::from)
                    .map_err(|e| {
                        ResourceLoadError::from_api(e, &key.document_id, &key.version_id)
                    })
            })
            .await?
            .clone();

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(ResourceHandle {
            id,
            key: key.clone(),
            bytes,
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Load `key` and make it the live handle, unless a later activation
    /// started meanwhile or `still_wanted` says the caller moved on.
    ///
    /// The previously live handle is released after the grace window.
    pub async fn activate<F>(
        &self,
        key: &DocumentKey,
        still_wanted: F,
    ) -> Result<LoadOutcome, ResourceLoadError>
    where
        F: Fn() -> bool,
    {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let result = self.load(key).await;

        let is_current =
            self.inner.generation.load(Ordering::Acquire) == generation && still_wanted();
        if !is_current {
            debug!("Discarding stale load of {}", key);
            if let Ok(handle) = result {
                handle.revoke();
            }
            return Ok(LoadOutcome::Stale);
        }

        let handle = result?;
        let previous = lock(&self.inner.live).replace(handle.clone());
        if let Some(previous) = previous {
            self.release_later(previous);
        }
        debug!("Document {} is live (handle {})", key, handle.id);
        Ok(LoadOutcome::Live(handle))
    }

    /// The handle currently being rendered
    pub fn live(&self) -> Option<ResourceHandle> {
        lock(&self.inner.live).clone()
    }

    /// Invalidate `handle` now.
    ///
    /// Refuses (returns `false`) for the live handle, which is only ever
    /// released by being replaced.
    pub fn release(&self, handle: &ResourceHandle) -> bool {
        let is_live = lock(&self.inner.live)
            .as_ref()
            .is_some_and(|live| live.id == handle.id);
        if is_live {
            warn!("Refusing to release live handle {}", handle.id);
            return false;
        }
        handle.revoke();
        true
    }

    fn release_later(&self, handle: ResourceHandle) {
        let grace = self.inner.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            debug!("Releasing handle {} for {}", handle.id, handle.key);
            handle.revoke();
        });
    }
}
