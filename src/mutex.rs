//! Keyed locks guarding reads of shared input content.
//!
//! When several encodes read the same source, the coordinator serializes
//! them per input identity. The lock travels inside the transcode request as
//! an [`InputFileReleaser`], which the encoder releases as soon as it has
//! finished reading the input.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

enum ReleaseAction {
    Guard(OwnedMutexGuard<()>),
    Callback(Box<dyn FnOnce() + Send>),
}

/// Single-use release handle for an input lock.
///
/// [`release`](Self::release) consumes the handle, so it cannot run twice.
/// A handle dropped without being released still releases, and logs it.
pub struct InputFileReleaser {
    key: String,
    action: Option<ReleaseAction>,
}

impl InputFileReleaser {
    /// Releaser for inputs nobody else reads.
    pub fn noop(key: &str) -> Self {
        Self::from_fn(key, || {})
    }

    pub fn from_fn<F>(key: &str, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            key: key.to_string(),
            action: Some(ReleaseAction::Callback(Box::new(f))),
        }
    }

    fn from_guard(key: &str, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            key: key.to_string(),
            action: Some(ReleaseAction::Guard(guard)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        match self.action.take() {
            Some(ReleaseAction::Guard(guard)) => drop(guard),
            Some(ReleaseAction::Callback(f)) => f(),
            None => return,
        }
        debug!("Released input lock {}", self.key);
    }
}

impl Drop for InputFileReleaser {
    fn drop(&mut self) {
        if self.action.is_some() {
            warn!("Input lock {} dropped without explicit release", self.key);
            self.fire();
        }
    }
}

impl std::fmt::Debug for InputFileReleaser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputFileReleaser")
            .field("key", &self.key)
            .field("released", &self.action.is_none())
            .finish()
    }
}

/// Grants exclusive access to an input identified by `key`.
#[async_trait]
pub trait MutexCoordinator: Send + Sync {
    /// Wait until the lock for `key` is free and take it.
    async fn acquire(&self, key: &str) -> InputFileReleaser;
}

/// In-process coordinator backed by one async mutex per key.
#[derive(Default)]
pub struct KeyedMutexCoordinator {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedMutexCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Entries only referenced by the map are neither held nor awaited.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl MutexCoordinator for KeyedMutexCoordinator {
    async fn acquire(&self, key: &str) -> InputFileReleaser {
        let lock = self.lock_for(key);
        let guard = lock.lock_owned().await;
        debug!("Acquired input lock {}", key);
        InputFileReleaser::from_guard(key, guard)
    }
}
