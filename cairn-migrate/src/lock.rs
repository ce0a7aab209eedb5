//! Named advisory locks scoping each batch run.

use std::future::Future;

use tracing::{debug, warn};

use crate::error::MigrateResult;
use crate::model::BatchKind;
use crate::store::TrackingStore;

/// Default lock name prefix.
pub const DEFAULT_LOCK_PREFIX: &str = "cairn";

/// Name of the lock guarding one batch kind within one schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken {
    name: String,
}

impl LockToken {
    /// `{prefix}:{schema}:{tx|notx}`.
    pub fn new(prefix: &str, schema: &str, kind: BatchKind) -> Self {
        Self {
            name: format!("{}:{}:{}", prefix, schema, kind.as_str()),
        }
    }

    /// Lock name passed to the backend.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Tracks a held lock so that an unreleased one is reported.
struct HeldLock {
    name: String,
    released: bool,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if !self.released {
            warn!(lock = %self.name, "Migration lock dropped without release; it is freed when the session closes");
        }
    }
}

/// Wraps batch work in acquire/release of the batch's lock.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    prefix: String,
    schema: String,
}

impl LockCoordinator {
    /// Create a coordinator for `schema` with the given prefix.
    pub fn new(prefix: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            schema: schema.into(),
        }
    }

    /// Lock token for a batch kind.
    pub fn token(&self, kind: BatchKind) -> LockToken {
        LockToken::new(&self.prefix, &self.schema, kind)
    }

    /// Run `section` while holding the lock for `kind`.
    ///
    /// The lock is released whether or not the section succeeds. If both the
    /// section and the release fail, the section's error is returned.
    pub async fn guarded<S, F, T>(&self, store: &S, kind: BatchKind, section: F) -> MigrateResult<T>
    where
        S: TrackingStore + ?Sized,
        F: Future<Output = MigrateResult<T>>,
    {
        let token = self.token(kind);
        debug!(lock = token.name(), "Acquiring migration lock");
        store.acquire_lock(token.name()).await?;
        let mut held = HeldLock {
            name: token.name().to_string(),
            released: false,
        };

        let result = section.await;

        let release = store.release_lock(token.name()).await;
        held.released = true;
        debug!(lock = token.name(), "Released migration lock");

        match (result, release) {
            (Err(e), Err(release_err)) => {
                warn!(lock = token.name(), error = %release_err, "Lock release failed after batch error");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Ok(value), Ok(())) => Ok(value),
        }
    }
}
