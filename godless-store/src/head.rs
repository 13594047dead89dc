//! The head cache: the single mutable pointer in the system.
//!
//! Everything else is content-addressed and immutable; the head names the
//! current index manifest. Mutations advance it through compare-and-swap
//! only, which serializes logical writes without locking readers out.

use std::fmt::Debug;

use async_trait::async_trait;
use godless_crdt::Link;
use parking_lot::Mutex;

use crate::error::Error;

/// Mutable pointer to the latest persisted index.
///
/// The resident implementation keeps it in process memory; a deployment can
/// plug in a remote cache (the interface is async for that reason), in which
/// case `commit` flushes to durable storage.
#[async_trait]
pub trait HeadCache: Send + Sync + Debug {
    async fn head(&self) -> Result<Option<Link>, Error>;

    /// Set the head to `new` iff it currently equals `old` (by target cid).
    /// Returns whether the swap happened.
    async fn compare_and_swap(&self, old: Option<&Link>, new: &Link) -> Result<bool, Error>;

    async fn commit(&self) -> Result<(), Error>;
}

/// Process-local head cache.
#[derive(Debug, Default)]
pub struct ResidentHeadCache {
    head: Mutex<Option<Link>>,
}

impl ResidentHeadCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeadCache for ResidentHeadCache {
    async fn head(&self) -> Result<Option<Link>, Error> {
        Ok(self.head.lock().clone())
    }

    async fn compare_and_swap(&self, old: Option<&Link>, new: &Link) -> Result<bool, Error> {
        let mut head = self.head.lock();
        let current = head.as_ref().map(Link::target);
        if current != old.map(Link::target) {
            return Ok(false);
        }
        *head = Some(new.clone());
        Ok(true)
    }

    async fn commit(&self) -> Result<(), Error> {
        // Nothing durable behind the resident cache.
        Ok(())
    }
}
