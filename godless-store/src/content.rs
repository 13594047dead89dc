//! The content-addressed store interface.
//!
//! The real COS (a block store with a pub/sub overlay) lives outside this
//! repository; [`ContentStore`] is the boundary. [`MemStore`] is the
//! in-process implementation used by tests and single-node serving.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use multihash_codetable::{Code, MultihashDigest};
use cid::Cid;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{trace, warn};

use crate::error::Error;

/// Multicodec code for raw blobs.
pub const RAW_CODEC: u64 = 0x55;
/// Multihash code for sha2-256, the only digest this store writes.
const SHA2_256: u64 = 0x12;

/// Capacity of a subscription channel. Messages arriving while the receiver
/// is full are dropped rather than buffered without bound.
const SUBSCRIBE_CAP: usize = 256;

/// Client interface to the content-addressed object store.
///
/// Blobs are write-once per hash; `publish`/`subscribe` is the pub/sub
/// overlay peers use to exchange head links.
#[async_trait]
pub trait ContentStore: Send + Sync + Debug + Clone + 'static {
    /// Read the blob identified by `cid`.
    async fn cat(&self, cid: &Cid) -> Result<Bytes, Error>;

    /// Write a blob, returning its content hash.
    async fn add(&self, data: Bytes) -> Result<Cid, Error>;

    async fn publish(&self, topic: &str, data: Bytes) -> Result<(), Error>;

    /// Subscribe to a topic. The returned channel is bounded; slow consumers
    /// lose messages instead of buffering them forever.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>, Error>;

    /// Connectivity probe, used for fail-early startup.
    async fn ping(&self) -> Result<(), Error>;
}

#[async_trait]
impl<T: ContentStore> ContentStore for Arc<T> {
    async fn cat(&self, cid: &Cid) -> Result<Bytes, Error> {
        self.as_ref().cat(cid).await
    }

    async fn add(&self, data: Bytes) -> Result<Cid, Error> {
        self.as_ref().add(data).await
    }

    async fn publish(&self, topic: &str, data: Bytes) -> Result<(), Error> {
        self.as_ref().publish(topic, data).await
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>, Error> {
        self.as_ref().subscribe(topic).await
    }

    async fn ping(&self) -> Result<(), Error> {
        self.as_ref().ping().await
    }
}

/// Content hash of a blob as this store would write it.
pub fn cid_for(data: &[u8]) -> Cid {
    Cid::new_v1(RAW_CODEC, Code::Sha2_256.digest(data))
}

/// Check `data` against the hash in `cid`.
///
/// Returns `None` when the digest function is unknown to us, in which case
/// the caller may proceed with a warning.
pub fn verify_block(cid: &Cid, data: &[u8]) -> Option<bool> {
    if cid.hash().code() != SHA2_256 {
        return None;
    }
    let computed = Code::Sha2_256.digest(data);
    Some(computed.digest() == cid.hash().digest())
}

/// In-process [`ContentStore`].
///
/// Cloning shares the underlying blob map and topics, so several nodes in
/// one process observe a common store, which is exactly what the
/// replication tests need.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: RwLock<HashMap<Cid, Bytes>>,
    topics: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.blobs.read().is_empty()
    }

    /// Direct access to the blob map, for tests that corrupt stored data.
    #[cfg(test)]
    pub(crate) fn blobs_mut(&self) -> parking_lot::RwLockWriteGuard<'_, HashMap<Cid, Bytes>> {
        self.inner.blobs.write()
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        let mut topics = self.inner.topics.lock();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBE_CAP).0)
            .clone()
    }
}

#[async_trait]
impl ContentStore for MemStore {
    async fn cat(&self, cid: &Cid) -> Result<Bytes, Error> {
        self.inner
            .blobs
            .read()
            .get(cid)
            .cloned()
            .ok_or(Error::NotFound(*cid))
    }

    async fn add(&self, data: Bytes) -> Result<Cid, Error> {
        let cid = cid_for(&data);
        self.inner.blobs.write().insert(cid, data);
        trace!(%cid, "stored blob");
        Ok(cid)
    }

    async fn publish(&self, topic: &str, data: Bytes) -> Result<(), Error> {
        // A send error just means nobody is subscribed right now.
        let _ = self.topic_sender(topic).send(data);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>, Error> {
        let mut source = self.topic_sender(topic).subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBE_CAP);
        let topic = topic.to_string();
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(msg) => {
                        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(msg) {
                            warn!(topic, "subscriber full, dropping message");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic, skipped = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }

    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }
}
