//! Reading and writing namespaces through the content-addressed store.
//!
//! Writes split the namespace into chunks, add them children-first, then add
//! the index manifest and sign its link. Reads traverse the chunk DAG
//! breadth-first from the index links and fold every part under the
//! namespace join. Concurrent readers of one chunk share a single in-flight
//! fetch through a per-cid coalescing map.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use cid::Cid;
use godless_crdt::codec;
use godless_crdt::{Index, Link, Namespace};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::chunk::{self, ChunkRecord, DEFAULT_CHUNK_SIZE_LIMIT};
use crate::content::{verify_block, ContentStore};
use crate::error::Error;
use crate::keystore::KeyStore;

/// Attempts per blob operation when the store reports itself unavailable.
const COS_RETRIES: u32 = 3;
/// Initial backoff between attempts; doubles each retry.
const COS_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

/// Load state of a chunk: absent from the map is `Unloaded`, then `Loading`
/// exactly once, then `Loaded` for the lifetime of the resolver.
#[derive(Debug)]
enum Slot {
    Loading(broadcast::Sender<()>),
    Loaded(Bytes),
}

#[derive(Debug, Clone)]
pub struct Resolver<S: ContentStore> {
    store: S,
    chunk_size_limit: usize,
    slots: Arc<Mutex<HashMap<Cid, Slot>>>,
}

impl<S: ContentStore> Resolver<S> {
    pub fn new(store: S) -> Self {
        Resolver {
            store,
            chunk_size_limit: DEFAULT_CHUNK_SIZE_LIMIT,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_chunk_size_limit(mut self, limit: usize) -> Self {
        self.chunk_size_limit = limit;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch one blob, hash-verified, with at-most-one-fetch coalescing.
    async fn load_verified(&self, cid: &Cid) -> Result<Bytes, Error> {
        loop {
            let mut rx = {
                let mut slots = self.slots.lock();
                match slots.get(cid) {
                    Some(Slot::Loaded(bytes)) => return Ok(bytes.clone()),
                    Some(Slot::Loading(tx)) => tx.subscribe(),
                    None => {
                        let (tx, _) = broadcast::channel(1);
                        slots.insert(*cid, Slot::Loading(tx));
                        break;
                    }
                }
            };
            // Whatever the fetcher's outcome, re-check the map. A failed
            // fetch clears the slot, and this reader takes over.
            let _ = rx.recv().await;
        }

        let result = self.fetch(cid).await;

        let tx = {
            let mut slots = self.slots.lock();
            let Some(Slot::Loading(tx)) = slots.remove(cid) else {
                unreachable!("loading slot owned by this fetcher");
            };
            if let Ok(bytes) = &result {
                slots.insert(*cid, Slot::Loaded(bytes.clone()));
            }
            tx
        };
        let _ = tx.send(());
        result
    }

    async fn fetch(&self, cid: &Cid) -> Result<Bytes, Error> {
        trace!(%cid, "fetching chunk");
        let bytes = retry_transient(|| self.store.cat(cid)).await?;
        match verify_block(cid, &bytes) {
            Some(true) => {}
            Some(false) => return Err(Error::corrupt(*cid, "hash mismatch")),
            None => warn!(%cid, code = cid.hash().code(), "unknown hash function, skipping verification"),
        }
        Ok(bytes)
    }

    /// Load and decode the index manifest behind a head link.
    ///
    /// Signature verification is the caller's policy: local heads may be
    /// unsigned, while the replicator verifies before ever calling this.
    #[tracing::instrument(skip(self))]
    pub async fn load_index(&self, head: &Link) -> Result<Index, Error> {
        let cid = *head.target();
        let bytes = self.load_verified(&cid).await?;
        codec::decode_index(&bytes).map_err(|err| Error::corrupt(cid, err))
    }

    /// Materialize the namespace described by an index.
    ///
    /// Breadth-first over chunk links; traversal order does not affect the
    /// result because the fold is a semilattice join. Any failure aborts the
    /// whole load; a partial namespace never escapes.
    #[tracing::instrument(skip(self, index))]
    pub async fn load_namespace(&self, index: &Index) -> Result<Namespace, Error> {
        let mut queue: VecDeque<Cid> = index.all_links().iter().map(|l| *l.target()).collect();
        let mut visited: HashSet<Cid> = queue.iter().copied().collect();
        let mut ns = Namespace::empty();
        let mut chunks = 0usize;

        while let Some(cid) = queue.pop_front() {
            let bytes = self.load_verified(&cid).await?;
            let (record, trailing) =
                ChunkRecord::decode(&bytes).map_err(|err| Error::corrupt(cid, err))?;
            if trailing > 0 {
                warn!(%cid, trailing, "trailing bytes after chunk record");
            }
            ns = ns.join(&record.part);
            chunks += 1;
            for child in record.children {
                if visited.insert(child) {
                    queue.push_back(child);
                }
            }
        }

        debug!(chunks, tables = ns.len(), "loaded namespace");
        Ok(ns)
    }

    /// Load the full state behind a head link.
    pub async fn load_head(&self, head: &Link) -> Result<(Index, Namespace), Error> {
        let index = self.load_index(head).await?;
        let ns = self.load_namespace(&index).await?;
        Ok((index, ns))
    }

    /// Like [`Resolver::load_head`], but the link must carry a signature
    /// verifying against `keys` before anything is fetched.
    pub async fn load_head_verified(
        &self,
        head: &Link,
        keys: &KeyStore,
    ) -> Result<(Index, Namespace), Error> {
        if !keys.verify(head) {
            return Err(Error::SignatureInvalid(*head.target()));
        }
        self.load_head(head).await
    }

    /// Persist a namespace: chunks children-first, then the manifest, signed
    /// with every private identity in `keys`.
    #[tracing::instrument(skip(self, ns, keys))]
    pub async fn store_namespace(
        &self,
        ns: &Namespace,
        keys: &KeyStore,
    ) -> Result<(Link, Index), Error> {
        let parts = chunk::split(ns, self.chunk_size_limit);

        // All chunks but the first are leaves; the first carries the links
        // to the rest, so the whole DAG is reachable from one root.
        let mut child_cids = Vec::with_capacity(parts.len().saturating_sub(1));
        for part in &parts[1..] {
            let cid = self.add_cached(ChunkRecord::leaf(part.clone()).encode()).await?;
            child_cids.push(cid);
        }
        let root = ChunkRecord {
            part: parts[0].clone(),
            children: child_cids.clone(),
        };
        let root_cid = self.add_cached(root.encode()).await?;

        let mut chunk_cids = Vec::with_capacity(parts.len());
        chunk_cids.push(root_cid);
        chunk_cids.extend(child_cids);

        let index = Index::make(parts.iter().zip(&chunk_cids).flat_map(|(part, cid)| {
            let link = Link::unsigned(*cid);
            part.table_names()
                .map(|table| (table.clone(), BTreeSet::from([link.clone()])))
                .collect::<Vec<_>>()
        }));

        let index_cid = self.add_cached(codec::encode_index(&index)).await?;
        let head = keys.sign_link(index_cid);
        debug!(chunks = chunk_cids.len(), %index_cid, "persisted namespace");
        Ok((head, index))
    }

    /// Add a blob and prime the load cache with it, so a subsequent read of
    /// our own write never refetches.
    async fn add_cached(&self, bytes: Bytes) -> Result<Cid, Error> {
        let cid = retry_transient(|| self.store.add(bytes.clone())).await?;
        self.slots.lock().entry(cid).or_insert(Slot::Loaded(bytes));
        Ok(cid)
    }
}

/// Retry an operation while the store reports itself unavailable, with
/// doubling backoff. Other errors pass straight through.
async fn retry_transient<T, F, Fut>(mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut delay = COS_BACKOFF;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(Error::CosUnavailable(reason)) if attempt < COS_RETRIES => {
                warn!(attempt, %reason, "content store unavailable, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemStore;
    use godless_crdt::{Entry, Row, Table};

    fn sample(rows: usize) -> Namespace {
        Namespace::make((0..rows).map(|i| {
            (
                format!("table{}", i % 3).into(),
                Table::make([(
                    format!("row{i:03}").into(),
                    Row::make([("e".into(), Entry::make([format!("p{i}")]))]),
                )]),
            )
        }))
    }

    #[tokio::test]
    async fn store_then_load_roundtrips() {
        let resolver = Resolver::new(MemStore::new()).with_chunk_size_limit(200);
        let keys = KeyStore::new();
        let ns = sample(40);

        let (head, index) = resolver.store_namespace(&ns, &keys).await.unwrap();
        assert!(index.all_links().len() > 1, "expected a multi-chunk write");

        // A fresh resolver over the same store sees the same value.
        let reader = Resolver::new(resolver.store().clone());
        let (loaded_index, loaded) = reader.load_head(&head).await.unwrap();
        assert_eq!(loaded_index, index);
        assert_eq!(loaded, ns);
    }

    #[tokio::test]
    async fn unchanged_data_keeps_its_addresses() {
        let store = MemStore::new();
        let keys = KeyStore::new();
        let ns = sample(10);

        let (a, _) = Resolver::new(store.clone())
            .store_namespace(&ns, &keys)
            .await
            .unwrap();
        let (b, _) = Resolver::new(store)
            .store_namespace(&ns, &keys)
            .await
            .unwrap();
        assert_eq!(a.target(), b.target());
    }

    #[tokio::test]
    async fn corrupt_chunk_aborts_the_load() {
        let store = MemStore::new();
        let keys = KeyStore::new();
        let resolver = Resolver::new(store.clone()).with_chunk_size_limit(150);
        let (head, index) = resolver
            .store_namespace(&sample(30), &keys)
            .await
            .unwrap();

        // Corrupt one chunk in place, bypassing the content addressing.
        let victim = *index.all_links().iter().next().unwrap().target();
        store
            .blobs_mut()
            .insert(victim, Bytes::from_static(b"garbage"));

        let reader = Resolver::new(store.clone());
        let err = reader.load_head(&head).await.unwrap_err();
        assert!(matches!(err, Error::CorruptChunk { .. }), "{err}");
    }

    /// Store wrapper counting `cat` calls, to pin down the
    /// at-most-one-fetch invariant.
    #[derive(Debug, Clone)]
    struct CountingStore {
        inner: MemStore,
        cats: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ContentStore for CountingStore {
        async fn cat(&self, cid: &Cid) -> Result<Bytes, Error> {
            self.cats.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.cat(cid).await
        }

        async fn add(&self, data: Bytes) -> Result<Cid, Error> {
            self.inner.add(data).await
        }

        async fn publish(&self, topic: &str, data: Bytes) -> Result<(), Error> {
            self.inner.publish(topic, data).await
        }

        async fn subscribe(
            &self,
            topic: &str,
        ) -> Result<tokio::sync::mpsc::Receiver<Bytes>, Error> {
            self.inner.subscribe(topic).await
        }

        async fn ping(&self) -> Result<(), Error> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn verified_load_rejects_unknown_signers() {
        use godless_crdt::Identity;
        use rand::rngs::OsRng;

        let signer = KeyStore::new();
        signer.insert_identity(Identity::generate(&mut OsRng));

        let resolver = Resolver::new(MemStore::new());
        let ns = sample(3);
        let (head, _) = resolver.store_namespace(&ns, &signer).await.unwrap();
        assert!(head.is_signed());

        // A receiver who does not know the signer refuses before fetching.
        let stranger = KeyStore::new();
        stranger.insert_identity(Identity::generate(&mut OsRng));
        let err = resolver
            .load_head_verified(&head, &stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid(_)), "{err}");

        // Knowing any one of the signing identities is enough.
        let (_, loaded) = resolver.load_head_verified(&head, &signer).await.unwrap();
        assert_eq!(loaded, ns);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_store_errors_are_retried() {
        #[derive(Debug, Clone)]
        struct FlakyStore {
            inner: MemStore,
            failures: Arc<std::sync::atomic::AtomicUsize>,
        }

        #[async_trait::async_trait]
        impl ContentStore for FlakyStore {
            async fn cat(&self, cid: &Cid) -> Result<Bytes, Error> {
                let left = self.failures.load(std::sync::atomic::Ordering::SeqCst);
                if left > 0 {
                    self.failures
                        .store(left - 1, std::sync::atomic::Ordering::SeqCst);
                    return Err(Error::CosUnavailable("flaky".to_string()));
                }
                self.inner.cat(cid).await
            }

            async fn add(&self, data: Bytes) -> Result<Cid, Error> {
                self.inner.add(data).await
            }

            async fn publish(&self, topic: &str, data: Bytes) -> Result<(), Error> {
                self.inner.publish(topic, data).await
            }

            async fn subscribe(
                &self,
                topic: &str,
            ) -> Result<tokio::sync::mpsc::Receiver<Bytes>, Error> {
                self.inner.subscribe(topic).await
            }

            async fn ping(&self) -> Result<(), Error> {
                self.inner.ping().await
            }
        }

        let store = MemStore::new();
        let keys = KeyStore::new();
        let ns = sample(3);
        let (head, _) = Resolver::new(store.clone())
            .store_namespace(&ns, &keys)
            .await
            .unwrap();

        // Two failures against three attempts: the load succeeds.
        let flaky = FlakyStore {
            inner: store.clone(),
            failures: Arc::new(std::sync::atomic::AtomicUsize::new(2)),
        };
        let (_, loaded) = Resolver::new(flaky).load_head(&head).await.unwrap();
        assert_eq!(loaded, ns);

        // A store that stays down surfaces the error.
        let dead = FlakyStore {
            inner: store,
            failures: Arc::new(std::sync::atomic::AtomicUsize::new(usize::MAX)),
        };
        let err = Resolver::new(dead).load_head(&head).await.unwrap_err();
        assert!(matches!(err, Error::CosUnavailable(_)), "{err}");
    }

    #[tokio::test]
    async fn concurrent_readers_share_one_fetch() {
        let store = MemStore::new();
        let keys = KeyStore::new();
        let ns = sample(20);
        let (head, index) = Resolver::new(store.clone())
            .with_chunk_size_limit(200)
            .store_namespace(&ns, &keys)
            .await
            .unwrap();

        let counting = CountingStore {
            inner: store,
            cats: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        };
        let reader = Resolver::new(counting.clone());
        let (a, b) = tokio::join!(reader.load_head(&head), reader.load_head(&head));
        assert_eq!(a.unwrap().1, ns);
        assert_eq!(b.unwrap().1, ns);

        // One fetch for the index blob plus one per distinct chunk, no
        // matter how many readers raced.
        let distinct = 1 + index.all_links().len();
        assert_eq!(
            counting.cats.load(std::sync::atomic::Ordering::SeqCst),
            distinct
        );
    }
}
