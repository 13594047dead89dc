//! Node assembly: wire the store, head cache, key store, scheduler, web
//! service and replicator together.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use cid::Cid;
use godless_crdt::Link;
use godless_store::{ContentStore, HeadCache, KeyStore, ResidentHeadCache, Resolver};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::http;
use crate::replicator::Replicator;
use crate::scheduler::{self, ApiHandle, BufferQueue, RequestQueue};

/// How long shutdown waits for in-flight work before aborting tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Node options. Field defaults follow [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Address for the web service; `None` disables it.
    pub web_addr: Option<SocketAddr>,
    /// Optional existing index to load on startup.
    pub index_hash: Option<String>,
    /// Abort startup when the content store cannot be reached.
    pub fail_early: bool,
    /// Period between head announcements.
    pub replicate_interval: Duration,
    /// Pub/sub topics to replicate on. Empty disables replication.
    pub topics: Vec<String>,
    /// Number of simultaneous query workers.
    pub api_query_limit: usize,
    /// Admission queue capacity.
    pub buffer_size: usize,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Encoded chunk size threshold for persistence.
    pub chunk_size_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            web_addr: None,
            index_hash: None,
            fail_early: false,
            replicate_interval: Duration::from_secs(60),
            topics: Vec::new(),
            api_query_limit: 1,
            buffer_size: 1024,
            request_timeout: Duration::from_secs(30),
            chunk_size_limit: godless_store::DEFAULT_CHUNK_SIZE_LIMIT,
        }
    }
}

/// A running godless node.
#[derive(Debug)]
pub struct Node {
    api: ApiHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    errors: Option<mpsc::Receiver<anyhow::Error>>,
}

impl Node {
    /// Connect to the content store, restore the head, and launch the API,
    /// web service and replicator.
    pub async fn new<S: ContentStore>(
        store: S,
        keys: KeyStore,
        options: Options,
    ) -> Result<Node> {
        Self::with_head_cache(store, keys, Arc::new(ResidentHeadCache::new()), options).await
    }

    /// Like [`Node::new`] with a caller-supplied head cache, for deployments
    /// keeping the head in a remote cache.
    pub async fn with_head_cache<S: ContentStore>(
        store: S,
        keys: KeyStore,
        head: Arc<dyn HeadCache>,
        options: Options,
    ) -> Result<Node> {
        match store.ping().await {
            Ok(()) => {}
            Err(err) if options.fail_early => {
                return Err(err).context("content store unreachable");
            }
            Err(err) => warn!(%err, "content store unreachable, continuing anyway"),
        }

        if let Some(hash) = &options.index_hash {
            let cid = Cid::from_str(hash).context("invalid index hash")?;
            let link = Link::unsigned(cid);
            if head.compare_and_swap(None, &link).await? {
                head.commit().await?;
                info!(%cid, "head restored from index hash");
            }
        }

        let cancel = CancellationToken::new();
        let (errors_tx, errors_rx) = mpsc::channel(16);

        let resolver = Resolver::new(store.clone()).with_chunk_size_limit(options.chunk_size_limit);
        let queue: Arc<dyn RequestQueue> = Arc::new(BufferQueue::new(options.buffer_size));
        let (api, mut tasks) = scheduler::launch(
            resolver,
            head.clone(),
            keys.clone(),
            queue,
            options.api_query_limit,
            options.request_timeout,
            cancel.clone(),
        );

        if let Some(addr) = options.web_addr {
            let api = api.clone();
            let cancel = cancel.clone();
            let errors = errors_tx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = http::serve(addr, api, cancel).await {
                    let _ = errors.send(err).await;
                }
            }));
        }

        if !options.topics.is_empty() {
            let replicator = Replicator {
                api: api.clone(),
                store,
                keys,
                head,
                topics: options.topics.clone(),
                interval: options.replicate_interval,
            };
            tasks.extend(replicator.spawn(cancel.clone(), errors_tx));
        }

        Ok(Node {
            api,
            cancel,
            tasks,
            errors: Some(errors_rx),
        })
    }

    /// Handle for submitting requests in-process.
    pub fn api(&self) -> ApiHandle {
        self.api.clone()
    }

    /// Errors from background tasks. The stream closing means the node has
    /// shut down for good. Can only be taken once.
    pub fn errors(&mut self) -> Option<mpsc::Receiver<anyhow::Error>> {
        self.errors.take()
    }

    /// Signal shutdown without waiting. Safe to call any number of times.
    pub fn signal_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stop all node tasks: cancel, wait out the grace period, then abort
    /// whatever is still running.
    pub async fn shutdown(mut self) {
        info!("shutting down");
        self.cancel.cancel();
        let grace = tokio::time::sleep(SHUTDOWN_GRACE);
        tokio::pin!(grace);

        for task in &mut self.tasks {
            tokio::select! {
                _ = &mut grace => break,
                _ = &mut *task => {}
            }
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}
