//! Peer-to-peer replication over the pub/sub overlay.
//!
//! A publisher task periodically announces the signed local head on every
//! configured topic. A reader task per topic verifies incoming head links,
//! drops unverifiable or already-known heads, and merges the rest through
//! the same API path as any other mutation. Replication is idempotent: a
//! head received twice, or one already subsumed by local state, changes
//! nothing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use godless_crdt::Link;
use godless_store::{ContentStore, HeadCache, KeyStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::api::Request;
use crate::scheduler::ApiHandle;

pub struct Replicator<S: ContentStore> {
    pub api: ApiHandle,
    pub store: S,
    pub keys: KeyStore,
    pub head: Arc<dyn HeadCache>,
    pub topics: Vec<String>,
    pub interval: Duration,
}

impl<S: ContentStore> Replicator<S> {
    /// Start the publisher and one reader per topic.
    pub fn spawn(
        self,
        cancel: CancellationToken,
        errors: mpsc::Sender<anyhow::Error>,
    ) -> Vec<JoinHandle<()>> {
        let inner = Arc::new(self);
        let mut tasks = Vec::new();

        {
            let inner = inner.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                inner.publish_loop(cancel).await;
            }));
        }

        for topic in inner.topics.clone() {
            let inner = inner.clone();
            let cancel = cancel.clone();
            let errors = errors.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = inner.subscribe_loop(&topic, cancel).await {
                    let _ = errors
                        .send(err.context(format!("replication on topic {topic:?}")))
                        .await;
                }
            }));
        }

        tasks
    }

    async fn publish_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.publish_head().await {
                        warn!(%err, "failed to publish head");
                    }
                }
            }
        }
    }

    /// Announce the current head, re-signed with every local identity.
    async fn publish_head(&self) -> anyhow::Result<()> {
        let Some(head) = self.head.head().await? else {
            trace!("no head to publish yet");
            return Ok(());
        };
        let signed = self.keys.sign_link(*head.target());
        let bytes = Bytes::from(postcard::to_allocvec(&signed)?);
        for topic in &self.topics {
            self.store.publish(topic, bytes.clone()).await?;
            trace!(topic, head = %signed, "published head");
        }
        Ok(())
    }

    async fn subscribe_loop(&self, topic: &str, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut rx = self.store.subscribe(topic).await?;
        debug!(topic, "subscribed");
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.handle_message(topic, &message).await;
        }
        Ok(())
    }

    async fn handle_message(&self, topic: &str, message: &[u8]) {
        let link: Link = match postcard::from_bytes(message) {
            Ok(link) => link,
            Err(err) => {
                warn!(topic, %err, "undecodable head message");
                return;
            }
        };

        // Every inbound head must verify before we touch the store.
        if !self.keys.verify(&link) {
            warn!(topic, head = %link, "dropping unverifiable head");
            return;
        }

        // Our own announcements and repeats are no-ops; skip the fetch.
        match self.head.head().await {
            Ok(Some(current)) if current.target() == link.target() => {
                trace!(topic, head = %link, "head already current");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(topic, %err, "head cache unavailable");
                return;
            }
        }

        debug!(topic, head = %link, "merging remote head");
        match self.api.send(Request::Replicate(vec![link])).await {
            Ok(response) => {
                trace!(topic, msg = %response.msg, "replication done");
                // Share the merged state promptly rather than waiting for
                // the next tick.
                if let Err(err) = self.publish_head().await {
                    warn!(%err, "failed to publish merged head");
                }
            }
            Err(err) => warn!(topic, %err, "replication failed"),
        }
    }
}
