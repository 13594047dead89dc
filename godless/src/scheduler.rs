//! Request admission and execution.
//!
//! Requests enter through a bounded queue, are pulled by a fixed pool of
//! workers, and reply over oneshot channels. Read-only requests run in
//! parallel across the pool; mutating requests serialize on a single writer
//! token and advance the head through compare-and-swap, retrying a bounded
//! number of times before giving up with a conflict.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use godless_crdt::Namespace;
use godless_query::Outcome;
use godless_store::{ContentStore, HeadCache, KeyStore, Resolver};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::api::{ApiError, Payload, ReflectionType, Request, Response};

/// CAS attempts before a mutation reports `Conflict`.
pub const MAX_CAS_RETRIES: usize = 8;

/// A queued request with its reply channel and deadline.
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub deadline: Instant,
    reply: oneshot::Sender<Result<Response, ApiError>>,
}

/// Admission queue. The resident implementation is a bounded FIFO; a
/// deployment can plug in a remote or fairness-aware queue.
#[async_trait]
pub trait RequestQueue: Send + Sync + Debug {
    /// Enqueue a request, waiting when the buffer is full.
    async fn admit(&self, envelope: Envelope) -> Result<(), ApiError>;

    /// Dequeue the next request; `None` once the queue has shut down.
    async fn next(&self) -> Option<Envelope>;
}

/// Bounded in-process FIFO queue.
#[derive(Debug)]
pub struct BufferQueue {
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<mpsc::Receiver<Envelope>>,
}

impl BufferQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        BufferQueue {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl RequestQueue for BufferQueue {
    async fn admit(&self, envelope: Envelope) -> Result<(), ApiError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| ApiError::Internal("request queue closed".to_string()))
    }

    async fn next(&self) -> Option<Envelope> {
        self.rx.lock().await.recv().await
    }
}

/// Cheap handle for submitting requests to the node.
#[derive(Debug, Clone)]
pub struct ApiHandle {
    queue: Arc<dyn RequestQueue>,
    timeout: Duration,
}

impl ApiHandle {
    /// Submit a request and wait for its response.
    pub async fn send(&self, request: Request) -> Result<Response, ApiError> {
        let (reply, rx) = oneshot::channel();
        let envelope = Envelope {
            request,
            deadline: Instant::now() + self.timeout,
            reply,
        };
        self.queue.admit(envelope).await?;
        rx.await.map_err(|_| ApiError::Cancelled)?
    }
}

/// Start the worker pool. Returns the client handle and the worker tasks.
pub fn launch<S: ContentStore>(
    resolver: Resolver<S>,
    head: Arc<dyn HeadCache>,
    keys: KeyStore,
    queue: Arc<dyn RequestQueue>,
    query_limit: usize,
    timeout: Duration,
    cancel: CancellationToken,
) -> (ApiHandle, Vec<JoinHandle<()>>) {
    let shared = Arc::new(Shared {
        resolver,
        head,
        keys,
        writer: Mutex::new(()),
    });

    let workers = query_limit.max(1);
    let tasks = (0..workers)
        .map(|worker| {
            let shared = shared.clone();
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                worker_loop(worker, shared, queue, cancel).await;
            })
        })
        .collect();

    (ApiHandle { queue, timeout }, tasks)
}

async fn worker_loop<S: ContentStore>(
    worker: usize,
    shared: Arc<Shared<S>>,
    queue: Arc<dyn RequestQueue>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = queue.next() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        trace!(worker, "dispatching request");

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            result = tokio::time::timeout_at(envelope.deadline, shared.handle(&envelope.request)) => {
                result.unwrap_or(Err(ApiError::Timeout))
            }
        };

        if let Err(err) = &result {
            debug!(worker, %err, "request failed");
        }
        // The caller may have given up; that is not our problem.
        let _ = envelope.reply.send(result);
    }
    trace!(worker, "worker stopped");
}

struct Shared<S: ContentStore> {
    resolver: Resolver<S>,
    head: Arc<dyn HeadCache>,
    keys: KeyStore,
    /// Single logical writer: mutations in this process take this token for
    /// the whole load-execute-persist-swap sequence.
    writer: Mutex<()>,
}

impl<S: ContentStore> Shared<S> {
    async fn handle(&self, request: &Request) -> Result<Response, ApiError> {
        match request {
            Request::Query(query) => {
                query.validate()?;
                if query.is_mutating() {
                    self.mutate("join ok", |ns| {
                        match query.execute(ns)? {
                            Outcome::Join(delta) => Ok(delta),
                            // A mutating query cannot produce a selection.
                            Outcome::Select(_) => {
                                Err(ApiError::Internal("join produced a selection".to_string()))
                            }
                        }
                    })
                    .await
                } else {
                    let ns = self.current_namespace().await?;
                    match query.execute(&ns)? {
                        Outcome::Select(result) => Ok(Response::with_payload(
                            "select ok",
                            Payload::Namespace(result),
                        )),
                        Outcome::Join(_) => {
                            Err(ApiError::Internal("select produced a join".to_string()))
                        }
                    }
                }
            }
            Request::Reflect(kind) => self.reflect(*kind).await,
            Request::Replicate(links) => {
                let mut remote = Namespace::empty();
                for link in links {
                    // Local plumbing may submit unsigned links; a signed
                    // link must verify against the key store.
                    let (_, ns) = if link.is_signed() {
                        self.resolver.load_head_verified(link, &self.keys).await?
                    } else {
                        self.resolver.load_head(link).await?
                    };
                    remote = remote.join(&ns);
                }
                self.mutate("replicate ok", move |_| Ok(remote.clone())).await
            }
        }
    }

    async fn reflect(&self, kind: ReflectionType) -> Result<Response, ApiError> {
        match kind {
            ReflectionType::HeadPath => match self.head.head().await? {
                Some(link) => Ok(Response::with_payload(
                    "reflect ok",
                    Payload::Path(link.target().to_string()),
                )),
                None => Err(ApiError::NotFound("no head yet".to_string())),
            },
            ReflectionType::Index => {
                let index = match self.head.head().await? {
                    Some(link) => self.resolver.load_index(&link).await?,
                    None => Default::default(),
                };
                Ok(Response::with_payload("reflect ok", Payload::Index(index)))
            }
            ReflectionType::DumpNamespace => {
                let ns = self.current_namespace().await?;
                Ok(Response::with_payload(
                    "reflect ok",
                    Payload::Namespace(ns),
                ))
            }
        }
    }

    async fn current_namespace(&self) -> Result<Namespace, ApiError> {
        match self.head.head().await? {
            Some(link) => Ok(self.resolver.load_head(&link).await?.1),
            None => Ok(Namespace::empty()),
        }
    }

    /// Run one mutation: load the head, compute the delta against the loaded
    /// namespace, persist the joined value and swap the head. A lost swap
    /// reloads and re-executes against the new head.
    async fn mutate<F>(&self, ok_msg: &str, delta_of: F) -> Result<Response, ApiError>
    where
        F: Fn(&Namespace) -> Result<Namespace, ApiError>,
    {
        let _token = self.writer.lock().await;

        for attempt in 0..MAX_CAS_RETRIES {
            let old = self.head.head().await?;
            let ns = match &old {
                Some(link) => self.resolver.load_head(link).await?.1,
                None => Namespace::empty(),
            };

            let delta = delta_of(&ns)?;
            let updated = ns.join(&delta);
            if updated == ns {
                // Already subsumed; nothing to persist.
                return Ok(Response::ok(format!("{ok_msg} (no change)")));
            }

            let (new_head, _) = self
                .resolver
                .store_namespace(&updated, &self.keys)
                .await?;
            if self.head.compare_and_swap(old.as_ref(), &new_head).await? {
                self.head.commit().await?;
                debug!(head = %new_head, "head advanced");
                return Ok(Response::ok(ok_msg));
            }
            warn!(attempt, "head moved during mutation, retrying");
        }

        Err(ApiError::Conflict)
    }
}
