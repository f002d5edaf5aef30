//! Bounded write queues and background worker pools.
//!
//! Durable writes are pushed onto a bounded channel without blocking and
//! drained by a fixed set of Tokio tasks. A full queue drops the write and
//! tells the submitter so; nothing upstream ever waits on storage.
//!
//! Each backend mode gets its own lane: a queue plus its workers. Only the
//! relational lane passes through the shared [`RateGovernor`], so a
//! governed backlog never holds back embedded writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chainstore_core::{BackendError, BackendMode, CompositeKey, EntityKind, WriterConfig};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{DurableBackend, DurableWrite};
use crate::metrics::WriteMetrics;
use crate::rate_governor::RateGovernor;

type WriteResult = Result<(), BackendError>;
type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<WriteJob>>>;

/// A queued write and the backend it is bound for.
struct WriteJob {
    write: DurableWrite,
    target: Arc<dyn DurableBackend>,
    reply: oneshot::Sender<WriteResult>,
}

/// Handle to the outcome of one queued durable write.
///
/// Dropping it keeps fire-and-forget semantics; the write still happens.
#[derive(Debug)]
pub struct WriteReceipt {
    pub target: BackendMode,
    pub kind: EntityKind,
    pub key: CompositeKey,
    rx: oneshot::Receiver<WriteResult>,
}

impl WriteReceipt {
    /// Wait for the worker to finish this write.
    ///
    /// Returns [`BackendError::Abandoned`] if the worker went away without
    /// answering.
    pub async fn wait(self) -> WriteResult {
        self.rx.await.unwrap_or(Err(BackendError::Abandoned))
    }
}

/// Why a write could not be queued.
#[derive(Debug)]
pub enum QueueError {
    /// The queue is at capacity.
    Full(DurableWrite),
    /// The pool has been shut down, or was never started.
    Closed(DurableWrite),
}

/// Worker pools draining one bounded queue per backend mode.
pub struct WriterPool {
    embedded: Option<mpsc::Sender<WriteJob>>,
    relational: Option<mpsc::Sender<WriteJob>>,
    closed: AtomicBool,
    stop: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WriterPool {
    /// Start an embedded and a relational lane, each with `config.workers`
    /// tasks behind a queue of `config.queue_depth`. Zero values are
    /// clamped to one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        config: WriterConfig,
        governor: Arc<RateGovernor>,
        metrics: Arc<WriteMetrics>,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        let mut workers = Vec::new();

        let embedded = spawn_lane(
            BackendMode::EmbeddedKv,
            config,
            None,
            &metrics,
            &stop,
            &mut workers,
        );
        let relational = spawn_lane(
            BackendMode::Relational,
            config,
            Some(governor),
            &metrics,
            &stop,
            &mut workers,
        );

        info!(
            workers_per_lane = config.workers.max(1),
            queue_depth = config.queue_depth.max(1),
            "Durable write pool started"
        );

        Self {
            embedded: Some(embedded),
            relational: Some(relational),
            closed: AtomicBool::new(false),
            stop,
            workers: Mutex::new(workers),
        }
    }

    /// A pool that accepts nothing. Used when persistence is disabled.
    pub fn disabled() -> Self {
        let (stop, _) = watch::channel(true);
        Self {
            embedded: None,
            relational: None,
            closed: AtomicBool::new(true),
            stop,
            workers: Mutex::new(Vec::new()),
        }
    }

    fn lane(&self, target: BackendMode) -> Option<&mpsc::Sender<WriteJob>> {
        match target {
            BackendMode::Relational => self.relational.as_ref(),
            BackendMode::EmbeddedKv => self.embedded.as_ref(),
            BackendMode::None => None,
        }
    }

    /// Queue `write` for `target` without waiting.
    pub fn submit(
        &self,
        write: DurableWrite,
        target: Arc<dyn DurableBackend>,
    ) -> Result<WriteReceipt, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed(write));
        }
        let mode = target.mode();
        let Some(tx) = self.lane(mode) else {
            return Err(QueueError::Closed(write));
        };

        let (reply, rx) = oneshot::channel();
        let receipt = WriteReceipt {
            target: mode,
            kind: write.kind,
            key: write.key.clone(),
            rx,
        };

        match tx.try_send(WriteJob {
            write,
            target,
            reply,
        }) {
            Ok(()) => Ok(receipt),
            Err(mpsc::error::TrySendError::Full(job)) => Err(QueueError::Full(job.write)),
            Err(mpsc::error::TrySendError::Closed(job)) => Err(QueueError::Closed(job.write)),
        }
    }

    /// Free queue slots in the lane for `target`, or zero once closed.
    pub fn capacity(&self, target: BackendMode) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.lane(target).map(|tx| tx.capacity()).unwrap_or(0)
    }

    /// Close the queues and wait for the workers to drain them.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.stop.send_replace(true);

        let workers: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        if workers.is_empty() {
            return;
        }

        let count = workers.len();
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Durable write worker terminated abnormally");
            }
        }
        info!(workers = count, "Durable write pool stopped");
    }
}

fn spawn_lane(
    lane: BackendMode,
    config: WriterConfig,
    governor: Option<Arc<RateGovernor>>,
    metrics: &Arc<WriteMetrics>,
    stop: &watch::Sender<bool>,
    workers: &mut Vec<JoinHandle<()>>,
) -> mpsc::Sender<WriteJob> {
    let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
    let rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));

    for id in 0..config.workers.max(1) {
        workers.push(tokio::spawn(run_worker(
            id,
            lane,
            Arc::clone(&rx),
            stop.subscribe(),
            governor.clone(),
            Arc::clone(metrics),
        )));
    }
    tx
}

/// Next job from the lane, or `None` once it is closed and drained.
///
/// A stop signal closes the receiver, after which `recv` yields what is
/// still buffered and then `None`.
async fn next_job(rx: &SharedReceiver, stop: &mut watch::Receiver<bool>) -> Option<WriteJob> {
    let mut rx = rx.lock().await;
    tokio::select! {
        job = rx.recv() => job,
        () = stopped(stop) => {
            rx.close();
            rx.recv().await
        }
    }
}

/// Resolves once a stop is signalled or the pool is dropped.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn run_worker(
    id: usize,
    lane: BackendMode,
    rx: SharedReceiver,
    mut stop: watch::Receiver<bool>,
    governor: Option<Arc<RateGovernor>>,
    metrics: Arc<WriteMetrics>,
) {
    while let Some(job) = next_job(&rx, &mut stop).await {
        if let Some(governor) = &governor {
            if !governor.try_acquire() {
                WriteMetrics::incr(&metrics.governor_waits);
                governor.acquire().await;
            }
        }

        let result = job.target.upsert(&job.write).await;
        match &result {
            Ok(()) => {
                WriteMetrics::incr(&metrics.written);
                debug!(
                    worker = id,
                    chain_id = job.write.chain_id,
                    kind = %job.write.kind,
                    key = %job.write.key,
                    backend = %lane,
                    "Durable write completed"
                );
            }
            Err(e) => {
                WriteMetrics::incr(&metrics.failed);
                warn!(
                    worker = id,
                    chain_id = job.write.chain_id,
                    kind = %job.write.kind,
                    key = %job.write.key,
                    backend = %lane,
                    error = %e,
                    "Durable write failed"
                );
            }
        }

        // The submitter may have dropped its receipt.
        let _ = job.reply.send(result);
    }
    debug!(worker = id, backend = %lane, "Write queue closed, worker exiting");
}
