// src/heavycheck/mod.rs

//! --- Heavy Check ---
//!
//! Expensive cryptographic verification of events, block-vote sets and epoch
//! votes. Items are admitted into a budgeted queue without ever blocking the
//! caller; a dispatcher hands them to the blocking pool, bounded by a
//! semaphore of `max_tasks` verification slots. The result of each item is
//! delivered exactly once through its callback, in no particular order across
//! items.
//!
//! The synchronous `validate_*` methods run the very same verification on the
//! caller's thread.

pub mod adapters;
pub mod queue;

use crate::types::{verify_bytes, BlockVotes, Epoch, EpochPubkeys, EpochVote, Event, ValidatorId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use adapters::{BvsOnly, EvOnly, EventsOnly, Only};
pub use queue::{BudgetPermit, Metric, TaskBudget};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeavyCheckError {
    #[error("Event of epoch {event} is not relevant to current epoch {current}")]
    NotRelevant { event: Epoch, current: Epoch },
    #[error("Creator {0} has no known public key in the epoch")]
    Auth(ValidatorId),
    #[error("Event has wrong signature")]
    WrongEventSig,
    #[error("Event payload hash does not match its transactions")]
    WrongPayloadHash,
    #[error("Block votes are malformed")]
    MalformedBvs,
    #[error("Block votes have wrong signature")]
    WrongBvsSig,
    #[error("Block votes of unknown epoch {0}")]
    UnknownEpochBvs(Epoch),
    #[error("Epoch vote is malformed")]
    MalformedEv,
    #[error("Epoch vote has wrong signature")]
    WrongEvSig,
    #[error("Epoch vote of unknown epoch {0}")]
    UnknownEpochEv(Epoch),
    #[error("Heavy check queue is full")]
    QueueFull,
    #[error("No verification slot acquired within {0:?}")]
    Timeout(Duration),
    #[error("Heavy checker is terminated")]
    Terminated,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HeavyCheckConfig {
    /// Bound on queued plus in-flight items, by count and by bytes.
    pub buffer_limit: Metric,
    /// How long an item may wait for a verification slot.
    pub semaphore_timeout_ms: u64,
    /// Concurrently verified items.
    pub max_tasks: usize,
}

impl HeavyCheckConfig {
    pub fn semaphore_timeout(&self) -> Duration {
        Duration::from_millis(self.semaphore_timeout_ms)
    }
}

impl Default for HeavyCheckConfig {
    fn default() -> Self {
        Self {
            buffer_limit: Metric::new(3000, 15 * 1024 * 1024),
            semaphore_timeout_ms: 10_000,
            max_tasks: 512,
        }
    }
}

/// Public keys the verifier checks signatures against.
pub trait Reader: Send + Sync {
    /// Keys of the current epoch.
    fn epoch_pubkeys(&self) -> Arc<EpochPubkeys>;
    /// Keys of any epoch the node knows about.
    fn epoch_pubkeys_of(&self, epoch: Epoch) -> Option<Arc<EpochPubkeys>>;
}

/// One verifiable artifact.
#[derive(Clone, Debug)]
pub enum HeavyItem {
    Event(Arc<Event>),
    BlockVotes(Arc<BlockVotes>),
    EpochVote(Arc<EpochVote>),
}

impl HeavyItem {
    pub fn size(&self) -> u64 {
        match self {
            HeavyItem::Event(e) => e.size(),
            HeavyItem::BlockVotes(bvs) => bvs.size(),
            HeavyItem::EpochVote(ev) => ev.size(),
        }
    }
}

type OnValidated = Box<dyn FnOnce(Result<(), HeavyCheckError>) + Send + 'static>;

struct Task {
    item: HeavyItem,
    on_validated: OnValidated,
    budget: BudgetPermit,
}

impl Task {
    /// Gives the budget back, then reports.
    fn complete(self, result: Result<(), HeavyCheckError>) {
        let Task {
            on_validated,
            budget,
            ..
        } = self;
        drop(budget);
        on_validated(result);
    }
}

/// Counters of the verifier's activity.
#[derive(Debug, Default)]
struct Stats {
    verified: AtomicU64,
    rejected: AtomicU64,
    timeouts: AtomicU64,
    queue_full: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeavyCheckStats {
    pub verified: u64,
    pub rejected: u64,
    pub timeouts: u64,
    pub queue_full: u64,
}

/// Pure verification logic, shared by the queue and the synchronous path.
struct Verifier {
    reader: Arc<dyn Reader>,
    stats: Stats,
}

impl Verifier {
    fn verify(&self, item: &HeavyItem) -> Result<(), HeavyCheckError> {
        match item {
            HeavyItem::Event(e) => self.counted(|| self.verify_event(e)),
            HeavyItem::BlockVotes(bvs) => self.counted(|| self.verify_bvs(bvs)),
            HeavyItem::EpochVote(ev) => self.counted(|| self.verify_ev(ev)),
        }
    }

    fn counted(
        &self,
        check: impl FnOnce() -> Result<(), HeavyCheckError>,
    ) -> Result<(), HeavyCheckError> {
        self.stats.verified.fetch_add(1, Ordering::Relaxed);
        let res = check();
        if res.is_err() {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        }
        res
    }

    fn verify_event(&self, e: &Event) -> Result<(), HeavyCheckError> {
        let pubkeys = self.reader.epoch_pubkeys();
        if e.epoch != pubkeys.epoch {
            return Err(HeavyCheckError::NotRelevant {
                event: e.epoch,
                current: pubkeys.epoch,
            });
        }
        let key = pubkeys
            .get(e.creator)
            .ok_or(HeavyCheckError::Auth(e.creator))?;
        if Event::payload_hash_of(&e.transactions) != e.payload_hash {
            return Err(HeavyCheckError::WrongPayloadHash);
        }
        if !e.verify_signature(key) {
            return Err(HeavyCheckError::WrongEventSig);
        }
        Ok(())
    }

    fn verify_bvs(&self, bvs: &BlockVotes) -> Result<(), HeavyCheckError> {
        if bvs.votes.is_empty() || bvs.start == 0 {
            return Err(HeavyCheckError::MalformedBvs);
        }
        let pubkeys = self
            .reader
            .epoch_pubkeys_of(bvs.epoch)
            .ok_or(HeavyCheckError::UnknownEpochBvs(bvs.epoch))?;
        let key = pubkeys
            .get(bvs.creator)
            .ok_or(HeavyCheckError::Auth(bvs.creator))?;
        if !verify_bytes(key, &bvs.signing_bytes(), &bvs.signature) {
            return Err(HeavyCheckError::WrongBvsSig);
        }
        Ok(())
    }

    fn verify_ev(&self, ev: &EpochVote) -> Result<(), HeavyCheckError> {
        if ev.vote.is_zero() {
            return Err(HeavyCheckError::MalformedEv);
        }
        let pubkeys = self
            .reader
            .epoch_pubkeys_of(ev.epoch)
            .ok_or(HeavyCheckError::UnknownEpochEv(ev.epoch))?;
        let key = pubkeys
            .get(ev.creator)
            .ok_or(HeavyCheckError::Auth(ev.creator))?;
        if !verify_bytes(key, &ev.signing_bytes(), &ev.signature) {
            return Err(HeavyCheckError::WrongEvSig);
        }
        Ok(())
    }
}

struct Inner {
    config: HeavyCheckConfig,
    verifier: Arc<Verifier>,
    budget: Arc<TaskBudget>,
    slots: Arc<Semaphore>,
    tasks_tx: mpsc::UnboundedSender<Task>,
    tasks_rx: Mutex<Option<mpsc::UnboundedReceiver<Task>>>,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Asynchronous batch verifier. Cheap to clone; clones share one queue,
/// one budget and one pool of verification slots.
#[derive(Clone)]
pub struct Checker {
    inner: Arc<Inner>,
}

impl Checker {
    pub fn new(config: HeavyCheckConfig, reader: Arc<dyn Reader>) -> Self {
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                budget: TaskBudget::new(config.buffer_limit),
                slots: Arc::new(Semaphore::new(config.max_tasks)),
                verifier: Arc::new(Verifier {
                    reader,
                    stats: Stats::default(),
                }),
                tasks_tx,
                tasks_rx: Mutex::new(Some(tasks_rx)),
                shutdown: CancellationToken::new(),
                config,
            }),
        }
    }

    /// Spawns the dispatcher on the current tokio runtime. Items enqueued
    /// before start wait in the queue. Calling it twice is a no-op.
    pub fn start(&self) {
        let Some(rx) = self.inner.tasks_rx.lock().take() else {
            return;
        };
        info!(
            max_tasks = self.inner.config.max_tasks,
            buffer_num = self.inner.config.buffer_limit.num,
            buffer_size = self.inner.config.buffer_limit.size,
            "Starting heavy check dispatcher"
        );
        tokio::spawn(dispatch(
            rx,
            self.inner.verifier.clone(),
            self.inner.slots.clone(),
            self.inner.config.semaphore_timeout(),
            self.inner.shutdown.clone(),
        ));
    }

    /// Stops accepting items. Queued items are failed with `Terminated`;
    /// items already being verified still complete.
    pub fn stop(&self) {
        info!("Stopping heavy check dispatcher");
        self.inner.shutdown.cancel();
        // Never started: nobody else will drain the queue.
        if let Some(mut rx) = self.inner.tasks_rx.lock().take() {
            drain_terminated(&mut rx);
        }
    }

    pub fn overloaded(&self) -> bool {
        self.inner.budget.is_full()
    }

    pub fn buffer_used(&self) -> Metric {
        self.inner.budget.used()
    }

    pub fn stats(&self) -> HeavyCheckStats {
        let stats = &self.inner.verifier.stats;
        HeavyCheckStats {
            verified: stats.verified.load(Ordering::Relaxed),
            rejected: stats.rejected.load(Ordering::Relaxed),
            timeouts: stats.timeouts.load(Ordering::Relaxed),
            queue_full: stats.queue_full.load(Ordering::Relaxed),
        }
    }

    /// Admits `item` for verification. Fails immediately with `QueueFull` if
    /// the buffer budget cannot take it; otherwise `on_validated` fires exactly
    /// once with the verdict.
    #[instrument(skip_all, fields(size = item.size()))]
    pub fn enqueue<F>(&self, item: HeavyItem, on_validated: F) -> Result<(), HeavyCheckError>
    where
        F: FnOnce(Result<(), HeavyCheckError>) + Send + 'static,
    {
        if self.inner.shutdown.is_cancelled() {
            return Err(HeavyCheckError::Terminated);
        }
        let Some(budget) = self.inner.budget.try_acquire(Metric::item(item.size())) else {
            self.inner
                .verifier
                .stats
                .queue_full
                .fetch_add(1, Ordering::Relaxed);
            warn!(used = ?self.inner.budget.used(), "Heavy check queue is full");
            return Err(HeavyCheckError::QueueFull);
        };
        let task = Task {
            item,
            on_validated: Box::new(on_validated),
            budget,
        };
        self.inner
            .tasks_tx
            .send(task)
            .map_err(|_| HeavyCheckError::Terminated)
    }

    pub fn enqueue_event<F>(&self, e: Arc<Event>, on_validated: F) -> Result<(), HeavyCheckError>
    where
        F: FnOnce(Result<(), HeavyCheckError>) + Send + 'static,
    {
        self.enqueue(HeavyItem::Event(e), on_validated)
    }

    pub fn enqueue_bvs<F>(&self, bvs: Arc<BlockVotes>, on_validated: F) -> Result<(), HeavyCheckError>
    where
        F: FnOnce(Result<(), HeavyCheckError>) + Send + 'static,
    {
        self.enqueue(HeavyItem::BlockVotes(bvs), on_validated)
    }

    pub fn enqueue_ev<F>(&self, ev: Arc<EpochVote>, on_validated: F) -> Result<(), HeavyCheckError>
    where
        F: FnOnce(Result<(), HeavyCheckError>) + Send + 'static,
    {
        self.enqueue(HeavyItem::EpochVote(ev), on_validated)
    }

    /// Verifies an event on the caller's thread.
    pub fn validate_event(&self, e: &Event) -> Result<(), HeavyCheckError> {
        let verifier = &self.inner.verifier;
        verifier.counted(|| verifier.verify_event(e))
    }

    pub fn validate_bvs(&self, bvs: &BlockVotes) -> Result<(), HeavyCheckError> {
        let verifier = &self.inner.verifier;
        verifier.counted(|| verifier.verify_bvs(bvs))
    }

    pub fn validate_ev(&self, ev: &EpochVote) -> Result<(), HeavyCheckError> {
        let verifier = &self.inner.verifier;
        verifier.counted(|| verifier.verify_ev(ev))
    }
}

fn drain_terminated(rx: &mut mpsc::UnboundedReceiver<Task>) {
    rx.close();
    while let Ok(task) = rx.try_recv() {
        task.complete(Err(HeavyCheckError::Terminated));
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Task>,
    verifier: Arc<Verifier>,
    slots: Arc<Semaphore>,
    slot_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let permit = match timeout(slot_timeout, slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                task.complete(Err(HeavyCheckError::Terminated));
                continue;
            }
            Err(_) => {
                verifier.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(?slot_timeout, "Heavy check slot not acquired in time");
                task.complete(Err(HeavyCheckError::Timeout(slot_timeout)));
                continue;
            }
        };

        let verifier = verifier.clone();
        tokio::spawn(async move {
            let item = task.item.clone();
            let worker = verifier.clone();
            let res = tokio::task::spawn_blocking(move || worker.verify(&item))
                .await
                .unwrap_or(Err(HeavyCheckError::Terminated));
            drop(permit);
            if let Err(e) = &res {
                debug!("Heavy check rejected item: {}", e);
            }
            task.complete(res);
        });
    }
    drain_terminated(&mut rx);
    debug!("Heavy check dispatcher stopped");
}
