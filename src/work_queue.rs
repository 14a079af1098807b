//! Ingestion work queue: deduplicated FIFO with a fixed worker pool
// src/work_queue.rs
use crate::identifier::ParticipantIdentifier;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use uuid::Uuid;

/// The kind of ingestion work requested for a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkItemType {
    /// Fetch the participant's card and (re)index it.
    #[serde(rename = "CREATE_UPDATE")]
    CreateUpdate,
    /// Tombstone the participant's records.
    #[serde(rename = "DELETE")]
    Delete,
    /// Reconcile: fetch, index if present, tombstone if gone.
    #[serde(rename = "SYNC")]
    Sync,
}

impl std::fmt::Display for WorkItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkItemType::CreateUpdate => write!(f, "CREATE_UPDATE"),
            WorkItemType::Delete => write!(f, "DELETE"),
            WorkItemType::Sync => write!(f, "SYNC"),
        }
    }
}

/// Deduplication identity of a work item. Owner and requesting host are
/// deliberately not part of it: two callers asking for the same action on
/// the same participant are the same work.
pub type DedupKey = (ParticipantIdentifier, WorkItemType);

/// One unit of ingestion work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub participant_id: ParticipantIdentifier,
    pub item_type: WorkItemType,
    pub owner_id: String,
    pub requesting_host: String,
    pub creation_timestamp: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(
        participant_id: ParticipantIdentifier,
        item_type: WorkItemType,
        owner_id: impl Into<String>,
        requesting_host: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            participant_id,
            item_type,
            owner_id: owner_id.into(),
            requesting_host: requesting_host.into(),
            creation_timestamp: Utc::now(),
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        (self.participant_id.clone(), self.item_type)
    }
}

/// Tracks which (participant, type) pairs currently have in-flight work,
/// across the live queue and the retry list. A key stays held from enqueue
/// until the work finally succeeds or is written off as dead.
#[derive(Default)]
pub struct DedupSet {
    inner: RwLock<HashSet<DedupKey>>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the key. Returns false if equivalent work is already in flight.
    pub fn try_acquire(&self, key: DedupKey) -> bool {
        self.inner.write().unwrap().insert(key)
    }

    pub fn release(&self, key: &DedupKey) {
        self.inner.write().unwrap().remove(key);
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.inner.read().unwrap().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

/// Executes one work item. Implementations decide what failure means;
/// the queue itself only logs the outcome.
pub trait WorkItemPerformer: Send + Sync {
    fn perform(&self, item: &WorkItem) -> Result<()>;
}

struct QueueInner {
    queue: Mutex<VecDeque<WorkItem>>,
    cond: Condvar,
    stopping: AtomicBool,
    performer: Arc<dyn WorkItemPerformer>,
}

/// FIFO work queue served by a fixed pool of worker threads. Items are
/// accepted until `stop()`; workers drain one item at a time and hand it to
/// the performer. A panicking performer loses that item (after logging) but
/// never takes a worker down.
pub struct WorkItemQueue {
    inner: Arc<QueueInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkItemQueue {
    pub fn new(worker_count: usize, performer: Arc<dyn WorkItemPerformer>) -> Self {
        let inner = Arc::new(QueueInner {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            stopping: AtomicBool::new(false),
            performer,
        });
        let workers = (0..worker_count.max(1))
            .map(|n| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("bizdir-worker-{}", n))
                    .spawn(move || worker_loop(inner))
                    .unwrap_or_else(|e| panic!("failed to spawn worker thread: {}", e))
            })
            .collect();
        info!("work queue: started {} workers", worker_count.max(1));
        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues an item. Returns false (and logs) once shutdown has begun.
    pub fn queue(&self, item: WorkItem) -> bool {
        if self.inner.stopping.load(Ordering::SeqCst) {
            warn!(
                "work queue: rejected {} for {} during shutdown",
                item.item_type, item.participant_id
            );
            return false;
        }
        let mut queue = self.inner.queue.lock().unwrap();
        // Re-check under the lock so no item lands after a drain.
        if self.inner.stopping.load(Ordering::SeqCst) {
            return false;
        }
        debug!(
            "work queue: queued {} for {} ({})",
            item.item_type, item.participant_id, item.id
        );
        queue.push_back(item);
        drop(queue);
        self.inner.cond.notify_one();
        true
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().unwrap().is_empty()
    }

    /// Stops accepting work, drains whatever is still queued, joins all
    /// workers and returns the unprocessed items. Idempotent; later calls
    /// return an empty list.
    pub fn stop(&self) -> Vec<WorkItem> {
        self.inner.stopping.store(true, Ordering::SeqCst);
        let leftovers: Vec<WorkItem> = {
            let mut queue = self.inner.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        self.inner.cond.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            let _ = handle.join();
        }
        if !leftovers.is_empty() {
            info!("work queue: stopped with {} unprocessed items", leftovers.len());
        }
        leftovers
    }
}

impl Drop for WorkItemQueue {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn worker_loop(inner: Arc<QueueInner>) {
    loop {
        let item = {
            let mut queue = inner.queue.lock().unwrap();
            loop {
                if let Some(item) = queue.pop_front() {
                    break item;
                }
                if inner.stopping.load(Ordering::SeqCst) {
                    return;
                }
                queue = inner.cond.wait(queue).unwrap();
            }
        };
        let result = catch_unwind(AssertUnwindSafe(|| inner.performer.perform(&item)));
        match result {
            Ok(Ok(())) => debug!(
                "work queue: {} for {} done",
                item.item_type, item.participant_id
            ),
            Ok(Err(e)) => warn!(
                "work queue: {} for {} failed: {:#}",
                item.item_type, item.participant_id, e
            ),
            Err(_) => warn!(
                "work queue: performer panicked on {} for {}",
                item.item_type, item.participant_id
            ),
        }
    }
}
