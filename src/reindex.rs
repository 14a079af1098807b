//! Retry scheduler: persisted retry list with a dead-letter file for expired work
// src/reindex.rs
use crate::constants;
use crate::identifier::ParticipantIdentifier;
use crate::work_queue::{DedupSet, WorkItem, WorkItemPerformer, WorkItemType};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One failed work item waiting for its next retry. Serialized as one JSON
/// object per line in the retry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexItem {
    pub work_item_id: String,
    pub creation_timestamp: DateTime<Utc>,
    pub participant_id: ParticipantIdentifier,
    #[serde(rename = "type")]
    pub item_type: WorkItemType,
    pub owner_id: String,
    pub requesting_host: String,
    /// Absolute wall-clock deadline; once passed the item is written off.
    pub max_retry_deadline: DateTime<Utc>,
    pub retry_count: u32,
    pub previous_retry_time: Option<DateTime<Utc>>,
    pub next_retry_time: DateTime<Utc>,
}

impl ReindexItem {
    fn from_work_item(
        item: &WorkItem,
        next_retry_time: DateTime<Utc>,
        max_retry_deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            work_item_id: item.id.clone(),
            creation_timestamp: item.creation_timestamp,
            participant_id: item.participant_id.clone(),
            item_type: item.item_type,
            owner_id: item.owner_id.clone(),
            requesting_host: item.requesting_host.clone(),
            max_retry_deadline,
            retry_count: 0,
            previous_retry_time: None,
            next_retry_time,
        }
    }

    /// Reconstructs the work item for another attempt. Identity and
    /// creation time are preserved across retries.
    pub fn work_item(&self) -> WorkItem {
        WorkItem {
            id: self.work_item_id.clone(),
            participant_id: self.participant_id.clone(),
            item_type: self.item_type,
            owner_id: self.owner_id.clone(),
            requesting_host: self.requesting_host.clone(),
            creation_timestamp: self.creation_timestamp,
        }
    }
}

/// Holds failed work items and retries them on a fixed interval until they
/// succeed or their deadline passes, at which point they move to the
/// append-only dead-letter file.
///
/// State lives in memory behind one mutex and is mirrored to the retry file
/// on every mutation with an atomic whole-file rewrite, so a restart resumes
/// exactly where the previous process stopped.
pub struct ReindexScheduler {
    state: Mutex<Vec<ReindexItem>>,
    retry_path: PathBuf,
    dead_path: PathBuf,
    retry_interval: Duration,
    max_retry: Duration,
    performer: Arc<dyn WorkItemPerformer>,
    dedup: Arc<DedupSet>,
    retried_total: AtomicU64,
    dead_total: AtomicU64,
}

impl ReindexScheduler {
    pub fn new(
        data_dir: impl AsRef<Path>,
        retry_interval_minutes: i64,
        max_retry_hours: i64,
        performer: Arc<dyn WorkItemPerformer>,
        dedup: Arc<DedupSet>,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        let retry_path = constants::retry_list_path(data_dir);
        let dead_path = constants::dead_list_path(data_dir);
        let state = load_jsonl(&retry_path)?;
        if !state.is_empty() {
            info!("reindex: restored {} pending retries from {}", state.len(), retry_path.display());
        }
        Ok(Self {
            state: Mutex::new(state),
            retry_path,
            dead_path,
            retry_interval: Duration::minutes(retry_interval_minutes),
            max_retry: Duration::hours(max_retry_hours),
            performer,
            dedup,
            retried_total: AtomicU64::new(0),
            dead_total: AtomicU64::new(0),
        })
    }

    /// Registers a freshly failed work item for retry. The deadline is
    /// anchored to the item's original creation time, so time already burned
    /// in the live queue counts against it.
    pub fn add_item(&self, item: &WorkItem) -> Result<()> {
        let now = Utc::now();
        let entry = ReindexItem::from_work_item(
            item,
            now + self.retry_interval,
            item.creation_timestamp + self.max_retry,
        );
        debug!(
            "reindex: scheduled {} for {} at {}",
            entry.item_type, entry.participant_id, entry.next_retry_time
        );
        self.push_and_persist(entry)
    }

    /// Registers an item as immediately eligible, used for work drained from
    /// the live queue at shutdown so the next process picks it up first.
    pub fn add_item_due_now(&self, item: &WorkItem) -> Result<()> {
        let now = Utc::now();
        let entry = ReindexItem::from_work_item(
            item,
            now - Duration::seconds(1),
            item.creation_timestamp + self.max_retry,
        );
        self.push_and_persist(entry)
    }

    fn push_and_persist(&self, entry: ReindexItem) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.push(entry);
        self.persist(&state)
    }

    /// Snapshot of the pending retry list.
    pub fn items(&self) -> Vec<ReindexItem> {
        self.state.lock().unwrap().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    /// Reads the dead-letter file. These items are kept for operators only;
    /// the scheduler never touches them again.
    pub fn dead_items(&self) -> Result<Vec<ReindexItem>> {
        load_jsonl(&self.dead_path)
    }

    /// Total retry attempts made by this process.
    pub fn retried_total(&self) -> u64 {
        self.retried_total.load(Ordering::Relaxed)
    }

    /// Items written off by this process.
    pub fn dead_total(&self) -> u64 {
        self.dead_total.load(Ordering::Relaxed)
    }

    /// One scheduler pass: writes off items past their deadline, then
    /// re-attempts every item whose retry time has come. Returns the number
    /// of items attempted. Items are removed from the list (and the file)
    /// before their attempt runs, so a crash mid-attempt drops the attempt
    /// rather than double-running it.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let (due, dead) = {
            let mut state = self.state.lock().unwrap();
            let mut due = Vec::new();
            let mut dead = Vec::new();
            let mut keep = Vec::with_capacity(state.len());
            for item in state.drain(..) {
                if now > item.max_retry_deadline {
                    dead.push(item);
                } else if item.next_retry_time < now {
                    due.push(item);
                } else {
                    keep.push(item);
                }
            }
            *state = keep;
            if !due.is_empty() || !dead.is_empty() {
                self.persist(&state)?;
            }
            (due, dead)
        };

        // Once items are drained from the list, every one of them must be
        // handled here; an error on one item must not abandon the rest.
        for item in &dead {
            warn!(
                "reindex: giving up on {} for {} after {} retries",
                item.item_type, item.participant_id, item.retry_count
            );
            if let Err(e) = self.append_dead(item) {
                warn!(
                    "reindex: failed to record dead item {}: {:#}",
                    item.work_item_id, e
                );
            }
            self.dedup.release(&(item.participant_id.clone(), item.item_type));
            self.dead_total.fetch_add(1, Ordering::Relaxed);
        }

        let attempted = due.len();
        self.retried_total.fetch_add(attempted as u64, Ordering::Relaxed);
        for mut entry in due {
            let item = entry.work_item();
            let outcome = catch_unwind(AssertUnwindSafe(|| self.performer.perform(&item)));
            let error = match outcome {
                Ok(Ok(())) => {
                    info!(
                        "reindex: {} for {} succeeded on retry {}",
                        item.item_type,
                        item.participant_id,
                        entry.retry_count + 1
                    );
                    self.dedup.release(&item.dedup_key());
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(_) => "performer panicked".to_string(),
            };
            warn!(
                "reindex: retry {} of {} for {} failed: {}",
                entry.retry_count + 1,
                item.item_type,
                item.participant_id,
                error
            );
            entry.retry_count += 1;
            entry.previous_retry_time = Some(now);
            entry.next_retry_time = now + self.retry_interval;
            if let Err(e) = self.push_and_persist(entry) {
                warn!(
                    "reindex: failed to persist retry for {}: {:#}",
                    item.participant_id, e
                );
            }
        }
        Ok(attempted)
    }

    /// Atomic whole-file rewrite: write a sibling temp file, then rename
    /// over the live one. Readers never observe a half-written list.
    fn persist(&self, state: &[ReindexItem]) -> Result<()> {
        let tmp = self.retry_path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            for item in state {
                serde_json::to_writer(&mut file, item)?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.retry_path)
            .with_context(|| format!("Failed to replace {}", self.retry_path.display()))?;
        Ok(())
    }

    fn append_dead(&self, item: &ReindexItem) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.dead_path)
            .with_context(|| format!("Failed to open {}", self.dead_path.display()))?;
        serde_json::to_writer(&mut file, item)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

fn load_jsonl(path: &Path) -> Result<Vec<ReindexItem>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut items = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ReindexItem>(&line) {
            Ok(item) => items.push(item),
            // a corrupt line loses one item, not the whole list
            Err(e) => warn!("reindex: skipping bad line {} in {}: {}", n + 1, path.display(), e),
        }
    }
    Ok(items)
}
