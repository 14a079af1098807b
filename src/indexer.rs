//! Indexer manager: wires queue, scheduler, provider and storage together
// src/indexer.rs
use crate::config::IndexerConfig;
use crate::entity::StoredMetadata;
use crate::identifier::ParticipantIdentifier;
use crate::reindex::{ReindexItem, ReindexScheduler};
use crate::storage::StorageManager;
use crate::provider::BusinessCardProvider;
use crate::work_queue::{DedupSet, WorkItem, WorkItemPerformer, WorkItemQueue, WorkItemType};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{info, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// What happened to an enqueue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The item entered the live queue.
    Accepted,
    /// Equivalent work is already in flight; the request was dropped.
    Deduplicated,
}

/// Ingestion counters, exposed for operators. All monotonic within one
/// process lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexerStats {
    pub queued: u64,
    pub deduplicated: u64,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead: u64,
}

#[derive(Default)]
struct StatsCell(Mutex<IndexerStats>);

impl StatsCell {
    fn bump(&self, f: impl FnOnce(&mut IndexerStats)) {
        f(&mut self.0.lock().unwrap());
    }

    fn snapshot(&self) -> IndexerStats {
        *self.0.lock().unwrap()
    }
}

/// Executes the actual ingestion semantics of each work item type.
/// Failures propagate; routing them to retry is the caller's business.
struct FetchAndStorePerformer {
    storage: Arc<StorageManager>,
    provider: Arc<dyn BusinessCardProvider>,
}

impl WorkItemPerformer for FetchAndStorePerformer {
    fn perform(&self, item: &WorkItem) -> Result<()> {
        let metadata = StoredMetadata {
            creation_timestamp: item.creation_timestamp,
            owner_id: item.owner_id.clone(),
            requesting_host: item.requesting_host.clone(),
        };
        match item.item_type {
            WorkItemType::CreateUpdate => {
                let card = self
                    .provider
                    .fetch(&item.participant_id)
                    .context("Business card fetch failed")?;
                match card {
                    Some(card) => self.storage.create_or_update(
                        &item.participant_id,
                        card.entities,
                        metadata,
                    ),
                    // the registry has no card yet; retry until it does
                    None => bail!("No business card published for {}", item.participant_id),
                }
            }
            WorkItemType::Delete => self.storage.delete(&item.participant_id, metadata, false),
            WorkItemType::Sync => {
                let card = self
                    .provider
                    .fetch(&item.participant_id)
                    .context("Business card fetch failed")?;
                match card {
                    Some(card) => self.storage.create_or_update(
                        &item.participant_id,
                        card.entities,
                        metadata,
                    ),
                    // authoritative absence: the record is gone upstream
                    None => self.storage.delete(&item.participant_id, metadata, false),
                }
            }
        }
    }
}

/// Wraps the real performer for the live queue: success releases the dedup
/// key, failure (including a panic) hands the item to the retry scheduler.
/// Always returns Ok so the queue never double-handles a failure.
struct RoutingPerformer {
    inner: Arc<dyn WorkItemPerformer>,
    reindex: Arc<ReindexScheduler>,
    dedup: Arc<DedupSet>,
    stats: Arc<StatsCell>,
}

impl WorkItemPerformer for RoutingPerformer {
    fn perform(&self, item: &WorkItem) -> Result<()> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.inner.perform(item)));
        let error = match outcome {
            Ok(Ok(())) => {
                self.dedup.release(&item.dedup_key());
                self.stats.bump(|s| s.processed += 1);
                return Ok(());
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => "performer panicked".to_string(),
        };
        warn!(
            "indexer: {} for {} failed, scheduling retry: {}",
            item.item_type, item.participant_id, error
        );
        self.stats.bump(|s| s.failed += 1);
        if let Err(e) = self.reindex.add_item(item) {
            // retry list write failed; free the key so the work can be re-requested
            warn!("indexer: could not schedule retry for {}: {:#}", item.participant_id, e);
            self.dedup.release(&item.dedup_key());
        }
        Ok(())
    }
}

/// The ingestion front door. Owns the worker pool, the retry scheduler and
/// its tick thread, and the dedup set spanning both.
pub struct IndexerManager {
    storage: Arc<StorageManager>,
    reindex: Arc<ReindexScheduler>,
    dedup: Arc<DedupSet>,
    queue: WorkItemQueue,
    stats: Arc<StatsCell>,
    closing: Arc<AtomicBool>,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
}

impl IndexerManager {
    pub fn new(
        data_dir: impl AsRef<std::path::Path>,
        storage: Arc<StorageManager>,
        provider: Arc<dyn BusinessCardProvider>,
        config: &IndexerConfig,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(StatsCell::default());
        let dedup = Arc::new(DedupSet::new());
        let fetch_and_store: Arc<dyn WorkItemPerformer> = Arc::new(FetchAndStorePerformer {
            storage: Arc::clone(&storage),
            provider,
        });
        let reindex = Arc::new(ReindexScheduler::new(
            data_dir,
            config.retry_interval_minutes,
            config.max_retry_hours,
            Arc::clone(&fetch_and_store),
            Arc::clone(&dedup),
        )?);

        // Restored retries are in-flight work: claim their keys so a fresh
        // request for the same (participant, type) is deduplicated.
        for item in reindex.items() {
            dedup.try_acquire((item.participant_id.clone(), item.item_type));
        }

        let routing = Arc::new(RoutingPerformer {
            inner: fetch_and_store,
            reindex: Arc::clone(&reindex),
            dedup: Arc::clone(&dedup),
            stats: Arc::clone(&stats),
        });
        let queue = WorkItemQueue::new(config.worker_count, routing);

        let closing = Arc::new(AtomicBool::new(false));
        let tick_handle = {
            let reindex = Arc::clone(&reindex);
            let closing = Arc::clone(&closing);
            let interval = Duration::from_secs(config.tick_interval_secs);
            std::thread::Builder::new()
                .name("bizdir-reindex-tick".to_string())
                .spawn(move || {
                    let slice = Duration::from_millis(250);
                    loop {
                        let mut waited = Duration::ZERO;
                        // sleep in slices so close() is not held up a full interval
                        while waited < interval {
                            if closing.load(Ordering::SeqCst) {
                                return;
                            }
                            std::thread::sleep(slice);
                            waited += slice;
                        }
                        if closing.load(Ordering::SeqCst) {
                            return;
                        }
                        if let Err(e) = reindex.tick(Utc::now()) {
                            warn!("indexer: scheduler pass failed: {:#}", e);
                        }
                    }
                })
                .context("Failed to spawn scheduler thread")?
        };

        info!("indexer: started with {} workers", config.worker_count);
        Ok(Self {
            storage,
            reindex,
            dedup,
            queue,
            stats,
            closing,
            tick_handle: Mutex::new(Some(tick_handle)),
        })
    }

    /// Requests ingestion work. Duplicate requests (same participant and
    /// type, already queued or awaiting retry) are dropped and reported as
    /// such, never an error.
    pub fn enqueue(
        &self,
        participant_id: ParticipantIdentifier,
        item_type: WorkItemType,
        owner_id: impl Into<String>,
        requesting_host: impl Into<String>,
    ) -> Result<EnqueueOutcome> {
        let item = WorkItem::new(participant_id, item_type, owner_id, requesting_host);
        if !self.dedup.try_acquire(item.dedup_key()) {
            self.stats.bump(|s| s.deduplicated += 1);
            return Ok(EnqueueOutcome::Deduplicated);
        }
        if !self.queue.queue(item.clone()) {
            self.dedup.release(&item.dedup_key());
            bail!("Indexer is shutting down");
        }
        self.stats.bump(|s| s.queued += 1);
        Ok(EnqueueOutcome::Accepted)
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn stats(&self) -> IndexerStats {
        let mut stats = self.stats.snapshot();
        stats.retried = self.reindex.retried_total();
        stats.dead = self.reindex.dead_total();
        stats
    }

    pub fn pending_retry_items(&self) -> Vec<ReindexItem> {
        self.reindex.items()
    }

    pub fn dead_list_items(&self) -> Result<Vec<ReindexItem>> {
        self.reindex.dead_items()
    }

    /// Runs one scheduler pass immediately. Exposed for maintenance tooling
    /// that cannot wait for the next interval.
    pub fn run_scheduler_pass(&self) -> Result<usize> {
        self.reindex.tick(Utc::now())
    }

    /// Orderly shutdown: stop the tick thread, drain the queue, persist
    /// unprocessed items as immediately-due retries, close the index.
    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(handle) = self.tick_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        let leftovers = self.queue.stop();
        if !leftovers.is_empty() {
            info!(
                "indexer: persisting {} unprocessed items for the next start",
                leftovers.len()
            );
            for item in &leftovers {
                // dedup key stays held; the restored retry carries it over
                if let Err(e) = self.reindex.add_item_due_now(item) {
                    warn!("indexer: failed to persist {}: {:#}", item.participant_id, e);
                }
            }
        }
        self.storage.close()?;
        info!("indexer: closed");
        Ok(())
    }
}

impl Drop for IndexerManager {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir_index::DirectoryIndex;
    use crate::entity::{BusinessCard, BusinessEntity, MultilingualName};
    use std::collections::HashMap;
    use std::sync::RwLock;
    use tempfile::TempDir;

    /// Provider with scripted per-participant responses.
    struct MapProvider {
        cards: RwLock<HashMap<String, Option<BusinessCard>>>,
    }

    impl MapProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                cards: RwLock::new(HashMap::new()),
            })
        }

        fn put(&self, id: &ParticipantIdentifier, card: Option<BusinessCard>) {
            self.cards.write().unwrap().insert(id.as_uri(), card);
        }
    }

    impl BusinessCardProvider for MapProvider {
        fn fetch(&self, id: &ParticipantIdentifier) -> Result<Option<BusinessCard>> {
            match self.cards.read().unwrap().get(&id.as_uri()) {
                Some(card) => Ok(card.clone()),
                None => anyhow::bail!("registry unreachable"),
            }
        }
    }

    fn card(id: &ParticipantIdentifier, name: &str) -> BusinessCard {
        BusinessCard {
            participant_id: id.clone(),
            entities: vec![BusinessEntity {
                country_code: Some("NO".to_string()),
                names: vec![MultilingualName::new(name, None)],
                ..Default::default()
            }],
        }
    }

    fn manager(dir: &TempDir, provider: Arc<MapProvider>) -> IndexerManager {
        let storage = Arc::new(StorageManager::new(Arc::new(
            DirectoryIndex::open_in_ram().unwrap(),
        )));
        IndexerManager::new(dir.path(), storage, provider, &IndexerConfig::default()).unwrap()
    }

    fn wait_until(pred: impl Fn() -> bool) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_create_update_fetches_and_indexes() {
        let dir = TempDir::new().unwrap();
        let provider = MapProvider::new();
        let id = ParticipantIdentifier::new("iso6523-actorid-upis", "0088:acme");
        provider.put(&id, Some(card(&id, "Acme AS")));
        let manager = manager(&dir, provider);

        let outcome = manager
            .enqueue(id.clone(), WorkItemType::CreateUpdate, "owner", "host")
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::Accepted);
        wait_until(|| manager.stats().processed == 1);
        assert!(manager.storage().contains_entry(&id).unwrap());
        manager.close().unwrap();
    }

    #[test]
    fn test_duplicate_request_is_deduplicated() {
        let dir = TempDir::new().unwrap();
        let provider = MapProvider::new();
        let id = ParticipantIdentifier::new("s", "p");
        // no scripted response: the fetch fails, so the item lands in the
        // retry list and keeps its dedup key
        let manager = manager(&dir, provider);

        assert_eq!(
            manager
                .enqueue(id.clone(), WorkItemType::CreateUpdate, "o", "h")
                .unwrap(),
            EnqueueOutcome::Accepted
        );
        wait_until(|| manager.stats().failed == 1);
        assert_eq!(
            manager
                .enqueue(id.clone(), WorkItemType::CreateUpdate, "o", "h")
                .unwrap(),
            EnqueueOutcome::Deduplicated
        );
        // a different work type on the same participant is separate work
        assert_eq!(
            manager
                .enqueue(id, WorkItemType::Delete, "o", "h")
                .unwrap(),
            EnqueueOutcome::Accepted
        );
        manager.close().unwrap();
    }

    #[test]
    fn test_failed_fetch_lands_in_retry_list() {
        let dir = TempDir::new().unwrap();
        let provider = MapProvider::new();
        let id = ParticipantIdentifier::new("s", "p");
        let manager = manager(&dir, provider);

        manager
            .enqueue(id.clone(), WorkItemType::CreateUpdate, "o", "h")
            .unwrap();
        wait_until(|| manager.pending_retry_items().len() == 1);
        let pending = manager.pending_retry_items();
        assert_eq!(pending[0].participant_id, id);
        assert_eq!(pending[0].retry_count, 0);
        manager.close().unwrap();
    }

    #[test]
    fn test_sync_tombstones_absent_participant() {
        let dir = TempDir::new().unwrap();
        let provider = MapProvider::new();
        let id = ParticipantIdentifier::new("s", "p");
        provider.put(&id, Some(card(&id, "Acme")));
        let manager = manager(&dir, provider.clone());

        manager
            .enqueue(id.clone(), WorkItemType::CreateUpdate, "o", "h")
            .unwrap();
        wait_until(|| manager.stats().processed == 1);

        // registry now authoritatively reports the card gone
        provider.put(&id, None);
        manager
            .enqueue(id.clone(), WorkItemType::Sync, "o", "h")
            .unwrap();
        wait_until(|| manager.stats().processed == 2);
        assert!(!manager.storage().contains_entry(&id).unwrap());
        manager.close().unwrap();
    }

    #[test]
    fn test_restart_restores_retries_and_dedup_keys() {
        let dir = TempDir::new().unwrap();
        let id = ParticipantIdentifier::new("s", "p");
        {
            let manager = manager(&dir, MapProvider::new());
            manager
                .enqueue(id.clone(), WorkItemType::CreateUpdate, "o", "h")
                .unwrap();
            wait_until(|| manager.pending_retry_items().len() == 1);
            manager.close().unwrap();
        }
        let manager = manager(&dir, MapProvider::new());
        assert_eq!(manager.pending_retry_items().len(), 1);
        // the restored retry holds the key, so a fresh request deduplicates
        assert_eq!(
            manager
                .enqueue(id, WorkItemType::CreateUpdate, "o", "h")
                .unwrap(),
            EnqueueOutcome::Deduplicated
        );
        manager.close().unwrap();
    }

    #[test]
    fn test_close_persists_queued_work_as_due_retries() {
        let dir = TempDir::new().unwrap();
        let provider = MapProvider::new();
        let ids: Vec<_> = (0..20)
            .map(|n| ParticipantIdentifier::new("s", n.to_string()))
            .collect();
        for id in &ids {
            provider.put(id, Some(card(id, "Slowpoke")));
        }
        let manager = manager(&dir, provider);
        for id in &ids {
            manager
                .enqueue(id.clone(), WorkItemType::CreateUpdate, "o", "h")
                .unwrap();
        }
        manager.close().unwrap();

        let stats = manager.stats();
        let persisted = manager.pending_retry_items().len() as u64;
        // everything either ran or was persisted for the next start
        assert_eq!(stats.processed + persisted, 20);
    }

    #[test]
    fn test_enqueue_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, MapProvider::new());
        manager.close().unwrap();
        assert!(manager
            .enqueue(
                ParticipantIdentifier::new("s", "p"),
                WorkItemType::CreateUpdate,
                "o",
                "h"
            )
            .is_err());
    }
}
