// src/lib.rs
//! Business registry directory: a full-text index of participant business
//! cards fed by a deduplicating ingestion pipeline with persistent retries,
//! fronted by a client-certificate trust gate.

pub mod config;
pub mod constants;
pub mod dir_index;
pub mod entity;
pub mod error;
pub mod fields;
pub mod identifier;
pub mod indexer;
pub mod logging;
pub mod provider;
pub mod query;
pub mod reindex;
pub mod storage;
pub mod trust;
pub mod work_queue;

pub use config::IndexerConfig;
pub use dir_index::DirectoryIndex;
pub use entity::{
    BusinessCard, BusinessEntity, Contact, EntityIdentifier, MultilingualName,
    StoredBusinessEntity, StoredMetadata,
};
pub use error::DirectoryError;
pub use identifier::{IdentifierFactory, ParticipantIdentifier, SimpleIdentifierFactory};
pub use indexer::{EnqueueOutcome, IndexerManager, IndexerStats};
pub use provider::{BusinessCardProvider, HttpBusinessCardProvider};
pub use query::{DeletedFilter, QueryBuilder};
pub use reindex::{ReindexItem, ReindexScheduler};
pub use storage::StorageManager;
pub use trust::{TrustGate, TrustGateConfig, TrustValidationResult};
pub use work_queue::{
    DedupKey, DedupSet, WorkItem, WorkItemPerformer, WorkItemQueue, WorkItemType,
};
