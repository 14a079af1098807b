//! Storage manager: maps business entities to index documents and back
// src/storage.rs
use crate::dir_index::DirectoryIndex;
use crate::entity::{BusinessEntity, StoredBusinessEntity, StoredMetadata};
use crate::fields::DirectoryFields;
use crate::identifier::ParticipantIdentifier;
use crate::query::{DeletedFilter, QueryBuilder};
use anyhow::{Context, Result};
use log::{debug, warn};
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::Query;
use tantivy::schema::Value;
use tantivy::Document;

/// All reads and writes of directory records go through here. Owns the
/// document mapping: one index document per business entity, keyed by the
/// participant identifier term, with the full record mirrored into a stored
/// JSON payload.
/// Upper bound on documents fetched for a single participant. A card never
/// carries anywhere near this many entities.
const MAX_PARTICIPANT_DOCS: usize = 10_000;

pub struct StorageManager {
    index: Arc<DirectoryIndex>,
}

impl StorageManager {
    pub fn new(index: Arc<DirectoryIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<DirectoryIndex> {
        &self.index
    }

    fn fields(&self) -> &DirectoryFields {
        self.index.fields()
    }

    // === Document mapping ===

    fn entity_to_document(&self, record: &StoredBusinessEntity) -> Result<Document> {
        let fields = self.fields();
        let mut doc = Document::new();
        fields.participant.store(&mut doc, &record.participant_id);
        if let Some(ref cc) = record.entity.country_code {
            fields.country_code.store(&mut doc, cc);
        }
        for name in &record.entity.names {
            fields.name.store(&mut doc, &name.name);
        }
        fields.owner_id.store(&mut doc, &record.metadata.owner_id);
        fields
            .requesting_host
            .store(&mut doc, &record.metadata.requesting_host);
        fields
            .creation_timestamp
            .store(&mut doc, &record.metadata.creation_timestamp);
        if let Some(ref date) = record.entity.registration_date {
            fields.registration_date.store(&mut doc, date);
        }
        fields.deleted.store(&mut doc, &record.deleted);
        doc.add_text(fields.all_text, record.searchable_text());
        doc.add_text(
            fields.entity_json,
            serde_json::to_string(record).context("Failed to serialize entity record")?,
        );
        Ok(doc)
    }

    /// Decodes one index document back into a stored record. The indexed
    /// tombstone flag is authoritative over the JSON payload's copy, so a
    /// record soft-deleted by a raw index write still reads as deleted.
    fn document_to_entity(&self, doc: &Document) -> Result<StoredBusinessEntity> {
        let fields = self.fields();
        let json = doc
            .get_first(fields.entity_json)
            .and_then(Value::as_text)
            .context("Document has no stored entity payload")?;
        let mut record: StoredBusinessEntity =
            serde_json::from_str(json).context("Failed to parse stored entity payload")?;
        if let Some(flag) = fields.deleted.read_first(doc) {
            record.deleted = flag?;
        }
        Ok(record)
    }

    fn collect_records(
        &self,
        query: &dyn Query,
        max: usize,
    ) -> Result<Vec<StoredBusinessEntity>> {
        self.index.search(|searcher| {
            let hits = searcher.search(query, &TopDocs::with_limit(max))?;
            let mut records = Vec::with_capacity(hits.len());
            for (_score, addr) in hits {
                let doc = searcher.doc(addr)?;
                match self.document_to_entity(&doc) {
                    Ok(record) => records.push(record),
                    // One corrupt document must not poison the result set.
                    Err(e) => warn!("storage: skipping undecodable document: {:#}", e),
                }
            }
            Ok(records)
        })
    }

    // === Write path ===

    /// Replaces all documents of the participant with one live document per
    /// entity. Atomic at the index level: a reader sees the old set or the
    /// new set, never a mix.
    pub fn create_or_update(
        &self,
        participant_id: &ParticipantIdentifier,
        entities: Vec<BusinessEntity>,
        metadata: StoredMetadata,
    ) -> Result<()> {
        let docs = entities
            .into_iter()
            .map(|entity| {
                self.entity_to_document(&StoredBusinessEntity::new(
                    participant_id.clone(),
                    entity,
                    metadata.clone(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "storage: indexing {} entities for {}",
            docs.len(),
            participant_id
        );
        self.index
            .update_documents(self.fields().participant.exact_term(participant_id), docs)
    }

    /// Soft-deletes the participant: every document (live or already
    /// tombstoned) is rewritten with the tombstone flag set and fresh
    /// deletion metadata. Idempotent. With `physical` set the documents are
    /// removed outright instead; ingestion never takes that path, it exists
    /// for maintenance tooling.
    pub fn delete(
        &self,
        participant_id: &ParticipantIdentifier,
        metadata: StoredMetadata,
        physical: bool,
    ) -> Result<()> {
        let key = self.fields().participant.exact_term(participant_id);
        if physical {
            debug!("storage: physically deleting {}", participant_id);
            return self.index.delete_documents(vec![key]);
        }
        let builder = QueryBuilder::new(self.fields());
        let existing = self.collect_records(
            &*builder.participant(participant_id, DeletedFilter::Include),
            MAX_PARTICIPANT_DOCS,
        )?;
        if existing.is_empty() {
            debug!("storage: delete of absent participant {}", participant_id);
            return Ok(());
        }
        let docs = existing
            .into_iter()
            .map(|mut record| {
                record.deleted = true;
                record.metadata = metadata.clone();
                self.entity_to_document(&record)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "storage: tombstoning {} documents for {}",
            docs.len(),
            participant_id
        );
        self.index.update_documents(key, docs)
    }

    // === Read path ===

    /// Whether the participant has at least one live (non-deleted) document.
    pub fn contains_entry(&self, participant_id: &ParticipantIdentifier) -> Result<bool> {
        let builder = QueryBuilder::new(self.fields());
        let query = builder.participant(participant_id, DeletedFilter::Exclude);
        let n = self.index.search(|s| Ok(s.search(&*query, &Count)?))?;
        Ok(n > 0)
    }

    pub fn get_all_documents_of_participant(
        &self,
        participant_id: &ParticipantIdentifier,
        deleted: DeletedFilter,
    ) -> Result<Vec<StoredBusinessEntity>> {
        let builder = QueryBuilder::new(self.fields());
        self.collect_records(
            &*builder.participant(participant_id, deleted),
            MAX_PARTICIPANT_DOCS,
        )
    }

    /// Runs an arbitrary prebuilt query, returning up to `max` records.
    pub fn get_all_documents(
        &self,
        query: &dyn Query,
        max: usize,
    ) -> Result<Vec<StoredBusinessEntity>> {
        self.collect_records(query, max)
    }

    /// Free-text search over all record fields. AND semantics per token.
    pub fn search_text(&self, text: &str, max: usize) -> Result<Vec<StoredBusinessEntity>> {
        let builder = QueryBuilder::new(self.fields());
        self.collect_records(&*builder.free_text(text, DeletedFilter::Exclude), max)
    }

    /// All live records with the given country code.
    pub fn search_country(
        &self,
        country_code: &str,
        max: usize,
    ) -> Result<Vec<StoredBusinessEntity>> {
        let builder = QueryBuilder::new(self.fields());
        self.collect_records(&*builder.country(country_code, DeletedFilter::Exclude), max)
    }

    pub fn close(&self) -> Result<()> {
        self.index.close()
    }
}
