//! Directory index: owns the tantivy writer/reader pair for the process lifetime
// src/dir_index.rs
use crate::constants;
use crate::error::DirectoryError;
use crate::fields::DirectoryFields;
use anyhow::{Context, Result};
use log::{debug, info};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tantivy::directory::MmapDirectory;
use tantivy::{Document, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, Term};

/// Wraps exactly one inverted index instance for the process lifetime.
///
/// One writer is held open until `close()`. Commits are lazy: writes only
/// become visible when a searcher is next requested (or on close), trading
/// read-after-write latency for batched write throughput. The reader is
/// cached and reloaded only after a commit actually happened.
pub struct DirectoryIndex {
    fields: DirectoryFields,
    writer: RwLock<Option<IndexWriter>>,
    reader: IndexReader,
    dirty: AtomicBool,
    closing: AtomicBool,
}

impl DirectoryIndex {
    /// Opens (or creates) the index under the given directory.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let dir = directory.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;
        let fields = DirectoryFields::new();
        let index = Index::open_or_create(MmapDirectory::open(dir)?, fields.schema().clone())
            .with_context(|| format!("Failed to open index: {}", dir.display()))?;
        Self::from_index(index, fields)
    }

    /// In-memory index, used by tests and throwaway tooling.
    pub fn open_in_ram() -> Result<Self> {
        let fields = DirectoryFields::new();
        let index = Index::create_in_ram(fields.schema().clone());
        Self::from_index(index, fields)
    }

    fn from_index(index: Index, fields: DirectoryFields) -> Result<Self> {
        let writer = index
            .writer(constants::INDEX_WRITER_HEAP_BYTES)
            .context("Failed to create index writer")?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create index reader")?;
        Ok(Self {
            fields,
            writer: RwLock::new(Some(writer)),
            reader,
            dirty: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        })
    }

    pub fn fields(&self) -> &DirectoryFields {
        &self.fields
    }

    /// Runs a mutating operation inside the writer-exclusive critical
    /// section. Refuses new work once shutdown has begun.
    fn write_locked<T>(&self, f: impl FnOnce(&IndexWriter) -> Result<T>) -> Result<T> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(DirectoryError::ShuttingDown.into());
        }
        let guard = self.writer.write().unwrap();
        let writer = guard.as_ref().ok_or(DirectoryError::ShuttingDown)?;
        let out = f(writer)?;
        self.dirty.store(true, Ordering::SeqCst);
        Ok(out)
    }

    /// Runs a read operation against a searcher inside the shared critical
    /// section. Commits pending writer changes first if there are any, so a
    /// searcher requested after a write always observes it.
    fn read_locked<T>(&self, f: impl FnOnce(&Searcher) -> Result<T>) -> Result<T> {
        let searcher = self.searcher()?;
        f(&searcher)
    }

    /// Returns a searcher over the latest committed state, committing lazily
    /// if the writer has uncommitted changes.
    pub fn searcher(&self) -> Result<Searcher> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(DirectoryError::ShuttingDown.into());
        }
        if self.dirty.load(Ordering::SeqCst) {
            let mut guard = self.writer.write().unwrap();
            let writer = guard.as_mut().ok_or(DirectoryError::ShuttingDown)?;
            // Re-check under the lock: another caller may have committed
            // while we were waiting.
            if self.dirty.load(Ordering::SeqCst) {
                writer.commit().context("Index commit failed")?;
                self.dirty.store(false, Ordering::SeqCst);
                self.reader.reload().context("Index reader reload failed")?;
                debug!("index: lazy commit + reader reload");
            }
        }
        Ok(self.reader.searcher())
    }

    /// Atomically replaces all documents matching the key term with one
    /// replacement document.
    pub fn update_document(&self, delete_key: Term, document: Document) -> Result<()> {
        self.update_documents(delete_key, vec![document])
    }

    /// Atomically replaces all documents matching the key term with the
    /// given replacements. A reader opened after this call sees either the
    /// old set or the new set, never a mix.
    pub fn update_documents(&self, delete_key: Term, documents: Vec<Document>) -> Result<()> {
        self.write_locked(|writer| {
            writer.delete_term(delete_key);
            for doc in documents {
                writer.add_document(doc).context("Index write failed")?;
            }
            Ok(())
        })
    }

    /// Deletes all documents matching any of the given terms, flushed as
    /// one batch.
    pub fn delete_documents(&self, terms: Vec<Term>) -> Result<()> {
        self.write_locked(|writer| {
            for term in terms {
                writer.delete_term(term);
            }
            Ok(())
        })
    }

    /// Runs a read-only search callback against the current index state.
    pub fn search<T>(&self, f: impl FnOnce(&Searcher) -> Result<T>) -> Result<T> {
        self.read_locked(f)
    }

    /// Number of live (committed) documents, tombstones included.
    pub fn doc_count(&self) -> Result<u64> {
        self.read_locked(|searcher| Ok(searcher.num_docs()))
    }

    /// Flushes pending changes and releases writer and reader. Idempotent;
    /// any operation issued after this returns the shutting-down error.
    pub fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut guard = self.writer.write().unwrap();
        if let Some(mut writer) = guard.take() {
            if self.dirty.swap(false, Ordering::SeqCst) {
                writer.commit().context("Final index commit failed")?;
            }
            writer
                .wait_merging_threads()
                .context("Index merge shutdown failed")?;
            info!("index: closed");
        }
        Ok(())
    }
}

impl Drop for DirectoryIndex {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::ParticipantIdentifier;
    use tantivy::collector::Count;
    use tantivy::query::TermQuery;
    use tantivy::schema::IndexRecordOption;

    fn doc_for(index: &DirectoryIndex, id: &ParticipantIdentifier, deleted: bool) -> Document {
        let mut doc = Document::new();
        index.fields().participant.store(&mut doc, id);
        index.fields().deleted.store(&mut doc, &deleted);
        doc
    }

    fn count_for(index: &DirectoryIndex, id: &ParticipantIdentifier) -> usize {
        let term = index.fields().participant.exact_term(id);
        index
            .search(|searcher| {
                Ok(searcher.search(&TermQuery::new(term, IndexRecordOption::Basic), &Count)?)
            })
            .unwrap()
    }

    #[test]
    fn test_update_documents_replaces_previous_set() {
        let index = DirectoryIndex::open_in_ram().unwrap();
        let id = ParticipantIdentifier::new("s", "p1");

        let key = index.fields().participant.exact_term(&id);
        index
            .update_documents(key.clone(), vec![doc_for(&index, &id, false), doc_for(&index, &id, false)])
            .unwrap();
        assert_eq!(count_for(&index, &id), 2);

        index
            .update_documents(key, vec![doc_for(&index, &id, false)])
            .unwrap();
        assert_eq!(count_for(&index, &id), 1);
    }

    #[test]
    fn test_delete_documents_batch() {
        let index = DirectoryIndex::open_in_ram().unwrap();
        let a = ParticipantIdentifier::new("s", "a");
        let b = ParticipantIdentifier::new("s", "b");
        index
            .update_documents(
                index.fields().participant.exact_term(&a),
                vec![doc_for(&index, &a, false)],
            )
            .unwrap();
        index
            .update_documents(
                index.fields().participant.exact_term(&b),
                vec![doc_for(&index, &b, false)],
            )
            .unwrap();

        index
            .delete_documents(vec![
                index.fields().participant.exact_term(&a),
                index.fields().participant.exact_term(&b),
            ])
            .unwrap();
        assert_eq!(count_for(&index, &a), 0);
        assert_eq!(count_for(&index, &b), 0);
    }

    #[test]
    fn test_close_is_idempotent_and_refuses_new_work() {
        let index = DirectoryIndex::open_in_ram().unwrap();
        index.close().unwrap();
        index.close().unwrap();

        let id = ParticipantIdentifier::new("s", "p");
        let err = index
            .update_documents(
                index.fields().participant.exact_term(&id),
                vec![Document::new()],
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DirectoryError>(),
            Some(DirectoryError::ShuttingDown)
        ));
        assert!(index.searcher().is_err());
    }

    #[test]
    fn test_write_visible_to_searcher_opened_after() {
        let index = DirectoryIndex::open_in_ram().unwrap();
        let id = ParticipantIdentifier::new("s", "p");
        index
            .update_documents(
                index.fields().participant.exact_term(&id),
                vec![doc_for(&index, &id, false)],
            )
            .unwrap();
        // searcher() commits lazily, so the write must be visible now
        assert_eq!(count_for(&index, &id), 1);
    }
}
