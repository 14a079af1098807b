//! Query construction: free-text and structured filters, always tombstone-aware
// src/query.rs
use crate::fields::DirectoryFields;
use crate::identifier::ParticipantIdentifier;
use anyhow::Result;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::Term;

/// How soft-deleted records participate in a query. Normal consumers never
/// see tombstones; admin tooling asks for them explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedFilter {
    /// Live records only (the default for every consumer-facing query).
    #[default]
    Exclude,
    /// Tombstones only (audit views).
    Only,
    /// Everything, tombstoned or not (maintenance tooling).
    Include,
}

/// Builds boolean queries over the directory schema. Callers never
/// construct raw term strings; all terms come from the field codecs.
pub struct QueryBuilder<'a> {
    fields: &'a DirectoryFields,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(fields: &'a DirectoryFields) -> Self {
        Self { fields }
    }

    /// All documents of one participant.
    pub fn participant(
        &self,
        id: &ParticipantIdentifier,
        deleted: DeletedFilter,
    ) -> Box<dyn Query> {
        self.compose(vec![self.fields.participant.exact_query(id)], deleted)
    }

    /// All documents with the given country code (exact match).
    pub fn country(&self, country_code: &str, deleted: DeletedFilter) -> Box<dyn Query> {
        self.compose(
            vec![self.fields.country_code.exact_query(&country_code.to_string())],
            deleted,
        )
    }

    /// Substring match on entity names.
    pub fn name_contains(&self, needle: &str, deleted: DeletedFilter) -> Result<Box<dyn Query>> {
        Ok(self.compose(vec![self.fields.name.contains_query(needle)?], deleted))
    }

    /// Free-text query: the input is run through the all-fields column's
    /// analyzer and every resulting token must match (AND semantics). No
    /// OR, no phrases, no fuzziness.
    pub fn free_text(&self, text: &str, deleted: DeletedFilter) -> Box<dyn Query> {
        let clauses: Vec<Box<dyn Query>> = self
            .fields
            .all_text_tokens(text)
            .into_iter()
            .map(|token| {
                let term = Term::from_field_text(self.fields.all_text, &token);
                Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>
            })
            .collect();
        self.compose(clauses, deleted)
    }

    /// Everything in the index, subject only to the deleted filter.
    pub fn all(&self, deleted: DeletedFilter) -> Box<dyn Query> {
        self.compose(Vec::new(), deleted)
    }

    /// ANDs the given clauses with the tombstone clause. With no clauses
    /// and no tombstone restriction this degenerates to match-all.
    fn compose(&self, clauses: Vec<Box<dyn Query>>, deleted: DeletedFilter) -> Box<dyn Query> {
        let mut subqueries: Vec<(Occur, Box<dyn Query>)> =
            clauses.into_iter().map(|q| (Occur::Must, q)).collect();
        match deleted {
            DeletedFilter::Exclude => {
                subqueries.push((Occur::Must, self.fields.deleted.exact_query(&false)));
            }
            DeletedFilter::Only => {
                subqueries.push((Occur::Must, self.fields.deleted.exact_query(&true)));
            }
            DeletedFilter::Include => {}
        }
        if subqueries.is_empty() {
            return Box::new(AllQuery);
        }
        Box::new(BooleanQuery::new(subqueries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir_index::DirectoryIndex;
    use crate::entity::{BusinessEntity, MultilingualName, StoredMetadata};
    use crate::storage::StorageManager;
    use std::sync::Arc;
    use tantivy::collector::Count;

    fn seed() -> (Arc<DirectoryIndex>, StorageManager) {
        let index = Arc::new(DirectoryIndex::open_in_ram().unwrap());
        let storage = StorageManager::new(Arc::clone(&index));
        (index, storage)
    }

    fn entity(country: &str, name: &str) -> BusinessEntity {
        BusinessEntity {
            country_code: Some(country.to_string()),
            names: vec![MultilingualName::new(name, None)],
            ..Default::default()
        }
    }

    fn count(index: &DirectoryIndex, query: &dyn Query) -> usize {
        index.search(|s| Ok(s.search(query, &Count)?)).unwrap()
    }

    #[test]
    fn test_free_text_and_semantics() {
        let (index, storage) = seed();
        let p1 = ParticipantIdentifier::new("s", "1");
        let p2 = ParticipantIdentifier::new("s", "2");
        storage
            .create_or_update(&p1, vec![entity("NO", "Acme Widgets")], StoredMetadata::new("o", "h"))
            .unwrap();
        storage
            .create_or_update(&p2, vec![entity("SE", "Acme Gadgets")], StoredMetadata::new("o", "h"))
            .unwrap();

        let builder = QueryBuilder::new(index.fields());
        assert_eq!(count(&index, &*builder.free_text("acme", DeletedFilter::Exclude)), 2);
        // both tokens must match the same document
        assert_eq!(
            count(&index, &*builder.free_text("acme widgets", DeletedFilter::Exclude)),
            1
        );
        assert_eq!(
            count(&index, &*builder.free_text("acme nothing", DeletedFilter::Exclude)),
            0
        );
    }

    #[test]
    fn test_deleted_filter_views() {
        let (index, storage) = seed();
        let p = ParticipantIdentifier::new("s", "1");
        storage
            .create_or_update(&p, vec![entity("NO", "Acme")], StoredMetadata::new("o", "h"))
            .unwrap();
        storage
            .delete(&p, StoredMetadata::new("o", "h"), false)
            .unwrap();

        let builder = QueryBuilder::new(index.fields());
        assert_eq!(count(&index, &*builder.participant(&p, DeletedFilter::Exclude)), 0);
        assert_eq!(count(&index, &*builder.participant(&p, DeletedFilter::Only)), 1);
        assert_eq!(count(&index, &*builder.participant(&p, DeletedFilter::Include)), 1);
    }

    #[test]
    fn test_country_query_is_exact() {
        let (index, storage) = seed();
        let p = ParticipantIdentifier::new("s", "1");
        storage
            .create_or_update(&p, vec![entity("NO", "Acme")], StoredMetadata::new("o", "h"))
            .unwrap();

        let builder = QueryBuilder::new(index.fields());
        assert_eq!(count(&index, &*builder.country("NO", DeletedFilter::Exclude)), 1);
        assert_eq!(count(&index, &*builder.country("N", DeletedFilter::Exclude)), 0);
        assert_eq!(count(&index, &*builder.country("no", DeletedFilter::Exclude)), 0);
    }

    #[test]
    fn test_free_text_matches_punctuated_input() {
        let (index, storage) = seed();
        let p = ParticipantIdentifier::new("iso6523-actorid-upis", "0088:test");
        storage
            .create_or_update(&p, vec![entity("NO", "Acme")], StoredMetadata::new("o", "h"))
            .unwrap();

        // the participant uri is indexed as several terms; the query input
        // must be analyzed the same way to match
        let builder = QueryBuilder::new(index.fields());
        assert_eq!(count(&index, &*builder.free_text("0088:test", DeletedFilter::Exclude)), 1);
        assert_eq!(
            count(&index, &*builder.free_text("iso6523-actorid-upis::0088:test", DeletedFilter::Exclude)),
            1
        );
    }

    #[test]
    fn test_contains_query_follows_field_case_handling() {
        let (index, storage) = seed();
        let p = ParticipantIdentifier::new("s", "1");
        storage
            .create_or_update(
                &p,
                vec![entity("NO", "Scandinavian Widget Works")],
                StoredMetadata::new("MixedCase-Owner", "h"),
            )
            .unwrap();
        let fields = index.fields();

        // tokenized field: terms are lowercased, any needle case matches
        let q = fields.name.contains_query("IDGET").unwrap();
        assert_eq!(count(&index, &*q), 1);

        // untokenized field: terms keep their case, the needle must too
        let q = fields.owner_id.contains_query("Case-Ow").unwrap();
        assert_eq!(count(&index, &*q), 1);
        let q = fields.owner_id.contains_query("case-ow").unwrap();
        assert_eq!(count(&index, &*q), 0);
    }

    #[test]
    fn test_name_contains() {
        let (index, storage) = seed();
        let p = ParticipantIdentifier::new("s", "1");
        storage
            .create_or_update(
                &p,
                vec![entity("NO", "Scandinavian Widget Works")],
                StoredMetadata::new("o", "h"),
            )
            .unwrap();

        let builder = QueryBuilder::new(index.fields());
        let q = builder.name_contains("idget", DeletedFilter::Exclude).unwrap();
        assert_eq!(count(&index, &*q), 1);
        let q = builder.name_contains("zzz", DeletedFilter::Exclude).unwrap();
        assert_eq!(count(&index, &*q), 0);
    }
}
