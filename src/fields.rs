//! Typed field codecs: bidirectional mapping between domain values and index storage primitives
// src/fields.rs
use crate::error::DirectoryError;
use crate::identifier::{IdentifierFactory, ParticipantIdentifier, SimpleIdentifierFactory};
use chrono::{DateTime, NaiveDate, Utc};
use tantivy::query::{Query, RegexQuery, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, SchemaBuilder, INDEXED, STORED, STRING, TEXT,
};
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer};
use tantivy::{Document, Term};

/// How a string field is indexed. Maps a mode value to a field-construction
/// option set; no per-field subclassing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizeMode {
    /// Split into terms for free-text search.
    Tokenized,
    /// Single raw term, exact match only.
    Untokenized,
}

impl TokenizeMode {
    fn register(self, builder: &mut SchemaBuilder, name: &str) -> Field {
        match self {
            TokenizeMode::Tokenized => builder.add_text_field(name, TEXT | STORED),
            TokenizeMode::Untokenized => builder.add_text_field(name, STRING | STORED),
        }
    }
}

/// One logical field, parameterized over (native type N, storage type S).
///
/// Conversion is carried as plain function fields instead of virtual
/// dispatch. `to_storage` is infallible: a converter that cannot represent
/// a valid native value is a codec bug, not bad data, and panics inside the
/// converter. `from_storage` is the recoverable direction: stored bytes may
/// be corrupt or written by an older schema, so it returns an error the
/// reader logs and skips.
pub struct FieldDescriptor<N, S> {
    name: &'static str,
    field: Field,
    tokenize: TokenizeMode,
    to_storage: fn(&N) -> S,
    from_storage: fn(&S) -> Result<N, DirectoryError>,
}

impl<N, S> FieldDescriptor<N, S> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn to_storage(&self, value: &N) -> S {
        (self.to_storage)(value)
    }

    pub fn from_storage(&self, stored: &S) -> Result<N, DirectoryError> {
        (self.from_storage)(stored)
    }
}

impl<N> FieldDescriptor<N, String> {
    /// Adds the encoded value to a document under this field.
    pub fn store(&self, doc: &mut Document, value: &N) {
        doc.add_text(self.field, (self.to_storage)(value));
    }

    /// Exact-match term for this field.
    pub fn exact_term(&self, value: &N) -> Term {
        Term::from_field_text(self.field, &(self.to_storage)(value))
    }

    /// Exact-match query for this field.
    pub fn exact_query(&self, value: &N) -> Box<dyn Query> {
        Box::new(TermQuery::new(self.exact_term(value), IndexRecordOption::Basic))
    }

    /// Substring ("contains") query. The needle is escaped, so it is
    /// matched literally, never as a pattern. Tokenized fields hold
    /// lowercased terms, so the needle is folded to match; untokenized
    /// terms preserve case and are matched as given.
    pub fn contains_query(&self, needle: &str) -> Result<Box<dyn Query>, DirectoryError> {
        let needle = match self.tokenize {
            TokenizeMode::Tokenized => needle.to_lowercase(),
            TokenizeMode::Untokenized => needle.to_string(),
        };
        let pattern = format!(".*{}.*", regex::escape(&needle));
        let query = RegexQuery::from_pattern(&pattern, self.field)
            .map_err(|e| DirectoryError::field_decode(self.name, e.to_string()))?;
        Ok(Box::new(query))
    }

    /// Decodes the first stored value of this field from a document.
    /// `None` when the field is absent.
    pub fn read_first(&self, doc: &Document) -> Option<Result<N, DirectoryError>> {
        let raw = doc.get_first(self.field)?.as_text()?;
        Some((self.from_storage)(&raw.to_string()))
    }
}

impl<N> FieldDescriptor<N, i64> {
    pub fn store(&self, doc: &mut Document, value: &N) {
        doc.add_i64(self.field, (self.to_storage)(value));
    }

    pub fn exact_term(&self, value: &N) -> Term {
        Term::from_field_i64(self.field, (self.to_storage)(value))
    }

    pub fn exact_query(&self, value: &N) -> Box<dyn Query> {
        Box::new(TermQuery::new(self.exact_term(value), IndexRecordOption::Basic))
    }

    pub fn read_first(&self, doc: &Document) -> Option<Result<N, DirectoryError>> {
        let raw = doc.get_first(self.field)?.as_i64()?;
        Some((self.from_storage)(&raw))
    }
}

fn identity_string(v: &String) -> String {
    v.clone()
}

fn string_from_storage(v: &String) -> Result<String, DirectoryError> {
    Ok(v.clone())
}

fn participant_to_storage(p: &ParticipantIdentifier) -> String {
    p.as_uri()
}

fn participant_from_storage(v: &String) -> Result<ParticipantIdentifier, DirectoryError> {
    SimpleIdentifierFactory
        .parse(v)
        .map_err(|e| DirectoryError::field_decode("participant", e.to_string()))
}

fn timestamp_to_storage(t: &DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn timestamp_from_storage(v: &i64) -> Result<DateTime<Utc>, DirectoryError> {
    DateTime::from_timestamp_millis(*v)
        .ok_or_else(|| DirectoryError::field_decode("creation", format!("{} out of range", v)))
}

fn date_to_storage(d: &NaiveDate) -> i64 {
    // Midnight always exists, so this cannot fail for a valid NaiveDate.
    d.and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time of day")
        .and_utc()
        .timestamp_millis()
}

fn date_from_storage(v: &i64) -> Result<NaiveDate, DirectoryError> {
    DateTime::from_timestamp_millis(*v)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| DirectoryError::field_decode("registration", format!("{} out of range", v)))
}

fn bool_to_storage(b: &bool) -> i64 {
    if *b {
        1
    } else {
        0
    }
}

fn bool_from_storage(v: &i64) -> Result<bool, DirectoryError> {
    match v {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DirectoryError::field_decode(
            "deleted",
            format!("expected 0 or 1, got {}", other),
        )),
    }
}

/// The directory schema: every logical field of a stored business entity,
/// each bound to its codec, plus the composite all-fields text column and
/// the stored-only JSON payload.
pub struct DirectoryFields {
    schema: Schema,
    pub participant: FieldDescriptor<ParticipantIdentifier, String>,
    pub country_code: FieldDescriptor<String, String>,
    pub name: FieldDescriptor<String, String>,
    pub owner_id: FieldDescriptor<String, String>,
    pub requesting_host: FieldDescriptor<String, String>,
    pub creation_timestamp: FieldDescriptor<DateTime<Utc>, i64>,
    pub registration_date: FieldDescriptor<NaiveDate, i64>,
    pub deleted: FieldDescriptor<bool, i64>,
    /// Composite tokenized column every searchable value is mirrored into.
    pub all_text: Field,
    /// Full stored record as JSON, the retrieval payload.
    pub entity_json: Field,
}

impl DirectoryFields {
    pub fn new() -> Self {
        let mut builder = Schema::builder();

        let participant_field =
            TokenizeMode::Untokenized.register(&mut builder, "participant");
        let country_field = TokenizeMode::Untokenized.register(&mut builder, "country");
        let name_field = TokenizeMode::Tokenized.register(&mut builder, "name");
        let owner_field = TokenizeMode::Untokenized.register(&mut builder, "owner");
        let host_field = TokenizeMode::Untokenized.register(&mut builder, "host");
        let creation_field = builder.add_i64_field("creation", INDEXED | STORED);
        let registration_field = builder.add_i64_field("registration", INDEXED | STORED);
        let deleted_field = builder.add_i64_field("deleted", INDEXED | STORED);
        let all_text = builder.add_text_field("all", TEXT);
        let entity_json = builder.add_text_field("entity", STORED);

        Self {
            schema: builder.build(),
            participant: FieldDescriptor {
                name: "participant",
                field: participant_field,
                tokenize: TokenizeMode::Untokenized,
                to_storage: participant_to_storage,
                from_storage: participant_from_storage,
            },
            country_code: FieldDescriptor {
                name: "country",
                field: country_field,
                tokenize: TokenizeMode::Untokenized,
                to_storage: identity_string,
                from_storage: string_from_storage,
            },
            name: FieldDescriptor {
                name: "name",
                field: name_field,
                tokenize: TokenizeMode::Tokenized,
                to_storage: identity_string,
                from_storage: string_from_storage,
            },
            owner_id: FieldDescriptor {
                name: "owner",
                field: owner_field,
                tokenize: TokenizeMode::Untokenized,
                to_storage: identity_string,
                from_storage: string_from_storage,
            },
            requesting_host: FieldDescriptor {
                name: "host",
                field: host_field,
                tokenize: TokenizeMode::Untokenized,
                to_storage: identity_string,
                from_storage: string_from_storage,
            },
            creation_timestamp: FieldDescriptor {
                name: "creation",
                field: creation_field,
                tokenize: TokenizeMode::Untokenized,
                to_storage: timestamp_to_storage,
                from_storage: timestamp_from_storage,
            },
            registration_date: FieldDescriptor {
                name: "registration",
                field: registration_field,
                tokenize: TokenizeMode::Untokenized,
                to_storage: date_to_storage,
                from_storage: date_from_storage,
            },
            deleted: FieldDescriptor {
                name: "deleted",
                field: deleted_field,
                tokenize: TokenizeMode::Untokenized,
                to_storage: bool_to_storage,
                from_storage: bool_from_storage,
            },
            all_text,
            entity_json,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Tokenizes query text exactly like the composite all-fields column is
    /// tokenized at index time (the default analyzer), so query terms line
    /// up with indexed terms even for input with internal punctuation.
    pub fn all_text_tokens(&self, text: &str) -> Vec<String> {
        let mut analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(40))
            .filter(LowerCaser)
            .build();
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        tokens
    }
}

impl Default for DirectoryFields {
    fn default() -> Self {
        Self::new()
    }
}
