// src/identifier.rs
use anyhow::{bail, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Separator between scheme and value in the string form,
/// e.g. "iso6523-actorid-upis::0088:test".
pub const SCHEME_SEPARATOR: &str = "::";

/// Scheme + value pair addressing one network participant.
///
/// Immutable value type; equality is structural. Serialized as its
/// `scheme::value` string form everywhere (persisted records, index terms).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantIdentifier {
    scheme: String,
    value: String,
}

impl ParticipantIdentifier {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// The canonical `scheme::value` form used as the index key term.
    pub fn as_uri(&self) -> String {
        format!("{}{}{}", self.scheme, SCHEME_SEPARATOR, self.value)
    }
}

impl fmt::Display for ParticipantIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, SCHEME_SEPARATOR, self.value)
    }
}

impl Serialize for ParticipantIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_uri())
    }
}

impl<'de> Deserialize<'de> for ParticipantIdentifier {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SimpleIdentifierFactory
            .parse(&s)
            .map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// Pluggable participant-identifier syntax. The core never hard-codes
/// identifier grammar; callers that need a different scheme registry
/// provide their own factory.
pub trait IdentifierFactory: Send + Sync {
    /// Parses the string form into an identifier, or fails if the input
    /// does not denote a valid participant.
    fn parse(&self, input: &str) -> Result<ParticipantIdentifier>;
}

/// Default factory: `scheme::value` with a non-empty scheme and value.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleIdentifierFactory;

impl IdentifierFactory for SimpleIdentifierFactory {
    fn parse(&self, input: &str) -> Result<ParticipantIdentifier> {
        let trimmed = input.trim();
        let Some((scheme, value)) = trimmed.split_once(SCHEME_SEPARATOR) else {
            bail!("invalid participant identifier '{}': missing '{}' separator", input, SCHEME_SEPARATOR);
        };
        if scheme.is_empty() || value.is_empty() {
            bail!("invalid participant identifier '{}': empty scheme or value", input);
        }
        Ok(ParticipantIdentifier::new(scheme, value))
    }
}
