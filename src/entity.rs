// src/entity.rs
use crate::identifier::ParticipantIdentifier;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The externally published metadata document for one participant,
/// as fetched from the remote registry. A participant may publish zero,
/// one or many business entities under one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessCard {
    pub participant_id: ParticipantIdentifier,
    #[serde(default)]
    pub entities: Vec<BusinessEntity>,
}

/// One legal entity on a business card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessEntity {
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub names: Vec<MultilingualName>,
    #[serde(default)]
    pub geo_info: Option<String>,
    #[serde(default)]
    pub identifiers: Vec<EntityIdentifier>,
    #[serde(default)]
    pub website_uris: Vec<String>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub additional_info: Option<String>,
    #[serde(default)]
    pub registration_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultilingualName {
    pub name: String,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl MultilingualName {
    pub fn new(name: impl Into<String>, language_code: Option<&str>) -> Self {
        Self {
            name: name.into(),
            language_code: language_code.map(|s| s.to_string()),
        }
    }
}

/// Additional identifier of an entity (e.g. a national registration number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityIdentifier {
    pub scheme: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub contact_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Ingestion provenance attached to every stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMetadata {
    pub creation_timestamp: DateTime<Utc>,
    pub owner_id: String,
    pub requesting_host: String,
}

impl StoredMetadata {
    pub fn new(owner_id: impl Into<String>, requesting_host: impl Into<String>) -> Self {
        Self {
            creation_timestamp: Utc::now(),
            owner_id: owner_id.into(),
            requesting_host: requesting_host.into(),
        }
    }
}

/// One indexed directory record: a business entity tagged with its owning
/// participant, ingestion metadata and the tombstone flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBusinessEntity {
    pub participant_id: ParticipantIdentifier,
    pub entity: BusinessEntity,
    pub metadata: StoredMetadata,
    #[serde(default)]
    pub deleted: bool,
}

impl StoredBusinessEntity {
    pub fn new(
        participant_id: ParticipantIdentifier,
        entity: BusinessEntity,
        metadata: StoredMetadata,
    ) -> Self {
        Self {
            participant_id,
            entity,
            metadata,
            deleted: false,
        }
    }

    /// All human-searchable text of this record, fed into the composite
    /// all-fields index column.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.push(self.participant_id.as_uri());
        if let Some(ref cc) = self.entity.country_code {
            parts.push(cc.clone());
        }
        for n in &self.entity.names {
            parts.push(n.name.clone());
        }
        if let Some(ref geo) = self.entity.geo_info {
            parts.push(geo.clone());
        }
        for id in &self.entity.identifiers {
            parts.push(id.scheme.clone());
            parts.push(id.value.clone());
        }
        parts.extend(self.entity.website_uris.iter().cloned());
        for c in &self.entity.contacts {
            for v in [&c.contact_type, &c.name, &c.phone, &c.email].into_iter().flatten() {
                parts.push(v.clone());
            }
        }
        if let Some(ref info) = self.entity.additional_info {
            parts.push(info.clone());
        }
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchable_text_collects_all_fields() {
        let entity = BusinessEntity {
            country_code: Some("NO".to_string()),
            names: vec![MultilingualName::new("Acme AS", Some("no"))],
            geo_info: Some("Oslo".to_string()),
            identifiers: vec![EntityIdentifier {
                scheme: "orgnr".to_string(),
                value: "999888777".to_string(),
            }],
            website_uris: vec!["https://acme.example".to_string()],
            contacts: vec![Contact {
                contact_type: Some("support".to_string()),
                name: Some("Kari".to_string()),
                phone: None,
                email: Some("kari@acme.example".to_string()),
            }],
            additional_info: Some("widgets".to_string()),
            registration_date: None,
        };
        let stored = StoredBusinessEntity::new(
            ParticipantIdentifier::new("iso6523-actorid-upis", "0088:acme"),
            entity,
            StoredMetadata::new("owner", "127.0.0.1"),
        );
        let text = stored.searchable_text();
        for needle in ["Acme AS", "NO", "Oslo", "999888777", "kari@acme.example", "widgets"] {
            assert!(text.contains(needle), "missing {} in {}", needle, text);
        }
    }

    #[test]
    fn test_stored_entity_json_round_trip() {
        let stored = StoredBusinessEntity::new(
            ParticipantIdentifier::new("s", "v"),
            BusinessEntity {
                country_code: Some("DE".to_string()),
                names: vec![MultilingualName::new("Firma GmbH", None)],
                registration_date: Some(NaiveDate::from_ymd_opt(2019, 4, 1).unwrap()),
                ..Default::default()
            },
            StoredMetadata::new("owner", "host"),
        );
        let json = serde_json::to_string(&stored).unwrap();
        let back: StoredBusinessEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stored);
    }
}
