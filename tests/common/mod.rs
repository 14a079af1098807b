use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tempfile::TempDir;

use bizdir::{
    BusinessCard, BusinessCardProvider, BusinessEntity, DirectoryIndex, IndexerConfig,
    IndexerManager, MultilingualName, ParticipantIdentifier, StorageManager,
};

/// Provider backed by a programmable in-memory map. A participant with no
/// entry behaves like an unreachable registry; an explicit `None` entry is
/// an authoritative not-found.
pub struct MockProvider {
    cards: RwLock<HashMap<String, Option<BusinessCard>>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cards: RwLock::new(HashMap::new()),
        })
    }

    pub fn put(&self, id: &ParticipantIdentifier, card: Option<BusinessCard>) {
        self.cards.write().unwrap().insert(id.as_uri(), card);
    }
}

impl BusinessCardProvider for MockProvider {
    fn fetch(&self, id: &ParticipantIdentifier) -> Result<Option<BusinessCard>> {
        match self.cards.read().unwrap().get(&id.as_uri()) {
            Some(card) => Ok(card.clone()),
            None => anyhow::bail!("registry unreachable for {}", id),
        }
    }
}

pub fn setup_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(anyhow::Error::from)
}

pub fn setup_manager(dir: &TempDir, provider: Arc<MockProvider>) -> Result<IndexerManager> {
    let storage = Arc::new(StorageManager::new(Arc::new(DirectoryIndex::open(
        dir.path().join("index"),
    )?)));
    IndexerManager::new(dir.path(), storage, provider, &IndexerConfig::default())
}

pub fn card(id: &ParticipantIdentifier, country: &str, name: &str) -> BusinessCard {
    BusinessCard {
        participant_id: id.clone(),
        entities: vec![BusinessEntity {
            country_code: Some(country.to_string()),
            names: vec![MultilingualName::new(name, None)],
            ..Default::default()
        }],
    }
}

/// Polls until the predicate holds, failing the test after ~2 seconds.
pub fn wait_until(pred: impl Fn() -> bool) {
    for _ in 0..200 {
        if pred() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached in time");
}
