//! Business card provider: fetches participant metadata from the remote registry
// src/provider.rs
use crate::constants;
use crate::entity::BusinessCard;
use crate::identifier::ParticipantIdentifier;
use anyhow::{bail, Context, Result};
use log::debug;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::time::Duration;

/// Source of business cards. `Ok(None)` means the registry authoritatively
/// has no card for the participant; errors mean the answer is unknown and
/// the caller should retry later.
pub trait BusinessCardProvider: Send + Sync {
    fn fetch(&self, participant_id: &ParticipantIdentifier) -> Result<Option<BusinessCard>>;
}

/// Fetches cards over HTTP from a registry endpoint serving
/// `GET {base}/businesscard/{participant}` as JSON.
pub struct HttpBusinessCardProvider {
    client: Client,
    base_url: String,
}

impl HttpBusinessCardProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(constants::HTTP_TIMEOUT_SECS))
            .user_agent(constants::user_agent())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl BusinessCardProvider for HttpBusinessCardProvider {
    fn fetch(&self, participant_id: &ParticipantIdentifier) -> Result<Option<BusinessCard>> {
        let url = format!("{}/businesscard/{}", self.base_url, participant_id.as_uri());
        debug!("provider: GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("Request to {} failed", url))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("Registry returned {} for {}", response.status(), url);
        }
        let card: BusinessCard = response
            .json()
            .with_context(|| format!("Invalid business card payload from {}", url))?;
        Ok(Some(card))
    }
}
