// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Firmware catalog
//!
//! Keeps the latest listing of one registry and runs the operator flows on top
//! of it: upload a version, delete an artifact, resolve a public URL. The
//! snapshot only changes on an explicit [`FirmwareCatalog::refresh`] or after
//! a successful mutation.

use crate::config::RegistryConfig;
use crate::error::{Result, ValidationError};
use crate::registry::{ArtifactRecord, ArtifactStore, MAX_ARTIFACT_BYTES, RegistryClient};
use crate::version::{compare_versions, is_valid_semver_like, version_to_file_name};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Records of one listing, newest version first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListingSnapshot {
    pub records: Vec<ArtifactRecord>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ListingSnapshot {
    pub fn new(records: Vec<ArtifactRecord>, fetched_at: DateTime<Utc>) -> Self {
        let mut seen = HashSet::new();
        let mut records: Vec<_> = records
            .into_iter()
            .filter(|record| seen.insert(record.name.clone()))
            .collect();
        records.sort_by(newest_first);
        Self {
            records,
            fetched_at: Some(fetched_at),
        }
    }

    pub fn find(&self, name: &str) -> Option<&ArtifactRecord> {
        self.records.iter().find(|record| record.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

fn newest_first(a: &ArtifactRecord, b: &ArtifactRecord) -> Ordering {
    match (&a.version, &b.version) {
        (Some(va), Some(vb)) => compare_versions(vb, va),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    }
}

pub struct FirmwareCatalog {
    store: Arc<dyn ArtifactStore>,
    config: RwLock<RegistryConfig>,
    snapshot: RwLock<ListingSnapshot>,
}

impl fmt::Debug for FirmwareCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareCatalog")
            .field("config", &*self.config.read())
            .field("artifacts", &self.snapshot.read().len())
            .finish_non_exhaustive()
    }
}

impl FirmwareCatalog {
    pub fn new(store: Arc<dyn ArtifactStore>, config: RegistryConfig) -> Self {
        Self {
            store,
            config: RwLock::new(config),
            snapshot: RwLock::new(ListingSnapshot::default()),
        }
    }

    pub fn config(&self) -> RegistryConfig {
        self.config.read().clone()
    }

    /// Replace the registry config. The previous listing no longer applies and
    /// is dropped.
    pub fn set_config(&self, config: RegistryConfig) {
        *self.config.write() = config;
        *self.snapshot.write() = ListingSnapshot::default();
    }

    pub fn snapshot(&self) -> ListingSnapshot {
        self.snapshot.read().clone()
    }

    pub fn find(&self, name: &str) -> Option<ArtifactRecord> {
        self.snapshot.read().find(name).cloned()
    }

    pub fn public_url(&self, name: &str) -> String {
        RegistryClient::resolve_public_url(&self.config.read(), name)
    }

    /// Re-list the registry and replace the snapshot.
    pub async fn refresh(&self) -> Result<ListingSnapshot> {
        let config = self.config();
        let records = self.store.list(&config).await?;
        let snapshot = ListingSnapshot::new(records, Utc::now());

        if *self.config.read() != config {
            warn!("Registry config changed during refresh, discarding listing");
            return Ok(snapshot);
        }
        info!("Listed {} firmware artifact(s)", snapshot.len());
        *self.snapshot.write() = snapshot.clone();
        Ok(snapshot)
    }

    /// Upload `content` as firmware `version`.
    ///
    /// Overwrites the existing artifact when the snapshot already holds one of
    /// the same name, using its concurrency token.
    pub async fn save(&self, version: &str, content: &[u8]) -> Result<ArtifactRecord> {
        let version = version.trim();
        if !is_valid_semver_like(version) {
            return Err(ValidationError::InvalidVersion(version.to_string()).into());
        }
        if content.len() > MAX_ARTIFACT_BYTES {
            return Err(ValidationError::PayloadTooLarge {
                size: content.len(),
                limit: MAX_ARTIFACT_BYTES,
            }
            .into());
        }

        let config = self.config();
        let name = version_to_file_name(version);
        let path = config.artifact_path(&name);
        let existing = self.find(&name);
        let message = if existing.is_some() {
            format!("chore(ota): update {name}")
        } else {
            format!("feat(ota): add {name}")
        };

        let record = self
            .store
            .create_or_update(
                &config,
                &path,
                content,
                &message,
                existing.as_ref().map(|r| r.concurrency_token.as_str()),
            )
            .await?;
        info!("💾 Saved {name} ({} bytes)", content.len());

        self.refresh_after_mutation().await;
        Ok(record)
    }

    /// Delete an artifact present in the current snapshot.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let Some(record) = self.find(name) else {
            return Err(ValidationError::UnknownArtifact(name.to_string()).into());
        };
        let config = self.config();
        let path = config.artifact_path(&record.name);

        self.store
            .delete(
                &config,
                &path,
                &record.concurrency_token,
                &format!("chore(ota): delete {}", record.name),
            )
            .await?;
        info!("🗑️ Deleted {}", record.name);

        self.refresh_after_mutation().await;
        Ok(())
    }

    // The mutation already landed; a failed re-list only leaves the snapshot stale.
    async fn refresh_after_mutation(&self) {
        if let Err(e) = self.refresh().await {
            warn!("Re-list after mutation failed: {e}");
        }
    }
}
