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

//! Firmware registry backed by the GitHub contents API

pub mod client;
pub mod types;

pub use client::{MAX_ARTIFACT_BYTES, RegistryClient};
pub use types::ArtifactRecord;

use crate::config::RegistryConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Storage operations the catalog needs from a registry.
///
/// Every mutation is concurrency-checked by the store: `expected_token` on
/// update and `token` on delete must match the stored blob.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Firmware files currently in `config.ota_dir`, in store order
    async fn list(&self, config: &RegistryConfig) -> Result<Vec<ArtifactRecord>>;

    /// Current token for `path`, `None` when the path does not exist
    async fn get_token(&self, config: &RegistryConfig, path: &str) -> Result<Option<String>>;

    async fn create_or_update(
        &self,
        config: &RegistryConfig,
        path: &str,
        content: &[u8],
        message: &str,
        expected_token: Option<&str>,
    ) -> Result<ArtifactRecord>;

    async fn delete(
        &self,
        config: &RegistryConfig,
        path: &str,
        token: &str,
        message: &str,
    ) -> Result<()>;
}
