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

//! Persisted operator settings

use anyhow::{Context, Result};
use fluxion_ota::{ChannelOptions, PublishTarget, RegistryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_SETTINGS_PATH: &str = "fluxion-ota.json";

/// Overrides the stored registry token when set
pub const TOKEN_ENV: &str = "FLUXION_OTA_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSettings {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub channel: ChannelOptions,

    #[serde(default)]
    pub target: PublishTarget,
}

impl OperatorSettings {
    /// Read settings from `path`, falling back to defaults when the file does
    /// not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(self)?;

        // Atomic write
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to save settings to {}", path.display()))?;
        Ok(())
    }

    /// Apply the environment token, if any. Blank values are ignored.
    #[must_use]
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.registry.token = Some(token);
        }
        self
    }

    /// Copy safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.registry.has_token() {
            copy.registry.token = Some("<redacted>".to_string());
        }
        copy
    }
}
