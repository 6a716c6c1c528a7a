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

//! Registry configuration
//!
//! A [`RegistryConfig`] names one logical firmware registry: a directory on a
//! branch of a GitHub repository that is served as static content. It is passed
//! explicitly into every registry call; the crate never persists it.

use crate::error::{Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

fn default_branch() -> String {
    "gh-pages".to_string()
}

fn default_ota_dir() -> String {
    "ota-firmware".to_string()
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Repository owner (user or organization)
    #[serde(default)]
    pub owner: String,

    /// Repository name
    #[serde(default)]
    pub repo: String,

    /// Branch the artifacts live on
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Public base URL the branch is served from (e.g. a GitHub Pages site)
    #[serde(default)]
    pub base_url: String,

    /// Directory inside the repository holding the firmware files
    #[serde(default = "default_ota_dir")]
    pub ota_dir: String,

    /// Fine-grained access token with contents read/write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Custom API base URL for testing (overrides default GitHub API)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            branch: default_branch(),
            base_url: String::new(),
            ota_dir: default_ota_dir(),
            token: None,
            api_base_url: None,
        }
    }
}

impl RegistryConfig {
    pub fn api_base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
    }

    /// Token to send, treating an empty string as "no token"
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    /// Repository path of an artifact inside the OTA directory
    pub fn artifact_path(&self, name: &str) -> String {
        let dir = self.ota_dir.trim_matches('/');
        if dir.is_empty() {
            name.to_string()
        } else {
            format!("{dir}/{name}")
        }
    }

    /// Check the fields every registry call depends on.
    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(ValidationError::IncompleteConfig("owner").into());
        }
        if self.repo.trim().is_empty() {
            return Err(ValidationError::IncompleteConfig("repo").into());
        }
        if self.branch.trim().is_empty() {
            return Err(ValidationError::IncompleteConfig("branch").into());
        }
        Ok(())
    }
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("base_url", &self.base_url)
            .field("ota_dir", &self.ota_dir)
            .field("token", &self.token().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}
