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

use crate::version::file_name_to_version;
use serde::{Deserialize, Serialize};

/// One firmware binary stored in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    /// Dotted version derived from `name`, absent for non-canonical names
    pub version: Option<String>,
    /// Blob SHA of the stored bytes; required to overwrite or delete
    pub concurrency_token: String,
    pub download_url: Option<String>,
}

impl ArtifactRecord {
    pub(crate) fn from_item(item: ContentItem) -> Self {
        Self {
            version: file_name_to_version(&item.name),
            name: item.name,
            concurrency_token: item.sha,
            download_url: item.download_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ContentKind {
    File,
    Dir,
    Symlink,
    Submodule,
    #[serde(other)]
    Other,
}

/// Entry of the contents API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContentItem {
    pub name: String,
    #[serde(default)]
    pub path: String,
    pub sha: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: ContentKind,
}

impl ContentItem {
    pub fn is_firmware_file(&self) -> bool {
        self.kind == ContentKind::File && self.name.ends_with(".bin")
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct PutContentRequest<'a> {
    pub message: &'a str,
    pub branch: &'a str,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteContentRequest<'a> {
    pub message: &'a str,
    pub branch: &'a str,
    pub sha: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PutContentResponse {
    pub content: ContentItem,
}
