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

//! Error types for the OTA crate

use crate::channel::ChannelState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OtaError {
    /// A local precondition failed; nothing was sent over the network.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The content store answered with a non-success status.
    #[error("registry API {status} {status_text} - {body}")]
    Registry {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("publish of {artifact} already in progress")]
    PublishInProgress { artifact: String },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid version '{0}', expected MAJOR.MINOR.PATCH")]
    InvalidVersion(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("cannot derive a version from file name '{0}'")]
    VersionNotDerivable(String),

    #[error("'{0}' is not a .bin firmware file")]
    NotFirmwareFile(String),

    #[error("artifact '{0}' is not in the current listing")]
    UnknownArtifact(String),

    #[error("registry config incomplete: {0} is empty")]
    IncompleteConfig(&'static str),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("not connected (state: {state})")]
    NotConnected { state: ChannelState },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("timed out after {secs}s waiting for connection")]
    ConnectTimeout { secs: u64 },

    #[error("channel closed")]
    Closed,
}

impl OtaError {
    /// Status code of a failed registry call.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Registry { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the store rejected a write because the concurrency token was
    /// stale (409) or missing for an existing path (422).
    pub fn is_conflict(&self) -> bool {
        matches!(self.status(), Some(409 | 422))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

pub type Result<T> = std::result::Result<T, OtaError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_error(status: u16) -> OtaError {
        OtaError::Registry {
            status,
            status_text: String::new(),
            body: String::new(),
        }
    }

    #[test]
    fn test_conflict_classification() {
        assert!(registry_error(409).is_conflict());
        assert!(registry_error(422).is_conflict());
        assert!(!registry_error(404).is_conflict());
        assert!(registry_error(404).is_not_found());
        assert!(!OtaError::Channel(ChannelError::Closed).is_conflict());
    }

    #[test]
    fn test_registry_error_message() {
        let err = OtaError::Registry {
            status: 409,
            status_text: "Conflict".to_string(),
            body: "{\"message\":\"sha does not match\"}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "registry API 409 Conflict - {\"message\":\"sha does not match\"}"
        );
    }

    #[test]
    fn test_not_connected_message_names_state() {
        let err = ChannelError::NotConnected {
            state: ChannelState::Connecting,
        };
        assert_eq!(err.to_string(), "not connected (state: connecting)");
    }
}
