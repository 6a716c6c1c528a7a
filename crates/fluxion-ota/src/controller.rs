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

//! Publish controller
//!
//! Turns a registry artifact into a single `UPDATE` command on the channel.
//! At most one publish runs at a time per controller.

use crate::channel::{DeliveryLevel, PublishChannel};
use crate::config::RegistryConfig;
use crate::error::{OtaError, Result, ValidationError};
use crate::registry::{ArtifactRecord, RegistryClient};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const UPDATE_COMMAND: &str = "UPDATE";

fn default_topic() -> String {
    "device/ESP32-D15644".to_string()
}

/// Where and how publishes are delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default)]
    pub delivery: DeliveryLevel,
}

impl Default for PublishTarget {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            delivery: DeliveryLevel::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub firmware_url: String,
    pub version: String,
}

/// Command sent to the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMessage {
    pub command: String,
    pub payload: UpdatePayload,
}

impl PublishMessage {
    pub fn update(firmware_url: String, version: String) -> Self {
        Self {
            command: UPDATE_COMMAND.to_string(),
            payload: UpdatePayload {
                firmware_url,
                version,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PublishState {
    #[default]
    Idle,
    Publishing {
        artifact: String,
    },
}

/// Returns the controller to `Idle` however the publish ends.
struct PublishTicket<'a> {
    state: &'a Mutex<PublishState>,
}

impl Drop for PublishTicket<'_> {
    fn drop(&mut self) {
        *self.state.lock() = PublishState::Idle;
    }
}

#[derive(Debug)]
pub struct PublishController {
    channel: Arc<PublishChannel>,
    target: PublishTarget,
    state: Mutex<PublishState>,
}

impl PublishController {
    pub fn new(channel: Arc<PublishChannel>, target: PublishTarget) -> Self {
        Self {
            channel,
            target,
            state: Mutex::new(PublishState::Idle),
        }
    }

    pub fn target(&self) -> &PublishTarget {
        &self.target
    }

    pub fn state(&self) -> PublishState {
        self.state.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        matches!(*self.state.lock(), PublishState::Publishing { .. })
    }

    /// Publish `record` as the fleet's update target.
    ///
    /// Returns the message that was delivered. Channel failures are returned
    /// as-is; nothing is retried.
    pub async fn publish_artifact(
        &self,
        record: &ArtifactRecord,
        config: &RegistryConfig,
    ) -> Result<PublishMessage> {
        let Some(version) = record.version.clone() else {
            return Err(ValidationError::VersionNotDerivable(record.name.clone()).into());
        };

        let _ticket = self.begin(&record.name)?;

        let firmware_url = RegistryClient::resolve_public_url(config, &record.name);
        let message = PublishMessage::update(firmware_url, version);
        let body = serde_json::to_value(&message)?;

        info!(
            artifact = %record.name,
            topic = %self.target.topic,
            level = self.target.delivery.as_u8(),
            "📡 Publishing firmware update"
        );

        match self
            .channel
            .publish(&self.target.topic, body, self.target.delivery)
            .await
        {
            Ok(()) => {
                info!(
                    "✅ Published {} ({})",
                    record.name, message.payload.version
                );
                Ok(message)
            }
            Err(e) => {
                warn!("❌ Publish of {} failed: {e}", record.name);
                Err(e)
            }
        }
    }

    fn begin(&self, artifact: &str) -> Result<PublishTicket<'_>> {
        let mut state = self.state.lock();
        if let PublishState::Publishing { artifact: current } = &*state {
            return Err(OtaError::PublishInProgress {
                artifact: current.clone(),
            });
        }
        *state = PublishState::Publishing {
            artifact: artifact.to_string(),
        };
        Ok(PublishTicket { state: &self.state })
    }
}
