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

//! FluxION OTA - Firmware registry synchronization and publish controller
//!
//! Firmware binaries live in a directory of a GitHub repository branch that is
//! served as static content. This crate lists and mutates that directory with
//! optimistic concurrency, maps versions to artifact names, and tells the
//! device fleet which artifact to fetch over an MQTT channel.

pub mod catalog;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod registry;
pub mod version;

pub use catalog::{FirmwareCatalog, ListingSnapshot};
pub use channel::mqtt::MqttConnector;
pub use channel::{
    BrokerConnector, BrokerLink, ChannelOptions, ChannelPayload, ChannelState, ChannelStatus,
    DeliveryLevel, LinkEvent, PublishChannel,
};
pub use config::RegistryConfig;
pub use controller::{PublishController, PublishMessage, PublishState, PublishTarget};
pub use error::{ChannelError, OtaError, Result, ValidationError};
pub use registry::{ArtifactRecord, ArtifactStore, MAX_ARTIFACT_BYTES, RegistryClient};
pub use version::{compare_versions, file_name_to_version, is_valid_semver_like, version_to_file_name};
