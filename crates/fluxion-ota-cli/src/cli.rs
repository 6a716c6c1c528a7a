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

//! CLI argument definitions using clap.

use crate::settings::DEFAULT_SETTINGS_PATH;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "fluxion-ota")]
#[command(author, version, about = "FluxION firmware registry and OTA publisher")]
#[command(
    long_about = "Manage firmware binaries stored in a GitHub repository branch and tell\n\
    devices which one to install over MQTT.\n\
    \nThe registry token can also be supplied through FLUXION_OTA_TOKEN.\n\
    \nExamples:\n  \
    fluxion-ota settings set --owner solare --repo devices --base-url https://solare.github.io/devices\n  \
    fluxion-ota list\n  \
    fluxion-ota upload build/app.bin --version 1.4.0\n  \
    fluxion-ota publish firmware_1_4_0.bin --topic device/ESP32-D15644"
)]
pub struct Cli {
    /// Operator settings file
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_SETTINGS_PATH)]
    pub settings: PathBuf,

    /// Print results as JSON instead of tables
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List firmware artifacts, newest version first
    List,

    /// Upload a firmware binary as a given version
    Upload(UploadArgs),

    /// Delete a firmware artifact from the registry
    Delete(DeleteArgs),

    /// Tell devices to install an artifact
    Publish(PublishArgs),

    /// Show or change the stored operator settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Path to the `.bin` firmware image
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Version to store the image as (MAJOR.MINOR.PATCH)
    #[arg(long, value_name = "X.Y.Z")]
    pub version: String,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Artifact file name, e.g. firmware_1_0_0.bin
    pub name: String,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Artifact file name, e.g. firmware_1_0_0.bin
    pub name: String,

    /// Topic override for this publish
    #[arg(long)]
    pub topic: Option<String>,

    /// Delivery level override (0, 1 or 2)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub qos: Option<u8>,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Print the current settings with the token redacted
    Show,

    /// Update one or more settings and save them
    Set(SetArgs),
}

#[derive(Debug, Args, Default)]
pub struct SetArgs {
    #[arg(long)]
    pub owner: Option<String>,

    #[arg(long)]
    pub repo: Option<String>,

    #[arg(long)]
    pub branch: Option<String>,

    /// Public base URL the branch is served from
    #[arg(long)]
    pub base_url: Option<String>,

    /// Directory inside the repository holding firmware files
    #[arg(long)]
    pub ota_dir: Option<String>,

    /// Registry access token; pass an empty string to clear it
    #[arg(long)]
    pub token: Option<String>,

    #[arg(long)]
    pub api_base_url: Option<String>,

    /// Broker endpoint, e.g. wss://test.mosquitto.org:8081
    #[arg(long)]
    pub endpoint: Option<String>,

    /// WebSocket path suffix, e.g. /mqtt
    #[arg(long)]
    pub path: Option<String>,

    /// Fixed MQTT client id; pass an empty string to generate one per session
    #[arg(long)]
    pub client_id: Option<String>,

    #[arg(long)]
    pub keepalive_secs: Option<u64>,

    #[arg(long)]
    pub reconnect_period_ms: Option<u64>,

    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// Default publish topic
    #[arg(long)]
    pub topic: Option<String>,

    /// Default delivery level (0, 1 or 2)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub qos: Option<u8>,
}
