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

//! Command handlers

use crate::cli::{
    Cli, Commands, DeleteArgs, PublishArgs, SetArgs, SettingsCommand, UploadArgs,
};
use crate::settings::{OperatorSettings, TOKEN_ENV};
use anyhow::{Context, Result, anyhow, ensure};
use comfy_table::{Attribute, Cell, Color, Table, presets::UTF8_FULL};
use fluxion_ota::{
    ArtifactRecord, BrokerConnector, ChannelOptions, DeliveryLevel, FirmwareCatalog,
    ListingSnapshot, MAX_ARTIFACT_BYTES, MqttConnector, PublishChannel, PublishController,
    PublishMessage, PublishTarget, RegistryClient, RegistryConfig, ValidationError,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub async fn run(cli: Cli, env_token: Option<String>) -> Result<()> {
    let settings = OperatorSettings::load(&cli.settings)?;

    match cli.command {
        Commands::Settings { action } => run_settings(action, settings, &cli.settings),
        Commands::List => {
            let settings = settings.with_token_override(env_token);
            let snapshot = list(&settings.registry).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", render_listing(&snapshot, &settings.registry));
            }
            Ok(())
        }
        Commands::Upload(args) => {
            let settings = settings.with_token_override(env_token);
            let record = upload(&settings.registry, &args).await?;
            print_record(&record, cli.json)
        }
        Commands::Delete(args) => {
            let settings = settings.with_token_override(env_token);
            delete(&settings.registry, &args).await?;
            println!("Deleted {}", args.name);
            Ok(())
        }
        Commands::Publish(args) => {
            let settings = settings.with_token_override(env_token);
            let message = publish(&settings, &args, Arc::new(MqttConnector)).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&message)?);
            } else {
                println!(
                    "Published {} ({})",
                    message.payload.firmware_url, message.payload.version
                );
            }
            Ok(())
        }
    }
}

fn catalog(config: &RegistryConfig) -> Result<FirmwareCatalog> {
    let client = RegistryClient::new().context("Failed to build registry client")?;
    Ok(FirmwareCatalog::new(Arc::new(client), config.clone()))
}

fn require_token(config: &RegistryConfig) -> Result<()> {
    ensure!(
        config.has_token(),
        "a registry token is required; run `fluxion-ota settings set --token ...` or set {TOKEN_ENV}"
    );
    Ok(())
}

/// File name of an upload candidate, which must be a `.bin` image
fn firmware_file_name(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid firmware path {}", path.display()))?;
    if !name.ends_with(".bin") {
        return Err(ValidationError::NotFirmwareFile(name.to_string()).into());
    }
    Ok(name.to_string())
}

async fn list(config: &RegistryConfig) -> Result<ListingSnapshot> {
    catalog(config)?
        .refresh()
        .await
        .context("Failed to list firmware registry")
}

async fn upload(config: &RegistryConfig, args: &UploadArgs) -> Result<ArtifactRecord> {
    require_token(config)?;
    firmware_file_name(&args.file)?;

    let size = tokio::fs::metadata(&args.file)
        .await
        .with_context(|| format!("Failed to stat {}", args.file.display()))?
        .len();
    let size = usize::try_from(size).unwrap_or(usize::MAX);
    if size > MAX_ARTIFACT_BYTES {
        return Err(ValidationError::PayloadTooLarge {
            size,
            limit: MAX_ARTIFACT_BYTES,
        }
        .into());
    }

    let content = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let catalog = catalog(config)?;
    // Needed to decide between create and update
    catalog
        .refresh()
        .await
        .context("Failed to list firmware registry")?;

    let record = catalog
        .save(&args.version, &content)
        .await
        .with_context(|| format!("Failed to upload {}", args.file.display()))?;
    info!("Uploaded {} as {}", args.file.display(), record.name);
    Ok(record)
}

async fn delete(config: &RegistryConfig, args: &DeleteArgs) -> Result<()> {
    require_token(config)?;
    let catalog = catalog(config)?;
    catalog
        .refresh()
        .await
        .context("Failed to list firmware registry")?;
    catalog
        .remove(&args.name)
        .await
        .with_context(|| format!("Failed to delete {}", args.name))
}

fn publish_target(base: &PublishTarget, args: &PublishArgs) -> Result<PublishTarget> {
    let mut target = base.clone();
    if let Some(topic) = &args.topic {
        target.topic.clone_from(topic);
    }
    if let Some(qos) = args.qos {
        target.delivery = DeliveryLevel::try_from(qos).map_err(|e| anyhow!(e))?;
    }
    ensure!(!target.topic.trim().is_empty(), "publish topic is empty");
    Ok(target)
}

async fn publish(
    settings: &OperatorSettings,
    args: &PublishArgs,
    connector: Arc<dyn BrokerConnector>,
) -> Result<PublishMessage> {
    let target = publish_target(&settings.target, args)?;

    let catalog = catalog(&settings.registry)?;
    catalog
        .refresh()
        .await
        .context("Failed to list firmware registry")?;
    let record = catalog
        .find(&args.name)
        .ok_or_else(|| ValidationError::UnknownArtifact(args.name.clone()))?;

    let channel = Arc::new(PublishChannel::new(connector));
    let result = deliver(&channel, &settings.channel, target, &record, &settings.registry).await;
    channel.close().await;
    result
}

async fn deliver(
    channel: &Arc<PublishChannel>,
    options: &ChannelOptions,
    target: PublishTarget,
    record: &ArtifactRecord,
    config: &RegistryConfig,
) -> Result<PublishMessage> {
    let identity = channel
        .connect(options)
        .await
        .context("Failed to open broker connection")?;
    channel
        .wait_until_connected(options.connect_timeout())
        .await
        .with_context(|| format!("Broker {} did not accept {identity}", options.broker_url()))?;

    let controller = PublishController::new(Arc::clone(channel), target);
    Ok(controller.publish_artifact(record, config).await?)
}

fn run_settings(action: SettingsCommand, mut settings: OperatorSettings, path: &Path) -> Result<()> {
    match action {
        SettingsCommand::Show => {
            println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
        }
        SettingsCommand::Set(args) => {
            apply_settings(&mut settings, args)?;
            settings.save(path)?;
            info!("Saved settings to {}", path.display());
        }
    }
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() { None } else { Some(value) }
}

fn apply_settings(settings: &mut OperatorSettings, args: SetArgs) -> Result<()> {
    let registry = &mut settings.registry;
    if let Some(owner) = args.owner {
        registry.owner = owner;
    }
    if let Some(repo) = args.repo {
        registry.repo = repo;
    }
    if let Some(branch) = args.branch {
        registry.branch = branch;
    }
    if let Some(base_url) = args.base_url {
        registry.base_url = base_url;
    }
    if let Some(ota_dir) = args.ota_dir {
        registry.ota_dir = ota_dir;
    }
    if let Some(token) = args.token {
        registry.token = non_empty(token);
    }
    if let Some(api_base_url) = args.api_base_url {
        registry.api_base_url = non_empty(api_base_url);
    }

    let channel = &mut settings.channel;
    if let Some(endpoint) = args.endpoint {
        channel.endpoint = endpoint;
    }
    if let Some(path) = args.path {
        channel.path = path;
    }
    if let Some(client_id) = args.client_id {
        channel.client_id = non_empty(client_id);
    }
    if let Some(secs) = args.keepalive_secs {
        channel.keepalive_secs = secs;
    }
    if let Some(ms) = args.reconnect_period_ms {
        channel.reconnect_period_ms = ms;
    }
    if let Some(secs) = args.connect_timeout_secs {
        channel.connect_timeout_secs = secs;
    }

    if let Some(topic) = args.topic {
        settings.target.topic = topic;
    }
    if let Some(qos) = args.qos {
        settings.target.delivery = DeliveryLevel::try_from(qos).map_err(|e| anyhow!(e))?;
    }
    Ok(())
}

fn short_token(token: &str) -> String {
    token.chars().take(7).collect()
}

fn render_listing(snapshot: &ListingSnapshot, config: &RegistryConfig) -> String {
    if snapshot.is_empty() {
        return format!("No firmware in {}/{}", config.repo, config.ota_dir);
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Name").add_attribute(Attribute::Bold),
        Cell::new("Version").add_attribute(Attribute::Bold),
        Cell::new("Token").add_attribute(Attribute::Bold),
        Cell::new("Public URL").add_attribute(Attribute::Bold),
    ]);

    for (index, record) in snapshot.records.iter().enumerate() {
        // Newest version is listed first
        let name = if index == 0 && record.version.is_some() {
            Cell::new(&record.name)
                .fg(Color::Green)
                .add_attribute(Attribute::Bold)
        } else {
            Cell::new(&record.name)
        };
        table.add_row(vec![
            name,
            Cell::new(record.version.as_deref().unwrap_or("-")),
            Cell::new(short_token(&record.concurrency_token)),
            Cell::new(RegistryClient::resolve_public_url(config, &record.name)),
        ]);
    }

    table.to_string()
}

fn print_record(record: &ArtifactRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        println!(
            "Stored {} (version {}, token {})",
            record.name,
            record.version.as_deref().unwrap_or("-"),
            short_token(&record.concurrency_token)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use fluxion_ota::{BrokerLink, LinkEvent};
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn registry(server_url: &str, token: Option<&str>) -> RegistryConfig {
        RegistryConfig {
            owner: "solare".to_string(),
            repo: "devices".to_string(),
            base_url: "https://solare.github.io/devices".to_string(),
            token: token.map(str::to_string),
            api_base_url: Some(server_url.to_string()),
            ..Default::default()
        }
    }

    fn record(name: &str, version: Option<&str>) -> ArtifactRecord {
        ArtifactRecord {
            name: name.to_string(),
            version: version.map(str::to_string),
            concurrency_token: "0123456789abcdef".to_string(),
            download_url: None,
        }
    }

    #[test]
    fn test_firmware_file_name() {
        assert_eq!(
            firmware_file_name(Path::new("build/app.bin")).unwrap(),
            "app.bin"
        );
        let err = firmware_file_name(Path::new("build/app.hex")).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::NotFirmwareFile("app.hex".to_string()))
        );
    }

    #[test]
    fn test_apply_settings() {
        let mut settings = OperatorSettings::default();
        settings.registry.token = Some("old".to_string());

        apply_settings(
            &mut settings,
            SetArgs {
                owner: Some("solare".to_string()),
                token: Some(String::new()),
                client_id: Some("bench".to_string()),
                qos: Some(2),
                reconnect_period_ms: Some(5000),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(settings.registry.owner, "solare");
        assert!(settings.registry.token.is_none());
        assert_eq!(settings.channel.client_id.as_deref(), Some("bench"));
        assert_eq!(settings.channel.reconnect_period_ms, 5000);
        assert_eq!(settings.target.delivery, DeliveryLevel::ExactlyOnce);
        assert_eq!(settings.registry.branch, "gh-pages");
    }

    #[test]
    fn test_settings_set_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ota.json");

        run_settings(
            SettingsCommand::Set(SetArgs {
                repo: Some("devices".to_string()),
                topic: Some("device/bench".to_string()),
                ..Default::default()
            }),
            OperatorSettings::default(),
            &path,
        )
        .unwrap();

        let saved = OperatorSettings::load(&path).unwrap();
        assert_eq!(saved.registry.repo, "devices");
        assert_eq!(saved.target.topic, "device/bench");
    }

    #[test]
    fn test_publish_target_overrides() {
        let base = PublishTarget::default();
        let args = PublishArgs {
            name: "firmware_1_0_0.bin".to_string(),
            topic: Some("device/bench".to_string()),
            qos: Some(1),
        };
        let target = publish_target(&base, &args).unwrap();
        assert_eq!(target.topic, "device/bench");
        assert_eq!(target.delivery, DeliveryLevel::AtLeastOnce);

        let blank = PublishArgs {
            topic: Some(" ".to_string()),
            qos: None,
            ..args
        };
        assert!(publish_target(&base, &blank).is_err());
    }

    #[test]
    fn test_render_listing() {
        let config = registry("http://unused", None);
        let snapshot = ListingSnapshot::new(
            vec![
                record("firmware_1_0_0.bin", Some("1.0.0")),
                record("readme.bin", None),
            ],
            Utc::now(),
        );

        let rendered = render_listing(&snapshot, &config);

        assert!(rendered.contains("firmware_1_0_0.bin"));
        assert!(rendered.contains("0123456"));
        assert!(!rendered.contains("0123456789"));
        assert!(rendered.contains("https://solare.github.io/devices/ota-firmware/readme.bin"));
        assert_eq!(
            render_listing(&ListingSnapshot::default(), &config),
            "No firmware in devices/ota-firmware"
        );
    }

    #[tokio::test]
    async fn test_upload_without_token_makes_no_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.bin");
        std::fs::write(&file, b"firmware").unwrap();

        let err = upload(
            &registry(&server.url(), None),
            &UploadArgs {
                file,
                version: "1.0.0".to_string(),
            },
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("registry token is required"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_rejects_non_bin_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.hex");
        std::fs::write(&file, b"firmware").unwrap();

        let err = upload(
            &registry("http://127.0.0.1:9", Some("token")),
            &UploadArgs {
                file,
                version: "1.0.0".to_string(),
            },
        )
        .await
        .unwrap_err();

        assert!(err.downcast_ref::<ValidationError>().is_some());
    }

    #[tokio::test]
    async fn test_upload_creates_artifact() {
        let mut server = Server::new_async().await;
        let list = server
            .mock("GET", "/repos/solare/devices/contents/ota-firmware")
            .match_query(Matcher::Any)
            .with_status(404)
            .expect(2)
            .create_async()
            .await;
        let put = server
            .mock(
                "PUT",
                "/repos/solare/devices/contents/ota-firmware/firmware_1_2_0.bin",
            )
            .match_body(Matcher::Json(json!({
                "message": "feat(ota): add firmware_1_2_0.bin",
                "branch": "gh-pages",
                "content": "ZmlybXdhcmU="
            })))
            .with_status(201)
            .with_body(
                json!({
                    "content": {
                        "name": "firmware_1_2_0.bin",
                        "path": "ota-firmware/firmware_1_2_0.bin",
                        "sha": "new-sha",
                        "type": "file"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.bin");
        std::fs::write(&file, b"firmware").unwrap();

        let record = upload(
            &registry(&server.url(), Some("token")),
            &UploadArgs {
                file,
                version: "1.2.0".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(record.name, "firmware_1_2_0.bin");
        assert_eq!(record.concurrency_token, "new-sha");
        list.assert_async().await;
        put.assert_async().await;
    }

    #[derive(Default)]
    struct RecordingLink {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl BrokerLink for RecordingLink {
        async fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            _level: DeliveryLevel,
        ) -> fluxion_ota::Result<()> {
            let text = String::from_utf8(payload).unwrap();
            self.sent.lock().unwrap().push((topic.to_string(), text));
            Ok(())
        }

        async fn close(&self) -> fluxion_ota::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct AcceptingBroker {
        link: Arc<RecordingLink>,
    }

    impl BrokerConnector for AcceptingBroker {
        fn open(
            &self,
            _options: &ChannelOptions,
            _identity: &str,
            events: mpsc::UnboundedSender<LinkEvent>,
        ) -> fluxion_ota::Result<Arc<dyn BrokerLink>> {
            events.send(LinkEvent::Connected).unwrap();
            Ok(self.link.clone())
        }
    }

    #[tokio::test]
    async fn test_publish_known_artifact() {
        let mut server = Server::new_async().await;
        let _list = server
            .mock("GET", "/repos/solare/devices/contents/ota-firmware")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!([{
                    "name": "firmware_1_0_0.bin",
                    "path": "ota-firmware/firmware_1_0_0.bin",
                    "sha": "abc",
                    "type": "file"
                }])
                .to_string(),
            )
            .create_async()
            .await;
        let settings = OperatorSettings {
            registry: registry(&server.url(), None),
            ..Default::default()
        };
        let broker = Arc::new(AcceptingBroker::default());
        let args = PublishArgs {
            name: "firmware_1_0_0.bin".to_string(),
            topic: None,
            qos: None,
        };

        let message = publish(&settings, &args, broker.clone()).await.unwrap();

        assert_eq!(message.payload.version, "1.0.0");
        let sent = broker.link.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "device/ESP32-D15644");
        assert!(sent[0].1.contains("ota-firmware/firmware_1_0_0.bin"));

        let unknown = PublishArgs {
            name: "firmware_9_9_9.bin".to_string(),
            ..args
        };
        let err = publish(&settings, &unknown, broker.clone()).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::UnknownArtifact("firmware_9_9_9.bin".to_string()))
        );
    }
}
