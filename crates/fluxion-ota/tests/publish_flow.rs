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

//! Registry listing → upload → publish, against a mock contents API and an
//! in-process broker.

use async_trait::async_trait;
use fluxion_ota::{
    BrokerConnector, BrokerLink, ChannelOptions, ChannelState, DeliveryLevel, FirmwareCatalog,
    LinkEvent, OtaError, PublishChannel, PublishController, PublishMessage, PublishTarget,
    RegistryClient, RegistryConfig, Result,
};
use mockito::{Matcher, Server};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DIR_PATH: &str = "/repos/solare/devices/contents/ota-firmware";

#[derive(Default)]
struct RecordingLink {
    messages: Mutex<Vec<(String, String, DeliveryLevel)>>,
}

#[async_trait]
impl BrokerLink for RecordingLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, level: DeliveryLevel) -> Result<()> {
        let text = String::from_utf8(payload).expect("payload is UTF-8");
        self.messages.lock().push((topic.to_string(), text, level));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Broker that acknowledges the connection as soon as it is opened
#[derive(Default)]
struct InstantBroker {
    link: Arc<RecordingLink>,
    events: Mutex<Vec<mpsc::UnboundedSender<LinkEvent>>>,
}

impl BrokerConnector for InstantBroker {
    fn open(
        &self,
        _options: &ChannelOptions,
        _identity: &str,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn BrokerLink>> {
        events.send(LinkEvent::Connected).expect("channel listening");
        self.events.lock().push(events);
        Ok(self.link.clone())
    }
}

fn registry_config(server_url: &str) -> RegistryConfig {
    RegistryConfig {
        owner: "solare".to_string(),
        repo: "devices".to_string(),
        base_url: "https://solare.github.io/devices/".to_string(),
        token: Some("test-token".to_string()),
        api_base_url: Some(server_url.to_string()),
        ..Default::default()
    }
}

fn listing() -> String {
    json!([
        {
            "name": "firmware_1_0_0.bin",
            "path": "ota-firmware/firmware_1_0_0.bin",
            "sha": "sha-100",
            "download_url": null,
            "type": "file"
        },
        {
            "name": "firmware_1_1_0.bin",
            "path": "ota-firmware/firmware_1_1_0.bin",
            "sha": "sha-110",
            "download_url": null,
            "type": "file"
        },
        {
            "name": "bootloader.bin",
            "path": "ota-firmware/bootloader.bin",
            "sha": "sha-boot",
            "download_url": null,
            "type": "file"
        }
    ])
    .to_string()
}

#[tokio::test]
async fn test_update_existing_version_then_publish_newest() {
    let mut server = Server::new_async().await;
    let list_mock = server
        .mock("GET", DIR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(listing())
        .expect(2)
        .create_async()
        .await;
    let put_mock = server
        .mock("PUT", "/repos/solare/devices/contents/ota-firmware/firmware_1_1_0.bin")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::PartialJson(json!({
            "message": "chore(ota): update firmware_1_1_0.bin",
            "branch": "gh-pages",
            "sha": "sha-110"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "content": {
                    "name": "firmware_1_1_0.bin",
                    "path": "ota-firmware/firmware_1_1_0.bin",
                    "sha": "sha-110-b",
                    "download_url": null,
                    "type": "file"
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let config = registry_config(&server.url());
    let catalog = FirmwareCatalog::new(Arc::new(RegistryClient::new().unwrap()), config.clone());

    let snapshot = catalog.refresh().await.unwrap();
    let names: Vec<_> = snapshot.records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["firmware_1_1_0.bin", "firmware_1_0_0.bin", "bootloader.bin"]);

    let saved = catalog.save("1.1.0", b"\x00\x01firmware").await.unwrap();
    assert_eq!(saved.concurrency_token, "sha-110-b");
    put_mock.assert_async().await;
    list_mock.assert_async().await;

    let broker = Arc::new(InstantBroker::default());
    let channel = Arc::new(PublishChannel::new(broker.clone()));
    channel.connect(&ChannelOptions::default()).await.unwrap();
    channel
        .wait_until_connected(Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(channel.state(), ChannelState::Connected);

    let controller = PublishController::new(
        channel.clone(),
        PublishTarget {
            topic: "device/ESP32-D15644".to_string(),
            delivery: DeliveryLevel::AtLeastOnce,
        },
    );
    let newest = catalog.snapshot().records[0].clone();
    let message = controller.publish_artifact(&newest, &config).await.unwrap();

    assert_eq!(
        message.payload.firmware_url,
        "https://solare.github.io/devices/ota-firmware/firmware_1_1_0.bin"
    );
    let sent = broker.link.messages.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "device/ESP32-D15644");
    assert_eq!(sent[0].2, DeliveryLevel::AtLeastOnce);
    let decoded: PublishMessage = serde_json::from_str(&sent[0].1).unwrap();
    assert_eq!(decoded.command, "UPDATE");
    assert_eq!(decoded.payload.version, "1.1.0");

    channel.close().await;
    assert_eq!(channel.state(), ChannelState::Idle);
}

#[tokio::test]
async fn test_unversioned_artifact_is_not_published() {
    let mut server = Server::new_async().await;
    let _list_mock = server
        .mock("GET", DIR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(listing())
        .create_async()
        .await;

    let config = registry_config(&server.url());
    let catalog = FirmwareCatalog::new(Arc::new(RegistryClient::new().unwrap()), config.clone());
    catalog.refresh().await.unwrap();

    let broker = Arc::new(InstantBroker::default());
    let channel = Arc::new(PublishChannel::new(broker.clone()));
    channel.connect(&ChannelOptions::default()).await.unwrap();
    channel
        .wait_until_connected(Duration::from_secs(1))
        .await
        .unwrap();
    let controller = PublishController::new(channel, PublishTarget::default());

    let bootloader = catalog.find("bootloader.bin").unwrap();
    let err = controller
        .publish_artifact(&bootloader, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, OtaError::Validation(_)));
    assert!(broker.link.messages.lock().is_empty());
}

#[tokio::test]
async fn test_stale_delete_leaves_listing_untouched() {
    let mut server = Server::new_async().await;
    let list_mock = server
        .mock("GET", DIR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(listing())
        .expect(1)
        .create_async()
        .await;
    let delete_mock = server
        .mock("DELETE", "/repos/solare/devices/contents/ota-firmware/firmware_1_0_0.bin")
        .match_body(Matcher::PartialJson(json!({
            "message": "chore(ota): delete firmware_1_0_0.bin",
            "sha": "sha-100"
        })))
        .with_status(409)
        .with_body(r#"{"message":"sha does not match"}"#)
        .create_async()
        .await;

    let catalog = FirmwareCatalog::new(
        Arc::new(RegistryClient::new().unwrap()),
        registry_config(&server.url()),
    );
    let before = catalog.refresh().await.unwrap();

    let err = catalog.remove("firmware_1_0_0.bin").await.unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(catalog.snapshot(), before);
    delete_mock.assert_async().await;
    list_mock.assert_async().await;
}
