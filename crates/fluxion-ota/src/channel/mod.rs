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

//! Pub/sub channel used to notify devices
//!
//! [`PublishChannel`] owns at most one broker connection at a time and tracks
//! its lifecycle as a [`ChannelState`]:
//!
//! ```text
//! idle --connect()--> connecting --ack--> connected
//! connecting | connected --transport error / drop--> error
//! any --reconnect scheduled--> connecting
//! ```
//!
//! The broker itself sits behind [`BrokerConnector`] / [`BrokerLink`]; the
//! production implementation is [`mqtt::MqttConnector`].

pub mod mqtt;

use crate::error::{ChannelError, OtaError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn default_endpoint() -> String {
    "wss://test.mosquitto.org:8081".to_string()
}

fn default_path() -> String {
    "/mqtt".to_string()
}

fn default_60() -> u64 {
    60
}

fn default_2000() -> u64 {
    2000
}

fn default_30() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Delivery guarantee requested from the broker, passed through unmodified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryLevel {
    /// Level 0, resolves on handoff to the transport
    #[default]
    AtMostOnce,
    /// Level 1, resolves on broker acknowledgment
    AtLeastOnce,
    /// Level 2, resolves when the broker completes the exchange
    ExactlyOnce,
}

impl DeliveryLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }

    pub fn is_acknowledged(self) -> bool {
        self != Self::AtMostOnce
    }
}

impl TryFrom<u8> for DeliveryLevel {
    type Error = String;

    fn try_from(level: u8) -> std::result::Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(format!("delivery level must be 0, 1 or 2, got {other}")),
        }
    }
}

impl Serialize for DeliveryLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for DeliveryLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let level = u8::deserialize(deserializer)?;
        Self::try_from(level).map_err(serde::de::Error::custom)
    }
}

/// Broker connection parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Broker endpoint, e.g. `wss://host:8081`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Path suffix of the WebSocket upgrade
    #[serde(default = "default_path")]
    pub path: String,

    /// Fixed client identity; a random one is generated per connect when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default = "default_60")]
    pub keepalive_secs: u64,

    /// Delay before each reconnect attempt after an unexpected drop
    #[serde(default = "default_2000")]
    pub reconnect_period_ms: u64,

    /// Cap on a single connection attempt
    #[serde(default = "default_30")]
    pub connect_timeout_secs: u64,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            path: default_path(),
            client_id: None,
            keepalive_secs: 60,
            reconnect_period_ms: 2000,
            connect_timeout_secs: 30,
        }
    }
}

impl ChannelOptions {
    /// Endpoint joined with the path suffix
    pub fn broker_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        if path.is_empty() {
            endpoint.to_string()
        } else {
            format!("{endpoint}/{path}")
        }
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Random client identity, unique across concurrent operator sessions
pub fn generate_identity() -> String {
    format!("fluxion-ota-{}", uuid::Uuid::new_v4().simple())
}

/// Lifecycle notifications emitted by a broker link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Reconnecting,
    Error(String),
    Closed,
}

/// Snapshot of the channel as seen by callers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub state: ChannelState,
    pub last_error: Option<String>,
    pub identity: Option<String>,
}

impl ChannelStatus {
    pub fn apply(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => self.state = ChannelState::Connected,
            LinkEvent::Reconnecting => self.state = ChannelState::Connecting,
            LinkEvent::Error(message) => {
                self.state = ChannelState::Error;
                self.last_error = Some(message);
            }
            LinkEvent::Closed => self.state = ChannelState::Error,
        }
    }
}

/// Message body accepted by [`PublishChannel::publish`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    Text(String),
    Json(serde_json::Value),
}

impl ChannelPayload {
    pub fn into_text(self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Json(value) => Ok(serde_json::to_string(&value)?),
        }
    }
}

impl From<String> for ChannelPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ChannelPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for ChannelPayload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// An open broker connection
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Send one message; resolves on acknowledgment for levels 1 and 2 and on
    /// handoff for level 0.
    async fn publish(&self, topic: &str, payload: Vec<u8>, level: DeliveryLevel) -> Result<()>;

    /// Force-close the connection and stop reconnecting.
    async fn close(&self) -> Result<()>;
}

/// Opens broker links; lifecycle events are reported through `events`.
pub trait BrokerConnector: Send + Sync {
    fn open(
        &self,
        options: &ChannelOptions,
        identity: &str,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn BrokerLink>>;
}

struct Session {
    link: Arc<dyn BrokerLink>,
    monitor: JoinHandle<()>,
}

/// Single long-lived pub/sub connection shared by a session.
pub struct PublishChannel {
    connector: Arc<dyn BrokerConnector>,
    status: watch::Sender<ChannelStatus>,
    session: Mutex<Option<Session>>,
}

impl fmt::Debug for PublishChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishChannel")
            .field("status", &*self.status.borrow())
            .field("open", &self.session.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl PublishChannel {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        let (status, _) = watch::channel(ChannelStatus::default());
        Self {
            connector,
            status,
            session: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ChannelState {
        self.status.borrow().state
    }

    /// Receiver that observes every status change
    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    /// Open a connection, replacing (and closing) any previous one.
    ///
    /// Returns the client identity in use.
    pub async fn connect(&self, options: &ChannelOptions) -> Result<String> {
        self.teardown().await;

        let identity = options.client_id.clone().unwrap_or_else(generate_identity);
        info!(
            "Connecting to {} as {}",
            options.broker_url(),
            identity
        );
        self.status.send_modify(|status| {
            status.state = ChannelState::Connecting;
            status.last_error = None;
            status.identity = Some(identity.clone());
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let link = match self.connector.open(options, &identity, events_tx) {
            Ok(link) => link,
            Err(e) => {
                warn!("Failed to open broker link: {e}");
                self.status.send_modify(|status| {
                    status.state = ChannelState::Error;
                    status.last_error = Some(e.to_string());
                });
                return Err(ChannelError::Connect(e.to_string()).into());
            }
        };

        let status = self.status.clone();
        let monitor = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                debug!("Channel event: {event:?}");
                status.send_modify(|s| s.apply(event));
            }
        });

        *self.session.lock() = Some(Session { link, monitor });
        Ok(identity)
    }

    /// Wait until the channel reports `connected`.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.status.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|s| s.state == ChannelState::Connected))
            .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ChannelError::Closed.into()),
            Err(_) => Err(ChannelError::ConnectTimeout {
                secs: timeout.as_secs(),
            }
            .into()),
        }
    }

    /// Publish one message on `topic`.
    ///
    /// Fails without touching the network unless the channel is `connected`.
    pub async fn publish(
        &self,
        topic: &str,
        message: impl Into<ChannelPayload>,
        level: DeliveryLevel,
    ) -> Result<()> {
        let state = self.state();
        let link = match (state, self.current_link()) {
            (ChannelState::Connected, Some(link)) => link,
            _ => return Err(ChannelError::NotConnected { state }.into()),
        };

        let text = message.into().into_text()?;
        debug!(topic, level = level.as_u8(), bytes = text.len(), "Publishing");

        link.publish(topic, text.into_bytes(), level)
            .await
            .map_err(|e| match e {
                OtaError::Channel(channel) => OtaError::Channel(channel),
                other => ChannelError::Publish(other.to_string()).into(),
            })
    }

    /// Close the connection; no reconnect follows.
    pub async fn close(&self) {
        self.teardown().await;
        self.status.send_modify(|status| status.state = ChannelState::Idle);
        info!("Channel closed");
    }

    fn current_link(&self) -> Option<Arc<dyn BrokerLink>> {
        self.session
            .lock()
            .as_ref()
            .map(|session| Arc::clone(&session.link))
    }

    async fn teardown(&self) {
        let previous = self.session.lock().take();
        if let Some(session) = previous {
            session.monitor.abort();
            // Errors raised by the close itself are irrelevant to the caller
            if let Err(e) = session.link.close().await {
                debug!("Ignoring error while closing link: {e}");
            }
        }
    }
}

impl Drop for PublishChannel {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.monitor.abort();
        }
    }
}
