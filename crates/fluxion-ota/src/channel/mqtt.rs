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

//! MQTT broker link built on `rumqttc`
//!
//! The event loop runs in a background task. It reports lifecycle changes
//! through the channel's event sender and keeps reconnecting with a fixed
//! delay until the link is closed.

use super::{BrokerConnector, BrokerLink, ChannelOptions, DeliveryLevel, LinkEvent};
use crate::error::{ChannelError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 16;
const DEFAULT_TCP_PORT: u16 = 1883;

type AckSender = oneshot::Sender<std::result::Result<(), String>>;

struct Waiter {
    level: DeliveryLevel,
    done: AckSender,
}

/// Matches outgoing publishes to broker acknowledgments.
///
/// rumqttc reports `Outgoing::Publish(pkid)` in request order, so waiters
/// queue up in the same order and move to `inflight` once their packet id is
/// known.
#[derive(Default)]
struct AckTracker {
    queued: VecDeque<Waiter>,
    inflight: HashMap<u16, AckSender>,
}

impl AckTracker {
    fn enqueue(&mut self, level: DeliveryLevel, done: AckSender) {
        self.queued.push_back(Waiter { level, done });
    }

    /// Drop the newest waiter after its request never reached the event loop.
    fn cancel_last(&mut self) {
        self.queued.pop_back();
    }

    fn on_outgoing(&mut self, pkid: u16) {
        let Some(waiter) = self.queued.pop_front() else {
            return;
        };
        if waiter.level.is_acknowledged() {
            self.inflight.insert(pkid, waiter.done);
        } else {
            let _ = waiter.done.send(Ok(()));
        }
    }

    fn on_ack(&mut self, pkid: u16) {
        if let Some(done) = self.inflight.remove(&pkid) {
            let _ = done.send(Ok(()));
        }
    }

    fn fail_all(&mut self, reason: &str) {
        for waiter in self.queued.drain(..) {
            let _ = waiter.done.send(Err(reason.to_string()));
        }
        for (_, done) in self.inflight.drain() {
            let _ = done.send(Err(reason.to_string()));
        }
    }

    fn pending(&self) -> usize {
        self.queued.len() + self.inflight.len()
    }
}

fn qos(level: DeliveryLevel) -> QoS {
    match level {
        DeliveryLevel::AtMostOnce => QoS::AtMostOnce,
        DeliveryLevel::AtLeastOnce => QoS::AtLeastOnce,
        DeliveryLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Translate channel options into rumqttc options.
///
/// `wss://` and `ws://` endpoints use the WebSocket transport with the path
/// suffix; `mqtt://` and `tcp://` use plain TCP.
fn mqtt_options(options: &ChannelOptions, identity: &str) -> Result<MqttOptions> {
    // MqttOptions::new panics on blank ids and ids with a leading space
    if identity.trim().is_empty() || identity.starts_with(' ') {
        return Err(ChannelError::Connect(format!("invalid client id '{identity}'")).into());
    }
    let broker_url = options.broker_url();
    let url = reqwest::Url::parse(&broker_url)
        .map_err(|e| ChannelError::Connect(format!("invalid broker URL '{broker_url}': {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| ChannelError::Connect(format!("broker URL '{broker_url}' has no host")))?;

    let mut mqtt = match url.scheme() {
        "wss" => {
            let port = url.port_or_known_default().unwrap_or(443);
            let mut mqtt = MqttOptions::new(identity, broker_url.as_str(), port);
            mqtt.set_transport(Transport::wss_with_default_config());
            mqtt
        }
        "ws" => {
            let port = url.port_or_known_default().unwrap_or(80);
            let mut mqtt = MqttOptions::new(identity, broker_url.as_str(), port);
            mqtt.set_transport(Transport::Ws);
            mqtt
        }
        "mqtt" | "tcp" => {
            MqttOptions::new(identity, host, url.port().unwrap_or(DEFAULT_TCP_PORT))
        }
        other => {
            return Err(
                ChannelError::Connect(format!("unsupported broker scheme '{other}'")).into(),
            );
        }
    };

    mqtt.set_keep_alive(options.keepalive());
    mqtt.set_clean_session(true);
    Ok(mqtt)
}

async fn drive(
    mut eventloop: EventLoop,
    tracker: Arc<Mutex<AckTracker>>,
    events: mpsc::UnboundedSender<LinkEvent>,
    reconnect_period: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("✅ Broker accepted connection ({:?})", ack.code);
                if events.send(LinkEvent::Connected).is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => tracker.lock().on_ack(ack.pkid),
            Ok(Event::Incoming(Packet::PubComp(comp))) => tracker.lock().on_ack(comp.pkid),
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => tracker.lock().on_outgoing(pkid),
            Ok(_) => {}
            Err(e) => {
                let reason = e.to_string();
                warn!("❌ Broker connection error: {reason}");
                tracker.lock().fail_all(&reason);
                // rumqttc replays unacked and queued requests on the next
                // session; their callers were already told they failed
                eventloop.pending.clear();
                if events.send(LinkEvent::Error(reason)).is_err() {
                    break;
                }
                tokio::time::sleep(reconnect_period).await;
                debug!("Reconnecting to broker");
                if events.send(LinkEvent::Reconnecting).is_err() {
                    break;
                }
            }
        }
    }
    debug!("Broker event loop stopped");
}

/// Opens [`MqttLink`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MqttConnector;

impl BrokerConnector for MqttConnector {
    fn open(
        &self,
        options: &ChannelOptions,
        identity: &str,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn BrokerLink>> {
        let mqtt = mqtt_options(options, identity)?;
        let (client, mut eventloop) = AsyncClient::new(mqtt, REQUEST_CAPACITY);
        eventloop
            .network_options
            .set_connection_timeout(options.connect_timeout_secs);

        let tracker = Arc::new(Mutex::new(AckTracker::default()));
        let driver = tokio::spawn(drive(
            eventloop,
            Arc::clone(&tracker),
            events,
            options.reconnect_period(),
        ));

        Ok(Arc::new(MqttLink {
            client,
            tracker,
            driver,
            publish_lock: tokio::sync::Mutex::new(()),
        }))
    }
}

pub struct MqttLink {
    client: AsyncClient,
    tracker: Arc<Mutex<AckTracker>>,
    driver: JoinHandle<()>,
    /// Keeps waiter order identical to request order
    publish_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for MqttLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttLink")
            .field("pending", &self.tracker.lock().pending())
            .field("running", &!self.driver.is_finished())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, level: DeliveryLevel) -> Result<()> {
        let (done, ack) = oneshot::channel();
        {
            let _order = self.publish_lock.lock().await;
            self.tracker.lock().enqueue(level, done);
            if let Err(e) = self.client.publish(topic, qos(level), false, payload).await {
                self.tracker.lock().cancel_last();
                return Err(ChannelError::Publish(e.to_string()).into());
            }
        }

        match ack.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(ChannelError::Publish(reason).into()),
            Err(_) => Err(ChannelError::Closed.into()),
        }
    }

    async fn close(&self) -> Result<()> {
        let result = self.client.try_disconnect();
        self.driver.abort();
        self.tracker.lock().fail_all("channel closed");
        result.map_err(|e| {
            debug!("Disconnect request failed: {e}");
            ChannelError::Closed.into()
        })
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
