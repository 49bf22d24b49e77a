// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thin MQTT adapter over `rumqttc`.
//!
//! Per §1, the broker client's connection/QoS/reconnect machinery is an
//! external collaborator: this module only exposes the contract the
//! Dispatcher needs — subscribe to topic patterns, and drive an event loop
//! that yields inbound publishes. Reconnection is `rumqttc`'s own job; this
//! adapter only logs what the event loop reports.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};

use crate::config::MqttConfig;
use crate::error::GatewayError;

/// One inbound publish, already detached from `rumqttc`'s event type.
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub struct MqttClient {
    client: AsyncClient,
    event_loop: rumqttc::EventLoop,
}

impl MqttClient {
    /// Connect to the broker described by `config` and subscribe to every
    /// configured topic pattern. Connection itself is lazy in `rumqttc` (the
    /// first `event_loop.poll()` drives the TCP/MQTT handshake), so `connect`
    /// drives that first poll itself and blocks on it: it polls until the
    /// broker's `ConnAck` arrives or the poll yields an error, and only then
    /// returns. This is what makes `BrokerConnectError` actually fatal at
    /// startup (§6, §7) instead of surfacing only as a retried warning once
    /// `next_message` starts polling later.
    pub async fn connect(config: &MqttConfig) -> Result<Self, GatewayError> {
        let (host, port) = parse_broker_url(&config.broker)?;

        let mut options = MqttOptions::new(config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        for topic in &config.topics {
            client
                .subscribe(topic, QoS::AtMostOnce)
                .await
                .map_err(|err| GatewayError::BrokerConnect(err.to_string()))?;
        }

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => continue,
                Err(err) => return Err(GatewayError::BrokerConnect(err.to_string())),
            }
        }

        Ok(Self { client, event_loop })
    }

    /// Drive the event loop until the next inbound publish, a connection
    /// event (logged and otherwise ignored), or an unrecoverable error.
    pub async fn next_message(&mut self) -> Option<InboundMessage> {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Some(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "mqtt event loop error, retrying");
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            }
        }
    }

    /// Disconnect from the broker. Called at shutdown before closing sinks.
    pub async fn disconnect(&self) {
        if let Err(err) = self.client.disconnect().await {
            tracing::warn!(error = %err, "mqtt disconnect failed");
        }
    }
}

/// Parse a `tcp://host:port`-style broker URL into `(host, port)`.
fn parse_broker_url(broker: &str) -> Result<(String, u16), GatewayError> {
    let without_scheme = broker.split("://").last().unwrap_or(broker);
    let mut parts = without_scheme.rsplitn(2, ':');
    let port_str = parts.next().ok_or_else(|| {
        GatewayError::BrokerConnect(format!("broker URL {broker:?} is missing a port"))
    })?;
    let host = parts.next().ok_or_else(|| {
        GatewayError::BrokerConnect(format!("broker URL {broker:?} is missing a host"))
    })?;
    let port: u16 = port_str.parse().map_err(|_| {
        GatewayError::BrokerConnect(format!("broker URL {broker:?} has a non-numeric port"))
    })?;
    Ok((host.to_string(), port))
}
