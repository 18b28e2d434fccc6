//! MQTT-backed message bus
//!
//! Bridges the broker that carries device telemetry to the in-process
//! broadcast channel the engines consume. Subscriptions are tracked in a
//! refcounted registry so they survive broker reconnects and unwind
//! symmetrically at teardown.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use super::{BusMessage, MessageBus, CHANNEL_CAPACITY};

const DEFAULT_PORT: u16 = 1883;
const CLIENT_ID: &str = "theater-control";

/// MQTT connection status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttStatus {
    pub connected: bool,
    pub host: Option<String>,
    pub port: u16,
}

/// Internal state
struct MqttState {
    host: Option<String>,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    connected: bool,
}

impl Default for MqttState {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            username: None,
            password: None,
            connected: false,
        }
    }
}

/// MQTT bus client
pub struct MqttBus {
    state: Arc<RwLock<MqttState>>,
    client: Arc<RwLock<Option<AsyncClient>>>,
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,
    sender: broadcast::Sender<BusMessage>,
    shutdown: CancellationToken,
}

impl MqttBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(MqttState::default())),
            client: Arc::new(RwLock::new(None)),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    /// Configure the broker connection
    pub async fn configure(
        &self,
        host: String,
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
    ) {
        let mut state = self.state.write().await;
        state.host = Some(host);
        state.port = port.unwrap_or(DEFAULT_PORT);
        state.username = username;
        state.password = password;
    }

    /// Check if configured
    pub async fn is_configured(&self) -> bool {
        self.state.read().await.host.is_some()
    }

    /// Get connection status
    pub async fn get_status(&self) -> MqttStatus {
        let state = self.state.read().await;
        MqttStatus {
            connected: state.connected,
            host: state.host.clone(),
            port: state.port,
        }
    }

    /// Connect to the broker and start the event loop
    pub async fn start(&self) -> Result<()> {
        let (host, port, username, password) = {
            let state = self.state.read().await;
            let host = state
                .host
                .clone()
                .ok_or_else(|| anyhow!("MQTT host not configured"))?;
            (
                host,
                state.port,
                state.username.clone(),
                state.password.clone(),
            )
        };

        let mut options = MqttOptions::new(CLIENT_ID, &host, port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&username, &password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        {
            let mut client_guard = self.client.write().await;
            *client_guard = Some(client.clone());
        }

        tracing::info!("MQTT connecting to {}:{}...", host, port);

        // Note: connected state will be set true when ConnAck is received

        let state = self.state.clone();
        let subscriptions = self.subscriptions.clone();
        let sender = self.sender.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("MQTT event loop shutting down");
                        break;
                    }
                    result = eventloop.poll() => {
                        match result {
                            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                                let payload = String::from_utf8_lossy(&publish.payload).to_string();
                                let _ = sender.send(BusMessage {
                                    topic: publish.topic,
                                    payload,
                                });
                            }
                            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                                tracing::info!("MQTT connected (code: {:?})", ack.code);
                                {
                                    let mut state = state.write().await;
                                    state.connected = true;
                                }
                                // Re-issue the subscription registry; the broker
                                // forgets non-persistent sessions on reconnect.
                                let topics: Vec<String> = subscriptions
                                    .read()
                                    .await
                                    .keys()
                                    .cloned()
                                    .collect();
                                for topic in topics {
                                    if let Err(e) =
                                        client.subscribe(&topic, QoS::AtMostOnce).await
                                    {
                                        tracing::warn!("MQTT resubscribe {} failed: {}", topic, e);
                                    }
                                }
                            }
                            Ok(Event::Incoming(Incoming::Disconnect)) => {
                                tracing::warn!("MQTT disconnected");
                                let mut state = state.write().await;
                                state.connected = false;
                            }
                            Err(e) => {
                                tracing::error!("MQTT error: {}", e);
                                {
                                    let mut state = state.write().await;
                                    state.connected = false;
                                }
                                // Check shutdown before sleeping
                                tokio::select! {
                                    _ = shutdown.cancelled() => break,
                                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Disconnect and stop the event loop
    pub async fn stop(&self) {
        // Cancel the event loop first
        self.shutdown.cancel();

        let mut client = self.client.write().await;
        if let Some(c) = client.take() {
            let _ = c.disconnect().await;
        }

        let mut state = self.state.write().await;
        state.connected = false;

        tracing::info!("MQTT bus stopped");
    }
}

impl Default for MqttBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        let first = {
            let mut subscriptions = self.subscriptions.write().await;
            let count = subscriptions.entry(topic.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };

        // Only the first subscription reaches the broker; later ones share it.
        if first {
            let client = self.client.read().await;
            if let Some(c) = client.as_ref() {
                c.subscribe(topic, QoS::AtMostOnce).await?;
            }
            // No client yet: the registry is replayed on ConnAck.
        }

        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let last = {
            let mut subscriptions = self.subscriptions.write().await;
            match subscriptions.get_mut(topic) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        subscriptions.remove(topic);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last {
            let client = self.client.read().await;
            if let Some(c) = client.as_ref() {
                c.unsubscribe(topic).await?;
            }
        }

        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let client = self.client.read().await;
        if let Some(c) = client.as_ref() {
            c.publish(topic, QoS::AtMostOnce, false, payload.as_bytes())
                .await?;
        } else {
            tracing::debug!("MQTT not started, dropping publish to {}", topic);
        }

        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}
