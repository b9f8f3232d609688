//! MQTT client implementation

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};

use crate::{
    config::{MqttConfig, MqttTransport},
    errors::IngestError,
};

/// One envelope received from the broker
#[derive(Debug, Clone, PartialEq)]
pub struct TransportDelivery {
    pub topic: String,
    /// Envelope JSON, `Null` when the payload was not JSON
    pub envelope: Value,
}

/// MQTT client for receiving uplink envelopes
pub struct MqttClientBuilder {
    client: AsyncClient,
    event_loop: EventLoop,
    tx: mpsc::Sender<Result<TransportDelivery, IngestError>>,
    rx: mpsc::Receiver<Result<TransportDelivery, IngestError>>,
}

pub struct MqttClient {
    _client: AsyncClient,
    rx: mpsc::Receiver<Result<TransportDelivery, IngestError>>,
    _topics: Vec<String>,
    _handle: tokio::task::JoinHandle<Result<(), IngestError>>,
}

impl MqttClientBuilder {
    /// Create a new MQTT client
    pub fn new(config: &MqttConfig) -> Result<Self, IngestError> {
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

        if config.transport == MqttTransport::Wss {
            mqtt_options.set_transport(Transport::wss_with_default_config());
        }
        mqtt_options.set_keep_alive(config.keep_alive);

        let (client, event_loop) = AsyncClient::new(mqtt_options, 100);

        // Create a channel for message passing
        let (tx, rx) = mpsc::channel(100);

        Ok(Self {
            client,
            event_loop,
            tx,
            rx,
        })
    }

    /// Connect to MQTT broker and subscribe to topics
    ///
    /// Note: Initial subscription needs not be done here, as it is done
    /// in the event loop.
    pub async fn connect(self, topics: &[String]) -> Result<MqttClient, IngestError> {
        let topics = topics.to_vec();

        let _handle = tokio::spawn(Self::process_events(
            self.tx,
            self.event_loop,
            self.client.clone(), // Clone client for event loop
            topics.clone(),
        ));

        Ok(MqttClient {
            _client: self.client,
            rx: self.rx,
            _topics: topics,
            _handle,
        })
    }

    async fn subscribe(client: AsyncClient, topics: &[String]) -> Result<(), IngestError> {
        for topic in topics.iter() {
            info!("Subscribing to topic: {}", topic);
            client.subscribe(topic, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    /// Process MQTT events
    ///
    /// `rumqttc` reconnects on its own when the connection drops, but topic
    /// subscriptions have to be re-established, so they are issued on every
    /// ConnAck.
    ///
    /// NOTE: If topic subscription fails, the loop will break and return an error.
    async fn process_events(
        tx: mpsc::Sender<Result<TransportDelivery, IngestError>>,
        mut event_loop: EventLoop,
        client: AsyncClient,
        topics: Vec<String>,
    ) -> Result<(), IngestError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker, subscribing to topics");
                    if let Err(e) = Self::subscribe(client.clone(), &topics).await {
                        error!("Failed to subscribe: {}", e);
                        break Err(e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let delivery = Self::parse_delivery(&publish.topic, &publish.payload);
                    if tx.send(Ok(delivery)).await.is_err() {
                        debug!("Receiver dropped, stopping MQTT event loop");
                        break Ok(());
                    }
                }
                Err(e) => {
                    error!("MQTT Error: {}", e);
                    continue;
                }
                _ => continue,
            }
        }
    }

    /// Parse the publish payload as a JSON envelope
    fn parse_delivery(topic: &str, payload: &[u8]) -> TransportDelivery {
        let envelope = serde_json::from_slice(payload).unwrap_or_else(|e| {
            warn!(topic, "Envelope is not JSON, treating as empty: {}", e);
            Value::Null
        });
        TransportDelivery {
            topic: topic.to_string(),
            envelope,
        }
    }
}

impl MqttClient {
    /// Receive next envelope
    pub async fn recv(&mut self) -> Result<Option<TransportDelivery>, IngestError> {
        self.rx.recv().await.transpose()
    }
}
