//! Application configuration

use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::IngestError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub topics: Vec<String>,
    pub client_id: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_keep_alive")]
    pub keep_alive: Duration,
    #[serde(default)]
    pub transport: MqttTransport,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MqttTransport {
    #[default]
    Tcp,
    Wss,
}

/// Document store connection target
///
/// `postgres://...` for Postgres, `memory:` for an in-process store.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    pub url: Option<String>,
}

/// Optional pipeline writes, all off by default
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Keep raw envelopes, outer uplinks, device payloads and decoded frames
    #[serde(default)]
    pub archive_raw: bool,
    /// Count shock events in the device status
    #[serde(default)]
    pub count_shocks: bool,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(5)
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Ok(url) = env::var("DATABASE_URL") {
            builder = builder.set_default("store.url", url)?;
        }

        let config = builder
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("T1000INGEST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("mqtt.topics"),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl StoreConfig {
    /// The configured connection target
    pub fn target(&self) -> Result<&str, IngestError> {
        match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(IngestError::MissingStoreTarget),
        }
    }
}
