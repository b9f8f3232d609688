//! T1000 ingestion service

use t1000_ingest::{
    config::AppConfig,
    envelope::InvocationContext,
    errors::IngestError,
    mqtt::{MqttClient, MqttClientBuilder},
    pipeline::{IngestOutcome, Pipeline},
    store::StoreConnection,
};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), IngestError> {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration, preferring environment variables and config files
    let config = AppConfig::load()?;

    // Connect once up front; the pipeline reuses this handle
    let connection = StoreConnection::new(config.store.clone());
    connection.get_or_connect().await?;
    let pipeline = Pipeline::new(connection, config.pipeline);

    let mqtt_client = MqttClientBuilder::new(&config.mqtt)?
        .connect(&config.mqtt.topics)
        .await?;

    // Setup signal handling for graceful shutdown
    let shutdown_signal = signal::ctrl_c();

    tokio::select! {
        result = run_ingest(mqtt_client, pipeline) => {
            info!("T1000 ingest completed: {:?}", result);
        }
        _ = shutdown_signal => {
            info!("Received shutdown signal");
        }
    }

    Ok(())
}

async fn run_ingest(mut mqtt_client: MqttClient, pipeline: Pipeline) -> Result<(), IngestError> {
    let ctx = InvocationContext::default();
    loop {
        match mqtt_client.recv().await {
            Ok(Some(delivery)) => match pipeline.ingest(&delivery.envelope, &ctx).await {
                IngestOutcome::Ok => {}
                IngestOutcome::InitError => {
                    warn!(topic = %delivery.topic, "Message dropped: {}", IngestOutcome::InitError);
                }
            },
            Ok(None) => break, // Channel closed
            Err(e) => {
                error!("MQTT receive error: {}", e);
                break;
            }
        }
    }

    Ok(())
}
