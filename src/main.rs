use std::{process, sync::Arc};

use kilnbee::{
    config::{Backend, Config},
    core::{Connection, Encoder, EventSource, Executor, ReliablePublisher},
    logger::LoggerManager,
    print_error,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Obtains the broker connection and the record layout it expects; any
/// failure here ends the process.
async fn connect(cfg: &Config) -> (Arc<dyn Connection>, Arc<dyn Encoder>) {
    match cfg.backend {
        #[cfg(feature = "kilnbee-mqtt")]
        Backend::Mqtt => (connect_mqtt(cfg).await, Arc::new(kilnbee::core::JsonEncoder)),
        #[cfg(feature = "kilnbee-kafka")]
        Backend::Kafka => (connect_kafka(cfg), Arc::new(kilnbee::core::KeyedJsonEncoder)),
        #[allow(unreachable_patterns)]
        other => {
            error!("Backend {:?} is not compiled into this build", other);
            process::exit(1);
        }
    }
}

#[cfg(feature = "kilnbee-kafka")]
fn connect_kafka(cfg: &Config) -> Arc<dyn Connection> {
    info!(
        "Creating Kafka producer for {} (tls: {})...",
        cfg.kafka.brokers,
        cfg.kafka.ssl.is_some()
    );
    let connection = kilnbee::core::KafkaConnection::from_config(&cfg.kafka).unwrap_or_else(|e| {
        error!("Failed to create Kafka producer: {}", e);
        process::exit(1);
    });
    Arc::new(connection)
}

#[cfg(feature = "kilnbee-mqtt")]
async fn connect_mqtt(cfg: &Config) -> Arc<dyn Connection> {
    let manager = kilnbee_mqtt::MqttManager::from_config(cfg.transport.clone())
        .unwrap_or_else(|e| {
            error!("Failed to create MqttManager: {}", e);
            process::exit(1);
        });

    info!(
        "Connecting to MQTT broker {}:{} (tls: {})...",
        cfg.transport.host,
        cfg.transport.port,
        cfg.transport.tls_enabled().is_some()
    );

    let instance = manager.build_and_start().await.unwrap_or_else(|e| {
        error!("Failed to build and start MQTT kernel: {}", e);
        process::exit(1);
    });

    if let Err(e) = instance
        .wait_connected(cfg.transport.connection_timeout())
        .await
    {
        error!("Failed to connect to MQTT broker: {}", e);
        if let Err(e) = instance.shutdown().await {
            debug!("MQTT kernel stopped with: {}", e);
        }
        process::exit(1);
    }

    info!("MQTT client connected");
    Arc::new(instance)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::new().unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });
    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting kilnbee version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg.publisher);

    let (connection, encoder) = connect(&cfg).await;
    let publisher = ReliablePublisher::new(connection, encoder, &cfg.publisher);

    let cancel = CancellationToken::new();
    let executor = tokio::spawn(
        Executor::new(
            EventSource::from_config(&cfg.source),
            publisher.clone(),
            cancel.clone(),
        )
        .run(),
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown..."),
        Err(e) => error!("Failed to listen for Ctrl+C, shutting down: {}", e),
    }

    cancel.cancel();
    if let Err(e) = executor.await {
        error!("Executor task failed: {}", e);
    }

    let shutdown = &cfg.publisher.shutdown;
    match publisher.shutdown(shutdown.drain, shutdown.timeout()).await {
        Ok(()) => info!("Shutdown complete"),
        Err(e) => warn!("Shutdown finished with pending work: {}", e),
    }

    Ok(())
}
