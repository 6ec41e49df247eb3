use event_bus::{EventBus, InMemoryBus, NatsBus};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notifications_rs::{
    config::{BusType, Config},
    notifications_router, start_product_created_consumer, LogChannel,
    ProductCreatedNotificationHandler,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    init_tracing();
    tracing::info!("Starting notifications service...");

    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        bus_type = ?config.bus_type,
        topic = %config.topic.name,
        group = %config.consumer_group,
        "Configuration loaded"
    );

    let bus: Arc<dyn EventBus> = match config.bus_type {
        BusType::InMemory => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
        BusType::Nats => {
            tracing::info!("Connecting to NATS at {}", config.nats_url);
            Arc::new(
                NatsBus::connect(&config.nats_url)
                    .await?
                    .with_ack_wait(config.nats_ack_wait),
            )
        }
    };

    let handler = Arc::new(ProductCreatedNotificationHandler::new(Arc::new(
        LogChannel::new(config.notification_latency),
    )));
    let consumer = start_product_created_consumer(
        bus,
        config.topic.clone(),
        &config.consumer_group,
        config.retry_policy.clone(),
        handler,
    )
    .await?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Notifications service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, notifications_router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    consumer.shutdown().await;
    tracing::info!("Notifications service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
