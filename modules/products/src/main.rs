use event_bus::{EventBus, InMemoryBus, NatsBus, Publisher};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use products_rs::{config::BusType, config::Config, products_router, ProductService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    init_tracing();
    tracing::info!("Starting products service...");

    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        bus_type = ?config.bus_type,
        topic = %config.topic.name,
        default_mode = %config.default_publish_mode,
        "Configuration loaded"
    );

    let bus: Arc<dyn EventBus> = match config.bus_type {
        BusType::InMemory => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
        BusType::Nats => {
            tracing::info!("Connecting to NATS at {}", config.nats_url);
            Arc::new(NatsBus::connect(&config.nats_url).await?)
        }
    };

    // Topic provisioning (fail-fast)
    bus.ensure_topic(&config.topic).await?;

    let service = ProductService::new(
        Publisher::new(bus.clone()),
        config.topic.name.clone(),
        config.sync_publish_timeout,
    )
    .with_default_mode(config.default_publish_mode);

    let app = products_router(Arc::new(service));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Products service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
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
