use event_bus::{PublishMode, TopicSpec};
use std::env;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

impl BusType {
    pub fn from_env() -> Self {
        match env::var("BUS_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => BusType::Nats,
            "inmemory" => BusType::InMemory,
            _ => {
                tracing::warn!("Unknown BUS_TYPE, defaulting to inmemory");
                BusType::InMemory
            }
        }
    }
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bus_type: BusType,
    pub nats_url: String,
    pub host: String,
    pub port: u16,
    pub topic: TopicSpec,
    pub sync_publish_timeout: Duration,
    pub default_publish_mode: PublishMode,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bus_type = BusType::from_env();

        let nats_url = env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = parse_var("PORT", 8080)?;

        let topic_name = env::var("PRODUCTS_TOPIC")
            .unwrap_or_else(|_| "product-created-events-topic".to_string());
        let partitions: u32 = parse_var("TOPIC_PARTITIONS", 3)?;
        let replicas: u16 = parse_var("TOPIC_REPLICAS", 3)?;
        let min_insync: u16 = parse_var("TOPIC_MIN_INSYNC_REPLICAS", 2)?;
        if partitions == 0 {
            return Err(ConfigError::Invalid {
                key: "TOPIC_PARTITIONS",
                reason: "must be at least 1".to_string(),
            });
        }
        if min_insync > replicas {
            return Err(ConfigError::Invalid {
                key: "TOPIC_MIN_INSYNC_REPLICAS",
                reason: format!("cannot exceed TOPIC_REPLICAS ({replicas})"),
            });
        }

        let sync_publish_timeout = Duration::from_millis(parse_var("SYNC_PUBLISH_TIMEOUT_MS", 30_000)?);

        let default_publish_mode = match env::var("DEFAULT_PUBLISH_MODE")
            .unwrap_or_else(|_| "async".to_string())
            .to_lowercase()
            .as_str()
        {
            "sync" => PublishMode::Sync {
                timeout: sync_publish_timeout,
            },
            "async" => PublishMode::Async,
            other => {
                return Err(ConfigError::Invalid {
                    key: "DEFAULT_PUBLISH_MODE",
                    reason: format!("expected 'sync' or 'async', got '{other}'"),
                })
            }
        };

        Ok(Config {
            bus_type,
            nats_url,
            host,
            port,
            topic: TopicSpec::new(topic_name, partitions).with_replication(replicas, min_insync),
            sync_publish_timeout,
            default_publish_mode,
        })
    }
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
