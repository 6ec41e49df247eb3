use event_bus::{RetryPolicy, TopicSpec};
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

/// Time allowed for the handler on top of the longest retry delay
const HANDLER_ACK_MARGIN: Duration = Duration::from_secs(30);

/// Notifications service configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bus_type: BusType,
    pub nats_url: String,
    pub host: String,
    pub port: u16,
    pub topic: TopicSpec,
    pub consumer_group: String,
    pub retry_policy: RetryPolicy,
    pub notification_latency: Duration,
    /// JetStream redelivery timeout; must outlast the longest retry delay
    pub nats_ack_wait: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bus_type = BusType::from_env();

        let nats_url = env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = parse_var("PORT", 8081)?;

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

        let consumer_group = env::var("CONSUMER_GROUP")
            .unwrap_or_else(|_| "product-created-events".to_string());
        if consumer_group.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "CONSUMER_GROUP",
                reason: "must not be blank".to_string(),
            });
        }

        let defaults = RetryPolicy::default();
        let retry_policy = RetryPolicy {
            max_attempts: parse_var("RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay: Duration::from_millis(parse_var(
                "RETRY_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )?),
            multiplier: parse_var("RETRY_MULTIPLIER", defaults.multiplier)?,
            max_delay: Duration::from_millis(parse_var(
                "RETRY_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )?),
        };
        retry_policy
            .validate()
            .map_err(|reason| ConfigError::Invalid {
                key: "RETRY_*",
                reason,
            })?;

        let notification_latency =
            Duration::from_millis(parse_var("NOTIFICATION_LATENCY_MS", 50)?);

        let default_ack_wait = retry_policy.max_delay + HANDLER_ACK_MARGIN;
        let nats_ack_wait = Duration::from_millis(parse_var(
            "NATS_ACK_WAIT_MS",
            default_ack_wait.as_millis() as u64,
        )?);
        if nats_ack_wait <= retry_policy.max_delay {
            return Err(ConfigError::Invalid {
                key: "NATS_ACK_WAIT_MS",
                reason: format!(
                    "must exceed RETRY_MAX_DELAY_MS ({} ms)",
                    retry_policy.max_delay.as_millis()
                ),
            });
        }

        Ok(Config {
            bus_type,
            nats_url,
            host,
            port,
            topic: TopicSpec::new(topic_name, partitions).with_replication(replicas, min_insync),
            consumer_group,
            retry_policy,
            notification_latency,
            nats_ack_wait,
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

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 12] = [
        "BUS_TYPE",
        "PORT",
        "PRODUCTS_TOPIC",
        "TOPIC_PARTITIONS",
        "CONSUMER_GROUP",
        "RETRY_MAX_ATTEMPTS",
        "RETRY_BASE_DELAY_MS",
        "RETRY_MULTIPLIER",
        "RETRY_MAX_DELAY_MS",
        "NOTIFICATION_LATENCY_MS",
        "NATS_ACK_WAIT_MS",
        "NATS_URL",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();

        assert_eq!(config.bus_type, BusType::InMemory);
        assert_eq!(config.port, 8081);
        assert_eq!(config.topic.name, "product-created-events-topic");
        assert_eq!(config.topic.partitions, 3);
        assert_eq!(config.consumer_group, "product-created-events");
        assert_eq!(config.retry_policy, RetryPolicy::default());
        assert_eq!(config.notification_latency, Duration::from_millis(50));
        assert_eq!(config.nats_ack_wait, Duration::from_secs(60));
    }

    #[test]
    #[serial]
    fn test_ack_wait_follows_retry_cap() {
        clear_env();
        env::set_var("RETRY_MAX_DELAY_MS", "120000");
        let config = Config::from_env().unwrap();
        assert_eq!(config.nats_ack_wait, Duration::from_secs(150));

        clear_env();
        env::set_var("NATS_ACK_WAIT_MS", "30000");
        assert!(Config::from_env().is_err());

        clear_env();
        env::set_var("NATS_ACK_WAIT_MS", "45000");
        let config = Config::from_env().unwrap();
        assert_eq!(config.nats_ack_wait, Duration::from_secs(45));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_retry_overrides() {
        clear_env();
        env::set_var("RETRY_MAX_ATTEMPTS", "3");
        env::set_var("RETRY_BASE_DELAY_MS", "250");
        env::set_var("RETRY_MULTIPLIER", "3.0");
        env::set_var("RETRY_MAX_DELAY_MS", "1000");

        let config = Config::from_env().unwrap();
        assert_eq!(config.retry_policy.max_attempts, 3);
        assert_eq!(config.retry_policy.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry_policy.multiplier, 3.0);
        assert_eq!(config.retry_policy.max_delay, Duration::from_secs(1));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear_env();
        env::set_var("RETRY_MAX_ATTEMPTS", "0");
        assert!(Config::from_env().is_err());

        clear_env();
        env::set_var("RETRY_MULTIPLIER", "fast");
        assert!(Config::from_env().is_err());

        clear_env();
        env::set_var("CONSUMER_GROUP", " ");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
