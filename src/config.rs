//! Pipeline configuration
//!
//! Loads queue topology, redelivery policy and logging settings from
//! environment variables (a `.env` file is honoured when present).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default topic carrying vote-request events
pub const DEFAULT_TOPIC: &str = "votes";

/// Default consumer group shared by all processor instances
pub const DEFAULT_CONSUMER_GROUP: &str = "vote-consumers";

/// Queue topology for vote-request events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    /// Topic name
    pub topic: String,

    /// Number of partitions; events are routed by voter id
    pub partitions: u32,

    /// Bounded depth of each partition before `send` waits
    pub partition_capacity: usize,
}

/// Consumer group and redelivery policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerConfig {
    /// Consumer group name
    pub group: String,

    /// Deliveries of one message before it is given up on (at least 1)
    pub max_delivery_attempts: u32,

    /// Base delay between redeliveries; multiplied by the attempt number
    pub redelivery_backoff_ms: u64,

    /// Route unprocessable messages to the dead-letter queue
    pub dead_letter: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub broker: BrokerConfig,
    pub consumer: ConsumerConfig,
    pub logging: LoggingConfig,
}

impl BrokerConfig {
    /// Load broker configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let topic = std::env::var("VOTES_TOPIC").unwrap_or_else(|_| DEFAULT_TOPIC.to_string());

        let partitions = std::env::var("VOTES_TOPIC_PARTITIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .map_err(|_| Error::config("Invalid VOTES_TOPIC_PARTITIONS"))?;

        let partition_capacity = std::env::var("VOTES_PARTITION_CAPACITY")
            .unwrap_or_else(|_| "1024".to_string())
            .parse()
            .map_err(|_| Error::config("Invalid VOTES_PARTITION_CAPACITY"))?;

        let config = Self {
            topic,
            partitions,
            partition_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject topologies the broker cannot serve
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::config("VOTES_TOPIC must not be empty"));
        }
        if self.partitions == 0 {
            return Err(Error::config("VOTES_TOPIC_PARTITIONS must be at least 1"));
        }
        if self.partition_capacity == 0 {
            return Err(Error::config("VOTES_PARTITION_CAPACITY must be at least 1"));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            partitions: 1,
            partition_capacity: 1024,
        }
    }
}

impl ConsumerConfig {
    /// Load consumer configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let group = std::env::var("VOTES_CONSUMER_GROUP")
            .unwrap_or_else(|_| DEFAULT_CONSUMER_GROUP.to_string());

        let max_delivery_attempts = std::env::var("VOTES_MAX_DELIVERY_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| Error::config("Invalid VOTES_MAX_DELIVERY_ATTEMPTS"))?;

        let redelivery_backoff_ms = std::env::var("VOTES_REDELIVERY_BACKOFF_MS")
            .unwrap_or_else(|_| "200".to_string())
            .parse()
            .map_err(|_| Error::config("Invalid VOTES_REDELIVERY_BACKOFF_MS"))?;

        let dead_letter = std::env::var("VOTES_DEAD_LETTER")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .map_err(|_| Error::config("VOTES_DEAD_LETTER must be true or false"))?;

        let config = Self {
            group,
            max_delivery_attempts,
            redelivery_backoff_ms,
            dead_letter,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_delivery_attempts == 0 {
            return Err(Error::config("VOTES_MAX_DELIVERY_ATTEMPTS must be at least 1"));
        }
        Ok(())
    }

    /// Delay before the given redelivery attempt (attempts count from 1)
    pub fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.redelivery_backoff_ms.saturating_mul(attempt as u64))
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            max_delivery_attempts: 5,
            redelivery_backoff_ms: 200,
            dead_letter: true,
        }
    }
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let broker = BrokerConfig::from_env()?;
        let consumer = ConsumerConfig::from_env()?;

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        };

        Ok(Self {
            broker,
            consumer,
            logging,
        })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            broker: BrokerConfig {
                topic: DEFAULT_TOPIC.to_string(),
                partitions: 4,
                partition_capacity: 256,
            },
            consumer: ConsumerConfig {
                group: DEFAULT_CONSUMER_GROUP.to_string(),
                max_delivery_attempts: 3,
                redelivery_backoff_ms: 1,
                dead_letter: true,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
