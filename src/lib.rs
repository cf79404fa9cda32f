//! Asynchronous Vote Intake Pipeline
//!
//! Vote submissions are acknowledged as soon as they are queued, then applied
//! by a consumer that records each vote exactly once even when the broker
//! delivers the same event more than once.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod event;
pub mod intake;
pub mod outcome;
pub mod pipeline;
pub mod processor;
pub mod publisher;
pub mod store;
pub mod types;
pub mod validators;

// Re-export commonly used types
pub use broker::InMemoryBroker;
pub use config::Config;
pub use consumer::{ConsumerGroup, DeadLetterQueue};
pub use errors::{Error, Result};
pub use event::{VoteAccepted, VoteRequest, VoteRequestedEvent};
pub use intake::IntakeService;
pub use outcome::ProcessOutcome;
pub use pipeline::VotingPipeline;
pub use processor::EventProcessor;
pub use publisher::{Transport, VotePublisher};
pub use store::{InMemoryStore, Storage};

use config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging from `RUST_LOG`
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "vote_intake=info".into()),
        )
        .try_init()
        .map_err(|e| Error::internal(format!("Logging already initialized: {e}")))?;

    tracing::info!("🗳️  Vote intake v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging from loaded configuration
///
/// `format` is `json`, `pretty` or `compact`; `RUST_LOG` still wins when set.
pub fn init_with(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("vote_intake={}", logging.level)))
        .map_err(|e| Error::config(format!("Invalid LOG_LEVEL: {e}")))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        "compact" => builder.compact().try_init(),
        other => return Err(Error::config(format!("Unknown LOG_FORMAT {other}"))),
    };
    result.map_err(|e| Error::internal(format!("Logging already initialized: {e}")))?;

    tracing::info!(format = %logging.format, "🗳️  Vote intake v{} initialized", VERSION);
    Ok(())
}
