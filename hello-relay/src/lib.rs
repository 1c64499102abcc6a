//! Hello Relay - HTTP front end for a single RabbitMQ queue.
//!
//! `/send` publishes a timestamped text greeting to the `hello` queue and
//! `/consume` takes one message off it without waiting.
//!
//! ## Architecture
//!
//! ```text
//! HTTP client → /send    → Broker → hello queue
//! HTTP client ← /consume ← Broker ← hello queue
//! ```

pub mod config;
pub mod queue;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use queue::{Broker, BrokerError, HelloMessage, MessageQueue, QUEUE_NAME, VERSION};
pub use web::AppState;
