//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The text formats published to and read from the `hello` queue
//! - The lapin-backed broker shared by all HTTP handlers
//!
//! ## Architecture
//!
//! ```text
//! GET /send    → Broker::publish     → hello queue
//! GET /consume ← Broker::try_receive ← hello queue
//! ```

pub mod broker;
pub mod types;

pub use broker::{Broker, BrokerError, MessageQueue};
pub use types::{HelloMessage, QUEUE_NAME, VERSION};
