//! Text message formats carried by the `hello` queue.
//!
//! Messages are plain text, one `Key: value` line per field, so they can be
//! read straight off the HTTP responses.

use std::fmt;

use chrono::{DateTime, Local, SecondsFormat, TimeZone};

/// Queue name for relayed messages.
pub const QUEUE_NAME: &str = "hello";

/// Version stamped into every published message.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format a timestamp as RFC 3339 with second precision.
pub fn rfc3339<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current local time as RFC 3339.
pub fn now() -> String {
    rfc3339(&Local::now())
}

/// Message published by the `/send` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    pub version: &'static str,
    pub sent_at: String,
    pub sender: String,
}

impl HelloMessage {
    /// Create a message sent now by `sender`.
    pub fn new(sender: impl fmt::Display) -> Self {
        Self::with_timestamp(now(), sender)
    }

    pub fn with_timestamp(sent_at: String, sender: impl fmt::Display) -> Self {
        Self {
            version: VERSION,
            sent_at,
            sender: sender.to_string(),
        }
    }
}

impl fmt::Display for HelloMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hello, world!\nVersion: {}\nSent at: {}\nSender: {}\n",
            self.version, self.sent_at, self.sender
        )
    }
}

/// Render a consumed message body for the requester.
pub fn consumed(body: &str, consumed_at: &str, consumer: impl fmt::Display) -> String {
    format!("{body}\nConsumed at: {consumed_at}\nConsumed by: {consumer}\n")
}

/// Render the notice returned when the queue had nothing buffered.
pub fn no_messages(requester: impl fmt::Display) -> String {
    format!("No messages queued\tRequested by: {requester}\n")
}

/// Extract the `Sent at` value from a message body, if it has one.
pub fn sent_at(body: &str) -> Option<&str> {
    body.lines()
        .find_map(|line| line.strip_prefix("Sent at: "))
}
