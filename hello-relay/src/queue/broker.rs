//! RabbitMQ broker connection using lapin.
//!
//! A single connection and channel are opened at startup and shared by every
//! request. The lapin `Channel` is cheap to clone and safe to use from many
//! tasks at once; the consumer stream is not, so it sits behind a mutex.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::types::QUEUE_NAME;
use crate::config::{Config, ConfigError};

/// Errors raised while talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to connect to RabbitMQ: {0}")]
    Connect(#[source] lapin::Error),

    #[error("Failed to open a channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("Failed to declare a queue: {0}")]
    Declare(#[source] lapin::Error),

    #[error("Failed to register a consumer: {0}")]
    Consume(#[source] lapin::Error),

    #[error("Failed to publish a message: {0}")]
    Publish(#[source] lapin::Error),

    #[error("Failed to receive a message: {0}")]
    Delivery(#[source] lapin::Error),

    #[error("Consumer stream closed")]
    ConsumerClosed,
}

/// Operations the HTTP layer needs from a message queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Publish a text message to the queue.
    async fn publish(&self, body: &str) -> Result<(), BrokerError>;

    /// Take one message if one is already buffered; never waits for one.
    ///
    /// Bodies are decoded as UTF-8; invalid sequences from other publishers
    /// on the queue are replaced with U+FFFD.
    async fn try_receive(&self) -> Result<Option<String>, BrokerError>;

    /// Whether both publishing and consuming are still usable.
    fn is_connected(&self) -> bool;
}

/// Single-reader wrapper around a delivery stream.
///
/// Remembers when the stream has ended so later polls and health checks
/// don't have to touch it again.
pub struct Inbox<S> {
    stream: Mutex<S>,
    open: AtomicBool,
}

impl<S> Inbox<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(stream),
            open: AtomicBool::new(true),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Poll the stream exactly once without waiting.
    ///
    /// `Ok(None)` means nothing was ready at this instant.
    pub async fn try_next<D>(&self) -> Result<Option<D>, BrokerError>
    where
        S: Stream<Item = Result<D, lapin::Error>> + Unpin,
    {
        if !self.is_open() {
            return Err(BrokerError::ConsumerClosed);
        }

        let mut stream = self.stream.lock().await;

        match stream.next().now_or_never() {
            None => Ok(None),
            Some(Some(Ok(item))) => Ok(Some(item)),
            Some(Some(Err(e))) => Err(BrokerError::Delivery(e)),
            Some(None) => {
                self.open.store(false, Ordering::Release);
                warn!(queue = QUEUE_NAME, "rabbitmq_consumer_closed");
                Err(BrokerError::ConsumerClosed)
            }
        }
    }
}

/// Connection, channel and consumer bound to the `hello` queue.
pub struct Broker {
    connection: Connection,
    channel: Channel,
    consumer: Inbox<Consumer>,
}

impl Broker {
    /// Connect to RabbitMQ, declare the queue and start consuming from it.
    ///
    /// The queue is non-durable, non-exclusive and never auto-deleted. The
    /// consumer auto-acknowledges, so a message is gone from the broker as
    /// soon as it is delivered into the local buffer.
    pub async fn connect(config: &Config) -> Result<Self, BrokerError> {
        let uri = config.amqp_uri()?;

        info!(
            server = %config.server,
            vhost = %config.vhost,
            user = %config.user,
            "rabbitmq_connecting"
        );

        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(BrokerError::Connect)?;

        info!("rabbitmq_connected");

        let channel = connection
            .create_channel()
            .await
            .map_err(BrokerError::Channel)?;

        info!("rabbitmq_channel_created");

        let queue = channel
            .queue_declare(
                QUEUE_NAME,
                QueueDeclareOptions {
                    durable: false,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::Declare)?;

        info!(
            queue = QUEUE_NAME,
            messages = queue.message_count(),
            consumers = queue.consumer_count(),
            "rabbitmq_queue_declared"
        );

        let consumer = channel
            .basic_consume(
                QUEUE_NAME,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::Consume)?;

        info!(queue = QUEUE_NAME, "rabbitmq_consumer_started");

        Ok(Self {
            connection,
            channel,
            consumer: Inbox::new(consumer),
        })
    }

    /// Close the channel and connection gracefully.
    pub async fn close(&self) {
        if let Err(e) = self.channel.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }

        if let Err(e) = self.connection.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }

        info!("rabbitmq_broker_closed");
    }
}

#[async_trait]
impl MessageQueue for Broker {
    async fn publish(&self, body: &str) -> Result<(), BrokerError> {
        // Without publisher confirms the second await resolves immediately.
        self.channel
            .basic_publish(
                "",
                QUEUE_NAME,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                body.as_bytes(),
                BasicProperties::default().with_content_type("text/plain".into()),
            )
            .await
            .map_err(BrokerError::Publish)?
            .await
            .map_err(BrokerError::Publish)?;

        info!(
            queue = QUEUE_NAME,
            body_length = body.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }

    async fn try_receive(&self) -> Result<Option<String>, BrokerError> {
        let Some(delivery) = self.consumer.try_next().await? else {
            return Ok(None);
        };

        info!(
            queue = QUEUE_NAME,
            delivery_tag = delivery.delivery_tag,
            body_length = delivery.data.len(),
            "rabbitmq_message_received"
        );

        Ok(Some(String::from_utf8_lossy(&delivery.data).into_owned()))
    }

    fn is_connected(&self) -> bool {
        self.channel.status().connected() && self.consumer.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_broker_error_messages() {
        assert_eq!(
            BrokerError::ConsumerClosed.to_string(),
            "Consumer stream closed"
        );

        let err = BrokerError::from(ConfigError::Missing("RABBITMQ_SERVER"));
        assert_eq!(
            err.to_string(),
            "Failed to retrieve RABBITMQ_SERVER variable"
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_server() {
        let config = Config {
            server: "rabbitmq/vhost".to_string(),
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            port: 8008,
        };

        let result = Broker::connect(&config).await;
        assert!(matches!(
            result,
            Err(BrokerError::Config(ConfigError::InvalidServer(_)))
        ));
    }

    #[tokio::test]
    async fn test_inbox_nothing_ready() {
        let inbox = Inbox::new(stream::pending::<Result<u8, lapin::Error>>());

        assert!(matches!(inbox.try_next().await, Ok(None)));
        assert!(inbox.is_open());
    }

    #[tokio::test]
    async fn test_inbox_takes_one_item_per_poll() {
        let items: Vec<Result<&str, lapin::Error>> = vec![Ok("first"), Ok("second")];
        let inbox = Inbox::new(stream::iter(items).chain(stream::pending()));

        assert!(matches!(inbox.try_next().await, Ok(Some("first"))));
        assert!(matches!(inbox.try_next().await, Ok(Some("second"))));
        assert!(matches!(inbox.try_next().await, Ok(None)));
        assert!(inbox.is_open());
    }

    #[tokio::test]
    async fn test_inbox_delivery_error() {
        let items: Vec<Result<u8, lapin::Error>> = vec![Err(lapin::Error::ChannelsLimitReached)];
        let inbox = Inbox::new(stream::iter(items).chain(stream::pending()));

        assert!(matches!(
            inbox.try_next().await,
            Err(BrokerError::Delivery(_))
        ));
        assert!(inbox.is_open());
    }

    #[tokio::test]
    async fn test_inbox_closed_stream() {
        let inbox = Inbox::new(stream::empty::<Result<u8, lapin::Error>>());

        assert!(matches!(
            inbox.try_next().await,
            Err(BrokerError::ConsumerClosed)
        ));
        assert!(!inbox.is_open());

        // Stays closed without polling again.
        assert!(matches!(
            inbox.try_next().await,
            Err(BrokerError::ConsumerClosed)
        ));
    }
}
