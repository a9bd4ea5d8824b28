//! Message Queue Client (C2): connection/channel management, idempotent
//! exchange/queue/binding declaration, publish + consume against a
//! RabbitMQ broker.
//!
//! Topology mirrors the reference design: one topic exchange per project,
//! one durable queue per routing key, and — when dead-lettering is
//! enabled — a sibling `<exchange>.deadletter` exchange plus a
//! `<queue>.deadletter` queue bound on the identical routing key.

use async_trait::async_trait;
use jacobine_core::error::TransportError;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use serde::Serialize;
use tracing::{debug, info};

pub struct QueueClient {
    _connection: Connection,
    channel: Channel,
}

/// Topology for a single consumer's queue.
pub struct QueueTopology<'a> {
    pub exchange: &'a str,
    pub queue: &'a str,
    pub routing_key: &'a str,
    pub dead_letter: bool,
}

impl QueueClient {
    pub async fn connect(amqp_uri: &str) -> Result<Self, TransportError> {
        let connection = Connection::connect(amqp_uri, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError(format!("failed to connect to broker: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError(format!("failed to open channel: {e}")))?;
        info!("connected to broker and opened channel");
        Ok(Self {
            _connection: connection,
            channel,
        })
    }

    /// Declare exchange, queue, dead-letter topology (if enabled), and
    /// binding. Idempotent: safe to call on every startup.
    pub async fn bind(&self, topology: &QueueTopology<'_>) -> Result<(), TransportError> {
        self.channel
            .exchange_declare(
                topology.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError(format!("exchange_declare {}: {e}", topology.exchange)))?;

        let mut queue_args = FieldTable::default();

        if topology.dead_letter {
            let dlx_exchange = format!("{}.deadletter", topology.exchange);
            let dlq_name = format!("{}.deadletter", topology.queue);

            self.channel
                .exchange_declare(
                    &dlx_exchange,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| TransportError(format!("exchange_declare {dlx_exchange}: {e}")))?;

            self.channel
                .queue_declare(
                    &dlq_name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| TransportError(format!("queue_declare {dlq_name}: {e}")))?;

            self.channel
                .queue_bind(
                    &dlq_name,
                    &dlx_exchange,
                    topology.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| TransportError(format!("queue_bind {dlq_name}: {e}")))?;

            queue_args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dlx_exchange.clone().into()),
            );
            queue_args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(topology.routing_key.into()),
            );

            debug!(dlx_exchange = %dlx_exchange, dlq = %dlq_name, "dead-letter topology declared");
        }

        self.channel
            .queue_declare(
                topology.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_args,
            )
            .await
            .map_err(|e| TransportError(format!("queue_declare {}: {e}", topology.queue)))?;

        self.channel
            .queue_bind(
                topology.queue,
                topology.exchange,
                topology.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError(format!("queue_bind {}: {e}", topology.queue)))?;

        info!(
            exchange = topology.exchange,
            queue = topology.queue,
            routing_key = topology.routing_key,
            dead_letter = topology.dead_letter,
            "queue topology bound"
        );
        Ok(())
    }

    /// JSON-encode `payload` and publish it with persistent delivery mode.
    pub async fn publish<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), TransportError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| TransportError(format!("failed to encode envelope: {e}")))?;
        self.publish_bytes(exchange, routing_key, &body).await
    }

    /// Publish an already-encoded body with persistent delivery mode. The
    /// non-generic half of `publish` — this is what the `Queue` trait
    /// object can actually call.
    pub async fn publish_bytes(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), TransportError> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| TransportError(format!("publish to {exchange}/{routing_key}: {e}")))?
            .await
            .map_err(|e| TransportError(format!("publish confirm {exchange}/{routing_key}: {e}")))?;

        Ok(())
    }

    /// Set `prefetch=1` and register a consumer on `queue`. Returns the
    /// raw `lapin` delivery stream; the Consumer Runtime drives it one
    /// delivery at a time.
    pub async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Consumer, TransportError> {
        self.channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| TransportError(format!("basic_qos: {e}")))?;

        self.channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError(format!("basic_consume {queue}: {e}")))
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| TransportError(format!("ack {delivery_tag}: {e}")))
    }

    pub async fn nack_requeue(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: true,
                },
            )
            .await
            .map_err(|e| TransportError(format!("nack(requeue) {delivery_tag}: {e}")))
    }

    pub async fn reject_no_requeue(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: false,
                },
            )
            .await
            .map_err(|e| TransportError(format!("reject(no-requeue) {delivery_tag}: {e}")))
    }
}

/// The publish/ack seam every stage handler talks to. `publish` can't live
/// here directly — a generic method breaks object-safety — so this trait
/// only carries the pre-encoded half; `publish_json` below re-adds the
/// ergonomic generic call site on top of `&dyn Queue`.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn publish_bytes(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), TransportError>;
    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;
    async fn nack_requeue(&self, delivery_tag: u64) -> Result<(), TransportError>;
    async fn reject_no_requeue(&self, delivery_tag: u64) -> Result<(), TransportError>;
}

#[async_trait]
impl Queue for QueueClient {
    async fn publish_bytes(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), TransportError> {
        QueueClient::publish_bytes(self, exchange, routing_key, body).await
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        QueueClient::ack(self, delivery_tag).await
    }

    async fn nack_requeue(&self, delivery_tag: u64) -> Result<(), TransportError> {
        QueueClient::nack_requeue(self, delivery_tag).await
    }

    async fn reject_no_requeue(&self, delivery_tag: u64) -> Result<(), TransportError> {
        QueueClient::reject_no_requeue(self, delivery_tag).await
    }
}

/// JSON-encode `payload` and publish it through a `Queue` trait object —
/// the generic call site `QueueClient::publish` offers, minus the
/// object-safety problem a generic trait method would create.
pub async fn publish_json<T: Serialize + Sync>(
    queue: &dyn Queue,
    exchange: &str,
    routing_key: &str,
    payload: &T,
) -> Result<(), TransportError> {
    let body = serde_json::to_vec(payload).map_err(|e| TransportError(format!("failed to encode envelope: {e}")))?;
    queue.publish_bytes(exchange, routing_key, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlx_and_dlq_names_derive_from_exchange_and_queue() {
        let exchange = "JacobineAnalysis";
        let queue = "download.http";
        assert_eq!(format!("{exchange}.deadletter"), "JacobineAnalysis.deadletter");
        assert_eq!(format!("{queue}.deadletter"), "download.http.deadletter");
    }
}
