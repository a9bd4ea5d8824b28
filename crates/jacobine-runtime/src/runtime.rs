//! Consumer Runtime (C5): binds a stage's queue topology, then drives the
//! broker's delivery stream one message at a time — prefetch=1 is already
//! set by [`QueueClient::consume`], so there is never more than one
//! in-flight `process()` call per consumer process.
//!
//! The start/stop/shutdown shape mirrors the reference worker runner:
//! a `tokio::select!` race between the delivery stream and a shutdown
//! `Notify`, with in-flight work drained before the loop exits. Health
//! pings are replaced by per-delivery ack/nack/reject dispatch.

use std::sync::Arc;

use futures_util::StreamExt;
use jacobine_core::error::TransportError;
use jacobine_queue::{QueueClient, QueueTopology};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::deps::StageDeps;
use crate::stage::{Disposition, Stage};

pub struct ConsumerRuntime {
    queue: Arc<QueueClient>,
    stage: Arc<dyn Stage>,
    deps: Arc<StageDeps>,
    exchange: String,
    queue_name: String,
    consumer_tag: String,
}

impl ConsumerRuntime {
    pub fn new(
        queue: Arc<QueueClient>,
        stage: Arc<dyn Stage>,
        deps: Arc<StageDeps>,
        exchange: impl Into<String>,
        queue_name: impl Into<String>,
        consumer_tag: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            stage,
            deps,
            exchange: exchange.into(),
            queue_name: queue_name.into(),
            consumer_tag: consumer_tag.into(),
        }
    }

    /// Declare topology, then consume until `shutdown` fires (or forever,
    /// if `shutdown` is `None` and the process relies on an external
    /// supervisor to kill it).
    pub async fn run(self, shutdown: Option<Arc<Notify>>) -> Result<(), TransportError> {
        let topology = QueueTopology {
            exchange: &self.exchange,
            queue: &self.queue_name,
            routing_key: self.stage.routing_key(),
            dead_letter: self.stage.dead_letter_enabled(),
        };
        self.queue.bind(&topology).await?;

        let mut consumer = self.queue.consume(&self.queue_name, &self.consumer_tag).await?;
        info!(queue = %self.queue_name, routing_key = self.stage.routing_key(), "consumer started");

        let shutdown = shutdown.unwrap_or_default();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => {
                    info!(queue = %self.queue_name, "shutdown signal received, draining");
                    break;
                }

                delivery = consumer.next() => {
                    let Some(delivery) = delivery else {
                        warn!(queue = %self.queue_name, "delivery stream ended, broker connection likely lost");
                        break;
                    };
                    let delivery = match delivery {
                        Ok(delivery) => delivery,
                        Err(e) => {
                            error!(queue = %self.queue_name, error = %e, "delivery error");
                            continue;
                        }
                    };

                    let delivery_tag = delivery.delivery_tag;
                    let disposition = self.stage.process(&delivery.data, &self.deps).await;

                    let ack_result = match disposition {
                        Disposition::Ack => self.queue.ack(delivery_tag).await,
                        Disposition::RejectNoRequeue => self.queue.reject_no_requeue(delivery_tag).await,
                        Disposition::NackRequeue => self.queue.nack_requeue(delivery_tag).await,
                    };

                    if let Err(e) = ack_result {
                        error!(queue = %self.queue_name, delivery_tag, error = %e, "failed to settle delivery");
                    }
                }
            }
        }

        info!(queue = %self.queue_name, "consumer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Only exercises routing/dead-letter metadata and the default trait
    /// method — `process()` dispatch against a live `StageDeps` is covered
    /// per-stage in `jacobine-stages`, where each stage mocks only the
    /// dependency it actually touches.
    struct NoDlqStage;

    #[async_trait]
    impl Stage for NoDlqStage {
        fn routing_key(&self) -> &'static str {
            "test.no_dlq"
        }

        fn dead_letter_enabled(&self) -> bool {
            false
        }

        async fn process(&self, _body: &[u8], _deps: &StageDeps) -> Disposition {
            Disposition::Ack
        }
    }

    struct DefaultDlqStage;

    #[async_trait]
    impl Stage for DefaultDlqStage {
        fn routing_key(&self) -> &'static str {
            "test.default_dlq"
        }

        async fn process(&self, _body: &[u8], _deps: &StageDeps) -> Disposition {
            Disposition::Ack
        }
    }

    #[test]
    fn disposition_variants_are_distinct() {
        assert_ne!(Disposition::Ack, Disposition::RejectNoRequeue);
        assert_ne!(Disposition::Ack, Disposition::NackRequeue);
        assert_ne!(Disposition::RejectNoRequeue, Disposition::NackRequeue);
    }

    #[test]
    fn dead_letter_enabled_defaults_to_true() {
        assert!(DefaultDlqStage.dead_letter_enabled());
        assert!(!NoDlqStage.dead_letter_enabled());
    }

    #[test]
    fn routing_key_identifies_the_stage() {
        assert_eq!(NoDlqStage.routing_key(), "test.no_dlq");
        assert_eq!(DefaultDlqStage.routing_key(), "test.default_dlq");
    }
}
