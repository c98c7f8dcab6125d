//! Event loop that feeds the publisher.
//!
//! The `Executor` pulls readings from the [`EventSource`] at its cadence and
//! hands each one to the [`ReliablePublisher`]. It does not wait for delivery
//! outcomes; those are reported by the publisher's workers. The loop ends when
//! its cancellation token fires or the publisher closes.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{error::DeliveryError, publisher::ReliablePublisher, source::EventSource};

pub struct Executor {
    source: EventSource,
    publisher: ReliablePublisher,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(
        source: EventSource,
        publisher: ReliablePublisher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            publisher,
            cancel,
        }
    }

    /// Runs until cancelled or the publisher closes.
    ///
    /// Returns the number of events handed to the publisher. Delivery
    /// outcomes are not part of the result: they are reported through the
    /// publisher's logs and [`ReliablePublisher::stats`].
    pub async fn run(mut self) -> u64 {
        info!(
            "Event generation started (interval: {:?}, topic: {})",
            self.source.period(),
            self.publisher.topic()
        );

        let mut enqueued = 0u64;
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = self.source.next() => event,
            };

            let id = event.id;
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = self.publisher.enqueue(event) => outcome,
            };

            match outcome {
                Ok(_handle) => {
                    enqueued += 1;
                    debug!(event_id = %id, "Handed event to publisher");
                }
                Err(DeliveryError::Closed) => {
                    info!("Publisher closed, stopping event generation");
                    break;
                }
                Err(e) => error!(event_id = %id, "Event rejected: {}", e),
            }
        }

        info!(enqueued, "Event generation stopped");
        enqueued
    }
}
