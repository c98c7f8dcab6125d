//! Single-message sends with broker acknowledgement.
//!
//! A [`Producer`] turns one `(topic, key, payload)` triple into one PUBLISH
//! and resolves once the broker acknowledges it (PUBACK for QoS 1, PUBCOMP
//! for QoS 2, immediately after the write for QoS 0). It never retries:
//! failures are classified by [`TransferError::is_retryable`] and the caller
//! decides what to do with them.
//!
//! The base topic from the transport configuration is applied to every
//! topic: with `base_topic = "plant-3"`, `send("kiln", ..)` publishes to
//! `plant-3/kiln`.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use rumqttc::{AsyncClient, QoS};
use tokio::sync::Notify;
use tracing::debug;

use super::{
    acks::{Ack, AckTracker},
    config::Config,
    error::TransferError,
};

/// MQTT caps topic names at 65535 bytes; brokers usually far lower.
const MAX_TOPIC_LEN: usize = 65_535;

/// Counts sends that are between enqueue and acknowledgement so shutdown
/// can wait for them before stopping the connection.
#[derive(Default)]
pub struct PublishDrain {
    inflight: AtomicUsize,
    notify: Notify,
}

impl PublishDrain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(self: &Arc<Self>) -> PublishGuard {
        self.inflight.fetch_add(1, Ordering::AcqRel);
        PublishGuard {
            drain: self.clone(),
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a guard dropped in between is not missed.
            notified.as_mut().enable();

            if self.inflight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct PublishGuard {
    drain: Arc<PublishDrain>,
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        if self.drain.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drain.notify.notify_waiters();
        }
    }
}

/// Cloneable handle for acknowledged publishes.
#[derive(Clone)]
pub struct Producer {
    client: AsyncClient,
    acks: Arc<AckTracker>,
    drain: Arc<PublishDrain>,
    base_topic: String,
    qos: QoS,
    max_packet_size: usize,
    send_timeout: Duration,
}

impl Producer {
    pub fn new(client: AsyncClient, acks: Arc<AckTracker>, config: &Config) -> Self {
        Self {
            client,
            acks,
            drain: Arc::new(PublishDrain::new()),
            base_topic: config.base_topic.clone(),
            qos: config.qos(),
            max_packet_size: config.max_packet_size as usize,
            send_timeout: config.send_timeout(),
        }
    }

    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    pub fn publish_drain(&self) -> Arc<PublishDrain> {
        self.drain.clone()
    }

    /// Applies the base topic prefix.
    pub fn full_topic(&self, topic: &str) -> String {
        if self.base_topic.is_empty() {
            topic.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_topic.trim_end_matches('/'),
                topic.trim_start_matches('/')
            )
        }
    }

    /// Publishes `payload` and waits for the broker's acknowledgement.
    ///
    /// MQTT has no message key; `key` is only recorded in logs. Callers that
    /// need it on the wire must carry it inside the payload.
    ///
    /// # Errors
    /// - `InvalidTopic` / `PayloadTooLarge`: rejected locally, never retryable
    /// - `RequestQueueFull`: the client request channel is saturated
    /// - `AckTimeout`: no acknowledgement within `send_timeout_ms`
    /// - `ConnectionLost` / `ConnectionClosed`: the connection went away
    pub async fn send(&self, topic: &str, key: &str, payload: Bytes) -> Result<Ack, TransferError> {
        let full_topic = self.full_topic(topic);
        validate_topic(&full_topic)?;

        let size = publish_overhead(&full_topic, self.qos) + payload.len();
        if size > self.max_packet_size {
            return Err(TransferError::PayloadTooLarge {
                size,
                limit: self.max_packet_size,
            });
        }

        let _guard = self.drain.enter();

        debug!(
            topic = %full_topic,
            key,
            bytes = payload.len(),
            "Publishing"
        );

        let rx = self.acks.register(|| {
            self.client
                .try_publish(full_topic.as_str(), self.qos, false, payload.to_vec())
        })?;

        match tokio::time::timeout(self.send_timeout, rx).await {
            Ok(Ok(result)) => result,
            // Tracker dropped without resolving: the kernel is gone.
            Ok(Err(_)) => Err(TransferError::ConnectionClosed),
            Err(_) => Err(TransferError::AckTimeout(self.send_timeout)),
        }
    }
}

fn validate_topic(topic: &str) -> Result<(), TransferError> {
    if topic.is_empty() {
        return Err(TransferError::InvalidTopic("topic is empty".into()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TransferError::InvalidTopic(format!(
            "topic is {} bytes long",
            topic.len()
        )));
    }
    if topic.contains(['+', '#', '\0']) {
        return Err(TransferError::InvalidTopic(format!(
            "'{topic}' contains wildcard or NUL characters"
        )));
    }
    Ok(())
}

/// Worst-case PUBLISH (v3.1.1) overhead: fixed header with a 4-byte
/// remaining length, length-prefixed topic, packet id for QoS > 0.
fn publish_overhead(full_topic: &str, qos: QoS) -> usize {
    let fixed_header = 1 + 4;
    let topic = 2 + full_topic.len();
    let pid = match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce | QoS::ExactlyOnce => 2,
    };
    fixed_header + topic + pid
}
