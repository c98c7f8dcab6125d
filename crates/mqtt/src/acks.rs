//! Correlates publishes with broker acknowledgements.
//!
//! rumqttc 0.24 has no per-publish completion handle: `try_publish` only
//! enqueues a request, and the event loop later reports
//! `Outgoing::Publish(pkid)` when it assigns a packet id, then
//! `Incoming::PubAck(pkid)` / `Incoming::PubComp(pkid)` when the broker
//! confirms it. The event loop takes requests off its channel in order, so
//! the n-th registered publish is the n-th `Outgoing::Publish` event.
//!
//! ```text
//! register ──push──> [queued FIFO] ──Outgoing::Publish(pkid)──> {inflight map}
//!                          │                                         │
//!                  pkid 0 (QoS 0): resolve              PubAck/PubComp: resolve
//! ```
//!
//! On disconnect the inflight waiters fail with `ConnectionLost`, and their
//! packet ids stay in the map as tombstones. rumqttc retransmits those
//! publishes after reconnecting, and the retransmission must not consume a
//! queued waiter.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::error::TransferError;

/// Broker confirmation of a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// MQTT packet id; 0 for QoS 0.
    pub pkid: u16,
    /// Position of this acknowledgement in the connection's ack stream.
    pub offset: u64,
}

type Waiter = oneshot::Sender<Result<Ack, TransferError>>;
pub(crate) type AckReceiver = oneshot::Receiver<Result<Ack, TransferError>>;

#[derive(Default)]
struct Inner {
    queued: VecDeque<Waiter>,
    /// `None` marks a publish whose waiter was failed on disconnect.
    inflight: HashMap<u16, Option<Waiter>>,
    next_offset: u64,
    closed: bool,
}

impl Inner {
    fn resolve(&mut self, pkid: u16, waiter: Waiter) {
        let ack = Ack {
            pkid,
            offset: self.next_offset,
        };
        self.next_offset += 1;
        // The sender may have timed out and dropped its receiver.
        let _ = waiter.send(Ok(ack));
    }
}

/// Shared between the [`Producer`](crate::Producer) (which registers
/// publishes) and the [`ConnectionKernel`](crate::ConnectionKernel) (which
/// feeds it event loop notifications).
#[derive(Default)]
pub struct AckTracker {
    inner: Mutex<Inner>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the queues inconsistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a waiter and runs `enqueue` under the same lock, so the
    /// waiter order always matches the request channel order.
    ///
    /// If `enqueue` fails the waiter is withdrawn and the error returned.
    pub(crate) fn register<F>(&self, enqueue: F) -> Result<AckReceiver, TransferError>
    where
        F: FnOnce() -> Result<(), rumqttc::ClientError>,
    {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TransferError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        inner.queued.push_back(tx);

        if let Err(err) = enqueue() {
            inner.queued.pop_back();
            return Err(err.into());
        }

        Ok(rx)
    }

    /// `Outgoing::Publish(pkid)` from the event loop.
    pub fn on_outgoing_publish(&self, pkid: u16) {
        let mut inner = self.lock();

        if pkid != 0 && inner.inflight.contains_key(&pkid) {
            trace!(pkid, "Retransmission of an unacknowledged publish");
            return;
        }

        let Some(waiter) = inner.queued.pop_front() else {
            debug!(pkid, "Outgoing publish without a registered waiter");
            return;
        };

        if pkid == 0 {
            inner.resolve(pkid, waiter);
        } else {
            inner.inflight.insert(pkid, Some(waiter));
        }
    }

    /// `Incoming::PubAck(pkid)` or `Incoming::PubComp(pkid)`.
    pub fn on_ack(&self, pkid: u16) {
        let mut inner = self.lock();
        match inner.inflight.remove(&pkid) {
            Some(Some(waiter)) => inner.resolve(pkid, waiter),
            Some(None) => trace!(pkid, "Ack for a publish already reported lost"),
            None => debug!(pkid, "Ack for an unknown packet id"),
        }
    }

    /// Fails every publish that reached the wire but was not acknowledged.
    ///
    /// Publishes still queued in the request channel are kept: rumqttc
    /// sends them after reconnecting.
    pub fn on_disconnect(&self, reason: &str) {
        let mut inner = self.lock();
        for waiter in inner.inflight.values_mut() {
            if let Some(waiter) = waiter.take() {
                let _ = waiter.send(Err(TransferError::ConnectionLost(reason.to_string())));
            }
        }
    }

    /// Fails everything outstanding and rejects future registrations.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        for waiter in inner.queued.drain(..) {
            let _ = waiter.send(Err(TransferError::ConnectionClosed));
        }
        for (_, waiter) in inner.inflight.drain() {
            if let Some(waiter) = waiter {
                let _ = waiter.send(Err(TransferError::ConnectionClosed));
            }
        }
    }

    /// Number of publishes that have neither been acknowledged nor failed.
    pub fn pending(&self) -> usize {
        let inner = self.lock();
        inner.queued.len() + inner.inflight.values().filter(|w| w.is_some()).count()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_ok(tracker: &AckTracker) -> AckReceiver {
        tracker.register(|| Ok(())).expect("registration")
    }

    #[tokio::test]
    async fn test_acks_resolve_in_publish_order() {
        let tracker = AckTracker::new();
        let first = register_ok(&tracker);
        let second = register_ok(&tracker);

        tracker.on_outgoing_publish(1);
        tracker.on_outgoing_publish(2);
        assert_eq!(tracker.pending(), 2);

        tracker.on_ack(2);
        tracker.on_ack(1);

        assert_eq!(second.await.unwrap().unwrap(), Ack { pkid: 2, offset: 0 });
        assert_eq!(first.await.unwrap().unwrap(), Ack { pkid: 1, offset: 1 });
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test]
    async fn test_qos0_resolves_on_send() {
        let tracker = AckTracker::new();
        let rx = register_ok(&tracker);

        tracker.on_outgoing_publish(0);

        assert_eq!(rx.await.unwrap().unwrap().pkid, 0);
    }

    #[test]
    fn test_failed_enqueue_withdraws_waiter() {
        let tracker = AckTracker::new();
        let (client, event_loop) =
            rumqttc::AsyncClient::new(rumqttc::MqttOptions::new("kiln", "localhost", 1883), 1);
        drop(event_loop);

        let result = tracker.register(|| {
            client.try_publish("kiln", rumqttc::QoS::AtLeastOnce, false, b"{}".to_vec())
        });

        assert!(matches!(result, Err(TransferError::RequestQueueFull(_))));
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_inflight_and_ignores_retransmission() {
        let tracker = AckTracker::new();
        let lost = register_ok(&tracker);
        tracker.on_outgoing_publish(7);

        let queued = register_ok(&tracker);
        tracker.on_disconnect("connection reset");

        assert!(matches!(
            lost.await.unwrap(),
            Err(TransferError::ConnectionLost(_))
        ));

        // Retransmission of pkid 7 must not take the queued waiter.
        tracker.on_outgoing_publish(7);
        tracker.on_ack(7);
        assert_eq!(tracker.pending(), 1);

        tracker.on_outgoing_publish(8);
        tracker.on_ack(8);
        assert_eq!(queued.await.unwrap().unwrap().pkid, 8);
    }

    #[tokio::test]
    async fn test_close_fails_everything_and_rejects_new() {
        let tracker = AckTracker::new();
        let inflight = register_ok(&tracker);
        tracker.on_outgoing_publish(1);
        let queued = register_ok(&tracker);

        tracker.close();

        assert!(matches!(
            inflight.await.unwrap(),
            Err(TransferError::ConnectionClosed)
        ));
        assert!(matches!(
            queued.await.unwrap(),
            Err(TransferError::ConnectionClosed)
        ));
        assert!(tracker.is_closed());
        assert!(matches!(
            tracker.register(|| Ok(())),
            Err(TransferError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_unknown_ack_is_ignored() {
        let tracker = AckTracker::new();
        tracker.on_ack(42);
        assert_eq!(tracker.pending(), 0);
    }
}
