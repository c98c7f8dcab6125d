//! Reliable delivery of sensor events over a [`Connection`].
//!
//! Every accepted event gets its own delivery worker, spawned on a
//! [`TaskTracker`] and holding one slot of the in-flight semaphore until it
//! reaches a terminal outcome. The caller learns that outcome through the
//! [`DeliveryHandle`] returned by [`ReliablePublisher::enqueue`], or directly
//! from [`ReliablePublisher::submit`].
//!
//! Shutdown happens in two steps. Closing stops new submissions and wakes
//! producers waiting for a slot. Abandoning cancels the workers still running,
//! either right away or once the drain deadline passes. The connection is
//! closed after the last worker has finished.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::{
    attempt::DeliveryAttempt,
    connection::{Connection, Offset, Partition},
    error::{DeliveryError, ShutdownError},
    event::{Encoder, SensorEvent},
    retry::RetryPolicy,
};
use crate::config::publisher::PublisherConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub event_id: Uuid,
    pub partition: Partition,
    pub offset: Offset,
    pub attempts: u32,
}

/// Counters are monotonic; `in_flight` is the current number of workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub submitted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub in_flight: usize,
}

/// Resolves to the terminal outcome of one enqueued event.
///
/// Dropping the handle does not cancel delivery.
#[derive(Debug)]
pub struct DeliveryHandle {
    event_id: Uuid,
    rx: oneshot::Receiver<Result<DeliveryReceipt, DeliveryError>>,
}

impl DeliveryHandle {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }
}

impl Future for DeliveryHandle {
    type Output = Result<DeliveryReceipt, DeliveryError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A worker that vanished without reporting can only have been torn down
        // with the runtime.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(DeliveryError::Abandoned { attempts: 0 })))
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

struct Inner {
    connection: Arc<dyn Connection>,
    encoder: Arc<dyn Encoder>,
    topic: String,
    policy: RetryPolicy,
    max_in_flight: usize,
    slots: Arc<Semaphore>,
    workers: TaskTracker,
    /// Set once shutdown begins; rejects submissions.
    closed: CancellationToken,
    /// Set when in-flight workers must give up.
    abandon: CancellationToken,
    /// Serializes the closed check with worker spawning.
    gate: Mutex<()>,
    /// `true` once a shutdown sequence has completed.
    shutdown: tokio::sync::Mutex<bool>,
    counters: Counters,
}

#[derive(Clone)]
pub struct ReliablePublisher {
    inner: Arc<Inner>,
}

impl ReliablePublisher {
    pub fn new(
        connection: Arc<dyn Connection>,
        encoder: Arc<dyn Encoder>,
        config: &PublisherConfig,
    ) -> Self {
        let max_in_flight = config.max_in_flight.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            inner: Arc::new(Inner {
                connection,
                encoder,
                topic: config.topic.clone(),
                policy: RetryPolicy::from(&config.retry),
                max_in_flight,
                slots: Arc::new(Semaphore::new(max_in_flight)),
                workers: TaskTracker::new(),
                closed: CancellationToken::new(),
                abandon: CancellationToken::new(),
                gate: Mutex::new(()),
                shutdown: tokio::sync::Mutex::new(false),
                counters: Counters::default(),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub fn stats(&self) -> PublisherStats {
        let c = &self.inner.counters;
        PublisherStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            in_flight: self.inner.max_in_flight - self.inner.slots.available_permits(),
        }
    }

    /// Delivers `event` and waits for its terminal outcome.
    pub async fn submit(&self, event: SensorEvent) -> Result<DeliveryReceipt, DeliveryError> {
        self.enqueue(event).await?.await
    }

    /// Starts delivery of `event` once an in-flight slot is free.
    ///
    /// Suspends while `max_in_flight` deliveries are running. Returns
    /// [`DeliveryError::Closed`] if the publisher is, or becomes, closed
    /// before a slot is obtained. Cancel safe: dropping the future before it
    /// completes leaves the event unsubmitted.
    pub async fn enqueue(&self, event: SensorEvent) -> Result<DeliveryHandle, DeliveryError> {
        let inner = &self.inner;
        if inner.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }

        let (key, value) = match inner.encoder.encode(&event) {
            Ok(encoded) => encoded,
            Err(e) => {
                inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(event_id = %event.id, error = %e, "Event could not be encoded");
                return Err(e.into());
            }
        };

        let permit = tokio::select! {
            biased;
            _ = inner.closed.cancelled() => return Err(DeliveryError::Closed),
            permit = inner.slots.clone().acquire_owned() => {
                permit.map_err(|_| DeliveryError::Closed)?
            }
        };

        let (tx, rx) = oneshot::channel();
        {
            let _gate = inner.gate.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.closed.is_cancelled() {
                return Err(DeliveryError::Closed);
            }

            inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
            let worker = Arc::clone(inner);
            let event_id = event.id;
            inner.workers.spawn(
                async move {
                    let outcome = worker.deliver(event_id, key, value).await;
                    drop(permit);
                    let _ = tx.send(outcome);
                }
                .in_current_span(),
            );
        }

        debug!(event_id = %event.id, "Event enqueued");
        Ok(DeliveryHandle {
            event_id: event.id,
            rx,
        })
    }

    /// Stops accepting events and releases the connection.
    ///
    /// With `drain`, in-flight deliveries get up to `timeout` to finish; any
    /// still running at the deadline are abandoned and reported through
    /// [`ShutdownError::Timeout`]. Without it they are abandoned at once.
    /// Repeated or concurrent calls are serialized and only the first one
    /// does any work.
    pub async fn shutdown(&self, drain: bool, timeout: Duration) -> Result<(), ShutdownError> {
        let inner = &self.inner;
        let mut done = inner.shutdown.lock().await;
        if *done {
            debug!("Publisher already shut down");
            return Ok(());
        }

        {
            let _gate = inner.gate.lock().unwrap_or_else(PoisonError::into_inner);
            inner.closed.cancel();
            inner.workers.close();
        }

        let in_flight = inner.workers.len();
        info!(drain, in_flight, "Publisher shutting down");

        let result = if drain {
            match tokio::time::timeout(timeout, inner.workers.wait()).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    let before = inner.counters.abandoned.load(Ordering::Relaxed);
                    inner.abandon.cancel();
                    inner.workers.wait().await;
                    let abandoned = inner.counters.abandoned.load(Ordering::Relaxed) - before;
                    warn!(abandoned, ?timeout, "Drain deadline passed");
                    Err(ShutdownError::Timeout {
                        abandoned: abandoned as usize,
                    })
                }
            }
        } else {
            inner.abandon.cancel();
            inner.workers.wait().await;
            Ok(())
        };

        inner.connection.close().await;
        *done = true;

        let stats = self.stats();
        info!(
            submitted = stats.submitted,
            delivered = stats.delivered,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "Publisher stopped"
        );
        result
    }
}

impl Inner {
    async fn deliver(
        &self,
        event_id: Uuid,
        key: String,
        value: Bytes,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let mut attempt = DeliveryAttempt::new(event_id);

        loop {
            attempt.begin();
            let sent = tokio::select! {
                biased;
                _ = self.abandon.cancelled() => None,
                sent = self.connection.send(&self.topic, &key, value.clone()) => Some(sent),
            };

            let err = match sent {
                None => return Err(self.abandoned(&mut attempt)),
                Some(Ok((partition, offset))) => {
                    attempt.delivered();
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    info!(
                        %event_id,
                        partition,
                        offset,
                        attempts = attempt.attempts,
                        "Event delivered"
                    );
                    return Ok(DeliveryReceipt {
                        event_id,
                        partition,
                        offset,
                        attempts: attempt.attempts,
                    });
                }
                Some(Err(err)) => err,
            };

            if !err.is_transient() || !self.policy.should_retry(attempt.attempts) {
                let attempts = attempt.attempts;
                attempt.failed(err.clone());
                self.counters.failed.fetch_add(1, Ordering::Relaxed);

                let failure = if err.is_transient() {
                    DeliveryError::RetriesExhausted {
                        attempts,
                        last: err,
                    }
                } else {
                    DeliveryError::Permanent {
                        attempts,
                        source: err,
                    }
                };
                error!(%event_id, error = %failure, "Event delivery failed");
                return Err(failure);
            }

            let delay = self.policy.delay(attempt.attempts);
            warn!(
                %event_id,
                attempts = attempt.attempts,
                ?delay,
                error = %err,
                "Transient delivery failure, retrying"
            );
            attempt.retry_in(err, delay);

            tokio::select! {
                biased;
                _ = self.abandon.cancelled() => return Err(self.abandoned(&mut attempt)),
                _ = tokio::time::sleep(delay) => attempt.resume(),
            }
        }
    }

    fn abandoned(&self, attempt: &mut DeliveryAttempt) -> DeliveryError {
        attempt.abandon();
        self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
        warn!(
            event_id = %attempt.event_id,
            attempts = attempt.attempts,
            "Delivery abandoned on shutdown"
        );
        DeliveryError::Abandoned {
            attempts: attempt.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicU32, AtomicUsize},
    };

    use async_trait::async_trait;
    use tokio::time::{sleep, timeout};
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        config::publisher::RetryConfig,
        core::{
            connection::ConnectionError,
            event::{EncodeError, JsonEncoder},
            source::reading,
        },
    };

    enum Behavior {
        Succeed,
        /// Fails each key this many times with a timeout, then succeeds.
        FlakyPerKey(u32),
        AlwaysTransient,
        Permanent,
        /// Each send waits for one permit.
        Gated(Arc<Semaphore>),
        Hang,
    }

    struct MockConnection {
        behavior: Behavior,
        sends: AtomicU32,
        closes: AtomicUsize,
        offset: AtomicU64,
        failures: Mutex<HashMap<String, u32>>,
    }

    impl MockConnection {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                sends: AtomicU32::new(0),
                closes: AtomicUsize::new(0),
                offset: AtomicU64::new(0),
                failures: Mutex::new(HashMap::new()),
            })
        }

        fn ack(&self) -> Result<(Partition, Offset), ConnectionError> {
            Ok((0, self.offset.fetch_add(1, Ordering::SeqCst)))
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn send(
            &self,
            _topic: &str,
            key: &str,
            _value: Bytes,
        ) -> Result<(Partition, Offset), ConnectionError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => self.ack(),
                Behavior::FlakyPerKey(k) => {
                    let failed = {
                        let mut failures = self.failures.lock().unwrap();
                        let count = failures.entry(key.to_string()).or_default();
                        *count += 1;
                        *count <= *k
                    };
                    if failed {
                        Err(ConnectionError::Timeout("no ack".into()))
                    } else {
                        self.ack()
                    }
                }
                Behavior::AlwaysTransient => Err(ConnectionError::Network("reset".into())),
                Behavior::Permanent => Err(ConnectionError::Rejected("too large".into())),
                Behavior::Gated(gate) => {
                    gate.acquire().await.unwrap().forget();
                    self.ack()
                }
                Behavior::Hang => std::future::pending().await,
            }
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct BrokenEncoder;

    impl Encoder for BrokenEncoder {
        fn encode(&self, _event: &SensorEvent) -> Result<(String, Bytes), EncodeError> {
            Err(EncodeError::Json(<serde_json::Error as serde::ser::Error>::custom(
                "boom",
            )))
        }
    }

    fn config(max_in_flight: usize) -> PublisherConfig {
        PublisherConfig {
            max_in_flight,
            retry: RetryConfig {
                max_attempts: 5,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                jitter_ms: 10,
            },
            ..Default::default()
        }
    }

    fn publisher(connection: &Arc<MockConnection>, max_in_flight: usize) -> ReliablePublisher {
        ReliablePublisher::new(
            connection.clone(),
            Arc::new(JsonEncoder),
            &config(max_in_flight),
        )
    }

    fn event() -> SensorEvent {
        reading(&mut rand::rng())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_all_delivered() {
        let connection = MockConnection::new(Behavior::Succeed);
        let publisher = publisher(&connection, 4);

        let handles = {
            let mut handles = Vec::new();
            for _ in 0..10 {
                handles.push(publisher.enqueue(event()).await.unwrap());
            }
            handles
        };

        let mut offsets = Vec::new();
        for handle in handles {
            let id = handle.event_id();
            let receipt = handle.await.unwrap();
            assert_eq!(receipt.event_id, id);
            assert_eq!(receipt.attempts, 1);
            offsets.push(receipt.offset);
        }
        offsets.sort_unstable();
        assert_eq!(offsets, (0..10).collect::<Vec<_>>());

        let stats = publisher.stats();
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.delivered, 10);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.in_flight, 0);
        assert!(logs_contain("Event delivered"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let connection = MockConnection::new(Behavior::FlakyPerKey(2));
        let publisher = publisher(&connection, 10);

        for _ in 0..3 {
            let receipt = publisher.submit(event()).await.unwrap();
            assert_eq!(receipt.attempts, 3);
        }

        let stats = publisher.stats();
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(connection.sends.load(Ordering::SeqCst), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_backoff() {
        let connection = MockConnection::new(Behavior::FlakyPerKey(2));
        let publisher = publisher(&connection, 1);
        let start = tokio::time::Instant::now();

        publisher.submit(event()).await.unwrap();

        // 100ms + 200ms of backoff, each with up to 10ms of jitter.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(320), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_retries_exhausted() {
        let connection = MockConnection::new(Behavior::AlwaysTransient);
        let publisher = publisher(&connection, 10);

        let err = publisher.submit(event()).await.unwrap_err();
        match err {
            DeliveryError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert_eq!(last, ConnectionError::Network("reset".into()));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(connection.sends.load(Ordering::SeqCst), 5);
        assert_eq!(publisher.stats().failed, 1);
        assert!(logs_contain("Transient delivery failure, retrying"));
        assert!(logs_contain("Event delivery failed"));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let connection = MockConnection::new(Behavior::Permanent);
        let publisher = publisher(&connection, 10);

        let err = publisher.submit(event()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent { attempts: 1, .. }));
        assert_eq!(connection.sends.load(Ordering::SeqCst), 1);

        // The publisher keeps going after a failure.
        assert!(!publisher.is_closed());
        assert!(publisher.submit(event()).await.is_err());
        assert_eq!(publisher.stats().failed, 2);
    }

    #[tokio::test]
    async fn test_encode_failure_counts_as_failed() {
        let connection = MockConnection::new(Behavior::Succeed);
        let publisher =
            ReliablePublisher::new(connection.clone(), Arc::new(BrokenEncoder), &config(1));

        let err = publisher.submit(event()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Encode(_)));
        assert_eq!(connection.sends.load(Ordering::SeqCst), 0);

        let stats = publisher.stats();
        assert_eq!((stats.submitted, stats.failed), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_suspends_until_slot_frees() {
        let gate = Arc::new(Semaphore::new(0));
        let connection = MockConnection::new(Behavior::Gated(gate.clone()));
        let publisher = publisher(&connection, 2);

        let first = publisher.enqueue(event()).await.unwrap();
        let second = publisher.enqueue(event()).await.unwrap();
        assert_eq!(publisher.stats().in_flight, 2);

        assert!(timeout(Duration::from_millis(100), publisher.enqueue(event()))
            .await
            .is_err());

        let third = tokio::spawn({
            let publisher = publisher.clone();
            async move { publisher.enqueue(event()).await }
        });
        sleep(Duration::from_millis(50)).await;
        assert!(!third.is_finished());

        gate.add_permits(1);
        let third = third.await.unwrap().unwrap();

        gate.add_permits(2);
        for handle in [first, second, third] {
            handle.await.unwrap();
        }
        assert_eq!(publisher.stats().delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_producer_woken_by_shutdown() {
        let connection = MockConnection::new(Behavior::Hang);
        let publisher = publisher(&connection, 1);

        let _held = publisher.enqueue(event()).await.unwrap();
        let waiting = tokio::spawn({
            let publisher = publisher.clone();
            async move { publisher.enqueue(event()).await }
        });
        sleep(Duration::from_millis(10)).await;

        publisher.shutdown(false, Duration::ZERO).await.unwrap();
        assert!(matches!(
            waiting.await.unwrap(),
            Err(DeliveryError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let connection = MockConnection::new(Behavior::Gated(gate.clone()));
        let publisher = publisher(&connection, 10);

        let mut handles = Vec::new();
        for _ in 0..3 {
            handles.push(publisher.enqueue(event()).await.unwrap());
        }

        let shutdown = tokio::spawn({
            let publisher = publisher.clone();
            async move { publisher.shutdown(true, Duration::from_secs(10)).await }
        });
        sleep(Duration::from_millis(10)).await;
        assert!(publisher.is_closed());
        assert!(!shutdown.is_finished());

        gate.add_permits(3);
        shutdown.await.unwrap().unwrap();

        assert_eq!(publisher.stats().in_flight, 0);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(publisher.stats().delivered, 3);
        assert_eq!(connection.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_no_drain_abandons_in_flight() {
        let connection = MockConnection::new(Behavior::Hang);
        let publisher = publisher(&connection, 10);

        let mut handles = Vec::new();
        for _ in 0..3 {
            handles.push(publisher.enqueue(event()).await.unwrap());
        }
        tokio::task::yield_now().await;

        publisher.shutdown(false, Duration::from_secs(10)).await.unwrap();

        for handle in handles {
            assert!(matches!(
                handle.await,
                Err(DeliveryError::Abandoned { attempts: 1 })
            ));
        }
        let stats = publisher.stats();
        assert_eq!(stats.abandoned, 3);
        assert_eq!(stats.in_flight, 0);
        assert!(logs_contain("Delivery abandoned on shutdown"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_abandons_remaining() {
        let connection = MockConnection::new(Behavior::Hang);
        let publisher = publisher(&connection, 10);

        let first = publisher.enqueue(event()).await.unwrap();
        let second = publisher.enqueue(event()).await.unwrap();

        let result = publisher.shutdown(true, Duration::from_secs(1)).await;
        assert_eq!(result, Err(ShutdownError::Timeout { abandoned: 2 }));

        assert!(matches!(first.await, Err(DeliveryError::Abandoned { .. })));
        assert!(matches!(second.await, Err(DeliveryError::Abandoned { .. })));
        assert_eq!(connection.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_interrupts_backoff() {
        let connection = MockConnection::new(Behavior::AlwaysTransient);
        let publisher = ReliablePublisher::new(
            connection.clone(),
            Arc::new(JsonEncoder),
            &PublisherConfig {
                retry: RetryConfig {
                    max_attempts: 5,
                    base_delay_ms: 60_000,
                    max_delay_ms: 60_000,
                    jitter_ms: 0,
                },
                ..Default::default()
            },
        );

        let handle = publisher.enqueue(event()).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        let start = tokio::time::Instant::now();
        publisher.shutdown(false, Duration::ZERO).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            handle.await,
            Err(DeliveryError::Abandoned { attempts: 1 })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_idempotent() {
        let connection = MockConnection::new(Behavior::Succeed);
        let publisher = publisher(&connection, 10);
        publisher.submit(event()).await.unwrap();

        let (a, b) = tokio::join!(
            publisher.shutdown(true, Duration::from_secs(1)),
            publisher.shutdown(false, Duration::from_secs(1)),
        );
        assert_eq!(a, Ok(()));
        assert_eq!(b, Ok(()));
        assert_eq!(
            publisher.shutdown(true, Duration::from_secs(1)).await,
            Ok(())
        );
        assert_eq!(connection.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_closed() {
        let connection = MockConnection::new(Behavior::Succeed);
        let publisher = publisher(&connection, 10);
        publisher.shutdown(true, Duration::from_secs(1)).await.unwrap();

        assert!(publisher.is_closed());
        assert!(matches!(
            publisher.submit(event()).await,
            Err(DeliveryError::Closed)
        ));
        assert!(matches!(
            publisher.enqueue(event()).await,
            Err(DeliveryError::Closed)
        ));
        assert_eq!(publisher.stats().submitted, 0);
        assert_eq!(connection.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_max_in_flight_is_clamped() {
        let connection = MockConnection::new(Behavior::Succeed);
        let publisher = publisher(&connection, usize::MAX);

        let receipt = publisher.submit(event()).await.unwrap();
        assert_eq!(receipt.attempts, 1);

        let stats = publisher.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.in_flight, 0);
    }
}
