//! Connection kernel: drives the rumqttc event loop.
//!
//! The kernel owns the `EventLoop` and is the only task that polls it. It
//! reconnects with exponential backoff on transient failures, stops on
//! fatal ones, publishes [`ConnectionState`] transitions, and forwards
//! publish/ack events to the shared [`AckTracker`].
//!
//! ```text
//! Producer ──try_publish──> AsyncClient ──channel──> EventLoop <──poll── ConnectionKernel
//!     ▲                                                                      │
//!     └──────────────── AckTracker <── Outgoing::Publish / PubAck ───────────┘
//! ```

use std::{sync::Arc, time::Duration};

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{acks::AckTracker, backoff::Backoff, error::TransferError, state::ConnectionState};

/// Upper bound on flushing DISCONNECT during shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    acks: Arc<AckTracker>,
    backoff: Backoff,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    connected: bool,
}

impl ConnectionKernel {
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        acks: Arc<AckTracker>,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            client,
            event_loop,
            acks,
            backoff,
            cancel,
            state_tx,
            connected: false,
        }
    }

    /// Receiver observing every state transition; sees the current state
    /// immediately.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state.clone();
            true
        });

        if changed {
            info!(state = %state, "Connection state changed");
        }
    }

    /// Runs until cancelled, a fatal error, or reconnect exhaustion.
    ///
    /// Whatever the exit path, the ack tracker is closed and the final
    /// state is `Stopped`, so no publish waits forever.
    ///
    /// # Errors
    /// - `ClientConnection` for fatal connection errors (TLS, auth refusal)
    /// - `RetriesPolicy` when `max_reconnect_attempts` is spent
    pub async fn run(mut self) -> Result<(), TransferError> {
        info!("Starting connection event loop");
        self.update_state(ConnectionState::Connecting);

        let result = self.drive().await;

        self.acks.close();
        let reason = match &result {
            Ok(()) => "shutdown".to_string(),
            Err(e) => e.to_string(),
        };
        self.update_state(ConnectionState::Stopped(reason));
        info!("Connection kernel stopped");

        result
    }

    async fn drive(&mut self) -> Result<(), TransferError> {
        loop {
            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, disconnecting");
                    self.disconnect().await;
                    return Ok(());
                }
                polled = self.event_loop.poll() => polled,
            };

            match polled {
                Ok(event) => self.handle_event(event),
                Err(e) => {
                    let reason = root_cause(&e);
                    self.connected = false;
                    self.acks.on_disconnect(&reason);

                    if is_fatal_error(&e) {
                        error!(error = %reason, "Fatal connection error, giving up");
                        return Err(e.into());
                    }

                    self.update_state(ConnectionState::Disconnected(reason.clone()));

                    let sleep = self.backoff.next_sleep().map_err(|backoff_err| {
                        error!(error = %backoff_err, "Reconnect attempts exhausted");
                        TransferError::RetriesPolicy(backoff_err)
                    })?;

                    warn!(
                        error = %reason,
                        attempt = self.backoff.attempt(),
                        "Reconnecting in {:.2} seconds",
                        sleep.as_secs_f64()
                    );
                    self.update_state(ConnectionState::Reconnecting(sleep.as_secs_f64()));

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            info!("Shutdown signal received while waiting to reconnect");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(sleep) => {}
                    }
                    self.update_state(ConnectionState::Connecting);
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(conn_ack)) => {
                if conn_ack.code == ConnectReturnCode::Success {
                    info!(
                        session_present = conn_ack.session_present,
                        "Connection established"
                    );
                    self.connected = true;
                    self.backoff.reset();
                    self.update_state(ConnectionState::Connected);
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => self.acks.on_ack(ack.pkid),
            Event::Incoming(Packet::PubComp(comp)) => self.acks.on_ack(comp.pkid),
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.connected = false;
                self.acks.on_disconnect("disconnected by broker");
                self.update_state(ConnectionState::Disconnected(
                    "Disconnected by broker".into(),
                ));
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => self.acks.on_outgoing_publish(pkid),
            other => trace!(event = ?other, "MQTT event"),
        }
    }

    /// Best effort: queue DISCONNECT and let the event loop flush it.
    async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }

        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "Failed to queue disconnect");
            return;
        }

        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        debug!(error = %e, "Event loop closed during disconnect");
                        break;
                    }
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!("Timed out flushing disconnect");
        }
        self.connected = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    // Unrecoverable, reconnecting makes no sense
    Fatal,
    // Temporary, reconnect attempt is reasonable
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // Invalid certificates or incompatible crypto setup
        ConnectionError::Tls(_) => Fatal,

        // Protocol violation or internal state corruption
        ConnectionError::MqttState(_) => Fatal,
        ConnectionError::NotConnAck(_) => Fatal,

        // Every client handle is gone
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            // Local misconfiguration, not a transient condition
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    matches!(classify_connection_error(err), Disposition::Fatal)
}

/// Innermost message of an error chain, unquoted.
fn root_cause(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::{client::ClientBuilder, config::Config};

    fn unreachable_kernel(
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> (ConnectionKernel, Arc<AckTracker>) {
        // Port 1 on loopback refuses connections.
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 1,
            connection_timeout: 5,
            ..Default::default()
        };
        let (client, event_loop) = ClientBuilder::from_config(&config)
            .and_then(ClientBuilder::build)
            .expect("client");
        let acks = Arc::new(AckTracker::new());
        let kernel = ConnectionKernel::new(client, event_loop, acks.clone(), backoff, cancel);
        (kernel, acks)
    }

    #[test]
    fn test_io_error_classification() {
        let refused = ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(!is_fatal_error(&refused));

        let addr_in_use = ConnectionError::Io(io::Error::new(io::ErrorKind::AddrInUse, "in use"));
        assert!(is_fatal_error(&addr_in_use));

        let denied = ConnectionError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(is_fatal_error(&denied));
    }

    #[test]
    fn test_refusal_classification() {
        assert!(is_fatal_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword
        )));
        assert!(!is_fatal_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable
        )));
        assert!(!is_fatal_error(&ConnectionError::NetworkTimeout));
    }

    #[test]
    fn test_root_cause_unquotes() {
        let err = io::Error::new(io::ErrorKind::Other, "\"broken pipe\"");
        assert_eq!(root_cause(&err), "broken pipe");
    }

    #[tokio::test]
    async fn test_cancelled_kernel_stops_and_closes_acks() {
        let cancel = CancellationToken::new();
        let (kernel, acks) = unreachable_kernel(Backoff::default(), cancel.clone());
        let state_rx = kernel.subscribe_state();

        cancel.cancel();
        assert!(kernel.run().await.is_ok());

        assert!(acks.is_closed());
        assert_eq!(
            *state_rx.borrow(),
            ConnectionState::Stopped("shutdown".into())
        );
    }

    #[tokio::test]
    async fn test_reconnect_exhaustion_stops_kernel() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(10), 1.0)
            .with_max_attempts(1);
        let (kernel, acks) = unreachable_kernel(backoff, CancellationToken::new());
        let state_rx = kernel.subscribe_state();

        let result = tokio::time::timeout(Duration::from_secs(30), kernel.run())
            .await
            .expect("kernel should give up");

        assert!(matches!(result, Err(TransferError::RetriesPolicy(_))));
        assert!(acks.is_closed());
        assert!(state_rx.borrow().is_terminal());
    }
}
