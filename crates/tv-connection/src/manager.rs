//! Connection manager owning the TV transport lifecycle.
//!
//! Opens the authenticated transport, watches it with the heartbeat,
//! captures the pairing token, fans frames out to subscribers, and
//! reconnects with backoff after unexpected closes.

use std::sync::{Arc, MutexGuard};

use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::pairing::{TokenCapture, TokenStore};
use crate::pumps::read::{CloseReason, FrameDispatch, read_pump};
use crate::reconnection::{cancel_pending_reconnect, schedule_reconnect};
use crate::subscribers::{Subscriber, SubscriberRegistry};
use crate::types::{ConnectionConfig, ConnectionEvent, ConnectionState, Transition};
use crate::ws_client::{Connector, TlsConnector, WsError, build_request};

/// Who asked for a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectOrigin {
    /// The caller, via [`ConnectionManager::connect`].
    Caller,
    /// A retry timer after an unexpected close.
    Reconnect,
}

/// Handle to the current transport task.
#[derive(Debug)]
pub(crate) struct TransportHandle {
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
}

/// Mutable connection state, guarded by [`WsContext::shared`].
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: ConnectionState,
    /// Set on every successful open, cleared by `disconnect`.
    pub(crate) should_reconnect: bool,
    /// Consecutive retries since the last successful open.
    pub(crate) attempt: u32,
    /// Incremented for every transport; stale tasks compare against it.
    pub(crate) generation: u64,
    pub(crate) transport: Option<TransportHandle>,
    pub(crate) reconnect_cancel: Option<CancellationToken>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            should_reconnect: false,
            attempt: 0,
            generation: 0,
            transport: None,
            reconnect_cancel: None,
        }
    }
}

impl Shared {
    /// Returns `true` if `generation` is the transport currently owned.
    fn is_current(&self, generation: u64) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|t| t.generation == generation)
    }
}

/// State shared between the manager, transport tasks, and retry timers.
pub(crate) struct WsContext {
    pub(crate) config: ConnectionConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) token_store: Option<TokenStore>,
    pub(crate) subscribers: SubscriberRegistry,
    pub(crate) shared: std::sync::Mutex<Shared>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
}

/// Sends an event without waiting; dropped if nobody keeps up.
pub(crate) fn emit(events_tx: &mpsc::Sender<ConnectionEvent>, event: ConnectionEvent) {
    if let Err(e) = events_tx.try_send(event) {
        trace!("dropping connection event: {e}");
    }
}

impl WsContext {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `input` to the state machine and emits the change.
    ///
    /// Returns `false` if the transition is not allowed.
    pub(crate) fn transition(&self, shared: &mut Shared, input: Transition) -> bool {
        let Some(next) = shared.state.next(input) else {
            debug!(state = ?shared.state, ?input, "transition rejected");
            return false;
        };
        if next != shared.state {
            shared.state = next;
            emit(&self.events_tx, ConnectionEvent::StateChanged(next));
        }
        true
    }

    /// Starts a connection attempt unless one is open or opening.
    pub(crate) async fn start_connect(self: &Arc<Self>, origin: ConnectOrigin) -> bool {
        let (generation, cancel) = {
            let mut shared = self.lock();
            if shared.state.is_active() {
                debug!(state = ?shared.state, "connect ignored, transport already active");
                return true;
            }
            if origin == ConnectOrigin::Reconnect
                && (!shared.should_reconnect
                    || !matches!(shared.state, ConnectionState::Reconnecting { .. }))
            {
                debug!(state = ?shared.state, "retry abandoned");
                return false;
            }

            cancel_pending_reconnect(&mut shared);
            if let Some(stale) = shared.transport.take() {
                debug!(generation = stale.generation, "terminating stale transport");
                stale.cancel.cancel();
            }
            if !self.transition(&mut shared, Transition::Connect) {
                return false;
            }

            shared.generation += 1;
            let cancel = CancellationToken::new();
            shared.transport = Some(TransportHandle {
                generation: shared.generation,
                cancel: cancel.clone(),
            });
            (shared.generation, cancel)
        };

        let token = self.read_token().await;
        let request = match build_request(&self.config, &token) {
            Ok(r) => r,
            Err(e) => {
                warn!(host = %self.config.host, "cannot build connect request: {e}");
                self.on_transport_closed(generation, CloseReason::OpenFailed(e.to_string()));
                return false;
            }
        };

        tokio::spawn(Arc::clone(self).run_transport(generation, request, cancel));
        true
    }

    /// Reads the pairing token; any failure yields an empty token.
    async fn read_token(&self) -> String {
        let Some(store) = &self.token_store else {
            return String::new();
        };
        match store.load().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(path = %store.path().display(), "no pairing token yet");
                String::new()
            }
            Err(e) => {
                warn!("failed to read pairing token: {e}");
                String::new()
            }
        }
    }

    /// Opens the transport and pumps it until it closes.
    async fn run_transport(
        self: Arc<Self>,
        generation: u64,
        request: Request,
        cancel: CancellationToken,
    ) {
        info!(host = %self.config.host, generation, "connecting to TV");

        let opened = tokio::select! {
            _ = cancel.cancelled() => Err(CloseReason::Cancelled),
            result = self.connector.open(request) => result.map_err(|e: WsError| {
                warn!(host = %self.config.host, error = %e, "failed to open transport");
                CloseReason::OpenFailed(e.to_string())
            }),
        };

        let reason = match opened {
            Ok(stream) => {
                if self.on_open(generation) {
                    let mut dispatch = FrameDispatch {
                        subscribers: &self.subscribers,
                        capture: self
                            .token_store
                            .clone()
                            .map(|store| (TokenCapture::new(), store)),
                        events_tx: &self.events_tx,
                    };
                    let reason = read_pump(
                        stream,
                        self.config.heartbeat_interval,
                        &mut dispatch,
                        &cancel,
                    )
                    .await;
                    if reason == CloseReason::HeartbeatExpired {
                        emit(&self.events_tx, ConnectionEvent::HeartbeatExpired);
                    }
                    reason
                } else {
                    CloseReason::Cancelled
                }
            }
            Err(reason) => reason,
        };

        self.on_transport_closed(generation, reason);
    }

    /// Handles a completed handshake. Returns `false` for a stale transport.
    fn on_open(&self, generation: u64) -> bool {
        let mut shared = self.lock();
        if !shared.is_current(generation) {
            debug!(generation, "stale transport opened, dropping");
            return false;
        }
        if !self.transition(&mut shared, Transition::Opened) {
            return false;
        }
        shared.should_reconnect = true;
        shared.attempt = 0;
        info!(host = %self.config.host, generation, "connected to TV");
        true
    }

    /// Stops retries and drops the transport, ending in `Closed`.
    ///
    /// Returns `true` if a transport or a pending retry was torn down.
    pub(crate) fn shut_down(&self) -> bool {
        let mut shared = self.lock();
        shared.should_reconnect = false;
        let had_retry = shared.reconnect_cancel.is_some();
        cancel_pending_reconnect(&mut shared);
        let had_transport = match shared.transport.take() {
            Some(transport) => {
                transport.cancel.cancel();
                true
            }
            None => false,
        };
        self.transition(&mut shared, Transition::Disconnect);
        had_transport || had_retry
    }

    /// Handles the end of a transport, scheduling a retry if wanted.
    fn on_transport_closed(self: &Arc<Self>, generation: u64, reason: CloseReason) {
        let mut shared = self.lock();
        if !shared.is_current(generation) {
            debug!(generation, ?reason, "stale transport closed");
            return;
        }
        shared.transport = None;
        self.transition(&mut shared, Transition::Lost);

        match &reason {
            CloseReason::OpenFailed(_) | CloseReason::ReadError(_) => {
                warn!(host = %self.config.host, ?reason, "connection lost");
            }
            _ => info!(host = %self.config.host, ?reason, "connection closed"),
        }

        if shared.should_reconnect {
            schedule_reconnect(self, &mut shared);
        }
    }
}

/// Connection manager for the TV remote-control channel.
pub struct ConnectionManager {
    ctx: Arc<WsContext>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl ConnectionManager {
    /// Creates a manager using the TLS transport.
    pub fn new(config: ConnectionConfig) -> Result<Self, WsError> {
        Ok(Self::with_connector(config, Arc::new(TlsConnector::new()?)))
    }

    /// Creates a manager opening transports through `connector`.
    pub fn with_connector(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let token_store = config.token_file.clone().map(TokenStore::new);

        Self {
            ctx: Arc::new(WsContext {
                config,
                connector,
                token_store,
                subscribers: SubscriberRegistry::default(),
                shared: std::sync::Mutex::new(Shared::default()),
                events_tx,
            }),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events are sent without waiting on a bounded channel of 64; a reader
    /// that falls behind loses events. Treat them as notifications and read
    /// [`state`](Self::state) for the authoritative status.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.ctx.config
    }

    /// Starts connecting.
    ///
    /// Returns once the attempt is initiated, not once the TV answered;
    /// watch [`is_connected`](Self::is_connected) or the events for that.
    /// Calling it while a transport is open or opening is a no-op that
    /// returns `true`. Returns `false` only if no request could be built.
    pub async fn connect(&self) -> bool {
        self.ctx.start_connect(ConnectOrigin::Caller).await
    }

    /// Ends the lifecycle: no further retries, transport dropped at once.
    ///
    /// Safe to call at any time. A later [`connect`](Self::connect) starts
    /// a fresh lifecycle.
    pub fn disconnect(&self) {
        if self.ctx.shut_down() {
            info!(host = %self.ctx.config.host, "disconnected from TV");
        }
    }

    /// Registers a frame subscriber. Returns `false` if that same `Arc`
    /// was already registered.
    pub fn add_subscriber(&self, subscriber: Subscriber) -> bool {
        self.ctx.subscribers.add(subscriber)
    }

    /// Removes all subscribers.
    pub fn clear_subscribers(&self) {
        self.ctx.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.ctx.subscribers.len()
    }

    /// Returns `true` while the transport is open.
    pub fn is_connected(&self) -> bool {
        self.ctx.lock().state == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.lock().state
    }

    /// Returns `true` if an unexpected close would trigger a retry.
    pub fn reconnect_enabled(&self) -> bool {
        self.ctx.lock().should_reconnect
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
