//! Application orchestrator: wires the connection manager to stdout.

use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Sleep;
use tvbridge_protocol::ChannelEvent;
use tvbridge_tv_connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, ReconnectConfig, Subscriber,
};

use crate::config::Config;

/// Floor for first-connect retries, even with zero-delay reconnects.
const MIN_INITIAL_RETRY: Duration = Duration::from_secs(1);

/// How often the main loop rechecks the manager state.
const STATE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Runs the bridge until shutdown is requested.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let conn_config = config.connection_config();
    let reconnect = conn_config.reconnect.clone();

    let manager = ConnectionManager::new(conn_config)?;
    let mut events = manager
        .take_events()
        .await
        .ok_or_else(|| anyhow::anyhow!("connection events already taken"))?;

    // -- Frames to stdout, one per line --
    let stdout_sub: Subscriber = Arc::new(|frame: &[u8]| {
        if ChannelEvent::parse(frame).is_ok_and(|ev| ev.is_unauthorized()) {
            tracing::warn!("TV rejected pairing; accept the prompt on the TV and restart");
        }
        if let Err(e) = write_line(frame) {
            tracing::warn!("failed to write frame to stdout: {e}");
        }
    });
    manager.add_subscriber(stdout_sub);

    if !manager.connect().await {
        anyhow::bail!("cannot connect to {}", config.host);
    }

    // The manager only retries once a connection has opened; until then
    // the bridge retries the first connect itself. The periodic check
    // covers `Closed` events dropped from a full event channel.
    let mut first_connect = FirstConnectRetry::new(reconnect);
    let mut state_check = tokio::time::interval(STATE_CHECK_INTERVAL);
    state_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // -- Main loop: wait for shutdown --
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }

            () = first_connect.fired() => {
                tracing::info!(attempt = first_connect.failures, "retrying initial connect");
                manager.connect().await;
            }

            _ = state_check.tick() => {}

            event = events.recv() => {
                let Some(event) = event else {
                    tracing::warn!("connection event stream ended");
                    break;
                };
                match event {
                    ConnectionEvent::StateChanged(ConnectionState::Open) => {
                        first_connect.reset();
                        tracing::info!(host = %config.host, "TV connected");
                    }
                    ConnectionEvent::StateChanged(state) => {
                        tracing::debug!(?state, "connection state changed");
                    }
                    ConnectionEvent::TokenCaptured => {
                        tracing::info!("TV accepted pairing, token saved");
                    }
                    ConnectionEvent::HeartbeatExpired => {
                        tracing::warn!("TV went silent");
                    }
                    ConnectionEvent::Reconnecting { attempt, next_retry_secs } => {
                        tracing::info!(attempt, next_retry_secs, "reconnect scheduled");
                    }
                }
            }
        }

        if needs_first_connect_retry(manager.state(), manager.reconnect_enabled())
            && let Some(delay) = first_connect.arm()
        {
            tracing::warn!(
                attempt = first_connect.failures,
                delay_secs = delay.as_secs_f64(),
                "TV not reachable, will retry"
            );
        }
    }

    // -- Graceful shutdown --
    tracing::info!("stopping connection...");
    manager.disconnect();

    Ok(())
}

fn write_line(frame: &[u8]) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(frame)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// `true` when the manager gave up without ever opening, so nothing but
/// the bridge will try again.
fn needs_first_connect_retry(state: ConnectionState, reconnect_enabled: bool) -> bool {
    state == ConnectionState::Closed && !reconnect_enabled
}

/// Backoff timer for connects that fail before the first open.
struct FirstConnectRetry {
    reconnect: ReconnectConfig,
    failures: u32,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl FirstConnectRetry {
    fn new(reconnect: ReconnectConfig) -> Self {
        Self {
            reconnect,
            failures: 0,
            sleep: None,
        }
    }

    /// Arms the timer unless it is already running. Returns the delay when
    /// newly armed.
    fn arm(&mut self) -> Option<Duration> {
        if self.sleep.is_some() {
            return None;
        }
        self.failures = self.failures.saturating_add(1);
        let delay = self
            .reconnect
            .delay_for_attempt(self.failures)
            .max(MIN_INITIAL_RETRY);
        self.sleep = Some(Box::pin(tokio::time::sleep(delay)));
        Some(delay)
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.sleep = None;
    }

    /// Completes when the armed timer fires; pending while disarmed.
    async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => sleep.await,
            None => std::future::pending().await,
        }
        self.sleep = None;
    }
}
