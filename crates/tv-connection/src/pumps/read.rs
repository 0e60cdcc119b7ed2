//! WebSocket read pump: heartbeat, token capture, and fan-out.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::heartbeat::Heartbeat;
use crate::manager::emit;
use crate::pairing::{TokenCapture, TokenStore};
use crate::subscribers::SubscriberRegistry;
use crate::types::ConnectionEvent;

/// Why the read pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// The transport was terminated locally.
    Cancelled,
    /// No inbound traffic within the heartbeat interval.
    HeartbeatExpired,
    /// The TV sent a close frame.
    RemoteClosed,
    /// The underlying stream ended.
    StreamEnded,
    /// Reading failed.
    ReadError(String),
    /// The transport never opened.
    OpenFailed(String),
}

/// Per-connection frame handling shared with the manager.
pub(crate) struct FrameDispatch<'a> {
    pub(crate) subscribers: &'a SubscriberRegistry,
    /// Present when a token file is configured.
    pub(crate) capture: Option<(TokenCapture, TokenStore)>,
    pub(crate) events_tx: &'a mpsc::Sender<ConnectionEvent>,
}

impl FrameDispatch<'_> {
    /// Runs the token capture, then delivers the frame to subscribers.
    async fn dispatch(&mut self, frame: &[u8]) {
        if let Some((capture, store)) = self.capture.as_mut()
            && let Some(token) = capture.inspect(frame)
        {
            match store.save(&token).await {
                Ok(()) => {
                    info!(path = %store.path().display(), "pairing token captured");
                    emit(self.events_tx, ConnectionEvent::TokenCaptured);
                }
                Err(e) => warn!("failed to persist pairing token: {e}"),
            }
        }
        self.subscribers.publish(frame);
    }
}

/// Reads frames until the transport closes, fails, goes silent, or is
/// cancelled.
///
/// Text/binary messages and pings rearm the heartbeat; tungstenite queues
/// the pong reply itself. Returning drops `read`, which tears the socket
/// down without a close handshake.
pub(crate) async fn read_pump<S>(
    mut read: S,
    heartbeat_interval: Duration,
    dispatch: &mut FrameDispatch<'_>,
    cancel: &CancellationToken,
) -> CloseReason
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let mut heartbeat = Heartbeat::arm(heartbeat_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return CloseReason::Cancelled,

            () = heartbeat.expired() => {
                warn!(
                    interval_secs = heartbeat_interval.as_secs_f64(),
                    "heartbeat expired, terminating connection"
                );
                return CloseReason::HeartbeatExpired;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        heartbeat.reset();
                        dispatch.dispatch(text.as_bytes()).await;
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        heartbeat.reset();
                        dispatch.dispatch(&data).await;
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        trace!("received ping");
                        heartbeat.reset();
                    }
                    Some(Ok(tungstenite::Message::Pong(_))) => {
                        trace!("received pong");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        debug!(?frame, "received close frame");
                        return CloseReason::RemoteClosed;
                    }
                    Some(Ok(tungstenite::Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        return CloseReason::ReadError(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        return CloseReason::StreamEnded;
                    }
                }
            }
        }
    }
}
