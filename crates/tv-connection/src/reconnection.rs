//! Reconnection after unexpected closes.
//!
//! A close of the current transport schedules one retry timer. When it
//! fires, the retry only proceeds if the manager still wants to be
//! connected and nothing else started a connection in the meantime; both
//! are checked under the state lock in [`WsContext::start_connect`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::manager::{ConnectOrigin, Shared, WsContext, emit};
use crate::types::{ConnectionEvent, Transition};

/// Cancels the pending retry timer, if any.
pub(crate) fn cancel_pending_reconnect(shared: &mut Shared) {
    if let Some(token) = shared.reconnect_cancel.take() {
        token.cancel();
    }
}

/// Moves to `Reconnecting` and arms the retry timer.
///
/// Must be called with the state lock held, right after the current
/// transport was lost.
pub(crate) fn schedule_reconnect(ctx: &Arc<WsContext>, shared: &mut Shared) {
    shared.attempt = shared.attempt.saturating_add(1);
    let attempt = shared.attempt;
    let delay = ctx.config.reconnect.delay_for_attempt(attempt);
    let delay_secs = delay.as_secs_f64();

    if !ctx.transition(shared, Transition::Retry { attempt }) {
        return;
    }
    emit(
        &ctx.events_tx,
        ConnectionEvent::Reconnecting {
            attempt,
            next_retry_secs: delay_secs,
        },
    );
    info!(
        host = %ctx.config.host,
        attempt,
        delay_secs = format_args!("{delay_secs:.1}"),
        "reconnecting"
    );

    let cancel = CancellationToken::new();
    cancel_pending_reconnect(shared);
    shared.reconnect_cancel = Some(cancel.clone());

    tokio::spawn(reconnect_after(Arc::clone(ctx), delay, cancel));
}

/// Waits out the backoff delay, then retries.
///
/// Returns a boxed future to break the recursive type cycle with
/// `start_connect` (whose transport task ends up scheduling this again).
fn reconnect_after(
    ctx: Arc<WsContext>,
    delay: Duration,
    cancel: CancellationToken,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconnect cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        ctx.start_connect(ConnectOrigin::Reconnect).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_pending_reconnect_clears_token() {
        let mut shared = Shared::default();
        let token = CancellationToken::new();
        shared.reconnect_cancel = Some(token.clone());

        cancel_pending_reconnect(&mut shared);

        assert!(shared.reconnect_cancel.is_none());
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_without_pending_is_noop() {
        let mut shared = Shared::default();
        cancel_pending_reconnect(&mut shared);
        assert!(shared.reconnect_cancel.is_none());
    }
}
