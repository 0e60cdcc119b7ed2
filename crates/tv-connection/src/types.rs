//! Public types for the TV connection manager.

use std::path::PathBuf;
use std::time::Duration;

use tvbridge_protocol::constants::{
    DEFAULT_CLIENT_NAME, HEARTBEAT_INTERVAL, RECONNECT_DELAY, RECONNECT_MAX_DELAY,
};

/// Connection settings supplied once at construction.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// TV host name or IP address.
    pub host: String,
    /// Client name shown on the TV.
    pub name: String,
    /// Extra headers attached to the WebSocket upgrade request.
    pub headers: Vec<(String, String)>,
    /// File holding the pairing token. `None` disables token handling.
    pub token_file: Option<PathBuf>,
    /// Silence tolerated before the connection is considered dead.
    pub heartbeat_interval: Duration,
    /// Retry policy after an unexpected close.
    pub reconnect: ReconnectConfig,
}

impl ConnectionConfig {
    /// Creates a configuration for `host` with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            name: DEFAULT_CLIENT_NAME.to_string(),
            headers: Vec::new(),
            token_file: None,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// Transport is being opened.
    Connecting,
    /// Transport open, heartbeat armed.
    Open,
    /// Connection lost or explicitly disconnected.
    Closed,
    /// Connection lost, a retry is scheduled.
    Reconnecting { attempt: u32 },
}

/// Inputs driving [`ConnectionState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// A connect attempt starts.
    Connect,
    /// The transport finished its handshake.
    Opened,
    /// The current transport closed, errored, or timed out.
    Lost,
    /// A retry was scheduled.
    Retry { attempt: u32 },
    /// The caller ended the lifecycle.
    Disconnect,
}

impl ConnectionState {
    /// Applies `input`, returning the next state or `None` if the
    /// transition is not allowed from the current state.
    pub(crate) fn next(self, input: Transition) -> Option<ConnectionState> {
        use ConnectionState::*;
        use Transition as T;

        match (self, input) {
            (_, T::Disconnect) => Some(Closed),
            (Idle | Closed | Reconnecting { .. }, T::Connect) => Some(Connecting),
            (Connecting, T::Opened) => Some(Open),
            (Connecting | Open, T::Lost) => Some(Closed),
            (Closed | Reconnecting { .. }, T::Retry { attempt }) => {
                Some(Reconnecting { attempt })
            }
            _ => None,
        }
    }

    /// Returns `true` while a transport exists or is being opened.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The lifecycle state changed.
    StateChanged(ConnectionState),
    /// A pairing token was received and persisted.
    TokenCaptured,
    /// No inbound traffic within the heartbeat interval.
    HeartbeatExpired,
    /// A retry is scheduled.
    Reconnecting { attempt: u32, next_retry_secs: f64 },
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: RECONNECT_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Retries right after every close, without any delay.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    /// Retries after the same delay every time.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_factor: 1.0,
        }
    }

    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter to avoid synchronized retries.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::try_from_secs_f64(with_jitter).unwrap_or(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_max_delay_does_not_overflow() {
        let config = ReconnectConfig {
            initial_delay: Duration::MAX,
            max_delay: Duration::MAX,
            backoff_factor: 2.0,
        };
        assert!(config.delay_for_attempt(3) > Duration::ZERO);
    }

    #[test]
    fn config_defaults() {
        let config = ConnectionConfig::new("192.168.1.20");
        assert_eq!(config.host, "192.168.1.20");
        assert_eq!(config.name, "TVBridge");
        assert!(config.headers.is_empty());
        assert!(config.token_file.is_none());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(20));
    }

    #[test]
    fn config_builders() {
        let config = ConnectionConfig::new("tv.local")
            .with_name("Living Room")
            .with_header("Origin", "tvbridge")
            .with_token_file("/tmp/token.txt");
        assert_eq!(config.name, "Living Room");
        assert_eq!(config.headers, vec![("Origin".into(), "tvbridge".into())]);
        assert_eq!(config.token_file, Some(PathBuf::from("/tmp/token.txt")));
    }

    #[test]
    fn connect_allowed_from_resting_states() {
        use ConnectionState::*;
        for from in [Idle, Closed, Reconnecting { attempt: 3 }] {
            assert_eq!(from.next(Transition::Connect), Some(Connecting));
        }
        assert_eq!(Connecting.next(Transition::Connect), None);
        assert_eq!(Open.next(Transition::Connect), None);
    }

    #[test]
    fn opened_only_from_connecting() {
        use ConnectionState::*;
        assert_eq!(Connecting.next(Transition::Opened), Some(Open));
        for from in [Idle, Open, Closed, Reconnecting { attempt: 1 }] {
            assert_eq!(from.next(Transition::Opened), None);
        }
    }

    #[test]
    fn lost_only_from_active_states() {
        use ConnectionState::*;
        assert_eq!(Connecting.next(Transition::Lost), Some(Closed));
        assert_eq!(Open.next(Transition::Lost), Some(Closed));
        assert_eq!(Closed.next(Transition::Lost), None);
        assert_eq!(Idle.next(Transition::Lost), None);
    }

    #[test]
    fn retry_requires_closed() {
        use ConnectionState::*;
        assert_eq!(
            Closed.next(Transition::Retry { attempt: 1 }),
            Some(Reconnecting { attempt: 1 })
        );
        assert_eq!(Open.next(Transition::Retry { attempt: 1 }), None);
        assert_eq!(Connecting.next(Transition::Retry { attempt: 1 }), None);
    }

    #[test]
    fn disconnect_always_closes() {
        use ConnectionState::*;
        for from in [Idle, Connecting, Open, Closed, Reconnecting { attempt: 2 }] {
            assert_eq!(from.next(Transition::Disconnect), Some(Closed));
        }
    }

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(5));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!((config.backoff_factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reconnect_config_delay_backoff() {
        let config = ReconnectConfig::default();
        // Base delays: 5s, 10s, 20s, 40s, 60s (capped), 60s...
        let expected_base = [5.0, 10.0, 20.0, 40.0, 60.0, 60.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let delay = config.delay_for_attempt((i + 1) as u32);
            let secs = delay.as_secs_f64();
            let lo = base * 0.74;
            let hi = base * 1.26;
            assert!(
                secs >= lo && secs <= hi,
                "attempt {}: {secs:.3}s not in [{lo:.3}, {hi:.3}]",
                i + 1
            );
        }
    }

    #[test]
    fn immediate_has_no_delay() {
        let config = ReconnectConfig::immediate();
        for attempt in 1..5 {
            assert_eq!(config.delay_for_attempt(attempt), Duration::ZERO);
        }
    }

    #[test]
    fn fixed_does_not_grow() {
        let config = ReconnectConfig::fixed(Duration::from_secs(5));
        let secs = config.delay_for_attempt(10).as_secs_f64();
        assert!((3.7..=6.3).contains(&secs));
    }
}
