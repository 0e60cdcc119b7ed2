use std::time::Duration;

/// Port of the TV's secure WebSocket API.
pub const TV_REMOTE_PORT: u16 = 8002;

/// Channel path of the remote-control event channel.
pub const REMOTE_CONTROL_PATH: &str = "/api/v2/channels/samsung.remote.control";

/// Client name announced to the TV when none is configured.
///
/// The TV shows this name in its pairing prompt and device list.
pub const DEFAULT_CLIENT_NAME: &str = "TVBridge";

/// Read deadline for inbound traffic.
///
/// Any text/binary message or protocol ping rearms it. If nothing arrives
/// within this window the connection is considered dead and dropped
/// without a close handshake.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Base delay before retrying after an unexpected close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Upper bound for the reconnect backoff.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Maximum inbound message size in bytes (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Event name the TV sends once the channel is joined.
///
/// On first pairing its `data.token` carries the token to persist.
pub const EVENT_CHANNEL_CONNECT: &str = "ms.channel.connect";

/// Event name the TV sends when the user rejects the pairing prompt.
pub const EVENT_CHANNEL_UNAUTHORIZED: &str = "ms.channel.unauthorized";
