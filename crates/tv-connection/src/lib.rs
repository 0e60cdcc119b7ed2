//! Connection manager for a TV's remote-control WebSocket channel.
//!
//! Keeps one authenticated `wss://` connection alive, persists the
//! pairing token the TV issues on first pairing, and republishes every
//! inbound frame to registered subscribers.

mod heartbeat;
pub mod manager;
pub mod pairing;
mod pumps;
pub(crate) mod reconnection;
mod subscribers;
mod tls;
pub mod types;
pub mod ws_client;

pub use manager::ConnectionManager;
pub use pairing::{TokenError, TokenStore};
pub use subscribers::Subscriber;
pub use types::{ConnectionConfig, ConnectionEvent, ConnectionState, ReconnectConfig};
pub use ws_client::{Connector, FrameStream, TlsConnector, WsError};
