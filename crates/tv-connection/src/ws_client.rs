//! Secure WebSocket transport to the TV's remote-control channel.
//!
//! Builds the authenticated connect request and opens the transport
//! through a [`Connector`], so the manager never touches sockets directly.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

use tvbridge_protocol::constants::{MAX_MESSAGE_SIZE, REMOTE_CONTROL_PATH, TV_REMOTE_PORT};

use crate::types::ConnectionConfig;

/// Characters left unescaped in query values (same set as JavaScript's
/// `encodeURIComponent`).
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Errors from the WebSocket transport.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid header {0:?}")]
    InvalidHeader(String),
}

/// Inbound frames of an open transport.
///
/// Dropping the stream tears the connection down without a close handshake.
pub type FrameStream = BoxStream<'static, Result<tungstenite::Message, tungstenite::Error>>;

/// Opens transports for connect requests.
pub trait Connector: Send + Sync + 'static {
    /// Performs the TLS and WebSocket handshakes for `request`.
    fn open(&self, request: Request) -> BoxFuture<'static, Result<FrameStream, WsError>>;
}

/// Production connector: `wss://` over rustls, certificate checks disabled.
pub struct TlsConnector {
    tls: Arc<rustls::ClientConfig>,
}

impl TlsConnector {
    pub fn new() -> Result<Self, WsError> {
        Ok(Self {
            tls: crate::tls::insecure_client_config()?,
        })
    }
}

impl Connector for TlsConnector {
    fn open(&self, request: Request) -> BoxFuture<'static, Result<FrameStream, WsError>> {
        let tls = self.tls.clone();
        Box::pin(async move {
            let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
            ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);
            ws_config.max_frame_size = Some(MAX_MESSAGE_SIZE);
            let (ws_stream, _) = tokio_tungstenite::connect_async_tls_with_config(
                request,
                Some(ws_config),
                false,
                Some(tokio_tungstenite::Connector::Rustls(tls)),
            )
            .await?;
            Ok(ws_stream.boxed())
        })
    }
}

/// Returns the channel URL for `host`, announcing `name` and `token`.
pub fn connect_url(host: &str, name: &str, token: &str) -> String {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    format!(
        "wss://{host}:{TV_REMOTE_PORT}{REMOTE_CONTROL_PATH}?name={}&token={}",
        utf8_percent_encode(name, QUERY_VALUE),
        utf8_percent_encode(token, QUERY_VALUE),
    )
}

/// Builds the upgrade request, attaching the configured extra headers.
pub fn build_request(config: &ConnectionConfig, token: &str) -> Result<Request, WsError> {
    let url = connect_url(&config.host, &config.name, token);
    let mut request = url.into_client_request()?;
    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| WsError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| WsError::InvalidHeader(name.clone()))?;
        request.headers_mut().append(header_name, header_value);
    }
    Ok(request)
}

/// Extracts a query parameter from a request URI.
#[cfg(test)]
pub(crate) fn query_param(request: &Request, key: &str) -> Option<String> {
    request.uri().query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| {
            percent_encoding::percent_decode_str(v)
                .decode_utf8_lossy()
                .into_owned()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_error_display() {
        let err = WsError::InvalidHeader("bad header".into());
        assert_eq!(err.to_string(), "invalid header \"bad header\"");
    }

    #[test]
    fn url_contains_port_path_and_params() {
        let url = connect_url("192.168.1.20", "TVBridge", "abc123");
        assert_eq!(
            url,
            "wss://192.168.1.20:8002/api/v2/channels/samsung.remote.control?name=TVBridge&token=abc123"
        );
    }

    #[test]
    fn url_encodes_name() {
        let url = connect_url("tv.local", "Living Room & Co", "");
        assert!(url.contains("?name=Living%20Room%20%26%20Co&token="));
        assert!(url.ends_with("&token="));
    }

    #[test]
    fn url_keeps_unreserved_marks() {
        let url = connect_url("tv.local", "a-b_c.d!~*'()", "");
        assert!(url.contains("name=a-b_c.d!~*'()&"));
    }

    #[test]
    fn url_brackets_ipv6_host() {
        let url = connect_url("fe80::1", "n", "t");
        assert!(url.starts_with("wss://[fe80::1]:8002/"));
    }

    #[test]
    fn request_carries_headers_and_token() {
        let config = ConnectionConfig::new("10.0.0.5")
            .with_header("Origin", "tvbridge")
            .with_header("X-Debug", "1");
        let request = build_request(&config, "tok").unwrap();

        assert_eq!(request.uri().host(), Some("10.0.0.5"));
        assert_eq!(request.uri().port_u16(), Some(8002));
        assert_eq!(request.headers()["Origin"], "tvbridge");
        assert_eq!(request.headers()["X-Debug"], "1");
        assert_eq!(query_param(&request, "token").as_deref(), Some("tok"));
        assert_eq!(query_param(&request, "name").as_deref(), Some("TVBridge"));
    }

    #[test]
    fn request_rejects_invalid_header() {
        let config = ConnectionConfig::new("10.0.0.5").with_header("bad header", "x");
        assert!(matches!(
            build_request(&config, ""),
            Err(WsError::InvalidHeader(_))
        ));
    }

    #[test]
    fn tls_connector_builds() {
        assert!(TlsConnector::new().is_ok());
    }
}
