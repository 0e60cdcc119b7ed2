use serde::{Deserialize, Serialize};

use crate::constants::{EVENT_CHANNEL_CONNECT, EVENT_CHANNEL_UNAUTHORIZED};

/// Envelope of every JSON frame on the remote-control channel.
///
/// Only `event` is interpreted; `data` is kept as an untyped value since
/// its shape differs per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ChannelEvent {
    /// Parses a raw frame.
    pub fn parse(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }

    /// Returns `true` for the channel-connect acknowledgement.
    pub fn is_channel_connect(&self) -> bool {
        self.event == EVENT_CHANNEL_CONNECT
    }

    /// Returns `true` when the user rejected the pairing prompt.
    pub fn is_unauthorized(&self) -> bool {
        self.event == EVENT_CHANNEL_UNAUTHORIZED
    }

    /// Returns the pairing token carried by a channel-connect event.
    ///
    /// `None` for any other event, or when `data.token` is absent or null.
    /// Non-string tokens are returned in their JSON text form.
    pub fn pairing_token(&self) -> Option<String> {
        if !self.is_channel_connect() {
            return None;
        }
        match self.data.as_ref()?.get("token")? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_channel_connect_with_token() {
        let ev = ChannelEvent::parse(
            br#"{"event":"ms.channel.connect","data":{"id":"abc","token":"12345678"}}"#,
        )
        .unwrap();
        assert!(ev.is_channel_connect());
        assert_eq!(ev.pairing_token().as_deref(), Some("12345678"));
    }

    #[test]
    fn null_token_is_none() {
        let ev =
            ChannelEvent::parse(br#"{"event":"ms.channel.connect","data":{"token":null}}"#)
                .unwrap();
        assert_eq!(ev.pairing_token(), None);
    }

    #[test]
    fn numeric_token_kept_as_text() {
        let ev = ChannelEvent::parse(br#"{"event":"ms.channel.connect","data":{"token":4711}}"#)
            .unwrap();
        assert_eq!(ev.pairing_token().as_deref(), Some("4711"));
    }

    #[test]
    fn missing_data_is_none() {
        let ev = ChannelEvent::parse(br#"{"event":"ms.channel.connect"}"#).unwrap();
        assert!(ev.data.is_none());
        assert_eq!(ev.pairing_token(), None);
    }

    #[test]
    fn other_event_token_ignored() {
        let ev = ChannelEvent::parse(br#"{"event":"ms.channel.ready","data":{"token":"x"}}"#)
            .unwrap();
        assert!(!ev.is_channel_connect());
        assert_eq!(ev.pairing_token(), None);
    }

    #[test]
    fn unauthorized_event() {
        let ev = ChannelEvent::parse(br#"{"event":"ms.channel.unauthorized"}"#).unwrap();
        assert!(ev.is_unauthorized());
    }

    #[test]
    fn malformed_frame_is_error() {
        assert!(ChannelEvent::parse(b"not json").is_err());
        assert!(ChannelEvent::parse(br#"{"data":{}}"#).is_err());
    }
}
