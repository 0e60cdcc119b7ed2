//! Pairing token persistence and capture.
//!
//! The TV issues a token once the user accepts the on-screen pairing
//! prompt. It is stored as plain text and sent back on every connect so
//! the prompt is skipped.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use tvbridge_protocol::ChannelEvent;

/// Errors from token persistence.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Plain-text file holding the pairing token.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored token.
    ///
    /// Returns `Ok(None)` when the file does not exist or holds only
    /// whitespace.
    pub async fn load(&self) -> Result<Option<String>, TokenError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => {
                let token = data.trim();
                if token.is_empty() {
                    Ok(None)
                } else {
                    debug!(path = %self.path.display(), "loaded pairing token");
                    Ok(Some(token.to_string()))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(TokenError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Overwrites the stored token.
    ///
    /// Writes a sibling temp file first and renames it over the target so
    /// a crash never leaves a truncated token behind.
    pub async fn save(&self, token: &str) -> Result<(), TokenError> {
        let io_err = |source| TokenError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, token).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        debug!(path = %self.path.display(), "persisted pairing token");
        Ok(())
    }
}

/// Single-use token inspector scoped to one connection attempt.
///
/// Fires on the first channel-connect event carrying a token and stays
/// disarmed afterwards. A fresh connection gets a fresh capture.
#[derive(Debug)]
pub(crate) struct TokenCapture {
    armed: bool,
}

impl TokenCapture {
    pub(crate) fn new() -> Self {
        Self { armed: true }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    /// Inspects a frame. Returns the token the first time one is seen.
    ///
    /// Frames that are not valid JSON are ignored.
    pub(crate) fn inspect(&mut self, frame: &[u8]) -> Option<String> {
        if !self.armed {
            return None;
        }
        let event = match ChannelEvent::parse(frame) {
            Ok(ev) => ev,
            Err(e) => {
                trace!("ignoring non-JSON frame: {e}");
                return None;
            }
        };
        let token = event.pairing_token()?;
        self.armed = false;
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECT_FRAME: &[u8] = br#"{"event":"ms.channel.connect","data":{"token":"NEWTOK"}}"#;

    fn test_store() -> (tempfile::TempDir, TokenStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(tmp.path().join("token.txt"));
        (tmp, store)
    }

    #[tokio::test]
    async fn load_missing_file_returns_none() {
        let (_tmp, store) = test_store();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_trims_whitespace() {
        let (_tmp, store) = test_store();
        std::fs::write(store.path(), "abc123\n").unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn load_blank_file_returns_none() {
        let (_tmp, store) = test_store();
        std::fs::write(store.path(), "  \n").unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_directory_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(tmp.path());
        assert!(matches!(store.load().await, Err(TokenError::Io { .. })));
    }

    #[tokio::test]
    async fn save_and_reload() {
        let (_tmp, store) = test_store();
        store.save("tok-1").await.unwrap();
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "tok-1");
        assert_eq!(store.load().await.unwrap().as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn save_overwrites_and_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(tmp.path().join("nested").join("dir").join("token"));
        store.save("old-token").await.unwrap();
        store.save("new").await.unwrap();
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "new");
        // No temp file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn capture_fires_once() {
        let mut capture = TokenCapture::new();
        assert_eq!(capture.inspect(CONNECT_FRAME).as_deref(), Some("NEWTOK"));
        assert!(!capture.is_armed());
        assert_eq!(capture.inspect(CONNECT_FRAME), None);
    }

    #[test]
    fn capture_ignores_malformed_and_unrelated() {
        let mut capture = TokenCapture::new();
        assert_eq!(capture.inspect(b"{{{ not json"), None);
        assert_eq!(capture.inspect(br#"{"event":"ms.channel.ready"}"#), None);
        assert_eq!(
            capture.inspect(br#"{"event":"ms.channel.connect","data":{"token":null}}"#),
            None
        );
        assert!(capture.is_armed());
        assert_eq!(capture.inspect(CONNECT_FRAME).as_deref(), Some("NEWTOK"));
    }
}
