//! Credential provider backed by captured launch URLs on disk.
//!
//! Each session is a `<name>.url` file holding one web-app launch URL,
//! captured from a logged-in client. "Connecting" reads the file; a session
//! without one has no usable credential and is treated as unregistered.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::auth::{BotPeer, CredentialProvider, WebViewRequest};
use crate::error::ProviderError;

pub const SESSION_FILE_EXTENSION: &str = "url";

pub struct StoredLaunchProvider {
    path: PathBuf,
    launch_url: Mutex<Option<String>>,
    connected: AtomicBool,
}

impl StoredLaunchProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            launch_url: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Provider for `session` inside `sessions_dir`.
    pub fn for_session(sessions_dir: &Path, session: &str) -> Self {
        Self::new(sessions_dir.join(format!("{session}.{SESSION_FILE_EXTENSION}")))
    }
}

#[async_trait]
impl CredentialProvider for StoredLaunchProvider {
    async fn connect(&self, proxy: Option<&str>) -> Result<(), ProviderError> {
        if proxy.is_some() {
            tracing::debug!(path = %self.path.display(), "Stored launch URL ignores proxy");
        }

        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::AuthKeyUnregistered);
            }
            Err(e) => {
                return Err(ProviderError::Other(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let url = contents
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .ok_or(ProviderError::Unauthorized)?;

        *self
            .launch_url
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(url.to_string());
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn resolve_peer(&self, username: &str) -> Result<BotPeer, ProviderError> {
        if !self.is_connected() {
            return Err(ProviderError::Other("not connected".into()));
        }
        Ok(BotPeer {
            username: username.to_string(),
            id: None,
        })
    }

    async fn request_web_view(&self, _request: &WebViewRequest) -> Result<String, ProviderError> {
        self.launch_url
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ProviderError::Other("not connected".into()))
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self
            .launch_url
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}
