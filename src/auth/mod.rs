//! Authentication — trades a chat-platform session for a bearer token.
//!
//! The credential provider is an opaque capability: anything that can connect,
//! resolve the bot and hand back a signed web-app launch URL. The provider
//! connection is held only for the duration of one `authenticate` call.

pub mod stored;
pub mod webapp;

pub use stored::StoredLaunchProvider;
pub use webapp::{WebAppData, parse_launch_url};

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::api::GameApi;
use crate::config::DelayWindow;
use crate::error::{AuthError, ProviderError};

/// Bot that hosts the mini-app.
pub const BOT_USERNAME: &str = "Agent301Bot";
pub const APP_SHORT_NAME: &str = "app";
pub const PLATFORM: &str = "android";

/// Pause drawn after a flood-wait signal before resolving again.
pub const FLOOD_WAIT_PAUSE: DelayWindow = DelayWindow::new(3600, 12_800);

/// Pause after a transient authentication failure.
pub const TRANSIENT_FAILURE_PAUSE: Duration = Duration::from_secs(3);

/// A resolved bot peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotPeer {
    pub username: String,
    pub id: Option<i64>,
}

/// Parameters of a web-app view request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebViewRequest {
    pub peer: BotPeer,
    pub short_name: &'static str,
    pub platform: &'static str,
    pub write_allowed: bool,
    pub start_param: String,
}

/// Chat-platform session able to issue signed web-app launch URLs.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Open the connection, routing through `proxy` when given.
    async fn connect(&self, proxy: Option<&str>) -> Result<(), ProviderError>;

    fn is_connected(&self) -> bool;

    async fn resolve_peer(&self, username: &str) -> Result<BotPeer, ProviderError>;

    /// Request the web-app view and return its launch URL.
    async fn request_web_view(&self, request: &WebViewRequest) -> Result<String, ProviderError>;

    async fn disconnect(&self);
}

/// Per-account authenticator.
pub struct Authenticator<P> {
    provider: P,
    session: String,
    proxy: Option<String>,
    ref_code: String,
    flood_pause: DelayWindow,
    web_app: Option<WebAppData>,
}

impl<P: CredentialProvider> Authenticator<P> {
    pub fn new(
        provider: P,
        session: impl Into<String>,
        proxy: Option<String>,
        ref_code: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            session: session.into(),
            proxy,
            ref_code: ref_code.into(),
            flood_pause: FLOOD_WAIT_PAUSE,
            web_app: None,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Init data from the last successful authentication.
    pub fn web_app(&self) -> Option<&WebAppData> {
        self.web_app.as_ref()
    }

    /// Authenticate and install the bearer token on `api`.
    ///
    /// `Ok(false)` means a transient failure the caller may retry. Identity
    /// failures come back as `AuthError::InvalidSession`. The provider is
    /// disconnected on every path.
    pub async fn authenticate(&mut self, api: &dyn GameApi) -> Result<bool, AuthError> {
        let outcome = self.acquire().await;

        if self.provider.is_connected() {
            self.provider.disconnect().await;
        }

        match outcome {
            Ok(data) => {
                api.authorize(data.init_data().clone());
                self.web_app = Some(data);
                Ok(true)
            }
            Err(e @ AuthError::InvalidSession { .. }) => Err(e),
            Err(e) => {
                error!(session = %self.session, "Unknown error during Authorization: {e}");
                tokio::time::sleep(TRANSIENT_FAILURE_PAUSE).await;
                Ok(false)
            }
        }
    }

    async fn acquire(&self) -> Result<WebAppData, AuthError> {
        if !self.provider.is_connected() {
            self.provider
                .connect(self.proxy.as_deref())
                .await
                .map_err(|e| self.classify(e))?;
        }

        let peer = self.resolve_with_flood_wait().await?;

        let request = WebViewRequest {
            peer,
            short_name: APP_SHORT_NAME,
            platform: PLATFORM,
            write_allowed: true,
            start_param: self.ref_code.clone(),
        };
        let launch_url = self
            .provider
            .request_web_view(&request)
            .await
            .map_err(|e| self.classify(e))?;

        Ok(parse_launch_url(&launch_url)?)
    }

    /// Resolve the bot, sleeping through every flood-wait signal.
    async fn resolve_with_flood_wait(&self) -> Result<BotPeer, AuthError> {
        loop {
            match self.provider.resolve_peer(BOT_USERNAME).await {
                Ok(peer) => return Ok(peer),
                Err(ProviderError::FloodWait { seconds }) => {
                    warn!(session = %self.session, "FloodWait of {seconds}s while resolving {BOT_USERNAME}");
                    let pause = self.flood_pause.sample();
                    info!(session = %self.session, "Sleep {}s", pause.as_secs());
                    tokio::time::sleep(pause).await;
                }
                Err(e) => return Err(self.classify(e)),
            }
        }
    }

    fn classify(&self, e: ProviderError) -> AuthError {
        if e.is_fatal() {
            AuthError::InvalidSession {
                session: self.session.clone(),
                reason: e,
            }
        } else {
            AuthError::Provider(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use secrecy::{ExposeSecret, SecretString};
    use uuid::Uuid;

    use super::*;
    use crate::api::{ClaimOutcome, Profile, ProxyInfo};
    use crate::error::ApiError;
    use crate::tasks::Task;
    use crate::wheel::{SpinResult, WheelState, WheelTask};

    const LAUNCH: &str = "https://example.test/#tgWebAppData=query_id%3DQ%26user%3D%257B%2522id%2522%253A7%257D%26hash%3Dh&tgWebAppVersion=7.2";

    /// Provider scripted with a connect result and a run of resolve results.
    struct MockProvider {
        connect_error: Option<ProviderError>,
        resolve_errors: Mutex<Vec<ProviderError>>,
        web_view: Result<String, ProviderError>,
        connected: AtomicBool,
        resolve_calls: AtomicUsize,
        disconnects: AtomicUsize,
        proxy_seen: Mutex<Option<String>>,
        start_param: Mutex<Option<String>>,
    }

    impl MockProvider {
        fn ok() -> Self {
            Self {
                connect_error: None,
                resolve_errors: Mutex::new(Vec::new()),
                web_view: Ok(LAUNCH.to_string()),
                connected: AtomicBool::new(false),
                resolve_calls: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                proxy_seen: Mutex::new(None),
                start_param: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CredentialProvider for MockProvider {
        async fn connect(&self, proxy: Option<&str>) -> Result<(), ProviderError> {
            *self.proxy_seen.lock().unwrap() = proxy.map(String::from);
            if let Some(e) = &self.connect_error {
                return Err(e.clone());
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn resolve_peer(&self, username: &str) -> Result<BotPeer, ProviderError> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            let mut errors = self.resolve_errors.lock().unwrap();
            if !errors.is_empty() {
                return Err(errors.remove(0));
            }
            Ok(BotPeer {
                username: username.to_string(),
                id: Some(1),
            })
        }
        async fn request_web_view(
            &self,
            request: &WebViewRequest,
        ) -> Result<String, ProviderError> {
            *self.start_param.lock().unwrap() = Some(request.start_param.clone());
            self.web_view.clone()
        }
        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Records the bearer token; every network call is unexpected here.
    #[derive(Default)]
    struct TokenSink {
        token: Mutex<Option<String>>,
    }

    #[async_trait]
    impl GameApi for TokenSink {
        fn id(&self) -> Uuid {
            Uuid::nil()
        }
        fn authorize(&self, token: SecretString) {
            *self.token.lock().unwrap() = Some(token.expose_secret().to_string());
        }
        async fn get_me(&self, _referrer_id: i64) -> Result<Profile, ApiError> {
            unimplemented!()
        }
        async fn get_tasks(&self) -> Result<Vec<Task>, ApiError> {
            unimplemented!()
        }
        async fn complete_task(&self, _task_type: &str) -> Result<ClaimOutcome, ApiError> {
            unimplemented!()
        }
        async fn load_wheel(&self) -> Result<WheelState, ApiError> {
            unimplemented!()
        }
        async fn claim_wheel_task(&self, _task: WheelTask) -> Result<ClaimOutcome, ApiError> {
            unimplemented!()
        }
        async fn spin(&self) -> Result<SpinResult, ApiError> {
            unimplemented!()
        }
        async fn check_proxy(&self) -> Result<ProxyInfo, ApiError> {
            unimplemented!()
        }
        async fn close(&self) {}
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn authenticator(provider: MockProvider) -> Authenticator<MockProvider> {
        Authenticator::new(
            provider,
            "alice",
            Some("socks5://10.0.0.1:1080".into()),
            "onetime123",
        )
    }

    #[tokio::test]
    async fn success_installs_bearer_and_disconnects() {
        let mut auth = authenticator(MockProvider::ok());
        let api = TokenSink::default();

        assert!(auth.authenticate(&api).await.unwrap());
        assert_eq!(
            api.token.lock().unwrap().as_deref(),
            Some("query_id=Q&user=%7B%22id%22%3A7%7D&hash=h")
        );
        assert_eq!(auth.web_app().and_then(WebAppData::user_id), Some(7));
        assert_eq!(auth.provider().disconnects.load(Ordering::SeqCst), 1);
        assert!(!auth.provider().is_connected());
        assert_eq!(
            auth.provider().proxy_seen.lock().unwrap().as_deref(),
            Some("socks5://10.0.0.1:1080")
        );
        assert_eq!(
            auth.provider().start_param.lock().unwrap().as_deref(),
            Some("onetime123")
        );
    }

    #[tokio::test]
    async fn fatal_connect_errors_propagate() {
        for fatal in [
            ProviderError::Unauthorized,
            ProviderError::Deactivated,
            ProviderError::AuthKeyUnregistered,
        ] {
            let mut provider = MockProvider::ok();
            provider.connect_error = Some(fatal);
            let mut auth = authenticator(provider);
            let api = TokenSink::default();

            let err = auth.authenticate(&api).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidSession { .. }));
            assert!(api.token.lock().unwrap().is_none());
            assert_eq!(auth.provider().resolve_calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_retries_until_resolved() {
        let provider = MockProvider::ok();
        *provider.resolve_errors.lock().unwrap() = vec![
            ProviderError::FloodWait { seconds: 30 },
            ProviderError::FloodWait { seconds: 30 },
            ProviderError::FloodWait { seconds: 30 },
        ];
        let mut auth = authenticator(provider);
        let api = TokenSink::default();

        assert!(auth.authenticate(&api).await.unwrap());
        assert_eq!(auth.provider().resolve_calls.load(Ordering::SeqCst), 4);
        assert_eq!(auth.provider().disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_return_false_and_disconnect() {
        let mut provider = MockProvider::ok();
        provider.web_view = Err(ProviderError::Other("rpc timeout".into()));
        let mut auth = authenticator(provider);
        let api = TokenSink::default();

        assert!(!auth.authenticate(&api).await.unwrap());
        assert!(api.token.lock().unwrap().is_none());
        assert_eq!(auth.provider().disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unparsable_launch_url_is_transient() {
        let mut provider = MockProvider::ok();
        provider.web_view = Ok("https://example.test/#nothing=here".into());
        let mut auth = authenticator(provider);
        let api = TokenSink::default();

        assert!(!auth.authenticate(&api).await.unwrap());
        assert!(auth.web_app().is_none());
    }

    #[tokio::test]
    async fn fatal_error_mid_flow_still_disconnects() {
        let mut provider = MockProvider::ok();
        provider.web_view = Err(ProviderError::Deactivated);
        let mut auth = authenticator(provider);
        let api = TokenSink::default();

        assert!(auth.authenticate(&api).await.is_err());
        assert_eq!(auth.provider().disconnects.load(Ordering::SeqCst), 1);
    }
}
