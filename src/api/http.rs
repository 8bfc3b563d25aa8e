//! reqwest-backed `GameApi`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{
    ClaimOutcome, ClientRegistry, Connector, GameApi, Profile, ProxyInfo, decode_claim,
    decode_result, parse_json,
};
use crate::error::ApiError;
use crate::tasks::Task;
use crate::wheel::{SpinResult, WheelState, WheelTask};

const PROXY_CHECK_URL: &str = "https://ipinfo.io/json";
const PROXY_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds one `HttpGameApi` per run-loop iteration.
pub struct HttpConnector {
    base_url: String,
    user_agent: String,
    registry: Arc<ClientRegistry>,
}

impl HttpConnector {
    pub fn new(
        base_url: impl Into<String>,
        user_agent: impl Into<String>,
        registry: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: user_agent.into(),
            registry,
        }
    }
}

impl Connector for HttpConnector {
    fn open(&self, proxy: Option<&str>) -> Result<Arc<dyn GameApi>, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(self.user_agent.as_str());

        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| ApiError::InvalidProxy {
                proxy: proxy_url.to_string(),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Arc::new(HttpGameApi::new(
            client,
            &self.base_url,
            Arc::clone(&self.registry),
        )))
    }
}

/// One pooled HTTP connection to the game backend.
pub struct HttpGameApi {
    id: Uuid,
    client: reqwest::Client,
    base_url: String,
    bearer: RwLock<Option<SecretString>>,
    registry: Arc<ClientRegistry>,
    closing: CancellationToken,
    closed: AtomicBool,
}

impl HttpGameApi {
    pub fn new(client: reqwest::Client, base_url: &str, registry: Arc<ClientRegistry>) -> Self {
        let id = Uuid::new_v4();
        let closing = registry.register(id);
        Self {
            id,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer: RwLock::new(None),
            registry,
            closing,
            closed: AtomicBool::new(false),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    fn bearer(&self) -> Option<String> {
        self.bearer
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|token| token.expose_secret().to_string())
    }

    /// Run a request, failing fast once the session has been told to close.
    async fn guarded<T, F>(&self, request: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>> + Send,
    {
        if self.closing.is_cancelled() {
            return Err(ApiError::Connect("HTTP session is closed".into()));
        }
        tokio::select! {
            _ = self.closing.cancelled() => Err(ApiError::Connect("HTTP session was closed".into())),
            result = request => result,
        }
    }

    /// POST a JSON body and return the raw response text on 2xx.
    async fn post_raw(&self, method: &str, body: serde_json::Value) -> Result<String, ApiError> {
        let mut request = self.client.post(self.api_url(method)).json(&body);
        if let Some(token) = self.bearer() {
            request = request.header(header::AUTHORIZATION, token);
        }

        self.guarded(async move {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    body: text,
                });
            }
            Ok(text)
        })
        .await
    }
}

#[derive(Deserialize)]
struct TaskPage {
    data: Vec<Task>,
}

#[derive(Deserialize)]
struct WheelLoad {
    tasks: WheelState,
}

#[async_trait]
impl GameApi for HttpGameApi {
    fn id(&self) -> Uuid {
        self.id
    }

    fn authorize(&self, token: SecretString) {
        *self
            .bearer
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(token);
    }

    async fn get_me(&self, referrer_id: i64) -> Result<Profile, ApiError> {
        let body = self
            .post_raw("getMe", serde_json::json!({ "referrer_id": referrer_id }))
            .await?;
        decode_result(&body)
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, ApiError> {
        let body = self.post_raw("getTasks", serde_json::json!({})).await?;
        let page: TaskPage = decode_result(&body)?;
        Ok(page.data)
    }

    async fn complete_task(&self, task_type: &str) -> Result<ClaimOutcome, ApiError> {
        let body = self
            .post_raw("completeTask", serde_json::json!({ "type": task_type }))
            .await?;
        decode_claim(&body)
    }

    async fn load_wheel(&self) -> Result<WheelState, ApiError> {
        let body = self.post_raw("wheel/load", serde_json::json!({})).await?;
        let load: WheelLoad = decode_result(&body)?;
        Ok(load.tasks)
    }

    async fn claim_wheel_task(&self, task: WheelTask) -> Result<ClaimOutcome, ApiError> {
        let body = self
            .post_raw("wheel/task", serde_json::json!({ "type": task.as_str() }))
            .await?;
        decode_claim(&body)
    }

    async fn spin(&self) -> Result<SpinResult, ApiError> {
        let body = self.post_raw("wheel/spin", serde_json::json!({})).await?;
        decode_result(&body)
    }

    async fn check_proxy(&self) -> Result<ProxyInfo, ApiError> {
        let request = self.client.get(PROXY_CHECK_URL).timeout(PROXY_CHECK_TIMEOUT);
        self.guarded(async move {
            let response = request.send().await?.error_for_status()?;
            let text = response.text().await?;
            parse_json(&text)
        })
        .await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closing.cancel();
        self.registry.deregister(self.id);
        tracing::debug!(session_id = %self.id, "HTTP session closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.closing.is_cancelled()
    }
}

impl Drop for HttpGameApi {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
