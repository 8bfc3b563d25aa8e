//! Game API: the mini-app backend the account loop talks to.
//!
//! `GameApi` is the seam between the run loop and HTTP: the production
//! implementation is `HttpGameApi`, tests substitute in-memory fakes.

pub mod http;
pub mod registry;

pub use http::{HttpConnector, HttpGameApi};
pub use registry::ClientRegistry;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::ApiError;
use crate::tasks::Task;
use crate::wheel::{SpinResult, WheelState, WheelTask};

/// Account profile returned by `getMe`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Profile {
    pub balance: i64,
    pub tickets: i64,
    pub daily_streak: DailyStreak,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DailyStreak {
    pub showed: bool,
    pub day: i64,
}

/// Outcome of a completion or claim call.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimOutcome {
    pub ok: bool,
    /// Reward as reported by the server, when present.
    pub reward: Option<serde_json::Value>,
    /// Raw body, kept for logging unsuccessful claims.
    pub raw: serde_json::Value,
}

/// Exit location reported by the proxy check endpoint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProxyInfo {
    pub ip: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// One HTTP session against the game backend.
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Handle identifier used by the client registry.
    fn id(&self) -> Uuid;

    /// Install the bearer token used by every later call.
    fn authorize(&self, token: SecretString);

    async fn get_me(&self, referrer_id: i64) -> Result<Profile, ApiError>;

    async fn get_tasks(&self) -> Result<Vec<Task>, ApiError>;

    async fn complete_task(&self, task_type: &str) -> Result<ClaimOutcome, ApiError>;

    async fn load_wheel(&self) -> Result<WheelState, ApiError>;

    async fn claim_wheel_task(&self, task: WheelTask) -> Result<ClaimOutcome, ApiError>;

    async fn spin(&self) -> Result<SpinResult, ApiError>;

    /// Look up the public exit address of this session.
    async fn check_proxy(&self) -> Result<ProxyInfo, ApiError>;

    /// Close the session and drop it from the registry.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens fresh HTTP sessions, one per run-loop iteration.
pub trait Connector: Send + Sync {
    fn open(&self, proxy: Option<&str>) -> Result<Arc<dyn GameApi>, ApiError>;
}

/// Compute the `referrer_id` sent with `getMe`.
///
/// Referral codes look like `onetime<user id>`. The id after the 7-character
/// prefix is the referrer, unless it is the caller's own account.
pub fn referrer_id(ref_code: &str, own_user_id: Option<i64>) -> i64 {
    let Some(digits) = ref_code.get(7..) else {
        return 0;
    };
    if own_user_id.is_some_and(|id| id.to_string() == digits) {
        return 0;
    }
    digits.parse().unwrap_or(0)
}

#[derive(Deserialize)]
struct Envelope {
    result: Option<serde_json::Value>,
}

/// Parse a raw body and return its `result` member as `T`.
pub(crate) fn decode_result<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let envelope: Envelope = parse_json(body)?;
    let result = envelope
        .result
        .ok_or_else(|| ApiError::MissingField("result".into()))?;
    from_value(result)
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| classify_serde(e, body))
}

pub(crate) fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::MissingField(e.to_string()))
}

fn classify_serde(e: serde_json::Error, body: &str) -> ApiError {
    use serde_json::error::Category;
    match e.classify() {
        Category::Data => ApiError::MissingField(e.to_string()),
        Category::Syntax | Category::Eof | Category::Io => {
            ApiError::MalformedBody(format!("{e}; body: {}", truncate(body, 200)))
        }
    }
}

/// Parse a claim-style response: `{ok, result: {reward}}`.
pub(crate) fn decode_claim(body: &str) -> Result<ClaimOutcome, ApiError> {
    let raw: serde_json::Value = parse_json(body)?;
    let ok = raw
        .get("ok")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    let reward = raw
        .get("result")
        .and_then(|r| r.get("reward"))
        .cloned()
        .filter(|r| !r.is_null());
    Ok(ClaimOutcome { ok, reward, raw })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}
