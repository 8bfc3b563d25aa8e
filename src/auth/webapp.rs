//! Extraction of the signed init data from a web-app launch URL.
//!
//! Launch URLs carry `tgWebAppData` in the fragment (some clients use the
//! query). Its value is itself a URL-encoded query string such as
//! `query_id=..&user=%7B..%7D&auth_date=..&hash=..`, and is used verbatim
//! as the bearer token.

use secrecy::SecretString;
use url::Url;
use url::form_urlencoded;

use crate::error::WebAppParseError;

pub const WEB_APP_DATA_PARAM: &str = "tgWebAppData";

/// Decoded web-app init data.
#[derive(Debug, Clone)]
pub struct WebAppData {
    init_data: SecretString,
    user_id: Option<i64>,
}

impl WebAppData {
    /// Signed payload used as the `Authorization` header value.
    pub fn init_data(&self) -> &SecretString {
        &self.init_data
    }

    /// Id of the chat-platform user the payload was issued for.
    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }
}

/// Parse a launch URL into its init data.
pub fn parse_launch_url(raw: &str) -> Result<WebAppData, WebAppParseError> {
    let url = Url::parse(raw.trim())?;

    let init_data = [url.fragment(), url.query()]
        .into_iter()
        .flatten()
        .find_map(|part| find_param(part, WEB_APP_DATA_PARAM))
        .ok_or(WebAppParseError::MissingParam(WEB_APP_DATA_PARAM))?;

    if init_data.trim().is_empty() {
        return Err(WebAppParseError::EmptyParam(WEB_APP_DATA_PARAM));
    }

    let user_id = user_id_of(&init_data);
    Ok(WebAppData {
        init_data: SecretString::from(init_data),
        user_id,
    })
}

fn find_param(encoded: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(encoded.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Pull `user.id` out of the init data, if it is there and well formed.
fn user_id_of(init_data: &str) -> Option<i64> {
    let user = find_param(init_data, "user")?;
    let value: serde_json::Value = serde_json::from_str(&user).ok()?;
    value.get("id").and_then(serde_json::Value::as_i64)
}
