//! Configuration types.
//!
//! Settings come from plain environment variables. Delay windows are written
//! as `lo,hi` in seconds (brackets are tolerated, so `[7, 20]` also works).

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use url::Url;

use crate::error::ConfigError;

/// Referral code the original deployment shipped with.
pub const DEFAULT_REF_CODE: &str = "onetime6434058521";

pub const DEFAULT_API_BASE_URL: &str = "https://api.agent301.org";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 13; SM-S908B Build/TP1A.220624.014; wv) \
     AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/120.0.6099.144 Mobile Safari/537.36";

const DEFAULT_BLACKLIST: &[&str] = &[
    "stars_purchase",
    "invite_3_friends",
    "transaction",
    "boost",
    "subscribe",
];

/// Inclusive window of seconds from which a random pause is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWindow {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl DelayWindow {
    pub const fn new(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    /// Draw a duration uniformly from the window, at millisecond resolution.
    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let lo = self.min_secs.saturating_mul(1000);
        let hi = self.max_secs.saturating_mul(1000).max(lo);
        Duration::from_millis(rng.gen_range(lo..=hi))
    }

    pub fn sample(&self) -> Duration {
        self.sample_with(&mut rand::thread_rng())
    }

    fn parse(key: &str, raw: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
        let mut parts = trimmed.split(',').map(str::trim);
        let (Some(lo), Some(hi), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid(format!("expected `lo,hi`, got {raw:?}")));
        };

        let lo: u64 = lo
            .parse()
            .map_err(|e| invalid(format!("bad lower bound {lo:?}: {e}")))?;
        let hi: u64 = hi
            .parse()
            .map_err(|e| invalid(format!("bad upper bound {hi:?}: {e}")))?;
        if lo > hi {
            return Err(invalid(format!("lower bound {lo} exceeds upper bound {hi}")));
        }

        Ok(Self::new(lo, hi))
    }
}

/// Account automation settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Referral code passed as the web-app start parameter.
    pub ref_code: String,
    /// Startup delay window; `None` disables the delay.
    pub random_delay: Option<DelayWindow>,
    /// Short pause between wheel spins and after the profile fetch.
    pub mini_sleep: DelayWindow,
    /// Pause after each wheel bonus claim.
    pub task_sleep: DelayWindow,
    pub max_spin_per_cycle: i64,
    /// Idle sleep between cycles.
    pub sleep_time: DelayWindow,
    /// Task types never completed automatically.
    pub blacklist: HashSet<String>,
    /// Require a working proxy for every session.
    pub use_proxy: bool,
    pub sessions_dir: PathBuf,
    pub proxies_file: PathBuf,
    pub api_base_url: String,
    pub user_agent: String,
    /// Directory for a daily-rolling log file, if any.
    pub log_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ref_code: DEFAULT_REF_CODE.to_string(),
            random_delay: Some(DelayWindow::new(0, 36_000)),
            mini_sleep: DelayWindow::new(7, 20),
            task_sleep: DelayWindow::new(25, 50),
            max_spin_per_cycle: 5,
            sleep_time: DelayWindow::new(21_000, 32_000), // ~5.8 to 8.9 hours
            blacklist: DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
            use_proxy: false,
            sessions_dir: PathBuf::from("sessions"),
            proxies_file: PathBuf::from("proxies.txt"),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            log_dir: None,
        }
    }
}

impl Settings {
    /// Build settings from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(code) = get("REF_CODE") {
            settings.ref_code = code.trim().to_string();
        }

        let use_delay = match get("USE_RANDOM_DELAY_IN_RUN") {
            Some(raw) => parse_bool("USE_RANDOM_DELAY_IN_RUN", &raw)?,
            None => true,
        };
        let delay = match get("RANDOM_DELAY_IN_RUN") {
            Some(raw) => DelayWindow::parse("RANDOM_DELAY_IN_RUN", &raw)?,
            None => DelayWindow::new(0, 36_000),
        };
        settings.random_delay = use_delay.then_some(delay);

        if let Some(raw) = get("MINI_SLEEP") {
            settings.mini_sleep = DelayWindow::parse("MINI_SLEEP", &raw)?;
        }
        if let Some(raw) = get("TASK_SLEEP") {
            settings.task_sleep = DelayWindow::parse("TASK_SLEEP", &raw)?;
        }
        if let Some(raw) = get("SLEEP_TIME") {
            settings.sleep_time = DelayWindow::parse("SLEEP_TIME", &raw)?;
        }

        if let Some(raw) = get("MAX_SPIN_PER_CYCLE") {
            settings.max_spin_per_cycle =
                raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    key: "MAX_SPIN_PER_CYCLE".into(),
                    message: format!("{e}"),
                })?;
            if settings.max_spin_per_cycle < 0 {
                return Err(ConfigError::InvalidValue {
                    key: "MAX_SPIN_PER_CYCLE".into(),
                    message: "must not be negative".into(),
                });
            }
        }

        if let Some(raw) = get("BLACKLIST") {
            settings.blacklist = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(raw) = get("USE_PROXY") {
            settings.use_proxy = parse_bool("USE_PROXY", &raw)?;
        }
        if let Some(dir) = get("SESSIONS_DIR") {
            settings.sessions_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("PROXIES_FILE") {
            settings.proxies_file = PathBuf::from(path);
        }
        if let Some(raw) = get("API_BASE_URL") {
            let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
                key: "API_BASE_URL".into(),
                message: e.to_string(),
            })?;
            settings.api_base_url = url.as_str().trim_end_matches('/').to_string();
        }
        if let Some(ua) = get("USER_AGENT") {
            settings.user_agent = ua;
        }
        settings.log_dir = get("LOG_DIR").map(PathBuf::from);

        Ok(settings)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}
