//! Per-account run loop.
//!
//! Each iteration walks AUTHENTICATING → FETCHING_PROFILE → PROCESSING_TASKS →
//! SPINNING_WHEEL and always ends in SLEEPING: the HTTP session is closed and
//! the account idles for the configured window. Errors that escape the
//! iteration body are classified by `ErrorKind` and backed off accordingly;
//! an invalid session ends the loop for good.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info};

use crate::api::{Connector, GameApi, Profile, referrer_id};
use crate::auth::{Authenticator, CredentialProvider};
use crate::config::{DelayWindow, Settings};
use crate::error::{ApiError, ErrorKind, Result};
use crate::tasks::{FETCH_MAX_RETRIES, FETCH_RETRY_DELAY, TaskEngine, plan_completions};
use crate::wheel::Wheel;

pub const LOGIN_RETRY_DELAY: Duration = Duration::from_secs(3600);
pub const PROFILE_RETRY_DELAY: Duration = Duration::from_secs(300);
pub const TASKS_RETRY_DELAY: Duration = Duration::from_secs(300);
/// Extra pause when `getMe` answers with a server error.
pub const PROFILE_SERVER_ERROR_PAUSE: Duration = Duration::from_secs(60);

/// Where an iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// All phases ran.
    Completed,
    LoginFailed,
    ProfileUnavailable,
    TasksUnavailable,
    /// An error escaped the body and was backed off.
    BackedOff(ErrorKind),
}

/// Why `run` returned without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    MissingProxy,
    ProxyCheckFailed,
}

/// One account's automation state.
pub struct Account<P> {
    session: String,
    proxy: Option<String>,
    settings: Arc<Settings>,
    authenticator: Authenticator<P>,
    connector: Arc<dyn Connector>,
    api: Option<Arc<dyn GameApi>>,
    rng: StdRng,
}

impl<P: CredentialProvider> Account<P> {
    pub fn new(
        session: impl Into<String>,
        proxy: Option<String>,
        provider: P,
        connector: Arc<dyn Connector>,
        settings: Arc<Settings>,
    ) -> Self {
        let session = session.into();
        let authenticator =
            Authenticator::new(provider, session.clone(), proxy.clone(), &settings.ref_code);
        Self {
            session,
            proxy,
            settings,
            authenticator,
            connector,
            api: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed seed for task shuffling and reductions.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn authenticator(&self) -> &Authenticator<P> {
        &self.authenticator
    }

    /// Run until a fatal error. Returns `Ok` only when a proxy precondition
    /// stops the account before its first cycle.
    pub async fn run(&mut self) -> Result<Abort> {
        if let Some(window) = self.settings.random_delay {
            let delay = window.sample();
            info!(session = %self.session, "The bot will go live in {}s", delay.as_secs());
            tokio::time::sleep(delay).await;
        }

        if let Some(abort) = self.preflight().await {
            self.close_session().await;
            return Ok(abort);
        }

        loop {
            self.iterate().await?;
        }
    }

    /// Proxy requirements checked once before the first cycle.
    ///
    /// A passing check leaves its HTTP session open for the first iteration.
    pub async fn preflight(&mut self) -> Option<Abort> {
        if !self.settings.use_proxy {
            return None;
        }
        if self.proxy.is_none() {
            error!(session = %self.session, "Proxy is not set. Aborting operation.");
            return Some(Abort::MissingProxy);
        }

        let api = match self.ensure_session() {
            Ok(api) => api,
            Err(e) => {
                error!(session = %self.session, "Proxy error: {e}");
                return Some(Abort::ProxyCheckFailed);
            }
        };
        match api.check_proxy().await {
            Ok(info) => {
                info!(
                    session = %self.session,
                    "Check proxy! Country: {} | City: {} | Proxy IP: {}",
                    info.country.as_deref().unwrap_or("?"),
                    info.city.as_deref().unwrap_or("?"),
                    info.ip.as_deref().unwrap_or("?"),
                );
                None
            }
            Err(e) => {
                error!(session = %self.session, "Proxy error: {e}");
                error!(session = %self.session, "Proxy check failed. Aborting operation.");
                Some(Abort::ProxyCheckFailed)
            }
        }
    }

    /// One full iteration: body, error backoff, cleanup, idle sleep.
    ///
    /// Returns `Err` only for fatal errors; the session is closed first.
    pub async fn iterate(&mut self) -> Result<CycleOutcome> {
        let outcome = match self.cycle().await {
            Ok(outcome) => outcome,
            Err(e) => {
                let kind = e.kind();
                let Some(window) = kind.backoff() else {
                    error!(
                        session = %self.session,
                        "Invalid Session: {e}. Manual intervention required."
                    );
                    self.close_session().await;
                    return Err(e);
                };
                let delay = DelayWindow::new(*window.start(), *window.end()).sample();
                error!(
                    session = %self.session,
                    error_kind = ?kind,
                    "{}: {e}. Retrying in {} seconds.",
                    kind.label(),
                    delay.as_secs()
                );
                debug!(session = %self.session, "Full error details: {e:?}");
                tokio::time::sleep(delay).await;
                CycleOutcome::BackedOff(kind)
            }
        };

        self.close_session().await;

        let idle = self.settings.sleep_time.sample();
        let secs = idle.as_secs();
        info!(
            session = %self.session,
            "Sleep before wake up {} hours and {} minutes",
            secs / 3600,
            (secs % 3600) / 60
        );
        tokio::time::sleep(idle).await;

        Ok(outcome)
    }

    async fn cycle(&mut self) -> Result<CycleOutcome> {
        let api = self.ensure_session()?;

        if !self.authenticator.authenticate(api.as_ref()).await? {
            error!(session = %self.session, "Login failed. Retrying in 1 hour.");
            tokio::time::sleep(LOGIN_RETRY_DELAY).await;
            return Ok(CycleOutcome::LoginFailed);
        }
        info!(session = %self.session, "Login successfully!");

        let Some(profile) = self.fetch_profile(api.as_ref()).await else {
            error!(session = %self.session, "Failed to get user info. Retrying in 5 minutes.");
            tokio::time::sleep(PROFILE_RETRY_DELAY).await;
            return Ok(CycleOutcome::ProfileUnavailable);
        };

        info!(
            session = %self.session,
            "Balance: {} | Tickets: {}",
            profile.balance,
            profile.tickets
        );
        if profile.daily_streak.showed {
            info!(
                session = %self.session,
                "Claim daily reward | Day {}",
                profile.daily_streak.day
            );
        }
        tokio::time::sleep(self.settings.mini_sleep.sample()).await;

        let engine = TaskEngine::new(api.as_ref(), &self.session);
        let tasks = match engine.fetch_tasks(FETCH_MAX_RETRIES, FETCH_RETRY_DELAY).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(session = %self.session, "Failed to get tasks: {e}. Skipping tasks.");
                tokio::time::sleep(TASKS_RETRY_DELAY).await;
                return Ok(CycleOutcome::TasksUnavailable);
            }
        };

        let plan = plan_completions(tasks, &self.settings.blacklist, &mut self.rng);
        for completion in &plan {
            engine.complete_task(completion).await;
        }

        let spin_count = profile.tickets.min(self.settings.max_spin_per_cycle);
        let wheel = Wheel::new(
            api.as_ref(),
            &self.session,
            self.settings.task_sleep,
            self.settings.mini_sleep,
        );
        if let Err(e) = wheel.run(spin_count).await {
            error!(session = %self.session, "Error during wheel spin: {e}");
        }

        Ok(CycleOutcome::Completed)
    }

    /// `None` on any failure; a server error adds a short pause first.
    async fn fetch_profile(&self, api: &dyn GameApi) -> Option<Profile> {
        let own_id = self.authenticator.web_app().and_then(|data| data.user_id());
        let referrer = referrer_id(&self.settings.ref_code, own_id);

        match api.get_me(referrer).await {
            Ok(profile) => Some(profile),
            Err(ApiError::Status { status: 500, body }) => {
                error!(session = %self.session, "Server returned 500 error for getMe: {body}");
                tokio::time::sleep(PROFILE_SERVER_ERROR_PAUSE).await;
                None
            }
            Err(ApiError::MissingField(detail)) => {
                error!(session = %self.session, "Invalid response from getMe: {detail}");
                None
            }
            Err(e) => {
                error!(
                    session = %self.session,
                    error_kind = ?e.kind(),
                    "Error in get_me: {e}"
                );
                None
            }
        }
    }

    /// Current HTTP session, opening a new one if the last was closed.
    fn ensure_session(&mut self) -> std::result::Result<Arc<dyn GameApi>, ApiError> {
        if let Some(api) = &self.api
            && !api.is_closed()
        {
            return Ok(Arc::clone(api));
        }
        let api = self.connector.open(self.proxy.as_deref())?;
        self.api = Some(Arc::clone(&api));
        Ok(api)
    }

    async fn close_session(&mut self) {
        if let Some(api) = self.api.take() {
            api.close().await;
        }
    }
}

/// Run one account to completion, logging how it ended.
pub async fn run_account<P: CredentialProvider>(mut account: Account<P>) {
    let session = account.session().to_string();
    match account.run().await {
        Ok(abort) => info!(session = %session, reason = ?abort, "Account stopped"),
        Err(e) => error!(session = %session, "Invalid Session: {e}"),
    }
}
