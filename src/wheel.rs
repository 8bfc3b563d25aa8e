//! Reward wheel — bonus ticket claims followed by a spin loop.
//!
//! The spin loop reads its remaining budget from every spin response, so a
//! ticket won mid-loop extends the loop past the initial `spin_count`.

use std::fmt;

use serde::Deserialize;
use tracing::{error, info};

use crate::api::GameApi;
use crate::config::DelayWindow;
use crate::error::ApiError;

/// Wheel bonus task state from `wheel/load`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WheelState {
    /// Epoch second after which the daily ticket can be claimed.
    pub daily: i64,
    /// Whether the periodic task has been claimed.
    pub rps: bool,
    pub bird: bool,
}

/// Ticket-granting wheel tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelTask {
    Daily,
    Rps,
    Bird,
}

impl WheelTask {
    pub fn as_str(self) -> &'static str {
        match self {
            WheelTask::Daily => "daily",
            WheelTask::Rps => "rps",
            WheelTask::Bird => "bird",
        }
    }
}

/// Prize tag returned by a spin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SpinReward {
    Points1k,
    Points10k,
    Ticket1,
    Tickets3,
    Ton001,
    Ton4,
    Not1,
    Not5,
    Unknown(String),
}

impl From<String> for SpinReward {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "c1000" => SpinReward::Points1k,
            "c10000" => SpinReward::Points10k,
            "t1" => SpinReward::Ticket1,
            "t3" => SpinReward::Tickets3,
            "tc1" => SpinReward::Ton001,
            "tc4" => SpinReward::Ton4,
            "nt1" => SpinReward::Not1,
            "nt5" => SpinReward::Not5,
            _ => SpinReward::Unknown(tag),
        }
    }
}

impl fmt::Display for SpinReward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpinReward::Points1k => write!(f, "1,000 AP"),
            SpinReward::Points10k => write!(f, "10,000 AP"),
            SpinReward::Ticket1 => write!(f, "1 TICKET"),
            SpinReward::Tickets3 => write!(f, "3 TICKETS"),
            SpinReward::Ton001 => write!(f, "0.01 TON"),
            SpinReward::Ton4 => write!(f, "4 TON"),
            SpinReward::Not1 => write!(f, "1 NOT"),
            SpinReward::Not5 => write!(f, "5 NOT"),
            SpinReward::Unknown(tag) => write!(f, "unknown reward {tag:?}"),
        }
    }
}

/// Result of one `wheel/spin` call.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpinResult {
    /// TON balance in hundredths.
    #[serde(default)]
    pub toncoin: i64,
    #[serde(default)]
    pub notcoin: i64,
    /// Tickets left after this spin.
    #[serde(default)]
    pub tickets: i64,
    pub reward: SpinReward,
}

impl SpinResult {
    pub fn ton(&self) -> f64 {
        self.toncoin as f64 / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyStatus {
    Claimable,
    /// Seconds until the daily ticket becomes claimable.
    WaitFor(i64),
}

pub fn daily_status(now: i64, deadline: i64) -> DailyStatus {
    if now >= deadline {
        DailyStatus::Claimable
    } else {
        DailyStatus::WaitFor(deadline - now)
    }
}

/// Render a wait as `{h}h {m}m`.
pub fn format_wait(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}

/// What a wheel run did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WheelReport {
    pub claimed: Vec<WheelTask>,
    pub spins: u32,
}

pub struct Wheel<'a> {
    api: &'a dyn GameApi,
    session: &'a str,
    task_sleep: DelayWindow,
    mini_sleep: DelayWindow,
}

impl<'a> Wheel<'a> {
    pub fn new(
        api: &'a dyn GameApi,
        session: &'a str,
        task_sleep: DelayWindow,
        mini_sleep: DelayWindow,
    ) -> Self {
        Self {
            api,
            session,
            task_sleep,
            mini_sleep,
        }
    }

    /// Claim available bonus tickets, then spin until the server reports none left.
    ///
    /// Errors while loading or claiming propagate; a failed spin ends the
    /// spin loop but not the run.
    pub async fn run(&self, spin_count: i64) -> Result<WheelReport, ApiError> {
        let mut report = WheelReport::default();
        let state = self.api.load_wheel().await?;

        let now = chrono::Utc::now().timestamp();
        match daily_status(now, state.daily) {
            DailyStatus::Claimable => {
                self.claim(WheelTask::Daily, "Claimed 1 ticket for daily reward")
                    .await?;
                report.claimed.push(WheelTask::Daily);
            }
            DailyStatus::WaitFor(secs) => {
                info!(
                    session = %self.session,
                    "Daily reward of 1 ticket can be claimed in {}",
                    format_wait(secs)
                );
            }
        }

        if !state.rps {
            self.claim(WheelTask::Rps, "Claimed 1 ticket for task").await?;
            report.claimed.push(WheelTask::Rps);
        }

        if !state.bird {
            self.claim(WheelTask::Bird, "Claimed 1 ticket for task").await?;
            report.claimed.push(WheelTask::Bird);
        }

        report.spins = self.spin_loop(spin_count).await;
        Ok(report)
    }

    async fn claim(&self, task: WheelTask, success: &str) -> Result<(), ApiError> {
        let outcome = self.api.claim_wheel_task(task).await?;
        if outcome.ok {
            info!(session = %self.session, "{success}");
        }
        tokio::time::sleep(self.task_sleep.sample()).await;
        Ok(())
    }

    async fn spin_loop(&self, spin_count: i64) -> u32 {
        let mut budget = spin_count;
        let mut spins = 0;

        while budget > 0 {
            let result = match self.api.spin().await {
                Ok(result) => result,
                Err(e) => {
                    error!(session = %self.session, "Error during wheel spin: {e}");
                    break;
                }
            };
            spins += 1;

            info!(
                session = %self.session,
                "Wheel balance: {:.2} TON | {} NOT",
                result.ton(),
                result.notcoin
            );
            info!(
                session = %self.session,
                "Reward: {} | Remaining tickets: {}",
                result.reward,
                result.tickets
            );

            budget = result.tickets;
            tokio::time::sleep(self.mini_sleep.sample()).await;
        }

        spins
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use secrecy::SecretString;
    use uuid::Uuid;

    use super::*;
    use crate::api::{ClaimOutcome, Profile, ProxyInfo};
    use crate::tasks::Task;

    struct MockWheelApi {
        state: WheelState,
        spins: Mutex<Vec<Result<SpinResult, ApiError>>>,
        claims: Mutex<Vec<WheelTask>>,
        spin_calls: AtomicUsize,
    }

    impl MockWheelApi {
        fn new(state: WheelState, spins: Vec<Result<SpinResult, ApiError>>) -> Self {
            Self {
                state,
                spins: Mutex::new(spins),
                claims: Mutex::new(Vec::new()),
                spin_calls: AtomicUsize::new(0),
            }
        }
    }

    fn spin(tickets: i64, reward: &str) -> Result<SpinResult, ApiError> {
        Ok(SpinResult {
            toncoin: 150,
            notcoin: 3,
            tickets,
            reward: SpinReward::from(reward.to_string()),
        })
    }

    fn all_claimed(daily: i64) -> WheelState {
        WheelState {
            daily,
            rps: true,
            bird: true,
        }
    }

    fn future_deadline() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[async_trait]
    impl GameApi for MockWheelApi {
        fn id(&self) -> Uuid {
            Uuid::nil()
        }
        fn authorize(&self, _token: SecretString) {}
        async fn get_me(&self, _referrer_id: i64) -> Result<Profile, ApiError> {
            unimplemented!("not used in wheel tests")
        }
        async fn get_tasks(&self) -> Result<Vec<Task>, ApiError> {
            unimplemented!("not used in wheel tests")
        }
        async fn complete_task(&self, _task_type: &str) -> Result<ClaimOutcome, ApiError> {
            unimplemented!("not used in wheel tests")
        }
        async fn load_wheel(&self) -> Result<WheelState, ApiError> {
            Ok(self.state.clone())
        }
        async fn claim_wheel_task(&self, task: WheelTask) -> Result<ClaimOutcome, ApiError> {
            self.claims.lock().unwrap().push(task);
            Ok(ClaimOutcome {
                ok: true,
                reward: Some(serde_json::json!(1)),
                raw: serde_json::json!({"ok": true}),
            })
        }
        async fn spin(&self) -> Result<SpinResult, ApiError> {
            self.spin_calls.fetch_add(1, Ordering::SeqCst);
            let mut spins = self.spins.lock().unwrap();
            if spins.is_empty() {
                Err(ApiError::Transport("no scripted spin".into()))
            } else {
                spins.remove(0)
            }
        }
        async fn check_proxy(&self) -> Result<ProxyInfo, ApiError> {
            unimplemented!("not used in wheel tests")
        }
        async fn close(&self) {}
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn wheel(api: &MockWheelApi) -> Wheel<'_> {
        Wheel::new(api, "alice", DelayWindow::new(25, 50), DelayWindow::new(7, 20))
    }

    #[test]
    fn reward_tags_parse() {
        let result: SpinResult =
            serde_json::from_str(r#"{"toncoin":250,"notcoin":5,"tickets":2,"reward":"t3"}"#)
                .unwrap();
        assert_eq!(result.reward, SpinReward::Tickets3);
        assert!((result.ton() - 2.5).abs() < f64::EPSILON);
        assert_eq!(
            SpinReward::from("zz".to_string()),
            SpinReward::Unknown("zz".into())
        );
        assert_eq!(SpinReward::Points10k.to_string(), "10,000 AP");
    }

    #[test]
    fn spin_balances_default_to_zero() {
        let result: SpinResult = serde_json::from_str(r#"{"reward":"c1000"}"#).unwrap();
        assert_eq!(result.tickets, 0);
        assert_eq!(result.toncoin, 0);
    }

    #[test]
    fn daily_status_past_and_future() {
        assert_eq!(daily_status(1000, 990), DailyStatus::Claimable);
        assert_eq!(daily_status(1000, 1000), DailyStatus::Claimable);
        assert_eq!(daily_status(1000, 4600), DailyStatus::WaitFor(3600));
    }

    #[test]
    fn wait_formatting() {
        assert_eq!(format_wait(3600), "1h 0m");
        assert_eq!(format_wait(3599), "0h 59m");
        assert_eq!(format_wait(2 * 3600 + 30 * 60 + 15), "2h 30m");
        assert_eq!(format_wait(-5), "0h 0m");
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_claims_daily() {
        let past = chrono::Utc::now().timestamp() - 10;
        let api = MockWheelApi::new(all_claimed(past), vec![]);
        let report = wheel(&api).run(0).await.unwrap();

        assert_eq!(report.claimed, vec![WheelTask::Daily]);
        assert_eq!(*api.claims.lock().unwrap(), vec![WheelTask::Daily]);
    }

    #[tokio::test(start_paused = true)]
    async fn future_deadline_skips_daily() {
        let api = MockWheelApi::new(all_claimed(future_deadline()), vec![]);
        let report = wheel(&api).run(0).await.unwrap();

        assert!(report.claimed.is_empty());
        assert_eq!(api.spin_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unclaimed_bonus_tasks_are_claimed_in_order() {
        let state = WheelState {
            daily: future_deadline(),
            rps: false,
            bird: false,
        };
        let api = MockWheelApi::new(state, vec![]);
        let report = wheel(&api).run(0).await.unwrap();

        assert_eq!(report.claimed, vec![WheelTask::Rps, WheelTask::Bird]);
    }

    #[tokio::test(start_paused = true)]
    async fn server_granted_ticket_extends_spin_loop() {
        let api = MockWheelApi::new(
            all_claimed(future_deadline()),
            vec![spin(3, "t1"), spin(3, "c1000"), spin(2, "nt1"), spin(0, "tc1")],
        );
        let report = wheel(&api).run(3).await.unwrap();

        assert_eq!(report.spins, 4);
        assert_eq!(api.spin_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn spin_error_breaks_loop_without_failing_run() {
        let api = MockWheelApi::new(
            all_claimed(future_deadline()),
            vec![
                spin(4, "c1000"),
                Err(ApiError::MalformedBody("eof".into())),
                spin(3, "c1000"),
            ],
        );
        let report = wheel(&api).run(5).await.unwrap();

        assert_eq!(report.spins, 1);
        assert_eq!(api.spin_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_not_decremented_client_side() {
        // Server keeps reporting one ticket left until it says zero.
        let api = MockWheelApi::new(
            all_claimed(future_deadline()),
            vec![spin(1, "c1000"), spin(1, "t1"), spin(1, "c1000"), spin(0, "c1000")],
        );
        let report = wheel(&api).run(1).await.unwrap();
        assert_eq!(report.spins, 4);
    }
}
