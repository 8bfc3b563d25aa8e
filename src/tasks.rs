//! Discovery and completion of remote tasks.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::api::GameApi;
use crate::config::DelayWindow;
use crate::error::ApiError;

/// The only task type that is completed more than once per listing.
pub const COUNTABLE_TASK: &str = "video";

/// Pause after every completion attempt.
pub const COMPLETION_PAUSE: DelayWindow = DelayWindow::new(20, 30);

pub const FETCH_MAX_RETRIES: u32 = 3;
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(60);

/// A remote task as listed by `getTasks`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Task {
    #[serde(rename = "type")]
    pub task_type: String,
    pub is_claimed: bool,
    #[serde(default = "default_max_count")]
    pub max_count: i64,
    #[serde(default)]
    pub count: i64,
}

fn default_max_count() -> i64 {
    1
}

/// One planned `complete_task` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCompletion {
    pub task_type: String,
    pub max_count: i64,
    /// Number of completion attempts to make.
    pub reduced_count: i64,
    pub initial_count: i64,
}

/// Slots to complete for a countable task, deliberately leaving 1-4 unclaimed.
pub fn reduced_count<R: Rng + ?Sized>(max_count: i64, count: i64, rng: &mut R) -> i64 {
    let remaining = (max_count - count).max(0);
    (remaining - rng.gen_range(1..=4)).max(0)
}

/// Shuffle the listing and plan completions for every eligible task.
///
/// A task is eligible when unclaimed and its type is not blacklisted.
pub fn plan_completions<R: Rng + ?Sized>(
    mut tasks: Vec<Task>,
    blacklist: &HashSet<String>,
    rng: &mut R,
) -> Vec<PlannedCompletion> {
    tasks.shuffle(&mut *rng);
    tasks
        .into_iter()
        .filter(|task| !task.is_claimed && !blacklist.contains(&task.task_type))
        .map(|task| {
            if task.task_type == COUNTABLE_TASK {
                PlannedCompletion {
                    reduced_count: reduced_count(task.max_count, task.count, &mut *rng),
                    max_count: task.max_count,
                    initial_count: task.count,
                    task_type: task.task_type,
                }
            } else {
                PlannedCompletion {
                    task_type: task.task_type,
                    max_count: 1,
                    reduced_count: 1,
                    initial_count: 0,
                }
            }
        })
        .collect()
}

/// Fetches and completes tasks for one account session.
pub struct TaskEngine<'a> {
    api: &'a dyn GameApi,
    session: &'a str,
}

impl<'a> TaskEngine<'a> {
    pub fn new(api: &'a dyn GameApi, session: &'a str) -> Self {
        Self { api, session }
    }

    /// Fetch the task list, retrying transport failures with a fixed delay.
    pub async fn fetch_tasks(
        &self,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Vec<Task>, ApiError> {
        let attempts = max_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.api.get_tasks().await {
                Ok(tasks) => return Ok(tasks),
                Err(e) if e.is_transport() => {
                    error!(
                        session = %self.session,
                        "Error getting tasks (attempt {attempt}/{attempts}): {e}"
                    );
                    if attempt >= attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Make exactly `plan.reduced_count` completion attempts.
    ///
    /// Failures are logged and never stop the remaining attempts. Returns
    /// the number of attempts the server acknowledged.
    pub async fn complete_task(&self, plan: &PlannedCompletion) -> i64 {
        let mut count = plan.initial_count;
        let mut acknowledged = 0;

        for _ in 0..plan.reduced_count.max(0) {
            match self.api.complete_task(&plan.task_type).await {
                Ok(outcome) if outcome.ok => {
                    count += 1;
                    acknowledged += 1;
                    let reward = outcome
                        .reward
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "nothing".into());
                    if plan.task_type == COUNTABLE_TASK {
                        info!(
                            session = %self.session,
                            "Completed {count}/{} (Planned: {}): Received {reward} for task {}",
                            plan.max_count, plan.reduced_count, plan.task_type
                        );
                    } else {
                        info!(
                            session = %self.session,
                            "Received {reward} for task {}", plan.task_type
                        );
                    }
                }
                Ok(outcome) => {
                    warn!(
                        session = %self.session,
                        task = %plan.task_type,
                        "Task completion unsuccessful. Response: {}", outcome.raw
                    );
                }
                Err(ApiError::Status { status, body }) => {
                    error!(
                        session = %self.session,
                        task = %plan.task_type,
                        "HTTP error during task completion: {status} - {body}"
                    );
                }
                Err(ApiError::Timeout) => {
                    error!(
                        session = %self.session,
                        task = %plan.task_type,
                        "Timeout error during task completion"
                    );
                }
                Err(ApiError::MalformedBody(detail)) => {
                    error!(
                        session = %self.session,
                        task = %plan.task_type,
                        "Invalid JSON response: {detail}"
                    );
                }
                Err(e) => {
                    error!(
                        session = %self.session,
                        task = %plan.task_type,
                        "Error during task completion: {e}"
                    );
                }
            }

            tokio::time::sleep(COMPLETION_PAUSE.sample()).await;
        }

        acknowledged
    }
}
