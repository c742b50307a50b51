//! Bounded polling of asynchronous remote tasks.

use std::time::Duration;

use cloudsync_agent::TaskPollConfig;
use cloudsync_core::{RemoteMutator, Scope, SyncError, SyncResult, TaskHandle, TaskStatus};
use serde::Serialize;
use tracing::{debug, warn};

/// How a polled task ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "camelCase")]
pub enum TaskOutcome {
    /// The remote side reported success.
    Succeeded,
    /// The remote side reported failure.
    Failed(String),
    /// Attempts ran out. The mutation may still complete.
    TimedOut,
}

impl TaskOutcome {
    /// Whether the task succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Convert to a result, keeping a timeout distinguishable from a failure.
    pub fn into_result(self, task: &TaskHandle, attempts: u32) -> SyncResult<()> {
        match self {
            Self::Succeeded => Ok(()),
            Self::Failed(message) => Err(SyncError::TaskFailed {
                task_id: task.to_string(),
                message,
            }),
            Self::TimedOut => Err(SyncError::TaskTimeout {
                task_id: task.to_string(),
                attempts,
            }),
        }
    }
}

/// Polls a task at a fixed interval up to a fixed number of attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskPoller {
    interval: Duration,
    max_attempts: u32,
}

impl Default for TaskPoller {
    fn default() -> Self {
        Self::from_config(&TaskPollConfig::default())
    }
}

impl TaskPoller {
    /// Create a poller. `max_attempts` of zero is treated as one.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Create a poller from configuration.
    pub fn from_config(config: &TaskPollConfig) -> Self {
        Self::new(config.interval(), config.max_attempts)
    }

    /// Sleep between polls.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Polls before giving up.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Poll `task` until it finishes or attempts run out.
    ///
    /// A transient polling error counts as a pending attempt. Any other
    /// polling error is returned as is.
    pub async fn wait(
        &self,
        mutator: &dyn RemoteMutator,
        scope: &Scope,
        task: &TaskHandle,
    ) -> SyncResult<TaskOutcome> {
        for attempt in 1..=self.max_attempts {
            match mutator.poll_status(scope, task).await {
                Ok(TaskStatus::Succeeded) => {
                    debug!(%task, attempt, "task succeeded");
                    return Ok(TaskOutcome::Succeeded);
                }
                Ok(TaskStatus::Failed(message)) => {
                    debug!(%task, attempt, %message, "task failed");
                    return Ok(TaskOutcome::Failed(message));
                }
                Ok(TaskStatus::Pending) => {}
                Err(error) if error.is_transient() => {
                    warn!(%task, attempt, %error, "task poll failed, retrying");
                }
                Err(error) => return Err(error),
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        warn!(%task, attempts = self.max_attempts, "task did not finish in time");
        Ok(TaskOutcome::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_core::Mutation;
    use cloudsync_testing::InMemoryCloud;

    fn create_lb() -> Mutation {
        Mutation::CreateLoadBalancer {
            name: "web".into(),
            kind: "OPEN".into(),
            network_id: None,
            subnet_id: None,
            security_group_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn waits_through_pending_polls() {
        let scope = Scope::new("prod", "r1");
        let cloud = InMemoryCloud::new();
        cloud.task_latency(3);
        let submission = cloud.submit(&scope, create_lb()).await.unwrap();

        let poller = TaskPoller::new(Duration::ZERO, 5);
        let outcome = poller.wait(&cloud, &scope, &submission.task).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Succeeded);
    }

    #[tokio::test]
    async fn stalled_task_times_out() {
        let scope = Scope::new("prod", "r1");
        let cloud = InMemoryCloud::new();
        cloud.stall_tasks(true);
        let submission = cloud.submit(&scope, create_lb()).await.unwrap();

        let poller = TaskPoller::new(Duration::ZERO, 3);
        let outcome = poller.wait(&cloud, &scope, &submission.task).await.unwrap();
        assert_eq!(outcome, TaskOutcome::TimedOut);

        let err = outcome.into_result(&submission.task, 3).unwrap_err();
        assert!(err.is_unknown_outcome());
    }

    #[tokio::test]
    async fn failed_task_reports_reason() {
        let scope = Scope::new("prod", "r1");
        let cloud = InMemoryCloud::new();
        cloud.fail_mutation("createLoadBalancer", "quota exceeded");
        let submission = cloud.submit(&scope, create_lb()).await.unwrap();

        let outcome = TaskPoller::new(Duration::ZERO, 3)
            .wait(&cloud, &scope, &submission.task)
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Failed("quota exceeded".into()));
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let cloud = InMemoryCloud::new();
        let result = TaskPoller::new(Duration::ZERO, 3)
            .wait(&cloud, &Scope::new("prod", "r1"), &TaskHandle::new("task-404"))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn from_config_uses_interval_and_attempts() {
        let poller = TaskPoller::from_config(&TaskPollConfig {
            interval_ms: 250,
            max_attempts: 4,
        });
        assert_eq!(poller.interval(), Duration::from_millis(250));
        assert_eq!(poller.max_attempts(), 4);
        assert_eq!(TaskPoller::new(Duration::ZERO, 0).max_attempts(), 1);
    }
}
