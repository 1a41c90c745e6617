//! Durable task queue state machine.
//!
//! Background work (HMRC licence delivery) is recorded as [`ExecutionTask`]s.
//! Every state change yields an [`ExecutionTransitionEvent`] so the queue
//! history can be replayed. Retryable failures back off exponentially up to
//! `max_retries`; past that ceiling the task is rescheduled after a fixed
//! window with its attempt counter reset, so retryable work is never dropped.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::case::CaseId;
use crate::domain::execution::{
    ExecutionTask, ExecutionTaskId, ExecutionTaskState, ExecutionTransitionEvent,
    ExecutionTransitionId, OperationKey,
};

/// Upper bound for any single delay the engine schedules (30 days).
pub const MAX_DELAY_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct ExecutionEngineConfig {
    /// How long before a claimed task is considered stale
    pub claim_timeout_seconds: i64,
    pub default_max_retries: u32,
    pub retry_backoff_multiplier: u32,
    pub retry_base_delay_seconds: i64,
    /// Delay applied once the retry ceiling is reached
    pub reschedule_delay_seconds: i64,
}

impl Default for ExecutionEngineConfig {
    fn default() -> Self {
        Self {
            claim_timeout_seconds: 300,
            default_max_retries: 3,
            retry_backoff_multiplier: 2,
            retry_base_delay_seconds: 5,
            reschedule_delay_seconds: 3600,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("invalid state transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: ExecutionTaskState, to: ExecutionTaskState, reason: String },
    #[error("task not found: {0:?}")]
    TaskNotFound(ExecutionTaskId),
    #[error("claim conflict: task {0:?} already claimed by {1}")]
    ClaimConflict(ExecutionTaskId, String),
    #[error("task not yet available: {0:?}")]
    TaskNotYetAvailable(ExecutionTaskId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub task: ExecutionTask,
    pub transition: ExecutionTransitionEvent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Back off and try again; never gives up.
    Retry,
    /// The failure cannot succeed on retry.
    FailTerminal,
}

#[derive(Clone, Debug)]
pub struct DeterministicExecutionEngine {
    config: ExecutionEngineConfig,
}

impl DeterministicExecutionEngine {
    pub fn new() -> Self {
        Self::with_config(ExecutionEngineConfig::default())
    }

    pub fn with_config(config: ExecutionEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutionEngineConfig {
        &self.config
    }

    /// Exponential back-off for the given attempt, capped at the reschedule
    /// window.
    pub fn retry_delay_seconds(&self, retry_count: u32) -> i64 {
        let factor = self.config.retry_backoff_multiplier.checked_pow(retry_count).map_or(i64::MAX, i64::from);
        self.config
            .retry_base_delay_seconds
            .saturating_mul(factor)
            .min(self.config.reschedule_delay_seconds)
    }

    /// Builds the initial queued task and its creation transition.
    pub fn create_task(
        &self,
        case_id: CaseId,
        operation_kind: impl Into<String>,
        payload_json: impl Into<String>,
        operation_key: OperationKey,
        correlation_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> TransitionResult {
        let payload_json = payload_json.into();
        let task = ExecutionTask {
            id: ExecutionTaskId(Uuid::new_v4().to_string()),
            case_id,
            operation_kind: operation_kind.into(),
            payload_hash: Self::hash_payload(&payload_json),
            payload_json,
            operation_key,
            state: ExecutionTaskState::Queued,
            retry_count: 0,
            max_retries: self.config.default_max_retries,
            reschedule_count: 0,
            available_at: now,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            result_fingerprint: None,
            correlation_id: correlation_id.into(),
            state_version: 1,
            created_at: now,
            updated_at: now,
        };

        let transition = self.transition(
            &task,
            None,
            "task_created",
            None,
            serde_json::json!({ "operation_kind": task.operation_kind }),
            "system",
            now,
        );
        TransitionResult { task, transition }
    }

    /// Queued/RetryableFailed -> Running. A stale Running claim may be stolen.
    pub fn claim_task(
        &self,
        mut task: ExecutionTask,
        worker_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, ExecutionError> {
        let worker_id = worker_id.into();

        match task.state {
            ExecutionTaskState::Queued | ExecutionTaskState::RetryableFailed => {}
            ExecutionTaskState::Running => {
                if let Some(claimed_at) = task.claimed_at {
                    if now < claimed_at + delay(self.config.claim_timeout_seconds) {
                        return Err(ExecutionError::ClaimConflict(
                            task.id.clone(),
                            task.claimed_by.clone().unwrap_or_default(),
                        ));
                    }
                }
            }
            ExecutionTaskState::Completed | ExecutionTaskState::FailedTerminal => {
                return Err(ExecutionError::InvalidTransition {
                    from: task.state,
                    to: ExecutionTaskState::Running,
                    reason: "task already in terminal state".to_owned(),
                });
            }
        }

        if now < task.available_at {
            return Err(ExecutionError::TaskNotYetAvailable(task.id.clone()));
        }

        let from_state = task.state;
        task.state = ExecutionTaskState::Running;
        task.claimed_by = Some(worker_id.clone());
        task.claimed_at = Some(now);
        task.state_version += 1;
        task.updated_at = now;

        let transition = self.transition(
            &task,
            Some(from_state),
            "task_claimed",
            None,
            serde_json::json!({
                "worker_id": worker_id,
                "claim_timeout_seconds": self.config.claim_timeout_seconds,
            }),
            &worker_id,
            now,
        );
        Ok(TransitionResult { task, transition })
    }

    pub fn complete_task(
        &self,
        mut task: ExecutionTask,
        result_fingerprint: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, ExecutionError> {
        self.validate_transition(&task, ExecutionTaskState::Completed)?;

        let from_state = task.state;
        let actor_id = task.claimed_by.clone().unwrap_or_else(|| "system".to_owned());
        task.state = ExecutionTaskState::Completed;
        task.result_fingerprint = Some(result_fingerprint.into());
        task.last_error = None;
        task.state_version += 1;
        task.updated_at = now;
        task.claimed_by = None;
        task.claimed_at = None;

        let transition = self.transition(
            &task,
            Some(from_state),
            "task_completed",
            None,
            serde_json::json!({ "result_fingerprint": task.result_fingerprint }),
            &actor_id,
            now,
        );
        Ok(TransitionResult { task, transition })
    }

    /// Running -> RetryableFailed (backoff or reschedule) or FailedTerminal.
    pub fn fail_task(
        &self,
        mut task: ExecutionTask,
        error: impl Into<String>,
        error_class: impl Into<String>,
        retry_policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, ExecutionError> {
        let error = error.into();
        let error_class = error_class.into();
        self.validate_transition(&task, ExecutionTaskState::RetryableFailed)?;

        let from_state = task.state;
        let actor_id = task.claimed_by.clone().unwrap_or_else(|| "system".to_owned());
        task.last_error = Some(error.clone());
        task.state_version += 1;
        task.updated_at = now;
        task.claimed_by = None;
        task.claimed_at = None;

        let (reason, context) = match retry_policy {
            RetryPolicy::FailTerminal => {
                task.state = ExecutionTaskState::FailedTerminal;
                (
                    "task_failed_terminal",
                    serde_json::json!({
                        "retry_count": task.retry_count,
                        "error": error,
                        "error_class": error_class,
                    }),
                )
            }
            RetryPolicy::Retry if task.retry_count < task.max_retries => {
                let backoff_seconds = self.retry_delay_seconds(task.retry_count);
                task.state = ExecutionTaskState::RetryableFailed;
                task.retry_count += 1;
                task.available_at = now + delay(backoff_seconds);
                (
                    "task_failed_retryable",
                    serde_json::json!({
                        "retry_count": task.retry_count,
                        "max_retries": task.max_retries,
                        "next_available_at": task.available_at,
                        "error": error,
                        "error_class": error_class,
                    }),
                )
            }
            RetryPolicy::Retry => {
                task.state = ExecutionTaskState::RetryableFailed;
                task.retry_count = 0;
                task.reschedule_count += 1;
                task.available_at = now + delay(self.config.reschedule_delay_seconds);
                (
                    "task_rescheduled",
                    serde_json::json!({
                        "reschedule_count": task.reschedule_count,
                        "max_retries": task.max_retries,
                        "next_available_at": task.available_at,
                        "error": error,
                        "error_class": error_class,
                    }),
                )
            }
        };

        let transition =
            self.transition(&task, Some(from_state), reason, Some(error_class), context, &actor_id, now);
        Ok(TransitionResult { task, transition })
    }

    /// Running tasks whose claim outlived the claim timeout.
    pub fn recover_stale_tasks(
        &self,
        tasks: Vec<ExecutionTask>,
        reference_time: DateTime<Utc>,
    ) -> Vec<ExecutionTask> {
        let stale_threshold = reference_time - delay(self.config.claim_timeout_seconds);

        tasks
            .into_iter()
            .filter(|task| {
                task.state == ExecutionTaskState::Running
                    && task.claimed_at.is_some_and(|claimed_at| claimed_at < stale_threshold)
            })
            .collect()
    }

    pub fn hash_payload(payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn validate_transition(
        &self,
        task: &ExecutionTask,
        to_state: ExecutionTaskState,
    ) -> Result<(), ExecutionError> {
        use ExecutionTaskState::{Completed, FailedTerminal, Queued, Running, RetryableFailed};

        let valid = matches!(
            (task.state, to_state),
            (Running, Completed)
                | (Running, RetryableFailed)
                | (Running, FailedTerminal)
                | (Queued, Running)
                | (RetryableFailed, Running)
        ) || task.state == to_state;

        if valid {
            Ok(())
        } else {
            Err(ExecutionError::InvalidTransition {
                from: task.state,
                to: to_state,
                reason: format!("cannot transition from {:?} to {:?}", task.state, to_state),
            })
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn transition(
        &self,
        task: &ExecutionTask,
        from_state: Option<ExecutionTaskState>,
        reason: &str,
        error_class: Option<String>,
        context: serde_json::Value,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> ExecutionTransitionEvent {
        ExecutionTransitionEvent {
            id: ExecutionTransitionId(Uuid::new_v4().to_string()),
            task_id: task.id.clone(),
            case_id: task.case_id.clone(),
            from_state,
            to_state: task.state,
            transition_reason: reason.to_owned(),
            error_class,
            decision_context_json: context.to_string(),
            actor_type: "worker".to_owned(),
            actor_id: actor_id.to_owned(),
            operation_key: task.operation_key.clone(),
            correlation_id: task.correlation_id.clone(),
            state_version: task.state_version,
            occurred_at: now,
        }
    }
}

fn delay(seconds: i64) -> Duration {
    Duration::seconds(seconds.clamp(0, MAX_DELAY_SECONDS))
}

impl Default for DeterministicExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}
