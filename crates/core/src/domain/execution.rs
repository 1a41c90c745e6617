use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::case::CaseId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionTaskId(pub String);

/// De-duplication key: at most one unfinished task may carry a given key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionTransitionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTaskState {
    Queued,
    Running,
    RetryableFailed,
    FailedTerminal,
    Completed,
}

impl ExecutionTaskState {
    const ENCODINGS: [(Self, &'static str); 5] = [
        (Self::Queued, "queued"),
        (Self::Running, "running"),
        (Self::RetryableFailed, "retryable_failed"),
        (Self::FailedTerminal, "failed_terminal"),
        (Self::Completed, "completed"),
    ];

    pub fn as_str(&self) -> &'static str {
        Self::ENCODINGS.iter().find(|(state, _)| state == self).map_or("queued", |(_, encoded)| encoded)
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ENCODINGS.iter().find(|(_, encoded)| *encoded == value).map(|(state, _)| *state)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::FailedTerminal)
    }

    /// States a worker may pick up once `available_at` has passed.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Queued | Self::RetryableFailed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub id: ExecutionTaskId,
    pub case_id: CaseId,
    pub operation_kind: String,
    pub payload_json: String,
    pub payload_hash: String,
    pub operation_key: OperationKey,
    pub state: ExecutionTaskState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub reschedule_count: u32,
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result_fingerprint: Option<String>,
    pub correlation_id: String,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionTask {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state.is_claimable() && self.available_at <= now
    }
}

/// One row of a task's state history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTransitionEvent {
    pub id: ExecutionTransitionId,
    pub task_id: ExecutionTaskId,
    pub case_id: CaseId,
    pub from_state: Option<ExecutionTaskState>,
    pub to_state: ExecutionTaskState,
    pub transition_reason: String,
    pub error_class: Option<String>,
    pub decision_context_json: String,
    pub actor_type: String,
    pub actor_id: String,
    pub operation_key: OperationKey,
    pub correlation_id: String,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::ExecutionTaskState;

    #[test]
    fn storage_encoding_is_stable() {
        let states = [
            (ExecutionTaskState::Queued, "queued"),
            (ExecutionTaskState::Running, "running"),
            (ExecutionTaskState::RetryableFailed, "retryable_failed"),
            (ExecutionTaskState::FailedTerminal, "failed_terminal"),
            (ExecutionTaskState::Completed, "completed"),
        ];

        for (state, encoded) in states {
            assert_eq!(state.as_str(), encoded);
            assert_eq!(ExecutionTaskState::parse(encoded), Some(state));
        }
        assert_eq!(ExecutionTaskState::parse(" Running "), Some(ExecutionTaskState::Running));
        assert_eq!(ExecutionTaskState::parse("reserved"), None);
    }

    #[test]
    fn only_waiting_states_are_claimable() {
        assert!(ExecutionTaskState::Queued.is_claimable());
        assert!(ExecutionTaskState::RetryableFailed.is_claimable());
        assert!(!ExecutionTaskState::Running.is_claimable());
        assert!(ExecutionTaskState::FailedTerminal.is_finished());
        assert!(!ExecutionTaskState::RetryableFailed.is_finished());
    }
}
