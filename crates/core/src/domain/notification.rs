use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::case::CaseId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApplicantEditing,
    CountersignRejected,
    LicenceIssued,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplicantEditing => "applicant_editing",
            Self::CountersignRejected => "countersign_rejected",
            Self::LicenceIssued => "licence_issued",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "applicant_editing" => Some(Self::ApplicantEditing),
            "countersign_rejected" => Some(Self::CountersignRejected),
            "licence_issued" => Some(Self::LicenceIssued),
            _ => None,
        }
    }
}

/// Outbox entry. Recorded alongside the change that caused it; never rendered here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub case_id: CaseId,
    pub kind: NotificationKind,
    pub recipient: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        case_id: CaseId,
        kind: NotificationKind,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            case_id,
            kind,
            recipient: recipient.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}
