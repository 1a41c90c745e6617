use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::case::CaseId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceType {
    Approve,
    Proviso,
    Refuse,
    NoLicenceRequired,
    NotApplicable,
    Conflicting,
    Inform,
}

impl AdviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Proviso => "proviso",
            Self::Refuse => "refuse",
            Self::NoLicenceRequired => "no_licence_required",
            Self::NotApplicable => "not_applicable",
            Self::Conflicting => "conflicting",
            Self::Inform => "inform",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "proviso" => Some(Self::Proviso),
            "refuse" => Some(Self::Refuse),
            "no_licence_required" => Some(Self::NoLicenceRequired),
            "not_applicable" => Some(Self::NotApplicable),
            "conflicting" => Some(Self::Conflicting),
            "inform" => Some(Self::Inform),
            _ => None,
        }
    }

    /// Advice that results in a licence being issued.
    pub fn grants_licence(&self) -> bool {
        matches!(self, Self::Approve | Self::Proviso)
    }
}

/// Countersign ordering: `First` must be recorded before `Second`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountersignOrder {
    First,
    Second,
}

impl CountersignOrder {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersignAdvice {
    pub id: String,
    pub case_id: CaseId,
    pub advice_id: String,
    pub order: CountersignOrder,
    pub outcome_accepted: bool,
    pub reasons: String,
    pub countersigned_user: String,
    pub valid: bool,
    pub created_at: DateTime<Utc>,
}
