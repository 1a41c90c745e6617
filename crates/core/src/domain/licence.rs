use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::case::CaseId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LicenceId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenceStatus {
    Draft,
    Issued,
    Reinstated,
    Revoked,
    Surrendered,
    Suspended,
    Exhausted,
    Cancelled,
    Expired,
}

impl LicenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Issued => "issued",
            Self::Reinstated => "reinstated",
            Self::Revoked => "revoked",
            Self::Surrendered => "surrendered",
            Self::Suspended => "suspended",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "issued" => Some(Self::Issued),
            "reinstated" => Some(Self::Reinstated),
            "revoked" => Some(Self::Revoked),
            "surrendered" => Some(Self::Surrendered),
            "suspended" => Some(Self::Suspended),
            "exhausted" => Some(Self::Exhausted),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Issued or reinstated: the licence can currently be used.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Issued | Self::Reinstated)
    }
}

impl std::fmt::Display for LicenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoodOnLicence {
    pub id: String,
    pub good_on_application_id: String,
    pub good_id: String,
    pub name: String,
    pub description: String,
    pub unit: String,
    pub quantity: Decimal,
    pub value: Decimal,
    pub usage: Decimal,
}

impl GoodOnLicence {
    pub fn is_exhausted(&self) -> bool {
        self.usage >= self.quantity
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Licence {
    pub id: LicenceId,
    pub case_id: CaseId,
    pub reference_code: String,
    pub status: LicenceStatus,
    pub start_date: NaiveDate,
    pub duration_months: u32,
    pub end_date: NaiveDate,
    pub hmrc_integration_sent_at: Option<DateTime<Utc>>,
    pub goods: Vec<GoodOnLicence>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Licence {
    pub fn all_goods_exhausted(&self) -> bool {
        self.goods.iter().all(GoodOnLicence::is_exhausted)
    }

    pub fn good_by_good_id(&self, good_id: &str) -> Option<&GoodOnLicence> {
        self.goods.iter().find(|good| good.good_id == good_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenceDecisionType {
    Issued,
    Refused,
    IssuedOnAppeal,
    Revoked,
}

impl LicenceDecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Refused => "refused",
            Self::IssuedOnAppeal => "issued_on_appeal",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "issued" => Some(Self::Issued),
            "refused" => Some(Self::Refused),
            "issued_on_appeal" => Some(Self::IssuedOnAppeal),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenceDecision {
    pub id: String,
    pub case_id: CaseId,
    pub decision: LicenceDecisionType,
    pub licence_id: Option<LicenceId>,
    pub previous_decision_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
