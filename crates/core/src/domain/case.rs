use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::status::{CaseStatus, SubStatus};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrganisationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseKind {
    Application,
    Query,
    Compliance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSubType {
    Standard,
    Open,
    Hmrc,
    EndUserAdvisory,
    Goods,
    ExhibitionClearance,
    GiftingClearance,
    F680Clearance,
    ComplianceSite,
    ComplianceVisit,
}

impl CaseSubType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Open => "open",
            Self::Hmrc => "hmrc",
            Self::EndUserAdvisory => "end_user_advisory",
            Self::Goods => "goods",
            Self::ExhibitionClearance => "exhibition_clearance",
            Self::GiftingClearance => "gifting_clearance",
            Self::F680Clearance => "f680_clearance",
            Self::ComplianceSite => "compliance_site",
            Self::ComplianceVisit => "compliance_visit",
        }
    }
}

/// Case type reference as it appears on the case record (`siel`, `oiel`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CaseTypeReference {
    #[serde(rename = "siel")]
    Siel,
    #[serde(rename = "sicl")]
    Sicl,
    #[serde(rename = "sitl")]
    Sitl,
    #[serde(rename = "oiel")]
    Oiel,
    #[serde(rename = "oicl")]
    Oicl,
    #[serde(rename = "f680")]
    F680,
    #[serde(rename = "exhc")]
    Exhc,
    #[serde(rename = "gift")]
    Gift,
    #[serde(rename = "cre")]
    Cre,
    #[serde(rename = "gqy")]
    Gqy,
    #[serde(rename = "eua")]
    Eua,
    #[serde(rename = "comp_c")]
    CompSite,
    #[serde(rename = "comp_v")]
    CompVisit,
}

impl CaseTypeReference {
    pub const ALL: [CaseTypeReference; 13] = [
        Self::Siel,
        Self::Sicl,
        Self::Sitl,
        Self::Oiel,
        Self::Oicl,
        Self::F680,
        Self::Exhc,
        Self::Gift,
        Self::Cre,
        Self::Gqy,
        Self::Eua,
        Self::CompSite,
        Self::CompVisit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Siel => "siel",
            Self::Sicl => "sicl",
            Self::Sitl => "sitl",
            Self::Oiel => "oiel",
            Self::Oicl => "oicl",
            Self::F680 => "f680",
            Self::Exhc => "exhc",
            Self::Gift => "gift",
            Self::Cre => "cre",
            Self::Gqy => "gqy",
            Self::Eua => "eua",
            Self::CompSite => "comp_c",
            Self::CompVisit => "comp_v",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|reference| reference.as_str() == value)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Siel => "Standard Individual Export Licence",
            Self::Sicl => "Standard Individual Trade Control Licence",
            Self::Sitl => "Standard Individual Transhipment Licence",
            Self::Oiel => "Open Individual Export Licence",
            Self::Oicl => "Open Individual Trade Control Licence",
            Self::F680 => "MOD F680 Clearance",
            Self::Exhc => "MOD Exhibition Clearance",
            Self::Gift => "MOD Gifting Clearance",
            Self::Cre => "HMRC Query",
            Self::Gqy => "Goods Query",
            Self::Eua => "End User Advisory Query",
            Self::CompSite => "Compliance Site Case",
            Self::CompVisit => "Compliance Visit Case",
        }
    }

    pub fn sub_type(&self) -> CaseSubType {
        match self {
            Self::Siel | Self::Sicl | Self::Sitl => CaseSubType::Standard,
            Self::Oiel | Self::Oicl => CaseSubType::Open,
            Self::F680 => CaseSubType::F680Clearance,
            Self::Exhc => CaseSubType::ExhibitionClearance,
            Self::Gift => CaseSubType::GiftingClearance,
            Self::Cre => CaseSubType::Hmrc,
            Self::Gqy => CaseSubType::Goods,
            Self::Eua => CaseSubType::EndUserAdvisory,
            Self::CompSite => CaseSubType::ComplianceSite,
            Self::CompVisit => CaseSubType::ComplianceVisit,
        }
    }

    pub fn kind(&self) -> CaseKind {
        match self {
            Self::Gqy | Self::Eua => CaseKind::Query,
            Self::CompSite | Self::CompVisit => CaseKind::Compliance,
            _ => CaseKind::Application,
        }
    }

    pub fn is_standard_licence(&self) -> bool {
        self.sub_type() == CaseSubType::Standard
    }

    pub fn is_mod_clearance(&self) -> bool {
        matches!(self, Self::F680 | Self::Exhc | Self::Gift)
    }

    /// Case types whose licences may be updated through HMRC usage reports.
    pub fn issues_licences(&self) -> bool {
        matches!(self.sub_type(), CaseSubType::Standard | CaseSubType::Open) || self.is_mod_clearance()
    }

    /// Case types whose licence changes are delivered to the HMRC integration.
    pub fn sends_licences_to_hmrc(&self) -> bool {
        matches!(self.sub_type(), CaseSubType::Standard | CaseSubType::Open)
    }

    pub fn is_trade_control(&self) -> bool {
        matches!(self, Self::Sicl | Self::Oicl)
    }

    pub fn is_transhipment(&self) -> bool {
        matches!(self, Self::Sitl)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    Permanent,
    Temporary,
}

impl ExportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Temporary => "temporary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "permanent" => Some(Self::Permanent),
            "temporary" => Some(Self::Temporary),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyType {
    EndUser,
    UltimateEndUser,
    Consignee,
    ThirdParty,
}

impl PartyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndUser => "end_user",
            Self::UltimateEndUser => "ultimate_end_user",
            Self::Consignee => "consignee",
            Self::ThirdParty => "third_party",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "end_user" => Some(Self::EndUser),
            "ultimate_end_user" => Some(Self::UltimateEndUser),
            "consignee" => Some(Self::Consignee),
            "third_party" => Some(Self::ThirdParty),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoodOnApplication {
    pub id: String,
    pub good_id: String,
    pub name: String,
    pub description: String,
    pub control_list_entries: Vec<String>,
    pub quantity: Decimal,
    pub unit: String,
    pub value: Decimal,
    pub is_good_controlled: bool,
    pub is_verified: bool,
    pub flags: BTreeSet<String>,
    pub copy_of: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub party_type: PartyType,
    pub name: String,
    pub address: String,
    pub country_code: String,
    pub flags: BTreeSet<String>,
    pub copy_of: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteOnApplication {
    pub id: String,
    pub site_id: String,
    pub copy_of: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseAssignment {
    pub queue_id: String,
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CaseParameter {
    Flag(String),
    Country(String),
    CaseType(CaseTypeReference),
}

/// Root workflow entity. Applications, queries and compliance cases share
/// this shape; the case type decides which statuses and rules apply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub case_type: CaseTypeReference,
    pub organisation_id: OrganisationId,
    pub organisation_name: String,
    pub name: String,
    pub status: CaseStatus,
    pub sub_status: Option<SubStatus>,
    pub reference_code: Option<String>,
    pub export_type: Option<ExportType>,
    pub case_officer: Option<String>,
    pub queues: BTreeSet<String>,
    pub assignments: Vec<CaseAssignment>,
    pub flags: BTreeSet<String>,
    pub goods: Vec<GoodOnApplication>,
    pub parties: Vec<Party>,
    pub sites: Vec<SiteOnApplication>,
    pub licence_duration_months: Option<u32>,
    pub copy_of: Option<CaseId>,
    pub amendment_of: Option<CaseId>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_closed_at: Option<DateTime<Utc>>,
    pub sla_days: u32,
    pub sla_remaining_days: Option<i32>,
    pub sla_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Case {
    /// A fresh draft with no goods, parties or workflow history.
    pub fn draft(
        id: CaseId,
        case_type: CaseTypeReference,
        organisation_id: OrganisationId,
        organisation_name: impl Into<String>,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            case_type,
            organisation_id,
            organisation_name: organisation_name.into(),
            name: name.into(),
            status: CaseStatus::Draft,
            sub_status: None,
            reference_code: None,
            export_type: None,
            case_officer: None,
            queues: BTreeSet::new(),
            assignments: Vec::new(),
            flags: BTreeSet::new(),
            goods: Vec::new(),
            parties: Vec::new(),
            sites: Vec::new(),
            licence_duration_months: None,
            copy_of: None,
            amendment_of: None,
            submitted_at: None,
            last_closed_at: None,
            sla_days: 0,
            sla_remaining_days: None,
            sla_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn end_user(&self) -> Option<&Party> {
        self.parties.iter().find(|party| party.party_type == PartyType::EndUser)
    }

    pub fn destination_countries(&self) -> BTreeSet<String> {
        self.parties.iter().map(|party| party.country_code.clone()).collect()
    }

    /// Every flag attached to the case, its goods or its destinations.
    pub fn all_flags(&self) -> BTreeSet<String> {
        let mut flags = self.flags.clone();
        for good in &self.goods {
            flags.extend(good.flags.iter().cloned());
        }
        for party in &self.parties {
            flags.extend(party.flags.iter().cloned());
        }
        flags
    }

    /// Attributes routing rules match against.
    pub fn parameter_set(&self) -> BTreeSet<CaseParameter> {
        let mut parameters: BTreeSet<CaseParameter> =
            self.all_flags().into_iter().map(CaseParameter::Flag).collect();
        parameters.extend(self.destination_countries().into_iter().map(CaseParameter::Country));
        parameters.insert(CaseParameter::CaseType(self.case_type));
        parameters
    }

    pub fn is_owned_by(&self, organisation_id: &OrganisationId) -> bool {
        &self.organisation_id == organisation_id
    }
}
