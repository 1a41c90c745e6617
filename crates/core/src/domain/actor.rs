use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::case::OrganisationId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Exporter,
    Caseworker,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exporter => "exporter",
            Self::Caseworker => "caseworker",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exporter" => Some(Self::Exporter),
            "caseworker" | "gov" | "internal" => Some(Self::Caseworker),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageLicenceFinalAdvice,
    ReopenClosedCases,
    ManageTeamAdvice,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManageLicenceFinalAdvice => "manage_licence_final_advice",
            Self::ReopenClosedCases => "reopen_closed_cases",
            Self::ManageTeamAdvice => "manage_team_advice",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manage_licence_final_advice" => Some(Self::ManageLicenceFinalAdvice),
            "reopen_closed_cases" => Some(Self::ReopenClosedCases),
            "manage_team_advice" => Some(Self::ManageTeamAdvice),
            _ => None,
        }
    }
}

/// Whoever is driving a workflow operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub actor_type: ActorType,
    pub organisation_id: Option<OrganisationId>,
    pub permissions: BTreeSet<Permission>,
}

impl Actor {
    pub const SYSTEM_ID: &'static str = "lite-system";

    pub fn system() -> Self {
        Self {
            id: Self::SYSTEM_ID.to_owned(),
            actor_type: ActorType::System,
            organisation_id: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn exporter(id: impl Into<String>, organisation_id: OrganisationId) -> Self {
        Self {
            id: id.into(),
            actor_type: ActorType::Exporter,
            organisation_id: Some(organisation_id),
            permissions: BTreeSet::new(),
        }
    }

    pub fn caseworker(id: impl Into<String>, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            id: id.into(),
            actor_type: ActorType::Caseworker,
            organisation_id: None,
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}
