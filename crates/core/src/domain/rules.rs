use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::case::CaseParameter;
use crate::domain::status::CaseStatus;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingUser {
    pub id: String,
    pub active: bool,
}

/// Routing rule owned by a team. Rules in the same team are grouped by tier;
/// the first tier with a match wins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    pub team_id: String,
    pub queue_id: String,
    pub status: CaseStatus,
    pub tier: u32,
    pub active: bool,
    pub user: Option<RoutingUser>,
    pub parameter_sets: Vec<BTreeSet<CaseParameter>>,
}

impl RoutingRule {
    /// An empty criteria list matches every case in the rule's status.
    pub fn matches(&self, parameters: &BTreeSet<CaseParameter>) -> bool {
        if self.parameter_sets.is_empty() {
            return true;
        }
        self.parameter_sets.iter().any(|set| set.is_subset(parameters))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagLevel {
    Case,
    Good,
    Destination,
}

impl FlagLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Case => "case",
            Self::Good => "good",
            Self::Destination => "destination",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "case" => Some(Self::Case),
            "good" => Some(Self::Good),
            "destination" => Some(Self::Destination),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggingRule {
    pub id: String,
    pub flag_id: String,
    pub level: FlagLevel,
    pub active: bool,
    pub matching_values: Vec<String>,
    pub matching_groups: Vec<String>,
    pub excluded_values: Vec<String>,
    pub is_for_verified_goods_only: bool,
}

/// Control list rating hierarchy (`ML1a` -> `ML1` -> `ML`), child to parent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlListTree {
    parents: BTreeMap<String, String>,
}

impl ControlListTree {
    pub fn new(parents: impl IntoIterator<Item = (String, String)>) -> Self {
        Self { parents: parents.into_iter().collect() }
    }

    pub fn insert(&mut self, rating: impl Into<String>, parent: impl Into<String>) {
        self.parents.insert(rating.into(), parent.into());
    }

    /// All ancestors of a rating, nearest first.
    pub fn ancestors(&self, rating: &str) -> Vec<String> {
        let mut ancestors = Vec::new();
        let mut current = rating;
        while let Some(parent) = self.parents.get(current) {
            if ancestors.contains(parent) || parent == rating {
                break;
            }
            ancestors.push(parent.clone());
            current = parent;
        }
        ancestors
    }
}
