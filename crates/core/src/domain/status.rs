use serde::{Deserialize, Serialize};

use crate::domain::case::{CaseKind, CaseSubType, CaseTypeReference};

/// Case workflow statuses. The wire value returned by [`CaseStatus::as_str`]
/// is what gets persisted and exchanged over the API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CaseStatus {
    #[serde(rename = "appeal_final_review")]
    AppealFinalReview,
    #[serde(rename = "appeal_review")]
    AppealReview,
    #[serde(rename = "applicant_editing")]
    ApplicantEditing,
    #[serde(rename = "change_initial_review")]
    ChangeInitialReview,
    #[serde(rename = "change_under_final_review")]
    ChangeUnderFinalReview,
    #[serde(rename = "change_under_review")]
    ChangeUnderReview,
    #[serde(rename = "clc_review")]
    ClcReview,
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "under_internal_review")]
    UnderInternalReview,
    #[serde(rename = "return_to_inspector")]
    ReturnToInspector,
    #[serde(rename = "awaiting_exporter_response")]
    AwaitingExporterResponse,
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "deregistered")]
    Deregistered,
    #[serde(rename = "draft")]
    Draft,
    #[serde(rename = "finalised")]
    Finalised,
    #[serde(rename = "initial_checks")]
    InitialChecks,
    #[serde(rename = "pv_review")]
    PvReview,
    #[serde(rename = "registered")]
    Registered,
    #[serde(rename = "reopened_for_changes")]
    ReopenedForChanges,
    #[serde(rename = "reopened_due_to_org_changes")]
    ReopenedDueToOrgChanges,
    #[serde(rename = "resubmitted")]
    Resubmitted,
    #[serde(rename = "revoked")]
    Revoked,
    #[serde(rename = "ogd_advice")]
    OgdAdvice,
    #[serde(rename = "submitted")]
    Submitted,
    #[serde(rename = "surrendered")]
    Surrendered,
    #[serde(rename = "suspended")]
    Suspended,
    #[serde(rename = "under_appeal")]
    UnderAppeal,
    #[serde(rename = "under_ECJU_review")]
    UnderEcjuReview,
    #[serde(rename = "under_final_review")]
    UnderFinalReview,
    #[serde(rename = "under_review")]
    UnderReview,
    #[serde(rename = "withdrawn")]
    Withdrawn,
    #[serde(rename = "ogd_consolidation")]
    OgdConsolidation,
    #[serde(rename = "final_review_countersign")]
    FinalReviewCountersign,
    #[serde(rename = "final_review_second_countersign")]
    FinalReviewSecondCountersign,
    #[serde(rename = "superseded_by_exporter_edit")]
    SupersededByExporterEdit,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 35] = [
        Self::AppealFinalReview,
        Self::AppealReview,
        Self::ApplicantEditing,
        Self::ChangeInitialReview,
        Self::ChangeUnderFinalReview,
        Self::ChangeUnderReview,
        Self::ClcReview,
        Self::Open,
        Self::UnderInternalReview,
        Self::ReturnToInspector,
        Self::AwaitingExporterResponse,
        Self::Closed,
        Self::Deregistered,
        Self::Draft,
        Self::Finalised,
        Self::InitialChecks,
        Self::PvReview,
        Self::Registered,
        Self::ReopenedForChanges,
        Self::ReopenedDueToOrgChanges,
        Self::Resubmitted,
        Self::Revoked,
        Self::OgdAdvice,
        Self::Submitted,
        Self::Surrendered,
        Self::Suspended,
        Self::UnderAppeal,
        Self::UnderEcjuReview,
        Self::UnderFinalReview,
        Self::UnderReview,
        Self::Withdrawn,
        Self::OgdConsolidation,
        Self::FinalReviewCountersign,
        Self::FinalReviewSecondCountersign,
        Self::SupersededByExporterEdit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppealFinalReview => "appeal_final_review",
            Self::AppealReview => "appeal_review",
            Self::ApplicantEditing => "applicant_editing",
            Self::ChangeInitialReview => "change_initial_review",
            Self::ChangeUnderFinalReview => "change_under_final_review",
            Self::ChangeUnderReview => "change_under_review",
            Self::ClcReview => "clc_review",
            Self::Open => "open",
            Self::UnderInternalReview => "under_internal_review",
            Self::ReturnToInspector => "return_to_inspector",
            Self::AwaitingExporterResponse => "awaiting_exporter_response",
            Self::Closed => "closed",
            Self::Deregistered => "deregistered",
            Self::Draft => "draft",
            Self::Finalised => "finalised",
            Self::InitialChecks => "initial_checks",
            Self::PvReview => "pv_review",
            Self::Registered => "registered",
            Self::ReopenedForChanges => "reopened_for_changes",
            Self::ReopenedDueToOrgChanges => "reopened_due_to_org_changes",
            Self::Resubmitted => "resubmitted",
            Self::Revoked => "revoked",
            Self::OgdAdvice => "ogd_advice",
            Self::Submitted => "submitted",
            Self::Surrendered => "surrendered",
            Self::Suspended => "suspended",
            Self::UnderAppeal => "under_appeal",
            Self::UnderEcjuReview => "under_ECJU_review",
            Self::UnderFinalReview => "under_final_review",
            Self::UnderReview => "under_review",
            Self::Withdrawn => "withdrawn",
            Self::OgdConsolidation => "ogd_consolidation",
            Self::FinalReviewCountersign => "final_review_countersign",
            Self::FinalReviewSecondCountersign => "final_review_second_countersign",
            Self::SupersededByExporterEdit => "superseded_by_exporter_edit",
        }
    }

    /// Wire values are case sensitive (`under_ECJU_review` keeps its capitals).
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.iter().copied().find(|status| status.as_str() == value)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AppealFinalReview => "Appeal final review",
            Self::AppealReview => "Appeal review",
            Self::ApplicantEditing => "Applicant editing",
            Self::ChangeInitialReview => "Change initial review",
            Self::ChangeUnderFinalReview => "Change under final review",
            Self::ChangeUnderReview => "Change under review",
            Self::ClcReview => "CLC review",
            Self::Open => "Open",
            Self::UnderInternalReview => "Under internal review",
            Self::ReturnToInspector => "Return to inspector",
            Self::AwaitingExporterResponse => "Awaiting exporter response",
            Self::Closed => "Closed",
            Self::Deregistered => "De-registered",
            Self::Draft => "Draft",
            Self::Finalised => "Finalised",
            Self::InitialChecks => "Initial checks",
            Self::PvReview => "PV grading review",
            Self::Registered => "Registered",
            Self::ReopenedForChanges => "Re-opened for changes",
            Self::ReopenedDueToOrgChanges => "Re-opened due to org changes",
            Self::Resubmitted => "Resubmitted",
            Self::Revoked => "Revoked",
            Self::OgdAdvice => "OGD Advice",
            Self::Submitted => "Submitted",
            Self::Surrendered => "Surrendered",
            Self::Suspended => "Suspended",
            Self::UnderAppeal => "Under appeal",
            Self::UnderEcjuReview => "Under ECJU appeal",
            Self::UnderFinalReview => "Under final review",
            Self::UnderReview => "Under review",
            Self::Withdrawn => "Withdrawn",
            Self::OgdConsolidation => "OGD Consolidation",
            Self::FinalReviewCountersign => "final review countersign",
            Self::FinalReviewSecondCountersign => "final review second countersign",
            Self::SupersededByExporterEdit => "Superseded by exporter edit",
        }
    }

    fn id_suffix(&self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Submitted => 1,
            Self::ApplicantEditing => 2,
            Self::Resubmitted => 3,
            Self::InitialChecks => 4,
            Self::UnderReview => 5,
            Self::UnderFinalReview => 6,
            Self::Finalised => 7,
            Self::Withdrawn => 8,
            Self::Closed => 9,
            Self::Registered => 10,
            Self::UnderAppeal => 11,
            Self::AppealReview => 12,
            Self::AppealFinalReview => 13,
            Self::ReopenedForChanges => 14,
            Self::ChangeInitialReview => 15,
            Self::ChangeUnderReview => 16,
            Self::ChangeUnderFinalReview => 17,
            Self::UnderEcjuReview => 18,
            Self::Revoked => 19,
            Self::Suspended => 20,
            Self::Surrendered => 21,
            Self::Deregistered => 22,
            Self::ClcReview => 23,
            Self::PvReview => 24,
            Self::ReopenedDueToOrgChanges => 25,
            Self::OgdAdvice => 26,
            Self::Open => 27,
            Self::UnderInternalReview => 28,
            Self::ReturnToInspector => 29,
            Self::AwaitingExporterResponse => 30,
            Self::OgdConsolidation => 31,
            Self::FinalReviewCountersign => 32,
            Self::FinalReviewSecondCountersign => 33,
            Self::SupersededByExporterEdit => 34,
        }
    }

    /// Fixed identifier shared with reference data (`00000000-0000-0000-0000-0000000000NN`).
    pub fn id(&self) -> String {
        format!("00000000-0000-0000-0000-{:012}", self.id_suffix())
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.id() == id.trim())
    }

    /// Display ordering. `draft` sorts first and never appears in the catalogue.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Submitted => 1,
            Self::ApplicantEditing => 2,
            Self::Resubmitted => 3,
            Self::InitialChecks => 4,
            Self::UnderReview => 5,
            Self::OgdAdvice => 6,
            Self::OgdConsolidation => 7,
            Self::UnderFinalReview => 8,
            Self::FinalReviewCountersign => 9,
            Self::FinalReviewSecondCountersign => 10,
            Self::Finalised => 11,
            Self::ClcReview => 12,
            Self::PvReview => 13,
            Self::Open => 14,
            Self::UnderInternalReview => 15,
            Self::ReturnToInspector => 16,
            Self::AwaitingExporterResponse => 17,
            Self::Withdrawn => 18,
            Self::Closed => 19,
            Self::Registered => 20,
            Self::UnderAppeal => 21,
            Self::AppealReview => 22,
            Self::AppealFinalReview => 23,
            Self::ReopenedForChanges => 24,
            Self::ReopenedDueToOrgChanges => 25,
            Self::ChangeInitialReview => 26,
            Self::ChangeUnderReview => 27,
            Self::ChangeUnderFinalReview => 28,
            Self::UnderEcjuReview => 29,
            Self::Revoked => 30,
            Self::Suspended => 31,
            Self::Surrendered => 32,
            Self::Deregistered => 33,
            Self::SupersededByExporterEdit => 34,
        }
    }

    pub fn workflow_sequence(&self) -> Option<u8> {
        match self {
            Self::Submitted => Some(1),
            Self::InitialChecks => Some(2),
            Self::UnderReview => Some(3),
            Self::OgdAdvice => Some(4),
            Self::OgdConsolidation => Some(5),
            Self::UnderFinalReview => Some(6),
            Self::Finalised => Some(7),
            _ => None,
        }
    }

    /// The status with the smallest workflow sequence greater than this one's.
    pub fn next_in_workflow(&self) -> Option<Self> {
        let current = self.workflow_sequence()?;
        Self::ALL
            .iter()
            .copied()
            .filter_map(|status| status.workflow_sequence().map(|sequence| (sequence, status)))
            .filter(|(sequence, _)| *sequence > current)
            .min_by_key(|(sequence, _)| *sequence)
            .map(|(_, status)| status)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Closed
                | Self::Deregistered
                | Self::Finalised
                | Self::Registered
                | Self::Revoked
                | Self::Surrendered
                | Self::Withdrawn
                | Self::SupersededByExporterEdit
        )
    }

    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::AppealReview
                | Self::AppealFinalReview
                | Self::ChangeUnderReview
                | Self::ChangeUnderFinalReview
                | Self::Closed
                | Self::Deregistered
                | Self::Finalised
                | Self::Registered
                | Self::ReopenedDueToOrgChanges
                | Self::UnderEcjuReview
                | Self::UnderFinalReview
                | Self::Revoked
                | Self::Surrendered
                | Self::Suspended
                | Self::Withdrawn
                | Self::OgdAdvice
                | Self::OgdConsolidation
                | Self::FinalReviewCountersign
                | Self::FinalReviewSecondCountersign
                | Self::SupersededByExporterEdit
        )
    }

    pub fn is_major_editable(&self) -> bool {
        matches!(self, Self::ApplicantEditing | Self::Draft)
    }

    /// Statuses only the system itself may assign.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::Draft | Self::SupersededByExporterEdit)
    }

    pub fn is_countersign(&self) -> bool {
        matches!(self, Self::FinalReviewCountersign | Self::FinalReviewSecondCountersign)
    }

    pub fn is_caseworker_operable(&self) -> bool {
        !self.is_system()
            && !matches!(
                self,
                Self::ApplicantEditing
                    | Self::Finalised
                    | Self::Surrendered
                    | Self::Suspended
                    | Self::ReopenedForChanges
            )
    }

    /// Statuses a case of the given type may hold.
    pub fn applies_to(&self, case_type: CaseTypeReference) -> bool {
        if self.is_system() {
            return *self == Self::Draft;
        }
        match (case_type.kind(), case_type.sub_type()) {
            (CaseKind::Query, CaseSubType::Goods) => matches!(
                self,
                Self::ClcReview | Self::PvReview | Self::Submitted | Self::Closed | Self::Withdrawn
            ),
            (CaseKind::Query, _) => matches!(self, Self::Submitted | Self::Closed | Self::Withdrawn),
            (CaseKind::Compliance, CaseSubType::ComplianceSite) => {
                matches!(self, Self::Open | Self::Closed)
            }
            (CaseKind::Compliance, _) => matches!(
                self,
                Self::Open
                    | Self::UnderInternalReview
                    | Self::ReturnToInspector
                    | Self::AwaitingExporterResponse
                    | Self::Closed
            ),
            (CaseKind::Application, _) => !matches!(
                self,
                Self::ClcReview
                    | Self::PvReview
                    | Self::Open
                    | Self::UnderInternalReview
                    | Self::ReturnToInspector
                    | Self::AwaitingExporterResponse
            ),
        }
    }

    /// Public status list ordered by priority. System statuses are excluded
    /// and countersign statuses only appear when countersign routing is on.
    pub fn public_catalogue(countersign_routing: bool) -> Vec<CaseStatus> {
        let mut statuses: Vec<CaseStatus> = Self::ALL
            .iter()
            .copied()
            .filter(|status| !status.is_system())
            .filter(|status| countersign_routing || !status.is_countersign())
            .collect();
        statuses.sort_by_key(CaseStatus::priority);
        statuses
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubStatus {
    #[serde(rename = "under_final_review__inform_letter_sent")]
    UnderFinalReviewInformLetterSent,
    #[serde(rename = "finalised__approved")]
    FinalisedApproved,
    #[serde(rename = "finalised__refused")]
    FinalisedRefused,
    #[serde(rename = "under_appeal__appeal_received")]
    UnderAppealAppealReceived,
    #[serde(rename = "under_appeal__final_decision")]
    UnderAppealFinalDecision,
}

impl SubStatus {
    pub const ALL: [SubStatus; 5] = [
        Self::UnderFinalReviewInformLetterSent,
        Self::FinalisedApproved,
        Self::FinalisedRefused,
        Self::UnderAppealAppealReceived,
        Self::UnderAppealFinalDecision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnderFinalReviewInformLetterSent => "under_final_review__inform_letter_sent",
            Self::FinalisedApproved => "finalised__approved",
            Self::FinalisedRefused => "finalised__refused",
            Self::UnderAppealAppealReceived => "under_appeal__appeal_received",
            Self::UnderAppealFinalDecision => "under_appeal__final_decision",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|sub_status| sub_status.as_str() == value)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::UnderFinalReviewInformLetterSent => "Inform letter sent",
            Self::FinalisedApproved => "Approved",
            Self::FinalisedRefused => "Refused",
            Self::UnderAppealAppealReceived => "Appeal received",
            Self::UnderAppealFinalDecision => "Final decision",
        }
    }

    pub fn parent(&self) -> CaseStatus {
        match self {
            Self::UnderFinalReviewInformLetterSent => CaseStatus::UnderFinalReview,
            Self::FinalisedApproved | Self::FinalisedRefused => CaseStatus::Finalised,
            Self::UnderAppealAppealReceived | Self::UnderAppealFinalDecision => {
                CaseStatus::UnderAppeal
            }
        }
    }

    pub fn for_status(status: CaseStatus) -> Vec<SubStatus> {
        Self::ALL.iter().copied().filter(|sub_status| sub_status.parent() == status).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::domain::case::CaseTypeReference;
    use crate::domain::status::{CaseStatus, SubStatus};

    #[test]
    fn wire_values_round_trip_and_ids_are_unique() {
        let mut ids = HashSet::new();
        for status in CaseStatus::ALL {
            assert_eq!(CaseStatus::parse(status.as_str()), Some(status));
            assert_eq!(CaseStatus::from_id(&status.id()), Some(status));
            assert!(ids.insert(status.id()), "duplicate id for {status}");
        }
        assert_eq!(CaseStatus::parse("under_ecju_review"), None);
        assert_eq!(CaseStatus::Submitted.id(), "00000000-0000-0000-0000-000000000001");
        assert_eq!(CaseStatus::ClcReview.id(), "00000000-0000-0000-0000-000000000023");
    }

    #[test]
    fn catalogue_is_ordered_by_priority_and_excludes_system_statuses() {
        let catalogue = CaseStatus::public_catalogue(false);
        assert_eq!(catalogue.first(), Some(&CaseStatus::Submitted));
        assert_eq!(catalogue.last(), Some(&CaseStatus::Deregistered));
        assert!(!catalogue.contains(&CaseStatus::Draft));
        assert!(!catalogue.contains(&CaseStatus::SupersededByExporterEdit));
        assert!(!catalogue.contains(&CaseStatus::FinalReviewCountersign));
        assert_eq!(catalogue.len(), 31);
        assert!(catalogue.windows(2).all(|pair| pair[0].priority() < pair[1].priority()));

        let with_countersign = CaseStatus::public_catalogue(true);
        assert_eq!(with_countersign.len(), 33);
        assert_eq!(with_countersign[8], CaseStatus::FinalReviewCountersign);
        assert_eq!(with_countersign[9], CaseStatus::FinalReviewSecondCountersign);
    }

    #[test]
    fn workflow_sequence_walks_to_finalised() {
        let mut status = CaseStatus::Submitted;
        let mut walked = vec![status];
        while let Some(next) = status.next_in_workflow() {
            walked.push(next);
            status = next;
        }
        assert_eq!(
            walked,
            vec![
                CaseStatus::Submitted,
                CaseStatus::InitialChecks,
                CaseStatus::UnderReview,
                CaseStatus::OgdAdvice,
                CaseStatus::OgdConsolidation,
                CaseStatus::UnderFinalReview,
                CaseStatus::Finalised,
            ]
        );
        assert_eq!(CaseStatus::ApplicantEditing.next_in_workflow(), None);
    }

    #[test]
    fn classification_lists_match_workflow_rules() {
        assert!(CaseStatus::Withdrawn.is_terminal());
        assert!(CaseStatus::SupersededByExporterEdit.is_terminal());
        assert!(CaseStatus::SupersededByExporterEdit.is_read_only());
        assert!(!CaseStatus::Suspended.is_terminal());
        assert!(CaseStatus::Suspended.is_read_only());
        assert!(CaseStatus::Draft.is_major_editable());
        assert!(CaseStatus::ApplicantEditing.is_major_editable());
        assert!(!CaseStatus::ApplicantEditing.is_caseworker_operable());
        assert!(!CaseStatus::Finalised.is_caseworker_operable());
        assert!(CaseStatus::UnderReview.is_caseworker_operable());
        assert!(CaseStatus::Draft.is_system());
    }

    #[test]
    fn statuses_are_scoped_to_case_types() {
        assert!(CaseStatus::ClcReview.applies_to(CaseTypeReference::Gqy));
        assert!(!CaseStatus::UnderReview.applies_to(CaseTypeReference::Gqy));
        assert!(CaseStatus::Open.applies_to(CaseTypeReference::CompSite));
        assert!(!CaseStatus::ReturnToInspector.applies_to(CaseTypeReference::CompSite));
        assert!(CaseStatus::ReturnToInspector.applies_to(CaseTypeReference::CompVisit));
        assert!(CaseStatus::UnderReview.applies_to(CaseTypeReference::Siel));
        assert!(!CaseStatus::PvReview.applies_to(CaseTypeReference::Siel));
        assert!(!CaseStatus::SupersededByExporterEdit.applies_to(CaseTypeReference::Siel));
    }

    #[test]
    fn sub_statuses_know_their_parent() {
        assert_eq!(SubStatus::FinalisedApproved.parent(), CaseStatus::Finalised);
        assert_eq!(SubStatus::parse("finalised__refused"), Some(SubStatus::FinalisedRefused));
        assert_eq!(SubStatus::parse("approved"), None);
        assert_eq!(SubStatus::for_status(CaseStatus::UnderAppeal).len(), 2);
        assert!(SubStatus::for_status(CaseStatus::Submitted).is_empty());
    }
}
