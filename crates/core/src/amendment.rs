//! Copying applications and creating exporter amendments.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::actor::{Actor, ActorType};
use crate::domain::case::{Case, CaseId, CaseKind};
use crate::domain::status::CaseStatus;
use crate::errors::DomainError;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Clones `source` into a fresh draft. Workflow state is not carried over;
/// every good, party and site records which source row it was copied from.
pub fn copy_application(source: &Case, new_name: impl Into<String>, now: DateTime<Utc>) -> Case {
    let mut copy = clone_as_draft(source, now);
    copy.name = new_name.into();
    copy.copy_of = Some(source.id.clone());
    copy
}

/// Starts an exporter amendment of a submitted application. The caller still
/// has to move the source to `superseded_by_exporter_edit`.
pub fn create_amendment(source: &Case, actor: &Actor, now: DateTime<Utc>) -> Result<Case, DomainError> {
    if actor.actor_type != ActorType::Exporter {
        return Err(DomainError::Forbidden("only exporters can amend an application".to_owned()));
    }
    if actor.organisation_id.as_ref() != Some(&source.organisation_id) {
        return Err(DomainError::Forbidden("application belongs to another organisation".to_owned()));
    }
    if source.case_type.kind() != CaseKind::Application {
        return Err(DomainError::field("case_type", format!("{} cases cannot be amended", source.case_type.label())));
    }
    if source.status == CaseStatus::Draft || source.status.is_terminal() || source.status.is_system() {
        return Err(DomainError::field(
            "status",
            format!("applications in status '{}' cannot be amended", source.status.label()),
        ));
    }

    let mut amendment = clone_as_draft(source, now);
    amendment.amendment_of = Some(source.id.clone());
    Ok(amendment)
}

/// The earliest amendment created from `source_id`, if any.
pub fn superseded_by<'a>(source_id: &CaseId, candidates: &'a [Case]) -> Option<&'a Case> {
    candidates
        .iter()
        .filter(|candidate| candidate.amendment_of.as_ref() == Some(source_id))
        .min_by_key(|candidate| candidate.created_at)
}

fn clone_as_draft(source: &Case, now: DateTime<Utc>) -> Case {
    let mut clone =
        Case::draft(CaseId(new_id()), source.case_type, source.organisation_id.clone(), &source.organisation_name, &source.name, now);
    clone.export_type = source.export_type;
    clone.goods = source
        .goods
        .iter()
        .map(|good| {
            let mut copied = good.clone();
            copied.id = new_id();
            copied.flags.clear();
            copied.copy_of = Some(good.id.clone());
            copied
        })
        .collect();
    clone.parties = source
        .parties
        .iter()
        .map(|party| {
            let mut copied = party.clone();
            copied.id = new_id();
            copied.flags.clear();
            copied.copy_of = Some(party.id.clone());
            copied
        })
        .collect();
    clone.sites = source
        .sites
        .iter()
        .map(|site| {
            let mut copied = site.clone();
            copied.id = new_id();
            copied.copy_of = Some(site.id.clone());
            copied
        })
        .collect();
    clone
}
