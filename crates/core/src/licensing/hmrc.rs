//! Licence payloads sent to the HMRC integration and usage reports received
//! back from it.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditContext, AuditEvent, AuditSink, AuditVerb};
use crate::domain::case::{Case, CaseSubType, CaseTypeReference};
use crate::domain::licence::{Licence, LicenceId, LicenceStatus};
use crate::errors::FieldErrors;
use crate::licensing::lifecycle::LicenceChange;

pub const UPDATE_LICENCE_PATH: &str = "/mail/update-licence/";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HmrcAction {
    Insert,
    Update,
    Cancel,
    Open,
    Exhaust,
    Surrender,
    Expire,
}

impl HmrcAction {
    /// Actions HMRC may report back in a usage update.
    pub const FROM_HMRC: [HmrcAction; 5] =
        [HmrcAction::Open, HmrcAction::Exhaust, HmrcAction::Cancel, HmrcAction::Surrender, HmrcAction::Expire];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Cancel => "cancel",
            Self::Open => "open",
            Self::Exhaust => "exhaust",
            Self::Surrender => "surrender",
            Self::Expire => "expire",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "cancel" => Some(Self::Cancel),
            "open" => Some(Self::Open),
            "exhaust" => Some(Self::Exhaust),
            "surrender" => Some(Self::Surrender),
            "expire" => Some(Self::Expire),
            _ => None,
        }
    }

    pub fn for_licence_status(status: LicenceStatus) -> Self {
        match status {
            LicenceStatus::Issued => Self::Insert,
            LicenceStatus::Reinstated => Self::Update,
            _ => Self::Cancel,
        }
    }

    pub fn is_from_hmrc(&self) -> bool {
        Self::FROM_HMRC.contains(self)
    }

    /// Licence status implied by an action HMRC reports. `open` leaves the
    /// status alone.
    pub fn reported_status(&self) -> Option<LicenceStatus> {
        match self {
            Self::Exhaust => Some(LicenceStatus::Exhausted),
            Self::Cancel => Some(LicenceStatus::Cancelled),
            Self::Surrender => Some(LicenceStatus::Surrendered),
            Self::Expire => Some(LicenceStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HmrcCountry {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HmrcOrganisation {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HmrcAddress {
    pub line_1: String,
    pub country: HmrcCountry,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HmrcEndUser {
    pub name: String,
    pub address: HmrcAddress,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HmrcGood {
    pub id: String,
    pub usage: Decimal,
    pub name: String,
    pub description: String,
    pub unit: String,
    pub quantity: Decimal,
    pub value: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HmrcLicencePayload {
    pub id: String,
    pub reference: String,
    #[serde(rename = "type")]
    pub case_type: String,
    pub action: HmrcAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub organisation: HmrcOrganisation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_user: Option<HmrcEndUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countries: Option<Vec<HmrcCountry>>,
    pub goods: Vec<HmrcGood>,
}

/// Builds the licence document for the integration. `last_cancelled` is the
/// most recently cancelled licence on the same case and only matters for
/// `update` deliveries.
pub fn build_payload(licence: &Licence, case: &Case, last_cancelled: Option<&LicenceId>) -> HmrcLicencePayload {
    let action = HmrcAction::for_licence_status(licence.status);
    let old_id = match action {
        HmrcAction::Update => last_cancelled.map(|id| id.0.clone()),
        _ => None,
    };
    let countries = (case.case_type.sub_type() == CaseSubType::Open).then(|| {
        case.destination_countries().into_iter().map(|id| HmrcCountry { id }).collect::<Vec<_>>()
    });

    HmrcLicencePayload {
        id: licence.id.0.clone(),
        reference: licence.reference_code.clone(),
        case_type: case.case_type.as_str().to_owned(),
        action,
        old_id,
        start_date: licence.start_date,
        end_date: licence.end_date,
        organisation: HmrcOrganisation { id: case.organisation_id.0.clone(), name: case.organisation_name.clone() },
        end_user: case.end_user().map(|party| HmrcEndUser {
            name: party.name.clone(),
            address: HmrcAddress {
                line_1: party.address.clone(),
                country: HmrcCountry { id: party.country_code.clone() },
            },
        }),
        countries: countries.filter(|countries| !countries.is_empty()),
        goods: licence
            .goods
            .iter()
            .map(|good| HmrcGood {
                id: good.good_on_application_id.clone(),
                usage: good.usage,
                name: good.name.clone(),
                description: good.description.clone(),
                unit: good.unit.clone(),
                quantity: good.quantity,
                value: good.value,
            })
            .collect(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageUpdateRequest {
    pub usage_data_id: String,
    pub licences: Vec<LicenceUsage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LicenceUsage {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub goods: Vec<GoodUsage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoodUsage {
    pub id: String,
    pub usage: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectedGood {
    pub id: String,
    pub usage: Decimal,
    pub errors: FieldErrors,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GoodsSplit {
    pub accepted: Vec<GoodUsage>,
    pub rejected: Vec<RejectedGood>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectedLicence {
    pub id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goods: Option<GoodsSplit>,
    pub errors: FieldErrors,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageValidation {
    pub accepted: Vec<LicenceUsage>,
    pub rejected: Vec<RejectedLicence>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageUpdateResponse {
    pub usage_data_id: String,
    pub licences: UsageValidation,
}

impl UsageValidation {
    pub fn into_response(self, usage_data_id: impl Into<String>) -> UsageUpdateResponse {
        UsageUpdateResponse { usage_data_id: usage_data_id.into(), licences: self }
    }
}

/// A licence together with the type of the case it was issued on.
#[derive(Clone, Debug, PartialEq)]
pub struct UsageTarget {
    pub licence: Licence,
    pub case_type: CaseTypeReference,
}

/// Splits reported licences into accepted and rejected. `targets` holds every
/// licence that could be found, keyed by id.
pub fn validate_usage_update(request: &UsageUpdateRequest, targets: &BTreeMap<String, UsageTarget>) -> UsageValidation {
    let mut validation = UsageValidation::default();
    for reported in &request.licences {
        match validate_licence(reported, targets) {
            Ok(()) => validation.accepted.push(reported.clone()),
            Err(rejected) => validation.rejected.push(rejected),
        }
    }
    validation
}

fn validate_licence(reported: &LicenceUsage, targets: &BTreeMap<String, UsageTarget>) -> Result<(), RejectedLicence> {
    let reject = |field: &str, message: String, goods: Option<GoodsSplit>| {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_owned(), vec![message]);
        RejectedLicence { id: reported.id.clone(), action: reported.action.clone(), goods, errors }
    };

    let Some(target) = targets.get(&reported.id) else {
        return Err(reject("id", "Licence not found.".to_owned(), None));
    };
    if !target.case_type.issues_licences() {
        return Err(reject("id", format!("A '{}' Licence cannot be updated.", target.case_type.as_str()), None));
    }
    if !HmrcAction::parse(&reported.action).is_some_and(|action| action.is_from_hmrc()) {
        let allowed: Vec<&str> = HmrcAction::FROM_HMRC.iter().map(HmrcAction::as_str).collect();
        return Err(reject("action", format!("Must be one of {}", allowed.join(", ")), None));
    }

    let mut split = GoodsSplit::default();
    for good in &reported.goods {
        let error = if good.usage < Decimal::ZERO {
            Some(("usage", "Ensure this value is greater than or equal to 0."))
        } else if target.licence.good_by_good_id(&good.id).is_none() {
            Some(("id", "Good not found on Licence."))
        } else {
            None
        };
        match error {
            None => split.accepted.push(good.clone()),
            Some((field, message)) => {
                let mut errors = FieldErrors::new();
                errors.insert(field.to_owned(), vec![message.to_owned()]);
                split.rejected.push(RejectedGood { id: good.id.clone(), usage: good.usage, errors });
            }
        }
    }
    if !split.rejected.is_empty() {
        return Err(reject("goods", "One or more Goods were rejected.".to_owned(), Some(split)));
    }
    Ok(())
}

/// Result of applying one accepted licence report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsageApplied {
    pub status_change: Option<LicenceChange>,
}

impl UsageApplied {
    /// True when the new status must be delivered back to HMRC.
    pub fn notify_hmrc(&self) -> bool {
        self.status_change.as_ref().is_some_and(|change| change.notify_hmrc)
    }
}

/// Adds reported usage to each good, then applies the reported action.
/// Standard and MOD licences whose goods are all used up are exhausted; HMRC
/// is only told about that when it reported the licence as `open`.
pub fn apply_usage<S>(
    target: &mut UsageTarget,
    reported: &LicenceUsage,
    now: DateTime<Utc>,
    sink: &S,
    audit: &AuditContext,
) -> UsageApplied
where
    S: AuditSink,
{
    let licence = &mut target.licence;
    for reported_good in &reported.goods {
        let Some(good) = licence.goods.iter_mut().find(|good| good.good_id == reported_good.id) else {
            continue;
        };
        good.usage += reported_good.usage;
        sink.emit(
            AuditEvent::success(licence.case_id.clone(), AuditVerb::LicenceUpdatedGoodUsage, audit)
                .with_payload("good_description", truncate_description(&good.description))
                .with_payload("usage", good.usage.normalize().to_string())
                .with_payload("licence", licence.reference_code.clone()),
        );
    }
    licence.updated_at = now;

    let Some(mut action) = HmrcAction::parse(&reported.action) else {
        return UsageApplied::default();
    };
    let mut target_status = action.reported_status();
    let mut notify_hmrc = false;

    let auto_exhausts = target.case_type.is_standard_licence() || target.case_type.is_mod_clearance();
    if action != HmrcAction::Exhaust && auto_exhausts && licence.all_goods_exhausted() {
        notify_hmrc = action == HmrcAction::Open;
        action = HmrcAction::Exhaust;
        target_status = Some(LicenceStatus::Exhausted);
    }

    let Some(status) = target_status else {
        return UsageApplied::default();
    };
    let status_change = licence.record_hmrc_status(status, notify_hmrc, now);
    sink.emit(
        AuditEvent::success(licence.case_id.clone(), AuditVerb::LicenceUpdatedStatus, audit)
            .with_payload("licence", licence.reference_code.clone())
            .with_payload("status", status.as_str())
            .with_payload("action", action.as_str()),
    );
    UsageApplied { status_change }
}

/// Applies accepted reports in order to licences loaded inside the write
/// that stores them. Returns each licence whose new status must be sent back
/// to HMRC, once. Reports for licences missing from `targets` are skipped.
pub fn apply_usage_reports<'a, S>(
    targets: &mut BTreeMap<String, UsageTarget>,
    reports: impl IntoIterator<Item = &'a LicenceUsage>,
    now: DateTime<Utc>,
    sink: &S,
    audit: &AuditContext,
) -> Vec<LicenceId>
where
    S: AuditSink,
{
    let mut notify = Vec::new();
    for reported in reports {
        let Some(target) = targets.get_mut(&reported.id) else {
            continue;
        };
        if apply_usage(target, reported, now, sink, audit).notify_hmrc() && !notify.contains(&target.licence.id) {
            notify.push(target.licence.id.clone());
        }
    }
    notify
}

fn truncate_description(description: &str) -> String {
    if description.chars().count() > 15 {
        let head: String = description.chars().take(15).collect();
        format!("{head}...")
    } else {
        description.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use crate::audit::{AuditContext, AuditVerb, InMemoryAuditSink};
    use crate::domain::case::{Case, CaseId, CaseTypeReference, OrganisationId, Party, PartyType};
    use crate::domain::licence::{GoodOnLicence, Licence, LicenceId, LicenceStatus};
    use crate::licensing::hmrc::{
        apply_usage, build_payload, validate_usage_update, GoodUsage, HmrcAction, LicenceUsage, UsageTarget,
        UsageUpdateRequest,
    };

    fn licence(status: LicenceStatus) -> Licence {
        let mut licence = Licence::draft(
            LicenceId("lic-1".to_owned()),
            CaseId("case-1".to_owned()),
            "GBSIEL/2026/0000001/P",
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            24,
            vec![GoodOnLicence {
                id: "gol-1".to_owned(),
                good_on_application_id: "goa-1".to_owned(),
                good_id: "good-1".to_owned(),
                name: "Rifle scope".to_owned(),
                description: "Telescopic rifle sight, 8x".to_owned(),
                unit: "NAR".to_owned(),
                quantity: Decimal::new(10, 0),
                value: Decimal::new(5000, 0),
                usage: Decimal::ZERO,
            }],
            Utc::now(),
        )
        .unwrap();
        licence.status = status;
        licence
    }

    fn targets(case_type: CaseTypeReference) -> BTreeMap<String, UsageTarget> {
        BTreeMap::from([("lic-1".to_owned(), UsageTarget { licence: licence(LicenceStatus::Issued), case_type })])
    }

    fn report(action: &str, good: &str, usage: i64) -> LicenceUsage {
        LicenceUsage {
            id: "lic-1".to_owned(),
            action: action.to_owned(),
            goods: vec![GoodUsage { id: good.to_owned(), usage: Decimal::new(usage, 0) }],
        }
    }

    #[test]
    fn action_mapping_follows_licence_status() {
        assert_eq!(HmrcAction::for_licence_status(LicenceStatus::Issued), HmrcAction::Insert);
        assert_eq!(HmrcAction::for_licence_status(LicenceStatus::Reinstated), HmrcAction::Update);
        assert_eq!(HmrcAction::for_licence_status(LicenceStatus::Suspended), HmrcAction::Cancel);
        assert!(HmrcAction::Open.is_from_hmrc());
        assert!(!HmrcAction::Insert.is_from_hmrc());
    }

    #[test]
    fn payload_carries_old_id_only_for_updates() {
        let mut case = Case::draft(
            CaseId("case-1".to_owned()),
            CaseTypeReference::Siel,
            OrganisationId("org-1".to_owned()),
            "Acme Exports",
            "Scopes",
            Utc::now(),
        );
        case.parties.push(Party {
            id: "party-1".to_owned(),
            party_type: PartyType::EndUser,
            name: "Buyer".to_owned(),
            address: "1 Rue".to_owned(),
            country_code: "FR".to_owned(),
            flags: Default::default(),
            copy_of: None,
        });
        let previous = LicenceId("lic-0".to_owned());

        let insert = build_payload(&licence(LicenceStatus::Issued), &case, Some(&previous));
        assert_eq!(insert.action, HmrcAction::Insert);
        assert!(insert.old_id.is_none());
        assert!(insert.countries.is_none());
        assert_eq!(insert.end_user.as_ref().map(|user| user.address.country.id.as_str()), Some("FR"));

        let update = build_payload(&licence(LicenceStatus::Reinstated), &case, Some(&previous));
        assert_eq!(update.old_id.as_deref(), Some("lic-0"));
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "siel");
        assert_eq!(json["goods"][0]["id"], "goa-1");
    }

    #[test]
    fn validation_rejects_unknown_licences_actions_and_goods() {
        let request = UsageUpdateRequest {
            usage_data_id: "usage-1".to_owned(),
            licences: vec![
                report("open", "good-1", 2),
                LicenceUsage { id: "missing".to_owned(), action: "open".to_owned(), goods: Vec::new() },
                report("insert", "good-1", 1),
                report("open", "good-9", 1),
            ],
        };

        let validation = validate_usage_update(&request, &targets(CaseTypeReference::Siel));

        assert_eq!(validation.accepted.len(), 1);
        assert_eq!(validation.rejected.len(), 3);
        assert_eq!(validation.rejected[0].errors["id"], vec!["Licence not found.".to_owned()]);
        assert!(validation.rejected[1].errors["action"][0].starts_with("Must be one of"));
        let goods = validation.rejected[2].goods.as_ref().unwrap();
        assert_eq!(goods.rejected[0].errors["id"], vec!["Good not found on Licence.".to_owned()]);
    }

    #[test]
    fn non_licence_case_types_cannot_be_updated() {
        let validation = validate_usage_update(
            &UsageUpdateRequest { usage_data_id: "usage-1".to_owned(), licences: vec![report("open", "good-1", 1)] },
            &targets(CaseTypeReference::Gqy),
        );
        assert_eq!(validation.rejected[0].errors["id"], vec!["A 'gqy' Licence cannot be updated.".to_owned()]);
    }

    #[test]
    fn usage_accumulates_and_open_report_auto_exhausts() {
        let mut target = targets(CaseTypeReference::Siel).remove("lic-1").unwrap();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::system("req-1");

        let applied = apply_usage(&mut target, &report("open", "good-1", 4), Utc::now(), &sink, &audit);
        assert!(applied.status_change.is_none());
        assert_eq!(target.licence.goods[0].usage, Decimal::new(4, 0));

        let applied = apply_usage(&mut target, &report("open", "good-1", 6), Utc::now(), &sink, &audit);
        assert_eq!(target.licence.status, LicenceStatus::Exhausted);
        assert!(applied.notify_hmrc());

        let events = sink.events();
        assert_eq!(events[0].payload["good_description"], "Telescopic rifl...");
        assert_eq!(events.last().map(|event| event.verb), Some(AuditVerb::LicenceUpdatedStatus));
    }

    #[test]
    fn reported_status_is_applied_without_echoing_back() {
        let mut target = targets(CaseTypeReference::Oiel).remove("lic-1").unwrap();
        let sink = InMemoryAuditSink::default();

        let applied =
            apply_usage(&mut target, &report("surrender", "good-1", 10), Utc::now(), &sink, &AuditContext::system("r"));

        assert_eq!(target.licence.status, LicenceStatus::Surrendered);
        assert!(!applied.notify_hmrc());
    }
}
