//! Daily working-day SLA counters.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::domain::case::{Case, CaseId, CaseSubType, CaseTypeReference};

pub const DEFAULT_CUTOFF_HOUR: u32 = 18;

/// Target working days for a case type, when it has one.
pub fn target_days(case_type: CaseTypeReference) -> Option<u32> {
    match case_type.sub_type() {
        CaseSubType::Standard => Some(20),
        CaseSubType::Open => Some(60),
        CaseSubType::Hmrc => Some(2),
        CaseSubType::F680Clearance | CaseSubType::ExhibitionClearance | CaseSubType::GiftingClearance => Some(30),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlaCalendar {
    bank_holidays: BTreeSet<NaiveDate>,
    cutoff: NaiveTime,
}

impl Default for SlaCalendar {
    fn default() -> Self {
        Self::new(BTreeSet::new(), DEFAULT_CUTOFF_HOUR)
    }
}

impl SlaCalendar {
    pub fn new(bank_holidays: BTreeSet<NaiveDate>, cutoff_hour: u32) -> Self {
        let cutoff = NaiveTime::from_hms_opt(cutoff_hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
        Self { bank_holidays, cutoff }
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.bank_holidays.contains(&date)
    }

    pub fn previous_working_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date - Duration::days(1);
        while !self.is_working_day(day) {
            day -= Duration::days(1);
        }
        day
    }

    pub fn cutoff_on(&self, date: NaiveDate) -> DateTime<Utc> {
        date.and_time(self.cutoff).and_utc()
    }
}

/// Open/response window of a query raised with the exporter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// A query pauses the clock while it is open, and for the day it was
/// answered on.
pub fn has_active_query(queries: &[QueryWindow], now: DateTime<Utc>, calendar: &SlaCalendar) -> bool {
    let today = now.date_naive();
    let today_cutoff = calendar.cutoff_on(today);
    let yesterday_cutoff = calendar.cutoff_on(calendar.previous_working_day(today));
    queries.iter().any(|query| match query.responded_at {
        None => query.created_at < today_cutoff,
        Some(responded_at) => responded_at > yesterday_cutoff,
    })
}

/// Case plus the routing facts the SLA job needs.
#[derive(Clone, Debug, PartialEq)]
pub struct SlaSubject {
    pub case: Case,
    pub has_active_query: bool,
    /// Queue id -> owning department, if any.
    pub queue_departments: BTreeMap<String, Option<String>>,
}

pub fn qualifies(case: &Case, has_active_query: bool, now: DateTime<Utc>, calendar: &SlaCalendar) -> bool {
    let today = now.date_naive();
    let submitted_before_cutoff = case.submitted_at.is_some_and(|submitted| submitted < calendar.cutoff_on(today));
    let updated_today = case.sla_updated_at.is_some_and(|updated| updated.date_naive() == today);

    submitted_before_cutoff
        && case.last_closed_at.is_none()
        && case.sla_remaining_days.is_some()
        && !updated_today
        && !has_active_query
        && !case.status.is_terminal()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlaPlan {
    pub cases: Vec<CaseId>,
    pub queue_increments: Vec<(CaseId, String)>,
    pub department_increments: Vec<(CaseId, String)>,
}

/// Works out which counters move today. `None` on weekends and bank holidays.
pub fn plan_update(subjects: &[SlaSubject], now: DateTime<Utc>, calendar: &SlaCalendar) -> Option<SlaPlan> {
    if !calendar.is_working_day(now.date_naive()) {
        return None;
    }

    let mut plan = SlaPlan::default();
    for subject in subjects {
        let case = &subject.case;
        if !qualifies(case, subject.has_active_query, now, calendar) {
            continue;
        }
        plan.cases.push(case.id.clone());

        let mut departments = BTreeSet::new();
        for queue_id in &case.queues {
            plan.queue_increments.push((case.id.clone(), queue_id.clone()));
            if let Some(Some(department)) = subject.queue_departments.get(queue_id) {
                if departments.insert(department.clone()) {
                    plan.department_increments.push((case.id.clone(), department.clone()));
                }
            }
        }
    }
    Some(plan)
}

/// Applies the daily increment to a case record.
pub fn tick(case: &mut Case, now: DateTime<Utc>) {
    case.sla_days += 1;
    case.sla_remaining_days = case.sla_remaining_days.map(|remaining| remaining - 1);
    case.sla_updated_at = Some(now);
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

    use crate::domain::case::{Case, CaseId, CaseTypeReference, OrganisationId};
    use crate::domain::status::CaseStatus;
    use crate::sla::{
        has_active_query, plan_update, qualifies, target_days, tick, QueryWindow, SlaCalendar, SlaSubject,
    };

    // Wednesday
    fn wednesday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).unwrap()
    }

    fn open_case(id: &str) -> Case {
        let mut case = Case::draft(
            CaseId(id.to_owned()),
            CaseTypeReference::Siel,
            OrganisationId("org-1".to_owned()),
            "Acme Exports",
            "Radar parts",
            wednesday_morning() - Duration::days(7),
        );
        case.status = CaseStatus::UnderReview;
        case.submitted_at = Some(wednesday_morning() - Duration::days(2));
        case.sla_remaining_days = Some(20);
        case
    }

    #[test]
    fn targets_by_case_type() {
        assert_eq!(target_days(CaseTypeReference::Siel), Some(20));
        assert_eq!(target_days(CaseTypeReference::Oiel), Some(60));
        assert_eq!(target_days(CaseTypeReference::Cre), Some(2));
        assert_eq!(target_days(CaseTypeReference::Gift), Some(30));
        assert_eq!(target_days(CaseTypeReference::Gqy), None);
    }

    #[test]
    fn weekends_and_bank_holidays_are_not_working_days() {
        let holiday = NaiveDate::from_ymd_opt(2026, 12, 25).unwrap();
        let calendar = SlaCalendar::new(BTreeSet::from([holiday]), 18);
        assert!(!calendar.is_working_day(holiday));
        assert!(!calendar.is_working_day(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()));
        assert!(calendar.is_working_day(NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()));
        assert_eq!(
            calendar.previous_working_day(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()),
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
        );
    }

    #[test]
    fn qualification_rules() {
        let calendar = SlaCalendar::default();
        let now = wednesday_morning();
        assert!(qualifies(&open_case("c"), false, now, &calendar));
        assert!(!qualifies(&open_case("c"), true, now, &calendar));

        let mut updated = open_case("c");
        updated.sla_updated_at = Some(now - Duration::hours(1));
        assert!(!qualifies(&updated, false, now, &calendar));

        let mut closed_once = open_case("c");
        closed_once.last_closed_at = Some(now - Duration::days(1));
        assert!(!qualifies(&closed_once, false, now, &calendar));

        let mut late = open_case("c");
        late.submitted_at = Some(Utc.with_ymd_and_hms(2026, 10, 14, 18, 30, 0).unwrap());
        assert!(!qualifies(&late, false, now, &calendar));

        let mut finalised = open_case("c");
        finalised.status = CaseStatus::Finalised;
        assert!(!qualifies(&finalised, false, now, &calendar));
    }

    #[test]
    fn queries_pause_the_clock_until_the_day_after_response() {
        let calendar = SlaCalendar::default();
        let now = wednesday_morning();
        let open = QueryWindow { created_at: now - Duration::days(3), responded_at: None };
        let answered_yesterday_evening = QueryWindow {
            created_at: now - Duration::days(5),
            responded_at: Some(Utc.with_ymd_and_hms(2026, 10, 13, 19, 0, 0).unwrap()),
        };
        let answered_long_ago =
            QueryWindow { created_at: now - Duration::days(9), responded_at: Some(now - Duration::days(6)) };

        assert!(has_active_query(&[open], now, &calendar));
        assert!(has_active_query(&[answered_yesterday_evening], now, &calendar));
        assert!(!has_active_query(&[answered_long_ago], now, &calendar));
    }

    #[test]
    fn plan_counts_each_department_once_per_case() {
        let mut case = open_case("c-1");
        case.queues = BTreeSet::from(["q-1".to_owned(), "q-2".to_owned(), "q-3".to_owned()]);
        let subject = SlaSubject {
            case,
            has_active_query: false,
            queue_departments: BTreeMap::from([
                ("q-1".to_owned(), Some("dept-a".to_owned())),
                ("q-2".to_owned(), Some("dept-a".to_owned())),
                ("q-3".to_owned(), None),
            ]),
        };

        let plan = plan_update(&[subject], wednesday_morning(), &SlaCalendar::default()).unwrap();

        assert_eq!(plan.cases.len(), 1);
        assert_eq!(plan.queue_increments.len(), 3);
        assert_eq!(plan.department_increments, vec![(CaseId("c-1".to_owned()), "dept-a".to_owned())]);

        let saturday = Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap();
        assert!(plan_update(&[], saturday, &SlaCalendar::default()).is_none());
    }

    #[test]
    fn tick_moves_both_counters() {
        let mut case = open_case("c-1");
        tick(&mut case, wednesday_morning());
        assert_eq!(case.sla_days, 1);
        assert_eq!(case.sla_remaining_days, Some(19));
        assert_eq!(case.sla_updated_at, Some(wednesday_morning()));
    }
}
