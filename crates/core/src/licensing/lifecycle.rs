use chrono::{DateTime, Months, NaiveDate, Utc};
use thiserror::Error;

use crate::domain::case::CaseId;
use crate::domain::licence::{GoodOnLicence, Licence, LicenceId, LicenceStatus};
use crate::errors::DomainError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LicenceTransitionError {
    #[error("licence {reference} cannot move from {from} to {to}")]
    NotAllowed { reference: String, from: LicenceStatus, to: LicenceStatus },
    #[error("licence duration of {0} months is out of range")]
    InvalidDuration(u32),
}

impl From<LicenceTransitionError> for DomainError {
    fn from(value: LicenceTransitionError) -> Self {
        DomainError::field("licence", value.to_string())
    }
}

/// A status change applied to a licence. `notify_hmrc` is false for changes
/// HMRC already knows about or that are folded into another delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LicenceChange {
    pub licence_id: LicenceId,
    pub from: LicenceStatus,
    pub to: LicenceStatus,
    pub notify_hmrc: bool,
}

/// `start + months`, clamped to the last day of the target month.
pub fn end_date(start: NaiveDate, duration_months: u32) -> Result<NaiveDate, LicenceTransitionError> {
    start
        .checked_add_months(Months::new(duration_months))
        .ok_or(LicenceTransitionError::InvalidDuration(duration_months))
}

/// Licences still open whose end date has passed.
pub fn licences_to_expire(licences: &[Licence], today: NaiveDate) -> Vec<&Licence> {
    licences.iter().filter(|licence| licence.status.is_open() && licence.end_date < today).collect()
}

impl Licence {
    pub fn draft(
        id: LicenceId,
        case_id: CaseId,
        reference_code: impl Into<String>,
        start_date: NaiveDate,
        duration_months: u32,
        goods: Vec<GoodOnLicence>,
        now: DateTime<Utc>,
    ) -> Result<Self, LicenceTransitionError> {
        Ok(Self {
            id,
            case_id,
            reference_code: reference_code.into(),
            status: LicenceStatus::Draft,
            start_date,
            duration_months,
            end_date: end_date(start_date, duration_months)?,
            hmrc_integration_sent_at: None,
            goods,
            created_at: now,
            updated_at: now,
        })
    }

    /// Issues a draft licence. When the case already has a non-draft licence
    /// that one is cancelled quietly and this one becomes `reinstated`.
    pub fn issue(
        &mut self,
        previous: Option<&mut Licence>,
        now: DateTime<Utc>,
    ) -> Result<Vec<LicenceChange>, LicenceTransitionError> {
        if self.status != LicenceStatus::Draft {
            return Err(self.not_allowed(LicenceStatus::Issued));
        }

        let mut changes = Vec::new();
        let target = match previous.filter(|previous| previous.status != LicenceStatus::Draft) {
            Some(previous) => {
                if previous.status != LicenceStatus::Cancelled {
                    changes.push(previous.set_status(LicenceStatus::Cancelled, false, now));
                }
                LicenceStatus::Reinstated
            }
            None => LicenceStatus::Issued,
        };
        self.end_date = end_date(self.start_date, self.duration_months)?;
        changes.push(self.set_status(target, true, now));
        Ok(changes)
    }

    pub fn reinstate(&mut self, now: DateTime<Utc>) -> Result<LicenceChange, LicenceTransitionError> {
        self.guarded(LicenceStatus::Reinstated, &[LicenceStatus::Suspended], now)
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) -> Result<LicenceChange, LicenceTransitionError> {
        self.guarded(LicenceStatus::Suspended, &[LicenceStatus::Issued, LicenceStatus::Reinstated], now)
    }

    pub fn surrender(&mut self, now: DateTime<Utc>) -> Result<LicenceChange, LicenceTransitionError> {
        self.guarded(LicenceStatus::Surrendered, IN_FORCE, now)
    }

    pub fn revoke(&mut self, now: DateTime<Utc>) -> Result<LicenceChange, LicenceTransitionError> {
        self.guarded(LicenceStatus::Revoked, IN_FORCE, now)
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<LicenceChange, LicenceTransitionError> {
        self.guarded(LicenceStatus::Cancelled, IN_FORCE, now)
    }

    pub fn exhaust(&mut self, now: DateTime<Utc>) -> Result<LicenceChange, LicenceTransitionError> {
        self.guarded(LicenceStatus::Exhausted, &[LicenceStatus::Issued, LicenceStatus::Reinstated], now)
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<LicenceChange, LicenceTransitionError> {
        self.guarded(LicenceStatus::Expired, &[LicenceStatus::Issued, LicenceStatus::Reinstated], now)
    }

    /// Status reported by HMRC itself. Not checked against the transition
    /// table and never echoed back unless `notify_hmrc` is set. Returns
    /// `None` when the licence is already in that status.
    pub fn record_hmrc_status(
        &mut self,
        status: LicenceStatus,
        notify_hmrc: bool,
        now: DateTime<Utc>,
    ) -> Option<LicenceChange> {
        (self.status != status).then(|| self.set_status(status, notify_hmrc, now))
    }

    /// Moves to the status a case-level change implies (suspend, surrender
    /// or revoke).
    pub fn apply_case_status(
        &mut self,
        status: LicenceStatus,
        now: DateTime<Utc>,
    ) -> Result<LicenceChange, LicenceTransitionError> {
        match status {
            LicenceStatus::Suspended => self.suspend(now),
            LicenceStatus::Surrendered => self.surrender(now),
            LicenceStatus::Revoked => self.revoke(now),
            LicenceStatus::Reinstated => self.reinstate(now),
            LicenceStatus::Cancelled => self.cancel(now),
            LicenceStatus::Exhausted => self.exhaust(now),
            LicenceStatus::Expired => self.expire(now),
            LicenceStatus::Draft | LicenceStatus::Issued => Err(self.not_allowed(status)),
        }
    }

    fn guarded(
        &mut self,
        target: LicenceStatus,
        allowed_from: &[LicenceStatus],
        now: DateTime<Utc>,
    ) -> Result<LicenceChange, LicenceTransitionError> {
        if !allowed_from.contains(&self.status) {
            return Err(self.not_allowed(target));
        }
        Ok(self.set_status(target, true, now))
    }

    fn set_status(&mut self, target: LicenceStatus, notify_hmrc: bool, now: DateTime<Utc>) -> LicenceChange {
        let change = LicenceChange { licence_id: self.id.clone(), from: self.status, to: target, notify_hmrc };
        self.status = target;
        self.updated_at = now;
        change
    }

    fn not_allowed(&self, to: LicenceStatus) -> LicenceTransitionError {
        LicenceTransitionError::NotAllowed { reference: self.reference_code.clone(), from: self.status, to }
    }
}

const IN_FORCE: &[LicenceStatus] = &[LicenceStatus::Issued, LicenceStatus::Reinstated, LicenceStatus::Suspended];
