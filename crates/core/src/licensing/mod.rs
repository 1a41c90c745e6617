//! Licence issue, lifecycle and HMRC reconciliation.

pub mod finalise;
pub mod hmrc;
pub mod lifecycle;
pub mod reference;

pub use finalise::{finalise, FinaliseOutcome, FinaliseRecords, FinaliseRequest};
pub use hmrc::{
    apply_usage, build_payload, validate_usage_update, HmrcAction, HmrcLicencePayload, UsageTarget,
    UsageUpdateRequest, UsageUpdateResponse, UsageValidation,
};
pub use lifecycle::{end_date, licences_to_expire, LicenceChange, LicenceTransitionError};
pub use reference::{licence_reference, CaseReference};
