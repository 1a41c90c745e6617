//! Orchestration over the repositories: each service loads what a domain
//! decision needs, applies it, then persists the result together with the
//! audit trail, outbox entries and any HMRC delivery it implies.

pub mod amendment;
pub mod error;
pub mod expiry;
pub mod finalise;
pub mod hmrc_delivery;
pub mod scheduling;
pub mod settings;
pub mod sla;
pub mod status_change;
pub mod stores;
pub mod usage;

#[cfg(test)]
pub(crate) mod test_support;

pub use amendment::AmendmentService;
pub use error::persistence;
pub use expiry::{ExpiryReport, LicenceExpiryService};
pub use finalise::FinaliseService;
pub use hmrc_delivery::{
    DeliveryReport, HmrcDeliveryWorker, HmrcTransport, ReqwestHmrcTransport, TransportError, TransportResponse,
};
pub use scheduling::{HmrcDeliveryPayload, HmrcScheduler, ScheduleOutcome, HMRC_OPERATION_KIND};
pub use settings::RuntimeSettings;
pub use sla::{SlaRunReport, SlaService};
pub use status_change::{StatusChangeReport, StatusChangeService};
pub use stores::Stores;
pub use usage::UsageUpdateService;
