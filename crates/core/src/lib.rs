pub mod amendment;
pub mod audit;
pub mod config;
pub mod countersign;
pub mod domain;
pub mod errors;
pub mod execution_engine;
pub mod flows;
pub mod licensing;
pub mod reactor;
pub mod signing;
pub mod sla;

pub use audit::{AuditContext, AuditEvent, AuditSink, AuditVerb, InMemoryAuditSink};
pub use domain::actor::{Actor, ActorType, Permission};
pub use domain::case::{Case, CaseId, CaseTypeReference, OrganisationId};
pub use domain::licence::{Licence, LicenceId, LicenceStatus};
pub use domain::status::{CaseStatus, SubStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{CaseWorkflowEngine, StatusChangeRequest, TransitionGuard, TransitionOutcome};
pub use reactor::{PostTransitionReactor, ReactorReport};
