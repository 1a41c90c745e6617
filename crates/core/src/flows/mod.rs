pub mod engine;
pub mod guard;
pub mod states;

pub use engine::CaseWorkflowEngine;
pub use guard::TransitionGuard;
pub use states::{FlowAction, FlowContext, StatusChangeRequest, TransitionOutcome};
