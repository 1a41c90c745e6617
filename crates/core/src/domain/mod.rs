pub mod actor;
pub mod advice;
pub mod case;
pub mod execution;
pub mod licence;
pub mod notification;
pub mod rules;
pub mod status;
