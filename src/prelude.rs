//! Commonly used types and traits

pub use crate::check::{Check, CheckInput, CheckStage, Rejection, Transition};
pub use crate::controller::StepController;
pub use crate::error::FlowError;
pub use crate::process::{ProcessKind, ProcessRecord, StepIndex, StepPayload};
pub use crate::service::ServiceError;
pub use crate::session::Session;
pub use crate::store::ProcessStore;
