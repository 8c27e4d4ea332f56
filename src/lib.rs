//! # scanflow
//!
//! Guided scan-and-check workflows for warehouse terminals.
//!
//! A *process* (box checking, picking, cycle count...) is a numbered sequence
//! of *steps*. Each step waits for one input (a scanned barcode, a typed
//! quantity), fetches reference data for it, validates it against business
//! rules and either commits a typed payload or rejects the input so the
//! operator can scan again.
//!
//! ## Building blocks
//!
//! - [`ProcessStore`]: typed, process-keyed state with read-modify-write
//!   semantics over a [`Storage`] substrate ([`MemoryStorage`], [`FileStorage`])
//! - [`StepController`]: forward entry (stamping the rewind pointer once) and
//!   rewind with cleanup of everything entered since
//! - [`CheckStage`]: the accept/reject state machine of one step, driven by a
//!   [`Check`] implementation
//! - [`Session`]: wires the above together for one process
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use scanflow::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Location(String);
//!
//! impl StepPayload for Location {
//!     fn step(&self) -> StepIndex {
//!         StepIndex::new(10)
//!     }
//! }
//!
//! struct Putaway;
//!
//! impl ProcessKind for Putaway {
//!     const NAME: &'static str = "putaway";
//!     type Payload = Location;
//!
//!     fn steps() -> &'static [StepIndex] {
//!         const STEPS: &[StepIndex] = &[StepIndex::new(10)];
//!         STEPS
//!     }
//! }
//!
//! struct LocationCheck;
//!
//! #[async_trait]
//! impl Check<Putaway> for LocationCheck {
//!     type Reference = String;
//!
//!     fn step(&self) -> StepIndex {
//!         StepIndex::new(10)
//!     }
//!
//!     fn not_found_key(&self) -> &str {
//!         "messages:no-location"
//!     }
//!
//!     async fn lookup(
//!         &self,
//!         input: &CheckInput,
//!         _record: &ProcessRecord<Location>,
//!     ) -> Result<Option<String>, ServiceError> {
//!         Ok(input.as_scanned().filter(|code| code.starts_with("A-")).map(String::from))
//!     }
//!
//!     fn validate(
//!         &self,
//!         _input: &CheckInput,
//!         reference: &String,
//!         _record: &ProcessRecord<Location>,
//!     ) -> Result<Location, Rejection> {
//!         Ok(Location(reference.clone()))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), FlowError> {
//! let session = Session::<Putaway>::new(ProcessStore::in_memory());
//! let mut stage = session.open(LocationCheck)?;
//!
//! let rejected = stage.submit(CheckInput::scanned("Z-9")).await?;
//! assert!(matches!(rejected, Transition::Rejected { .. }));
//!
//! assert_eq!(stage.submit(CheckInput::scanned("A-01")).await?, Transition::Committed);
//! assert_eq!(
//!     session.record()?.data(StepIndex::new(10)),
//!     Some(&Location("A-01".to_string()))
//! );
//!
//! session.finish()?;
//! # Ok(())
//! # }
//! ```

mod check;
mod config;
mod controller;
mod error;
mod notify;
mod process;
mod service;
mod session;
mod storage;
mod store;
mod telemetry;

pub mod flows;
pub mod prelude;

pub use check::{
    Check, CheckConfig, CheckInput, CheckStage, CheckState, EnteredValue, Event, IgnoreReason,
    LookupOutcome, Page, Rejection, RequestId, Transition,
};
pub use config::{FlowConfig, LOOKUP_TIMEOUT_VAR, STORAGE_DIR_VAR};
pub use controller::{Entry, StepController};
pub use error::{FlowError, StorageError};
pub use notify::{MessageCatalog, Notice, Notifier, RecordingNotifier, Severity, TracingNotifier};
pub use process::{ProcessKind, ProcessRecord, StepIndex, StepPayload, StepRecord};
pub use service::{
    parse_proxy_response, ErrorCodeMap, MutationService, ProxyReply, ProxyTransport,
    ServiceError, CHECK_FAILED_KEY, LOOKUP_TIMEOUT_KEY, STEP_REWOUND_KEY,
};
pub use session::Session;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{Action, ProcessStore, RootUpdate, StepUpdate};
pub use telemetry::init_tracing;
