//! Check stage: turns raw operator input into a committed step payload.
//!
//! A [`CheckStage`] is an explicit state machine:
//!
//! ```text
//! AwaitingInput --Input--> AwaitingReference --ReferenceSettled--> Committed
//!       ^                          |
//!       +------- Rejected ---------+
//! ```
//!
//! Each input mints a fresh [`RequestId`]. A lookup result carrying an older
//! id is discarded, so a slow answer to a superseded scan can never commit.

use crate::controller::StepController;
use crate::error::FlowError;
use crate::notify::{Notice, Notifier, Severity, TracingNotifier};
use crate::process::{ProcessKind, ProcessRecord, StepIndex};
use crate::service::{
    ErrorCodeMap, ServiceError, CHECK_FAILED_KEY, LOOKUP_TIMEOUT_KEY, STEP_REWOUND_KEY,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Value typed by the operator instead of scanned.
#[derive(Debug, Clone, PartialEq)]
pub enum EnteredValue {
    /// Free text
    Text(String),
    /// Quantity
    Quantity(u64),
    /// Date (e.g. best-before)
    Date(NaiveDate),
}

/// Raw input offered to a check stage.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckInput {
    /// Barcode read by the scanner (or typed into the scan field).
    Scanned(String),
    /// Value typed into a form field.
    Entered(EnteredValue),
}

impl CheckInput {
    /// Scanned input.
    pub fn scanned(code: impl Into<String>) -> Self {
        CheckInput::Scanned(code.into())
    }

    /// Entered quantity.
    pub fn quantity(quantity: u64) -> Self {
        CheckInput::Entered(EnteredValue::Quantity(quantity))
    }

    /// The scanned code, trimmed.
    pub fn as_scanned(&self) -> Option<&str> {
        match self {
            CheckInput::Scanned(code) => Some(code.trim()),
            CheckInput::Entered(_) => None,
        }
    }

    /// The entered quantity.
    pub fn as_quantity(&self) -> Option<u64> {
        match self {
            CheckInput::Entered(EnteredValue::Quantity(quantity)) => Some(*quantity),
            _ => None,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            CheckInput::Scanned(code) | CheckInput::Entered(EnteredValue::Text(code)) => {
                code.trim().is_empty()
            }
            CheckInput::Entered(_) => false,
        }
    }
}

/// Identifies one lookup issued by a [`CheckStage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Raw id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Paginated lookup result as returned by the list queries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Page<T> {
    /// Total number of matches
    pub count: u64,
    /// Matches on this page
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// First match, treating `count == 0` as nothing found.
    pub fn into_first(self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        self.results.into_iter().next()
    }
}

/// Settled state of a reference lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome<R> {
    /// Reference data was found.
    Found(R),
    /// The lookup answered with nothing.
    NotFound,
    /// The backend call failed.
    Failed(ServiceError),
    /// The lookup did not answer within the configured timeout.
    TimedOut,
}

impl<R> From<Result<Option<R>, ServiceError>> for LookupOutcome<R> {
    fn from(result: Result<Option<R>, ServiceError>) -> Self {
        match result {
            Ok(Some(reference)) => LookupOutcome::Found(reference),
            Ok(None) => LookupOutcome::NotFound,
            Err(e) => LookupOutcome::Failed(e),
        }
    }
}

/// Why an input was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Reference data exists but breaks a business rule.
    Invalid {
        /// Translation key of the rule-specific message
        key: String,
    },
    /// Nothing matches the input.
    NotFound {
        /// Translation key of the not-found message
        key: String,
    },
    /// The backend refused with an error code.
    Backend {
        /// Backend error code
        code: String,
        /// Translation key mapped from the code
        key: String,
    },
    /// The backend call failed without a usable error code.
    CheckFailed {
        /// Diagnostic details, logged only
        details: String,
    },
    /// The lookup timed out.
    TimedOut,
}

impl Rejection {
    /// Rule violation with the given translation key.
    pub fn invalid(key: impl Into<String>) -> Self {
        Rejection::Invalid { key: key.into() }
    }

    /// Translation key to show the operator.
    pub fn message_key(&self) -> &str {
        match self {
            Rejection::Invalid { key }
            | Rejection::NotFound { key }
            | Rejection::Backend { key, .. } => key,
            Rejection::CheckFailed { .. } => CHECK_FAILED_KEY,
            Rejection::TimedOut => LOOKUP_TIMEOUT_KEY,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::CheckFailed { details } => write!(f, "{CHECK_FAILED_KEY} ({details})"),
            Rejection::Backend { code, key } => write!(f, "{key} (code {code})"),
            other => write!(f, "{}", other.message_key()),
        }
    }
}

/// Tuning of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConfig {
    /// Maximum time a reference lookup may take. `None` waits forever.
    /// Default: 30 seconds.
    pub timeout: Option<Duration>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Business validation of one step.
///
/// The stage calls [`lookup`](Check::lookup) to fetch reference data for an
/// input and, only when something was found, [`validate`](Check::validate)
/// to turn it into the step payload. Not-found and backend failures are
/// handled by the stage itself.
#[async_trait]
pub trait Check<P: ProcessKind>: Send + Sync {
    /// Reference data fetched for an input.
    type Reference: Send + Sync + 'static;

    /// Step this check validates.
    fn step(&self) -> StepIndex;

    /// Translation key shown when the lookup finds nothing.
    fn not_found_key(&self) -> &str;

    /// Fetches reference data for `input`. `Ok(None)` means nothing matched.
    async fn lookup(
        &self,
        input: &CheckInput,
        record: &ProcessRecord<P::Payload>,
    ) -> Result<Option<Self::Reference>, ServiceError>;

    /// Accepts or rejects `input` given its reference data.
    fn validate(
        &self,
        input: &CheckInput,
        reference: &Self::Reference,
        record: &ProcessRecord<P::Payload>,
    ) -> Result<P::Payload, Rejection>;

    /// Rewind to the previous step when the backend flags an error.
    fn rewind_on_backend_error(&self) -> bool {
        false
    }

    /// Returns the check configuration.
    fn config(&self) -> CheckConfig {
        CheckConfig::default()
    }
}

/// Where a check stage stands.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckState {
    /// Waiting for the operator.
    AwaitingInput,
    /// A lookup for `input` is in flight under `request`.
    AwaitingReference {
        /// Id of the in-flight lookup
        request: RequestId,
        /// Input being checked
        input: CheckInput,
    },
    /// The step holds a validated payload. `input` is `None` when the payload
    /// was already persisted before the stage was created.
    Committed {
        /// Input that produced the payload
        input: Option<CheckInput>,
    },
}

/// Events driving a [`CheckStage`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event<R> {
    /// The operator scanned or entered something.
    Input(CheckInput),
    /// A lookup finished.
    ReferenceSettled {
        /// Id the lookup was issued under
        request: RequestId,
        /// Its result
        outcome: LookupOutcome<R>,
    },
    /// The step was re-entered after a rewind. Ignored while the step
    /// still holds a payload.
    Reset,
}

/// Why an event had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The input was empty.
    EmptyInput,
    /// The step is already committed.
    AlreadyCommitted,
    /// The settlement belongs to a superseded or finished request.
    Stale,
}

/// Result of handling an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A lookup must run under this id.
    AwaitingReference(RequestId),
    /// The payload was committed.
    Committed,
    /// The input was refused and cleared.
    Rejected {
        /// Reason shown to the operator
        rejection: Rejection,
        /// Step the process was rewound to, if the check asked for it
        rewound_to: Option<StepIndex>,
    },
    /// The stage accepts input again.
    Reopened,
    /// Nothing happened.
    Ignored(IgnoreReason),
}

/// Drives the accept/reject cycle of one step.
pub struct CheckStage<P: ProcessKind, C: Check<P>> {
    check: C,
    controller: StepController<P>,
    notifier: Arc<dyn Notifier>,
    error_codes: Arc<ErrorCodeMap>,
    config: CheckConfig,
    state: CheckState,
    last_request: u64,
}

impl<P: ProcessKind, C: Check<P>> fmt::Debug for CheckStage<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckStage")
            .field("process", &P::NAME)
            .field("step", &self.check.step())
            .field("state", &self.state)
            .finish()
    }
}

impl<P: ProcessKind, C: Check<P>> CheckStage<P, C> {
    /// Creates a stage for `check` on the controller's step.
    ///
    /// The stage starts `Committed` if the step already holds a payload.
    pub fn new(controller: StepController<P>, check: C) -> Result<Self, FlowError> {
        if controller.step() != check.step() {
            return Err(FlowError::Configuration(format!(
                "check for step {} attached to step {} of '{}'",
                check.step(),
                controller.step(),
                P::NAME
            )));
        }
        let state = if controller.data()?.is_some() {
            CheckState::Committed { input: None }
        } else {
            CheckState::AwaitingInput
        };
        let config = check.config();
        Ok(Self {
            check,
            controller,
            notifier: Arc::new(TracingNotifier::new()),
            error_codes: Arc::new(ErrorCodeMap::new()),
            config,
            state,
            last_request: 0,
        })
    }

    /// Sends rejections to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Maps backend error codes with `error_codes`.
    pub fn with_error_codes(mut self, error_codes: Arc<ErrorCodeMap>) -> Self {
        self.error_codes = error_codes;
        self
    }

    /// Overrides the lookup timeout of the check.
    pub fn with_timeout(mut self, lookup_timeout: Option<Duration>) -> Self {
        self.config.timeout = lookup_timeout;
        self
    }

    /// Current state.
    pub fn state(&self) -> &CheckState {
        &self.state
    }

    /// Returns `true` once the step holds a validated payload.
    pub fn is_committed(&self) -> bool {
        matches!(self.state, CheckState::Committed { .. })
    }

    /// The wrapped check.
    pub fn check(&self) -> &C {
        &self.check
    }

    /// The controller of the checked step.
    pub fn controller(&self) -> &StepController<P> {
        &self.controller
    }

    /// Applies one event.
    ///
    /// A committed stage is reopened first if the step lost its payload in
    /// the meantime, e.g. because another step rewound the process.
    pub fn handle(&mut self, event: Event<C::Reference>) -> Result<Transition, FlowError> {
        self.follow_store()?;
        match event {
            Event::Input(input) => Ok(self.on_input(input)),
            Event::ReferenceSettled { request, outcome } => self.on_settled(request, outcome),
            Event::Reset => self.on_reset(),
        }
    }

    fn follow_store(&mut self) -> Result<(), FlowError> {
        if self.is_committed() && self.controller.data()?.is_none() {
            debug!(
                "Step {} of '{}' was rewound, awaiting input again",
                self.check.step(),
                P::NAME
            );
            self.state = CheckState::AwaitingInput;
        }
        Ok(())
    }

    fn on_reset(&mut self) -> Result<Transition, FlowError> {
        // Only a rewind may drop a committed payload.
        if self.controller.data()?.is_some() {
            if !self.is_committed() {
                self.state = CheckState::Committed { input: None };
            }
            return Ok(Transition::Ignored(IgnoreReason::AlreadyCommitted));
        }
        self.state = CheckState::AwaitingInput;
        debug!("Step {} of '{}' reopened", self.check.step(), P::NAME);
        Ok(Transition::Reopened)
    }

    /// Runs a full cycle for `input`: register it, look up reference data
    /// within the configured timeout, then accept or reject.
    pub async fn submit(&mut self, input: CheckInput) -> Result<Transition, FlowError> {
        let request = match self.handle(Event::Input(input.clone()))? {
            Transition::AwaitingReference(request) => request,
            other => return Ok(other),
        };
        let record = self.controller.record()?;
        let outcome = self.lookup(&input, &record).await;
        self.handle(Event::ReferenceSettled { request, outcome })
    }

    async fn lookup(
        &self,
        input: &CheckInput,
        record: &ProcessRecord<P::Payload>,
    ) -> LookupOutcome<C::Reference> {
        let lookup = self.check.lookup(input, record);
        match self.config.timeout {
            Some(limit) => match timeout(limit, lookup).await {
                Ok(result) => result.into(),
                Err(_) => LookupOutcome::TimedOut,
            },
            None => lookup.await.into(),
        }
    }

    fn on_input(&mut self, input: CheckInput) -> Transition {
        if self.is_committed() {
            return Transition::Ignored(IgnoreReason::AlreadyCommitted);
        }
        if input.is_blank() {
            return Transition::Ignored(IgnoreReason::EmptyInput);
        }
        self.last_request += 1;
        let request = RequestId(self.last_request);
        if let CheckState::AwaitingReference { request: previous, .. } = &self.state {
            debug!("Request {} superseded by {}", previous, request);
        }
        self.state = CheckState::AwaitingReference { request, input };
        Transition::AwaitingReference(request)
    }

    fn on_settled(
        &mut self,
        request: RequestId,
        outcome: LookupOutcome<C::Reference>,
    ) -> Result<Transition, FlowError> {
        let input = match &self.state {
            CheckState::AwaitingReference {
                request: current,
                input,
            } if *current == request => input.clone(),
            CheckState::Committed { .. } => {
                return Ok(Transition::Ignored(IgnoreReason::AlreadyCommitted));
            }
            _ => {
                debug!(
                    "Discarding stale settlement {} for step {} of '{}'",
                    request,
                    self.check.step(),
                    P::NAME
                );
                return Ok(Transition::Ignored(IgnoreReason::Stale));
            }
        };

        match outcome {
            LookupOutcome::Found(reference) => {
                let record = self.controller.record()?;
                match self.check.validate(&input, &reference, &record) {
                    Ok(payload) => self.commit(input, payload),
                    Err(rejection) => self.reject(rejection, false),
                }
            }
            LookupOutcome::NotFound => self.reject(
                Rejection::NotFound {
                    key: self.check.not_found_key().to_string(),
                },
                false,
            ),
            LookupOutcome::Failed(ServiceError::Flagged { code, message }) => {
                debug!("Backend flagged {}: {}", code, message);
                let key = self.error_codes.translation_key(&code);
                let rewind = self.check.rewind_on_backend_error();
                self.reject(Rejection::Backend { code, key }, rewind)
            }
            LookupOutcome::Failed(ServiceError::Unflagged(details)) => {
                self.reject(Rejection::CheckFailed { details }, false)
            }
            LookupOutcome::TimedOut => self.reject(Rejection::TimedOut, false),
        }
    }

    fn commit(&mut self, input: CheckInput, payload: P::Payload) -> Result<Transition, FlowError> {
        let step = self.check.step();
        if let Err(e) = self.controller.store().commit_step::<P>(step, payload) {
            self.state = CheckState::AwaitingInput;
            return Err(e);
        }
        self.state = CheckState::Committed { input: Some(input) };
        info!("Step {} of '{}' accepted input", step, P::NAME);
        Ok(Transition::Committed)
    }

    fn reject(&mut self, rejection: Rejection, rewind: bool) -> Result<Transition, FlowError> {
        let step = self.check.step();
        self.state = CheckState::AwaitingInput;
        warn!("Step {} of '{}' rejected input: {}", step, P::NAME, rejection);
        self.notifier.notify(&Notice {
            process: P::NAME,
            step,
            key: rejection.message_key().to_string(),
            severity: Severity::Error,
        });
        let rewound_to = if rewind {
            self.controller.back()?
        } else {
            None
        };
        if let Some(target) = rewound_to {
            self.notifier.notify(&Notice {
                process: P::NAME,
                step: target,
                key: STEP_REWOUND_KEY.to_string(),
                severity: Severity::Info,
            });
        }
        Ok(Transition::Rejected {
            rejection,
            rewound_to,
        })
    }
}
