use crate::check::{Check, CheckStage};
use crate::config::FlowConfig;
use crate::controller::StepController;
use crate::error::FlowError;
use crate::notify::{Notifier, TracingNotifier};
use crate::process::{ProcessKind, ProcessRecord, StepIndex};
use crate::service::ErrorCodeMap;
use crate::store::ProcessStore;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One operator's run through process `P`.
///
/// Hands out controllers and check stages that share the same store,
/// notifier and error-code mapping.
pub struct Session<P> {
    store: ProcessStore,
    notifier: Arc<dyn Notifier>,
    error_codes: Arc<ErrorCodeMap>,
    lookup_timeout: Option<Option<Duration>>,
    _kind: PhantomData<fn() -> P>,
}

impl<P: ProcessKind> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("process", &P::NAME)
            .field("lookup_timeout", &self.lookup_timeout)
            .finish()
    }
}

impl<P: ProcessKind> Session<P> {
    /// Session over `store`, logging notices and using each check's own timeout.
    pub fn new(store: ProcessStore) -> Self {
        Self {
            store,
            notifier: Arc::new(TracingNotifier::new()),
            error_codes: Arc::new(ErrorCodeMap::new()),
            lookup_timeout: None,
            _kind: PhantomData,
        }
    }

    /// Session over the store and lookup timeout described by `config`.
    pub fn from_config(config: &FlowConfig) -> Result<Self, FlowError> {
        Ok(Self::new(config.open_store()?).with_lookup_timeout(config.lookup_timeout()))
    }

    /// Sends rejections to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Maps backend error codes with `error_codes`.
    pub fn with_error_codes(mut self, error_codes: ErrorCodeMap) -> Self {
        self.error_codes = Arc::new(error_codes);
        self
    }

    /// Applies `lookup_timeout` to every stage, overriding the checks' own.
    pub fn with_lookup_timeout(mut self, lookup_timeout: Option<Duration>) -> Self {
        self.lookup_timeout = Some(lookup_timeout);
        self
    }

    /// Shared store.
    pub fn store(&self) -> &ProcessStore {
        &self.store
    }

    /// Controller for `step`.
    pub fn controller(&self, step: StepIndex) -> Result<StepController<P>, FlowError> {
        StepController::new(self.store.clone(), step)
    }

    /// Enters the step of `check` and returns its stage.
    pub fn open<C: Check<P>>(&self, check: C) -> Result<CheckStage<P, C>, FlowError> {
        let controller = self.controller(check.step())?;
        controller.enter()?;
        let mut stage = CheckStage::new(controller, check)?
            .with_notifier(Arc::clone(&self.notifier))
            .with_error_codes(Arc::clone(&self.error_codes));
        if let Some(lookup_timeout) = self.lookup_timeout {
            stage = stage.with_timeout(lookup_timeout);
        }
        Ok(stage)
    }

    /// Current record of the process.
    pub fn record(&self) -> Result<ProcessRecord<P::Payload>, FlowError> {
        self.store.get::<P>()
    }

    /// Step awaiting input.
    pub fn current_step(&self) -> Result<StepIndex, FlowError> {
        Ok(self.record()?.current_step())
    }

    /// Ends the run and forgets its state.
    pub fn finish(self) -> Result<(), FlowError> {
        self.store.clear::<P>()?;
        info!("Process '{}' finished", P::NAME);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{PickPayload, Picking};

    #[test]
    fn test_controllers_share_store() {
        let session = Session::<Picking>::new(ProcessStore::in_memory());
        session.controller(StepIndex::new(10)).unwrap().enter().unwrap();
        session.controller(StepIndex::new(20)).unwrap().enter().unwrap();
        assert_eq!(session.current_step().unwrap(), StepIndex::new(20));
    }

    #[test]
    fn test_finish_clears_state() {
        let store = ProcessStore::in_memory();
        let session = Session::<Picking>::new(store.clone());
        store
            .commit_step::<Picking>(StepIndex::new(30), PickPayload::Quantity(1))
            .unwrap();
        session.finish().unwrap();
        assert!(store.get::<Picking>().unwrap().is_empty());
    }

    #[test]
    fn test_from_config_uses_memory_by_default() {
        let session = Session::<Picking>::from_config(&FlowConfig::default()).unwrap();
        assert!(session.record().unwrap().is_empty());
        assert_eq!(
            session.lookup_timeout,
            Some(Some(Duration::from_secs(30)))
        );
    }
}
