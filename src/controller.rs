//! Forward and backward navigation for one step of a process.

use crate::error::FlowError;
use crate::process::{ProcessKind, ProcessRecord, StepIndex};
use crate::store::ProcessStore;
use std::fmt;
use std::marker::PhantomData;
use tracing::{info, warn};

/// How a step was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// First forward entry: the process moved up from `previous`.
    Forward {
        /// Step that was current before entering
        previous: StepIndex,
    },
    /// The process is already at or past this step; nothing was stamped.
    Resumed {
        /// Current step of the process
        current: StepIndex,
    },
}

/// Owns the navigation contract of a single step.
///
/// # Examples
///
/// ```
/// # use scanflow::{ProcessKind, StepIndex, StepPayload};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// # struct Scan(String);
/// # impl StepPayload for Scan {
/// #     fn step(&self) -> StepIndex { StepIndex::new(10) }
/// # }
/// # struct Reception;
/// # impl ProcessKind for Reception {
/// #     const NAME: &'static str = "reception";
/// #     type Payload = Scan;
/// #     fn steps() -> &'static [StepIndex] { const STEPS: &[StepIndex] = &[StepIndex::new(10), StepIndex::new(20)]; STEPS }
/// # }
/// use scanflow::{Entry, ProcessStore, StepController};
///
/// # fn main() -> Result<(), scanflow::FlowError> {
/// let store = ProcessStore::in_memory();
/// let step10 = StepController::<Reception>::new(store.clone(), StepIndex::new(10))?;
///
/// assert_eq!(step10.enter()?, Entry::Forward { previous: StepIndex::START });
/// assert_eq!(step10.enter()?, Entry::Resumed { current: StepIndex::new(10) });
/// assert_eq!(store.get::<Reception>()?.current_step(), StepIndex::new(10));
/// # Ok(())
/// # }
/// ```
pub struct StepController<P> {
    store: ProcessStore,
    step: StepIndex,
    _kind: PhantomData<fn() -> P>,
}

impl<P> Clone for StepController<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            step: self.step,
            _kind: PhantomData,
        }
    }
}

impl<P: ProcessKind> fmt::Debug for StepController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepController")
            .field("process", &P::NAME)
            .field("step", &self.step)
            .finish()
    }
}

impl<P: ProcessKind> StepController<P> {
    /// Creates a controller for `step`, which must be declared by `P`.
    pub fn new(store: ProcessStore, step: StepIndex) -> Result<Self, FlowError> {
        if !P::declares(step) {
            return Err(FlowError::UnknownStep {
                process: P::NAME,
                step,
            });
        }
        Ok(Self {
            store,
            step,
            _kind: PhantomData,
        })
    }

    /// Step this controller navigates.
    pub fn step(&self) -> StepIndex {
        self.step
    }

    /// Store the controller writes to.
    pub fn store(&self) -> &ProcessStore {
        &self.store
    }

    /// Enters the step.
    ///
    /// If the process is below this step, the rewind pointer is stamped with
    /// the current step and the process moves here. Entering again once the
    /// process is at or past this step changes nothing.
    pub fn enter(&self) -> Result<Entry, FlowError> {
        let step = self.step;
        let entry = self.store.update::<P, _, _>(|record| {
            let current = record.current_step();
            if current >= step {
                return Ok(Entry::Resumed { current });
            }
            let target = record.step_mut(step);
            if target.previous_step.is_none() {
                target.previous_step = Some(current);
            }
            record.current_step = Some(step);
            Ok(Entry::Forward { previous: current })
        })?;
        if let Entry::Forward { previous } = entry {
            info!(
                "Process '{}' entered step {} from step {}",
                P::NAME,
                step,
                previous
            );
        }
        Ok(entry)
    }

    /// Skip-ahead entry: commits `default` as this step's payload.
    ///
    /// Neither the rewind pointer nor the current step is touched; moving on
    /// is up to the caller.
    pub fn enter_with_default(&self, default: P::Payload) -> Result<(), FlowError> {
        self.store.commit_step::<P>(self.step, default)
    }

    /// Rewinds to the step this one was entered from.
    ///
    /// Returns the step that became current, or `None` if this step was
    /// never entered forward and there is nowhere to go back to.
    pub fn back(&self) -> Result<Option<StepIndex>, FlowError> {
        let step = self.step;
        let previous = self.store.update::<P, _, _>(|record| {
            let previous = record.previous_step(step);
            if let Some(to) = previous {
                record.unwind(step, to);
            }
            Ok(previous)
        })?;
        match previous {
            Some(to) => info!(
                "Rewound process '{}' from step {} to step {}",
                P::NAME,
                step,
                to
            ),
            None => warn!(
                "Step {} of process '{}' has no previous step to return to",
                step,
                P::NAME
            ),
        }
        Ok(previous)
    }

    /// Returns `true` if this step is the one awaiting input.
    pub fn is_current(&self) -> Result<bool, FlowError> {
        Ok(self.store.get::<P>()?.current_step() == self.step)
    }

    /// Current record of the process.
    pub fn record(&self) -> Result<ProcessRecord<P::Payload>, FlowError> {
        self.store.get::<P>()
    }

    /// Payload committed to this step, if any.
    pub fn data(&self) -> Result<Option<P::Payload>, FlowError> {
        Ok(self.store.get::<P>()?.data(self.step).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{PickPayload, Picking};
    use crate::store::Action;

    fn controller(store: &ProcessStore, step: u32) -> StepController<Picking> {
        StepController::new(store.clone(), StepIndex::new(step)).unwrap()
    }

    #[test]
    fn test_unknown_step_is_rejected() {
        let store = ProcessStore::in_memory();
        let result = StepController::<Picking>::new(store, StepIndex::new(15));
        assert!(matches!(result, Err(FlowError::UnknownStep { .. })));
    }

    #[test]
    fn test_forward_entry_stamps_once() {
        let store = ProcessStore::in_memory();
        let step10 = controller(&store, 10);
        let step20 = controller(&store, 20);

        step10.enter().unwrap();
        assert_eq!(
            step20.enter().unwrap(),
            Entry::Forward {
                previous: StepIndex::new(10)
            }
        );
        for _ in 0..3 {
            assert_eq!(
                step20.enter().unwrap(),
                Entry::Resumed {
                    current: StepIndex::new(20)
                }
            );
        }

        let record = store.get::<Picking>().unwrap();
        assert_eq!(record.previous_step(StepIndex::new(20)), Some(StepIndex::new(10)));
        assert_eq!(record.current_step, Some(StepIndex::new(20)));
    }

    #[test]
    fn test_entering_earlier_step_does_not_restamp() {
        let store = ProcessStore::in_memory();
        controller(&store, 10).enter().unwrap();
        controller(&store, 30).enter().unwrap();

        assert!(matches!(
            controller(&store, 20).enter().unwrap(),
            Entry::Resumed { .. }
        ));
        let record = store.get::<Picking>().unwrap();
        assert_eq!(record.current_step, Some(StepIndex::new(30)));
        assert!(record.step(StepIndex::new(20)).is_none());
    }

    #[test]
    fn test_pointer_only_back_keeps_first_stamp() {
        let store = ProcessStore::in_memory();
        controller(&store, 10).enter().unwrap();
        controller(&store, 30).enter().unwrap();
        store
            .dispatch::<Picking>(Action::OnBack {
                step_to_return: StepIndex::new(20),
            })
            .unwrap();

        controller(&store, 30).enter().unwrap();
        assert_eq!(
            store
                .get::<Picking>()
                .unwrap()
                .previous_step(StepIndex::new(30)),
            Some(StepIndex::new(10))
        );
    }

    #[test]
    fn test_enter_with_default_leaves_pointers() {
        let store = ProcessStore::in_memory();
        controller(&store, 10).enter().unwrap();

        controller(&store, 20)
            .enter_with_default(PickPayload::Article("ART-7".to_string()))
            .unwrap();

        let record = store.get::<Picking>().unwrap();
        assert_eq!(record.current_step, Some(StepIndex::new(10)));
        assert_eq!(record.previous_step(StepIndex::new(20)), None);
        assert_eq!(
            record.data(StepIndex::new(20)),
            Some(&PickPayload::Article("ART-7".to_string()))
        );
    }

    #[test]
    fn test_back_unwinds_to_previous() {
        let store = ProcessStore::in_memory();
        let step10 = controller(&store, 10);
        let step30 = controller(&store, 30);
        step10.enter().unwrap();
        store
            .commit_step::<Picking>(StepIndex::new(10), PickPayload::Location("A-01".to_string()))
            .unwrap();
        step30.enter().unwrap();
        store
            .commit_step::<Picking>(StepIndex::new(30), PickPayload::Quantity(5))
            .unwrap();

        assert_eq!(step30.back().unwrap(), Some(StepIndex::new(10)));

        let record = store.get::<Picking>().unwrap();
        assert_eq!(record.current_step, Some(StepIndex::new(10)));
        assert!(record.data(StepIndex::new(10)).is_none());
        assert!(record.data(StepIndex::new(30)).is_none());
        assert_eq!(record.previous_step(StepIndex::new(10)), Some(StepIndex::START));
        assert_eq!(record.previous_step(StepIndex::new(30)), Some(StepIndex::new(10)));
        assert!(step10.is_current().unwrap());
    }

    #[test]
    fn test_concurrent_back_rewinds_once() {
        let store = ProcessStore::in_memory();
        for (step, payload) in [
            (10, PickPayload::Location("A-01".to_string())),
            (20, PickPayload::Article("ART-7".to_string())),
            (30, PickPayload::Quantity(2)),
        ] {
            controller(&store, step).enter().unwrap();
            store
                .commit_step::<Picking>(StepIndex::new(step), payload)
                .unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || controller(&store, 30).back().unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(StepIndex::new(20)));
        }

        let record = store.get::<Picking>().unwrap();
        assert_eq!(record.current_step, Some(StepIndex::new(20)));
        assert!(record.data(StepIndex::new(10)).is_some());
        assert!(record.data(StepIndex::new(20)).is_none());
        assert!(record.data(StepIndex::new(30)).is_none());
        assert_eq!(record.previous_step(StepIndex::new(20)), Some(StepIndex::new(10)));
    }

    #[test]
    fn test_back_without_entry_is_noop() {
        let store = ProcessStore::in_memory();
        assert_eq!(controller(&store, 20).back().unwrap(), None);
        assert!(store.get::<Picking>().unwrap().is_empty());
    }
}
