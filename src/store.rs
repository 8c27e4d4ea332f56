//! Process state store.
//!
//! [`ProcessStore`] is the single owner of persisted process records. Every
//! mutation re-reads the persisted value under a store-wide lock, applies the
//! change and writes the whole record back, so two components touching the
//! same process never overwrite each other with stale copies.

use crate::error::FlowError;
use crate::process::{ProcessKind, ProcessRecord, StepIndex, StepPayload};
use crate::storage::{MemoryStorage, Storage};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Changes applied to a single step by [`Action::UpdateByStep`].
///
/// `None` fields are left untouched; `extra` entries are merged key by key.
#[derive(Debug, Clone, PartialEq)]
pub struct StepUpdate<D> {
    /// New rewind pointer.
    pub previous_step: Option<StepIndex>,
    /// New payload.
    pub data: Option<D>,
    /// Bookkeeping fields to merge into the step.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl<D> Default for StepUpdate<D> {
    fn default() -> Self {
        Self {
            previous_step: None,
            data: None,
            extra: BTreeMap::new(),
        }
    }
}

impl<D> StepUpdate<D> {
    /// Update carrying only a payload.
    pub fn data(data: D) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Adds a bookkeeping field.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Changes applied at the process root alongside a step update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootUpdate {
    /// New current step.
    pub current_step: Option<StepIndex>,
    /// Root bookkeeping fields to merge.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RootUpdate {
    /// Root update that only moves the current step.
    pub fn current_step(step: StepIndex) -> Self {
        Self {
            current_step: Some(step),
            extra: BTreeMap::new(),
        }
    }
}

/// Reducer-style commands accepted by [`ProcessStore::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Action<D> {
    /// Merge `update` into `step` and apply `root` to the process.
    UpdateByStep {
        /// Target step
        step: StepIndex,
        /// Per-step changes
        update: StepUpdate<D>,
        /// Optional process-level changes
        root: Option<RootUpdate>,
    },
    /// Move the current step back without touching step data.
    OnBack {
        /// Step to make current
        step_to_return: StepIndex,
    },
}

/// Typed, process-keyed state container.
///
/// Cloning is cheap and yields a handle to the same storage and lock.
///
/// # Examples
///
/// ```
/// use scanflow::{ProcessKind, ProcessStore, StepIndex, StepPayload};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Location(String);
///
/// impl StepPayload for Location {
///     fn step(&self) -> StepIndex {
///         StepIndex::new(10)
///     }
/// }
///
/// struct Putaway;
///
/// impl ProcessKind for Putaway {
///     const NAME: &'static str = "putaway";
///     type Payload = Location;
///
///     fn steps() -> &'static [StepIndex] {
///         const STEPS: &[StepIndex] = &[StepIndex::new(10)];
///         STEPS
///     }
/// }
///
/// # fn main() -> Result<(), scanflow::FlowError> {
/// let store = ProcessStore::in_memory();
/// assert!(store.get::<Putaway>()?.is_empty());
///
/// store.commit_step::<Putaway>(StepIndex::new(10), Location("A-01-02".to_string()))?;
/// let record = store.get::<Putaway>()?;
/// assert_eq!(record.data(StepIndex::new(10)), Some(&Location("A-01-02".to_string())));
///
/// store.clear::<Putaway>()?;
/// assert!(store.get::<Putaway>()?.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProcessStore {
    storage: Arc<dyn Storage>,
    write_lock: Arc<Mutex<()>>,
}

impl fmt::Debug for ProcessStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessStore").finish_non_exhaustive()
    }
}

impl ProcessStore {
    /// Creates a store over the given substrate.
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self::with_storage(Arc::new(storage))
    }

    /// Creates a store over a shared substrate.
    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Creates a store backed by session memory.
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// Returns the record of process `P`.
    ///
    /// A missing record and a record that no longer parses both yield an
    /// empty record; only substrate failures are errors.
    pub fn get<P: ProcessKind>(&self) -> Result<ProcessRecord<P::Payload>, FlowError> {
        let Some(raw) = self.storage.read(P::NAME)? else {
            return Ok(ProcessRecord::default());
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(
                    "Discarding unreadable state of process '{}': {}",
                    P::NAME,
                    e
                );
                Ok(ProcessRecord::default())
            }
        }
    }

    /// Replaces the record of process `P`.
    pub fn set<P: ProcessKind>(&self, record: &ProcessRecord<P::Payload>) -> Result<(), FlowError> {
        let _guard = self.lock();
        self.persist::<P>(record)
    }

    /// Deletes the record of process `P` (workflow finished or abandoned).
    pub fn clear<P: ProcessKind>(&self) -> Result<(), FlowError> {
        let _guard = self.lock();
        self.storage.remove(P::NAME)?;
        info!("Cleared state of process '{}'", P::NAME);
        Ok(())
    }

    /// Read-modify-write on the record of process `P`.
    ///
    /// `f` runs against the latest persisted value. The result is only
    /// written back if `f` succeeds, so a failed update leaves no trace.
    pub fn update<P, F, T>(&self, f: F) -> Result<T, FlowError>
    where
        P: ProcessKind,
        F: FnOnce(&mut ProcessRecord<P::Payload>) -> Result<T, FlowError>,
    {
        let _guard = self.lock();
        let mut record = self.get::<P>()?;
        let output = f(&mut record)?;
        self.persist::<P>(&record)?;
        Ok(output)
    }

    /// Applies a reducer action and returns the resulting record.
    pub fn dispatch<P: ProcessKind>(
        &self,
        action: Action<P::Payload>,
    ) -> Result<ProcessRecord<P::Payload>, FlowError> {
        debug!("Dispatching {:?} on process '{}'", action, P::NAME);
        self.update::<P, _, _>(|record| {
            match action {
                Action::UpdateByStep { step, update, root } => {
                    ensure_declared::<P>(step)?;
                    if let Some(data) = &update.data {
                        ensure_payload_matches::<P>(step, data)?;
                    }
                    let target = record.step_mut(step);
                    if let Some(previous) = update.previous_step {
                        target.previous_step = Some(previous);
                    }
                    if let Some(data) = update.data {
                        target.data = Some(data);
                    }
                    target.extra.extend(update.extra);
                    if let Some(root) = root {
                        if let Some(current) = root.current_step {
                            record.current_step = Some(current);
                        }
                        record.extra.extend(root.extra);
                    }
                }
                Action::OnBack { step_to_return } => {
                    record.current_step = Some(step_to_return);
                }
            }
            Ok(record.clone())
        })
    }

    /// Commits a validated payload to `step`.
    ///
    /// The payload is written whole or not at all.
    pub fn commit_step<P: ProcessKind>(
        &self,
        step: StepIndex,
        payload: P::Payload,
    ) -> Result<(), FlowError> {
        ensure_declared::<P>(step)?;
        ensure_payload_matches::<P>(step, &payload)?;
        self.update::<P, _, _>(|record| {
            record.step_mut(step).data = Some(payload);
            Ok(())
        })?;
        info!("Committed step {} of process '{}'", step, P::NAME);
        Ok(())
    }

    /// Rewinds process `P` from step `from` to step `to`.
    ///
    /// Clears the payloads of every step from `to` through `from`, keeps
    /// their rewind pointers, and makes `to` current.
    pub fn rewind_to<P: ProcessKind>(
        &self,
        from: StepIndex,
        to: StepIndex,
    ) -> Result<ProcessRecord<P::Payload>, FlowError> {
        let record = self.update::<P, _, _>(|record| {
            record.unwind(from, to);
            Ok(record.clone())
        })?;
        info!(
            "Rewound process '{}' from step {} to step {}",
            P::NAME,
            from,
            to
        );
        Ok(record)
    }

    fn persist<P: ProcessKind>(&self, record: &ProcessRecord<P::Payload>) -> Result<(), FlowError> {
        let raw = serde_json::to_string(record).map_err(|source| FlowError::Serialization {
            process: P::NAME,
            source,
        })?;
        self.storage.write(P::NAME, &raw)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn ensure_declared<P: ProcessKind>(step: StepIndex) -> Result<(), FlowError> {
    if P::declares(step) {
        Ok(())
    } else {
        Err(FlowError::UnknownStep {
            process: P::NAME,
            step,
        })
    }
}

fn ensure_payload_matches<P: ProcessKind>(
    step: StepIndex,
    payload: &P::Payload,
) -> Result<(), FlowError> {
    let payload_step = payload.step();
    if payload_step == step {
        Ok(())
    } else {
        Err(FlowError::PayloadMismatch {
            process: P::NAME,
            step,
            payload_step,
        })
    }
}
