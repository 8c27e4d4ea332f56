use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Position of a step inside a guided process.
///
/// Steps are numbered sparsely (10, 20, 30...) so that a workflow can insert
/// or skip steps without renumbering. Ordering follows the number.
///
/// # Examples
///
/// ```
/// use scanflow::StepIndex;
///
/// let step = StepIndex::new(20);
/// assert_eq!(step.get(), 20);
/// assert!(StepIndex::START < step);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepIndex(u32);

impl StepIndex {
    /// The implicit position of a process nobody has entered yet.
    pub const START: StepIndex = StepIndex(0);

    /// Creates a new StepIndex
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw step number
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StepIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StepIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

/// Data committed by one step of a process.
///
/// Implementors are usually enums with one variant per step; `step()` tells
/// the store which step a value belongs to so a payload can never be filed
/// under the wrong step.
pub trait StepPayload:
    Serialize + DeserializeOwned + Clone + fmt::Debug + PartialEq + Send + Sync + 'static
{
    /// The step this payload belongs to.
    fn step(&self) -> StepIndex;
}

/// Declares one guided workflow: its persisted name and fixed step schema.
///
/// # Examples
///
/// ```
/// use scanflow::{ProcessKind, StepIndex, StepPayload};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// enum CountPayload {
///     Location(String),
///     Quantity(u64),
/// }
///
/// impl StepPayload for CountPayload {
///     fn step(&self) -> StepIndex {
///         match self {
///             CountPayload::Location(_) => StepIndex::new(10),
///             CountPayload::Quantity(_) => StepIndex::new(20),
///         }
///     }
/// }
///
/// struct CycleCount;
///
/// impl ProcessKind for CycleCount {
///     const NAME: &'static str = "cycleCount";
///     type Payload = CountPayload;
///
///     fn steps() -> &'static [StepIndex] {
///         const STEPS: &[StepIndex] = &[StepIndex::new(10), StepIndex::new(20)];
///         STEPS
///     }
/// }
///
/// assert!(CycleCount::declares(StepIndex::new(20)));
/// assert!(!CycleCount::declares(StepIndex::new(30)));
/// ```
pub trait ProcessKind: Send + Sync + 'static {
    /// Storage key of the process, e.g. `"boxChecking"`.
    const NAME: &'static str;

    /// Payload committed by the process' steps.
    type Payload: StepPayload;

    /// Every step of the process in ascending order.
    fn steps() -> &'static [StepIndex];

    /// Returns `true` if `step` is part of the schema.
    fn declares(step: StepIndex) -> bool {
        Self::steps().contains(&step)
    }
}

/// State of one step inside a [`ProcessRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord<D> {
    /// Step to return to on rewind. Stamped on the first forward entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_step: Option<StepIndex>,
    /// Validated payload. Absent until the check stage accepts an input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<D>,
    /// Workflow-specific bookkeeping (loop counters, branch targets).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl<D> Default for StepRecord<D> {
    fn default() -> Self {
        Self {
            previous_step: None,
            data: None,
            extra: BTreeMap::new(),
        }
    }
}

impl<D> StepRecord<D> {
    /// Drops the payload and any derived fields, keeping the rewind pointer.
    pub fn clear_data(&mut self) {
        self.data = None;
        self.extra.clear();
    }

    /// Returns `true` if a payload has been committed.
    pub fn is_committed(&self) -> bool {
        self.data.is_some()
    }
}

/// Everything persisted for one process name.
///
/// A fresh record is empty: no current step, no step records.
///
/// # Examples
///
/// ```
/// use scanflow::{ProcessRecord, StepIndex};
///
/// let mut record = ProcessRecord::<String>::default();
/// assert_eq!(record.current_step(), StepIndex::START);
///
/// record.current_step = Some(StepIndex::new(10));
/// record.step_mut(StepIndex::new(10)).data = Some("HU123".to_string());
/// assert_eq!(record.data(StepIndex::new(10)), Some(&"HU123".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord<D> {
    /// Step whose input is awaited next. `None` until the first step is entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepIndex>,
    /// Sparse per-step state, keyed by step number.
    #[serde(default = "BTreeMap::new")]
    pub steps: BTreeMap<StepIndex, StepRecord<D>>,
    /// Process-wide bookkeeping fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl<D> Default for ProcessRecord<D> {
    fn default() -> Self {
        Self {
            current_step: None,
            steps: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl<D> ProcessRecord<D> {
    /// Current step, treating a fresh process as sitting at [`StepIndex::START`].
    pub fn current_step(&self) -> StepIndex {
        self.current_step.unwrap_or(StepIndex::START)
    }

    /// Returns the record of `step`, if it was ever entered.
    pub fn step(&self, step: StepIndex) -> Option<&StepRecord<D>> {
        self.steps.get(&step)
    }

    /// Returns the record of `step`, creating an empty one if needed.
    pub fn step_mut(&mut self, step: StepIndex) -> &mut StepRecord<D> {
        self.steps.entry(step).or_default()
    }

    /// Returns the committed payload of `step`.
    pub fn data(&self, step: StepIndex) -> Option<&D> {
        self.steps.get(&step).and_then(|record| record.data.as_ref())
    }

    /// Returns the rewind pointer of `step`.
    pub fn previous_step(&self, step: StepIndex) -> Option<StepIndex> {
        self.steps.get(&step).and_then(|record| record.previous_step)
    }

    /// Returns `true` if nothing was ever written.
    pub fn is_empty(&self) -> bool {
        self.current_step.is_none() && self.steps.is_empty() && self.extra.is_empty()
    }

    /// Unwinds the process from `from` back to `to`.
    ///
    /// Every step in `[to, from]` loses its payload and derived fields.
    /// Rewind pointers survive: they are stamped once, so the operator can
    /// keep going back and walking forward again does not re-stamp them.
    pub(crate) fn unwind(&mut self, from: StepIndex, to: StepIndex) {
        let upper = from.max(to);
        for (_, record) in self.steps.range_mut(to..=upper) {
            record.clear_data();
        }
        self.current_step = Some(to);
    }
}
