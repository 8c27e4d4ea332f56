//! Operator-facing notices.
//!
//! Check stages never render anything themselves; they hand a [`Notice`]
//! carrying a translation key to a [`Notifier`], which the terminal UI
//! implements.

use crate::process::StepIndex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Input was rejected.
    Error,
    /// Informational (e.g. step rewound).
    Info,
}

/// Something the operator should be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Process that raised the notice
    pub process: &'static str,
    /// Step that raised the notice
    pub step: StepIndex,
    /// Translation key, `namespace:key`
    pub key: String,
    /// Severity
    pub severity: Severity,
}

/// Sink for operator notices.
pub trait Notifier: Send + Sync {
    /// Shows `notice` to the operator.
    fn notify(&self, notice: &Notice);
}

/// Translations keyed by `namespace:key`.
///
/// # Examples
///
/// ```
/// use scanflow::MessageCatalog;
///
/// let catalog = MessageCatalog::from_json(
///     r#"{ "messages": { "no-handling-unit": "No such handling unit" } }"#,
/// )?;
/// assert_eq!(catalog.translate("messages:no-handling-unit"), "No such handling unit");
/// assert_eq!(catalog.translate("messages:unknown"), "messages:unknown");
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    messages: HashMap<String, String>,
}

impl MessageCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `{ "<namespace>": { "<key>": "<text>" } }` documents.
    ///
    /// Non-string leaves are skipped.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let namespaces: HashMap<String, HashMap<String, Value>> = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        for (namespace, entries) in namespaces {
            for (key, text) in entries {
                if let Value::String(text) = text {
                    catalog.insert(format!("{namespace}:{key}"), text);
                }
            }
        }
        Ok(catalog)
    }

    /// Adds or replaces a translation.
    pub fn insert(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.messages.insert(key.into(), text.into());
    }

    /// Translation of `key`, or the key itself when missing.
    pub fn translate<'a>(&'a self, key: &'a str) -> &'a str {
        self.messages.get(key).map_or(key, String::as_str)
    }

    /// Number of translations.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the catalog holds no translations.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Notifier that writes notices to the tracing log.
#[derive(Debug, Default)]
pub struct TracingNotifier {
    catalog: MessageCatalog,
}

impl TracingNotifier {
    /// Notifier logging raw translation keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier logging translated text.
    pub fn with_catalog(catalog: MessageCatalog) -> Self {
        Self { catalog }
    }
}

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &Notice) {
        let text = self.catalog.translate(&notice.key);
        match notice.severity {
            Severity::Error => warn!(
                process = notice.process,
                step = notice.step.get(),
                "{}",
                text
            ),
            Severity::Info => info!(
                process = notice.process,
                step = notice.step.get(),
                "{}",
                text
            ),
        }
    }
}

/// Notifier that keeps every notice for later inspection.
///
/// Handy for UIs that poll for the last message, and for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All notices received so far.
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Translation key of the most recent notice.
    pub fn last_key(&self) -> Option<String> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|notice| notice.key.clone())
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice.clone());
    }
}
