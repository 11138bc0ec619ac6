//! Errors raised by the transformation workflow.

use thiserror::Error;
use valley_contracts::jobs::Generation;

use crate::session::Screen;

/// Everything the workflow can refuse or record.
///
/// Only `UnknownKey`, `UnknownCategory`, `UnknownStyle`, `EmptyFullTransform`,
/// `NotAuthorized` and `NotReady` are meant for the caller. `Selection` and
/// `DuplicateRetry` are no-ops, `Transform` is recorded on its job and
/// `StaleGeneration` is swallowed by the completion handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// An event arrived in a state that does not accept it.
    #[error("'{event}' is not accepted while {state}")]
    Selection { event: &'static str, state: Screen },

    /// A job's remote operation failed.
    #[error("transform of '{key}' failed: {message}")]
    Transform { key: String, message: String },

    #[error("a retry of '{0}' is already in flight")]
    DuplicateRetry(String),

    #[error("no result with key '{0}'")]
    UnknownKey(String),

    /// A result arrived after the session it belonged to was reset.
    #[error("result for '{key}' is from generation {result}, session is at {current}")]
    StaleGeneration {
        key: String,
        result: Generation,
        current: Generation,
    },

    #[error("full transform '{0}' has no member styles")]
    EmptyFullTransform(String),

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("style '{style}' is not offered in category '{category}'")]
    UnknownStyle { style: String, category: String },

    #[error("session is not authorized")]
    NotAuthorized,

    /// The action needs a finished result and there is none on screen.
    #[error("'{action}' needs a finished result, session is at {state}")]
    NotReady { action: &'static str, state: Screen },
}

impl WorkflowError {
    pub(crate) fn selection(event: &'static str, state: Screen) -> Self {
        Self::Selection { event, state }
    }

    pub fn is_selection(&self) -> bool {
        matches!(self, Self::Selection { .. })
    }

    pub fn is_duplicate_retry(&self) -> bool {
        matches!(self, Self::DuplicateRetry(_))
    }

    pub fn is_unknown_key(&self) -> bool {
        matches!(self, Self::UnknownKey(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleGeneration { .. })
    }

    /// Rejections that leave state untouched and need no user-facing report.
    pub fn is_benign(&self) -> bool {
        self.is_selection() || self.is_duplicate_retry() || self.is_stale()
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Flattens an error chain into one line, dropping repeated causes.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().is_some_and(|existing| existing == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::{error_chain_text, WorkflowError};
    use crate::session::Screen;

    #[test]
    fn error_chain_text_joins_unique_causes() {
        let err = anyhow::anyhow!("connection reset")
            .context("upload failed")
            .context("upload failed");
        assert_eq!(
            error_chain_text(&err, 200),
            "upload failed | caused by: connection reset"
        );
        assert_eq!(error_chain_text(&err, 6), "upload…");
    }

    #[test]
    fn selection_error_message_names_state() {
        let err = WorkflowError::selection("pair_ready", Screen::Processing);
        assert_eq!(err.to_string(), "'pair_ready' is not accepted while processing");
        assert!(err.is_benign());
        assert!(!WorkflowError::UnknownKey("x".to_string()).is_benign());
    }
}
