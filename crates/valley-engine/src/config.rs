use std::env;

use anyhow::{Context, Result};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Knobs for a running workflow. Everything else comes from the catalog and
/// the chosen transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Transforms allowed in flight at once. At least one.
    pub max_concurrency: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl WorkflowConfig {
    pub fn with_max_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Reads `VALLEY_MAX_CONCURRENCY`; unset or blank keeps the default.
    pub fn from_env() -> Result<Self> {
        Self::from_value(env::var("VALLEY_MAX_CONCURRENCY").ok().as_deref())
    }

    fn from_value(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(Self::default());
        };
        let parsed = raw
            .parse::<usize>()
            .with_context(|| format!("VALLEY_MAX_CONCURRENCY is not a count: {raw}"))?;
        Ok(Self::with_max_concurrency(parsed))
    }
}
