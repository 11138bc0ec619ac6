mod dryrun;
mod http;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use valley_contracts::jobs::TransformOutput;

use crate::photo::Photo;

pub use dryrun::DryrunTransformer;
pub use http::{HttpTransformer, HttpTransformerConfig};

#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub photo: Photo,
    pub style_id: String,
}

/// The remote style transformation. Blocking; the workflow only ever calls
/// it from a worker thread, never from the thread that owns session state.
pub trait StyleTransformer: Send + Sync {
    fn name(&self) -> &str;
    fn transform(&self, request: &TransformRequest) -> Result<TransformOutput>;
}

#[derive(Default)]
pub struct TransformerRegistry {
    transformers: BTreeMap<String, Arc<dyn StyleTransformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: StyleTransformer + 'static>(&mut self, transformer: T) {
        self.transformers
            .insert(transformer.name().to_string(), Arc::new(transformer));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StyleTransformer>> {
        self.transformers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.transformers.keys().cloned().collect()
    }
}

/// `dryrun` always; `http` when an endpoint is configured in the environment.
pub fn default_transformer_registry() -> TransformerRegistry {
    let mut transformers = TransformerRegistry::new();
    transformers.register(DryrunTransformer::new());
    match HttpTransformerConfig::from_env() {
        Ok(Some(config)) => match HttpTransformer::new(config) {
            Ok(transformer) => transformers.register(transformer),
            Err(err) => tracing::warn!(error = %err, "http transformer unavailable"),
        },
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "http transformer misconfigured"),
    }
    transformers
}
