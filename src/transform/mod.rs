//! Record transformers applied between extraction and load.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::extract::Record;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("key '{key}' not found in record")]
    NestedKey { key: String },

    #[error("key '{key}' does not hold an object")]
    NotAnObject { key: String },
}

/// Converts one record into another.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, record: Record) -> Result<Record, TransformError>;
}

/// Returns records unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Transformer for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn transform(&self, record: Record) -> Result<Record, TransformError> {
        Ok(record)
    }
}

/// Descends into a nested object, e.g. `["_source"]` turns a search hit into
/// its document.
#[derive(Debug, Clone)]
pub struct NestedKey {
    path: Vec<String>,
}

impl NestedKey {
    pub fn new<I, K>(path: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }
}

impl Transformer for NestedKey {
    fn name(&self) -> &str {
        "nested_key"
    }

    fn transform(&self, record: Record) -> Result<Record, TransformError> {
        let mut current = record;
        for key in &self.path {
            current = match current.remove(key) {
                Some(Value::Object(inner)) => inner,
                Some(_) => return Err(TransformError::NotAnObject { key: key.clone() }),
                None => return Err(TransformError::NestedKey { key: key.clone() }),
            };
        }
        Ok(current)
    }
}

/// Applies transformers in order. An empty chain is a passthrough.
#[derive(Clone, Default)]
pub struct TransformerChain {
    stages: Vec<Arc<dyn Transformer>>,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transformer: impl Transformer + 'static) -> Self {
        self.stages.push(Arc::new(transformer));
        self
    }

    pub fn push(&mut self, transformer: Arc<dyn Transformer>) {
        self.stages.push(transformer);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl Transformer for TransformerChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn transform(&self, record: Record) -> Result<Record, TransformError> {
        self.stages
            .iter()
            .try_fold(record, |record, stage| stage.transform(record))
    }
}
