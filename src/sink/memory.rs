use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{LoadSummary, Sink, SinkError};
use crate::extract::Record;

/// Keeps everything in memory. Used by `--use-mock` runs and tests.
pub struct MemorySink {
    name: String,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    staged: Vec<Record>,
    loaded: Vec<Record>,
    batches: usize,
    closed: bool,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Records committed by `load`.
    pub fn records(&self) -> Vec<Record> {
        self.state().loaded.clone()
    }

    pub fn staged_count(&self) -> usize {
        self.state().staged.len()
    }

    pub fn batches(&self) -> usize {
        self.state().batches
    }

    pub fn is_loaded(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn store(&self, records: Vec<Record>) -> Result<(), SinkError> {
        let mut state = self.state();
        if state.closed {
            return Err(SinkError::Closed(self.name.clone()));
        }
        state.batches += 1;
        state.staged.extend(records);
        Ok(())
    }

    async fn load(&self) -> Result<LoadSummary, SinkError> {
        let mut state = self.state();
        if state.closed {
            return Err(SinkError::Closed(self.name.clone()));
        }
        let staged = std::mem::take(&mut state.staged);
        state.loaded.extend(staged);
        state.closed = true;
        Ok(LoadSummary {
            target: self.name.clone(),
            records: state.loaded.len(),
            batches: state.batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: u64) -> Record {
        match json!({ "id": id }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let sink = MemorySink::default();
        sink.store(vec![record(1), record(2)]).await.unwrap();
        sink.store(vec![record(3)]).await.unwrap();
        assert_eq!(sink.staged_count(), 3);
        assert!(sink.records().is_empty());

        let summary = sink.load().await.unwrap();
        assert_eq!(summary.records, 3);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.target, "memory");
        assert_eq!(sink.records().len(), 3);
        assert!(sink.is_loaded());
    }

    #[tokio::test]
    async fn test_closed_after_load() {
        let sink = MemorySink::new("out");
        sink.load().await.unwrap();

        let err = sink.store(vec![record(1)]).await.unwrap_err();
        assert!(matches!(err, SinkError::Closed(name) if name == "out"));
        assert!(sink.load().await.is_err());
    }
}
