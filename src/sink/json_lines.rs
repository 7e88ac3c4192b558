use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{LoadSummary, Sink, SinkError};
use crate::extract::Record;

/// Writes newline-delimited JSON to a raw storage file.
///
/// Records are written to `<path>.partial` as they arrive and the file is
/// renamed to `<path>` on `load`, so a failed run never leaves a complete
/// looking output behind.
pub struct JsonLinesSink {
    path: PathBuf,
    partial: PathBuf,
    state: Mutex<WriterState>,
}

#[derive(Default)]
struct WriterState {
    writer: Option<BufWriter<File>>,
    records: usize,
    batches: usize,
    closed: bool,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        Self {
            path,
            partial: PathBuf::from(partial),
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<BufWriter<File>, SinkError> {
        if let Some(parent) = self.partial.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let file = File::create(&self.partial).await?;
        debug!(path = %self.partial.display(), "opened raw storage file");
        Ok(BufWriter::new(file))
    }

    fn name_for_errors(&self) -> String {
        self.path.display().to_string()
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    fn name(&self) -> &str {
        "json_lines"
    }

    async fn store(&self, records: Vec<Record>) -> Result<(), SinkError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SinkError::Closed(self.name_for_errors()));
        }
        if state.writer.is_none() {
            state.writer = Some(self.open().await?);
        }

        let mut buffer = Vec::new();
        for record in &records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }
        if let Some(writer) = state.writer.as_mut() {
            writer.write_all(&buffer).await?;
        }
        state.records += records.len();
        state.batches += 1;
        Ok(())
    }

    async fn load(&self) -> Result<LoadSummary, SinkError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SinkError::Closed(self.name_for_errors()));
        }

        let mut writer = match state.writer.take() {
            Some(writer) => writer,
            None => self.open().await?,
        };
        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        fs::rename(&self.partial, &self.path).await?;
        state.closed = true;

        info!(
            path = %self.path.display(),
            records = state.records,
            batches = state.batches,
            "raw storage file written"
        );
        Ok(LoadSummary {
            target: self.path.display().to_string(),
            records: state.records,
            batches: state.batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(id: u64) -> Record {
        match json!({ "id": id, "status": "active" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_writes_lines_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("events.jsonl");
        let sink = JsonLinesSink::new(&path);

        sink.store(vec![record(1), record(2)]).await.unwrap();
        sink.store(vec![record(3)]).await.unwrap();
        assert!(!path.exists());

        let summary = sink.load().await.unwrap();
        assert_eq!(summary.records, 3);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.target, path.display().to_string());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["id"], 3);
        assert!(!dir.path().join("out").join("events.jsonl.partial").exists());
    }

    #[tokio::test]
    async fn test_empty_load_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jsonl");
        let sink = JsonLinesSink::new(&path);

        let summary = sink.load().await.unwrap();
        assert_eq!(summary.records, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_unloaded_sink_leaves_partial_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonLinesSink::new(&path);

        sink.store(vec![record(1)]).await.unwrap();
        drop(sink);

        assert!(!path.exists());
        assert!(dir.path().join("events.jsonl.partial").exists());
    }

    #[tokio::test]
    async fn test_closed_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("events.jsonl"));
        sink.load().await.unwrap();

        let err = sink.store(vec![record(1)]).await.unwrap_err();
        assert!(matches!(err, SinkError::Closed(_)));
    }
}
