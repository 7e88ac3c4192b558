//! Run files and process settings.
//!
//! A run file describes one invocation: which pipeline to use, how loud to
//! log and one job per extraction. Process settings come from the
//! environment (optionally seeded from a `.env` file) and fill in whatever a
//! job leaves unset.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::extract::{
    ExtractOptions, ExtractOptionsBuilder, QueryModel, QueryModelBuilder, RetryPolicy,
    RetryPolicyBuilder,
};
use crate::source::elasticsearch::ElasticsearchConfig;

pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid run file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("run file has no jobs")]
    NoJobs,

    #[error("job '{index}': {message}")]
    Job { index: String, message: String },

    #[error("invalid setting {name}={value}: {reason}")]
    Setting {
        name: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn job(index: &str, message: impl Into<String>) -> Self {
        Self::Job {
            index: index.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    #[default]
    Dev,
    Test,
    Prod,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "WARN")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunFile {
    #[serde(default)]
    pub env: Environment,

    /// Registry id. Falls back to the default composition.
    #[serde(default)]
    pub pipeline: Option<String>,

    #[serde(default)]
    pub logs_level: LogLevel,

    /// How many jobs run at once.
    #[serde(default)]
    pub worker_num: Option<usize>,

    pub jobs: Vec<JobConfig>,
}

impl RunFile {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let run: RunFile = serde_json::from_str(raw)?;
        run.validate()?;
        Ok(run)
    }

    /// Rejects a run that could not start: no jobs or a malformed query.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.is_empty() {
            return Err(ConfigError::NoJobs);
        }
        for job in &self.jobs {
            job.query_model()?;
        }
        Ok(())
    }
}

fn default_time_format() -> String {
    DEFAULT_TIME_FORMAT.to_string()
}

/// One extraction and where its records end up.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub index: String,

    #[serde(default)]
    pub start_time: Option<String>,

    #[serde(default)]
    pub end_time: Option<String>,

    #[serde(default = "default_time_format")]
    pub time_format: String,

    #[serde(default)]
    pub time_field: Option<String>,

    #[serde(default)]
    pub filters: Option<BTreeMap<String, Value>>,

    #[serde(default)]
    pub source_fields: Option<Vec<String>>,

    /// Path into each hit that holds the document, e.g. `["_source"]`.
    #[serde(default)]
    pub nested_key: Option<Vec<String>>,

    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub scroll: Option<String>,

    #[serde(default)]
    pub fail_on_missing: bool,

    /// Output file. Defaults to `<OUTPUT_DIR>/<index>.jsonl`.
    #[serde(default)]
    pub output: Option<String>,
}

impl JobConfig {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            start_time: None,
            end_time: None,
            time_format: default_time_format(),
            time_field: None,
            filters: None,
            source_fields: None,
            nested_key: None,
            batch_size: None,
            scroll: None,
            fail_on_missing: false,
            output: None,
        }
    }

    pub fn query_model(&self) -> Result<QueryModel, ConfigError> {
        if self.index.trim().is_empty() {
            return Err(ConfigError::job(&self.index, "index must not be empty"));
        }

        let mut builder = QueryModelBuilder::default();
        if let Some(field) = &self.time_field {
            builder.time_field(field.clone());
        }
        if let Some(start) = self.parse_time("start_time", self.start_time.as_deref())? {
            builder.start_time(start);
        }
        if let Some(end) = self.parse_time("end_time", self.end_time.as_deref())? {
            builder.end_time(end);
        }
        if let Some(filters) = &self.filters {
            builder.filters(filters.clone());
        }
        if let Some(fields) = &self.source_fields {
            builder.source_fields(fields.clone());
        }
        builder
            .build()
            .map_err(|e| ConfigError::job(&self.index, e.to_string()))
    }

    fn parse_time(
        &self,
        name: &str,
        raw: Option<&str>,
    ) -> Result<Option<NaiveDateTime>, ConfigError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => NaiveDateTime::parse_from_str(raw, &self.time_format)
                .map(Some)
                .map_err(|e| {
                    ConfigError::job(
                        &self.index,
                        format!("{name} '{raw}' does not match '{}': {e}", self.time_format),
                    )
                }),
        }
    }

    pub fn extract_options(&self, settings: &Settings) -> Result<ExtractOptions, ConfigError> {
        ExtractOptionsBuilder::default()
            .batch_size(self.batch_size.or(settings.default_batch_size))
            .scroll(self.scroll.clone().or_else(|| settings.default_scroll.clone()))
            .retry(settings.retry_policy()?)
            .build()
            .map_err(|e| ConfigError::job(&self.index, e.to_string()))
    }

    /// Records per load batch. Follows the page size so one page is one batch.
    pub fn load_batch_size(&self, settings: &Settings) -> usize {
        self.batch_size
            .or(settings.default_batch_size)
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_LOAD_BATCH_SIZE)
    }

    pub fn output_path(&self, settings: &Settings) -> PathBuf {
        match &self.output {
            Some(output) => PathBuf::from(output),
            None => settings
                .output_dir
                .join(format!("{}.jsonl", file_stem(&self.index))),
        }
    }
}

/// Index names may carry wildcards and commas.
fn file_stem(index: &str) -> String {
    index
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Process-wide settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub el_url: String,
    pub el_timeout: Duration,
    pub default_batch_size: Option<usize>,
    pub default_scroll: Option<String>,
    pub num_threads: usize,
    pub output_dir: PathBuf,
    pub retry_max_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            el_url: "http://localhost:9200".to_string(),
            el_timeout: Duration::from_secs(30),
            default_batch_size: None,
            default_scroll: None,
            num_threads: num_cpus::get(),
            output_dir: PathBuf::from("output"),
            retry_max_attempts: 4,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(url) = get("EL_URL") {
            settings.el_url = url;
        }
        if let Some(secs) = get("EL_TIMEOUT_SECS") {
            settings.el_timeout = Duration::from_secs(parse_setting("EL_TIMEOUT_SECS", &secs)?);
        }
        if let Some(size) = get("EL_DEFAULT_BATCH_SIZE") {
            settings.default_batch_size = Some(parse_setting("EL_DEFAULT_BATCH_SIZE", &size)?);
        }
        settings.default_scroll = get("EL_DEFAULT_SCROLL");
        if let Some(threads) = get("NUM_THREADS") {
            let threads: usize = parse_setting("NUM_THREADS", &threads)?;
            settings.num_threads = threads.max(1);
        }
        if let Some(dir) = get("OUTPUT_DIR") {
            settings.output_dir = PathBuf::from(dir);
        }
        if let Some(attempts) = get("RETRY_MAX_ATTEMPTS") {
            settings.retry_max_attempts = parse_setting("RETRY_MAX_ATTEMPTS", &attempts)?;
        }
        Ok(settings)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicyBuilder::default()
            .max_attempts(self.retry_max_attempts)
            .build()
            .map_err(|e| ConfigError::Setting {
                name: "RETRY_MAX_ATTEMPTS".to_string(),
                value: self.retry_max_attempts.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn elasticsearch(&self) -> ElasticsearchConfig {
        ElasticsearchConfig {
            url: self.el_url.clone(),
            timeout: self.el_timeout,
        }
    }
}

fn parse_setting<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Setting {
        name: name.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
