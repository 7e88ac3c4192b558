use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Noisy HTTP internals stay at warn unless `RUST_LOG` says otherwise.
const QUIET_DEPENDENCIES: &str = "hyper=warn,reqwest=warn,h2=warn";

pub fn log_filter(level: LogLevel) -> String {
    format!("{},{}", level.as_directive(), QUIET_DEPENDENCIES)
}

/// Installs the global subscriber. Logs go to stderr so stdout carries only
/// the run status. `RUST_LOG` takes precedence over the run file's level.
pub fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter(level)));

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter() {
        assert_eq!(
            log_filter(LogLevel::Warning),
            "warn,hyper=warn,reqwest=warn,h2=warn"
        );
        assert!(log_filter(LogLevel::Critical).starts_with("error,"));
    }

    #[test]
    fn test_init_twice() {
        init_logging(LogLevel::Debug);
        init_logging(LogLevel::Info);
    }
}
