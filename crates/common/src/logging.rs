//! Logging and tracing initialization.

use std::fs::File;
use std::path::Path;

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber with the given configuration.
///
/// `RUST_LOG` takes precedence over `config.level`. When `config.file` is set,
/// output is appended to that file instead of stderr; if it cannot be opened,
/// output stays on stderr and the failure is logged as a warning.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file, file_error) = match config.file.as_deref().map(open_log_file) {
        Some(Ok(file)) => (Some(file), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    match (config.json, file) {
        (true, Some(file)) => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(std::sync::Mutex::new(file))
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber).ok();
        }
        (true, None) => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber).ok();
        }
        (false, Some(file)) => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber).ok();
        }
        (false, None) => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber).ok();
        }
    }

    if let (Some(path), Some(error)) = (&config.file, file_error) {
        tracing::warn!(
            path = %path.display(),
            %error,
            "Failed to open log file; logging to stderr"
        );
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

/// Initialize logging with defaults (useful for tests and quick scripts).
pub fn init_default_logging() {
    init_logging(&LoggingConfig::default());
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_open_log_file_appends() {
        let dir = std::env::temp_dir().join(format!("maplapse-log-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("maplapse.log");
        std::fs::write(&path, "first\n").unwrap();

        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "second").unwrap();
        drop(file);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unopenable_log_file_falls_back_to_stderr_with_warning() {
        let path = std::env::temp_dir()
            .join(format!("maplapse-missing-{}", std::process::id()))
            .join("nested")
            .join("maplapse.log");
        assert!(open_log_file(&path).is_err());

        let config = LoggingConfig {
            file: Some(path),
            ..LoggingConfig::default()
        };
        // Installs a stderr subscriber and reports the failure through it.
        init_logging(&config);
        tracing::info!("still logging");
    }
}
