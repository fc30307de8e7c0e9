//! Subscriber installation for the host binary
//!
//! Console output goes to stderr so stdout stays free for reports. File
//! output is written through a non-blocking worker to a fresh timestamped
//! file per session.

use anyhow::{Context, Result};
use beatflow_core::LogConfig;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the file writer flushing until dropped
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` overrides the configured level. The returned guard must be
/// held for as long as file logging should keep working.
pub fn init(config: &LogConfig) -> Result<Option<LogGuard>> {
    let log_file = prepare_log_file(config)?;

    let filter = EnvFilter::builder()
        .with_default_directive(config.parse_level().into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.console_output {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter.clone())
                .boxed(),
        );
    }

    let mut guard = None;
    if let Some(path) = &log_file {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file: {:?}", path))?;
        let (writer, worker_guard) = tracing_appender::non_blocking(file);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter)
                .boxed(),
        );
        guard = Some(LogGuard {
            _guard: worker_guard,
        });
    }

    tracing_subscriber::registry().with(layers).init();

    match &log_file {
        Some(path) => info!("Logging initialized at level {}, writing {:?}", config.level, path),
        None => info!("Logging initialized at level {}", config.level),
    }
    Ok(guard)
}

/// Create the log directory, prune old sessions and pick this session's file
fn prepare_log_file(config: &LogConfig) -> Result<Option<PathBuf>> {
    if !config.file_output {
        return Ok(None);
    }
    config
        .ensure_log_directory()
        .with_context(|| format!("Failed to create log directory: {:?}", config.log_path))?;
    if let Err(e) = config.cleanup_old_logs() {
        eprintln!("Failed to remove old log files: {}", e);
    }
    Ok(Some(config.current_log_path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatflow_core::logging::LOG_FILE_PREFIX;
    use std::fs;
    use tempfile::TempDir;

    fn file_config(dir: &std::path::Path, max_files: usize) -> LogConfig {
        LogConfig {
            log_path: dir.join("logs"),
            max_files,
            console_output: false,
            file_output: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_console_only_needs_no_file() {
        let temp = TempDir::new().unwrap();
        let config = LogConfig {
            file_output: false,
            ..file_config(temp.path(), 3)
        };
        assert!(prepare_log_file(&config).unwrap().is_none());
        assert!(!config.log_path.exists());
    }

    #[test]
    fn test_prepare_log_file_prunes_old_sessions() {
        let temp = TempDir::new().unwrap();
        let config = file_config(temp.path(), 2);
        fs::create_dir_all(&config.log_path).unwrap();
        for stamp in ["2024-01-01_00-00-00", "2024-01-02_00-00-00", "2024-01-03_00-00-00"] {
            let name = format!("{}{}.log", LOG_FILE_PREFIX, stamp);
            fs::write(config.log_path.join(name), "old").unwrap();
        }

        let path = prepare_log_file(&config).unwrap().unwrap();
        assert!(path.starts_with(&config.log_path));
        // Room is left for the file this session is about to create
        assert_eq!(fs::read_dir(&config.log_path).unwrap().count(), 1);
    }
}
