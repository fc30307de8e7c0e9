//! Logging configuration
//!
//! Describes where and how verbosely the host writes its logs. The core only
//! emits `tracing` events; subscribers are installed by the host binary.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;

/// Prefix of every log file written by the host
pub const LOG_FILE_PREFIX: &str = "beatflow_";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level: "trace", "debug", "info", "warn", "error" or "off"
    pub level: String,
    /// Directory holding log files
    pub log_path: PathBuf,
    /// Number of log files kept before the oldest are removed
    pub max_files: usize,
    /// Write to stderr
    pub console_output: bool,
    /// Write to a timestamped file in `log_path`
    pub file_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_path: PathBuf::from("logs"),
            max_files: 10,
            console_output: true,
            file_output: false,
        }
    }
}

impl LogConfig {
    /// Parse `level`, falling back to INFO for unknown values
    pub fn parse_level(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "info" => LevelFilter::INFO,
            "warn" | "warning" => LevelFilter::WARN,
            "error" => LevelFilter::ERROR,
            "off" => LevelFilter::OFF,
            _ => LevelFilter::INFO,
        }
    }

    /// Create the log directory when file output is enabled
    pub fn ensure_log_directory(&self) -> io::Result<()> {
        if self.file_output {
            fs::create_dir_all(&self.log_path)?;
        }
        Ok(())
    }

    /// Path of the log file for a session starting now
    pub fn current_log_path(&self) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.log_path
            .join(format!("{}{}.log", LOG_FILE_PREFIX, timestamp))
    }

    /// Remove the oldest log files so that at most `max_files - 1` remain,
    /// leaving room for the file about to be created.
    ///
    /// Returns the number of files removed.
    pub fn cleanup_old_logs(&self) -> io::Result<usize> {
        if !self.log_path.is_dir() {
            return Ok(0);
        }

        let mut logs = list_log_files(&self.log_path)?;
        let keep = self.max_files.saturating_sub(1);
        if logs.len() <= keep {
            return Ok(0);
        }

        // Timestamped names sort chronologically
        logs.sort();
        let excess = logs.len() - keep;
        for path in &logs[..excess] {
            fs::remove_file(path)?;
        }
        Ok(excess)
    }
}

fn list_log_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log"));
        if is_log && path.is_file() {
            logs.push(path);
        }
    }
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_level() {
        let mut config = LogConfig::default();
        assert_eq!(config.parse_level(), LevelFilter::INFO);

        config.level = "DEBUG".to_string();
        assert_eq!(config.parse_level(), LevelFilter::DEBUG);

        config.level = "warning".to_string();
        assert_eq!(config.parse_level(), LevelFilter::WARN);

        config.level = "loud".to_string();
        assert_eq!(config.parse_level(), LevelFilter::INFO);
    }

    #[test]
    fn test_ensure_log_directory() {
        let temp = TempDir::new().unwrap();
        let config = LogConfig {
            log_path: temp.path().join("nested").join("logs"),
            file_output: true,
            ..Default::default()
        };
        config.ensure_log_directory().unwrap();
        assert!(config.log_path.is_dir());
    }

    #[test]
    fn test_current_log_path_is_inside_directory() {
        let config = LogConfig::default();
        let path = config.current_log_path();
        assert!(path.starts_with("logs"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(LOG_FILE_PREFIX));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_cleanup_old_logs_keeps_newest() {
        let temp = TempDir::new().unwrap();
        for day in 1..=5 {
            let name = format!("{}2026-01-0{}_12-00-00.log", LOG_FILE_PREFIX, day);
            fs::write(temp.path().join(name), "x").unwrap();
        }
        fs::write(temp.path().join("notes.txt"), "keep me").unwrap();

        let config = LogConfig {
            log_path: temp.path().to_path_buf(),
            max_files: 3,
            ..Default::default()
        };
        assert_eq!(config.cleanup_old_logs().unwrap(), 3);

        let remaining = list_log_files(temp.path()).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(temp
            .path()
            .join(format!("{}2026-01-05_12-00-00.log", LOG_FILE_PREFIX))
            .exists());
        assert!(temp.path().join("notes.txt").exists());
    }

    #[test]
    fn test_cleanup_missing_directory_is_noop() {
        let config = LogConfig {
            log_path: PathBuf::from("definitely/not/here"),
            ..Default::default()
        };
        assert_eq!(config.cleanup_old_logs().unwrap(), 0);
    }

    #[test]
    fn test_serde_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{ "level": "trace" }"#).unwrap();
        assert_eq!(config.level, "trace");
        assert_eq!(config.max_files, 10);
        assert!(config.console_output);
    }
}
