// src/logging.rs

use crate::types::{LogRotation, LoggingConfig};
use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Console logging, plus a rolling log file when `logging.file` is set.
/// `RUST_LOG` overrides the configured level.
pub fn init(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("signal_retimer={},ort=warn", logging.level))
    });

    match &logging.file {
        Some(path) => {
            let appender = file_appender(path, logging.rotation, logging.max_files)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(appender))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

/// `logs/retimer.log` rolls into `logs/retimer.<date>.log`.
pub fn file_appender(
    path: &str,
    rotation: LogRotation,
    max_files: usize,
) -> Result<RollingFileAppender> {
    let path = Path::new(path);
    let prefix = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        })
        .filename_prefix(prefix)
        .max_log_files(max_files);
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        builder = builder.filename_suffix(ext);
    }

    builder
        .build(dir)
        .with_context(|| format!("Cannot open log file in {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_unrotated_file_keeps_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retimer.log");
        let mut appender =
            file_appender(path.to_str().unwrap(), LogRotation::Never, 5).unwrap();
        writeln!(appender, "cycle complete").unwrap();
        appender.flush().unwrap();

        assert_eq!(files_in(dir.path()), vec!["retimer.log".to_string()]);
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("cycle complete"));
    }

    #[test]
    fn test_daily_file_is_date_stamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retimer.log");
        let mut appender =
            file_appender(path.to_str().unwrap(), LogRotation::Daily, 5).unwrap();
        writeln!(appender, "poll").unwrap();
        appender.flush().unwrap();

        let names = files_in(dir.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("retimer."));
        assert!(names[0].ends_with(".log"));
        assert_ne!(names[0], "retimer.log");
    }

    #[test]
    fn test_path_without_file_name_is_error() {
        assert!(file_appender("/", LogRotation::Daily, 5).is_err());
    }
}
