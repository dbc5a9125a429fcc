//! Diagnostics for the training and scoring executables.
//!
//! Stdout belongs to progress lines and scores, so tracing output goes to
//! stderr plus one log file per run under the application directory. File
//! names embed the start time, which makes name order equal to age order when
//! pruning.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs;

/// Run logs kept after pruning, including the current one.
const MAX_LOG_FILES: usize = 10;
const LOG_FILE_PREFIX: &str = "batclass";
const DEFAULT_FILTER: &str = "info";

/// Keeps the non-blocking writer flushing until process exit.
struct LogSession {
    path: PathBuf,
    _guard: WorkerGuard,
}

static SESSION: OnceLock<LogSession> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    Dir(#[from] app_dirs::AppDirError),
    #[error("Failed to list log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to remove old log file {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to format log file time: {0}")]
    FormatTime(#[from] time::error::Format),
    #[error("Failed to create log file at {path}: {source}")]
    CreateLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install the global subscriber and return this run's log file.
///
/// Calling again returns the same path. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init() -> Result<PathBuf, LoggingError> {
    if let Some(session) = SESSION.get() {
        return Ok(session.path.clone());
    }

    let dir = app_dirs::logs_dir()?;
    let path = dir.join(log_file_name(started_at())?);
    let file = File::create(&path).map_err(|source| LoggingError::CreateLogFile {
        path: path.clone(),
        source,
    })?;
    let (file_writer, guard) = tracing_appender::non_blocking(file);
    prune_logs(&dir, MAX_LOG_FILES)?;

    let timer = local_timer();
    let subscriber = Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(
            fmt::layer()
                .with_timer(timer.clone())
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_timer(timer)
                .with_writer(file_writer),
        );
    tracing::subscriber::set_global_default(subscriber)?;

    let session = SESSION.get_or_init(|| LogSession {
        path: path.clone(),
        _guard: guard,
    });
    tracing::debug!(path = %session.path.display(), "Logging to file");
    Ok(path)
}

/// Delete the oldest `batclass_*.log` files so at most `keep` remain.
fn prune_logs(dir: &Path, keep: usize) -> Result<(), LoggingError> {
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| LoggingError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| is_run_log(path))
        .collect();
    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    for path in logs.into_iter().take(excess) {
        fs::remove_file(&path).map_err(|source| LoggingError::RemoveFile { path, source })?;
    }
    Ok(())
}

fn is_run_log(path: &Path) -> bool {
    path.is_file()
        && path.extension().and_then(|ext| ext.to_str()) == Some("log")
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}_")))
}

fn log_file_name(at: OffsetDateTime) -> Result<String, LoggingError> {
    const NAME_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    Ok(format!("{LOG_FILE_PREFIX}_{}.log", at.format(NAME_FORMAT)?))
}

fn local_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const LINE_FORMAT: &[FormatItem<'static>] =
        format_description!("[hour]:[minute]:[second].[subsecond digits:3]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, LINE_FORMAT.into())
}

fn started_at() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_name_embeds_start_time() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(log_file_name(at).unwrap(), "batclass_2023-11-14_22-13-20.log");
    }

    #[test]
    fn pruning_drops_oldest_run_logs_only() {
        let dir = tempdir().unwrap();
        for second in 0..5 {
            let name = format!("batclass_2024-01-01_00-00-0{second}.log");
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::write(dir.path().join("other.log"), b"").unwrap();
        fs::write(dir.path().join("bat_model.onnx"), b"x").unwrap();

        prune_logs(dir.path(), 3).unwrap();

        assert!(!dir.path().join("batclass_2024-01-01_00-00-00.log").exists());
        assert!(!dir.path().join("batclass_2024-01-01_00-00-01.log").exists());
        assert!(dir.path().join("batclass_2024-01-01_00-00-02.log").exists());
        assert!(dir.path().join("batclass_2024-01-01_00-00-04.log").exists());
        assert!(dir.path().join("other.log").exists());
        assert!(dir.path().join("bat_model.onnx").exists());
    }
}
