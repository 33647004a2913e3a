// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Run log and final report.
//!
//! Every run keeps an append-only log. Each entry is written to the console
//! first, then appended to the run's log file, synchronously and in the same
//! order. Nothing is buffered, so an interrupted run loses no entries.
//!
//! The run log also accumulates step outcomes, backup records, and operator
//! notices. Finalizing the log hands back a [`RunReport`] exactly once, no
//! matter whether the run completed, aborted, or was interrupted.
//!
//! The log is a cheap cloneable handle. All clones write through one lock,
//! so a signal handler can finalize the run while a step is still blocked.

use crate::{backup::BackupRecord, config::RunConfig};

use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
    Success,
}

impl LogLevel {
    fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Debug => "DEBUG",
            Self::Success => "SUCCESS",
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Info => "•",
            Self::Warn => "⚠",
            Self::Error => "✗",
            Self::Debug => "·",
            Self::Success => "✓",
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.label())
    }
}

/// One timestamped log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    fn console_line(&self, color: bool) -> String {
        let time = self.timestamp.format("%H:%M:%S").to_string();
        if !color {
            return format!("[{time}] {} {}", self.level.symbol(), self.message);
        }

        let symbol = self.level.symbol();
        let symbol = match self.level {
            LogLevel::Info => symbol.blue().to_string(),
            LogLevel::Warn => symbol.yellow().to_string(),
            LogLevel::Error => symbol.red().to_string(),
            LogLevel::Debug => symbol.dimmed().to_string(),
            LogLevel::Success => symbol.green().to_string(),
        };
        let message = match self.level {
            LogLevel::Warn => self.message.yellow().to_string(),
            LogLevel::Error => self.message.red().to_string(),
            LogLevel::Debug => self.message.dimmed().to_string(),
            _ => self.message.clone(),
        };

        format!("{} {symbol} {message}", format!("[{time}]").dimmed())
    }

    fn file_line(&self) -> String {
        format!(
            "{} [{}] {}",
            self.timestamp.to_rfc3339(),
            self.level,
            self.message
        )
    }
}

/// Reason a step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Operator declined the prompt.
    Declined,

    /// Resources were already in desired state.
    Satisfied,

    /// Dry run found work to do, but did not do it.
    DryRun,
}

/// Aggregate step outcome counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub declined: usize,
    pub satisfied: usize,
    pub planned: usize,
    pub applied: usize,
    pub failed: usize,
}

impl Tally {
    /// Count every skipped step regardless of reason.
    pub fn skipped(&self) -> usize {
        self.declined + self.satisfied + self.planned
    }
}

/// How the run ended.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum RunEnd {
    /// Every step was evaluated.
    #[default]
    Completed,

    /// A critical step failed, remaining steps never ran.
    Aborted { step: String },

    /// Process received a termination signal.
    Interrupted,
}

/// Exit status for a fully successful run.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status for a run with a failed critical step.
pub const EXIT_FAILURE: i32 = 1;

/// Exit status when refusing to run as a privileged account.
pub const EXIT_PRIVILEGED: i32 = 2;

/// Exit status when the operator declines to continue on an unsupported host.
pub const EXIT_UNSUPPORTED_HOST: i32 = 3;

/// Exit status for an interrupted run.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub tally: Tally,
    pub end: RunEnd,
    pub log_path: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub backups: Vec<BackupRecord>,
    pub notices: Vec<String>,
}

impl RunReport {
    /// Process exit status matching how the run ended.
    pub fn exit_code(&self) -> i32 {
        match self.end {
            RunEnd::Completed => EXIT_SUCCESS,
            RunEnd::Aborted { .. } => EXIT_FAILURE,
            RunEnd::Interrupted => EXIT_INTERRUPTED,
        }
    }
}

impl Display for RunReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let elapsed = self.finished_at - self.started_at;
        writeln!(fmt, "Run summary ({}s)", elapsed.num_seconds())?;
        match &self.end {
            RunEnd::Completed => writeln!(fmt, "  result:            completed")?,
            RunEnd::Aborted { step } => {
                writeln!(fmt, "  result:            aborted at critical step {step:?}")?
            }
            RunEnd::Interrupted => writeln!(fmt, "  result:            interrupted")?,
        }
        writeln!(fmt, "  applied:           {}", self.tally.applied)?;
        writeln!(fmt, "  already satisfied: {}", self.tally.satisfied)?;
        writeln!(fmt, "  declined:          {}", self.tally.declined)?;
        if self.tally.planned > 0 {
            writeln!(fmt, "  would apply:       {}", self.tally.planned)?;
        }
        writeln!(fmt, "  failed:            {}", self.tally.failed)?;
        writeln!(fmt, "  log file:          {}", self.log_path.display())?;

        if let Some(dir) = &self.backup_dir {
            writeln!(fmt, "  backups:           {}", dir.display())?;
            for record in &self.backups {
                writeln!(
                    fmt,
                    "    {} -> {}",
                    record.original.display(),
                    record.backup.display()
                )?;
            }
        }

        if !self.notices.is_empty() {
            writeln!(fmt, "Next steps:")?;
            for notice in &self.notices {
                writeln!(fmt, "  - {notice}")?;
            }
        }

        Ok(())
    }
}

struct RunLogState {
    console: Box<dyn Write + Send>,
    file: File,
    color: bool,
    log_path: PathBuf,
    started_at: DateTime<Local>,
    entries: Vec<LogEntry>,
    tally: Tally,
    end: RunEnd,
    backup_dir: Option<PathBuf>,
    backups: Vec<BackupRecord>,
    notices: Vec<String>,
    finalized: bool,
}

/// Append-only log of one run.
#[derive(Clone)]
pub struct RunLog {
    state: Arc<Mutex<RunLogState>>,
}

impl RunLog {
    /// Open run log writing to standard output.
    ///
    /// # Errors
    ///
    /// - Return [`ReportError::OpenLog`] if log file cannot be created.
    pub fn open(config: &RunConfig) -> Result<Self> {
        Self::with_console(config, std::io::stdout())
    }

    /// Open run log writing to a custom console sink.
    ///
    /// Creates the log directory if needed, and creates a fresh log file for
    /// this run.
    ///
    /// # Errors
    ///
    /// - Return [`ReportError::OpenLog`] if log file cannot be created.
    pub fn with_console(config: &RunConfig, console: impl Write + Send + 'static) -> Result<Self> {
        let log_path = config.log_path();
        let open_err = |err| ReportError::OpenLog {
            source: err,
            path: log_path.clone(),
        };
        mkdirp::mkdirp(&config.log_dir).map_err(open_err)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(open_err)?;

        let state = RunLogState {
            console: Box::new(console),
            file,
            color: config.color,
            log_path: log_path.clone(),
            started_at: config.started_at,
            entries: Vec::new(),
            tally: Tally::default(),
            end: RunEnd::default(),
            backup_dir: None,
            backups: Vec::new(),
            notices: Vec::new(),
            finalized: false,
        };

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RunLogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append entry to console and log file.
    ///
    /// Console output comes first. Write failures are reported through
    /// tracing rather than aborting the run.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        };

        let mut state = self.lock();
        let line = entry.console_line(state.color);
        if let Err(err) = writeln!(state.console, "{line}").and_then(|_| state.console.flush()) {
            tracing::warn!("failed to write log entry to console: {err}");
        }
        let line = entry.file_line();
        if let Err(err) = writeln!(state.file, "{line}") {
            tracing::warn!("failed to append log entry to {:?}: {err}", state.log_path.display());
        }
        state.entries.push(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    /// Count a skipped step.
    pub fn record_skip(&self, reason: SkipReason) {
        let mut state = self.lock();
        match reason {
            SkipReason::Declined => state.tally.declined += 1,
            SkipReason::Satisfied => state.tally.satisfied += 1,
            SkipReason::DryRun => state.tally.planned += 1,
        }
    }

    /// Count an applied step, keeping its operator notice if any.
    pub fn record_applied(&self, notice: Option<&str>) {
        let mut state = self.lock();
        state.tally.applied += 1;
        if let Some(notice) = notice {
            if !state.notices.iter().any(|known| known == notice) {
                state.notices.push(notice.to_owned());
            }
        }
    }

    /// Count a failed step.
    pub fn record_failed(&self) {
        self.lock().tally.failed += 1;
    }

    /// Keep record of a backup.
    pub fn record_backup(&self, record: BackupRecord, backup_dir: impl Into<PathBuf>) {
        let mut state = self.lock();
        state.backup_dir.get_or_insert_with(|| backup_dir.into());
        state.backups.push(record);
    }

    /// Mark how the run ended.
    ///
    /// An interruption is never downgraded by a later call.
    pub fn mark_end(&self, end: RunEnd) {
        let mut state = self.lock();
        if state.end != RunEnd::Interrupted {
            state.end = end;
        }
    }

    /// Check if run has been interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.lock().end == RunEnd::Interrupted
    }

    /// Add an operator notice to the report.
    pub fn add_notice(&self, notice: impl Into<String>) {
        self.lock().notices.push(notice.into());
    }

    /// Copy of every entry so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.clone()
    }

    /// Current outcome counts.
    pub fn tally(&self) -> Tally {
        self.lock().tally
    }

    /// Path to persisted log file.
    pub fn log_path(&self) -> PathBuf {
        self.lock().log_path.clone()
    }

    /// Finalize run, and produce its report.
    ///
    /// Only the first call produces a report, every later call returns
    /// `None`.
    pub fn finalize(&self) -> Option<RunReport> {
        let mut state = self.lock();
        if state.finalized {
            return None;
        }
        state.finalized = true;
        let _ = state.file.sync_all();

        Some(RunReport {
            started_at: state.started_at,
            finished_at: Local::now(),
            tally: state.tally,
            end: state.end.clone(),
            log_path: state.log_path.clone(),
            backup_dir: state.backup_dir.clone(),
            backups: state.backups.clone(),
            notices: state.notices.clone(),
        })
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let state = self.lock();
        fmt.debug_struct("RunLog")
            .field("log_path", &state.log_path)
            .field("tally", &state.tally)
            .field("finalized", &state.finalized)
            .finish_non_exhaustive()
    }
}

/// Run log error types.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Log file cannot be created.
    #[error("failed to open log file {:?}", path.display())]
    OpenLog {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ReportError> = std::result::Result<T, E>;
