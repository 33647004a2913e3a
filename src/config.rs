// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the plan definition file that Stepwise reads, and
//! the run configuration handed to every component of a run. File I/O for
//! the plan definition is left to the caller to figure out.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Plan definition layout.
///
/// A __plan definition__ lists everything a workstation should end up with,
/// as an ordered sequence of step entries. Package lists, URLs, and profile
/// snippets all live here rather than in code.
///
/// # General Layout
///
/// A plan definition is composed of two basic parts: settings and steps. The
/// settings section configures how the plan interacts with the host, e.g.,
/// which package manager to use. The steps section lists each step in the
/// exact order it must run. Steps are never reordered.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PlanDefinition {
    /// Settings for the plan.
    #[serde(default)]
    pub settings: PlanSettings,

    /// Ordered listing of steps.
    #[serde(rename = "step", default)]
    pub steps: Vec<StepDefinition>,
}

impl FromStr for PlanDefinition {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for PlanDefinition {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Plan configuration settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlanSettings {
    /// Package manager of the host.
    pub package_manager: PackageManagerKind,

    /// Prefix privileged commands with sudo.
    pub sudo: bool,

    /// Distribution identifiers the plan was written for.
    ///
    /// Matched against `ID` and `ID_LIKE` of os-release. Empty means any.
    pub supported_hosts: Vec<String>,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            package_manager: PackageManagerKind::default(),
            sudo: true,
            supported_hosts: Vec::new(),
        }
    }
}

/// Supported package manager backends.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageManagerKind {
    #[default]
    Apt,
    Dnf,
}

/// One step entry of a plan definition.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct StepDefinition {
    /// Unique identifier of the step.
    pub id: String,

    /// Brief description of what the step does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Question to ask operator before running the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Answer used when the operator just hits enter.
    #[serde(default = "default_answer")]
    pub default: bool,

    /// Abort the whole run if the step fails.
    #[serde(default)]
    pub critical: bool,

    /// Operator action to report once the run ends if the step applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,

    /// What the step does.
    #[serde(flatten)]
    pub kind: StepKind,
}

fn default_answer() -> bool {
    true
}

/// Kinds of step a plan definition can declare.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepKind {
    /// Upgrade installed packages.
    ///
    /// Pending upgrades are judged from cached package lists unless
    /// `refresh` is set, which refreshes and upgrades on every run.
    SystemUpdate {
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        refresh: bool,
    },

    /// Install packages that are not installed yet.
    Packages { packages: Vec<String> },

    /// Append a marked block to profile files.
    ProfileBlock {
        files: Vec<String>,
        marker: String,
        content: String,
    },

    /// Clone a repository into a path.
    Clone { url: String, path: String },

    /// Copy files matching a glob into place.
    Copy { source: String, destination: String },

    /// Make a shell the operator's login shell.
    DefaultShell { shell: String },

    /// Run a command unless a check command succeeds.
    Command {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        check: Option<Vec<String>>,
        run: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        overwrites: Vec<String>,
    },
}

/// Run configuration.
///
/// Everything a single run needs to know about where it keeps its state.
/// Passed explicitly to the run log, backup manager, and executor so
/// separate runs never share anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Name of the process, part of the log file name.
    pub process_name: String,

    /// When the run started.
    pub started_at: DateTime<Local>,

    /// Directory holding one log file per run.
    pub log_dir: PathBuf,

    /// Directory holding one backup directory per run.
    pub backup_dir: PathBuf,

    /// Only probe, never prompt or apply.
    pub dry_run: bool,

    /// Colorize console output.
    pub color: bool,
}

impl RunConfig {
    /// Construct new run configuration rooted at state directory.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            process_name: env!("CARGO_PKG_NAME").into(),
            started_at: Local::now(),
            log_dir: state_dir.as_ref().join("logs"),
            backup_dir: state_dir.as_ref().join("backups"),
            dry_run: false,
            color: true,
        }
    }

    /// Set process name.
    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }

    /// Enable or disable dry run.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable or disable colored console output.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Timestamp identifying this run.
    pub fn run_stamp(&self) -> String {
        self.started_at.format("%Y%m%d-%H%M%S").to_string()
    }

    /// Path to persisted log file of this run.
    pub fn log_path(&self) -> PathBuf {
        self.log_dir
            .join(format!("{}-{}.log", self.process_name, self.run_stamp()))
    }

    /// Path to backup directory of this run.
    pub fn backup_root(&self) -> PathBuf {
        self.backup_dir.join(self.run_stamp())
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}
