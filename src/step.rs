// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning step model.
//!
//! A __provisioning step__ is one named, independently skippable unit of
//! work. Every step pairs a __probe__, a read-only check of whether its
//! resources already match the desired state, with an __apply__, the mutating
//! action that brings those resources into the desired state.
//!
//! Steps are declared up front, collected into a [`Plan`](crate::plan::Plan),
//! and evaluated exactly once per run by the
//! [`Executor`](crate::executor::Executor).

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    process::ExitStatus,
};

/// Observed state of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    /// Resource already matches desired state.
    Present,

    /// Resource does not match desired state.
    Absent,

    /// Query mechanism failed, so the state cannot be determined.
    Unknown(String),
}

impl ProbeState {
    /// Fold many probe results into one.
    ///
    /// Any unknown resource makes the whole set unknown. Otherwise the set is
    /// only present when every member is present.
    pub fn all(states: impl IntoIterator<Item = ProbeState>) -> Self {
        let mut folded = ProbeState::Present;
        for state in states {
            match state {
                ProbeState::Unknown(reason) => return ProbeState::Unknown(reason),
                ProbeState::Absent => folded = ProbeState::Absent,
                ProbeState::Present => {}
            }
        }

        folded
    }
}

/// Read-only check of a step's resources.
///
/// Implementations must not mutate anything, and must report
/// [`ProbeState::Unknown`] rather than [`ProbeState::Absent`] when they
/// cannot tell.
pub trait Probe: Send + Sync {
    /// Determine current state of resources.
    fn probe(&self) -> ProbeState;
}

impl<F> Probe for F
where
    F: Fn() -> ProbeState + Send + Sync,
{
    fn probe(&self) -> ProbeState {
        self()
    }
}

/// Mutating action of a step.
pub trait Apply: Send + Sync {
    /// Bring resources into desired state.
    ///
    /// # Errors
    ///
    /// - Return [`ApplyError`] describing the failure of the underlying tool.
    fn apply(&self) -> Result<(), ApplyError>;

    /// Existing paths that [`Apply::apply`] is about to overwrite.
    ///
    /// Evaluated right before the apply runs so implementations can limit
    /// the listing to what actually changes.
    fn targets(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

impl<F> Apply for F
where
    F: Fn() -> Result<(), ApplyError> + Send + Sync,
{
    fn apply(&self) -> Result<(), ApplyError> {
        self()
    }
}

/// Kind of work a step performs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StepCategory {
    /// Install or upgrade OS packages.
    PackageInstall,

    /// Create or change files on disk.
    #[default]
    FileMutation,

    /// Change system or account configuration.
    ServiceConfig,

    /// Run arbitrary commands.
    Command,
}

impl Display for StepCategory {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::PackageInstall => "package-install",
            Self::FileMutation => "file-mutation",
            Self::ServiceConfig => "service-config",
            Self::Command => "command",
        })
    }
}

/// What happens to the run when a step fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Failure aborts the remaining steps.
    Critical,

    /// Failure is recorded and the run continues.
    #[default]
    Optional,
}

/// Yes/no question asked before a step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub message: String,
    pub default: bool,
}

/// A named unit of provisioning work.
pub struct ProvisioningStep {
    pub(crate) id: String,
    pub(crate) description: String,
    pub(crate) prompt: Option<Prompt>,
    pub(crate) category: StepCategory,
    pub(crate) criticality: Criticality,
    pub(crate) overwrites: Vec<PathBuf>,
    pub(crate) notice: Option<String>,
    pub(crate) probe: Box<dyn Probe>,
    pub(crate) apply: Box<dyn Apply>,
}

impl ProvisioningStep {
    /// Construct new step with optional criticality and no prompt.
    pub fn new(
        id: impl Into<String>,
        probe: impl Probe + 'static,
        apply: impl Apply + 'static,
    ) -> Self {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            prompt: None,
            category: StepCategory::default(),
            criticality: Criticality::default(),
            overwrites: Vec::new(),
            notice: None,
            probe: Box::new(probe),
            apply: Box::new(apply),
        }
    }

    /// Set human-readable description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Ask operator before running the step.
    pub fn prompt(mut self, message: impl Into<String>, default: bool) -> Self {
        self.prompt = Some(Prompt {
            message: message.into(),
            default,
        });
        self
    }

    /// Set category of work.
    pub fn category(mut self, category: StepCategory) -> Self {
        self.category = category;
        self
    }

    /// Mark step as critical, aborting the run on failure.
    pub fn critical(mut self) -> Self {
        self.criticality = Criticality::Critical;
        self
    }

    /// Set criticality.
    pub fn criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    /// Declare a path the apply overwrites, so it gets backed up first.
    pub fn overwrites(mut self, path: impl Into<PathBuf>) -> Self {
        self.overwrites.push(path.into());
        self
    }

    /// Operator action to report at the end of the run if the step applies.
    pub fn notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn summary(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> StepCategory {
        self.category
    }

    pub fn is_critical(&self) -> bool {
        self.criticality == Criticality::Critical
    }

    /// Probe step resources.
    pub fn probe_state(&self) -> ProbeState {
        self.probe.probe()
    }

    /// All paths to back up before applying.
    pub(crate) fn backup_targets(&self) -> Vec<PathBuf> {
        let mut targets = self.overwrites.clone();
        for path in self.apply.targets() {
            if !targets.contains(&path) {
                targets.push(path);
            }
        }

        targets
    }
}

impl std::fmt::Debug for ProvisioningStep {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("ProvisioningStep")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("prompt", &self.prompt)
            .field("category", &self.category)
            .field("criticality", &self.criticality)
            .field("overwrites", &self.overwrites)
            .field("notice", &self.notice)
            .finish_non_exhaustive()
    }
}

/// Failure of an apply.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// External tool exited unsuccessfully.
    #[error("{program} failed with {}: {diagnostic}", status_label(.status))]
    Tool {
        program: String,
        status: Option<i32>,
        diagnostic: String,
    },

    /// Filesystem operation failed.
    #[error("failed to modify {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Repository clone failed.
    #[error(transparent)]
    Clone(#[from] crate::system::repo::RepoError),

    /// Anything else an apply wants to report verbatim.
    #[error("{0}")]
    Other(String),
}

impl ApplyError {
    /// Construct tool failure from exit status and captured output.
    pub fn tool(program: impl Into<String>, status: ExitStatus, diagnostic: impl Into<String>) -> Self {
        Self::Tool {
            program: program.into(),
            status: status.code(),
            diagnostic: diagnostic.into(),
        }
    }
}

fn status_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "termination by signal".into(),
    }
}
