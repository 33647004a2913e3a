// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package manager integration.
//!
//! Presence checks only ever consult the local package database. They never
//! touch the network, and never install anything as a side effect. Installs
//! are batched, so one step makes one install call no matter how many
//! packages are missing.

use crate::{
    config::PackageManagerKind,
    step::{ApplyError, ProbeState, ProvisioningStep, StepCategory},
    system::command::{syscall_interactive, syscall_non_interactive, CommandError, CommandLine},
};

use std::sync::Arc;
use tracing::{debug, instrument};

/// Query and drive a package manager.
pub trait PackageManager: Send + Sync {
    /// Check if package is installed.
    ///
    /// # Errors
    ///
    /// - Return [`PackageError`] if package database cannot be queried.
    fn is_installed(&self, name: &str) -> Result<bool>;

    /// Install listing of packages in one batch.
    ///
    /// # Errors
    ///
    /// - Return [`PackageError`] if installation fails.
    fn install(&self, names: &[String]) -> Result<()>;

    /// Count installed packages with a pending upgrade.
    ///
    /// Only cached package lists are consulted, so stale lists can report
    /// zero while newer packages exist upstream.
    ///
    /// # Errors
    ///
    /// - Return [`PackageError`] if package database cannot be queried.
    fn pending_upgrades(&self) -> Result<usize>;

    /// Refresh package database, and upgrade installed packages.
    ///
    /// # Errors
    ///
    /// - Return [`PackageError`] if upgrade fails.
    fn upgrade(&self) -> Result<()>;
}

/// Construct package manager adapter for configured backend.
pub fn package_manager(kind: PackageManagerKind, sudo: bool) -> Arc<dyn PackageManager> {
    match kind {
        PackageManagerKind::Apt => Arc::new(Apt::new(sudo)),
        PackageManagerKind::Dnf => Arc::new(Dnf::new(sudo)),
    }
}

/// Debian family package manager.
#[derive(Debug, Clone)]
pub struct Apt {
    sudo: bool,
}

impl Apt {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    fn apt_get(&self) -> CommandLine {
        CommandLine::privileged("apt-get", self.sudo)
    }
}

impl PackageManager for Apt {
    fn is_installed(&self, name: &str) -> Result<bool> {
        let query = CommandLine::new("dpkg-query").args(["-W", "-f=${Status}", name]);
        let output = syscall_non_interactive(&query)?;

        // INVARIANT: dpkg-query exits 1 for packages it has never heard of.
        match output.status.code() {
            Some(0) => Ok(output.stdout.trim_end().ends_with(" installed")),
            Some(1) => Ok(false),
            _ => Err(PackageError::Query {
                query: query.to_string(),
                diagnostic: output.diagnostic(),
            }),
        }
    }

    fn install(&self, names: &[String]) -> Result<()> {
        let line = self.apt_get().args(["install", "-y"]).args(names);
        Ok(syscall_interactive(&line)?)
    }

    fn pending_upgrades(&self) -> Result<usize> {
        let query = CommandLine::new("apt-get").args(["--simulate", "upgrade"]);
        let output = syscall_non_interactive(&query)?;
        if !output.status.success() {
            return Err(PackageError::Query {
                query: query.to_string(),
                diagnostic: output.diagnostic(),
            });
        }

        Ok(output
            .stdout
            .lines()
            .filter(|line| line.starts_with("Inst "))
            .count())
    }

    fn upgrade(&self) -> Result<()> {
        syscall_interactive(&self.apt_get().arg("update"))?;
        syscall_interactive(&self.apt_get().args(["upgrade", "-y"]))?;
        Ok(())
    }
}

/// Fedora family package manager.
#[derive(Debug, Clone)]
pub struct Dnf {
    sudo: bool,
}

impl Dnf {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }
}

impl PackageManager for Dnf {
    fn is_installed(&self, name: &str) -> Result<bool> {
        let query = CommandLine::new("rpm").args(["-q", name]);
        let output = syscall_non_interactive(&query)?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(PackageError::Query {
                query: query.to_string(),
                diagnostic: output.diagnostic(),
            }),
        }
    }

    fn install(&self, names: &[String]) -> Result<()> {
        let line = CommandLine::privileged("dnf", self.sudo)
            .args(["install", "-y"])
            .args(names);
        Ok(syscall_interactive(&line)?)
    }

    fn pending_upgrades(&self) -> Result<usize> {
        let query = CommandLine::new("dnf").args(["--cacheonly", "--quiet", "check-update"]);
        let output = syscall_non_interactive(&query)?;

        // INVARIANT: dnf check-update exits 100 when updates are available.
        match output.status.code() {
            Some(0) => Ok(0),
            Some(100) => Ok(output
                .stdout
                .lines()
                .filter(|line| !line.trim().is_empty())
                .count()
                .max(1)),
            _ => Err(PackageError::Query {
                query: query.to_string(),
                diagnostic: output.diagnostic(),
            }),
        }
    }

    fn upgrade(&self) -> Result<()> {
        let line = CommandLine::privileged("dnf", self.sudo).args(["upgrade", "--refresh", "-y"]);
        Ok(syscall_interactive(&line)?)
    }
}

/// Probe which of the given packages are missing.
///
/// # Errors
///
/// - Return [`PackageError`] on the first package that cannot be queried.
pub fn missing_packages(manager: &dyn PackageManager, names: &[String]) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for name in names {
        if !manager.is_installed(name)? {
            missing.push(name.clone());
        }
    }

    Ok(missing)
}

/// Step that installs whatever packages are not installed yet.
///
/// The apply re-checks presence so only the missing subset is installed.
pub fn install_packages(
    id: impl Into<String>,
    manager: Arc<dyn PackageManager>,
    names: impl IntoIterator<Item = impl Into<String>>,
) -> ProvisioningStep {
    let names = names.into_iter().map(Into::into).collect::<Vec<String>>();
    let description = format!("install packages {}", names.join(", "));

    let probe_manager = Arc::clone(&manager);
    let probe_names = names.clone();
    let probe = move || match missing_packages(probe_manager.as_ref(), &probe_names) {
        Ok(missing) if missing.is_empty() => ProbeState::Present,
        Ok(_) => ProbeState::Absent,
        Err(err) => ProbeState::Unknown(err.to_string()),
    };

    let apply = move || -> Result<(), ApplyError> {
        let missing = missing_packages(manager.as_ref(), &names)?;
        install_batch(manager.as_ref(), &missing)
    };

    ProvisioningStep::new(id, probe, apply)
        .description(description)
        .category(StepCategory::PackageInstall)
}

#[instrument(skip(manager), level = "debug")]
fn install_batch(manager: &dyn PackageManager, missing: &[String]) -> Result<(), ApplyError> {
    if missing.is_empty() {
        return Ok(());
    }

    debug!("installing {} missing packages", missing.len());
    Ok(manager.install(missing)?)
}

/// Step that upgrades the system when upgrades are pending.
///
/// Pending upgrades are judged from cached package lists. With `refresh`
/// set, the step skips that judgement and always refreshes the lists and
/// upgrades, since a read-only check cannot refresh them first.
pub fn system_update(
    id: impl Into<String>,
    manager: Arc<dyn PackageManager>,
    refresh: bool,
) -> ProvisioningStep {
    let probe_manager = Arc::clone(&manager);
    let probe = move || {
        if refresh {
            return ProbeState::Absent;
        }

        match probe_manager.pending_upgrades() {
            Ok(0) => ProbeState::Present,
            Ok(_) => ProbeState::Absent,
            Err(err) => ProbeState::Unknown(err.to_string()),
        }
    };
    let apply = move || -> Result<(), ApplyError> { Ok(manager.upgrade()?) };

    let description = if refresh {
        "refresh package lists and upgrade installed packages"
    } else {
        "upgrade installed packages with upgrades pending in cached package lists"
    };
    ProvisioningStep::new(id, probe, apply)
        .description(description)
        .category(StepCategory::PackageInstall)
}

/// Package manager error types.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Package database query failed.
    #[error("package query {query:?} failed: {diagnostic}")]
    Query { query: String, diagnostic: String },

    /// Package manager command failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Anything else a package manager adapter wants to report.
    #[error("{0}")]
    Other(String),
}

impl From<PackageError> for ApplyError {
    fn from(error: PackageError) -> Self {
        match error {
            PackageError::Command(error) => error.into(),
            other => ApplyError::Other(other.to_string()),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = PackageError> = std::result::Result<T, E>;
