// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Login shell configuration.

use crate::{
    step::{ApplyError, ProbeState, ProvisioningStep, StepCategory},
    system::command::{syscall_interactive, syscall_non_interactive, CommandLine},
};

use std::path::{Path, PathBuf};

/// Extract login shell of user from a passwd database entry.
///
/// Entries have the form `name:password:uid:gid:gecos:home:shell`.
pub fn parse_login_shell(entry: &str, user: &str) -> Option<PathBuf> {
    entry.lines().find_map(|line| {
        let fields = line.split(':').collect::<Vec<_>>();
        match fields.as_slice() {
            [name, _, _, _, _, _, shell] if *name == user => Some(PathBuf::from(shell.trim())),
            _ => None,
        }
    })
}

/// Current login shell of user.
///
/// Asks the system user database through getent, so directory services
/// like LDAP are honored.
pub fn login_shell(user: &str) -> Result<PathBuf, String> {
    let query = CommandLine::new("getent").args(["passwd", user]);
    let output = syscall_non_interactive(&query).map_err(|err| err.to_string())?;
    if !output.status.success() {
        return Err(format!("{query} failed: {}", output.diagnostic()));
    }

    parse_login_shell(&output.stdout, user)
        .ok_or_else(|| format!("no passwd entry for user {user:?}"))
}

/// Probe whether user's login shell is the given shell.
pub fn probe_login_shell(user: &str, shell: &Path) -> ProbeState {
    match login_shell(user) {
        Ok(current) if current == shell => ProbeState::Present,
        Ok(_) => ProbeState::Absent,
        Err(reason) => ProbeState::Unknown(reason),
    }
}

/// Step that makes shell the login shell of user.
///
/// The shell must exist before this runs, so a plan installs it first.
pub fn default_shell(
    id: impl Into<String>,
    user: impl Into<String>,
    shell: impl Into<PathBuf>,
) -> ProvisioningStep {
    let user = user.into();
    let shell = shell.into();
    let description = format!("make {} the login shell of {user}", shell.display());

    let probe_user = user.clone();
    let probe_shell = shell.clone();
    let probe = move || probe_login_shell(&probe_user, &probe_shell);

    let apply = move || -> Result<(), ApplyError> {
        if !shell.exists() {
            return Err(ApplyError::Other(format!(
                "shell {:?} is not installed",
                shell.display()
            )));
        }

        let line = CommandLine::new("chsh").arg("-s").arg(&shell).arg(&user);
        Ok(syscall_interactive(&line)?)
    };

    ProvisioningStep::new(id, probe, apply)
        .description(description)
        .category(StepCategory::ServiceConfig)
        .notice("Log out and back in for the new login shell to take effect.")
}
