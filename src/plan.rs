// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning plans.
//!
//! A __plan__ is the fixed, ordered list of steps one run evaluates. Plans
//! are either assembled in code through [`PlanBuilder`], or built from a
//! [`PlanDefinition`] read out of a plan file. Either way step identifiers
//! must be unique, and steps keep the order they were declared in.

use crate::{
    config::{PlanDefinition, StepDefinition, StepKind},
    path::{expand, PathError},
    step::{Criticality, ProvisioningStep},
    system::{
        command::{run_command, CommandLine},
        files::{copy_files, resolve, FilesError},
        package::{install_packages, system_update, PackageManager},
        profile::{append_profile_block, ProfileBlock},
        repo::clone_repository,
        shell::default_shell,
    },
};

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, instrument};

/// Ordered listing of provisioning steps.
#[derive(Debug, Default)]
pub struct Plan {
    steps: Vec<ProvisioningStep>,
}

impl Plan {
    /// Start building a plan.
    pub fn builder() -> PlanBuilder {
        PlanBuilder::default()
    }

    /// Build plan out of a plan definition.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::DuplicateId`] if two steps share an identifier.
    /// - Return [`PlanError::Path`] if a path cannot be expanded.
    /// - Return [`PlanError::Files`] if a copy source cannot be resolved.
    /// - Return [`PlanError::EmptyCommand`] if a command has no program.
    #[instrument(skip(definition, context), level = "debug")]
    pub fn from_definition(definition: &PlanDefinition, context: &PlanContext) -> Result<Self> {
        let mut builder = Plan::builder();
        for entry in &definition.steps {
            debug!("build step {:?}", entry.id);
            builder = builder.step(build_step(entry, context)?);
        }

        builder.build()
    }

    /// Iterate through steps in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &ProvisioningStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Assemble a plan step by step.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    steps: Vec<ProvisioningStep>,
}

impl PlanBuilder {
    /// Append step to the end of the plan.
    pub fn step(mut self, step: ProvisioningStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Finish plan.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::DuplicateId`] if two steps share an identifier.
    pub fn build(self) -> Result<Plan> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id()) {
                return Err(PlanError::DuplicateId(step.id().into()));
            }
        }

        Ok(Plan { steps: self.steps })
    }
}

/// Everything a plan definition needs from the host to become a plan.
#[derive(Clone)]
pub struct PlanContext {
    /// Directory holding the plan file, base of copy sources.
    pub plan_dir: PathBuf,

    /// Base of every other relative path.
    pub home: PathBuf,

    /// Account whose login shell gets configured.
    pub user: String,

    /// Package manager backing package steps.
    pub manager: Arc<dyn PackageManager>,
}

fn build_step(entry: &StepDefinition, context: &PlanContext) -> Result<ProvisioningStep> {
    let id = entry.id.as_str();
    let home = &context.home;

    let mut step = match &entry.kind {
        StepKind::SystemUpdate { refresh } => {
            system_update(id, Arc::clone(&context.manager), *refresh)
        }
        StepKind::Packages { packages } => {
            install_packages(id, Arc::clone(&context.manager), packages.iter().cloned())
        }
        StepKind::ProfileBlock {
            files,
            marker,
            content,
        } => {
            let files = expand_all(files, home)?;
            append_profile_block(id, ProfileBlock::new(marker, content), files)
        }
        StepKind::Clone { url, path } => clone_repository(id, url, expand(path, home)?),
        StepKind::Copy {
            source,
            destination,
        } => {
            let pattern = expand(source, &context.plan_dir)?;
            let placements = resolve(&pattern.to_string_lossy(), expand(destination, home)?)
                .map_err(|err| PlanError::Files {
                    source: err,
                    step: id.into(),
                })?;
            copy_files(id, placements)
        }
        StepKind::DefaultShell { shell } => default_shell(id, &context.user, expand(shell, home)?),
        StepKind::Command {
            check,
            run,
            overwrites,
        } => {
            let run = CommandLine::from_argv(run)
                .ok_or_else(|| PlanError::EmptyCommand(id.into()))?;
            let check = match check {
                Some(argv) => Some(
                    CommandLine::from_argv(argv)
                        .ok_or_else(|| PlanError::EmptyCommand(id.into()))?,
                ),
                None => None,
            };
            run_command(id, check, run, expand_all(overwrites, home)?)
        }
    };

    if let Some(description) = &entry.description {
        step = step.description(description);
    }
    if let Some(prompt) = &entry.prompt {
        step = step.prompt(prompt, entry.default);
    }
    if let Some(notice) = &entry.notice {
        step = step.notice(notice);
    }
    if entry.critical {
        step = step.criticality(Criticality::Critical);
    }

    Ok(step)
}

fn expand_all(paths: &[String], base: &Path) -> Result<Vec<PathBuf>> {
    paths
        .iter()
        .map(|path| expand(path, base).map_err(PlanError::from))
        .collect()
}

/// Plan construction error types.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Two steps share an identifier.
    #[error("step identifier {0:?} is used more than once")]
    DuplicateId(String),

    /// Path of a step cannot be expanded.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Copy source of a step cannot be resolved.
    #[error("cannot resolve copy source of step {step:?}")]
    Files {
        #[source]
        source: FilesError,
        step: String,
    },

    /// Command of a step has no program.
    #[error("step {0:?} declares an empty command")]
    EmptyCommand(String),
}

/// Friendly result alias :3
pub type Result<T, E = PlanError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        step::{ProbeState, StepCategory},
        system::package::Result as PackageResult,
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs;

    struct NoPackages;

    impl PackageManager for NoPackages {
        fn is_installed(&self, _name: &str) -> PackageResult<bool> {
            Ok(false)
        }

        fn install(&self, _names: &[String]) -> PackageResult<()> {
            Ok(())
        }

        fn pending_upgrades(&self) -> PackageResult<usize> {
            Ok(0)
        }

        fn upgrade(&self) -> PackageResult<()> {
            Ok(())
        }
    }

    fn context() -> anyhow::Result<PlanContext> {
        let cwd = std::env::current_dir()?;
        Ok(PlanContext {
            plan_dir: cwd.join("plan"),
            home: cwd.join("home"),
            user: "blah".into(),
            manager: Arc::new(NoPackages),
        })
    }

    #[test]
    fn builder_rejects_duplicate_ids() {
        let result = Plan::builder()
            .step(ProvisioningStep::new("zsh", || ProbeState::Present, || Ok(())))
            .step(ProvisioningStep::new("zsh", || ProbeState::Present, || Ok(())))
            .build();
        assert!(matches!(result, Err(PlanError::DuplicateId(id)) if id == "zsh"));
    }

    #[sealed_test]
    fn build_plan_from_definition_in_order() -> anyhow::Result<()> {
        fs::create_dir_all("plan/dotfiles")?;
        fs::write("plan/dotfiles/.gitconfig", "[user]\n")?;

        let definition: PlanDefinition = indoc! {r#"
            [[step]]
            id = "update"
            kind = "system-update"
            critical = true

            [[step]]
            id = "base"
            kind = "packages"
            packages = ["git", "tree"]
            prompt = "Install base packages?"
            default = false

            [[step]]
            id = "rbenv-init"
            kind = "profile-block"
            files = [".zshrc"]
            marker = "rbenv"
            content = 'eval "$(rbenv init - zsh)"'

            [[step]]
            id = "gitconfig"
            kind = "copy"
            source = "dotfiles/.gitconfig"
            destination = ".gitconfig"

            [[step]]
            id = "zsh"
            kind = "default-shell"
            shell = "/usr/bin/zsh"
            notice = "Log out and back in."

            [[step]]
            id = "starship"
            kind = "command"
            check = ["starship", "--version"]
            run = ["sh", "install.sh"]
        "#}
        .parse()?;

        let plan = Plan::from_definition(&definition, &context()?)?;
        let ids = plan.iter().map(ProvisioningStep::id).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec!["update", "base", "rbenv-init", "gitconfig", "zsh", "starship"]
        );

        let steps = plan.iter().collect::<Vec<_>>();
        assert!(steps[0].is_critical());
        assert!(!steps[1].is_critical());
        assert_eq!(
            steps[1].prompt.as_ref().map(|prompt| prompt.default),
            Some(false)
        );
        assert_eq!(steps[1].kind(), StepCategory::PackageInstall);
        assert_eq!(steps[4].notice.as_deref(), Some("Log out and back in."));
        assert_eq!(steps[5].kind(), StepCategory::Command);

        Ok(())
    }

    #[sealed_test]
    fn reject_empty_command() -> anyhow::Result<()> {
        let definition: PlanDefinition = indoc! {r#"
            [[step]]
            id = "nothing"
            kind = "command"
            run = []
        "#}
        .parse()?;

        let result = Plan::from_definition(&definition, &context()?);
        assert!(matches!(result, Err(PlanError::EmptyCommand(id)) if id == "nothing"));
        Ok(())
    }

    #[sealed_test]
    fn reject_copy_source_matching_nothing() -> anyhow::Result<()> {
        let definition: PlanDefinition = indoc! {r#"
            [[step]]
            id = "dotfiles"
            kind = "copy"
            source = "dotfiles/*"
            destination = "."
        "#}
        .parse()?;

        let result = Plan::from_definition(&definition, &context()?);
        assert!(matches!(result, Err(PlanError::Files { step, .. }) if step == "dotfiles"));
        Ok(())
    }
}
