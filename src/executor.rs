// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Step execution.
//!
//! The executor evaluates each step of a plan exactly once, in order:
//!
//! 1. Ask the operator if the step carries a prompt.
//! 2. Probe the step's resources.
//! 3. Back up everything the apply is about to overwrite.
//! 4. Apply.
//!
//! A declined prompt or a satisfied probe skips the step. A probe that
//! cannot tell, a failed backup, or a failed apply fails the step. Failed
//! critical steps abort the run, failed optional steps do not. Once the run
//! log is marked interrupted, no further step starts.

use crate::{
    backup::{BackupError, BackupManager},
    config::RunConfig,
    gate::{Confirm, GateError},
    plan::Plan,
    report::{RunEnd, RunLog, SkipReason},
    step::{ApplyError, ProbeState, ProvisioningStep},
};

use std::error::Error as StdError;
use tracing::{debug, instrument};

/// Result of evaluating one step.
#[derive(Debug)]
pub enum StepOutcome {
    /// Step did not apply.
    Skipped(SkipReason),

    /// Step applied successfully.
    Applied,

    /// Step failed.
    Failed(StepError),

    /// Operator interrupted the run while the step was asking.
    Interrupted,
}

/// Evaluate steps against the host.
#[derive(Debug)]
pub struct Executor<C> {
    config: RunConfig,
    gate: C,
    backups: BackupManager,
    log: RunLog,
}

impl<C> Executor<C>
where
    C: Confirm,
{
    /// Construct new executor for one run.
    pub fn new(config: RunConfig, gate: C, log: RunLog) -> Self {
        Self {
            backups: BackupManager::new(config.backup_root()),
            config,
            gate,
            log,
        }
    }

    /// Run log this executor writes to.
    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Evaluate every step of plan in order.
    ///
    /// Stops at the first failed critical step, at the first gate failure,
    /// or as soon as the run log is marked interrupted.
    #[instrument(skip(self, plan), level = "debug")]
    pub fn run(&mut self, plan: &Plan) -> RunEnd {
        if self.config.dry_run {
            self.log
                .info(format!("checking {} steps without applying anything", plan.len()));
        } else {
            self.log.info(format!("running {} steps", plan.len()));
        }

        let mut end = RunEnd::Completed;
        for step in plan.iter() {
            // INVARIANT: No step starts after the run is interrupted.
            if self.log.is_interrupted() {
                debug!("run interrupted before {}", step.id());
                break;
            }

            match self.execute(step) {
                StepOutcome::Failed(error)
                    if step.is_critical() || matches!(error, StepError::Gate(_)) =>
                {
                    self.log
                        .error(format!("aborting run, step {:?} cannot be skipped", step.id()));
                    end = RunEnd::Aborted {
                        step: step.id().into(),
                    };
                    break;
                }
                StepOutcome::Interrupted => break,
                _ => {}
            }
        }

        if self.log.is_interrupted() {
            end = RunEnd::Interrupted;
        }
        self.log.mark_end(end.clone());
        end
    }

    /// Evaluate one step.
    #[instrument(skip(self, step), fields(step = step.id()), level = "debug")]
    pub fn execute(&mut self, step: &ProvisioningStep) -> StepOutcome {
        let id = step.id();

        if let (Some(prompt), false) = (&step.prompt, self.config.dry_run) {
            match self.gate.confirm(&prompt.message, prompt.default) {
                Ok(true) => debug!("operator accepted {id}"),
                Ok(false) => {
                    self.log.info(format!("skip {id}: declined by operator"));
                    self.log.record_skip(SkipReason::Declined);
                    return StepOutcome::Skipped(SkipReason::Declined);
                }
                Err(GateError::Interrupted) => {
                    self.log.warn(format!("interrupted at {id}, remaining steps will not run"));
                    self.log.mark_end(RunEnd::Interrupted);
                    return StepOutcome::Interrupted;
                }
                Err(err) => return self.fail(id, StepError::Gate(err)),
            }
        }

        match step.probe_state() {
            ProbeState::Present => {
                self.log.debug(format!("skip {id}: already satisfied"));
                self.log.record_skip(SkipReason::Satisfied);
                return StepOutcome::Skipped(SkipReason::Satisfied);
            }
            ProbeState::Unknown(reason) => {
                return self.fail(id, StepError::ProbeIndeterminate(reason));
            }
            ProbeState::Absent => {}
        }

        if self.config.dry_run {
            self.log.info(format!("would apply {id}: {}", step.summary()));
            self.log.record_skip(SkipReason::DryRun);
            return StepOutcome::Skipped(SkipReason::DryRun);
        }

        self.log.info(format!("apply {id}: {}", step.summary()));

        // INVARIANT: Nothing is overwritten without a verified backup.
        for target in step.backup_targets() {
            match self.backups.backup(&target) {
                Ok(Some(record)) => {
                    self.log.info(format!(
                        "backed up {} to {}",
                        record.original.display(),
                        record.backup.display()
                    ));
                    self.log.record_backup(record, self.backups.root());
                }
                Ok(None) => debug!("nothing to back up at {:?}", target.display()),
                Err(err) => return self.fail(id, StepError::BackupFailed(err)),
            }
        }

        match step.apply.apply() {
            Ok(()) => {
                self.log.success(format!("{id} applied"));
                self.log.record_applied(step.notice.as_deref());
                StepOutcome::Applied
            }
            Err(err) => self.fail(id, StepError::ApplyFailed(err)),
        }
    }

    fn fail(&self, id: &str, error: StepError) -> StepOutcome {
        self.log
            .error(format!("step {id:?} failed: {}", describe(&error)));
        self.log.record_failed();
        StepOutcome::Failed(error)
    }
}

/// Render error along with every error that caused it.
pub fn describe(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

/// Step failure types.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Probe could not determine resource state.
    #[error("cannot determine current state: {0}")]
    ProbeIndeterminate(String),

    /// Backup of an overwritten resource failed.
    #[error("backup failed")]
    BackupFailed(#[source] BackupError),

    /// Apply failed.
    #[error("apply failed")]
    ApplyFailed(#[source] ApplyError),

    /// Operator answer could not be obtained.
    #[error("no answer from operator")]
    Gate(#[source] GateError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gate::{self, LineGate},
        report::{LogLevel, Tally},
    };
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        fs,
        io::Cursor,
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    type ScriptedGate = LineGate<Cursor<&'static str>, Vec<u8>>;

    fn executor(answers: &'static str, dry_run: bool) -> anyhow::Result<Executor<ScriptedGate>> {
        let config = RunConfig::new("state")
            .with_color(false)
            .with_dry_run(dry_run);
        let log = RunLog::with_console(&config, std::io::sink())?;
        Ok(Executor::new(
            config,
            LineGate::new(Cursor::new(answers), Vec::new()),
            log,
        ))
    }

    fn renamed(step: ProvisioningStep, id: &str) -> ProvisioningStep {
        ProvisioningStep {
            id: id.into(),
            ..step
        }
    }

    struct CtrlC;

    impl Confirm for CtrlC {
        fn confirm(&mut self, _prompt: &str, _default: bool) -> gate::Result<bool> {
            Err(GateError::Interrupted)
        }
    }

    fn counted(probe: ProbeState) -> (ProvisioningStep, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let probes = Arc::new(AtomicUsize::new(0));
        let applies = Arc::new(AtomicUsize::new(0));
        let probe_count = Arc::clone(&probes);
        let apply_count = Arc::clone(&applies);

        let step = ProvisioningStep::new(
            "counted",
            move || {
                probe_count.fetch_add(1, Ordering::SeqCst);
                probe.clone()
            },
            move || {
                apply_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        (step, probes, applies)
    }

    #[sealed_test]
    fn declined_step_never_probes() -> anyhow::Result<()> {
        let mut executor = executor("n\n", false)?;
        let (step, probes, applies) = counted(ProbeState::Absent);
        let step = step.prompt("Install fonts?", true);

        let outcome = executor.execute(&step);
        assert!(matches!(outcome, StepOutcome::Skipped(SkipReason::Declined)));
        assert_eq!(probes.load(Ordering::SeqCst), 0);
        assert_eq!(applies.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[sealed_test]
    fn satisfied_step_never_applies() -> anyhow::Result<()> {
        let mut executor = executor("", false)?;
        let (step, probes, applies) = counted(ProbeState::Present);

        let outcome = executor.execute(&step);
        assert!(matches!(outcome, StepOutcome::Skipped(SkipReason::Satisfied)));
        assert_eq!(probes.load(Ordering::SeqCst), 1);
        assert_eq!(applies.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[sealed_test]
    fn unknown_probe_fails_step() -> anyhow::Result<()> {
        let mut executor = executor("", false)?;
        let (step, _, applies) = counted(ProbeState::Unknown("dpkg database locked".into()));

        let outcome = executor.execute(&step);
        assert!(matches!(
            outcome,
            StepOutcome::Failed(StepError::ProbeIndeterminate(reason)) if reason == "dpkg database locked"
        ));
        assert_eq!(applies.load(Ordering::SeqCst), 0);
        assert_eq!(executor.log().tally().failed, 1);
        Ok(())
    }

    #[sealed_test]
    fn backup_happens_before_apply() -> anyhow::Result<()> {
        fs::write(".zshrc", "X")?;
        let mut executor = executor("", false)?;
        let step = ProvisioningStep::new(
            "zshrc",
            || match fs::read_to_string(".zshrc") {
                Ok(content) if content == "Y" => ProbeState::Present,
                _ => ProbeState::Absent,
            },
            || {
                fs::write(".zshrc", "Y").map_err(|err| ApplyError::Io {
                    source: err,
                    path: ".zshrc".into(),
                })
            },
        )
        .overwrites(".zshrc");

        assert!(matches!(executor.execute(&step), StepOutcome::Applied));
        assert!(matches!(
            executor.execute(&step),
            StepOutcome::Skipped(SkipReason::Satisfied)
        ));

        let report = executor.log().finalize().expect("first finalize");
        assert_eq!(report.backups.len(), 1);
        assert_eq!(fs::read_to_string(&report.backups[0].backup)?, "X");
        assert_eq!(fs::read_to_string(".zshrc")?, "Y");
        Ok(())
    }

    #[sealed_test]
    fn dry_run_changes_nothing() -> anyhow::Result<()> {
        fs::write(".zshrc", "X")?;
        let mut executor = executor("", true)?;
        let (step, probes, applies) = counted(ProbeState::Absent);
        let step = step.prompt("Install fonts?", false).overwrites(".zshrc");

        let outcome = executor.execute(&step);
        assert!(matches!(outcome, StepOutcome::Skipped(SkipReason::DryRun)));
        assert_eq!(probes.load(Ordering::SeqCst), 1);
        assert_eq!(applies.load(Ordering::SeqCst), 0);
        assert!(!Path::new("state/backups").exists());
        Ok(())
    }

    #[sealed_test]
    fn critical_failure_aborts_run() -> anyhow::Result<()> {
        let mut executor = executor("", false)?;
        let (optional, _, _) = counted(ProbeState::Unknown("boom".into()));
        let critical = ProvisioningStep::new(
            "base-packages",
            || ProbeState::Absent,
            || Err(ApplyError::Other("apt-get exited 100".into())),
        )
        .critical();
        let (last, last_probes, _) = counted(ProbeState::Absent);
        let last = ProvisioningStep {
            id: "last".into(),
            ..last
        };

        let plan = Plan::builder()
            .step(optional)
            .step(critical)
            .step(last)
            .build()?;
        let end = executor.run(&plan);

        assert_eq!(
            end,
            RunEnd::Aborted {
                step: "base-packages".into()
            }
        );
        assert_eq!(last_probes.load(Ordering::SeqCst), 0);
        assert_eq!(
            executor.log().tally(),
            Tally {
                failed: 2,
                ..Tally::default()
            }
        );

        let errors = executor
            .log()
            .entries()
            .into_iter()
            .filter(|entry| entry.level == LogLevel::Error)
            .map(|entry| entry.message)
            .collect::<Vec<_>>();
        assert_eq!(
            errors[1],
            "step \"base-packages\" failed: apply failed: apt-get exited 100"
        );
        Ok(())
    }

    #[sealed_test]
    fn closed_gate_aborts_run() -> anyhow::Result<()> {
        let mut executor = executor("", false)?;
        let (step, _, applies) = counted(ProbeState::Absent);
        let plan = Plan::builder()
            .step(step.prompt("Install fonts?", true))
            .build()?;

        let end = executor.run(&plan);
        assert_eq!(
            end,
            RunEnd::Aborted {
                step: "counted".into()
            }
        );
        assert_eq!(applies.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[sealed_test]
    fn interrupted_run_starts_no_further_step() -> anyhow::Result<()> {
        let mut executor = executor("", false)?;
        let log = executor.log().clone();
        let (first, _, first_applies) = counted(ProbeState::Absent);
        let (second, second_probes, second_applies) = counted(ProbeState::Absent);
        let signal = ProvisioningStep::new(
            "killed-command",
            || ProbeState::Absent,
            move || {
                log.mark_end(RunEnd::Interrupted);
                Err(ApplyError::Other("terminated by signal".into()))
            },
        );

        let plan = Plan::builder()
            .step(renamed(first, "first"))
            .step(signal)
            .step(renamed(second, "second"))
            .build()?;
        let end = executor.run(&plan);

        assert_eq!(end, RunEnd::Interrupted);
        assert_eq!(first_applies.load(Ordering::SeqCst), 1);
        assert_eq!(second_probes.load(Ordering::SeqCst), 0);
        assert_eq!(second_applies.load(Ordering::SeqCst), 0);

        let report = executor.log().finalize().expect("first finalize");
        assert_eq!(report.end, RunEnd::Interrupted);
        assert_eq!(report.exit_code(), crate::report::EXIT_INTERRUPTED);
        Ok(())
    }

    #[sealed_test]
    fn ctrl_c_at_prompt_interrupts_run() -> anyhow::Result<()> {
        let config = RunConfig::new("state").with_color(false);
        let log = RunLog::with_console(&config, std::io::sink())?;
        let mut executor = Executor::new(config, CtrlC, log);
        let (asking, _, asking_applies) = counted(ProbeState::Absent);
        let (later, later_probes, _) = counted(ProbeState::Absent);

        let plan = Plan::builder()
            .step(renamed(asking, "fonts").prompt("Install fonts?", true))
            .step(renamed(later, "later"))
            .build()?;
        let end = executor.run(&plan);

        assert_eq!(end, RunEnd::Interrupted);
        assert_eq!(asking_applies.load(Ordering::SeqCst), 0);
        assert_eq!(later_probes.load(Ordering::SeqCst), 0);
        assert_eq!(executor.log().tally(), Tally::default());

        let errors = executor
            .log()
            .entries()
            .into_iter()
            .filter(|entry| entry.level == LogLevel::Error)
            .count();
        assert_eq!(errors, 0);
        assert_eq!(
            executor.log().finalize().expect("first finalize").exit_code(),
            crate::report::EXIT_INTERRUPTED
        );
        Ok(())
    }
}
