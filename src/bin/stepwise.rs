// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use stepwise::{
    config::PlanDefinition,
    gate::{AssumeYes, Confirm, GateError, LineGate, TerminalGate},
    host::{current_user, is_privileged, HostInfo, OS_RELEASE},
    path::{default_plan_path, default_state_dir, home_dir},
    plan::{Plan, PlanContext},
    report::{
        RunEnd, RunLog, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_PRIVILEGED, EXIT_SUCCESS,
        EXIT_UNSUPPORTED_HOST,
    },
    system::package::package_manager,
    Executor, RunConfig,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{
    fs,
    io::{BufReader, IsTerminal},
    path::{Path, PathBuf},
    process::exit,
};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "stepwise [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<i32> {
        match self.command {
            Command::Apply(opts) => run_plan(opts, false).await,
            Command::Check(opts) => run_plan(opts, true).await,
            Command::List(opts) => run_list(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Bring workstation into the state described by a plan.
    #[command(override_usage = "stepwise apply [options]")]
    Apply(RunOptions),

    /// Report what a plan would change without changing anything.
    #[command(override_usage = "stepwise check [options]")]
    Check(RunOptions),

    /// List steps of a plan in execution order.
    #[command(override_usage = "stepwise list [options]")]
    List(ListOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RunOptions {
    /// Path to plan definition file.
    #[arg(short, long, value_name = "path")]
    pub plan: Option<PathBuf>,

    /// Directory to keep run logs and backups in.
    #[arg(short, long, value_name = "path")]
    pub state_dir: Option<PathBuf>,

    /// Answer yes to every prompt.
    #[arg(short, long)]
    pub yes: bool,

    /// Disable colored console output.
    #[arg(long)]
    pub no_color: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// Path to plan definition file.
    #[arg(short, long, value_name = "path")]
    pub plan: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match run().await {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(EXIT_FAILURE);
        }
    }
}

async fn run() -> Result<i32> {
    Cli::parse().run().await
}

async fn run_plan(opts: RunOptions, dry_run: bool) -> Result<i32> {
    if is_privileged() {
        error!("refusing to run as root, run stepwise as the account to provision instead");
        return Ok(EXIT_PRIVILEGED);
    }

    let plan_path = match opts.plan {
        Some(path) => path,
        None => default_plan_path()?,
    };
    let definition = load_definition(&plan_path)?;

    let mut gate = select_gate(opts.yes);
    let supported = &definition.settings.supported_hosts;
    if !supported.is_empty() {
        let host = HostInfo::read(OS_RELEASE)?;
        if !host.is_supported(supported) {
            warn!("host {:?} is not one of {supported:?}", host.name());
            if !dry_run {
                match gate.confirm("Continue on an unsupported host?", false) {
                    Ok(true) => {}
                    Ok(false) => return Ok(EXIT_UNSUPPORTED_HOST),
                    Err(GateError::Interrupted) => return Ok(EXIT_INTERRUPTED),
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }

    let context = PlanContext {
        plan_dir: plan_dir(&plan_path),
        home: home_dir()?,
        user: current_user()?,
        manager: package_manager(
            definition.settings.package_manager,
            definition.settings.sudo,
        ),
    };
    let plan = Plan::from_definition(&definition, &context)?;

    let state_dir = match opts.state_dir {
        Some(path) => path,
        None => default_state_dir()?,
    };
    let config = RunConfig::new(state_dir)
        .with_dry_run(dry_run)
        .with_color(!opts.no_color && std::io::stdout().is_terminal());
    let log = RunLog::open(&config)?;
    log.info(format!("using plan {}", plan_path.display()));

    let mut executor = Executor::new(config, gate, log.clone());
    let mut task = tokio::task::spawn_blocking(move || executor.run(&plan));
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = &mut task => {
            result.context("provisioning task stopped unexpectedly")?;
        }
        _ = tokio::signal::ctrl_c() => interrupt(&log),
        _ = terminate.recv() => interrupt(&log),
    }

    // INVARIANT: The report is produced once, whichever path gets here first.
    let Some(report) = log.finalize() else {
        return Ok(EXIT_INTERRUPTED);
    };
    println!();
    print!("{report}");

    Ok(report.exit_code())
}

fn run_list(opts: ListOptions) -> Result<i32> {
    let plan_path = match opts.plan {
        Some(path) => path,
        None => default_plan_path()?,
    };
    let definition = load_definition(&plan_path)?;
    let context = PlanContext {
        plan_dir: plan_dir(&plan_path),
        home: home_dir()?,
        user: current_user()?,
        manager: package_manager(
            definition.settings.package_manager,
            definition.settings.sudo,
        ),
    };
    let plan = Plan::from_definition(&definition, &context)?;

    for step in plan.iter() {
        let critical = if step.is_critical() { " (critical)" } else { "" };
        println!(
            "{:<24} {:<16} {}{critical}",
            step.id(),
            step.kind().to_string(),
            step.summary()
        );
    }

    Ok(EXIT_SUCCESS)
}

fn load_definition(path: &Path) -> Result<PlanDefinition> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {:?}", path.display()))?;
    data.parse::<PlanDefinition>()
        .with_context(|| format!("invalid plan {:?}", path.display()))
}

fn plan_dir(plan_path: &Path) -> PathBuf {
    plan_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn select_gate(assume_yes: bool) -> Box<dyn Confirm> {
    if assume_yes {
        Box::new(AssumeYes)
    } else if std::io::stdin().is_terminal() {
        Box::new(TerminalGate)
    } else {
        Box::new(LineGate::new(
            BufReader::new(std::io::stdin()),
            std::io::stderr(),
        ))
    }
}

fn interrupt(log: &RunLog) {
    log.warn("interrupted, remaining steps will not run");
    log.mark_end(RunEnd::Interrupted);
}
