// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent workstation provisioning.
//!
//! Stepwise brings a single Linux workstation into a desired state through a
//! fixed, ordered plan of __provisioning steps__. Each step checks whether
//! its resources already look the way they should, and only does work when
//! they do not. Re-running a plan on a provisioned machine changes nothing.
//!
//! Nothing that already exists is overwritten without a verified backup, and
//! every run leaves behind a persisted log of what it did.
//!
//! # Run Lifecycle
//!
//! 1. Read a [`PlanDefinition`], and turn it into a [`Plan`].
//! 2. Open a [`RunLog`] for the run's [`RunConfig`].
//! 3. Hand the plan to an [`Executor`], which evaluates every step in order.
//! 4. [`RunLog::finalize`] the run into a [`RunReport`].

pub mod backup;
pub mod config;
pub mod executor;
pub mod gate;
pub mod host;
pub mod path;
pub mod plan;
pub mod probe;
pub mod report;
pub mod step;
pub mod system;

#[doc(inline)]
pub use backup::{BackupManager, BackupRecord};

#[doc(inline)]
pub use config::{PlanDefinition, RunConfig};

#[doc(inline)]
pub use executor::{Executor, StepError, StepOutcome};

#[doc(inline)]
pub use gate::{AssumeYes, Confirm, LineGate, TerminalGate};

#[doc(inline)]
pub use plan::{Plan, PlanContext};

#[doc(inline)]
pub use report::{RunEnd, RunLog, RunReport};

#[doc(inline)]
pub use step::{ProbeState, ProvisioningStep};
