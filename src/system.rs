// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! System adapters.
//!
//! The executor only ever sees probes and applies. Everything that actually
//! touches the host lives here: running external commands, querying and
//! driving the package manager, appending blocks to shell profiles, cloning
//! repositories, copying dotfiles, and switching the login shell.
//!
//! Each adapter module also provides the constructor for the provisioning
//! step that uses it, e.g., [`package::install_packages`], so a plan is just
//! a sequence of calls to these constructors.

pub mod command;
pub mod files;
pub mod package;
pub mod profile;
pub mod repo;
pub mod shell;
