// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{backup_entries, run_scripted, FakePackageManager};

use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{fs, path::Path};
use stepwise::{
    report::{Tally, EXIT_FAILURE, EXIT_SUCCESS},
    system::{
        command::{run_command, CommandLine},
        files::{copy_files, resolve},
        package::install_packages,
        profile::{append_profile_block, ProfileBlock},
    },
    Plan, RunEnd,
};

fn rbenv() -> ProfileBlock {
    ProfileBlock::new("rbenv", "eval \"$(rbenv init - zsh)\"")
}

#[sealed_test]
fn install_missing_package_then_skip() -> Result<()> {
    let manager = FakePackageManager::with_installed(&["git"]);
    let plan = Plan::builder()
        .step(install_packages("tree", manager.clone(), ["tree"]))
        .build()?;

    let first = run_scripted(&plan, "")?;
    assert_eq!(first.end, RunEnd::Completed);
    assert_eq!(first.report.tally.applied, 1);
    assert_eq!(manager.installs(), vec![vec!["tree".to_string()]]);
    assert!(first.console.contains("✓ tree applied"));

    let second = run_scripted(&plan, "")?;
    assert_eq!(
        second.report.tally,
        Tally {
            satisfied: 1,
            ..Tally::default()
        }
    );
    assert_eq!(manager.installs().len(), 1);
    assert_eq!(second.report.exit_code(), EXIT_SUCCESS);

    Ok(())
}

#[sealed_test]
fn second_run_changes_nothing() -> Result<()> {
    fs::create_dir_all("home")?;
    fs::create_dir_all("dotfiles")?;
    fs::write("home/.zshrc", "export EDITOR=nvim\n")?;
    fs::write("dotfiles/.gitconfig", "[user]\n    name = blah\n")?;

    let manager = FakePackageManager::with_installed(&[]);
    let plan = Plan::builder()
        .step(install_packages("base", manager.clone(), ["git", "zsh"]))
        .step(
            append_profile_block("rbenv-init", rbenv(), ["home/.zshrc"])
                .prompt("Configure rbenv?", true),
        )
        .step(copy_files(
            "gitconfig",
            resolve("dotfiles/.gitconfig", "home/.gitconfig")?,
        ))
        .build()?;

    let first = run_scripted(&plan, "\n")?;
    assert_eq!(first.report.tally.applied, 3);
    let zshrc = fs::read_to_string("home/.zshrc")?;
    let gitconfig = fs::read_to_string("home/.gitconfig")?;
    let backups = backup_entries()?;

    let second = run_scripted(&plan, "\n")?;
    assert_eq!(
        second.report.tally,
        Tally {
            satisfied: 3,
            ..Tally::default()
        }
    );
    assert_eq!(fs::read_to_string("home/.zshrc")?, zshrc);
    assert_eq!(fs::read_to_string("home/.gitconfig")?, gitconfig);
    assert_eq!(backup_entries()?, backups);
    assert_eq!(manager.installs().len(), 1);

    Ok(())
}

#[sealed_test]
fn overwritten_file_survives_in_exactly_one_backup() -> Result<()> {
    fs::create_dir_all("home")?;
    fs::create_dir_all("dotfiles")?;
    fs::write("home/.zshrc", "X")?;
    fs::write("dotfiles/.zshrc", "source ~/.zsh/aliases.zsh\n")?;

    let plan = Plan::builder()
        .step(copy_files("zshrc", resolve("dotfiles/.zshrc", "home/.zshrc")?))
        .build()?;

    let first = run_scripted(&plan, "")?;
    assert_eq!(
        fs::read_to_string("home/.zshrc")?,
        "source ~/.zsh/aliases.zsh\n"
    );
    assert_eq!(first.report.backups.len(), 1);
    assert!(first.report.backup_dir.is_some());

    run_scripted(&plan, "")?;
    let backups = backup_entries()?;
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read_to_string(&backups[0])?, "X");

    Ok(())
}

#[sealed_test]
fn missing_paths_are_never_backed_up() -> Result<()> {
    let plan = Plan::builder()
        .step(append_profile_block("rbenv-init", rbenv(), ["home/.bashrc"]))
        .build()?;

    let run = run_scripted(&plan, "")?;
    assert_eq!(run.report.tally.applied, 1);
    assert_eq!(run.report.backup_dir, None);
    assert!(run.report.backups.is_empty());
    assert!(!Path::new("state/backups").exists());

    Ok(())
}

#[sealed_test]
fn invalid_answer_reprompts_until_default() -> Result<()> {
    let plan = Plan::builder()
        .step(
            append_profile_block("oh-my-zsh", rbenv(), ["home/.zshrc"])
                .prompt("Install Oh My Zsh?", false),
        )
        .build()?;

    let run = run_scripted(&plan, "maybe\n\n")?;
    assert_eq!(
        run.prompts,
        "Install Oh My Zsh? [y/N] invalid answer \"maybe\", please answer yes or no\n\
         Install Oh My Zsh? [y/N] "
    );
    assert_eq!(
        run.report.tally,
        Tally {
            declined: 1,
            ..Tally::default()
        }
    );
    assert!(!Path::new("home/.zshrc").exists());

    Ok(())
}

#[sealed_test]
fn profile_block_is_appended_once() -> Result<()> {
    fs::create_dir_all("home")?;
    fs::write("home/.zshrc", "alias ll='ls -l'")?;
    fs::write(
        "home/.bashrc",
        indoc! {r#"
            # >>> rbenv >>>
            eval "$(rbenv init - bash)"
            # <<< rbenv <<<
        "#},
    )?;
    let bashrc = fs::read_to_string("home/.bashrc")?;

    let plan = Plan::builder()
        .step(append_profile_block(
            "rbenv-init",
            rbenv(),
            ["home/.zshrc", "home/.bashrc"],
        ))
        .build()?;
    run_scripted(&plan, "")?;
    run_scripted(&plan, "")?;

    let expect = indoc! {r#"
        alias ll='ls -l'

        # >>> rbenv >>>
        eval "$(rbenv init - zsh)"
        # <<< rbenv <<<
    "#};
    assert_eq!(fs::read_to_string("home/.zshrc")?, expect);
    assert_eq!(fs::read_to_string("home/.bashrc")?, bashrc);

    Ok(())
}

#[sealed_test]
fn critical_failure_stops_remaining_steps() -> Result<()> {
    let plan = Plan::builder()
        .step(append_profile_block("first", rbenv(), ["home/.zshrc"]))
        .step(run_command("broken", None, CommandLine::new("false"), Vec::new()).critical())
        .step(append_profile_block("last", rbenv(), ["home/.bashrc"]))
        .build()?;

    let run = run_scripted(&plan, "")?;
    assert_eq!(
        run.end,
        RunEnd::Aborted {
            step: "broken".into()
        }
    );
    assert_eq!(run.report.exit_code(), EXIT_FAILURE);
    assert_eq!(
        run.report.tally,
        Tally {
            applied: 1,
            failed: 1,
            ..Tally::default()
        }
    );
    assert!(run.console.contains("✗ step \"broken\" failed"));
    assert!(Path::new("home/.zshrc").exists());
    assert!(!Path::new("home/.bashrc").exists());

    let log = fs::read_to_string(&run.report.log_path)?;
    assert!(log.contains("[ERROR] step \"broken\" failed"));

    Ok(())
}

#[sealed_test]
fn optional_failure_keeps_going() -> Result<()> {
    let plan = Plan::builder()
        .step(run_command("broken", None, CommandLine::new("false"), Vec::new()))
        .step(append_profile_block("last", rbenv(), ["home/.bashrc"]))
        .build()?;

    let run = run_scripted(&plan, "")?;
    assert_eq!(run.end, RunEnd::Completed);
    assert_eq!(run.report.tally.failed, 1);
    assert!(Path::new("home/.bashrc").exists());

    Ok(())
}

#[sealed_test]
fn symlinked_profile_backup_holds_prior_content() -> Result<()> {
    fs::create_dir_all("home")?;
    fs::create_dir_all("dotfiles")?;
    fs::write("dotfiles/zshrc", "X")?;
    std::os::unix::fs::symlink("../dotfiles/zshrc", "home/.zshrc")?;

    let plan = Plan::builder()
        .step(append_profile_block("rbenv-init", rbenv(), ["home/.zshrc"]))
        .build()?;
    let run = run_scripted(&plan, "")?;
    assert_eq!(run.report.tally.applied, 1);

    let backups = backup_entries()?;
    assert_eq!(backups.len(), 1);
    assert!(!fs::symlink_metadata(&backups[0])?.file_type().is_symlink());
    assert_eq!(fs::read_to_string(&backups[0])?, "X");
    assert!(fs::symlink_metadata("home/.zshrc")?.file_type().is_symlink());
    assert!(fs::read_to_string("dotfiles/zshrc")?.contains("# >>> rbenv >>>"));

    Ok(())
}

#[sealed_test]
fn symlinked_dotfile_source_settles_after_first_run() -> Result<()> {
    fs::create_dir_all("dotfiles")?;
    fs::write("dotfiles/zshrc", "source ~/.zsh/aliases.zsh\n")?;
    std::os::unix::fs::symlink("zshrc", "dotfiles/.zshrc")?;

    let plan = Plan::builder()
        .step(copy_files("zshrc", resolve("dotfiles/.zshrc", "home/.zshrc")?))
        .build()?;

    let first = run_scripted(&plan, "")?;
    assert_eq!(first.report.tally.applied, 1);
    assert_eq!(
        fs::read_to_string("home/.zshrc")?,
        "source ~/.zsh/aliases.zsh\n"
    );

    let second = run_scripted(&plan, "")?;
    assert_eq!(
        second.report.tally,
        Tally {
            satisfied: 1,
            ..Tally::default()
        }
    );
    assert!(backup_entries()?.is_empty());

    Ok(())
}
