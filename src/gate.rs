// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Operator confirmation.
//!
//! Steps may ask the operator before they run. A confirmation gate presents a
//! yes/no question with a default answer and keeps asking until it gets an
//! answer it understands. There is no iteration cap and no timeout, a gate
//! blocks the run until the operator answers.

use inquire::{Confirm as InquireConfirm, InquireError};
use std::io::{BufRead, Write};

/// Ask operator a yes/no question.
pub trait Confirm: Send {
    /// Present prompt, and resolve operator's answer.
    ///
    /// # Errors
    ///
    /// - Return [`GateError`] if no answer can ever be obtained.
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool>;
}

impl<C> Confirm for Box<C>
where
    C: Confirm + ?Sized,
{
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        (**self).confirm(prompt, default)
    }
}

/// Interpret one line of operator input.
///
/// Empty input resolves to `None` so the caller can substitute the default.
/// Unrecognized input is an error.
pub fn parse_answer(input: &str) -> std::result::Result<Option<bool>, InvalidAnswer> {
    let answer = input.trim();
    if answer.is_empty() {
        return Ok(None);
    }

    match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" => Ok(Some(true)),
        "n" | "no" => Ok(Some(false)),
        _ => Err(InvalidAnswer(answer.to_owned())),
    }
}

/// Confirmation gate over plain line-based input.
///
/// Used when standard input is not a terminal, and for scripted input.
#[derive(Debug)]
pub struct LineGate<R, W> {
    input: R,
    output: W,
}

impl<R, W> LineGate<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    /// Construct new line gate.
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Recover output sink.
    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R, W> Confirm for LineGate<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            write!(self.output, "{prompt} {hint} ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(GateError::InputClosed);
            }

            match parse_answer(&line) {
                Ok(answer) => return Ok(answer.unwrap_or(default)),
                Err(invalid) => writeln!(self.output, "{invalid}")?,
            }
        }
    }
}

/// Confirmation gate through an interactive terminal prompt.
#[derive(Debug, Default, Clone)]
pub struct TerminalGate;

impl Confirm for TerminalGate {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        let answer = InquireConfirm::new(prompt)
            .with_default(default)
            .with_parser(&|input: &str| parse_answer(input).map_err(|_| ())?.ok_or(()))
            .with_error_message("please answer yes or no")
            .prompt_skippable()
            .map_err(GateError::from_prompt)?;

        Ok(answer.unwrap_or(default))
    }
}

/// Confirmation gate that answers yes to everything.
#[derive(Debug, Default, Clone)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, _prompt: &str, _default: bool) -> Result<bool> {
        Ok(true)
    }
}

/// Operator input that is neither yes nor no.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid answer {0:?}, please answer yes or no")]
pub struct InvalidAnswer(pub String);

/// Confirmation gate error types.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Input ended before a valid answer was given.
    #[error("operator input closed before an answer was given")]
    InputClosed,

    /// Operator interrupted the prompt.
    #[error("operator interrupted the prompt")]
    Interrupted,

    /// Terminal I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Interactive prompt failed.
    #[error(transparent)]
    Prompt(#[from] InquireError),
}

impl GateError {
    /// Convert prompt failure, keeping interruption distinct.
    pub fn from_prompt(error: InquireError) -> Self {
        match error {
            InquireError::OperationInterrupted => Self::Interrupted,
            other => Self::Prompt(other),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = GateError> = std::result::Result<T, E>;
