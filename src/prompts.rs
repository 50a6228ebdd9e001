//! Yes/no questions asked before destructive operations.

use std::io::IsTerminal;
use tracing::warn;
use crate::error::Result;

/// Answers a yes/no question. Loading asks before overwriting an existing crate.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Asks on the terminal. Without a terminal on stdin the answer is "no".
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        if !std::io::stdin().is_terminal() {
            warn!("{} Not a terminal, assuming no. Use --force to skip this question.", prompt);
            return Ok(false);
        }
        let answer = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        Ok(answer)
    }
}

/// Gives the same answer to every question.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(self.0)
    }
}
