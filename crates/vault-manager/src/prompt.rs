//! Interactive input
//!
//! Backends and `create` ask for missing values through a [`Prompter`], so the
//! same code runs against a terminal or a scripted answer list.

use crate::error::{Result, VaultError};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

pub trait Prompter {
    /// Ask a question and return the trimmed answer
    fn ask(&mut self, question: &str) -> Result<String>;

    /// Ask for a secret without echoing it
    fn ask_secret(&mut self, question: &str) -> Result<String>;

    /// Show an informational line to the user
    fn say(&mut self, message: &str);
}

/// Prompts on the controlling terminal.
///
/// Questions go to stderr; stdout carries command output only.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        eprint!("{}", question);
        io::stderr().flush()?;

        let mut input = String::new();
        let read = io::stdin().lock().read_line(&mut input)?;
        if read == 0 {
            return Err(VaultError::Prompt(format!("no answer for '{}'", question.trim())));
        }
        Ok(input.trim().to_string())
    }

    fn ask_secret(&mut self, question: &str) -> Result<String> {
        rpassword::prompt_password(question).map_err(|e| VaultError::Prompt(e.to_string()))
    }

    fn say(&mut self, message: &str) {
        eprintln!("{}", message);
    }
}

/// Answers questions from a fixed list, in order
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    /// Questions asked so far, for inspection
    pub asked: Vec<String>,
    /// Messages shown so far
    pub said: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
            said: Vec::new(),
        }
    }

    fn next(&mut self, question: &str) -> Result<String> {
        self.asked.push(question.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| VaultError::Prompt(format!("no scripted answer for '{}'", question.trim())))
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        Ok(self.next(question)?.trim().to_string())
    }

    fn ask_secret(&mut self, question: &str) -> Result<String> {
        self.next(question)
    }

    fn say(&mut self, message: &str) {
        self.said.push(message.to_string());
    }
}
