//! Line-oriented operator prompts.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use crate::error::{OpsError, Result};

pub trait Prompter: Send {
    /// Shows `question` and returns the trimmed answer line.
    /// End of input is reported as [`OpsError::Cancelled`].
    fn ask(&mut self, question: &str) -> Result<String>;

    /// Prints one line of menu or report output.
    fn say(&mut self, line: &str);
}

/// y/yes/n/no; an empty answer takes `default`. Anything else re-asks.
pub fn confirm(prompter: &mut dyn Prompter, question: &str, default: bool) -> Result<bool> {
    let hint = if default { "(Y/n)" } else { "(y/N)" };
    loop {
        let answer = prompter.ask(&format!("{question} {hint}: "))?.to_ascii_lowercase();
        match answer.as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            "" => return Ok(default),
            _ => prompter.say("Please answer yes (y) or no (n)"),
        }
    }
}

/// Succeeds only when the operator types `expected` exactly.
pub fn confirm_typed(prompter: &mut dyn Prompter, question: &str, expected: &str) -> Result<bool> {
    Ok(prompter.ask(question)? == expected)
}

/// Asks for a number in `1..=max`, re-asking on anything else.
pub fn choose_number(prompter: &mut dyn Prompter, question: &str, max: usize) -> Result<usize> {
    loop {
        let answer = prompter.ask(question)?;
        match answer.parse::<usize>() {
            Ok(choice) if (1..=max).contains(&choice) => return Ok(choice),
            _ => prompter.say("Invalid selection. Please try again."),
        }
    }
}

pub fn pause(prompter: &mut dyn Prompter) -> Result<()> {
    prompter.ask("\nPress Enter to continue...").map(|_| ())
}

/// Prompts on stdout and reads answers from stdin.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{question}")?;
        stdout.flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            writeln!(stdout)?;
            return Err(OpsError::Cancelled);
        }
        Ok(line.trim().to_string())
    }

    fn say(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Answers every y/N confirmation with yes; any other question is cancelled.
#[derive(Debug, Default)]
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn ask(&mut self, question: &str) -> Result<String> {
        if question.contains("(y/N)") || question.contains("(Y/n)") || question.contains("(yes/no)") {
            println!("{question}yes");
            Ok("yes".to_string())
        } else {
            Err(OpsError::Cancelled)
        }
    }

    fn say(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Replays queued answers and keeps a transcript of everything shown.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    pub transcript: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    pub fn saw(&self, needle: &str) -> bool {
        self.transcript.iter().any(|line| line.contains(needle))
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        self.transcript.push(question.to_string());
        self.answers
            .pop_front()
            .map(|answer| answer.trim().to_string())
            .ok_or(OpsError::Cancelled)
    }

    fn say(&mut self, line: &str) {
        self.transcript.push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_reasks_until_valid() {
        let mut prompter = ScriptedPrompter::new(["maybe", " YES "]);
        assert!(confirm(&mut prompter, "Delete?", false).unwrap());
        assert!(prompter.saw("Please answer yes (y) or no (n)"));
        assert!(prompter.saw("Delete? (y/N): "));
    }

    #[test]
    fn confirm_empty_answer_takes_default() {
        let mut prompter = ScriptedPrompter::new([""]);
        assert!(!confirm(&mut prompter, "Delete?", false).unwrap());
    }

    #[test]
    fn exhausted_script_cancels() {
        let mut prompter = ScriptedPrompter::new(Vec::<String>::new());
        assert!(matches!(
            confirm(&mut prompter, "Delete?", false),
            Err(OpsError::Cancelled)
        ));
    }

    #[test]
    fn choose_number_rejects_out_of_range() {
        let mut prompter = ScriptedPrompter::new(["0", "x", "3"]);
        assert_eq!(choose_number(&mut prompter, "Pick: ", 3).unwrap(), 3);
        assert_eq!(prompter.remaining(), 0);
    }

    #[test]
    fn assume_yes_only_answers_confirmations() {
        let mut prompter = AssumeYes;
        assert!(confirm(&mut prompter, "Truncate?", false).unwrap());
        assert!(matches!(
            prompter.ask("Type the container name: "),
            Err(OpsError::Cancelled)
        ));
    }
}
