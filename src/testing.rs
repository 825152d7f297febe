// ============================================================================
// src/testing.rs – Scripted Runner used by unit tests across the crate
// ============================================================================

use crate::cmd::{CommandResult, Runner};
use std::collections::VecDeque;
use std::sync::Mutex;

struct Rule {
    needle: String,
    elevated: Option<bool>,
    replies: VecDeque<CommandResult>,
}

/// Answers command lines by substring match (first rule wins) and records
/// every call. A rule with several replies hands them out in order and then
/// keeps repeating the last one. Unmatched commands fail with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(self, needle: &str, output: &str) -> Self {
        self.push(needle, None, vec![CommandResult::new(output, true)])
    }

    pub fn fail(self, needle: &str, output: &str) -> Self {
        self.push(needle, None, vec![CommandResult::new(output, false)])
    }

    /// Only matches elevated calls.
    pub fn elevated(self, needle: &str, output: &str, succeeded: bool) -> Self {
        self.push(
            needle,
            Some(true),
            vec![CommandResult::new(output, succeeded)],
        )
    }

    pub fn sequence(self, needle: &str, replies: Vec<CommandResult>) -> Self {
        self.push(needle, None, replies)
    }

    fn push(self, needle: &str, elevated: Option<bool>, replies: Vec<CommandResult>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                needle: needle.to_string(),
                elevated,
                replies: replies.into(),
            });
        }
        self
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(line, _)| line.contains(needle))
            .count()
    }

    pub fn lines_matching(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(line, _)| line.contains(needle))
            .map(|(line, _)| line)
            .collect()
    }
}

impl Runner for ScriptedRunner {
    fn run(&self, command_line: &str, elevated: bool) -> CommandResult {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((command_line.to_string(), elevated));
        }
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return CommandResult::new("", false),
        };
        for rule in rules.iter_mut() {
            if !command_line.contains(&rule.needle) {
                continue;
            }
            if rule.elevated.is_some_and(|e| e != elevated) {
                continue;
            }
            return if rule.replies.len() > 1 {
                rule.replies.pop_front().unwrap_or_else(|| CommandResult::new("", false))
            } else {
                rule.replies
                    .front()
                    .cloned()
                    .unwrap_or_else(|| CommandResult::new("", false))
            };
        }
        CommandResult::new("", false)
    }
}

/// `diskutil info` style block.
pub fn info_block(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("   {:<28}{}\n", format!("{k}:"), v))
        .collect()
}
