//! Flow records and their lifecycle

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Lifecycle of a flow: Created -> Running -> {Completed, Failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl FlowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowStatus::Completed | FlowStatus::Failed)
    }

    /// Created and Failed flows may be (re)run
    pub fn can_execute(self) -> bool {
        matches!(self, FlowStatus::Created | FlowStatus::Failed)
    }

    /// Stable encoding used by the C ABI
    pub fn as_raw(self) -> i32 {
        match self {
            FlowStatus::Created => 0,
            FlowStatus::Running => 1,
            FlowStatus::Completed => 2,
            FlowStatus::Failed => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlowStatus::Created => "created",
            FlowStatus::Running => "running",
            FlowStatus::Completed => "completed",
            FlowStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of agent work owned by the registry
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub name: String,
    pub instructions: String,
    pub status: FlowStatus,
    pub created_at: DateTime<Utc>,
    /// Successful runs; failed attempts only count in `failure_count`
    pub execution_count: u64,
    pub failure_count: u64,
    pub steps_completed: u64,
    pub last_duration: Duration,
    pub total_duration: Duration,
    pub last_error: Option<String>,
    /// Output of the last successful run, one entry per step
    pub transcript: Vec<String>,
}

impl FlowRecord {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            status: FlowStatus::Created,
            created_at: Utc::now(),
            execution_count: 0,
            failure_count: 0,
            steps_completed: 0,
            last_duration: Duration::ZERO,
            total_duration: Duration::ZERO,
            last_error: None,
            transcript: Vec::new(),
        }
    }
}

/// Split instructions into steps at newlines and at `.`, `!` or `?` followed
/// by whitespace or the end of the text. Fragments without any alphanumeric
/// character are dropped.
pub fn split_steps(instructions: &str) -> Vec<&str> {
    let mut steps = Vec::new();
    let mut start = 0;
    let mut chars = instructions.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |&(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = i + c.len_utf8();
            push_step(&mut steps, &instructions[start..end]);
            start = end;
        }
    }
    push_step(&mut steps, &instructions[start..]);

    steps
}

fn push_step<'a>(steps: &mut Vec<&'a str>, fragment: &'a str) {
    let step = fragment.trim();
    if step.chars().any(char::is_alphanumeric) {
        steps.push(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_created() {
        let record = FlowRecord::new("Research Assistant", "Help users find information.");
        assert_eq!(record.status, FlowStatus::Created);
        assert_eq!(record.execution_count, 0);
        assert!(record.transcript.is_empty());
    }

    #[test]
    fn test_split_steps() {
        let steps = split_steps(
            "You are a research assistant. Help users find information and answer questions.",
        );
        assert_eq!(
            steps,
            vec![
                "You are a research assistant.",
                "Help users find information and answer questions."
            ]
        );
    }

    #[test]
    fn test_split_steps_newlines_and_blanks() {
        let steps = split_steps("first\n\n second step!  ...\nthird?");
        assert_eq!(steps, vec!["first", "second step!", "third?"]);
    }

    #[test]
    fn test_split_steps_keeps_dotted_words() {
        assert_eq!(
            split_steps("Visit example.com for docs. Use v1.2 API."),
            vec!["Visit example.com for docs.", "Use v1.2 API."]
        );
    }

    #[test]
    fn test_split_steps_ellipsis_and_trailing_text() {
        assert_eq!(
            split_steps("Wait... then answer!Really? done"),
            vec!["Wait...", "then answer!Really?", "done"]
        );
    }

    #[test]
    fn test_split_steps_without_terminator() {
        assert_eq!(
            split_steps("Help with coding and debugging"),
            vec!["Help with coding and debugging"]
        );
    }

    #[test]
    fn test_empty_instructions_have_no_steps() {
        assert!(split_steps("").is_empty());
        assert!(split_steps("   \n").is_empty());
    }

    #[test]
    fn test_status_predicates() {
        assert!(FlowStatus::Created.can_execute());
        assert!(FlowStatus::Failed.can_execute());
        assert!(!FlowStatus::Running.can_execute());
        assert!(!FlowStatus::Completed.can_execute());

        assert!(FlowStatus::Completed.is_terminal());
        assert!(FlowStatus::Failed.is_terminal());
        assert!(!FlowStatus::Created.is_terminal());
    }
}
