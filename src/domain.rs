//! Domain models: per-session quiz counters, hint history, and normalized hint content.

use serde::{Deserialize, Serialize};

/// Tabular result of a SQL statement, column names plus rows in column order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
  pub columns: Vec<String>,
  pub rows: Vec<Vec<serde_json::Value>>,
}

/// One normalized unit of a hint response.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
  Text {
    body: String,
  },
  /// An executable statement plus the rows it produced. `error` is set instead
  /// of `result_rows` when running the statement failed.
  Query {
    statement: String,
    #[serde(rename = "resultRows", skip_serializing_if = "Option::is_none")]
    result_rows: Option<Table>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
}

/// A question sent to the analyst service and what came back. Append-only.
#[derive(Clone, Debug, Serialize)]
pub struct HintRecord {
  pub number: u32,
  pub question: String,
  pub content: Vec<ContentBlock>,
  #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
  pub request_id: Option<String>,
}

/// Counters held for one session key.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
  pub hint_count: u32,
  pub attempt_count: u32,
  pub is_cleared: bool,
  /// Set by the first hint debit or answer attempt. Reset does not clear it.
  pub started: bool,
  pub hints: Vec<HintRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizPhase {
  NotStarted,
  InProgress,
  Cleared,
  AttemptsExhausted,
}

/// Limits applied to every session.
#[derive(Clone, Copy, Debug)]
pub struct QuizRules {
  pub max_hints: u32,
  pub max_attempts: u32,
}

impl SessionState {
  pub fn phase(&self, rules: &QuizRules) -> QuizPhase {
    if self.is_cleared {
      QuizPhase::Cleared
    } else if self.attempt_count >= rules.max_attempts {
      QuizPhase::AttemptsExhausted
    } else if !self.started {
      QuizPhase::NotStarted
    } else {
      QuizPhase::InProgress
    }
  }

  pub fn hints_remaining(&self, rules: &QuizRules) -> u32 {
    rules.max_hints.saturating_sub(self.hint_count)
  }
}
