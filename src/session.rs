//! In-memory session store: per-key hint budget, attempt counter, cleared flag and
//! hint history.
//!
//! The store is created at startup and injected through `AppState`. Every mutation
//! goes through `upsert`, which holds the write lock for the whole update, so
//! updates to one key are serialized even when several tabs share it. Nothing here
//! is held across network calls.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::{ContentBlock, HintRecord, QuizPhase, QuizRules, SessionState};
use crate::error::QuizError;

/// Result of recording an answer attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
  Recorded { correct: bool, attempt_count: u32 },
  /// The session was already cleared; nothing changed.
  AlreadyCleared,
}

#[derive(Clone)]
pub struct SessionStore {
  rules: QuizRules,
  sessions: Arc<RwLock<HashMap<String, SessionState>>>,
}

impl SessionStore {
  pub fn new(rules: QuizRules) -> Self {
    Self { rules, sessions: Arc::new(RwLock::new(HashMap::new())) }
  }

  pub fn rules(&self) -> &QuizRules {
    &self.rules
  }

  /// Snapshot of a session, if the key has been seen.
  pub async fn get(&self, key: &str) -> Option<SessionState> {
    self.sessions.read().await.get(key).cloned()
  }

  /// Apply `update` to the state for `key` (created empty if missing) under the
  /// write lock and return what it returns.
  pub async fn upsert<R>(&self, key: &str, update: impl FnOnce(&mut SessionState) -> R) -> R {
    let mut sessions = self.sessions.write().await;
    update(sessions.entry(key.to_string()).or_default())
  }

  /// Existing state for `key`, or a fresh one. Idempotent.
  #[instrument(level = "debug", skip(self))]
  pub async fn init(&self, key: &str) -> SessionState {
    if let Some(s) = self.get(key).await {
      return s;
    }
    self.upsert(key, |s| s.clone()).await
  }

  /// Debit one hint. Returns the new hint count.
  #[instrument(level = "debug", skip(self))]
  pub async fn record_hint_used(&self, key: &str) -> Result<u32, QuizError> {
    let rules = self.rules;
    let debited = self
      .upsert(key, |s| {
        match s.phase(&rules) {
          QuizPhase::Cleared => return Err(QuizError::AlreadyCleared),
          QuizPhase::AttemptsExhausted => {
            return Err(QuizError::AttemptsExhausted { max: rules.max_attempts })
          }
          _ => {}
        }
        if s.hint_count >= rules.max_hints {
          return Err(QuizError::BudgetExhausted { max: rules.max_hints });
        }
        s.hint_count += 1;
        s.started = true;
        Ok(s.hint_count)
      })
      .await?;
    debug!(target: "quiz", %key, hint_count = debited, "Hint debited");
    Ok(debited)
  }

  /// Give back a hint debited for a request that failed. Never goes below zero.
  #[instrument(level = "debug", skip(self))]
  pub async fn rollback_hint(&self, key: &str) -> u32 {
    let restored = self
      .upsert(key, |s| {
        s.hint_count = s.hint_count.saturating_sub(1);
        s.hint_count
      })
      .await;
    debug!(target: "quiz", %key, hint_count = restored, "Hint rolled back");
    restored
  }

  /// Append a hint to the session history, numbered by its position there.
  /// Returns the stored record and the hints still available.
  pub async fn push_hint(
    &self,
    key: &str,
    question: String,
    content: Vec<ContentBlock>,
    request_id: Option<String>,
  ) -> (HintRecord, u32) {
    let rules = self.rules;
    self
      .upsert(key, |s| {
        let record = HintRecord {
          number: s.hints.len() as u32 + 1,
          question,
          content,
          request_id,
        };
        s.hints.push(record.clone());
        (record, s.hints_remaining(&rules))
      })
      .await
  }

  /// Count an answer attempt. Attempts after a correct answer are ignored.
  /// Returns the outcome with the state as it was right after the update.
  #[instrument(level = "debug", skip(self))]
  pub async fn record_attempt(
    &self,
    key: &str,
    correct: bool,
  ) -> Result<(AttemptOutcome, SessionState), QuizError> {
    let rules = self.rules;
    self
      .upsert(key, |s| {
        match s.phase(&rules) {
          QuizPhase::Cleared => return Ok((AttemptOutcome::AlreadyCleared, s.clone())),
          QuizPhase::AttemptsExhausted => {
            return Err(QuizError::AttemptsExhausted { max: rules.max_attempts })
          }
          _ => {}
        }
        s.attempt_count += 1;
        s.is_cleared = correct;
        s.started = true;
        Ok((AttemptOutcome::Recorded { correct, attempt_count: s.attempt_count }, s.clone()))
      })
      .await
  }

  /// Clear attempts and the cleared flag. The hint count is kept.
  #[instrument(level = "debug", skip(self))]
  pub async fn reset(&self, key: &str) -> SessionState {
    self
      .upsert(key, |s| {
        s.attempt_count = 0;
        s.is_cleared = false;
        s.clone()
      })
      .await
  }
}
