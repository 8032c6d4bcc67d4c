//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Judging a final answer against the configured correct string
//!   - Hint requests with budget debit and rollback around the gateway call
//!   - Session views, reset and the sample-data preview

use tracing::{error, info, instrument, warn};

use crate::domain::{QuizPhase, SessionState, Table};
use crate::error::{ApiError, QueryExecutionError, QuizError};
use crate::protocol::{AnswerOut, HintOut, QuizOut, SessionOut};
use crate::session::AttemptOutcome;
use crate::state::AppState;
use crate::util::fill_template;

/// True iff the trimmed input equals `correct` exactly. Blank input is an error.
pub fn evaluate(input: &str, correct: &str) -> Result<bool, QuizError> {
  let trimmed = input.trim();
  if trimmed.is_empty() {
    return Err(QuizError::EmptyInput);
  }
  Ok(trimmed == correct)
}

/// Turn a rule violation into an error carrying the configured user message.
fn quiz_error(state: &AppState, e: QuizError) -> ApiError {
  let m = &state.messages;
  let message = match &e {
    QuizError::EmptyInput => m.empty_answer.clone(),
    QuizError::BudgetExhausted { .. } => m.hint_budget_reached.clone(),
    QuizError::AttemptsExhausted { max } => {
      let max = max.to_string();
      fill_template(&m.attempts_exhausted, &[("max", max.as_str())])
    }
    QuizError::AlreadyCleared => m.already_cleared.clone(),
    QuizError::MissingSession => e.to_string(),
  };
  ApiError::quiz(e, message)
}

fn session_key(state: &AppState, raw: &str) -> Result<String, ApiError> {
  let key = raw.trim();
  if key.is_empty() {
    return Err(quiz_error(state, QuizError::MissingSession));
  }
  Ok(key.to_string())
}

fn to_session_out(state: &AppState, key: &str, s: &SessionState, phase: QuizPhase) -> SessionOut {
  let rules = state.sessions.rules();
  SessionOut {
    session_id: key.to_string(),
    phase,
    hint_count: s.hint_count,
    max_hints: rules.max_hints,
    hints_remaining: s.hints_remaining(rules),
    attempt_count: s.attempt_count,
    max_attempts: rules.max_attempts,
    is_cleared: s.is_cleared,
    hints: s.hints.clone(),
  }
}

pub fn quiz_info(state: &AppState) -> QuizOut {
  let q = &state.quiz;
  QuizOut {
    title: q.title.clone(),
    question: q.question.clone(),
    answer_placeholder: q.answer_placeholder.clone(),
    hint_placeholder: q.hint_placeholder.clone(),
    sample_caption: q.sample_caption.clone(),
    max_hints: q.max_hints,
    max_attempts: q.max_attempts,
  }
}

/// Current state of a session, created on first access.
#[instrument(level = "info", skip(state))]
pub async fn session_view(state: &AppState, raw_key: &str) -> Result<SessionOut, ApiError> {
  let key = session_key(state, raw_key)?;
  let s = state.sessions.init(&key).await;
  let phase = s.phase(state.sessions.rules());
  Ok(to_session_out(state, &key, &s, phase))
}

/// Debit the budget, call the gateway, and roll the debit back if the call fails.
#[instrument(level = "info", skip(state, question), fields(question_len = question.len()))]
pub async fn ask_hint(state: &AppState, raw_key: &str, question: &str) -> Result<HintOut, ApiError> {
  let key = session_key(state, raw_key)?;
  let question = question.trim();
  if question.is_empty() {
    return Err(ApiError::quiz(QuizError::EmptyInput, state.messages.empty_question.clone()));
  }

  // A lost data connection ends hinting; nothing is debited.
  if let Err(e) = state.connection.token().await {
    error!(target: "quiz", %key, error = %e, "Data connection unavailable");
    return Err(ApiError::Connection(e));
  }

  match state.sessions.record_hint_used(&key).await {
    Ok(_) => {}
    Err(e @ (QuizError::AlreadyCleared | QuizError::AttemptsExhausted { .. })) => {
      return Err(ApiError::quiz(e, state.messages.hints_closed.clone()));
    }
    Err(e) => {
      warn!(target: "quiz", %key, error = %e, "Hint rejected before any network call");
      return Err(quiz_error(state, e));
    }
  }

  match state.analyst.request_hint(question, state.connection.as_ref()).await {
    Ok(res) => {
      let (hint, hints_remaining) = state
        .sessions
        .push_hint(&key, question.to_string(), res.content, res.request_id)
        .await;
      info!(target: "quiz", %key, number = hint.number, hints_remaining, blocks = hint.content.len(), "Hint served");
      Ok(HintOut { hint, hints_remaining })
    }
    Err(e) => {
      let restored = state.sessions.rollback_hint(&key).await;
      error!(target: "quiz", %key, error = %e, hint_count = restored, "Hint failed; budget restored");
      Err(ApiError::Gateway(e))
    }
  }
}

/// Judge a final answer and update the session.
#[instrument(level = "info", skip(state, answer), fields(answer_len = answer.len()))]
pub async fn submit_answer(state: &AppState, raw_key: &str, answer: &str) -> Result<AnswerOut, ApiError> {
  let key = session_key(state, raw_key)?;
  let correct = evaluate(answer, &state.quiz.correct_answer).map_err(|e| quiz_error(state, e))?;

  let (outcome, s) = state
    .sessions
    .record_attempt(&key, correct)
    .await
    .map_err(|e| quiz_error(state, e))?;

  let rules = state.sessions.rules();
  let phase = s.phase(rules);
  let hints_remaining = s.hints_remaining(rules);
  let m = &state.messages;

  let (correct, already_cleared, message) = match outcome {
    AttemptOutcome::AlreadyCleared => (true, true, m.already_cleared.clone()),
    AttemptOutcome::Recorded { correct: true, .. } => {
      (true, false, fill_template(&m.correct, &[("answer", state.quiz.correct_answer.as_str())]))
    }
    AttemptOutcome::Recorded { correct: false, .. } => {
      let mut msg = fill_template(&m.incorrect, &[("answer", answer.trim())]);
      if phase == QuizPhase::AttemptsExhausted {
        let max = rules.max_attempts.to_string();
        msg.push('\n');
        msg.push_str(&fill_template(&m.attempts_exhausted, &[("max", max.as_str())]));
      } else if hints_remaining > 0 {
        let remaining = hints_remaining.to_string();
        msg.push('\n');
        msg.push_str(&fill_template(&m.hints_left, &[("remaining", remaining.as_str())]));
      }
      (false, false, msg)
    }
  };

  info!(target: "quiz", %key, %correct, already_cleared, attempts = s.attempt_count, ?phase, "Answer judged");
  Ok(AnswerOut {
    correct,
    already_cleared,
    message,
    phase,
    attempt_count: s.attempt_count,
    attempts_remaining: rules.max_attempts.saturating_sub(s.attempt_count),
    hints_remaining,
  })
}

/// Back to in-progress: attempts and the cleared flag are cleared, hints are kept.
#[instrument(level = "info", skip(state))]
pub async fn reset_session(state: &AppState, raw_key: &str) -> Result<SessionOut, ApiError> {
  let key = session_key(state, raw_key)?;
  let s = state.sessions.reset(&key).await;
  info!(target: "quiz", %key, hint_count = s.hint_count, "Session reset");
  let phase = s.phase(state.sessions.rules());
  Ok(to_session_out(state, &key, &s, phase))
}

/// First rows of the quiz dataset.
#[instrument(level = "info", skip(state))]
pub async fn sample_data(state: &AppState) -> Result<Table, ApiError> {
  state.connection.token().await.map_err(ApiError::Connection)?;
  state.connection.query(&state.quiz.sample_query).await.map_err(|e| {
    warn!(target: "quiz", error = %e, "Sample query failed");
    ApiError::Query(QueryExecutionError {
      code: e.code,
      message: format!("{} ({})", state.messages.sample_failed, e.message),
    })
  })
}
