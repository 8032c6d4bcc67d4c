//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{extract::{State, Query}, Json, response::IntoResponse};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::protocol::*;
use crate::state::AppState;
use crate::logic::*;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_quiz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(quiz_info(&state))
}

#[instrument(level = "info", skip(state))]
pub async fn http_create_session(
  State(state): State<Arc<AppState>>,
) -> Result<Json<SessionOut>, ApiError> {
  let key = Uuid::new_v4().to_string();
  let out = session_view(&state, &key).await?;
  info!(target: "quiz", session_id = %key, "HTTP session created");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state), fields(session_id = %q.session_id))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Query(q): Query<SessionQuery>,
) -> Result<Json<SessionOut>, ApiError> {
  Ok(Json(session_view(&state, &q.session_id).await?))
}

#[instrument(level = "info", skip(state, body), fields(session_id = %body.session_id, question_len = body.question.len()))]
pub async fn http_post_hint(
  State(state): State<Arc<AppState>>,
  Json(body): Json<HintIn>,
) -> Result<Json<HintOut>, ApiError> {
  let out = ask_hint(&state, &body.session_id, &body.question).await?;
  info!(target: "quiz", session_id = %body.session_id, number = out.hint.number, hints_remaining = out.hints_remaining, "HTTP hint served");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, body), fields(session_id = %body.session_id, answer_len = body.answer.len()))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<AnswerOut>, ApiError> {
  let out = submit_answer(&state, &body.session_id, &body.answer).await?;
  info!(target: "quiz", session_id = %body.session_id, correct = out.correct, phase = ?out.phase, "HTTP answer evaluated");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, body), fields(session_id = %body.session_id))]
pub async fn http_post_reset(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SessionIn>,
) -> Result<Json<SessionOut>, ApiError> {
  Ok(Json(reset_session(&state, &body.session_id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_sample(State(state): State<Arc<AppState>>) -> Result<Json<SampleOut>, ApiError> {
  let table = sample_data(&state).await?;
  Ok(Json(SampleOut { caption: state.quiz.sample_caption.clone(), table }))
}
