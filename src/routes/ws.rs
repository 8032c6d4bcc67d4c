//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{info, error, instrument, debug};

use crate::error::ApiError;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::logic::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "prefecture_quiz", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "prefecture_quiz", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "prefecture_quiz", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state).await
          }
          Err(e) => ServerWsMessage::Error {
            kind: "invalid_message".into(),
            message: format!("Invalid JSON: {}", e),
            request_id: None,
          },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "kind": "serialization", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "prefecture_quiz", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "prefecture_quiz", "WebSocket disconnected");
}

fn ws_error(e: ApiError) -> ServerWsMessage {
  ServerWsMessage::Error {
    kind: e.kind().into(),
    request_id: e.request_id().map(str::to_string),
    message: e.to_string(),
  }
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::Quiz => ServerWsMessage::Quiz { quiz: quiz_info(state) },

    ClientWsMessage::SessionState { session_id } => match session_view(state, &session_id).await {
      Ok(session) => ServerWsMessage::Session { session },
      Err(e) => ws_error(e),
    },

    ClientWsMessage::Hint { session_id, question } => match ask_hint(state, &session_id, &question).await {
      Ok(hint) => {
        info!(target: "quiz", %session_id, number = hint.hint.number, "WS hint served");
        ServerWsMessage::Hint { hint }
      }
      Err(e) => ws_error(e),
    },

    ClientWsMessage::SubmitAnswer { session_id, answer } => match submit_answer(state, &session_id, &answer).await {
      Ok(result) => {
        info!(target: "quiz", %session_id, correct = result.correct, "WS submit_answer evaluated");
        ServerWsMessage::AnswerResult { result }
      }
      Err(e) => ws_error(e),
    },

    ClientWsMessage::Reset { session_id } => match reset_session(state, &session_id).await {
      Ok(session) => ServerWsMessage::Session { session },
      Err(e) => ws_error(e),
    },

    ClientWsMessage::Sample => match sample_data(state).await {
      Ok(table) => ServerWsMessage::Sample { table },
      Err(e) => ws_error(e),
    },
  }
}
