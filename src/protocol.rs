//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{HintRecord, QuizPhase, Table};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Quiz,
    SessionState {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Hint {
        #[serde(rename = "sessionId")]
        session_id: String,
        question: String,
    },
    SubmitAnswer {
        #[serde(rename = "sessionId")]
        session_id: String,
        answer: String,
    },
    Reset {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Sample,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Quiz {
        quiz: QuizOut,
    },
    Session {
        session: SessionOut,
    },
    Hint {
        hint: HintOut,
    },
    AnswerResult {
        result: AnswerOut,
    },
    Sample {
        table: Table,
    },
    Error {
        kind: String,
        message: String,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizOut {
    pub title: String,
    pub question: String,
    pub answer_placeholder: String,
    pub hint_placeholder: String,
    pub sample_caption: String,
    pub max_hints: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionIn {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
    pub session_id: String,
    pub phase: QuizPhase,
    pub hint_count: u32,
    pub max_hints: u32,
    pub hints_remaining: u32,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub is_cleared: bool,
    pub hints: Vec<HintRecord>,
}

#[derive(Debug, Deserialize)]
pub struct HintIn {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub question: String,
}
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HintOut {
    pub hint: HintRecord,
    pub hints_remaining: u32,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub answer: String,
}
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOut {
    pub correct: bool,
    pub already_cleared: bool,
    pub message: String,
    pub phase: QuizPhase,
    pub attempt_count: u32,
    pub attempts_remaining: u32,
    pub hints_remaining: u32,
}

#[derive(Serialize)]
pub struct SampleOut {
    pub caption: String,
    pub table: Table,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
