//! Error taxonomy for configuration, the data connection, the analyst gateway and
//! quiz rules, plus the HTTP mapping of all of them.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("missing connection setting `{0}`")]
  Missing(&'static str),
  #[error("invalid value for `{field}`: {value}")]
  Invalid { field: &'static str, value: String },
  #[error("cannot read config file {path}: {message}")]
  File { path: String, message: String },
  #[error("invalid config file {path}: {message}")]
  Parse { path: String, message: String },
}

/// Credential or connectivity failure of the data connection. Fatal.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
  #[error("could not reach Snowflake: {0}")]
  Unreachable(String),
  #[error("login rejected (code {code}): {message}")]
  LoginRejected { code: String, message: String },
  #[error("no active session token")]
  NoToken,
}

/// A statement could not be executed against the data connection.
#[derive(Debug, Clone, Error)]
#[error("query failed{}: {message}", code_suffix(.code))]
pub struct QueryExecutionError {
  pub code: Option<String>,
  pub message: String,
}

fn code_suffix(code: &Option<String>) -> String {
  code.as_deref().map(|c| format!(" (code {c})")).unwrap_or_default()
}

impl QueryExecutionError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { code: None, message: message.into() }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
  MissingToken,
  Transport,
  Timeout,
  HttpStatus,
  MalformedResponse,
}

/// A hint request failed. The caller restores the hint budget.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GatewayError {
  pub kind: GatewayErrorKind,
  pub http_status: Option<u16>,
  pub request_id: Option<String>,
  pub message: String,
}

impl GatewayError {
  pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
    Self { kind, http_status: None, request_id: None, message: message.into() }
  }

  pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
    self.request_id = request_id;
    self
  }
}

/// Rule violations of the quiz itself. None of these touch the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuizError {
  #[error("input is empty")]
  EmptyInput,
  #[error("hint budget exhausted ({max} of {max} used)")]
  BudgetExhausted { max: u32 },
  #[error("no attempts left ({max} used)")]
  AttemptsExhausted { max: u32 },
  #[error("quiz already cleared")]
  AlreadyCleared,
  #[error("sessionId is required")]
  MissingSession,
}

/// Failures while bringing the service up.
#[derive(Debug, Error)]
pub enum StartupError {
  #[error("configuration: {0}")]
  Config(#[from] ConfigError),
  #[error("data connection: {0}")]
  Connection(#[from] ConnectionError),
  #[error("http client: {0}")]
  HttpClient(#[from] reqwest::Error),
}

/// Everything a handler can fail with.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{message}")]
  Quiz { source: QuizError, message: String },
  #[error(transparent)]
  Gateway(#[from] GatewayError),
  #[error(transparent)]
  Query(#[from] QueryExecutionError),
  #[error(transparent)]
  Connection(#[from] ConnectionError),
}

impl ApiError {
  /// Quiz errors carry a user-facing message chosen by the caller.
  pub fn quiz(source: QuizError, message: impl Into<String>) -> Self {
    ApiError::Quiz { source, message: message.into() }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      ApiError::Quiz { source, .. } => match source {
        QuizError::EmptyInput => "empty_input",
        QuizError::BudgetExhausted { .. } => "budget_exhausted",
        QuizError::AttemptsExhausted { .. } => "attempts_exhausted",
        QuizError::AlreadyCleared => "already_cleared",
        QuizError::MissingSession => "missing_session",
      },
      ApiError::Gateway(_) => "gateway_error",
      ApiError::Query(_) => "query_execution_error",
      ApiError::Connection(_) => "connection_error",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::Quiz { source, .. } => match source {
        QuizError::EmptyInput | QuizError::MissingSession => StatusCode::BAD_REQUEST,
        QuizError::BudgetExhausted { .. }
        | QuizError::AttemptsExhausted { .. }
        | QuizError::AlreadyCleared => StatusCode::CONFLICT,
      },
      ApiError::Gateway(_) | ApiError::Query(_) => StatusCode::BAD_GATEWAY,
      ApiError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
  }

  pub fn request_id(&self) -> Option<&str> {
    match self {
      ApiError::Gateway(e) => e.request_id.as_deref(),
      _ => None,
    }
  }
}

#[derive(Serialize)]
pub struct ErrorBody<'a> {
  pub message: String,
  pub status: u16,
  pub kind: &'a str,
  #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
  pub request_id: Option<&'a str>,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> axum::response::Response {
    let status = self.status();
    let body = ErrorBody {
      message: self.to_string(),
      status: status.as_u16(),
      kind: self.kind(),
      request_id: self.request_id(),
    };
    let json = serde_json::to_value(&body).unwrap_or_default();
    (status, Json(json)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gateway_errors_map_to_bad_gateway_with_request_id() {
    let mut e = GatewayError::new(GatewayErrorKind::HttpStatus, "Failed request");
    e.http_status = Some(503);
    let api = ApiError::from(e.with_request_id(Some("req-1".into())));
    assert_eq!(api.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(api.request_id(), Some("req-1"));
    assert_eq!(api.kind(), "gateway_error");
  }

  #[test]
  fn budget_errors_are_conflicts() {
    let api = ApiError::quiz(QuizError::BudgetExhausted { max: 3 }, "上限です");
    assert_eq!(api.status(), StatusCode::CONFLICT);
    assert_eq!(api.to_string(), "上限です");
  }

  #[test]
  fn query_error_display_includes_code() {
    let e = QueryExecutionError { code: Some("002003".into()), message: "missing table".into() };
    assert_eq!(e.to_string(), "query failed (code 002003): missing table");
    assert_eq!(QueryExecutionError::new("x").to_string(), "query failed: x");
  }
}
