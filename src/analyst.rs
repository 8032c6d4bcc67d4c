//! Cortex Analyst gateway: forwards a hint question to the hosted
//! natural-language-to-SQL service and normalizes its answer into content blocks.
//!
//! Each `sql` item is executed against the same data connection that supplied the
//! token, so a hint with a query costs two round trips. Calls log status, request
//! id, latency and block counts, never the token.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::domain::ContentBlock;
use crate::error::{GatewayError, GatewayErrorKind};
use crate::snowflake::{authorization_header, DataConnection};
use crate::util::trunc_for_log;

pub const REQUEST_ID_HEADER: &str = "X-Snowflake-Request-Id";
const MESSAGE_PATH: &str = "/api/v2/cortex/analyst/message";

// --- Request envelope ---

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MessageRequest {
  pub messages: Vec<RequestMessage>,
  pub semantic_model_file: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RequestMessage {
  pub role: String,
  pub content: Vec<RequestContent>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestContent {
  Text { text: String },
}

impl MessageRequest {
  /// Wrap one user question in the service's message envelope.
  pub fn user_question(question: &str, semantic_model_file: &str) -> Self {
    Self {
      messages: vec![RequestMessage {
        role: "user".into(),
        content: vec![RequestContent::Text { text: question.to_string() }],
      }],
      semantic_model_file: semantic_model_file.to_string(),
    }
  }
}

// --- Response envelope ---

#[derive(Deserialize)]
struct MessageResponse {
  message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
  content: Vec<ResponseContent>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContent {
  Text { text: String },
  Sql { statement: String },
  Suggestions {
    #[serde(default)]
    suggestions: Vec<String>,
  },
  #[serde(other)]
  Unknown,
}

/// Normalized hint plus the service's correlation id.
#[derive(Clone, Debug)]
pub struct HintResponse {
  pub content: Vec<ContentBlock>,
  pub request_id: Option<String>,
}

// --- Transport seam ---

/// Raw HTTP reply of the analyst endpoint.
#[derive(Clone, Debug)]
pub struct TransportResponse {
  pub status: u16,
  pub request_id: Option<String>,
  pub body: String,
}

#[derive(Clone, Debug, Error)]
pub enum TransportError {
  #[error("request timed out: {0}")]
  Timeout(String),
  #[error("request failed: {0}")]
  Other(String),
}

#[async_trait]
pub trait AnalystTransport: Send + Sync {
  async fn post_message(
    &self,
    url: &str,
    authorization: &str,
    body: &MessageRequest,
  ) -> Result<TransportResponse, TransportError>;
}

/// HTTPS transport with a fixed upper bound on each call.
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { client })
  }
}

#[async_trait]
impl AnalystTransport for ReqwestTransport {
  async fn post_message(
    &self,
    url: &str,
    authorization: &str,
    body: &MessageRequest,
  ) -> Result<TransportResponse, TransportError> {
    let res = self.client.post(url)
      .header(USER_AGENT, concat!("prefecture-quiz/", env!("CARGO_PKG_VERSION")))
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, authorization)
      .json(body).send().await
      .map_err(|e| {
        if e.is_timeout() { TransportError::Timeout(e.to_string()) } else { TransportError::Other(e.to_string()) }
      })?;

    let status = res.status().as_u16();
    let request_id = res
      .headers()
      .get(REQUEST_ID_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::to_string);
    let body = res.text().await.map_err(|e| {
      if e.is_timeout() { TransportError::Timeout(e.to_string()) } else { TransportError::Other(e.to_string()) }
    })?;
    Ok(TransportResponse { status, request_id, body })
  }
}

// --- Gateway ---

#[derive(Clone)]
pub struct AnalystClient {
  transport: Arc<dyn AnalystTransport>,
  pub host: String,
  pub semantic_model_file: String,
}

impl AnalystClient {
  pub fn new(transport: Arc<dyn AnalystTransport>, host: String, semantic_model_file: String) -> Self {
    Self { transport, host, semantic_model_file }
  }

  pub fn message_url(&self) -> String {
    format!("https://{}{}", self.host, MESSAGE_PATH)
  }

  /// Ask the service one question. Budget accounting is the caller's job.
  #[instrument(level = "info", skip(self, question, conn), fields(question_len = question.len()))]
  pub async fn request_hint(
    &self,
    question: &str,
    conn: &dyn DataConnection,
  ) -> Result<HintResponse, GatewayError> {
    let token = conn
      .token()
      .await
      .map_err(|e| GatewayError::new(GatewayErrorKind::MissingToken, e.to_string()))?;

    let req = MessageRequest::user_question(question, &self.semantic_model_file);
    let start = std::time::Instant::now();
    let mut res = self.send(&req, &token).await?;
    if res.status == 401 {
      warn!(target: "analyst", request_id = ?res.request_id, "Analyst rejected the session token; refreshing");
      let token = conn
        .refresh_token(&token)
        .await
        .map_err(|e| GatewayError::new(GatewayErrorKind::MissingToken, e.to_string()))?;
      res = self.send(&req, &token).await?;
    }
    let elapsed = start.elapsed();

    let request_id = res.request_id.clone();
    if res.status >= 400 {
      error!(target: "analyst", ?elapsed, status = res.status, request_id = ?request_id, "Analyst returned an error status");
      let message = format!(
        "Failed request (id: {}) with status {}: {}",
        request_id.as_deref().unwrap_or("-"),
        res.status,
        trunc_for_log(&res.body, 500)
      );
      let mut err = GatewayError::new(GatewayErrorKind::HttpStatus, message).with_request_id(request_id);
      err.http_status = Some(res.status);
      return Err(err);
    }

    let parsed: MessageResponse = serde_json::from_str(&res.body).map_err(|e| {
      GatewayError::new(GatewayErrorKind::MalformedResponse, format!("unexpected analyst response: {}", e))
        .with_request_id(request_id.clone())
    })?;

    let content = normalize(parsed.message.content, conn).await;
    info!(target: "analyst", ?elapsed, request_id = ?request_id, blocks = content.len(), "Analyst hint received");
    Ok(HintResponse { content, request_id })
  }

  async fn send(&self, req: &MessageRequest, token: &str) -> Result<TransportResponse, GatewayError> {
    let start = std::time::Instant::now();
    self
      .transport
      .post_message(&self.message_url(), &authorization_header(token), req)
      .await
      .map_err(|e| {
        error!(target: "analyst", elapsed = ?start.elapsed(), error = %e, "Analyst call failed");
        let kind = match e {
          TransportError::Timeout(_) => GatewayErrorKind::Timeout,
          TransportError::Other(_) => GatewayErrorKind::Transport,
        };
        GatewayError::new(kind, e.to_string())
      })
  }
}

/// Map service items to content blocks in order, running each statement.
async fn normalize(items: Vec<ResponseContent>, conn: &dyn DataConnection) -> Vec<ContentBlock> {
  let mut blocks = Vec::with_capacity(items.len());
  for item in items {
    match item {
      ResponseContent::Text { text } => blocks.push(ContentBlock::Text { body: text }),
      ResponseContent::Sql { statement } => {
        let block = match conn.query(&statement).await {
          Ok(table) => ContentBlock::Query { statement, result_rows: Some(table), error: None },
          Err(e) => {
            warn!(target: "analyst", error = %e, "Hint statement failed to execute");
            ContentBlock::Query { statement, result_rows: None, error: Some(e.to_string()) }
          }
        };
        blocks.push(block);
      }
      ResponseContent::Suggestions { suggestions } => {
        let body = suggestions.iter().map(|s| format!("- {}", s)).collect::<Vec<_>>().join("\n");
        blocks.push(ContentBlock::Text { body });
      }
      ResponseContent::Unknown => warn!(target: "analyst", "Skipping unknown content item"),
    }
  }
  blocks
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Table;
  use crate::testing::{MockConnection, MockTransport};

  fn client(transport: Arc<MockTransport>) -> AnalystClient {
    AnalystClient::new(transport, "acct.snowflakecomputing.com".into(), "@DB.SC.ST/model.yaml".into())
  }

  #[test]
  fn request_envelope_matches_wire_format() {
    let req = MessageRequest::user_question("人口ランキングは？", "@DB.SC.ST/model.yaml");
    let v = serde_json::to_value(&req).unwrap();
    assert_eq!(
      v,
      serde_json::json!({
        "messages": [{"role": "user", "content": [{"type": "text", "text": "人口ランキングは？"}]}],
        "semantic_model_file": "@DB.SC.ST/model.yaml"
      })
    );
  }

  #[tokio::test]
  async fn text_and_sql_normalize_in_order_with_rows() {
    let transport = Arc::new(MockTransport::ok(
      r#"{"message":{"role":"analyst","content":[
          {"type":"text","text":"This is our interpretation"},
          {"type":"sql","statement":"SELECT NAME FROM T"}]}}"#,
      Some("req-42"),
    ));
    let table = Table { columns: vec!["NAME".into()], rows: vec![vec!["岡山県".into()]] };
    let conn = MockConnection::new("tok").with_table("SELECT NAME FROM T", table.clone());

    let res = client(transport.clone()).request_hint("上位は？", &conn).await.unwrap();

    assert_eq!(res.request_id.as_deref(), Some("req-42"));
    assert_eq!(
      res.content,
      vec![
        ContentBlock::Text { body: "This is our interpretation".into() },
        ContentBlock::Query { statement: "SELECT NAME FROM T".into(), result_rows: Some(table), error: None },
      ]
    );
    assert_eq!(conn.executed(), vec!["SELECT NAME FROM T".to_string()]);

    let (url, auth, body) = transport.last_request().unwrap();
    assert_eq!(url, "https://acct.snowflakecomputing.com/api/v2/cortex/analyst/message");
    assert_eq!(auth, "Snowflake Token=\"tok\"");
    assert_eq!(body.semantic_model_file, "@DB.SC.ST/model.yaml");
  }

  #[tokio::test]
  async fn error_status_keeps_status_and_request_id() {
    let transport = Arc::new(MockTransport::status(503, "unavailable", Some("req-9")));
    let conn = MockConnection::new("tok");
    let err = client(transport).request_hint("q", &conn).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::HttpStatus);
    assert_eq!(err.http_status, Some(503));
    assert_eq!(err.request_id.as_deref(), Some("req-9"));
    assert!(err.message.contains("status 503"));
  }

  #[tokio::test]
  async fn missing_token_fails_before_sending() {
    let transport = Arc::new(MockTransport::ok("{}", None));
    let conn = MockConnection::without_token();
    let err = client(transport.clone()).request_hint("q", &conn).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::MissingToken);
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn rejected_token_is_refreshed_once_and_retried() {
    let transport = Arc::new(MockTransport::sequence(vec![
      Ok(TransportResponse { status: 401, request_id: Some("r1".into()), body: "expired".into() }),
      Ok(TransportResponse {
        status: 200,
        request_id: Some("r2".into()),
        body: r#"{"message":{"content":[{"type":"text","text":"ok"}]}}"#.into(),
      }),
    ]));
    let conn = MockConnection::new("stale").with_refreshed_token("fresh");
    let res = client(transport.clone()).request_hint("q", &conn).await.unwrap();

    assert_eq!(res.request_id.as_deref(), Some("r2"));
    assert_eq!(transport.calls(), 2);
    assert_eq!(conn.refreshes(), 1);
    let (_, auth, _) = transport.last_request().unwrap();
    assert_eq!(auth, "Snowflake Token=\"fresh\"");
  }

  #[tokio::test]
  async fn failed_refresh_is_a_token_error() {
    let transport = Arc::new(MockTransport::status(401, "expired", Some("r1")));
    let conn = MockConnection::new("stale");
    let err = client(transport.clone()).request_hint("q", &conn).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::MissingToken);
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn second_rejection_is_not_retried_again() {
    let transport = Arc::new(MockTransport::status(401, "expired", Some("r1")));
    let conn = MockConnection::new("stale").with_refreshed_token("fresh");
    let err = client(transport.clone()).request_hint("q", &conn).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::HttpStatus);
    assert_eq!(err.http_status, Some(401));
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn malformed_body_is_typed() {
    let transport = Arc::new(MockTransport::ok(r#"{"message":{"content":[{"type":"text"}]}}"#, Some("r")));
    let conn = MockConnection::new("tok");
    let err = client(transport).request_hint("q", &conn).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::MalformedResponse);
    assert_eq!(err.request_id.as_deref(), Some("r"));
  }

  #[tokio::test]
  async fn timeouts_are_distinguished() {
    let transport = Arc::new(MockTransport::failing(TransportError::Timeout("30s elapsed".into())));
    let conn = MockConnection::new("tok");
    let err = client(transport).request_hint("q", &conn).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::Timeout);
    assert_eq!(err.http_status, None);
  }

  #[tokio::test]
  async fn failed_statement_is_reported_inline() {
    let transport = Arc::new(MockTransport::ok(
      r#"{"message":{"content":[{"type":"sql","statement":"SELECT BROKEN"},
          {"type":"suggestions","suggestions":["人口1位は？","人口20位は？"]},
          {"type":"chart","spec":{}}]}}"#,
      None,
    ));
    let conn = MockConnection::new("tok");
    let res = client(transport).request_hint("q", &conn).await.unwrap();
    assert_eq!(res.content.len(), 2);
    match &res.content[0] {
      ContentBlock::Query { result_rows, error, .. } => {
        assert!(result_rows.is_none());
        assert!(error.as_deref().unwrap_or_default().contains("SELECT BROKEN"));
      }
      other => panic!("expected query block, got {:?}", other),
    }
    assert_eq!(res.content[1], ContentBlock::Text { body: "- 人口1位は？\n- 人口20位は？".into() });
  }
}
