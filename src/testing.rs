//! Test doubles for the analyst transport and the data connection.

use std::{
  collections::{HashMap, VecDeque},
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
  },
};

use async_trait::async_trait;

use crate::analyst::{AnalystClient, AnalystTransport, MessageRequest, TransportError, TransportResponse};
use crate::config::AppConfig;
use crate::domain::Table;
use crate::error::{ConnectionError, QueryExecutionError};
use crate::snowflake::DataConnection;
use crate::state::AppState;

type Reply = Result<TransportResponse, TransportError>;

/// Canned analyst replies, served in order with the last one repeated. Counts
/// calls and keeps the last request.
pub struct MockTransport {
  replies: Mutex<VecDeque<Reply>>,
  calls: AtomicUsize,
  last: Mutex<Option<(String, String, MessageRequest)>>,
}

impl MockTransport {
  pub fn ok(body: &str, request_id: Option<&str>) -> Self {
    Self::status(200, body, request_id)
  }

  pub fn status(status: u16, body: &str, request_id: Option<&str>) -> Self {
    Self::sequence(vec![Ok(TransportResponse {
      status,
      request_id: request_id.map(str::to_string),
      body: body.to_string(),
    })])
  }

  pub fn failing(err: TransportError) -> Self {
    Self::sequence(vec![Err(err)])
  }

  pub fn sequence(replies: Vec<Reply>) -> Self {
    Self { replies: Mutex::new(replies.into()), calls: AtomicUsize::new(0), last: Mutex::new(None) }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn last_request(&self) -> Option<(String, String, MessageRequest)> {
    self.last.lock().unwrap().clone()
  }
}

#[async_trait]
impl AnalystTransport for MockTransport {
  async fn post_message(
    &self,
    url: &str,
    authorization: &str,
    body: &MessageRequest,
  ) -> Result<TransportResponse, TransportError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    *self.last.lock().unwrap() = Some((url.to_string(), authorization.to_string(), body.clone()));
    let mut replies = self.replies.lock().unwrap();
    if replies.len() > 1 {
      replies.pop_front().unwrap()
    } else {
      replies.front().cloned().unwrap()
    }
  }
}

/// Data connection answering from a fixed statement -> table map.
pub struct MockConnection {
  token: Mutex<Option<String>>,
  refreshed: Option<String>,
  refreshes: AtomicUsize,
  tables: HashMap<String, Table>,
  executed: Mutex<Vec<String>>,
}

impl MockConnection {
  pub fn new(token: &str) -> Self {
    Self::with_token(Some(token.to_string()))
  }

  pub fn without_token() -> Self {
    Self::with_token(None)
  }

  fn with_token(token: Option<String>) -> Self {
    Self {
      token: Mutex::new(token),
      refreshed: None,
      refreshes: AtomicUsize::new(0),
      tables: HashMap::new(),
      executed: Mutex::new(Vec::new()),
    }
  }

  /// Token handed out by the next re-login. Without one, re-login fails.
  pub fn with_refreshed_token(mut self, token: &str) -> Self {
    self.refreshed = Some(token.to_string());
    self
  }

  pub fn with_table(mut self, sql: &str, table: Table) -> Self {
    self.tables.insert(sql.to_string(), table);
    self
  }

  pub fn executed(&self) -> Vec<String> {
    self.executed.lock().unwrap().clone()
  }

  pub fn refreshes(&self) -> usize {
    self.refreshes.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl DataConnection for MockConnection {
  async fn token(&self) -> Result<String, ConnectionError> {
    self.token.lock().unwrap().clone().ok_or(ConnectionError::NoToken)
  }

  async fn refresh_token(&self, stale: &str) -> Result<String, ConnectionError> {
    let mut token = self.token.lock().unwrap();
    if token.as_deref() != Some(stale) {
      return token.clone().ok_or(ConnectionError::NoToken);
    }
    self.refreshes.fetch_add(1, Ordering::SeqCst);
    match &self.refreshed {
      Some(fresh) => {
        *token = Some(fresh.clone());
        Ok(fresh.clone())
      }
      None => {
        *token = None;
        Err(ConnectionError::LoginRejected { code: "390100".into(), message: "login failed".into() })
      }
    }
  }

  async fn query(&self, sql: &str) -> Result<Table, QueryExecutionError> {
    self.executed.lock().unwrap().push(sql.to_string());
    self.tables
      .get(sql)
      .cloned()
      .ok_or_else(|| QueryExecutionError::new(format!("no canned result for `{}`", sql)))
  }
}

/// App state wired to mocks, with default quiz settings.
pub fn test_state(transport: Arc<MockTransport>, conn: MockConnection) -> AppState {
  let config = AppConfig::default();
  let analyst = AnalystClient::new(transport, "test.snowflakecomputing.com".into(), "@DB.SC.ST/model.yaml".into());
  AppState::new(config, Arc::new(conn), analyst)
}
