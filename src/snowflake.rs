//! Data connection: session token for the analyst service and synchronous SQL
//! execution, over Snowflake's connector REST endpoints.
//!
//! The token lives in memory only and is never logged. One connection is shared
//! by all sessions; its mutex serializes statements so requests never interleave.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ConnectionSettings;
use crate::domain::Table;
use crate::error::{ConnectionError, QueryExecutionError};

const CLIENT_APP_ID: &str = "prefecture-quiz";
const SESSION_EXPIRED_CODE: &str = "390112";
const QUERY_IN_PROGRESS_CODE: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC_CODE: &str = "333334";

/// What the quiz needs from the warehouse.
#[async_trait]
pub trait DataConnection: Send + Sync {
  /// Current session token, used to authenticate analyst calls.
  async fn token(&self) -> Result<String, ConnectionError>;
  /// Log in again after `stale` was rejected and return the new token. If another
  /// caller already replaced `stale`, its token is returned without a new login.
  async fn refresh_token(&self, stale: &str) -> Result<String, ConnectionError>;
  /// Run `sql` and return every row.
  async fn query(&self, sql: &str) -> Result<Table, QueryExecutionError>;
}

/// `Authorization` header value for a Snowflake session token.
pub fn authorization_header(token: &str) -> String {
  format!("Snowflake Token=\"{}\"", token)
}

pub struct SnowflakeConnection {
  client: reqwest::Client,
  settings: ConnectionSettings,
  session: Mutex<SessionHandle>,
}

struct SessionHandle {
  token: String,
  sequence: u64,
}

impl SnowflakeConnection {
  /// Log in and keep the session token.
  #[instrument(level = "info", skip_all, fields(account = %settings.account, host = %settings.host))]
  pub async fn connect(settings: ConnectionSettings) -> Result<Self, ConnectionError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(60))
      .build()
      .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

    let token = login(&client, &settings).await?;
    info!(target: "snowflake", account = %settings.account, warehouse = %settings.warehouse, role = %settings.role, "Snowflake session established");

    Ok(Self { client, settings, session: Mutex::new(SessionHandle { token, sequence: 0 }) })
  }

  fn base_url(&self) -> String {
    base_url(&self.settings)
  }

  /// Replace the session token. A failed login drops the token, which makes the
  /// connection unusable until the process restarts.
  async fn relogin(&self, handle: &mut SessionHandle) -> Result<(), ConnectionError> {
    match login(&self.client, &self.settings).await {
      Ok(token) => {
        handle.token = token;
        info!(target: "snowflake", "Snowflake session renewed");
        Ok(())
      }
      Err(e) => {
        handle.token.clear();
        error!(target: "snowflake", error = %e, "Snowflake re-login failed; connection lost");
        Err(e)
      }
    }
  }

  async fn run_statement(
    &self,
    handle: &mut SessionHandle,
    sql: &str,
  ) -> Result<QueryResponse, QueryExecutionError> {
    handle.sequence += 1;
    let req = QueryRequest {
      sql_text: sql,
      async_exec: false,
      sequence_id: handle.sequence,
      query_submission_time: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default(),
    };
    let url = format!("{}/queries/v1/query-request", self.base_url());
    let res = self.client.post(&url)
      .query(&[("requestId", Uuid::new_v4().to_string())])
      .header(USER_AGENT, user_agent())
      .header(CONTENT_TYPE, "application/json")
      .header(ACCEPT, "application/snowflake")
      .header(AUTHORIZATION, authorization_header(&handle.token))
      .json(&req).send().await
      .map_err(|e| QueryExecutionError::new(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      return Err(QueryExecutionError::new(format!("Snowflake HTTP {}: {}", status, body)));
    }

    res.json::<QueryResponse>().await.map_err(|e| QueryExecutionError::new(format!("invalid query response: {}", e)))
  }
}

#[async_trait]
impl DataConnection for SnowflakeConnection {
  async fn token(&self) -> Result<String, ConnectionError> {
    let handle = self.session.lock().await;
    if handle.token.is_empty() {
      return Err(ConnectionError::NoToken);
    }
    Ok(handle.token.clone())
  }

  #[instrument(level = "info", skip_all)]
  async fn refresh_token(&self, stale: &str) -> Result<String, ConnectionError> {
    let mut handle = self.session.lock().await;
    if handle.token.is_empty() {
      return Err(ConnectionError::NoToken);
    }
    if handle.token == stale {
      warn!(target: "snowflake", "Session token rejected; logging in again");
      self.relogin(&mut handle).await?;
    }
    Ok(handle.token.clone())
  }

  #[instrument(level = "info", skip(self, sql), fields(sql_len = sql.len()))]
  async fn query(&self, sql: &str) -> Result<Table, QueryExecutionError> {
    let mut handle = self.session.lock().await;
    if handle.token.is_empty() {
      return Err(QueryExecutionError::new(ConnectionError::NoToken.to_string()));
    }
    let start = std::time::Instant::now();

    let mut resp = self.run_statement(&mut handle, sql).await?;
    if !resp.success && resp.code.as_deref() == Some(SESSION_EXPIRED_CODE) {
      warn!(target: "snowflake", "Session token expired; logging in again");
      self
        .relogin(&mut handle)
        .await
        .map_err(|e| QueryExecutionError::new(e.to_string()))?;
      resp = self.run_statement(&mut handle, sql).await?;
    }

    let elapsed = start.elapsed();
    match table_from_response(resp) {
      Ok(table) => {
        info!(target: "snowflake", ?elapsed, rows = table.rows.len(), columns = table.columns.len(), "Statement executed");
        Ok(table)
      }
      Err(err) => {
        error!(target: "snowflake", ?elapsed, error = %err, "Statement failed");
        Err(err)
      }
    }
  }
}

/// Rows of a completed statement. Failures, statements still running past the
/// synchronous window and chunked results are errors, never an empty table.
fn table_from_response(resp: QueryResponse) -> Result<Table, QueryExecutionError> {
  if !resp.success {
    return Err(QueryExecutionError {
      code: resp.code,
      message: resp.message.unwrap_or_else(|| "unknown error".into()),
    });
  }
  if matches!(resp.code.as_deref(), Some(QUERY_IN_PROGRESS_CODE | QUERY_IN_PROGRESS_ASYNC_CODE)) {
    return Err(QueryExecutionError {
      code: resp.code,
      message: "statement is still running; no rows available yet".into(),
    });
  }
  let Some(data) = resp.data else {
    return Ok(Table::default());
  };
  if !data.chunks.is_empty() {
    return Err(QueryExecutionError::new(format!(
      "result is split into {} chunks; narrow the query",
      data.chunks.len()
    )));
  }
  Ok(data.into_table())
}

fn base_url(settings: &ConnectionSettings) -> String {
  format!("https://{}:{}", settings.host, settings.port)
}

fn user_agent() -> String {
  format!("{}/{}", CLIENT_APP_ID, env!("CARGO_PKG_VERSION"))
}

async fn login(client: &reqwest::Client, settings: &ConnectionSettings) -> Result<String, ConnectionError> {
  let url = format!("{}/session/v1/login-request", base_url(settings));
  let req = LoginRequest {
    data: LoginData {
      client_app_id: CLIENT_APP_ID,
      client_app_version: env!("CARGO_PKG_VERSION"),
      account_name: &settings.account,
      login_name: &settings.user,
      password: &settings.password,
    },
  };

  let res = client.post(&url)
    .query(&[
      ("request_id", Uuid::new_v4().to_string()),
      ("warehouse", settings.warehouse.clone()),
      ("roleName", settings.role.clone()),
      ("databaseName", settings.database.clone()),
      ("schemaName", settings.schema.clone()),
    ])
    .header(USER_AGENT, user_agent())
    .header(CONTENT_TYPE, "application/json")
    .header(ACCEPT, "application/json")
    .json(&req).send().await
    .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

  if !res.status().is_success() {
    let status = res.status();
    return Err(ConnectionError::Unreachable(format!("login HTTP {}", status)));
  }

  let body: LoginResponse = res.json().await.map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
  parse_login(body)
}

fn parse_login(body: LoginResponse) -> Result<String, ConnectionError> {
  match body.data.and_then(|d| d.token) {
    Some(token) if body.success && !token.is_empty() => Ok(token),
    _ => Err(ConnectionError::LoginRejected {
      code: body.code.unwrap_or_else(|| "unknown".into()),
      message: body.message.unwrap_or_else(|| "login failed".into()),
    }),
  }
}

// --- Wire DTOs ---

#[derive(Serialize)]
struct LoginRequest<'a> { data: LoginData<'a> }

#[derive(Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginData<'a> {
  client_app_id: &'a str,
  client_app_version: &'a str,
  account_name: &'a str,
  login_name: &'a str,
  password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
  #[serde(default)] data: Option<LoginResponseData>,
  #[serde(default)] code: Option<String>,
  #[serde(default)] message: Option<String>,
  #[serde(default)] success: bool,
}
#[derive(Deserialize)]
struct LoginResponseData { #[serde(default)] token: Option<String> }

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
  sql_text: &'a str,
  async_exec: bool,
  sequence_id: u64,
  query_submission_time: u64,
}

#[derive(Deserialize)]
struct QueryResponse {
  #[serde(default)] data: Option<QueryData>,
  #[serde(default)] code: Option<String>,
  #[serde(default)] message: Option<String>,
  #[serde(default)] success: bool,
}

#[derive(Deserialize)]
struct QueryData {
  #[serde(default)] rowtype: Vec<RowType>,
  #[serde(default)] rowset: Vec<Vec<serde_json::Value>>,
  /// Remote result chunks of a large result set; only the first part is inline.
  #[serde(default)] chunks: Vec<serde_json::Value>,
}
#[derive(Deserialize)]
struct RowType { name: String }

impl QueryData {
  fn into_table(self) -> Table {
    Table {
      columns: self.rowtype.into_iter().map(|r| r.name).collect(),
      rows: self.rowset,
    }
  }
}
