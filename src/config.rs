//! Loading quiz configuration (quiz text, limits, feedback messages, optional
//! Snowflake secrets) from TOML, and resolving connection settings.
//!
//! See `AppConfig`, `Messages` and `ConnectionSettings` for the expected schema.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::QuizRules;
use crate::error::ConfigError;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub quiz: QuizSettings,
  #[serde(default)]
  pub messages: Messages,
  /// Secrets section. When present it replaces the SNOWFLAKE_* environment entirely.
  #[serde(default)]
  pub snowflake: Option<SnowflakeSecrets>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QuizSettings {
  pub title: String,
  pub question: String,
  pub correct_answer: String,
  pub answer_placeholder: String,
  pub hint_placeholder: String,
  pub max_hints: u32,
  pub max_attempts: u32,
  pub sample_caption: String,
  pub sample_query: String,
}

impl Default for QuizSettings {
  fn default() -> Self {
    Self {
      title: "都道府県人口クイズ".into(),
      question: "問題：2020年の都道府県の人口で20位の都道府県は？".into(),
      correct_answer: "岡山県".into(),
      answer_placeholder: "都道府県名を入力してください（例：東京都、大阪府、青森県など）".into(),
      hint_placeholder: "Cortex Analystに質問してヒントを得る（例：「2020年の人口ランキング15位から25位を表示して」）".into(),
      max_hints: 3,
      max_attempts: 5,
      sample_caption: "データサンプル（PREPPER_OPEN_DATA_BANK__JAPANESE_CITY_DATA.E_PODB.E_CI_FD20）".into(),
      sample_query: "SELECT * FROM SNOWFLAKE_LEARNING_DB.CORTEX_ANALYST_DEMO.J_CI_FD20 LIMIT 5".into(),
    }
  }
}

impl QuizSettings {
  pub fn rules(&self) -> QuizRules {
    QuizRules { max_hints: self.max_hints, max_attempts: self.max_attempts }
  }
}

/// User-facing feedback templates. Placeholders: `{answer}`, `{remaining}`, `{max}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Messages {
  pub correct: String,
  pub incorrect: String,
  pub hints_left: String,
  pub already_cleared: String,
  pub attempts_exhausted: String,
  pub empty_answer: String,
  pub empty_question: String,
  pub hint_budget_reached: String,
  pub hints_closed: String,
  pub sample_failed: String,
}

impl Default for Messages {
  fn default() -> Self {
    Self {
      correct: "正解です！2020年の人口20位は{answer}でした！".into(),
      incorrect: "残念！「{answer}」は不正解です。もう一度考えてみましょう。".into(),
      hints_left: "ヒントをあと{remaining}回使用できます。".into(),
      already_cleared: "ゲーム終了！すでに正解しています。".into(),
      attempts_exhausted: "回答回数の上限（{max}回）に達しました。リセットしてください。".into(),
      empty_answer: "回答を入力してください".into(),
      empty_question: "質問を入力してください".into(),
      hint_budget_reached: "ヒントの使用回数が上限に達しました".into(),
      hints_closed: "ゲームが終了しているためヒントは使用できません".into(),
      sample_failed: "サンプルデータの取得に失敗しました".into(),
    }
  }
}

/// `[snowflake]` section of the secrets file. Unset optional fields fall back to defaults.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct SnowflakeSecrets {
  pub account: Option<String>,
  pub user: Option<String>,
  pub password: Option<String>,
  #[serde(default)] pub host: Option<String>,
  #[serde(default)] pub port: Option<u16>,
  #[serde(default)] pub warehouse: Option<String>,
  #[serde(default)] pub role: Option<String>,
  #[serde(default)] pub database: Option<String>,
  #[serde(default)] pub schema: Option<String>,
  #[serde(default)] pub stage: Option<String>,
  #[serde(default)] pub semantic_model_file: Option<String>,
  #[serde(default)] pub request_timeout_secs: Option<u64>,
}

pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_WAREHOUSE: &str = "COMPUTE_WH";
pub const DEFAULT_ROLE: &str = "ACCOUNTADMIN";
pub const DEFAULT_DATABASE: &str = "SNOWFLAKE_LEARNING_DB";
pub const DEFAULT_SCHEMA: &str = "CORTEX_ANALYST_DEMO";
pub const DEFAULT_STAGE: &str = "RAW_DATA";
pub const DEFAULT_SEMANTIC_MODEL_FILE: &str = "semantic_model_J_CI_FD20.yaml";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fully resolved connection settings. Built once at startup.
#[derive(Clone)]
pub struct ConnectionSettings {
  pub account: String,
  pub user: String,
  pub password: String,
  pub host: String,
  pub port: u16,
  pub warehouse: String,
  pub role: String,
  pub database: String,
  pub schema: String,
  pub stage: String,
  pub semantic_model_file: String,
  pub request_timeout: Duration,
}

impl std::fmt::Debug for ConnectionSettings {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectionSettings")
      .field("account", &self.account)
      .field("user", &self.user)
      .field("host", &self.host)
      .field("port", &self.port)
      .field("warehouse", &self.warehouse)
      .field("role", &self.role)
      .field("database", &self.database)
      .field("schema", &self.schema)
      .finish_non_exhaustive()
  }
}

impl ConnectionSettings {
  /// `@DATABASE.SCHEMA.STAGE/file` reference to the semantic model on its stage.
  pub fn semantic_model_ref(&self) -> String {
    format!("@{}.{}.{}/{}", self.database, self.schema, self.stage, self.semantic_model_file)
  }

  /// Resolve from the secrets section when present, otherwise from `env`.
  /// All defaults live here.
  pub fn resolve(
    secrets: Option<&SnowflakeSecrets>,
    env: impl Fn(&str) -> Option<String>,
  ) -> Result<Self, ConfigError> {
    let s = match secrets {
      Some(s) => s.clone(),
      None => secrets_from_env(&env)?,
    };

    let account = required(s.account, "account")?;
    let user = required(s.user, "user")?;
    let password = required(s.password, "password")?;
    let host = s
      .host
      .filter(|h| !h.trim().is_empty())
      .unwrap_or_else(|| format!("{}.snowflakecomputing.com", account));

    Ok(Self {
      account,
      user,
      password,
      host,
      port: s.port.unwrap_or(DEFAULT_PORT),
      warehouse: s.warehouse.unwrap_or_else(|| DEFAULT_WAREHOUSE.into()),
      role: s.role.unwrap_or_else(|| DEFAULT_ROLE.into()),
      database: s.database.unwrap_or_else(|| DEFAULT_DATABASE.into()),
      schema: s.schema.unwrap_or_else(|| DEFAULT_SCHEMA.into()),
      stage: s.stage.unwrap_or_else(|| DEFAULT_STAGE.into()),
      semantic_model_file: s
        .semantic_model_file
        .unwrap_or_else(|| DEFAULT_SEMANTIC_MODEL_FILE.into()),
      request_timeout: Duration::from_secs(
        s.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
      ),
    })
  }
}

fn required(v: Option<String>, field: &'static str) -> Result<String, ConfigError> {
  v.filter(|s| !s.trim().is_empty()).ok_or(ConfigError::Missing(field))
}

fn secrets_from_env(env: &impl Fn(&str) -> Option<String>) -> Result<SnowflakeSecrets, ConfigError> {
  let port = match env("SNOWFLAKE_PORT") {
    Some(p) => Some(p.parse::<u16>().map_err(|_| ConfigError::Invalid { field: "port", value: p })?),
    None => None,
  };
  let request_timeout_secs = match env("SNOWFLAKE_REQUEST_TIMEOUT_SECS") {
    Some(t) => Some(
      t.parse::<u64>()
        .map_err(|_| ConfigError::Invalid { field: "request_timeout_secs", value: t })?,
    ),
    None => None,
  };
  Ok(SnowflakeSecrets {
    account: env("SNOWFLAKE_ACCOUNT"),
    user: env("SNOWFLAKE_USER"),
    password: env("SNOWFLAKE_PASSWORD"),
    host: env("SNOWFLAKE_HOST"),
    port,
    warehouse: env("SNOWFLAKE_WAREHOUSE"),
    role: env("SNOWFLAKE_ROLE"),
    database: env("SNOWFLAKE_DATABASE"),
    schema: env("SNOWFLAKE_SCHEMA"),
    stage: env("SNOWFLAKE_STAGE"),
    semantic_model_file: env("SNOWFLAKE_SEMANTIC_MODEL_FILE"),
    request_timeout_secs,
  })
}

/// Load `AppConfig` from QUIZ_CONFIG_PATH. `Ok(None)` when the variable is unset;
/// a set path that cannot be read or parsed is an error.
pub fn load_app_config_from_env() -> Result<Option<AppConfig>, ConfigError> {
  match std::env::var("QUIZ_CONFIG_PATH") {
    Ok(path) => load_app_config(&path).map(Some),
    Err(_) => {
      info!(target: "prefecture_quiz", "QUIZ_CONFIG_PATH not set; using built-in quiz config");
      Ok(None)
    }
  }
}

pub fn load_app_config(path: &str) -> Result<AppConfig, ConfigError> {
  let text = std::fs::read_to_string(path).map_err(|e| {
    error!(target: "prefecture_quiz", %path, error = %e, "Failed to read TOML config file");
    ConfigError::File { path: path.to_string(), message: e.to_string() }
  })?;
  let cfg = toml::from_str::<AppConfig>(&text).map_err(|e| {
    error!(target: "prefecture_quiz", %path, error = %e, "Failed to parse TOML config");
    ConfigError::Parse { path: path.to_string(), message: e.to_string() }
  })?;
  info!(target: "prefecture_quiz", %path, has_secrets = cfg.snowflake.is_some(), "Loaded quiz config (TOML)");
  Ok(cfg)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
      pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |k: &str| map.get(k).cloned()
  }

  #[test]
  fn env_resolution_fills_defaults() {
    let env = env_of(&[
      ("SNOWFLAKE_ACCOUNT", "ab12345"),
      ("SNOWFLAKE_USER", "quiz"),
      ("SNOWFLAKE_PASSWORD", "secret"),
    ]);
    let s = ConnectionSettings::resolve(None, env).unwrap();
    assert_eq!(s.host, "ab12345.snowflakecomputing.com");
    assert_eq!(s.port, 443);
    assert_eq!(s.warehouse, "COMPUTE_WH");
    assert_eq!(s.role, "ACCOUNTADMIN");
    assert_eq!(s.request_timeout, Duration::from_secs(30));
    assert_eq!(
      s.semantic_model_ref(),
      "@SNOWFLAKE_LEARNING_DB.CORTEX_ANALYST_DEMO.RAW_DATA/semantic_model_J_CI_FD20.yaml"
    );
  }

  #[test]
  fn secrets_section_wins_over_env() {
    let secrets = SnowflakeSecrets {
      account: Some("acct".into()),
      user: Some("u".into()),
      password: Some("p".into()),
      host: Some("custom.example.com".into()),
      role: Some("ANALYST".into()),
      ..Default::default()
    };
    let env = env_of(&[("SNOWFLAKE_ROLE", "SYSADMIN"), ("SNOWFLAKE_PORT", "8443")]);
    let s = ConnectionSettings::resolve(Some(&secrets), env).unwrap();
    assert_eq!(s.host, "custom.example.com");
    assert_eq!(s.role, "ANALYST");
    assert_eq!(s.port, 443);
  }

  #[test]
  fn missing_credentials_are_reported_by_field() {
    let env = env_of(&[("SNOWFLAKE_ACCOUNT", "a"), ("SNOWFLAKE_USER", "u")]);
    let err = ConnectionSettings::resolve(None, env).unwrap_err();
    assert!(matches!(err, ConfigError::Missing("password")));
  }

  #[test]
  fn bad_port_is_invalid() {
    let env = env_of(&[("SNOWFLAKE_PORT", "https")]);
    let err = ConnectionSettings::resolve(None, env).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "port", .. }));
  }

  #[test]
  fn toml_overrides_quiz_settings_partially() {
    let cfg: AppConfig = toml::from_str(
      r#"
      [quiz]
      max_hints = 2

      [messages]
      correct = "Correct!"

      [snowflake]
      account = "a"
      user = "u"
      password = "p"
      "#,
    )
    .unwrap();
    assert_eq!(cfg.quiz.max_hints, 2);
    assert_eq!(cfg.quiz.correct_answer, "岡山県");
    assert_eq!(cfg.messages.correct, "Correct!");
    assert_eq!(cfg.messages.empty_answer, "回答を入力してください");
    assert_eq!(cfg.snowflake.and_then(|s| s.account).as_deref(), Some("a"));
  }

  fn temp_config(contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("quiz-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
  }

  #[test]
  fn malformed_toml_is_a_parse_error() {
    let path = temp_config("[quiz]\nmax_hints = \"three\"\n[snowflake\n");
    let err = load_app_config(path.to_str().unwrap()).unwrap_err();
    std::fs::remove_file(&path).ok();
    assert!(matches!(err, ConfigError::Parse { .. }), "got {:?}", err);
  }

  #[test]
  fn unreadable_path_is_a_file_error() {
    let path = std::env::temp_dir().join(format!("missing-{}.toml", uuid::Uuid::new_v4()));
    let err = load_app_config(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, ConfigError::File { .. }));
  }

  #[test]
  fn config_file_loads_from_disk() {
    let path = temp_config("[quiz]\ncorrect_answer = \"熊本県\"\n");
    let cfg = load_app_config(path.to_str().unwrap()).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(cfg.quiz.correct_answer, "熊本県");
    assert!(cfg.snowflake.is_none());
  }
}
