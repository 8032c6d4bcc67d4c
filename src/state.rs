//! Application state: the session store, the shared data connection, the analyst
//! gateway, and quiz text/messages.
//!
//! Built once at startup and handed to every handler behind an `Arc`.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::analyst::{AnalystClient, ReqwestTransport};
use crate::config::{load_app_config_from_env, AppConfig, ConnectionSettings, Messages, QuizSettings};
use crate::error::StartupError;
use crate::session::SessionStore;
use crate::snowflake::{DataConnection, SnowflakeConnection};

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub connection: Arc<dyn DataConnection>,
    pub analyst: AnalystClient,
    pub quiz: QuizSettings,
    pub messages: Messages,
}

impl AppState {
    pub fn new(config: AppConfig, connection: Arc<dyn DataConnection>, analyst: AnalystClient) -> Self {
        Self {
            sessions: SessionStore::new(config.quiz.rules()),
            connection,
            analyst,
            quiz: config.quiz,
            messages: config.messages,
        }
    }

    /// Build state from env: load config, resolve connection settings, log in,
    /// and set up the analyst gateway. Any failure here is fatal.
    #[instrument(level = "info", skip_all)]
    pub async fn from_env() -> Result<Self, StartupError> {
        let config = load_app_config_from_env()?.unwrap_or_default();

        let source = if config.snowflake.is_some() { "secrets" } else { "environment" };
        let settings = ConnectionSettings::resolve(config.snowflake.as_ref(), |k| std::env::var(k).ok())?;
        info!(target: "prefecture_quiz", %source, ?settings, "Resolved connection settings");

        let transport = ReqwestTransport::new(settings.request_timeout)?;
        let analyst = AnalystClient::new(
            Arc::new(transport),
            settings.host.clone(),
            settings.semantic_model_ref(),
        );

        let connection = SnowflakeConnection::connect(settings).await?;

        info!(
            target: "quiz",
            max_hints = config.quiz.max_hints,
            max_attempts = config.quiz.max_attempts,
            semantic_model = %analyst.semantic_model_file,
            "Quiz ready"
        );

        Ok(Self::new(config, Arc::new(connection), analyst))
    }
}
