//! Prefecture Quiz · Backend
//!
//! - Axum HTTP + WebSocket API for a single trivia question
//! - Hints answered by Snowflake Cortex Analyst, with a per-session budget
//! - Static page fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT               : u16 (default 3000)
//!   QUIZ_CONFIG_PATH   : path to TOML config (quiz text, limits, messages, [snowflake] secrets)
//!   SNOWFLAKE_ACCOUNT / SNOWFLAKE_USER / SNOWFLAKE_PASSWORD : credentials when the
//!                        config has no [snowflake] section
//!   SNOWFLAKE_HOST, SNOWFLAKE_PORT, SNOWFLAKE_WAREHOUSE, SNOWFLAKE_ROLE,
//!   SNOWFLAKE_DATABASE, SNOWFLAKE_SCHEMA, SNOWFLAKE_STAGE,
//!   SNOWFLAKE_SEMANTIC_MODEL_FILE, SNOWFLAKE_REQUEST_TIMEOUT_SECS : optional overrides
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod session;
mod snowflake;
mod analyst;
mod state;
mod protocol;
mod logic;
mod routes;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Config, connection login and gateway. A failed login ends the process.
  let state = match AppState::from_env().await {
    Ok(s) => Arc::new(s),
    Err(e) => {
      error!(target: "prefecture_quiz", error = %e, "Startup failed");
      return Err(e.into());
    }
  };

  let app = build_router(state);

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "prefecture_quiz", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(target: "prefecture_quiz", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "prefecture_quiz", "Shutdown signal received");
}
