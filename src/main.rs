//! TaskForge · Practice-Task Generation Backend
//!
//! - Axum HTTP + WebSocket API over per-module topic inventories and tasks
//! - Coverage-planned generation with a three-tier duplicate cascade
//! - Optional OpenAI integration (via environment variables), offline templates otherwise
//!
//! Important env variables:
//!   PORT              : u16 (default 3000)
//!   OPENAI_API_KEY    : enables OpenAI integration if present
//!   OPENAI_BASE_URL   : default "https://api.openai.com/v1"
//!   OPENAI_MODEL      : default "gpt-4o-mini"
//!   AGENT_CONFIG_PATH : path to TOML config (prompts, tuning, aliases, module bank)
//!   LOG_LEVEL         : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT        : "pretty" (default), "compact" or "json"

mod telemetry;
mod util;
mod text;
mod domain;
mod config;
mod error;
mod archetype;
mod features;
mod fingerprint;
mod similarity;
mod dedup;
mod blueprint;
mod completion;
mod openai;
mod generator;
mod seeds;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: module store, fingerprint cache, completion provider, config.
  let state = Arc::new(AppState::new());

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "taskforge_backend", %addr, provider = %state.completion.name(), "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "taskforge_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "taskforge_backend", error = %e, "Failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!(target: "taskforge_backend", "Shutdown signal received");
}
