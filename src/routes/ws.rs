//! WebSocket upgrade + message loop.
//!
//! A connection runs at most one generation at a time. The run is spawned so
//! the loop keeps reading (`cancel` must get through while items are being
//! generated); progress events and the final result go out through a single
//! writer task. Disconnecting cancels the run between items.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::logic::generate_for_module;
use crate::protocol::{ClientWsMessage, GenerateIn, ServerWsMessage};
use crate::state::AppState;

struct RunningGeneration {
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

impl RunningGeneration {
  fn is_active(&self) -> bool {
    !self.handle.is_finished()
  }
}

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "taskforge_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
  info!(target: "taskforge_backend", "WebSocket connected");
  let (mut sink, mut stream) = socket.split();
  let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerWsMessage>();

  let writer = tokio::spawn(async move {
    while let Some(msg) = out_rx.recv().await {
      let out = serde_json::to_string(&msg).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
      });
      if let Err(e) = sink.send(Message::Text(out)).await {
        error!(target: "taskforge_backend", error = %e, "WS send error");
        break;
      }
    }
  });

  let mut running: Option<RunningGeneration> = None;
  while let Some(Ok(msg)) = stream.next().await {
    match msg {
      Message::Text(txt) => {
        let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "taskforge_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state, &out_tx, &mut running)
          }
          Err(e) => Some(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }),
        };
        if let Some(reply) = reply {
          if out_tx.send(reply).is_err() {
            break;
          }
        }
      }
      Message::Close(_) => break,
      _ => {}
    }
  }

  if let Some(run) = running.filter(RunningGeneration::is_active) {
    warn!(target: "generation", "WebSocket closed mid-run; cancelling generation");
    run.cancel.cancel();
  }
  // The writer ends once the last sender (ours or the run's) is gone.
  drop(out_tx);
  let _ = writer.await;
  info!(target: "taskforge_backend", "WebSocket disconnected");
}

/// Returns the immediate reply, if any. Generation replies arrive later.
fn handle_client_ws(
  msg: ClientWsMessage,
  state: &Arc<AppState>,
  out_tx: &UnboundedSender<ServerWsMessage>,
  running: &mut Option<RunningGeneration>,
) -> Option<ServerWsMessage> {
  match msg {
    ClientWsMessage::Ping => Some(ServerWsMessage::Pong),

    ClientWsMessage::Generate { module_id, request } => {
      if running.as_ref().is_some_and(RunningGeneration::is_active) {
        return Some(ServerWsMessage::Error { message: "A generation is already running on this connection.".into() });
      }
      info!(target: "generation", %module_id, count = request.count, "WS generate started");
      *running = Some(spawn_generation(state.clone(), module_id, request, out_tx.clone()));
      None
    }

    ClientWsMessage::Cancel => match running.as_ref().filter(|r| r.is_active()) {
      Some(run) => {
        run.cancel.cancel();
        info!(target: "generation", "WS cancel requested");
        Some(ServerWsMessage::Cancelling)
      }
      None => Some(ServerWsMessage::Error { message: "No generation is running.".into() }),
    },
  }
}

fn spawn_generation(
  state: Arc<AppState>,
  module_id: String,
  request: GenerateIn,
  out_tx: UnboundedSender<ServerWsMessage>,
) -> RunningGeneration {
  let cancel = CancellationToken::new();
  let run_cancel = cancel.clone();

  let handle = tokio::spawn(async move {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let run = async {
      // Owned here so the forwarder sees the channel close when the run ends.
      let event_tx = event_tx;
      generate_for_module(&state, &module_id, &request, &run_cancel, Some(&event_tx)).await
    };
    let forward = async {
      while let Some(event) = event_rx.recv().await {
        let _ = out_tx.send(ServerWsMessage::Progress { event });
      }
    };
    let (result, ()) = tokio::join!(run, forward);

    let reply = match result {
      Ok(result) => ServerWsMessage::GenerationResult { result },
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    };
    let _ = out_tx.send(reply);
  });

  RunningGeneration { cancel, handle }
}
