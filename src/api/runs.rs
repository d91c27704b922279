//! Run endpoints
//!
//! REST control of pipeline runs plus a WebSocket progress feed.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::AppError;
use crate::services::pipeline::{ProgressEvent, ProgressSnapshot};
use crate::state::AppState;

pub fn runs_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/runs", get(list_runs).post(start_run))
        .route("/api/runs/:id", get(get_run))
        .route("/api/runs/:id/cancel", post(cancel_run))
        .route("/ws/runs/:id", get(ws_handler))
}

async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Vec<ProgressSnapshot>> {
    Json(state.list_runs())
}

async fn start_run(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<ProgressSnapshot>), AppError> {
    let run = state.start_run()?;
    Ok((StatusCode::ACCEPTED, Json(run.snapshot())))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<ProgressSnapshot>, AppError> {
    Ok(Json(state.get_run(&run_id)?.snapshot()))
}

async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let run = state.get_run(&run_id)?;
    run.request_stop();
    info!("Run cancelled: {}", run_id);

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Stop requested; in-flight tasks will finish"
    })))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, run_id))
}

fn to_message<T: Serialize>(value: &T) -> Option<Message> {
    serde_json::to_string(value).ok().map(Message::Text)
}

/// Replay the current snapshot, then forward events until the run finishes
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>, run_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let run = match state.get_run(&run_id) {
        Ok(run) => run,
        Err(e) => {
            let error = serde_json::json!({ "type": "error", "message": e.to_string() });
            if let Some(msg) = to_message(&error) {
                let _ = sender.send(msg).await;
            }
            return;
        }
    };

    info!("WebSocket connection established: run_id={}", run_id);

    // Subscribe first so nothing emitted after the snapshot is missed
    let mut rx = run.subscribe();
    let snapshot = run.snapshot();
    let finished = snapshot.summary.is_some();
    if let Some(msg) = to_message(&snapshot) {
        if sender.send(msg).await.is_err() {
            return;
        }
    }
    if finished {
        let _ = sender.close().await;
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let done = matches!(event, ProgressEvent::Finished { .. });
                        let Some(msg) = to_message(&event) else { continue };
                        if sender.send(msg).await.is_err() || done {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("WebSocket for run {} skipped {} events", run_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed: run_id={}", run_id);
}
