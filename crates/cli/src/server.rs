//! HTTP control surface and WebSocket observer channel.
//!
//! The control surface only ever returns a session id synchronously; all
//! progress, success, and failure flow over `/ws`. Every connected
//! observer receives every session's events.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use scn::{Engine, EngineConfig, EngineError};
use scn_protocol::{ClientMessage, ServerMessage, TestPlan};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
	project_id: u64,
	#[serde(default)]
	base_url: Option<String>,
	plan: TestPlan,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
	session_id: u64,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
	success: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	message: String,
}

fn error_response(err: EngineError) -> Response {
	let status = match &err {
		EngineError::AlreadyRunning { .. } => StatusCode::CONFLICT,
		EngineError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
		EngineError::Validation(_) | EngineError::InvalidBaseUrl { .. } => {
			StatusCode::UNPROCESSABLE_ENTITY
		}
		EngineError::Adapter(_) => StatusCode::BAD_GATEWAY,
	};
	(status, axum::Json(ErrorBody { message: err.to_string() })).into_response()
}

pub async fn serve(config: EngineConfig, host: &str, port: u16) -> Result<()> {
	let engine = Engine::new(config);
	let app = router(engine);

	let addr: SocketAddr = format!("{host}:{port}")
		.parse()
		.with_context(|| format!("Invalid host/port combination: {host}:{port}"))?;

	info!(target = "scn.server", host, port, "starting execution server");

	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind server to {addr}"))?;

	axum::serve(listener, app.into_make_service())
		.await
		.context("Server error")
}

pub fn router(engine: Engine) -> Router {
	Router::new()
		.route("/api/executions", post(start_execution))
		.route("/api/sessions", get(list_sessions))
		.route("/api/sessions/{id}", get(get_session))
		.route("/api/sessions/{id}/pause", post(pause_session))
		.route("/api/sessions/{id}/resume", post(resume_session))
		.route("/api/sessions/{id}/stop", post(stop_session))
		.route(
			"/ws",
			get(|ws: WebSocketUpgrade, State(engine): State<Engine>| async move {
				ws.on_upgrade(|socket| handle_observer_socket(socket, engine))
			}),
		)
		.with_state(engine)
}

async fn start_execution(
	State(engine): State<Engine>,
	axum::Json(request): axum::Json<ExecuteRequest>,
) -> Response {
	let base_url = match request.base_url.as_deref().map(Url::parse).transpose() {
		Ok(base) => base,
		Err(err) => {
			return error_response(EngineError::InvalidBaseUrl {
				url: request.base_url.unwrap_or_default(),
				message: err.to_string(),
			});
		}
	};

	match engine.start_execution(request.project_id, base_url, &request.plan) {
		Ok(session_id) => axum::Json(ExecuteResponse { session_id }).into_response(),
		Err(err) => error_response(err),
	}
}

async fn list_sessions(State(engine): State<Engine>) -> Response {
	axum::Json(engine.sessions()).into_response()
}

async fn get_session(State(engine): State<Engine>, Path(id): Path<u64>) -> Response {
	match engine.session(id) {
		Ok(session) => axum::Json(session).into_response(),
		Err(err) => error_response(err),
	}
}

async fn pause_session(State(engine): State<Engine>, Path(id): Path<u64>) -> Response {
	control_response(engine.pause(id))
}

async fn resume_session(State(engine): State<Engine>, Path(id): Path<u64>) -> Response {
	control_response(engine.resume(id))
}

async fn stop_session(State(engine): State<Engine>, Path(id): Path<u64>) -> Response {
	control_response(engine.stop(id))
}

fn control_response(result: scn::Result<()>) -> Response {
	match result {
		Ok(()) => axum::Json(SuccessResponse { success: true }).into_response(),
		Err(err) => error_response(err),
	}
}

async fn handle_observer_socket(socket: WebSocket, engine: Engine) {
	let subscription = engine.subscribe();
	let observer_id = subscription.id;
	let mut events = subscription.rx;
	info!(target = "scn.ws", observer = observer_id, "observer connected");

	let (mut ws_tx, mut ws_rx) = socket.split();
	let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();

	// One writer per socket, fed by the broadcast stream and by direct
	// replies (pong) to this observer.
	let send_task = tokio::spawn(async move {
		loop {
			let message = tokio::select! {
				event = events.recv() => match event {
					Some(event) => event,
					None => break,
				},
				reply = reply_rx.recv() => match reply {
					Some(reply) => reply,
					None => break,
				},
			};
			let Ok(text) = serde_json::to_string(&message) else { continue };
			if ws_tx.send(Message::Text(text.into())).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
				Ok(ClientMessage::ManualVerificationComplete { session_id }) => {
					// A stray signal for an unknown session is ignored, not
					// an error for the whole connection.
					if let Err(err) = engine.complete_manual_verification(session_id) {
						warn!(
							target = "scn.ws",
							observer = observer_id,
							session_id,
							error = %err,
							"ignoring stray verification signal"
						);
					}
				}
				Ok(ClientMessage::Ping) => {
					let _ = reply_tx.send(ServerMessage::Pong);
				}
				Err(err) => {
					debug!(
						target = "scn.ws",
						observer = observer_id,
						error = %err,
						"ignoring malformed client message"
					);
				}
			},
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "scn.ws", observer = observer_id, error = %err, "observer websocket error");
				break;
			}
		}
	}

	engine.unsubscribe(observer_id);
	send_task.abort();
	info!(target = "scn.ws", observer = observer_id, "observer disconnected");
}
