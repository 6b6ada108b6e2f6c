//! Chrome DevTools Protocol backend.
//!
//! Drives a Chromium-family browser over its DevTools WebSocket endpoint.
//! Commands are correlated to responses through an id -> oneshot map; CDP
//! events fan out on a broadcast channel so callers can wait for
//! lifecycle events (page load, paused network requests) independently.
//!
//! DOM reads and interactions go through `Runtime.evaluate` with guarded
//! expressions that return `null` when no element matches, which this
//! module maps to [`AdapterError::ElementNotFound`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::automation::{Automation, InterceptRule};
use crate::error::AdapterError;

type Result<T> = std::result::Result<T, AdapterError>;

/// How long to wait for a single CDP command response.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval for `wait_for_selector`.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct CdpEvent {
	method: String,
	session_id: Option<String>,
	params: Value,
}

struct CdpConnection {
	tx: mpsc::UnboundedSender<Message>,
	pending: Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>,
	next_id: AtomicU64,
	events: broadcast::Sender<CdpEvent>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpConnection {
	async fn send(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (resp_tx, resp_rx) = oneshot::channel();
		self.pending.lock().insert(id, resp_tx);

		let mut request = json!({ "id": id, "method": method, "params": params });
		if let Some(session) = session_id {
			request["sessionId"] = Value::String(session.to_string());
		}

		if self.tx.send(Message::Text(request.to_string())).is_err() {
			self.pending.lock().remove(&id);
			return Err(AdapterError::BackendUnavailable("connection closed".to_string()));
		}

		let inner = tokio::time::timeout(COMMAND_TIMEOUT, resp_rx).await.map_err(|_| {
			self.pending.lock().remove(&id);
			AdapterError::BackendUnavailable(format!("timed out waiting for {method} response"))
		})?;

		let result = inner
			.map_err(|_| AdapterError::BackendUnavailable("connection closed".to_string()))?;
		result.map_err(|message| AdapterError::BackendUnavailable(format!("{method}: {message}")))
	}

	fn dispatch(
		pending: &Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>,
		events: &broadcast::Sender<CdpEvent>,
		raw: &str,
	) {
		let Ok(value) = serde_json::from_str::<Value>(raw) else {
			warn!(target = "scn.cdp", "ignoring unparseable CDP message");
			return;
		};

		if let Some(id) = value.get("id").and_then(Value::as_u64) {
			let result = match value.get("error") {
				Some(error) => Err(error
					.get("message")
					.and_then(Value::as_str)
					.unwrap_or("unknown CDP error")
					.to_string()),
				None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
			};
			if let Some(sender) = pending.lock().remove(&id) {
				let _ = sender.send(result);
			} else {
				warn!(target = "scn.cdp", id, "response with unknown id");
			}
			return;
		}

		if let Some(method) = value.get("method").and_then(Value::as_str) {
			let _ = events.send(CdpEvent {
				method: method.to_string(),
				session_id: value.get("sessionId").and_then(Value::as_str).map(str::to_owned),
				params: value.get("params").cloned().unwrap_or(Value::Null),
			});
		}
	}

	fn shutdown(&self) {
		let _ = self.tx.send(Message::Close(None));
		for (_, sender) in self.pending.lock().drain() {
			let _ = sender.send(Err("connection closed".to_string()));
		}
		for task in self.tasks.lock().drain(..) {
			task.abort();
		}
	}
}

struct InterceptState {
	rules: Mutex<Vec<InterceptRule>>,
	enabled: Mutex<bool>,
}

/// Capability-contract implementation speaking CDP over a WebSocket.
pub struct CdpBackend {
	conn: Arc<CdpConnection>,
	target_id: String,
	session_id: String,
	nav_timeout_ms: u64,
	intercept: Arc<InterceptState>,
}

impl CdpBackend {
	/// Connects to a browser's DevTools WebSocket endpoint and attaches to
	/// the first available page target (creating one when none exists).
	pub async fn connect(ws_url: &str, nav_timeout_ms: u64) -> Result<Self> {
		let (socket, _) = connect_async(ws_url)
			.await
			.map_err(|e| AdapterError::BackendUnavailable(format!("connect to {ws_url}: {e}")))?;
		let (mut ws_tx, mut ws_rx) = socket.split();

		let (tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
		let (events, _) = broadcast::channel(256);

		let conn = Arc::new(CdpConnection {
			tx,
			pending: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(1),
			events,
			tasks: Mutex::new(Vec::new()),
		});

		let send_task = tokio::spawn(async move {
			while let Some(msg) = out_rx.recv().await {
				let closing = matches!(msg, Message::Close(_));
				if ws_tx.send(msg).await.is_err() || closing {
					break;
				}
			}
		});

		let read_conn = Arc::clone(&conn);
		let read_task = tokio::spawn(async move {
			while let Some(msg) = ws_rx.next().await {
				match msg {
					Ok(Message::Text(text)) => {
						CdpConnection::dispatch(&read_conn.pending, &read_conn.events, &text)
					}
					Ok(Message::Close(_)) | Err(_) => break,
					Ok(_) => {}
				}
			}
			// Unblock anything still waiting on a response.
			for (_, sender) in read_conn.pending.lock().drain() {
				let _ = sender.send(Err("connection closed".to_string()));
			}
		});

		conn.tasks.lock().extend([send_task, read_task]);

		let (target_id, session_id) = attach_to_page(&conn).await?;
		debug!(target = "scn.cdp", %target_id, "attached to page target");

		Ok(Self {
			conn,
			target_id,
			session_id,
			nav_timeout_ms,
			intercept: Arc::new(InterceptState {
				rules: Mutex::new(Vec::new()),
				enabled: Mutex::new(false),
			}),
		})
	}

	/// Evaluates a guarded expression in the page, returning its
	/// JSON-serializable result.
	async fn evaluate(&self, expression: String) -> Result<Value> {
		let result = self
			.conn
			.send(
				"Runtime.evaluate",
				json!({ "expression": expression, "returnByValue": true, "awaitPromise": true }),
				Some(&self.session_id),
			)
			.await?;

		if let Some(details) = result.get("exceptionDetails") {
			let description = details
				.pointer("/exception/description")
				.or_else(|| details.get("text"))
				.and_then(Value::as_str)
				.unwrap_or("script exception");
			return Err(AdapterError::BackendUnavailable(format!("evaluate failed: {description}")));
		}

		Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
	}

	/// Evaluates an element-scoped expression; `null` means no element
	/// matched `selector`.
	async fn evaluate_on(&self, selector: &str, body: &str) -> Result<Value> {
		let sel = js_string(selector);
		let expression =
			format!("(() => {{ const el = document.querySelector({sel}); if (!el) return null; return ({body}); }})()");
		let value = self.evaluate(expression).await?;
		if value.is_null() {
			return Err(AdapterError::ElementNotFound { selector: selector.to_string() });
		}
		Ok(value)
	}

	async fn selector_exists(&self, selector: &str) -> Result<bool> {
		let sel = js_string(selector);
		let value = self.evaluate(format!("document.querySelector({sel}) !== null")).await?;
		Ok(value.as_bool().unwrap_or(false))
	}

	fn start_fetch_handler(&self) {
		let conn = Arc::clone(&self.conn);
		let intercept = Arc::clone(&self.intercept);
		let session_id = self.session_id.clone();
		let mut events = self.conn.events.subscribe();

		let handler = tokio::spawn(async move {
			loop {
				let event = match events.recv().await {
					Ok(event) => event,
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!(target = "scn.cdp", skipped, "fetch handler lagged behind event stream");
						continue;
					}
					Err(broadcast::error::RecvError::Closed) => break,
				};

				if event.method != "Fetch.requestPaused"
					|| event.session_id.as_deref() != Some(session_id.as_str())
				{
					continue;
				}

				let Some(request_id) = event.params.get("requestId").and_then(Value::as_str) else {
					continue;
				};
				let url = event.params.pointer("/request/url").and_then(Value::as_str).unwrap_or("");
				let method =
					event.params.pointer("/request/method").and_then(Value::as_str).unwrap_or("GET");

				let rule = intercept.rules.lock().iter().find(|r| r.matches(url, method)).cloned();
				let outcome = match rule {
					Some(rule) if !rule.mock_data.is_null() => {
						fulfill_request(&conn, &session_id, request_id, &rule).await
					}
					Some(rule) => {
						continue_request(&conn, &session_id, request_id, &event.params, Some(&rule))
							.await
					}
					None => {
						continue_request(&conn, &session_id, request_id, &event.params, None).await
					}
				};

				if let Err(err) = outcome {
					warn!(target = "scn.cdp", error = %err, "failed handling paused request");
				}
			}
		});

		self.conn.tasks.lock().push(handler);
	}
}

async fn attach_to_page(conn: &Arc<CdpConnection>) -> Result<(String, String)> {
	let targets = conn.send("Target.getTargets", json!({}), None).await?;
	let existing = targets
		.get("targetInfos")
		.and_then(Value::as_array)
		.and_then(|infos| infos.iter().find(|t| t.get("type").and_then(Value::as_str) == Some("page")))
		.and_then(|t| t.get("targetId").and_then(Value::as_str))
		.map(str::to_owned);

	let target_id = match existing {
		Some(id) => id,
		None => {
			let created = conn.send("Target.createTarget", json!({ "url": "about:blank" }), None).await?;
			created
				.get("targetId")
				.and_then(Value::as_str)
				.map(str::to_owned)
				.ok_or_else(|| {
					AdapterError::BackendUnavailable("createTarget returned no targetId".to_string())
				})?
		}
	};

	let attached = conn
		.send("Target.attachToTarget", json!({ "targetId": target_id, "flatten": true }), None)
		.await?;
	let session_id = attached
		.get("sessionId")
		.and_then(Value::as_str)
		.map(str::to_owned)
		.ok_or_else(|| {
			AdapterError::BackendUnavailable("attachToTarget returned no sessionId".to_string())
		})?;

	conn.send("Page.enable", json!({}), Some(&session_id)).await?;
	conn.send("Runtime.enable", json!({}), Some(&session_id)).await?;

	Ok((target_id, session_id))
}

async fn fulfill_request(
	conn: &CdpConnection,
	session_id: &str,
	request_id: &str,
	rule: &InterceptRule,
) -> Result<()> {
	let body = serde_json::to_vec(&rule.mock_data)
		.map_err(|e| AdapterError::BackendUnavailable(format!("serializing mock body: {e}")))?;

	let mut headers = vec![json!({ "name": "Content-Type", "value": rule.content_type })];
	if let Some(extra) = &rule.inject_headers {
		for (name, value) in extra {
			headers.push(json!({ "name": name, "value": value }));
		}
	}

	conn.send(
		"Fetch.fulfillRequest",
		json!({
			"requestId": request_id,
			"responseCode": rule.status,
			"responseHeaders": headers,
			"body": base64::engine::general_purpose::STANDARD.encode(body),
		}),
		Some(session_id),
	)
	.await?;
	Ok(())
}

async fn continue_request(
	conn: &CdpConnection,
	session_id: &str,
	request_id: &str,
	event_params: &Value,
	rule: Option<&InterceptRule>,
) -> Result<()> {
	let mut params = json!({ "requestId": request_id });

	// A matching passthrough rule may inject request headers (e.g. an
	// Authorization token) on the way out.
	if let Some(extra) = rule.and_then(|r| r.inject_headers.as_ref()) {
		let mut headers: Vec<Value> = event_params
			.pointer("/request/headers")
			.and_then(Value::as_object)
			.map(|existing| {
				existing
					.iter()
					.map(|(name, value)| json!({ "name": name, "value": value }))
					.collect()
			})
			.unwrap_or_default();
		for (name, value) in extra {
			headers.push(json!({ "name": name, "value": value }));
		}
		params["headers"] = Value::Array(headers);
	}

	conn.send("Fetch.continueRequest", params, Some(session_id)).await?;
	Ok(())
}

/// Quotes a Rust string as a JavaScript string literal.
fn js_string(value: &str) -> String {
	serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl Automation for CdpBackend {
	async fn navigate(&self, url: &str) -> Result<()> {
		let mut events = self.conn.events.subscribe();

		let result = self
			.conn
			.send("Page.navigate", json!({ "url": url }), Some(&self.session_id))
			.await?;
		if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
			if !error_text.is_empty() {
				return Err(AdapterError::NavigationFailure {
					url: url.to_string(),
					message: error_text.to_string(),
				});
			}
		}

		let loaded = async {
			loop {
				match events.recv().await {
					Ok(event)
						if event.method == "Page.loadEventFired"
							&& event.session_id.as_deref() == Some(self.session_id.as_str()) =>
					{
						break Ok(());
					}
					Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
					Err(broadcast::error::RecvError::Closed) => {
						break Err(AdapterError::BackendUnavailable("connection closed".to_string()));
					}
				}
			}
		};

		tokio::time::timeout(Duration::from_millis(self.nav_timeout_ms), loaded)
			.await
			.map_err(|_| AdapterError::Timeout {
				ms: self.nav_timeout_ms,
				condition: format!("load of {url}"),
			})?
	}

	async fn click(&self, selector: &str) -> Result<()> {
		self.evaluate_on(selector, "(el.click(), true)").await?;
		Ok(())
	}

	async fn fill(&self, selector: &str, value: &str) -> Result<()> {
		let val = js_string(value);
		let body = format!(
			"(el.focus(), el.value = {val}, \
			 el.dispatchEvent(new Event('input', {{ bubbles: true }})), \
			 el.dispatchEvent(new Event('change', {{ bubbles: true }})), true)"
		);
		self.evaluate_on(selector, &body).await?;
		Ok(())
	}

	async fn get_text(&self, selector: &str) -> Result<String> {
		let value = self.evaluate_on(selector, "el.innerText ?? ''").await?;
		Ok(value.as_str().unwrap_or_default().to_string())
	}

	async fn get_attribute(&self, selector: &str, name: &str) -> Result<Option<String>> {
		let attr = js_string(name);
		let value = self
			.evaluate_on(selector, &format!("({{ value: el.getAttribute({attr}) }})"))
			.await?;
		Ok(value.get("value").and_then(Value::as_str).map(str::to_owned))
	}

	async fn get_style(&self, selector: &str, prop: &str) -> Result<String> {
		let prop = js_string(prop);
		let value = self
			.evaluate_on(selector, &format!("getComputedStyle(el).getPropertyValue({prop})"))
			.await?;
		Ok(value.as_str().unwrap_or_default().to_string())
	}

	async fn get_value(&self, selector: &str) -> Result<String> {
		let value = self.evaluate_on(selector, "'value' in el ? String(el.value) : ''").await?;
		Ok(value.as_str().unwrap_or_default().to_string())
	}

	async fn current_url(&self) -> Result<String> {
		let value = self.evaluate("window.location.href".to_string()).await?;
		Ok(value.as_str().unwrap_or_default().to_string())
	}

	async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()> {
		let deadline = Instant::now() + Duration::from_millis(timeout_ms);
		loop {
			if self.selector_exists(selector).await? {
				return Ok(());
			}
			if Instant::now() >= deadline {
				return Err(AdapterError::Timeout {
					ms: timeout_ms,
					condition: format!("selector {selector}"),
				});
			}
			tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
		}
	}

	async fn is_visible(&self, selector: &str) -> Result<bool> {
		let sel = js_string(selector);
		let expression = format!(
			"(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
			 const rect = el.getBoundingClientRect(); \
			 return !!(rect.width || rect.height) && getComputedStyle(el).visibility !== 'hidden'; }})()"
		);
		let value = self.evaluate(expression).await?;
		Ok(value.as_bool().unwrap_or(false))
	}

	async fn text_content(&self, selector: &str) -> Result<String> {
		let sel = js_string(selector);
		let expression = format!(
			"(() => {{ const el = document.querySelector({sel}); return el ? (el.textContent ?? '') : ''; }})()"
		);
		let value = self.evaluate(expression).await?;
		Ok(value.as_str().unwrap_or_default().to_string())
	}

	async fn frame_content(&self, frame_selector: &str, content_selector: &str) -> Result<String> {
		let frame = js_string(frame_selector);
		let content = js_string(content_selector);
		let expression = format!(
			"(() => {{ \
			 const frame = document.querySelector({frame}); \
			 if (!frame || !frame.contentDocument) return {{ error: 'frame' }}; \
			 const el = frame.contentDocument.querySelector({content}); \
			 if (!el) return {{ error: 'content' }}; \
			 return {{ text: el.innerText ?? '' }}; }})()"
		);
		let value = self.evaluate(expression).await?;

		match value.get("error").and_then(Value::as_str) {
			Some("frame") => {
				Err(AdapterError::ElementNotFound { selector: frame_selector.to_string() })
			}
			Some(_) => Err(AdapterError::ElementNotFound { selector: content_selector.to_string() }),
			None => Ok(value.get("text").and_then(Value::as_str).unwrap_or_default().to_string()),
		}
	}

	async fn intercept_network(&self, rule: InterceptRule) -> Result<()> {
		self.intercept.rules.lock().push(rule);

		let needs_enable = {
			let mut enabled = self.intercept.enabled.lock();
			!std::mem::replace(&mut *enabled, true)
		};
		if needs_enable {
			// The handler subscribes before Fetch.enable so no paused
			// request can slip past it.
			self.start_fetch_handler();
			self.conn
				.send(
					"Fetch.enable",
					json!({ "patterns": [{ "urlPattern": "*" }] }),
					Some(&self.session_id),
				)
				.await?;
		}
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		let _ = self
			.conn
			.send("Target.closeTarget", json!({ "targetId": self.target_id }), None)
			.await;
		self.conn.shutdown();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn js_string_escapes_quotes() {
		assert_eq!(js_string("#login"), "\"#login\"");
		assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
	}

	#[test]
	fn dispatch_correlates_responses() {
		let pending = Mutex::new(HashMap::new());
		let (events, _keep) = broadcast::channel(16);

		let (tx, mut rx) = oneshot::channel();
		pending.lock().insert(7, tx);
		CdpConnection::dispatch(&pending, &events, r#"{"id":7,"result":{"ok":true}}"#);
		assert_eq!(rx.try_recv().unwrap().unwrap(), json!({ "ok": true }));

		let (tx, mut rx) = oneshot::channel();
		pending.lock().insert(8, tx);
		CdpConnection::dispatch(&pending, &events, r#"{"id":8,"error":{"message":"no such frame"}}"#);
		assert_eq!(rx.try_recv().unwrap().unwrap_err(), "no such frame");
	}

	#[test]
	fn dispatch_fans_out_events() {
		let pending = Mutex::new(HashMap::new());
		let (events, mut rx) = broadcast::channel(16);

		CdpConnection::dispatch(
			&pending,
			&events,
			r#"{"method":"Page.loadEventFired","sessionId":"S1","params":{"timestamp":1}}"#,
		);

		let event = rx.try_recv().unwrap();
		assert_eq!(event.method, "Page.loadEventFired");
		assert_eq!(event.session_id.as_deref(), Some("S1"));
		assert_eq!(event.params["timestamp"], 1);
	}

	#[test]
	fn dispatch_ignores_garbage() {
		let pending = Mutex::new(HashMap::new());
		let (events, _keep) = broadcast::channel(16);
		CdpConnection::dispatch(&pending, &events, "not json");
		CdpConnection::dispatch(&pending, &events, r#"{"id":99,"result":{}}"#);
	}
}
