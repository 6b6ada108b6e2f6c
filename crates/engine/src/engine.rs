//! The engine facade: the control surface the outside world talks to.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use url::Url;

use scn_protocol::{ServerMessage, SessionStatus, TestPlan};

use crate::backend::{Backend, BackendConfig};
use crate::broadcast::{Broadcaster, Subscription};
use crate::error::Result;
use crate::executor::{self, DEFAULT_WAIT_TIMEOUT_MS, RunConfig};
use crate::registry::SessionRegistry;
use crate::session::{LogKind, Session, now_ms};

/// Engine-wide configuration, resolved once at process start.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Which backend executions run against.
	pub backend: BackendConfig,
	/// Fixed inter-step pacing delay.
	pub step_delay: Duration,
	/// Default `waitForSelector` timeout in milliseconds.
	pub wait_timeout_ms: u64,
	/// Default base for relative navigation URLs; an execution request may
	/// carry its own.
	pub base_url: Option<Url>,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			backend: BackendConfig::default(),
			step_delay: executor::DEFAULT_STEP_DELAY,
			wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
			base_url: None,
		}
	}
}

/// Creates sessions, spawns their executors, and relays control signals.
///
/// Cheap to clone; all clones share the registry and broadcaster.
#[derive(Clone)]
pub struct Engine {
	registry: SessionRegistry,
	broadcaster: Broadcaster,
	config: Arc<EngineConfig>,
}

impl Engine {
	pub fn new(config: EngineConfig) -> Self {
		Self {
			registry: SessionRegistry::new(),
			broadcaster: Broadcaster::new(),
			config: Arc::new(config),
		}
	}

	/// Starts executing `plan` for `project_id`.
	///
	/// Rejects the request synchronously when the plan is invalid or the
	/// project already has an active session; otherwise returns the new
	/// session id immediately. All further progress is observable only
	/// through the event channel. Must be called within a tokio runtime.
	pub fn start_execution(
		&self,
		project_id: u64,
		base_url: Option<Url>,
		plan: &TestPlan,
	) -> Result<u64> {
		let base = base_url.or_else(|| self.config.base_url.clone());
		let steps = executor::resolve_plan(plan, base.as_ref(), self.config.wait_timeout_ms)?;

		let cell = self.registry.create(project_id, steps.len() as u32)?;
		let session_id = cell.snapshot().id;

		let registry = self.registry.clone();
		let broadcaster = self.broadcaster.clone();
		let config = Arc::clone(&self.config);
		tokio::spawn(async move {
			let backend = match Backend::connect(&config.backend).await {
				Ok(backend) => backend,
				Err(err) => {
					let message = err.to_string();
					cell.update(|s| {
						s.status = SessionStatus::Error;
						s.completed_at = Some(now_ms());
						s.push_log(LogKind::Error, &message);
					});
					broadcaster.broadcast(&ServerMessage::ExecutionError { session_id, message });
					return;
				}
			};

			executor::run_session(
				registry,
				broadcaster,
				backend,
				steps,
				session_id,
				RunConfig { step_delay: config.step_delay },
			)
			.await;
		});

		info!(target = "scn.engine", session_id, project_id, "execution started");
		Ok(session_id)
	}

	/// Registers an observer on the event channel.
	pub fn subscribe(&self) -> Subscription {
		self.broadcaster.subscribe()
	}

	/// Removes an observer.
	pub fn unsubscribe(&self, observer_id: u64) {
		self.broadcaster.unsubscribe(observer_id)
	}

	pub fn pause(&self, session_id: u64) -> Result<()> {
		self.registry.pause(session_id)
	}

	pub fn resume(&self, session_id: u64) -> Result<()> {
		self.registry.resume(session_id)
	}

	pub fn stop(&self, session_id: u64) -> Result<()> {
		self.registry.stop(session_id)
	}

	/// Applies a human's verification-complete signal for `session_id`.
	pub fn complete_manual_verification(&self, session_id: u64) -> Result<()> {
		self.registry.complete_manual_verification(session_id)
	}

	/// Point-in-time copy of one session.
	pub fn session(&self, session_id: u64) -> Result<Session> {
		self.registry.session(session_id)
	}

	/// Point-in-time copies of all sessions, oldest first.
	pub fn sessions(&self) -> Vec<Session> {
		self.registry.sessions()
	}

	pub fn registry(&self) -> &SessionRegistry {
		&self.registry
	}

	pub fn broadcaster(&self) -> &Broadcaster {
		&self.broadcaster
	}
}
