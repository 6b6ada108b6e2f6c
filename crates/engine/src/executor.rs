//! The step scheduler: drives one session through its plan.
//!
//! One executor task per session. Steps run strictly in order - each
//! step's DOM precondition depends on the previous step's effect on the
//! page owned by this session - and every suspension point (capability
//! calls, the pacing sleep, the pause and manual-verification waits)
//! re-checks session state afterwards. Cancellation is cooperative: a stop
//! recorded in the registry prevents further steps from starting but never
//! aborts a capability call already in flight.

use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use scn_protocol::{Action, ServerMessage, SessionStatus, TestPlan};

use crate::automation::Automation;
use crate::backend::Backend;
use crate::broadcast::Broadcaster;
use crate::error::{AdapterError, EngineError, Result};
use crate::registry::SessionRegistry;
use crate::session::{LogKind, now_ms};

/// Default pacing delay between steps. Rate-limits backend load and gives
/// observers time to render progress.
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(1500);

/// Default `waitForSelector` timeout when a step does not carry its own.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5000;

/// Executor tuning knobs.
#[derive(Debug, Clone)]
pub struct RunConfig {
	/// Fixed inter-step pacing delay.
	pub step_delay: Duration,
}

impl Default for RunConfig {
	fn default() -> Self {
		Self { step_delay: DEFAULT_STEP_DELAY }
	}
}

/// A step after flattening and parameter resolution.
///
/// Produced by [`resolve_plan`] from a validated [`TestPlan`]: options are
/// gone, relative URLs are resolved, and wait timeouts are defaulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
	pub action: ResolvedAction,
	pub human_verification: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAction {
	Navigate { url: String },
	Fill { selector: String, value: String },
	Click { selector: String },
	WaitForSelector { selector: String, timeout_ms: u64 },
	Expect { selector: String },
}

/// Validates `plan` and flattens it into the executor's step list,
/// preserving scenario order then step order. Runs before any session is
/// created, so validation and base-URL problems surface synchronously to
/// the caller that requested execution.
pub fn resolve_plan(
	plan: &TestPlan,
	base_url: Option<&Url>,
	default_wait_timeout_ms: u64,
) -> Result<Vec<ResolvedStep>> {
	plan.validate()?;

	let mut steps = Vec::with_capacity(plan.total_steps() as usize);
	for step in plan.steps() {
		// validate() guarantees the parameters each action requires.
		let action = match step.action {
			Action::Navigate => {
				let raw = step.url.clone().unwrap_or_default();
				ResolvedAction::Navigate { url: resolve_url(&raw, base_url)? }
			}
			Action::Fill => ResolvedAction::Fill {
				selector: step.selector.clone().unwrap_or_default(),
				value: step.value.clone().unwrap_or_default(),
			},
			Action::Click => {
				ResolvedAction::Click { selector: step.selector.clone().unwrap_or_default() }
			}
			Action::WaitForSelector => ResolvedAction::WaitForSelector {
				selector: step.selector.clone().unwrap_or_default(),
				timeout_ms: step.timeout.unwrap_or(default_wait_timeout_ms),
			},
			Action::Expect => {
				ResolvedAction::Expect { selector: step.selector.clone().unwrap_or_default() }
			}
		};
		steps.push(ResolvedStep { action, human_verification: step.human_verification });
	}
	Ok(steps)
}

fn resolve_url(raw: &str, base_url: Option<&Url>) -> Result<String> {
	match base_url {
		Some(base) => base
			.join(raw)
			.map(|url| url.to_string())
			.map_err(|e| EngineError::InvalidBaseUrl { url: raw.to_string(), message: e.to_string() }),
		None => Ok(raw.to_string()),
	}
}

/// Human-readable description of a step, used for logs and progress
/// events.
pub fn step_message(action: &ResolvedAction) -> String {
	match action {
		ResolvedAction::Navigate { url } => format!("Navigating to {url}"),
		ResolvedAction::Fill { selector, .. } => format!("Filling {selector} field"),
		ResolvedAction::Click { selector } => format!("Clicking {selector}"),
		ResolvedAction::WaitForSelector { selector, .. } => format!("Waiting for {selector}"),
		ResolvedAction::Expect { selector } => format!("Verifying {selector}"),
	}
}

async fn execute_action(
	backend: &Backend,
	action: &ResolvedAction,
) -> std::result::Result<(), AdapterError> {
	match action {
		ResolvedAction::Navigate { url } => backend.navigate(url).await,
		ResolvedAction::Fill { selector, value } => backend.fill(selector, value).await,
		ResolvedAction::Click { selector } => backend.click(selector).await,
		ResolvedAction::WaitForSelector { selector, timeout_ms } => {
			backend.wait_for_selector(selector, *timeout_ms).await
		}
		ResolvedAction::Expect { selector } => {
			if backend.is_visible(selector).await? {
				Ok(())
			} else {
				Err(AdapterError::ElementNotFound { selector: selector.clone() })
			}
		}
	}
}

/// Drives one session through `steps` against `backend`, mutating the
/// session through the registry and emitting events through the
/// broadcaster. Consumes the backend; its resources are released on every
/// exit path.
pub async fn run_session(
	registry: SessionRegistry,
	broadcaster: Broadcaster,
	backend: Backend,
	steps: Vec<ResolvedStep>,
	session_id: u64,
	config: RunConfig,
) {
	let cell = match registry.cell(session_id) {
		Ok(cell) => cell,
		Err(_) => {
			warn!(target = "scn.engine", session_id, "executor started for unknown session");
			if let Err(err) = backend.close().await {
				warn!(target = "scn.engine", session_id, error = %err, "backend close failed");
			}
			return;
		}
	};
	let total_steps = cell.snapshot().total_steps;

	let starting = "Starting test execution...";
	let snapshot = cell.update(|s| s.push_log(LogKind::Info, starting));
	broadcaster.broadcast(&ServerMessage::ExecutionUpdate {
		session_id,
		status: snapshot.status,
		current_step: snapshot.current_step,
		total_steps,
		message: starting.to_string(),
	});

	let mut failure: Option<AdapterError> = None;

	for step in &steps {
		// Cancellation: a stop recorded for this session ends the loop
		// before the next step starts.
		let status = cell.snapshot().status;
		if status.is_terminal() {
			break;
		}
		if status == SessionStatus::Paused && cell.wait_until_runnable().await.is_terminal() {
			break;
		}

		if let Err(err) = execute_action(&backend, &step.action).await {
			failure = Some(err);
			break;
		}

		// A stop recorded while the call was in flight freezes progress:
		// the step is not counted and no further update is emitted.
		let message = step_message(&step.action);
		let snapshot = cell.update(|s| {
			if !s.status.is_terminal() {
				s.current_step += 1;
				s.push_log(LogKind::Info, &message);
			}
		});
		if snapshot.status.is_terminal() {
			break;
		}
		debug!(
			target = "scn.engine",
			session_id,
			step = snapshot.current_step,
			total = total_steps,
			"step completed"
		);
		broadcaster.broadcast(&ServerMessage::ExecutionUpdate {
			session_id,
			status: snapshot.status,
			current_step: snapshot.current_step,
			total_steps,
			message,
		});

		if step.human_verification {
			// A pause recorded mid-step takes effect before the
			// verification gate.
			if cell.snapshot().status == SessionStatus::Paused
				&& cell.wait_until_runnable().await.is_terminal()
			{
				break;
			}

			let verification = "Human verification required";
			let snapshot = cell.update(|s| {
				if s.status == SessionStatus::Running {
					s.status = SessionStatus::ManualVerification;
					s.push_log(LogKind::Info, verification);
				}
			});
			if snapshot.status.is_terminal() {
				break;
			}

			broadcaster.broadcast(&ServerMessage::ManualVerificationRequired {
				session_id,
				current_step: snapshot.current_step,
				total_steps,
				message: verification.to_string(),
			});

			// Blocks until the verification-complete signal for this
			// session id, or a stop. Intentionally unbounded: the wait is
			// human-paced.
			if cell.wait_until_runnable().await.is_terminal() {
				break;
			}
		}

		if !config.step_delay.is_zero() {
			tokio::time::sleep(config.step_delay).await;
		}
	}

	match failure {
		Some(err) => {
			let message = err.to_string();
			// A session stopped while the failing call was in flight keeps
			// its clean stop; the error is not reported over a terminal
			// state.
			if !cell.snapshot().status.is_terminal() {
				cell.update(|s| {
					s.status = SessionStatus::Error;
					s.completed_at = Some(now_ms());
					s.push_log(LogKind::Error, &message);
				});
				warn!(target = "scn.engine", session_id, error = %message, "execution failed");
				broadcaster.broadcast(&ServerMessage::ExecutionError { session_id, message });
			}
		}
		None => {
			if cell.snapshot().status.is_terminal() {
				debug!(target = "scn.engine", session_id, "execution stopped");
			} else {
				let done = "All tests completed successfully";
				let snapshot = cell.update(|s| {
					s.status = SessionStatus::Completed;
					s.completed_at = Some(now_ms());
					s.push_log(LogKind::Info, done);
				});
				debug!(target = "scn.engine", session_id, "execution completed");
				broadcaster.broadcast(&ServerMessage::ExecutionComplete {
					session_id,
					current_step: snapshot.current_step,
					total_steps,
					message: done.to_string(),
				});
			}
		}
	}

	if let Err(err) = backend.close().await {
		warn!(target = "scn.engine", session_id, error = %err, "backend close failed");
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn plan(value: serde_json::Value) -> TestPlan {
		serde_json::from_value(value).unwrap()
	}

	#[test]
	fn resolve_flattens_in_order_and_defaults_timeouts() {
		let plan = plan(json!({
			"scenarios": [
				{ "name": "login", "steps": [
					{ "action": "navigate", "url": "https://example.com/login" },
					{ "action": "fill", "selector": "#user", "value": "u" }
				] },
				{ "name": "landing", "steps": [
					{ "action": "waitForSelector", "selector": ".dashboard" }
				] }
			]
		}));

		let steps = resolve_plan(&plan, None, DEFAULT_WAIT_TIMEOUT_MS).unwrap();
		assert_eq!(steps.len(), 3);
		assert_eq!(steps[0].action, ResolvedAction::Navigate { url: "https://example.com/login".into() });
		assert_eq!(
			steps[2].action,
			ResolvedAction::WaitForSelector { selector: ".dashboard".into(), timeout_ms: 5000 }
		);
	}

	#[test]
	fn resolve_joins_relative_urls_against_base() {
		let plan = plan(json!({
			"scenarios": [{ "name": "nav", "steps": [{ "action": "navigate", "url": "/login" }] }]
		}));

		let base = Url::parse("https://portal.example.com").unwrap();
		let steps = resolve_plan(&plan, Some(&base), DEFAULT_WAIT_TIMEOUT_MS).unwrap();
		assert_eq!(
			steps[0].action,
			ResolvedAction::Navigate { url: "https://portal.example.com/login".into() }
		);

		// Absolute step URLs win over the base.
		let plan = self::plan(json!({
			"scenarios": [{ "name": "nav", "steps": [{ "action": "navigate", "url": "https://other.test/x" }] }]
		}));
		let steps = resolve_plan(&plan, Some(&base), DEFAULT_WAIT_TIMEOUT_MS).unwrap();
		assert_eq!(steps[0].action, ResolvedAction::Navigate { url: "https://other.test/x".into() });
	}

	#[test]
	fn resolve_rejects_invalid_plans() {
		let plan = plan(json!({ "scenarios": [] }));
		assert!(matches!(
			resolve_plan(&plan, None, DEFAULT_WAIT_TIMEOUT_MS),
			Err(EngineError::Validation(_))
		));
	}

	#[test]
	fn step_messages_match_the_log_format() {
		assert_eq!(
			step_message(&ResolvedAction::Navigate { url: "https://x.test/login".into() }),
			"Navigating to https://x.test/login"
		);
		assert_eq!(
			step_message(&ResolvedAction::Fill { selector: "#user".into(), value: "u".into() }),
			"Filling #user field"
		);
		assert_eq!(step_message(&ResolvedAction::Click { selector: "#go".into() }), "Clicking #go");
		assert_eq!(
			step_message(&ResolvedAction::WaitForSelector { selector: ".dash".into(), timeout_ms: 1 }),
			"Waiting for .dash"
		);
		assert_eq!(
			step_message(&ResolvedAction::Expect { selector: ".banner".into() }),
			"Verifying .banner"
		);
	}
}
