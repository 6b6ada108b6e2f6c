//! Error types for the execution engine.

use scn_protocol::ValidationError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure raised by an automation backend while driving the browser.
///
/// These are never retried: the first adapter failure during a step
/// terminates the session with `Error` status.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
	/// No element matched the selector.
	#[error("element not found: selector '{selector}'")]
	ElementNotFound { selector: String },

	/// A bounded wait elapsed before its condition held.
	#[error("timeout after {ms}ms waiting for: {condition}")]
	Timeout { ms: u64, condition: String },

	/// The browser could not load the requested URL.
	#[error("navigation to {url} failed: {message}")]
	NavigationFailure { url: String, message: String },

	/// The backend itself is gone or unreachable (connection refused,
	/// socket closed mid-call, malformed protocol traffic).
	#[error("backend unavailable: {0}")]
	BackendUnavailable(String),
}

impl AdapterError {
	/// Returns true if this is a timeout failure.
	pub fn is_timeout(&self) -> bool {
		matches!(self, AdapterError::Timeout { .. })
	}
}

/// Errors surfaced by the engine's control surface.
#[derive(Debug, Error)]
pub enum EngineError {
	/// The project already has a session in an active state.
	#[error("project {project_id} already has an execution in progress")]
	AlreadyRunning { project_id: u64 },

	/// A control signal targeted an id the registry does not know.
	#[error("session not found: {id}")]
	SessionNotFound { id: u64 },

	/// The plan failed validation before a session was created.
	#[error(transparent)]
	Validation(#[from] ValidationError),

	/// The execution base URL could not be parsed.
	#[error("invalid base url '{url}': {message}")]
	InvalidBaseUrl { url: String, message: String },

	#[error(transparent)]
	Adapter(#[from] AdapterError),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn adapter_error_messages() {
		let err = AdapterError::ElementNotFound { selector: "#login".into() };
		assert_eq!(err.to_string(), "element not found: selector '#login'");

		let err = AdapterError::Timeout { ms: 5000, condition: "selector .dashboard".into() };
		assert!(err.is_timeout());
		assert_eq!(err.to_string(), "timeout after 5000ms waiting for: selector .dashboard");

		assert!(!AdapterError::BackendUnavailable("gone".into()).is_timeout());
	}

	#[test]
	fn validation_converts_into_engine_error() {
		let plan = scn_protocol::TestPlan { scenarios: vec![] };
		let err: EngineError = plan.validate().unwrap_err().into();
		assert!(matches!(err, EngineError::Validation(ValidationError::EmptyPlan)));
	}
}
