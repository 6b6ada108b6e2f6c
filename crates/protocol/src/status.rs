//! Session status vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an execution session.
///
/// Transitions are enforced by the engine's registry; on the wire these
/// serialize to the lowercase names clients historically consumed
/// (`manual` for the manual-verification state).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
	/// Pre-creation placeholder; a session enters `Running` the instant it
	/// is created and handed to the executor.
	#[default]
	Idle,
	Running,
	Paused,
	/// Automated progress is suspended pending an explicit human-originated
	/// completion signal.
	#[serde(rename = "manual")]
	ManualVerification,
	Completed,
	Error,
}

impl SessionStatus {
	/// Terminal states never transition again.
	pub fn is_terminal(self) -> bool {
		matches!(self, SessionStatus::Completed | SessionStatus::Error)
	}

	/// Active states count toward the one-session-per-project limit.
	pub fn is_active(self) -> bool {
		matches!(
			self,
			SessionStatus::Running | SessionStatus::Paused | SessionStatus::ManualVerification
		)
	}
}

impl fmt::Display for SessionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SessionStatus::Idle => "idle",
			SessionStatus::Running => "running",
			SessionStatus::Paused => "paused",
			SessionStatus::ManualVerification => "manual",
			SessionStatus::Completed => "completed",
			SessionStatus::Error => "error",
		};
		f.write_str(name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wire_names_are_stable() {
		let cases = [
			(SessionStatus::Idle, "\"idle\""),
			(SessionStatus::Running, "\"running\""),
			(SessionStatus::Paused, "\"paused\""),
			(SessionStatus::ManualVerification, "\"manual\""),
			(SessionStatus::Completed, "\"completed\""),
			(SessionStatus::Error, "\"error\""),
		];
		for (status, wire) in cases {
			assert_eq!(serde_json::to_string(&status).unwrap(), wire);
			assert_eq!(serde_json::from_str::<SessionStatus>(wire).unwrap(), status);
		}
	}

	#[test]
	fn active_and_terminal_are_disjoint() {
		for status in [
			SessionStatus::Idle,
			SessionStatus::Running,
			SessionStatus::Paused,
			SessionStatus::ManualVerification,
			SessionStatus::Completed,
			SessionStatus::Error,
		] {
			assert!(!(status.is_active() && status.is_terminal()));
		}
		assert!(SessionStatus::ManualVerification.is_active());
		assert!(SessionStatus::Error.is_terminal());
		assert!(!SessionStatus::Idle.is_active());
	}
}
