//! The mutable execution-progress record for one run of a test plan.

use serde::{Deserialize, Serialize};

use scn_protocol::SessionStatus;

/// Returns the current time as Unix milliseconds.
pub fn now_ms() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as u64
}

/// Severity of a session log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
	Info,
	Error,
}

/// One append-only log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
	pub timestamp: u64,
	pub message: String,
	#[serde(rename = "type")]
	pub kind: LogKind,
}

/// Execution-progress record for one run.
///
/// Owned by the registry; mutated only by the executor task driving it and
/// by control signals funneled through the registry. Once terminal it is
/// retained for historical read access and never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
	pub id: u64,
	/// Foreign reference to the project this run belongs to (not owned).
	pub project_id: u64,
	pub status: SessionStatus,
	/// 0-based count of completed steps; monotonically non-decreasing
	/// while the session is non-terminal.
	pub current_step: u32,
	pub total_steps: u32,
	pub logs: Vec<LogEntry>,
	pub started_at: u64,
	/// Set exactly when the session reaches `Completed` or `Error`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<u64>,
}

impl Session {
	pub(crate) fn new(id: u64, project_id: u64, total_steps: u32) -> Self {
		Self {
			id,
			project_id,
			status: SessionStatus::Running,
			current_step: 0,
			total_steps,
			logs: Vec::new(),
			started_at: now_ms(),
			completed_at: None,
		}
	}

	pub(crate) fn push_log(&mut self, kind: LogKind, message: impl Into<String>) {
		self.logs.push(LogEntry {
			timestamp: now_ms(),
			message: message.into(),
			kind,
		});
	}
}
