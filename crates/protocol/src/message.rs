//! JSON messages exchanged over the real-time channel.
//!
//! Server-to-client messages carry session progress; client-to-server
//! messages are control signals. Both sides use a `type` tag with
//! snake_case names and camelCase payload fields.

use serde::{Deserialize, Serialize};

use crate::status::SessionStatus;

/// Message sent by the server to every connected observer.
///
/// Delivery is fan-out, at-most-once, best-effort: every observer sees
/// every session's events, and there is no replay for late joiners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	#[serde(rename_all = "camelCase")]
	ExecutionUpdate {
		session_id: u64,
		status: SessionStatus,
		current_step: u32,
		total_steps: u32,
		message: String,
	},
	#[serde(rename_all = "camelCase")]
	ManualVerificationRequired {
		session_id: u64,
		current_step: u32,
		total_steps: u32,
		message: String,
	},
	#[serde(rename_all = "camelCase")]
	ExecutionComplete {
		session_id: u64,
		current_step: u32,
		total_steps: u32,
		message: String,
	},
	#[serde(rename_all = "camelCase")]
	ExecutionError { session_id: u64, message: String },
	Pong,
}

impl ServerMessage {
	/// The session this message concerns, if any.
	pub fn session_id(&self) -> Option<u64> {
		match self {
			ServerMessage::ExecutionUpdate { session_id, .. }
			| ServerMessage::ManualVerificationRequired { session_id, .. }
			| ServerMessage::ExecutionComplete { session_id, .. }
			| ServerMessage::ExecutionError { session_id, .. } => Some(*session_id),
			ServerMessage::Pong => None,
		}
	}
}

/// Control message sent by an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
	#[serde(rename_all = "camelCase")]
	ManualVerificationComplete { session_id: u64 },
	Ping,
}
