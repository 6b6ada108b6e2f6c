//! The session registry: authoritative owner of session records.
//!
//! Every session lives in its own cell with its own lock and its own
//! status watch channel, so control signals for one session never contend
//! with another session's executor. All mutations go through
//! [`SessionCell::update`], which applies the change under the cell lock
//! and wakes any executor blocked on the status channel - there is no
//! polling and no process-wide lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use scn_protocol::SessionStatus;

use crate::error::{EngineError, Result};
use crate::session::{LogKind, Session, now_ms};

/// One registered session: the record plus its signaling primitive.
pub struct SessionCell {
	record: Mutex<Session>,
	status_tx: watch::Sender<SessionStatus>,
}

impl std::fmt::Debug for SessionCell {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionCell").field("record", &*self.record.lock()).finish_non_exhaustive()
	}
}

impl SessionCell {
	fn new(session: Session) -> Self {
		let (status_tx, _) = watch::channel(session.status);
		Self {
			record: Mutex::new(session),
			status_tx,
		}
	}

	/// Returns a point-in-time copy of the record.
	pub fn snapshot(&self) -> Session {
		self.record.lock().clone()
	}

	/// Applies `mutate` as one atomic read-modify-write and returns the
	/// resulting snapshot. Status changes are mirrored into the watch
	/// channel so blocked waiters observe them immediately.
	pub fn update<F>(&self, mutate: F) -> Session
	where
		F: FnOnce(&mut Session),
	{
		let mut record = self.record.lock();
		mutate(&mut record);
		let snapshot = record.clone();
		drop(record);
		self.status_tx.send_replace(snapshot.status);
		snapshot
	}

	/// Subscribes to status changes for this session.
	pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
		self.status_tx.subscribe()
	}

	/// Suspends until the session is `Running` again or has reached a
	/// terminal state. Used for both the pause wait and the
	/// manual-verification wait; there is deliberately no timeout on the
	/// latter - verification is human-paced.
	pub async fn wait_until_runnable(&self) -> SessionStatus {
		let mut rx = self.subscribe();
		match rx
			.wait_for(|status| *status == SessionStatus::Running || status.is_terminal())
			.await
		{
			Ok(status) => *status,
			// The sender lives as long as the cell; a closed channel means
			// the registry dropped us, which we treat as a stop.
			Err(_) => SessionStatus::Completed,
		}
	}
}

/// Tracks all in-flight and historical sessions.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SessionRegistry {
	inner: Arc<RegistryInner>,
}

struct RegistryInner {
	sessions: DashMap<u64, Arc<SessionCell>>,
	next_id: AtomicU64,
	/// Serializes the active-session check against insertion so two
	/// concurrent creates for one project cannot both succeed.
	create_lock: Mutex<()>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(RegistryInner {
				sessions: DashMap::new(),
				next_id: AtomicU64::new(1),
				create_lock: Mutex::new(()),
			}),
		}
	}

	/// Creates a session for `project_id`, rejecting the request when the
	/// project already has one in an active state. The session is born
	/// `Running`.
	pub fn create(&self, project_id: u64, total_steps: u32) -> Result<Arc<SessionCell>> {
		let _guard = self.inner.create_lock.lock();

		if self.active_session_for_project(project_id).is_some() {
			return Err(EngineError::AlreadyRunning { project_id });
		}

		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		let cell = Arc::new(SessionCell::new(Session::new(id, project_id, total_steps)));
		self.inner.sessions.insert(id, Arc::clone(&cell));
		debug!(target = "scn.session", session_id = id, project_id, total_steps, "session created");
		Ok(cell)
	}

	/// Returns the cell for `id`, for executor use.
	pub fn cell(&self, id: u64) -> Result<Arc<SessionCell>> {
		self.inner
			.sessions
			.get(&id)
			.map(|entry| Arc::clone(entry.value()))
			.ok_or(EngineError::SessionNotFound { id })
	}

	/// Point-in-time copy of one session.
	pub fn session(&self, id: u64) -> Result<Session> {
		Ok(self.cell(id)?.snapshot())
	}

	/// Point-in-time copies of all sessions, oldest first.
	pub fn sessions(&self) -> Vec<Session> {
		let mut all: Vec<Session> = self
			.inner
			.sessions
			.iter()
			.map(|entry| entry.value().snapshot())
			.collect();
		all.sort_by_key(|s| s.id);
		all
	}

	/// The id of the project's session in an active state, if any.
	pub fn active_session_for_project(&self, project_id: u64) -> Option<u64> {
		self.inner.sessions.iter().find_map(|entry| {
			let session = entry.value().record.lock();
			(session.project_id == project_id && session.status.is_active()).then_some(session.id)
		})
	}

	/// Pause a running session. Signals for sessions in any other state
	/// are ignored.
	pub fn pause(&self, id: u64) -> Result<()> {
		self.transition(id, SessionStatus::Running, SessionStatus::Paused, "execution paused")
	}

	/// Resume a paused session.
	pub fn resume(&self, id: u64) -> Result<()> {
		self.transition(id, SessionStatus::Paused, SessionStatus::Running, "execution resumed")
	}

	/// Record that a human completed the pending verification. Only valid
	/// while the session is in the manual-verification state.
	pub fn complete_manual_verification(&self, id: u64) -> Result<()> {
		self.transition(
			id,
			SessionStatus::ManualVerification,
			SessionStatus::Running,
			"manual verification completed",
		)
	}

	/// Stop a session: a clean terminal stop from any active state. The
	/// executor observes the terminal status and starts no further steps;
	/// an in-flight backend call is never aborted.
	pub fn stop(&self, id: u64) -> Result<()> {
		let cell = self.cell(id)?;
		cell.update(|session| {
			if session.status.is_active() {
				session.status = SessionStatus::Completed;
				session.completed_at = Some(now_ms());
				session.push_log(LogKind::Info, "Execution stopped");
			} else {
				debug!(
					target = "scn.session",
					session_id = id,
					status = %session.status,
					"ignoring stop signal in non-active state"
				);
			}
		});
		Ok(())
	}

	fn transition(&self, id: u64, from: SessionStatus, to: SessionStatus, log: &str) -> Result<()> {
		let cell = self.cell(id)?;
		cell.update(|session| {
			if session.status == from {
				session.status = to;
				session.push_log(LogKind::Info, log);
			} else {
				debug!(
					target = "scn.session",
					session_id = id,
					status = %session.status,
					requested = %to,
					"ignoring control signal; transition not valid from current state"
				);
			}
		});
		Ok(())
	}
}

impl Default for SessionRegistry {
	fn default() -> Self {
		Self::new()
	}
}
