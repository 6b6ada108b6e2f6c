//! Fan-out of session events to connected observers.
//!
//! Delivery is at-most-once and best-effort: every registered observer
//! receives every session's events in emission order, an observer whose
//! channel is gone is dropped rather than retried, and late joiners get no
//! backlog. Per-session subscription filtering is deliberately absent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use scn_protocol::ServerMessage;

/// Handle for an observer registered with the broadcaster.
///
/// Dropping the receiver is enough to disconnect; the sender is pruned on
/// the next broadcast. Calling [`Broadcaster::unsubscribe`] removes it
/// eagerly.
pub struct Subscription {
	pub id: u64,
	pub rx: mpsc::UnboundedReceiver<ServerMessage>,
}

/// Publishes session lifecycle/progress events to all observers.
///
/// Cheap to clone; all clones share the same observer table.
#[derive(Clone)]
pub struct Broadcaster {
	inner: Arc<BroadcasterInner>,
}

struct BroadcasterInner {
	observers: Mutex<HashMap<u64, mpsc::UnboundedSender<ServerMessage>>>,
	next_id: AtomicU64,
}

impl Broadcaster {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(BroadcasterInner {
				observers: Mutex::new(HashMap::new()),
				next_id: AtomicU64::new(1),
			}),
		}
	}

	/// Registers a new observer and returns its event stream.
	pub fn subscribe(&self) -> Subscription {
		let (tx, rx) = mpsc::unbounded_channel();
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner.observers.lock().insert(id, tx);
		debug!(target = "scn.ws", observer = id, "observer subscribed");
		Subscription { id, rx }
	}

	/// Removes an observer.
	pub fn unsubscribe(&self, id: u64) {
		self.inner.observers.lock().remove(&id);
		debug!(target = "scn.ws", observer = id, "observer unsubscribed");
	}

	/// Sends `message` to every observer. Observers that cannot accept it
	/// are dropped.
	pub fn broadcast(&self, message: &ServerMessage) {
		let mut observers = self.inner.observers.lock();
		observers.retain(|id, tx| {
			let delivered = tx.send(message.clone()).is_ok();
			if !delivered {
				debug!(target = "scn.ws", observer = id, "dropping disconnected observer");
			}
			delivered
		});
	}

	/// Number of currently registered observers.
	pub fn observer_count(&self) -> usize {
		self.inner.observers.lock().len()
	}
}

impl Default for Broadcaster {
	fn default() -> Self {
		Self::new()
	}
}
