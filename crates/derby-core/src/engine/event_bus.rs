//! Broadcast channel for race events.
//!
//! Every phase change, balance refresh, selection change and per-chain result
//! update is published here. Subscribers that fall behind lose the oldest
//! events; the snapshot accessors on the engine are the source of truth.

use derby_types::RaceEvent;
use tokio::sync::broadcast;

/// Event bus for broadcasting race events to any number of observers.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<RaceEvent>,
}

impl EventBus {
	/// Creates a bus buffering up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Each subscriber sees the events published after it subscribed.
	pub fn subscribe(&self) -> broadcast::Receiver<RaceEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers.
	///
	/// Fails only when nobody is listening, which callers ignore.
	pub fn publish(&self, event: RaceEvent) -> Result<(), broadcast::error::SendError<RaceEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}
