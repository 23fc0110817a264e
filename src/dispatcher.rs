//! # Event Dispatcher
//!
//! Carries [`Event`] values from the backend callback threads into the
//! host's own execution context.
//!
//! The host installs a listener with [`EventDispatcher::init`], which hands
//! back the receiving end of an in-process queue. Callback handlers call
//! [`EventDispatcher::dispatch`] from whatever thread the OS facility uses;
//! the queue crossing is taken even when that happens to be the host thread,
//! keeping delivery uniform.
//!
//! The dispatcher holds only a replaceable sender, never the host itself:
//! when the host context is torn down (receiver dropped) a stale delivery
//! fails silently and the dead sender is discarded. `init` may be called
//! again at any time to attach a fresh context; events dispatched while no
//! listener is installed are dropped.
//!
//! Ordering: one FIFO queue, so events for the same handle arrive in
//! callback order. Cross-handle ordering is not guaranteed by contract.

use crate::event::Event;
use log::debug;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct EventDispatcher {
    sink: Arc<Mutex<Option<mpsc::UnboundedSender<Event>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        EventDispatcher {
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Install a fresh host listener, replacing any previous one. The old
    /// queue is dropped; in-flight events on it are lost with it, matching
    /// host-lifecycle churn semantics.
    pub fn init(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sink.lock().unwrap() = Some(tx);
        rx
    }

    /// Detach the current listener. Subsequent dispatches become no-ops.
    pub fn clear(&self) {
        *self.sink.lock().unwrap() = None;
    }

    pub fn has_listener(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    /// Enqueue one event for the host. Never blocks and never panics across
    /// the callback boundary: a torn-down host context is logged and the
    /// stale sender dropped.
    pub fn dispatch(&self, event: Event) {
        let mut sink = self.sink.lock().unwrap();
        match sink.as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("dispatch: host listener gone, dropping event");
                    *sink = None;
                }
            }
            None => {
                debug!("dispatch: no listener installed, dropping event");
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
