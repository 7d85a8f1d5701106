//! Coalescing hand-off of metadata from session tasks to the listener.
//!
//! Sessions call [`MetadataDispatcher::post`] from their relay loop. The
//! dispatcher keeps a single slot holding the latest text and schedules at
//! most one delivery at a time on its [`TaskSpawner`]. Posts that land while
//! a delivery is pending only overwrite the slot, so a burst collapses to its
//! final value.

use std::sync::Arc;

use parking_lot::Mutex;

use super::MetadataListener;
use crate::runtime::{TaskSpawner, TokioSpawner};

struct DispatchState {
    latest: String,
    pending: bool,
    listener: Option<Arc<dyn MetadataListener>>,
    /// Bumped on detach so deliveries scheduled earlier turn into no-ops.
    generation: u64,
}

struct Shared {
    state: Mutex<DispatchState>,
}

impl Shared {
    fn deliver(&self, generation: u64) {
        let (listener, text) = {
            let mut state = self.state.lock();
            if state.generation != generation {
                log::trace!("[Dispatcher] Dropping delivery scheduled before detach");
                return;
            }
            state.pending = false;
            match state.listener.clone() {
                Some(listener) => (listener, state.latest.clone()),
                None => return,
            }
        };

        tracing::debug!(len = text.len(), "metadata_dispatch");
        listener.on_metadata(&text);
    }
}

/// Single-slot, last-write-wins mailbox between sessions and a listener.
pub struct MetadataDispatcher<S: TaskSpawner = TokioSpawner> {
    shared: Arc<Shared>,
    spawner: S,
}

impl<S: TaskSpawner> MetadataDispatcher<S> {
    /// Creates a dispatcher with no listener attached.
    pub fn new(spawner: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DispatchState {
                    latest: String::new(),
                    pending: false,
                    listener: None,
                    generation: 0,
                }),
            }),
            spawner,
        }
    }

    /// Attaches (or replaces) the listener.
    ///
    /// A delivery already pending will reach the new listener.
    pub fn attach(&self, listener: Arc<dyn MetadataListener>) {
        self.shared.state.lock().listener = Some(listener);
    }

    /// Detaches the listener. A pending delivery will not fire.
    pub fn detach(&self) {
        let mut state = self.shared.state.lock();
        state.listener = None;
        state.pending = false;
        state.generation = state.generation.wrapping_add(1);
    }

    /// Returns true if a listener is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.shared.state.lock().listener.is_some()
    }

    /// Stores `text` as the latest value and schedules a delivery if none is
    /// pending.
    ///
    /// Ignored while no listener is attached. Never blocks beyond a short
    /// lock.
    pub fn post(&self, text: &str) {
        let generation = {
            let mut state = self.shared.state.lock();
            if state.listener.is_none() {
                return;
            }
            state.latest.clear();
            state.latest.push_str(text);
            if state.pending {
                return;
            }
            state.pending = true;
            state.generation
        };

        let shared = Arc::clone(&self.shared);
        self.spawner.spawn(async move {
            shared.deliver(generation);
        });
    }

    /// Returns the most recently posted text (empty before any post).
    #[must_use]
    pub fn latest(&self) -> String {
        self.shared.state.lock().latest.clone()
    }
}

impl MetadataDispatcher<TokioSpawner> {
    /// Creates a dispatcher that delivers on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self::new(TokioSpawner::current())
    }
}
