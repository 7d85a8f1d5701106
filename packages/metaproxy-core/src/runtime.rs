//! Task spawning abstraction.
//!
//! Metadata delivery is scheduled through a [`TaskSpawner`] so the embedding
//! application decides which executor runs listener callbacks. A host with a
//! single-threaded UI runtime can pass a spawner bound to that runtime; the
//! default [`TokioSpawner`] uses the ambient tokio runtime.

use std::future::Future;

/// Where the dispatcher runs metadata deliveries.
///
/// Each coalesced delivery to the [`MetadataListener`](crate::MetadataListener)
/// is one spawned future, so the spawner decides the consumer context the
/// listener is called from. Sessions never call the listener themselves.
pub trait TaskSpawner: Send + Sync {
    /// Schedules one delivery. Must not run `future` inline.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Spawner backed by a tokio runtime handle.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a spawner for the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a spawner for the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn delivers_on_the_given_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let spawner = TokioSpawner::new(runtime.handle().clone());
        let (tx, rx) = oneshot::channel();

        spawner.spawn(async move {
            let _ = tx.send("StreamTitle='x';");
        });

        assert_eq!(runtime.block_on(rx).unwrap(), "StreamTitle='x';");
    }
}
