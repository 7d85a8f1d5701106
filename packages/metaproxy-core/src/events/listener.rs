//! Metadata listener abstraction.
//!
//! The proxy depends on the [`MetadataListener`] trait rather than a concrete
//! callback type, so a UI layer or a test can observe stream metadata.

/// Receives raw metadata text as it is delivered.
///
/// Calls come from the dispatcher's delivery task, never from a session's
/// relay loop, and are coalesced: only the most recent text at each delivery
/// is seen.
///
/// # Example
///
/// ```ignore
/// let listener: Arc<dyn MetadataListener> = Arc::new(|text: &str| {
///     let meta = IcyMetadata::parse(text);
///     println!("Now playing: {}", meta.stream_title());
/// });
/// ```
pub trait MetadataListener: Send + Sync {
    /// Called with the decoded text of a completed metadata block.
    fn on_metadata(&self, text: &str);
}

impl<F> MetadataListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_metadata(&self, text: &str) {
        self(text)
    }
}

/// Listener that discards everything.
pub struct NoopMetadataListener;

impl MetadataListener for NoopMetadataListener {
    fn on_metadata(&self, _text: &str) {
        // No-op
    }
}
