//! Delivery of metadata to the embedding application.
//!
//! This module provides:
//! - [`MetadataListener`], the consumer-side callback trait
//! - [`MetadataDispatcher`], which coalesces posts from session tasks into
//!   at most one pending delivery

mod dispatcher;
mod listener;

pub use dispatcher::MetadataDispatcher;
pub use listener::{MetadataListener, NoopMetadataListener};
