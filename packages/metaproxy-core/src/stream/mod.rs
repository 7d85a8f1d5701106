//! Upstream stream handling: ICY demultiplexing and metadata parsing.

pub mod icy;
pub mod metadata;

pub use icy::{DemuxState, IcyDemuxer, StreamSink};
pub use metadata::IcyMetadata;
