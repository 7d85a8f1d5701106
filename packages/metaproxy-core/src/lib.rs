//! Metaproxy Core - loopback ICY metadata proxy.
//!
//! Internet radio origins (Icecast/Shoutcast) interleave text metadata into
//! the audio byte stream when asked to. Ordinary media players cannot consume
//! that stream. This crate runs a small HTTP proxy on the loopback interface:
//! the player is pointed at a tunnel URL, the proxy fetches the origin with
//! metadata enabled, strips the metadata out, and hands it to the
//! application.
//!
//! # Architecture
//!
//! - [`stream`]: the interleave demultiplexer and the metadata text parser
//! - [`proxy`]: the acceptor, per-connection sessions and session registry
//! - [`events`]: coalescing delivery of metadata to a listener
//! - [`tunnel`]: tunnel URL encoding and decoding
//! - [`config`]: timeouts and bind preferences
//! - [`error`]: centralized error types
//!
//! # Example
//!
//! ```ignore
//! let listener = Arc::new(|text: &str| {
//!     println!("Now playing: {}", IcyMetadata::parse(text).stream_title());
//! });
//! let proxy = MetaStreamProxy::start(ProxyConfig::default(), listener)?;
//! player.play(&proxy.tunnel_url("http://radio.example/live"));
//! // ...
//! proxy.stop().await;
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod proxy;
pub mod runtime;
pub mod stream;
pub mod tunnel;
pub mod utils;

// Re-export commonly used types at the crate root
pub use config::{BindPreference, ProxyConfig};
pub use error::{ErrorCode, ProxyError, ProxyResult};
pub use events::{MetadataDispatcher, MetadataListener, NoopMetadataListener};
pub use proxy::{MetaStreamProxy, SessionInfo};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use stream::{IcyDemuxer, IcyMetadata, StreamSink};
pub use tunnel::{decode_tunnel_target, encode_tunnel_target, TunnelUrlBuilder};
