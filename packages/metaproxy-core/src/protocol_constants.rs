//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the ICY (Shoutcast/Icecast) convention and
//! changing them would break compatibility with origin servers.

// ─────────────────────────────────────────────────────────────────────────────
// ICY Protocol (Shoutcast/Icecast metadata)
// ─────────────────────────────────────────────────────────────────────────────

/// Request header asking an Icecast-compatible origin to interleave metadata.
pub const ICY_METADATA_REQUEST_HEADER: &str = "Icy-MetaData";

/// Value of [`ICY_METADATA_REQUEST_HEADER`] that enables inline metadata.
pub const ICY_METADATA_REQUEST_VALUE: &str = "1";

/// Response header carrying the metadata interval (audio bytes between blocks).
///
/// Compared case-insensitively; never relayed to the downstream client.
pub const ICY_METAINT_HEADER: &str = "icy-metaint";

/// Each unit of the metadata length byte stands for this many bytes.
pub const ICY_LENGTH_UNIT: usize = 16;

/// Largest metadata block a single length byte can announce (255 × 16).
pub const MAX_METADATA_LEN: usize = u8::MAX as usize * ICY_LENGTH_UNIT;

/// Well-known metadata key carrying "Artist - Title".
pub const STREAM_TITLE_KEY: &str = "StreamTitle";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// Response headers that describe the upstream framing rather than content.
///
/// The relay forwards a de-chunked body, so these must not reach the client.
pub const HOP_BY_HOP_HEADERS: &[&str] = &["transfer-encoding"];

/// Cap on the upstream response head read over a plain socket.
pub const MAX_UPSTREAM_HEAD_BYTES: usize = 16 * 1024;

/// Redirects followed before the upstream fetch gives up.
pub const MAX_REDIRECTS: usize = 10;

/// Size of the downstream write buffer reused across relay iterations.
pub const RELAY_BUFFER_CAPACITY: usize = 16 * 1024;

/// Number of relayed chunks logged per session so stream start is visible.
pub const LOGGED_CHUNKS_PER_SESSION: u32 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// User agent sent to origin servers.
pub const USER_AGENT: &str = concat!("metaproxy/", env!("CARGO_PKG_VERSION"));
