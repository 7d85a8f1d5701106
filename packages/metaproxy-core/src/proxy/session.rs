//! Per-connection relay.
//!
//! A session reads the tunneled request from the media player, fetches the
//! origin with inline metadata enabled, relays the response head without the
//! metadata interval header, then pumps the body through an [`IcyDemuxer`]
//! so the player only ever sees audio.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use reqwest::{Client, Url};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::registry::SessionGuard;
use super::upstream::{self, Upstream, UpstreamBody};
use crate::config::ProxyConfig;
use crate::error::{ErrorCode, ProxyError, ProxyResult};
use crate::events::MetadataDispatcher;
use crate::protocol_constants::{
    HOP_BY_HOP_HEADERS, ICY_METAINT_HEADER, LOGGED_CHUNKS_PER_SESSION, RELAY_BUFFER_CAPACITY,
};
use crate::stream::{IcyDemuxer, IcyMetadata, StreamSink};
use crate::tunnel::decode_tunnel_target;

/// State shared by every session of one proxy.
pub(crate) struct SessionContext {
    pub config: ProxyConfig,
    pub client: Client,
    pub dispatcher: Arc<MetadataDispatcher>,
}

/// Where a session is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingRequest,
    Connecting,
    Relaying,
    Closed,
}

/// One downstream connection and its upstream fetch.
pub(crate) struct ProxySession {
    stream: TcpStream,
    peer: SocketAddr,
    guard: SessionGuard,
    cancel: CancellationToken,
    ctx: Arc<SessionContext>,
    demuxer: IcyDemuxer,
    phase: SessionPhase,
}

impl ProxySession {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        guard: SessionGuard,
        ctx: Arc<SessionContext>,
    ) -> Self {
        let cancel = guard.cancel_token().clone();
        Self {
            stream,
            peer,
            guard,
            cancel,
            ctx,
            demuxer: IcyDemuxer::new(),
            phase: SessionPhase::AwaitingRequest,
        }
    }

    fn id(&self) -> u64 {
        self.guard.id()
    }

    /// Runs the session to completion. The downstream socket is always shut
    /// down before returning.
    pub async fn run(mut self) {
        log::debug!("[Session {}] Accepted {}", self.id(), self.peer);

        let result = self.serve().await;
        let phase = self.phase;
        self.phase = SessionPhase::Closed;

        match result {
            Ok(()) => log::info!("[Session {}] Finished", self.id()),
            Err(ProxyError::Stopped) => {
                log::debug!("[Session {}] Stopped during {:?}", self.id(), phase)
            }
            Err(e) if e.is_malformed_input() => log::warn!(
                "[Session {}] Rejected ({}): {}",
                self.id(),
                e.code(),
                e
            ),
            Err(e) => log::info!(
                "[Session {}] Ended during {:?} ({}): {}",
                self.id(),
                phase,
                e.code(),
                e
            ),
        }

        if let Err(e) = self.stream.shutdown().await {
            log::trace!("[Session {}] Shutdown: {}", self.id(), e);
        }
    }

    async fn serve(&mut self) -> ProxyResult<()> {
        let cancel = self.cancel.clone();
        let request_timeout = self.ctx.config.request_timeout();

        let request_line = tokio::select! {
            _ = cancel.cancelled() => return Err(ProxyError::Stopped),
            res = timeout(request_timeout, self.read_request_line()) => {
                res.map_err(|_| ProxyError::Timeout("downstream request"))??
            }
        };
        let Some(request_line) = request_line else {
            log::debug!("[Session {}] No request line, closing", self.id());
            return Ok(());
        };

        let target = request_target(&request_line)?;
        let origin = decode_tunnel_target(target)?;
        log::info!("[Session {}] Tunneling {}", self.id(), origin);

        self.phase = SessionPhase::Connecting;
        let Upstream { head, body } = self.connect_upstream(origin).await?;
        let metaint = parse_metaint(&head.headers)?;
        log::debug!(
            "[Session {}] Upstream {:?} (metaint {})",
            self.id(),
            head.status_line,
            metaint
        );

        let response_head = build_response_head(&head.status_line, &head.headers, metaint > 0);
        self.write_downstream(response_head.as_bytes()).await?;
        self.demuxer.configure(metaint);
        self.phase = SessionPhase::Relaying;
        self.relay(body).await
    }

    /// Reads the request head and returns its first line.
    ///
    /// Returns `None` when the head is blank or the peer closes first.
    async fn read_request_line(&mut self) -> ProxyResult<Option<String>> {
        let limit = self.ctx.config.max_request_head_bytes as u64;
        let mut reader = BufReader::new((&mut self.stream).take(limit));
        let mut request_line = None;
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                if reader.get_ref().limit() == 0 {
                    return Err(ProxyError::MalformedRequest(format!(
                        "request head exceeds {limit} bytes"
                    )));
                }
                break;
            }

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }
            if request_line.is_none() {
                request_line = Some(trimmed.to_string());
            }
        }

        Ok(request_line)
    }

    /// Opens the origin. The connect timeout covers everything up to the
    /// end of the response head, redirects included.
    async fn connect_upstream(&self, origin: Url) -> ProxyResult<Upstream> {
        let open = upstream::open(&self.ctx.client, origin, &self.ctx.config.user_agent);

        tokio::select! {
            _ = self.cancel.cancelled() => Err(ProxyError::Stopped),
            res = timeout(self.ctx.config.connect_timeout(), open) => {
                res.map_err(|_| ProxyError::Timeout("upstream connect"))?
            }
        }
    }

    /// Writes to the player. Not time-bounded: a paused player stops
    /// reading without being gone.
    async fn write_downstream(&mut self, bytes: &[u8]) -> ProxyResult<()> {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Err(ProxyError::Stopped),
            res = self.stream.write_all(bytes) => Ok(res?),
        }
    }

    async fn relay(&mut self, mut body: UpstreamBody) -> ProxyResult<()> {
        let cancel = self.cancel.clone();
        let read_timeout = self.ctx.config.read_timeout();
        let id = self.id();

        let mut audio = BytesMut::with_capacity(RELAY_BUFFER_CAPACITY);
        let mut logged_chunks: u32 = 0;
        let mut idle_reads: u32 = 0;
        let mut bytes_in: u64 = 0;
        let mut bytes_out: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(ProxyError::Stopped),
                res = timeout(read_timeout, body.chunk()) => res,
            };

            let chunk = match next {
                Err(_) => {
                    idle_reads += 1;
                    log::debug!(
                        "[Session {}] No upstream data for {:?} ({} in a row)",
                        id,
                        read_timeout,
                        idle_reads
                    );
                    continue;
                }
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => {
                    log::info!(
                        "[Session {}] Upstream ended ({} bytes in, {} bytes out)",
                        id,
                        bytes_in,
                        bytes_out
                    );
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e),
            };
            idle_reads = 0;
            bytes_in += chunk.len() as u64;

            if logged_chunks < LOGGED_CHUNKS_PER_SESSION {
                logged_chunks += 1;
                log::debug!(
                    "[Session {}] Chunk {}: {} bytes",
                    id,
                    logged_chunks,
                    chunk.len()
                );
            }

            let mut sink = RelaySink {
                session_id: id,
                audio: &mut audio,
                dispatcher: &self.ctx.dispatcher,
            };
            self.demuxer.feed(&chunk, &mut sink);

            if !audio.is_empty() {
                self.write_downstream(&audio).await?;
                bytes_out += audio.len() as u64;
                audio.clear();
            }
        }
    }
}

/// Collects audio for the next downstream write and posts metadata.
struct RelaySink<'a> {
    session_id: u64,
    audio: &'a mut BytesMut,
    dispatcher: &'a MetadataDispatcher,
}

impl StreamSink for RelaySink<'_> {
    fn write_audio(&mut self, audio: &[u8]) {
        self.audio.extend_from_slice(audio);
    }

    fn metadata_complete(&mut self, text: String) {
        let metadata = IcyMetadata::parse(&text);
        log::debug!(
            "[Session {}] Metadata: {:?}",
            self.session_id,
            metadata.stream_title()
        );
        self.dispatcher.post(&text);
    }
}

/// Returns the second whitespace-separated token of the request line.
pub(crate) fn request_target(request_line: &str) -> ProxyResult<&str> {
    request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ProxyError::MalformedRequest(format!("{request_line:?}")))
}

/// Reads the metadata interval; 0 when the origin sent none.
pub(crate) fn parse_metaint(headers: &[(String, String)]) -> ProxyResult<usize> {
    let Some((_, value)) = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(ICY_METAINT_HEADER))
    else {
        return Ok(0);
    };
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ProxyError::InvalidMetaInt(value.clone()))
}

/// Renders the status line and relayed headers, ending with a blank line.
///
/// The status line is relayed as the origin sent it. The metadata interval
/// header and framing headers are dropped. When the body is being
/// demultiplexed its length changes, so `content-length` is dropped too.
pub(crate) fn build_response_head(
    status_line: &str,
    headers: &[(String, String)],
    demuxing: bool,
) -> String {
    let mut head = String::with_capacity(256);
    head.push_str(status_line.trim());
    head.push_str("\r\n");

    for (name, value) in headers {
        if name.eq_ignore_ascii_case(ICY_METAINT_HEADER)
            || HOP_BY_HOP_HEADERS
                .iter()
                .any(|h| name.eq_ignore_ascii_case(h))
            || (demuxing && name.eq_ignore_ascii_case("content-length"))
        {
            continue;
        }
        head.push_str(name.trim());
        head.push_str(": ");
        head.push_str(value.trim());
        head.push_str("\r\n");
    }

    head.push_str("\r\n");
    head
}
