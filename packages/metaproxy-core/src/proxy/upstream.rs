//! Upstream fetch.
//!
//! Plain `http` origins are fetched over a raw socket: Shoutcast v1 servers
//! answer `ICY 200 OK`, which no HTTP client library accepts, and the status
//! line is relayed to the player exactly as sent. `https` origins go through
//! the shared reqwest client.

use bytes::{Bytes, BytesMut};
use reqwest::{Client, Response, Url, Version};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{ProxyError, ProxyResult};
use crate::protocol_constants::{
    ICY_METADATA_REQUEST_HEADER, ICY_METADATA_REQUEST_VALUE, MAX_REDIRECTS,
    MAX_UPSTREAM_HEAD_BYTES, RELAY_BUFFER_CAPACITY,
};

/// Status line and headers of an origin response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpstreamHead {
    /// First line of the response, without its line ending.
    pub status_line: String,
    pub status: u16,
    /// Headers in arrival order, name and value trimmed.
    pub headers: Vec<(String, String)>,
}

impl UpstreamHead {
    /// Returns the first value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn from_response(response: &Response) -> Self {
        let version = if response.version() == Version::HTTP_10 {
            "HTTP/1.0"
        } else {
            "HTTP/1.1"
        };
        let status = response.status();
        let status_line = format!(
            "{} {} {}",
            version,
            status.as_str(),
            status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string();

        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).trim().to_string(),
                )
            })
            .collect();

        Self {
            status_line,
            status: status.as_u16(),
            headers,
        }
    }
}

/// Response body source.
pub(crate) enum UpstreamBody {
    /// Raw socket, positioned after the head.
    Socket {
        reader: BufReader<TcpStream>,
        /// Bytes left when the origin sent `content-length`.
        remaining: Option<u64>,
        buf: BytesMut,
    },
    /// reqwest response (`https` origins).
    Client(Response),
}

impl UpstreamBody {
    /// Reads the next chunk of body bytes, or `None` at end of stream.
    ///
    /// Cancel-safe: a dropped call loses no data.
    pub async fn chunk(&mut self) -> ProxyResult<Option<Bytes>> {
        match self {
            Self::Socket {
                reader,
                remaining,
                buf,
            } => {
                if *remaining == Some(0) {
                    return Ok(None);
                }
                buf.reserve(RELAY_BUFFER_CAPACITY);
                if reader.read_buf(buf).await? == 0 {
                    return Ok(None);
                }
                if let Some(left) = remaining {
                    let keep = (buf.len() as u64).min(*left);
                    buf.truncate(keep as usize);
                    *left -= keep;
                }
                Ok(Some(buf.split().freeze()))
            }
            Self::Client(response) => Ok(response.chunk().await?),
        }
    }
}

/// An opened origin response.
pub(crate) struct Upstream {
    pub head: UpstreamHead,
    pub body: UpstreamBody,
}

/// Fetches `origin` with inline metadata requested, following redirects.
pub(crate) async fn open(client: &Client, origin: Url, user_agent: &str) -> ProxyResult<Upstream> {
    let mut url = origin;

    for _ in 0..=MAX_REDIRECTS {
        if url.scheme() != "http" {
            return open_with_client(client, url).await;
        }

        let upstream = open_socket(&url, user_agent).await?;
        match redirect_target(&url, &upstream.head) {
            Some(next) => {
                log::debug!(
                    "[Upstream] {} redirected ({}) to {}",
                    url,
                    upstream.head.status,
                    next
                );
                url = next;
            }
            None => return Ok(upstream),
        }
    }

    Err(ProxyError::InvalidUpstreamResponse(format!(
        "more than {MAX_REDIRECTS} redirects"
    )))
}

async fn open_with_client(client: &Client, url: Url) -> ProxyResult<Upstream> {
    let response = client
        .get(url)
        .header(ICY_METADATA_REQUEST_HEADER, ICY_METADATA_REQUEST_VALUE)
        .send()
        .await?;

    Ok(Upstream {
        head: UpstreamHead::from_response(&response),
        body: UpstreamBody::Client(response),
    })
}

async fn open_socket(url: &Url, user_agent: &str) -> ProxyResult<Upstream> {
    let host = url
        .host_str()
        .ok_or_else(|| ProxyError::InvalidTunnelTarget(format!("{url}: missing host")))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let stream = TcpStream::connect((host.trim_start_matches('[').trim_end_matches(']'), port))
        .await?;
    let mut reader = BufReader::new(stream);
    reader
        .get_mut()
        .write_all(socket_request(url, user_agent).as_bytes())
        .await?;

    let head = read_head(&mut reader).await?;
    let remaining = head
        .header("content-length")
        .and_then(|v| v.parse::<u64>().ok());

    Ok(Upstream {
        head,
        body: UpstreamBody::Socket {
            reader,
            remaining,
            buf: BytesMut::new(),
        },
    })
}

/// Renders the GET sent to a plain `http` origin.
///
/// HTTP/1.0 keeps the body unframed: no chunked encoding, end of body is
/// the connection closing.
pub(crate) fn socket_request(url: &Url, user_agent: &str) -> String {
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let host = url.host_str().unwrap_or_default();
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    format!(
        "GET {target} HTTP/1.0\r\n\
         Host: {host}\r\n\
         User-Agent: {user_agent}\r\n\
         Accept: */*\r\n\
         {ICY_METADATA_REQUEST_HEADER}: {ICY_METADATA_REQUEST_VALUE}\r\n\
         Connection: close\r\n\r\n"
    )
}

/// Reads a response head: status line, header lines, blank line.
///
/// Header bytes that are not UTF-8 (Latin-1 station names are common) are
/// replaced rather than rejected. Lines without a colon are skipped.
pub(crate) async fn read_head<R>(reader: &mut R) -> ProxyResult<UpstreamHead>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = (&mut *reader).take(MAX_UPSTREAM_HEAD_BYTES as u64);
    let mut line = Vec::new();
    let mut status_line = None;
    let mut headers = Vec::new();

    loop {
        line.clear();
        if limited.read_until(b'\n', &mut line).await? == 0 {
            let reason = if limited.limit() == 0 {
                format!("head exceeds {MAX_UPSTREAM_HEAD_BYTES} bytes")
            } else {
                "connection closed inside head".to_string()
            };
            return Err(ProxyError::InvalidUpstreamResponse(reason));
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);

        if status_line.is_none() {
            status_line = Some(text.to_string());
            continue;
        }
        if text.is_empty() {
            break;
        }
        match text.split_once(':') {
            Some((name, value)) => {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
            None => log::debug!("[Upstream] Skipping header line {:?}", text),
        }
    }

    let status_line = status_line.unwrap_or_default();
    let status = status_code(&status_line)?;
    Ok(UpstreamHead {
        status_line,
        status,
        headers,
    })
}

/// Extracts the code from `HTTP/1.x <code> ...` or `ICY <code> ...`.
pub(crate) fn status_code(status_line: &str) -> ProxyResult<u16> {
    let mut parts = status_line.split_whitespace();
    let protocol = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();

    if !(protocol.starts_with("HTTP/") || protocol == "ICY") || code.len() != 3 {
        return Err(ProxyError::InvalidUpstreamResponse(format!(
            "status line {status_line:?}"
        )));
    }
    code.parse()
        .map_err(|_| ProxyError::InvalidUpstreamResponse(format!("status line {status_line:?}")))
}

/// Returns where a redirect response points, if it is one.
fn redirect_target(url: &Url, head: &UpstreamHead) -> Option<Url> {
    if !matches!(head.status, 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    let next = url.join(head.header("location")?).ok()?;
    matches!(next.scheme(), "http" | "https").then_some(next)
}
