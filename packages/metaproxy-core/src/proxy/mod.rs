//! Loopback proxy server.
//!
//! [`MetaStreamProxy`] owns the listening socket and the acceptor task. Each
//! accepted connection becomes one session task, tracked in a
//! [`SessionRegistry`] and a [`TaskTracker`] so `stop()` can close every
//! downstream socket and wait for the tasks to finish.

mod registry;
mod session;
mod upstream;

pub use registry::{SessionGuard, SessionInfo, SessionRegistry};
pub use session::SessionPhase;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::events::{MetadataDispatcher, MetadataListener};
use crate::tunnel::TunnelUrlBuilder;
use session::{ProxySession, SessionContext};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the acceptor.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A running loopback metadata proxy.
///
/// Not restartable: after [`stop`](Self::stop), create a new instance.
pub struct MetaStreamProxy {
    local_addr: SocketAddr,
    stopped: AtomicBool,
    cancel: CancellationToken,
    registry: Arc<SessionRegistry>,
    tracker: TaskTracker,
    dispatcher: Arc<MetadataDispatcher>,
    shutdown_timeout: Duration,
}

impl MetaStreamProxy {
    /// Binds the loopback listener and starts accepting connections.
    ///
    /// Returns once the listener is bound, so [`port`](Self::port) is usable
    /// immediately. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::InvalidConfig`] if `config` fails validation
    /// - [`ProxyError::Bind`] if no loopback address could be bound
    pub fn start(config: ProxyConfig, listener: Arc<dyn MetadataListener>) -> ProxyResult<Self> {
        config.validate().map_err(ProxyError::InvalidConfig)?;

        let tcp_listener = bind_loopback(&config)?;
        let local_addr = tcp_listener.local_addr().map_err(ProxyError::Bind)?;
        let client = build_http_client(&config)?;

        let dispatcher = Arc::new(MetadataDispatcher::current());
        dispatcher.attach(listener);

        let cancel = CancellationToken::new();
        let registry = Arc::new(SessionRegistry::new(cancel.clone()));
        let tracker = TaskTracker::new();
        let shutdown_timeout = config.shutdown_timeout();

        let ctx = Arc::new(SessionContext {
            config,
            client,
            dispatcher: Arc::clone(&dispatcher),
        });

        tracker.spawn(accept_loop(
            tcp_listener,
            ctx,
            Arc::clone(&registry),
            tracker.clone(),
            cancel.clone(),
        ));

        log::info!("[Proxy] Listening on {}", local_addr);

        Ok(Self {
            local_addr,
            stopped: AtomicBool::new(false),
            cancel,
            registry,
            tracker,
            dispatcher,
            shutdown_timeout,
        })
    }

    /// Returns whether the proxy is still accepting connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Returns the listening port, or 0 once stopped.
    #[must_use]
    pub fn port(&self) -> u16 {
        if self.is_running() {
            self.local_addr.port()
        } else {
            0
        }
    }

    /// Returns the listening address, or `None` once stopped.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.is_running().then_some(self.local_addr)
    }

    /// Returns the loopback URL that tunnels `origin` through this proxy.
    ///
    /// Once stopped, returns `origin` unchanged so the caller plays the
    /// stream directly, without metadata.
    #[must_use]
    pub fn tunnel_url(&self, origin: &str) -> String {
        match self.local_addr() {
            Some(addr) => TunnelUrlBuilder::new(addr).tunnel_url(origin),
            None => origin.to_string(),
        }
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry.session_count()
    }

    /// Returns a snapshot of live sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<(u64, SessionInfo)> {
        self.registry.sessions()
    }

    /// Returns the most recently posted metadata text.
    #[must_use]
    pub fn latest_metadata(&self) -> String {
        self.dispatcher.latest()
    }

    /// Closes every current session but keeps listening.
    ///
    /// Useful when the player switches stations. Returns the number of
    /// sessions signalled.
    pub fn close_sessions(&self) -> usize {
        self.registry.close_all()
    }

    /// Stops the proxy: closes all sessions and the listener, then waits up
    /// to the configured shutdown timeout for tasks to finish.
    ///
    /// Idempotent. Pending metadata deliveries are dropped.
    pub async fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        log::info!(
            "[Proxy] Stopping ({} active session(s))",
            self.registry.session_count()
        );

        self.dispatcher.detach();
        self.registry.close_all();
        self.cancel.cancel();
        self.tracker.close();

        if tokio::time::timeout(self.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            log::warn!(
                "[Proxy] {} task(s) still running after {:?}",
                self.tracker.len(),
                self.shutdown_timeout
            );
        } else {
            log::info!("[Proxy] Stopped");
        }
    }
}

impl Drop for MetaStreamProxy {
    fn drop(&mut self) {
        if self.is_running() {
            log::debug!("[Proxy] Dropped while running, cancelling tasks");
        }
        self.dispatcher.detach();
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            res = listener.accept() => res,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("[Proxy] Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        let guard = registry.register(peer);
        let session = ProxySession::new(stream, peer, guard, Arc::clone(&ctx));
        tracker.spawn(session.run());
    }

    log::debug!("[Proxy] Accept loop exited, closing listener");
}

/// Binds the first loopback address that works, in preference order.
fn bind_loopback(config: &ProxyConfig) -> ProxyResult<TcpListener> {
    let mut last_err = None;

    for ip in config.bind.candidates() {
        let addr = SocketAddr::new(*ip, 0);
        match create_listener(addr, config.listen_backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                log::debug!("[Proxy] Cannot bind {}: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(ProxyError::Bind(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no loopback address configured",
        )
    })))
}

/// Creates a non-blocking listening socket with an explicit backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    // Set non-blocking before converting to tokio listener
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

fn build_http_client(config: &ProxyConfig) -> ProxyResult<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .user_agent(config.user_agent.clone())
        .no_proxy()
        .build()
        .map_err(|e| ProxyError::InvalidConfig(format!("HTTP client: {e}")))
}
