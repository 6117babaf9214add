//! [`AngleServer`] – TCP listener and lifecycle controller.
//!
//! Listens on `127.0.0.1:5001` by default (configurable via
//! [`AngleServer::with_host`] / [`AngleServer::with_port`]).
//!
//! * [`AngleServer::start`] binds with `SO_REUSEADDR`, moves the server to
//!   [`ServerState::Listening`] and spawns the accept loop.
//! * Every accepted connection gets its own [`ClientSession`] task.
//! * [`ServerHandle::stop`] raises the shared stop flag; the accept loop closes
//!   the listener and then waits for every session to notice the flag on its
//!   own tick boundary.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anglestream_types::{DEFAULT_HOST, DEFAULT_PORT, StreamError};
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::session::ClientSession;
use crate::shutdown::ShutdownSignal;
use crate::store::StateStore;

/// Default time between two lines sent to the same client.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

/// Pending-connection backlog passed to `listen(2)`.
const LISTEN_BACKLOG: u32 = 1024;

/// Pause after a failed `accept` so a persistent error (e.g. `EMFILE`) does not
/// spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of one [`AngleServer`]:
/// `Stopped → Starting → Listening → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

type SharedState = Arc<Mutex<ServerState>>;

fn set_state(state: &SharedState, next: ServerState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

fn get_state(state: &SharedState) -> ServerState {
    *state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// AngleServer
// ─────────────────────────────────────────────────────────────────────────────

/// Streams the latest joint angles to every connected TCP client.
///
/// # Example
///
/// ```rust,no_run
/// use anglestream_server::AngleServer;
///
/// #[tokio::main]
/// async fn main() {
///     let server = AngleServer::new(["right_shoulder", "right_elbow"])
///         .expect("valid joint keys")
///         .with_port(5001);
///     let handle = server.start().await.expect("bind failed");
///
///     server
///         .update([("right_shoulder", [30.0, 0.0, 0.0]), ("right_elbow", [0.0, 90.0, 0.0])])
///         .expect("valid update");
///
///     handle.stop();
///     handle.join().await.expect("clean shutdown");
/// }
/// ```
pub struct AngleServer {
    store: Arc<StateStore>,
    host: String,
    port: u16,
    interval: Duration,
    write_timeout: Option<Duration>,
    state: SharedState,
}

impl AngleServer {
    /// Create a stopped server for `joint_keys` on the default address and
    /// interval.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] for an invalid key list; see
    /// [`StateStore::new`].
    pub fn new<I, S>(joint_keys: I) -> Result<Self, StreamError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            store: Arc::new(StateStore::new(joint_keys)?),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            interval: DEFAULT_INTERVAL,
            write_timeout: None,
            state: Arc::new(Mutex::new(ServerState::Stopped)),
        })
    }

    /// Override the bind host (builder-style).
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Override the bind port (builder-style). `0` picks a free port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the per-client send interval (builder-style).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Give up on a client whose single write blocks longer than `timeout`.
    ///
    /// Off by default: a stalled client then blocks only its own session.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> ServerState {
        get_state(&self.state)
    }

    /// Shared handle to the state store, for producers on other threads.
    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    /// Forward to [`StateStore::update`].
    pub fn update<I, K, V>(&self, angles: I) -> Result<(), StreamError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[f64]>,
    {
        self.store.update(angles)
    }

    /// Bind the listener and spawn the accept loop.
    ///
    /// The server may be started again once a previous run has fully
    /// stopped; the joint state carries over.
    ///
    /// # Errors
    ///
    /// * [`StreamError::Config`] if the interval is zero or the server is not
    ///   [`ServerState::Stopped`].
    /// * [`StreamError::Bind`] if the address cannot be resolved or bound; the
    ///   server returns to [`ServerState::Stopped`].
    pub async fn start(&self) -> Result<ServerHandle, StreamError> {
        if self.interval.is_zero() {
            return Err(StreamError::Config("send interval must be non-zero".to_string()));
        }
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ServerState::Stopped {
                return Err(StreamError::Config(format!(
                    "server cannot start while {:?}",
                    *state
                )));
            }
            *state = ServerState::Starting;
        }

        let listener = match bind(&self.host, self.port).await {
            Ok(listener) => listener,
            Err(e) => {
                set_state(&self.state, ServerState::Stopped);
                error!(error = %e, "failed to start angle server");
                return Err(e);
            }
        };
        let local_addr = listener.local_addr().map_err(|e| {
            set_state(&self.state, ServerState::Stopped);
            StreamError::Bind {
                addr: format!("{}:{}", self.host, self.port),
                details: e.to_string(),
            }
        })?;

        set_state(&self.state, ServerState::Listening);
        info!(addr = %local_addr, interval = ?self.interval, joints = self.store.keys().len(), "angle server listening");

        let shutdown = ShutdownSignal::new();
        let sessions = Arc::new(AtomicUsize::new(0));
        let accept = AcceptLoop {
            listener,
            store: Arc::clone(&self.store),
            shutdown: shutdown.clone(),
            sessions: Arc::clone(&sessions),
            state: Arc::clone(&self.state),
            interval: self.interval,
            write_timeout: self.write_timeout,
        };
        let task = tokio::spawn(accept.run());

        Ok(ServerHandle {
            local_addr,
            shutdown,
            sessions,
            state: Arc::clone(&self.state),
            task,
        })
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener, StreamError> {
    let bind_error = |details: String| StreamError::Bind {
        addr: format!("{host}:{port}"),
        details,
    };

    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| bind_error(e.to_string()))?
        .next()
        .ok_or_else(|| bind_error("host resolved to no addresses".to_string()))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| bind_error(e.to_string()))?;

    socket
        .set_reuseaddr(true)
        .map_err(|e| bind_error(e.to_string()))?;
    socket.bind(addr).map_err(|e| bind_error(e.to_string()))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| bind_error(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// ServerHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Control handle for a running [`AngleServer`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
    sessions: Arc<AtomicUsize>,
    state: SharedState,
    task: JoinHandle<Result<(), StreamError>>,
}

impl ServerHandle {
    /// The address actually bound (reports the real port after binding `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        get_state(&self.state)
    }

    /// Number of client sessions currently running.
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Request a cooperative stop. Returns immediately; use
    /// [`join`](Self::join) to wait for the listener and sessions to finish.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// A clone of the stop flag, e.g. for a Ctrl-C handler.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Wait until the accept loop has closed the listener and every session
    /// has exited.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Connection`] if the accept task was cancelled
    /// by the runtime shutting down.
    pub async fn join(self) -> Result<(), StreamError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(StreamError::Connection {
                peer: self.local_addr.to_string(),
                details: format!("accept loop cancelled: {e}"),
            }),
        }
    }

    /// [`stop`](Self::stop) followed by [`join`](Self::join).
    pub async fn shutdown(self) -> Result<(), StreamError> {
        self.stop();
        self.join().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Accept loop
// ─────────────────────────────────────────────────────────────────────────────

struct AcceptLoop {
    listener: TcpListener,
    store: Arc<StateStore>,
    shutdown: ShutdownSignal,
    sessions: Arc<AtomicUsize>,
    state: SharedState,
    interval: Duration,
    write_timeout: Option<Duration>,
}

/// Decrements the live-session counter when a session task finishes, however
/// it finishes.
struct SessionGuard(Arc<AtomicUsize>);

impl SessionGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AcceptLoop {
    async fn run(self) -> Result<(), StreamError> {
        let AcceptLoop {
            listener,
            store,
            shutdown,
            sessions: counter,
            state,
            interval,
            write_timeout,
        } = self;
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.triggered() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
                        }
                        let guard = SessionGuard::enter(&counter);
                        let session = ClientSession::new(
                            peer,
                            stream,
                            Arc::clone(&store),
                            shutdown.clone(),
                            interval,
                        )
                        .with_write_timeout(write_timeout);
                        sessions.spawn(async move {
                            let _guard = guard;
                            session.run().await
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept error");
                        backoff_after_accept_error(&shutdown).await;
                    }
                },

                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_exit(finished);
                }
            }
        }

        // Closing the listener refuses new connections; running sessions
        // exit on their own next tick.
        set_state(&state, ServerState::Stopping);
        drop(listener);
        info!(sessions = sessions.len(), "listener closed, draining sessions");

        while let Some(finished) = sessions.join_next().await {
            log_session_exit(finished);
        }

        set_state(&state, ServerState::Stopped);
        info!("angle server stopped");
        Ok(())
    }
}

/// Wait out [`ACCEPT_BACKOFF`], returning early if a stop is requested.
async fn backoff_after_accept_error(shutdown: &ShutdownSignal) {
    tokio::select! {
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
        _ = shutdown.triggered() => {}
    }
}

fn log_session_exit(finished: Result<Result<u64, StreamError>, tokio::task::JoinError>) {
    match finished {
        // Connection errors were already logged by the session itself.
        Ok(_) => {}
        Err(e) => error!(error = %e, "client session task failed"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_server() -> AngleServer {
        AngleServer::new(["a", "b"]).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let server = make_server();
        assert_eq!(server.host(), "127.0.0.1");
        assert_eq!(server.port(), 5001);
        assert_eq!(server.interval(), Duration::from_millis(50));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn builders_override_defaults() {
        let server = make_server()
            .with_host("0.0.0.0")
            .with_port(9999)
            .with_interval(Duration::from_millis(10));
        assert_eq!(server.host(), "0.0.0.0");
        assert_eq!(server.port(), 9999);
        assert_eq!(server.interval(), Duration::from_millis(10));
    }

    #[test]
    fn update_is_forwarded_to_store() {
        let server = make_server();
        server.update([("a", [1.0, 2.0, 3.0]), ("b", [4.0, 5.0, 6.0])]).unwrap();
        assert_eq!(server.store().read_snapshot().get("b"), Some([4.0, 5.0, 6.0]));
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let server = make_server().with_port(0).with_interval(Duration::ZERO);
        assert!(matches!(server.start().await, Err(StreamError::Config(_))));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn start_moves_to_listening_and_stop_to_stopped() {
        let server = make_server().with_port(0);
        let handle = server.start().await.unwrap();
        assert_eq!(handle.state(), ServerState::Listening);
        assert_ne!(handle.local_addr().port(), 0);

        handle.shutdown().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn second_start_while_listening_is_rejected() {
        let server = make_server().with_port(0);
        let handle = server.start().await.unwrap();
        assert!(matches!(server.start().await, Err(StreamError::Config(_))));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn bind_error_is_surfaced_and_state_reset() {
        let first = make_server().with_port(0);
        let handle = first.start().await.unwrap();

        // SO_REUSEADDR does not allow two listeners on the same port.
        let second = make_server().with_port(handle.local_addr().port());
        let err = second.start().await.err().expect("second bind must fail");
        assert!(matches!(err, StreamError::Bind { .. }));
        assert_eq!(second.state(), ServerState::Stopped);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unresolvable_host_is_a_bind_error() {
        let server = make_server().with_host("no-such-host.invalid").with_port(0);
        assert!(matches!(server.start().await, Err(StreamError::Bind { .. })));
    }

    #[tokio::test]
    async fn server_can_restart_after_stop() {
        let server = make_server().with_port(0);
        server.start().await.unwrap().shutdown().await.unwrap();
        let handle = server.start().await.unwrap();
        assert_eq!(handle.state(), ServerState::Listening);
        handle.shutdown().await.unwrap();
    }

    #[test]
    fn session_guard_tracks_count() {
        let counter = Arc::new(AtomicUsize::new(0));
        let a = SessionGuard::enter(&counter);
        let b = SessionGuard::enter(&counter);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        drop(a);
        drop(b);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_backoff_waits_full_period_while_running() {
        let shutdown = ShutdownSignal::new();
        let started = tokio::time::Instant::now();
        backoff_after_accept_error(&shutdown).await;
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_backoff_ends_as_soon_as_stop_is_requested() {
        let shutdown = ShutdownSignal::new();
        let started = tokio::time::Instant::now();

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stopper.trigger();
        });
        backoff_after_accept_error(&shutdown).await;

        assert!(started.elapsed() < ACCEPT_BACKOFF);
    }
}
