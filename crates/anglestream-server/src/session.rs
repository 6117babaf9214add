//! [`ClientSession`] – streams snapshots to one connected consumer.
//!
//! Each tick takes a snapshot, renders it with [`wire::format_line`], writes
//! the whole line, then sleeps for the interval. There is no drift
//! compensation: a slow write or a late wake-up delays every later tick and is
//! never caught up. The session time `t` starts at zero on connect and
//! advances by exactly one interval per line.
//!
//! A stop is observed at the next tick boundary, or immediately when the
//! session is parked in a write to a consumer that stopped reading.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anglestream_types::{StreamError, wire};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::shutdown::ShutdownSignal;
use crate::store::StateStore;

/// Per-connection broadcast loop.
///
/// Generic over the write half so the loop can be driven by an in-memory
/// pipe in tests as well as by a [`tokio::net::TcpStream`].
pub(crate) struct ClientSession<W> {
    id: Uuid,
    peer: SocketAddr,
    socket: W,
    store: Arc<StateStore>,
    shutdown: ShutdownSignal,
    interval: Duration,
    write_timeout: Option<Duration>,
}

impl<W> ClientSession<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(
        peer: SocketAddr,
        socket: W,
        store: Arc<StateStore>,
        shutdown: ShutdownSignal,
        interval: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            socket,
            store,
            shutdown,
            interval,
            write_timeout: None,
        }
    }

    /// Abort a single write that takes longer than `timeout`.
    pub(crate) fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Run until the server stops or a write fails.
    ///
    /// Returns the number of lines sent. The socket is shut down and dropped
    /// on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Connection`] when a write fails or times out.
    pub(crate) async fn run(mut self) -> Result<u64, StreamError> {
        info!(session = %self.id, peer = %self.peer, "client connected");

        let result = self.stream().await;
        let _ = self.socket.shutdown().await;

        match &result {
            Ok(sent) => info!(session = %self.id, peer = %self.peer, sent = *sent, "client session ended"),
            Err(e) => info!(session = %self.id, peer = %self.peer, error = %e, "client disconnected"),
        }
        result
    }

    async fn stream(&mut self) -> Result<u64, StreamError> {
        let step = self.interval.as_secs_f64();
        let shutdown = self.shutdown.clone();
        let mut sent: u64 = 0;

        while !shutdown.is_triggered() {
            let snapshot = self.store.read_snapshot();
            let t = sent as f64 * step;
            let line = wire::format_line(t, &snapshot);

            // A consumer that stopped reading must not hold up a stop.
            tokio::select! {
                written = self.write_line(line.as_bytes()) => written?,
                _ = shutdown.triggered() => {
                    debug!(session = %self.id, "stop observed mid-write");
                    break;
                }
            }
            trace!(session = %self.id, line = line.trim_end(), "sent");
            sent += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.triggered() => {
                    debug!(session = %self.id, "stop observed");
                    break;
                }
            }
        }

        Ok(sent)
    }

    async fn write_line(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        let outcome = match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, self.socket.write_all(bytes))
                .await
                .unwrap_or_else(|_| {
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("write timed out after {limit:?}"),
                    ))
                }),
            None => self.socket.write_all(bytes).await,
        };
        outcome.map_err(|e| StreamError::Connection {
            peer: self.peer.to_string(),
            details: e.to_string(),
        })
    }
}
