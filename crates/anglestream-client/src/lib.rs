//! `anglestream-client` – consumer side of the joint-angle stream.
//!
//! Connects to an AngleStream server and yields one [`Frame`] per received
//! line. The stream heals itself at line granularity: a line that is not
//! valid UTF-8 or does not match the wire grammar is logged, counted and
//! skipped, and reading continues with the next line.
//!
//! ```rust,no_run
//! use anglestream_client::StreamClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut client = StreamClient::connect("127.0.0.1", 5001).await.expect("connect");
//!     while let Ok(Some(frame)) = client.next_frame().await {
//!         println!("t={:.3} right_shoulder={:?}", frame.t, frame.get("right_shoulder"));
//!     }
//! }
//! ```

use std::net::SocketAddr;

use anglestream_types::{Frame, StreamError, wire};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// A [`FrameReader`] over a TCP connection.
pub type StreamClient = FrameReader<BufReader<TcpStream>>;

impl StreamClient {
    /// Connect to a server at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Connection`] when the connection is refused or
    /// the host cannot be resolved.
    pub async fn connect(host: &str, port: u16) -> Result<Self, StreamError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| StreamError::Connection {
                peer: format!("{host}:{port}"),
                details: e.to_string(),
            })?;
        let peer = stream.peer_addr().ok();
        debug!(peer = ?peer, "connected to angle stream");

        let mut client = FrameReader::new(BufReader::new(stream));
        client.peer = peer;
        Ok(client)
    }
}

/// Reads newline-delimited wire lines from any buffered async reader.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    skipped: u64,
    peer: Option<SocketAddr>,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            skipped: 0,
            peer: None,
        }
    }

    /// Wait for the next well-formed frame.
    ///
    /// Returns:
    /// * `Ok(Some(frame))` – the next line that parsed.
    /// * `Ok(None)` – the server closed the connection.
    /// * `Err(StreamError::Connection)` – the read itself failed.
    ///
    /// Malformed lines never surface as errors; see [`skipped`](Self::skipped).
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        loop {
            self.buf.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|e| StreamError::Connection {
                    peer: self.peer_label(),
                    details: e.to_string(),
                })?;
            if n == 0 {
                return Ok(None);
            }

            let parsed = std::str::from_utf8(&self.buf)
                .map_err(|e| StreamError::Parse(format!("invalid UTF-8: {e}")))
                .and_then(wire::parse_line);

            match parsed {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(peer = %self.peer_label(), error = %e, skipped = self.skipped, "skipping malformed line");
                }
            }
        }
    }

    /// Number of lines discarded so far because they did not parse.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Server address, when reading from a TCP connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn peer_label(&self) -> String {
        self.peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "<stream>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(input: &'static [u8]) -> FrameReader<&'static [u8]> {
        FrameReader::new(input)
    }

    #[tokio::test]
    async fn reads_consecutive_frames() {
        let mut r = reader(
            b"0.000,a:1.0000:2.0000:3.0000\n0.050,a:4.0000:5.0000:6.0000\n",
        );
        let first = r.next_frame().await.unwrap().unwrap();
        let second = r.next_frame().await.unwrap().unwrap();
        assert_eq!(first.get("a"), Some([1.0, 2.0, 3.0]));
        assert!((second.t - 0.05).abs() < 1e-9);
        assert!(r.next_frame().await.unwrap().is_none());
        assert_eq!(r.skipped(), 0);
    }

    #[tokio::test]
    async fn skips_malformed_lines_and_keeps_reading() {
        let mut r = reader(
            b"garbage\n\n0.000,a:1:2\n\xff\xfe\n0.100,a:1.0000:1.0000:1.0000\n",
        );
        let frame = r.next_frame().await.unwrap().unwrap();
        assert!((frame.t - 0.1).abs() < 1e-9);
        assert_eq!(r.skipped(), 4);
    }

    #[tokio::test]
    async fn accepts_final_line_without_newline() {
        let mut r = reader(b"1.000,knee:10.0000:0.0000:0.0000");
        let frame = r.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.get("knee"), Some([10.0, 0.0, 0.0]));
        assert!(r.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_final_line_is_skipped() {
        let mut r = reader(b"0.000,a:1.0000:2.0000:3.0000\n0.050,a:1.00");
        assert!(r.next_frame().await.unwrap().is_some());
        assert!(r.next_frame().await.unwrap().is_none());
        assert_eq!(r.skipped(), 1);
    }

    #[tokio::test]
    async fn connect_refused_is_connection_error() {
        // Bind then drop to find a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = StreamClient::connect("127.0.0.1", port).await.err().unwrap();
        assert!(matches!(err, StreamError::Connection { .. }));
    }
}
