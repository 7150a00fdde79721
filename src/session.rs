//! Client session handling.
//!
//! One session per accepted connection:
//! greeting, then a read loop that dispatches each chunk until the client
//! quits, disconnects, errors, or the server shuts down.
//!
//! Cancellation is only checked between reads. A session blocked in a read
//! notices shutdown once that read completes or hits the idle timeout, so
//! the worst-case latency is one idle timeout.

use crate::protocol::{self, WELCOME};
use crate::server::Shared;
use crate::shutdown::{CancelToken, SessionGuard};
use bytes::BytesMut;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Maximum bytes taken per read
const READ_BUFFER_SIZE: usize = 1024;

/// Deadline for writing a time reply
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// A single client connection.
pub struct Session<S> {
    id: u64,
    stream: S,
    shared: Arc<Shared>,
    cancel: CancelToken,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: u64, stream: S, shared: Arc<Shared>, cancel: CancelToken) -> Self {
        Session {
            id,
            stream,
            shared,
            cancel,
        }
    }

    /// Session id, unique for the life of the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Serve the connection to completion.
    ///
    /// The stream is closed and `guard` released on every exit path.
    pub async fn run(mut self, guard: SessionGuard) {
        let _guard = guard;
        info!("New connection");

        if let Err(e) = self.stream.write_all(WELCOME).await {
            error!(error = %e, "Error sending welcome message");
            return;
        }

        let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

        loop {
            if self.cancel.is_cancelled() {
                info!("Connection closed due to server shutdown");
                return;
            }

            buffer.clear();
            let idle_timeout = self.shared.idle_timeout();
            let n = match timeout(idle_timeout, self.stream.read_buf(&mut buffer)).await {
                // Idle, not an error; go round and check for shutdown
                Err(_) => continue,
                Ok(Ok(0)) => {
                    debug!("Client closed connection");
                    return;
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    warn!(error = %e, "Error reading from client");
                    return;
                }
            };

            let command = protocol::normalize(&buffer[..n]);
            debug!(%command, "Received command");

            let action = protocol::dispatch(&command);
            if action.is_noop() {
                continue;
            }
            if action.time {
                self.send_time().await;
            }
            if action.quit {
                info!("Client requested disconnect");
                return;
            }
        }
    }

    /// Write failures are logged and do not end the session.
    async fn send_time(&mut self) {
        let reply = protocol::time_reply(Local::now().time());

        match timeout(WRITE_TIMEOUT, self.stream.write_all(reply.as_bytes())).await {
            Ok(Ok(())) => info!(reply = reply.trim_end(), "Time sent"),
            Ok(Err(e)) => error!(error = %e, "Error sending time"),
            Err(_) => error!("Timed out sending time"),
        }
    }
}
