//! Connection acceptor.
//!
//! Owns the listening socket, hands each accepted connection a fresh id and
//! spawns a session for it. Never waits on sessions.

use crate::server::Shared;
use crate::session::Session;
use crate::shutdown::CancelToken;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info_span, Instrument};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Resolve `address` and bind a listener on the first address that works.
pub(crate) async fn bind(address: &str) -> io::Result<TcpListener> {
    let mut last_err = None;
    for addr in tokio::net::lookup_host(address).await? {
        match create_listener(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} did not resolve to any address", address),
        )
    }))
}

/// Create a TCP listener with SO_REUSEADDR so a restart can rebind at once.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}

/// Accept loop. Runs until `cancel` fires; the listener is closed on return.
pub(crate) async fn run(listener: TcpListener, shared: Arc<Shared>, cancel: CancelToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let id = shared.next_client_id();
                // Taken before the spawn so stop can never miss this session
                let guard = shared.sessions().enter();
                let session = Session::new(id, stream, Arc::clone(&shared), cancel.clone());
                let span = info_span!(parent: None, "client", id = session.id(), %peer);
                tokio::spawn(session.run(guard).instrument(span));
            }
            Err(e) => {
                if !shared.is_running() {
                    break;
                }
                error!(error = %e, "Error accepting connection");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }

    debug!("Acceptor stopped");
}
