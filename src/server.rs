//! Server lifecycle management.
//!
//! `TimeServer` owns the shared state, binds the listener, launches the
//! acceptor and coordinates shutdown across all active sessions.

use crate::acceptor;
use crate::config::Config;
use crate::error::ServerError;
use crate::shutdown::{ActiveSessions, CancelToken};
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, info_span, warn, Instrument};

/// How long `stop` waits for sessions to finish before giving up on them
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The bound listener, owned by the acceptor task.
///
/// Stays in the server state until the acceptor has exited, so it is present
/// while running and while a stop is closing it.
#[derive(Debug)]
struct ListenerHandle {
    local_addr: SocketAddr,
    acceptor: Option<JoinHandle<()>>,
}

/// Wait for the acceptor to exit, which drops and closes the socket.
/// The acceptor exits on its own once the cancel token fires.
async fn close_listener(acceptor: JoinHandle<()>) -> Result<(), JoinError> {
    acceptor.await
}

#[derive(Debug)]
struct ServerState {
    running: bool,
    listener: Option<ListenerHandle>,
    next_client_id: u64,
    cancel: CancelToken,
    idle_timeout: Duration,
}

/// State shared between the manager, the acceptor and every session.
///
/// All fields of `ServerState` sit behind one lock. The session count is
/// separate because it is updated from guard drops.
#[derive(Debug)]
pub(crate) struct Shared {
    state: RwLock<ServerState>,
    sessions: ActiveSessions,
}

impl Shared {
    pub(crate) fn new(idle_timeout: Duration) -> Self {
        Shared {
            state: RwLock::new(ServerState {
                running: false,
                listener: None,
                next_client_id: 0,
                cancel: CancelToken::new(),
                idle_timeout,
            }),
            sessions: ActiveSessions::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ServerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ServerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.read().running
    }

    pub(crate) fn idle_timeout(&self) -> Duration {
        self.read().idle_timeout
    }

    fn set_idle_timeout(&self, idle_timeout: Duration) {
        self.write().idle_timeout = idle_timeout;
    }

    /// Hand out the next session id. Ids are never reused.
    pub(crate) fn next_client_id(&self) -> u64 {
        let mut state = self.write();
        let id = state.next_client_id;
        state.next_client_id += 1;
        id
    }

    pub(crate) fn sessions(&self) -> &ActiveSessions {
        &self.sessions
    }
}

/// A TCP time server.
pub struct TimeServer {
    config: Config,
    shared: Arc<Shared>,
}

impl TimeServer {
    /// Create a new, stopped server instance
    pub fn new(config: Config) -> Self {
        let shared = Arc::new(Shared::new(config.idle_timeout));
        TimeServer { config, shared }
    }

    /// Bind the listener and launch the acceptor in the background.
    ///
    /// Returns as soon as the listener is bound.
    pub async fn start(&self) -> Result<(), ServerError> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }

        let address = self.config.address();
        let listener = acceptor::bind(&address)
            .await
            .and_then(|listener| Ok((listener.local_addr()?, listener)));
        let (local_addr, listener) = listener.map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;

        {
            let mut state = self.shared.write();
            // Another start may have won the race while we were binding,
            // or a stop is still closing the previous listener
            if state.running || state.listener.is_some() {
                return Err(ServerError::AlreadyRunning);
            }

            let cancel = CancelToken::new();
            let acceptor = tokio::spawn(
                acceptor::run(listener, Arc::clone(&self.shared), cancel.clone())
                    .instrument(info_span!("server", address = %local_addr)),
            );

            state.running = true;
            state.cancel = cancel;
            state.listener = Some(ListenerHandle {
                local_addr,
                acceptor: Some(acceptor),
            });
        }

        info!(address = %local_addr, "Time server started");
        Ok(())
    }

    /// Stop accepting, cancel every session and wait for them to finish.
    ///
    /// Waits at most [`SHUTDOWN_GRACE`] for sessions. Sessions still running
    /// past the deadline are abandoned, not killed, and `stop` still succeeds.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let closing = {
            let mut state = self.shared.write();
            if !state.running {
                return Err(ServerError::NotRunning);
            }
            state.running = false;
            state.cancel.cancel();
            state.listener.as_mut().and_then(|listener| {
                listener
                    .acceptor
                    .take()
                    .map(|acceptor| (listener.local_addr, acceptor))
            })
        };

        let mut result = Ok(());
        if let Some((address, acceptor)) = closing {
            info!(address = %address, "Closing server listener");
            if let Err(e) = close_listener(acceptor).await {
                error!(error = %e, "Error closing listener");
                result = Err(ServerError::Close(e));
            }
        }
        self.shared.write().listener = None;

        let drained =
            tokio::time::timeout(SHUTDOWN_GRACE, self.shared.sessions().wait_idle()).await;
        match drained {
            Ok(()) => info!("Server stopped gracefully"),
            Err(_) => warn!(
                remaining = self.shared.sessions().count(),
                "Forced shutdown after timeout waiting for connections"
            ),
        }

        result
    }

    /// Snapshot of the running flag
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Change the per-read idle timeout for new and in-flight sessions
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn set_idle_timeout(&self, idle_timeout: Duration) {
        self.shared.set_idle_timeout(idle_timeout);
    }

    /// Address the listener is bound to, while running or while a stop is
    /// still closing it
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .read()
            .listener
            .as_ref()
            .map(|listener| listener.local_addr)
    }

    /// Number of sessions that have not finished yet
    pub fn active_sessions(&self) -> usize {
        self.shared.sessions().count()
    }
}

impl Drop for TimeServer {
    fn drop(&mut self) {
        // Let background tasks wind down if the owner never called stop
        let state = self.shared.read();
        if state.running {
            state.cancel.cancel();
        }
    }
}
