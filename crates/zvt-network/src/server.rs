//! TCP session manager for the simulated terminal.
//!
//! # Architecture
//!
//! ```text
//! ECR 1 ┐                 ┌─> TerminalSession 1 ─┐
//!       │                 │                      │
//! ECR 2 ├──> SessionManager ─> TerminalSession 2 ─┼──> Arc<SimulatorState>
//!       │    (accept loop) │                      │
//! ECR n ┘                 └─> TerminalSession n ─┘
//! ```
//!
//! Each accepted connection gets its own task, socket and child
//! cancellation token. Sessions share only the simulator state, which is
//! internally synchronized, so one slow or failing session never holds up
//! another.
//!
//! # Example Usage
//!
//! ```no_run
//! use zvt_network::{ServerConfig, SessionManager};
//! use zvt_simulator::{SimulatorConfig, SimulatorState};
//!
//! # async fn example() -> zvt_core::Result<()> {
//! let state = SimulatorState::new(SimulatorConfig::default());
//! let manager = SessionManager::bind(ServerConfig::default(), state).await?;
//! let handle = manager.start();
//! println!("listening on {}", handle.local_addr());
//!
//! // ... later
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zvt_core::{Error, Result, constants::DEFAULT_TERMINAL_PORT};
use zvt_protocol::ZvtCodec;
use zvt_simulator::{CommandRouter, SimulatorState};

use crate::session::TerminalSession;

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Connections beyond this are closed right after accept.
    pub max_sessions: usize,
}

impl ServerConfig {
    pub fn on_port(port: u16) -> Self {
        ServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            ..Default::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TERMINAL_PORT)),
            max_sessions: 16,
        }
    }
}

/// Snapshot of one active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: u64,
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

#[derive(Debug, Default)]
struct SessionRegistry {
    sessions: Mutex<HashMap<u64, SessionInfo>>,
}

impl SessionRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, SessionInfo>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, info: SessionInfo) {
        self.lock().insert(info.id, info);
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.lock().values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }
}

/// Accepts ECR connections and runs one [`TerminalSession`] per connection.
pub struct SessionManager {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    state: Arc<SimulatorState>,
    registry: Arc<SessionRegistry>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl SessionManager {
    /// Bind the listener. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] if the address cannot be bound.
    pub async fn bind(config: ServerConfig, state: Arc<SimulatorState>) -> Result<Self> {
        info!("Binding terminal simulator to {}", config.bind_addr);
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| Error::connection(format!("failed to bind {}: {e}", config.bind_addr)))?;
        let local_addr = listener.local_addr()?;
        info!(
            "Terminal simulator listening on {} (max {} sessions)",
            local_addr, config.max_sessions
        );

        Ok(SessionManager {
            listener,
            local_addr,
            config,
            state,
            registry: Arc::default(),
            next_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<SimulatorState> {
        &self.state
    }

    /// Run the accept loop on a background task.
    pub fn start(self) -> ServerHandle {
        let local_addr = self.local_addr;
        let cancel = self.cancel.clone();
        let registry = Arc::clone(&self.registry);
        ServerHandle {
            local_addr,
            cancel,
            registry,
            task: Some(tokio::spawn(self.run())),
        }
    }

    /// Accept connections until cancelled, then cancel every session and
    /// wait for all of them to finish.
    pub async fn run(self) {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task panicked: {e}");
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(&mut sessions, stream, peer),
                    Err(e) => warn!("Accept failed: {e}"),
                },
            }
        }

        info!(active = sessions.len(), "Session manager shutting down");
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task panicked: {e}");
            }
        }
        info!("Session manager stopped");
    }

    fn spawn_session(&self, sessions: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        if self.registry.len() >= self.config.max_sessions {
            error!(
                %peer,
                max_sessions = self.config.max_sessions,
                "Connection rejected: maximum sessions reached"
            );
            drop(stream);
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {peer}: {e}");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.insert(SessionInfo {
            id,
            peer,
            connected_at: Utc::now(),
        });
        debug!(session = id, %peer, total = self.registry.len(), "Accepted connection");

        let session = TerminalSession::new(
            id,
            peer,
            Framed::new(stream, ZvtCodec::new()),
            CommandRouter::new(Arc::clone(&self.state)),
            self.cancel.child_token(),
        );
        let registry = Arc::clone(&self.registry);
        sessions.spawn(async move {
            // Errors are logged by the session itself.
            let _ = session.run().await;
            registry.remove(id);
        });
    }
}

/// Control handle for a running [`SessionManager`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    registry: Arc<SessionRegistry>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Active sessions ordered by id.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Token that stops the manager when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting, cancel all sessions and wait until they are gone.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Session manager task failed: {e}");
            }
        }
    }

    /// Wait for the manager to stop on its own (e.g. via the shutdown token).
    pub async fn wait(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Session manager task failed: {e}");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            debug!("ServerHandle dropped - stopping session manager");
            self.cancel.cancel();
        }
    }
}
