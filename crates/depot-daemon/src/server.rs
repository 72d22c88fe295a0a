//! Acceptor: binds the listener and runs one session task per connection

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use depot_core::Config;

use crate::session::{Session, SessionError, SessionSettings};
use crate::storage::{Storage, StorageError};

/// How often unreferenced lock entries are swept
pub const LOCK_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Depot file server
pub struct DepotServer {
    config: Config,
    storage: Arc<Storage>,
    connection_semaphore: Arc<Semaphore>,
    prune_interval: Duration,
}

impl DepotServer {
    /// Prepare the shared directory; nothing is bound yet
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let storage = Storage::open(&config.storage, config.locks.clone())?;

        Ok(Self {
            connection_semaphore: Arc::new(Semaphore::new(config.server.max_connections.max(1))),
            storage: Arc::new(storage),
            config,
            prune_interval: LOCK_PRUNE_INTERVAL,
        })
    }

    /// Sweep idle lock entries at `interval` instead of [`LOCK_PRUNE_INTERVAL`]
    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.server.bind_addr();
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Bind and serve until the task is dropped
    pub async fn serve(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve_on(listener).await
    }

    /// Serve connections arriving on an already bound listener.
    ///
    /// A connection slot is reserved before accepting, so at capacity new
    /// connections wait in the listen backlog while lock pruning keeps running.
    pub async fn serve_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!(
            "Depot listening on {} serving {:?}",
            listener.local_addr()?,
            self.storage.root()
        );

        let mut prune = tokio::time::interval(self.prune_interval);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut slot: Option<OwnedSemaphorePermit> = None;
        let semaphore = Arc::clone(&self.connection_semaphore);

        loop {
            tokio::select! {
                acquired = Arc::clone(&semaphore).acquire_owned(), if slot.is_none() => {
                    match acquired {
                        Ok(permit) => slot = Some(permit),
                        Err(_) => {
                            warn!("Connection limiter closed, no longer accepting");
                            return Ok(());
                        }
                    }
                }
                accepted = listener.accept(), if slot.is_some() => match accepted {
                    Ok((stream, peer)) => {
                        if let Some(permit) = slot.take() {
                            self.spawn_session(stream, peer, permit);
                        }
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = prune.tick() => {
                    let removed = self.storage.locks().prune();
                    if removed > 0 {
                        debug!("Pruned {} idle lock entries", removed);
                    }
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr, permit: OwnedSemaphorePermit) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }

        let storage = Arc::clone(&self.storage);
        let settings = SessionSettings::from(&self.config.server);

        tokio::spawn(async move {
            info!("New connection from {}", peer);

            match Session::new(stream, peer, storage, settings).run().await {
                Ok(()) => info!("Connection from {} closed", peer),
                Err(SessionError::IdleTimeout(idle)) => {
                    info!("Connection from {} idle for {:?}, closing", peer, idle)
                }
                Err(e) if e.is_disconnect() => info!("Connection from {} dropped: {}", peer, e),
                Err(e) => error!("Connection error from {}: {}", peer, e),
            }

            drop(permit);
        });
    }
}
