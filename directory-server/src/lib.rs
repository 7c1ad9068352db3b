//! Parlor directory server: authenticates users, tracks presence and friendships, and
//! relays friend invites. Chat never passes through here; clients talk to each other
//! directly once the directory has introduced them.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use parlor_proto::{Event, ProtocolError};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;

pub mod config;
pub mod handlers;
pub mod security;
pub mod state;
pub mod store;

use config::ServerConfig;
use security::ConnectionTracker;
use state::{AppState, Lifecycle, UserState};
use store::{FileUserStore, StoreError, UserStore};

pub type ConnId = String;
pub type ConnSender = mpsc::UnboundedSender<Outbound>;
pub type SharedState = Arc<AppState>;

/// Work queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    /// Flush what is queued, then close the write side.
    Close,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("{0} requires a logged-in session")]
    NotLoggedIn(&'static str),
}

/// How long shutdown waits for connection tasks to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Server {
    listener: TcpListener,
    state: SharedState,
    store: Arc<dyn UserStore>,
}

impl Server {
    /// Load the user file and bind the listener.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let store: Arc<dyn UserStore> = Arc::new(FileUserStore::new(&config.user_file));
        Self::bind_with_store(config, store).await
    }

    pub async fn bind_with_store(
        config: &ServerConfig,
        store: Arc<dyn UserStore>,
    ) -> Result<Self, ServerError> {
        let users = UserState::from_records(store.load()?);
        info!("Loaded {} registered users", users.len());

        let tracker = Arc::new(RwLock::new(ConnectionTracker::new(
            config.max_connections,
            config.max_per_ip,
        )));
        let state = Arc::new(AppState::new(users, tracker));

        let listener = TcpListener::bind((config.bind_addr, config.port)).await?;
        Ok(Self {
            listener,
            state,
            store,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Accept connections until `shutdown` resolves, then persist the users, send SHUTDOWN
    /// to every connection, close them and wait for their tasks.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            state,
            store,
        } = self;
        tokio::pin!(shutdown);
        state.set_lifecycle(Lifecycle::Running);

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    if let Err(limit) = state.connection_tracker.write().await.try_register(peer.ip()) {
                        warn!("Dropping {}: {}", peer, limit);
                        continue;
                    }
                    let admitted = handlers::conn::admit(&state).await;
                    tasks.spawn(handlers::conn::handle_connection(stream, peer, admitted, state.clone()));
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                _ = &mut shutdown => break,
            }
        }
        drop(listener);

        state.set_lifecycle(Lifecycle::ShuttingDown);

        let records = state.users.read().await.snapshot();
        match store.persist(&records) {
            Ok(()) => info!("Persisted {} user records", records.len()),
            Err(e) => error!("Failed to persist user records: {}", e),
        }

        {
            let connections = state.connections.read().await;
            info!("Sending SHUTDOWN to {} connections", connections.len());
            connections.send_all_then_close(&Event::Shutdown.to_string());
        }

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Connections still open after {:?}; aborting them", DRAIN_TIMEOUT);
            tasks.shutdown().await;
        }

        state.set_lifecycle(Lifecycle::Stopped);
        Ok(())
    }
}
