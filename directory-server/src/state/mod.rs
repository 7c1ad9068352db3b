pub mod connections;
pub mod sessions;
pub mod users;

pub use connections::ConnectionState;
pub use sessions::{Location, OnlineSession, SessionState};
pub use users::{UserRecord, UserState};

use std::sync::Arc;
use std::time::Instant;

use log::info;
use parlor_proto::Event;
use serde::Serialize;
use tokio::sync::{watch, RwLock};

use crate::security::SharedConnectionTracker;
use crate::{ConnId, Outbound};

/// Server lifecycle. Ordered, so `>= ShuttingDown` means "no longer serving".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Init,
    Running,
    ShuttingDown,
    Stopped,
}

/// How a session ended; decides the label friends see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    Logout,
    Terminate,
}

/// Main application state wrapping all subsystems.
/// Each collection has its own lock. When more than one is needed the order is
/// sessions → users → connections.
pub struct AppState {
    pub connections: Arc<RwLock<ConnectionState>>,
    pub users: Arc<RwLock<UserState>>,
    pub sessions: Arc<RwLock<SessionState>>,
    pub lifecycle: watch::Sender<Lifecycle>,
    /// When the directory process started (for uptime on the status endpoint).
    pub started_at: Instant,
    pub started_at_utc: String,
    /// Connection limits (global and per-IP); 0 = no cap.
    pub connection_tracker: SharedConnectionTracker,
}

impl AppState {
    pub fn new(users: UserState, connection_tracker: SharedConnectionTracker) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Init);
        Self {
            connections: Arc::new(RwLock::new(ConnectionState::new())),
            users: Arc::new(RwLock::new(users)),
            sessions: Arc::new(RwLock::new(SessionState::new())),
            lifecycle,
            started_at: Instant::now(),
            started_at_utc: chrono::Utc::now().to_rfc3339(),
            connection_tracker,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn set_lifecycle(&self, next: Lifecycle) {
        self.lifecycle.send_replace(next);
        info!("Directory lifecycle: {:?}", next);
    }

    /// Close the session bound to `conn_id` (if any) and tell the user's online friends.
    /// The session removal and the fan-out happen under one sessions write lock.
    pub async fn end_session(&self, conn_id: &ConnId, departure: Option<Departure>) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.close(conn_id)?;
        let username = session.username;

        if let Some(departure) = departure {
            let event = match departure {
                Departure::Logout => Event::Logout { username: username.clone() },
                Departure::Terminate => Event::Terminate { username: username.clone() },
            };
            let text = event.to_string();
            let users = self.users.read().await;
            for friend in sessions.online_friends(&users, &username) {
                let _ = friend.sender.send(Outbound::Frame(text.clone()));
            }
        }

        info!("{} went offline ({:?}); online users: {}", username, departure, sessions.len());
        Some(username)
    }
}
