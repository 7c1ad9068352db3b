use std::collections::HashMap;

use crate::state::users::UserState;
use crate::{ConnId, ConnSender};

/// Advertised peer-listener address of an online user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub host: String,
    pub port: u16,
}

/// One logged-in user, bound to the connection that logged in.
#[derive(Debug, Clone)]
pub struct OnlineSession {
    pub username: String,
    /// Unknown until the client announces LOCATION.
    pub address: Option<Location>,
    pub sender: ConnSender,
}

/// Online sessions (connection ↔ username ↔ address)
pub struct SessionState {
    pub sessions: HashMap<ConnId, OnlineSession>,
    /// username -> conn_id; at most one session per username.
    pub by_user: HashMap<String, ConnId>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            by_user: HashMap::new(),
        }
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.by_user.contains_key(username)
    }

    pub fn get(&self, conn_id: &ConnId) -> Option<&OnlineSession> {
        self.sessions.get(conn_id)
    }

    pub fn username_of(&self, conn_id: &ConnId) -> Option<&str> {
        self.sessions.get(conn_id).map(|s| s.username.as_str())
    }

    pub fn session_for_user(&self, username: &str) -> Option<&OnlineSession> {
        self.by_user
            .get(username)
            .and_then(|conn_id| self.sessions.get(conn_id))
    }

    /// Open a session. Fails if the user is already online or the connection already
    /// holds a session.
    pub fn open(&mut self, conn_id: &ConnId, username: &str, sender: ConnSender) -> bool {
        if self.is_online(username) || self.sessions.contains_key(conn_id) {
            return false;
        }
        self.by_user.insert(username.to_string(), conn_id.clone());
        self.sessions.insert(
            conn_id.clone(),
            OnlineSession {
                username: username.to_string(),
                address: None,
                sender,
            },
        );
        true
    }

    pub fn set_address(&mut self, conn_id: &ConnId, address: Location) -> Option<&OnlineSession> {
        let session = self.sessions.get_mut(conn_id)?;
        session.address = Some(address);
        Some(session)
    }

    pub fn close(&mut self, conn_id: &ConnId) -> Option<OnlineSession> {
        let session = self.sessions.remove(conn_id)?;
        self.by_user.remove(&session.username);
        Some(session)
    }

    /// Online sessions of `username`'s friends, excluding `username` itself.
    pub fn online_friends<'a>(
        &'a self,
        users: &'a UserState,
        username: &'a str,
    ) -> impl Iterator<Item = &'a OnlineSession> + 'a {
        self.sessions
            .values()
            .filter(move |s| s.username != username && users.are_friends(&s.username, username))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
