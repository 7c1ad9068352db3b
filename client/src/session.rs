use std::collections::{HashMap, HashSet};

use crate::ClientError;

/// Which request the client is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Register,
    Login,
}

/// Client session state machine.
///
/// `Unauthenticated → AwaitingServer → Unauthenticated | Authenticated`, and
/// `Authenticated → Unauthenticated` on logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    AwaitingServer { kind: AuthKind, username: String },
    Authenticated { username: String },
}

impl SessionPhase {
    pub fn username(&self) -> Option<&str> {
        match self {
            SessionPhase::Authenticated { username } => Some(username),
            _ => None,
        }
    }

    /// Move to `AwaitingServer`; only allowed from `Unauthenticated`.
    pub fn begin(&mut self, kind: AuthKind, username: &str) -> Result<(), ClientError> {
        match self {
            SessionPhase::Unauthenticated => {
                *self = SessionPhase::AwaitingServer {
                    kind,
                    username: username.to_string(),
                };
                Ok(())
            }
            SessionPhase::AwaitingServer { .. } => {
                Err(ClientError::InvalidState("while waiting for the server"))
            }
            SessionPhase::Authenticated { .. } => Err(ClientError::InvalidState("while logged in")),
        }
    }

    /// Settle a pending request. Returns false when the reply does not match what we sent.
    pub fn settle(&mut self, kind: AuthKind, username: &str, ok: bool) -> bool {
        let matches = matches!(
            self,
            SessionPhase::AwaitingServer { kind: k, username: u } if *k == kind && u == username
        );
        if !matches {
            return false;
        }
        *self = if ok && kind == AuthKind::Login {
            SessionPhase::Authenticated {
                username: username.to_string(),
            }
        } else {
            SessionPhase::Unauthenticated
        };
        true
    }
}

/// Last advertised address of a friend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendInfo {
    pub host: String,
    pub port: u16,
}

pub type FriendCache = HashMap<String, FriendInfo>;

/// Pending invites known to this client. Not shared with the server.
#[derive(Debug, Default)]
pub struct InviteBook {
    sent: HashSet<String>,
    received: HashSet<String>,
}

impl InviteBook {
    /// Local check before sending `INVITE target`.
    pub fn check_invite(&self, me: &str, target: &str, friends: &FriendCache) -> Result<(), ClientError> {
        if target == me {
            return Err(ClientError::StateConflict("You cannot invite yourself.".into()));
        }
        if friends.contains_key(target) {
            return Err(ClientError::StateConflict(format!("{} is already your friend.", target)));
        }
        if self.sent.contains(target) {
            return Err(ClientError::StateConflict(format!(
                "You already invited {}.",
                target
            )));
        }
        if self.received.contains(target) {
            return Err(ClientError::StateConflict(format!(
                "{} already invited you; use accept {}.",
                target, target
            )));
        }
        Ok(())
    }

    pub fn record_sent(&mut self, target: &str) {
        self.sent.insert(target.to_string());
    }

    /// An invite arrived. If we had invited them too, theirs replaces ours so `accept` works.
    pub fn record_received(&mut self, from: &str) {
        self.sent.remove(from);
        self.received.insert(from.to_string());
    }

    /// Consume a received invite for `accept`.
    pub fn take_received(&mut self, from: &str) -> Result<(), ClientError> {
        if self.received.remove(from) {
            Ok(())
        } else {
            Err(ClientError::StateConflict(format!("No pending invite from {}.", from)))
        }
    }

    /// Our invite was answered, accepted or failed.
    pub fn settle_sent(&mut self, target: &str) {
        self.sent.remove(target);
    }

    pub fn has_sent(&self, target: &str) -> bool {
        self.sent.contains(target)
    }

    pub fn has_received(&self, from: &str) -> bool {
        self.received.contains(from)
    }

    pub fn clear(&mut self) {
        self.sent.clear();
        self.received.clear();
    }
}
