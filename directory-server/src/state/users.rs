//! Registered users and the friend graph.

use std::collections::{BTreeSet, HashMap};

use log::warn;
use parlor_proto::MAX_USERNAME_LEN;

/// A registered account. `friends` is kept symmetric by [`UserState::add_friendship`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub friends: BTreeSet<String>,
}

impl UserRecord {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            friends: BTreeSet::new(),
        }
    }

    pub fn has_friend(&self, username: &str) -> bool {
        self.friends.contains(username)
    }
}

/// Usernames are single wire tokens and must not collide with the store's separators.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && !username
            .chars()
            .any(|c| c.is_whitespace() || c == '|' || c == ';' || c == '\0')
}

/// The hash is stored verbatim between `|` separators, one record per line.
pub fn is_valid_password_hash(hash: &str) -> bool {
    !hash.is_empty() && !hash.chars().any(|c| matches!(c, '|' | '\n' | '\r' | '\0'))
}

/// username -> record
pub struct UserState {
    records: HashMap<String, UserRecord>,
}

impl UserState {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Build from loaded records, restoring friendship symmetry and dropping edges
    /// that point at unknown users.
    pub fn from_records(records: Vec<UserRecord>) -> Self {
        let mut state = Self::new();
        let mut edges = Vec::new();
        for mut rec in records {
            if state.records.contains_key(&rec.username) {
                warn!("Duplicate user record {} ignored", rec.username);
                continue;
            }
            for friend in std::mem::take(&mut rec.friends) {
                edges.push((rec.username.clone(), friend));
            }
            state.records.insert(rec.username.clone(), rec);
        }
        for (a, b) in edges {
            if !state.add_friendship(&a, &b) {
                warn!("Dropping friendship {} <-> {}: unknown user", a, b);
            }
        }
        state
    }

    /// Create a record; false if the name is taken or either field would not survive the store.
    pub fn register(&mut self, username: &str, password_hash: &str) -> bool {
        if !is_valid_username(username)
            || !is_valid_password_hash(password_hash)
            || self.records.contains_key(username)
        {
            return false;
        }
        self.records
            .insert(username.to_string(), UserRecord::new(username, password_hash));
        true
    }

    pub fn verify(&self, username: &str, password_hash: &str) -> bool {
        self.records
            .get(username)
            .map(|rec| rec.password_hash == password_hash)
            .unwrap_or(false)
    }

    pub fn are_friends(&self, a: &str, b: &str) -> bool {
        self.records
            .get(a)
            .map(|rec| rec.has_friend(b))
            .unwrap_or(false)
    }

    /// Add `a` and `b` to each other's friend sets. Returns false if either is unknown
    /// or they are the same user.
    pub fn add_friendship(&mut self, a: &str, b: &str) -> bool {
        if a == b || !self.records.contains_key(a) || !self.records.contains_key(b) {
            return false;
        }
        if let Some(rec) = self.records.get_mut(a) {
            rec.friends.insert(b.to_string());
        }
        if let Some(rec) = self.records.get_mut(b) {
            rec.friends.insert(a.to_string());
        }
        true
    }

    pub fn get(&self, username: &str) -> Option<&UserRecord> {
        self.records.get(username)
    }

    /// Snapshot sorted by username, for persisting.
    pub fn snapshot(&self) -> Vec<UserRecord> {
        let mut out: Vec<UserRecord> = self.records.values().cloned().collect();
        out.sort_by(|a, b| a.username.cmp(&b.username));
        out
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for UserState {
    fn default() -> Self {
        Self::new()
    }
}
