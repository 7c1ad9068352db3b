use std::collections::HashMap;

use crate::{ConnId, ConnSender, Outbound};

/// Every open client connection, logged in or not. Used for the shutdown broadcast.
pub struct ConnectionState {
    pub conns: HashMap<ConnId, ConnSender>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            conns: HashMap::new(),
        }
    }

    pub fn insert(&mut self, conn_id: ConnId, sender: ConnSender) {
        self.conns.insert(conn_id, sender);
    }

    pub fn remove(&mut self, conn_id: &ConnId) -> Option<ConnSender> {
        self.conns.remove(conn_id)
    }

    /// Queue `text` followed by a close on every connection.
    pub fn send_all_then_close(&self, text: &str) {
        for sender in self.conns.values() {
            let _ = sender.send(Outbound::Frame(text.to_string()));
            let _ = sender.send(Outbound::Close);
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
