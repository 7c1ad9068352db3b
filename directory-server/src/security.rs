//! Connection limits for the directory listener.
//!
//! Limits come from the environment (see [`crate::config::ServerConfig`]); 0 disables a
//! limit. Over-limit connections are closed right after accept, before any frame is read.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Which cap refused a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitExceeded {
    Total(u32),
    PerIp(u32),
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitExceeded::Total(max) => write!(f, "{} connections open", max),
            LimitExceeded::PerIp(max) => write!(f, "{} connections open from this address", max),
        }
    }
}

/// Open connection counts, keyed by the TCP peer address. Clients connect directly with no
/// proxy in front, so the socket address is the client's address.
pub struct ConnectionTracker {
    total: u32,
    per_ip: HashMap<IpAddr, u32>,
    max_total: u32,
    max_per_ip: u32,
}

impl ConnectionTracker {
    pub fn new(max_total: u32, max_per_ip: u32) -> Self {
        Self {
            total: 0,
            per_ip: HashMap::new(),
            max_total,
            max_per_ip,
        }
    }

    /// Count a new connection from `ip`, or say which cap it would break.
    pub fn try_register(&mut self, ip: IpAddr) -> Result<(), LimitExceeded> {
        if self.max_total > 0 && self.total >= self.max_total {
            return Err(LimitExceeded::Total(self.max_total));
        }
        let per = self.from_ip(ip);
        if self.max_per_ip > 0 && per >= self.max_per_ip {
            return Err(LimitExceeded::PerIp(self.max_per_ip));
        }
        self.per_ip.insert(ip, per + 1);
        self.total += 1;
        Ok(())
    }

    pub fn unregister(&mut self, ip: IpAddr) {
        if let Some(n) = self.per_ip.get_mut(&ip) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.per_ip.remove(&ip);
            }
        }
        self.total = self.total.saturating_sub(1);
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn from_ip(&self, ip: IpAddr) -> u32 {
        self.per_ip.get(&ip).copied().unwrap_or(0)
    }
}

pub type SharedConnectionTracker = Arc<RwLock<ConnectionTracker>>;
