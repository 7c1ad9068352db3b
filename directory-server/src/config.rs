use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Directory server configuration: the user file and port come from the command line,
/// everything else from the environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub user_file: PathBuf,
    pub port: u16,
    /// `PARLOR_BIND_ADDR`; defaults to all interfaces.
    pub bind_addr: IpAddr,
    /// `PARLOR_MAX_CONNECTIONS`; 0 = unlimited.
    pub max_connections: u32,
    /// `PARLOR_MAX_PER_IP`; 0 = unlimited.
    pub max_per_ip: u32,
    /// `PARLOR_STATUS_PORT`; unset = no status endpoint.
    pub status_port: Option<u16>,
}

impl ServerConfig {
    pub fn new(user_file: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            user_file: user_file.into(),
            port,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_connections: 0,
            max_per_ip: 0,
            status_port: None,
        }
    }

    pub fn from_env(user_file: impl Into<PathBuf>, port: u16) -> Self {
        let mut config = Self::new(user_file, port);

        if let Some(addr) = env::var("PARLOR_BIND_ADDR").ok().and_then(|v| v.parse().ok()) {
            config.bind_addr = addr;
        }

        config.max_connections = env::var("PARLOR_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        config.max_per_ip = env::var("PARLOR_MAX_PER_IP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        config.status_port = env::var("PARLOR_STATUS_PORT")
            .ok()
            .and_then(|v| v.parse().ok());

        config
    }
}
