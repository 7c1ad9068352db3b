use std::env;
use std::time::Duration;

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    /// `PARLOR_ADVERTISE_HOST`; unset = the local address of the server connection.
    pub advertise_host: Option<String>,
    /// `PARLOR_DIAL_TIMEOUT_SECS`; applies to the server connect and every peer dial.
    pub dial_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_host: impl Into<String>, server_port: u16) -> Self {
        Self {
            server_host: server_host.into(),
            server_port,
            advertise_host: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    pub fn from_env(server_host: impl Into<String>, server_port: u16) -> Self {
        let mut config = Self::new(server_host, server_port);

        config.advertise_host = env::var("PARLOR_ADVERTISE_HOST")
            .ok()
            .filter(|v| !v.trim().is_empty());

        if let Some(secs) = env::var("PARLOR_DIAL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            config.dial_timeout = Duration::from_secs(secs);
        }

        config
    }
}
