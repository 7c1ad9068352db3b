//! Parlor client library: a session with the directory server plus the peer acceptor and
//! peer links used for the actual chat.

pub mod acceptor;
pub mod auth;
pub mod client;
pub mod commands;
pub mod config;
pub mod link;
pub mod notice;
pub mod session;

pub use client::Client;
pub use commands::{Credentials, UserCommand};
pub use config::ClientConfig;
pub use notice::Notice;

use parlor_proto::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    StateConflict(String),
    #[error("Not available {0}")]
    InvalidState(&'static str),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Timeout")]
    Timeout,
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("usage: {0}")]
    Usage(&'static str),
}
