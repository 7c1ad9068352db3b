//! Wire grammar shared by the directory server and clients.
//!
//! Every message travels as one fixed-size frame (see [`frame`]). The frame text is a
//! space-delimited command line whose first token is the keyword (see [`command`]).
//! The same framing is used on the client↔server channel and on direct peer links.

pub mod command;
pub mod frame;

pub use command::{Event, PeerFrame, Request, Status, MAX_USERNAME_LEN};
pub use frame::{decode_frame, encode_frame, fits_frame, read_frame, write_frame, FRAME_LEN};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("Frame text contains a NUL byte")]
    EmbeddedNul,
    #[error("Empty frame")]
    Empty,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("{command}: missing field {field}")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },
    #[error("{command}: invalid {field} {value:?}")]
    InvalidField {
        command: &'static str,
        field: &'static str,
        value: String,
    },
}
