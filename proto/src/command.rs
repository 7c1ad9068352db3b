//! Command lines carried inside frames.
//!
//! `Request` flows client → server, `Event` flows server → client and `PeerFrame` flows
//! between two clients on a peer link. Each type renders with `Display` and parses with
//! `FromStr`, so `line.parse::<Request>()` and `request.to_string()` are the codec.

use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

/// Longest username the directory accepts, so replies that echo a name always fit a frame.
pub const MAX_USERNAME_LEN: usize = 32;

/// Reply code used by REGISTER and LOGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failed,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Failed => 500,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl From<bool> for Status {
    fn from(ok: bool) -> Self {
        if ok {
            Status::Ok
        } else {
            Status::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register { username: String, password_hash: String },
    Login { username: String, password_hash: String },
    Location { host: String, port: u16 },
    Invite { target: String, message: String },
    InviteAccept { inviter: String, message: String },
    Logout,
    Exit,
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Register { username: String, status: Status },
    Login { username: String, status: Status },
    Location { username: String, host: String, port: u16 },
    InviteFrom { from: String, message: String },
    InviteAccept { from: String, message: String },
    InviteFailed { target: String },
    /// The inviter went offline before the accept reached the server.
    InviteAcceptFailed { inviter: String },
    Logout { username: String },
    Terminate { username: String },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// Handshake naming the dialing side of a peer link.
    User { username: String },
    Text(String),
}

/// Cursor over the fields that follow a keyword.
struct Fields<'a> {
    command: &'static str,
    rest: &'a str,
}

impl<'a> Fields<'a> {
    fn new(command: &'static str, rest: &'a str) -> Self {
        Self { command, rest }
    }

    fn token(&mut self, field: &'static str) -> Result<&'a str, ProtocolError> {
        let trimmed = self.rest.trim_start();
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (tok, rest) = trimmed.split_at(end);
        self.rest = rest;
        if tok.is_empty() {
            return Err(ProtocolError::MissingField {
                command: self.command,
                field,
            });
        }
        Ok(tok)
    }

    fn port(&mut self) -> Result<u16, ProtocolError> {
        let raw = self.token("port")?;
        raw.parse().map_err(|_| ProtocolError::InvalidField {
            command: self.command,
            field: "port",
            value: raw.to_string(),
        })
    }

    fn status(&mut self) -> Result<Status, ProtocolError> {
        let raw = self.token("status")?;
        match raw {
            "200" => Ok(Status::Ok),
            "500" => Ok(Status::Failed),
            _ => Err(ProtocolError::InvalidField {
                command: self.command,
                field: "status",
                value: raw.to_string(),
            }),
        }
    }

    /// Free text running to the end of the line; may be empty.
    fn remainder(self) -> String {
        self.rest.trim_start().to_string()
    }
}

fn split_keyword(line: &str) -> Result<(&str, &str), ProtocolError> {
    let line = line.trim_start();
    if line.trim_end().is_empty() {
        return Err(ProtocolError::Empty);
    }
    let end = line.find(char::is_whitespace).unwrap_or(line.len());
    Ok(line.split_at(end))
}

/// Render `KEYWORD a b message`, dropping the trailing space when the message is empty.
fn with_message(f: &mut fmt::Formatter<'_>, head: fmt::Arguments<'_>, message: &str) -> fmt::Result {
    if message.is_empty() {
        write!(f, "{}", head)
    } else {
        write!(f, "{} {}", head, message)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Register { username, password_hash } => {
                write!(f, "REGISTER {} {}", username, password_hash)
            }
            Request::Login { username, password_hash } => {
                write!(f, "LOGIN {} {}", username, password_hash)
            }
            Request::Location { host, port } => write!(f, "LOCATION {} {}", host, port),
            Request::Invite { target, message } => {
                with_message(f, format_args!("INVITE {}", target), message)
            }
            Request::InviteAccept { inviter, message } => {
                with_message(f, format_args!("INVITE_ACCEPT {}", inviter), message)
            }
            Request::Logout => f.write_str("LOGOUT"),
            Request::Exit => f.write_str("EXIT"),
            Request::Terminate => f.write_str("TERMINATE"),
        }
    }
}

impl FromStr for Request {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (keyword, rest) = split_keyword(line)?;
        match keyword {
            "REGISTER" => {
                let mut fields = Fields::new("REGISTER", rest);
                Ok(Request::Register {
                    username: fields.token("username")?.to_string(),
                    password_hash: fields.token("password_hash")?.to_string(),
                })
            }
            "LOGIN" => {
                let mut fields = Fields::new("LOGIN", rest);
                Ok(Request::Login {
                    username: fields.token("username")?.to_string(),
                    password_hash: fields.token("password_hash")?.to_string(),
                })
            }
            "LOCATION" => {
                let mut fields = Fields::new("LOCATION", rest);
                let host = fields.token("host")?.to_string();
                let port = fields.port()?;
                Ok(Request::Location { host, port })
            }
            "INVITE" => {
                let mut fields = Fields::new("INVITE", rest);
                let target = fields.token("target")?.to_string();
                Ok(Request::Invite { target, message: fields.remainder() })
            }
            "INVITE_ACCEPT" => {
                let mut fields = Fields::new("INVITE_ACCEPT", rest);
                let inviter = fields.token("inviter")?.to_string();
                Ok(Request::InviteAccept { inviter, message: fields.remainder() })
            }
            "LOGOUT" => Ok(Request::Logout),
            "EXIT" => Ok(Request::Exit),
            "TERMINATE" => Ok(Request::Terminate),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Register { username, status } => {
                write!(f, "REGISTER {} {}", username, status.code())
            }
            Event::Login { username, status } => write!(f, "LOGIN {} {}", username, status.code()),
            Event::Location { username, host, port } => {
                write!(f, "LOCATION {} {} {}", username, host, port)
            }
            Event::InviteFrom { from, message } => {
                with_message(f, format_args!("INVITE_FROM {}", from), message)
            }
            Event::InviteAccept { from, message } => {
                with_message(f, format_args!("INVITE_ACCEPT {}", from), message)
            }
            Event::InviteFailed { target } => write!(f, "INVITE_FAILED {}", target),
            Event::InviteAcceptFailed { inviter } => write!(f, "INVITE_ACCEPT_FAILED {}", inviter),
            Event::Logout { username } => write!(f, "LOGOUT {}", username),
            Event::Terminate { username } => write!(f, "TERMINATE {}", username),
            Event::Shutdown => f.write_str("SHUTDOWN"),
        }
    }
}

impl FromStr for Event {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (keyword, rest) = split_keyword(line)?;
        match keyword {
            "REGISTER" => {
                let mut fields = Fields::new("REGISTER", rest);
                let username = fields.token("username")?.to_string();
                Ok(Event::Register { username, status: fields.status()? })
            }
            "LOGIN" => {
                let mut fields = Fields::new("LOGIN", rest);
                let username = fields.token("username")?.to_string();
                Ok(Event::Login { username, status: fields.status()? })
            }
            "LOCATION" => {
                let mut fields = Fields::new("LOCATION", rest);
                let username = fields.token("username")?.to_string();
                let host = fields.token("host")?.to_string();
                let port = fields.port()?;
                Ok(Event::Location { username, host, port })
            }
            "INVITE_FROM" => {
                let mut fields = Fields::new("INVITE_FROM", rest);
                let from = fields.token("from")?.to_string();
                Ok(Event::InviteFrom { from, message: fields.remainder() })
            }
            "INVITE_ACCEPT" => {
                let mut fields = Fields::new("INVITE_ACCEPT", rest);
                let from = fields.token("from")?.to_string();
                Ok(Event::InviteAccept { from, message: fields.remainder() })
            }
            "INVITE_FAILED" => {
                let mut fields = Fields::new("INVITE_FAILED", rest);
                Ok(Event::InviteFailed { target: fields.token("target")?.to_string() })
            }
            "INVITE_ACCEPT_FAILED" => {
                let mut fields = Fields::new("INVITE_ACCEPT_FAILED", rest);
                Ok(Event::InviteAcceptFailed { inviter: fields.token("inviter")?.to_string() })
            }
            "LOGOUT" => {
                let mut fields = Fields::new("LOGOUT", rest);
                Ok(Event::Logout { username: fields.token("username")?.to_string() })
            }
            "TERMINATE" => {
                let mut fields = Fields::new("TERMINATE", rest);
                Ok(Event::Terminate { username: fields.token("username")?.to_string() })
            }
            "SHUTDOWN" => Ok(Event::Shutdown),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for PeerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerFrame::User { username } => write!(f, "USER {}", username),
            PeerFrame::Text(text) => f.write_str(text),
        }
    }
}

impl FromStr for PeerFrame {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        if let Ok(("USER", rest)) = split_keyword(line) {
            if let Ok(username) = Fields::new("USER", rest).token("username") {
                return Ok(PeerFrame::User { username: username.to_string() });
            }
        }
        Ok(PeerFrame::Text(line.to_string()))
    }
}
