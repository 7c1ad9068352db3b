use std::fmt;

/// Something the user should see. The client never prints; the binary renders these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Registered { username: String },
    RegisterFailed { username: String },
    LoggedIn { username: String },
    LoginFailed { username: String },
    FriendOnline { username: String, host: String, port: u16 },
    /// `graceful` is true for LOGOUT, false for TERMINATE.
    FriendLeft { username: String, graceful: bool },
    InviteReceived { from: String, message: String },
    InviteAccepted { from: String, message: String },
    InviteFailed { target: String },
    InviteAcceptFailed { inviter: String },
    Chat { from: String, text: String },
    PeerDisconnected { peer: Option<String> },
    ServerShutdown,
    ServerClosed,
    Error(String),
}

fn with_message(f: &mut fmt::Formatter<'_>, head: String, message: &str) -> fmt::Result {
    if message.is_empty() {
        f.write_str(&head)
    } else {
        write!(f, "{}: {}", head, message)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Registered { username } => {
                write!(f, "Registered {}. Log in to start chatting.", username)
            }
            Notice::RegisterFailed { username } => {
                write!(f, "Could not register {}: name already taken.", username)
            }
            Notice::LoggedIn { username } => write!(f, "Logged in as {}.", username),
            Notice::LoginFailed { username } => write!(
                f,
                "Login failed for {}: wrong credentials or already logged in.",
                username
            ),
            Notice::FriendOnline { username, host, port } => {
                write!(f, "{} is online at {}:{}.", username, host, port)
            }
            Notice::FriendLeft { username, graceful: true } => write!(f, "{} logged out.", username),
            Notice::FriendLeft { username, graceful: false } => {
                write!(f, "{} disconnected.", username)
            }
            Notice::InviteReceived { from, message } => with_message(
                f,
                format!("{} invited you (type: accept {})", from, from),
                message,
            ),
            Notice::InviteAccepted { from, message } => {
                with_message(f, format!("{} accepted your invite", from), message)
            }
            Notice::InviteFailed { target } => {
                write!(f, "Invite to {} failed: user is not online.", target)
            }
            Notice::InviteAcceptFailed { inviter } => {
                write!(f, "Could not accept {}'s invite: they are no longer online.", inviter)
            }
            Notice::Chat { from, text } => write!(f, "[{}]: {}", from, text),
            Notice::PeerDisconnected { peer: Some(peer) } => {
                write!(f, "Chat link with {} closed.", peer)
            }
            Notice::PeerDisconnected { peer: None } => f.write_str("An unnamed chat link closed."),
            Notice::ServerShutdown => f.write_str("The directory server is shutting down."),
            Notice::ServerClosed => f.write_str("Lost connection to the directory server."),
            Notice::Error(e) => write!(f, "Error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_renders_with_sender_label() {
        let n = Notice::Chat {
            from: "alice".into(),
            text: "hello".into(),
        };
        assert_eq!(n.to_string(), "[alice]: hello");
    }

    #[test]
    fn empty_invite_message_is_omitted() {
        let bare = Notice::InviteAccepted {
            from: "bob".into(),
            message: String::new(),
        };
        assert_eq!(bare.to_string(), "bob accepted your invite");

        let with = Notice::InviteAccepted {
            from: "bob".into(),
            message: "sure".into(),
        };
        assert_eq!(with.to_string(), "bob accepted your invite: sure");
    }
}
