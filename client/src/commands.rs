//! Interactive command parsing.

use crate::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Credentials may be given inline; otherwise the binary prompts for them.
    Register(Option<Credentials>),
    Login(Option<Credentials>),
    Message { to: String, text: String },
    Invite { to: String, message: String },
    Accept { from: String, message: String },
    Logout,
    Help,
    Exit,
}

pub const HELP_UNAUTHENTICATED: &str = "\
Commands:
  register [username password]   create an account
  login [username password]      log in
  help                           show this help
  exit                           quit";

pub const HELP_AUTHENTICATED: &str = "\
Commands:
  message <friend> <text>        chat with an online friend
  invite <user> [message]        send a friend request
  accept <user> [message]        accept a friend request
  logout                         log out (stay connected)
  help                           show this help";

pub fn help_text(authenticated: bool) -> &'static str {
    if authenticated {
        HELP_AUTHENTICATED
    } else {
        HELP_UNAUTHENTICATED
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn credentials(rest: &str, usage: &'static str) -> Result<Option<Credentials>, ClientError> {
    let (username, rest) = split_word(rest);
    if username.is_empty() {
        return Ok(None);
    }
    let (password, extra) = split_word(rest);
    if password.is_empty() || !extra.is_empty() {
        return Err(ClientError::Usage(usage));
    }
    Ok(Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    }))
}

impl UserCommand {
    pub fn parse(line: &str) -> Result<Self, ClientError> {
        let (word, rest) = split_word(line.trim());
        match word {
            "register" => Ok(UserCommand::Register(credentials(rest, "register [username password]")?)),
            "login" => Ok(UserCommand::Login(credentials(rest, "login [username password]")?)),
            "message" => {
                let (to, text) = split_word(rest);
                if to.is_empty() || text.is_empty() {
                    return Err(ClientError::Usage("message <friend> <text>"));
                }
                Ok(UserCommand::Message {
                    to: to.to_string(),
                    text: text.to_string(),
                })
            }
            "invite" => {
                let (to, message) = split_word(rest);
                if to.is_empty() {
                    return Err(ClientError::Usage("invite <user> [message]"));
                }
                Ok(UserCommand::Invite {
                    to: to.to_string(),
                    message: message.to_string(),
                })
            }
            "accept" => {
                let (from, message) = split_word(rest);
                if from.is_empty() {
                    return Err(ClientError::Usage("accept <user> [message]"));
                }
                Ok(UserCommand::Accept {
                    from: from.to_string(),
                    message: message.to_string(),
                })
            }
            "logout" => Ok(UserCommand::Logout),
            "help" | "" => Ok(UserCommand::Help),
            "exit" => Ok(UserCommand::Exit),
            _ => Err(ClientError::Usage("unknown command; type help")),
        }
    }
}
