use log::{info, warn};
use parlor_proto::{fits_frame, Event, ProtocolError, Request, Status, FRAME_LEN};

use crate::state::{Departure, Location};
use crate::{ConnId, ConnSender, Outbound, ServerError, SharedState};

/// What the connection loop does after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

fn push(sender: &ConnSender, event: &Event) {
    let _ = sender.send(Outbound::Frame(event.to_string()));
}

/// Relayed events carry a longer keyword or an extra name, so a request that fit in a frame
/// may produce one that does not.
fn relayable(event: &Event) -> Result<(), ProtocolError> {
    let text = event.to_string();
    if fits_frame(&text) {
        Ok(())
    } else {
        Err(ProtocolError::FrameTooLarge {
            len: text.len(),
            max: FRAME_LEN,
        })
    }
}

pub async fn handle_request(
    request: Request,
    conn_id: &ConnId,
    state: &SharedState,
    sender: &ConnSender,
) -> Result<Flow, ServerError> {
    match request {
        Request::Register { username, password_hash } => {
            let ok = state.users.write().await.register(&username, &password_hash);
            if ok {
                info!("Registered user {}", username);
            }
            push(sender, &Event::Register { username, status: Status::from(ok) });
            Ok(Flow::Continue)
        }

        Request::Login { username, password_hash } => {
            // Reply while still holding the sessions lock so the 200 is queued before any
            // presence push another connection might send to the new session.
            let mut sessions = state.sessions.write().await;
            let users = state.users.read().await;
            let ok = users.verify(&username, &password_hash)
                && sessions.open(conn_id, &username, sender.clone());
            drop(users);

            if ok {
                info!("{} logged in; online users: {}", username, sessions.len());
            } else {
                info!("Login refused for {}", username);
            }
            push(sender, &Event::Login { username, status: Status::from(ok) });
            Ok(Flow::Continue)
        }

        Request::Location { host, port } => {
            let mut sessions = state.sessions.write().await;
            let username = sessions
                .username_of(conn_id)
                .ok_or(ServerError::NotLoggedIn("LOCATION"))?
                .to_string();

            let location = Location { host, port };
            let announce = Event::Location {
                username: username.clone(),
                host: location.host.clone(),
                port,
            };
            // An address friends cannot be told about is not recorded either.
            relayable(&announce)?;
            sessions.set_address(conn_id, location);
            let users = state.users.read().await;
            for friend in sessions.online_friends(&users, &username) {
                push(&friend.sender, &announce);
                if let Some(addr) = &friend.address {
                    push(
                        sender,
                        &Event::Location {
                            username: friend.username.clone(),
                            host: addr.host.clone(),
                            port: addr.port,
                        },
                    );
                }
            }
            Ok(Flow::Continue)
        }

        Request::Invite { target, message } => {
            let sessions = state.sessions.read().await;
            let from = sessions
                .username_of(conn_id)
                .ok_or(ServerError::NotLoggedIn("INVITE"))?
                .to_string();

            match sessions.session_for_user(&target) {
                Some(target_session) if target != from => {
                    let relay = Event::InviteFrom { from, message };
                    match relayable(&relay) {
                        Ok(()) => {
                            info!("Relaying invite to {}", target);
                            push(&target_session.sender, &relay);
                        }
                        Err(e) => {
                            warn!("Invite to {} not relayed: {}", target, e);
                            push(sender, &Event::InviteFailed { target });
                        }
                    }
                }
                _ => push(sender, &Event::InviteFailed { target }),
            }
            Ok(Flow::Continue)
        }

        Request::InviteAccept { inviter, message } => {
            // The friendship mutation and both LOCATION pushes happen under the sessions
            // write lock so no login/logout of either user interleaves.
            let sessions = state.sessions.write().await;
            let accepter = sessions
                .get(conn_id)
                .ok_or(ServerError::NotLoggedIn("INVITE_ACCEPT"))?
                .clone();

            let inviter_session = match sessions.session_for_user(&inviter) {
                Some(s) if inviter != accepter.username => s,
                _ => {
                    warn!("{} accepted an invite from offline user {}", accepter.username, inviter);
                    push(sender, &Event::InviteAcceptFailed { inviter });
                    return Ok(Flow::Continue);
                }
            };

            let relay = Event::InviteAccept {
                from: accepter.username.clone(),
                message,
            };
            if let Err(e) = relayable(&relay) {
                warn!("Acceptance of {}'s invite not relayed: {}", inviter, e);
                push(sender, &Event::InviteAcceptFailed { inviter });
                return Ok(Flow::Continue);
            }
            push(&inviter_session.sender, &relay);

            state
                .users
                .write()
                .await
                .add_friendship(&inviter, &accepter.username);
            info!("{} and {} are now friends", inviter, accepter.username);

            if let Some(addr) = &inviter_session.address {
                push(
                    sender,
                    &Event::Location {
                        username: inviter.clone(),
                        host: addr.host.clone(),
                        port: addr.port,
                    },
                );
            }
            if let Some(addr) = &accepter.address {
                push(
                    &inviter_session.sender,
                    &Event::Location {
                        username: accepter.username.clone(),
                        host: addr.host.clone(),
                        port: addr.port,
                    },
                );
            }
            Ok(Flow::Continue)
        }

        Request::Logout => {
            state
                .end_session(conn_id, Some(Departure::Logout))
                .await
                .ok_or(ServerError::NotLoggedIn("LOGOUT"))?;
            Ok(Flow::Continue)
        }

        Request::Exit | Request::Terminate => Ok(Flow::Close),
    }
}
