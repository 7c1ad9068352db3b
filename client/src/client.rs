use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parlor_proto::{
    fits_frame, read_frame, write_frame, Event, PeerFrame, ProtocolError, Request, FRAME_LEN,
    MAX_USERNAME_LEN,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, RwLock};

use crate::acceptor::Acceptor;
use crate::auth::hash_password;
use crate::link::{self, LinkTable, NoticeSender, SharedLinks};
use crate::session::{AuthKind, FriendCache, FriendInfo, InviteBook, SessionPhase};
use crate::{ClientConfig, ClientError, Notice};

/// A connection to the directory server plus everything owned by the current login.
///
/// Cloning is cheap; all clones share one session. Lock order when more than one is held:
/// phase → friends → invites → acceptor → links.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    /// Local address of the server connection; advertised unless overridden.
    local_ip: IpAddr,
    server: Mutex<OwnedWriteHalf>,
    phase: RwLock<SessionPhase>,
    friends: RwLock<FriendCache>,
    invites: Mutex<InviteBook>,
    acceptor: Mutex<Option<Acceptor>>,
    links: SharedLinks,
    notices: NoticeSender,
    closed: watch::Sender<bool>,
}

impl Client {
    /// Connect to the directory and start reading its pushes. User-facing events arrive on
    /// the returned receiver.
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notice>), ClientError> {
        let addr = (config.server_host.as_str(), config.server_port);
        let stream = match tokio::time::timeout(config.dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::ConnectionFailed(e.to_string())),
            Err(_) => return Err(ClientError::Timeout),
        };
        let local_ip = stream.local_addr()?.ip();
        info!(
            "Connected to directory {}:{}",
            config.server_host, config.server_port
        );

        let (reader, writer) = stream.into_split();
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let inner = Arc::new(ClientInner {
            config,
            local_ip,
            server: Mutex::new(writer),
            phase: RwLock::new(SessionPhase::Unauthenticated),
            friends: RwLock::new(FriendCache::new()),
            invites: Mutex::new(InviteBook::default()),
            acceptor: Mutex::new(None),
            links: Arc::new(Mutex::new(LinkTable::new())),
            notices,
            closed,
        });
        tokio::spawn(read_server(inner.clone(), reader));

        Ok((Self { inner }, notice_rx))
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<(), ClientError> {
        self.authenticate(AuthKind::Register, username, password).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        self.authenticate(AuthKind::Login, username, password).await
    }

    async fn authenticate(
        &self,
        kind: AuthKind,
        username: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        if username.len() > MAX_USERNAME_LEN {
            return Err(ClientError::Usage("usernames are at most 32 bytes"));
        }
        // The phase lock is held across the send so the reply cannot overtake the transition.
        let mut phase = self.inner.phase.write().await;
        phase.begin(kind, username)?;

        let password_hash = hash_password(password);
        let username = username.to_string();
        let request = match kind {
            AuthKind::Register => Request::Register {
                username,
                password_hash,
            },
            AuthKind::Login => Request::Login {
                username,
                password_hash,
            },
        };
        if let Err(e) = self.inner.send(&request).await {
            *phase = SessionPhase::Unauthenticated;
            return Err(e);
        }
        Ok(())
    }

    /// Send chat text to a friend, dialing them first if no link is open.
    pub async fn message(&self, to: &str, text: &str) -> Result<(), ClientError> {
        let me = self.require_login().await?;
        if to == me {
            return Err(ClientError::StateConflict("You cannot message yourself.".into()));
        }
        let frame = PeerFrame::Text(text.to_string());
        let encoded = frame.to_string();
        if !fits_frame(&encoded) {
            return Err(ProtocolError::FrameTooLarge {
                len: encoded.len(),
                max: FRAME_LEN,
            }
            .into());
        }

        let existing = self.inner.links.lock().await.writer_for(to);
        let writer = match existing {
            Some(writer) => writer,
            None => {
                let friend = self
                    .inner
                    .friends
                    .read()
                    .await
                    .get(to)
                    .cloned()
                    .ok_or_else(|| ClientError::NotFound(format!("{} is not an online friend.", to)))?;
                link::dial(
                    &friend.host,
                    friend.port,
                    self.inner.config.dial_timeout,
                    &me,
                    to,
                    &self.inner.links,
                    &self.inner.notices,
                )
                .await?
            }
        };

        link::send_frame(&writer, &frame).await
    }

    pub async fn invite(&self, to: &str, message: &str) -> Result<(), ClientError> {
        let me = self.require_login().await?;
        let relay = Event::InviteFrom {
            from: me.clone(),
            message: message.to_string(),
        };
        if !fits_frame(&relay.to_string()) {
            return Err(ClientError::Usage("invite message too long"));
        }
        let friends = self.inner.friends.read().await;
        let mut invites = self.inner.invites.lock().await;
        invites.check_invite(&me, to, &friends)?;
        drop(friends);

        self.inner
            .send(&Request::Invite {
                target: to.to_string(),
                message: message.to_string(),
            })
            .await?;
        invites.record_sent(to);
        Ok(())
    }

    pub async fn accept(&self, from: &str, message: &str) -> Result<(), ClientError> {
        let me = self.require_login().await?;
        let relay = Event::InviteAccept {
            from: me,
            message: message.to_string(),
        };
        if !fits_frame(&relay.to_string()) {
            return Err(ClientError::Usage("accept message too long"));
        }
        let mut invites = self.inner.invites.lock().await;
        invites.take_received(from)?;

        let sent = self
            .inner
            .send(&Request::InviteAccept {
                inviter: from.to_string(),
                message: message.to_string(),
            })
            .await;
        if sent.is_err() {
            invites.record_received(from);
        }
        sent
    }

    /// Log out but keep the server connection for another login.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let mut phase = self.inner.phase.write().await;
        let username = match phase.username() {
            Some(u) => u.to_string(),
            None => return Err(ClientError::InvalidState("before logging in")),
        };
        self.inner.send(&Request::Logout).await?;
        *phase = SessionPhase::Unauthenticated;
        drop(phase);

        self.inner.teardown_peers().await;
        info!("Logged out {}", username);
        Ok(())
    }

    /// Leave cleanly. Only offered before login; use `logout` first.
    pub async fn exit(&self) -> Result<(), ClientError> {
        if self.is_authenticated().await {
            return Err(ClientError::InvalidState("while logged in; logout first"));
        }
        self.inner.leave(Request::Exit).await;
        Ok(())
    }

    /// Abrupt departure (interrupt). Friends see TERMINATE.
    pub async fn terminate(&self) {
        self.inner.leave(Request::Terminate).await;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.phase.read().await.username().is_some()
    }

    pub async fn username(&self) -> Option<String> {
        self.inner.phase.read().await.username().map(str::to_string)
    }

    pub async fn friend(&self, username: &str) -> Option<FriendInfo> {
        self.inner.friends.read().await.get(username).cloned()
    }

    pub async fn link_count(&self) -> usize {
        self.inner.links.lock().await.len()
    }

    /// Flips to true once the server connection is gone (exit, shutdown, or lost).
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.inner.closed.subscribe()
    }

    async fn require_login(&self) -> Result<String, ClientError> {
        self.username()
            .await
            .ok_or(ClientError::InvalidState("before logging in"))
    }
}

impl ClientInner {
    async fn send(&self, request: &Request) -> Result<(), ClientError> {
        let mut server = self.server.lock().await;
        write_frame(&mut *server, &request.to_string()).await?;
        Ok(())
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    async fn leave(&self, request: Request) {
        self.closed.send_replace(true);
        if let Err(e) = self.send(&request).await {
            debug!("Could not send {}: {}", request, e);
        }
        *self.phase.write().await = SessionPhase::Unauthenticated;
        self.teardown_peers().await;
    }

    /// Open the acceptor and advertise it. Called with the phase lock held.
    async fn start_presence(&self) -> Result<(), ClientError> {
        let acceptor = Acceptor::start(self.links.clone(), self.notices.clone()).await?;
        let host = self
            .config
            .advertise_host
            .clone()
            .unwrap_or_else(|| self.local_ip.to_string());
        let port = acceptor.port();
        *self.acceptor.lock().await = Some(acceptor);

        self.send(&Request::Location { host, port }).await
    }

    /// Drop everything owned by the current login: acceptor, links, friends, invites.
    async fn teardown_peers(&self) {
        let acceptor = self.acceptor.lock().await.take();
        if let Some(acceptor) = acceptor {
            acceptor.stop().await;
        }
        let links = self.links.lock().await.drain();
        for link in links {
            link.close().await;
        }
        self.friends.write().await.clear();
        self.invites.lock().await.clear();
    }

    async fn apply(&self, event: Event) {
        match event {
            Event::Register { username, status } => {
                let settled = self
                    .phase
                    .write()
                    .await
                    .settle(AuthKind::Register, &username, status.is_ok());
                if !settled {
                    debug!("Ignoring stray REGISTER reply for {}", username);
                } else if status.is_ok() {
                    self.notify(Notice::Registered { username });
                } else {
                    self.notify(Notice::RegisterFailed { username });
                }
            }

            Event::Login { username, status } => {
                let mut phase = self.phase.write().await;
                if !phase.settle(AuthKind::Login, &username, status.is_ok()) {
                    debug!("Ignoring stray LOGIN reply for {}", username);
                    return;
                }
                if !status.is_ok() {
                    self.notify(Notice::LoginFailed { username });
                    return;
                }
                let presence = self.start_presence().await;
                drop(phase);

                self.notify(Notice::LoggedIn { username });
                if let Err(e) = presence {
                    error!("Could not advertise a chat address: {}", e);
                    self.notify(Notice::Error(format!("Friends cannot reach you: {}", e)));
                }
            }

            Event::Shutdown => self.notify(Notice::ServerShutdown),

            other => {
                if self.phase.read().await.username().is_none() {
                    debug!("Ignoring {} while logged out", other);
                    return;
                }
                self.apply_presence(other).await;
            }
        }
    }

    async fn apply_presence(&self, event: Event) {
        match event {
            Event::Location {
                username,
                host,
                port,
            } => {
                self.friends.write().await.insert(
                    username.clone(),
                    FriendInfo {
                        host: host.clone(),
                        port,
                    },
                );
                self.notify(Notice::FriendOnline {
                    username,
                    host,
                    port,
                });
            }

            Event::InviteFrom { from, message } => {
                let friends = self.friends.read().await;
                if friends.contains_key(&from) {
                    debug!("Dropping invite from existing friend {}", from);
                    return;
                }
                self.invites.lock().await.record_received(&from);
                drop(friends);
                self.notify(Notice::InviteReceived { from, message });
            }

            Event::InviteAccept { from, message } => {
                self.invites.lock().await.settle_sent(&from);
                self.notify(Notice::InviteAccepted { from, message });
            }

            Event::InviteFailed { target } => {
                self.invites.lock().await.settle_sent(&target);
                self.notify(Notice::InviteFailed { target });
            }

            Event::InviteAcceptFailed { inviter } => {
                self.notify(Notice::InviteAcceptFailed { inviter });
            }

            Event::Logout { username } => self.friend_left(username, true).await,
            Event::Terminate { username } => self.friend_left(username, false).await,

            other => warn!("Unexpected event from directory: {}", other),
        }
    }

    async fn friend_left(&self, username: String, graceful: bool) {
        self.friends.write().await.remove(&username);
        let links = self.links.lock().await.remove_peer(&username);
        for link in links {
            link.close().await;
        }
        self.notify(Notice::FriendLeft { username, graceful });
    }
}

async fn read_server(inner: Arc<ClientInner>, mut reader: OwnedReadHalf) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(line)) => match line.parse::<Event>() {
                Ok(Event::Shutdown) => {
                    inner.apply(Event::Shutdown).await;
                    break;
                }
                Ok(event) => inner.apply(event).await,
                Err(e) => warn!("Unparseable frame from directory: {}", e),
            },
            Ok(None) => {
                if !*inner.closed.borrow() {
                    inner.notify(Notice::ServerClosed);
                }
                break;
            }
            Err(e) => {
                error!("Read from directory failed: {}", e);
                inner.notify(Notice::ServerClosed);
                break;
            }
        }
    }

    *inner.phase.write().await = SessionPhase::Unauthenticated;
    inner.teardown_peers().await;
    inner.closed.send_replace(true);
}
