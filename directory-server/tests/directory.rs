use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::extract::State;
use parlor_directory::config::ServerConfig;
use parlor_directory::handlers::http::get_status;
use parlor_directory::state::Lifecycle;
use parlor_directory::{Server, ServerError, SharedState};
use parlor_proto::{read_frame, write_frame, Event, Status, FRAME_LEN};
use tempfile::{tempdir, TempDir};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(300);

struct Directory {
    addr: SocketAddr,
    state: SharedState,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ServerError>>,
    _dir: TempDir,
}

impl Directory {
    async fn start() -> Self {
        let dir = tempdir().unwrap();
        Self::start_in(dir).await
    }

    async fn start_in(dir: TempDir) -> Self {
        let mut config = ServerConfig::new(dir.path().join("users.txt"), 0);
        config.bind_addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let server = Server::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let state = server.state();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            stopped.await.ok();
        }));
        Self {
            addr,
            state,
            stop: Some(stop),
            task,
            _dir: dir,
        }
    }

    async fn connect(&self) -> Conn {
        Conn {
            stream: TcpStream::connect(self.addr).await.unwrap(),
        }
    }

    async fn shutdown(mut self) -> TempDir {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        timeout(WAIT, &mut self.task).await.unwrap().unwrap().unwrap();
        self._dir
    }
}

struct Conn {
    stream: TcpStream,
}

impl Conn {
    async fn send(&mut self, line: &str) {
        write_frame(&mut self.stream, line).await.unwrap();
    }

    async fn recv(&mut self) -> Event {
        let line = timeout(WAIT, read_frame(&mut self.stream))
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed");
        line.parse().unwrap()
    }

    async fn expect_quiet(&mut self) {
        if let Ok(frame) = timeout(QUIET, read_frame(&mut self.stream)).await {
            panic!("unexpected frame: {:?}", frame);
        }
    }

    async fn expect_closed(&mut self) {
        let frame = timeout(WAIT, read_frame(&mut self.stream)).await.unwrap().unwrap();
        assert!(frame.is_none(), "expected end of stream, got {:?}", frame);
    }

    /// Register (ignoring "already taken") and log in; panics if login fails.
    async fn login(&mut self, user: &str) {
        self.send(&format!("REGISTER {} hash-{}", user, user)).await;
        self.recv().await;
        self.send(&format!("LOGIN {} hash-{}", user, user)).await;
        assert_eq!(
            self.recv().await,
            Event::Login { username: user.into(), status: Status::Ok }
        );
    }
}

fn location(user: &str, port: u16) -> Event {
    Event::Location {
        username: user.into(),
        host: "127.0.0.1".into(),
        port,
    }
}

/// Log both in, announce locations, and make them friends through invite/accept.
async fn befriend(dir: &Directory) -> (Conn, Conn) {
    let mut alice = dir.connect().await;
    let mut bob = dir.connect().await;
    alice.login("alice").await;
    bob.login("bob").await;
    alice.send("LOCATION 127.0.0.1 7001").await;
    bob.send("LOCATION 127.0.0.1 7002").await;

    alice.send("INVITE bob be my friend").await;
    assert_eq!(
        bob.recv().await,
        Event::InviteFrom { from: "alice".into(), message: "be my friend".into() }
    );
    bob.send("INVITE_ACCEPT alice sure").await;
    assert_eq!(
        alice.recv().await,
        Event::InviteAccept { from: "bob".into(), message: "sure".into() }
    );
    assert_eq!(alice.recv().await, location("bob", 7002));
    assert_eq!(bob.recv().await, location("alice", 7001));
    (alice, bob)
}

#[tokio::test]
async fn register_is_unique() {
    let dir = Directory::start().await;
    let mut conn = dir.connect().await;

    conn.send("REGISTER alice pw1").await;
    assert_eq!(conn.recv().await, Event::Register { username: "alice".into(), status: Status::Ok });
    conn.send("REGISTER bob pw2").await;
    assert_eq!(conn.recv().await, Event::Register { username: "bob".into(), status: Status::Ok });
    conn.send("REGISTER alice other").await;
    assert_eq!(
        conn.recv().await,
        Event::Register { username: "alice".into(), status: Status::Failed }
    );
    assert_eq!(dir.state.users.read().await.len(), 2);
}

#[tokio::test]
async fn concurrent_logins_admit_exactly_one() {
    let dir = Directory::start().await;
    let mut setup = dir.connect().await;
    setup.send("REGISTER alice pw1").await;
    setup.recv().await;

    let mut first = dir.connect().await;
    let mut second = dir.connect().await;
    tokio::join!(first.send("LOGIN alice pw1"), second.send("LOGIN alice pw1"));
    let (a, b) = tokio::join!(first.recv(), second.recv());

    let statuses: Vec<Status> = [a, b]
        .into_iter()
        .map(|ev| match ev {
            Event::Login { status, .. } => status,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(statuses.iter().filter(|s| s.is_ok()).count(), 1);
    assert_eq!(dir.state.sessions.read().await.len(), 1);
}

#[tokio::test]
async fn bad_credentials_and_unknown_users_fail_alike() {
    let dir = Directory::start().await;
    let mut conn = dir.connect().await;
    conn.send("REGISTER alice pw1").await;
    conn.recv().await;

    conn.send("LOGIN alice wrong").await;
    assert_eq!(conn.recv().await, Event::Login { username: "alice".into(), status: Status::Failed });
    conn.send("LOGIN nobody pw").await;
    assert_eq!(conn.recv().await, Event::Login { username: "nobody".into(), status: Status::Failed });
}

#[tokio::test]
async fn invite_to_offline_user_fails() {
    let dir = Directory::start().await;
    let mut bob = dir.connect().await;
    bob.send("REGISTER bob pw2").await;
    bob.recv().await;

    let mut alice = dir.connect().await;
    alice.login("alice").await;
    alice.send("INVITE bob hello").await;
    assert_eq!(alice.recv().await, Event::InviteFailed { target: "bob".into() });
}

#[tokio::test]
async fn accepted_invite_makes_symmetric_friends() {
    let dir = Directory::start().await;
    let (mut alice, mut bob) = befriend(&dir).await;

    let users = dir.state.users.read().await;
    assert!(users.are_friends("alice", "bob"));
    assert!(users.are_friends("bob", "alice"));
    drop(users);

    alice.expect_quiet().await;
    bob.expect_quiet().await;
}

#[tokio::test]
async fn location_fans_out_exactly_once_each_way() {
    let dir = Directory::start().await;
    let (mut alice, mut bob) = befriend(&dir).await;

    bob.send("LOGOUT").await;
    assert_eq!(alice.recv().await, Event::Logout { username: "bob".into() });

    bob.send("LOGIN bob hash-bob").await;
    assert_eq!(bob.recv().await, Event::Login { username: "bob".into(), status: Status::Ok });
    bob.send("LOCATION 127.0.0.1 7100").await;

    assert_eq!(alice.recv().await, location("bob", 7100));
    assert_eq!(bob.recv().await, location("alice", 7001));
    alice.expect_quiet().await;
    bob.expect_quiet().await;
}

#[tokio::test]
async fn accept_after_inviter_left_fails_cleanly() {
    let dir = Directory::start().await;
    let mut alice = dir.connect().await;
    let mut bob = dir.connect().await;
    alice.login("alice").await;
    bob.login("bob").await;

    alice.send("INVITE bob hi").await;
    bob.recv().await;
    alice.send("LOGOUT").await;
    // Make sure the logout has been processed before accepting.
    alice.send("LOGIN alice wrong").await;
    alice.recv().await;

    bob.send("INVITE_ACCEPT alice ok").await;
    assert_eq!(bob.recv().await, Event::InviteAcceptFailed { inviter: "alice".into() });
    assert!(!dir.state.users.read().await.are_friends("alice", "bob"));
}

#[tokio::test]
async fn dropped_connection_is_reported_as_terminate() {
    let dir = Directory::start().await;
    let (mut alice, bob) = befriend(&dir).await;

    drop(bob);
    assert_eq!(alice.recv().await, Event::Terminate { username: "bob".into() });
    assert!(!dir.state.sessions.read().await.is_online("bob"));
}

#[tokio::test]
async fn explicit_terminate_closes_and_notifies() {
    let dir = Directory::start().await;
    let (mut alice, mut bob) = befriend(&dir).await;

    bob.send("TERMINATE").await;
    assert_eq!(alice.recv().await, Event::Terminate { username: "bob".into() });
    bob.expect_closed().await;
}

#[tokio::test]
async fn session_commands_without_login_are_ignored() {
    let dir = Directory::start().await;
    let mut conn = dir.connect().await;

    conn.send("LOCATION 127.0.0.1 9000").await;
    conn.send("INVITE bob hi").await;
    conn.send("LOGOUT").await;
    conn.send("NONSENSE here").await;
    conn.expect_quiet().await;

    conn.login("carol").await;
}

#[tokio::test]
async fn status_reports_counts() {
    let dir = Directory::start().await;
    let (_alice, _bob) = befriend(&dir).await;

    let status = get_status(State(dir.state.clone())).await.0;
    assert_eq!(status["online_users"], 2);
    assert_eq!(status["registered_users"], 2);
    assert_eq!(status["lifecycle"], "running");
}

#[tokio::test]
async fn shutdown_persists_and_notifies_everyone() {
    let dir = Directory::start().await;
    let (mut alice, mut bob) = befriend(&dir).await;
    let mut idle = dir.connect().await;
    idle.send("LOGIN ghost nope").await;
    assert_eq!(idle.recv().await, Event::Login { username: "ghost".into(), status: Status::Failed });

    let state = dir.state.clone();
    let temp = dir.shutdown().await;

    for conn in [&mut alice, &mut bob, &mut idle] {
        assert_eq!(conn.recv().await, Event::Shutdown);
        conn.expect_closed().await;
    }

    let saved = std::fs::read_to_string(temp.path().join("users.txt")).unwrap();
    assert_eq!(saved, "alice|hash-alice|bob\nbob|hash-bob|alice\n");
    assert_eq!(state.lifecycle(), Lifecycle::Stopped);

    // Reloading the same file restores the friendship.
    let reloaded = Directory::start_in(temp).await;
    assert!(reloaded.state.users.read().await.are_friends("bob", "alice"));
}

#[tokio::test]
async fn invite_that_cannot_be_relayed_fails_back_to_the_inviter() {
    let dir = Directory::start().await;
    let mut alice = dir.connect().await;
    let mut bob = dir.connect().await;
    alice.login("alice").await;
    bob.login("bob").await;

    // A full request frame; the relayed INVITE_FROM would be longer.
    let too_long = "m".repeat(245);
    alice.send(&format!("INVITE bob {}", too_long)).await;
    assert_eq!(alice.recv().await, Event::InviteFailed { target: "bob".into() });
    bob.expect_quiet().await;

    let longest = "m".repeat(FRAME_LEN - "INVITE_FROM alice ".len());
    alice.send(&format!("INVITE bob {}", longest)).await;
    assert_eq!(
        bob.recv().await,
        Event::InviteFrom { from: "alice".into(), message: longest }
    );
    alice.expect_quiet().await;
}

#[tokio::test]
async fn accept_that_cannot_be_relayed_fails_without_friendship() {
    let dir = Directory::start().await;
    let mut al = dir.connect().await;
    let mut robert = dir.connect().await;
    al.login("al").await;
    robert.login("robert").await;

    al.send("INVITE robert hi").await;
    robert.recv().await;

    // Fits as INVITE_ACCEPT al ..., not as INVITE_ACCEPT robert ...
    robert.send(&format!("INVITE_ACCEPT al {}", "m".repeat(239))).await;
    assert_eq!(robert.recv().await, Event::InviteAcceptFailed { inviter: "al".into() });
    al.expect_quiet().await;
    assert!(!dir.state.users.read().await.are_friends("al", "robert"));

    let longest = "m".repeat(FRAME_LEN - "INVITE_ACCEPT robert ".len());
    robert.send(&format!("INVITE_ACCEPT al {}", longest)).await;
    assert_eq!(
        al.recv().await,
        Event::InviteAccept { from: "robert".into(), message: longest }
    );
    assert!(dir.state.users.read().await.are_friends("al", "robert"));
}

#[tokio::test]
async fn location_host_must_fit_the_relayed_frame() {
    let dir = Directory::start().await;
    let (mut alice, mut bob) = befriend(&dir).await;

    // "LOCATION <host> 7005" fills a frame; "LOCATION bob <host> 7005" would not.
    let too_long = "h".repeat(FRAME_LEN - "LOCATION  7005".len());
    bob.send(&format!("LOCATION {} 7005", too_long)).await;
    alice.expect_quiet().await;
    bob.expect_quiet().await;
    let kept = dir.state.sessions.read().await.session_for_user("bob").unwrap().address.clone();
    assert_eq!(kept.map(|a| a.port), Some(7002));

    let longest = "h".repeat(FRAME_LEN - "LOCATION bob  7005".len());
    bob.send(&format!("LOCATION {} 7005", longest)).await;
    assert_eq!(
        alice.recv().await,
        Event::Location { username: "bob".into(), host: longest, port: 7005 }
    );
    assert_eq!(bob.recv().await, location("alice", 7001));
}

#[tokio::test]
async fn hashes_that_would_break_the_user_file_are_refused() {
    let dir = Directory::start().await;
    let mut conn = dir.connect().await;

    conn.send("REGISTER mallory pa|ss").await;
    assert_eq!(
        conn.recv().await,
        Event::Register { username: "mallory".into(), status: Status::Failed }
    );
    conn.send("REGISTER mallory pass").await;
    assert_eq!(
        conn.recv().await,
        Event::Register { username: "mallory".into(), status: Status::Ok }
    );

    let temp = dir.shutdown().await;
    let saved = std::fs::read_to_string(temp.path().join("users.txt")).unwrap();
    assert_eq!(saved, "mallory|pass|\n");

    let reloaded = Directory::start_in(temp).await;
    let mut again = reloaded.connect().await;
    again.send("LOGIN mallory pass").await;
    assert_eq!(
        again.recv().await,
        Event::Login { username: "mallory".into(), status: Status::Ok }
    );
}
