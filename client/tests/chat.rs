use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use parlor_client::{Client, ClientConfig, ClientError, Notice};
use parlor_directory::config::ServerConfig;
use parlor_directory::Server;
use parlor_proto::{ProtocolError, FRAME_LEN};
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

struct Directory {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl Directory {
    async fn start() -> Self {
        let dir = tempdir().unwrap();
        let mut config = ServerConfig::new(dir.path().join("users.txt"), 0);
        config.bind_addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let server = Server::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.run(async {
            stopped.await.ok();
        }));
        Self {
            addr,
            stop: Some(stop),
            _dir: dir,
        }
    }

    async fn client(&self) -> (Client, UnboundedReceiver<Notice>) {
        let config = ClientConfig::new("127.0.0.1", self.addr.port());
        Client::connect(config).await.unwrap()
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Wait for a notice matching `pred`, skipping others.
async fn wait_for<F>(rx: &mut UnboundedReceiver<Notice>, pred: F) -> Notice
where
    F: Fn(&Notice) -> bool,
{
    timeout(WAIT, async {
        loop {
            let notice = rx.recv().await.expect("notice channel closed");
            if pred(&notice) {
                return notice;
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}

async fn signed_in(dir: &Directory, name: &str) -> (Client, UnboundedReceiver<Notice>) {
    let (client, mut rx) = dir.client().await;
    client.register(name, "secret").await.unwrap();
    wait_for(&mut rx, |n| matches!(n, Notice::Registered { .. })).await;
    client.login(name, "secret").await.unwrap();
    wait_for(&mut rx, |n| matches!(n, Notice::LoggedIn { .. })).await;
    (client, rx)
}

async fn friends(
    dir: &Directory,
) -> (
    (Client, UnboundedReceiver<Notice>),
    (Client, UnboundedReceiver<Notice>),
) {
    let (alice, mut alice_rx) = signed_in(dir, "alice").await;
    let (bob, mut bob_rx) = signed_in(dir, "bob").await;

    alice.invite("bob", "hi").await.unwrap();
    wait_for(&mut bob_rx, |n| matches!(n, Notice::InviteReceived { from, .. } if from == "alice")).await;
    bob.accept("alice", "ok").await.unwrap();

    wait_for(&mut alice_rx, |n| matches!(n, Notice::FriendOnline { username, .. } if username == "bob")).await;
    wait_for(&mut bob_rx, |n| matches!(n, Notice::FriendOnline { username, .. } if username == "alice")).await;
    ((alice, alice_rx), (bob, bob_rx))
}

#[tokio::test]
async fn first_message_dials_and_labels_sender() {
    let dir = Directory::start().await;
    let ((alice, _alice_rx), (bob, mut bob_rx)) = friends(&dir).await;

    assert_eq!(alice.link_count().await, 0);
    alice.message("bob", "hello").await.unwrap();
    let chat = wait_for(&mut bob_rx, |n| matches!(n, Notice::Chat { .. })).await;
    assert_eq!(
        chat,
        Notice::Chat {
            from: "alice".into(),
            text: "hello".into()
        }
    );
    assert_eq!(chat.to_string(), "[alice]: hello");

    // The second message reuses the link.
    alice.message("bob", "again").await.unwrap();
    wait_for(&mut bob_rx, |n| matches!(n, Notice::Chat { text, .. } if text == "again")).await;
    assert_eq!(alice.link_count().await, 1);

    // Bob can answer over the link alice opened.
    assert_eq!(bob.link_count().await, 1);
    assert!(bob.friend("alice").await.is_some());
}

#[tokio::test]
async fn reply_over_accepted_link() {
    let dir = Directory::start().await;
    let ((alice, mut alice_rx), (bob, mut bob_rx)) = friends(&dir).await;

    alice.message("bob", "ping").await.unwrap();
    wait_for(&mut bob_rx, |n| matches!(n, Notice::Chat { .. })).await;
    bob.message("alice", "pong").await.unwrap();

    let chat = wait_for(&mut alice_rx, |n| matches!(n, Notice::Chat { .. })).await;
    assert_eq!(
        chat,
        Notice::Chat {
            from: "bob".into(),
            text: "pong".into()
        }
    );
    assert_eq!(bob.link_count().await, 1);
}

#[tokio::test]
async fn self_actions_are_rejected_locally() {
    let dir = Directory::start().await;
    let (alice, _rx) = signed_in(&dir, "alice").await;

    assert!(matches!(
        alice.message("alice", "hi").await,
        Err(ClientError::StateConflict(_))
    ));
    assert!(matches!(
        alice.invite("alice", "").await,
        Err(ClientError::StateConflict(_))
    ));
    assert!(matches!(
        alice.message("carol", "hi").await,
        Err(ClientError::NotFound(_))
    ));
    assert!(matches!(
        alice.accept("carol", "").await,
        Err(ClientError::StateConflict(_))
    ));
}

#[tokio::test]
async fn commands_need_the_right_phase() {
    let dir = Directory::start().await;
    let (client, mut rx) = dir.client().await;

    assert!(matches!(client.logout().await, Err(ClientError::InvalidState(_))));
    assert!(matches!(
        client.message("bob", "hi").await,
        Err(ClientError::InvalidState(_))
    ));
    assert!(matches!(
        client.invite("bob", "").await,
        Err(ClientError::InvalidState(_))
    ));

    client.login("ghost", "nope").await.unwrap();
    wait_for(&mut rx, |n| matches!(n, Notice::LoginFailed { .. })).await;
    assert!(!client.is_authenticated().await);

    client.register("dora", "pw").await.unwrap();
    wait_for(&mut rx, |n| matches!(n, Notice::Registered { .. })).await;
    client.login("dora", "pw").await.unwrap();
    wait_for(&mut rx, |n| matches!(n, Notice::LoggedIn { .. })).await;
    assert_eq!(client.username().await.as_deref(), Some("dora"));
    assert!(matches!(client.exit().await, Err(ClientError::InvalidState(_))));

    client.logout().await.unwrap();
    assert!(!client.is_authenticated().await);
    assert!(matches!(client.logout().await, Err(ClientError::InvalidState(_))));
}

#[tokio::test]
async fn duplicate_invites_are_rejected() {
    let dir = Directory::start().await;
    let (alice, _alice_rx) = signed_in(&dir, "alice").await;
    let (_bob, mut bob_rx) = signed_in(&dir, "bob").await;

    alice.invite("bob", "hi").await.unwrap();
    wait_for(&mut bob_rx, |n| matches!(n, Notice::InviteReceived { .. })).await;
    assert!(matches!(
        alice.invite("bob", "again").await,
        Err(ClientError::StateConflict(_))
    ));
}

#[tokio::test]
async fn logout_tears_down_links_and_informs_friends() {
    let dir = Directory::start().await;
    let ((alice, mut alice_rx), (bob, mut bob_rx)) = friends(&dir).await;

    alice.message("bob", "hello").await.unwrap();
    wait_for(&mut bob_rx, |n| matches!(n, Notice::Chat { .. })).await;

    bob.logout().await.unwrap();
    assert_eq!(bob.link_count().await, 0);
    assert!(bob.friend("alice").await.is_none());

    wait_for(&mut alice_rx, |n| {
        matches!(n, Notice::FriendLeft { username, graceful: true } if username == "bob")
    })
    .await;
    assert!(alice.friend("bob").await.is_none());
    assert!(matches!(
        alice.message("bob", "still there?").await,
        Err(ClientError::NotFound(_))
    ));
}

#[tokio::test]
async fn terminate_is_labelled_as_disconnect() {
    let dir = Directory::start().await;
    let ((_alice, mut alice_rx), (bob, _bob_rx)) = friends(&dir).await;

    bob.terminate().await;
    wait_for(&mut alice_rx, |n| {
        matches!(n, Notice::FriendLeft { username, graceful: false } if username == "bob")
    })
    .await;
}

#[tokio::test]
async fn server_shutdown_is_fatal() {
    let mut dir = Directory::start().await;
    let (alice, mut rx) = signed_in(&dir, "alice").await;
    let mut closed = alice.closed();

    dir.shutdown();
    wait_for(&mut rx, |n| matches!(n, Notice::ServerShutdown)).await;
    timeout(WAIT, closed.wait_for(|c| *c)).await.unwrap().unwrap();
    assert!(!alice.is_authenticated().await);
}

#[tokio::test]
async fn chat_text_is_limited_to_one_frame() {
    let dir = Directory::start().await;
    let ((alice, _alice_rx), (_bob, mut bob_rx)) = friends(&dir).await;

    let too_long = "x".repeat(FRAME_LEN + 1);
    assert!(matches!(
        alice.message("bob", &too_long).await,
        Err(ClientError::Protocol(ProtocolError::FrameTooLarge { .. }))
    ));
    // Rejected before dialing.
    assert_eq!(alice.link_count().await, 0);

    let longest = "x".repeat(FRAME_LEN);
    alice.message("bob", &longest).await.unwrap();
    let chat = wait_for(&mut bob_rx, |n| matches!(n, Notice::Chat { .. })).await;
    assert_eq!(
        chat,
        Notice::Chat {
            from: "alice".into(),
            text: longest
        }
    );
}

#[tokio::test]
async fn invite_message_must_fit_the_relay() {
    let dir = Directory::start().await;
    let (alice, _alice_rx) = signed_in(&dir, "alice").await;
    let (_bob, mut bob_rx) = signed_in(&dir, "bob").await;

    assert!(matches!(
        alice.invite("bob", &"m".repeat(245)).await,
        Err(ClientError::Usage(_))
    ));

    // Nothing was recorded, so a shorter invite still goes out.
    let longest = "m".repeat(FRAME_LEN - "INVITE_FROM alice ".len());
    alice.invite("bob", &longest).await.unwrap();
    let received = wait_for(&mut bob_rx, |n| matches!(n, Notice::InviteReceived { .. })).await;
    assert_eq!(
        received,
        Notice::InviteReceived {
            from: "alice".into(),
            message: longest
        }
    );
}
