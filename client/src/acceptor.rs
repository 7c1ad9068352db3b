use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::link::{spawn_link, NoticeSender, SharedLinks};
use crate::ClientError;

/// Listens for friends dialing in. One per login.
pub struct Acceptor {
    port: u16,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Acceptor {
    /// Bind an ephemeral port on all interfaces and start accepting.
    pub async fn start(links: SharedLinks, notices: NoticeSender) -> Result<Self, ClientError> {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).await?;
        let port = listener.local_addr()?.port();
        info!("Accepting chat links on port {}", port);

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            info!("Chat link accepted from {}", addr);
                            spawn_link(stream, None, &links, &notices).await;
                        }
                        Err(e) => warn!("Accepting chat link failed: {}", e),
                    }
                }
            }
        });

        Ok(Self {
            port,
            cancel: Some(cancel_tx),
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting and release the port. Links already accepted are not touched.
    pub async fn stop(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let _ = self.task.await;
    }
}
