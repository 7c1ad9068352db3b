//! Direct client-to-client chat links.
//!
//! Every link, dialed or accepted, gets its own receive task. The first frame on a dialed
//! link is `USER <name>`, which labels everything that follows. End of stream tears the
//! link down and removes it from the table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parlor_proto::{read_frame, write_frame, PeerFrame};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::{ClientError, Notice};

pub type LinkId = u64;
pub type LinkWriter = Arc<Mutex<OwnedWriteHalf>>;
pub type SharedLinks = Arc<Mutex<LinkTable>>;
pub type NoticeSender = mpsc::UnboundedSender<Notice>;

pub struct Link {
    peer: Option<String>,
    writer: LinkWriter,
    cancel: Option<oneshot::Sender<()>>,
}

impl Link {
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Stop the receive task and close our side of the socket.
    pub async fn close(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// Active links, keyed by id. A link's peer name is unknown until its USER frame arrives.
#[derive(Default)]
pub struct LinkTable {
    next_id: LinkId,
    links: HashMap<LinkId, Link>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        peer: Option<String>,
        writer: LinkWriter,
        cancel: oneshot::Sender<()>,
    ) -> LinkId {
        self.next_id += 1;
        let id = self.next_id;
        self.links.insert(
            id,
            Link {
                peer,
                writer,
                cancel: Some(cancel),
            },
        );
        id
    }

    pub fn bind_peer(&mut self, id: LinkId, username: &str) {
        if let Some(link) = self.links.get_mut(&id) {
            link.peer = Some(username.to_string());
        }
    }

    pub fn writer_for(&self, peer: &str) -> Option<LinkWriter> {
        self.links
            .values()
            .find(|l| l.peer.as_deref() == Some(peer))
            .map(|l| l.writer.clone())
    }

    pub fn remove(&mut self, id: LinkId) -> Option<Link> {
        self.links.remove(&id)
    }

    pub fn remove_peer(&mut self, peer: &str) -> Vec<Link> {
        let ids: Vec<LinkId> = self
            .links
            .iter()
            .filter(|(_, l)| l.peer.as_deref() == Some(peer))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter_map(|id| self.links.remove(&id)).collect()
    }

    pub fn drain(&mut self) -> Vec<Link> {
        self.links.drain().map(|(_, l)| l).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Register a connected stream and start its receive task.
pub async fn spawn_link(
    stream: TcpStream,
    peer: Option<String>,
    links: &SharedLinks,
    notices: &NoticeSender,
) -> (LinkId, LinkWriter) {
    let (reader, writer) = stream.into_split();
    let writer: LinkWriter = Arc::new(Mutex::new(writer));
    let (cancel_tx, cancel_rx) = oneshot::channel();

    let id = links
        .lock()
        .await
        .insert(peer.clone(), writer.clone(), cancel_tx);
    tokio::spawn(run_link(
        id,
        reader,
        peer,
        cancel_rx,
        links.clone(),
        notices.clone(),
    ));
    (id, writer)
}

/// Dial a friend, announce ourselves and register the link.
pub async fn dial(
    host: &str,
    port: u16,
    dial_timeout: Duration,
    me: &str,
    peer: &str,
    links: &SharedLinks,
    notices: &NoticeSender,
) -> Result<LinkWriter, ClientError> {
    let mut stream = match tokio::time::timeout(dial_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ClientError::ConnectionFailed(e.to_string())),
        Err(_) => return Err(ClientError::Timeout),
    };
    let hello = PeerFrame::User {
        username: me.to_string(),
    };
    write_frame(&mut stream, &hello.to_string()).await?;
    info!("Opened chat link to {} at {}:{}", peer, host, port);

    let (_, writer) = spawn_link(stream, Some(peer.to_string()), links, notices).await;
    Ok(writer)
}

pub async fn send_frame(writer: &LinkWriter, frame: &PeerFrame) -> Result<(), ClientError> {
    let mut w = writer.lock().await;
    write_frame(&mut *w, &frame.to_string()).await?;
    Ok(())
}

async fn run_link(
    id: LinkId,
    mut reader: OwnedReadHalf,
    mut peer: Option<String>,
    mut cancel: oneshot::Receiver<()>,
    links: SharedLinks,
    notices: NoticeSender,
) {
    loop {
        tokio::select! {
            _ = &mut cancel => {
                debug!("Link {} cancelled", id);
                return;
            }
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(line)) => match line.parse::<PeerFrame>() {
                    Ok(PeerFrame::User { username }) => {
                        links.lock().await.bind_peer(id, &username);
                        peer = Some(username);
                    }
                    Ok(PeerFrame::Text(text)) => {
                        if text.is_empty() {
                            continue;
                        }
                        let from = peer.clone().unwrap_or_else(|| "unknown".to_string());
                        let _ = notices.send(Notice::Chat { from, text });
                    }
                    Err(e) => warn!("Bad frame on link {}: {}", id, e),
                },
                Ok(None) => {
                    info!("Link {} closed by peer", id);
                    break;
                }
                Err(e) => {
                    warn!("Read from link {} failed: {}", id, e);
                    break;
                }
            }
        }
    }

    let removed = links.lock().await.remove(id);
    if let Some(link) = removed {
        link.close().await;
        let _ = notices.send(Notice::PeerDisconnected { peer });
    }
}
