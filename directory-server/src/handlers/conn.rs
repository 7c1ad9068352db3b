use std::net::SocketAddr;

use log::{error, info, warn};
use parlor_proto::{read_frame, write_frame, ProtocolError, Request};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::handlers::command::{handle_request, Flow};
use crate::state::{Departure, Lifecycle};
use crate::{ConnId, ConnSender, Outbound, SharedState};

/// A connection already listed in `state.connections`, waiting for its task.
pub struct Admitted {
    pub conn_id: ConnId,
    pub sender: ConnSender,
    queue: mpsc::UnboundedReceiver<Outbound>,
}

/// Give a freshly accepted connection its id and writer queue. Done in the accept loop so
/// the shutdown broadcast reaches every accepted connection.
pub async fn admit(state: &SharedState) -> Admitted {
    let conn_id: ConnId = uuid::Uuid::new_v4().to_string();
    let (sender, queue) = mpsc::unbounded_channel::<Outbound>();
    state
        .connections
        .write()
        .await
        .insert(conn_id.clone(), sender.clone());
    Admitted {
        conn_id,
        sender,
        queue,
    }
}

/// Serve one client connection until it exits, drops, or the server shuts down.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    admitted: Admitted,
    state: SharedState,
) {
    let Admitted {
        conn_id,
        sender: tx,
        queue: mut rx,
    } = admitted;
    info!("Connection {} established from {}", conn_id, peer);

    let (mut reader, mut writer) = stream.into_split();

    let writer_conn = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Frame(text) => match write_frame(&mut writer, &text).await {
                    Ok(()) => {}
                    Err(ProtocolError::Io(e)) => {
                        warn!("Write to {} failed: {}", writer_conn, e);
                        break;
                    }
                    Err(e) => warn!("Dropping unsendable frame for {}: {}", writer_conn, e),
                },
                Outbound::Close => break,
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut send_done = false;
    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => {
                match frame {
                    Ok(Some(line)) => match line.parse::<Request>() {
                        Ok(request) => match handle_request(request, &conn_id, &state, &tx).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Close) => break,
                            Err(e) => warn!("Error handling request on {}: {}", conn_id, e),
                        },
                        Err(e) => warn!("Failed to parse frame from {}: {}", conn_id, e),
                    },
                    Ok(None) => {
                        info!("Connection {} closed by client", conn_id);
                        break;
                    }
                    Err(e) => {
                        error!("Read from {} failed: {}", conn_id, e);
                        break;
                    }
                }
            }
            _ = &mut send_task => {
                send_done = true;
                break;
            }
        }
    }

    state.connections.write().await.remove(&conn_id);

    // Exit, terminate and a dropped socket all look the same to friends. During shutdown
    // everyone is getting SHUTDOWN anyway.
    let departure = if state.lifecycle() >= Lifecycle::ShuttingDown {
        None
    } else {
        Some(Departure::Terminate)
    };
    state.end_session(&conn_id, departure).await;

    if !send_done {
        let _ = tx.send(Outbound::Close);
        let _ = send_task.await;
    }

    state.connection_tracker.write().await.unregister(peer.ip());
    info!("Connection {} finished", conn_id);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use super::*;
    use crate::security::ConnectionTracker;
    use crate::state::{AppState, UserState};

    #[tokio::test]
    async fn admitted_connection_receives_shutdown_before_its_task_runs() {
        let tracker = Arc::new(RwLock::new(ConnectionTracker::new(0, 0)));
        let state: SharedState = Arc::new(AppState::new(UserState::new(), tracker));

        let mut admitted = admit(&state).await;
        assert_eq!(state.connections.read().await.len(), 1);

        state.connections.read().await.send_all_then_close("SHUTDOWN");
        assert_eq!(
            admitted.queue.try_recv().unwrap(),
            Outbound::Frame("SHUTDOWN".into())
        );
        assert_eq!(admitted.queue.try_recv().unwrap(), Outbound::Close);
    }
}
