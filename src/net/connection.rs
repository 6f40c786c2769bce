//! Per-connection I/O task. Deliberately dumb: it only reads bytes, frames
//! lines, and writes bytes back out. All protocol state lives in the core
//! loop's `Context`; this task never touches it (SPEC_FULL §4.B).

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::ids::ConnId;
use crate::net::framer::LineFramer;
use crate::net::{ConnCommand, CoreEvent};

const READ_CHUNK: usize = 4096;

#[instrument(skip(stream, core_tx), fields(conn_id, %peer_addr))]
pub async fn run(
    conn_id: ConnId,
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    core_tx: mpsc::UnboundedSender<CoreEvent>,
    recvq_bytes: usize,
) {
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ConnCommand>();

    if core_tx
        .send(CoreEvent::Accepted {
            conn_id,
            peer_addr,
            local_addr,
            outbox: outbox_tx,
        })
        .is_err()
    {
        return; // core already shut down
    }

    let mut framer = LineFramer::new(recvq_bytes);
    let mut buf = vec![0u8; READ_CHUNK];

    let reason = loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) => break "EOF".to_string(),
                    Ok(n) => {
                        if let Err(e) = framer.feed(&buf[..n]) {
                            break e.to_string();
                        }
                        while let Some(line) = framer.next_line() {
                            if core_tx.send(CoreEvent::Line { conn_id, line }).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => break format!("read error: {e}"),
                }
            }
            cmd = outbox_rx.recv() => {
                match cmd {
                    Some(ConnCommand::Send(line)) => {
                        if let Err(e) = stream.write_all(line.as_bytes()).await {
                            warn!(error = %e, "write failed");
                            break "write error".to_string();
                        }
                        let _ = core_tx.send(CoreEvent::Sent { conn_id, bytes: line.len() });
                    }
                    Some(ConnCommand::Close) | None => break "closed by core".to_string(),
                }
            }
        }
    };

    debug!(%reason, "connection task exiting");
    let _ = stream.shutdown().await;
    let _ = core_tx.send(CoreEvent::Closed { conn_id, reason });
}
