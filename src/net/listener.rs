//! Accept loop for one configured listener (DATA MODEL: Listener).

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::ids::IdGen;
use crate::net::CoreEvent;

/// Bind and run an accept loop until the process shuts down. Each accepted
/// socket spawns its own connection task (`net::connection::run`); this
/// function never returns a value the caller needs, since everything it
/// learns is reported back over `core_tx`.
pub async fn run(
    bind: std::net::SocketAddr,
    core_tx: mpsc::UnboundedSender<CoreEvent>,
    recvq_bytes: usize,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(%bind, "listening for client connections");

    let mut ids = IdGen::default();
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let local_addr = stream.local_addr().unwrap_or(bind);
                let conn_id = ids.next();
                let core_tx = core_tx.clone();
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(error = %e, "failed to set TCP_NODELAY");
                }
                tokio::spawn(crate::net::connection::run(
                    conn_id, stream, peer_addr, local_addr, core_tx, recvq_bytes,
                ));
            }
            Err(e) => {
                error!(error = %e, "accept failed");
            }
        }
    }
}
