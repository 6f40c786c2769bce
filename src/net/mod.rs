//! Wire between per-connection I/O tasks and the single-threaded core loop.
//! Each connection is pumped by its own lightweight tokio task that only
//! frames bytes; all protocol state lives in `Context` and is touched only
//! from the core loop, preserving the single-writer model (SPEC_FULL §4.B).

pub mod connection;
pub mod framer;
pub mod listener;

use std::net::SocketAddr;

use crate::ids::ConnId;

/// Sent from a connection task into the core loop's event channel.
#[derive(Debug)]
pub enum CoreEvent {
    Accepted {
        conn_id: ConnId,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        outbox: tokio::sync::mpsc::UnboundedSender<ConnCommand>,
    },
    Line { conn_id: ConnId, line: String },
    /// A queued `ConnCommand::Send` was flushed to the socket; lets the core
    /// loop credit the bytes back against the connection's sendq accounting.
    Sent { conn_id: ConnId, bytes: usize },
    /// Peer closed or the connection task hit an unrecoverable I/O error.
    Closed { conn_id: ConnId, reason: String },
}

/// Sent from the core loop out to a connection task.
#[derive(Debug)]
pub enum ConnCommand {
    Send(String),
    Close,
}
