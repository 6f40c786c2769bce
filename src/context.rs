//! Central aggregate replacing the original's scattered global state
//! (design note: a single owning struct, no locks, touched only from the
//! core event-loop task). Everything the dispatch, router and module layers
//! need hangs off one `Context`, built once in `main` and threaded through
//! by `&mut` for the life of the process.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::dispatch::CommandRegistry;
use crate::ids::{ChannelId, ConnId, IdGen, UserId};
use crate::modules::ModuleRegistry;
use crate::net::ConnCommand;
use crate::state::{Channel, Directory, User, WhowasEntry};
use irc_proto::message::Message;

pub const WHOWAS_CAP: usize = 1000;

/// Connection registration FSM (DATA MODEL: Connection), minus the optional
/// `CAP_NEGOTIATE` state — this daemon's minimum command set has no CAP
/// negotiation step, so registration only ever waits on NICK/USER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Unregistered,
    RegWaitNickUser,
    Registered,
    Quitting,
    Dead,
}

/// Per-connection bookkeeping that exists whether or not the connection has
/// completed registration into a `User`.
#[derive(Debug)]
pub struct ConnEntry {
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub state: ConnState,
    pub outbox: mpsc::UnboundedSender<ConnCommand>,
    pub user_id: Option<UserId>,

    pub pending_nick: Option<String>,
    pub pending_ident: Option<String>,
    pub pending_realname: Option<String>,

    /// Byte accumulator with linear decay (component D `feed_line`).
    pub flood_meter: f64,
    pub last_flood_decay: i64,

    pub sendq_bytes: usize,
    pub last_activity: i64,
    pub ping_sent_at: Option<i64>,
    pub registration_deadline: i64,
    pub quit_reason: Option<String>,
}

impl ConnEntry {
    pub fn is_registered(&self) -> bool {
        self.state == ConnState::Registered
    }
}

pub struct Context {
    pub config: Arc<Config>,
    pub server_name: String,
    pub start_time: i64,

    pub directory: Directory,
    pub users: HashMap<UserId, User>,
    pub channels: HashMap<ChannelId, Channel>,
    pub conns: HashMap<ConnId, ConnEntry>,

    pub user_ids: IdGen,
    pub channel_ids: IdGen,

    pub registry: CommandRegistry,
    pub modules: ModuleRegistry,

    /// Monotonic counter stamped onto `User::last_broadcast_stamp` to
    /// suppress duplicate delivery across overlapping channels (§4.K).
    pub broadcast_counter: u64,

    pub whowas: VecDeque<WhowasEntry>,

    /// `MODE` tokens past `limits.max_mode_changes_per_line` spill here as a
    /// synthesized follow-up line instead of being dropped, drained one tick
    /// later by the event loop so they go through `dispatch_message` again
    /// (and spill further if still over the cap).
    pub mode_overflow_queue: VecDeque<(ConnId, Message)>,

    /// Set by SIGHUP; the event loop rereads config at the next iteration
    /// boundary and clears this flag regardless of outcome.
    pub rehash_requested: bool,
    pub shutdown_requested: bool,
    /// Set by the `RESTART` command; distinct from `shutdown_requested`
    /// because the event loop re-execs the process image instead of simply
    /// draining and exiting (see `restart::close_listeners_not_stdio`).
    pub restart_requested: bool,
}

impl Context {
    pub fn new(config: Arc<Config>, registry: CommandRegistry, now: i64) -> Self {
        let server_name = config.server.name.clone();
        Self {
            config,
            server_name,
            start_time: now,
            directory: Directory::new(),
            users: HashMap::new(),
            channels: HashMap::new(),
            conns: HashMap::new(),
            user_ids: IdGen::default(),
            channel_ids: IdGen::default(),
            registry,
            modules: ModuleRegistry::new(),
            broadcast_counter: 0,
            whowas: VecDeque::new(),
            mode_overflow_queue: VecDeque::new(),
            rehash_requested: false,
            shutdown_requested: false,
            restart_requested: false,
        }
    }

    /// Allocate the next broadcast id for one routing dispatch (§4.K).
    pub fn next_broadcast_id(&mut self) -> u64 {
        self.broadcast_counter += 1;
        self.broadcast_counter
    }

    pub fn push_whowas(&mut self, entry: WhowasEntry) {
        if self.whowas.len() >= WHOWAS_CAP {
            self.whowas.pop_front();
        }
        self.whowas.push_back(entry);
    }

    pub fn user_id_for_conn(&self, conn_id: ConnId) -> Option<UserId> {
        self.conns.get(&conn_id).and_then(|c| c.user_id)
    }

    pub fn conn_id_for_user(&self, user_id: UserId) -> Option<ConnId> {
        self.conns
            .iter()
            .find(|(_, entry)| entry.user_id == Some(user_id))
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_ids_increase_monotonically() {
        let mut ctx = Context::new(Arc::new(Config::default()), CommandRegistry::new(), 0);
        let a = ctx.next_broadcast_id();
        let b = ctx.next_broadcast_id();
        assert!(b > a);
    }

    #[test]
    fn whowas_ring_evicts_oldest_past_cap() {
        let mut ctx = Context::new(Arc::new(Config::default()), CommandRegistry::new(), 0);
        for i in 0..WHOWAS_CAP + 10 {
            ctx.push_whowas(WhowasEntry {
                nick: format!("nick{i}"),
                ident: "u".into(),
                host: "h".into(),
                realname: "r".into(),
                server: "s".into(),
                logout_time: 0,
            });
        }
        assert_eq!(ctx.whowas.len(), WHOWAS_CAP);
        assert_eq!(ctx.whowas.front().unwrap().nick, "nick10");
    }
}
