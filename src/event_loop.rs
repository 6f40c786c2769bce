//! The core loop (component B): a single task that owns `Context` outright
//! and is the only place that ever takes `&mut Context`. It multiplexes
//! `CoreEvent`s from every connection task against a housekeeping tick that
//! drives pings, registration timeouts, flood decay and the quit queue.
//!
//! Nothing here runs on more than one OS thread; the ordering guarantees in
//! SPEC_FULL §5 (write-order preservation, enqueue-before-next-line,
//! hook-sees-consistent-state) fall out of that directly rather than needing
//! any locking.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::signal::unix::Signal;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use irc_proto::message::Message;

use crate::context::{ConnEntry, ConnState, Context};
use crate::dispatch::commands::send_command;
use crate::dispatch::dispatch_line;
use crate::ids::{ChannelId, ConnId};
use crate::modules::{Event, EventPayload, ModuleRegistry};
use crate::net::{ConnCommand, CoreEvent};
use crate::router::fanout_to_channels;
use crate::state::WhowasEntry;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// What the process should do once the loop returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Shutdown,
    Restart,
}

pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// The four signals `main` installs before handing control to the loop.
/// Kept here rather than polled from `main` itself, since only the core loop
/// task is allowed to touch `Context` (single-writer model).
pub struct Signals {
    pub sighup: Signal,
    pub sigusr1: Signal,
    pub sigterm: Signal,
    pub sigint: Signal,
}

/// Drive the core loop until `DIE`/`SIGTERM`/`SIGINT` or `RESTART` asks it to
/// stop. `config_path` is only consulted on rehash.
pub async fn run(
    ctx: &mut Context,
    core_rx: &mut mpsc::UnboundedReceiver<CoreEvent>,
    signals: &mut Signals,
    config_path: &Path,
) -> Outcome {
    let config_path = config_path.to_path_buf();
    let mut tick = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = signals.sighup.recv() => {
                info!("SIGHUP received, scheduling rehash");
                ctx.rehash_requested = true;
            }
            _ = signals.sigusr1.recv() => {
                reopen_logs();
            }
            _ = signals.sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                ctx.shutdown_requested = true;
            }
            _ = signals.sigint.recv() => {
                info!("SIGINT received, shutting down");
                ctx.shutdown_requested = true;
            }
            Some(event) = core_rx.recv() => {
                handle_core_event(ctx, event);
            }
            _ = tick.tick() => {
                housekeeping(ctx, unix_now());
                drain_quit_queue(ctx);
                drain_mode_overflow_queue(ctx);
                if ctx.rehash_requested {
                    rehash(ctx, &config_path).await;
                    ctx.rehash_requested = false;
                }
                if ctx.shutdown_requested {
                    break;
                }
            }
        }
    }

    shutdown_all(ctx, "Shutting down");
    drain_quit_queue(ctx);

    if ctx.restart_requested {
        Outcome::Restart
    } else {
        Outcome::Shutdown
    }
}

fn handle_core_event(ctx: &mut Context, event: CoreEvent) {
    match event {
        CoreEvent::Accepted { conn_id, peer_addr, local_addr, outbox } => {
            accept(ctx, conn_id, peer_addr, local_addr, outbox);
        }
        CoreEvent::Line { conn_id, line } => {
            on_line(ctx, conn_id, &line);
        }
        CoreEvent::Sent { conn_id, bytes } => {
            if let Some(entry) = ctx.conns.get_mut(&conn_id) {
                entry.sendq_bytes = entry.sendq_bytes.saturating_sub(bytes);
            }
        }
        CoreEvent::Closed { conn_id, reason } => {
            if let Some(entry) = ctx.conns.get_mut(&conn_id) {
                if entry.quit_reason.is_none() {
                    entry.quit_reason = Some(reason);
                }
                // The connection task has already exited; there is no
                // socket left to close on our side of the quit queue.
                entry.state = ConnState::Dead;
            }
        }
    }
}

fn accept(
    ctx: &mut Context,
    conn_id: ConnId,
    peer_addr: std::net::SocketAddr,
    local_addr: std::net::SocketAddr,
    outbox: mpsc::UnboundedSender<ConnCommand>,
) {
    if ctx.conns.len() >= ctx.config.limits.max_connections {
        warn!(conn_id, "rejecting connection: server full");
        let _ = outbox.send(ConnCommand::Send("ERROR :Server full\r\n".to_string()));
        let _ = outbox.send(ConnCommand::Close);
        return;
    }

    let now = unix_now();
    let deadline = now + ctx.config.server.registration_timeout_seconds as i64;
    ctx.conns.insert(
        conn_id,
        ConnEntry {
            peer_addr,
            local_addr,
            state: ConnState::Unregistered,
            outbox,
            user_id: None,
            pending_nick: None,
            pending_ident: None,
            pending_realname: None,
            flood_meter: 0.0,
            last_flood_decay: now,
            sendq_bytes: 0,
            last_activity: now,
            ping_sent_at: None,
            registration_deadline: deadline,
            quit_reason: None,
        },
    );
    info!(conn_id, %peer_addr, "connection accepted");
}

/// Flood control (component D `feed_line`): each line costs its own byte
/// length against a meter that decays linearly at
/// `flood_bytes_per_second`. A connection that outruns its decay is killed
/// rather than throttled — there is no per-connection task to backpressure.
fn on_line(ctx: &mut Context, conn_id: ConnId, line: &str) {
    let now = unix_now();
    let rate = ctx.config.limits.flood_bytes_per_second;

    let Some(entry) = ctx.conns.get_mut(&conn_id) else { return };
    if !matches!(entry.state, ConnState::Unregistered | ConnState::RegWaitNickUser | ConnState::Registered) {
        return;
    }

    let elapsed = (now - entry.last_flood_decay).max(0) as f64;
    entry.flood_meter = (entry.flood_meter - elapsed * rate).max(0.0);
    entry.last_flood_decay = now;
    entry.flood_meter += line.len() as f64;
    entry.last_activity = now;
    entry.ping_sent_at = None;

    if entry.flood_meter > rate * 10.0 {
        mark_quitting(ctx, conn_id, "Excess Flood");
        return;
    }

    dispatch_line(ctx, conn_id, line);
}

fn mark_quitting(ctx: &mut Context, conn_id: ConnId, reason: &str) {
    if let Some(entry) = ctx.conns.get_mut(&conn_id) {
        if entry.state != ConnState::Quitting && entry.state != ConnState::Dead {
            entry.quit_reason.get_or_insert_with(|| reason.to_string());
            entry.state = ConnState::Quitting;
        }
    }
}

/// Ping liveness and registration deadlines (component D). Flood decay is
/// handled inline per line in `on_line`; this pass only concerns timers that
/// elapse with no traffic at all.
fn housekeeping(ctx: &mut Context, now: i64) {
    let ping_interval = ctx.config.limits.ping_interval_seconds as i64;
    let ping_timeout = ctx.config.limits.ping_timeout_seconds as i64;
    let server_name = ctx.server_name.clone();

    let conn_ids: Vec<ConnId> = ctx.conns.keys().copied().collect();
    for conn_id in conn_ids {
        let Some(entry) = ctx.conns.get(&conn_id) else { continue };
        if matches!(entry.state, ConnState::Quitting | ConnState::Dead) {
            continue;
        }

        if entry.state != ConnState::Registered && now >= entry.registration_deadline {
            mark_quitting(ctx, conn_id, "Registration timeout");
            continue;
        }

        if let Some(sent_at) = entry.ping_sent_at {
            if now - sent_at > ping_timeout {
                mark_quitting(ctx, conn_id, "Ping timeout");
            }
        } else if now - entry.last_activity > ping_interval {
            send_command(ctx, conn_id, &server_name, "PING", vec![server_name.clone()]);
            if let Some(entry) = ctx.conns.get_mut(&conn_id) {
                entry.ping_sent_at = Some(now);
            }
        }
    }
}

/// Process every connection currently marked `Quitting`/`Dead`: announce
/// the quit to channel peers, tear down the user's membership and directory
/// entries, record a WHOWAS entry, close the socket if it is still open, and
/// drop the `ConnEntry` (§4.J step 5).
/// Re-dispatch `MODE` lines that spilled past `limits.max_mode_changes_per_line`
/// on a prior line. Taken out of `ctx` first since `dispatch_message` itself
/// needs `&mut Context` and may enqueue further overflow if the connection
/// is still over the cap.
fn drain_mode_overflow_queue(ctx: &mut Context) {
    let pending: Vec<(ConnId, Message)> = ctx.mode_overflow_queue.drain(..).collect();
    for (conn_id, msg) in pending {
        if ctx.conns.contains_key(&conn_id) {
            crate::dispatch::dispatch_message(ctx, conn_id, &msg);
        }
    }
}

fn drain_quit_queue(ctx: &mut Context) {
    let pending: Vec<(ConnId, bool)> = ctx
        .conns
        .iter()
        .filter(|(_, e)| matches!(e.state, ConnState::Quitting | ConnState::Dead))
        .map(|(id, e)| (*id, e.state == ConnState::Quitting))
        .collect();

    for (conn_id, close_socket) in pending {
        finalize_quit(ctx, conn_id, close_socket);
    }
}

fn finalize_quit(ctx: &mut Context, conn_id: ConnId, close_socket: bool) {
    let Some(entry) = ctx.conns.get(&conn_id) else { return };
    let reason = entry.quit_reason.clone().unwrap_or_else(|| "Connection closed".to_string());
    let user_id = entry.user_id;

    if let Some(uid) = user_id {
        let snapshot = ctx.users.get(&uid).map(|u| {
            (
                u.hostmask(),
                u.channels.iter().copied().collect::<Vec<ChannelId>>(),
                u.nick.clone(),
                u.uid.clone(),
                u.ident.clone(),
                u.displayed_host.clone(),
                u.realname.clone(),
                u.server_of_origin.clone(),
            )
        });
        if let Some((nuh, channel_ids, nick, uid_str, ident, displayed_host, realname, server_of_origin)) = snapshot {
            let quit_msg = Message::new("QUIT", vec![reason.clone()]).with_prefix(nuh);
            fanout_to_channels(ctx, &channel_ids, &quit_msg, Some(uid));
            for channel_id in &channel_ids {
                if let Some(channel) = ctx.channels.get_mut(channel_id) {
                    channel.members.remove(&uid);
                    channel.invited.remove(&uid);
                    if channel.is_empty_and_transient() {
                        let name = channel.name.clone();
                        ctx.channels.remove(channel_id);
                        ctx.directory.remove_channel(&name);
                    }
                }
            }
            ctx.push_whowas(WhowasEntry {
                nick: nick.clone(),
                ident,
                host: displayed_host,
                realname,
                server: server_of_origin,
                logout_time: unix_now(),
            });
            ctx.directory.remove_user(&nick, &uid_str);
            ctx.users.remove(&uid);
        }
        ModuleRegistry::fire(ctx, Event::Disconnect, EventPayload::Disconnect { user_id: uid, reason: reason.clone() });
    }

    if close_socket {
        if let Some(entry) = ctx.conns.get(&conn_id) {
            let _ = entry.outbox.send(ConnCommand::Send(format!("ERROR :Closing Link: {reason}\r\n")));
            let _ = entry.outbox.send(ConnCommand::Close);
        }
    }
    ctx.conns.remove(&conn_id);
    info!(conn_id, %reason, "connection closed");
}

/// Mark every still-live connection `Quitting` so the next `drain_quit_queue`
/// call tears everything down uniformly, used on the way out for `DIE`,
/// `RESTART` and the terminating signals.
fn shutdown_all(ctx: &mut Context, reason: &str) {
    let conn_ids: Vec<ConnId> = ctx.conns.keys().copied().collect();
    for conn_id in conn_ids {
        mark_quitting(ctx, conn_id, reason);
    }
}

/// `SIGUSR1` handler. This core has no file-backed log target of its own —
/// `tracing-subscriber` writes to stdout/stderr, which a supervisor already
/// rotates out from under the process — so there is nothing to reopen. Kept
/// as an explicit no-op rather than silently ignoring the signal, since a
/// future file-backed log target only needs to fill this in.
fn reopen_logs() {
    info!("SIGUSR1 received, nothing to reopen for stdout-backed logging");
}

async fn rehash(ctx: &mut Context, config_path: &PathBuf) {
    match crate::config::Config::load_from_file(config_path).await {
        Ok(new_config) => {
            info!("configuration reloaded");
            ctx.config = std::sync::Arc::new(new_config);
            ctx.server_name = ctx.config.server.name.clone();
        }
        Err(e) => {
            warn!(error = %e, "rehash failed, keeping previous configuration");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::CommandRegistry;
    use crate::ids::UserId;
    use crate::state::{Channel, MemberModes, NewUser, User};
    use std::sync::Arc;

    fn test_ctx() -> Context {
        Context::new(Arc::new(Config::default()), CommandRegistry::new(), 1_000)
    }

    fn add_conn(ctx: &mut Context, conn_id: ConnId, state: ConnState) -> mpsc::UnboundedReceiver<ConnCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        ctx.conns.insert(
            conn_id,
            ConnEntry {
                peer_addr: "127.0.0.1:1".parse().unwrap(),
                local_addr: "127.0.0.1:2".parse().unwrap(),
                state,
                outbox: tx,
                user_id: None,
                pending_nick: None,
                pending_ident: None,
                pending_realname: None,
                flood_meter: 0.0,
                last_flood_decay: 1_000,
                sendq_bytes: 0,
                last_activity: 1_000,
                ping_sent_at: None,
                registration_deadline: 1_060,
                quit_reason: None,
            },
        );
        rx
    }

    fn add_registered_user(ctx: &mut Context, conn_id: ConnId, nick: &str) -> UserId {
        let uid = ctx.user_ids.next();
        let user = User::new(NewUser {
            uid: format!("{uid:09}"),
            nick: nick.into(),
            ident: nick.into(),
            real_host: "h".into(),
            displayed_host: "h".into(),
            ip: "127.0.0.1".parse().unwrap(),
            realname: "r".into(),
            server_of_origin: "srv".into(),
            now: 1_000,
        });
        ctx.directory.insert_user(nick, &user.uid, uid);
        ctx.users.insert(uid, user);
        if let Some(entry) = ctx.conns.get_mut(&conn_id) {
            entry.user_id = Some(uid);
            entry.state = ConnState::Registered;
        }
        uid
    }

    #[test]
    fn registration_timeout_marks_connection_quitting() {
        let mut ctx = test_ctx();
        add_conn(&mut ctx, 1, ConnState::Unregistered);
        housekeeping(&mut ctx, 1_061);
        assert_eq!(ctx.conns.get(&1).unwrap().state, ConnState::Quitting);
    }

    #[test]
    fn idle_connection_gets_pinged_once() {
        let mut ctx = test_ctx();
        add_conn(&mut ctx, 1, ConnState::Registered);
        let interval = ctx.config.limits.ping_interval_seconds as i64;
        housekeeping(&mut ctx, 1_000 + interval + 1);
        assert!(ctx.conns.get(&1).unwrap().ping_sent_at.is_some());
    }

    #[test]
    fn unanswered_ping_past_timeout_marks_quitting() {
        let mut ctx = test_ctx();
        add_conn(&mut ctx, 1, ConnState::Registered);
        ctx.conns.get_mut(&1).unwrap().ping_sent_at = Some(1_000);
        let timeout = ctx.config.limits.ping_timeout_seconds as i64;
        housekeeping(&mut ctx, 1_000 + timeout + 1);
        assert_eq!(ctx.conns.get(&1).unwrap().state, ConnState::Quitting);
    }

    #[test]
    fn quit_drain_removes_user_and_announces_to_channel() {
        let mut ctx = test_ctx();
        let mut peer_rx = add_conn(&mut ctx, 1, ConnState::Unregistered);
        let alice = add_registered_user(&mut ctx, 1, "alice");
        let mut bob_rx = add_conn(&mut ctx, 2, ConnState::Unregistered);
        let bob = add_registered_user(&mut ctx, 2, "bob");

        let chan_id = ctx.channel_ids.next();
        let mut channel = Channel::new("#chan", 1_000, 100);
        channel.members.insert(alice, MemberModes::default());
        channel.members.insert(bob, MemberModes::default());
        ctx.channels.insert(chan_id, channel);
        ctx.users.get_mut(&alice).unwrap().channels.insert(chan_id);
        ctx.users.get_mut(&bob).unwrap().channels.insert(chan_id);

        mark_quitting(&mut ctx, 1, "bye");
        drain_quit_queue(&mut ctx);

        assert!(!ctx.users.contains_key(&alice));
        assert!(!ctx.conns.contains_key(&1));
        assert!(ctx.channels.get(&chan_id).unwrap().members.contains_key(&bob));
        assert!(bob_rx.try_recv().is_ok());
        let _ = peer_rx.try_recv();
    }

    #[test]
    fn quitting_sole_member_destroys_transient_channel() {
        let mut ctx = test_ctx();
        add_conn(&mut ctx, 1, ConnState::Unregistered);
        let alice = add_registered_user(&mut ctx, 1, "alice");
        let chan_id = ctx.channel_ids.next();
        let mut channel = Channel::new("#chan", 1_000, 100);
        channel.members.insert(alice, MemberModes::default());
        ctx.channels.insert(chan_id, channel);
        ctx.users.get_mut(&alice).unwrap().channels.insert(chan_id);

        mark_quitting(&mut ctx, 1, "bye");
        drain_quit_queue(&mut ctx);

        assert!(ctx.channels.get(&chan_id).is_none());
    }

    #[test]
    fn flood_meter_kills_connection_that_outruns_decay() {
        let mut ctx = test_ctx();
        ctx.config = Arc::new({
            let mut c = Config::default();
            c.limits.flood_bytes_per_second = 1.0;
            c
        });
        add_conn(&mut ctx, 1, ConnState::Unregistered);
        ctx.conns.get_mut(&1).unwrap().last_flood_decay = 1_000;
        on_line(&mut ctx, 1, &"a".repeat(200));
        assert_eq!(ctx.conns.get(&1).unwrap().state, ConnState::Quitting);
    }
}
