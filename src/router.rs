//! Routing & broadcast (component K): one copy per target connection, with
//! duplicate suppression across overlapping channels via a per-dispatch
//! broadcast id stamped on `User::last_broadcast_stamp`.

use tracing::warn;

use irc_proto::message::Message;

use crate::context::{ConnState, Context};
use crate::ids::{ChannelId, ConnId, UserId};

/// Enqueue one line on a connection's outbox, silently dropping it if the
/// connection has already gone away (race between quit and a queued send).
/// Accounts the line against the connection's sendq (component D resource
/// limit); a connection that outruns its reader past the configured cap is
/// marked for kill with "SendQ exceeded" rather than let the outbox grow
/// without bound.
pub fn send_to_conn(ctx: &mut Context, conn_id: ConnId, msg: &Message) {
    let line = format!("{msg}\r\n");
    let cap = ctx.config.limits.sendq_bytes;
    let Some(entry) = ctx.conns.get_mut(&conn_id) else { return };
    if matches!(entry.state, ConnState::Quitting | ConnState::Dead) {
        return;
    }
    entry.sendq_bytes += line.len();
    if entry.sendq_bytes > cap {
        warn!(conn_id, sendq_bytes = entry.sendq_bytes, cap, "SendQ exceeded, killing connection");
        entry.quit_reason = Some("SendQ exceeded".to_string());
        entry.state = ConnState::Quitting;
        return;
    }
    let _ = entry.outbox.send(crate::net::ConnCommand::Send(line));
}

pub fn send_to_user(ctx: &mut Context, user_id: UserId, msg: &Message) {
    if let Some(conn_id) = ctx.conn_id_for_user(user_id) {
        send_to_conn(ctx, conn_id, msg);
    }
}

/// Send to every member of `channel_id`, each receiving exactly one copy
/// even if they are also reached via another overlapping broadcast in the
/// same dispatch. `skip` excludes the sender unless echo is wanted.
pub fn broadcast_to_channel(
    ctx: &mut Context,
    channel_id: ChannelId,
    msg: &Message,
    skip: Option<UserId>,
) {
    let stamp = ctx.next_broadcast_id();
    let Some(channel) = ctx.channels.get(&channel_id) else {
        return;
    };
    let members: Vec<UserId> = channel.members.keys().copied().collect();
    for member in members {
        if Some(member) == skip {
            continue;
        }
        if let Some(user) = ctx.users.get_mut(&member) {
            if user.last_broadcast_stamp == stamp {
                continue;
            }
            user.last_broadcast_stamp = stamp;
        } else {
            continue;
        }
        send_to_user(ctx, member, msg);
    }
}

/// Fan a single PRIVMSG/NOTICE out to the union of several channels'
/// memberships, sending each recipient exactly one copy (§4.K).
pub fn fanout_to_channels(
    ctx: &mut Context,
    channel_ids: &[ChannelId],
    msg: &Message,
    skip: Option<UserId>,
) {
    let stamp = ctx.next_broadcast_id();
    let mut recipients = Vec::new();
    for &channel_id in channel_ids {
        let Some(channel) = ctx.channels.get(&channel_id) else {
            continue;
        };
        recipients.extend(channel.members.keys().copied());
    }
    for member in recipients {
        if Some(member) == skip {
            continue;
        }
        if let Some(user) = ctx.users.get_mut(&member) {
            if user.last_broadcast_stamp == stamp {
                continue;
            }
            user.last_broadcast_stamp = stamp;
        } else {
            continue;
        }
        send_to_user(ctx, member, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::CommandRegistry;
    use crate::ids::ChannelId as _ChannelId;
    use crate::state::{Channel, MemberModes, NewUser, User};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn add_user(ctx: &mut Context, nick: &str) -> (UserId, mpsc::UnboundedReceiver<crate::net::ConnCommand>) {
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
            now: 0,
        });
        ctx.directory.insert_user(nick, &user.uid, uid);
        ctx.users.insert(uid, user);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = 100 + uid;
        ctx.conns.insert(
            conn_id,
            crate::context::ConnEntry {
                peer_addr: "127.0.0.1:1".parse().unwrap(),
                local_addr: "127.0.0.1:2".parse().unwrap(),
                state: crate::context::ConnState::Registered,
                outbox: tx,
                user_id: Some(uid),
                pending_nick: None,
                pending_ident: None,
                pending_realname: None,
                flood_meter: 0.0,
                last_flood_decay: 0,
                sendq_bytes: 0,
                last_activity: 0,
                ping_sent_at: None,
                registration_deadline: 0,
                quit_reason: None,
            },
        );
        (uid, rx)
    }

    fn test_ctx() -> Context {
        Context::new(Arc::new(Config::default()), CommandRegistry::new(), 0)
    }

    #[test]
    fn broadcast_reaches_all_members_once() {
        let mut ctx = test_ctx();
        let (alice, mut alice_rx) = add_user(&mut ctx, "alice");
        let (bob, mut bob_rx) = add_user(&mut ctx, "bob");

        let chan_id: _ChannelId = ctx.channel_ids.next();
        let mut channel = Channel::new("#chan", 0, 100);
        channel.members.insert(alice, MemberModes::default());
        channel.members.insert(bob, MemberModes::default());
        ctx.channels.insert(chan_id, channel);

        let msg = Message::new("PRIVMSG", vec!["#chan".into(), "hi".into()]);
        broadcast_to_channel(&mut ctx, chan_id, &msg, None);

        assert!(alice_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_ok());
    }

    #[test]
    fn broadcast_skips_sender_when_requested() {
        let mut ctx = test_ctx();
        let (alice, mut alice_rx) = add_user(&mut ctx, "alice");
        let chan_id = ctx.channel_ids.next();
        let mut channel = Channel::new("#chan", 0, 100);
        channel.members.insert(alice, MemberModes::default());
        ctx.channels.insert(chan_id, channel);

        let msg = Message::new("PRIVMSG", vec!["#chan".into(), "hi".into()]);
        broadcast_to_channel(&mut ctx, chan_id, &msg, Some(alice));
        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn fanout_sends_one_copy_to_member_of_two_overlapping_channels() {
        let mut ctx = test_ctx();
        let (alice, mut alice_rx) = add_user(&mut ctx, "alice");

        let c1 = ctx.channel_ids.next();
        let mut chan1 = Channel::new("#one", 0, 100);
        chan1.members.insert(alice, MemberModes::default());
        ctx.channels.insert(c1, chan1);

        let c2 = ctx.channel_ids.next();
        let mut chan2 = Channel::new("#two", 0, 100);
        chan2.members.insert(alice, MemberModes::default());
        ctx.channels.insert(c2, chan2);

        let msg = Message::new("PRIVMSG", vec!["#one,#two".into(), "hi".into()]);
        fanout_to_channels(&mut ctx, &[c1, c2], &msg, None);

        assert!(alice_rx.try_recv().is_ok());
        assert!(alice_rx.try_recv().is_err());
    }
}
