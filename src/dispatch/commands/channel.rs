//! JOIN, PART, channel MODE, TOPIC, NAMES, LIST, INVITE, KICK (§4.E).

use irc_proto::message::Message;
use irc_proto::mode::{ModeScope, ParamRule};
use irc_proto::response;
use irc_proto::match_mask_nuh;

use crate::context::Context;
use crate::dispatch::commands::{require_user, send_command, send_numeric};
use crate::dispatch::{reply_error, CommandRegistry, CommandSpec};
use crate::error::HandlerError;
use crate::ids::{ChannelId, ConnId, UserId};
use crate::modes;
use crate::router::broadcast_to_channel;
use crate::state::{Channel, ListEntry, MemberModes, Topic};

use super::cmd;

pub fn register(registry: &mut CommandRegistry) {
    cmd!(registry, "JOIN", 1, false, true, join);
    cmd!(registry, "PART", 1, false, true, part);
    cmd!(registry, "MODE", 1, false, true, mode);
    cmd!(registry, "TOPIC", 1, false, true, topic);
    cmd!(registry, "NAMES", 0, false, true, names);
    cmd!(registry, "LIST", 0, false, true, list);
    cmd!(registry, "INVITE", 2, false, true, invite);
    cmd!(registry, "KICK", 2, false, true, kick);
}

fn user_nuh(ctx: &Context, uid: UserId) -> String {
    ctx.users.get(&uid).map(|u| u.hostmask()).unwrap_or_default()
}

fn join(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    let chan_names: Vec<String> = msg.params[0].split(',').map(str::to_string).collect();
    let keys: Vec<String> = msg
        .param(1)
        .map(|k| k.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    for (i, name) in chan_names.into_iter().enumerate() {
        let key = keys.get(i).cloned();
        if let Err(err) = join_one(ctx, conn_id, uid, &name, key) {
            reply_error(ctx, conn_id, &err);
        }
    }
    Ok(())
}

fn join_one(
    ctx: &mut Context,
    conn_id: ConnId,
    uid: UserId,
    name: &str,
    key: Option<String>,
) -> Result<(), HandlerError> {
    if !name.starts_with(ctx.config.channel.prefixes.chars().next().unwrap_or('#')) {
        return Err(HandlerError::NoSuchChannel(name.to_string()));
    }

    let channel_id = ctx.directory.channel_by_name(name);
    let list_cap = ctx.config.limits.ban_list_cap;
    let nuh = user_nuh(ctx, uid);

    let (channel_id, founding) = match channel_id {
        Some(id) => (id, false),
        None => {
            let id = ctx.channel_ids.next();
            let channel = Channel::new(name, ctx.start_time, list_cap);
            ctx.directory.insert_channel(name, id);
            ctx.channels.insert(id, channel);
            (id, true)
        }
    };

    if !founding {
        let channel = ctx.channels.get(&channel_id).expect("just looked up");
        if channel.members.contains_key(&uid) {
            return Ok(()); // idempotent JOIN
        }
        if let Some(ref want) = channel.modes.key {
            if key.as_deref() != Some(want.as_str()) {
                return Err(HandlerError::BadChannelKey(name.to_string()));
            }
        }
        if let Some(limit) = channel.modes.limit {
            if channel.members.len() >= limit {
                return Err(HandlerError::ChannelIsFull(name.to_string()));
            }
        }
        if channel.modes.invite_only && !channel.invited.contains(&uid) {
            return Err(HandlerError::InviteOnlyChannel(name.to_string()));
        }
        let banned = channel.bans.iter().any(|b| match_mask_nuh(&nuh, &b.mask))
            && !channel.excepts.iter().any(|e| match_mask_nuh(&nuh, &e.mask));
        if banned {
            return Err(HandlerError::BannedFromChannel(name.to_string()));
        }
    }

    let channel = ctx.channels.get_mut(&channel_id).expect("present");
    channel.invited.remove(&uid);
    let mut flags = MemberModes::default();
    if founding {
        flags.owner = true;
    }
    channel.members.insert(uid, flags);
    if let Some(user) = ctx.users.get_mut(&uid) {
        user.channels.insert(channel_id);
    }

    let join_msg = Message::new("JOIN", vec![name.to_string()]).with_prefix(nuh);
    broadcast_to_channel(ctx, channel_id, &join_msg, None);

    send_join_burst(ctx, conn_id, channel_id, name);
    Ok(())
}

fn send_join_burst(ctx: &mut Context, conn_id: ConnId, channel_id: ChannelId, name: &str) {
    if let Some(topic) = ctx.channels.get(&channel_id).and_then(|c| c.topic.clone()) {
        send_numeric(ctx, conn_id, response::RPL_TOPIC, &[name], &topic.text);
        send_numeric(
            ctx,
            conn_id,
            response::RPL_TOPICWHOTIME,
            &[name, &topic.set_by, &topic.set_at.to_string()],
            "",
        );
    } else {
        send_numeric(ctx, conn_id, response::RPL_NOTOPIC, &[name], "No topic is set");
    }
    send_names(ctx, conn_id, channel_id, name);
}

fn send_names(ctx: &mut Context, conn_id: ConnId, channel_id: ChannelId, name: &str) {
    let Some(channel) = ctx.channels.get(&channel_id) else { return };
    let mut names = Vec::new();
    for (&member, flags) in &channel.members {
        if let Some(user) = ctx.users.get(&member) {
            let prefix = flags.prefix_char().map(String::from).unwrap_or_default();
            names.push(format!("{prefix}{}", user.nick));
        }
    }
    names.sort();
    send_numeric(ctx, conn_id, response::RPL_NAMREPLY, &["=", name], &names.join(" "));
    send_numeric(ctx, conn_id, response::RPL_ENDOFNAMES, &[name], "End of NAMES list");
}

fn part(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    let reason = msg.param(1).unwrap_or("Leaving").to_string();
    for name in msg.params[0].split(',') {
        if let Err(err) = part_one(ctx, uid, name, &reason) {
            reply_error(ctx, conn_id, &err);
        }
    }
    Ok(())
}

fn part_one(ctx: &mut Context, uid: UserId, name: &str, reason: &str) -> Result<(), HandlerError> {
    let channel_id = ctx.directory.channel_by_name(name).ok_or(HandlerError::NoSuchChannel(name.to_string()))?;
    let channel = ctx.channels.get(&channel_id).ok_or(HandlerError::NoSuchChannel(name.to_string()))?;
    if !channel.members.contains_key(&uid) {
        return Err(HandlerError::NotOnChannel(name.to_string()));
    }
    let nuh = user_nuh(ctx, uid);
    leave_channel(ctx, uid, channel_id, &nuh, "PART", vec![name.to_string(), reason.to_string()]);
    Ok(())
}

/// Shared removal path for PART/KICK: broadcast (sourced from `actor_nuh`,
/// which is the kicker for KICK and the leaving user themself for PART),
/// remove `target`'s membership, destroy the channel if it became empty and
/// non-persistent.
fn leave_channel(
    ctx: &mut Context,
    target: UserId,
    channel_id: ChannelId,
    actor_nuh: &str,
    command: &str,
    params: Vec<String>,
) {
    let leave_msg = Message::new(command, params).with_prefix(actor_nuh.to_string());
    broadcast_to_channel(ctx, channel_id, &leave_msg, None);
    if let Some(channel) = ctx.channels.get_mut(&channel_id) {
        channel.members.remove(&target);
    }
    if let Some(user) = ctx.users.get_mut(&target) {
        user.channels.remove(&channel_id);
    }
    let name = ctx.channels.get(&channel_id).map(|c| c.name.clone());
    let destroy = ctx.channels.get(&channel_id).map(|c| c.is_empty_and_transient()).unwrap_or(false);
    if destroy {
        if let Some(name) = name {
            ctx.directory.remove_channel(&name);
        }
        ctx.channels.remove(&channel_id);
    }
}

fn names(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    if let Some(name) = msg.param(0) {
        if let Some(channel_id) = ctx.directory.channel_by_name(name) {
            send_names(ctx, conn_id, channel_id, name);
        }
    }
    Ok(())
}

fn list(ctx: &mut Context, conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    send_numeric(ctx, conn_id, response::RPL_LISTSTART, &[], "Channel :Users  Name");
    let mut entries: Vec<(String, usize, String)> = ctx
        .channels
        .values()
        .filter(|c| !c.modes.secret)
        .map(|c| {
            (
                c.name.clone(),
                c.members.len(),
                c.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default(),
            )
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, count, topic) in entries {
        send_numeric(ctx, conn_id, response::RPL_LIST, &[&name, &count.to_string()], &topic);
    }
    send_numeric(ctx, conn_id, response::RPL_LISTEND, &[], "End of LIST");
    Ok(())
}

fn topic(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    let name = &msg.params[0];
    let channel_id = ctx
        .directory
        .channel_by_name(name)
        .ok_or_else(|| HandlerError::NoSuchChannel(name.clone()))?;
    let channel = ctx
        .channels
        .get(&channel_id)
        .ok_or_else(|| HandlerError::NoSuchChannel(name.clone()))?;
    let member = channel.member(uid).copied().ok_or_else(|| HandlerError::NotOnChannel(name.clone()))?;

    match msg.param(1) {
        None => {
            if let Some(topic) = ctx.channels.get(&channel_id).and_then(|c| c.topic.clone()) {
                send_numeric(ctx, conn_id, response::RPL_TOPIC, &[name], &topic.text);
            } else {
                send_numeric(ctx, conn_id, response::RPL_NOTOPIC, &[name], "No topic is set");
            }
            Ok(())
        }
        Some(text) => {
            let needs_halfop = ctx.channels.get(&channel_id).map(|c| c.modes.topic_ops_only).unwrap_or(false);
            if needs_halfop && !member.has_halfop_or_higher() {
                return Err(HandlerError::ChanOpPrivsNeeded(name.clone()));
            }
            let nuh = user_nuh(ctx, uid);
            let set_by = ctx.users.get(&uid).map(|u| u.nick.clone()).unwrap_or_default();
            let now = ctx.start_time;
            if let Some(channel) = ctx.channels.get_mut(&channel_id) {
                channel.topic = Some(Topic { text: text.to_string(), set_by, set_at: now });
            }
            let announce = Message::new("TOPIC", vec![name.clone(), text.to_string()]).with_prefix(nuh);
            broadcast_to_channel(ctx, channel_id, &announce, None);
            Ok(())
        }
    }
}

fn invite(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    let target_nick = &msg.params[0];
    let chan_name = &msg.params[1];

    let channel_id = ctx
        .directory
        .channel_by_name(chan_name)
        .ok_or_else(|| HandlerError::NoSuchChannel(chan_name.clone()))?;
    let target_uid = ctx
        .directory
        .user_by_nick(target_nick)
        .ok_or_else(|| HandlerError::NoSuchNick(target_nick.clone()))?;

    let channel = ctx.channels.get(&channel_id).ok_or_else(|| HandlerError::NoSuchChannel(chan_name.clone()))?;
    if !channel.members.contains_key(&uid) {
        return Err(HandlerError::NotOnChannel(chan_name.clone()));
    }
    if channel.members.contains_key(&target_uid) {
        return Err(HandlerError::UserOnChannel { nick: target_nick.clone(), channel: chan_name.clone() });
    }

    ctx.channels.get_mut(&channel_id).unwrap().invited.insert(target_uid);
    send_numeric(ctx, conn_id, response::RPL_INVITING, &[target_nick, chan_name], "");

    let inviter_nick = ctx.users.get(&uid).map(|u| u.nick.clone()).unwrap_or_default();
    if let Some(target_conn) = ctx.conn_id_for_user(target_uid) {
        send_command(ctx, target_conn, &inviter_nick, "INVITE", vec![target_nick.clone(), chan_name.clone()]);
    }
    Ok(())
}

fn kick(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    let chan_name = &msg.params[0];
    let kicker_nick = ctx.users.get(&uid).map(|u| u.nick.clone()).unwrap_or_default();
    let reason = msg.param(2).unwrap_or(&kicker_nick).to_string();

    let channel_id = ctx
        .directory
        .channel_by_name(chan_name)
        .ok_or_else(|| HandlerError::NoSuchChannel(chan_name.clone()))?;
    let channel = ctx.channels.get(&channel_id).ok_or_else(|| HandlerError::NoSuchChannel(chan_name.clone()))?;
    let kicker = channel.member(uid).copied().ok_or_else(|| HandlerError::NotOnChannel(chan_name.clone()))?;
    if !kicker.has_halfop_or_higher() {
        return Err(HandlerError::ChanOpPrivsNeeded(chan_name.clone()));
    }
    let kicker_nuh = user_nuh(ctx, uid);

    for target_nick in msg.params[1].split(',') {
        let Some(target_uid) = ctx.directory.user_by_nick(target_nick) else {
            reply_error(ctx, conn_id, &HandlerError::NoSuchNick(target_nick.to_string()));
            continue;
        };
        let on_channel = ctx.channels.get(&channel_id).map(|c| c.members.contains_key(&target_uid)).unwrap_or(false);
        if !on_channel {
            reply_error(
                ctx,
                conn_id,
                &HandlerError::UserNotInChannel { nick: target_nick.to_string(), channel: chan_name.clone() },
            );
            continue;
        }
        leave_channel(
            ctx,
            target_uid,
            channel_id,
            &kicker_nuh,
            "KICK",
            vec![chan_name.clone(), target_nick.to_string(), reason.clone()],
        );
    }
    Ok(())
}

fn mode(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let target = &msg.params[0];
    if !target.starts_with(ctx.config.channel.prefixes.chars().next().unwrap_or('#')) {
        return super::admin::user_mode(ctx, conn_id, msg);
    }
    channel_mode(ctx, conn_id, msg)
}

fn channel_mode(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    let name = msg.params[0].clone();
    let channel_id = ctx
        .directory
        .channel_by_name(&name)
        .ok_or_else(|| HandlerError::NoSuchChannel(name.clone()))?;

    let Some(modestr) = msg.param(1) else {
        let modes_str = ctx.channels.get(&channel_id).map(|c| c.modes.as_mode_string()).unwrap_or_default();
        send_numeric(ctx, conn_id, response::RPL_CHANNELMODEIS, &[&name], &modes_str);
        return Ok(());
    };

    let acting = ctx
        .channels
        .get(&channel_id)
        .and_then(|c| c.member(uid).copied())
        .ok_or_else(|| HandlerError::NotOnChannel(name.clone()))?;

    let tokens = irc_proto::mode::tokenize(modestr);
    let max = ctx.config.limits.max_mode_changes_per_line;
    let mut extra_params = msg.params.iter().skip(2).cloned();
    let mut applied_letters = String::new();
    let mut applied_params: Vec<String> = Vec::new();
    let mut overflow_letters = String::new();
    let mut overflow_params: Vec<String> = Vec::new();

    for (index, token) in tokens.into_iter().enumerate() {
        let Some(rule) = modes::param_rule(ModeScope::Channel, token.letter) else {
            if index < max {
                reply_error(ctx, conn_id, &HandlerError::UnknownMode(token.letter));
            }
            continue;
        };
        let needs_param = matches!(
            (rule, token.add),
            (ParamRule::Always, _) | (ParamRule::OnSet, true) | (ParamRule::List, _)
        );
        // Params are positional in the original line, so they must be
        // consumed in token order even for tokens past `max` that spill
        // to a follow-up line.
        let param = if needs_param { extra_params.next() } else { None };

        if index >= max {
            overflow_letters.push(if token.add { '+' } else { '-' });
            overflow_letters.push(token.letter);
            if let Some(p) = &param {
                overflow_params.push(p.clone());
            }
            continue;
        }

        // A bare list-mode token (no mask given) is a query, not a change,
        // and doesn't require channel privileges to view.
        if matches!(rule, ParamRule::List) && param.is_none() {
            send_list_mode(ctx, conn_id, &name, channel_id, token.letter);
            continue;
        }

        if !acting.has_halfop_or_higher() {
            reply_error(ctx, conn_id, &HandlerError::ChanOpPrivsNeeded(name.clone()));
            continue;
        }

        match apply_channel_mode(ctx, channel_id, uid, token.letter, token.add, param.as_deref()) {
            ModeOutcome::Applied => {
                applied_letters.push(if token.add { '+' } else { '-' });
                applied_letters.push(token.letter);
                if let Some(p) = param {
                    applied_params.push(p);
                }
            }
            ModeOutcome::NoChange => {}
            ModeOutcome::Full => {
                reply_error(ctx, conn_id, &HandlerError::BanListFull(name.clone()));
            }
        }
    }

    if !overflow_letters.is_empty() {
        let mut params = vec![name.clone(), overflow_letters];
        params.extend(overflow_params);
        let follow_up = Message::new("MODE", params);
        ctx.mode_overflow_queue.push_back((conn_id, follow_up));
    }

    if applied_letters.is_empty() {
        return Ok(());
    }
    let nuh = user_nuh(ctx, uid);
    let mut params = vec![name.clone(), applied_letters];
    params.extend(applied_params);
    let announce = Message::new("MODE", params).with_prefix(nuh);
    broadcast_to_channel(ctx, channel_id, &announce, None);
    Ok(())
}

/// Apply one resolved mode token, returning whether anything actually
/// changed (idempotent re-application of an already-set mode is a no-op
/// per the MODE law).
fn send_list_mode(ctx: &mut Context, conn_id: ConnId, name: &str, channel_id: ChannelId, letter: char) {
    let Some(channel) = ctx.channels.get(&channel_id) else { return };
    let (list, item_code, end_code, end_text) = match letter {
        'b' => (channel.bans.clone(), response::RPL_BANLIST, response::RPL_ENDOFBANLIST, "End of channel ban list"),
        'e' => (channel.excepts.clone(), response::RPL_BANLIST, response::RPL_ENDOFBANLIST, "End of channel exception list"),
        'I' => (channel.invex.clone(), response::RPL_BANLIST, response::RPL_ENDOFBANLIST, "End of channel invite list"),
        _ => return,
    };
    for entry in &list {
        send_numeric(
            ctx,
            conn_id,
            item_code,
            &[name, &entry.mask, &entry.set_by],
            &entry.set_at.to_string(),
        );
    }
    send_numeric(ctx, conn_id, end_code, &[name], end_text);
}

/// Outcome of applying one resolved mode token. `Full` only ever comes back
/// from a list-mode add (`+b`/`+e`/`+I`) against a list already at its cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeOutcome {
    Applied,
    NoChange,
    Full,
}

impl From<bool> for ModeOutcome {
    fn from(applied: bool) -> Self {
        if applied {
            ModeOutcome::Applied
        } else {
            ModeOutcome::NoChange
        }
    }
}

fn apply_channel_mode(
    ctx: &mut Context,
    channel_id: ChannelId,
    acting: UserId,
    letter: char,
    add: bool,
    param: Option<&str>,
) -> ModeOutcome {
    if modes::is_status_letter(letter) {
        let Some(param) = param else { return ModeOutcome::NoChange };
        let Some(target) = ctx.directory.user_by_nick(param) else { return ModeOutcome::NoChange };
        let Some(channel) = ctx.channels.get_mut(&channel_id) else { return ModeOutcome::NoChange };
        let Some(flags) = channel.members.get_mut(&target) else { return ModeOutcome::NoChange };
        return set_status_flag(flags, letter, add).into();
    }

    let Some(channel) = ctx.channels.get_mut(&channel_id) else { return ModeOutcome::NoChange };
    let m = &mut channel.modes;
    match letter {
        'i' => set_bool(&mut m.invite_only, add).into(),
        'm' => set_bool(&mut m.moderated, add).into(),
        'n' => set_bool(&mut m.no_external_messages, add).into(),
        't' => set_bool(&mut m.topic_ops_only, add).into(),
        's' => set_bool(&mut m.secret, add).into(),
        'P' => set_bool(&mut m.permanent, add).into(),
        'k' => {
            if add {
                let Some(key) = param else { return ModeOutcome::NoChange };
                if m.key.as_deref() == Some(key) {
                    return ModeOutcome::NoChange;
                }
                m.key = Some(key.to_string());
                ModeOutcome::Applied
            } else {
                if m.key.is_none() {
                    return ModeOutcome::NoChange;
                }
                m.key = None;
                ModeOutcome::Applied
            }
        }
        'l' => {
            if add {
                let Some(limit) = param.and_then(|p| p.parse::<usize>().ok()) else {
                    return ModeOutcome::NoChange;
                };
                if m.limit == Some(limit) {
                    return ModeOutcome::NoChange;
                }
                m.limit = Some(limit);
                ModeOutcome::Applied
            } else {
                if m.limit.is_none() {
                    return ModeOutcome::NoChange;
                }
                m.limit = None;
                ModeOutcome::Applied
            }
        }
        'b' | 'e' | 'I' => apply_list_mode(channel, letter, add, param, acting),
        _ => ModeOutcome::NoChange,
    }
}

fn set_bool(field: &mut bool, add: bool) -> bool {
    if *field == add {
        return false;
    }
    *field = add;
    true
}

fn set_status_flag(flags: &mut MemberModes, letter: char, add: bool) -> bool {
    let field = match letter {
        'q' => &mut flags.owner,
        'a' => &mut flags.admin,
        'o' => &mut flags.op,
        'h' => &mut flags.halfop,
        'v' => &mut flags.voice,
        _ => return false,
    };
    set_bool(field, add)
}

fn apply_list_mode(channel: &mut Channel, letter: char, add: bool, param: Option<&str>, acting: UserId) -> ModeOutcome {
    let Some(mask) = param else { return ModeOutcome::NoChange };
    let list = match letter {
        'b' => &mut channel.bans,
        'e' => &mut channel.excepts,
        'I' => &mut channel.invex,
        _ => return ModeOutcome::NoChange,
    };
    if add {
        if list.iter().any(|e| e.mask == mask) {
            return ModeOutcome::NoChange;
        }
        if list.len() >= channel.list_cap {
            return ModeOutcome::Full;
        }
        list.push(ListEntry { mask: mask.to_string(), set_by: acting.to_string(), set_at: 0 });
        ModeOutcome::Applied
    } else {
        let before = list.len();
        list.retain(|e| e.mask != mask);
        (list.len() != before).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::CommandRegistry;
    use crate::state::{NewUser, User};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn add_registered_user(ctx: &mut Context, conn_id: ConnId, nick: &str) -> UserId {
        let uid = ctx.user_ids.next();
        let user = User::new(NewUser {
            uid: format!("{uid:09}"),
            nick: nick.into(),
            ident: nick.into(),
            real_host: "host".into(),
            displayed_host: "host".into(),
            ip: "127.0.0.1".parse().unwrap(),
            realname: "r".into(),
            server_of_origin: "srv".into(),
            now: 0,
        });
        ctx.directory.insert_user(nick, &user.uid, uid);
        ctx.users.insert(uid, user);
        ctx.conns.get_mut(&conn_id).unwrap().user_id = Some(uid);
        ctx.conns.get_mut(&conn_id).unwrap().state = crate::context::ConnState::Registered;
        uid
    }

    fn test_ctx_with_conn(conn_id: ConnId) -> Context {
        let mut ctx = Context::new(Arc::new(Config::default()), CommandRegistry::new(), 0);
        let (tx, _rx) = mpsc::unbounded_channel();
        ctx.conns.insert(
            conn_id,
            crate::context::ConnEntry {
                peer_addr: "127.0.0.1:1".parse().unwrap(),
                local_addr: "127.0.0.1:2".parse().unwrap(),
                state: crate::context::ConnState::Unregistered,
                outbox: tx,
                user_id: None,
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
        ctx
    }

    #[test]
    fn join_creates_channel_and_grants_founder() {
        let mut ctx = test_ctx_with_conn(1);
        let uid = add_registered_user(&mut ctx, 1, "alice");
        join(&mut ctx, 1, &Message::new("JOIN", vec!["#chan".into()])).unwrap();
        let chan_id = ctx.directory.channel_by_name("#chan").unwrap();
        let channel = ctx.channels.get(&chan_id).unwrap();
        assert!(channel.members.get(&uid).unwrap().owner);
    }

    #[test]
    fn join_is_idempotent() {
        let mut ctx = test_ctx_with_conn(1);
        add_registered_user(&mut ctx, 1, "alice");
        join(&mut ctx, 1, &Message::new("JOIN", vec!["#chan".into()])).unwrap();
        let before = ctx.directory.channel_by_name("#chan").unwrap();
        join(&mut ctx, 1, &Message::new("JOIN", vec!["#chan".into()])).unwrap();
        assert_eq!(ctx.directory.channel_by_name("#chan"), Some(before));
        assert_eq!(ctx.channels.get(&before).unwrap().members.len(), 1);
    }

    #[test]
    fn join_rejects_bad_key() {
        let mut ctx = test_ctx_with_conn(1);
        add_registered_user(&mut ctx, 1, "alice");
        join(&mut ctx, 1, &Message::new("JOIN", vec!["#chan".into()])).unwrap();
        let chan_id = ctx.directory.channel_by_name("#chan").unwrap();
        ctx.channels.get_mut(&chan_id).unwrap().modes.key = Some("secret".into());

        let result = join_one(&mut ctx, 1, 999, "#chan", Some("wrong".into()));
        assert!(matches!(result, Err(HandlerError::BadChannelKey(_))));
    }

    #[test]
    fn part_removes_empty_non_persistent_channel() {
        let mut ctx = test_ctx_with_conn(1);
        add_registered_user(&mut ctx, 1, "alice");
        join(&mut ctx, 1, &Message::new("JOIN", vec!["#chan".into()])).unwrap();
        part(&mut ctx, 1, &Message::new("PART", vec!["#chan".into()])).unwrap();
        assert!(ctx.directory.channel_by_name("#chan").is_none());
    }

    #[test]
    fn topic_lock_requires_halfop() {
        let mut ctx = test_ctx_with_conn(1);
        let uid = add_registered_user(&mut ctx, 1, "alice");
        join(&mut ctx, 1, &Message::new("JOIN", vec!["#chan".into()])).unwrap();
        let chan_id = ctx.directory.channel_by_name("#chan").unwrap();
        ctx.channels.get_mut(&chan_id).unwrap().modes.topic_ops_only = true;
        ctx.channels.get_mut(&chan_id).unwrap().members.insert(uid, MemberModes::default());

        let result = topic(&mut ctx, 1, &Message::new("TOPIC", vec!["#chan".into(), "hi".into()]));
        assert!(matches!(result, Err(HandlerError::ChanOpPrivsNeeded(_))));
    }

    #[test]
    fn mode_set_is_idempotent_no_broadcast_on_repeat() {
        let mut ctx = test_ctx_with_conn(1);
        add_registered_user(&mut ctx, 1, "alice");
        join(&mut ctx, 1, &Message::new("JOIN", vec!["#chan".into()])).unwrap();
        mode(&mut ctx, 1, &Message::new("MODE", vec!["#chan".into(), "+t".into()])).unwrap();
        let chan_id = ctx.directory.channel_by_name("#chan").unwrap();
        assert!(ctx.channels.get(&chan_id).unwrap().modes.topic_ops_only);
        // second application changes nothing, handled by apply_channel_mode returning NoChange
        let applied = apply_channel_mode(&mut ctx, chan_id, 1, 't', true, None);
        assert_eq!(applied, ModeOutcome::NoChange);
    }
}
