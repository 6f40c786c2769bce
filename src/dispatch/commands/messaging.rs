//! PRIVMSG and NOTICE fanout to users and channels (§4.F).

use irc_proto::message::Message;
use irc_proto::response;

use crate::context::Context;
use crate::dispatch::commands::{require_user, send_numeric};
use crate::dispatch::{reply_error, CommandRegistry, CommandSpec};
use crate::error::HandlerError;
use crate::ids::ConnId;
use crate::router::{broadcast_to_channel, send_to_user};

use super::cmd;

pub fn register(registry: &mut CommandRegistry) {
    cmd!(registry, "PRIVMSG", 2, false, true, privmsg);
    cmd!(registry, "NOTICE", 2, false, true, notice);
}

fn privmsg(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    send(ctx, conn_id, msg, "PRIVMSG")
}

fn notice(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    send(ctx, conn_id, msg, "NOTICE")
}

/// NOTICE must never generate an automatic error reply (RFC 2812 §3.3.2),
/// so its per-target failures are swallowed; PRIVMSG reports them.
fn send(ctx: &mut Context, conn_id: ConnId, msg: &Message, command: &str) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    let text = msg.params[1].clone();
    let nuh = ctx.users.get(&uid).map(|u| u.hostmask()).unwrap_or_default();
    let chan_prefix = ctx.config.channel.prefixes.chars().next().unwrap_or('#');

    for target in msg.params[0].split(',') {
        if let Err(err) = send_one(ctx, conn_id, uid, target, chan_prefix, &nuh, command, &text) {
            if command == "PRIVMSG" {
                reply_error(ctx, conn_id, &err);
            }
        }
    }
    Ok(())
}

fn send_one(
    ctx: &mut Context,
    conn_id: ConnId,
    sender: crate::ids::UserId,
    target: &str,
    chan_prefix: char,
    nuh: &str,
    command: &str,
    text: &str,
) -> Result<(), HandlerError> {
    if target.starts_with(chan_prefix) {
        let channel_id = ctx
            .directory
            .channel_by_name(target)
            .ok_or_else(|| HandlerError::NoSuchChannel(target.to_string()))?;
        let channel = ctx
            .channels
            .get(&channel_id)
            .ok_or_else(|| HandlerError::NoSuchChannel(target.to_string()))?;
        let is_member = channel.members.contains_key(&sender);
        if channel.modes.no_external_messages && !is_member {
            return Err(HandlerError::CannotSendToChan(target.to_string()));
        }
        if channel.modes.moderated {
            let can_speak = channel
                .member(sender)
                .map(|m| m.has_voice_or_higher())
                .unwrap_or(false);
            if !can_speak {
                return Err(HandlerError::CannotSendToChan(target.to_string()));
            }
        }
        let announce =
            Message::new(command, vec![target.to_string(), text.to_string()]).with_prefix(nuh.to_string());
        broadcast_to_channel(ctx, channel_id, &announce, Some(sender));
        Ok(())
    } else {
        let target_uid = ctx
            .directory
            .user_by_nick(target)
            .ok_or_else(|| HandlerError::NoSuchNick(target.to_string()))?;
        // NOTICE never triggers an automatic reply (RFC 2812 §3.3.2), so only
        // PRIVMSG gets told the target stepped away.
        if command == "PRIVMSG" {
            if let Some(target_user) = ctx.users.get(&target_uid) {
                if target_user.is_away() {
                    let target_nick = target_user.nick.clone();
                    let away_message = target_user.away.clone().unwrap_or_default();
                    send_numeric(ctx, conn_id, response::RPL_AWAY, &[&target_nick], &away_message);
                }
            }
        }
        let announce =
            Message::new(command, vec![target.to_string(), text.to_string()]).with_prefix(nuh.to_string());
        send_to_user(ctx, target_uid, &announce);
        Ok(())
    }
}
