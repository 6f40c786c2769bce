//! Operator and server-control commands: OPER, user-scope MODE, REHASH,
//! RESTART, DIE, KILL, WALLOPS, GLOBOPS, VHOST, LOADMODULE/UNLOADMODULE,
//! CHECK (§4.I).

use irc_proto::message::Message;
use irc_proto::mode::{ModeScope, ParamRule};
use irc_proto::{match_mask_nuh, response};
use tracing::info;

use crate::context::Context;
use crate::dispatch::commands::{require_user, send_numeric};
use crate::dispatch::{reply_error, CommandRegistry, CommandSpec};
use crate::error::HandlerError;
use crate::ids::ConnId;
use crate::modes;
use crate::modules::{Event, EventPayload, ModuleRegistry};
use crate::router::send_to_conn;

use super::cmd;

pub fn register(registry: &mut CommandRegistry) {
    cmd!(registry, "OPER", 2, false, true, oper);
    cmd!(registry, "REHASH", 0, true, true, rehash);
    cmd!(registry, "RESTART", 0, true, true, restart);
    cmd!(registry, "DIE", 0, true, true, die);
    cmd!(registry, "KILL", 2, true, true, kill);
    cmd!(registry, "WALLOPS", 1, true, true, wallops);
    cmd!(registry, "GLOBOPS", 1, true, true, globops);
    cmd!(registry, "VHOST", 1, true, true, vhost);
    cmd!(registry, "LOADMODULE", 1, true, true, loadmodule);
    cmd!(registry, "UNLOADMODULE", 1, true, true, unloadmodule);
    cmd!(registry, "CHECK", 1, true, true, check);
}

fn oper(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    let name = &msg.params[0];
    let password = &msg.params[1];

    let Some(oper_def) = ctx.config.security.operators.iter().find(|o| &o.name == name).cloned() else {
        return Err(HandlerError::NoPrivileges);
    };
    let nuh = ctx.users.get(&uid).map(|u| u.hostmask()).unwrap_or_default();
    if let Some(ref hostmask) = oper_def.hostmask {
        if !match_mask_nuh(&nuh, hostmask) {
            return Err(HandlerError::NoPrivileges);
        }
    }
    let verified = bcrypt::verify(password, &oper_def.password_hash).unwrap_or(false);
    if !verified {
        return Err(HandlerError::NoPrivileges);
    }

    if let Some(user) = ctx.users.get_mut(&uid) {
        user.modes.oper = true;
        user.oper_type = Some(oper_def.name.clone());
    }
    send_numeric(ctx, conn_id, response::RPL_YOUREOPER, &[], "You are now an IRC operator");
    ModuleRegistry::fire(ctx, Event::Oper, EventPayload::Oper { user_id: uid });
    Ok(())
}

/// Handles the user-scope half of MODE; dispatched to from
/// `commands::channel::mode` once the target fails the channel-prefix test.
pub(crate) fn user_mode(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    let target_nick = msg.params[0].clone();
    let self_nick = ctx.users.get(&uid).map(|u| u.nick.clone()).unwrap_or_default();
    if !irc_proto::irc_eq(&target_nick, &self_nick) {
        return Err(HandlerError::UsersDontMatch);
    }

    let Some(modestr) = msg.param(1) else {
        let modes_str = ctx.users.get(&uid).map(|u| u.modes.as_mode_string(&u.snomasks)).unwrap_or_default();
        send_numeric(ctx, conn_id, response::RPL_UMODEIS, &[], &modes_str);
        return Ok(());
    };

    let tokens = irc_proto::mode::tokenize(modestr);
    let mut applied = String::new();
    for token in tokens {
        if modes::param_rule(ModeScope::User, token.letter).is_none() {
            reply_error(ctx, conn_id, &HandlerError::UModeUnknownFlag);
            continue;
        }
        // Only opers may set +o on themselves via MODE; it is granted by OPER.
        if token.letter == 'o' && token.add {
            continue;
        }
        let Some(user) = ctx.users.get_mut(&uid) else { continue };
        let field = match token.letter {
            'i' => &mut user.modes.invisible,
            'w' => &mut user.modes.wallops,
            'o' => &mut user.modes.oper,
            _ => continue,
        };
        if *field != token.add {
            *field = token.add;
            applied.push(if token.add { '+' } else { '-' });
            applied.push(token.letter);
        }
    }
    if !applied.is_empty() {
        let announce = Message::new("MODE", vec![target_nick, applied]).with_prefix(self_nick);
        send_to_conn(ctx, conn_id, &announce);
    }
    Ok(())
}

fn rehash(ctx: &mut Context, conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    ctx.rehash_requested = true;
    send_numeric(ctx, conn_id, response::RPL_REHASHING, &["ircd.toml"], "Rehashing");
    ModuleRegistry::fire(ctx, Event::Rehash, EventPayload::Rehash);
    Ok(())
}

fn restart(ctx: &mut Context, _conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    ctx.restart_requested = true;
    ctx.shutdown_requested = true;
    Err(HandlerError::Quit(Some("Server restarting".to_string())))
}

fn die(ctx: &mut Context, _conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    ctx.shutdown_requested = true;
    Err(HandlerError::Quit(Some("Server shutting down".to_string())))
}

fn kill(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (killer_uid, _) = require_user(ctx, conn_id)?;
    let target_nick = &msg.params[0];
    let reason = &msg.params[1];
    let target_uid = ctx
        .directory
        .user_by_nick(target_nick)
        .ok_or_else(|| HandlerError::NoSuchNick(target_nick.clone()))?;
    let killer_nick = ctx.users.get(&killer_uid).map(|u| u.nick.clone()).unwrap_or_default();

    if let Some(target_conn) = ctx.conn_id_for_user(target_uid) {
        let quit_msg = Message::new("ERROR", vec![format!("Closing Link: killed by {killer_nick} ({reason})")]);
        send_to_conn(ctx, target_conn, &quit_msg);
        if let Some(entry) = ctx.conns.get_mut(&target_conn) {
            entry.state = crate::context::ConnState::Quitting;
            entry.quit_reason = Some(format!("Killed by {killer_nick}: {reason}"));
        }
    }
    info!(target = %target_nick, by = %killer_nick, "user killed by operator");
    ModuleRegistry::fire(ctx, Event::Kill, EventPayload::Kill { user_id: target_uid, by: killer_nick });
    Ok(())
}

fn wallops(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    broadcast_to_flagged(ctx, conn_id, msg, "WALLOPS", |m| m.wallops)
}

fn globops(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    broadcast_to_flagged(ctx, conn_id, msg, "GLOBOPS", |m| m.wallops || m.oper)
}

fn broadcast_to_flagged(
    ctx: &mut Context,
    conn_id: ConnId,
    msg: &Message,
    command: &str,
    wants: impl Fn(&crate::state::UserModes) -> bool,
) -> Result<(), HandlerError> {
    require_user(ctx, conn_id)?;
    let text = msg.params[0].clone();
    let server_name = ctx.server_name.clone();
    let announce = Message::new(command, vec![text]).with_prefix(server_name);
    let recipients: Vec<ConnId> = ctx
        .conns
        .iter()
        .filter_map(|(&cid, entry)| {
            let u = entry.user_id.and_then(|uid| ctx.users.get(&uid))?;
            wants(&u.modes).then_some(cid)
        })
        .collect();
    for recipient in recipients {
        send_to_conn(ctx, recipient, &announce);
    }
    Ok(())
}

fn vhost(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    let new_host = msg.params[0].clone();
    if let Some(user) = ctx.users.get_mut(&uid) {
        user.displayed_host = new_host.clone();
    }
    send_numeric(ctx, conn_id, response::RPL_YOUREOPER, &[], &format!("vhost set to {new_host}"));
    Ok(())
}

fn loadmodule(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let name = &msg.params[0];
    if ctx.modules.is_loaded(name) {
        send_numeric(ctx, conn_id, response::RPL_INFO, &[], &format!("Module {name} is already loaded"));
        return Ok(());
    }
    ctx.modules.register_module(name);
    send_numeric(ctx, conn_id, response::RPL_INFO, &[], &format!("Module {name} loaded"));
    Ok(())
}

fn unloadmodule(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let name = &msg.params[0];
    if !ctx.modules.is_loaded(name) {
        send_numeric(ctx, conn_id, response::RPL_INFO, &[], &format!("Module {name} is not loaded"));
        return Ok(());
    }
    ctx.modules.unload_module(name);
    send_numeric(ctx, conn_id, response::RPL_INFO, &[], &format!("Module {name} unloaded"));
    Ok(())
}

fn check(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let target = &msg.params[0];
    if let Some(uid) = ctx.directory.user_by_nick(target) {
        if let Some(user) = ctx.users.get(&uid) {
            send_numeric(
                ctx,
                conn_id,
                response::RPL_INFO,
                &[],
                &format!("{} is {}@{} ({} channels)", user.nick, user.ident, user.displayed_host, user.channels.len()),
            );
            return Ok(());
        }
    }
    if let Some(channel_id) = ctx.directory.channel_by_name(target) {
        if let Some(channel) = ctx.channels.get(&channel_id) {
            send_numeric(
                ctx,
                conn_id,
                response::RPL_INFO,
                &[],
                &format!("{} has {} members", channel.name, channel.members.len()),
            );
            return Ok(());
        }
    }
    Err(HandlerError::NoSuchNick(target.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, OperatorConfig};
    use crate::context::ConnState;
    use crate::state::{NewUser, User};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_ctx_with_conn(conn_id: ConnId, config: Config) -> Context {
        let mut ctx = Context::new(Arc::new(config), CommandRegistry::new(), 0);
        let (tx, _rx) = mpsc::unbounded_channel();
        ctx.conns.insert(
            conn_id,
            crate::context::ConnEntry {
                peer_addr: "127.0.0.1:1".parse().unwrap(),
                local_addr: "127.0.0.1:2".parse().unwrap(),
                state: ConnState::Registered,
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

    fn add_user(ctx: &mut Context, conn_id: ConnId, nick: &str) -> crate::ids::UserId {
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
        uid
    }

    #[test]
    fn oper_rejects_wrong_password() {
        let mut config = Config::default();
        config.security.operators.push(OperatorConfig {
            name: "root".into(),
            password_hash: bcrypt::hash("correct-horse", bcrypt::DEFAULT_COST).unwrap(),
            hostmask: None,
        });
        let mut ctx = test_ctx_with_conn(1, config);
        add_user(&mut ctx, 1, "alice");
        let result = oper(&mut ctx, 1, &Message::new("OPER", vec!["root".into(), "wrong".into()]));
        assert!(matches!(result, Err(HandlerError::NoPrivileges)));
    }

    #[test]
    fn oper_grants_operator_on_correct_password() {
        let mut config = Config::default();
        config.security.operators.push(OperatorConfig {
            name: "root".into(),
            password_hash: bcrypt::hash("correct-horse", bcrypt::DEFAULT_COST).unwrap(),
            hostmask: None,
        });
        let mut ctx = test_ctx_with_conn(1, config);
        let uid = add_user(&mut ctx, 1, "alice");
        oper(&mut ctx, 1, &Message::new("OPER", vec!["root".into(), "correct-horse".into()])).unwrap();
        assert!(ctx.users.get(&uid).unwrap().modes.oper);
    }

    #[test]
    fn user_mode_rejects_other_users_target() {
        let mut ctx = test_ctx_with_conn(1, Config::default());
        add_user(&mut ctx, 1, "alice");
        let result = user_mode(&mut ctx, 1, &Message::new("MODE", vec!["bob".into(), "+i".into()]));
        assert!(matches!(result, Err(HandlerError::UsersDontMatch)));
    }

    #[test]
    fn kill_marks_target_connection_quitting() {
        let mut ctx = test_ctx_with_conn(1, Config::default());
        add_user(&mut ctx, 1, "alice");
        let (tx2, _rx2) = mpsc::unbounded_channel();
        ctx.conns.insert(
            2,
            crate::context::ConnEntry {
                peer_addr: "127.0.0.1:9".parse().unwrap(),
                local_addr: "127.0.0.1:2".parse().unwrap(),
                state: ConnState::Registered,
                outbox: tx2,
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
        add_user(&mut ctx, 2, "bob");
        kill(&mut ctx, 1, &Message::new("KILL", vec!["bob".into(), "bye".into()])).unwrap();
        assert_eq!(ctx.conns.get(&2).unwrap().state, ConnState::Quitting);
    }
}
