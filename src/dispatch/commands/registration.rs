//! NICK, USER, PASS, QUIT, PING, PONG and the registration-completion burst
//! (component D's registration FSM, §4.D).

use irc_proto::message::Message;
use irc_proto::response;
use irc_proto::{irc_eq, is_valid_nick};

use crate::context::{ConnState, Context};
use crate::dispatch::commands::{current_user_id, send_command, send_numeric};
use crate::dispatch::{CommandRegistry, CommandSpec};
use crate::error::HandlerError;
use crate::ids::ConnId;
use crate::modules::{Event, EventPayload, ModuleRegistry};
use crate::router::send_to_conn;
use crate::state::{NewUser, User};

use super::cmd;

pub fn register(registry: &mut CommandRegistry) {
    cmd!(registry, "NICK", 1, false, false, nick);
    cmd!(registry, "USER", 4, false, false, user);
    cmd!(registry, "PASS", 1, false, false, pass);
    cmd!(registry, "QUIT", 0, false, false, quit);
    cmd!(registry, "PING", 1, false, false, ping);
    cmd!(registry, "PONG", 0, false, false, pong);
}

fn pass(ctx: &mut Context, conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    if current_user_id(ctx, conn_id).is_some() {
        return Err(HandlerError::AlreadyRegistered);
    }
    Ok(())
}

fn nick(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let candidate = msg.params[0].clone();
    if !is_valid_nick(&candidate) {
        return Err(HandlerError::ErroneousNickname(candidate));
    }

    let existing_uid = current_user_id(ctx, conn_id);

    if let Some(uid) = existing_uid {
        let old_nick = ctx.users.get(&uid).map(|u| u.nick.clone()).unwrap_or_default();
        if irc_eq(&old_nick, &candidate) {
            return Ok(()); // idempotent, case-insensitive no-op
        }
        if ctx.directory.nick_taken(&candidate) {
            return Err(HandlerError::NicknameInUse(candidate));
        }
        let prefix = ctx.users.get(&uid).map(|u| u.hostmask()).unwrap_or_default();
        ctx.directory.rename_user(&old_nick, &candidate, uid);
        let channel_ids: Vec<_> = ctx
            .users
            .get(&uid)
            .map(|u| u.channels.iter().copied().collect())
            .unwrap_or_default();
        if let Some(user) = ctx.users.get_mut(&uid) {
            user.nick = candidate.clone();
        }
        let announce = Message::new("NICK", vec![candidate]).with_prefix(prefix);
        send_to_conn(ctx, conn_id, &announce);
        for channel_id in channel_ids {
            crate::router::broadcast_to_channel(ctx, channel_id, &announce, Some(uid));
        }
        return Ok(());
    }

    if ctx.directory.nick_taken(&candidate) {
        return Err(HandlerError::NicknameInUse(candidate));
    }
    if let Some(entry) = ctx.conns.get_mut(&conn_id) {
        entry.pending_nick = Some(candidate);
        if entry.state == ConnState::Unregistered {
            entry.state = ConnState::RegWaitNickUser;
        }
    }
    try_complete_registration(ctx, conn_id);
    Ok(())
}

fn user(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    if current_user_id(ctx, conn_id).is_some() {
        return Err(HandlerError::AlreadyRegistered);
    }
    let ident = msg.params[0].clone();
    let realname = msg.params[3].clone();
    if let Some(entry) = ctx.conns.get_mut(&conn_id) {
        entry.pending_ident = Some(ident);
        entry.pending_realname = Some(realname);
        if entry.state == ConnState::Unregistered {
            entry.state = ConnState::RegWaitNickUser;
        }
    }
    try_complete_registration(ctx, conn_id);
    Ok(())
}

fn try_complete_registration(ctx: &mut Context, conn_id: ConnId) {
    let Some(entry) = ctx.conns.get(&conn_id) else { return };
    if entry.state == ConnState::Registered {
        return;
    }
    let (Some(nick), Some(ident), Some(realname)) = (
        entry.pending_nick.clone(),
        entry.pending_ident.clone(),
        entry.pending_realname.clone(),
    ) else {
        return;
    };
    let peer_addr = entry.peer_addr;

    let uid = ctx.user_ids.next();
    let server_name = ctx.server_name.clone();
    let uid_str = format!("{:09}", uid);
    let user = User::new(NewUser {
        uid: uid_str,
        nick: nick.clone(),
        ident,
        real_host: peer_addr.ip().to_string(),
        displayed_host: peer_addr.ip().to_string(),
        ip: peer_addr.ip(),
        realname,
        server_of_origin: server_name,
        now: ctx.start_time,
    });
    ctx.directory.insert_user(&nick, &user.uid, uid);
    ctx.users.insert(uid, user);

    if let Some(entry) = ctx.conns.get_mut(&conn_id) {
        entry.user_id = Some(uid);
        entry.state = ConnState::Registered;
    }

    send_welcome_burst(ctx, conn_id, uid);
    ModuleRegistry::fire(ctx, Event::Connect, EventPayload::Connect { conn_id });
}

fn send_welcome_burst(ctx: &mut Context, conn_id: ConnId, uid: crate::ids::UserId) {
    let nick = ctx.users.get(&uid).map(|u| u.nick.clone()).unwrap_or_default();
    let server_name = ctx.server_name.clone();

    send_numeric(
        ctx,
        conn_id,
        response::RPL_WELCOME,
        &[],
        &format!("Welcome to the Internet Relay Network {nick}"),
    );
    send_numeric(
        ctx,
        conn_id,
        response::RPL_YOURHOST,
        &[],
        &format!("Your host is {server_name}, running version rustircd-0.1"),
    );
    send_numeric(
        ctx,
        conn_id,
        response::RPL_CREATED,
        &[],
        "This server was created at startup",
    );
    send_numeric(
        ctx,
        conn_id,
        response::RPL_MYINFO,
        &[&server_name, "rustircd-0.1", "iow", "opsitlmnbvk"],
        "",
    );
    send_numeric(
        ctx,
        conn_id,
        response::RPL_ISUPPORT,
        &["CHANTYPES=#", "PREFIX=(qaohv)~&@%+", "NICKLEN=30", "MODES=20"],
        "are supported by this server",
    );

    match &ctx.config.server.motd {
        Some(motd) => {
            send_numeric(ctx, conn_id, response::RPL_MOTDSTART, &[], &format!("- {server_name} Message of the day -"));
            for line in motd.lines() {
                send_numeric(ctx, conn_id, response::RPL_MOTD, &[], &format!("- {line}"));
            }
            send_numeric(ctx, conn_id, response::RPL_ENDOFMOTD, &[], "End of MOTD command");
        }
        None => send_numeric(ctx, conn_id, response::ERR_NOMOTD, &[], "MOTD File is missing"),
    }
}

fn quit(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let reason = msg.param(0).map(str::to_string).unwrap_or_else(|| "Client Quit".to_string());
    if let Some(entry) = ctx.conns.get_mut(&conn_id) {
        entry.state = ConnState::Quitting;
        entry.quit_reason = Some(reason);
    }
    Ok(())
}

fn ping(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let cookie = msg.params[0].clone();
    let server_name = ctx.server_name.clone();
    send_command(ctx, conn_id, &server_name, "PONG", vec![server_name.clone(), cookie]);
    Ok(())
}

fn pong(ctx: &mut Context, conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    if let Some(entry) = ctx.conns.get_mut(&conn_id) {
        entry.ping_sent_at = None;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::CommandRegistry;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_ctx_with_conn() -> (Context, ConnId) {
        let mut ctx = Context::new(Arc::new(Config::default()), CommandRegistry::new(), 0);
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = 1;
        ctx.conns.insert(
            conn_id,
            crate::context::ConnEntry {
                peer_addr: "127.0.0.1:4000".parse().unwrap(),
                local_addr: "127.0.0.1:6667".parse().unwrap(),
                state: ConnState::Unregistered,
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
                registration_deadline: 60,
                quit_reason: None,
            },
        );
        (ctx, conn_id)
    }

    #[test]
    fn nick_then_user_completes_registration() {
        let (mut ctx, conn_id) = test_ctx_with_conn();
        nick(&mut ctx, conn_id, &Message::new("NICK", vec!["alice".into()])).unwrap();
        assert_eq!(ctx.conns.get(&conn_id).unwrap().state, ConnState::RegWaitNickUser);
        user(
            &mut ctx,
            conn_id,
            &Message::new("USER", vec!["alice".into(), "0".into(), "*".into(), "Alice".into()]),
        )
        .unwrap();
        assert_eq!(ctx.conns.get(&conn_id).unwrap().state, ConnState::Registered);
        assert!(ctx.directory.nick_taken("alice"));
    }

    #[test]
    fn nick_rejects_taken_name() {
        let (mut ctx, conn_id) = test_ctx_with_conn();
        nick(&mut ctx, conn_id, &Message::new("NICK", vec!["alice".into()])).unwrap();
        user(
            &mut ctx,
            conn_id,
            &Message::new("USER", vec!["alice".into(), "0".into(), "*".into(), "Alice".into()]),
        )
        .unwrap();

        let (tx2, _rx2) = mpsc::unbounded_channel();
        ctx.conns.insert(
            2,
            crate::context::ConnEntry {
                peer_addr: "127.0.0.1:4001".parse().unwrap(),
                local_addr: "127.0.0.1:6667".parse().unwrap(),
                state: ConnState::Unregistered,
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
                registration_deadline: 60,
                quit_reason: None,
            },
        );
        let result = nick(&mut ctx, 2, &Message::new("NICK", vec!["alice".into()]));
        assert!(matches!(result, Err(HandlerError::NicknameInUse(_))));
    }

    #[test]
    fn nick_change_to_same_nick_case_insensitive_is_noop() {
        let (mut ctx, conn_id) = test_ctx_with_conn();
        nick(&mut ctx, conn_id, &Message::new("NICK", vec!["alice".into()])).unwrap();
        user(
            &mut ctx,
            conn_id,
            &Message::new("USER", vec!["alice".into(), "0".into(), "*".into(), "Alice".into()]),
        )
        .unwrap();
        let result = nick(&mut ctx, conn_id, &Message::new("NICK", vec!["ALICE".into()]));
        assert!(result.is_ok());
        assert_eq!(ctx.users.values().next().unwrap().nick, "alice");
    }

    #[test]
    fn quit_marks_connection_quitting_with_reason() {
        let (mut ctx, conn_id) = test_ctx_with_conn();
        quit(&mut ctx, conn_id, &Message::new("QUIT", vec!["bye".into()])).unwrap();
        let entry = ctx.conns.get(&conn_id).unwrap();
        assert_eq!(entry.state, ConnState::Quitting);
        assert_eq!(entry.quit_reason.as_deref(), Some("bye"));
    }
}
