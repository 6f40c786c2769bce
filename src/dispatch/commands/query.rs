//! Informational commands: WHO, WHOIS, WHOWAS, ISON, USERHOST, AWAY,
//! VERSION, TIME, ADMIN, INFO, MOTD, STATS (§4.H).

use irc_proto::message::Message;
use irc_proto::response;

use crate::context::Context;
use crate::dispatch::commands::{require_user, send_numeric};
use crate::dispatch::{CommandRegistry, CommandSpec};
use crate::error::HandlerError;
use crate::ids::ConnId;

use super::cmd;

pub fn register(registry: &mut CommandRegistry) {
    cmd!(registry, "WHO", 0, false, true, who);
    cmd!(registry, "WHOIS", 1, false, true, whois);
    cmd!(registry, "WHOWAS", 1, false, true, whowas);
    cmd!(registry, "ISON", 1, false, true, ison);
    cmd!(registry, "USERHOST", 1, false, true, userhost);
    cmd!(registry, "AWAY", 0, false, true, away);
    cmd!(registry, "VERSION", 0, false, true, version);
    cmd!(registry, "TIME", 0, false, true, time);
    cmd!(registry, "ADMIN", 0, false, true, admin);
    cmd!(registry, "INFO", 0, false, true, info);
    cmd!(registry, "MOTD", 0, false, true, motd);
    cmd!(registry, "STATS", 1, false, true, stats);
}

fn who(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let Some(target) = msg.param(0) else {
        send_numeric(ctx, conn_id, response::RPL_ENDOFWHO, &["*"], "End of WHO list");
        return Ok(());
    };
    let chan_prefix = ctx.config.channel.prefixes.chars().next().unwrap_or('#');

    if target.starts_with(chan_prefix) {
        let Some(channel_id) = ctx.directory.channel_by_name(target) else {
            send_numeric(ctx, conn_id, response::RPL_ENDOFWHO, &[target], "End of WHO list");
            return Ok(());
        };
        let members: Vec<_> = ctx.channels.get(&channel_id).map(|c| c.members.clone()).unwrap_or_default();
        let server_name = ctx.server_name.clone();
        for (uid, flags) in members {
            let Some((ident, displayed_host, nick, realname)) =
                ctx.users.get(&uid).map(|u| (u.ident.clone(), u.displayed_host.clone(), u.nick.clone(), u.realname.clone()))
            else {
                continue;
            };
            let flag_str = format!("H{}", flags.prefix_char().map(String::from).unwrap_or_default());
            send_numeric(
                ctx,
                conn_id,
                response::RPL_WHOREPLY,
                &[target, &ident, &displayed_host, &server_name, &nick, &flag_str],
                &format!("0 {realname}"),
            );
        }
    } else if let Some(uid) = ctx.directory.user_by_nick(target) {
        let server_name = ctx.server_name.clone();
        let found = ctx.users.get(&uid).map(|u| (u.ident.clone(), u.displayed_host.clone(), u.nick.clone(), u.realname.clone()));
        if let Some((ident, displayed_host, nick, realname)) = found {
            send_numeric(
                ctx,
                conn_id,
                response::RPL_WHOREPLY,
                &["*", &ident, &displayed_host, &server_name, &nick, "H"],
                &format!("0 {realname}"),
            );
        }
    }
    send_numeric(ctx, conn_id, response::RPL_ENDOFWHO, &[target], "End of WHO list");
    Ok(())
}

fn whois(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let nick = msg.params[0].clone();
    let Some(uid) = ctx.directory.user_by_nick(&nick) else {
        return Err(HandlerError::NoSuchNick(nick));
    };
    let server_name = ctx.server_name.clone();
    let Some(user) = ctx.users.get(&uid) else {
        return Err(HandlerError::NoSuchNick(nick));
    };
    let u_nick = user.nick.clone();
    let u_ident = user.ident.clone();
    let u_host = user.displayed_host.clone();
    let u_realname = user.realname.clone();
    let is_oper = user.modes.oper;
    let idle_seconds = user.idle_seconds(ctx.start_time);
    let chan_ids: Vec<_> = user.channels.iter().copied().collect();

    send_numeric(ctx, conn_id, response::RPL_WHOISUSER, &[&u_nick, &u_ident, &u_host, "*"], &u_realname);
    send_numeric(ctx, conn_id, response::RPL_WHOISSERVER, &[&u_nick, &server_name], "rustircd IRC server");
    if is_oper {
        send_numeric(ctx, conn_id, response::RPL_WHOISOPERATOR, &[&u_nick], "is an IRC operator");
    }
    let chan_names: Vec<String> =
        chan_ids.iter().filter_map(|cid| ctx.channels.get(cid)).map(|c| c.name.clone()).collect();
    if !chan_names.is_empty() {
        send_numeric(ctx, conn_id, response::RPL_WHOISCHANNELS, &[&u_nick], &chan_names.join(" "));
    }
    send_numeric(ctx, conn_id, response::RPL_WHOISIDLE, &[&u_nick, &idle_seconds.to_string()], "seconds idle");
    send_numeric(ctx, conn_id, response::RPL_ENDOFWHOIS, &[&u_nick], "End of WHOIS list");
    Ok(())
}

fn whowas(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let nick = msg.params[0].clone();
    let matches: Vec<_> = ctx.whowas.iter().filter(|e| irc_proto::irc_eq(&e.nick, &nick)).cloned().collect();
    let found = !matches.is_empty();
    for entry in &matches {
        send_numeric(
            ctx,
            conn_id,
            response::RPL_WHOWASUSER,
            &[&entry.nick, &entry.ident, &entry.host, "*"],
            &entry.realname,
        );
    }
    if !found {
        reply_no_such_nick_for_whowas(ctx, conn_id, &nick);
    }
    send_numeric(ctx, conn_id, response::RPL_ENDOFWHOWAS, &[&nick], "End of WHOWAS");
    Ok(())
}

fn reply_no_such_nick_for_whowas(ctx: &mut Context, conn_id: ConnId, nick: &str) {
    send_numeric(ctx, conn_id, response::ERR_NOSUCHNICK, &[nick], "There was no such nickname");
}

fn ison(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let present: Vec<&str> = msg
        .params
        .iter()
        .filter(|nick| ctx.directory.nick_taken(nick))
        .map(String::as_str)
        .collect();
    send_numeric(ctx, conn_id, response::RPL_ISON, &[], &present.join(" "));
    Ok(())
}

fn userhost(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let mut parts = Vec::new();
    for nick in &msg.params {
        if let Some(uid) = ctx.directory.user_by_nick(nick) {
            if let Some(user) = ctx.users.get(&uid) {
                let oper_marker = if user.modes.oper { "*" } else { "" };
                let away_marker = if user.is_away() { "-" } else { "+" };
                parts.push(format!("{}{oper_marker}={away_marker}{}", user.nick, user.displayed_host));
            }
        }
    }
    send_numeric(ctx, conn_id, response::RPL_USERHOST, &[], &parts.join(" "));
    Ok(())
}

fn away(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let (uid, _) = require_user(ctx, conn_id)?;
    match msg.param(0) {
        Some(reason) => {
            if let Some(user) = ctx.users.get_mut(&uid) {
                user.away = Some(reason.to_string());
            }
            send_numeric(ctx, conn_id, response::RPL_NOWAWAY, &[], "You have been marked as being away");
        }
        None => {
            if let Some(user) = ctx.users.get_mut(&uid) {
                user.away = None;
            }
            send_numeric(ctx, conn_id, response::RPL_UNAWAY, &[], "You are no longer marked as being away");
        }
    }
    Ok(())
}

fn version(ctx: &mut Context, conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    let server_name = ctx.server_name.clone();
    send_numeric(
        ctx,
        conn_id,
        response::RPL_VERSION,
        &["rustircd-0.1", &server_name],
        "single-threaded event-loop IRC daemon",
    );
    Ok(())
}

fn time(ctx: &mut Context, conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    let server_name = ctx.server_name.clone();
    send_numeric(ctx, conn_id, response::RPL_TIME, &[&server_name], &ctx.start_time.to_string());
    Ok(())
}

fn admin(ctx: &mut Context, conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    let server_name = ctx.config.server.name.clone();
    let admin = ctx.config.server.admin.clone();
    send_numeric(ctx, conn_id, response::RPL_ADMINME, &[], &format!("Administrative info about {server_name}"));
    send_numeric(ctx, conn_id, response::RPL_ADMINLOC1, &[], &admin.location1);
    send_numeric(ctx, conn_id, response::RPL_ADMINLOC2, &[], &admin.location2);
    send_numeric(ctx, conn_id, response::RPL_ADMINEMAIL, &[], &admin.email);
    Ok(())
}

fn info(ctx: &mut Context, conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    send_numeric(ctx, conn_id, response::RPL_INFO, &[], "rustircd - a single-threaded event-loop IRC daemon");
    send_numeric(ctx, conn_id, response::RPL_ENDOFINFO, &[], "End of INFO list");
    Ok(())
}

fn motd(ctx: &mut Context, conn_id: ConnId, _msg: &Message) -> Result<(), HandlerError> {
    let server_name = ctx.server_name.clone();
    match ctx.config.server.motd.clone() {
        Some(text) => {
            send_numeric(ctx, conn_id, response::RPL_MOTDSTART, &[], &format!("- {server_name} Message of the day -"));
            for line in text.lines() {
                send_numeric(ctx, conn_id, response::RPL_MOTD, &[], &format!("- {line}"));
            }
            send_numeric(ctx, conn_id, response::RPL_ENDOFMOTD, &[], "End of MOTD command");
            Ok(())
        }
        None => Err(HandlerError::NoMotd),
    }
}

fn stats(ctx: &mut Context, conn_id: ConnId, msg: &Message) -> Result<(), HandlerError> {
    let query = msg.params[0].clone();
    match query.as_str() {
        "u" => {
            let uptime = ctx.start_time;
            send_numeric(ctx, conn_id, response::RPL_STATSCOMMANDS, &["u"], &format!("Uptime marker {uptime}"));
        }
        _ => {}
    }
    send_numeric(ctx, conn_id, response::RPL_ENDOFSTATS, &[&query], "End of STATS report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::ConnState;
    use crate::state::{NewUser, User};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn add_conn(ctx: &mut Context, conn_id: ConnId) {
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
    fn whois_unknown_nick_errors() {
        let mut ctx = Context::new(Arc::new(Config::default()), CommandRegistry::new(), 0);
        add_conn(&mut ctx, 1);
        let result = whois(&mut ctx, 1, &Message::new("WHOIS", vec!["ghost".into()]));
        assert!(matches!(result, Err(HandlerError::NoSuchNick(_))));
    }

    #[test]
    fn ison_reports_only_present_nicks() {
        let mut ctx = Context::new(Arc::new(Config::default()), CommandRegistry::new(), 0);
        add_conn(&mut ctx, 1);
        add_user(&mut ctx, 1, "alice");
        ison(&mut ctx, 1, &Message::new("ISON", vec!["alice".into(), "ghost".into()])).unwrap();
    }

    #[test]
    fn away_toggles_state() {
        let mut ctx = Context::new(Arc::new(Config::default()), CommandRegistry::new(), 0);
        add_conn(&mut ctx, 1);
        let uid = add_user(&mut ctx, 1, "alice");
        away(&mut ctx, 1, &Message::new("AWAY", vec!["lunch".into()])).unwrap();
        assert!(ctx.users.get(&uid).unwrap().is_away());
        away(&mut ctx, 1, &Message::new("AWAY", vec![])).unwrap();
        assert!(!ctx.users.get(&uid).unwrap().is_away());
    }

    #[test]
    fn motd_absent_yields_no_motd_error() {
        let mut ctx = Context::new(Arc::new(Config::default()), CommandRegistry::new(), 0);
        add_conn(&mut ctx, 1);
        ctx.config = Arc::new({
            let mut c = Config::default();
            c.server.motd = None;
            c
        });
        let result = motd(&mut ctx, 1, &Message::new("MOTD", vec![]));
        assert!(matches!(result, Err(HandlerError::NoMotd)));
    }
}
