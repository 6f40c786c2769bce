//! The mandatory command set (§6 "Commands supported at minimum"), split
//! across a handful of files the way the predecessor's legacy command
//! layer grouped registration / channel / messaging / query / oper
//! commands, rather than one file per verb.

pub mod admin;
pub mod channel;
pub mod messaging;
pub mod query;
pub mod registration;

use irc_proto::message::Message;
use irc_proto::response;

use crate::context::Context;
use crate::dispatch::{CommandRegistry, CommandSpec};
use crate::error::HandlerError;
use crate::ids::{ConnId, UserId};
use crate::router::send_to_conn;
use crate::state::User;

pub fn register_all(registry: &mut CommandRegistry) {
    registration::register(registry);
    channel::register(registry);
    messaging::register(registry);
    query::register(registry);
    admin::register(registry);
}

pub fn current_user_id(ctx: &Context, conn_id: ConnId) -> Option<UserId> {
    ctx.user_id_for_conn(conn_id)
}

pub fn require_user(ctx: &Context, conn_id: ConnId) -> Result<(UserId, &User), HandlerError> {
    let uid = current_user_id(ctx, conn_id).ok_or(HandlerError::NotRegistered)?;
    let user = ctx.users.get(&uid).ok_or(HandlerError::NotRegistered)?;
    Ok((uid, user))
}

pub fn source_prefix(user: &User) -> String {
    user.hostmask()
}

pub fn send_numeric(ctx: &mut Context, conn_id: ConnId, code: u16, params: &[&str], trailing: &str) {
    let nick = current_user_id(ctx, conn_id)
        .and_then(|uid| ctx.users.get(&uid))
        .map(|u| u.nick.clone())
        .unwrap_or_else(|| "*".to_string());
    let msg = response::numeric(&ctx.server_name, code, &nick, params, trailing);
    send_to_conn(ctx, conn_id, &msg);
}

pub fn send_command(ctx: &mut Context, conn_id: ConnId, prefix: &str, command: &str, params: Vec<String>) {
    let msg = Message::new(command, params).with_prefix(prefix);
    send_to_conn(ctx, conn_id, &msg);
}

macro_rules! cmd {
    ($registry:expr, $name:expr, $min_params:expr, $oper_only:expr, $registered_only:expr, $handler:expr) => {
        $registry.register(CommandSpec {
            name: $name,
            min_params: $min_params,
            oper_only: $oper_only,
            registered_only: $registered_only,
            handler: $handler,
        })
    };
}
pub(crate) use cmd;
