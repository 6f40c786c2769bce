//! Command dispatch (component G): a name-keyed registry of commands, each
//! carrying required-parameter count and access flags, plus the fixed
//! seven-step dispatch algorithm that checks them in order and runs the
//! registered pre/post-command module hooks around the handler call.

pub mod commands;

use std::collections::HashMap;

use irc_proto::message::{Message, ParseError};
use irc_proto::response;
use tracing::{debug, warn};

use crate::context::{ConnState, Context};
use crate::error::HandlerError;
use crate::ids::ConnId;
use crate::modules::{Event, EventPayload, HookResult, ModuleRegistry};
use crate::router::send_to_conn;

pub type HandlerFn = fn(&mut Context, ConnId, &Message) -> Result<(), HandlerError>;

pub struct CommandSpec {
    pub name: &'static str,
    pub min_params: usize,
    pub oper_only: bool,
    pub registered_only: bool,
    pub handler: HandlerFn,
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command. Per §4.G, a second registration of the same
    /// name is an error at load time rather than silently overwriting the
    /// first — this only matters once modules can add commands, but the
    /// core command set is loaded through the same path.
    pub fn register(&mut self, spec: CommandSpec) {
        let name = spec.name;
        if self.commands.insert(name, spec).is_some() {
            panic!("duplicate command registration for {name}");
        }
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }
}

fn nick_for_reply(ctx: &Context, conn_id: ConnId) -> String {
    ctx.user_id_for_conn(conn_id)
        .and_then(|uid| ctx.users.get(&uid))
        .map(|u| u.nick.clone())
        .unwrap_or_else(|| "*".to_string())
}

pub(crate) fn reply_error(ctx: &mut Context, conn_id: ConnId, err: &HandlerError) {
    let nick = nick_for_reply(ctx, conn_id);
    if let Some(msg) = err.to_irc_reply(&ctx.server_name, &nick) {
        send_to_conn(ctx, conn_id, &msg);
    }
}

/// Parse and dispatch one already-framed line from `conn_id`, per §4.G's
/// seven-step algorithm. Parse failures are dropped silently, matching the
/// line framer/parser's own malformed-encoding policy (§4.C).
pub fn dispatch_line(ctx: &mut Context, conn_id: ConnId, line: &str) {
    let msg = match Message::parse(line) {
        Ok(msg) => msg,
        Err(ParseError::Empty) => return,
        Err(e) => {
            debug!(conn_id, error = %e, "dropping malformed line");
            return;
        }
    };
    dispatch_message(ctx, conn_id, &msg);
}

pub(crate) fn dispatch_message(ctx: &mut Context, conn_id: ConnId, msg: &Message) {
    // Step 1: unknown command -> 421. We look the spec up by cloning the
    // function pointer out, since the handler call needs `&mut Context`
    // and the spec itself lives inside `ctx.registry`.
    let Some(spec_name) = ctx.registry.get(&msg.command).map(|s| s.name) else {
        let err = HandlerError::UnknownCommand(msg.command.clone());
        reply_error(ctx, conn_id, &err);
        return;
    };
    let (min_params, oper_only, registered_only, handler) = {
        let spec = ctx.registry.get(spec_name).expect("looked up above");
        (spec.min_params, spec.oper_only, spec.registered_only, spec.handler)
    };

    let registered = ctx
        .conns
        .get(&conn_id)
        .map(|c| c.state == ConnState::Registered)
        .unwrap_or(false);

    // Step 2: registered-only.
    if registered_only && !registered {
        reply_error(ctx, conn_id, &HandlerError::NotRegistered);
        return;
    }

    // Step 3: oper-only.
    if oper_only {
        let is_oper = ctx
            .user_id_for_conn(conn_id)
            .and_then(|uid| ctx.users.get(&uid))
            .map(|u| u.modes.oper)
            .unwrap_or(false);
        if !is_oper {
            reply_error(ctx, conn_id, &HandlerError::NoPrivileges);
            return;
        }
    }

    // Step 4: parameter count.
    if msg.params.len() < min_params {
        reply_error(ctx, conn_id, &HandlerError::NeedMoreParams(msg.command.clone()));
        return;
    }

    // Step 5: pre-command hooks, any veto aborts silently.
    let pre = ModuleRegistry::fire(
        ctx,
        Event::PreCommand,
        EventPayload::PreCommand { conn_id, command: msg.command.clone() },
    );
    if pre == HookResult::Veto {
        return;
    }

    // Step 6: invoke the handler.
    if let Err(err) = handler(ctx, conn_id, msg) {
        if matches!(err, HandlerError::Quit(_)) {
            if let Some(entry) = ctx.conns.get_mut(&conn_id) {
                entry.state = ConnState::Quitting;
            }
        } else if matches!(err, HandlerError::Internal(_)) {
            warn!(conn_id, %err, "internal handler error");
        } else {
            reply_error(ctx, conn_id, &err);
        }
    }

    // Step 7: post-command hooks.
    ModuleRegistry::fire(
        ctx,
        Event::PostCommand,
        EventPayload::PostCommand { conn_id, command: msg.command.clone() },
    );
}

/// Used by handlers that need to emit a numeric reply that isn't an error
/// (welcome burst, WHOIS lines, etc.) without going through `HandlerError`.
pub fn reply(ctx: &mut Context, conn_id: ConnId, code: u16, params: &[&str], trailing: &str) {
    let nick = nick_for_reply(ctx, conn_id);
    let msg = response::numeric(&ctx.server_name, code, &nick, params, trailing);
    send_to_conn(ctx, conn_id, &msg);
}
