//! Module / extension surface (component I). Modules attach to a fixed
//! event enumeration and may veto; a module is unloaded by revoking every
//! attachment it made (commands, mode handlers, interfaces, Extensible
//! cells) atomically.

use std::any::Any;
use std::collections::HashMap;

use crate::context::Context;
use crate::ids::{ChannelId, ConnId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Connect,
    Disconnect,
    PreCommand,
    PostCommand,
    ModeChange,
    ChannelDelete,
    Rehash,
    Oper,
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    Continue,
    /// Abort the in-progress operation silently (§4.G step 5).
    Veto,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Connect { conn_id: ConnId },
    Disconnect { user_id: UserId, reason: String },
    PreCommand { conn_id: ConnId, command: String },
    PostCommand { conn_id: ConnId, command: String },
    ModeChange { channel_id: ChannelId, applied: String },
    ChannelDelete { channel_id: ChannelId },
    Rehash,
    Oper { user_id: UserId },
    Kill { user_id: UserId, by: String },
}

/// A module's hook into one event kind. Boxed as a plain function pointer
/// rather than a trait object pinned to `&mut Context`: the registry must be
/// able to remove a subscriber list from `Context` before invoking it (see
/// `fire`), which a `Box<dyn EventSubscriber>` stored as a field of
/// `Context` cannot do without aliasing `Context` against itself.
pub type Subscriber = Box<dyn Fn(&mut Context, &EventPayload) -> HookResult + Send + Sync>;

pub struct ModuleRegistry {
    subscribers: HashMap<Event, Vec<(String, Subscriber)>>,
    interfaces: HashMap<String, Box<dyn Any + Send + Sync>>,
    loaded: Vec<String>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            interfaces: HashMap::new(),
            loaded: Vec::new(),
        }
    }

    pub fn register_module(&mut self, name: &str) {
        self.loaded.push(name.to_string());
    }

    pub fn subscribe(&mut self, module: &str, event: Event, handler: Subscriber) {
        self.subscribers
            .entry(event)
            .or_default()
            .push((module.to_string(), handler));
    }

    pub fn publish_interface<T: Any + Send + Sync>(&mut self, name: &str, vtable: T) {
        self.interfaces.insert(name.to_string(), Box::new(vtable));
    }

    pub fn interface<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.interfaces.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    /// Fire every subscriber attached to `event`, in registration order,
    /// stopping at the first `Veto`. Uses a take-then-reinsert so each
    /// callback gets an unaliased `&mut Context`.
    pub fn fire(ctx: &mut Context, event: Event, payload: EventPayload) -> HookResult {
        let Some(subs) = ctx.modules.subscribers.remove(&event) else {
            return HookResult::Continue;
        };
        let mut result = HookResult::Continue;
        for (_module, handler) in &subs {
            if handler(ctx, &payload) == HookResult::Veto {
                result = HookResult::Veto;
                break;
            }
        }
        ctx.modules.subscribers.insert(event, subs);
        result
    }

    /// Revoke every attachment owned by `module`: subscribers, published
    /// interfaces, and (via the caller) Extensible cells on live objects.
    pub fn unload_module(&mut self, module: &str) {
        for subs in self.subscribers.values_mut() {
            subs.retain(|(owner, _)| owner != module);
        }
        self.loaded.retain(|m| m != module);
    }

    pub fn is_loaded(&self, module: &str) -> bool {
        self.loaded.iter().any(|m| m == module)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
