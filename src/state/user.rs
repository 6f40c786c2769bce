//! Registered-user state (DATA MODEL: User).

use std::collections::HashSet;
use std::net::IpAddr;

use crate::ids::ChannelId;
use crate::state::extensible::Extensible;

/// User-mode bitset. Kept deliberately small: only the flags this daemon's
/// command set can actually set or query.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserModes {
    pub invisible: bool, // +i
    pub wallops: bool,   // +w
    pub oper: bool,      // +o
}

impl UserModes {
    /// Render as `+<letters>`, always at least the bare `+`.
    pub fn as_mode_string(&self, snomasks: &HashSet<char>) -> String {
        let mut s = String::from("+");
        if self.invisible {
            s.push('i');
        }
        if self.wallops {
            s.push('w');
        }
        if self.oper {
            s.push('o');
        }
        if !snomasks.is_empty() {
            s.push('s');
        }
        s
    }
}

#[derive(Debug)]
pub struct User {
    pub uid: String,
    pub nick: String,
    pub ident: String,
    pub real_host: String,
    pub displayed_host: String,
    pub ip: IpAddr,
    pub realname: String,
    pub signon_time: i64,
    pub last_activity: i64,
    pub modes: UserModes,
    pub snomasks: HashSet<char>,
    pub away: Option<String>,
    pub oper_type: Option<String>,
    pub server_of_origin: String,
    pub channels: HashSet<ChannelId>,
    pub extensible: Extensible,
    /// Stamped by the router during a single broadcast dispatch to suppress
    /// duplicate delivery across overlapping channels (component K).
    pub last_broadcast_stamp: u64,
}

pub struct NewUser {
    pub uid: String,
    pub nick: String,
    pub ident: String,
    pub real_host: String,
    pub displayed_host: String,
    pub ip: IpAddr,
    pub realname: String,
    pub server_of_origin: String,
    pub now: i64,
}

impl User {
    pub fn new(params: NewUser) -> Self {
        Self {
            uid: params.uid,
            nick: params.nick,
            ident: params.ident,
            real_host: params.real_host,
            displayed_host: params.displayed_host,
            ip: params.ip,
            realname: params.realname,
            signon_time: params.now,
            last_activity: params.now,
            modes: UserModes::default(),
            snomasks: HashSet::new(),
            away: None,
            oper_type: None,
            server_of_origin: params.server_of_origin,
            channels: HashSet::new(),
            extensible: Extensible::new(),
            last_broadcast_stamp: 0,
        }
    }

    pub fn idle_seconds(&self, now: i64) -> i64 {
        (now - self.last_activity).max(0)
    }

    pub fn is_away(&self) -> bool {
        self.away.is_some()
    }

    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.ident, self.displayed_host)
    }
}

/// An entry in the WHOWAS history for a disconnected user.
#[derive(Debug, Clone)]
pub struct WhowasEntry {
    pub nick: String,
    pub ident: String,
    pub host: String,
    pub realname: String,
    pub server: String,
    pub logout_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> User {
        User::new(NewUser {
            uid: "001AAAAAA".into(),
            nick: "alice".into(),
            ident: "alice".into(),
            real_host: "host.example".into(),
            displayed_host: "host.example".into(),
            ip: "127.0.0.1".parse().unwrap(),
            realname: "Alice".into(),
            server_of_origin: "irc.example".into(),
            now: 1000,
        })
    }

    #[test]
    fn mode_string_default_is_bare_plus() {
        let u = sample();
        assert_eq!(u.modes.as_mode_string(&u.snomasks), "+");
    }

    #[test]
    fn mode_string_reflects_set_flags() {
        let mut u = sample();
        u.modes.invisible = true;
        u.modes.oper = true;
        assert_eq!(u.modes.as_mode_string(&u.snomasks), "+io");
    }

    #[test]
    fn idle_seconds_never_negative() {
        let u = sample();
        assert_eq!(u.idle_seconds(500), 0);
        assert_eq!(u.idle_seconds(1500), 500);
    }

    #[test]
    fn hostmask_formats_nick_bang_ident_at_host() {
        let u = sample();
        assert_eq!(u.hostmask(), "alice!alice@host.example");
    }
}
