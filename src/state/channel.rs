//! Channel and membership state (DATA MODEL: Channel, Membership, Ban/Mask
//! entry).

use std::collections::{HashMap, HashSet};

use crate::ids::UserId;
use crate::state::extensible::Extensible;

/// An entry in a bounded list (bans, exceptions, invite-exceptions).
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub mask: String,
    pub set_by: String,
    pub set_at: i64,
}

#[derive(Debug, Clone)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

/// Per-membership prefix flags (owner/admin/op/halfop/voice).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemberModes {
    pub owner: bool,  // +q (~)
    pub admin: bool,  // +a (&)
    pub op: bool,     // +o (@)
    pub halfop: bool, // +h (%)
    pub voice: bool,  // +v (+)
}

impl MemberModes {
    /// Highest prefix character for this member, in priority order
    /// `~ > & > @ > % > +`.
    pub fn prefix_char(&self) -> Option<char> {
        if self.owner {
            Some('~')
        } else if self.admin {
            Some('&')
        } else if self.op {
            Some('@')
        } else if self.halfop {
            Some('%')
        } else if self.voice {
            Some('+')
        } else {
            None
        }
    }

    /// All prefix characters for this member, highest to lowest, for
    /// multi-prefix-capable renderers.
    pub fn all_prefix_chars(&self) -> String {
        let mut s = String::with_capacity(5);
        if self.owner {
            s.push('~');
        }
        if self.admin {
            s.push('&');
        }
        if self.op {
            s.push('@');
        }
        if self.halfop {
            s.push('%');
        }
        if self.voice {
            s.push('+');
        }
        s
    }

    pub fn has_op_or_higher(&self) -> bool {
        self.owner || self.admin || self.op
    }

    pub fn has_halfop_or_higher(&self) -> bool {
        self.has_op_or_higher() || self.halfop
    }

    pub fn has_voice_or_higher(&self) -> bool {
        self.has_halfop_or_higher() || self.voice
    }
}

/// Channel mode bitset and parameterized modes.
#[derive(Debug, Default, Clone)]
pub struct ChannelModes {
    pub invite_only: bool,        // +i
    pub moderated: bool,          // +m
    pub no_external_messages: bool, // +n
    pub topic_ops_only: bool,     // +t
    pub secret: bool,             // +s
    /// Channel survives emptying out (+P); otherwise it is destroyed.
    pub permanent: bool,
    pub key: Option<String>,    // +k <key>
    pub limit: Option<usize>,   // +l <limit>
}

impl ChannelModes {
    /// Render the bitset-only letters as `+<letters>` (parameterized modes
    /// are appended by the caller, which knows whether to reveal the key).
    pub fn as_mode_string(&self) -> String {
        let mut s = String::from("+");
        if self.invite_only {
            s.push('i');
        }
        if self.moderated {
            s.push('m');
        }
        if self.no_external_messages {
            s.push('n');
        }
        if self.topic_ops_only {
            s.push('t');
        }
        if self.secret {
            s.push('s');
        }
        if self.permanent {
            s.push('P');
        }
        if self.key.is_some() {
            s.push('k');
        }
        if self.limit.is_some() {
            s.push('l');
        }
        s
    }
}

pub const DEFAULT_LIST_CAP: usize = 100;

#[derive(Debug)]
pub struct Channel {
    pub name: String,
    pub topic: Option<Topic>,
    pub creation_time: i64,
    pub members: HashMap<UserId, MemberModes>,
    pub modes: ChannelModes,
    pub bans: Vec<ListEntry>,
    pub excepts: Vec<ListEntry>,
    pub invex: Vec<ListEntry>,
    pub list_cap: usize,
    /// Users who have been INVITEd; consumed (removed) on a successful
    /// JOIN that relies on the invitation to bypass `+i`.
    pub invited: HashSet<UserId>,
    pub extensible: Extensible,
}

impl Channel {
    pub fn new(name: impl Into<String>, creation_time: i64, list_cap: usize) -> Self {
        Self {
            name: name.into(),
            topic: None,
            creation_time,
            members: HashMap::new(),
            modes: ChannelModes::default(),
            bans: Vec::new(),
            excepts: Vec::new(),
            invex: Vec::new(),
            list_cap,
            invited: HashSet::new(),
            extensible: Extensible::new(),
        }
    }

    pub fn is_empty_and_transient(&self) -> bool {
        self.members.is_empty() && !self.modes.permanent
    }

    pub fn member(&self, user: UserId) -> Option<&MemberModes> {
        self.members.get(&user)
    }

    pub fn member_mut(&mut self, user: UserId) -> Option<&mut MemberModes> {
        self.members.get_mut(&user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_char_priority_owner_beats_everything() {
        let m = MemberModes {
            owner: true,
            op: true,
            voice: true,
            ..Default::default()
        };
        assert_eq!(m.prefix_char(), Some('~'));
        assert_eq!(m.all_prefix_chars(), "~@+");
    }

    #[test]
    fn has_voice_or_higher_true_for_op() {
        let m = MemberModes {
            op: true,
            ..Default::default()
        };
        assert!(m.has_voice_or_higher());
        assert!(m.has_halfop_or_higher());
    }

    #[test]
    fn empty_non_permanent_channel_is_transient() {
        let c = Channel::new("#chan", 0, DEFAULT_LIST_CAP);
        assert!(c.is_empty_and_transient());
    }

    #[test]
    fn permanent_channel_survives_emptying() {
        let mut c = Channel::new("#chan", 0, DEFAULT_LIST_CAP);
        c.modes.permanent = true;
        assert!(!c.is_empty_and_transient());
    }

    #[test]
    fn mode_string_reflects_bitset_and_parameterized_presence() {
        let mut modes = ChannelModes::default();
        modes.invite_only = true;
        modes.key = Some("secret".into());
        assert_eq!(modes.as_mode_string(), "+ik");
    }
}
