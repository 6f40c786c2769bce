//! Static mode tables (component H): which letters exist per scope and
//! whether they take a parameter. The handlers that interpret a token once
//! its parameter has been resolved live next to the commands that apply
//! them (`dispatch::commands::channel`, `dispatch::commands::core`) — a
//! trait-object `ModeHandler` registry was considered and dropped because a
//! handler stored inside `Context` cannot cleanly receive `&mut Context` as
//! an argument without an unresolvable self-borrow; see DESIGN.md.

use irc_proto::mode::{ModeScope, ParamRule};

pub const MAX_MODE_CHANGES_DEFAULT: usize = irc_proto::mode::DEFAULT_MAX_MODE_CHANGES;

/// Letters this server recognizes for a given scope, and their parameter
/// rule. Returns `None` for an unrecognized letter (caller raises `472`).
pub fn param_rule(scope: ModeScope, letter: char) -> Option<ParamRule> {
    match scope {
        ModeScope::User => match letter {
            'i' | 'w' | 'o' => Some(ParamRule::None),
            _ => None,
        },
        ModeScope::Channel => match letter {
            'i' | 'm' | 'n' | 't' | 's' | 'P' => Some(ParamRule::None),
            'k' => Some(ParamRule::OnSet),
            'l' => Some(ParamRule::OnSet),
            'o' | 'h' | 'v' | 'a' | 'q' => Some(ParamRule::Always),
            'b' | 'e' | 'I' => Some(ParamRule::List),
            _ => None,
        },
    }
}

/// Whether `letter` is one of the status-prefix modes (o/h/v/a/q), which
/// take a nick rather than a scalar value and map onto `MemberModes` fields
/// instead of `ChannelModes`.
pub fn is_status_letter(letter: char) -> bool {
    matches!(letter, 'o' | 'h' | 'v' | 'a' | 'q')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_key_takes_param_only_on_set() {
        assert_eq!(param_rule(ModeScope::Channel, 'k'), Some(ParamRule::OnSet));
    }

    #[test]
    fn channel_ban_is_list_rule() {
        assert_eq!(param_rule(ModeScope::Channel, 'b'), Some(ParamRule::List));
    }

    #[test]
    fn unknown_letter_is_none() {
        assert_eq!(param_rule(ModeScope::Channel, 'Z'), None);
        assert_eq!(param_rule(ModeScope::User, 'x'), None);
    }

    #[test]
    fn status_letters_recognized() {
        assert!(is_status_letter('o'));
        assert!(!is_status_letter('k'));
    }
}
