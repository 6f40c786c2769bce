//! Wire-format building blocks for an IRC daemon: case mapping, line framing,
//! message parsing/serialization, hostmask and CIDR matching, numeric replies
//! and mode-string parsing. Independent of any particular event loop or
//! connection model; the daemon crate owns all of that.

pub mod casemap;
pub mod mask;
pub mod message;
pub mod mode;
pub mod nick;
pub mod response;

pub use casemap::{irc_eq, irc_lower_char, irc_to_lower};
pub use mask::{match_cidr, match_mask_nuh, wildcard_match};
pub use message::{Message, ParseError};
pub use nick::is_valid_nick;
