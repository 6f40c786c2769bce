//! Command-layer error enum (SPEC_FULL §7/§10): every policy or protocol
//! failure a handler can raise, each carrying a stable `error_code()` for
//! logs/metrics and a renderer for the exact numeric reply it produces.

use irc_proto::message::Message;
use irc_proto::response::{self, numeric};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("not enough parameters for {0}")]
    NeedMoreParams(String),
    #[error("unknown command {0}")]
    UnknownCommand(String),
    #[error("not registered")]
    NotRegistered,
    #[error("already registered")]
    AlreadyRegistered,
    #[error("erroneous nickname {0}")]
    ErroneousNickname(String),
    #[error("nickname in use: {0}")]
    NicknameInUse(String),
    #[error("no such nick/channel: {0}")]
    NoSuchNick(String),
    #[error("no such channel: {0}")]
    NoSuchChannel(String),
    #[error("cannot send to channel {0}")]
    CannotSendToChan(String),
    #[error("no privileges")]
    NoPrivileges,
    #[error("channel operator privileges needed on {0}")]
    ChanOpPrivsNeeded(String),
    #[error("not on channel {0}")]
    NotOnChannel(String),
    #[error("{nick} is not on channel {channel}")]
    UserNotInChannel { nick: String, channel: String },
    #[error("{nick} is already on channel {channel}")]
    UserOnChannel { nick: String, channel: String },
    #[error("channel {0} is full")]
    ChannelIsFull(String),
    #[error("channel {0} is invite-only")]
    InviteOnlyChannel(String),
    #[error("banned from channel {0}")]
    BannedFromChannel(String),
    #[error("bad channel key for {0}")]
    BadChannelKey(String),
    #[error("ban list for {0} is full")]
    BanListFull(String),
    #[error("unknown mode letter {0}")]
    UnknownMode(char),
    #[error("unknown user mode flag")]
    UModeUnknownFlag,
    #[error("users don't match")]
    UsersDontMatch,
    #[error("no MOTD configured")]
    NoMotd,
    #[error("quitting: {0:?}")]
    Quit(Option<String>),
    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Stable label for logs and the per-command error-count metric.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NeedMoreParams(_) => "need_more_params",
            Self::UnknownCommand(_) => "unknown_command",
            Self::NotRegistered => "not_registered",
            Self::AlreadyRegistered => "already_registered",
            Self::ErroneousNickname(_) => "erroneous_nickname",
            Self::NicknameInUse(_) => "nickname_in_use",
            Self::NoSuchNick(_) => "no_such_nick",
            Self::NoSuchChannel(_) => "no_such_channel",
            Self::CannotSendToChan(_) => "cannot_send_to_chan",
            Self::NoPrivileges => "no_privileges",
            Self::ChanOpPrivsNeeded(_) => "chanop_privs_needed",
            Self::NotOnChannel(_) => "not_on_channel",
            Self::UserNotInChannel { .. } => "user_not_in_channel",
            Self::UserOnChannel { .. } => "user_on_channel",
            Self::ChannelIsFull(_) => "channel_is_full",
            Self::InviteOnlyChannel(_) => "invite_only_channel",
            Self::BannedFromChannel(_) => "banned_from_channel",
            Self::BadChannelKey(_) => "bad_channel_key",
            Self::BanListFull(_) => "ban_list_full",
            Self::UnknownMode(_) => "unknown_mode",
            Self::UModeUnknownFlag => "umode_unknown_flag",
            Self::UsersDontMatch => "users_dont_match",
            Self::NoMotd => "no_motd",
            Self::Quit(_) => "quit",
            Self::Internal(_) => "internal",
        }
    }

    /// Render the numeric reply this error produces, or `None` for errors
    /// that terminate the connection or are purely internal rather than
    /// being surfaced to the client as a numeric.
    pub fn to_irc_reply(&self, server_name: &str, nick: &str) -> Option<Message> {
        let nick = if nick.is_empty() { "*" } else { nick };
        let m = match self {
            Self::NeedMoreParams(cmd) => {
                numeric(server_name, response::ERR_NEEDMOREPARAMS, nick, &[cmd], "Not enough parameters")
            }
            Self::UnknownCommand(cmd) => {
                numeric(server_name, response::ERR_UNKNOWNCOMMAND, nick, &[cmd], "Unknown command")
            }
            Self::NotRegistered => numeric(
                server_name,
                response::ERR_NOTREGISTERED,
                nick,
                &[],
                "You have not registered",
            ),
            Self::AlreadyRegistered => numeric(
                server_name,
                response::ERR_ALREADYREGISTERED,
                nick,
                &[],
                "You may not reregister",
            ),
            Self::ErroneousNickname(n) => numeric(
                server_name,
                response::ERR_ERRONEUSNICKNAME,
                nick,
                &[n],
                "Erroneous nickname",
            ),
            Self::NicknameInUse(n) => {
                numeric(server_name, response::ERR_NICKNAMEINUSE, nick, &[n], "Nickname is already in use")
            }
            Self::NoSuchNick(n) => {
                numeric(server_name, response::ERR_NOSUCHNICK, nick, &[n], "No such nick/channel")
            }
            Self::NoSuchChannel(c) => {
                numeric(server_name, response::ERR_NOSUCHCHANNEL, nick, &[c], "No such channel")
            }
            Self::CannotSendToChan(c) => numeric(
                server_name,
                response::ERR_CANNOTSENDTOCHAN,
                nick,
                &[c],
                "Cannot send to channel",
            ),
            Self::NoPrivileges => numeric(
                server_name,
                response::ERR_NOPRIVILEGES,
                nick,
                &[],
                "Permission Denied- You're not an IRC operator",
            ),
            Self::ChanOpPrivsNeeded(c) => numeric(
                server_name,
                response::ERR_CHANOPRIVSNEEDED,
                nick,
                &[c],
                "You're not channel operator",
            ),
            Self::NotOnChannel(c) => {
                numeric(server_name, response::ERR_NOTONCHANNEL, nick, &[c], "You're not on that channel")
            }
            Self::UserNotInChannel { nick: target, channel } => numeric(
                server_name,
                response::ERR_USERNOTINCHANNEL,
                nick,
                &[target, channel],
                "They aren't on that channel",
            ),
            Self::UserOnChannel { nick: target, channel } => numeric(
                server_name,
                response::ERR_USERONCHANNEL,
                nick,
                &[target, channel],
                "is already on channel",
            ),
            Self::ChannelIsFull(c) => {
                numeric(server_name, response::ERR_CHANNELISFULL, nick, &[c], "Cannot join channel (+l)")
            }
            Self::InviteOnlyChannel(c) => numeric(
                server_name,
                response::ERR_INVITEONLYCHAN,
                nick,
                &[c],
                "Cannot join channel (+i)",
            ),
            Self::BannedFromChannel(c) => numeric(
                server_name,
                response::ERR_BANNEDFROMCHAN,
                nick,
                &[c],
                "Cannot join channel (+b)",
            ),
            Self::BadChannelKey(c) => {
                numeric(server_name, response::ERR_BADCHANNELKEY, nick, &[c], "Cannot join channel (+k)")
            }
            Self::BanListFull(c) => {
                numeric(server_name, response::ERR_BANLISTFULL, nick, &[c], "Channel ban list is full")
            }
            Self::UnknownMode(letter) => numeric(
                server_name,
                response::ERR_UNKNOWNMODE,
                nick,
                &[&letter.to_string()],
                "is unknown mode char to me",
            ),
            Self::UModeUnknownFlag => numeric(
                server_name,
                response::ERR_UMODEUNKNOWNFLAG,
                nick,
                &[],
                "Unknown MODE flag",
            ),
            Self::UsersDontMatch => numeric(
                server_name,
                response::ERR_USERSDONTMATCH,
                nick,
                &[],
                "Cannot change mode for other users",
            ),
            Self::NoMotd => numeric(server_name, response::ERR_NOMOTD, nick, &[], "MOTD File is missing"),
            Self::Quit(_) | Self::Internal(_) => return None,
        };
        Some(m)
    }
}
