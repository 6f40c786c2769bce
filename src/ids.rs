//! Stable-id vocabulary shared across the daemon (design note: arena + stable
//! id breaking the User<->Channel cyclic reference from the original source).

/// Monotonically increasing, server-scoped identifier for a registered user.
/// Stable across nick changes; never reused for the life of the process.
pub type UserId = u64;

/// Monotonically increasing, server-scoped identifier for a channel.
/// Stable across the channel's lifetime (a destroyed-then-recreated channel
/// of the same name gets a fresh id).
pub type ChannelId = u64;

/// Identifier for a live TCP connection, assigned before registration and
/// retained for the connection's whole lifetime, independent of whether it
/// ever completes registration into a `UserId`.
pub type ConnId = u64;

/// Simple monotonic counter used for all three id spaces; each table in
/// `Context` owns its own generator so ids never collide across spaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGen(u64);

impl IdGen {
    pub fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}
