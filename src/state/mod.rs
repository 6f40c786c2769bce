//! Core object model: arenas (`Context` owns one `HashMap<Id, T>` per kind),
//! the cross-cutting `Directory` index, and the per-object state types.

pub mod channel;
pub mod directory;
pub mod extensible;
pub mod user;

pub use channel::{Channel, ChannelModes, ListEntry, MemberModes, Topic, DEFAULT_LIST_CAP};
pub use directory::Directory;
pub use extensible::Extensible;
pub use user::{NewUser, User, UserModes, WhowasEntry};
