//! Modelling the values a channel exchanges with its collaborators: members found in the
//! namespace, messages received from them, and the access control attached to claimed names

pub mod access;
pub mod member;
pub mod message;

pub use access::{AccessList, BlessingPattern, Permissions, Tags};
pub use member::{display_name, short_name, Member};
pub use message::Message;
