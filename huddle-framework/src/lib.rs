//! # Huddle
//!
//! A crate for serverless group chat over a shared hierarchical namespace. Every participant in a
//! channel claims a locked name beneath the channel's path and publishes a message endpoint on it,
//! members are discovered by listing the path, and messages are delivered with a direct call to
//! each member, so no central server ever relays a message.
//!
//! All operations for one participant go through a [Context], which should be wrapped in an `Arc`
//! and shared by every [Channel] that the participant joins. The namespace and transport that a
//! context runs over are supplied through the traits in [net], and [loopback] provides an
//! in-process implementation of both.

pub(crate) mod ctx;

pub mod channel;
pub mod loopback;
pub mod model;
pub mod msg;
pub mod net;

pub use channel::{Channel, ChannelError, ChannelState};
pub use ctx::{ChannelConfig, Context, DiscoveryError, SendError};

pub use huddle_wireformat::{ByteWriter, FromBytes, FromBytesError, ToBytes, ToBytesError};
