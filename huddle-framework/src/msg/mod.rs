//! Definitions for all requests that members may make of each other's message endpoints

pub mod send;

use crate::{FromBytes, ToBytes};

pub use send::SendMessage;

/// Trait to be implemented by every request that a member's endpoint accepts, naming the method
/// it is invoked with and the response that a successful call produces
pub trait Request: ToBytes + for<'a> FromBytes<'a> {
    const METHOD: &'static str;

    type Response: ToBytes + for<'a> FromBytes<'a>;
}
