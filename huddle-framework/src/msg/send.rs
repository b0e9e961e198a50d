use crate::{FromBytes, ToBytes};

use super::Request;

/// Deliver a line of text to a member of the channel. The sender is identified by the blessings it
/// presents on the call, not by anything in the payload
#[derive(Clone, Debug, PartialEq, Eq, ToBytes, FromBytes)]
pub struct SendMessage {
    pub text: String,
}

impl Request for SendMessage {
    const METHOD: &'static str = "SendMessage";

    type Response = ();
}
