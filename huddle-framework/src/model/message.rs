use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::member::display_name;

/// A chat message received from another member of a channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Display name of the sender, derived from the blessings it presented on the call
    sender: String,
    /// Content of the message in UTF-8
    text: String,
    /// Time that the message was received at
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message from the verified blessings of its sender, timestamped now
    pub fn received(sender_blessings: &[String], text: String) -> Self {
        Self {
            sender: display_name(sender_blessings).to_owned(),
            text,
            timestamp: Utc::now(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub const fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }
}
