//! Formatting of everything the terminal client prints

use chrono::{DateTime, Local, TimeZone};
use huddle_framework::model::{Member, Message};

/// Format used for the time a message was received, e.g. `Jan 2 at 3:04pm`
const TIME_FORMAT: &str = "%b %-d at %-I:%M%P";

pub fn welcome(user: &str, path: &str, mounttable: &str) -> String {
    format!(
        "Welcome to huddle, {}!\n\
         You are chatting in {} on {}. Type a message and press enter to send it to everyone here.\n\
         Type /members to list who is here and /quit (or Ctrl-D) to leave.",
        user, path, mounttable
    )
}

pub fn timestamp<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format(TIME_FORMAT).to_string()
}

pub fn message(msg: &Message) -> String {
    let local = msg.timestamp().with_timezone(&Local);
    format!("[{}] {}: {}", timestamp(&local), msg.sender(), msg.text())
}

pub fn members(members: &[Member]) -> String {
    let names = members.iter().map(Member::name).collect::<Vec<_>>();
    match names.is_empty() {
        true => "Nobody is here".to_owned(),
        false => format!("Members ({}): {}", names.len(), names.join(", ")),
    }
}
