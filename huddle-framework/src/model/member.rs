//! Members of a channel and the display names derived from their blessings

use serde::{Deserialize, Serialize};

/// Display name given to a peer that presented no blessings
pub const UNKNOWN_NAME: &str = "unknown";

/// Separator between the components of a blessing name
pub const CHAIN_SEPARATOR: char = '/';

/// A member of a channel as it was found mounted beneath the channel's path
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Blessings of the server mounted at `path`, a member may hold more than one
    blessings: Vec<String>,
    /// Name shown for this member, derived from `blessings`
    name: String,
    /// Full name in the namespace where the member's message endpoint is mounted
    path: String,
}

impl Member {
    /// Create a member mounted at `path` with the given blessings
    pub fn new(blessings: Vec<String>, path: String) -> Self {
        let name = display_name(&blessings).to_owned();
        Self {
            blessings,
            name,
            path,
        }
    }

    /// Blessings that the member's server presented when it was discovered
    pub fn blessings(&self) -> &[String] {
        &self.blessings
    }

    /// Human readable name of this member
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name in the namespace that calls to this member are addressed to
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Pick a short name out of a full blessing name: the first component holding exactly one `@`
/// (it looks like an email address), or the whole blessing when no component does
pub fn short_name(blessing: &str) -> &str {
    blessing
        .split(CHAIN_SEPARATOR)
        .find(|part| part.matches('@').count() == 1)
        .unwrap_or(blessing)
}

/// Derive the display name for a set of blessings from the first of them
pub fn display_name(blessings: &[String]) -> &str {
    blessings
        .first()
        .map(|b| short_name(b))
        .unwrap_or(UNKNOWN_NAME)
}
