//! Access control attached to names in the namespace

use bitflags::bitflags;

use super::member::CHAIN_SEPARATOR;

bitflags! {
    /// Rights that may be granted on a name in the namespace
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Tags: u8 {
        /// Resolve the name to the servers mounted on it
        const RESOLVE = 1 << 0;
        /// List the name and its children
        const READ    = 1 << 1;
        /// Change the permissions of the name or delete it
        const ADMIN   = 1 << 2;
        /// Create new names beneath the name
        const CREATE  = 1 << 3;
        /// Mount servers on the name
        const MOUNT   = 1 << 4;
    }
}

/// A pattern that blessing names are matched against.
///
/// The pattern `...` matches every principal, a pattern ending in `/$` matches only the exact
/// blessing before it, and any other pattern matches the blessing itself and all of its extensions
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlessingPattern(String);

impl BlessingPattern {
    /// Pattern matched by every principal, including one that presents no blessings
    pub const ALL_PRINCIPALS: &'static str = "...";

    const EXACT_SUFFIX: &'static str = "/$";

    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn all_principals() -> Self {
        Self::new(Self::ALL_PRINCIPALS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this pattern matches every principal
    pub fn is_all_principals(&self) -> bool {
        self.0 == Self::ALL_PRINCIPALS
    }

    /// Check if the given blessing name is matched by this pattern
    pub fn is_matched_by(&self, blessing: &str) -> bool {
        if self.is_all_principals() {
            return true;
        }

        if let Some(exact) = self.0.strip_suffix(Self::EXACT_SUFFIX) {
            return exact == blessing;
        }

        match blessing.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(CHAIN_SEPARATOR),
            None => false,
        }
    }
}

impl From<&str> for BlessingPattern {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BlessingPattern {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for BlessingPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A list of patterns that a caller's blessings must match to be granted access
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessList {
    pub allowed: Vec<BlessingPattern>,
}

impl AccessList {
    pub fn new(allowed: Vec<BlessingPattern>) -> Self {
        Self { allowed }
    }

    /// An access list that grants access to any caller
    pub fn everyone() -> Self {
        Self::new(vec![BlessingPattern::all_principals()])
    }

    /// Check if a caller presenting `blessings` is included in this list
    pub fn includes(&self, blessings: &[String]) -> bool {
        self.allowed
            .iter()
            .any(|p| p.is_all_principals() || blessings.iter().any(|b| p.is_matched_by(b)))
    }
}

/// A single grant of one or more [Tags] to the principals in an [AccessList]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    pub tags: Tags,
    pub access: AccessList,
}

/// Full set of grants attached to a name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Permissions {
    pub grants: Vec<Grant>,
}

impl Permissions {
    /// Add a grant of `tags` to the principals in `access`
    pub fn grant(mut self, tags: Tags, access: AccessList) -> Self {
        self.grants.push(Grant { tags, access });
        self
    }

    /// Permissions for a name claimed by a participant: anyone may resolve and read the name, but
    /// only principals matching `owner` may administer it, create beneath it, or mount on it
    pub fn locked(owner: Vec<BlessingPattern>) -> Self {
        Self::default()
            .grant(Tags::RESOLVE | Tags::READ, AccessList::everyone())
            .grant(Tags::ADMIN | Tags::CREATE | Tags::MOUNT, AccessList::new(owner))
    }

    /// Check if a caller presenting `blessings` holds every right in `tags`
    pub fn allows(&self, tags: Tags, blessings: &[String]) -> bool {
        tags.iter().all(|tag| {
            self.grants
                .iter()
                .any(|g| g.tags.contains(tag) && g.access.includes(blessings))
        })
    }
}
