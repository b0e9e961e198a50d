use std::time::Duration;

use futures::stream::BoxStream;

use crate::model::Permissions;

/// A server mounted on a name, along with the blessings it presents to callers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountedServer {
    /// Address that the server can be reached at
    pub endpoint: String,
    pub blessings: Vec<String>,
}

/// A name found while listing the namespace and the servers mounted on it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountEntry {
    pub name: String,
    pub servers: Vec<MountedServer>,
}

impl MountEntry {
    /// Check if any server with a usable address is mounted on this name
    pub fn has_servers(&self) -> bool {
        self.servers.iter().any(|s| !s.endpoint.is_empty())
    }

    /// Blessings of the first server with a usable address, if any
    pub fn blessing_names(&self) -> Option<&[String]> {
        self.servers
            .iter()
            .find(|s| !s.endpoint.is_empty())
            .map(|s| s.blessings.as_slice())
    }
}

/// A single result produced while listing names matching a pattern
#[derive(Debug)]
pub enum GlobReply {
    Entry(MountEntry),
    /// A name could not be listed, the rest of the listing continues
    Error {
        name: String,
        error: NamespaceError,
    },
}

/// A hierarchical directory of names that participants mount their servers on
#[async_trait::async_trait]
pub trait Namespace: Send + Sync + std::fmt::Debug {
    /// Create `name` if it does not exist and replace its permissions.
    ///
    /// Fails with [NamespaceError::Conflict] if the name is already held by a principal that
    /// does not grant the caller admin rights
    async fn set_permissions(&self, name: &str, perms: Permissions) -> Result<(), NamespaceError>;

    /// Lazily list every name matching `pattern`, where a trailing `*` component matches all
    /// direct children of the name before it. The stream ends when the listing is complete
    async fn glob(
        &self,
        pattern: &str,
        timeout: Duration,
    ) -> Result<BoxStream<'static, GlobReply>, NamespaceError>;

    /// Remove `name`, including every name beneath it if `delete_subtree` is set
    async fn delete(&self, name: &str, delete_subtree: bool) -> Result<(), NamespaceError>;
}

/// Any error returned by a [Namespace]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error("Name {0} is already held by another principal")]
    Conflict(String),
    #[error("Access to {0} was denied")]
    NoAccess(String),
    #[error("Name {0} does not exist")]
    NotFound(String),
    #[error("Name {0} has children and the subtree was not deleted")]
    NotEmpty(String),
    #[error("Timed out waiting for the namespace")]
    Timeout,
    #[error("Namespace unavailable: {0}")]
    Unavailable(String),
}
