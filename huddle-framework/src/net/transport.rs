use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use crate::{model::{AccessList, BlessingPattern}, FromBytesError, ToBytesError};

use super::NamespaceError;

/// Details of an inbound call passed to a [Dispatcher]
#[derive(Clone, Debug)]
pub struct ServerCall {
    method: String,
    remote_blessings: Vec<String>,
}

impl ServerCall {
    pub fn new(method: impl Into<String>, remote_blessings: Vec<String>) -> Self {
        Self {
            method: method.into(),
            remote_blessings,
        }
    }

    /// Name of the method that the caller invoked
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Blessings of the caller, as verified by the transport
    pub fn remote_blessings(&self) -> &[String] {
        &self.remote_blessings
    }
}

/// Options controlling how a published server listens for calls
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenSpec {
    /// Name of a proxy to accept calls through instead of listening directly
    pub proxy: Option<String>,
}

/// Policy deciding which callers a published server accepts calls from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authorizer {
    AllowEveryone,
    AllowList(AccessList),
}

impl Authorizer {
    /// Check if a caller presenting `blessings` may call the server
    pub fn authorize(&self, blessings: &[String]) -> bool {
        match self {
            Self::AllowEveryone => true,
            Self::AllowList(list) => list.includes(blessings),
        }
    }
}

/// Handler for the calls made to a published server
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    /// Handle a single call, returning the encoded response
    async fn dispatch(&self, call: ServerCall, payload: Bytes) -> Result<Bytes, DispatchError>;
}

/// RPC layer used to publish message endpoints and call those of other members
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Start serving `dispatcher` and mount it on `name` in the namespace
    async fn publish(
        &self,
        name: &str,
        dispatcher: Arc<dyn Dispatcher>,
        authorizer: Authorizer,
        listen: &ListenSpec,
    ) -> Result<(), TransportError>;

    /// Stop serving the dispatcher published on `name` and unmount it
    async fn unpublish(&self, name: &str) -> Result<(), TransportError>;

    /// Call `method` on the server mounted at `name`.
    ///
    /// When `allowed_servers` is given, the call is only made to a server whose blessings match
    /// one of the patterns and fails with [TransportError::IdentityMismatch] otherwise
    async fn call(
        &self,
        name: &str,
        method: &str,
        payload: Bytes,
        allowed_servers: Option<&[BlessingPattern]>,
        timeout: Duration,
    ) -> Result<Bytes, TransportError>;

    /// Connect to the server mounted at `name` and read back the blessings it proves it holds
    async fn server_blessings(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, TransportError>;
}

/// Any error returned by a [Transport]
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No reachable server is mounted at {0}")]
    Unreachable(String),
    #[error("Server at {name} presented blessings {found:?}, which were not expected")]
    IdentityMismatch { name: String, found: Vec<String> },
    #[error("Call to {0} timed out")]
    Timeout(String),
    #[error("A server is already published at {0}")]
    AlreadyPublished(String),
    #[error("No server is published at {0}")]
    NotPublished(String),
    #[error("Namespace error: {0}")]
    Namespace(#[from] NamespaceError),
    #[error("Remote error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Any error produced by a [Dispatcher] while handling a call
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown method {0}")]
    UnknownMethod(String),
    #[error("Caller is not authorized")]
    NotAuthorized,
    #[error("Failed to decode request: {0}")]
    Decode(#[from] FromBytesError),
    #[error("Failed to encode response: {0}")]
    Encode(#[from] ToBytesError),
}
