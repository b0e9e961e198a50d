use std::{sync::Arc, time::Duration};

use crate::{
    model::display_name,
    net::{ListenSpec, Namespace, Principal, Transport},
};

pub(crate) mod handle;
pub(crate) mod lock;
pub(crate) mod members;
pub(crate) mod send;

pub use members::DiscoveryError;
pub use send::SendError;

/// Configuration options shared by every channel joined through a [Context]
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Maximum time to wait for a single call to another member
    pub call_timeout: Duration,
    /// Maximum time to spend listing the members of a channel
    pub discovery_timeout: Duration,
    /// Number of names to try claiming before a join gives up
    pub lock_attempts: usize,
    /// Period at which joined channels refresh their member list in the background, `None`
    /// disables the refresh
    pub poll_interval: Option<Duration>,
    /// Confirm the identity of every discovered member with a round trip to its server instead of
    /// trusting the blessings recorded in its mount entry
    pub verify_members: bool,
    /// How the message endpoint published for a joined channel listens for calls
    pub listen: ListenSpec,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(5),
            lock_attempts: 25,
            poll_interval: Some(Duration::from_secs(2)),
            verify_members: false,
            listen: ListenSpec::default(),
        }
    }
}

/// The main interface for taking part in huddle channels - holds the local participant's identity
/// and the namespace and transport that every channel it joins is built on
#[derive(Debug)]
pub struct Context {
    /// Identity of the local participant
    pub(crate) principal: Arc<dyn Principal>,
    /// Directory that members claim names in and are discovered through
    pub(crate) namespace: Arc<dyn Namespace>,
    /// RPC layer used to serve and call message endpoints
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cfg: ChannelConfig,
}

impl Context {
    /// Create a new `Context` for the participant identified by `principal`
    pub fn new(
        principal: Arc<dyn Principal>,
        namespace: Arc<dyn Namespace>,
        transport: Arc<dyn Transport>,
        cfg: ChannelConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            principal,
            namespace,
            transport,
            cfg,
        })
    }

    /// Display name of the local participant, as other members will see it
    pub fn user_name(&self) -> String {
        display_name(&self.principal.blessing_names()).to_owned()
    }

    #[inline]
    pub const fn config(&self) -> &ChannelConfig {
        &self.cfg
    }

    #[inline]
    pub fn principal(&self) -> &Arc<dyn Principal> {
        &self.principal
    }
}
