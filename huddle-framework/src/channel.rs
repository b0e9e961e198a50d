//! Channels: named groups of members that discover each other beneath a shared path in the
//! namespace and exchange messages directly
//!
//! A [Channel] starts out [Left](ChannelState::Left). Joining claims a locked name beneath the
//! channel's path and publishes a message endpoint on it, leaving unpublishes the endpoint and
//! deletes the name again. Members are discovered by listing the channel's path, and the last
//! successful listing is kept as the snapshot that [Channel::broadcast] delivers to.

use std::{sync::Arc, time::Duration};

use futures::stream::BoxStream;
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    ctx::{handle::ChatServer, DiscoveryError, SendError},
    model::{Member, Message},
    net::{NamespaceError, TransportError},
    Context,
};

/// Observable lifecycle state of a [Channel]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Left,
    Joining,
    Joined,
    Leaving,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Left => "left",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::Leaving => "leaving",
        })
    }
}

/// Lifecycle state along with the resources held while joined
enum Lifecycle {
    Left,
    Joining,
    Joined {
        /// Locked name that the message endpoint is published on
        name: String,
        /// Background member refresh, if enabled
        poller: Option<JoinHandle<()>>,
    },
    Leaving,
}

impl Lifecycle {
    const fn state(&self) -> ChannelState {
        match self {
            Self::Left => ChannelState::Left,
            Self::Joining => ChannelState::Joining,
            Self::Joined { .. } => ChannelState::Joined,
            Self::Leaving => ChannelState::Leaving,
        }
    }
}

/// Member snapshot of a channel, shared with the background refresh task
struct Roster {
    ctx: Arc<Context>,
    path: String,
    /// Members found by the last successful discovery, replaced whole on each refresh
    snapshot: RwLock<Arc<[Member]>>,
    /// Published every time a member's display name or path in the snapshot changes
    updates: watch::Sender<Arc<[Member]>>,
}

impl Roster {
    /// Rediscover the channel's members and replace the snapshot with the result. A failed
    /// discovery leaves the previous snapshot in place
    async fn refresh(&self) -> Result<Arc<[Member]>, DiscoveryError> {
        let members: Arc<[Member]> = self.ctx.discover_members(&self.path).await?.into();

        let changed = {
            let mut snapshot = self.snapshot.write();
            let changed = !same_members(&snapshot, &members);
            *snapshot = members.clone();
            changed
        };

        if changed {
            log::debug!("Members of {} are now {:?}", self.path, names(&members));
            self.updates.send_replace(members.clone());
        }

        Ok(members)
    }

    fn current(&self) -> Arc<[Member]> {
        self.snapshot.read().clone()
    }
}

/// A group chat among every participant joined beneath the same path in the namespace
pub struct Channel {
    roster: Arc<Roster>,
    state: Mutex<Lifecycle>,
    /// Sending half handed to the message endpoint published on each join
    inbound_tx: mpsc::UnboundedSender<Message>,
    /// Receiving half, taken by the first call to [Channel::messages]
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl Channel {
    /// Create a channel for the members found beneath `path`, without joining it
    pub fn new(ctx: Arc<Context>, path: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (updates, _) = watch::channel(Arc::<[Member]>::from(Vec::new()));

        Self {
            roster: Arc::new(Roster {
                ctx,
                path: path.into(),
                snapshot: RwLock::new(Arc::from(Vec::new())),
                updates,
            }),
            state: Mutex::new(Lifecycle::Left),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    /// Path in the namespace that members of this channel are mounted beneath
    pub fn path(&self) -> &str {
        &self.roster.path
    }

    pub fn state(&self) -> ChannelState {
        self.state.lock().state()
    }

    /// Locked name that this participant is published on while joined
    pub fn locked_name(&self) -> Option<String> {
        match &*self.state.lock() {
            Lifecycle::Joined { name, .. } => Some(name.clone()),
            _ => None,
        }
    }

    /// Display name of the local participant
    pub fn user_name(&self) -> String {
        self.roster.ctx.user_name()
    }

    /// Claim a locked name beneath the channel's path and publish a message endpoint on it that
    /// accepts calls from anyone.
    ///
    /// If publishing fails, the claimed name is deleted again before the error is returned, and
    /// the channel is back in the [Left](ChannelState::Left) state. The same holds if the returned
    /// future is dropped before it completes, in which case the claimed name is released in the
    /// background
    pub async fn join(&self) -> Result<(), ChannelError> {
        let ctx = &self.roster.ctx;
        {
            let mut state = self.state.lock();
            if !matches!(*state, Lifecycle::Left) {
                return Err(ChannelError::InvalidState(state.state()));
            }
            // Nobody could administer a name locked to no patterns, not even its claimant
            if ctx.principal.default_patterns().is_empty() {
                return Err(ChannelError::NoIdentity);
            }
            *state = Lifecycle::Joining;
        }

        let mut pending = PendingJoin {
            state: &self.state,
            ctx,
            claimed: None,
            done: false,
        };

        let name = ctx
            .acquire_locked_name(self.path(), &mut pending.claimed)
            .await?;

        let server = ChatServer::new(ctx.principal.clone(), self.inbound_tx.clone());
        if let Err(e) = ctx.publish_endpoint(&name, server).await {
            log::error!("Failed to publish message endpoint on {}: {}", name, e);
            pending.release().await;
            return Err(ChannelError::PublishFailed(e));
        }

        log::info!("Joined {} as {}", self.path(), name);
        let poller = ctx
            .cfg
            .poll_interval
            .map(|period| spawn_poller(self.roster.clone(), period));
        pending.complete(Lifecycle::Joined { name, poller });
        Ok(())
    }

    /// Stop serving the message endpoint and delete the locked name. Both steps are attempted
    /// even if the first fails or times out, and the channel always ends up
    /// [Left](ChannelState::Left)
    pub async fn leave(&self) -> Result<(), ChannelError> {
        let (name, poller) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, Lifecycle::Leaving) {
                Lifecycle::Joined { name, poller } => (name, poller),
                other => {
                    let current = other.state();
                    *state = other;
                    return Err(ChannelError::InvalidState(current));
                }
            }
        };

        if let Some(poller) = poller {
            poller.abort();
        }

        let ctx = &self.roster.ctx;
        let unpublished = ctx.unpublish_endpoint(&name).await;
        let deleted = ctx.release_locked_name(&name).await;
        *self.state.lock() = Lifecycle::Left;
        log::info!("Left {}", self.path());

        unpublished.map_err(ChannelError::UnpublishFailed)?;
        deleted.map_err(ChannelError::DeleteFailed)?;
        Ok(())
    }

    /// Discover the current members of the channel, replacing the cached snapshot on success.
    ///
    /// This may be called in any state, the local participant is listed only while joined
    pub async fn members(&self) -> Result<Vec<Member>, ChannelError> {
        let members = self.roster.refresh().await?;
        Ok(members.to_vec())
    }

    /// Members found by the last successful discovery
    pub fn cached_members(&self) -> Arc<[Member]> {
        self.roster.current()
    }

    /// Receiver that is notified each time the channel's members change, as seen by any
    /// discovery
    pub fn member_updates(&self) -> watch::Receiver<Arc<[Member]>> {
        self.roster.updates.subscribe()
    }

    /// Deliver `text` to every member in the cached snapshot, including the local participant if
    /// it was discovered, and return the number of deliveries scheduled. Returns immediately,
    /// failed deliveries are logged and dropped.
    ///
    /// Must be called from within a tokio runtime
    pub fn broadcast(&self, text: &str) -> usize {
        let members = self.roster.current();
        self.roster.ctx.broadcast_message(&members, text)
    }

    /// Deliver `text` to a single member and wait for the call to finish. A member that cannot be
    /// reached is treated as disconnected and the failure is only logged
    pub async fn send_to(&self, member: &Member, text: &str) {
        self.roster.ctx.send_message_to(member, text).await
    }

    /// Deliver `text` to a single member, returning the reason if it could not be delivered
    pub async fn try_send_to(&self, member: &Member, text: &str) -> Result<(), SendError> {
        self.roster.ctx.try_send_message_to(member, text).await
    }

    /// Take the stream of messages received by this channel, in the order they arrived. The
    /// stream can only be taken once, later calls return `None`
    pub fn messages(&self) -> Option<BoxStream<'static, Message>> {
        let mut rx = self.inbound_rx.lock().take()?;
        Some(Box::pin(async_stream::stream! {
            while let Some(msg) = rx.recv().await {
                yield msg;
            }
        }))
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Lifecycle::Joined { name, poller } = self.state.get_mut() {
            log::warn!("Channel dropped while joined, {} will be left mounted", name);
            if let Some(poller) = poller.take() {
                poller.abort();
            }
        }
    }
}

/// A join in progress. Puts the channel back in the [Left](ChannelState::Left) state unless
/// completed, releasing any name claimed so far
struct PendingJoin<'a> {
    state: &'a Mutex<Lifecycle>,
    ctx: &'a Arc<Context>,
    claimed: Option<String>,
    done: bool,
}

impl PendingJoin<'_> {
    /// Delete the claimed name after a failed join
    async fn release(&mut self) {
        if let Some(name) = self.claimed.take() {
            if let Err(e) = self.ctx.release_locked_name(&name).await {
                log::warn!("Failed to release {} after a failed join: {}", name, e);
            }
        }
    }

    fn complete(mut self, joined: Lifecycle) {
        *self.state.lock() = joined;
        self.done = true;
    }
}

impl Drop for PendingJoin<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        *self.state.lock() = Lifecycle::Left;

        let Some(name) = self.claimed.take() else {
            return;
        };
        log::warn!("Join was abandoned after claiming {}, releasing it", name);

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let ctx = self.ctx.clone();
                rt.spawn(async move {
                    // The endpoint may or may not have been published before the join was dropped
                    if let Err(e) = ctx.unpublish_endpoint(&name).await {
                        log::debug!("Nothing to unpublish on {}: {}", name, e);
                    }
                    if let Err(e) = ctx.release_locked_name(&name).await {
                        log::warn!("Failed to release {} after an abandoned join: {}", name, e);
                    }
                });
            }
            Err(_) => log::warn!("No runtime to release {} on, it will be left claimed", name),
        }
    }
}

/// Refresh the roster every `period` until aborted, starting immediately
fn spawn_poller(roster: Arc<Roster>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = roster.refresh().await {
                log::warn!("Failed to refresh members of {}: {}", roster.path, e);
            }
        }
    })
}

fn names(members: &[Member]) -> Vec<&str> {
    members.iter().map(Member::name).collect()
}

/// Check if two snapshots list the same members under the same names
fn same_members(a: &[Member], b: &[Member]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(a, b)| a.name() == b.name() && a.path() == b.path())
}

/// Any error returned by an operation on a [Channel]
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Operation is not valid while the channel is {0}")]
    InvalidState(ChannelState),
    #[error("Cannot join without an identity that other members could recognize")]
    NoIdentity,
    #[error("Failed to claim a name after {attempts} attempts")]
    LockAllocationExhausted { attempts: usize },
    #[error("Failed to publish message endpoint: {0}")]
    PublishFailed(TransportError),
    #[error("Failed to stop message endpoint: {0}")]
    UnpublishFailed(TransportError),
    #[error("Failed to delete claimed name: {0}")]
    DeleteFailed(NamespaceError),
    #[error("Failed to discover members: {0}")]
    DiscoveryFailed(#[from] DiscoveryError),
}
