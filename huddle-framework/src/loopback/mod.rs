//! An in-process network providing both a [Namespace](crate::net::Namespace) and a
//! [Transport](crate::net::Transport), so that any number of participants in one process can chat
//! without a mount table or RPC servers
//!
//! Every participant connects its own [LoopbackClient] to a shared [LoopbackNetwork], which acts
//! as both the mount table and the network between their servers. The network can also be told to
//! misbehave, refusing claims and publishes or cutting servers off, to exercise how channels cope
//! with members that fail.

mod namespace;
mod transport;

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::{
    model::{Permissions, Tags},
    net::{
        Authorizer, Dispatcher, MountEntry, MountedServer, NamespaceError, Principal,
        NAME_SEPARATOR,
    },
    ChannelConfig, Context,
};

/// Mount table root that [LoopbackNetwork::default] answers to
pub const DEFAULT_ROOT: &str = "/loopback";

/// A shared in-process mount table and network
#[derive(Clone, Debug)]
pub struct LoopbackNetwork {
    inner: Arc<Shared>,
}

/// A single participant's connection to a [LoopbackNetwork], acting with the identity of its
/// principal
#[derive(Clone, Debug)]
pub struct LoopbackClient {
    net: Arc<Shared>,
    principal: Arc<dyn Principal>,
}

/// A name in the mount table
#[derive(Clone, Debug, Default)]
struct Node {
    perms: Option<Permissions>,
    servers: Vec<MountedServer>,
}

/// A published server that calls are delivered to
struct Endpoint {
    /// Name that the server was published on
    name: String,
    /// Blessings of the principal that published the server
    owner: Vec<String>,
    dispatcher: Arc<dyn Dispatcher>,
    authorizer: Authorizer,
}

/// Failure injected for calls to a single endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    /// Calls fail as if the process behind the endpoint had exited
    Severed,
    /// Calls never complete
    Stalled,
}

/// State shared by every client of a network
struct Shared {
    root: String,
    table: Mutex<BTreeMap<String, Node>>,
    /// Published servers by endpoint address
    endpoints: DashMap<String, Arc<Endpoint>>,
    next_endpoint: AtomicU64,
    faults: DashMap<String, Fault>,
    /// Number of claims still to be refused, by the first blessing of the claimant
    conflicts: DashMap<String, usize>,
    /// Number of publishes still to be refused, by the first blessing of the publisher
    failing_publishes: DashMap<String, usize>,
    failing_unpublishes: DashMap<String, usize>,
    failing_deletes: DashMap<String, usize>,
    glob_delay: Mutex<Option<Duration>>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl LoopbackNetwork {
    /// Create an empty network whose mount table is reachable at `root`
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Shared {
                root: root.into(),
                table: Mutex::new(BTreeMap::new()),
                endpoints: DashMap::new(),
                next_endpoint: AtomicU64::new(1),
                faults: DashMap::new(),
                conflicts: DashMap::new(),
                failing_publishes: DashMap::new(),
                failing_unpublishes: DashMap::new(),
                failing_deletes: DashMap::new(),
                glob_delay: Mutex::new(None),
            }),
        }
    }

    pub fn root(&self) -> &str {
        &self.inner.root
    }

    /// Connect to the mount table at `mounttable` as `principal`, failing if this network does
    /// not serve that root
    pub fn connect(
        &self,
        mounttable: &str,
        principal: Arc<dyn Principal>,
    ) -> Result<LoopbackClient, NamespaceError> {
        if mounttable != self.inner.root {
            return Err(NamespaceError::Unavailable(format!(
                "no mount table is served at {}",
                mounttable
            )));
        }

        Ok(self.client(principal))
    }

    /// Connect to this network as `principal`
    pub fn client(&self, principal: Arc<dyn Principal>) -> LoopbackClient {
        LoopbackClient {
            net: self.inner.clone(),
            principal,
        }
    }

    /// Create a [Context] for `principal` that uses this network as both its namespace and its
    /// transport
    pub fn context(&self, principal: Arc<dyn Principal>, cfg: ChannelConfig) -> Arc<Context> {
        let client = Arc::new(self.client(principal.clone()));
        Context::new(principal, client.clone(), client, cfg)
    }

    /// Refuse the next `count` claims made by the principal whose first blessing is `blessing`
    /// as if every candidate name were already taken
    pub fn inject_conflicts(&self, blessing: &str, count: usize) {
        self.inner.conflicts.insert(blessing.to_owned(), count);
    }

    /// Refuse the next publish made by the principal whose first blessing is `blessing`
    pub fn fail_next_publish(&self, blessing: &str) {
        add_injected(&self.inner.failing_publishes, blessing);
    }

    /// Refuse the next unpublish made by the principal whose first blessing is `blessing`
    pub fn fail_next_unpublish(&self, blessing: &str) {
        add_injected(&self.inner.failing_unpublishes, blessing);
    }

    /// Refuse the next delete made by the principal whose first blessing is `blessing`
    pub fn fail_next_delete(&self, blessing: &str) {
        add_injected(&self.inner.failing_deletes, blessing);
    }

    /// Make every server mounted at `name` unreachable while leaving its mount entry in place,
    /// returning the number of servers affected
    pub fn sever(&self, name: &str) -> usize {
        self.inner.set_fault(name, Fault::Severed)
    }

    /// Make every call to a server mounted at `name` hang until the caller's timeout, returning
    /// the number of servers affected
    pub fn stall(&self, name: &str) -> usize {
        self.inner.set_fault(name, Fault::Stalled)
    }

    /// Delay every listing of the mount table by `delay`
    pub fn set_glob_delay(&self, delay: Option<Duration>) {
        *self.inner.glob_delay.lock() = delay;
    }

    /// Permissions attached to `name`, if it exists and has any
    pub fn permissions(&self, name: &str) -> Option<Permissions> {
        self.inner
            .table
            .lock()
            .get(normalize(name))
            .and_then(|n| n.perms.clone())
    }

    /// Mount entry for `name`, if it exists
    pub fn mount_entry(&self, name: &str) -> Option<MountEntry> {
        let name = normalize(name);
        self.inner.table.lock().get(name).map(|n| MountEntry {
            name: name.to_owned(),
            servers: n.servers.clone(),
        })
    }

    /// Every name that currently exists in the mount table, in order
    pub fn names(&self) -> Vec<String> {
        self.inner.table.lock().keys().cloned().collect()
    }
}

impl Shared {
    fn set_fault(&self, name: &str, fault: Fault) -> usize {
        let servers = self
            .table
            .lock()
            .get(normalize(name))
            .map(|n| n.servers.clone())
            .unwrap_or_default();

        for server in servers.iter() {
            self.faults.insert(server.endpoint.clone(), fault);
        }

        servers.len()
    }

    fn next_endpoint(&self) -> u64 {
        self.next_endpoint.fetch_add(1, Ordering::Relaxed)
    }
}

fn add_injected(counts: &DashMap<String, usize>, blessing: &str) {
    *counts.entry(blessing.to_owned()).or_insert(0) += 1;
}

/// Consume one injected failure for `blessings` from `counts`, returning true if there was one
fn take_injected(counts: &DashMap<String, usize>, blessings: &[String]) -> bool {
    let Some(key) = blessings.first() else {
        return false;
    };

    match counts.get_mut(key) {
        Some(mut left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

/// Strip leading and trailing separators from a name
fn normalize(name: &str) -> &str {
    name.trim_matches(NAME_SEPARATOR)
}

/// Check if `caller` may create `name` in `table`: the closest existing ancestor with
/// permissions must grant create rights
fn may_create(table: &BTreeMap<String, Node>, name: &str, caller: &[String]) -> bool {
    let mut current = name;
    while let Some((parent, _)) = current.rsplit_once(NAME_SEPARATOR) {
        if let Some(perms) = table.get(parent).and_then(|n| n.perms.as_ref()) {
            return perms.allows(Tags::CREATE, caller);
        }
        current = parent;
    }

    true
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("root", &self.root)
            .field("names", &self.table.lock().len())
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}
