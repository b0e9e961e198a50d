use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use super::{
    may_create, normalize, take_injected, Endpoint, Fault, LoopbackClient, Node, Shared,
};
use crate::{
    model::{BlessingPattern, Tags},
    net::{
        Authorizer, DispatchError, Dispatcher, ListenSpec, MountedServer, NamespaceError,
        ServerCall, Transport, TransportError,
    },
};

impl Shared {
    /// Servers mounted on `name` that `caller` may resolve
    fn resolve(&self, name: &str, caller: &[String]) -> Result<Vec<MountedServer>, TransportError> {
        let table = self.table.lock();
        let node = table
            .get(name)
            .ok_or_else(|| TransportError::Unreachable(name.to_owned()))?;

        if let Some(perms) = &node.perms {
            if !perms.allows(Tags::RESOLVE, caller) {
                return Err(NamespaceError::NoAccess(name.to_owned()).into());
            }
        }

        match node.servers.is_empty() {
            true => Err(TransportError::Unreachable(name.to_owned())),
            false => Ok(node.servers.clone()),
        }
    }

    /// Open a connection to the server at `endpoint`, returning `None` if nothing is listening
    /// there anymore
    async fn open(&self, endpoint: &str) -> Option<Arc<Endpoint>> {
        let fault = self.faults.get(endpoint).map(|f| *f);
        let found = self.endpoints.get(endpoint).map(|e| e.value().clone());

        match fault {
            Some(Fault::Severed) => None,
            Some(Fault::Stalled) => futures::future::pending().await,
            None => found,
        }
    }
}

impl LoopbackClient {
    async fn call_inner(
        &self,
        name: &str,
        method: &str,
        payload: Bytes,
        allowed_servers: Option<&[BlessingPattern]>,
    ) -> Result<Bytes, TransportError> {
        let caller = self.principal.blessing_names();
        let mut err = TransportError::Unreachable(name.to_owned());

        for server in self.net.resolve(name, &caller)? {
            if let Some(allowed) = allowed_servers {
                let matched = server
                    .blessings
                    .iter()
                    .any(|b| allowed.iter().any(|p| p.is_matched_by(b)));
                if !matched {
                    err = TransportError::IdentityMismatch {
                        name: name.to_owned(),
                        found: server.blessings,
                    };
                    continue;
                }
            }

            let Some(endpoint) = self.net.open(&server.endpoint).await else {
                continue;
            };

            if !endpoint.authorizer.authorize(&caller) {
                return Err(DispatchError::NotAuthorized.into());
            }

            let call = ServerCall::new(method, caller);
            return Ok(endpoint.dispatcher.dispatch(call, payload).await?);
        }

        Err(err)
    }

    async fn server_blessings_inner(&self, name: &str) -> Result<Vec<String>, TransportError> {
        let caller = self.principal.blessing_names();
        for server in self.net.resolve(name, &caller)? {
            if let Some(endpoint) = self.net.open(&server.endpoint).await {
                return Ok(endpoint.owner.clone());
            }
        }

        Err(TransportError::Unreachable(name.to_owned()))
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackClient {
    async fn publish(
        &self,
        name: &str,
        dispatcher: Arc<dyn Dispatcher>,
        authorizer: Authorizer,
        listen: &ListenSpec,
    ) -> Result<(), TransportError> {
        let name = normalize(name);
        let caller = self.principal.blessing_names();

        if take_injected(&self.net.failing_publishes, &caller) {
            return Err(NamespaceError::Unavailable(format!("mount of {} was refused", name)).into());
        }

        let mut table = self.net.table.lock();
        let already = self
            .net
            .endpoints
            .iter()
            .any(|e| e.name == name && e.owner == caller);
        if already {
            return Err(TransportError::AlreadyPublished(name.to_owned()));
        }

        let permitted = match table.get(name) {
            Some(Node {
                perms: Some(perms), ..
            }) => perms.allows(Tags::MOUNT, &caller),
            Some(_) => true,
            None => may_create(&table, name, &caller),
        };
        if !permitted {
            return Err(NamespaceError::NoAccess(name.to_owned()).into());
        }

        let endpoint = format!(
            "@loopback@{}@{}",
            listen.proxy.as_deref().unwrap_or("direct"),
            self.net.next_endpoint()
        );

        self.net.endpoints.insert(
            endpoint.clone(),
            Arc::new(Endpoint {
                name: name.to_owned(),
                owner: caller.clone(),
                dispatcher,
                authorizer,
            }),
        );

        table
            .entry(name.to_owned())
            .or_default()
            .servers
            .push(MountedServer {
                endpoint,
                blessings: caller,
            });

        log::trace!("Published server on {}", name);
        Ok(())
    }

    async fn unpublish(&self, name: &str) -> Result<(), TransportError> {
        let name = normalize(name);
        let caller = self.principal.blessing_names();

        if take_injected(&self.net.failing_unpublishes, &caller) {
            return Err(NamespaceError::Unavailable(format!("unmount of {} was refused", name)).into());
        }

        let owned = self
            .net
            .endpoints
            .iter()
            .filter(|e| e.name == name && e.owner == caller)
            .map(|e| e.key().clone())
            .collect::<Vec<_>>();

        if owned.is_empty() {
            return Err(TransportError::NotPublished(name.to_owned()));
        }

        for endpoint in owned.iter() {
            self.net.endpoints.remove(endpoint);
            self.net.faults.remove(endpoint);
        }

        if let Some(node) = self.net.table.lock().get_mut(name) {
            node.servers.retain(|s| !owned.contains(&s.endpoint));
        }

        log::trace!("Unpublished server on {}", name);
        Ok(())
    }

    async fn call(
        &self,
        name: &str,
        method: &str,
        payload: Bytes,
        allowed_servers: Option<&[BlessingPattern]>,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let name = normalize(name);
        tokio::time::timeout(
            timeout,
            self.call_inner(name, method, payload, allowed_servers),
        )
        .await
        .map_err(|_| TransportError::Timeout(name.to_owned()))?
    }

    async fn server_blessings(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, TransportError> {
        let name = normalize(name);
        tokio::time::timeout(timeout, self.server_blessings_inner(name))
            .await
            .map_err(|_| TransportError::Timeout(name.to_owned()))?
    }
}
