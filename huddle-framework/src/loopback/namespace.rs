use std::{collections::BTreeSet, time::Duration};

use futures::stream::BoxStream;

use super::{may_create, normalize, take_injected, LoopbackClient, Node, Shared, NAME_SEPARATOR};
use crate::{
    model::{Permissions, Tags},
    net::{GlobReply, MountEntry, Namespace, NamespaceError},
};

/// Trailing pattern component that matches every child of a name
const WILDCARD: &str = "*";

impl Shared {
    /// List every name matching `pattern` that `caller` is allowed to see
    fn list(&self, pattern: &str, caller: &[String]) -> Vec<GlobReply> {
        let table = self.table.lock();
        let entry = |name: String, node: Option<&Node>| match node {
            Some(node) if !readable(node, caller) => GlobReply::Error {
                error: NamespaceError::NoAccess(name.clone()),
                name,
            },
            _ => GlobReply::Entry(MountEntry {
                servers: node.map(|n| n.servers.clone()).unwrap_or_default(),
                name,
            }),
        };

        let parent = match pattern.strip_suffix(WILDCARD) {
            Some(parent) if parent.is_empty() || parent.ends_with(NAME_SEPARATOR) => {
                parent.trim_end_matches(NAME_SEPARATOR)
            }
            _ => {
                return table
                    .get(pattern)
                    .map(|node| entry(pattern.to_owned(), Some(node)))
                    .into_iter()
                    .collect()
            }
        };

        if let Some(perms) = table.get(parent).and_then(|n| n.perms.as_ref()) {
            if !perms.allows(Tags::READ, caller) {
                return vec![GlobReply::Error {
                    name: parent.to_owned(),
                    error: NamespaceError::NoAccess(parent.to_owned()),
                }];
            }
        }

        let prefix = match parent.is_empty() {
            true => String::new(),
            false => format!("{}{}", parent, NAME_SEPARATOR),
        };

        // Names deeper than one level imply a child even when it has no node of its own
        let children = table
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split(NAME_SEPARATOR).next())
            .filter(|child| !child.is_empty())
            .collect::<BTreeSet<_>>();

        children
            .into_iter()
            .map(|child| {
                let name = format!("{}{}", prefix, child);
                let node = table.get(&name);
                entry(name, node)
            })
            .collect()
    }
}

fn readable(node: &Node, caller: &[String]) -> bool {
    node.perms
        .as_ref()
        .map_or(true, |p| p.allows(Tags::RESOLVE, caller))
}

#[async_trait::async_trait]
impl Namespace for LoopbackClient {
    async fn set_permissions(&self, name: &str, perms: Permissions) -> Result<(), NamespaceError> {
        let name = normalize(name);
        let caller = self.principal.blessing_names();

        if take_injected(&self.net.conflicts, &caller) {
            return Err(NamespaceError::Conflict(name.to_owned()));
        }

        let mut table = self.net.table.lock();
        match table.get_mut(name) {
            Some(node) => {
                if let Some(existing) = &node.perms {
                    if !existing.allows(Tags::ADMIN, &caller) {
                        return Err(NamespaceError::Conflict(name.to_owned()));
                    }
                }
                node.perms = Some(perms);
            }
            None => {
                if !may_create(&table, name, &caller) {
                    return Err(NamespaceError::NoAccess(name.to_owned()));
                }
                table.insert(
                    name.to_owned(),
                    Node {
                        perms: Some(perms),
                        servers: Vec::new(),
                    },
                );
            }
        }

        Ok(())
    }

    async fn glob(
        &self,
        pattern: &str,
        timeout: Duration,
    ) -> Result<BoxStream<'static, GlobReply>, NamespaceError> {
        let net = self.net.clone();
        let caller = self.principal.blessing_names();
        let pattern = normalize(pattern).to_owned();
        let delay = *self.net.glob_delay.lock();

        Ok(Box::pin(async_stream::stream! {
            let delayed = match delay {
                Some(delay) => tokio::time::timeout(timeout, tokio::time::sleep(delay)).await.is_ok(),
                None => true,
            };

            if delayed {
                for reply in net.list(&pattern, &caller) {
                    yield reply;
                }
            } else {
                yield GlobReply::Error {
                    name: pattern.clone(),
                    error: NamespaceError::Timeout,
                };
            }
        }))
    }

    async fn delete(&self, name: &str, delete_subtree: bool) -> Result<(), NamespaceError> {
        let name = normalize(name);
        let caller = self.principal.blessing_names();
        let prefix = format!("{}{}", name, NAME_SEPARATOR);

        if take_injected(&self.net.failing_deletes, &caller) {
            return Err(NamespaceError::Unavailable(format!("deletion of {} was refused", name)));
        }

        let mut table = self.net.table.lock();
        let has_children = table.keys().any(|k| k.starts_with(&prefix));

        match table.get(name) {
            None if !has_children => return Ok(()),
            Some(Node {
                perms: Some(perms), ..
            }) if !perms.allows(Tags::ADMIN, &caller) => {
                return Err(NamespaceError::NoAccess(name.to_owned()))
            }
            _ => (),
        }

        if has_children && !delete_subtree {
            return Err(NamespaceError::NotEmpty(name.to_owned()));
        }

        table.remove(name);
        table.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }
}
