use std::collections::HashSet;

use futures::StreamExt;
use tokio::time::Instant;

use crate::{
    model::Member,
    net::{join_name, GlobReply, NamespaceError, TransportError},
    Context,
};

/// A name found beneath a channel's path with at least one usable server mounted on it
struct Candidate {
    path: String,
    blessings: Vec<String>,
}

impl Context {
    /// List the members mounted directly beneath `path`, sorted by display name.
    ///
    /// Names with nothing mounted on them (left behind by members that exited without leaving)
    /// and names whose server presents no blessings are skipped, as are names that could not be
    /// listed. Listing and any verification of the candidates share a single
    /// [discovery_timeout](crate::ChannelConfig::discovery_timeout)
    pub(crate) async fn discover_members(&self, path: &str) -> Result<Vec<Member>, DiscoveryError> {
        let deadline = Instant::now() + self.cfg.discovery_timeout;
        let candidates = tokio::time::timeout_at(deadline, self.list_candidates(path))
            .await
            .map_err(|_| DiscoveryError::Timeout)??;

        let members = match self.cfg.verify_members {
            true => self.verify_candidates(candidates, deadline).await,
            false => candidates
                .into_iter()
                .filter(|c| !c.blessings.is_empty())
                .map(|c| Member::new(c.blessings, c.path))
                .collect(),
        };

        Ok(sort_members(members))
    }

    async fn list_candidates(&self, path: &str) -> Result<Vec<Candidate>, DiscoveryError> {
        let pattern = join_name(path, "*");
        let mut replies = self
            .namespace
            .glob(&pattern, self.cfg.discovery_timeout)
            .await?;

        let mut candidates = Vec::new();
        while let Some(reply) = replies.next().await {
            match reply {
                GlobReply::Entry(entry) => {
                    if !entry.has_servers() {
                        log::trace!("Skipping {}, nothing is mounted on it", entry.name);
                        continue;
                    }

                    let blessings = entry.blessing_names().map(<[String]>::to_vec).unwrap_or_default();
                    candidates.push(Candidate {
                        path: entry.name,
                        blessings,
                    });
                }
                GlobReply::Error {
                    error: NamespaceError::Timeout,
                    ..
                } => return Err(DiscoveryError::Timeout),
                GlobReply::Error { name, error } => {
                    log::debug!("Failed to list {}: {}", name, error)
                }
            }
        }

        Ok(candidates)
    }

    /// Replace the blessings of each candidate with the ones its server proves it holds, dropping
    /// every candidate that cannot be reached before `deadline`
    async fn verify_candidates(&self, candidates: Vec<Candidate>, deadline: Instant) -> Vec<Member> {
        let checks = candidates.into_iter().map(|c| async move {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let check = self.transport.server_blessings(&c.path, remaining);
            let verified = tokio::time::timeout_at(deadline, check)
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout(c.path.clone())));

            match verified {
                Ok(blessings) if !blessings.is_empty() => Some(Member::new(blessings, c.path)),
                Ok(_) => {
                    log::debug!("Server at {} presented no blessings", c.path);
                    None
                }
                Err(e) => {
                    log::debug!("Failed to verify member at {}: {}", c.path, e);
                    None
                }
            }
        });

        futures::future::join_all(checks)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Order members by display name and drop any path listed more than once
fn sort_members(mut members: Vec<Member>) -> Vec<Member> {
    members.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.path().cmp(b.path())));

    let mut seen = HashSet::new();
    members.retain(|m| seen.insert(m.path().to_owned()));
    members
}

/// Any error that prevents the members of a channel from being listed
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Timed out listing channel members")]
    Timeout,
    #[error("Failed to list channel members: {0}")]
    Namespace(#[from] NamespaceError),
}
