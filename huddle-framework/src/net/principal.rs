use crate::model::BlessingPattern;

use super::ServerCall;

/// The identity of the local participant, able to name itself and to read the verified identity
/// of peers that call into it
pub trait Principal: Send + Sync + std::fmt::Debug {
    /// Blessing names presented by the local participant, most preferred first
    fn blessing_names(&self) -> Vec<String>;

    /// Patterns matching the local participant's own blessings, granted exclusive rights on the
    /// names it claims
    fn default_patterns(&self) -> Vec<BlessingPattern> {
        self.blessing_names()
            .into_iter()
            .map(BlessingPattern::from)
            .collect()
    }

    /// Blessing names of the remote end of an inbound call, as verified by the transport
    fn remote_blessing_names(&self, call: &ServerCall) -> Vec<String> {
        call.remote_blessings().to_vec()
    }
}

/// A [Principal] holding a fixed set of blessing names
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticPrincipal {
    blessings: Vec<String>,
}

impl StaticPrincipal {
    pub fn new<I, S>(blessings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blessings: blessings.into_iter().map(Into::into).collect(),
        }
    }
}

impl Principal for StaticPrincipal {
    fn blessing_names(&self) -> Vec<String> {
        self.blessings.clone()
    }
}
