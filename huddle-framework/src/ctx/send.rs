use std::sync::Arc;

use crate::{
    model::{BlessingPattern, Member},
    msg::{Request, SendMessage},
    net::TransportError,
    Context, ToBytes, ToBytesError,
};

impl Context {
    /// Deliver `text` to a single member, only completing the call if the server at the member's
    /// path presents the blessings it was discovered with
    pub(crate) async fn try_send_message_to(&self, member: &Member, text: &str) -> Result<(), SendError> {
        let payload = SendMessage {
            text: text.to_owned(),
        }
        .encode_to_vec()?;

        let allowed = member
            .blessings()
            .iter()
            .map(|b| BlessingPattern::from(b.as_str()))
            .collect::<Vec<_>>();
        let allowed = (!allowed.is_empty()).then_some(allowed.as_slice());

        self.transport
            .call(
                member.path(),
                SendMessage::METHOD,
                payload.into(),
                allowed,
                self.cfg.call_timeout,
            )
            .await?;

        Ok(())
    }

    /// Deliver `text` to a single member, logging instead of returning any failure so that a
    /// member who disconnected without leaving is simply passed over
    pub(crate) async fn send_message_to(&self, member: &Member, text: &str) {
        if let Err(e) = self.try_send_message_to(member, text).await {
            log::debug!(
                "Failed to send message to {} at {}: {}",
                member.name(),
                member.path(),
                e
            );
        }
    }

    /// Schedule an independent delivery of `text` to every member in `members` and return the
    /// number of deliveries scheduled without waiting for any of them.
    ///
    /// Deliveries run concurrently, so two messages broadcast back to back may reach a member out
    /// of order. Must be called from within a tokio runtime
    pub(crate) fn broadcast_message(self: &Arc<Self>, members: &[Member], text: &str) -> usize {
        let text: Arc<str> = Arc::from(text);
        for member in members.iter().cloned() {
            let ctx = self.clone();
            let text = text.clone();
            tokio::spawn(async move {
                ctx.send_message_to(&member, &text).await;
            });
        }

        members.len()
    }
}

/// Any error that prevents a message from reaching a member
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Member is unreachable: {0}")]
    MemberUnreachable(TransportError),
    #[error("Member's server did not present the expected blessings: {0}")]
    IdentityMismatch(TransportError),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] ToBytesError),
}

impl From<TransportError> for SendError {
    fn from(value: TransportError) -> Self {
        match value {
            e @ TransportError::IdentityMismatch { .. } => Self::IdentityMismatch(e),
            e => Self::MemberUnreachable(e),
        }
    }
}
