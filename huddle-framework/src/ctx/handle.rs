use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    model::Message,
    msg::{Request, SendMessage},
    net::{Authorizer, DispatchError, Dispatcher, Principal, ServerCall, TransportError},
    Context, FromBytes,
};

/// Message endpoint published for a joined channel, pushing every message it receives onto the
/// channel's inbound queue
pub(crate) struct ChatServer {
    principal: Arc<dyn Principal>,
    inbound: UnboundedSender<Message>,
}

impl ChatServer {
    pub fn new(principal: Arc<dyn Principal>, inbound: UnboundedSender<Message>) -> Self {
        Self { principal, inbound }
    }

    /// Handle a message sent by another member
    fn handle_send(&self, call: &ServerCall, req: SendMessage) {
        let sender = self.principal.remote_blessing_names(call);
        let msg = Message::received(&sender, req.text);
        log::trace!("Received message from {}", msg.sender());

        if self.inbound.send(msg).is_err() {
            log::warn!("Dropping received message, the channel's message stream was closed");
        }
    }
}

#[async_trait::async_trait]
impl Dispatcher for ChatServer {
    async fn dispatch(&self, call: ServerCall, payload: Bytes) -> Result<Bytes, DispatchError> {
        match call.method() {
            SendMessage::METHOD => {
                let req = SendMessage::decode_from_slice(&payload)?;
                self.handle_send(&call, req);
                Ok(Bytes::new())
            }
            other => {
                log::error!("Unrecognized method {}", other);
                Err(DispatchError::UnknownMethod(other.to_owned()))
            }
        }
    }
}

impl Context {
    /// Serve `server` on `name` for calls from anyone, giving up after
    /// [call_timeout](crate::ChannelConfig::call_timeout)
    pub(crate) async fn publish_endpoint(
        &self,
        name: &str,
        server: ChatServer,
    ) -> Result<(), TransportError> {
        let publish = self.transport.publish(
            name,
            Arc::new(server),
            Authorizer::AllowEveryone,
            &self.cfg.listen,
        );

        tokio::time::timeout(self.cfg.call_timeout, publish)
            .await
            .map_err(|_| TransportError::Timeout(name.to_owned()))?
    }

    pub(crate) async fn unpublish_endpoint(&self, name: &str) -> Result<(), TransportError> {
        tokio::time::timeout(self.cfg.call_timeout, self.transport.unpublish(name))
            .await
            .map_err(|_| TransportError::Timeout(name.to_owned()))?
    }
}
