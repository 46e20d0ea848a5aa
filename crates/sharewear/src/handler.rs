//! Application-side handlers for inbound events.

use std::fmt;
use std::sync::Arc;

use crate::buffer::MarshalContext;
use crate::connection::{ConnectionFailure, SuspendCause};
use crate::events::{MessageEvent, RecordEvent};
use crate::peer::PeerNode;
use crate::transport::Transport;

/// What a handler gets to work with: the live transport and the marshaling
/// context records are decoded through.
#[derive(Clone)]
pub struct HandlerContext {
    transport: Arc<dyn Transport>,
    marshal: MarshalContext,
}

impl HandlerContext {
    pub fn new(transport: Arc<dyn Transport>, marshal: MarshalContext) -> Self {
        Self { transport, marshal }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn marshal(&self) -> &MarshalContext {
        &self.marshal
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("connected", &self.transport.is_connected())
            .field("marshal", &self.marshal)
            .finish()
    }
}

/// Receives events from a [`HandlerDispatcher`](crate::dispatcher::HandlerDispatcher).
///
/// Every method has a no-op default, so implementors override only what
/// they care about. The two `handle_*` methods form a chain of
/// responsibility: returning `Ok(true)` claims the event and stops it from
/// reaching later handlers. Errors count as "not handled".
pub trait WearHandler: Send + Sync {
    /// Called once the dispatcher has a transport.
    fn on_init(&self, _ctx: &HandlerContext) {}

    fn handle_data_event(&self, _ctx: &HandlerContext, _event: &RecordEvent) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn handle_message_event(
        &self,
        _ctx: &HandlerContext,
        _event: &MessageEvent,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn on_peer_connected(&self, _ctx: &HandlerContext, _node: &PeerNode) {}

    fn on_peer_disconnected(&self, _ctx: &HandlerContext, _node: &PeerNode) {}

    fn on_connected(&self, _ctx: &HandlerContext) {}

    fn on_connection_suspended(&self, _ctx: &HandlerContext, _cause: SuspendCause) {}

    fn on_connection_failed(&self, _ctx: &HandlerContext, _failure: &ConnectionFailure) {}
}
