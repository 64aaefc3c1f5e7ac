use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use crate::messages::Message;

/// How the session carrying the message was established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Unsecured,
    Pase,
    Case,
    Group,
}

/// Identity of secure session, supplied by session layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub local_session_id: u16,
    pub peer_session_id: u16,
    pub auth_mode: AuthMode,
}

impl SessionIdentity {
    pub fn new(local_session_id: u16, peer_session_id: u16, auth_mode: AuthMode) -> Self {
        Self {
            local_session_id,
            peer_session_id,
            auth_mode,
        }
    }
}

/// Per call bundle handed to every handler. Created by transport/session layer for each
/// incoming message; the core only reads it.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub session: SessionIdentity,
    pub source_node_id: u64,
    pub fabric_index: u8,
    pub exchange_id: u16,
    pub timestamp: SystemTime,
    /// cancelled when owning exchange is torn down
    cancel: CancellationToken,
}

impl InvocationContext {
    pub fn new(
        session: SessionIdentity,
        source_node_id: u64,
        fabric_index: u8,
        exchange_id: u16,
    ) -> Self {
        Self {
            session,
            source_node_id,
            fabric_index,
            exchange_id,
            timestamp: SystemTime::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Context for message received on established session.
    /// Source node falls back to zero when header does not carry it (secure unicast sessions
    /// identify the peer through the session itself).
    pub fn from_message(message: &Message, session: SessionIdentity, fabric_index: u8) -> Self {
        let ctx = Self::new(
            session,
            message.message_header.source_node().unwrap_or(0),
            fabric_index,
            message.protocol_header.exchange_id,
        );
        log::trace!(
            "context for exchange {} from node {:x} session {}",
            ctx.exchange_id,
            ctx.source_node_id,
            ctx.session.local_session_id
        );
        ctx
    }

    /// Attach cancellation token of owning exchange
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
