use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::{ClientMessage, ServerMessage, Setup};
use crate::error::LiveResult;

/// Channel capacity for outbound messages.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Channel capacity for inbound messages.
pub const INBOUND_CAPACITY: usize = 256;

/// What the transport reports from the remote side
#[derive(Debug)]
pub enum ChannelEvent {
    Message(ServerMessage),
    /// Peer closed the channel
    Closed(String),
    /// Socket-level failure
    Failed(String),
}

/// Result of a send that never waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Channel full or gone; the message was discarded
    Dropped,
}

/// An open duplex channel to the live service
///
/// Owned exclusively by one session. Dropping it (or calling `close`) closes the
/// underlying connection.
pub struct LiveChannel {
    outbound: Option<mpsc::Sender<ClientMessage>>,
    inbound: mpsc::Receiver<ChannelEvent>,
}

impl LiveChannel {
    pub fn new(outbound: mpsc::Sender<ClientMessage>, inbound: mpsc::Receiver<ChannelEvent>) -> Self {
        Self {
            outbound: Some(outbound),
            inbound,
        }
    }

    /// Fire-and-forget send
    ///
    /// Never awaits capacity: a full or closed channel drops the message.
    pub fn send(&self, message: ClientMessage) -> SendOutcome {
        match &self.outbound {
            Some(tx) => match tx.try_send(message) {
                Ok(()) => SendOutcome::Sent,
                Err(e) => {
                    debug!("Outbound message dropped: {}", e);
                    SendOutcome::Dropped
                }
            },
            None => SendOutcome::Dropped,
        }
    }

    /// Whether outbound messages can currently be delivered
    pub fn is_ready(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Next event from the remote side; `None` once the transport is gone
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.inbound.recv().await
    }

    /// Close the outbound half; the transport closes the socket
    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            info!("Closing live channel");
        }
        self.inbound.close();
    }
}

/// Opens live channels
///
/// Opening is the only suspending transport operation; everything after that is
/// message passing over the returned `LiveChannel`.
#[async_trait::async_trait]
pub trait LiveTransport: Send + Sync {
    /// Open a channel and complete the session setup handshake
    async fn open(&self, setup: Setup) -> LiveResult<LiveChannel>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}
