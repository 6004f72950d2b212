use async_trait::async_trait;
use thiserror::Error;

use crate::message::{DecryptedVote, EncryptedVote, OptionVotes, VoteKeyMaterial, WireMessage};
use crate::outbound::OutboundContent;

/// Errors reported by a messaging backend.
#[derive(Debug, Error)]
pub enum MessengerError {
    /// There is no live session with the messaging network.
    #[error("Not connected to the messaging network")]
    NotConnected,

    /// The network rejected or failed to deliver a message.
    #[error("Send failed: {0}")]
    Send(String),

    /// A vote could not be decrypted with the supplied key material.
    #[error("Vote decryption failed: {0}")]
    Decrypt(String),

    /// Message history could not be searched.
    #[error("History lookup failed: {0}")]
    Lookup(String),

    /// Transport-level failure talking to the backend.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// The messaging network as seen by the scheduler and the poll aggregator.
///
/// Implementations must be `Send + Sync`; a single instance is shared behind
/// an `Arc` by the dispatcher, the poll registry and the aggregator.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Whether a live session exists right now. Must not block.
    fn is_connected(&self) -> bool;

    /// Own account identifier, once the session is authenticated.
    fn own_id(&self) -> Option<String>;

    /// Deliver one message and return the message as sent (its key included).
    async fn send(
        &self,
        target: &str,
        content: &OutboundContent,
    ) -> Result<WireMessage, MessengerError>;

    /// Decrypt a single encrypted poll vote.
    async fn decrypt_vote(
        &self,
        vote: &EncryptedVote,
        keys: &VoteKeyMaterial,
    ) -> Result<DecryptedVote, MessengerError>;

    /// Compute the full per-option tally of `poll` over its `poll_updates`.
    async fn aggregate_votes(
        &self,
        poll: &WireMessage,
        me_id: &str,
    ) -> Result<Vec<OptionVotes>, MessengerError>;

    /// Look a message up in the history of `chat`.
    async fn find_message_by_id(
        &self,
        chat: &str,
        id: &str,
    ) -> Result<Option<WireMessage>, MessengerError>;
}
