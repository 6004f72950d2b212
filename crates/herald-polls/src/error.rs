use herald_core::MessengerError;
use thiserror::Error;

/// Reasons a vote event could not be turned into a tally.
///
/// None of these are surfaced to callers of the aggregator: the event is
/// logged and dropped.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Message key has no id")]
    MissingId,

    #[error("Unknown poll: {0}")]
    UnknownPoll(String),

    #[error("Poll {0} carries no message secret")]
    MissingSecret(String),

    #[error(transparent)]
    Messenger(#[from] MessengerError),
}

pub type Result<T> = std::result::Result<T, PollError>;
