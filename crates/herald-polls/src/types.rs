use herald_core::message::{MessageKey, OptionVotes, PollUpdate, WireMessage};
use serde::{Deserialize, Serialize};

/// A poll the registry knows how to interpret votes for.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSession {
    pub poll_id: String,
    /// Chat the poll was posted in.
    pub chat: String,
    /// The creation message, including any votes committed back to it.
    pub creation_message: WireMessage,
    pub created_at: i64,
    pub question: String,
}

/// Entry of `GET /polls/active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePoll {
    pub id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionTally {
    pub option: String,
    pub voters: Vec<String>,
    pub count: usize,
}

impl From<OptionVotes> for OptionTally {
    fn from(v: OptionVotes) -> Self {
        Self {
            count: v.voters.len(),
            option: v.name,
            voters: v.voters,
        }
    }
}

/// Latest full tally of one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollTally {
    pub poll_id: String,
    pub jid: String,
    pub question: String,
    pub results: Vec<OptionTally>,
    /// Epoch ms at which the tally was computed.
    pub timestamp: i64,
}

impl PollTally {
    /// Vote count for `option`, zero when absent.
    pub fn count(&self, option: &str) -> usize {
        self.results
            .iter()
            .find(|r| r.option == option)
            .map_or(0, |r| r.count)
    }
}

/// Shape A: a status update against a known poll creation message, carrying
/// already-decrypted votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdate {
    /// Key of the poll creation message.
    pub key: MessageKey,
    #[serde(default)]
    pub poll_updates: Vec<PollUpdate>,
}

/// Shape B: a batch of newly inserted messages, some of which may be
/// encrypted votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertBatch {
    pub messages: Vec<WireMessage>,
    /// `notify` for real-time delivery; anything else is history sync.
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl UpsertBatch {
    pub fn is_notify(&self) -> bool {
        self.kind == "notify"
    }
}
