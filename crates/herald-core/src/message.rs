//! Message and poll-vote shapes exchanged with the messaging collaborator.
//!
//! Cryptographic material (poll secrets, encrypted vote payloads, selected
//! option hashes) is carried as opaque encoded strings. Only the collaborator
//! interprets it.

use serde::{Deserialize, Serialize};

/// Addressing for one message inside a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Chat the message lives in (contact, group, broadcast list).
    pub remote_jid: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    /// Author inside a group chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

impl MessageKey {
    pub fn new(remote_jid: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            remote_jid: remote_jid.into(),
            id: Some(id.into()),
            from_me: false,
            participant: None,
        }
    }

    pub fn from_me(mut self) -> Self {
        self.from_me = true;
        self
    }

    pub fn with_participant(mut self, participant: impl Into<String>) -> Self {
        self.participant = Some(participant.into());
        self
    }

    /// Identity of whoever authored the message.
    ///
    /// Own messages resolve to `me`; group messages to the participant;
    /// direct messages to the chat itself.
    pub fn author(&self, me: &str) -> String {
        if self.from_me {
            return me.to_string();
        }
        self.participant
            .clone()
            .unwrap_or_else(|| self.remote_jid.clone())
    }
}

/// A message as seen by the collaborator (sent, received, or looked up in history).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub key: MessageKey,
    /// `None` when the network has stripped the original content.
    #[serde(default)]
    pub content: Option<MessageContent>,
    /// Seconds since the epoch, as reported by the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Decrypted votes accumulated against a poll creation message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poll_updates: Vec<PollUpdate>,
}

impl WireMessage {
    pub fn new(key: MessageKey, content: MessageContent) -> Self {
        Self {
            key,
            content: Some(content),
            timestamp: None,
            poll_updates: Vec::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.key.id.as_deref()
    }

    /// Poll creation content, if this message is a poll.
    pub fn poll(&self) -> Option<&PollCreation> {
        match &self.content {
            Some(MessageContent::Poll(poll)) => Some(poll),
            _ => None,
        }
    }

    /// Encrypted vote content, if this message is a vote.
    pub fn poll_vote(&self) -> Option<&PollUpdateMessage> {
        match &self.content {
            Some(MessageContent::PollUpdate(vote)) => Some(vote),
            _ => None,
        }
    }
}

/// The subset of message content the scheduler and aggregator care about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageContent {
    Poll(PollCreation),
    PollUpdate(PollUpdateMessage),
    #[serde(other)]
    Other,
}

/// Content of a poll creation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCreation {
    /// The question.
    pub name: String,
    pub options: Vec<String>,
    #[serde(default = "one")]
    pub selectable_count: u32,
    /// Per-message secret from the message metadata; required to decrypt votes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_secret: Option<String>,
}

fn one() -> u32 {
    1
}

/// An encrypted vote referencing its poll creation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUpdateMessage {
    pub poll_creation_message_key: MessageKey,
    pub vote: EncryptedVote,
    #[serde(default)]
    pub sender_timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedVote {
    pub enc_payload: String,
    pub enc_iv: String,
}

/// Everything the collaborator needs to decrypt one vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteKeyMaterial {
    pub poll_creator_jid: String,
    pub poll_msg_id: String,
    pub poll_enc_key: String,
    pub voter_jid: String,
}

/// A decrypted vote: the hashes of the options the voter selected.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedVote {
    pub selected_options: Vec<String>,
}

/// One decrypted vote folded into a poll's accumulated vote list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUpdate {
    /// Key of the vote message itself; identifies the vote for de-duplication.
    pub poll_update_message_key: MessageKey,
    pub vote: DecryptedVote,
    #[serde(default)]
    pub sender_timestamp_ms: i64,
}

/// Aggregated voters for one poll option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionVotes {
    pub name: String,
    pub voters: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_prefers_me_then_participant_then_chat() {
        let dm = MessageKey::new("123@s.whatsapp.net", "A1");
        assert_eq!(dm.author("me@s"), "123@s.whatsapp.net");

        let group = MessageKey::new("g1@g.us", "A2").with_participant("456@s.whatsapp.net");
        assert_eq!(group.author("me@s"), "456@s.whatsapp.net");

        let own = MessageKey::new("g1@g.us", "A3").from_me();
        assert_eq!(own.author("me@s"), "me@s");
    }

    #[test]
    fn poll_content_parses_from_camel_case_json() {
        let json = r#"{
            "key": {"remoteJid": "g1@g.us", "id": "P1", "fromMe": true},
            "content": {"type": "poll", "name": "Lunch?", "options": ["A", "B"], "messageSecret": "c2VjcmV0"}
        }"#;
        let msg: WireMessage = serde_json::from_str(json).unwrap();
        let poll = msg.poll().expect("poll content");
        assert_eq!(poll.name, "Lunch?");
        assert_eq!(poll.selectable_count, 1);
        assert_eq!(poll.message_secret.as_deref(), Some("c2VjcmV0"));
        assert!(msg.poll_updates.is_empty());
    }

    #[test]
    fn unknown_content_type_is_other() {
        let json = r#"{"key": {"remoteJid": "c@s", "id": "X"}, "content": {"type": "imageMessage"}}"#;
        let msg: WireMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.content, Some(MessageContent::Other));
        assert!(msg.poll().is_none());
        assert!(msg.poll_vote().is_none());
    }
}
