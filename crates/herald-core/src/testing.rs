//! In-memory [`Messenger`] used by tests across the workspace.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::message::{
    DecryptedVote, EncryptedVote, MessageContent, MessageKey, OptionVotes, PollCreation,
    VoteKeyMaterial, WireMessage,
};
use crate::messenger::{Messenger, MessengerError};
use crate::outbound::OutboundContent;

/// Records every send, fails sends to selected targets, and aggregates votes
/// by counting, per option, the voters whose latest vote selected it.
///
/// "Encryption" here is the identity: `enc_payload` is a comma-separated list
/// of selected option names.
pub struct RecordingMessenger {
    connected: AtomicBool,
    me: String,
    next_id: AtomicU64,
    sent: Mutex<Vec<(String, OutboundContent)>>,
    failing_targets: Mutex<HashSet<String>>,
    history: Mutex<HashMap<(String, String), WireMessage>>,
    decrypt_calls: AtomicU64,
    aggregate_calls: AtomicU64,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            me: "me@s.whatsapp.net".to_string(),
            next_id: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
            failing_targets: Mutex::new(HashSet::new()),
            history: Mutex::new(HashMap::new()),
            decrypt_calls: AtomicU64::new(0),
            aggregate_calls: AtomicU64::new(0),
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every send to `target` fails from now on.
    pub fn fail_target(&self, target: &str) {
        self.failing_targets
            .lock()
            .unwrap()
            .insert(target.to_string());
    }

    /// Make `msg` findable through `find_message_by_id`.
    pub fn put_history(&self, msg: WireMessage) {
        let id = msg.id().unwrap_or_default().to_string();
        self.history
            .lock()
            .unwrap()
            .insert((msg.key.remote_jid.clone(), id), msg);
    }

    pub fn sent(&self) -> Vec<(String, OutboundContent)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, target: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .count()
    }

    pub fn decrypt_calls(&self) -> u64 {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    pub fn aggregate_calls(&self) -> u64 {
        self.aggregate_calls.load(Ordering::SeqCst)
    }
}

impl Default for RecordingMessenger {
    fn default() -> Self {
        Self::new()
    }
}

/// A poll creation message as the network would hand it back.
pub fn poll_message(chat: &str, id: &str, question: &str, options: &[&str]) -> WireMessage {
    WireMessage::new(
        MessageKey::new(chat, id).from_me(),
        MessageContent::Poll(PollCreation {
            name: question.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            selectable_count: 1,
            message_secret: Some(format!("secret-{id}")),
        }),
    )
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn own_id(&self) -> Option<String> {
        Some(self.me.clone())
    }

    async fn send(
        &self,
        target: &str,
        content: &OutboundContent,
    ) -> Result<WireMessage, MessengerError> {
        if !self.is_connected() {
            return Err(MessengerError::NotConnected);
        }
        if self.failing_targets.lock().unwrap().contains(target) {
            return Err(MessengerError::Send(format!("delivery to {target} refused")));
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), content.clone()));

        let id = format!("MSG{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let key = MessageKey::new(target, id.clone()).from_me();
        let msg = match content {
            OutboundContent::Poll {
                name,
                values,
                selectable_count,
            } => WireMessage::new(
                key,
                MessageContent::Poll(PollCreation {
                    name: name.clone(),
                    options: values.clone(),
                    selectable_count: *selectable_count,
                    message_secret: Some(format!("secret-{id}")),
                }),
            ),
            _ => WireMessage::new(key, MessageContent::Other),
        };
        Ok(msg)
    }

    async fn decrypt_vote(
        &self,
        vote: &EncryptedVote,
        keys: &VoteKeyMaterial,
    ) -> Result<DecryptedVote, MessengerError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if keys.poll_enc_key.is_empty() {
            return Err(MessengerError::Decrypt("empty key".to_string()));
        }
        Ok(DecryptedVote {
            selected_options: vote
                .enc_payload
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    async fn aggregate_votes(
        &self,
        poll: &WireMessage,
        _me_id: &str,
    ) -> Result<Vec<OptionVotes>, MessengerError> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        let creation = poll
            .poll()
            .ok_or_else(|| MessengerError::Lookup("not a poll".to_string()))?;

        // Latest vote per voter wins.
        let mut latest: HashMap<String, (i64, &DecryptedVote)> = HashMap::new();
        for update in &poll.poll_updates {
            let voter = update.poll_update_message_key.author(&self.me);
            match latest.get(&voter) {
                Some((ts, _)) if *ts > update.sender_timestamp_ms => {}
                _ => {
                    latest.insert(voter, (update.sender_timestamp_ms, &update.vote));
                }
            }
        }

        Ok(creation
            .options
            .iter()
            .map(|option| {
                let mut voters: Vec<String> = latest
                    .iter()
                    .filter(|(_, (_, vote))| vote.selected_options.contains(option))
                    .map(|(voter, _)| voter.clone())
                    .collect();
                voters.sort();
                OptionVotes {
                    name: option.clone(),
                    voters,
                }
            })
            .collect())
    }

    async fn find_message_by_id(
        &self,
        chat: &str,
        id: &str,
    ) -> Result<Option<WireMessage>, MessengerError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(&(chat.to_string(), id.to_string()))
            .cloned())
    }
}
