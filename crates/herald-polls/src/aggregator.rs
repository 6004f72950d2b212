use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use herald_core::config::DEFAULT_POLL_HISTORY;
use herald_core::message::{PollUpdate, PollUpdateMessage, VoteKeyMaterial, WireMessage};
use herald_core::{Clock, Messenger};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::{PollError, Result},
    registry::{merge_votes, PollRegistry},
    types::{MessageUpdate, OptionTally, PollSession, PollTally, UpsertBatch},
};

/// Turns inbound vote events into full tally snapshots, one per poll.
///
/// Both inbound shapes end in the same place: the votes are committed to the
/// poll's creation message in the registry, the collaborator recomputes the
/// whole tally, and the result replaces any earlier snapshot of that poll.
/// Since the tally is recomputed and votes are deduplicated on commit,
/// replaying an event is harmless.
pub struct VoteAggregator {
    registry: Arc<PollRegistry>,
    messenger: Arc<dyn Messenger>,
    clock: Arc<dyn Clock>,
    history: DashMap<String, PollTally>,
    max_history: usize,
    /// One lock per poll id, held over commit + aggregate + store so a stale
    /// snapshot never lands last. Dropped once nobody waits on it.
    locks: DashMap<String, Arc<Mutex<()>>>,
    tally_tx: Option<mpsc::Sender<PollTally>>,
}

impl VoteAggregator {
    pub fn new(
        registry: Arc<PollRegistry>,
        messenger: Arc<dyn Messenger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            messenger,
            clock,
            history: DashMap::new(),
            max_history: DEFAULT_POLL_HISTORY,
            locks: DashMap::new(),
            tally_tx: None,
        }
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max.max(1);
        self
    }

    /// Forward every stored tally to `tx` (`try_send`, never blocks).
    pub fn with_tallies(mut self, tx: mpsc::Sender<PollTally>) -> Self {
        self.tally_tx = Some(tx);
        self
    }

    pub fn registry(&self) -> &Arc<PollRegistry> {
        &self.registry
    }

    /// Shape A: status updates carrying decrypted vote deltas.
    ///
    /// Updates without votes are ignored; unresolvable ones are logged and dropped.
    pub async fn handle_update(&self, updates: &[MessageUpdate]) -> Vec<PollTally> {
        let mut tallies = Vec::new();
        for update in updates.iter().filter(|u| !u.poll_updates.is_empty()) {
            match self.apply_update(update).await {
                Ok(tally) => tallies.push(tally),
                Err(e) => warn!(
                    poll_id = update.key.id.as_deref().unwrap_or(""),
                    "poll update dropped: {e}"
                ),
            }
        }
        tallies
    }

    /// Shape B: newly inserted messages. Only real-time (`notify`) batches are
    /// considered; encrypted votes among them are decrypted and applied.
    pub async fn handle_upsert(&self, batch: &UpsertBatch) -> Vec<PollTally> {
        if !batch.is_notify() {
            debug!(kind = %batch.kind, "ignoring non-notify upsert");
            return Vec::new();
        }
        let mut tallies = Vec::new();
        for msg in batch.messages.iter().filter(|m| m.poll_vote().is_some()) {
            match self.apply_vote(msg).await {
                Ok(tally) => tallies.push(tally),
                Err(e) => warn!(vote_id = msg.id().unwrap_or(""), "poll vote dropped: {e}"),
            }
        }
        tallies
    }

    /// All stored tallies, newest first.
    pub fn get_history(&self) -> Vec<PollTally> {
        let mut all: Vec<PollTally> = self.history.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.poll_id.cmp(&b.poll_id))
        });
        all
    }

    pub fn get(&self, poll_id: &str) -> Option<PollTally> {
        self.history.get(poll_id).map(|t| t.clone())
    }

    // --- private helpers ---------------------------------------------------

    async fn apply_update(&self, update: &MessageUpdate) -> Result<PollTally> {
        let poll_id = update.key.id.as_deref().ok_or(PollError::MissingId)?;
        self.per_poll(poll_id, self.apply_update_locked(poll_id, update)).await
    }

    async fn apply_update_locked(&self, poll_id: &str, update: &MessageUpdate) -> Result<PollTally> {
        let session = self
            .registry
            .resolve(poll_id, &[update.key.remote_jid.as_str()])
            .await
            .ok_or_else(|| PollError::UnknownPoll(poll_id.to_string()))?;
        let poll = self.commit(&session, &update.poll_updates);
        self.aggregate_and_store(&session, &poll).await
    }

    async fn apply_vote(&self, msg: &WireMessage) -> Result<PollTally> {
        let Some(vote) = msg.poll_vote() else {
            return Err(PollError::MissingId);
        };
        let creation_key = &vote.poll_creation_message_key;
        let poll_id = creation_key.id.as_deref().ok_or(PollError::MissingId)?;
        self.per_poll(poll_id, self.apply_vote_locked(poll_id, msg, vote)).await
    }

    async fn apply_vote_locked(
        &self,
        poll_id: &str,
        msg: &WireMessage,
        vote: &PollUpdateMessage,
    ) -> Result<PollTally> {
        let creation_key = &vote.poll_creation_message_key;
        let hints = [msg.key.remote_jid.as_str(), creation_key.remote_jid.as_str()];
        let session = self
            .registry
            .resolve(poll_id, &hints)
            .await
            .ok_or_else(|| PollError::UnknownPoll(poll_id.to_string()))?;

        let secret = session
            .creation_message
            .poll()
            .and_then(|p| p.message_secret.clone())
            .ok_or_else(|| PollError::MissingSecret(poll_id.to_string()))?;
        let me = self.messenger.own_id().unwrap_or_default();
        let keys = VoteKeyMaterial {
            poll_creator_jid: creation_key.author(&me),
            poll_msg_id: poll_id.to_string(),
            poll_enc_key: secret,
            voter_jid: msg.key.author(&me),
        };
        let decrypted = self.messenger.decrypt_vote(&vote.vote, &keys).await?;
        debug!(%poll_id, voter = %keys.voter_jid, "vote decrypted");

        let update = PollUpdate {
            poll_update_message_key: msg.key.clone(),
            vote: decrypted,
            sender_timestamp_ms: vote.sender_timestamp_ms,
        };
        let poll = self.commit(&session, std::slice::from_ref(&update));
        self.aggregate_and_store(&session, &poll).await
    }

    /// Run `work` while holding the lock of `poll_id`. Other polls proceed
    /// in parallel, even when this one is stuck on a slow lookup.
    async fn per_poll<T>(&self, poll_id: &str, work: impl Future<Output = T>) -> T {
        let lock = self.locks.entry(poll_id.to_string()).or_default().clone();
        let out = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);
        self.locks.remove_if(poll_id, |_, l| Arc::strong_count(l) == 1);
        out
    }

    /// Commit to the registry; if the session was evicted meanwhile, fold
    /// into a working copy instead.
    fn commit(&self, session: &PollSession, updates: &[PollUpdate]) -> WireMessage {
        self.registry
            .commit_votes(&session.poll_id, updates)
            .unwrap_or_else(|| {
                let mut poll = session.creation_message.clone();
                merge_votes(&mut poll, updates);
                poll
            })
    }

    async fn aggregate_and_store(&self, session: &PollSession, poll: &WireMessage) -> Result<PollTally> {
        let me = self.messenger.own_id().unwrap_or_default();
        let votes = self.messenger.aggregate_votes(poll, &me).await?;
        let tally = PollTally {
            poll_id: session.poll_id.clone(),
            jid: session.chat.clone(),
            question: session.question.clone(),
            results: votes.into_iter().map(OptionTally::from).collect(),
            timestamp: self.clock.now_ms(),
        };

        self.history.insert(tally.poll_id.clone(), tally.clone());
        self.enforce_cap(&tally.poll_id);
        info!(
            poll_id = %tally.poll_id,
            votes = poll.poll_updates.len(),
            "poll tally updated"
        );

        if let Some(ref tx) = self.tally_tx {
            if tx.try_send(tally.clone()).is_err() {
                warn!(poll_id = %tally.poll_id, "tally channel full or closed, notification dropped");
            }
        }
        Ok(tally)
    }

    /// Drop the oldest snapshots beyond `max_history`, never `keep`.
    fn enforce_cap(&self, keep: &str) {
        let excess = self.history.len().saturating_sub(self.max_history);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(i64, String)> = self
            .history
            .iter()
            .filter(|e| e.key() != keep)
            .map(|e| (e.timestamp, e.key().clone()))
            .collect();
        by_age.sort();
        for (_, poll_id) in by_age.into_iter().take(excess) {
            self.history.remove(&poll_id);
        }
    }
}
