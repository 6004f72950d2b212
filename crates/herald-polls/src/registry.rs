use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use herald_core::message::{PollUpdate, WireMessage};
use herald_core::{Clock, Messenger};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::types::{ActivePoll, PollSession};

const HOUR_MS: i64 = 3_600_000;

/// Index of polls whose votes can be interpreted, keyed by poll message id.
///
/// Sessions come from locally sent polls ([`PollRegistry::register`]) or are
/// reconstructed lazily from the collaborator's message history on the first
/// vote ([`PollRegistry::resolve`]). They are evicted only by
/// [`PollRegistry::cleanup`].
pub struct PollRegistry {
    sessions: DashMap<String, PollSession>,
    messenger: Arc<dyn Messenger>,
    clock: Arc<dyn Clock>,
    retention_ms: i64,
}

impl PollRegistry {
    pub fn new(messenger: Arc<dyn Messenger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            messenger,
            clock,
            retention_ms: 24 * HOUR_MS,
        }
    }

    pub fn with_retention_hours(mut self, hours: u64) -> Self {
        self.retention_ms = hours as i64 * HOUR_MS;
        self
    }

    /// Index a poll creation message. Returns `false` (and does nothing)
    /// when the message has no id or is not a poll.
    pub fn register(&self, msg: &WireMessage) -> bool {
        let Some(session) = self.session_from(msg) else {
            debug!("register: message has no id or is not a poll");
            return false;
        };
        info!(poll_id = %session.poll_id, chat = %session.chat, "poll registered");
        self.sessions.insert(session.poll_id.clone(), session);
        true
    }

    pub fn get(&self, poll_id: &str) -> Option<PollSession> {
        self.sessions.get(poll_id).map(|s| s.clone())
    }

    /// Find the session for `poll_id`, searching each chat in `chat_hints`
    /// when it is not indexed. A history hit is cached.
    pub async fn resolve(&self, poll_id: &str, chat_hints: &[&str]) -> Option<PollSession> {
        if let Some(session) = self.get(poll_id) {
            return Some(session);
        }

        let mut searched: Vec<&str> = Vec::with_capacity(chat_hints.len());
        for &chat in chat_hints {
            if chat.is_empty() || searched.contains(&chat) {
                continue;
            }
            searched.push(chat);

            match self.messenger.find_message_by_id(chat, poll_id).await {
                Ok(Some(msg)) => {
                    // Stripped messages are useless for decoding votes.
                    if let Some(session) = self.session_from(&msg) {
                        info!(%poll_id, %chat, "poll recovered from history");
                        // A concurrent register/resolve may have won the race.
                        let entry = self
                            .sessions
                            .entry(poll_id.to_string())
                            .or_insert(session);
                        return Some(entry.clone());
                    }
                    debug!(%poll_id, %chat, "history entry carries no poll content");
                }
                Ok(None) => {}
                Err(e) => warn!(%poll_id, %chat, "history lookup failed: {e}"),
            }
        }
        None
    }

    /// Active polls, newest first.
    pub fn list_active(&self) -> Vec<ActivePoll> {
        let mut polls: Vec<ActivePoll> = self
            .sessions
            .iter()
            .map(|e| ActivePoll {
                id: e.key().clone(),
                created_at: e.created_at,
            })
            .collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        polls
    }

    /// Evict sessions older than the retention window. Returns how many went.
    pub fn cleanup(&self, now_ms: i64) -> usize {
        let cutoff = now_ms - self.retention_ms;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.created_at >= cutoff);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!(evicted, "expired polls evicted");
        }
        evicted
    }

    /// Fold `updates` into the stored creation message, skipping votes that
    /// are already present. Returns the updated message, or `None` when the
    /// poll is not indexed.
    pub fn commit_votes(&self, poll_id: &str, updates: &[PollUpdate]) -> Option<WireMessage> {
        let mut session = self.sessions.get_mut(poll_id)?;
        let added = merge_votes(&mut session.creation_message, updates);
        if added > 0 {
            debug!(%poll_id, added, "votes committed");
        }
        Some(session.creation_message.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run [`cleanup`](Self::cleanup) every `every` until `shutdown` broadcasts `true`.
    pub async fn run_cleanup(&self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately; nothing can be stale yet.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.cleanup(self.clock.now_ms());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("poll cleanup stopping");
                        break;
                    }
                }
            }
        }
    }

    fn session_from(&self, msg: &WireMessage) -> Option<PollSession> {
        let poll_id = msg.id()?.to_string();
        let question = msg.poll()?.name.clone();
        Some(PollSession {
            poll_id,
            chat: msg.key.remote_jid.clone(),
            creation_message: msg.clone(),
            created_at: self.clock.now_ms(),
            question,
        })
    }
}

/// Append the votes in `updates` that `poll` does not already hold.
///
/// A vote is identified by its own message id; votes without one are
/// compared whole.
pub(crate) fn merge_votes(poll: &mut WireMessage, updates: &[PollUpdate]) -> usize {
    let mut added = 0;
    for update in updates {
        let seen = poll.poll_updates.iter().any(|existing| {
            match (&existing.poll_update_message_key.id, &update.poll_update_message_key.id) {
                (Some(a), Some(b)) => a == b,
                _ => existing == update,
            }
        });
        if !seen {
            poll.poll_updates.push(update.clone());
            added += 1;
        }
    }
    added
}
