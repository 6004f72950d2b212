//! `Messenger` backend that talks JSON over HTTP to a sidecar process owning
//! the live messaging session.
//!
//! Sidecar routes:
//!
//! | Method | Path                          | Body / reply                          |
//! |--------|-------------------------------|---------------------------------------|
//! | GET    | `/status`                     | `{connected, ownId}`                  |
//! | POST   | `/send`                       | `{target, content}` → message as sent |
//! | POST   | `/votes/decrypt`              | `{vote, keys}` → decrypted vote       |
//! | POST   | `/votes/aggregate`            | `{poll, meId}` → per-option voters    |
//! | GET    | `/chats/{chat}/messages/{id}` | message, or 404                       |
//!
//! A 503 from the sidecar means it has no live session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use herald_core::config::BridgeConfig;
use herald_core::message::{
    DecryptedVote, EncryptedVote, OptionVotes, VoteKeyMaterial, WireMessage,
};
use herald_core::outbound::OutboundContent;
use herald_core::{Messenger, MessengerError};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeStatus {
    connected: bool,
    #[serde(default)]
    own_id: Option<String>,
}

pub struct BridgeMessenger {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    connected: AtomicBool,
    own_id: RwLock<Option<String>>,
}

impl BridgeMessenger {
    pub fn new(config: &BridgeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("bridge.base_url is not a base URL: {}", config.base_url);
        }
        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
            connected: AtomicBool::new(false),
            own_id: RwLock::new(None),
        })
    }

    /// Query `/status` and cache the result. On transport failure the
    /// session is considered down.
    pub async fn refresh_status(&self) -> bool {
        let status = match self.get_json::<BridgeStatus>(&["status"]).await {
            Ok(s) => s,
            Err(e) => {
                debug!("bridge status unavailable: {e}");
                BridgeStatus {
                    connected: false,
                    own_id: None,
                }
            }
        };
        let was = self.connected.swap(status.connected, Ordering::SeqCst);
        if was != status.connected {
            if status.connected {
                info!(own_id = ?status.own_id, "messaging session connected");
            } else {
                warn!("messaging session lost");
            }
        }
        if let Ok(mut own) = self.own_id.write() {
            if status.own_id.is_some() || !status.connected {
                *own = status.own_id;
            }
        }
        status.connected
    }

    /// Refresh the cached status every `every` until `shutdown` broadcasts `true`.
    pub async fn run_status_poller(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.refresh_status().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("bridge status poller stopping");
                        break;
                    }
                }
            }
        }
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new(), so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, MessengerError> {
        let resp = self
            .authorize(self.client.get(self.url(segments)))
            .send()
            .await
            .map_err(transport)?;
        read_json(resp, MessengerError::Transport).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: serde_json::Value,
        fail: fn(String) -> MessengerError,
    ) -> Result<T, MessengerError> {
        let resp = self
            .authorize(self.client.post(self.url(segments)).json(&body))
            .send()
            .await
            .map_err(transport)?;
        read_json(resp, fail).await
    }
}

fn transport(e: reqwest::Error) -> MessengerError {
    MessengerError::Transport(e.to_string())
}

async fn read_json<T: DeserializeOwned>(
    resp: reqwest::Response,
    fail: fn(String) -> MessengerError,
) -> Result<T, MessengerError> {
    let status = resp.status();
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(MessengerError::NotConnected);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(fail(format!("bridge returned {status}: {body}")));
    }
    resp.json::<T>().await.map_err(transport)
}

#[async_trait]
impl Messenger for BridgeMessenger {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn own_id(&self) -> Option<String> {
        self.own_id.read().ok().and_then(|id| id.clone())
    }

    async fn send(
        &self,
        target: &str,
        content: &OutboundContent,
    ) -> Result<WireMessage, MessengerError> {
        self.post_json(
            &["send"],
            json!({ "target": target, "content": content }),
            MessengerError::Send,
        )
        .await
    }

    async fn decrypt_vote(
        &self,
        vote: &EncryptedVote,
        keys: &VoteKeyMaterial,
    ) -> Result<DecryptedVote, MessengerError> {
        self.post_json(
            &["votes", "decrypt"],
            json!({ "vote": vote, "keys": keys }),
            MessengerError::Decrypt,
        )
        .await
    }

    async fn aggregate_votes(
        &self,
        poll: &WireMessage,
        me_id: &str,
    ) -> Result<Vec<OptionVotes>, MessengerError> {
        self.post_json(
            &["votes", "aggregate"],
            json!({ "poll": poll, "meId": me_id }),
            MessengerError::Transport,
        )
        .await
    }

    async fn find_message_by_id(
        &self,
        chat: &str,
        id: &str,
    ) -> Result<Option<WireMessage>, MessengerError> {
        let resp = self
            .authorize(self.client.get(self.url(&["chats", chat, "messages", id])))
            .send()
            .await
            .map_err(transport)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(resp, MessengerError::Lookup).await.map(Some)
    }
}
