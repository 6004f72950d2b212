//! Routing from `(category, messageType, payload)` to one [`Messenger::send`].
//!
//! Each supported pair is an entry in a table of payload builders; adding a
//! message type means registering one more builder.

use std::collections::HashMap;
use std::sync::Arc;

use herald_core::message::WireMessage;
use herald_core::outbound::{CarouselCard, InteractiveButton, OutboundContent};
use herald_core::{Messenger, MessengerError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// Seconds a chat's disappearing-messages timer is set to by `disappear_on` (7 days).
pub const DISAPPEAR_ON_SECS: u32 = 604_800;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No builder is registered for this pair. A scheduling misconfiguration.
    #[error("Unsupported dispatch target: {category}/{message_type}")]
    Unsupported {
        category: String,
        message_type: String,
    },

    /// The payload lacks a field its message type needs.
    #[error("Invalid payload for {message_type}: {reason}")]
    InvalidPayload {
        message_type: String,
        reason: String,
    },

    /// The collaborator failed to deliver the message.
    #[error(transparent)]
    Send(#[from] MessengerError),
}

impl DispatchError {
    /// Configuration errors will fail again on retry; send errors may not.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DispatchError::Unsupported { .. } | DispatchError::InvalidPayload { .. }
        )
    }
}

/// Turns a JSON payload into the outbound message for one route.
pub type PayloadBuilder = fn(&str, &Value) -> Result<OutboundContent, DispatchError>;

pub struct Dispatcher {
    messenger: Arc<dyn Messenger>,
    routes: HashMap<(String, String), PayloadBuilder>,
}

impl Dispatcher {
    /// A dispatcher with an empty routing table.
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self {
            messenger,
            routes: HashMap::new(),
        }
    }

    /// A dispatcher with every built-in `send` and `send-interactive` route.
    pub fn with_default_routes(messenger: Arc<dyn Messenger>) -> Self {
        let mut d = Self::new(messenger);
        d.register("send", "text", build_text);
        d.register("send", "image", build_image);
        d.register("send", "video", build_video);
        d.register("send", "gif", build_gif);
        d.register("send", "audio", build_audio);
        d.register("send", "document", build_document);
        d.register("send", "location", build_location);
        d.register("send", "disappear_on", |_, _| {
            Ok(OutboundContent::DisappearingTimer {
                seconds: DISAPPEAR_ON_SECS,
            })
        });
        d.register("send", "disappear_off", |_, _| {
            Ok(OutboundContent::DisappearingTimer { seconds: 0 })
        });

        d.register("send-interactive", "custom_buttons", build_buttons);
        d.register("send-interactive", "custom_list", build_list);
        d.register("send-interactive", "custom_poll", build_poll);
        d.register("send-interactive", "custom_cta_url", build_cta_url);
        d.register("send-interactive", "custom_cta_call", build_cta_call);
        d.register("send-interactive", "custom_cta_copy", build_cta_copy);
        d.register("send-interactive", "custom_buttons_image", build_buttons_image);
        d.register("send-interactive", "custom_carousel", build_carousel);
        d
    }

    /// Add or replace the builder for `(category, message_type)`.
    pub fn register(&mut self, category: &str, message_type: &str, builder: PayloadBuilder) {
        self.routes
            .insert((category.to_string(), message_type.to_string()), builder);
    }

    pub fn supports(&self, category: &str, message_type: &str) -> bool {
        self.routes
            .contains_key(&(category.to_string(), message_type.to_string()))
    }

    /// Translate without sending.
    pub fn build(
        &self,
        category: &str,
        message_type: &str,
        payload: &Value,
    ) -> Result<OutboundContent, DispatchError> {
        let builder = self
            .routes
            .get(&(category.to_string(), message_type.to_string()))
            .ok_or_else(|| DispatchError::Unsupported {
                category: category.to_string(),
                message_type: message_type.to_string(),
            })?;
        builder(message_type, payload)
    }

    /// Build the message for this route and send it to `target`.
    pub async fn dispatch(
        &self,
        target: &str,
        category: &str,
        message_type: &str,
        payload: &Value,
    ) -> Result<WireMessage, DispatchError> {
        let content = self.build(category, message_type, payload)?;
        debug!(%target, kind = content.kind(), "dispatching");
        Ok(self.messenger.send(target, &content).await?)
    }

    pub fn is_connected(&self) -> bool {
        self.messenger.is_connected()
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.messenger
    }
}

impl From<DispatchError> for herald_core::HeraldError {
    fn from(e: DispatchError) -> Self {
        use herald_core::HeraldError;
        match e {
            DispatchError::Unsupported {
                category,
                message_type,
            } => HeraldError::UnsupportedDispatch {
                category,
                message_type,
            },
            DispatchError::InvalidPayload { .. } => HeraldError::InvalidPayload(e.to_string()),
            DispatchError::Send(e) => HeraldError::DispatchFailed(e.to_string()),
        }
    }
}

// --- payload shapes ---------------------------------------------------------

fn parse<T: DeserializeOwned>(message_type: &str, payload: &Value) -> Result<T, DispatchError> {
    let empty = Value::Object(Default::default());
    let payload = if payload.is_null() { &empty } else { payload };
    T::deserialize(payload).map_err(|e| DispatchError::InvalidPayload {
        message_type: message_type.to_string(),
        reason: e.to_string(),
    })
}

/// Treats a missing or empty string as absent.
fn or(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[derive(Deserialize)]
struct TextPayload {
    text: Option<String>,
}

#[derive(Deserialize)]
struct MediaPayload {
    url: String,
    caption: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentPayload {
    url: String,
    file_name: Option<String>,
}

#[derive(Deserialize)]
struct LocationPayload {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct ButtonSpec {
    label: String,
    id: String,
}

#[derive(Deserialize)]
struct ButtonsPayload {
    body: String,
    header: Option<String>,
    footer: Option<String>,
    buttons: Vec<ButtonSpec>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRow {
    title: String,
    description: Option<String>,
    row_id: String,
}

#[derive(Deserialize)]
struct ListSection {
    title: String,
    rows: Vec<ListRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPayload {
    body: String,
    header: Option<String>,
    footer: Option<String>,
    button_text: Option<String>,
    sections: Vec<ListSection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollPayload {
    question: String,
    options: Vec<String>,
    selectable_count: Option<u32>,
}

#[derive(Deserialize)]
struct CtaUrlPayload {
    text: String,
    label: Option<String>,
    url: String,
}

#[derive(Deserialize)]
struct CtaCallPayload {
    text: String,
    label: Option<String>,
    phone: String,
}

#[derive(Deserialize)]
struct CtaCopyPayload {
    text: String,
    label: Option<String>,
    code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ButtonsImagePayload {
    image_url: String,
    caption: Option<String>,
    footer: Option<String>,
    buttons: Vec<ButtonSpec>,
}

#[derive(Deserialize)]
struct CarouselButtonSpec {
    #[serde(rename = "type")]
    kind: Option<String>,
    label: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CarouselCardSpec {
    title: String,
    image_url: String,
    description: String,
    #[serde(default)]
    buttons: Vec<CarouselButtonSpec>,
}

#[derive(Deserialize)]
struct CarouselPayload {
    body: Option<String>,
    cards: Vec<CarouselCardSpec>,
}

// --- builders ---------------------------------------------------------------

fn build_text(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: TextPayload = parse(ty, payload)?;
    Ok(OutboundContent::Text {
        text: or(p.text, "Hello!"),
    })
}

fn build_image(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: MediaPayload = parse(ty, payload)?;
    Ok(OutboundContent::Image {
        url: p.url,
        caption: p.caption.unwrap_or_default(),
    })
}

fn build_video(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: MediaPayload = parse(ty, payload)?;
    Ok(OutboundContent::Video {
        url: p.url,
        caption: p.caption.unwrap_or_default(),
        gif_playback: false,
    })
}

fn build_gif(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: MediaPayload = parse(ty, payload)?;
    Ok(OutboundContent::Video {
        url: p.url,
        caption: String::new(),
        gif_playback: true,
    })
}

fn build_audio(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: MediaPayload = parse(ty, payload)?;
    Ok(OutboundContent::Audio {
        url: p.url,
        mimetype: "audio/mp4".to_string(),
    })
}

fn build_document(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: DocumentPayload = parse(ty, payload)?;
    Ok(OutboundContent::Document {
        url: p.url,
        file_name: or(p.file_name, "file.pdf"),
        mimetype: "application/pdf".to_string(),
    })
}

fn build_location(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: LocationPayload = parse(ty, payload)?;
    Ok(OutboundContent::Location {
        latitude: p.lat,
        longitude: p.lng,
    })
}

fn quick_replies(buttons: Vec<ButtonSpec>) -> Vec<InteractiveButton> {
    buttons
        .into_iter()
        .map(|b| InteractiveButton {
            name: "quick_reply".to_string(),
            params_json: json!({ "display_text": b.label, "id": b.id }).to_string(),
        })
        .collect()
}

fn build_buttons(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: ButtonsPayload = parse(ty, payload)?;
    Ok(OutboundContent::Interactive {
        text: p.body,
        title: p.header.unwrap_or_default(),
        footer: p.footer.unwrap_or_default(),
        buttons: quick_replies(p.buttons),
    })
}

fn build_list(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: ListPayload = parse(ty, payload)?;
    let sections: Vec<Value> = p
        .sections
        .into_iter()
        .map(|s| {
            let rows: Vec<Value> = s
                .rows
                .into_iter()
                .map(|r| {
                    json!({
                        "title": r.title,
                        "description": r.description.unwrap_or_default(),
                        "id": r.row_id,
                    })
                })
                .collect();
            json!({ "title": s.title, "rows": rows })
        })
        .collect();
    let params = json!({
        "title": or(p.button_text, "View Options"),
        "sections": sections,
    });
    Ok(OutboundContent::Interactive {
        text: p.body,
        title: p.header.unwrap_or_default(),
        footer: p.footer.unwrap_or_default(),
        buttons: vec![InteractiveButton {
            name: "single_select".to_string(),
            params_json: params.to_string(),
        }],
    })
}

fn build_poll(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: PollPayload = parse(ty, payload)?;
    if p.options.len() < 2 {
        return Err(DispatchError::InvalidPayload {
            message_type: ty.to_string(),
            reason: "a poll needs at least two options".to_string(),
        });
    }
    Ok(OutboundContent::Poll {
        name: p.question,
        values: p.options,
        selectable_count: p.selectable_count.unwrap_or(1),
    })
}

fn single_button(text: String, label: Option<String>, name: &str, params: Value) -> OutboundContent {
    OutboundContent::Interactive {
        text,
        title: label.unwrap_or_default(),
        footer: String::new(),
        buttons: vec![InteractiveButton {
            name: name.to_string(),
            params_json: params.to_string(),
        }],
    }
}

fn build_cta_url(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: CtaUrlPayload = parse(ty, payload)?;
    let params = json!({
        "display_text": or(p.label.clone(), "Open"),
        "url": p.url,
        "merchant_url": p.url,
    });
    Ok(single_button(p.text, p.label, "cta_url", params))
}

fn build_cta_call(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: CtaCallPayload = parse(ty, payload)?;
    let params = json!({
        "display_text": or(p.label.clone(), "Call"),
        "phone_number": p.phone,
    });
    Ok(single_button(p.text, p.label, "cta_call", params))
}

fn build_cta_copy(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: CtaCopyPayload = parse(ty, payload)?;
    let params = json!({
        "display_text": or(p.label.clone(), "Copy"),
        "id": "copy_001",
        "copy_code": p.code,
    });
    Ok(single_button(p.text, p.label, "cta_copy", params))
}

fn build_buttons_image(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: ButtonsImagePayload = parse(ty, payload)?;
    Ok(OutboundContent::ImageButtons {
        image_url: p.image_url,
        caption: p.caption.unwrap_or_default(),
        footer: p.footer.unwrap_or_default(),
        buttons: quick_replies(p.buttons),
    })
}

fn build_carousel(ty: &str, payload: &Value) -> Result<OutboundContent, DispatchError> {
    let p: CarouselPayload = parse(ty, payload)?;
    let cards = p
        .cards
        .into_iter()
        .map(|card| CarouselCard {
            header_title: card.title,
            image_url: card.image_url,
            body_text: card.description,
            buttons: card
                .buttons
                .into_iter()
                .map(|b| match b.kind.as_deref() {
                    Some("cta_url") => InteractiveButton {
                        name: "cta_url".to_string(),
                        params_json: json!({
                            "display_text": b.label,
                            "url": b.value,
                            "merchant_url": b.value,
                        })
                        .to_string(),
                    },
                    _ => InteractiveButton {
                        name: "quick_reply".to_string(),
                        params_json: json!({ "display_text": b.label, "id": b.value }).to_string(),
                    },
                })
                .collect(),
        })
        .collect();
    Ok(OutboundContent::Carousel {
        caption: p.body.unwrap_or_default(),
        cards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::testing::RecordingMessenger;

    fn dispatcher() -> (Dispatcher, Arc<RecordingMessenger>) {
        let messenger = Arc::new(RecordingMessenger::new());
        (Dispatcher::with_default_routes(messenger.clone()), messenger)
    }

    #[test]
    fn text_defaults_when_missing_or_empty() {
        let (d, _) = dispatcher();
        for payload in [Value::Null, json!({}), json!({"text": ""})] {
            assert_eq!(
                d.build("send", "text", &payload).unwrap(),
                OutboundContent::Text { text: "Hello!".into() }
            );
        }
    }

    #[test]
    fn media_requires_url() {
        let (d, _) = dispatcher();
        let err = d.build("send", "image", &json!({"caption": "x"})).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPayload { ref message_type, .. } if message_type == "image"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn gif_document_and_audio_shapes() {
        let (d, _) = dispatcher();
        assert_eq!(
            d.build("send", "gif", &json!({"url": "u"})).unwrap(),
            OutboundContent::Video { url: "u".into(), caption: String::new(), gif_playback: true }
        );
        assert_eq!(
            d.build("send", "document", &json!({"url": "u"})).unwrap(),
            OutboundContent::Document {
                url: "u".into(),
                file_name: "file.pdf".into(),
                mimetype: "application/pdf".into()
            }
        );
        assert_eq!(
            d.build("send", "audio", &json!({"url": "u"})).unwrap(),
            OutboundContent::Audio { url: "u".into(), mimetype: "audio/mp4".into() }
        );
    }

    #[test]
    fn disappearing_timer_routes() {
        let (d, _) = dispatcher();
        assert_eq!(
            d.build("send", "disappear_on", &Value::Null).unwrap(),
            OutboundContent::DisappearingTimer { seconds: 604_800 }
        );
        assert_eq!(
            d.build("send", "disappear_off", &json!({})).unwrap(),
            OutboundContent::DisappearingTimer { seconds: 0 }
        );
    }

    #[test]
    fn unknown_pairs_are_unsupported() {
        let (d, _) = dispatcher();
        assert!(!d.supports("send", "hologram"));
        assert!(!d.supports("broadcast", "text"));
        assert!(d.supports("send-interactive", "custom_poll"));
        let err = d.build("send", "hologram", &json!({})).unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported { .. }));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn poll_defaults_selectable_count() {
        let (d, _) = dispatcher();
        let got = d
            .build(
                "send-interactive",
                "custom_poll",
                &json!({"question": "Lunch?", "options": ["A", "B"]}),
            )
            .unwrap();
        assert_eq!(
            got,
            OutboundContent::Poll {
                name: "Lunch?".into(),
                values: vec!["A".into(), "B".into()],
                selectable_count: 1
            }
        );
    }

    #[test]
    fn list_builds_single_select_params() {
        let (d, _) = dispatcher();
        let payload = json!({
            "body": "Pick",
            "sections": [{"title": "Food", "rows": [{"title": "Pizza", "rowId": "p"}]}]
        });
        let OutboundContent::Interactive { buttons, .. } =
            d.build("send-interactive", "custom_list", &payload).unwrap()
        else {
            panic!("expected interactive content");
        };
        assert_eq!(buttons[0].name, "single_select");
        let params: Value = serde_json::from_str(&buttons[0].params_json).unwrap();
        assert_eq!(params["title"], "View Options");
        assert_eq!(params["sections"][0]["rows"][0]["id"], "p");
        assert_eq!(params["sections"][0]["rows"][0]["description"], "");
    }

    #[test]
    fn carousel_button_kinds() {
        let (d, _) = dispatcher();
        let payload = json!({
            "cards": [{
                "title": "T", "imageUrl": "i", "description": "D",
                "buttons": [
                    {"type": "cta_url", "label": "Go", "value": "https://x"},
                    {"label": "Hi", "value": "hi"}
                ]
            }]
        });
        let OutboundContent::Carousel { caption, cards } =
            d.build("send-interactive", "custom_carousel", &payload).unwrap()
        else {
            panic!("expected carousel");
        };
        assert_eq!(caption, "");
        assert_eq!(cards[0].buttons[0].name, "cta_url");
        assert_eq!(cards[0].buttons[1].name, "quick_reply");
    }

    #[tokio::test]
    async fn dispatch_sends_exactly_once() {
        let (d, messenger) = dispatcher();
        let sent = d
            .dispatch("c@s", "send", "text", &json!({"text": "hi"}))
            .await
            .unwrap();
        assert!(sent.key.from_me);
        assert_eq!(messenger.sent(), vec![("c@s".to_string(), OutboundContent::Text { text: "hi".into() })]);
    }

    #[tokio::test]
    async fn send_failure_is_not_a_configuration_error() {
        let (d, messenger) = dispatcher();
        messenger.fail_target("c@s");
        let err = d
            .dispatch("c@s", "send", "text", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Send(_)));
        assert!(!err.is_configuration_error());
    }

    #[tokio::test]
    async fn unsupported_pairs_never_reach_the_messenger() {
        let (d, messenger) = dispatcher();
        assert!(d.dispatch("c@s", "send", "sticker", &Value::Null).await.is_err());
        assert!(messenger.sent().is_empty());
    }
}
