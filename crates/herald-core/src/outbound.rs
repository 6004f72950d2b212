//! Outbound message shapes handed to [`Messenger::send`](crate::messenger::Messenger::send).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundContent {
    Text {
        text: String,
    },
    Image {
        url: String,
        caption: String,
    },
    Video {
        url: String,
        caption: String,
        gif_playback: bool,
    },
    Audio {
        url: String,
        mimetype: String,
    },
    Document {
        url: String,
        file_name: String,
        mimetype: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    /// Chat-level disappearing-messages timer; `0` turns it off.
    DisappearingTimer {
        seconds: u32,
    },
    Interactive {
        text: String,
        title: String,
        footer: String,
        buttons: Vec<InteractiveButton>,
    },
    ImageButtons {
        image_url: String,
        caption: String,
        footer: String,
        buttons: Vec<InteractiveButton>,
    },
    Poll {
        name: String,
        values: Vec<String>,
        selectable_count: u32,
    },
    Carousel {
        caption: String,
        cards: Vec<CarouselCard>,
    },
}

impl OutboundContent {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundContent::Text { .. } => "text",
            OutboundContent::Image { .. } => "image",
            OutboundContent::Video { .. } => "video",
            OutboundContent::Audio { .. } => "audio",
            OutboundContent::Document { .. } => "document",
            OutboundContent::Location { .. } => "location",
            OutboundContent::DisappearingTimer { .. } => "disappearing_timer",
            OutboundContent::Interactive { .. } => "interactive",
            OutboundContent::ImageButtons { .. } => "image_buttons",
            OutboundContent::Poll { .. } => "poll",
            OutboundContent::Carousel { .. } => "carousel",
        }
    }
}

/// A native-flow button: `name` selects the button kind (`quick_reply`,
/// `single_select`, `cta_url`, …) and `params_json` carries its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveButton {
    pub name: String,
    pub params_json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarouselCard {
    pub header_title: String,
    pub image_url: String,
    pub body_text: String,
    pub buttons: Vec<InteractiveButton>,
}
