use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::SchedulerError;

pub const DEFAULT_CATEGORY: &str = "send";

/// Which family of recurrence a schedule follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceKind {
    Once,
    Daily,
    Weekly,
    Interval,
}

impl RecurrenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceKind::Once => "once",
            RecurrenceKind::Daily => "daily",
            RecurrenceKind::Weekly => "weekly",
            RecurrenceKind::Interval => "interval",
        }
    }
}

impl std::fmt::Display for RecurrenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecurrenceKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "once" => Ok(RecurrenceKind::Once),
            "daily" => Ok(RecurrenceKind::Daily),
            "weekly" => Ok(RecurrenceKind::Weekly),
            "interval" => Ok(RecurrenceKind::Interval),
            other => Err(SchedulerError::UnknownRecurrenceKind(other.to_string())),
        }
    }
}

/// A persisted schedule row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleJob {
    /// SQLite rowid, assigned at creation.
    pub id: i64,
    pub label: String,
    /// Chat, group or contact the message goes to.
    pub target: String,
    pub category: String,
    pub message_type: String,
    /// Message-shape parameters, opaque to the scheduler.
    pub payload: Value,
    pub recurrence_kind: RecurrenceKind,
    pub recurrence_value: String,
    pub enabled: bool,
    /// Epoch ms of the next planned dispatch. `0` means "run now".
    pub next_run_at: Option<i64>,
    /// Epoch ms of the last successful dispatch.
    pub last_run_at: Option<i64>,
    pub created_at: i64,
}

impl ScheduleJob {
    /// Enabled and `next_run_at <= now`.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.enabled && self.next_run_at.is_some_and(|next| next <= now_ms)
    }
}

/// Body of `POST /schedules`.
///
/// Fields are kept loose (strings, defaults) so that missing or malformed
/// values surface as validation errors from the store rather than as
/// deserialisation failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSchedule {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub target: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub recurrence_kind: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub recurrence_value: String,
}

impl NewSchedule {
    pub fn new(
        target: impl Into<String>,
        category: impl Into<String>,
        message_type: impl Into<String>,
        recurrence_kind: impl Into<String>,
        recurrence_value: impl Into<String>,
    ) -> Self {
        Self {
            label: None,
            target: target.into(),
            category: category.into(),
            message_type: message_type.into(),
            payload: Value::Null,
            recurrence_kind: recurrence_kind.into(),
            recurrence_value: recurrence_value.into(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Body of `PUT /schedules/{id}`: either `{ "runNow": true }` or a partial patch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePatch {
    #[serde(default)]
    pub run_now: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub recurrence_kind: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub recurrence_value: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl SchedulePatch {
    pub fn run_now() -> Self {
        Self {
            run_now: true,
            ..Self::default()
        }
    }

    pub fn recurrence(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            recurrence_kind: Some(kind.into()),
            recurrence_value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    /// Whether this patch touches the recurrence and so moves `next_run_at`.
    pub fn changes_recurrence(&self) -> bool {
        self.recurrence_kind.is_some() || self.recurrence_value.is_some()
    }
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// Interval values arrive as `"60"` or `60` depending on the client.
fn string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_string_or_number(de)?.unwrap_or_default())
}

fn opt_string_or_number<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(de)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            RecurrenceKind::Once,
            RecurrenceKind::Daily,
            RecurrenceKind::Weekly,
            RecurrenceKind::Interval,
        ] {
            assert_eq!(kind.as_str().parse::<RecurrenceKind>().unwrap(), kind);
        }
        assert!(matches!(
            "hourly".parse::<RecurrenceKind>(),
            Err(SchedulerError::UnknownRecurrenceKind(k)) if k == "hourly"
        ));
    }

    #[test]
    fn new_schedule_accepts_numeric_interval() {
        let json = r#"{"target":"c@s","messageType":"text","recurrenceKind":"interval","recurrenceValue":60}"#;
        let spec: NewSchedule = serde_json::from_str(json).unwrap();
        assert_eq!(spec.recurrence_value, "60");
        assert_eq!(spec.category, "send");
        assert!(spec.label.is_none());
    }

    #[test]
    fn run_now_patch_parses() {
        let patch: SchedulePatch = serde_json::from_str(r#"{"runNow":true}"#).unwrap();
        assert!(patch.run_now);
        assert!(!patch.changes_recurrence());
    }

    #[test]
    fn job_serialises_camel_case() {
        let job = ScheduleJob {
            id: 7,
            label: String::new(),
            target: "c@s".into(),
            category: "send".into(),
            message_type: "text".into(),
            payload: serde_json::json!({"text": "hi"}),
            recurrence_kind: RecurrenceKind::Daily,
            recurrence_value: "09:00".into(),
            enabled: true,
            next_run_at: Some(1),
            last_run_at: None,
            created_at: 0,
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains(r#""recurrenceKind":"daily""#));
        assert!(json.contains(r#""nextRunAt":1"#));
        assert!(json.contains(r#""messageType":"text""#));
    }
}
