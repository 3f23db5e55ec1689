use crate::sanitize::SafeHtml;
use crate::script::MediaRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod store;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
    System,
}

/// One transcript entry. Ids are unique per instance, never reused even
/// when a scripted turn replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub html: SafeHtml,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// The single persisted document: the whole transcript, replaced wholesale
/// on every save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub schema_version: u32,
    pub messages: Vec<Message>,
}

impl ConversationRecord {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            messages,
        }
    }
}

/// Timestamps persist as RFC 3339 strings at millisecond precision: a
/// sortable form that round-trips across sessions.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::sanitize;
    use chrono::TimeZone;

    #[test]
    fn record_round_trips_to_millisecond_precision() {
        let sent = Utc
            .with_ymd_and_hms(2026, 3, 14, 9, 26, 53)
            .single()
            .expect("fixture timestamp should be unambiguous")
            + chrono::Duration::milliseconds(589);
        let record = ConversationRecord::new(vec![
            Message {
                id: "user-1".to_string(),
                role: Role::User,
                html: sanitize("<p>hello</p>"),
                media: None,
                timestamp: sent,
            },
            Message {
                id: "turn-1-a".to_string(),
                role: Role::Ai,
                html: sanitize("<h2>Hi</h2>"),
                media: Some(MediaRef {
                    src: "https://img.example.com/a.png".to_string(),
                    alt: Some("a".to_string()),
                    title: None,
                }),
                timestamp: sent + chrono::Duration::milliseconds(700),
            },
        ]);

        let encoded = serde_json::to_string(&record).expect("record should serialize");
        assert!(encoded.contains("2026-03-14T09:26:53.589Z"));

        let decoded: ConversationRecord =
            serde_json::from_str(&encoded).expect("record should deserialize");
        assert_eq!(decoded.messages, record.messages);
        assert_eq!(
            decoded.messages[0].timestamp.timestamp_millis(),
            record.messages[0].timestamp.timestamp_millis()
        );
    }

    #[test]
    fn roles_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&Role::System).expect("role should serialize"),
            "\"system\""
        );
        let role: Role = serde_json::from_str("\"ai\"").expect("role should deserialize");
        assert_eq!(role, Role::Ai);
    }

    #[test]
    fn tampered_storage_html_is_resanitized_on_load() {
        let raw = r#"{
          "schema_version": 1,
          "messages": [{
            "id": "m1",
            "role": "ai",
            "html": "<p onclick=\"x()\">hi</p><script>alert(1)</script>",
            "timestamp": "2026-03-14T09:26:53.589Z"
          }]
        }"#;
        let record: ConversationRecord =
            serde_json::from_str(raw).expect("record should deserialize");
        assert_eq!(record.messages[0].html.as_str(), "<p>hi</p>");
    }
}
