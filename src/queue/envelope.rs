//! Envelope definitions for the queue streams.
//!
//! An [`Envelope`] is the unit of work carried inside a stream record. It is
//! flattened into string fields on the wire:
//!
//! | Field             | Example                                  |
//! |-------------------|------------------------------------------|
//! | `messageId`       | `5b0c...` (UUID v4)                      |
//! | `topic`           | `ai.question_generation`                 |
//! | `payload`         | `{"sessionId":42,"questionId":7}`        |
//! | `priority`        | `high` / `medium` / `low`                |
//! | `retryCount`      | `0`                                      |
//! | `timestamp`       | RFC 3339, UTC                            |
//! | `originMessageId` | only on republished retries              |

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::EnvelopeError;
use crate::stream::StreamRecord;

pub const FIELD_MESSAGE_ID: &str = "messageId";
pub const FIELD_TOPIC: &str = "topic";
pub const FIELD_PAYLOAD: &str = "payload";
pub const FIELD_PRIORITY: &str = "priority";
pub const FIELD_RETRY_COUNT: &str = "retryCount";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_ORIGIN_MESSAGE_ID: &str = "originMessageId";

/// Opaque key/value payload of an envelope.
pub type Payload = Map<String, Value>;

/// Priority lane of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(EnvelopeError::InvalidPriority(other.to_string())),
        }
    }
}

/// A message carried on a queue stream.
///
/// `message_id` is fresh for every envelope ever appended, retries included.
/// `priority` never changes after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message_id: Uuid,
    pub topic: String,
    pub payload: Payload,
    pub priority: Priority,
    /// Number of failed attempts that preceded this envelope.
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    /// The `message_id` of the first attempt, set on republished retries.
    pub origin_message_id: Option<Uuid>,
}

impl Envelope {
    /// Creates a first-attempt envelope with a fresh id.
    pub fn new(topic: impl Into<String>, payload: Payload, priority: Priority) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            priority,
            retry_count: 0,
            timestamp: Utc::now(),
            origin_message_id: None,
        }
    }

    /// Builds the envelope for the next attempt after a failure.
    ///
    /// The copy gets a fresh `message_id`, an incremented retry count and a
    /// pointer back to the first attempt. Topic, payload and priority carry
    /// over unchanged.
    pub fn next_attempt(&self) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            topic: self.topic.clone(),
            payload: self.payload.clone(),
            priority: self.priority,
            retry_count: self.retry_count.saturating_add(1),
            timestamp: Utc::now(),
            origin_message_id: Some(self.origin()),
        }
    }

    /// The id of the first attempt of this message.
    pub fn origin(&self) -> Uuid {
        self.origin_message_id.unwrap_or(self.message_id)
    }

    /// Serializes the envelope into stream record fields.
    pub fn to_fields(&self) -> Result<Vec<(String, String)>, serde_json::Error> {
        let mut fields = vec![
            (FIELD_MESSAGE_ID.to_string(), self.message_id.to_string()),
            (FIELD_TOPIC.to_string(), self.topic.clone()),
            (FIELD_PAYLOAD.to_string(), serde_json::to_string(&self.payload)?),
            (FIELD_PRIORITY.to_string(), self.priority.to_string()),
            (FIELD_RETRY_COUNT.to_string(), self.retry_count.to_string()),
            (
                FIELD_TIMESTAMP.to_string(),
                self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ];
        if let Some(origin) = self.origin_message_id {
            fields.push((FIELD_ORIGIN_MESSAGE_ID.to_string(), origin.to_string()));
        }
        Ok(fields)
    }

    /// Decodes an envelope from stream record fields.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, EnvelopeError> {
        let get = |name: &'static str| {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or(EnvelopeError::MissingField(name))
        };

        let message_id = get(FIELD_MESSAGE_ID)?;
        let message_id = Uuid::parse_str(message_id)
            .map_err(|_| EnvelopeError::InvalidMessageId(message_id.to_string()))?;

        let topic = get(FIELD_TOPIC)?.to_string();
        let payload: Payload = serde_json::from_str(get(FIELD_PAYLOAD)?)?;
        let priority: Priority = get(FIELD_PRIORITY)?.parse()?;

        // Older producers may omit the counter; treat that as a first attempt.
        let retry_count = match fields.get(FIELD_RETRY_COUNT) {
            Some(raw) => raw
                .parse()
                .map_err(|_| EnvelopeError::InvalidRetryCount(raw.clone()))?,
            None => 0,
        };

        let timestamp = match fields.get(FIELD_TIMESTAMP) {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| EnvelopeError::InvalidTimestamp(raw.clone()))?,
            None => Utc::now(),
        };

        let origin_message_id = match fields.get(FIELD_ORIGIN_MESSAGE_ID) {
            Some(raw) => Some(
                Uuid::parse_str(raw).map_err(|_| EnvelopeError::InvalidMessageId(raw.clone()))?,
            ),
            None => None,
        };

        Ok(Self {
            message_id,
            topic,
            payload,
            priority,
            retry_count,
            timestamp,
            origin_message_id,
        })
    }

    /// Decodes the envelope carried by a stream record.
    pub fn from_record(record: &StreamRecord) -> Result<Self, EnvelopeError> {
        Self::from_fields(&record.fields)
    }
}

/// Reads the priority tag of a raw record without decoding the envelope.
///
/// Lanes filter on this before handing records to the pool.
pub fn record_priority(record: &StreamRecord) -> Option<Priority> {
    record.field(FIELD_PRIORITY).and_then(|p| p.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Payload {
        match json!({"sessionId": 42, "questionId": 7}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_new_envelope_defaults() {
        let env = Envelope::new("ai.question_generation", payload(), Priority::High);
        assert_eq!(env.retry_count, 0);
        assert!(env.origin_message_id.is_none());
        assert_eq!(env.origin(), env.message_id);
    }

    #[test]
    fn test_fields_decode_back() {
        let env = Envelope::new("ai.final_evaluation", payload(), Priority::Low);
        let fields: HashMap<String, String> = env.to_fields().expect("encode").into_iter().collect();

        assert_eq!(fields.get("priority").map(String::as_str), Some("low"));
        assert_eq!(fields.get("retryCount").map(String::as_str), Some("0"));
        assert!(!fields.contains_key("originMessageId"));

        let decoded = Envelope::from_fields(&fields).expect("decode");
        assert_eq!(decoded.message_id, env.message_id);
        assert_eq!(decoded.payload, env.payload);
        assert_eq!(decoded.priority, Priority::Low);
    }

    #[test]
    fn test_timestamp_uses_millisecond_utc() {
        let mut env = Envelope::new("ai.question_generation", payload(), Priority::High);
        env.timestamp = DateTime::parse_from_rfc3339("2024-03-05T09:15:02.123456789+02:00")
            .expect("timestamp")
            .with_timezone(&Utc);

        let fields: HashMap<String, String> = env.to_fields().expect("encode").into_iter().collect();
        assert_eq!(
            fields.get("timestamp").map(String::as_str),
            Some("2024-03-05T07:15:02.123Z")
        );
    }

    #[test]
    fn test_next_attempt_gets_fresh_id() {
        let first = Envelope::new("ai.feedback_generation", payload(), Priority::High);
        let second = first.next_attempt();
        let third = second.next_attempt();

        assert_ne!(first.message_id, second.message_id);
        assert_ne!(second.message_id, third.message_id);
        assert_eq!(third.retry_count, 2);
        assert_eq!(third.origin_message_id, Some(first.message_id));
        assert_eq!(third.priority, first.priority);
        assert_eq!(third.payload, first.payload);
    }

    #[test]
    fn test_decode_rejects_bad_fields() {
        let env = Envelope::new("ai.question_generation", payload(), Priority::High);
        let mut fields: HashMap<String, String> =
            env.to_fields().expect("encode").into_iter().collect();

        fields.insert("priority".into(), "urgent".into());
        assert!(matches!(
            Envelope::from_fields(&fields),
            Err(EnvelopeError::InvalidPriority(_))
        ));

        fields.insert("priority".into(), "high".into());
        fields.remove("topic");
        assert!(matches!(
            Envelope::from_fields(&fields),
            Err(EnvelopeError::MissingField("topic"))
        ));
    }

    #[test]
    fn test_missing_retry_count_means_first_attempt() {
        let env = Envelope::new("ai.question_generation", payload(), Priority::Medium);
        let mut fields: HashMap<String, String> =
            env.to_fields().expect("encode").into_iter().collect();
        fields.remove("retryCount");
        assert_eq!(Envelope::from_fields(&fields).expect("decode").retry_count, 0);
    }

    #[test]
    fn test_priority_parse() {
        for p in Priority::ALL {
            assert_eq!(p.as_str().parse::<Priority>().expect("parse"), p);
        }
        assert!("HIGH".parse::<Priority>().is_err());
    }
}
