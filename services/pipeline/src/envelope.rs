//! Envelope decoding for object-store notifications.
//!
//! Object events reach the pipeline in several shapes: bare object-store
//! notifications, fan-out envelopes whose `Message` is a JSON string holding the
//! notification, and outer delivery wrappers whose records carry queue message
//! bodies. [`Envelope::parse`] discriminates a single layer and
//! [`unwrap_object_events`] peels every layer down to the object records.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

/// Deepest nesting accepted when unwrapping envelopes
pub const MAX_ENVELOPE_DEPTH: usize = 3;

/// Errors that can occur while decoding envelopes
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envelope nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("Object key is not valid UTF-8 after decoding: {0}")]
    InvalidKey(String),
}

/// A typed attribute inside a fan-out envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageAttribute {
    #[serde(rename = "Type", default = "default_attribute_type")]
    pub data_type: String,
    #[serde(rename = "Value")]
    pub value: String,
}

fn default_attribute_type() -> String {
    "String".to_string()
}

/// Fan-out envelope as delivered by the notification channel to a queue subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FanoutEnvelope {
    #[serde(rename = "Type", default = "default_envelope_type")]
    pub kind: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_arn: Option<String>,
    /// Inner payload, itself usually a JSON document encoded as a string
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message_attributes: HashMap<String, MessageAttribute>,
}

fn default_envelope_type() -> String {
    "Notification".to_string()
}

impl FanoutEnvelope {
    /// Wrap a message for delivery to a subscriber
    pub fn new(
        message_id: impl Into<String>,
        topic: impl Into<String>,
        message: impl Into<String>,
        attributes: &HashMap<String, String>,
    ) -> Self {
        let message_attributes = attributes
            .iter()
            .map(|(name, value)| {
                (
                    name.clone(),
                    MessageAttribute {
                        data_type: default_attribute_type(),
                        value: value.clone(),
                    },
                )
            })
            .collect();

        Self {
            kind: default_envelope_type(),
            message_id: message_id.into(),
            topic_arn: Some(topic.into()),
            message: message.into(),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            message_attributes,
        }
    }

    /// Get an attribute value
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.message_attributes.get(name).map(|a| a.value.as_str())
    }

    /// Flatten the typed attributes to plain name/value pairs
    pub fn attributes(&self) -> HashMap<String, String> {
        self.message_attributes
            .iter()
            .map(|(name, attribute)| (name.clone(), attribute.value.clone()))
            .collect()
    }
}

/// Object-store notification carrying one or more records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEvent {
    #[serde(rename = "Records")]
    pub records: Vec<ObjectEventRecord>,
}

impl ObjectEvent {
    /// Build a notification holding exactly one record
    pub fn single(record: ObjectEventRecord) -> Self {
        Self {
            records: vec![record],
        }
    }
}

/// A single object-store event record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEventRecord {
    #[serde(default)]
    pub event_name: String,
    pub s3: ObjectEntity,
    /// Fields the pipeline does not interpret, kept so records re-encode losslessly
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEntity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRef {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRef {
    /// URL-encoded object key
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Family of an object event, derived from its event name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectEventKind {
    Created,
    Removed,
    Other,
}

impl ObjectEventKind {
    pub fn from_event_name(event_name: &str) -> Self {
        if event_name.starts_with("ObjectCreated") {
            ObjectEventKind::Created
        } else if event_name.starts_with("ObjectRemoved") {
            ObjectEventKind::Removed
        } else {
            ObjectEventKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectEventKind::Created => "ObjectCreated",
            ObjectEventKind::Removed => "ObjectRemoved",
            ObjectEventKind::Other => "Other",
        }
    }
}

impl ObjectEventRecord {
    pub fn kind(&self) -> ObjectEventKind {
        ObjectEventKind::from_event_name(&self.event_name)
    }

    pub fn bucket(&self) -> &str {
        &self.s3.bucket.name
    }

    /// The key exactly as the object store encoded it
    pub fn raw_key(&self) -> &str {
        &self.s3.object.key
    }

    /// The decoded object key
    pub fn key(&self) -> Result<String, EnvelopeError> {
        decode_object_key(&self.s3.object.key)
    }
}

/// Decode an object key as encoded by the object store in notifications.
///
/// Literal `+` becomes a space before percent-decoding, so `%2B` still yields `+`.
pub fn decode_object_key(raw: &str) -> Result<String, EnvelopeError> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|_| EnvelopeError::InvalidKey(raw.to_string()))
}

/// One decoded envelope layer
#[derive(Debug, Clone)]
pub enum Envelope {
    /// Outer delivery wrapper holding queue message bodies
    Delivery(Vec<String>),
    /// Fan-out envelope wrapping an inner message
    Fanout(FanoutEnvelope),
    /// Object-store notification records
    Objects(ObjectEvent),
    /// Object-store connectivity test event
    TestEvent,
    /// Any other JSON document (metadata updates, dead-letter entries, ...)
    Other(Value),
}

enum Shape {
    Delivery(Vec<String>),
    Fanout,
    Objects,
    TestEvent,
    Other,
}

impl Envelope {
    /// Parse a message body and classify its outermost layer
    pub fn parse(body: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let envelope = match Self::shape(&value) {
            Shape::Delivery(bodies) => Envelope::Delivery(bodies),
            Shape::Fanout => Envelope::Fanout(serde_json::from_value(value)?),
            Shape::Objects => Envelope::Objects(serde_json::from_value(value)?),
            Shape::TestEvent => Envelope::TestEvent,
            Shape::Other => Envelope::Other(value),
        };
        Ok(envelope)
    }

    fn shape(value: &Value) -> Shape {
        let Some(object) = value.as_object() else {
            return Shape::Other;
        };

        if object.get("Message").map(Value::is_string).unwrap_or(false)
            && (object.contains_key("Type") || object.contains_key("MessageId"))
        {
            return Shape::Fanout;
        }

        if object.get("Event").and_then(Value::as_str) == Some("s3:TestEvent") {
            return Shape::TestEvent;
        }

        if let Some(records) = object.get("Records").and_then(Value::as_array) {
            if records.is_empty() {
                return Shape::Other;
            }
            if records.iter().all(|r| r.get("s3").is_some()) {
                return Shape::Objects;
            }
            let bodies: Option<Vec<String>> = records
                .iter()
                .map(|r| r.get("body").and_then(Value::as_str).map(String::from))
                .collect();
            if let Some(bodies) = bodies {
                return Shape::Delivery(bodies);
            }
        }

        Shape::Other
    }
}

impl Envelope {
    /// Whether this layer wraps another message rather than carrying records itself
    pub fn is_wrapper(&self) -> bool {
        matches!(self, Envelope::Delivery(_) | Envelope::Fanout(_))
    }

    /// Peel the remaining layers and return the object records
    pub fn into_object_records(self) -> Result<Vec<ObjectEventRecord>, EnvelopeError> {
        let mut records = Vec::new();
        collect_object_records(self, 0, &mut records)?;
        Ok(records)
    }
}

/// Unwrap every envelope layer of a message body and return the object records.
///
/// Bodies that carry no object records (test events, metadata messages) yield an
/// empty list.
pub fn unwrap_object_events(body: &str) -> Result<Vec<ObjectEventRecord>, EnvelopeError> {
    Envelope::parse(body)?.into_object_records()
}

fn collect_object_records(
    envelope: Envelope,
    depth: usize,
    out: &mut Vec<ObjectEventRecord>,
) -> Result<(), EnvelopeError> {
    if depth > MAX_ENVELOPE_DEPTH {
        return Err(EnvelopeError::TooDeep(MAX_ENVELOPE_DEPTH));
    }

    match envelope {
        Envelope::Delivery(bodies) => {
            // One bad body must not drop the records of its siblings
            for (index, inner) in bodies.iter().enumerate() {
                let mut records = Vec::new();
                let collected = Envelope::parse(inner).and_then(|envelope| {
                    collect_object_records(envelope, depth + 1, &mut records)
                });
                match collected {
                    Ok(()) => out.extend(records),
                    Err(e) => {
                        warn!(index, error = %e, "Skipping undecodable delivery body");
                        metrics::counter!("envelope.bodies.skipped").increment(1);
                    }
                }
            }
        }
        Envelope::Fanout(envelope) => {
            collect_object_records(Envelope::parse(&envelope.message)?, depth + 1, out)?;
        }
        Envelope::Objects(event) => out.extend(event.records),
        Envelope::TestEvent | Envelope::Other(_) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_event_json(event_name: &str, key: &str) -> String {
        serde_json::json!({
            "Records": [{
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventName": event_name,
                "s3": {
                    "bucket": { "name": "images", "arn": "arn:aws:s3:::images" },
                    "object": { "key": key, "size": 1024, "eTag": "abc" }
                }
            }]
        })
        .to_string()
    }

    fn fanout_json(message: &str) -> String {
        serde_json::json!({
            "Type": "Notification",
            "MessageId": "7c3e",
            "TopicArn": "arn:aws:sns:eu-west-1:123:new-images",
            "Message": message,
        })
        .to_string()
    }

    #[test]
    fn test_decode_object_key() {
        assert_eq!(decode_object_key("photo1.jpg").unwrap(), "photo1.jpg");
        assert_eq!(decode_object_key("my+holiday.png").unwrap(), "my holiday.png");
        assert_eq!(decode_object_key("caf%C3%A9.jpeg").unwrap(), "café.jpeg");
        assert_eq!(decode_object_key("a%2Bb.jpg").unwrap(), "a+b.jpg");
        assert!(matches!(
            decode_object_key("bad%FF.jpg"),
            Err(EnvelopeError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_direct_object_event() {
        let body = object_event_json("ObjectRemoved:Delete", "photo1.jpg");
        let records = unwrap_object_events(&body).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), ObjectEventKind::Removed);
        assert_eq!(records[0].bucket(), "images");
        assert_eq!(records[0].key().unwrap(), "photo1.jpg");
    }

    #[test]
    fn test_fanout_wrapped_object_event() {
        let body = fanout_json(&object_event_json("ObjectCreated:Put", "cat.png"));

        let envelope = Envelope::parse(&body).unwrap();
        assert!(matches!(envelope, Envelope::Fanout(_)));
        assert!(envelope.is_wrapper());

        let records = unwrap_object_events(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), ObjectEventKind::Created);
        assert_eq!(records[0].key().unwrap(), "cat.png");
    }

    #[test]
    fn test_delivery_wrapped_fanout_event() {
        let inner = fanout_json(&object_event_json("ObjectRemoved:Delete", "old+photo.jpg"));
        let body = serde_json::json!({
            "Records": [{ "messageId": "m-1", "body": inner }]
        })
        .to_string();

        assert!(matches!(Envelope::parse(&body).unwrap(), Envelope::Delivery(_)));

        let records = unwrap_object_events(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key().unwrap(), "old photo.jpg");
    }

    #[test]
    fn test_bad_delivery_body_keeps_siblings() {
        let good = fanout_json(&object_event_json("ObjectRemoved:Delete", "photo1.jpg"));
        let body = serde_json::json!({
            "Records": [
                { "messageId": "m-1", "body": "{not json" },
                { "messageId": "m-2", "body": good }
            ]
        })
        .to_string();

        let records = unwrap_object_events(&body).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key().unwrap(), "photo1.jpg");
    }

    #[test]
    fn test_records_keep_unknown_fields() {
        let body = object_event_json("ObjectCreated:Put", "cat.png");
        let records = unwrap_object_events(&body).unwrap();

        let encoded = serde_json::to_value(ObjectEvent::single(records[0].clone())).unwrap();
        assert_eq!(encoded["Records"][0]["eventSource"], "aws:s3");
        assert_eq!(encoded["Records"][0]["s3"]["object"]["eTag"], "abc");
    }

    #[test]
    fn test_test_event_and_metadata_yield_no_records() {
        let test_event = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"images"}"#;
        assert!(unwrap_object_events(test_event).unwrap().is_empty());

        let metadata = fanout_json(r#"{"id":"cat.png","Caption":"A cat"}"#);
        assert!(unwrap_object_events(&metadata).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_body() {
        assert!(matches!(
            unwrap_object_events("not json"),
            Err(EnvelopeError::Json(_))
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut body = object_event_json("ObjectCreated:Put", "deep.jpg");
        for _ in 0..=MAX_ENVELOPE_DEPTH {
            body = fanout_json(&body);
        }

        assert!(matches!(
            unwrap_object_events(&body),
            Err(EnvelopeError::TooDeep(_))
        ));
    }

    #[test]
    fn test_fanout_envelope_attributes() {
        let mut attributes = HashMap::new();
        attributes.insert("x-metadata-type".to_string(), "Caption".to_string());

        let envelope = FanoutEnvelope::new("id-1", "new-images", "{}", &attributes);
        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: FanoutEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.kind, "Notification");
        assert_eq!(decoded.attribute("x-metadata-type"), Some("Caption"));
        assert!(json.contains("\"MessageAttributes\""));
    }
}
