//! Payload schema for knowledge points
//!
//! The fields the core reads are typed; everything else rides along in
//! `extra` and is written back untouched.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Payload schema tag written with every record
pub const SCHEMA_VERSION: &str = "ko.knowledge.v1";

/// Access-intent label carried by every record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    #[default]
    Shared,
    Global,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Shared => "shared",
            Visibility::Global => "global",
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "private" => Ok(Visibility::Private),
            "shared" => Ok(Visibility::Shared),
            "global" => Ok(Visibility::Global),
            other => Err(Error::validation(format!(
                "visibility must be one of private, shared, global (got '{}')",
                other
            ))),
        }
    }
}

/// Payload stored with each point in the vector store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    /// Caller-facing record id (may differ from the point id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,

    /// Fields the core does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecordPayload {
    /// Text of the record, from `content` or a foreign `text` field
    pub fn text(&self) -> &str {
        self.content
            .as_deref()
            .or_else(|| self.extra.get("content").and_then(Value::as_str))
            .or_else(|| self.extra.get("text").and_then(Value::as_str))
            .unwrap_or_default()
    }

    /// Convert to a JSON object for the wire
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

impl From<Map<String, Value>> for RecordPayload {
    fn from(map: Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(map.clone())).unwrap_or_else(|_| RecordPayload {
            extra: map,
            ..Default::default()
        })
    }
}

impl From<Value> for RecordPayload {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => map.into(),
            _ => RecordPayload::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_visibility_parsing() {
        assert_eq!("Private".parse::<Visibility>().unwrap(), Visibility::Private);
        assert_eq!(" global ".parse::<Visibility>().unwrap(), Visibility::Global);
        assert!("public".parse::<Visibility>().is_err());
        assert_eq!(Visibility::default(), Visibility::Shared);
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let payload: RecordPayload = json!({
            "namespace": "ns1",
            "content": "hello",
            "visibility": "private",
            "ingested_at_ms": 1_700_000_000_000i64,
            "producer": "scenario-7"
        })
        .into();

        assert_eq!(payload.namespace.as_deref(), Some("ns1"));
        assert_eq!(payload.visibility, Some(Visibility::Private));
        assert_eq!(payload.extra.get("producer"), Some(&json!("scenario-7")));

        let wire = payload.to_json();
        assert_eq!(wire["producer"], json!("scenario-7"));
        assert_eq!(wire["content"], json!("hello"));
    }

    #[test]
    fn test_text_falls_back_to_foreign_field() {
        let payload: RecordPayload = json!({"text": "legacy body"}).into();
        assert_eq!(payload.text(), "legacy body");

        let payload: RecordPayload = json!({"content": "modern", "text": "legacy"}).into();
        assert_eq!(payload.text(), "modern");
    }

    #[test]
    fn test_unreadable_known_field_keeps_raw_map() {
        let payload: RecordPayload = json!({"visibility": "everyone", "content": "x"}).into();
        assert_eq!(payload.visibility, None);
        assert_eq!(payload.extra.get("content"), Some(&json!("x")));
    }
}
