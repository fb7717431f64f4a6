//! Message catalog: the typed events exchanged between participants.
//!
//! Raw JSON documents enter the system through [`validate`], which checks
//! the shape of every field and names the first offending one. Nothing is
//! coerced: a number where a string is expected is an error, and so is a
//! field the variant does not declare. `metadata` is the only optional
//! mapping and defaults to an empty object.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{EppnError, Result};
use crate::types::{MessageKind, Metadata, Record};

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Requests ingestion of N source URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter_address: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One fetched artifact, ready for extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfReady {
    pub url: String,
    pub source: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One document fully extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedText {
    pub doc_id: String,
    pub sections: Vec<Record>,
    pub entities: Vec<Record>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Summarization output for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReady {
    pub doc_id: String,
    pub summary: String,
    pub key_points: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Ethics analysis output for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthicsReport {
    pub doc_id: String,
    pub report: Record,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A typed, immutable pipeline event.
///
/// Serializes with a `type` tag (`{"type": "parsed_text", ...}`).
/// Deserialization always goes through [`validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    CrawlRequest(CrawlRequest),
    PdfReady(PdfReady),
    ParsedText(ParsedText),
    SummaryReady(SummaryReady),
    EthicsReport(EthicsReport),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::CrawlRequest(_) => MessageKind::CrawlRequest,
            Self::PdfReady(_) => MessageKind::PdfReady,
            Self::ParsedText(_) => MessageKind::ParsedText,
            Self::SummaryReady(_) => MessageKind::SummaryReady,
            Self::EthicsReport(_) => MessageKind::EthicsReport,
        }
    }

    /// Document identifier, present on every variant from `ParsedText` on.
    pub fn doc_id(&self) -> Option<&str> {
        match self {
            Self::ParsedText(m) => Some(&m.doc_id),
            Self::SummaryReady(m) => Some(&m.doc_id),
            Self::EthicsReport(m) => Some(&m.doc_id),
            Self::CrawlRequest(_) | Self::PdfReady(_) => None,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::CrawlRequest(m) => &m.metadata,
            Self::PdfReady(m) => &m.metadata,
            Self::ParsedText(m) => &m.metadata,
            Self::SummaryReady(m) => &m.metadata,
            Self::EthicsReport(m) => &m.metadata,
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        validate(&raw).map_err(serde::de::Error::custom)
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Message {
                fn from(m: $variant) -> Self {
                    Self::$variant(m)
                }
            }
        )*
    };
}

impl_from_variant!(CrawlRequest, PdfReady, ParsedText, SummaryReady, EthicsReport);

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

const TYPE_FIELD: &str = "type";

/// Validate a raw, `type`-tagged JSON document into a [`Message`].
pub fn validate(raw: &Value) -> Result<Message> {
    let obj = raw
        .as_object()
        .ok_or_else(|| EppnError::validation("<message>", "mapping", shape_of(Some(raw))))?;

    let kind = match obj.get(TYPE_FIELD) {
        Some(Value::String(tag)) => tag.parse::<MessageKind>().map_err(|_| {
            EppnError::validation(TYPE_FIELD, expected_tags(), format!("\"{tag}\""))
        })?,
        other => return Err(EppnError::validation(TYPE_FIELD, "string", shape_of(other))),
    };

    validate_as(kind, raw)
}

/// Validate a raw JSON document whose kind is already known (e.g. from the
/// handler it was delivered to). A `type` tag, if present, must agree.
pub fn validate_as(kind: MessageKind, raw: &Value) -> Result<Message> {
    let obj = raw
        .as_object()
        .ok_or_else(|| EppnError::validation("<message>", "mapping", shape_of(Some(raw))))?;

    if let Some(tag) = obj.get(TYPE_FIELD) {
        if tag.as_str() != Some(kind.as_str()) {
            return Err(EppnError::validation(
                TYPE_FIELD,
                format!("\"{kind}\""),
                tag.to_string(),
            ));
        }
    }

    let message = match kind {
        MessageKind::CrawlRequest => {
            let f = Fields::new(obj, &["urls", "interpreter_address", "metadata"])?;
            Message::CrawlRequest(CrawlRequest {
                urls: f.strings("urls")?,
                interpreter_address: f.opt_string("interpreter_address")?,
                metadata: f.metadata()?,
            })
        }
        MessageKind::PdfReady => {
            let f = Fields::new(obj, &["url", "source", "metadata"])?;
            Message::PdfReady(PdfReady {
                url: f.string("url")?,
                source: f.string("source")?,
                metadata: f.metadata()?,
            })
        }
        MessageKind::ParsedText => {
            let f = Fields::new(obj, &["doc_id", "sections", "entities", "metadata"])?;
            Message::ParsedText(ParsedText {
                doc_id: f.string("doc_id")?,
                sections: f.records("sections")?,
                entities: f.records("entities")?,
                metadata: f.metadata()?,
            })
        }
        MessageKind::SummaryReady => {
            let f = Fields::new(obj, &["doc_id", "summary", "key_points", "metadata"])?;
            Message::SummaryReady(SummaryReady {
                doc_id: f.string("doc_id")?,
                summary: f.string("summary")?,
                key_points: f.strings("key_points")?,
                metadata: f.metadata()?,
            })
        }
        MessageKind::EthicsReport => {
            let f = Fields::new(
                obj,
                &["doc_id", "report", "risks", "recommendations", "metadata"],
            )?;
            Message::EthicsReport(EthicsReport {
                doc_id: f.string("doc_id")?,
                report: f.record("report")?,
                risks: f.strings("risks")?,
                recommendations: f.strings("recommendations")?,
                metadata: f.metadata()?,
            })
        }
    };

    Ok(message)
}

/// Field accessor over one raw message object.
struct Fields<'a> {
    obj: &'a serde_json::Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// Reject any field the variant does not declare.
    fn new(obj: &'a serde_json::Map<String, Value>, declared: &[&str]) -> Result<Self> {
        if let Some(unknown) = obj
            .keys()
            .find(|k| k.as_str() != TYPE_FIELD && !declared.contains(&k.as_str()))
        {
            return Err(EppnError::validation(
                unknown.as_str(),
                "no such field",
                shape_of(obj.get(unknown)),
            ));
        }
        Ok(Self { obj })
    }

    fn string(&self, name: &str) -> Result<String> {
        match self.obj.get(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            other => Err(EppnError::validation(name, "string", shape_of(other))),
        }
    }

    fn opt_string(&self, name: &str) -> Result<Option<String>> {
        match self.obj.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            other => Err(EppnError::validation(name, "string or null", shape_of(other))),
        }
    }

    fn strings(&self, name: &str) -> Result<Vec<String>> {
        let items = self.sequence(name, "sequence of string")?;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(EppnError::validation(
                    format!("{name}[{i}]"),
                    "string",
                    shape_of(Some(other)),
                )),
            })
            .collect()
    }

    fn records(&self, name: &str) -> Result<Vec<Record>> {
        let items = self.sequence(name, "sequence of mapping")?;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map.clone()),
                other => Err(EppnError::validation(
                    format!("{name}[{i}]"),
                    "mapping",
                    shape_of(Some(other)),
                )),
            })
            .collect()
    }

    fn record(&self, name: &str) -> Result<Record> {
        match self.obj.get(name) {
            Some(Value::Object(map)) => Ok(map.clone()),
            other => Err(EppnError::validation(name, "mapping", shape_of(other))),
        }
    }

    fn metadata(&self) -> Result<Metadata> {
        match self.obj.get("metadata") {
            None | Some(Value::Null) => Ok(Metadata::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            other => Err(EppnError::validation("metadata", "mapping", shape_of(other))),
        }
    }

    fn sequence(&self, name: &str, expected: &str) -> Result<&'a Vec<Value>> {
        match self.obj.get(name) {
            Some(Value::Array(items)) => Ok(items),
            other => Err(EppnError::validation(name, expected, shape_of(other))),
        }
    }
}

/// Human-readable JSON shape, as used in validation messages.
pub fn shape_of(value: Option<&Value>) -> &'static str {
    match value {
        None => "nothing (field missing)",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "sequence",
        Some(Value::Object(_)) => "mapping",
    }
}

fn expected_tags() -> String {
    let tags: Vec<_> = MessageKind::ALL.iter().map(|k| k.as_str()).collect();
    format!("one of {}", tags.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_of(err: EppnError) -> (String, String) {
        match err {
            EppnError::Validation {
                field, expected, ..
            } => (field, expected),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn crawl_request_defaults_metadata() {
        let msg = validate(&json!({
            "type": "crawl_request",
            "urls": ["http://a", "http://b"],
        }))
        .expect("valid crawl request");

        let Message::CrawlRequest(req) = msg else {
            panic!("wrong variant");
        };
        assert_eq!(req.urls, vec!["http://a", "http://b"]);
        assert!(req.interpreter_address.is_none());
        assert!(req.metadata.is_empty());
    }

    #[test]
    fn null_metadata_becomes_empty_mapping() {
        let msg = validate(&json!({
            "type": "pdf_ready",
            "url": "http://a/x.pdf",
            "source": "arxiv",
            "metadata": null,
        }))
        .expect("valid pdf_ready");
        assert!(msg.metadata().is_empty());
    }

    #[test]
    fn parsed_text_keeps_records_and_metadata() {
        let msg = validate(&json!({
            "type": "parsed_text",
            "doc_id": "d1",
            "sections": [{"title": "Intro", "text": "..."}],
            "entities": [],
            "metadata": {"lang": "en"},
        }))
        .expect("valid parsed_text");

        assert_eq!(msg.kind(), MessageKind::ParsedText);
        assert_eq!(msg.doc_id(), Some("d1"));
        assert_eq!(msg.metadata().get("lang"), Some(&json!("en")));
    }

    #[test]
    fn wrong_type_names_field_and_expectation() {
        let err = validate(&json!({
            "type": "summary_ready",
            "doc_id": 7,
            "summary": "s",
            "key_points": [],
        }))
        .unwrap_err();
        let (field, expected) = field_of(err);
        assert_eq!(field, "doc_id");
        assert_eq!(expected, "string");
    }

    #[test]
    fn sequence_element_is_not_coerced() {
        let err = validate(&json!({
            "type": "crawl_request",
            "urls": ["http://a", 42],
        }))
        .unwrap_err();
        let (field, expected) = field_of(err);
        assert_eq!(field, "urls[1]");
        assert_eq!(expected, "string");
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = validate(&json!({
            "type": "ethics_report",
            "doc_id": "d1",
            "risks": [],
            "recommendations": [],
        }))
        .unwrap_err();
        let (field, expected) = field_of(err);
        assert_eq!(field, "report");
        assert_eq!(expected, "mapping");
    }

    #[test]
    fn undeclared_field_is_rejected() {
        let err = validate(&json!({
            "type": "pdf_ready",
            "url": "u",
            "source": "s",
            "extra": true,
        }))
        .unwrap_err();
        let (field, _) = field_of(err);
        assert_eq!(field, "extra");
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let err = validate(&json!({"type": "pdf", "url": "u"})).unwrap_err();
        let (field, expected) = field_of(err);
        assert_eq!(field, "type");
        assert!(expected.contains("parsed_text"));
    }

    #[test]
    fn validate_as_rejects_conflicting_tag() {
        let raw = json!({"type": "pdf_ready", "url": "u", "source": "s"});
        assert!(validate_as(MessageKind::PdfReady, &raw).is_ok());
        assert!(validate_as(MessageKind::CrawlRequest, &raw).is_err());
    }

    #[test]
    fn serialized_message_validates_back() {
        let msg = Message::from(EthicsReport {
            doc_id: "d1".into(),
            report: json!({"summary": {"score": 0.2}})
                .as_object()
                .cloned()
                .expect("object"),
            risks: vec!["bias".into()],
            recommendations: vec!["review".into()],
            metadata: Metadata::new(),
        });

        let text = serde_json::to_string(&msg).expect("serialize");
        assert!(text.contains("\"type\":\"ethics_report\""));
        let parsed: Message = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(parsed, msg);
    }

    #[test]
    fn deserialize_surfaces_validation_error() {
        let result: std::result::Result<Message, _> =
            serde_json::from_str(r#"{"type":"parsed_text","doc_id":"d1"}"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("sections"));
    }
}
