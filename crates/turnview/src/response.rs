use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One fragment of a streamed agent response.
///
/// Events arrive in order, are consumed exactly once, and are never
/// reordered. The variants mirror what the agent runtime emits for a turn:
/// generated text, citation batches tied to spans of that text, and trace
/// telemetry for the internal processing stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEvent {
    /// A fragment of generated text, as raw bytes off the wire.
    Chunk { bytes: Bytes },

    /// A batch of citations attributing spans of the generated text.
    Attribution { citations: Vec<Citation> },

    /// One unit of trace telemetry under its raw category
    /// (e.g. `orchestrationTrace`, `guardrailTrace`).
    Trace {
        category: String,
        payload: serde_json::Value,
    },
}

/// Character span of the pre-annotation generated text. `end` is exclusive:
/// a citation marker for this span splices in at byte offset `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A claim that a span of generated text is backed by retrieved references.
/// Immutable once received; order within a batch is meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub span: Span,
    #[serde(default)]
    pub references: Vec<Reference>,
}

/// A single retrieved source backing a citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub location: RefLocation,
    /// Human-readable title for display, when the source carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_title: Option<String>,
}

/// Source-type tag for a retrieved reference. Unrecognized tags map to
/// `Unknown` rather than failing deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LocationType {
    Confluence,
    Custom,
    Kendra,
    S3,
    Salesforce,
    SharePoint,
    Sql,
    Web,
    #[default]
    #[serde(other)]
    Unknown,
}

impl LocationType {
    /// Whether this type's value is a URL/URI a renderer can link to.
    pub fn is_link(self) -> bool {
        !matches!(self, Self::Custom | Self::Sql | Self::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlLocation {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriLocation {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdLocation {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLocation {
    pub query: String,
}

/// Where a retrieved reference lives, in the runtime's wire shape: a type
/// tag plus one populated sub-object per type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefLocation {
    #[serde(rename = "type")]
    pub location_type: LocationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confluence_location: Option<UrlLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_document_location: Option<IdLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kendra_document_location: Option<UriLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_location: Option<UriLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salesforce_location: Option<UrlLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_point_location: Option<UrlLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_location: Option<QueryLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_location: Option<UrlLocation>,
}

impl RefLocation {
    /// Extract the one field this location's type designates. `None` for
    /// `Unknown` types and for payloads whose tagged sub-object is absent.
    pub fn value(&self) -> Option<&str> {
        match self.location_type {
            LocationType::Confluence => self.confluence_location.as_ref().map(|l| l.url.as_str()),
            LocationType::Custom => self.custom_document_location.as_ref().map(|l| l.id.as_str()),
            LocationType::Kendra => self.kendra_document_location.as_ref().map(|l| l.uri.as_str()),
            LocationType::S3 => self.s3_location.as_ref().map(|l| l.uri.as_str()),
            LocationType::Salesforce => self.salesforce_location.as_ref().map(|l| l.url.as_str()),
            LocationType::SharePoint => self.share_point_location.as_ref().map(|l| l.url.as_str()),
            LocationType::Sql => self.sql_location.as_ref().map(|l| l.query.as_str()),
            LocationType::Web => self.web_location.as_ref().map(|l| l.url.as_str()),
            LocationType::Unknown => None,
        }
    }

    pub fn web(url: impl Into<String>) -> Self {
        Self {
            location_type: LocationType::Web,
            web_location: Some(UrlLocation { url: url.into() }),
            ..Self::default()
        }
    }

    pub fn s3(uri: impl Into<String>) -> Self {
        Self {
            location_type: LocationType::S3,
            s3_location: Some(UriLocation { uri: uri.into() }),
            ..Self::default()
        }
    }

    pub fn custom(id: impl Into<String>) -> Self {
        Self {
            location_type: LocationType::Custom,
            custom_document_location: Some(IdLocation { id: id.into() }),
            ..Self::default()
        }
    }

    pub fn sql(query: impl Into<String>) -> Self {
        Self {
            location_type: LocationType::Sql,
            sql_location: Some(QueryLocation {
                query: query.into(),
            }),
            ..Self::default()
        }
    }
}

impl Reference {
    pub fn new(location: RefLocation) -> Self {
        Self {
            location,
            display_title: None,
        }
    }

    pub fn titled(location: RefLocation, title: impl Into<String>) -> Self {
        Self {
            location,
            display_title: Some(title.into()),
        }
    }
}

/// Everything aggregated from one turn's event stream. Owned by the caller
/// for the lifetime of the turn and replaced wholesale on the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Generated text, concatenated from chunks in arrival order.
    pub text: String,
    /// Citations in arrival order, batch order preserved.
    pub citations: Vec<Citation>,
    /// Trace fragments grouped by mapped category label, arrival order
    /// preserved within each label.
    pub trace: BTreeMap<String, Vec<serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_to_tagged_json() {
        let event = ResponseEvent::Trace {
            category: "orchestrationTrace".into(),
            payload: serde_json::json!({"rationale": {"traceId": "t-1"}}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"trace""#), "json: {json}");
        assert!(json.contains(r#""category":"orchestrationTrace""#), "json: {json}");
    }

    #[test]
    fn location_type_roundtrips_vendor_tags() {
        for (tag, expected) in [
            ("\"CONFLUENCE\"", LocationType::Confluence),
            ("\"CUSTOM\"", LocationType::Custom),
            ("\"KENDRA\"", LocationType::Kendra),
            ("\"S3\"", LocationType::S3),
            ("\"SALESFORCE\"", LocationType::Salesforce),
            ("\"SHAREPOINT\"", LocationType::SharePoint),
            ("\"SQL\"", LocationType::Sql),
            ("\"WEB\"", LocationType::Web),
        ] {
            let parsed: LocationType = serde_json::from_str(tag).unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(serde_json::to_string(&parsed).unwrap(), tag);
        }
    }

    #[test]
    fn unrecognized_location_tag_maps_to_unknown() {
        let parsed: LocationType = serde_json::from_str("\"QUANTUM\"").unwrap();
        assert_eq!(parsed, LocationType::Unknown);
    }

    #[test]
    fn location_value_extracts_the_tagged_field() {
        assert_eq!(RefLocation::web("http://x").value(), Some("http://x"));
        assert_eq!(RefLocation::s3("s3://bucket/key").value(), Some("s3://bucket/key"));
        assert_eq!(RefLocation::custom("doc-7").value(), Some("doc-7"));
        assert_eq!(RefLocation::sql("SELECT 1").value(), Some("SELECT 1"));
    }

    #[test]
    fn location_value_is_none_when_sub_object_missing() {
        let loc = RefLocation {
            location_type: LocationType::Web,
            ..RefLocation::default()
        };
        assert_eq!(loc.value(), None);
        assert_eq!(RefLocation::default().value(), None);
    }

    #[test]
    fn link_types_exclude_custom_sql_unknown() {
        assert!(LocationType::Web.is_link());
        assert!(LocationType::S3.is_link());
        assert!(LocationType::SharePoint.is_link());
        assert!(!LocationType::Custom.is_link());
        assert!(!LocationType::Sql.is_link());
        assert!(!LocationType::Unknown.is_link());
    }

    #[test]
    fn reference_deserializes_vendor_shape() {
        let json = r#"{
            "location": {
                "type": "SHAREPOINT",
                "sharePointLocation": {"url": "https://sp.example/doc"}
            },
            "displayTitle": "Quarterly report"
        }"#;
        let parsed: Reference = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.location.value(), Some("https://sp.example/doc"));
        assert_eq!(parsed.display_title.as_deref(), Some("Quarterly report"));
    }

    #[test]
    fn chunk_bytes_roundtrip() {
        let event = ResponseEvent::Chunk {
            bytes: Bytes::from_static(b"The sky is "),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ResponseEvent = serde_json::from_str(&json).unwrap();
        match back {
            ResponseEvent::Chunk { bytes } => assert_eq!(&bytes[..], b"The sky is "),
            other => panic!("expected chunk, got {other:?}"),
        }
    }
}
