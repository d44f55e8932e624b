use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Catalog table holding one row per accepted image
pub const IMAGES_TABLE: &str = "images";

/// Extensions accepted for upload, compared case-sensitively
pub const ACCEPTED_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

/// Cataloged image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ImageRecord {
    /// Object key of the stored image
    pub id: String,
    pub caption: Option<String>,
    /// Capture date as supplied by the uploader
    #[sqlx(rename = "date")]
    pub captured_date: Option<String>,
    pub photographer: Option<String>,
}

impl ImageRecord {
    /// A freshly cataloged record with no metadata
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            caption: None,
            captured_date: None,
            photographer: None,
        }
    }
}

/// Whether an object key names an accepted image type
pub fn has_accepted_extension(key: &str) -> bool {
    ACCEPTED_EXTENSIONS.iter().any(|ext| key.ends_with(ext))
}

/// Metadata update kinds accepted by the metadata subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataType {
    Caption,
    Date,
    Photographer,
}

impl MetadataType {
    pub const ALL: [MetadataType; 3] = [
        MetadataType::Caption,
        MetadataType::Date,
        MetadataType::Photographer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataType::Caption => "Caption",
            MetadataType::Date => "Date",
            MetadataType::Photographer => "Photographer",
        }
    }

    /// Catalog column updated by this kind
    pub fn column(&self) -> &'static str {
        match self {
            MetadataType::Caption => "caption",
            MetadataType::Date => "date",
            MetadataType::Photographer => "photographer",
        }
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetadataType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown metadata type: {}", s))
    }
}

/// Partial metadata update for an existing record.
///
/// Absent fields are left untouched; a present field is written even when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataUpdateEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "Caption", alias = "caption", default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(rename = "Date", alias = "date", default, skip_serializing_if = "Option::is_none")]
    pub captured_date: Option<String>,
    #[serde(
        rename = "Photographer",
        alias = "photographer",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub photographer: Option<String>,
}

impl MetadataUpdateEvent {
    /// Value carried for a metadata kind, if present
    pub fn field(&self, kind: MetadataType) -> Option<&str> {
        match kind {
            MetadataType::Caption => self.caption.as_deref(),
            MetadataType::Date => self.captured_date.as_deref(),
            MetadataType::Photographer => self.photographer.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        MetadataType::ALL.iter().all(|kind| self.field(*kind).is_none())
    }
}

/// Catalog mutation kind reported by the change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A committed catalog mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "op")]
    pub kind: ChangeKind,
    pub id: String,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Decode a change notification payload
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
