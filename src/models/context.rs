use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of reference material with its extracted plain text.
///
/// The raw file never reaches the pipeline: an external extraction service
/// turns documents and images into `extracted_text` before ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBlob {
    pub id: Uuid,
    pub project_id: Uuid,
    pub source_file: String,
    pub extracted_text: String,
    pub media_type: MediaType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Text,
    Image,
    Document,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "document" => Some(Self::Document),
            _ => None,
        }
    }

    /// Guess the media type from a file name's extension.
    pub fn from_file_name(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp" | "heic" => {
                Self::Image
            }
            "doc" | "docx" | "pdf" | "odt" | "rtf" | "xls" | "xlsx" | "ppt" | "pptx" => {
                Self::Document
            }
            _ => Self::Text,
        }
    }
}

/// Input for ingesting a context blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestContextInput {
    pub source_file: String,
    pub extracted_text: String,
    /// Inferred from `source_file` when omitted.
    #[serde(default)]
    pub media_type: Option<MediaType>,
}
