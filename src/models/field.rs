use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single field value produced by one extraction attempt.
///
/// Transient: only the accepted results are folded into the item's
/// [`ExtractedField`] map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub field_name: String,
    pub value: String,
    /// Self-reported confidence in `[0, 1]`.
    pub confidence: f64,
    pub source_blob_id: Option<Uuid>,
}

/// The accepted value for a field slot, as stored on the checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub value: String,
    pub confidence: f64,
    pub source_blob_id: Option<Uuid>,
    pub origin: FieldOrigin,
}

impl ExtractedField {
    pub fn manual(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            confidence: 1.0,
            source_blob_id: None,
            origin: FieldOrigin::Manual,
        }
    }

    pub fn from_checklist(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            confidence: 1.0,
            source_blob_id: None,
            origin: FieldOrigin::Checklist,
        }
    }
}

impl From<ExtractionResult> for ExtractedField {
    fn from(result: ExtractionResult) -> Self {
        Self {
            value: result.value,
            confidence: result.confidence,
            source_blob_id: result.source_blob_id,
            origin: FieldOrigin::Extracted,
        }
    }
}

/// Where an accepted field value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    /// Returned by the completion service above the confidence threshold.
    Extracted,
    /// Entered by a user; never overwritten by extraction.
    Manual,
    /// Derived from the checklist item itself.
    Checklist,
}

/// A field the last extraction could not fill, surfaced for manual entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field_name: String,
    #[serde(flatten)]
    pub kind: FieldIssueKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum FieldIssueKind {
    /// A candidate was returned but below the acceptance threshold.
    LowConfidence { confidence: f64, candidate: String },
    /// No blob mentioned the field.
    NotFound,
}
