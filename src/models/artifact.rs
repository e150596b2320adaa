use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A generated, filled document for a checklist item.
///
/// Artifacts are immutable. Regeneration creates a new artifact and moves the
/// item's `artifact_ref`; older artifacts stay listable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub checklist_item_id: Uuid,
    pub template_id: Uuid,
    /// Body in the template's native structured format. Rendering to a
    /// downloadable layout is left to a conversion service.
    pub content: String,
    pub format_kind: FormatKind,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    StructuredJson,
}

impl FormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuredJson => "structured-json",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "structured-json" => Some(Self::StructuredJson),
            _ => None,
        }
    }
}
