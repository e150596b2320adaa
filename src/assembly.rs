//! Assembly engine: template + field values -> artifact.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Artifact, FailureReason, FormatKind, Template};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("missing values for required fields: {}", .missing.join(", "))]
    IncompleteFields { missing: Vec<String> },

    #[error("failed to encode assembled document: {0}")]
    Encoding(String),
}

impl From<AssemblyError> for FailureReason {
    fn from(e: AssemblyError) -> Self {
        match e {
            AssemblyError::IncompleteFields { missing } => FailureReason::IncompleteFields { missing },
            AssemblyError::Encoding(message) => FailureReason::AssemblyFailed { message },
        }
    }
}

/// Fill `template` with `fields` for the checklist item `item_id`.
///
/// Every slot needs a non-blank value; otherwise nothing is produced and the
/// error names exactly the missing slots in slot order. The artifact body is
/// a pure function of `(template, fields)`.
pub fn assemble(
    item_id: Uuid,
    template: &Template,
    fields: &BTreeMap<String, String>,
) -> Result<Artifact, AssemblyError> {
    let missing: Vec<String> = template
        .field_slots
        .iter()
        .filter(|slot| fields.get(*slot).map_or(true, |v| v.trim().is_empty()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(AssemblyError::IncompleteFields { missing });
    }

    let slot_values: BTreeMap<String, String> = template
        .field_slots
        .iter()
        .filter_map(|slot| fields.get(slot).map(|v| (slot.clone(), v.clone())))
        .collect();
    let filled = template.raw_content.fill(&slot_values);
    let content =
        serde_json::to_string(&filled).map_err(|e| AssemblyError::Encoding(e.to_string()))?;

    Ok(Artifact {
        id: Uuid::new_v4(),
        checklist_item_id: item_id,
        template_id: template.id,
        content,
        format_kind: FormatKind::StructuredJson,
        generated_at: Utc::now(),
    })
}
