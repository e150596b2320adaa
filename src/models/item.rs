use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::field::{ExtractedField, FieldIssue};

/// One required document tracked for a project.
///
/// Items are created from checklist seeds when a project is ingested and are
/// only ever mutated by the tracker. `matched_template_id` is set exactly when
/// the item is past `Pending`; `extracted_fields` only ever holds slots of the
/// matched template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub required_fields: BTreeSet<String>,
    pub state: ItemState,
    pub matched_template_id: Option<Uuid>,
    /// Manually assigned template. Survives retries and bypasses scoring.
    pub pinned_template_id: Option<Uuid>,
    pub extracted_fields: BTreeMap<String, ExtractedField>,
    /// Fields that need manual attention after the last extraction.
    pub field_issues: Vec<FieldIssue>,
    pub artifact_ref: Option<Uuid>,
    pub last_error: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChecklistItem {
    /// An unmatched `Pending` item whose last match attempt found nothing.
    pub fn awaiting_template(&self) -> bool {
        self.state == ItemState::Pending
            && matches!(self.last_error, Some(FailureReason::NoMatchFound))
    }

    /// Plain values of the accepted fields, as consumed by assembly.
    pub fn field_values(&self) -> BTreeMap<String, String> {
        self.extracted_fields
            .iter()
            .map(|(name, field)| (name.clone(), field.value.clone()))
            .collect()
    }
}

/// Lifecycle state of a checklist item.
///
/// ```text
/// Pending -> TemplateMatched -> ContextGathered -> Generating -> Generated
///                 |                   |                |            |
///                 +------> Failed <---+----------------+            |
///                            |                                     |
///   Pending <---- retry -----+------------- regenerate ------------+
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    TemplateMatched,
    ContextGathered,
    Generating,
    Generated,
    Failed,
}

impl ItemState {
    pub const ALL: [ItemState; 6] = [
        Self::Pending,
        Self::TemplateMatched,
        Self::ContextGathered,
        Self::Generating,
        Self::Generated,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::TemplateMatched => "template_matched",
            Self::ContextGathered => "context_gathered",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "template_matched" => Some(Self::TemplateMatched),
            "context_gathered" => Some(Self::ContextGathered),
            "generating" => Some(Self::Generating),
            "generated" => Some(Self::Generated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether `self -> next` is an edge of the item state machine.
    ///
    /// The two backward edges (`Failed -> Pending`, `Generated -> Pending`)
    /// are only taken by explicit retry/regenerate commands.
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (*self, next),
            (Pending, TemplateMatched)
                | (TemplateMatched, ContextGathered)
                | (ContextGathered, Generating)
                | (Generating, Generated)
                | (TemplateMatched, Failed)
                | (ContextGathered, Failed)
                | (Generating, Failed)
                | (Failed, Pending)
                | (Generated, Pending)
        )
    }

    /// States in which a template must be assigned.
    pub fn has_template(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// States a project cancel moves to `Failed`.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::TemplateMatched | Self::ContextGathered | Self::Generating
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Structured reason attached to an item's `last_error` and to failure
/// transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("no template matched this item; assign one manually")]
    NoMatchFound,

    #[error("missing values for required fields: {}", .missing.join(", "))]
    IncompleteFields { missing: Vec<String> },

    #[error("{service} did not respond after {attempts} attempts")]
    ExternalServiceTimeout { service: String, attempts: u32 },

    #[error("{service} failed: {message}")]
    ExternalServiceError { service: String, message: String },

    #[error("cancelled by user")]
    UserCancelled,

    #[error("matched template {template_id} is no longer registered")]
    TemplateUnavailable { template_id: Uuid },

    #[error("document assembly failed: {message}")]
    AssemblyFailed { message: String },
}

/// A recorded state change of an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemTransition {
    pub id: Uuid,
    pub item_id: Uuid,
    pub from_state: ItemState,
    pub to_state: ItemState,
    pub reason: Option<FailureReason>,
    pub at: DateTime<Utc>,
}

/// Changes applied together with a state transition.
///
/// `None` leaves a column untouched; the nested `Option`s allow clearing.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub matched_template_id: Option<Option<Uuid>>,
    pub pinned_template_id: Option<Option<Uuid>>,
    pub extracted_fields: Option<BTreeMap<String, ExtractedField>>,
    pub field_issues: Option<Vec<FieldIssue>>,
    pub artifact_ref: Option<Option<Uuid>>,
    pub last_error: Option<Option<FailureReason>>,
}

impl ItemUpdate {
    pub fn apply_to(self, item: &mut ChecklistItem) {
        if let Some(v) = self.matched_template_id {
            item.matched_template_id = v;
        }
        if let Some(v) = self.pinned_template_id {
            item.pinned_template_id = v;
        }
        if let Some(v) = self.extracted_fields {
            item.extracted_fields = v;
        }
        if let Some(v) = self.field_issues {
            item.field_issues = v;
        }
        if let Some(v) = self.artifact_ref {
            item.artifact_ref = v;
        }
        if let Some(v) = self.last_error {
            item.last_error = v;
        }
    }
}

/// Input for seeding a checklist item at ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItemSeed {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required_fields: BTreeSet<String>,
}

impl ChecklistItemSeed {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            required_fields: BTreeSet::new(),
        }
    }
}

/// Input for manually entering a field value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyFieldInput {
    pub value: String,
}

/// Input for manually assigning a template to an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideTemplateInput {
    pub template_id: Uuid,
}
