use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::item::{ChecklistItem, ChecklistItemSeed, ItemState};

/// A project created from one checklist upload.
///
/// Projects own their checklist items, template pool, and context store.
/// Deleting a project cascades to all of them and to generated artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for ingesting a checklist, which creates the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestChecklistInput {
    pub name: String,
    #[serde(default)]
    pub items: Vec<ChecklistItemSeed>,
    /// Raw checklist text (one title per line, or JSON), parsed and appended
    /// after `items`.
    #[serde(default)]
    pub checklist: Option<String>,
}

/// A project with its checklist items in checklist order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectWithItems {
    #[serde(flatten)]
    pub project: Project,
    pub items: Vec<ChecklistItem>,
}

/// Aggregate project status, derived from item states on every read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectStatus {
    pub project_id: Uuid,
    pub total: usize,
    pub counts: BTreeMap<ItemState, usize>,
    /// `Pending` items whose last match attempt found no template.
    pub awaiting_template: usize,
    /// True iff the project has items and all of them are `Generated`.
    pub complete: bool,
}

impl ProjectStatus {
    pub fn count(&self, state: ItemState) -> usize {
        self.counts.get(&state).copied().unwrap_or(0)
    }
}

/// One dashboard row per checklist item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardRow {
    pub item_id: Uuid,
    pub title: String,
    pub state: ItemState,
    pub template_status: TemplateStatus,
    pub template_name: Option<String>,
    pub artifact_ref: Option<Uuid>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Matched,
    Unmatched,
}

/// A project with its status and dashboard rows, used for detailed responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDashboard {
    #[serde(flatten)]
    pub project: Project,
    pub status: ProjectStatus,
    pub rows: Vec<DashboardRow>,
}
