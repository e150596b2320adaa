//! Error types for tracker commands.
//!
//! Per-item pipeline failures are not errors at this level: they are recorded
//! on the item as a [`FailureReason`](crate::models::FailureReason) and the
//! call that produced them still succeeds.

use thiserror::Error;
use uuid::Uuid;

use crate::models::ItemState;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),

    #[error("Checklist item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("Template not found: {0}")]
    TemplateNotFound(Uuid),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(Uuid),

    #[error("Cannot {command} an item in state {state}")]
    InvalidCommand {
        command: &'static str,
        state: ItemState,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: ItemState, to: ItemState },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
