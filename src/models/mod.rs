//! Domain models for Docket.
//!
//! # Core Concepts
//!
//! - [`Project`]: One checklist upload. Owns everything below and cascades on delete.
//! - [`ChecklistItem`]: A required document, driven through [`ItemState`] by the tracker.
//! - [`Template`]: Immutable document skeleton with `{{ slot }}` placeholders.
//! - [`ContextBlob`]: Reference material reduced to plain text by an external extractor.
//! - [`Artifact`]: The filled document produced by a successful assembly.
//!
//! ## Transient Values
//!
//! - [`ExtractionResult`]: One field answer from the completion service. Only
//!   accepted answers survive, as [`ExtractedField`] entries on the item.

mod artifact;
mod context;
mod field;
mod item;
mod project;
mod template;

pub use artifact::*;
pub use context::*;
pub use field::*;
pub use item::*;
pub use project::*;
pub use template::*;
