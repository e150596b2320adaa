//! Docket: checklist-driven document assembly.
//!
//! A project's checklist becomes a set of tracked items. Each item is matched
//! to a template, filled from the project's reference material through a
//! completion service, and assembled into a document artifact. See
//! [`tracker::Tracker`] for the pipeline driver.

pub mod api;
pub mod assembly;
pub mod checklist;
pub mod completion;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod extraction;
pub mod matcher;
pub mod models;
pub mod tracker;
