//! Checklist parsing.
//!
//! Turns an uploaded checklist (already reduced to text) into item seeds.
//! Accepts one title per line, a JSON array of titles or seed objects, or a
//! JSON object with an `items` array.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::ChecklistItemSeed;

/// Entries this short are headings or noise, not deliverables.
const MIN_TITLE_CHARS: usize = 3;

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonChecklist {
    List(Vec<JsonEntry>),
    Wrapped { items: Vec<JsonEntry> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonEntry {
    Title(String),
    Seed(ChecklistItemSeed),
}

/// Parse checklist text into seeds.
///
/// Input starting with `[` or `{` is read as JSON; anything else is read as
/// one title per line.
pub fn parse_checklist(text: &str) -> Result<Vec<ChecklistItemSeed>> {
    let trimmed = text.trim_start_matches('\u{feff}').trim();
    let seeds = if trimmed.starts_with('[') || trimmed.starts_with('{') {
        let parsed: JsonChecklist =
            serde_json::from_str(trimmed).context("Failed to parse checklist JSON")?;
        let entries = match parsed {
            JsonChecklist::List(entries) | JsonChecklist::Wrapped { items: entries } => entries,
        };
        entries
            .into_iter()
            .map(|entry| match entry {
                JsonEntry::Title(title) => ChecklistItemSeed::titled(title),
                JsonEntry::Seed(seed) => seed,
            })
            .collect()
    } else {
        trimmed.lines().map(ChecklistItemSeed::titled).collect()
    };

    Ok(clean(seeds))
}

/// Trim titles, drop short entries and duplicate titles, keep first
/// occurrence order.
pub fn clean(seeds: Vec<ChecklistItemSeed>) -> Vec<ChecklistItemSeed> {
    let mut seen = BTreeSet::new();
    seeds
        .into_iter()
        .filter_map(|mut seed| {
            seed.title = seed.title.trim().to_string();
            seed.description = seed
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty());
            if seed.title.chars().count() < MIN_TITLE_CHARS {
                return None;
            }
            seen.insert(seed.title.clone()).then_some(seed)
        })
        .collect()
}
