use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reusable document skeleton with named field slots.
///
/// Templates are immutable once registered and are shared read-only by every
/// item of the owning project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    /// Slot names in the order they first appear in `raw_content`.
    pub field_slots: Vec<String>,
    pub raw_content: TemplateContent,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterTemplateInput {
    pub name: String,
    /// Explicit slot order. When empty, slots are derived from placeholders.
    #[serde(default)]
    pub field_slots: Vec<String>,
    pub raw_content: TemplateContent,
}

/// Structured template body: paragraphs and tables of text.
///
/// Field slots are written as `{{ field_name }}` anywhere in a paragraph or
/// a table cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateContent {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Paragraph { text: String },
    Table { rows: Vec<Vec<String>> },
}

impl TemplateContent {
    /// Unique placeholder names in first-appearance order.
    pub fn placeholders(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for text in self.texts() {
            for name in placeholder_names(text) {
                if !seen.contains(&name) {
                    seen.push(name);
                }
            }
        }
        seen
    }

    /// Every table cell keyed as `table_{t}_row_{r}_col_{c}`, in reading
    /// order.
    pub fn cell_map(&self) -> Vec<(String, String)> {
        let mut cells = Vec::new();
        for (t, rows) in self.tables().enumerate() {
            for (r, row) in rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    cells.push((cell_key(t, r, c), cell.trim().to_string()));
                }
            }
        }
        cells
    }

    /// The key of the first table cell holding each slot. Slots that only
    /// appear in paragraphs have no cell.
    pub fn slot_cells(&self) -> HashMap<String, String> {
        let mut cells = HashMap::new();
        for (key, text) in self.cell_map() {
            for name in placeholder_names(&text) {
                cells.entry(name).or_insert_with(|| key.clone());
            }
        }
        cells
    }

    /// The human-readable label around each slot.
    ///
    /// For a table cell the label is the nearest non-placeholder cell to the
    /// left, then above. For a paragraph it is the paragraph itself.
    pub fn slot_contexts(&self) -> HashMap<String, String> {
        let mut contexts = HashMap::new();
        for block in &self.blocks {
            match block {
                Block::Paragraph { text } => {
                    for name in placeholder_names(text) {
                        contexts
                            .entry(name)
                            .or_insert_with(|| text.trim().to_string());
                    }
                }
                Block::Table { rows } => {
                    for (r, row) in rows.iter().enumerate() {
                        for (c, cell) in row.iter().enumerate() {
                            for name in placeholder_names(cell) {
                                let label = table_label(rows, r, c)
                                    .unwrap_or_else(|| cell.trim().to_string());
                                contexts.entry(name).or_insert(label);
                            }
                        }
                    }
                }
            }
        }
        contexts
    }

    /// Replace every known placeholder with its value, leaving everything
    /// else untouched.
    pub fn fill(&self, values: &BTreeMap<String, String>) -> TemplateContent {
        let blocks = self
            .blocks
            .iter()
            .map(|block| match block {
                Block::Paragraph { text } => Block::Paragraph {
                    text: substitute(text, values),
                },
                Block::Table { rows } => Block::Table {
                    rows: rows
                        .iter()
                        .map(|row| row.iter().map(|cell| substitute(cell, values)).collect())
                        .collect(),
                },
            })
            .collect();
        TemplateContent { blocks }
    }

    fn texts(&self) -> Vec<&str> {
        let mut texts = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Paragraph { text } => texts.push(text.as_str()),
                Block::Table { rows } => {
                    texts.extend(rows.iter().flat_map(|row| row.iter().map(String::as_str)))
                }
            }
        }
        texts
    }

    fn tables(&self) -> impl Iterator<Item = &Vec<Vec<String>>> {
        self.blocks.iter().filter_map(|block| match block {
            Block::Table { rows } => Some(rows),
            Block::Paragraph { .. } => None,
        })
    }
}

fn cell_key(table: usize, row: usize, col: usize) -> String {
    format!("table_{}_row_{}_col_{}", table, row, col)
}

fn table_label(rows: &[Vec<String>], r: usize, c: usize) -> Option<String> {
    let is_label = |text: &String| {
        let text = text.trim();
        !text.is_empty() && placeholder_names(text).is_empty()
    };

    rows[r][..c]
        .iter()
        .rev()
        .find(|cell| is_label(cell))
        .or_else(|| {
            rows[..r]
                .iter()
                .rev()
                .filter_map(|row| row.get(c))
                .find(|cell| is_label(cell))
        })
        .map(|cell| cell.trim().to_string())
}

/// A `{{ name }}` occurrence inside a piece of text.
struct Placeholder<'a> {
    start: usize,
    end: usize,
    name: &'a str,
}

fn scan(text: &str) -> Vec<Placeholder<'_>> {
    let mut found = Vec::new();
    let mut offset = 0;
    while let Some(open) = text[offset..].find("{{") {
        let start = offset + open;
        let Some(close) = text[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        let name = text[start + 2..end - 2].trim();
        if is_slot_name(name) {
            found.push(Placeholder { start, end, name });
            offset = end;
        } else {
            offset = start + 2;
        }
    }
    found
}

fn is_slot_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
}

pub(crate) fn placeholder_names(text: &str) -> Vec<String> {
    scan(text).into_iter().map(|p| p.name.to_string()).collect()
}

fn substitute(text: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for placeholder in scan(text) {
        if let Some(value) = values.get(placeholder.name) {
            out.push_str(&text[last..placeholder.start]);
            out.push_str(value);
            last = placeholder.end;
        }
    }
    out.push_str(&text[last..]);
    out
}
