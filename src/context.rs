//! Context store: a project's reference material as a read-only view.
//!
//! The store is loaded once per pipeline run and shared between item workers.
//! Chunking splits by blob first, then by paragraph, and every segment keeps
//! the id of the blob it came from.

use std::sync::Arc;

use uuid::Uuid;

use crate::models::ContextBlob;

/// Read-only view over a project's context blobs.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    blobs: Arc<Vec<ContextBlob>>,
}

/// A piece of one blob's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub blob_id: Uuid,
    pub text: String,
}

/// A group of segments that fits one completion call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chunk {
    pub segments: Vec<Segment>,
}

impl Chunk {
    /// Render the chunk for a prompt, one `[source: id]` header per segment.
    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("[source: {}]\n{}", s.blob_id, s.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The blob a value most likely came from: the first segment mentioning
    /// it, else the first segment of the chunk.
    pub fn provenance_of(&self, value: &str) -> Option<Uuid> {
        let needle = value.trim().to_lowercase();
        self.segments
            .iter()
            .find(|s| !needle.is_empty() && s.text.to_lowercase().contains(&needle))
            .or_else(|| self.segments.first())
            .map(|s| s.blob_id)
    }

    fn len(&self) -> usize {
        self.segments.iter().map(|s| s.text.chars().count()).sum()
    }
}

impl ContextStore {
    pub fn new(blobs: Vec<ContextBlob>) -> Self {
        Self {
            blobs: Arc::new(blobs),
        }
    }

    pub fn blobs(&self) -> &[ContextBlob] {
        &self.blobs
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.iter().all(|b| b.extracted_text.trim().is_empty())
    }

    /// Split all blob text into chunks of at most `max_chars` characters of
    /// body text.
    ///
    /// Whole blobs are packed together while they fit. A blob that alone
    /// exceeds the budget is split on blank-line paragraph boundaries, and a
    /// single paragraph larger than the budget is cut on char boundaries.
    pub fn chunks(&self, max_chars: usize) -> Vec<Chunk> {
        let max_chars = max_chars.max(1);
        let mut chunks = Vec::new();
        let mut current = Chunk::default();

        for blob in self.blobs.iter() {
            let text = blob.extracted_text.trim();
            if text.is_empty() {
                continue;
            }

            for piece in split_blob(text, max_chars) {
                let piece_len = piece.chars().count();
                if !current.segments.is_empty() && current.len() + piece_len > max_chars {
                    chunks.push(std::mem::take(&mut current));
                }
                // Consecutive paragraphs of the same blob share one segment.
                match current.segments.last_mut() {
                    Some(last) if last.blob_id == blob.id => {
                        last.text.push_str("\n\n");
                        last.text.push_str(&piece);
                    }
                    _ => current.segments.push(Segment {
                        blob_id: blob.id,
                        text: piece,
                    }),
                }
            }
        }

        if !current.segments.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

/// Normalise text coming from the extraction service.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn split_blob(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_len = paragraph.chars().count();
        if para_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(hard_split(paragraph, max_chars));
            continue;
        }

        // +2 for the paragraph separator
        let joined_len = current.chars().count() + 2 + para_len;
        if !current.is_empty() && joined_len > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}
