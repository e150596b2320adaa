//! Context extractor.
//!
//! Fills a template's field slots from the project's context store by asking
//! the completion service one field at a time, chunk by chunk. Field-level
//! problems never fail the extraction; only an exhausted external-call budget
//! does.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::completion::{complete_with_retry, CompletionRequest, CompletionService, RetryPolicy};
use crate::config::ExtractionConfig;
use crate::context::{Chunk, ContextStore};
use crate::models::{
    ExtractedField, ExtractionResult, FailureReason, FieldIssue, FieldIssueKind, FieldOrigin,
    Template,
};

const FIELD_MARKER: &str = "FIELD: ";
const CONTEXT_MARKER: &str = "CONTEXT:\n";
const NOT_FOUND: &str = "NOT_FOUND";

/// Slot filled from the checklist item title instead of the context store.
pub const DOCUMENT_NAME_SLOT: &str = "document_name";

/// What one extraction run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    /// Newly accepted values.
    pub accepted: BTreeMap<String, ExtractedField>,
    /// Slots kept from earlier runs or manual entry without calling the service.
    pub reused: Vec<String>,
    pub issues: Vec<FieldIssue>,
}

impl ExtractionReport {
    /// Fold this report into `existing`, keeping only slots of `template`.
    pub fn merge_into(
        &self,
        existing: &BTreeMap<String, ExtractedField>,
        template: &Template,
    ) -> BTreeMap<String, ExtractedField> {
        let mut merged: BTreeMap<String, ExtractedField> = existing
            .iter()
            .filter(|(name, _)| template.field_slots.contains(name))
            .map(|(name, field)| (name.clone(), field.clone()))
            .collect();
        merged.extend(self.accepted.clone());
        merged
    }
}

/// Per-call inputs besides the template and the store.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions<'a> {
    /// Title of the item being filled, used for [`DOCUMENT_NAME_SLOT`].
    pub item_title: &'a str,
    pub existing: &'a BTreeMap<String, ExtractedField>,
    /// Re-ask for slots that already hold an accepted extracted value.
    /// Manual values are kept regardless.
    pub overwrite: bool,
}

#[derive(Clone)]
pub struct ContextExtractor {
    service: Arc<dyn CompletionService>,
    config: ExtractionConfig,
    retry: RetryPolicy,
}

impl ContextExtractor {
    pub fn new(
        service: Arc<dyn CompletionService>,
        config: ExtractionConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            config,
            retry,
        }
    }

    pub async fn extract(
        &self,
        template: &Template,
        store: &ContextStore,
        options: ExtractOptions<'_>,
    ) -> Result<ExtractionReport, FailureReason> {
        let chunks = store.chunks(self.config.max_context_chars);
        let labels = template.raw_content.slot_contexts();
        let cells = template.raw_content.slot_cells();
        let mut report = ExtractionReport::default();

        for slot in &template.field_slots {
            if let Some(previous) = options.existing.get(slot) {
                if self.keeps(previous, options.overwrite) {
                    report.reused.push(slot.clone());
                    continue;
                }
            }

            if slot == DOCUMENT_NAME_SLOT {
                report
                    .accepted
                    .insert(slot.clone(), ExtractedField::from_checklist(options.item_title));
                continue;
            }

            let target = SlotTarget {
                slot: slot.as_str(),
                label: labels.get(slot).map(String::as_str).unwrap_or(slot.as_str()),
                cell: cells.get(slot).map(String::as_str),
            };
            let best = self.best_answer(template, &target, &chunks).await?;

            match best {
                Some(result) if result.confidence >= self.config.min_confidence => {
                    tracing::debug!(
                        field = %slot,
                        confidence = result.confidence,
                        "Field accepted"
                    );
                    report.accepted.insert(slot.clone(), result.into());
                }
                // A failed re-extraction never discards an accepted value.
                _ if options.existing.contains_key(slot) => report.reused.push(slot.clone()),
                Some(result) => {
                    tracing::info!(
                        field = %slot,
                        confidence = result.confidence,
                        "Low-confidence answer left unset"
                    );
                    report.issues.push(FieldIssue {
                        field_name: slot.clone(),
                        kind: FieldIssueKind::LowConfidence {
                            confidence: result.confidence,
                            candidate: result.value,
                        },
                    });
                }
                None => {
                    tracing::info!(field = %slot, "Field not found in context");
                    report.issues.push(FieldIssue {
                        field_name: slot.clone(),
                        kind: FieldIssueKind::NotFound,
                    });
                }
            }
        }

        Ok(report)
    }

    fn keeps(&self, previous: &ExtractedField, overwrite: bool) -> bool {
        match previous.origin {
            FieldOrigin::Manual => true,
            FieldOrigin::Extracted | FieldOrigin::Checklist => {
                !overwrite && previous.confidence >= self.config.min_confidence
            }
        }
    }

    /// Highest-confidence answer across chunks; ties keep the earlier chunk.
    async fn best_answer(
        &self,
        template: &Template,
        target: &SlotTarget<'_>,
        chunks: &[Chunk],
    ) -> Result<Option<ExtractionResult>, FailureReason> {
        let mut best: Option<ExtractionResult> = None;

        for chunk in chunks {
            let request = CompletionRequest {
                prompt: build_prompt(&template.name, target, &chunk.render()),
                max_tokens: self.config.max_tokens,
            };
            let completion =
                complete_with_retry(self.service.as_ref(), &request, &self.retry).await?;

            let value = completion.text.trim();
            if value.is_empty() || value.eq_ignore_ascii_case(NOT_FOUND) {
                continue;
            }
            if best
                .as_ref()
                .is_some_and(|b| b.confidence >= completion.confidence)
            {
                continue;
            }
            best = Some(ExtractionResult {
                field_name: target.slot.to_string(),
                value: value.to_string(),
                confidence: completion.confidence,
                source_blob_id: chunk.provenance_of(value),
            });
        }

        Ok(best)
    }
}

/// Where a slot sits in its template.
struct SlotTarget<'a> {
    slot: &'a str,
    label: &'a str,
    cell: Option<&'a str>,
}

fn build_prompt(template_name: &str, target: &SlotTarget<'_>, context: &str) -> String {
    let SlotTarget { slot, label, .. } = target;
    let cell = target
        .cell
        .map(|key| format!("Template cell: {key}\n"))
        .unwrap_or_default();
    format!(
        "Document template: {template_name}\n\
         {FIELD_MARKER}{slot}\n\
         Label in template: {label}\n\
         {cell}\n\
         Find the value for this field in the reference material below. \
         Use the label to disambiguate similar fields. If a source holds a list or \
         a longer passage, summarise it into text suitable for a document cell. \
         If the material does not contain the value, answer {NOT_FOUND}.\n\n\
         {CONTEXT_MARKER}{context}"
    )
}

/// The field a prompt asks about.
pub fn prompt_field(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(FIELD_MARKER))
        .map(str::trim)
}

/// The reference material embedded in a prompt.
pub fn prompt_context(prompt: &str) -> &str {
    prompt
        .split_once(CONTEXT_MARKER)
        .map(|(_, context)| context)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::FakeCompletion;
    use crate::models::{Block, ContextBlob, MediaType, TemplateContent};
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn certificate() -> Template {
        let raw_content = TemplateContent {
            blocks: vec![Block::Table {
                rows: vec![
                    vec!["Issuer".into(), "{{issuer}}".into()],
                    vec!["Date".into(), "{{date}}".into()],
                    vec!["Certificate No.".into(), "{{certNumber}}".into()],
                ],
            }],
        };
        Template {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            name: "Fire Safety Certificate".into(),
            field_slots: raw_content.placeholders(),
            raw_content,
            created_at: Utc::now(),
        }
    }

    fn store(texts: &[&str]) -> ContextStore {
        ContextStore::new(
            texts
                .iter()
                .map(|t| ContextBlob {
                    id: Uuid::new_v4(),
                    project_id: Uuid::nil(),
                    source_file: "minutes.txt".into(),
                    extracted_text: t.to_string(),
                    media_type: MediaType::Text,
                    created_at: Utc::now(),
                })
                .collect(),
        )
    }

    fn extractor(fake: Arc<FakeCompletion>) -> ContextExtractor {
        let retry = RetryPolicy {
            max_retries: 0,
            timeout: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        ContextExtractor::new(fake, ExtractionConfig::default(), retry)
    }

    fn fake() -> FakeCompletion {
        FakeCompletion::new()
            .answer("issuer", "City Fire Dept", 0.9)
            .answer("date", "2024-03-01", 0.8)
            .answer("certNumber", "FS-1182", 0.95)
    }

    fn options(existing: &BTreeMap<String, ExtractedField>) -> ExtractOptions<'_> {
        ExtractOptions {
            item_title: "Fire Safety Certificate",
            existing,
            overwrite: false,
        }
    }

    #[test]
    fn prompt_markers_round_trip() {
        let target = SlotTarget {
            slot: "issuer",
            label: "Issuer",
            cell: None,
        };
        let prompt = build_prompt("T", &target, "[source: x]\nFIELD: decoy");
        assert_eq!(prompt_field(&prompt), Some("issuer"));
        assert_eq!(prompt_context(&prompt), "[source: x]\nFIELD: decoy");
        assert!(prompt.contains("Label in template: Issuer"));
    }

    #[tokio::test]
    async fn prompts_name_the_label_and_cell_of_the_slot() {
        let fake = Arc::new(fake());
        let store = store(&["Certificate FS-1182 attached."]);

        extractor(fake.clone())
            .extract(&certificate(), &store, options(&BTreeMap::new()))
            .await
            .unwrap();

        let prompts = fake.prompts();
        let cert = prompts
            .iter()
            .find(|p| prompt_field(p) == Some("certNumber"))
            .expect("certNumber should be asked");
        assert!(cert.contains("Label in template: Certificate No.\n"));
        assert!(cert.contains("Template cell: table_0_row_2_col_1\n"));
        assert!(prompt_context(cert).contains("Certificate FS-1182 attached."));
    }

    #[tokio::test]
    async fn missing_field_is_left_unset_without_failing() {
        let fake = Arc::new(fake());
        let store = store(&["Inspection by City Fire Dept on 2024-03-01."]);
        let existing = BTreeMap::new();

        let report = extractor(fake.clone())
            .extract(&certificate(), &store, options(&existing))
            .await
            .unwrap();

        assert_eq!(report.accepted["issuer"].value, "City Fire Dept");
        assert_eq!(report.accepted["date"].value, "2024-03-01");
        assert!(!report.accepted.contains_key("certNumber"));
        assert_eq!(
            report.issues,
            vec![FieldIssue {
                field_name: "certNumber".into(),
                kind: FieldIssueKind::NotFound,
            }]
        );
    }

    #[tokio::test]
    async fn low_confidence_answers_are_surfaced_not_accepted() {
        let fake = Arc::new(FakeCompletion::new().answer("issuer", "Someone", 0.3));
        let store = store(&["Signed by Someone."]);
        let existing = BTreeMap::new();

        let report = extractor(fake)
            .extract(&certificate(), &store, options(&existing))
            .await
            .unwrap();

        assert!(report.accepted.is_empty());
        assert!(report.issues.iter().any(|i| i.field_name == "issuer"
            && matches!(i.kind, FieldIssueKind::LowConfidence { .. })));
    }

    #[tokio::test]
    async fn accepted_values_are_not_re_asked() {
        let fake = Arc::new(fake());
        let store = store(&["Inspection by City Fire Dept on 2024-03-01."]);
        let extractor = extractor(fake.clone());
        let template = certificate();

        let first = extractor
            .extract(&template, &store, options(&BTreeMap::new()))
            .await
            .unwrap();
        let fields = first.merge_into(&BTreeMap::new(), &template);
        let calls_after_first = fake.calls();

        let second = extractor
            .extract(&template, &store, options(&fields))
            .await
            .unwrap();

        assert_eq!(second.merge_into(&fields, &template), fields);
        assert_eq!(second.reused, vec!["issuer", "date"]);
        // Only the still-missing certNumber is asked again.
        assert_eq!(fake.calls(), calls_after_first + 1);
    }

    #[tokio::test]
    async fn overwrite_never_replaces_manual_values() {
        let fake = Arc::new(fake());
        let store = store(&["Inspection by City Fire Dept, certificate FS-1182."]);
        let existing = BTreeMap::from([("issuer".to_string(), ExtractedField::manual("Fire Marshal"))]);

        let report = extractor(fake)
            .extract(
                &certificate(),
                &store,
                ExtractOptions {
                    overwrite: true,
                    ..options(&existing)
                },
            )
            .await
            .unwrap();

        assert!(!report.accepted.contains_key("issuer"));
        assert!(report.reused.contains(&"issuer".to_string()));
        assert_eq!(report.accepted["certNumber"].value, "FS-1182");
    }

    #[tokio::test]
    async fn provenance_names_the_mentioning_blob() {
        let fake = Arc::new(fake());
        let store = store(&["Agenda only.", "Certificate FS-1182 attached."]);
        let cert_blob = store.blobs()[1].id;

        let report = extractor(fake)
            .extract(&certificate(), &store, options(&BTreeMap::new()))
            .await
            .unwrap();

        assert_eq!(report.accepted["certNumber"].source_blob_id, Some(cert_blob));
    }

    #[tokio::test]
    async fn document_name_comes_from_the_item() {
        let fake = Arc::new(FakeCompletion::new());
        let raw_content = TemplateContent {
            blocks: vec![Block::Paragraph {
                text: "{{document_name}}".into(),
            }],
        };
        let template = Template {
            field_slots: raw_content.placeholders(),
            raw_content,
            ..certificate()
        };

        let report = extractor(fake.clone())
            .extract(&template, &store(&["x"]), options(&BTreeMap::new()))
            .await
            .unwrap();

        assert_eq!(report.accepted["document_name"].value, "Fire Safety Certificate");
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_service_fails_the_extraction() {
        let fake = Arc::new(fake().failing_first(100));
        let result = extractor(fake)
            .extract(&certificate(), &store(&["anything"]), options(&BTreeMap::new()))
            .await;
        assert!(matches!(
            result,
            Err(FailureReason::ExternalServiceError { .. })
        ));
    }
}
