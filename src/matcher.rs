//! Template matcher.
//!
//! Scores every template name against an item's title and description and
//! picks the best one above a threshold. Purely local and deterministic.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChecklistItem, Template};

/// Tokens that say nothing about what a document is.
const FILLER_TOKENS: &[&str] = &[
    "template", "form", "the", "a", "an", "of", "and", "for", "to", "in",
];

const OVERLAP_WEIGHT: f64 = 0.6;
const CONTAINMENT_WEIGHT: f64 = 0.4;

/// Scores closer than this are treated as a tie.
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub template_id: Uuid,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    threshold: f64,
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self { threshold: 0.35 }
    }
}

impl TemplateMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Select the best template for `item`, or `None` when nothing clears the
    /// threshold.
    ///
    /// Ties go to the template whose slot count is closest to the item's
    /// required field count, then to the smallest template id.
    pub fn find_match(&self, item: &ChecklistItem, templates: &[Template]) -> Option<MatchResult> {
        let required = item.required_fields.len();

        let best = templates
            .iter()
            .map(|t| (t, score(item, t)))
            .filter(|(_, s)| *s >= self.threshold)
            .min_by(|(a, sa), (b, sb)| {
                compare_scores(*sb, *sa)
                    .then_with(|| {
                        slot_distance(a, required).cmp(&slot_distance(b, required))
                    })
                    .then_with(|| a.id.cmp(&b.id))
            });

        match best {
            Some((template, score)) => {
                tracing::debug!(
                    item = %item.title,
                    template = %template.name,
                    score,
                    "Template matched"
                );
                Some(MatchResult {
                    template_id: template.id,
                    score,
                })
            }
            None => {
                tracing::debug!(item = %item.title, "No template cleared the match threshold");
                None
            }
        }
    }
}

/// Similarity between an item and a template name on a 0..=1 scale.
///
/// 0.6 x the share of name tokens found in the item's title or description,
/// plus 0.4 x a containment bonus: 1.0 when the normalised name and title
/// contain one another, 0.5 when the name appears in the description.
pub fn score(item: &ChecklistItem, template: &Template) -> f64 {
    let name_tokens = tokens(&template.name);
    if name_tokens.is_empty() {
        return 0.0;
    }

    let description = item.description.as_deref().unwrap_or("");
    let item_tokens: BTreeSet<String> = tokens(&item.title)
        .into_iter()
        .chain(tokens(description))
        .collect();

    let shared = name_tokens
        .iter()
        .filter(|t| item_tokens.contains(t.as_str()))
        .count();
    let overlap = shared as f64 / name_tokens.len() as f64;

    let name = name_tokens.join(" ");
    let title = tokens(&item.title).join(" ");
    let description = tokens(description).join(" ");
    let bonus = if !title.is_empty() && (contains_phrase(&title, &name) || contains_phrase(&name, &title)) {
        1.0
    } else if contains_phrase(&description, &name) {
        0.5
    } else {
        0.0
    };

    (OVERLAP_WEIGHT * overlap + CONTAINMENT_WEIGHT * bonus).min(1.0)
}

/// Lowercased alphanumeric tokens, filler words removed, order kept.
fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !FILLER_TOKENS.contains(&t.as_str()))
        .collect()
}

/// Whole-token containment of `needle` in `haystack`, both space-joined.
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() || haystack.is_empty() {
        return false;
    }
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}

fn slot_distance(template: &Template, required: usize) -> usize {
    template.field_slots.len().abs_diff(required)
}

fn compare_scores(a: f64, b: f64) -> Ordering {
    if (a - b).abs() < SCORE_EPSILON {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemState, TemplateContent};
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn item(title: &str, description: Option<&str>, required: &[&str]) -> ChecklistItem {
        ChecklistItem {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            title: title.into(),
            description: description.map(Into::into),
            required_fields: required.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            state: ItemState::Pending,
            matched_template_id: None,
            pinned_template_id: None,
            extracted_fields: BTreeMap::new(),
            field_issues: Vec::new(),
            artifact_ref: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn template(id: u128, name: &str, slots: &[&str]) -> Template {
        Template {
            id: Uuid::from_u128(id),
            project_id: Uuid::nil(),
            name: name.into(),
            field_slots: slots.iter().map(|s| s.to_string()).collect(),
            raw_content: TemplateContent::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn fire_safety_certificate_scenario() {
        let item = item(
            "Fire Safety Certificate",
            None,
            &["issuer", "date", "certNumber"],
        );
        let fire = template(2, "Fire Safety Certificate Template", &["issuer", "date", "certNumber"]);
        let electrical = template(1, "Electrical Certificate Template", &["issuer", "date"]);

        let result = TemplateMatcher::default()
            .find_match(&item, &[electrical.clone(), fire.clone()])
            .expect("fire template should match");

        assert_eq!(result.template_id, fire.id);
        assert!(result.score > 0.35);
        assert!(score(&item, &electrical) < 0.35);
    }

    #[test]
    fn nothing_above_threshold_is_no_match() {
        let item = item("Asbestos Survey", Some("pre-demolition survey"), &[]);
        let templates = [template(1, "Electrical Certificate", &[])];
        assert!(TemplateMatcher::default().find_match(&item, &templates).is_none());
    }

    #[test]
    fn name_in_description_earns_half_bonus() {
        let item = item("Handover pack", Some("include the lift inspection report"), &[]);
        let t = template(1, "Lift Inspection Report", &[]);
        let s = score(&item, &t);
        assert!((s - (0.6 + 0.2)).abs() < 1e-9, "score was {}", s);
    }

    #[test]
    fn containment_is_token_aligned() {
        let item = item("Fireproofing Plan", None, &[]);
        let t = template(1, "Fire Plan", &[]);
        // "fire" is not a token of "fireproofing"
        assert!((score(&item, &t) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn tie_prefers_closest_slot_count() {
        let item = item("Inspection Report", None, &["a", "b", "c"]);
        let few = template(1, "Inspection Report", &["a"]);
        let close = template(2, "Inspection Report", &["a", "b", "c"]);

        let result = TemplateMatcher::default()
            .find_match(&item, &[few, close.clone()])
            .unwrap();
        assert_eq!(result.template_id, close.id);
    }

    #[test]
    fn full_tie_prefers_smallest_id() {
        let item = item("Inspection Report", None, &[]);
        let b = template(9, "Inspection Report", &[]);
        let a = template(3, "Inspection Report", &[]);

        let result = TemplateMatcher::default().find_match(&item, &[b, a]).unwrap();
        assert_eq!(result.template_id, Uuid::from_u128(3));
    }

    #[test]
    fn filler_only_names_never_match() {
        let item = item("Template", None, &[]);
        assert_eq!(score(&item, &template(1, "The Template", &[])), 0.0);
    }
}
