use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Completion, CompletionError, CompletionRequest, CompletionService};
use crate::extraction::{prompt_context, prompt_field};

/// Deterministic in-process completion service.
///
/// Answers a field only when the configured value actually occurs in the
/// prompt's context section, so "the blobs never mention it" behaves like a
/// real model saying `NOT_FOUND`.
#[derive(Debug, Default)]
pub struct FakeCompletion {
    answers: Vec<(String, String, f64)>,
    fail_first: usize,
    hang_first: usize,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `field` with `value` at `confidence` when the context mentions it.
    pub fn answer(mut self, field: &str, value: &str, confidence: f64) -> Self {
        self.answers
            .push((field.to_string(), value.to_string(), confidence));
        self
    }

    /// Fail the first `n` calls with a retryable error.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Never respond.
    pub fn hanging(self) -> Self {
        self.hanging_first(usize::MAX)
    }

    /// Leave the first `n` calls unanswered.
    pub fn hanging_first(mut self, n: usize) -> Self {
        self.hang_first = n;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log poisoned").clone()
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("prompt log poisoned")
            .push(request.prompt.clone());

        if call < self.hang_first {
            std::future::pending::<()>().await;
        }
        if call < self.fail_first {
            return Err(CompletionError::Unavailable(format!(
                "scripted failure {}",
                call + 1
            )));
        }

        let Some(field) = prompt_field(&request.prompt) else {
            return Ok(Completion::not_found());
        };
        let context = prompt_context(&request.prompt).to_lowercase();

        let answer = self
            .answers
            .iter()
            .find(|(name, value, _)| name == field && context.contains(&value.to_lowercase()));

        Ok(match answer {
            Some((_, value, confidence)) => Completion::new(value.clone(), *confidence),
            None => Completion::new("NOT_FOUND", 0.0),
        })
    }

    fn name(&self) -> &str {
        "fake"
    }
}
