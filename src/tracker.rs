//! Project state tracker.
//!
//! Drives every checklist item through
//! `Pending -> TemplateMatched -> ContextGathered -> Generating -> Generated`,
//! records each transition, and validates user commands against the item's
//! current state.
//!
//! Items of a project run concurrently on a bounded set of workers. One item
//! is only ever advanced by one task at a time (per-item async mutex), and
//! every state change is a compare-and-set against the state the worker last
//! saw, so a concurrent project cancel always wins cleanly.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::assembly::assemble;
use crate::checklist;
use crate::completion::CompletionService;
use crate::config::Config;
use crate::context::{normalize_text, ContextStore};
use crate::db::Database;
use crate::error::{TrackerError, TrackerResult};
use crate::extraction::{ContextExtractor, ExtractOptions};
use crate::matcher::TemplateMatcher;
use crate::models::*;

#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    config: Config,
    matcher: TemplateMatcher,
    extractor: ContextExtractor,
    item_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    /// Per-project cancel generation. Bumped by every cancel.
    cancels: Mutex<HashMap<Uuid, watch::Sender<u64>>>,
}

/// Shared, read-only inputs of one pipeline run.
#[derive(Clone)]
struct RunContext {
    templates: Arc<Vec<Template>>,
    store: ContextStore,
    cancel: watch::Receiver<u64>,
    generation: u64,
    overwrite: bool,
}

impl RunContext {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow() != self.generation
    }

    fn template(&self, id: Uuid) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }

    async fn wait_cancelled(&self) {
        let mut rx = self.cancel.clone();
        let generation = self.generation;
        let changed = rx.wait_for(|g| *g != generation).await.is_ok();
        if !changed {
            // Sender gone with its project; the next compare-and-set fails anyway.
            std::future::pending::<()>().await;
        }
    }
}

impl Tracker {
    pub fn new(db: Database, service: Arc<dyn CompletionService>, config: Config) -> Self {
        let extractor = ContextExtractor::new(
            service,
            config.extraction.clone(),
            config.completion.retry_policy(),
        );
        Self {
            inner: Arc::new(Inner {
                db,
                matcher: TemplateMatcher::new(config.matching.threshold),
                extractor,
                config,
                item_locks: Mutex::new(HashMap::new()),
                cancels: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    // ============================================================
    // Ingestion
    // ============================================================

    /// Create a project with one `Pending` item per checklist entry.
    pub fn ingest_checklist(
        &self,
        input: IngestChecklistInput,
    ) -> TrackerResult<(Project, Vec<ChecklistItem>)> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(TrackerError::Validation("Project name is required".into()));
        }

        let mut seeds = input.items;
        if let Some(text) = input.checklist.as_deref() {
            let parsed = checklist::parse_checklist(text)
                .map_err(|e| TrackerError::Validation(format!("{:#}", e)))?;
            seeds.extend(parsed);
        }
        let seeds = checklist::clean(seeds);

        let (project, items) = self.inner.db.create_project(IngestChecklistInput {
            name,
            items: seeds,
            checklist: None,
        })?;
        tracing::info!(
            project_id = %project.id,
            items = items.len(),
            "Checklist ingested"
        );
        Ok((project, items))
    }

    /// Register a template in a project's pool.
    ///
    /// Without declared slots, slots are the template's placeholders in
    /// first-appearance order. Declared slots must each appear as a
    /// placeholder.
    pub fn register_template(
        &self,
        project_id: Uuid,
        input: RegisterTemplateInput,
    ) -> TrackerResult<Template> {
        self.project(project_id)?;
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(TrackerError::Validation("Template name is required".into()));
        }

        let placeholders = input.raw_content.placeholders();
        let field_slots = if input.field_slots.is_empty() {
            placeholders
        } else {
            let mut slots: Vec<String> = Vec::with_capacity(input.field_slots.len());
            for slot in input.field_slots {
                let slot = slot.trim().to_string();
                if !placeholders.contains(&slot) {
                    return Err(TrackerError::Validation(format!(
                        "Field slot '{}' has no placeholder in the template",
                        slot
                    )));
                }
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
            }
            slots
        };

        let template = self.inner.db.create_template(
            project_id,
            RegisterTemplateInput {
                name,
                field_slots,
                raw_content: input.raw_content,
            },
        )?;
        tracing::info!(
            project_id = %project_id,
            template_id = %template.id,
            slots = template.field_slots.len(),
            "Template registered"
        );
        Ok(template)
    }

    pub fn ingest_context_blob(
        &self,
        project_id: Uuid,
        input: IngestContextInput,
    ) -> TrackerResult<ContextBlob> {
        self.project(project_id)?;
        let source_file = input.source_file.trim().to_string();
        if source_file.is_empty() {
            return Err(TrackerError::Validation("source_file is required".into()));
        }

        let media_type = input
            .media_type
            .unwrap_or_else(|| MediaType::from_file_name(&source_file));
        let blob = self.inner.db.create_context_blob(
            project_id,
            IngestContextInput {
                source_file,
                extracted_text: normalize_text(&input.extracted_text),
                media_type: Some(media_type),
            },
        )?;
        tracing::debug!(
            project_id = %project_id,
            blob_id = %blob.id,
            media_type = blob.media_type.as_str(),
            "Context blob ingested"
        );
        Ok(blob)
    }

    pub fn delete_project(&self, project_id: Uuid) -> TrackerResult<()> {
        let items = self.inner.db.get_items_by_project(project_id)?;
        if !self.inner.db.delete_project(project_id)? {
            return Err(TrackerError::ProjectNotFound(project_id));
        }

        self.inner
            .cancels
            .lock()
            .expect("cancel map poisoned")
            .remove(&project_id);
        let mut locks = self.inner.item_locks.lock().expect("item lock map poisoned");
        for item in &items {
            locks.remove(&item.id);
        }
        tracing::info!(project_id = %project_id, "Project deleted");
        Ok(())
    }

    // ============================================================
    // Reads
    // ============================================================

    pub fn projects(&self) -> TrackerResult<Vec<Project>> {
        Ok(self.inner.db.get_all_projects()?)
    }

    pub fn project(&self, id: Uuid) -> TrackerResult<Project> {
        self.inner
            .db
            .get_project(id)?
            .ok_or(TrackerError::ProjectNotFound(id))
    }

    pub fn items(&self, project_id: Uuid) -> TrackerResult<Vec<ChecklistItem>> {
        self.project(project_id)?;
        Ok(self.inner.db.get_items_by_project(project_id)?)
    }

    pub fn item(&self, id: Uuid) -> TrackerResult<ChecklistItem> {
        self.inner
            .db
            .get_item(id)?
            .ok_or(TrackerError::ItemNotFound(id))
    }

    pub fn transitions(&self, item_id: Uuid) -> TrackerResult<Vec<ItemTransition>> {
        self.item(item_id)?;
        Ok(self.inner.db.get_item_transitions(item_id)?)
    }

    pub fn templates(&self, project_id: Uuid) -> TrackerResult<Vec<Template>> {
        self.project(project_id)?;
        Ok(self.inner.db.get_templates_by_project(project_id)?)
    }

    pub fn context_blobs(&self, project_id: Uuid) -> TrackerResult<Vec<ContextBlob>> {
        self.project(project_id)?;
        Ok(self.inner.db.get_context_blobs(project_id)?)
    }

    pub fn artifact(&self, id: Uuid) -> TrackerResult<Artifact> {
        self.inner
            .db
            .get_artifact(id)?
            .ok_or(TrackerError::ArtifactNotFound(id))
    }

    pub fn artifacts(&self, item_id: Uuid) -> TrackerResult<Vec<Artifact>> {
        self.item(item_id)?;
        Ok(self.inner.db.get_artifacts_by_item(item_id)?)
    }

    /// Aggregate status, derived from the current item states.
    pub fn project_status(&self, project_id: Uuid) -> TrackerResult<ProjectStatus> {
        let items = self.items(project_id)?;
        Ok(status_of(project_id, &items))
    }

    /// Dashboard view: items sorted by title with their template status.
    pub fn dashboard(&self, project_id: Uuid) -> TrackerResult<ProjectDashboard> {
        let project = self.project(project_id)?;
        let items = self.inner.db.get_items_by_project(project_id)?;
        let templates: HashMap<Uuid, String> = self
            .inner
            .db
            .get_templates_by_project(project_id)?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();

        let status = status_of(project_id, &items);
        let mut rows: Vec<DashboardRow> = items
            .into_iter()
            .map(|item| {
                let template_name = item
                    .matched_template_id
                    .and_then(|id| templates.get(&id).cloned());
                DashboardRow {
                    item_id: item.id,
                    template_status: if item.matched_template_id.is_some() {
                        TemplateStatus::Matched
                    } else {
                        TemplateStatus::Unmatched
                    },
                    template_name,
                    state: item.state,
                    artifact_ref: item.artifact_ref,
                    last_error: item.last_error.map(|e| e.to_string()),
                    title: item.title,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.item_id.cmp(&b.item_id))
        });

        Ok(ProjectDashboard {
            project,
            status,
            rows,
        })
    }

    // ============================================================
    // Pipeline
    // ============================================================

    /// Run every unfinished item of a project through the pipeline.
    ///
    /// `Generated` and `Failed` items are left alone; failed items need an
    /// explicit retry. Returns the project status after the run.
    pub async fn run_project(&self, project_id: Uuid) -> TrackerResult<ProjectStatus> {
        let ctx = self.run_context(project_id, false)?;
        let items = self.inner.db.get_items_by_project(project_id)?;
        let workers = Arc::new(Semaphore::new(self.inner.config.max_workers.max(1)));
        let mut tasks = JoinSet::new();

        tracing::info!(
            project_id = %project_id,
            items = items.len(),
            templates = ctx.templates.len(),
            blobs = ctx.store.blobs().len(),
            "Pipeline run started"
        );
        if ctx.store.is_empty() {
            tracing::warn!(project_id = %project_id, "Project has no context; fields will be left unset");
        }

        for item in items {
            if matches!(item.state, ItemState::Generated | ItemState::Failed) {
                continue;
            }
            let tracker = self.clone();
            let ctx = ctx.clone();
            let workers = workers.clone();
            tasks.spawn(async move {
                let _permit = workers.acquire_owned().await;
                (item.id, tracker.drive_item(item.id, &ctx).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((item_id, Err(e))) => {
                    tracing::error!(item_id = %item_id, error = %e, "Item worker failed");
                }
                Err(e) => tracing::error!(error = %e, "Item worker panicked"),
            }
        }

        let status = self.project_status(project_id)?;
        tracing::info!(
            project_id = %project_id,
            generated = status.count(ItemState::Generated),
            failed = status.count(ItemState::Failed),
            awaiting_template = status.awaiting_template,
            "Pipeline run finished"
        );
        Ok(status)
    }

    /// Advance one item as far as it can go.
    pub async fn run_item(&self, item_id: Uuid) -> TrackerResult<ChecklistItem> {
        self.run_item_with(item_id, false).await
    }

    async fn run_item_with(&self, item_id: Uuid, overwrite: bool) -> TrackerResult<ChecklistItem> {
        let item = self.item(item_id)?;
        let ctx = self.run_context(item.project_id, overwrite)?;
        self.drive_item(item_id, &ctx).await
    }

    fn run_context(&self, project_id: Uuid, overwrite: bool) -> TrackerResult<RunContext> {
        self.project(project_id)?;
        let cancel = self.subscribe_cancel(project_id);
        let generation = *cancel.borrow();
        Ok(RunContext {
            templates: Arc::new(self.inner.db.get_templates_by_project(project_id)?),
            store: ContextStore::new(self.inner.db.get_context_blobs(project_id)?),
            cancel,
            generation,
            overwrite,
        })
    }

    async fn drive_item(&self, item_id: Uuid, ctx: &RunContext) -> TrackerResult<ChecklistItem> {
        let lock = self.item_lock(item_id);
        let _guard = lock.lock().await;

        let mut item = self.item(item_id)?;
        let entered = item.state;
        if item.state == ItemState::Pending && !ctx.cancelled() {
            item = self.match_template(item, ctx)?;
        }
        if item.state == ItemState::TemplateMatched && !ctx.cancelled() {
            item = self.gather_context(item, ctx).await?;
        }
        if item.state == ItemState::ContextGathered && !ctx.cancelled() {
            item = self.advance(&item, ItemState::Generating, ItemUpdate::default())?;
        }
        if item.state == ItemState::Generating && !ctx.cancelled() {
            item = self.generate(item, ctx)?;
        }
        self.settle_cancelled(entered, item, ctx)
    }

    /// A step can land after a concurrent cancel took its snapshot. Fail
    /// anything this worker moved into an in-progress state once the run is
    /// cancelled. Items that were already in progress when the worker picked
    /// them up belong to whoever put them there.
    fn settle_cancelled(
        &self,
        entered: ItemState,
        item: ChecklistItem,
        ctx: &RunContext,
    ) -> TrackerResult<ChecklistItem> {
        if ctx.cancelled() && item.state != entered && item.state.is_cancellable() {
            tracing::info!(item_id = %item.id, state = %item.state, "Step landed after cancel");
            return self.fail(&item, FailureReason::UserCancelled);
        }
        Ok(item)
    }

    fn match_template(&self, item: ChecklistItem, ctx: &RunContext) -> TrackerResult<ChecklistItem> {
        let pinned = item.pinned_template_id.and_then(|id| ctx.template(id));
        let template = match pinned {
            Some(template) => Some(template),
            None => self
                .inner
                .matcher
                .find_match(&item, &ctx.templates)
                .and_then(|m| ctx.template(m.template_id)),
        };

        let Some(template) = template else {
            tracing::info!(item_id = %item.id, title = %item.title, "Item awaiting template");
            let update = ItemUpdate {
                last_error: Some(Some(FailureReason::NoMatchFound)),
                ..Default::default()
            };
            return self.refresh(item.id, self.inner.db.update_item(item.id, ItemState::Pending, update)?);
        };

        let update = ItemUpdate {
            matched_template_id: Some(Some(template.id)),
            extracted_fields: Some(fields_for(&item.extracted_fields, template)),
            field_issues: Some(Vec::new()),
            last_error: Some(None),
            ..Default::default()
        };
        self.advance(&item, ItemState::TemplateMatched, update)
    }

    async fn gather_context(
        &self,
        item: ChecklistItem,
        ctx: &RunContext,
    ) -> TrackerResult<ChecklistItem> {
        let Some(template) = item.matched_template_id.and_then(|id| ctx.template(id)) else {
            return self.fail(&item, self.template_unavailable(&item));
        };

        let options = ExtractOptions {
            item_title: &item.title,
            existing: &item.extracted_fields,
            overwrite: ctx.overwrite,
        };
        let outcome = tokio::select! {
            result = self.inner.extractor.extract(template, &ctx.store, options) => Some(result),
            _ = ctx.wait_cancelled() => None,
        };

        match outcome {
            None => {
                tracing::info!(item_id = %item.id, "Extraction aborted by cancel");
                self.item(item.id)
            }
            Some(Ok(report)) => {
                let update = ItemUpdate {
                    extracted_fields: Some(report.merge_into(&item.extracted_fields, template)),
                    field_issues: Some(report.issues),
                    ..Default::default()
                };
                self.advance(&item, ItemState::ContextGathered, update)
            }
            Some(Err(reason)) => self.fail(&item, reason),
        }
    }

    fn generate(&self, item: ChecklistItem, ctx: &RunContext) -> TrackerResult<ChecklistItem> {
        let Some(template) = item.matched_template_id.and_then(|id| ctx.template(id)) else {
            return self.fail(&item, self.template_unavailable(&item));
        };

        match assemble(item.id, template, &item.field_values()) {
            Ok(artifact) => {
                let artifact_id = artifact.id;
                let done = self.inner.db.finish_generation(&artifact)?;
                if done.is_some() {
                    tracing::info!(
                        item_id = %item.id,
                        artifact_id = %artifact_id,
                        "Document generated"
                    );
                }
                self.refresh(item.id, done)
            }
            Err(e) => self.fail(&item, e.into()),
        }
    }

    fn template_unavailable(&self, item: &ChecklistItem) -> FailureReason {
        FailureReason::TemplateUnavailable {
            template_id: item.matched_template_id.unwrap_or_default(),
        }
    }

    /// Compare-and-set `item.state -> to`. When another actor moved the item
    /// first, the fresh item is returned unchanged.
    fn advance(
        &self,
        item: &ChecklistItem,
        to: ItemState,
        update: ItemUpdate,
    ) -> TrackerResult<ChecklistItem> {
        if !item.state.can_transition_to(to) {
            return Err(TrackerError::InvalidTransition {
                from: item.state,
                to,
            });
        }
        let moved = self
            .inner
            .db
            .apply_transition(item.id, item.state, to, update, None)?;
        if moved.is_some() {
            tracing::debug!(item_id = %item.id, from = %item.state, to = %to, "Item advanced");
        }
        self.refresh(item.id, moved)
    }

    fn fail(&self, item: &ChecklistItem, reason: FailureReason) -> TrackerResult<ChecklistItem> {
        if !item.state.can_transition_to(ItemState::Failed) {
            return Err(TrackerError::InvalidTransition {
                from: item.state,
                to: ItemState::Failed,
            });
        }
        tracing::warn!(item_id = %item.id, from = %item.state, reason = %reason, "Item failed");
        let update = ItemUpdate {
            last_error: Some(Some(reason.clone())),
            ..Default::default()
        };
        let moved = self.inner.db.apply_transition(
            item.id,
            item.state,
            ItemState::Failed,
            update,
            Some(reason),
        )?;
        self.refresh(item.id, moved)
    }

    fn refresh(&self, item_id: Uuid, moved: Option<ChecklistItem>) -> TrackerResult<ChecklistItem> {
        match moved {
            Some(item) => Ok(item),
            None => self.item(item_id),
        }
    }

    // ============================================================
    // Commands
    // ============================================================

    /// `Failed -> Pending`, then run the item again. Accepted fields and a
    /// pinned template survive.
    pub async fn retry(&self, item_id: Uuid) -> TrackerResult<ChecklistItem> {
        {
            let lock = self.item_lock(item_id);
            let _guard = lock.lock().await;
            let item = self.item(item_id)?;
            if item.state != ItemState::Failed {
                return Err(TrackerError::InvalidCommand {
                    command: "retry",
                    state: item.state,
                });
            }
            self.reset(&item)?;
            tracing::info!(item_id = %item_id, "Item retried");
        }
        self.run_item(item_id).await
    }

    /// Return a `Generated` or `Failed` item to `Pending` and run it again.
    /// The previous artifact stays listable. With `overwrite`, accepted
    /// extracted values are re-asked; manual values never are.
    pub async fn regenerate(&self, item_id: Uuid, overwrite: bool) -> TrackerResult<ChecklistItem> {
        {
            let lock = self.item_lock(item_id);
            let _guard = lock.lock().await;
            let item = self.item(item_id)?;
            if !matches!(item.state, ItemState::Generated | ItemState::Failed) {
                return Err(TrackerError::InvalidCommand {
                    command: "regenerate",
                    state: item.state,
                });
            }
            self.reset(&item)?;
            tracing::info!(item_id = %item_id, overwrite, "Item regenerating");
        }
        self.run_item_with(item_id, overwrite).await
    }

    /// Pin `template_id` to a `Pending` or `Failed` item and move it to
    /// `TemplateMatched`. Extracted fields outside the new slots are dropped.
    pub async fn override_template(
        &self,
        item_id: Uuid,
        template_id: Uuid,
    ) -> TrackerResult<ChecklistItem> {
        let lock = self.item_lock(item_id);
        let _guard = lock.lock().await;

        let mut item = self.item(item_id)?;
        if !matches!(item.state, ItemState::Pending | ItemState::Failed) {
            return Err(TrackerError::InvalidCommand {
                command: "override the template of",
                state: item.state,
            });
        }
        let template = self
            .inner
            .db
            .get_template(template_id)?
            .filter(|t| t.project_id == item.project_id)
            .ok_or(TrackerError::TemplateNotFound(template_id))?;

        if item.state == ItemState::Failed {
            item = self.reset(&item)?;
        }
        let update = ItemUpdate {
            matched_template_id: Some(Some(template.id)),
            pinned_template_id: Some(Some(template.id)),
            extracted_fields: Some(fields_for(&item.extracted_fields, &template)),
            field_issues: Some(Vec::new()),
            last_error: Some(None),
            ..Default::default()
        };
        let item = self.advance(&item, ItemState::TemplateMatched, update)?;
        tracing::info!(item_id = %item_id, template_id = %template_id, "Template assigned manually");
        Ok(item)
    }

    /// Enter a field value by hand. Manual values are never overwritten by
    /// extraction.
    pub async fn supply_field(
        &self,
        item_id: Uuid,
        field: &str,
        value: &str,
    ) -> TrackerResult<ChecklistItem> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TrackerError::Validation(format!(
                "Value for '{}' must not be empty",
                field
            )));
        }

        let lock = self.item_lock(item_id);
        let _guard = lock.lock().await;

        let item = self.item(item_id)?;
        if !item.state.has_template() || item.state == ItemState::Generating {
            return Err(TrackerError::InvalidCommand {
                command: "supply a field for",
                state: item.state,
            });
        }
        let template_id = item.matched_template_id.unwrap_or_default();
        let template = self
            .inner
            .db
            .get_template(template_id)?
            .ok_or(TrackerError::TemplateNotFound(template_id))?;
        if !template.field_slots.iter().any(|s| s == field) {
            return Err(TrackerError::Validation(format!(
                "Template '{}' has no field '{}'",
                template.name, field
            )));
        }

        let mut fields = item.extracted_fields.clone();
        fields.insert(field.to_string(), ExtractedField::manual(value));
        let issues = item
            .field_issues
            .iter()
            .filter(|i| i.field_name != field)
            .cloned()
            .collect();
        let update = ItemUpdate {
            extracted_fields: Some(fields),
            field_issues: Some(issues),
            ..Default::default()
        };

        tracing::info!(item_id = %item_id, field, "Field supplied manually");
        self.refresh(item_id, self.inner.db.update_item(item_id, item.state, update)?)
    }

    /// Fail every in-progress item of a project with `UserCancelled` and
    /// abort in-flight extraction. `Pending` and `Generated` items are left
    /// as they are.
    pub fn cancel_project(&self, project_id: Uuid) -> TrackerResult<Vec<ChecklistItem>> {
        self.project(project_id)?;
        self.bump_cancel(project_id);

        let mut cancelled = Vec::new();
        for item in self.inner.db.get_items_by_project(project_id)? {
            let mut current = item;
            // A worker may advance the item between our read and write.
            while current.state.is_cancellable() {
                let reason = FailureReason::UserCancelled;
                let update = ItemUpdate {
                    last_error: Some(Some(reason.clone())),
                    ..Default::default()
                };
                match self.inner.db.apply_transition(
                    current.id,
                    current.state,
                    ItemState::Failed,
                    update,
                    Some(reason),
                )? {
                    Some(failed) => {
                        cancelled.push(failed);
                        break;
                    }
                    None => current = self.item(current.id)?,
                }
            }
        }

        tracing::info!(
            project_id = %project_id,
            cancelled = cancelled.len(),
            "Project cancelled"
        );
        Ok(cancelled)
    }

    fn reset(&self, item: &ChecklistItem) -> TrackerResult<ChecklistItem> {
        self.advance(
            item,
            ItemState::Pending,
            ItemUpdate {
                matched_template_id: Some(None),
                last_error: Some(None),
                ..Default::default()
            },
        )
    }

    fn item_lock(&self, item_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .item_locks
            .lock()
            .expect("item lock map poisoned")
            .entry(item_id)
            .or_default()
            .clone()
    }

    fn subscribe_cancel(&self, project_id: Uuid) -> watch::Receiver<u64> {
        self.inner
            .cancels
            .lock()
            .expect("cancel map poisoned")
            .entry(project_id)
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    fn bump_cancel(&self, project_id: Uuid) {
        self.inner
            .cancels
            .lock()
            .expect("cancel map poisoned")
            .entry(project_id)
            .or_insert_with(|| watch::channel(0).0)
            .send_modify(|g| *g += 1);
    }
}

/// Existing fields restricted to `template`'s slots.
fn fields_for(
    fields: &BTreeMap<String, ExtractedField>,
    template: &Template,
) -> BTreeMap<String, ExtractedField> {
    fields
        .iter()
        .filter(|(name, _)| template.field_slots.contains(name))
        .map(|(name, field)| (name.clone(), field.clone()))
        .collect()
}

fn status_of(project_id: Uuid, items: &[ChecklistItem]) -> ProjectStatus {
    let mut counts: BTreeMap<ItemState, usize> =
        ItemState::ALL.into_iter().map(|s| (s, 0)).collect();
    for item in items {
        *counts.entry(item.state).or_default() += 1;
    }

    ProjectStatus {
        project_id,
        total: items.len(),
        awaiting_template: items.iter().filter(|i| i.awaiting_template()).count(),
        complete: !items.is_empty() && items.iter().all(|i| i.state == ItemState::Generated),
        counts,
    }
}
