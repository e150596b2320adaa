mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::models::*;

const ITEM_COLUMNS: &str = "id, project_id, title, description, required_fields, state,
     matched_template_id, pinned_template_id, extracted_fields, field_issues,
     artifact_ref, last_error, created_at, updated_at";

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "docket")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("docket.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Project operations
    // ============================================================

    pub fn get_all_projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, updated_at FROM projects ORDER BY name",
        )?;

        let projects = stmt
            .query_map([], project_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(projects)
    }

    pub fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let project = conn
            .query_row(
                "SELECT id, name, created_at, updated_at FROM projects WHERE id = ?",
                [id.to_string()],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    /// Create a project together with one `Pending` item per seed, in seed
    /// order.
    pub fn create_project(&self, input: IngestChecklistInput) -> Result<(Project, Vec<ChecklistItem>)> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now();

        let project = Project {
            id: Uuid::new_v4(),
            name: input.name,
            created_at: now,
            updated_at: now,
        };
        tx.execute(
            "INSERT INTO projects (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
            (
                project.id.to_string(),
                &project.name,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )?;

        let mut items = Vec::with_capacity(input.items.len());
        for (position, seed) in input.items.into_iter().enumerate() {
            let item = ChecklistItem {
                id: Uuid::new_v4(),
                project_id: project.id,
                title: seed.title,
                description: seed.description,
                required_fields: seed.required_fields,
                state: ItemState::Pending,
                matched_template_id: None,
                pinned_template_id: None,
                extracted_fields: Default::default(),
                field_issues: Vec::new(),
                artifact_ref: None,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            tx.execute(
                "INSERT INTO checklist_items (id, project_id, position, title, description,
                     required_fields, state, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    item.id.to_string(),
                    project.id.to_string(),
                    position as i64,
                    &item.title,
                    &item.description,
                    serde_json::to_string(&item.required_fields)?,
                    item.state.as_str(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ),
            )?;
            items.push(item);
        }

        tx.commit()?;
        Ok((project, items))
    }

    pub fn delete_project(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute("DELETE FROM projects WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    // ============================================================
    // Checklist item operations
    // ============================================================

    pub fn get_item(&self, id: Uuid) -> Result<Option<ChecklistItem>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        select_item(&conn, id)
    }

    /// Items of a project in checklist order.
    pub fn get_items_by_project(&self, project_id: Uuid) -> Result<Vec<ChecklistItem>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM checklist_items WHERE project_id = ? ORDER BY position"
        ))?;

        let items = stmt
            .query_map([project_id.to_string()], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    /// Move an item from `from` to `to`, applying `update` and logging the
    /// transition atomically.
    ///
    /// Returns `None` when the item does not exist or is no longer in `from`,
    /// which is how a worker learns that a concurrent cancel got there first.
    pub fn apply_transition(
        &self,
        item_id: Uuid,
        from: ItemState,
        to: ItemState,
        update: ItemUpdate,
        reason: Option<FailureReason>,
    ) -> Result<Option<ChecklistItem>> {
        anyhow::ensure!(
            from.can_transition_to(to),
            "Invalid transition from {} to {}",
            from,
            to
        );

        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let item = transition_item(&tx, item_id, from, to, update, reason)?;
        tx.commit()?;
        Ok(item)
    }

    /// Apply `update` without a state change, provided the item is still in
    /// `expected`.
    pub fn update_item(
        &self,
        item_id: Uuid,
        expected: ItemState,
        update: ItemUpdate,
    ) -> Result<Option<ChecklistItem>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let Some(mut item) = select_item(&conn, item_id)? else {
            return Ok(None);
        };
        if item.state != expected {
            return Ok(None);
        }

        update.apply_to(&mut item);
        item.updated_at = Utc::now();
        write_item(&conn, &item)?;
        Ok(Some(item))
    }

    pub fn get_item_transitions(&self, item_id: Uuid) -> Result<Vec<ItemTransition>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, item_id, from_state, to_state, reason, at
             FROM item_transitions WHERE item_id = ? ORDER BY rowid",
        )?;

        let transitions = stmt
            .query_map([item_id.to_string()], |row| {
                Ok(ItemTransition {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    item_id: parse_uuid(row.get::<_, String>(1)?),
                    from_state: parse_state(row.get::<_, String>(2)?),
                    to_state: parse_state(row.get::<_, String>(3)?),
                    reason: parse_json_opt(row.get::<_, Option<String>>(4)?),
                    at: parse_datetime(row.get::<_, String>(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transitions)
    }

    // ============================================================
    // Template operations
    // ============================================================

    pub fn create_template(&self, project_id: Uuid, input: RegisterTemplateInput) -> Result<Template> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO templates (id, project_id, name, field_slots, raw_content, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                project_id.to_string(),
                &input.name,
                serde_json::to_string(&input.field_slots)?,
                serde_json::to_string(&input.raw_content)?,
                now.to_rfc3339(),
            ),
        )?;

        Ok(Template {
            id,
            project_id,
            name: input.name,
            field_slots: input.field_slots,
            raw_content: input.raw_content,
            created_at: now,
        })
    }

    pub fn get_template(&self, id: Uuid) -> Result<Option<Template>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let template = conn
            .query_row(
                "SELECT id, project_id, name, field_slots, raw_content, created_at
                 FROM templates WHERE id = ?",
                [id.to_string()],
                template_from_row,
            )
            .optional()?;
        Ok(template)
    }

    pub fn get_templates_by_project(&self, project_id: Uuid) -> Result<Vec<Template>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, project_id, name, field_slots, raw_content, created_at
             FROM templates WHERE project_id = ? ORDER BY name, id",
        )?;

        let templates = stmt
            .query_map([project_id.to_string()], template_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(templates)
    }

    // ============================================================
    // Context blob operations
    // ============================================================

    pub fn create_context_blob(&self, project_id: Uuid, input: IngestContextInput) -> Result<ContextBlob> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();
        let media_type = input
            .media_type
            .unwrap_or_else(|| MediaType::from_file_name(&input.source_file));

        conn.execute(
            "INSERT INTO context_blobs (id, project_id, source_file, extracted_text, media_type, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                project_id.to_string(),
                &input.source_file,
                &input.extracted_text,
                media_type.as_str(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(ContextBlob {
            id,
            project_id,
            source_file: input.source_file,
            extracted_text: input.extracted_text,
            media_type,
            created_at: now,
        })
    }

    /// Blobs of a project in ingestion order.
    pub fn get_context_blobs(&self, project_id: Uuid) -> Result<Vec<ContextBlob>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, project_id, source_file, extracted_text, media_type, created_at
             FROM context_blobs WHERE project_id = ? ORDER BY rowid",
        )?;

        let blobs = stmt
            .query_map([project_id.to_string()], |row| {
                Ok(ContextBlob {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    project_id: parse_uuid(row.get::<_, String>(1)?),
                    source_file: row.get(2)?,
                    extracted_text: row.get(3)?,
                    media_type: MediaType::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or(MediaType::Text),
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(blobs)
    }

    // ============================================================
    // Artifact operations
    // ============================================================

    /// Store `artifact` and move its item `Generating -> Generated` in one
    /// transaction. Nothing is stored if the item left `Generating`.
    pub fn finish_generation(&self, artifact: &Artifact) -> Result<Option<ChecklistItem>> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let update = ItemUpdate {
            artifact_ref: Some(Some(artifact.id)),
            last_error: Some(None),
            ..Default::default()
        };
        let item = transition_item(
            &tx,
            artifact.checklist_item_id,
            ItemState::Generating,
            ItemState::Generated,
            update,
            None,
        )?;
        if item.is_none() {
            return Ok(None);
        }

        tx.execute(
            "INSERT INTO artifacts (id, checklist_item_id, template_id, content, format_kind, generated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                artifact.id.to_string(),
                artifact.checklist_item_id.to_string(),
                artifact.template_id.to_string(),
                &artifact.content,
                artifact.format_kind.as_str(),
                artifact.generated_at.to_rfc3339(),
            ),
        )?;

        tx.commit()?;
        Ok(item)
    }

    pub fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let artifact = conn
            .query_row(
                "SELECT id, checklist_item_id, template_id, content, format_kind, generated_at
                 FROM artifacts WHERE id = ?",
                [id.to_string()],
                artifact_from_row,
            )
            .optional()?;
        Ok(artifact)
    }

    /// All artifacts ever produced for an item, newest first.
    pub fn get_artifacts_by_item(&self, item_id: Uuid) -> Result<Vec<Artifact>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, checklist_item_id, template_id, content, format_kind, generated_at
             FROM artifacts WHERE checklist_item_id = ? ORDER BY rowid DESC",
        )?;

        let artifacts = stmt
            .query_map([item_id.to_string()], artifact_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(artifacts)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn select_item(conn: &Connection, id: Uuid) -> Result<Option<ChecklistItem>> {
    let item = conn
        .query_row(
            &format!("SELECT {ITEM_COLUMNS} FROM checklist_items WHERE id = ?"),
            [id.to_string()],
            item_from_row,
        )
        .optional()?;
    Ok(item)
}

fn write_item(conn: &Connection, item: &ChecklistItem) -> Result<()> {
    conn.execute(
        "UPDATE checklist_items SET state = ?, matched_template_id = ?, pinned_template_id = ?,
             extracted_fields = ?, field_issues = ?, artifact_ref = ?, last_error = ?, updated_at = ?
         WHERE id = ?",
        (
            item.state.as_str(),
            item.matched_template_id.map(|id| id.to_string()),
            item.pinned_template_id.map(|id| id.to_string()),
            serde_json::to_string(&item.extracted_fields)?,
            serde_json::to_string(&item.field_issues)?,
            item.artifact_ref.map(|id| id.to_string()),
            item.last_error.as_ref().map(serde_json::to_string).transpose()?,
            item.updated_at.to_rfc3339(),
            item.id.to_string(),
        ),
    )?;
    Ok(())
}

fn transition_item(
    conn: &Connection,
    item_id: Uuid,
    from: ItemState,
    to: ItemState,
    update: ItemUpdate,
    reason: Option<FailureReason>,
) -> Result<Option<ChecklistItem>> {
    let Some(mut item) = select_item(conn, item_id)? else {
        return Ok(None);
    };
    if item.state != from {
        return Ok(None);
    }

    let now = Utc::now();
    update.apply_to(&mut item);
    item.state = to;
    item.updated_at = now;
    write_item(conn, &item)?;

    conn.execute(
        "INSERT INTO item_transitions (id, item_id, from_state, to_state, reason, at)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            item_id.to_string(),
            from.as_str(),
            to.as_str(),
            reason.as_ref().map(serde_json::to_string).transpose()?,
            now.to_rfc3339(),
        ),
    )?;

    Ok(Some(item))
}

fn project_from_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: parse_uuid(row.get::<_, String>(0)?),
        name: row.get(1)?,
        created_at: parse_datetime(row.get::<_, String>(2)?),
        updated_at: parse_datetime(row.get::<_, String>(3)?),
    })
}

fn item_from_row(row: &Row) -> rusqlite::Result<ChecklistItem> {
    Ok(ChecklistItem {
        id: parse_uuid(row.get::<_, String>(0)?),
        project_id: parse_uuid(row.get::<_, String>(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        required_fields: serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
        state: parse_state(row.get::<_, String>(5)?),
        matched_template_id: row.get::<_, Option<String>>(6)?.map(parse_uuid),
        pinned_template_id: row.get::<_, Option<String>>(7)?.map(parse_uuid),
        extracted_fields: serde_json::from_str(&row.get::<_, String>(8)?).unwrap_or_default(),
        field_issues: serde_json::from_str(&row.get::<_, String>(9)?).unwrap_or_default(),
        artifact_ref: row.get::<_, Option<String>>(10)?.map(parse_uuid),
        last_error: parse_json_opt(row.get::<_, Option<String>>(11)?),
        created_at: parse_datetime(row.get::<_, String>(12)?),
        updated_at: parse_datetime(row.get::<_, String>(13)?),
    })
}

fn template_from_row(row: &Row) -> rusqlite::Result<Template> {
    Ok(Template {
        id: parse_uuid(row.get::<_, String>(0)?),
        project_id: parse_uuid(row.get::<_, String>(1)?),
        name: row.get(2)?,
        field_slots: serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or_default(),
        raw_content: serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
        created_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

fn artifact_from_row(row: &Row) -> rusqlite::Result<Artifact> {
    Ok(Artifact {
        id: parse_uuid(row.get::<_, String>(0)?),
        checklist_item_id: parse_uuid(row.get::<_, String>(1)?),
        template_id: parse_uuid(row.get::<_, String>(2)?),
        content: row.get(3)?,
        format_kind: FormatKind::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(FormatKind::StructuredJson),
        generated_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_state(s: String) -> ItemState {
    ItemState::from_str(&s).unwrap_or(ItemState::Pending)
}

fn parse_json_opt<T: serde::de::DeserializeOwned>(s: Option<String>) -> Option<T> {
    s.and_then(|json| serde_json::from_str(&json).ok())
}
