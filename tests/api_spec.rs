use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use docket::api::create_router;
use docket::completion::FakeCompletion;
use docket::config::Config;
use docket::db::Database;
use docket::models::*;
use docket::tracker::Tracker;
use serde_json::json;
use uuid::Uuid;

fn setup() -> TestServer {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let fake = FakeCompletion::new()
        .answer("issuer", "City Fire Dept", 0.9)
        .answer("date", "2024-03-01", 0.85)
        .answer("certNumber", "FS-1182", 0.95);
    let mut config = Config::default();
    config.completion.max_retries = 0;
    let tracker = Tracker::new(db, Arc::new(fake), config);
    TestServer::new(create_router(tracker)).expect("Failed to create test server")
}

async fn create_test_project(server: &TestServer) -> ProjectWithItems {
    server
        .post("/api/v1/projects")
        .json(&json!({
            "name": "Riverside Handover",
            "checklist": "Fire Safety Certificate\nAsbestos Survey\n--\n",
        }))
        .await
        .json::<ProjectWithItems>()
}

async fn register_fire_template(server: &TestServer, project_id: Uuid) -> Template {
    server
        .post(&format!("/api/v1/projects/{}/templates", project_id))
        .json(&json!({
            "name": "Fire Safety Certificate Template",
            "raw_content": {
                "blocks": [
                    { "type": "paragraph", "text": "FIRE SAFETY CERTIFICATE" },
                    { "type": "table", "rows": [
                        ["Issuer", "{{issuer}}"],
                        ["Date", "{{date}}"],
                        ["Certificate No.", "{{certNumber}}"]
                    ]}
                ]
            }
        }))
        .await
        .json::<Template>()
}

async fn add_minutes(server: &TestServer, project_id: Uuid) {
    server
        .post(&format!("/api/v1/projects/{}/context", project_id))
        .json(&json!({
            "source_file": "minutes.txt",
            "extracted_text": "Inspection by City Fire Dept on 2024-03-01.",
        }))
        .await
        .assert_status(StatusCode::CREATED);
}

async fn run(server: &TestServer, project_id: Uuid) -> ProjectStatus {
    server
        .post(&format!("/api/v1/projects/{}/run?wait=true", project_id))
        .await
        .json::<ProjectStatus>()
}

fn item_titled<'a>(project: &'a ProjectWithItems, title: &str) -> &'a ChecklistItem {
    project
        .items
        .iter()
        .find(|i| i.title == title)
        .expect("item should exist")
}

mod health {
    use super::*;

    #[tokio::test]
    async fn returns_ok() {
        let server = setup();
        let response = server.get("/api/v1/health").await;
        response.assert_status_ok();
        response.assert_json(&json!({ "status": "ok" }));
    }
}

mod projects {
    use super::*;

    #[tokio::test]
    async fn ingesting_a_checklist_creates_pending_items() {
        let server = setup();

        let response = server
            .post("/api/v1/projects")
            .json(&json!({
                "name": "Riverside Handover",
                "items": [{ "title": "Lift Inspection Report", "required_fields": ["date"] }],
                "checklist": "Fire Safety Certificate\nFire Safety Certificate\nok",
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        let project: ProjectWithItems = response.json();
        let titles: Vec<_> = project.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Lift Inspection Report", "Fire Safety Certificate"]);
        assert!(project.items.iter().all(|i| i.state == ItemState::Pending));
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let server = setup();
        let response = server
            .post("/api/v1/projects")
            .json(&json!({ "name": "  ", "items": [] }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unknown_projects_are_not_found() {
        let server = setup();
        server
            .get(&format!("/api/v1/projects/{}", Uuid::new_v4()))
            .await
            .assert_status_not_found();
        server
            .get(&format!("/api/v1/projects/{}/status", Uuid::new_v4()))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn delete_removes_the_project() {
        let server = setup();
        let project = create_test_project(&server).await;

        server
            .delete(&format!("/api/v1/projects/{}", project.project.id))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/api/v1/projects/{}", project.project.id))
            .await
            .assert_status_not_found();
        let projects: Vec<Project> = server.get("/api/v1/projects").await.json();
        assert!(projects.is_empty());
    }
}

mod templates {
    use super::*;

    #[tokio::test]
    async fn slots_are_derived_from_placeholders() {
        let server = setup();
        let project = create_test_project(&server).await;

        let template = register_fire_template(&server, project.project.id).await;

        assert_eq!(template.field_slots, vec!["issuer", "date", "certNumber"]);
        let listed: Vec<Template> = server
            .get(&format!("/api/v1/projects/{}/templates", project.project.id))
            .await
            .json();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn undeclared_placeholders_are_rejected() {
        let server = setup();
        let project = create_test_project(&server).await;

        let response = server
            .post(&format!("/api/v1/projects/{}/templates", project.project.id))
            .json(&json!({
                "name": "Electrical Certificate",
                "field_slots": ["issuer", "serial"],
                "raw_content": { "blocks": [{ "type": "paragraph", "text": "{{issuer}}" }] }
            }))
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }
}

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn run_reports_status_and_dashboard() {
        let server = setup();
        let project = create_test_project(&server).await;
        let id = project.project.id;
        register_fire_template(&server, id).await;
        add_minutes(&server, id).await;

        let status = run(&server, id).await;

        assert_eq!(status.total, 2);
        assert_eq!(status.count(ItemState::Failed), 1);
        assert_eq!(status.awaiting_template, 1);

        let dashboard: ProjectDashboard = server
            .get(&format!("/api/v1/projects/{}/dashboard", id))
            .await
            .json();
        assert_eq!(dashboard.rows[0].title, "Asbestos Survey");
        assert_eq!(dashboard.rows[0].template_status, TemplateStatus::Unmatched);
        assert_eq!(
            dashboard.rows[1].last_error.as_deref(),
            Some("missing values for required fields: certNumber")
        );
    }

    #[tokio::test]
    async fn manual_field_and_retry_produce_an_artifact() {
        let server = setup();
        let project = create_test_project(&server).await;
        let id = project.project.id;
        register_fire_template(&server, id).await;
        add_minutes(&server, id).await;
        run(&server, id).await;
        let item = item_titled(&project, "Fire Safety Certificate");

        server
            .put(&format!("/api/v1/items/{}/fields/certNumber", item.id))
            .json(&json!({ "value": "FS-1182" }))
            .await
            .assert_status_ok();
        let retried: ChecklistItem = server
            .post(&format!("/api/v1/items/{}/retry", item.id))
            .await
            .json();

        assert_eq!(retried.state, ItemState::Generated);
        let artifacts: Vec<Artifact> = server
            .get(&format!("/api/v1/items/{}/artifacts", item.id))
            .await
            .json();
        assert_eq!(artifacts.len(), 1);
        let artifact: Artifact = server
            .get(&format!("/api/v1/artifacts/{}", artifacts[0].id))
            .await
            .json();
        assert!(artifact.content.contains("FS-1182"));
        assert_eq!(artifact.format_kind, FormatKind::StructuredJson);

        let transitions: Vec<ItemTransition> = server
            .get(&format!("/api/v1/items/{}/transitions", item.id))
            .await
            .json();
        assert_eq!(transitions.last().map(|t| t.to_state), Some(ItemState::Generated));
    }

    #[tokio::test]
    async fn manual_template_assignment_resolves_awaiting_items() {
        let server = setup();
        let project = create_test_project(&server).await;
        let id = project.project.id;
        let template = register_fire_template(&server, id).await;
        run(&server, id).await;
        let item = item_titled(&project, "Asbestos Survey");

        let assigned: ChecklistItem = server
            .post(&format!("/api/v1/items/{}/template", item.id))
            .json(&json!({ "template_id": template.id }))
            .await
            .json();

        assert_eq!(assigned.state, ItemState::TemplateMatched);
        assert_eq!(assigned.pinned_template_id, Some(template.id));
    }

    #[tokio::test]
    async fn invalid_commands_conflict() {
        let server = setup();
        let project = create_test_project(&server).await;
        let item = &project.items[0];

        server
            .post(&format!("/api/v1/items/{}/retry", item.id))
            .await
            .assert_status(StatusCode::CONFLICT);
        server
            .post(&format!("/api/v1/items/{}/regenerate", item.id))
            .await
            .assert_status(StatusCode::CONFLICT);
        server
            .put(&format!("/api/v1/items/{}/fields/issuer", item.id))
            .json(&json!({ "value": "City Fire Dept" }))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn cancel_returns_the_cancelled_items() {
        let server = setup();
        let project = create_test_project(&server).await;

        let cancelled: Vec<ChecklistItem> = server
            .post(&format!("/api/v1/projects/{}/cancel", project.project.id))
            .await
            .json();

        assert!(cancelled.is_empty());
    }
}
