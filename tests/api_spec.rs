use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use levelup_ledger::api::{create_router, SecurityConfig};
use levelup_ledger::leveling::LevelScale;
use levelup_ledger::models::*;
use levelup_ledger::store::MemoryStore;
use levelup_ledger::PointsService;
use serde_json::{json, Value};

fn setup_with(security: SecurityConfig) -> TestServer {
    let service = PointsService::new(
        MemoryStore::new(),
        1000,
        LevelScale::default(),
        Duration::from_secs(5),
    );
    let app = create_router(service, security);
    TestServer::new(app).expect("Failed to create test server")
}

fn setup() -> TestServer {
    setup_with(SecurityConfig::disabled())
}

fn as_user(request: TestRequest, user_id: &str, role: &str) -> TestRequest {
    request
        .add_header(
            HeaderName::from_static("x-user-id"),
            HeaderValue::from_str(user_id).unwrap(),
        )
        .add_header(
            HeaderName::from_static("x-user-role"),
            HeaderValue::from_str(role).unwrap(),
        )
}

async fn create_task_in(
    server: &TestServer,
    title: &str,
    category: &str,
    points: u32,
) -> TaskDefinition {
    as_user(server.post("/api/v1/tasks"), "admin-1", "admin")
        .json(&json!({
            "title": title,
            "description": format!("{} on the portal", title),
            "category": category,
            "points": points,
        }))
        .await
        .json::<TaskDefinition>()
}

async fn create_task(server: &TestServer, title: &str, points: u32) -> TaskDefinition {
    create_task_in(server, title, "daily", points).await
}

/// Credit `user_id` through the admin route, which trusts the given key.
async fn award(
    server: &TestServer,
    user_id: &str,
    task: &TaskDefinition,
    key: Option<&str>,
) -> AwardReceipt {
    as_user(
        server.post(&format!("/api/v1/users/{}/awards", user_id)),
        "admin-1",
        "admin",
    )
    .json(&json!({ "task_id": task.id, "dedupe_key": key }))
    .await
    .json::<AwardReceipt>()
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_ok_without_identity() {
        let server = setup();
        let response = server.get("/api/v1/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "ok");
    }
}

mod tasks {
    use super::*;

    #[tokio::test]
    async fn admin_defines_a_task() {
        let server = setup();
        let response = as_user(server.post("/api/v1/tasks"), "admin-1", "admin")
            .json(&json!({
                "title": "Daily Sign-In",
                "description": "Check in once per day",
                "category": "daily",
                "points": 10,
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        let task: TaskDefinition = response.json();
        assert_eq!(task.points, 10);
        assert!(task.active);

        let listed = server.get("/api/v1/tasks").await.json::<Vec<TaskDefinition>>();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn student_cannot_define_a_task() {
        let server = setup();
        let response = as_user(server.post("/api/v1/tasks"), "1", "student")
            .json(&json!({
                "title": "Free Points",
                "description": "Points for nothing at all",
                "category": "other",
                "points": 1000,
            }))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn invalid_task_is_bad_request() {
        let server = setup();
        let response = as_user(server.post("/api/v1/tasks"), "admin-1", "admin")
            .json(&json!({
                "title": "Go",
                "description": "Check in once per day",
                "category": "daily",
                "points": 10,
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let server = setup();
        let response = server
            .get(&format!("/api/v1/tasks/{}", uuid::Uuid::new_v4()))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deactivated_tasks_are_filtered() {
        let server = setup();
        let task = create_task(&server, "Upload Resume", 20).await;

        let response = as_user(
            server.post(&format!("/api/v1/tasks/{}/deactivate", task.id)),
            "admin-1",
            "admin",
        )
        .await;
        response.assert_status_ok();
        assert!(!response.json::<TaskDefinition>().active);

        let active = server
            .get("/api/v1/tasks?active_only=true")
            .await
            .json::<Vec<TaskDefinition>>();
        assert!(active.is_empty());
    }
}

mod awards {
    use super::*;

    #[tokio::test]
    async fn replayed_award_returns_ok_with_same_entry() {
        let server = setup();
        let task = create_task(&server, "Daily Sign-In", 10).await;
        let body = json!({ "task_id": task.id });

        let first = as_user(server.post("/api/v1/awards"), "1", "student")
            .json(&body)
            .await;
        first.assert_status(StatusCode::CREATED);

        let second = as_user(server.post("/api/v1/awards"), "1", "student")
            .json(&body)
            .await;
        second.assert_status_ok();

        let first: AwardReceipt = first.json();
        let second: AwardReceipt = second.json();
        assert!(second.replayed);
        assert_eq!(first.entry.id, second.entry.id);

        let total = as_user(server.get("/api/v1/users/1/total"), "1", "student")
            .await
            .json::<Value>();
        assert_eq!(total["total"], 10);
    }

    #[tokio::test]
    async fn another_students_key_is_forbidden() {
        let server = setup();
        let task = create_task(&server, "Daily Sign-In", 10).await;
        let today = chrono::Utc::now().date_naive();
        let foreign = levelup_ledger::ledger::daily_key("3", today);

        as_user(server.post("/api/v1/awards"), "2", "student")
            .json(&json!({ "task_id": task.id, "dedupe_key": foreign }))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let own = as_user(server.post("/api/v1/awards"), "3", "student")
            .json(&json!({ "task_id": task.id }))
            .await;
        own.assert_status(StatusCode::CREATED);
        assert_eq!(own.json::<AwardReceipt>().entry.user_id, "3");
    }

    #[tokio::test]
    async fn referral_claim_needs_a_subject() {
        let server = setup();
        let task = create_task_in(&server, "Refer a Peer", "referral", 200).await;

        as_user(server.post("/api/v1/awards"), "1", "student")
            .json(&json!({ "task_id": task.id }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let body = json!({ "task_id": task.id, "subject": "42" });
        as_user(server.post("/api/v1/awards"), "1", "student")
            .json(&body)
            .await
            .assert_status(StatusCode::CREATED);
        as_user(server.post("/api/v1/awards"), "1", "student")
            .json(&body)
            .await
            .assert_status_ok();

        let total = as_user(server.get("/api/v1/users/1/total"), "1", "student")
            .await
            .json::<Value>();
        assert_eq!(total["total"], 200);
    }

    #[tokio::test]
    async fn inactive_task_is_conflict() {
        let server = setup();
        let task = create_task(&server, "Daily Sign-In", 10).await;
        as_user(
            server.post(&format!("/api/v1/tasks/{}/deactivate", task.id)),
            "admin-1",
            "admin",
        )
        .await;

        let response = as_user(server.post("/api/v1/awards"), "1", "student")
            .json(&json!({ "task_id": task.id }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let server = setup();
        let task = create_task(&server, "Daily Sign-In", 10).await;
        let response = server
            .post("/api/v1/awards")
            .json(&json!({ "task_id": task.id }))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn only_admin_awards_other_users() {
        let server = setup();
        let task = create_task_in(&server, "Refer a Peer", "referral", 200).await;
        let body = json!({ "task_id": task.id, "dedupe_key": "referral:1:42" });

        as_user(server.post("/api/v1/users/1/awards"), "2", "student")
            .json(&body)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let receipt = as_user(server.post("/api/v1/users/1/awards"), "admin-1", "admin")
            .json(&body)
            .await
            .json::<AwardReceipt>();
        assert_eq!(receipt.entry.user_id, "1");
        assert_eq!(receipt.entry.points, 200);
    }
}

mod entries {
    use super::*;

    #[tokio::test]
    async fn reverse_then_reverse_again_is_not_found() {
        let server = setup();
        let task = create_task(&server, "Complete Profile", 50).await;
        let receipt = award(&server, "1", &task, None).await;
        let path = format!("/api/v1/entries/{}/reverse", receipt.entry.id);

        let reversal = as_user(server.post(&path), "admin-1", "admin")
            .json(&json!({ "reason": "awarded twice" }))
            .await;
        reversal.assert_status(StatusCode::CREATED);
        assert_eq!(reversal.json::<LedgerEntry>().points, -50);

        as_user(server.post(&path), "admin-1", "admin")
            .json(&json!({ "reason": "again" }))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn student_cannot_reverse() {
        let server = setup();
        let task = create_task(&server, "Complete Profile", 50).await;
        let receipt = award(&server, "1", &task, None).await;

        as_user(
            server.post(&format!("/api/v1/entries/{}/reverse", receipt.entry.id)),
            "1",
            "student",
        )
        .json(&json!({ "reason": "please" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn entries_are_private_to_their_owner() {
        let server = setup();
        let task = create_task(&server, "Daily Sign-In", 10).await;
        let receipt = award(&server, "1", &task, None).await;
        let path = format!("/api/v1/entries/{}", receipt.entry.id);

        as_user(server.get(&path), "1", "student").await.assert_status_ok();
        as_user(server.get(&path), "2", "student")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn history_pages_with_cursor() {
        let server = setup();
        let task = create_task(&server, "Daily Sign-In", 10).await;
        for day in 1..=3 {
            let key = format!("daily:1:2024-06-0{}", day);
            award(&server, "1", &task, Some(&key)).await;
        }

        let first = as_user(server.get("/api/v1/users/1/history?limit=2"), "1", "student")
            .await
            .json::<HistoryPage>();
        assert_eq!(first.entries.len(), 2);
        let cursor = first.next_cursor.expect("Expected another page");

        let second = as_user(
            server.get(&format!("/api/v1/users/1/history?limit=2&cursor={}", cursor)),
            "1",
            "student",
        )
        .await
        .json::<HistoryPage>();
        assert_eq!(second.entries.len(), 1);
        assert!(second.next_cursor.is_none());
    }
}

mod ranking {
    use super::*;

    #[tokio::test]
    async fn leaderboard_and_summary() {
        let server = setup();
        let big = create_task(&server, "Refer a Peer", 200).await;
        let small = create_task(&server, "Daily Sign-In", 10).await;
        award(&server, "1", &big, None).await;
        award(&server, "2", &small, None).await;

        as_user(server.put("/api/v1/users/1/profile"), "1", "student")
            .json(&json!({ "display_name": "Alice Johnson", "cohort": "MIT" }))
            .await
            .assert_status_ok();

        let board = as_user(server.get("/api/v1/leaderboard"), "2", "student")
            .await
            .json::<Vec<RankedUser>>();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].display_name.as_deref(), Some("Alice Johnson"));
        assert_eq!(board[0].rank, 1);

        let mit = as_user(server.get("/api/v1/leaderboard?cohort=MIT"), "2", "student")
            .await
            .json::<Vec<RankedUser>>();
        assert_eq!(mit.len(), 1);

        let summary = as_user(server.get("/api/v1/users/2/summary"), "2", "student")
            .await
            .json::<UserPointsSummary>();
        assert_eq!(summary.rank, Some(2));
        assert_eq!(summary.points_to_next_rank, Some(191));

        as_user(server.get("/api/v1/users/1/summary"), "2", "student")
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn level_lookup() {
        let server = setup();
        let progress = server.get("/api/v1/levels/2450").await.json::<LevelProgress>();
        assert_eq!(progress.level, 5);
        assert_eq!(progress.points_to_next_level, 550);
    }
}

mod security {
    use super::*;

    #[tokio::test]
    async fn api_key_is_required_when_configured() {
        let server = setup_with(SecurityConfig::with_api_key("secret"));

        server
            .get("/api/v1/health")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        server
            .get("/api/v1/health")
            .add_header(
                HeaderName::from_static("authorization"),
                HeaderValue::from_static("Bearer wrong"),
            )
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        server
            .get("/api/v1/health")
            .add_header(
                HeaderName::from_static("authorization"),
                HeaderValue::from_static("Bearer secret"),
            )
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn rate_limit_rejects_excess_requests() {
        let server = setup_with(SecurityConfig::with_rate_limit(2));

        server.get("/api/v1/health").await.assert_status_ok();
        server.get("/api/v1/health").await.assert_status_ok();
        server
            .get("/api/v1/health")
            .await
            .assert_status(StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn unknown_role_is_unauthorized() {
        let server = setup();
        as_user(server.get("/api/v1/users/1/total"), "1", "superuser")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
