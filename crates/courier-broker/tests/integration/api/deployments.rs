/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use super::{send, upload};
use crate::fixtures::TestFixture;
use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

async fn register(router: &axum::Router, host: &str) -> String {
    let key = format!("key-{}", Uuid::new_v4().simple());
    let (status, machine) = send(
        router,
        "POST",
        "/api/v1/machines/register",
        Some(json!({
            "machine_key": key,
            "host_name": host,
            "user_name": "jdoe",
            "mac_address": "00:11:22:33:44:55",
            "ip_address": "10.0.0.5",
            "os_version": "Windows 11",
            "agent_version": "0.0.0",
            "installed_applications": [{ "code": "payroll", "version": "0.9.0" }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(machine["status"], "online");
    key
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_full_rollout_over_http() {
    let fixture = TestFixture::new();
    let app_row = fixture.insert_application();
    let router = fixture.create_test_router();
    let version = upload(&router, &app_row.code, "1.0.0", b"payload").await;
    let key = register(&router, "WS-HTTP").await;

    let (status, deployment) = send(
        &router,
        "POST",
        "/api/v1/deployments",
        Some(json!({
            "package_version_id": version["id"],
            "environment": "production",
            "targets": [key, "missing-host"],
            "initiated_by": "ops@example.com"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(deployment["status"], "pending");
    assert_eq!(deployment["deployment_type"], "release");
    assert_eq!(deployment["total_targets"], 1);
    assert_eq!(deployment["skipped_targets"], json!(["missing-host"]));

    let (status, pending) = send(
        &router,
        "GET",
        &format!("/api/v1/machines/{}/tasks/pending", key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let pending = pending.as_array().unwrap().clone();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["content_hash"], version["content_hash"]);
    let task_id = pending[0]["task_id"].as_i64().unwrap();

    let (status, claimed) = send(
        &router,
        "POST",
        &format!("/api/v1/tasks/{}/claim", task_id),
        Some(json!({ "machine_key": key })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimed["status"], "in_progress");

    let (status, heartbeat) = send(
        &router,
        "POST",
        &format!("/api/v1/machines/{}/heartbeat", key),
        Some(json!({ "busy": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(heartbeat["status"], "busy");

    let (status, reply) = send(
        &router,
        "POST",
        &format!("/api/v1/tasks/{}/status", task_id),
        Some(json!({
            "status": "in_progress",
            "progress_percentage": 60,
            "current_step": "installing",
            "is_success": false
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["accepted"], true);

    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/v1/tasks/{}/status", task_id),
        Some(json!({
            "status": "in_progress",
            "progress_percentage": 10,
            "is_success": false
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("60"));

    let (status, reply) = send(
        &router,
        "POST",
        &format!("/api/v1/tasks/{}/status", task_id),
        Some(json!({
            "status": "completed",
            "progress_percentage": 100,
            "is_success": true,
            "download_size_bytes": 7
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["task_status"], "completed");

    let (status, settled) = send(
        &router,
        "GET",
        &format!("/api/v1/deployments/{}", deployment["id"]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settled["status"], "success");
    assert_eq!(settled["success_count"], 1);
    assert_eq!(settled["pending_count"], 0);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_deployment_request_validation() {
    let fixture = TestFixture::new();
    let app_row = fixture.insert_application();
    let router = fixture.create_test_router();
    let version = upload(&router, &app_row.code, "1.0.0", b"payload").await;

    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/deployments",
        Some(json!({
            "package_version_id": version["id"],
            "environment": "production",
            "is_global": true,
            "targets": ["WS-1"],
            "initiated_by": "ops"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/deployments",
        Some(json!({
            "package_version_id": version["id"],
            "environment": "production",
            "targets": ["nobody-at-all"],
            "initiated_by": "ops"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation");

    let (status, _) = send(&router, "GET", "/api/v1/deployments/999999999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_approve_cancel_and_rollback_over_http() {
    let fixture = TestFixture::new();
    let app_row = fixture.insert_application();
    let router = fixture.create_test_router();
    upload(&router, &app_row.code, "1.0.0", b"one").await;
    let v2 = upload(&router, &app_row.code, "1.1.0", b"two").await;
    let key = register(&router, "WS-HTTP-APPROVE").await;

    let (status, held) = send(
        &router,
        "POST",
        "/api/v1/deployments",
        Some(json!({
            "package_version_id": v2["id"],
            "environment": "production",
            "targets": [key],
            "requires_approval": true,
            "initiated_by": "ops"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(held["status"], "pending_approval");
    let id = held["id"].as_i64().unwrap();

    let (status, approved) = send(
        &router,
        "POST",
        &format!("/api/v1/deployments/{}/approve", id),
        Some(json!({ "approved_by": "lead" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "pending");

    let (status, tasks) = send(&router, "GET", &format!("/api/v1/deployments/{}/tasks", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tasks.as_array().unwrap().len(), 1);

    let (status, cancelled) = send(
        &router,
        "POST",
        &format!("/api/v1/deployments/{}/cancel", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["failed_count"], 1);

    let (status, rollback) = send(
        &router,
        "POST",
        &format!("/api/v1/deployments/{}/rollback", id),
        Some(json!({ "initiated_by": "oncall" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(rollback["deployment_type"], "rollback");
    assert_ne!(rollback["package_version_id"], v2["id"]);

    let (status, listed) = send(
        &router,
        "GET",
        &format!("/api/v1/deployments?application={}&status=cancelled", app_row.code),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}
