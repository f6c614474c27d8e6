/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use super::{send, upload};
use crate::fixtures::TestFixture;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use courier_models::models::package_versions::sha256_hex;
use serde_json::json;
use tower::ServiceExt;

async fn download(router: &axum::Router, id: i64) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/packages/{}/content", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

/// Bundle files stored for one application.
fn bundle_files(fixture: &TestFixture, code: &str) -> usize {
    std::fs::read_dir(fixture.storage.root().join(code))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_upload_and_download_package() {
    let fixture = TestFixture::new();
    let app_row = fixture.insert_application();
    let router = fixture.create_test_router();
    let content = b"bundle-bytes-v1".to_vec();

    let created = upload(&router, &app_row.code, "1.0.0", &content).await;
    assert_eq!(created["content_hash"], sha256_hex(&content));
    assert_eq!(created["size_bytes"], content.len() as i64);
    let id = created["id"].as_i64().unwrap();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/packages/{}/content", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let header = response
        .headers()
        .get("x-courier-content-sha256")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(header, sha256_hex(&content));
    let length = response.headers().get("content-length").unwrap().to_str().unwrap();
    assert_eq!(length, content.len().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.to_vec(), content);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_duplicate_upload_is_rejected() {
    let fixture = TestFixture::new();
    let app_row = fixture.insert_application();
    let router = fixture.create_test_router();
    let first = upload(&router, &app_row.code, "1.0.0", b"first").await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/v1/applications/{}/packages/1.0.0", app_row.code))
                .body(Body::from("second"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let (status, body) = download(&router, first["id"].as_i64().unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"first");
    assert_eq!(bundle_files(&fixture, &app_row.code), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_racing_uploads_keep_the_winning_bundle() {
    let fixture = TestFixture::concurrent(4);
    let app_row = fixture.insert_application();
    let router = fixture.create_test_router();

    let put = |content: &'static str| {
        let router = router.clone();
        let uri = format!("/api/v1/applications/{}/packages/2.0.0", app_row.code);
        tokio::spawn(async move {
            let response = router
                .oneshot(
                    Request::builder()
                        .method("PUT")
                        .uri(uri)
                        .body(Body::from(content))
                        .unwrap(),
                )
                .await
                .unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (content, status, serde_json::from_slice::<serde_json::Value>(&bytes).unwrap())
        })
    };
    let (left, right) = tokio::join!(put("left-bundle"), put("right-bundle"));
    let outcomes = [left.unwrap(), right.unwrap()];

    let created: Vec<_> = outcomes
        .iter()
        .filter(|(_, status, _)| *status == StatusCode::CREATED)
        .collect();
    assert_eq!(created.len(), 1, "got {:?}", outcomes);
    assert!(outcomes
        .iter()
        .any(|(_, status, _)| *status == StatusCode::CONFLICT));
    let (content, _, version) = created[0];
    assert_eq!(version["content_hash"], sha256_hex(content.as_bytes()));

    let (status, body) = download(&router, version["id"].as_i64().unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, content.as_bytes());
    assert_eq!(bundle_files(&fixture, &app_row.code), 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_latest_and_delete() {
    let fixture = TestFixture::new();
    let app_row = fixture.insert_application();
    let router = fixture.create_test_router();
    upload(&router, &app_row.code, "1.9.0", b"old").await;
    let newest = upload(&router, &app_row.code, "1.10.0", b"new").await;

    let (status, latest) = send(
        &router,
        "GET",
        &format!("/api/v1/applications/{}/packages/latest", app_row.code),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["id"], newest["id"]);

    let (status, outcome) = send(
        &router,
        "DELETE",
        &format!("/api/v1/packages/{}", newest["id"]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "deleted");

    let (status, _) = send(
        &router,
        "GET",
        &format!("/api/v1/packages/{}", newest["id"]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_manifest_activation_over_http() {
    let fixture = TestFixture::new();
    let app_row = fixture.insert_application();
    let router = fixture.create_test_router();
    let version = upload(&router, &app_row.code, "1.0.0", b"bin").await;

    let (status, _) = send(
        &router,
        "GET",
        &format!("/api/v1/applications/{}/manifest", app_row.code),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, manifest) = send(
        &router,
        "POST",
        &format!("/api/v1/applications/{}/manifests", app_row.code),
        Some(json!({
            "version": "1.0.0",
            "binary_package_id": version["id"],
            "update_policy": "preserve_local"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(manifest["is_active"], false);

    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/v1/manifests/{}/activate", manifest["id"]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, active) = send(
        &router,
        "GET",
        &format!("/api/v1/applications/{}/manifest", app_row.code),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["id"], manifest["id"]);
    assert_eq!(active["update_policy"], "preserve_local");
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_invalid_manifest_is_a_bad_request() {
    let fixture = TestFixture::new();
    let app_row = fixture.insert_application();
    let router = fixture.create_test_router();

    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/v1/applications/{}/manifests", app_row.code),
        Some(json!({ "version": "1.0.0" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}
