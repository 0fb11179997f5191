mod common;

use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{file_request, spawn_app};

#[tokio::test]
async fn health_returns_ok() {
    let app = spawn_app().await;

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn queue_status_reflects_enqueued_items() {
    let app = spawn_app().await;

    for i in 0..3 {
        app.state
            .processor
            .enqueue(file_request(&format!("status-{i}.md")), None)
            .await
            .unwrap();
    }

    let resp = app
        .client
        .get(app.url("/api/v1/queue/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["pending"], 3);
    assert_eq!(body["completed"], 0);
    assert_eq!(body["dead_letter"], 0);
    assert_eq!(body["in_memory_depth"], 3);
}

#[tokio::test]
async fn manual_process_flushes_the_queue() {
    let app = spawn_app().await;

    app.state
        .processor
        .enqueue(file_request("flush.md"), None)
        .await
        .unwrap();

    let resp = app
        .client
        .post(app.url("/api/v1/queue/process"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["files_processed"], 1);
    assert_eq!(body["remaining_pending"], 0);
    assert_eq!(app.sink.batch_sizes(), vec![1]);
}

#[tokio::test]
async fn processing_status_reports_lifecycle_and_stats() {
    let app = spawn_app().await;

    let resp = app
        .client
        .get(app.url("/api/v1/processing/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["initialized"], true);
    assert_eq!(body["active"], false);
    assert!(body["queue"]["pending"].is_number());
    assert_eq!(body["stats"]["batches_dispatched"], 0);
}

#[tokio::test]
async fn dead_letter_listing_is_empty_initially() {
    let app = spawn_app().await;

    let resp = app
        .client
        .get(app.url("/api/v1/queue/dead-letter?limit=10"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn cleanup_rejects_negative_age() {
    let app = spawn_app().await;

    let resp = app
        .client
        .post(app.url("/api/v1/queue/cleanup"))
        .json(&json!({ "older_than_hours": -1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cleanup_reports_removed_count() {
    let app = spawn_app().await;

    let resp = app
        .client
        .post(app.url("/api/v1/queue/cleanup"))
        .json(&json!({ "older_than_hours": 24 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["removed"], 0);
}
