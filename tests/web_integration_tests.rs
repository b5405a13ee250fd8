//! # Web API Integration Tests
//!
//! Exercise the HTTP API over a real socket: run lifecycle, offset checks,
//! replay, token and API key enforcement, and the summary link.

mod common;

use common::*;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

async fn start_run(client: &Client, server: &TestServer, action: &str) -> Value {
    let response = client
        .post(server.url("/v1/runs"))
        .json(&json!({ "action_name": action }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json::<Value>().await.unwrap()["data"].clone()
}

async fn batch(
    client: &Client,
    server: &TestServer,
    run: &Value,
    position: Value,
) -> reqwest::Response {
    client
        .post(server.url(&format!("/v1/runs/{}/batch", run["run_id"].as_str().unwrap())))
        .json(&json!({
            "action_name": run["action_name"],
            "position": position,
            "security": run["security"],
        }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let mut config = test_config();
    config.web.api_key = Some(TEST_API_KEY.to_string());
    let server = TestServer::start(config).await;

    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");

    server.stop().await;
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let mut config = test_config();
    config.web.api_key = Some(TEST_API_KEY.to_string());
    let server = TestServer::start(config).await;
    let client = Client::new();

    let response = client.get(server.url("/v1/operations")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .get(server.url("/v1/operations"))
        .header("X-API-Key", TEST_API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let names: Vec<&str> = body["data"]["operations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|op| op["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec![EMPTY, MIXED, NUMBERS]);

    server.stop().await;
}

#[tokio::test]
async fn test_full_run_over_http() {
    let server = TestServer::start(test_config()).await;
    let client = Client::new();
    let run = start_run(&client, &server, NUMBERS).await;
    assert_eq!(run["total_items"], 120);
    assert_eq!(run["batch_size"], 50);

    let mut position = json!(0);
    let mut percentages = Vec::new();
    let mut html = String::new();
    let final_body = loop {
        let response = batch(&client, &server, &run, position.clone()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        let data = body["data"].clone();
        percentages.push(data["percentage"].as_f64().unwrap());
        html.push_str(data["html"].as_str().unwrap());
        if data["position"] == "done" {
            break data;
        }
        position = data["position"].clone();
    };

    assert_eq!(percentages, vec![41.67, 83.33, 100.0]);
    assert_eq!(final_body["totals"]["success"], 120);
    assert_eq!(html.matches("bulk-process-success").count(), 120);
    assert!(html.contains("1. <strong>#1</strong> Item 1: updated successfully"));

    // Follow the summary link
    let url = final_body["url"].as_str().unwrap();
    let response = client.get(server.url(url)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["data"]["label"], "Number crunch");
    assert_eq!(summary["data"]["run"]["status"], "completed");
    assert!(summary["data"]["html"].as_str().unwrap().contains("Number crunch"));

    server.stop().await;
}

#[tokio::test]
async fn test_mixed_outcomes_are_tallied() {
    let server = TestServer::start(test_config()).await;
    let client = Client::new();
    let run = start_run(&client, &server, MIXED).await;
    assert_eq!(run["batch_size"], 10);

    let mut position = json!(0);
    let totals = loop {
        let body: Value = batch(&client, &server, &run, position.clone())
            .await
            .json()
            .await
            .unwrap();
        let data = body["data"].clone();
        if data["position"] == "done" {
            break data["totals"].clone();
        }
        position = data["position"].clone();
    };

    assert_eq!(totals["success"], 16);
    assert_eq!(totals["skipped"], 8);
    assert_eq!(totals["failed"], 6);

    server.stop().await;
}

#[tokio::test]
async fn test_empty_operation_finishes_immediately() {
    let server = TestServer::start(test_config()).await;
    let client = Client::new();
    let run = start_run(&client, &server, EMPTY).await;

    let body: Value = batch(&client, &server, &run, json!(0)).await.json().await.unwrap();
    assert_eq!(body["data"]["position"], "done");
    assert_eq!(body["data"]["percentage"], 100.0);
    assert!(body["data"]["url"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn test_repeated_offset_is_replayed() {
    let server = TestServer::start(test_config()).await;
    let client = Client::new();
    let run = start_run(&client, &server, NUMBERS).await;

    let first: Value = batch(&client, &server, &run, json!(0)).await.json().await.unwrap();
    let again: Value = batch(&client, &server, &run, json!(0)).await.json().await.unwrap();

    assert_eq!(first["data"]["position"], 50);
    assert_eq!(again["data"]["position"], 50);
    assert_eq!(again["data"]["replayed"], true);
    assert_eq!(again["data"]["totals"]["success"], 50);

    server.stop().await;
}

#[tokio::test]
async fn test_skipped_offset_conflicts() {
    let server = TestServer::start(test_config()).await;
    let client = Client::new();
    let run = start_run(&client, &server, NUMBERS).await;

    let response = batch(&client, &server, &run, json!(100)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CONFLICT");

    server.stop().await;
}

#[tokio::test]
async fn test_forged_token_is_forbidden() {
    let server = TestServer::start(test_config()).await;
    let client = Client::new();
    let mut run = start_run(&client, &server, NUMBERS).await;
    run["security"] = json!("00000000000000000000");

    let response = batch(&client, &server, &run, json!(0)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    server.stop().await;
}

#[tokio::test]
async fn test_second_run_of_same_action_conflicts() {
    let server = TestServer::start(test_config()).await;
    let client = Client::new();
    let _run = start_run(&client, &server, NUMBERS).await;

    let response = client
        .post(server.url("/v1/runs"))
        .json(&json!({ "action_name": NUMBERS }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_action_is_not_found() {
    let server = TestServer::start(test_config()).await;
    let response = Client::new()
        .post(server.url("/v1/runs"))
        .json(&json!({ "action_name": "launch_missiles" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_abort_releases_action() {
    let server = TestServer::start(test_config()).await;
    let client = Client::new();
    let run = start_run(&client, &server, NUMBERS).await;
    let run_id = run["run_id"].as_str().unwrap();

    let response = client
        .delete(server.url(&format!("/v1/runs/{run_id}")))
        .query(&[("security", run["security"].as_str().unwrap())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["status"], "aborted");

    // Further batches are refused, a new run may start
    let response = batch(&client, &server, &run, json!(0)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let _next = start_run(&client, &server, NUMBERS).await;

    server.stop().await;
}

#[tokio::test]
async fn test_run_status_reports_progress() {
    let server = TestServer::start(test_config()).await;
    let client = Client::new();
    let run = start_run(&client, &server, NUMBERS).await;
    let run_id = run["run_id"].as_str().unwrap();
    batch(&client, &server, &run, json!(0)).await;

    let body: Value = client
        .get(server.url(&format!("/v1/runs/{run_id}")))
        .query(&[("security", run["security"].as_str().unwrap())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["next_offset"], 50);
    assert_eq!(body["data"]["status"], "running");

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let server = TestServer::start(test_config()).await;
    let response = Client::new()
        .post(server.url("/v1/runs"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    server.stop().await;
}
