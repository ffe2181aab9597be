mod common;

use axum::http::StatusCode;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reel_comfyui::relay::RelayClient;
use reel_comfyui::transport::{ArtifactRef, JobTransport, TransportError};

use common::{body_json, build_test_app, post_json, spawn_server};

const RELAY: &str = "/api/v1/relay";

#[tokio::test]
async fn system_stats_is_forwarded_and_normalized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/system_stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"system": {"os": "posix"}})))
        .expect(1)
        .mount(&server)
        .await;

    let response = post_json(
        build_test_app(),
        RELAY,
        json!({"action": "system_stats", "target_address": server.uri()}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["status"], 200);
    assert_eq!(json["data"]["system"]["os"], "posix");
}

#[tokio::test]
async fn empty_target_is_not_configured() {
    let response = post_json(
        build_test_app(),
        RELAY,
        json!({"action": "queue", "target_address": "  "}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["ok"], false);
    assert!(json["error"].as_str().unwrap().contains("No job server address"));
    assert_eq!(json["error_kind"], "not_configured");
}

#[tokio::test]
async fn job_server_status_passes_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/abc"))
        .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
        .mount(&server)
        .await;

    let response = post_json(
        build_test_app(),
        RELAY,
        json!({"action": "history", "target_address": server.uri(), "payload": {"prompt_id": "abc"}}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["status"], 503);
    assert_eq!(json["error"], "warming up");
}

#[tokio::test]
async fn unreachable_target_is_bad_gateway() {
    let response = post_json(
        build_test_app(),
        RELAY,
        json!({"action": "system_stats", "target_address": "http://127.0.0.1:1"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["ok"], false);
}

#[tokio::test]
async fn malformed_request_still_gets_an_envelope() {
    let response = post_json(
        build_test_app(),
        RELAY,
        json!({"action": "reboot", "target_address": "http://x"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["ok"], false);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn missing_payload_field_is_a_relay_error() {
    let response = post_json(
        build_test_app(),
        RELAY,
        json!({"action": "history", "target_address": "http://x"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"]
        .as_str()
        .unwrap()
        .contains("History"));
}

#[tokio::test]
async fn relay_client_round_trips_through_the_server() {
    let job_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "queue_running": [[3, "p-running", {}]],
            "queue_pending": [[4, "p-waiting", {}]]
        })))
        .mount(&job_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/view"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(b"\x00\x01mp4".to_vec()),
        )
        .mount(&job_server)
        .await;

    let relay_url = format!("{}{RELAY}", spawn_server().await);
    let client = RelayClient::new(relay_url, job_server.uri());

    let queue = client.queue().await.unwrap();
    assert_eq!(queue.running, vec!["p-running"]);
    assert_eq!(queue.pending, vec!["p-waiting"]);

    let artifact = client
        .fetch_artifact(&ArtifactRef {
            filename: "reel_00001.mp4".to_string(),
            subfolder: String::new(),
            kind: "output".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(artifact.bytes, b"\x00\x01mp4".to_vec());
    assert_eq!(artifact.mime_type, "video/mp4");
}

#[tokio::test]
async fn relay_client_surfaces_target_failures() {
    let relay_url = format!("{}{RELAY}", spawn_server().await);
    let client = RelayClient::new(relay_url, "");

    let err = client.system_stats().await.unwrap_err();
    assert!(matches!(err, TransportError::NotConfigured));
}

#[tokio::test]
async fn relay_client_keeps_unreachable_targets_transient() {
    let relay_url = format!("{}{RELAY}", spawn_server().await);
    // Nothing listens on the discard port.
    let client = RelayClient::new(relay_url, "http://127.0.0.1:9");

    let err = client.queue().await.unwrap_err();
    assert!(matches!(err, TransportError::Request(_) | TransportError::Timeout(_)), "{err:?}");
}
