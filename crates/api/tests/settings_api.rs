mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{body_json, build_test_app, get, post_json};

#[tokio::test]
async fn presets_are_listed_in_order() {
    let response = get(build_test_app(), "/api/v1/presets").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let names: Vec<&str> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["fast_preview", "balanced", "high_quality", "long_form"]);
}

#[tokio::test]
async fn unknown_preset_is_a_validation_error() {
    let response = get(build_test_app(), "/api/v1/presets/cinematic").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn plan_splits_long_durations_evenly() {
    let response = post_json(
        build_test_app(),
        "/api/v1/plan",
        json!({"duration_secs": 5.0}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let data = &body_json(response).await["data"];
    assert_eq!(data["plan"]["clip_count"], 3);
    assert_eq!(data["plan"]["adjusted_frame_count"], 13);
    assert_eq!(data["settings"]["frame_rate"], 8);
}

#[tokio::test]
async fn plan_applies_overrides_on_top_of_the_preset() {
    let response = post_json(
        build_test_app(),
        "/api/v1/plan",
        json!({"duration_secs": 4.0, "preset": "high_quality", "overrides": {"frame_rate": 6}}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let data = &body_json(response).await["data"];
    // 24 frames at 6 fps is a 4 s clip.
    assert_eq!(data["plan"]["clip_count"], 1);
    assert_eq!(data["settings"]["steps"], 30);
}

#[tokio::test]
async fn invalid_override_is_rejected() {
    let response = post_json(
        build_test_app(),
        "/api/v1/plan",
        json!({"duration_secs": 4.0, "overrides": {"denoise": 1.5}}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn non_positive_duration_is_rejected() {
    let response = post_json(
        build_test_app(),
        "/api/v1/plan",
        json!({"duration_secs": 0.0}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
