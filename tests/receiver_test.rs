//! Receiver pipeline tests driven through the axum router.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use smart_kissan::error::GENERIC_FAILURE_MESSAGE;
use smart_kissan::receiver::{
    router, DispatchMode, EventHandlers, HandlerResult, ReceiverState, MAX_BODY_BYTES,
    SUCCESS_MESSAGE,
};
use tower::ServiceExt;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(&'static str, Value)>>,
    fail_with: Option<&'static str>,
}

impl Recorder {
    fn record(&self, name: &'static str, data: &Value) -> HandlerResult {
        self.calls.lock().unwrap().push((name, data.clone()));
        match self.fail_with {
            Some(msg) => Err(msg.into()),
            None => Ok(()),
        }
    }

    fn names(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().iter().map(|(n, _)| *n).collect()
    }
}

#[async_trait]
impl EventHandlers for Recorder {
    async fn crop_update(&self, data: &Value) -> HandlerResult {
        self.record("crop_update", data)
    }

    async fn weather_alert(&self, data: &Value) -> HandlerResult {
        self.record("weather_alert", data)
    }

    async fn sensor_data(&self, data: &Value) -> HandlerResult {
        self.record("sensor_data", data)
    }
}

fn app(recorder: Arc<Recorder>, mode: DispatchMode) -> Router {
    router(ReceiverState::new(recorder, mode))
}

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Body,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, bytes.to_vec())
}

fn envelope(event: &str, data: Value) -> Body {
    Body::from(
        json!({ "event": event, "data": data, "timestamp": "2024-06-01T08:30:00Z" }).to_string(),
    )
}

fn assert_cors(headers: &HeaderMap) {
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
    assert!(headers.get(header::ACCESS_CONTROL_ALLOW_HEADERS).is_some());
}

#[tokio::test]
async fn known_events_are_dispatched_and_echoed() {
    for event in ["crop_update", "weather_alert", "sensor_data"] {
        let recorder = Arc::new(Recorder::default());
        let data = json!({ "field": "plot_7", "moisture": 31.5 });
        let (status, headers, body) = send(
            app(recorder.clone(), DispatchMode::Lenient),
            Method::POST,
            "/webhook",
            envelope(event, data.clone()),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_cors(&headers);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({ "success": true, "message": SUCCESS_MESSAGE, "event": event })
        );
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, event);
        assert_eq!(calls[0].1, data);
    }
}

#[tokio::test]
async fn crop_update_scenario() {
    let recorder = Arc::new(Recorder::default());
    let data = json!({
        "crop_id": "crop_001",
        "crop_type": "wheat",
        "growth_stage": "flowering",
    });
    let (status, _, body) = send(
        app(recorder.clone(), DispatchMode::Lenient),
        Method::POST,
        "/",
        envelope("crop_update", data),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Webhook processed successfully");
    assert_eq!(body["event"], "crop_update");
    assert_eq!(recorder.names(), vec!["crop_update"]);
}

#[tokio::test]
async fn other_methods_are_rejected_without_dispatch() {
    for method in [Method::GET, Method::PUT, Method::DELETE, Method::PATCH] {
        let recorder = Arc::new(Recorder::default());
        let (status, headers, body) = send(
            app(recorder.clone(), DispatchMode::Lenient),
            method,
            "/webhook",
            envelope("crop_update", json!({})),
        )
        .await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_cors(&headers);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "error": "Method not allowed" }));
        assert!(recorder.names().is_empty());
    }
}

#[tokio::test]
async fn preflight_answers_on_any_path() {
    for path in ["/", "/webhook", "/functions/v1/webhook-handler"] {
        let recorder = Arc::new(Recorder::default());
        let (status, headers, body) = send(
            app(recorder.clone(), DispatchMode::Strict),
            Method::OPTIONS,
            path,
            Body::empty(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_cors(&headers);
        assert!(body.is_empty());
        assert!(recorder.names().is_empty());
    }
}

#[tokio::test]
async fn unknown_event_is_acknowledged_when_lenient() {
    let recorder = Arc::new(Recorder::default());
    let (status, _, body) = send(
        app(recorder.clone(), DispatchMode::Lenient),
        Method::POST,
        "/webhook",
        envelope("pest_sighting", json!({ "pest": "locust" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["event"], "pest_sighting");
    assert!(recorder.names().is_empty());
}

#[tokio::test]
async fn unknown_event_is_rejected_when_strict() {
    let recorder = Arc::new(Recorder::default());
    let (status, headers, body) = send(
        app(recorder.clone(), DispatchMode::Strict),
        Method::POST,
        "/webhook",
        envelope("pest_sighting", json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_cors(&headers);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "Unknown event");
    assert_eq!(body["message"], "Unsupported event: pest_sighting");
    assert!(recorder.names().is_empty());
}

#[tokio::test]
async fn malformed_body_is_a_generic_server_error() {
    for raw in ["not json at all", "{\"data\": {}}", ""] {
        let recorder = Arc::new(Recorder::default());
        let (status, headers, body) = send(
            app(recorder.clone(), DispatchMode::Lenient),
            Method::POST,
            "/webhook",
            Body::from(raw),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_cors(&headers);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Internal server error");
        let message = body["message"].as_str().unwrap();
        assert!(!message.is_empty());
        assert_eq!(message, GENERIC_FAILURE_MESSAGE);
        assert!(recorder.names().is_empty());
    }
}

#[tokio::test]
async fn handler_failure_does_not_leak_details() {
    let recorder = Arc::new(Recorder {
        fail_with: Some("db password rejected for farm_admin"),
        ..Default::default()
    });
    let (status, _, body) = send(
        app(recorder.clone(), DispatchMode::Lenient),
        Method::POST,
        "/webhook",
        envelope("sensor_data", json!({ "sensor_id": "s-12", "temp_c": 41.2 })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let text = String::from_utf8(body).unwrap();
    assert!(!text.contains("farm_admin"));
    assert_eq!(recorder.names(), vec!["sensor_data"]);
}

fn oversized_envelope() -> Body {
    let padding = "x".repeat(MAX_BODY_BYTES + 1024 * 1024);
    envelope("crop_update", json!({ "notes": padding }))
}

#[tokio::test]
async fn oversized_post_gets_the_json_failure_body() {
    let recorder = Arc::new(Recorder::default());
    let (status, headers, body) = send(
        app(recorder.clone(), DispatchMode::Lenient),
        Method::POST,
        "/webhook",
        oversized_envelope(),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_cors(&headers);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        body,
        json!({ "error": "Internal server error", "message": GENERIC_FAILURE_MESSAGE })
    );
    assert!(recorder.names().is_empty());
}

#[tokio::test]
async fn preflight_ignores_an_oversized_body() {
    let recorder = Arc::new(Recorder::default());
    let (status, headers, body) = send(
        app(recorder.clone(), DispatchMode::Strict),
        Method::OPTIONS,
        "/webhook",
        oversized_envelope(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_cors(&headers);
    assert!(body.is_empty());
    assert!(recorder.names().is_empty());
}
