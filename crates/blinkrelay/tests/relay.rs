//! End-to-end tests driving the relay's router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use chrono::TimeZone;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use blinkrelay::{Clock, Config, DisabledDispatcher, ManualClock, Relay, ShutdownHandle};

fn test_relay(config: Config) -> (Relay, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        chrono::Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
    ));
    let relay = Relay::with_parts(config, clock.clone(), Arc::new(DisabledDispatcher));
    (relay, clock)
}

async fn send(app: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(text) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(text.to_string())
        }
        None => Body::empty(),
    };

    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body)).await
}

/// Local webhook that records every body it receives.
async fn spawn_webhook(status: StatusCode) -> (String, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().route(
        "/hook",
        post(move |Json(body): Json<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(body);
                (status, Json(json!({ "received": true })))
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), rx)
}

async fn wait_for_subscribers(relay: &Relay, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while relay.gateway().subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn heartbeat_devices(relay: &Relay, ids: &[&str]) {
    for id in ids {
        let (status, _) = post_json(
            relay.router(),
            "/api/heartbeat",
            &format!(r#"{{"deviceId":"{id}"}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}

/// Complete `event`/`data` pairs in an SSE body, skipping keep-alive comments.
fn parse_sse(text: &str) -> Vec<(String, Value)> {
    let complete = text.rfind("\n\n").map_or("", |end| &text[..end]);
    complete
        .split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_string());
                } else if let Some(body) = line.strip_prefix("data:") {
                    data = serde_json::from_str(body.trim()).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}

#[tokio::test]
async fn test_healthz() {
    let (relay, _) = test_relay(Config::default());
    let (status, body) = send(relay.router(), Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_heartbeat_registers_device() {
    let (relay, clock) = test_relay(Config::default());

    let (status, body) = post_json(
        relay.router(),
        "/api/heartbeat",
        r#"{"deviceId":"esp32-01","rssi":-58,"battery":81.5}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["device"]["status"], "online");
    assert_eq!(body["device"]["rssi"], -58);

    let (_, listing) = send(relay.router(), Method::GET, "/api/devices", None).await;
    let devices = listing["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["deviceId"], "esp32-01");

    assert_eq!(
        relay.gateway().device("esp32-01").unwrap().updated_at,
        clock.now()
    );
}

#[tokio::test]
async fn test_heartbeat_without_device_id_is_rejected() {
    let (relay, _) = test_relay(Config::default());
    let mut subscription = relay.gateway().subscribe();

    let (status, body) = post_json(relay.router(), "/api/heartbeat", r#"{"rssi":-40}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "deviceId required" }));

    assert!(relay.gateway().devices().is_empty());
    assert!(subscription.try_recv().is_none());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let (relay, _) = test_relay(Config::default());
    let (status, body) = post_json(relay.router(), "/api/blink", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_replayed_heartbeat_broadcasts_twice() {
    let (relay, _) = test_relay(Config::default());
    let mut subscription = relay.gateway().subscribe();

    for _ in 0..2 {
        let (status, _) =
            post_json(relay.router(), "/api/heartbeat", r#"{"deviceId":"esp32-01"}"#).await;
        assert_eq!(status, StatusCode::OK);
    }

    let first = subscription.try_recv().unwrap();
    let second = subscription.try_recv().unwrap();
    assert_eq!(first.event_name(), "status");
    assert_eq!(first.data()["status"], second.data()["status"]);
    assert!(subscription.try_recv().is_none());
}

#[tokio::test]
async fn test_blink_defaults_count_and_broadcasts() {
    let (relay, _) = test_relay(Config::default());
    let mut subscription = relay.gateway().subscribe();

    let (status, body) = post_json(relay.router(), "/api/blink", r#"{"deviceId":"esp32-01"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event"]["blinkCount"], 1);

    let broadcast = subscription.try_recv().unwrap();
    assert_eq!(broadcast.event_name(), "blinkCount");
}

#[tokio::test]
async fn test_light_command_and_state() {
    let (relay, _) = test_relay(Config::default());
    let mut subscription = relay.gateway().subscribe();

    let (status, _) = post_json(
        relay.router(),
        "/api/light",
        r#"{"deviceId":"lamp-1","command":"on"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(relay.router(), "/api/light-state", r#"{"on":true}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    assert_eq!(subscription.try_recv().unwrap().event_name(), "lightCommand");
    assert_eq!(subscription.try_recv().unwrap().event_name(), "lightState");
}

#[tokio::test]
async fn test_late_subscriber_gets_snapshot_first() {
    let (relay, _) = test_relay(Config::default());
    for id in ["a", "b", "c"] {
        post_json(
            relay.router(),
            "/api/heartbeat",
            &format!(r#"{{"deviceId":"{id}"}}"#),
        )
        .await;
    }

    let mut subscription = relay.gateway().subscribe();
    post_json(relay.router(), "/api/blink", r#"{"deviceId":"a","blinkCount":1}"#).await;

    let names: Vec<_> = std::iter::from_fn(|| subscription.try_recv())
        .map(|n| n.event_name())
        .collect();
    assert_eq!(names, vec!["status", "status", "status", "blinkCount"]);
}

#[tokio::test]
async fn test_dispatch_proxy_without_webhook_fails() {
    let (relay, _) = test_relay(Config::default());
    let (status, body) = post_json(relay.router(), "/api/dispatch", r#"{"hello":"world"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_dispatch_proxy_forwards_body() {
    let (url, mut received) = spawn_webhook(StatusCode::OK).await;
    let mut config = Config::default();
    config.dispatch.webhook_url = Some(url);
    let relay = Relay::new(config).unwrap();

    let (status, body) = post_json(relay.router(), "/api/dispatch", r#"{"message":"hi"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], json!({ "received": true }));
    assert_eq!(received.recv().await.unwrap(), json!({ "message": "hi" }));
}

#[tokio::test]
async fn test_dispatch_proxy_reports_webhook_failure() {
    let (url, _received) = spawn_webhook(StatusCode::SERVICE_UNAVAILABLE).await;
    let mut config = Config::default();
    config.dispatch.webhook_url = Some(url);
    let relay = Relay::new(config).unwrap();

    let (status, body) = post_json(relay.router(), "/api/dispatch", r#"{"message":"hi"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn test_emergency_blinks_reach_webhook() {
    let (url, mut received) = spawn_webhook(StatusCode::OK).await;
    let mut config = Config::default();
    config.dispatch.webhook_url = Some(url);
    config.profile.name = "Ada".to_string();
    config.profile.hospital_phone = "555-0100".to_string();

    let mut relay = Relay::new(config).unwrap();
    let shutdown = ShutdownHandle::new();
    let tasks = relay.spawn_background(&shutdown);
    let mut subscription = relay.gateway().subscribe();

    let (status, _) = post_json(
        relay.router(),
        "/api/blink",
        r#"{"deviceId":"esp32-01","blinkCount":5}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let payload = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload["type"], "emergency");
    assert_eq!(payload["deviceId"], "esp32-01");
    assert_eq!(payload["patient"]["name"], "Ada");
    assert_eq!(payload["medical"]["hospitalPhone"], "555-0100");

    assert_eq!(subscription.recv().await.unwrap().event_name(), "blinkCount");
    let intent = subscription.recv().await.unwrap();
    assert_eq!(intent.event_name(), "intent");
    assert_eq!(intent.data()["intent"]["kind"], "emergency");

    shutdown.stop();
    for task in tasks {
        task.abort();
    }
}

#[tokio::test]
async fn test_select_sends_need_for_first_option() {
    let (url, mut received) = spawn_webhook(StatusCode::OK).await;
    let mut config = Config::default();
    config.dispatch.webhook_url = Some(url);

    let mut relay = Relay::new(config).unwrap();
    let shutdown = ShutdownHandle::new();
    let tasks = relay.spawn_background(&shutdown);

    post_json(
        relay.router(),
        "/api/blink",
        r#"{"deviceId":"esp32-01","blinkCount":3}"#,
    )
    .await;

    let payload = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload["type"], "need");
    assert_eq!(payload["item"], "Food");

    shutdown.stop();
    for task in tasks {
        task.abort();
    }
}

#[tokio::test]
async fn test_permissive_cors_by_default() {
    let (relay, _) = test_relay(Config::default());
    let response = relay
        .router()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header(header::ORIGIN, "http://dashboard.local")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn test_cors_restricted_to_configured_origins() {
    let mut config = Config::default();
    config.server.allowed_origins = vec!["http://dashboard.local".to_string()];
    let (relay, _) = test_relay(config);

    let request = |origin: &str| {
        Request::builder()
            .uri("/healthz")
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .unwrap()
    };

    let allowed = relay.router().oneshot(request("http://dashboard.local")).await.unwrap();
    assert_eq!(
        allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://dashboard.local"
    );

    let denied = relay.router().oneshot(request("http://evil.example")).await.unwrap();
    assert!(denied
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[tokio::test]
async fn test_sse_sends_snapshot_then_live_events() {
    let (relay, _) = test_relay(Config::default());
    heartbeat_devices(&relay, &["b", "a"]).await;

    let response = relay
        .router()
        .oneshot(Request::builder().uri("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(relay.gateway().subscriber_count(), 1);

    relay.gateway().report_light_state(json!({ "on": true }));

    let mut body = response.into_body().into_data_stream();
    let mut text = String::new();
    let events = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let events = parse_sse(&text);
            if events.len() >= 3 {
                return events;
            }
            let chunk = body.next().await.unwrap().unwrap();
            text.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    })
    .await
    .unwrap();

    let names: Vec<_> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["status", "status", "lightState"]);
    let mut snapshot: Vec<_> = events[..2]
        .iter()
        .map(|(_, data)| data["deviceId"].as_str().unwrap())
        .collect();
    snapshot.sort_unstable();
    assert_eq!(snapshot, vec!["a", "b"]);
    assert!(events[..2].iter().all(|(_, data)| data["status"] == "online"));
    assert_eq!(events[2].1, json!({ "on": true }));

    drop(body);
    wait_for_subscribers(&relay, 0).await;
}

#[tokio::test]
async fn test_websocket_sends_snapshot_then_live_events() {
    let (relay, _) = test_relay(Config::default());
    heartbeat_devices(&relay, &["b", "a"]).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = relay.router();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    wait_for_subscribers(&relay, 1).await;
    relay.gateway().report_light_state(json!({ "on": true }));

    let mut frames = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while frames.len() < 3 {
            if let Message::Text(text) = socket.next().await.unwrap().unwrap() {
                frames.push(serde_json::from_str::<Value>(&text).unwrap());
            }
        }
    })
    .await
    .unwrap();

    let names: Vec<_> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["status", "status", "lightState"]);
    let mut snapshot: Vec<_> = frames[..2]
        .iter()
        .map(|f| f["data"]["deviceId"].as_str().unwrap())
        .collect();
    snapshot.sort_unstable();
    assert_eq!(snapshot, vec!["a", "b"]);
    assert_eq!(frames[2]["data"], json!({ "on": true }));

    // inbound reports on the same socket
    socket
        .send(Message::Text(
            r#"{"event":"heartbeat","data":{"deviceId":"c"}}"#.to_string(),
        ))
        .await
        .unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Message::Text(text) = socket.next().await.unwrap().unwrap() {
                return serde_json::from_str::<Value>(&text).unwrap();
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(echoed["event"], "status");
    assert_eq!(echoed["data"]["deviceId"], "c");

    socket.close(None).await.unwrap();
    drop(socket);
    wait_for_subscribers(&relay, 0).await;
}
