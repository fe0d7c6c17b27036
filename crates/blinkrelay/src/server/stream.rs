//! Push transports: WebSocket and server-sent events.
//!
//! Both register a gateway subscription for the lifetime of the connection.
//! Closing the connection drops the subscription, which unregisters it.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::AppState;
use crate::error::{Error, Result};
use crate::gateway::{
    BlinkReport, HeartbeatReport, Notification, PresenceGateway, SubscriberId,
};

/// `GET /ws`
pub async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state.gateway))
}

async fn serve_socket(socket: WebSocket, gateway: Arc<PresenceGateway>) {
    let mut subscription = gateway.subscribe();
    let id = subscription.id();
    debug!(subscriber = id, "WebSocket connected");

    let (mut sink, mut inbound) = socket.split();

    loop {
        tokio::select! {
            outbound = subscription.recv() => {
                let Some(notification) = outbound else { break };
                if sink.send(Message::Text(notification.to_frame())).await.is_err() {
                    break;
                }
            }
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_frame(&gateway, id, &text) {
                        if sink.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(subscriber = id, "{}", Error::transport(err.to_string()));
                    break;
                }
            },
        }
    }

    debug!(subscriber = id, "WebSocket disconnected");
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Apply one inbound text frame. Returns an error frame to send back, if any.
pub(crate) fn handle_frame(
    gateway: &PresenceGateway,
    subscriber: SubscriberId,
    text: &str,
) -> Option<String> {
    match apply_frame(gateway, subscriber, text) {
        Ok(()) => None,
        Err(err) => {
            warn!(subscriber, "Rejected WebSocket frame: {err}");
            Some(json!({ "event": "error", "data": { "error": err.to_string() } }).to_string())
        }
    }
}

fn apply_frame(gateway: &PresenceGateway, subscriber: SubscriberId, text: &str) -> Result<()> {
    let frame: InboundFrame =
        serde_json::from_str(text).map_err(|e| Error::malformed(e.to_string()))?;

    match frame.event.as_str() {
        "hello" => {
            gateway.resync(subscriber);
        }
        "heartbeat" => {
            let report: HeartbeatReport = decode(frame.data)?;
            gateway.report_heartbeat(report)?;
        }
        "blink" => {
            let report: BlinkReport = decode(frame.data)?;
            gateway.report_blink(report)?;
        }
        "lightStateUpdate" => gateway.report_light_state(frame.data),
        other => return Err(Error::malformed(format!("unknown event '{other}'"))),
    }
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T> {
    // a frame without `data` is an empty report, not a type error
    let data = match data {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };
    serde_json::from_value(data).map_err(|e| Error::malformed(e.to_string()))
}

/// `GET /sse`
pub async fn sse(State(state): State<AppState>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let subscription = state.gateway.subscribe();
    debug!(subscriber = subscription.id(), "SSE connected");

    let events = subscription
        .into_stream()
        .map(|notification| Ok(to_event(&notification)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(state.sse_keepalive)
            .text("keepalive"),
    )
}

fn to_event(notification: &Notification) -> Event {
    Event::default()
        .event(notification.event_name())
        .data(notification.data().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn setup() -> (Arc<PresenceGateway>, crate::gateway::Subscription) {
        let gateway = Arc::new(PresenceGateway::new(Arc::new(SystemClock), 16));
        let subscription = gateway.subscribe();
        (gateway, subscription)
    }

    fn error_text(reply: &str) -> String {
        let value: Value = serde_json::from_str(reply).unwrap();
        assert_eq!(value["event"], "error");
        value["data"]["error"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_heartbeat_frame_updates_registry() {
        let (gateway, sub) = setup();
        let reply = handle_frame(
            &gateway,
            sub.id(),
            r#"{"event":"heartbeat","data":{"deviceId":"esp32-01","rssi":-50}}"#,
        );
        assert!(reply.is_none());
        assert!(gateway.device("esp32-01").is_some());
    }

    #[test]
    fn test_hello_resyncs_caller() {
        let (gateway, mut sub) = setup();
        handle_frame(&gateway, sub.id(), r#"{"event":"heartbeat","data":{"deviceId":"a"}}"#);
        while sub.try_recv().is_some() {}

        assert!(handle_frame(&gateway, sub.id(), r#"{"event":"hello"}"#).is_none());
        assert_eq!(sub.try_recv().unwrap().event_name(), "status");
    }

    #[test]
    fn test_blink_frame_without_device_is_rejected() {
        let (gateway, sub) = setup();
        let reply = handle_frame(&gateway, sub.id(), r#"{"event":"blink","data":{}}"#).unwrap();
        assert_eq!(error_text(&reply), "deviceId required");
    }

    #[test]
    fn test_report_frames_without_data_need_a_device() {
        let (gateway, sub) = setup();
        for frame in [r#"{"event":"heartbeat"}"#, r#"{"event":"blink"}"#] {
            let reply = handle_frame(&gateway, sub.id(), frame).unwrap();
            assert_eq!(error_text(&reply), "deviceId required", "{frame}");
        }
        assert!(gateway.devices().is_empty());
    }

    #[test]
    fn test_light_state_frame_is_relayed() {
        let (gateway, mut sub) = setup();
        handle_frame(
            &gateway,
            sub.id(),
            r#"{"event":"lightStateUpdate","data":{"deviceId":"lamp","on":false}}"#,
        );
        let relayed = sub.try_recv().unwrap();
        assert_eq!(relayed.event_name(), "lightState");
        assert_eq!(relayed.data()["on"], false);
    }

    #[test]
    fn test_garbage_and_unknown_frames_get_error_replies() {
        let (gateway, sub) = setup();
        assert!(handle_frame(&gateway, sub.id(), "not json").is_some());

        let reply = handle_frame(&gateway, sub.id(), r#"{"event":"reboot"}"#).unwrap();
        assert!(error_text(&reply).contains("reboot"));
    }
}
