// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// WebSocket streaming adapter.
//
// One connection can run several requests. Each scan gets its own relay
// task that forwards the session's events verbatim, then the file as a
// base64 `result` frame. If the finished file cannot be read, the client
// gets a `result_error` frame instead; the session's own terminal event has
// already gone out by then. All frames funnel through a single writer task.
//
// A client that disconnects mid-scan does not cancel it: the relay keeps
// draining events until the session ends and drops the output unread,
// which deletes the file.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use scan2form_core::error::BridgeError;
use scan2form_core::human_errors::humanize_error;
use scan2form_core::types::{Device, ScanRequest, SessionId};
use scan2form_engine::{ScanOutput, ScanService};

/// Outgoing frames buffered per connection.
const OUTBOUND_CAPACITY: usize = 64;

/// A request frame from the browser.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Scan(ScanRequest),
    Devices,
}

/// Frames the bridge sends in addition to relayed `ScanEvent`s.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Result {
        scan_id: SessionId,
        mime_type: &'static str,
        file_name: String,
        data: String,
    },
    Devices {
        devices: Vec<Device>,
    },
    /// The session completed but its file could not be delivered. Not a
    /// session event: the session's own terminal event has already been sent.
    #[serde(rename = "result_error")]
    ResultError {
        scan_id: SessionId,
        code: String,
        message: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        scan_id: Option<SessionId>,
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
    },
}

impl ServerMessage {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Error {
            scan_id: None,
            code: "BAD_REQUEST".into(),
            message: message.into(),
            detail: None,
            suggestion: None,
        }
    }

    pub fn delivery_failed(scan_id: SessionId, err: &BridgeError) -> Self {
        Self::ResultError {
            scan_id,
            code: err.code().into(),
            message: err.to_string(),
        }
    }

    pub fn from_error(scan_id: Option<SessionId>, err: &BridgeError) -> Self {
        Self::Error {
            scan_id,
            code: err.code().into(),
            message: err.to_string(),
            detail: err.detail().map(str::to_owned),
            suggestion: Some(humanize_error(err).suggestion),
        }
    }
}

pub(crate) async fn upgrade(ws: WebSocketUpgrade, State(service): State<Arc<ScanService>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, service))
}

async fn handle_socket(socket: WebSocket, service: Arc<ScanService>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    info!("websocket client connected");

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                debug!("websocket send failed; client gone");
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        let parsed = match msg {
            Ok(Message::Text(text)) => serde_json::from_str::<ClientMessage>(text.as_str()),
            Ok(Message::Binary(bin)) => serde_json::from_slice::<ClientMessage>(&bin),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "websocket receive failed");
                break;
            }
        };

        match parsed {
            Ok(ClientMessage::Scan(request)) => {
                tokio::spawn(relay_scan(Arc::clone(&service), request, tx.clone()));
            }
            Ok(ClientMessage::Devices) => {
                tokio::spawn(relay_devices(Arc::clone(&service), tx.clone()));
            }
            Err(e) => {
                warn!(error = %e, "unrecognised websocket message");
                send(&tx, &ServerMessage::bad_request(format!("unrecognised message: {e}"))).await;
            }
        }
    }

    // The writer ends once every in-flight relay has dropped its sender.
    drop(tx);
    let _ = writer.await;
    info!("websocket client disconnected");
}

async fn relay_scan(service: Arc<ScanService>, request: ScanRequest, out: mpsc::Sender<Message>) {
    let mut handle = service.start_scan(request);
    let scan_id = handle.id();

    // Keep draining after the client leaves so the session never blocks on
    // a full event buffer.
    while let Some(event) = handle.next_event().await {
        send(&out, &event).await;
    }

    let output = match handle.finish().await {
        Ok(output) => output,
        // Already reported to the client as the session's `error` event.
        Err(_) => return,
    };

    if out.is_closed() {
        debug!(scan_id = %scan_id, "client gone; discarding scan output");
        return;
    }

    let frame = match result_frame(output).await {
        Ok(frame) => frame,
        Err(e) => {
            warn!(scan_id = %scan_id, error = %e, "scan finished but could not be delivered");
            ServerMessage::delivery_failed(scan_id, &e)
        }
    };
    send(&out, &frame).await;
}

async fn result_frame(output: ScanOutput) -> Result<ServerMessage, BridgeError> {
    let scan_id = output.id();
    debug!(scan_id = %scan_id, bytes = output.size(), "encoding scan for websocket");
    let mime_type = output.mime_type();
    let file_name = output.file_name();
    let bytes = output.into_bytes().await?;
    Ok(ServerMessage::Result {
        scan_id,
        mime_type,
        file_name,
        data: BASE64.encode(bytes),
    })
}

async fn relay_devices(service: Arc<ScanService>, out: mpsc::Sender<Message>) {
    let frame = match service.list_devices().await {
        Ok(devices) => ServerMessage::Devices { devices },
        Err(e) => {
            warn!(error = %e, code = e.code(), "device listing failed");
            ServerMessage::from_error(None, &e)
        }
    };
    send(&out, &frame).await;
}

/// Queue `value` as a JSON text frame. A closed connection is not an error.
async fn send<T: Serialize>(out: &mpsc::Sender<Message>, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => {
            let _ = out.send(Message::Text(Utf8Bytes::from(json))).await;
        }
        Err(e) => warn!(error = %e, "failed to encode websocket frame"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn parses_scan_with_options() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"scan","format":"PNG","deviceId":"epson2:libusb:001:004"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Scan(ScanRequest {
                format: Some("PNG".into()),
                device_id: Some("epson2:libusb:001:004".into()),
            })
        );
    }

    #[test]
    fn parses_bare_scan_and_devices() {
        let scan: ClientMessage = serde_json::from_str(r#"{"action":"scan"}"#).unwrap();
        assert_eq!(scan, ClientMessage::Scan(ScanRequest::default()));
        let devices: ClientMessage = serde_json::from_str(r#"{"action":"devices"}"#).unwrap();
        assert_eq!(devices, ClientMessage::Devices);
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"print"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn result_frame_shape() {
        let id = SessionId::new();
        let frame = ServerMessage::Result {
            scan_id: id,
            mime_type: "image/png",
            file_name: format!("scan_{id}.png"),
            data: BASE64.encode(b"png"),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["scanId"], json!(id.to_string()));
        assert_eq!(value["mimeType"], "image/png");
        assert_eq!(value["data"], "cG5n");
    }

    #[test]
    fn bad_request_frame_omits_empty_fields() {
        let value = serde_json::to_value(ServerMessage::bad_request("nope")).unwrap();
        assert_eq!(value, json!({ "type": "error", "code": "BAD_REQUEST", "message": "nope" }));
    }

    #[test]
    fn error_frame_carries_code_and_suggestion() {
        let value: Value =
            serde_json::to_value(ServerMessage::from_error(None, &BridgeError::NoEngineAvailable)).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "NO_ENGINE");
        assert!(value["suggestion"].as_str().unwrap().contains("NAPS2"));
        assert!(value.get("detail").is_none());
    }

    fn naps2_service(dir: &std::path::Path) -> Arc<ScanService> {
        use scan2form_core::config::BridgeConfig;
        use scan2form_engine::testing::ScriptedRunner;

        let runner = ScriptedRunner::new(|inv, _| {
            if let Some(out) = inv.arg_after("-o") {
                std::fs::write(out, b"%PDF-1.7").unwrap();
            }
            if inv.has_arg("--list") {
                return Ok("Canon LiDE 300\n".into());
            }
            Ok(String::new())
        });
        let config = BridgeConfig {
            temp_dir: dir.to_path_buf(),
            ..BridgeConfig::default()
        };
        Arc::new(ScanService::with_runner(config, Arc::new(runner)))
    }

    async fn frames(mut rx: mpsc::Receiver<Message>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(msg) = rx.recv().await {
            match msg {
                Message::Text(text) => frames.push(serde_json::from_str(text.as_str()).unwrap()),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        frames
    }

    #[tokio::test]
    async fn scan_relay_streams_events_then_result() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);

        relay_scan(naps2_service(dir.path()), ScanRequest::default(), tx).await;
        let frames = frames(rx).await;

        let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
        assert_eq!(types, ["progress", "complete", "result"]);
        let scan_id = &frames[0]["scanId"];
        assert!(frames.iter().all(|f| &f["scanId"] == scan_id));

        let result = &frames[2];
        assert_eq!(result["mimeType"], "application/pdf");
        let data = BASE64.decode(result["data"].as_str().unwrap()).unwrap();
        assert_eq!(data, b"%PDF-1.7");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn scan_relay_reports_validation_error_once() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);

        relay_scan(naps2_service(dir.path()), ScanRequest::with_format("tiff"), tx).await;
        let frames = frames(rx).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "error");
        assert_eq!(frames[0]["code"], "INVALID_FORMAT");
    }

    #[tokio::test]
    async fn undeliverable_output_gets_result_error_after_single_terminal_event() {
        use scan2form_core::config::BridgeConfig;
        use scan2form_engine::testing::ScriptedRunner;

        let dir = tempfile::tempdir().unwrap();
        // A directory at the output path passes the size check but cannot be read.
        let runner = ScriptedRunner::new(|inv, _| {
            if let Some(out) = inv.arg_after("-o") {
                std::fs::create_dir(out).unwrap();
                std::fs::write(std::path::Path::new(out).join("page"), b"x").unwrap();
            }
            Ok(String::new())
        });
        let config = BridgeConfig {
            temp_dir: dir.path().to_path_buf(),
            ..BridgeConfig::default()
        };
        let service = Arc::new(ScanService::with_runner(config, Arc::new(runner)));
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);

        relay_scan(service, ScanRequest::default(), tx).await;
        let frames = frames(rx).await;

        let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
        assert_eq!(types, ["progress", "complete", "result_error"]);
        assert_eq!(types.iter().filter(|t| **t == "complete" || **t == "error").count(), 1);
        assert_eq!(frames[2]["code"], "IO_ERROR");
        assert_eq!(frames[2]["scanId"], frames[1]["scanId"]);
    }

    #[tokio::test]
    async fn scan_relay_without_client_deletes_output() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        drop(rx);

        relay_scan(naps2_service(dir.path()), ScanRequest::default(), tx).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn devices_relay_answers_with_list() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);

        relay_devices(naps2_service(dir.path()), tx).await;
        let frames = frames(rx).await;

        assert_eq!(frames, [json!({ "type": "devices", "devices": [{ "name": "Canon LiDE 300" }] })]);
    }
}
