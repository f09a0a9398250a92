// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP request/response adapter.
//
// `POST /scan` blocks until the session ends and answers with the file
// itself. The file is read into memory and deleted before the response is
// written, so nothing is left on disk whether or not the client stays to
// receive it.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use scan2form_core::error::BridgeError;
use scan2form_core::human_errors::humanize_error;
use scan2form_core::types::ScanRequest;
use scan2form_engine::ScanService;

use crate::ws;

/// All bridge routes, with permissive CORS so pages on any origin can reach
/// the local bridge.
pub fn router(service: Arc<ScanService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/devices", get(devices))
        .route("/scan", post(scan))
        .route("/ws", get(ws::upgrade))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

pub(crate) fn status_of(err: &BridgeError) -> StatusCode {
    StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn health(State(service): State<Arc<ScanService>>) -> Response {
    match service.engine().await {
        Ok(engine) => Json(json!({
            "status": "ok",
            "engine": engine.name(),
            "version": env!("CARGO_PKG_VERSION"),
            "deviceSelection": engine.supports_device_selection(),
        }))
        .into_response(),
        Err(e) => {
            debug!(error = %e, "health check without engine");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "error": "No Engine Available" })),
            )
                .into_response()
        }
    }
}

async fn devices(State(service): State<Arc<ScanService>>) -> Response {
    match service.list_devices().await {
        Ok(devices) => Json(json!({ "devices": devices })).into_response(),
        Err(e) => {
            warn!(error = %e, code = e.code(), "device listing failed");
            (
                status_of(&e),
                Json(json!({ "devices": [], "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn scan(State(service): State<Arc<ScanService>>, body: Bytes) -> Response {
    // Browsers sometimes post without a body or content type; both mean
    // "defaults".
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ScanRequest::default()
    } else {
        match serde_json::from_slice::<ScanRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Invalid request body: {e}") })),
                )
                    .into_response();
            }
        }
    };

    let output = match service.perform_scan(&request).await {
        Ok(output) => output,
        Err(e) => return scan_error(&e),
    };

    debug!(scan_id = %output.id(), bytes = output.size(), "sending scan");
    let content_type = output.mime_type();
    let disposition = format!("inline; filename=\"{}\"", output.file_name());
    match output.into_bytes().await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, content_type.to_owned()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => scan_error(&e),
    }
}

fn scan_error(err: &BridgeError) -> Response {
    if let BridgeError::InvalidFormat { supported, .. } = err {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Invalid format. Supported: {supported}") })),
        )
            .into_response();
    }

    if err.is_client_error() {
        debug!(code = err.code(), error = %err, "scan request rejected");
    } else {
        warn!(code = err.code(), error = %err, "scan failed");
    }

    let human = humanize_error(err);
    let details = err.detail().map_or_else(|| err.to_string(), str::to_owned);
    (
        status_of(err),
        Json(json!({
            "error": "Scan failed",
            "code": err.code(),
            "details": details,
            "suggestion": human.suggestion,
        })),
    )
        .into_response()
}
