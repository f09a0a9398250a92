// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan service: validates requests, drives the active engine through one
// session, and hands back the output file.
//
// Both transports go through here. The synchronous one awaits
// `perform_scan`; the streaming one calls `start_scan` and relays the
// session's events. Either way the output file is guarded from the moment
// its path exists, so it is deleted on every failure path and, after
// success, as soon as the caller is done with the `ScanOutput`.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempPath;
use tracing::{error, info, warn};

use scan2form_core::config::BridgeConfig;
use scan2form_core::error::{BridgeError, Result};
use scan2form_core::types::{Device, ScanEvent, ScanRequest, SessionId};

use crate::engine::ScannerEngine;
use crate::runner::{CommandRunner, ProcessRunner};
use crate::selector::EngineSelector;
use crate::session::{EventSink, ScanHandle, ScanOutput, ScanSession};

/// Buffered events per streaming session.
const EVENT_CAPACITY: usize = 32;

#[derive(Debug)]
pub struct ScanService {
    config: Arc<BridgeConfig>,
    selector: EngineSelector,
}

impl ScanService {
    /// Service that runs the real scanner tools.
    pub fn new(config: BridgeConfig) -> Self {
        let runner = Arc::new(ProcessRunner::new(config.scan_timeout()));
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: BridgeConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let selector = EngineSelector::with_default_engines(runner, &config);
        Self::with_selector(config, selector)
    }

    pub fn with_selector(config: BridgeConfig, selector: EngineSelector) -> Self {
        Self {
            config: Arc::new(config),
            selector,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The active engine (probing on first use).
    pub async fn engine(&self) -> Result<Arc<dyn ScannerEngine>> {
        self.selector.select().await
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let engine = self.selector.select().await?;
        engine.list_devices().await
    }

    /// Run one scan to completion without progress events.
    pub async fn perform_scan(&self, request: &ScanRequest) -> Result<ScanOutput> {
        let id = SessionId::new();
        self.execute(id, request, &EventSink::disabled(id)).await
    }

    /// Start a scan in the background and return its event stream.
    ///
    /// The session emits exactly one terminal event (`complete` or `error`)
    /// before the stream closes.
    pub fn start_scan(self: &Arc<Self>, request: ScanRequest) -> ScanHandle {
        let id = SessionId::new();
        let (events, rx) = EventSink::channel(id, EVENT_CAPACITY);
        let service = Arc::clone(self);
        let outcome = tokio::spawn(async move { service.run_session(id, request, events).await });
        ScanHandle::new(id, rx, outcome)
    }

    async fn run_session(&self, id: SessionId, request: ScanRequest, events: EventSink) -> Result<ScanOutput> {
        let result = self.execute(id, &request, &events).await;
        let terminal = match &result {
            Ok(output) => ScanEvent::Complete {
                scan_id: id,
                path: output.path().to_path_buf(),
            },
            Err(e) => ScanEvent::from_error(id, e),
        };
        events.emit(terminal).await;
        result
    }

    async fn execute(&self, id: SessionId, request: &ScanRequest, events: &EventSink) -> Result<ScanOutput> {
        let options = request.validate(&self.config.allowed_formats)?;
        let engine = self.selector.select().await?;

        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let session = ScanSession::new(id, options, &self.config.temp_dir);
        let output = TempPath::try_from_path(session.output_path())?;

        info!(
            scan_id = %id,
            engine = engine.name(),
            format = %session.format(),
            device = session.device_id().unwrap_or("default"),
            "scan started"
        );

        if let Err(e) = engine.scan(&session, events).await {
            error!(
                scan_id = %id,
                engine = engine.name(),
                command = e.command_error().map(|c| c.command()),
                error = %e,
                "scan failed"
            );
            discard(output);
            return Err(e);
        }

        let len = match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => {
                warn!(scan_id = %id, path = %output.display(), "engine reported success without output");
                discard(output);
                return Err(BridgeError::ScanOutputMissing {
                    path: session.output_path().to_path_buf(),
                });
            }
        };

        let elapsed_ms = (Utc::now() - session.created_at()).num_milliseconds();
        info!(scan_id = %id, bytes = len, elapsed_ms, "scan complete");
        Ok(ScanOutput::new(id, session.format(), output, len))
    }
}

/// Delete a guarded file now rather than at drop; a file the engine never
/// created is fine.
fn discard(path: TempPath) {
    if let Err(e) = path.close() {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "failed to delete scan output");
        }
    }
}
