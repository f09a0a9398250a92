// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan sessions: per-request file paths, the event channel, and the
// delivered output file.
//
// Every session derives its file names from a fresh `SessionId`, so
// concurrent sessions never share a path. The output file is owned by a
// `ScanOutput`, which deletes it when dropped; a transport that reads it
// through `into_bytes` removes it as soon as the bytes are in memory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::TempPath;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use scan2form_core::error::{BridgeError, Result};
use scan2form_core::types::{ScanEvent, ScanFormat, ScanOptions, SessionId};

/// One in-flight scan request.
#[derive(Debug, Clone)]
pub struct ScanSession {
    id: SessionId,
    options: ScanOptions,
    output_path: PathBuf,
    created_at: DateTime<Utc>,
}

impl ScanSession {
    /// Create a session whose output lands in `temp_dir` as
    /// `scan_<id>.<canonical extension>`.
    pub fn new(id: SessionId, options: ScanOptions, temp_dir: &Path) -> Self {
        let output_path = temp_dir.join(format!("scan_{id}.{}", options.format.extension()));
        Self {
            id,
            options,
            output_path,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn format(&self) -> ScanFormat {
        self.options.format
    }

    pub fn device_id(&self) -> Option<&str> {
        self.options.device_id.as_deref()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Sibling of the output file with a different extension, for engines
    /// that acquire in one format and convert to another.
    pub fn intermediate_path(&self, extension: &str) -> PathBuf {
        self.output_path.with_extension(extension)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Producer side of a session's event stream.
///
/// A disabled sink (synchronous transport) drops every event. Sending on a
/// sink whose receiver has gone away is not an error: the scan keeps
/// running to completion or timeout.
#[derive(Debug, Clone)]
pub struct EventSink {
    scan_id: SessionId,
    tx: Option<mpsc::Sender<ScanEvent>>,
}

impl EventSink {
    pub fn disabled(scan_id: SessionId) -> Self {
        Self { scan_id, tx: None }
    }

    pub fn channel(scan_id: SessionId, capacity: usize) -> (Self, mpsc::Receiver<ScanEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                scan_id,
                tx: Some(tx),
            },
            rx,
        )
    }

    pub fn scan_id(&self) -> SessionId {
        self.scan_id
    }

    pub async fn progress(&self, message: impl Into<String>, percent: u8) {
        self.emit(ScanEvent::Progress {
            scan_id: self.scan_id,
            message: message.into(),
            percent: percent.min(100),
        })
        .await;
    }

    pub(crate) async fn emit(&self, event: ScanEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).await.is_err() {
            debug!(scan_id = %self.scan_id, "event receiver gone; scan continues");
        }
    }
}

/// A finished scan file awaiting delivery. Deleted on drop.
#[derive(Debug)]
pub struct ScanOutput {
    id: SessionId,
    format: ScanFormat,
    path: TempPath,
    len: u64,
}

impl ScanOutput {
    pub(crate) fn new(id: SessionId, format: ScanFormat, path: TempPath, len: u64) -> Self {
        Self {
            id,
            format,
            path,
            len,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn format(&self) -> ScanFormat {
        self.format
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file in bytes, as checked when the scan finished.
    pub fn size(&self) -> u64 {
        self.len
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// File name offered to the browser.
    pub fn file_name(&self) -> String {
        format!("scan_{}.{}", self.id, self.format.extension())
    }

    /// Read the whole file and delete it.
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        let bytes = tokio::fs::read(self.path()).await?;
        if let Err(e) = self.path.close() {
            warn!(scan_id = %self.id, error = %e, "failed to delete delivered scan");
        }
        Ok(bytes)
    }
}

/// Consumer side of a streaming scan.
///
/// Drain [`next_event`](Self::next_event) until it returns `None`, then call
/// [`finish`](Self::finish) to take the output file. Dropping the handle
/// early leaves the scan running; its output is deleted when it ends.
#[derive(Debug)]
pub struct ScanHandle {
    id: SessionId,
    events: mpsc::Receiver<ScanEvent>,
    outcome: JoinHandle<Result<ScanOutput>>,
}

impl ScanHandle {
    pub(crate) fn new(
        id: SessionId,
        events: mpsc::Receiver<ScanEvent>,
        outcome: JoinHandle<Result<ScanOutput>>,
    ) -> Self {
        Self {
            id,
            events,
            outcome,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    /// Wait for the session task and take its result.
    pub async fn finish(self) -> Result<ScanOutput> {
        self.outcome.await.map_err(|e| {
            BridgeError::Io(std::io::Error::other(format!("scan task failed: {e}")))
        })?
    }
}
