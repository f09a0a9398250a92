// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The scanner engine capability shared by every backend.

use async_trait::async_trait;

use scan2form_core::error::Result;
use scan2form_core::types::Device;

use crate::session::{EventSink, ScanSession};

/// A scanning backend driven through an external command-line tool.
///
/// The set of engines is closed (see [`crate::selector::EngineSelector`]);
/// the trait exists so the selector and the service can treat them
/// uniformly and so tests can drive them with a scripted runner.
#[async_trait]
pub trait ScannerEngine: Send + Sync + std::fmt::Debug {
    /// Short identifier reported by `/health` and in logs.
    fn name(&self) -> &'static str;

    /// Probe whether the backend tool is installed and answers.
    ///
    /// Bounded by the probe timeout; never fails, only reports `false`.
    async fn is_available(&self) -> bool;

    /// Enumerate attached scanners.
    ///
    /// A tool failure is `BridgeError::DeviceListFailed`, never an empty list.
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Produce the session's output file at `session.output_path()`.
    ///
    /// Engines may emit progress/page events on `events`; the terminal
    /// `complete`/`error` event belongs to the caller.
    async fn scan(&self, session: &ScanSession, events: &EventSink) -> Result<()>;

    /// Whether a `deviceId` in the request actually selects the device.
    fn supports_device_selection(&self) -> bool {
        true
    }
}
