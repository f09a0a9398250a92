// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// NAPS2 console driver engine (single stage).
//
// `naps2.console -o <path>` scans straight to the target file and picks the
// output format from the path's extension, so the format never appears as
// a separate flag.
//
// Limitation: the console driver scans from whatever device its saved
// default profile names. A `deviceId` in the request cannot retarget it;
// the engine logs that and carries on with the profile device.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use scan2form_core::error::{BridgeError, Result};
use scan2form_core::types::Device;

use crate::engine::ScannerEngine;
use crate::runner::{CommandRunner, Invocation};
use crate::session::{EventSink, ScanSession};

pub const ENGINE_NAME: &str = "naps2";

#[derive(Debug)]
pub struct Naps2Engine {
    runner: Arc<dyn CommandRunner>,
    program: String,
    probe_timeout: Duration,
}

impl Naps2Engine {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            runner,
            program: program.into(),
            probe_timeout,
        }
    }

    fn command(&self) -> Invocation {
        Invocation::new(&self.program)
    }
}

#[async_trait]
impl ScannerEngine for Naps2Engine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn is_available(&self) -> bool {
        let probe = self.command().arg("--help").timeout(self.probe_timeout);
        match self.runner.run(&probe).await {
            Ok(_) => true,
            Err(e) => {
                debug!(engine = ENGINE_NAME, error = %e, "probe failed");
                false
            }
        }
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let stdout = self
            .runner
            .run(&self.command().arg("--list"))
            .await
            .map_err(|source| BridgeError::DeviceListFailed {
                engine: ENGINE_NAME,
                source,
            })?;
        Ok(parse_device_list(&stdout))
    }

    async fn scan(&self, session: &ScanSession, events: &EventSink) -> Result<()> {
        if let Some(device) = session.device_id() {
            warn!(
                scan_id = %session.id(),
                device,
                "NAPS2 console cannot select a device per scan; using its default profile"
            );
        }

        let output = session.output_path();
        events.progress("Scanning with NAPS2", 0).await;

        let scan = self
            .command()
            .arg("-o")
            .arg(output.to_string_lossy())
            .arg("-v");
        self.runner
            .run(&scan)
            .await
            .map_err(|source| BridgeError::ScanFailed {
                engine: ENGINE_NAME,
                source,
            })?;

        // NAPS2 exits 0 when the scan is cancelled at the device, without
        // writing anything.
        if !tokio::fs::try_exists(output).await? {
            return Err(BridgeError::ScanOutputMissing {
                path: output.to_path_buf(),
            });
        }

        info!(scan_id = %session.id(), path = %output.display(), "NAPS2 scan written");
        Ok(())
    }

    fn supports_device_selection(&self) -> bool {
        false
    }
}

/// One device name per non-empty line.
fn parse_device_list(stdout: &str) -> Vec<Device> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Device::named)
        .collect()
}
