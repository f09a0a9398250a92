// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SANE engine (two stages: acquire, then convert).
//
// `scanimage` only writes raw image streams, so every scan is acquired as a
// TIFF written straight from the child's stdout to disk, then handed to an
// image converter (`sips` on macOS, ImageMagick elsewhere) that writes the
// requested format at the session's output path.
//
// The intermediate TIFF is owned by a `TempPath` from the moment it is
// named. Whatever happens in either stage, it is gone when `scan` returns.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use scan2form_core::config::{ConverterKind, EngineSettings};
use scan2form_core::error::{BridgeError, Result};
use scan2form_core::types::{Device, ScanFormat};

use crate::engine::ScannerEngine;
use crate::runner::{CommandRunner, Invocation};
use crate::session::{EventSink, ScanSession};

pub const ENGINE_NAME: &str = "sane";

/// Acquisition format: the lossless raster every SANE backend supports.
const INTERMEDIATE_FORMAT: &str = "tiff";

/// Marker separating the device name from its model in `scanimage -L`.
const DEVICE_MARKER: &str = " is a ";

const ACQUIRE_PERCENT: u8 = 0;
const CONVERT_PERCENT: u8 = 80;

#[derive(Debug)]
pub struct SaneEngine {
    runner: Arc<dyn CommandRunner>,
    scanimage: String,
    converter: ConverterKind,
    converter_program: String,
    resolution_dpi: u32,
    color_mode: String,
    probe_timeout: Duration,
}

impl SaneEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: &EngineSettings, probe_timeout: Duration) -> Self {
        Self {
            runner,
            scanimage: settings.scanimage_program.clone(),
            converter: settings.converter,
            converter_program: settings.converter_program.clone(),
            resolution_dpi: settings.resolution_dpi,
            color_mode: settings.color_mode.clone(),
            probe_timeout,
        }
    }

    fn acquire_command(&self, device_id: Option<&str>) -> Invocation {
        let mut acquire = Invocation::new(&self.scanimage)
            .arg(format!("--format={INTERMEDIATE_FORMAT}"))
            .args(["--mode", self.color_mode.as_str()])
            .args(["--resolution".to_owned(), self.resolution_dpi.to_string()]);
        if let Some(device) = device_id {
            acquire = acquire.args(["-d", device]);
        }
        acquire
    }

    fn convert_command(&self, format: ScanFormat, input: &Path, output: &Path) -> Invocation {
        let input = input.to_string_lossy().into_owned();
        let output = output.to_string_lossy().into_owned();
        let format = format.converter_name();
        let convert = Invocation::new(&self.converter_program);
        match self.converter {
            ConverterKind::Sips => convert
                .args(["-s", "format", format])
                .arg(input)
                .args(["--out".to_owned(), output]),
            ConverterKind::ImageMagick => convert.arg(input).arg(format!("{format}:{output}")),
        }
    }
}

#[async_trait]
impl ScannerEngine for SaneEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn is_available(&self) -> bool {
        let probe = Invocation::new(&self.scanimage)
            .arg("--version")
            .timeout(self.probe_timeout);
        match self.runner.run(&probe).await {
            Ok(version) => {
                debug!(engine = ENGINE_NAME, version = version.trim(), "probe succeeded");
                true
            }
            Err(e) => {
                debug!(engine = ENGINE_NAME, error = %e, "probe failed");
                false
            }
        }
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let stdout = self
            .runner
            .run(&Invocation::new(&self.scanimage).arg("-L"))
            .await
            .map_err(|source| BridgeError::DeviceListFailed {
                engine: ENGINE_NAME,
                source,
            })?;
        Ok(parse_device_list(&stdout))
    }

    async fn scan(&self, session: &ScanSession, events: &EventSink) -> Result<()> {
        let intermediate = TempPath::try_from_path(session.intermediate_path(INTERMEDIATE_FORMAT))?;

        events.progress("Scanning", ACQUIRE_PERCENT).await;
        let acquire = self.acquire_command(session.device_id());
        // On failure `intermediate` drops here and takes the partial TIFF with it.
        self.runner
            .run_to_file(&acquire, &intermediate)
            .await
            .map_err(|source| BridgeError::ScanFailed {
                engine: ENGINE_NAME,
                source,
            })?;
        debug!(scan_id = %session.id(), path = %intermediate.display(), "acquired intermediate image");

        events.progress("Converting", CONVERT_PERCENT).await;
        let convert = self.convert_command(session.format(), &intermediate, session.output_path());
        let converted = self.runner.run(&convert).await;
        discard_intermediate(intermediate);

        converted.map_err(|source| BridgeError::ConversionFailed {
            engine: ENGINE_NAME,
            source,
        })?;

        info!(
            scan_id = %session.id(),
            format = %session.format(),
            path = %session.output_path().display(),
            "SANE scan converted"
        );
        Ok(())
    }
}

fn discard_intermediate(intermediate: TempPath) {
    let path = intermediate.to_path_buf();
    if let Err(e) = intermediate.close() {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to delete intermediate image");
        }
    }
}

/// Parse `scanimage -L` output.
///
/// Device lines look like
/// ``device `epson2:libusb:001:004' is a Epson PID 0x0838 flatbed scanner``.
/// The quoted name becomes the device id and the text after `is a` its
/// display name. Lines without the marker are not devices.
fn parse_device_list(stdout: &str) -> Vec<Device> {
    stdout
        .lines()
        .filter_map(|line| {
            let (head, model) = line.split_once(DEVICE_MARKER)?;
            let model = model.trim();
            if model.is_empty() {
                return None;
            }
            let head = head.trim();
            let id = head
                .strip_prefix("device")
                .unwrap_or(head)
                .trim()
                .trim_matches(|c| matches!(c, '`' | '\'' | '"' | '‘' | '’'));
            Some(Device {
                id: (!id.is_empty()).then(|| id.to_owned()),
                name: model.to_owned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use scan2form_core::error::CommandError;
    use scan2form_core::types::{ScanOptions, SessionId};

    use super::*;
    use crate::testing::{ScriptedRunner, failed};

    fn settings(converter: ConverterKind) -> EngineSettings {
        EngineSettings {
            converter,
            converter_program: converter.program().into(),
            ..EngineSettings::default()
        }
    }

    fn engine(runner: Arc<ScriptedRunner>, converter: ConverterKind) -> SaneEngine {
        SaneEngine::new(runner, &settings(converter), Duration::from_secs(5))
    }

    fn session(dir: &Path, format: ScanFormat, device_id: Option<&str>) -> ScanSession {
        ScanSession::new(
            SessionId::new(),
            ScanOptions {
                format,
                device_id: device_id.map(String::from),
            },
            dir,
        )
    }

    /// scanimage writes a TIFF; the converter writes whatever path it was given.
    fn scanner_and_converter(
        convert_result: fn(&Invocation) -> std::result::Result<String, CommandError>,
    ) -> ScriptedRunner {
        ScriptedRunner::new(move |inv, dest| {
            if let Some(dest) = dest {
                std::fs::write(dest, b"II*\0tiff").map_err(|source| CommandError::Output {
                    command: inv.program.clone(),
                    source,
                })?;
                return Ok(String::new());
            }
            convert_result(inv)
        })
    }

    fn sips_writes_output(inv: &Invocation) -> std::result::Result<String, CommandError> {
        let out = inv.arg_after("--out").expect("--out");
        std::fs::write(out, b"converted").expect("write output");
        Ok(String::new())
    }

    fn converter_fails(inv: &Invocation) -> std::result::Result<String, CommandError> {
        Err(failed(&inv.program, "sips: unsupported format"))
    }

    fn leftover_tiffs(dir: &Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "tiff"))
            .collect()
    }

    #[test]
    fn parses_scanimage_device_lines() {
        let stdout = "device `epson2:libusb:001:004' is a Epson PID 0x0838 flatbed scanner\n\
                      device `hpaio:/usb/Deskjet_3050?serial=CN1' is a Hewlett-Packard Deskjet_3050 all-in-one\n";
        let devices = parse_device_list(stdout);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id.as_deref(), Some("epson2:libusb:001:004"));
        assert_eq!(devices[0].name, "Epson PID 0x0838 flatbed scanner");
        assert_eq!(devices[1].id.as_deref(), Some("hpaio:/usb/Deskjet_3050?serial=CN1"));
    }

    #[test]
    fn lines_without_marker_are_discarded() {
        let stdout = "\nNo scanners were identified. If you were expecting something different,\n\
                      check that the scanner is plugged in.\n";
        assert!(parse_device_list(stdout).is_empty());
    }

    #[test]
    fn sips_receives_jpeg_spelling() {
        let runner = Arc::new(ScriptedRunner::nothing_installed());
        let engine = engine(runner, ConverterKind::Sips);
        let inv = engine.convert_command(ScanFormat::Jpeg, Path::new("/t/a.tiff"), Path::new("/t/a.jpg"));
        assert_eq!(inv.program, "sips");
        assert_eq!(inv.args, ["-s", "format", "jpeg", "/t/a.tiff", "--out", "/t/a.jpg"]);
    }

    #[test]
    fn imagemagick_gets_explicit_format_prefix() {
        let runner = Arc::new(ScriptedRunner::nothing_installed());
        let engine = engine(runner, ConverterKind::ImageMagick);
        let inv = engine.convert_command(ScanFormat::Pdf, Path::new("/t/a.tiff"), Path::new("/t/a.pdf"));
        assert_eq!(inv.program, "convert");
        assert_eq!(inv.args, ["/t/a.tiff", "pdf:/t/a.pdf"]);
    }

    #[test]
    fn acquire_uses_fixed_settings_and_separate_device_arg() {
        let runner = Arc::new(ScriptedRunner::nothing_installed());
        let engine = engine(runner, ConverterKind::Sips);
        let inv = engine.acquire_command(Some("epson2:libusb:001:004"));
        assert_eq!(
            inv.args,
            [
                "--format=tiff",
                "--mode",
                "Color",
                "--resolution",
                "300",
                "-d",
                "epson2:libusb:001:004"
            ]
        );
        assert!(!engine.acquire_command(None).has_arg("-d"));
    }

    #[tokio::test]
    async fn successful_scan_removes_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(scanner_and_converter(sips_writes_output));
        let session = session(dir.path(), ScanFormat::Jpeg, None);
        let (sink, mut rx) = EventSink::channel(session.id(), 8);

        engine(runner.clone(), ConverterKind::Sips)
            .scan(&session, &sink)
            .await
            .unwrap();
        drop(sink);

        assert!(session.output_path().exists());
        assert!(leftover_tiffs(dir.path()).is_empty());

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].has_arg("--format=tiff"));
        assert_eq!(calls[1].arg_after("format"), Some("jpeg"));

        let mut percents = Vec::new();
        while let Some(event) = rx.recv().await {
            if let scan2form_core::types::ScanEvent::Progress { percent, .. } = event {
                percents.push(percent);
            }
        }
        assert_eq!(percents, [0, 80]);
    }

    #[tokio::test]
    async fn failed_conversion_removes_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(scanner_and_converter(converter_fails));
        let session = session(dir.path(), ScanFormat::Png, None);

        let err = engine(runner, ConverterKind::Sips)
            .scan(&session, &EventSink::disabled(session.id()))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CONVERSION_FAILED");
        assert_eq!(err.detail(), Some("sips: unsupported format"));
        assert!(leftover_tiffs(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn failed_acquire_skips_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|inv, _| {
            Err(failed(&inv.program, "scanimage: no SANE devices found"))
        }));
        let session = session(dir.path(), ScanFormat::Pdf, None);

        let err = engine(runner.clone(), ConverterKind::Sips)
            .scan(&session, &EventSink::disabled(session.id()))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "SCAN_FAILED");
        assert_eq!(runner.call_count(), 1);
        assert!(leftover_tiffs(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn probe_uses_version_flag() {
        let runner = Arc::new(ScriptedRunner::new(|_, _| Ok("scanimage (sane-backends) 1.2.1".into())));
        assert!(engine(runner.clone(), ConverterKind::Sips).is_available().await);
        assert_eq!(runner.calls()[0].args, ["--version"]);
    }
}
