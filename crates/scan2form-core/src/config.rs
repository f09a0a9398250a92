// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Image-conversion tool used by the two-stage SANE engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterKind {
    /// macOS `sips`.
    Sips,
    /// ImageMagick `convert`.
    ImageMagick,
}

impl ConverterKind {
    /// Default program name for this converter.
    pub fn program(&self) -> &'static str {
        match self {
            Self::Sips => "sips",
            Self::ImageMagick => "convert",
        }
    }

    fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::Sips
        } else {
            Self::ImageMagick
        }
    }
}

impl FromStr for ConverterKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sips" => Ok(Self::Sips),
            "imagemagick" | "magick" | "convert" => Ok(Self::ImageMagick),
            other => Err(BridgeError::Config(format!(
                "unknown image converter `{other}` (expected sips or imagemagick)"
            ))),
        }
    }
}

/// Programs and fixed acquisition settings for the scanner engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// NAPS2 console driver executable.
    pub naps2_program: String,
    /// SANE command-line front end.
    pub scanimage_program: String,
    /// Which converter turns the intermediate TIFF into the requested format.
    pub converter: ConverterKind,
    /// Converter executable (defaults to the converter's usual name).
    pub converter_program: String,
    /// Acquisition resolution for SANE, in DPI.
    pub resolution_dpi: u32,
    /// SANE colour mode.
    pub color_mode: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let converter = ConverterKind::platform_default();
        Self {
            naps2_program: "naps2.console".into(),
            scanimage_program: "scanimage".into(),
            converter,
            converter_program: converter.program().into(),
            resolution_dpi: 300,
            color_mode: "Color".into(),
        }
    }
}

/// Settings consumed by the bridge at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Host name or IP literal the HTTP/WebSocket server binds to.
    /// Localhost only by default.
    pub host: String,
    /// Port for the HTTP/WebSocket server (default 3000).
    pub port: u16,
    /// Directory for per-session output and intermediate files.
    pub temp_dir: PathBuf,
    /// Wall-clock limit for scan, list and convert commands.
    pub scan_timeout_ms: u64,
    /// Wall-clock limit for engine availability probes.
    pub probe_timeout_ms: u64,
    /// Format spellings a caller may request.
    pub allowed_formats: Vec<String>,
    pub engines: EngineSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            temp_dir: std::env::temp_dir().join("scan2form"),
            scan_timeout_ms: 60_000,
            probe_timeout_ms: 5_000,
            allowed_formats: ["pdf", "jpg", "jpeg", "png"]
                .into_iter()
                .map(String::from)
                .collect(),
            engines: EngineSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup, starting from
    /// the defaults. Unset or empty keys keep their default value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get("HOST") {
            config.host = host.trim().to_owned();
        }
        if let Some(port) = get("PORT") {
            config.port = parse_value("PORT", &port)?;
        }
        if let Some(dir) = get("TEMP_DIR") {
            config.temp_dir = PathBuf::from(dir);
        }
        if let Some(ms) = get("SCAN_TIMEOUT_MS") {
            config.scan_timeout_ms = parse_value("SCAN_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = get("PROBE_TIMEOUT_MS") {
            config.probe_timeout_ms = parse_value("PROBE_TIMEOUT_MS", &ms)?;
        }
        if let Some(program) = get("NAPS2_CONSOLE") {
            config.engines.naps2_program = program;
        }
        if let Some(program) = get("SCANIMAGE") {
            config.engines.scanimage_program = program;
        }
        if let Some(kind) = get("IMAGE_CONVERTER") {
            let converter: ConverterKind = kind.parse()?;
            config.engines.converter = converter;
            config.engines.converter_program = converter.program().into();
        }

        if config.scan_timeout_ms == 0 || config.probe_timeout_ms == 0 {
            return Err(BridgeError::Config("timeouts must be greater than zero".into()));
        }

        Ok(config)
    }

    /// Host and port to bind. The host may be a name (`localhost`) and is
    /// resolved at bind time.
    pub fn bind_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| BridgeError::Config(format!("{key}={raw:?}: {e}")))
}
