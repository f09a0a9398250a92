// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scan2Form bridge.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// Longest device identifier accepted from a caller.
const MAX_DEVICE_ID_LEN: usize = 256;

/// Unique identifier for one scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scanner reported by an engine's device listing. Display-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Backend identifier that can be passed back as `deviceId`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human-readable name.
    pub name: String,
}

impl Device {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

/// Output formats a caller can request.
///
/// `jpg` and `jpeg` are two spellings of the same format; both parse to
/// [`ScanFormat::Jpeg`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanFormat {
    #[default]
    Pdf,
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
}

impl ScanFormat {
    /// Canonical file extension (without the dot).
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    /// MIME type sent back to the browser.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    /// Format name understood by image-conversion tools (`sips`, ImageMagick).
    pub fn converter_name(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }
}

impl FromStr for ScanFormat {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            _ => Err(BridgeError::InvalidFormat {
                requested: s.to_owned(),
                supported: "pdf, jpg, jpeg, png".into(),
            }),
        }
    }
}

impl std::fmt::Display for ScanFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.converter_name())
    }
}

/// Validated input to a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub format: ScanFormat,
    pub device_id: Option<String>,
}

/// A scan request as it arrives from a transport, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl ScanRequest {
    pub fn with_format(format: impl Into<String>) -> Self {
        Self {
            format: Some(format.into()),
            device_id: None,
        }
    }

    /// Check the request against the operator's allowed format spellings.
    ///
    /// A missing format means `pdf`. Nothing here touches an external
    /// process, so a rejected request never reaches an engine.
    pub fn validate(&self, allowed_formats: &[String]) -> Result<ScanOptions> {
        let requested = self
            .format
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or("pdf")
            .to_ascii_lowercase();

        if !allowed_formats.iter().any(|a| a.eq_ignore_ascii_case(&requested)) {
            return Err(BridgeError::InvalidFormat {
                requested,
                supported: allowed_formats.join(", "),
            });
        }

        let format = requested.parse::<ScanFormat>()?;
        let device_id = match self.device_id.as_deref() {
            None => None,
            Some(id) => Some(validate_device_id(id)?),
        };

        Ok(ScanOptions { format, device_id })
    }
}

/// Device identifiers end up as a standalone argv element, never in a shell
/// string, but an identifier that looks like a flag would still be parsed
/// as one by the scanner tool.
fn validate_device_id(id: &str) -> Result<String> {
    let id = id.trim();
    let reason = if id.is_empty() {
        Some("device identifier is empty")
    } else if id.len() > MAX_DEVICE_ID_LEN {
        Some("device identifier is too long")
    } else if id.starts_with('-') {
        Some("device identifier must not start with '-'")
    } else if id.chars().any(char::is_control) {
        Some("device identifier contains control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(BridgeError::InvalidDevice(reason.into())),
        None => Ok(id.to_owned()),
    }
}

/// Events emitted over the lifetime of one streaming scan session.
///
/// A session emits zero or more `Progress`/`Page` events followed by exactly
/// one `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ScanEvent {
    Progress {
        scan_id: SessionId,
        message: String,
        percent: u8,
    },
    Page {
        scan_id: SessionId,
        page: u32,
    },
    Complete {
        scan_id: SessionId,
        path: PathBuf,
    },
    Error {
        scan_id: SessionId,
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ScanEvent {
    pub fn scan_id(&self) -> SessionId {
        match self {
            Self::Progress { scan_id, .. }
            | Self::Page { scan_id, .. }
            | Self::Complete { scan_id, .. }
            | Self::Error { scan_id, .. } => *scan_id,
        }
    }

    /// Whether this event ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Build the terminal error event for a failed session.
    pub fn from_error(scan_id: SessionId, err: &BridgeError) -> Self {
        Self::Error {
            scan_id,
            code: err.code().to_owned(),
            message: err.to_string(),
            detail: err.detail().map(str::to_owned),
        }
    }
}

/// Lifecycle of the bridge's HTTP/WebSocket server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}
