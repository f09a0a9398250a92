// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scan2Form.
//
// Two layers: `CommandError` describes what happened to one external
// process, `BridgeError` is what crosses the engine boundary. Engine-level
// variants always wrap the command failure that caused them.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single external command run by the process runner.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {}ms", timeout.as_millis())]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` failed: {stderr}")]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` output could not be written: {source}")]
    Output {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    /// Captured standard error of a command that exited non-zero.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Failed { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }

    /// Name of the program this failure belongs to.
    pub fn command(&self) -> &str {
        match self {
            Self::Spawn { command, .. }
            | Self::Timeout { command, .. }
            | Self::Failed { command, .. }
            | Self::Output { command, .. } => command,
        }
    }
}

/// Top-level error type for all Scan2Form operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    // -- Client input --
    #[error("invalid format `{requested}`; supported: {supported}")]
    InvalidFormat { requested: String, supported: String },

    #[error("invalid device: {0}")]
    InvalidDevice(String),

    // -- Environment --
    #[error("no supported scanner software found (NAPS2 or SANE)")]
    NoEngineAvailable,

    // -- Engine --
    #[error("{engine}: failed to list devices")]
    DeviceListFailed {
        engine: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("{engine}: scan failed")]
    ScanFailed {
        engine: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("{engine}: conversion failed")]
    ConversionFailed {
        engine: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("scan finished but output file is missing: {}", path.display())]
    ScanOutputMissing { path: PathBuf },

    // -- Ambient --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Stable machine-readable code, sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat { .. } => "INVALID_FORMAT",
            Self::InvalidDevice(_) => "INVALID_DEVICE",
            Self::NoEngineAvailable => "NO_ENGINE",
            Self::DeviceListFailed { .. } => "DEVICE_LIST_FAILED",
            Self::ScanFailed { .. } => "SCAN_FAILED",
            Self::ConversionFailed { .. } => "CONVERSION_FAILED",
            Self::ScanOutputMissing { .. } => "FILE_MISSING",
            Self::Io(_) => "IO_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// HTTP status the transport should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidFormat { .. } | Self::InvalidDevice(_) => 400,
            Self::NoEngineAvailable => 503,
            _ => 500,
        }
    }

    /// Whether the caller sent something unacceptable.
    pub fn is_client_error(&self) -> bool {
        self.http_status() == 400
    }

    /// The underlying command failure, if this error wraps one.
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            Self::DeviceListFailed { source, .. }
            | Self::ScanFailed { source, .. }
            | Self::ConversionFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Diagnostic detail for operators: the captured stderr when there is
    /// one, otherwise the lower-level cause.
    pub fn detail(&self) -> Option<&str> {
        let source = self.command_error()?;
        Some(source.stderr().unwrap_or(match source {
            CommandError::Timeout { .. } => "command timed out",
            CommandError::Spawn { .. } => "command could not be started",
            CommandError::Output { .. } => "command output could not be written",
            CommandError::Failed { .. } => "command failed without output",
        }))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BridgeError>;
