// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the person sitting at the browser.
//
// The bridge usually runs unattended next to a web form; when a scan fails
// the page shows this text instead of a raw stderr dump.

use crate::error::{BridgeError, CommandError};

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether trying the same scan again might work.
    pub retriable: bool,
}

/// Convert a `BridgeError` into a `HumanError`.
pub fn humanize_error(err: &BridgeError) -> HumanError {
    match err {
        BridgeError::InvalidFormat { supported, .. } => HumanError {
            message: "That file type can't be produced by the scanner.".into(),
            suggestion: format!("Choose one of: {supported}."),
            retriable: false,
        },

        BridgeError::InvalidDevice(_) => HumanError {
            message: "The selected scanner name isn't valid.".into(),
            suggestion: "Pick a scanner from the device list, or leave it empty to use the default.".into(),
            retriable: false,
        },

        BridgeError::NoEngineAvailable => HumanError {
            message: "No scanning software was found on this computer.".into(),
            suggestion: "Install NAPS2 (Windows) or SANE (Linux/macOS), then restart the scan bridge.".into(),
            retriable: false,
        },

        BridgeError::DeviceListFailed { source, .. } => HumanError {
            message: "We couldn't get the list of scanners.".into(),
            suggestion: command_suggestion(source),
            retriable: true,
        },

        BridgeError::ScanFailed { source, .. } => HumanError {
            message: "The scan didn't work.".into(),
            suggestion: command_suggestion(source),
            retriable: true,
        },

        BridgeError::ConversionFailed { .. } => HumanError {
            message: "The scan worked but the file couldn't be converted.".into(),
            suggestion: "Try again with PDF, or check that the image conversion tool is installed.".into(),
            retriable: true,
        },

        BridgeError::ScanOutputMissing { .. } => HumanError {
            message: "The scanner finished without producing a file.".into(),
            suggestion: "The scan may have been cancelled on the scanner. Put the page back and try again.".into(),
            retriable: true,
        },

        BridgeError::Io(_) => HumanError {
            message: "The scan bridge couldn't read or write its working files.".into(),
            suggestion: "Check that the bridge's temporary folder exists and has free space.".into(),
            retriable: true,
        },

        BridgeError::Config(detail) => HumanError {
            message: "The scan bridge is misconfigured.".into(),
            suggestion: format!("Fix the bridge settings and restart it. ({detail})"),
            retriable: false,
        },
    }
}

/// Suggestion text that depends on how the underlying command failed.
fn command_suggestion(source: &CommandError) -> String {
    match source {
        CommandError::Timeout { .. } => {
            "The scanner took too long. Make sure it is switched on, has paper loaded, and isn't busy with another scan.".into()
        }
        CommandError::Spawn { command, .. } => {
            format!("The scanning program `{command}` could not be started. Reinstall it and restart the scan bridge.")
        }
        CommandError::Output { .. } => {
            "The scan couldn't be saved. Check the bridge's temporary folder has free space.".into()
        }
        CommandError::Failed { stderr, .. } => {
            let lower = stderr.to_ascii_lowercase();
            if lower.contains("busy") || lower.contains("in use") {
                "The scanner is busy. Wait for the other scan to finish, then try again.".into()
            } else if lower.contains("no scanners") || lower.contains("no sane devices") || lower.contains("not found") {
                "No scanner is connected. Check the cable or network connection and that the scanner is on.".into()
            } else if lower.contains("cancel") {
                "The scan was cancelled. Try again when ready.".into()
            } else {
                "Make sure the scanner is switched on and connected, then try again.".into()
            }
        }
    }
}
