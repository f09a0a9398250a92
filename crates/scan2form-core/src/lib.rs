// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan2Form — Core types, error taxonomy, and configuration shared by the
// scan engine and the bridge server.

pub mod config;
pub mod error;
pub mod human_errors;
pub mod types;

pub use config::BridgeConfig;
pub use error::{BridgeError, CommandError};
pub use types::*;
