// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan2Form — Scanner engines, supervised process execution, and the scan
// service shared by the HTTP and WebSocket transports.

pub mod engine;
pub mod naps2;
pub mod runner;
pub mod sane;
pub mod selector;
pub mod service;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::ScannerEngine;
pub use runner::{CommandRunner, Invocation, ProcessRunner};
pub use selector::EngineSelector;
pub use service::ScanService;
pub use session::{EventSink, ScanHandle, ScanOutput, ScanSession};
