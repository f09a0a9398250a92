// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan2Form — HTTP and WebSocket transports over the scan service, and the
// bridge server lifecycle.

pub mod routes;
pub mod server;
pub mod ws;

pub use routes::router;
pub use server::BridgeServer;
