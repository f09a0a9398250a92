// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan2Form bridge — entry point.
//
// Initialises logging, loads configuration from the environment, and runs
// the bridge server until Ctrl-C.

use std::process::ExitCode;
use std::sync::Arc;

use scan2form_core::config::BridgeConfig;
use scan2form_core::error::Result;
use scan2form_engine::ScanService;
use scan2form_server::BridgeServer;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "scan bridge exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = BridgeConfig::from_env()?;
    tracing::info!(
        temp_dir = %config.temp_dir.display(),
        scan_timeout_ms = config.scan_timeout_ms,
        converter = config.engines.converter.program(),
        "Scan2Form bridge starting"
    );

    let service = Arc::new(ScanService::new(config));
    let mut server = BridgeServer::new(service);
    let addr = server.start().await?;
    tracing::info!("Scan2Form bridge ready at http://{addr}");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    server.stop().await
}
