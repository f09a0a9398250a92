// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge server lifecycle.
//
// Binds the configured address (localhost by default), serves the router
// on a background task, and shuts down gracefully on `stop`.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use scan2form_core::error::{BridgeError, Result};
use scan2form_core::types::ServerStatus;
use scan2form_engine::ScanService;

use crate::routes::router;

pub struct BridgeServer {
    service: Arc<ScanService>,
    /// Current lifecycle state of the server.
    status: ServerStatus,
    /// Address actually bound, once started.
    local_addr: Option<SocketAddr>,
    /// Notification handle used to signal a graceful shutdown.
    shutdown_signal: Arc<Notify>,
    /// Handle to the Tokio task running the serve loop.
    task_handle: Option<JoinHandle<()>>,
}

impl BridgeServer {
    /// Create a server in `Stopped` state. The bind address and temp
    /// directory come from the service's configuration.
    pub fn new(service: Arc<ScanService>) -> Self {
        Self {
            service,
            status: ServerStatus::Stopped,
            local_addr: None,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// The bound address while running. With port 0 this is where the OS
    /// put us.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Create the temp directory, bind, and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp directory cannot be created or the
    /// address is already in use.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let (ServerStatus::Running, Some(addr)) = (self.status, self.local_addr) {
            debug!(%addr, "bridge server already running");
            return Ok(addr);
        }

        self.status = ServerStatus::Starting;
        let (listener, addr) = match self.bind().await {
            Ok(bound) => bound,
            Err(e) => {
                self.status = ServerStatus::Error;
                error!(error = %e, "bridge server failed to start");
                return Err(e);
            }
        };

        let app = router(Arc::clone(&self.service));
        let shutdown = Arc::clone(&self.shutdown_signal);
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.notified().await });
            if let Err(e) = serve.await {
                error!(error = %e, "bridge server terminated");
            }
        });

        info!(%addr, "scan bridge listening");
        self.local_addr = Some(addr);
        self.task_handle = Some(handle);
        self.status = ServerStatus::Running;
        Ok(addr)
    }

    async fn bind(&self) -> Result<(TcpListener, SocketAddr)> {
        let config = self.service.config();
        tokio::fs::create_dir_all(&config.temp_dir).await?;

        let (host, port) = config.bind_addr();
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            BridgeError::Io(std::io::Error::new(e.kind(), format!("bind {host}:{port}: {e}")))
        })?;
        let addr = listener.local_addr()?;
        Ok((listener, addr))
    }

    /// Gracefully stop the server and wait for the serve loop to exit.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!(addr = ?self.local_addr, "stopping scan bridge");
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| BridgeError::Io(std::io::Error::other(format!("server task join: {e}"))))?;
        }

        self.status = ServerStatus::Stopped;
        self.local_addr = None;
        info!("scan bridge stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use scan2form_core::config::BridgeConfig;
    use scan2form_engine::testing::ScriptedRunner;

    use super::*;

    fn server(dir: &std::path::Path) -> BridgeServer {
        let config = BridgeConfig {
            host: "127.0.0.1".into(),
            port: 0,
            temp_dir: dir.join("scans"),
            ..BridgeConfig::default()
        };
        let runner = Arc::new(ScriptedRunner::nothing_installed());
        BridgeServer::new(Arc::new(ScanService::with_runner(config, runner)))
    }

    #[tokio::test]
    async fn start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = server(dir.path());
        assert_eq!(server.status(), ServerStatus::Stopped);

        let addr = server.start().await.unwrap();
        assert_eq!(server.status(), ServerStatus::Running);
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        assert!(dir.path().join("scans").is_dir());

        // Starting twice is a no-op.
        assert_eq!(server.start().await.unwrap(), addr);

        server.stop().await.unwrap();
        assert_eq!(server.status(), ServerStatus::Stopped);
        assert!(server.local_addr().is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn bind_conflict_sets_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = server(dir.path());
        let addr = first.start().await.unwrap();

        let config = BridgeConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            temp_dir: dir.path().join("scans"),
            ..BridgeConfig::default()
        };
        let runner = Arc::new(ScriptedRunner::nothing_installed());
        let mut second = BridgeServer::new(Arc::new(ScanService::with_runner(config, runner)));

        assert!(second.start().await.is_err());
        assert_eq!(second.status(), ServerStatus::Error);
        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn binds_to_a_host_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            host: "localhost".into(),
            port: 0,
            temp_dir: dir.path().join("scans"),
            ..BridgeConfig::default()
        };
        let runner = Arc::new(ScriptedRunner::nothing_installed());
        let mut server = BridgeServer::new(Arc::new(ScanService::with_runner(config, runner)));

        let addr = server.start().await.unwrap();
        assert!(addr.ip().is_loopback());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_when_stopped_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = server(dir.path());
        server.stop().await.unwrap();
        assert_eq!(server.status(), ServerStatus::Stopped);
    }
}
