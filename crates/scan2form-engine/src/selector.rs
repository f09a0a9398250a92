// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine selection, memoized for the life of the process.
//
// Candidates are probed in priority order (NAPS2, then SANE) the first time
// an engine is needed. The outcome, including "nothing available", is
// stored once and never re-probed: installing a scanner tool while the
// bridge runs requires a restart.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use scan2form_core::config::BridgeConfig;
use scan2form_core::error::{BridgeError, Result};

use crate::engine::ScannerEngine;
use crate::naps2::Naps2Engine;
use crate::runner::CommandRunner;
use crate::sane::SaneEngine;

#[derive(Debug)]
pub struct EngineSelector {
    candidates: Vec<Arc<dyn ScannerEngine>>,
    active: OnceCell<Option<Arc<dyn ScannerEngine>>>,
}

impl EngineSelector {
    /// Selector over `candidates`, highest priority first.
    pub fn new(candidates: Vec<Arc<dyn ScannerEngine>>) -> Self {
        Self {
            candidates,
            active: OnceCell::new(),
        }
    }

    /// NAPS2 before SANE, both driven through `runner`.
    pub fn with_default_engines(runner: Arc<dyn CommandRunner>, config: &BridgeConfig) -> Self {
        let probe_timeout = config.probe_timeout();
        let naps2 = Naps2Engine::new(
            Arc::clone(&runner),
            config.engines.naps2_program.clone(),
            probe_timeout,
        );
        let sane = SaneEngine::new(runner, &config.engines, probe_timeout);
        Self::new(vec![Arc::new(naps2), Arc::new(sane)])
    }

    /// The active engine, probing on first use.
    ///
    /// Concurrent first callers share a single probe.
    pub async fn select(&self) -> Result<Arc<dyn ScannerEngine>> {
        self.active
            .get_or_init(|| self.probe())
            .await
            .clone()
            .ok_or(BridgeError::NoEngineAvailable)
    }

    /// The memoized engine, without probing.
    pub fn active(&self) -> Option<Arc<dyn ScannerEngine>> {
        self.active.get().cloned().flatten()
    }

    /// Whether selection has already run (successfully or not).
    pub fn is_resolved(&self) -> bool {
        self.active.initialized()
    }

    async fn probe(&self) -> Option<Arc<dyn ScannerEngine>> {
        for engine in &self.candidates {
            if engine.is_available().await {
                info!(engine = engine.name(), "scanner engine selected");
                return Some(Arc::clone(engine));
            }
        }
        warn!(
            candidates = self.candidates.len(),
            "no scanner engine available; install NAPS2 or SANE and restart"
        );
        None
    }
}
