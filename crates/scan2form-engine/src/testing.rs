// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted command runner for tests.
//
// Records every invocation and answers it from a closure, so engines and
// the service can be exercised without NAPS2 or SANE installed. The script
// may write files (e.g. the path after `-o`) to simulate a scanner.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use scan2form_core::error::CommandError;

use crate::runner::{CommandRunner, Invocation};

type Script = dyn Fn(&Invocation, Option<&Path>) -> Result<String, CommandError> + Send + Sync;

/// `CommandRunner` whose behaviour is supplied by the test.
pub struct ScriptedRunner {
    calls: Mutex<Vec<Invocation>>,
    script: Box<Script>,
}

impl ScriptedRunner {
    /// The script receives the invocation and, for `run_to_file`, the
    /// destination (already created empty, like the real runner does).
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&Invocation, Option<&Path>) -> Result<String, CommandError> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Box::new(script),
        }
    }

    /// A runner where every command fails to spawn.
    pub fn nothing_installed() -> Self {
        Self::new(|inv, _| {
            Err(CommandError::Spawn {
                command: inv.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        })
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Invocations whose argument list contains `arg`.
    pub fn calls_with(&self, arg: &str) -> Vec<Invocation> {
        self.calls().into_iter().filter(|c| c.has_arg(arg)).collect()
    }

    fn record(&self, invocation: &Invocation) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());
    }
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<String, CommandError> {
        self.record(invocation);
        (self.script)(invocation, None)
    }

    async fn run_to_file(
        &self,
        invocation: &Invocation,
        destination: &Path,
    ) -> Result<(), CommandError> {
        self.record(invocation);
        std::fs::File::create(destination).map_err(|source| CommandError::Output {
            command: invocation.program.clone(),
            source,
        })?;
        (self.script)(invocation, Some(destination)).map(|_| ())
    }
}

/// Shorthand for a non-zero exit with the given stderr.
pub fn failed(program: &str, stderr: &str) -> CommandError {
    CommandError::Failed {
        command: program.to_owned(),
        status: Some(1),
        stderr: stderr.to_owned(),
    }
}
