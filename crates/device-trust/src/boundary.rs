// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Call boundary: the overall time bound around one pass and JSON
//! marshalling for foreign callers.

use crate::engine::TrustEngine;
use crate::report::TrustReport;
use log::warn;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum BoundaryError {
    /// No partial report is returned.
    #[error("device trust collection exceeded {bound_ms} ms")]
    Timeout { bound_ms: u64 },

    #[error("failed to start boundary runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("collection task failed: {0}")]
    Join(String),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct CallBoundary {
    engine: Arc<TrustEngine>,
    bound: Duration,
}

impl CallBoundary {
    /// Uses the engine's configured overall timeout.
    pub fn new(engine: TrustEngine) -> Self {
        let bound = engine.config().overall_timeout;
        Self {
            engine: Arc::new(engine),
            bound,
        }
    }

    pub fn with_timeout(mut self, bound: Duration) -> Self {
        self.bound = bound;
        self
    }

    pub fn engine(&self) -> &TrustEngine {
        &self.engine
    }

    /// Runs `collect()` on a blocking task. When the bound elapses the task is
    /// abandoned and the caller gets [`BoundaryError::Timeout`].
    pub fn invoke(&self) -> Result<TrustReport, BoundaryError> {
        if Handle::try_current().is_ok() {
            return std::thread::scope(|scope| {
                scope
                    .spawn(|| self.invoke_on_fresh_runtime())
                    .join()
                    .unwrap_or_else(|_| Err(BoundaryError::Join("boundary thread panicked".to_string())))
            });
        }
        self.invoke_on_fresh_runtime()
    }

    fn invoke_on_fresh_runtime(&self) -> Result<TrustReport, BoundaryError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(BoundaryError::Runtime)?;

        let engine = Arc::clone(&self.engine);
        let bound = self.bound;
        let result = runtime.block_on(async move {
            timeout(bound, tokio::task::spawn_blocking(move || engine.collect())).await
        });
        // Do not wait for an abandoned pass.
        runtime.shutdown_background();

        match result {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(join)) => Err(BoundaryError::Join(join.to_string())),
            Err(_) => {
                let bound_ms = bound.as_millis() as u64;
                warn!("collection abandoned after {} ms", bound_ms);
                Err(BoundaryError::Timeout { bound_ms })
            }
        }
    }

    pub fn invoke_json(&self) -> Result<String, BoundaryError> {
        let report = self.invoke()?;
        Ok(report.to_json()?)
    }
}
