// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! The externally visible report and the normalizer that builds it.

use crate::aggregate::{Aggregator, Decisions, Thresholds};
use crate::config::{Capabilities, EngineConfig};
use crate::probes::{ProbeOutcome, ProbeRun};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Diagnostic detail bag: stable keys, JSON values.
pub type Details = Map<String, Value>;

/// One assessment. Never mutated once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustReport {
    integrity_compromised: bool,
    virtualized: bool,
    instrumentation_suspected: bool,
    debugger_attached: bool,
    developer_mode_enabled: bool,
    usb_debugging_enabled: bool,
    details: Details,
}

impl TrustReport {
    pub fn integrity_compromised(&self) -> bool {
        self.integrity_compromised
    }

    pub fn virtualized(&self) -> bool {
        self.virtualized
    }

    pub fn instrumentation_suspected(&self) -> bool {
        self.instrumentation_suspected
    }

    pub fn debugger_attached(&self) -> bool {
        self.debugger_attached
    }

    pub fn developer_mode_enabled(&self) -> bool {
        self.developer_mode_enabled
    }

    pub fn usb_debugging_enabled(&self) -> bool {
        self.usb_debugging_enabled
    }

    pub fn details(&self) -> &Details {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

/// Builds a [`TrustReport`] from the probe runs of one pass.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    capabilities: &'a Capabilities,
    aggregator: Aggregator,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &EngineConfig, capabilities: &'a Capabilities) -> Self {
        Self {
            capabilities,
            aggregator: Aggregator::new(Thresholds::from(config)),
        }
    }

    pub fn normalize(&self, runs: &[ProbeRun]) -> TrustReport {
        let mut details = Details::new();
        let mut native_skipped = false;

        for run in runs {
            match &run.outcome {
                ProbeOutcome::Completed(observation) => {
                    for (key, value) in observation.facts() {
                        details.insert((*key).to_string(), value.clone());
                    }
                }
                // First failure per family wins.
                ProbeOutcome::Failed(err) => {
                    details
                        .entry(run.family.error_key())
                        .or_insert_with(|| Value::from(err.to_string()));
                }
                ProbeOutcome::Skipped => native_skipped = true,
            }
        }

        if native_skipped {
            let reason = self
                .capabilities
                .native_unavailable_reason
                .clone()
                .unwrap_or_else(|| "native scanning unavailable".to_string());
            details.insert("nativeUnavailable".to_string(), Value::from(reason));
        }

        let signals = runs
            .iter()
            .filter_map(ProbeRun::observation)
            .flat_map(|observation| observation.signals());
        let mut decisions = self
            .aggregator
            .decide(signals, self.capabilities.environment);
        let suppressed = decisions.suppress_under_virtualization();
        if !suppressed.is_empty() {
            debug!("suppressed on virtualized host: {:?}", suppressed);
        }
        decisions.record_details(&mut details);

        record_timings(runs, &mut details);
        build(&decisions, details)
    }
}

/// Native and overall latency. Nothing is recorded for an empty pass.
fn record_timings(runs: &[ProbeRun], details: &mut Details) {
    if runs.is_empty() {
        return;
    }
    let total: Duration = runs.iter().map(|run| run.elapsed).sum();
    details.insert("totalTimeMs".to_string(), Value::from(millis(total)));

    let native: Vec<&ProbeRun> = runs
        .iter()
        .filter(|run| run.native && !matches!(run.outcome, ProbeOutcome::Skipped))
        .collect();
    if !native.is_empty() {
        let native_total: Duration = native.iter().map(|run| run.elapsed).sum();
        details.insert("nativeTimeMs".to_string(), Value::from(millis(native_total)));
    }
}

fn build(decisions: &Decisions, details: Details) -> TrustReport {
    TrustReport {
        integrity_compromised: decisions.integrity.positive,
        virtualized: decisions.virtualization.positive,
        instrumentation_suspected: decisions.instrumentation.positive,
        debugger_attached: decisions.debugger.positive,
        developer_mode_enabled: decisions.developer_mode,
        usb_debugging_enabled: decisions.usb_debugging,
        details,
    }
}
