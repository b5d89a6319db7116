// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Signal aggregation.
//!
//! Turns raw signals into one decision per category. The rules only look at
//! categories, strengths and families, never at which environment or probe
//! produced a signal.

use crate::config::{EngineConfig, Environment};
use crate::report::Details;
use crate::signal::{names, ProbeFamily, RawSignal, SignalCategory};
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Classification thresholds, taken from [`EngineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub integrity: usize,
    pub virtualization_weak: usize,
    pub instrumentation_families: usize,
    pub strong_instrumentation_override: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for Thresholds {
    fn from(config: &EngineConfig) -> Self {
        Self {
            integrity: config.integrity_threshold,
            virtualization_weak: config.virtualization_weak_threshold,
            instrumentation_families: config.instrumentation_family_threshold,
            strong_instrumentation_override: config.strong_instrumentation_override,
        }
    }
}

/// Outcome for one category plus what backed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryDecision {
    pub positive: bool,
    pub strong_count: usize,
    pub weak_count: usize,
    /// Independent families among the positive signals (instrumentation only).
    pub families: Vec<ProbeFamily>,
    /// Weak signals after merging those that describe the same identifier.
    pub weak_indicators: usize,
    pub evidence: Vec<String>,
}

impl CategoryDecision {
    fn from_signals(signals: &[&RawSignal]) -> Self {
        let strong_count = signals.iter().filter(|signal| signal.is_strong()).count();
        Self {
            positive: false,
            strong_count,
            weak_count: signals.len() - strong_count,
            families: Vec::new(),
            weak_indicators: distinct_weak(signals),
            evidence: signals.iter().flat_map(|signal| signal.describe()).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.strong_count + self.weak_count
    }

    pub fn fired(&self) -> bool {
        self.count() > 0
    }

    pub fn has_strong(&self) -> bool {
        self.strong_count > 0
    }
}

/// Untagged weak signals count one each; tagged ones once per subject.
fn distinct_weak(signals: &[&RawSignal]) -> usize {
    let mut seen = BTreeSet::new();
    signals
        .iter()
        .filter(|signal| !signal.is_strong())
        .filter(|signal| signal.subject().map_or(true, |subject| seen.insert(subject)))
        .count()
}

/// Every category decision of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decisions {
    pub integrity: CategoryDecision,
    pub virtualization: CategoryDecision,
    pub instrumentation: CategoryDecision,
    pub debugger: CategoryDecision,
    pub auxiliary: CategoryDecision,
    pub developer_mode: bool,
    pub usb_debugging: bool,
    pub suppressed: Vec<SignalCategory>,
}

impl Decisions {
    /// On a virtualized host, integrity and instrumentation decisions that
    /// rest only on weak signals are dropped. Returns the suppressed categories.
    pub fn suppress_under_virtualization(&mut self) -> &[SignalCategory] {
        if !self.virtualization.positive {
            return &self.suppressed;
        }
        if self.instrumentation.positive && !self.instrumentation.has_strong() {
            self.instrumentation.positive = false;
            self.suppressed.push(SignalCategory::Instrumentation);
        }
        if self.integrity.positive && !self.integrity.has_strong() {
            self.integrity.positive = false;
            self.suppressed.push(SignalCategory::Integrity);
        }
        &self.suppressed
    }

    /// Writes one entry per category that had any signal, plus the
    /// suppression list when something was suppressed.
    pub fn record_details(&self, details: &mut Details) {
        if self.integrity.fired() {
            details.insert(
                SignalCategory::Integrity.key().to_string(),
                json!({
                    "positive": self.integrity.positive,
                    "count": self.integrity.count(),
                    "evidence": self.integrity.evidence,
                }),
            );
        }
        if self.virtualization.fired() {
            details.insert(
                SignalCategory::Virtualization.key().to_string(),
                json!({
                    "positive": self.virtualization.positive,
                    "strongCount": self.virtualization.strong_count,
                    "weakCount": self.virtualization.weak_count,
                    "weakIndicators": self.virtualization.weak_indicators,
                    "evidence": self.virtualization.evidence,
                }),
            );
        }
        if self.instrumentation.fired() {
            let families: Vec<&str> = self
                .instrumentation
                .families
                .iter()
                .map(|family| family.key())
                .collect();
            details.insert(
                SignalCategory::Instrumentation.key().to_string(),
                json!({
                    "positive": self.instrumentation.positive,
                    "families": families,
                    "familyCount": families.len(),
                    "strong": self.instrumentation.has_strong(),
                    "evidence": self.instrumentation.evidence,
                }),
            );
        }
        if self.debugger.fired() {
            details.insert(
                SignalCategory::Debugger.key().to_string(),
                json!({
                    "positive": self.debugger.positive,
                    "evidence": self.debugger.evidence,
                }),
            );
        }
        if self.auxiliary.fired() {
            details.insert(
                SignalCategory::AuxiliaryMode.key().to_string(),
                json!({
                    "developerMode": self.developer_mode,
                    "usbDebugging": self.usb_debugging,
                    "evidence": self.auxiliary.evidence,
                }),
            );
        }
        if !self.suppressed.is_empty() {
            let suppressed: Vec<Value> = self
                .suppressed
                .iter()
                .map(|category| Value::from(category.key()))
                .collect();
            details.insert("suppressed".to_string(), Value::Array(suppressed));
        }
    }
}

/// Applies the per-category rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator {
    thresholds: Thresholds,
}

impl Aggregator {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Decides every category from the positive signals in `signals`.
    /// Virtualization suppression is not applied here.
    pub fn decide<'s, I>(&self, signals: I, environment: Environment) -> Decisions
    where
        I: IntoIterator<Item = &'s RawSignal>,
    {
        let positive: Vec<&RawSignal> = signals
            .into_iter()
            .filter(|signal| signal.is_positive())
            .collect();
        let in_category = |category: SignalCategory| -> Vec<&'s RawSignal> {
            positive
                .iter()
                .copied()
                .filter(|signal| signal.category() == category)
                .collect()
        };

        let mut integrity = CategoryDecision::from_signals(&in_category(SignalCategory::Integrity));
        integrity.positive = integrity.count() >= self.thresholds.integrity.max(1);

        let mut virtualization =
            CategoryDecision::from_signals(&in_category(SignalCategory::Virtualization));
        virtualization.positive = virtualization.has_strong()
            || virtualization.weak_indicators >= self.thresholds.virtualization_weak.max(1);

        let instrumentation_signals = in_category(SignalCategory::Instrumentation);
        let mut instrumentation = CategoryDecision::from_signals(&instrumentation_signals);
        let families: BTreeSet<ProbeFamily> = instrumentation_signals
            .iter()
            .map(|signal| signal.family().independence_group())
            .collect();
        instrumentation.families = families.into_iter().collect();
        instrumentation.positive = instrumentation.families.len()
            >= self.thresholds.instrumentation_families.max(1)
            || (self.thresholds.strong_instrumentation_override && instrumentation.has_strong());

        let mut debugger = CategoryDecision::from_signals(&in_category(SignalCategory::Debugger));
        debugger.positive = debugger.fired();

        let auxiliary_signals = in_category(SignalCategory::AuxiliaryMode);
        let auxiliary = CategoryDecision::from_signals(&auxiliary_signals);
        let has_settings = environment.has_developer_settings();
        let switched_on =
            |name: &str| has_settings && auxiliary_signals.iter().any(|signal| signal.name() == name);

        Decisions {
            developer_mode: switched_on(names::DEVELOPER_MODE),
            usb_debugging: switched_on(names::USB_DEBUGGING),
            integrity,
            virtualization,
            instrumentation,
            debugger,
            auxiliary,
            suppressed: Vec::new(),
        }
    }
}
