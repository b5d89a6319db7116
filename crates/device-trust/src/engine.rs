// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Engine facade: one `collect()` per assessment.

use crate::config::{Capabilities, EngineConfig, Environment, HostFacts};
use crate::probes::{ProbeContext, ProbeRegistry, ProbeRun};
use crate::report::{Normalizer, TrustReport};
use crate::signal::{ProbeError, ProbeFamily};
use log::{info, warn};
use std::sync::OnceLock;
use std::time::Instant;
use thiserror::Error;

/// Runs the registered probes and normalizes the result. Holds no mutable
/// state between passes; capabilities are detected on first use unless
/// injected.
#[derive(Debug, Default)]
pub struct TrustEngine {
    config: EngineConfig,
    host: HostFacts,
    host_error: Option<String>,
    capabilities: OnceLock<Capabilities>,
    registry: Option<ProbeRegistry>,
}

impl TrustEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = OnceLock::from(capabilities);
        self
    }

    pub fn with_host_facts(mut self, host: HostFacts) -> Self {
        self.host = host;
        self.host_error = None;
        self
    }

    /// Decodes the host payload. A malformed payload falls back to empty
    /// facts and is reported as a host-facts failure on every pass.
    pub fn with_host_payload(mut self, payload: &str) -> Self {
        match HostFacts::from_json(payload) {
            Ok(host) => {
                self.host = host;
                self.host_error = None;
            }
            Err(err) => {
                warn!("ignoring host facts: {}", err);
                self.host = HostFacts::default();
                self.host_error = Some(match err {
                    ProbeError::Malformed { detail, .. } => detail,
                    other => other.to_string(),
                });
            }
        }
        self
    }

    /// Replaces the per-environment probe set.
    pub fn with_registry(mut self, registry: ProbeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host_facts(&self) -> &HostFacts {
        &self.host
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.capabilities.get_or_init(Capabilities::detect)
    }

    pub fn collect(&self) -> TrustReport {
        let started = Instant::now();
        let capabilities = self.capabilities();

        let detected;
        let registry = match &self.registry {
            Some(registry) => registry,
            None => {
                detected = ProbeRegistry::for_environment(capabilities.environment);
                &detected
            }
        };

        let ctx = ProbeContext {
            config: &self.config,
            capabilities,
            host: &self.host,
        };
        let mut runs: Vec<ProbeRun> = registry.run_all(&ctx);
        if let Some(detail) = &self.host_error {
            runs.push(ProbeRun::failed(
                ProbeFamily::HostFacts,
                ProbeError::Malformed {
                    what: "host facts payload",
                    detail: detail.clone(),
                },
            ));
        }

        let report = Normalizer::new(&self.config, capabilities).normalize(&runs);
        info!(
            "device trust pass on {} finished in {:?}: integrity={} virtualized={} instrumentation={} debugger={}",
            capabilities.environment.name(),
            started.elapsed(),
            report.integrity_compromised(),
            report.virtualized(),
            report.instrumentation_suspected(),
            report.debugger_attached(),
        );
        report
    }
}

/// Runs one pass with `DEVICE_TRUST_*` configuration and detected capabilities.
pub fn collect() -> TrustReport {
    TrustEngine::new(EngineConfig::from_env()).collect()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupportError {
    #[error("device trust is not implemented for this target")]
    NotImplemented,

    #[error("native scanning degraded: {0}")]
    Degraded(String),
}

/// Why this target is or is not fully served.
pub fn check_support(capabilities: &Capabilities) -> Result<(), SupportError> {
    if capabilities.environment == Environment::Unsupported {
        return Err(SupportError::NotImplemented);
    }
    if !capabilities.native_scanning {
        return Err(SupportError::Degraded(
            capabilities
                .native_unavailable_reason
                .clone()
                .unwrap_or_default(),
        ));
    }
    Ok(())
}

/// Only [`SupportError::NotImplemented`] means unsupported; a degraded
/// engine still answers.
pub fn supported(capabilities: &Capabilities) -> bool {
    match check_support(capabilities) {
        Ok(()) => true,
        Err(SupportError::NotImplemented) => false,
        Err(err) => {
            warn!("{}", err);
            true
        }
    }
}

pub fn is_supported() -> bool {
    supported(&Capabilities::detect())
}
