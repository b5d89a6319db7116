// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Probe registry.
//!
//! Every probe is a plain function returning `Result<Observation, ProbeError>`.
//! Each execution environment gets a declarative list of descriptors; the
//! aggregator never needs to know which environment produced a signal.

pub(crate) mod bounded;
pub mod environment;
pub mod filesystem;
pub mod memory;
pub mod modules;
pub mod network;
pub mod properties;
pub mod symbol;
pub mod trace;
pub mod virtualization;

use crate::config::{Capabilities, EngineConfig, Environment, HostFacts};
use crate::signal::{Observation, ProbeError, ProbeFamily, SignalCategory};
use log::{debug, warn};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Read-only inputs shared by every probe of one collection pass.
#[derive(Debug, Clone, Copy)]
pub struct ProbeContext<'a> {
    pub config: &'a EngineConfig,
    pub capabilities: &'a Capabilities,
    pub host: &'a HostFacts,
}

impl ProbeContext<'_> {
    pub fn environment(&self) -> Environment {
        self.capabilities.environment
    }
}

pub type ProbeFn = fn(&ProbeContext<'_>) -> Result<Observation, ProbeError>;

#[derive(Clone, Copy)]
pub struct ProbeDescriptor {
    pub name: &'static str,
    pub family: ProbeFamily,
    /// Categories this probe may emit. Anything else is dropped before
    /// aggregation.
    pub feeds: &'static [SignalCategory],
    /// Skipped entirely when native scanning is unavailable.
    pub requires_native: bool,
    pub run: ProbeFn,
}

impl std::fmt::Debug for ProbeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeDescriptor")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("feeds", &self.feeds)
            .field("requires_native", &self.requires_native)
            .finish()
    }
}

#[derive(Debug)]
pub enum ProbeOutcome {
    Completed(Observation),
    Failed(ProbeError),
    /// Native scanning unavailable.
    Skipped,
}

/// Result of running one descriptor.
#[derive(Debug)]
pub struct ProbeRun {
    pub name: &'static str,
    pub family: ProbeFamily,
    pub native: bool,
    pub elapsed: Duration,
    pub outcome: ProbeOutcome,
}

impl ProbeRun {
    pub fn completed(family: ProbeFamily, observation: Observation) -> Self {
        Self {
            name: family.key(),
            family,
            native: false,
            elapsed: Duration::ZERO,
            outcome: ProbeOutcome::Completed(observation),
        }
    }

    pub fn failed(family: ProbeFamily, error: ProbeError) -> Self {
        Self {
            name: family.key(),
            family,
            native: false,
            elapsed: Duration::ZERO,
            outcome: ProbeOutcome::Failed(error),
        }
    }

    pub fn skipped(family: ProbeFamily) -> Self {
        Self {
            name: family.key(),
            family,
            native: true,
            elapsed: Duration::ZERO,
            outcome: ProbeOutcome::Skipped,
        }
    }

    pub fn observation(&self) -> Option<&Observation> {
        match &self.outcome {
            ProbeOutcome::Completed(observation) => Some(observation),
            _ => None,
        }
    }
}

use SignalCategory::{AuxiliaryMode, Debugger, Instrumentation, Integrity, Virtualization};

const ROOT_ARTIFACTS: ProbeDescriptor = ProbeDescriptor {
    name: "root-artifacts",
    family: ProbeFamily::FilesystemArtifacts,
    feeds: &[Integrity],
    requires_native: false,
    run: filesystem::root_artifacts,
};

const JAILBREAK_ARTIFACTS: ProbeDescriptor = ProbeDescriptor {
    name: "jailbreak-artifacts",
    family: ProbeFamily::FilesystemArtifacts,
    feeds: &[Integrity],
    requires_native: false,
    run: filesystem::jailbreak_artifacts,
};

const ROOT_PACKAGES: ProbeDescriptor = ProbeDescriptor {
    name: "root-packages",
    family: ProbeFamily::RootPackages,
    feeds: &[Integrity],
    requires_native: false,
    run: filesystem::root_packages,
};

const URL_SCHEMES: ProbeDescriptor = ProbeDescriptor {
    name: "url-schemes",
    family: ProbeFamily::UrlSchemes,
    feeds: &[Integrity],
    requires_native: false,
    run: filesystem::url_schemes,
};

const SANDBOX_WRITE: ProbeDescriptor = ProbeDescriptor {
    name: "sandbox-write",
    family: ProbeFamily::SandboxWrite,
    feeds: &[Integrity],
    requires_native: false,
    run: filesystem::sandbox_escape,
};

const PRIVILEGED_COMMAND: ProbeDescriptor = ProbeDescriptor {
    name: "privileged-command",
    family: ProbeFamily::PrivilegedCommand,
    feeds: &[Integrity],
    requires_native: false,
    run: filesystem::privileged_command,
};

const SELINUX: ProbeDescriptor = ProbeDescriptor {
    name: "selinux",
    family: ProbeFamily::SelinuxStatus,
    feeds: &[Integrity],
    requires_native: false,
    run: filesystem::selinux_status,
};

const SYSTEM_PROPERTIES: ProbeDescriptor = ProbeDescriptor {
    name: "system-properties",
    family: ProbeFamily::SystemProperties,
    feeds: &[Integrity, Virtualization],
    requires_native: false,
    run: properties::system_properties,
};

const EMULATOR_ARTIFACTS: ProbeDescriptor = ProbeDescriptor {
    name: "emulator-artifacts",
    family: ProbeFamily::VirtualizationArtifacts,
    feeds: &[Virtualization],
    requires_native: false,
    run: virtualization::emulator_artifacts,
};

const SIMULATOR: ProbeDescriptor = ProbeDescriptor {
    name: "simulator",
    family: ProbeFamily::VirtualizationArtifacts,
    feeds: &[Virtualization],
    requires_native: false,
    run: virtualization::simulator_target,
};

const CPU_INFO: ProbeDescriptor = ProbeDescriptor {
    name: "cpu-info",
    family: ProbeFamily::CpuInfo,
    feeds: &[Virtualization],
    requires_native: false,
    run: virtualization::cpu_info,
};

const BUILD_IDENTIFIERS: ProbeDescriptor = ProbeDescriptor {
    name: "build-identifiers",
    family: ProbeFamily::BuildIdentifiers,
    feeds: &[Virtualization],
    requires_native: false,
    run: virtualization::build_identifiers,
};

const MEMORY_REGIONS: ProbeDescriptor = ProbeDescriptor {
    name: "memory-regions",
    family: ProbeFamily::MemoryRegions,
    feeds: &[Instrumentation],
    requires_native: true,
    run: memory::memory_regions,
};

const FILE_DESCRIPTORS: ProbeDescriptor = ProbeDescriptor {
    name: "file-descriptors",
    family: ProbeFamily::FileDescriptors,
    feeds: &[Instrumentation],
    requires_native: true,
    run: memory::file_descriptors,
};

const LOADED_MODULES: ProbeDescriptor = ProbeDescriptor {
    name: "loaded-modules",
    family: ProbeFamily::LoadedModules,
    feeds: &[Instrumentation],
    requires_native: true,
    run: modules::loaded_modules,
};

const SYMBOL_RESOLUTION: ProbeDescriptor = ProbeDescriptor {
    name: "symbol-resolution",
    family: ProbeFamily::SymbolResolution,
    feeds: &[Instrumentation],
    requires_native: true,
    run: symbol::symbol_resolution,
};

const TRACE_FLAG: ProbeDescriptor = ProbeDescriptor {
    name: "trace-flag",
    family: ProbeFamily::TraceFlag,
    feeds: &[Debugger, Instrumentation],
    requires_native: false,
    run: trace::trace_flag,
};

const LOOPBACK_PORTS: ProbeDescriptor = ProbeDescriptor {
    name: "loopback-ports",
    family: ProbeFamily::LoopbackPorts,
    feeds: &[Instrumentation],
    requires_native: false,
    run: network::loopback_ports,
};

const INJECTION_ENV: ProbeDescriptor = ProbeDescriptor {
    name: "injection-env",
    family: ProbeFamily::InjectionEnv,
    feeds: &[Instrumentation],
    requires_native: false,
    run: environment::injection_env,
};

const DEVELOPER_SETTINGS: ProbeDescriptor = ProbeDescriptor {
    name: "developer-settings",
    family: ProbeFamily::DeveloperSettings,
    feeds: &[AuxiliaryMode],
    requires_native: false,
    run: environment::developer_settings,
};

/// Ordered probe set for one execution environment.
#[derive(Debug, Clone, Default)]
pub struct ProbeRegistry {
    descriptors: Vec<ProbeDescriptor>,
}

impl ProbeRegistry {
    pub fn new(descriptors: Vec<ProbeDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn for_environment(environment: Environment) -> Self {
        let descriptors = match environment {
            Environment::Android => vec![
                ROOT_ARTIFACTS,
                ROOT_PACKAGES,
                SANDBOX_WRITE,
                PRIVILEGED_COMMAND,
                SELINUX,
                SYSTEM_PROPERTIES,
                EMULATOR_ARTIFACTS,
                CPU_INFO,
                BUILD_IDENTIFIERS,
                MEMORY_REGIONS,
                FILE_DESCRIPTORS,
                LOADED_MODULES,
                SYMBOL_RESOLUTION,
                TRACE_FLAG,
                LOOPBACK_PORTS,
                INJECTION_ENV,
                DEVELOPER_SETTINGS,
            ],
            Environment::Ios => vec![
                JAILBREAK_ARTIFACTS,
                URL_SCHEMES,
                SANDBOX_WRITE,
                SIMULATOR,
                LOADED_MODULES,
                SYMBOL_RESOLUTION,
                TRACE_FLAG,
                LOOPBACK_PORTS,
                INJECTION_ENV,
            ],
            Environment::Linux => vec![
                CPU_INFO,
                MEMORY_REGIONS,
                FILE_DESCRIPTORS,
                LOADED_MODULES,
                SYMBOL_RESOLUTION,
                TRACE_FLAG,
                LOOPBACK_PORTS,
                INJECTION_ENV,
            ],
            Environment::Unsupported => Vec::new(),
        };
        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[ProbeDescriptor] {
        &self.descriptors
    }

    /// Descriptors contributing to `category`.
    pub fn feeding(&self, category: SignalCategory) -> impl Iterator<Item = &ProbeDescriptor> {
        self.descriptors
            .iter()
            .filter(move |descriptor| descriptor.feeds.contains(&category))
    }

    /// Runs every descriptor in order. Failures and panics are captured per
    /// probe; nothing escapes.
    pub fn run_all(&self, ctx: &ProbeContext<'_>) -> Vec<ProbeRun> {
        self.descriptors
            .iter()
            .map(|descriptor| run_one(descriptor, ctx))
            .collect()
    }
}

fn run_one(descriptor: &ProbeDescriptor, ctx: &ProbeContext<'_>) -> ProbeRun {
    if descriptor.requires_native && !ctx.capabilities.native_scanning {
        debug!("skipping native probe {}", descriptor.name);
        return ProbeRun {
            name: descriptor.name,
            family: descriptor.family,
            native: true,
            elapsed: Duration::ZERO,
            outcome: ProbeOutcome::Skipped,
        };
    }

    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| (descriptor.run)(ctx)))
        .unwrap_or_else(|payload| Err(ProbeError::Panicked(panic_message(payload.as_ref()))));
    let elapsed = started.elapsed();

    let outcome = match result {
        Ok(mut observation) => {
            let stray = observation
                .retain_signals(|signal| descriptor.feeds.contains(&signal.category()));
            if stray > 0 {
                warn!(
                    "probe {} dropped {} signal(s) outside {:?}",
                    descriptor.name, stray, descriptor.feeds
                );
            }
            debug!(
                "probe {} finished in {:?} with {} signal(s)",
                descriptor.name,
                elapsed,
                observation.signals().len()
            );
            ProbeOutcome::Completed(observation)
        }
        Err(err) => {
            warn!("probe {} failed: {}", descriptor.name, err);
            ProbeOutcome::Failed(err)
        }
    };

    ProbeRun {
        name: descriptor.name,
        family: descriptor.family,
        native: descriptor.requires_native,
        elapsed,
        outcome,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
