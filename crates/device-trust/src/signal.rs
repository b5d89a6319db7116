// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Raw probe output and the probe error taxonomy.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Classification bucket a raw signal feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalCategory {
    Integrity,
    Virtualization,
    Instrumentation,
    Debugger,
    AuxiliaryMode,
}

impl SignalCategory {
    pub fn key(self) -> &'static str {
        match self {
            Self::Integrity => "integrity",
            Self::Virtualization => "virtualization",
            Self::Instrumentation => "instrumentation",
            Self::Debugger => "debugger",
            Self::AuxiliaryMode => "auxiliary",
        }
    }
}

/// Independent source of observations. Error keys in the report detail bag
/// are scoped by family, and the instrumentation rule counts distinct families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ProbeFamily {
    FilesystemArtifacts,
    RootPackages,
    UrlSchemes,
    SandboxWrite,
    PrivilegedCommand,
    SelinuxStatus,
    SystemProperties,
    VirtualizationArtifacts,
    CpuInfo,
    BuildIdentifiers,
    MemoryRegions,
    FileDescriptors,
    LoadedModules,
    SymbolResolution,
    TraceFlag,
    LoopbackPorts,
    InjectionEnv,
    DeveloperSettings,
    HostFacts,
}

impl ProbeFamily {
    pub fn key(self) -> &'static str {
        match self {
            Self::FilesystemArtifacts => "filesystemArtifacts",
            Self::RootPackages => "rootPackages",
            Self::UrlSchemes => "urlSchemes",
            Self::SandboxWrite => "sandboxWrite",
            Self::PrivilegedCommand => "privilegedCommand",
            Self::SelinuxStatus => "selinuxStatus",
            Self::SystemProperties => "systemProperties",
            Self::VirtualizationArtifacts => "virtualizationArtifacts",
            Self::CpuInfo => "cpuInfo",
            Self::BuildIdentifiers => "buildIdentifiers",
            Self::MemoryRegions => "memoryRegions",
            Self::FileDescriptors => "fileDescriptors",
            Self::LoadedModules => "loadedModules",
            Self::SymbolResolution => "symbolResolution",
            Self::TraceFlag => "traceFlag",
            Self::LoopbackPorts => "loopbackPorts",
            Self::InjectionEnv => "injectionEnv",
            Self::DeveloperSettings => "developerSettings",
            Self::HostFacts => "hostFacts",
        }
    }

    /// Detail key under which a failure of this family is recorded.
    pub fn error_key(self) -> String {
        format!("{}Error", self.key())
    }

    /// Families that observe the same underlying evidence collapse to one
    /// when counting independent instrumentation families.
    pub fn independence_group(self) -> ProbeFamily {
        match self {
            Self::FileDescriptors => Self::MemoryRegions,
            other => other,
        }
    }
}

impl fmt::Display for ProbeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Strength {
    /// Sufficient on its own.
    Strong,
    /// Contributes toward a count threshold and is noisy on virtualized hosts.
    Weak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SignalValue {
    Flag(bool),
    Count(u64),
}

impl SignalValue {
    pub fn is_positive(self) -> bool {
        match self {
            Self::Flag(flag) => flag,
            Self::Count(count) => count > 0,
        }
    }
}

/// Stable signal names.
pub mod names {
    pub const SU_BINARY: &str = "su-binary-present";
    pub const MAGISK_ARTIFACT: &str = "magisk-artifact-present";
    pub const HOOK_FRAMEWORK_ARTIFACT: &str = "hook-framework-artifact-present";
    pub const FRIDA_SERVER_ARTIFACT: &str = "frida-server-present";
    pub const JAILBREAK_ARTIFACT: &str = "jailbreak-artifact-present";
    pub const ROOT_PACKAGE: &str = "root-package-installed";
    pub const JAILBREAK_URL_SCHEME: &str = "jailbreak-url-scheme";
    pub const SANDBOX_ESCAPE: &str = "sandbox-escape-write";
    pub const SU_COMMAND: &str = "su-command-resolvable";
    pub const SELINUX_PERMISSIVE: &str = "selinux-permissive";
    pub const TEST_KEYS_BUILD: &str = "test-keys-build";
    pub const DEBUGGABLE_BUILD: &str = "debuggable-build";
    pub const INSECURE_BUILD: &str = "insecure-build";
    pub const QEMU_KERNEL_PROPERTY: &str = "qemu-kernel-property";
    pub const EMULATOR_PROPERTY: &str = "emulator-property";
    pub const EMULATOR_ARTIFACT: &str = "emulator-artifact-present";
    pub const QEMU_INIT_SCRIPT: &str = "qemu-init-script";
    pub const HYPERVISOR_CPU_FLAG: &str = "hypervisor-cpu-flag";
    pub const EMULATOR_CPU_MODEL: &str = "emulator-cpu-model";
    pub const EMULATOR_BUILD_IDENTIFIER: &str = "emulator-build-identifier";
    pub const SIMULATOR_TARGET: &str = "simulator-target";
    pub const RWX_REGION: &str = "rwx-memory-region";
    pub const INSTRUMENTATION_LIBRARY_MAPPED: &str = "instrumentation-library-mapped";
    pub const SUSPICIOUS_LIBRARY_MAPPED: &str = "suspicious-library-mapped";
    pub const INSTRUMENTATION_FD_OPEN: &str = "instrumentation-fd-open";
    pub const SUSPICIOUS_MODULE_LOADED: &str = "suspicious-module-loaded";
    pub const SYMBOL_UNEXPECTED: &str = "symbol-resolution-unexpected";
    pub const TRACER_ATTACHED: &str = "tracer-attached";
    pub const PROCESS_TRACED: &str = "process-traced";
    pub const INSTRUMENTATION_PORT_OPEN: &str = "instrumentation-port-open";
    pub const INJECTION_VARIABLE_SET: &str = "injection-variable-set";
    pub const DEVELOPER_MODE: &str = "developer-mode-enabled";
    pub const USB_DEBUGGING: &str = "usb-debugging-enabled";
}

/// Device identifiers several probes can read independently. Weak signals
/// naming the same subject are one indicator, whichever probe saw them.
pub mod subjects {
    pub const HARDWARE: &str = "hardware";
    pub const MODEL: &str = "model";
    pub const PRODUCT: &str = "product";
    pub const DEVICE: &str = "device";
    pub const MANUFACTURER: &str = "manufacturer";
    pub const BRAND: &str = "brand";
    pub const FINGERPRINT: &str = "fingerprint";
    pub const CHARACTERISTICS: &str = "characteristics";
}

/// Atomic unit produced by a probe. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawSignal {
    name: &'static str,
    category: SignalCategory,
    family: ProbeFamily,
    strength: Strength,
    value: SignalValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'static str>,
    evidence: Vec<String>,
}

impl RawSignal {
    pub fn new(
        name: &'static str,
        category: SignalCategory,
        family: ProbeFamily,
        strength: Strength,
        value: SignalValue,
    ) -> Self {
        Self {
            name,
            category,
            family,
            strength,
            value,
            subject: None,
            evidence: Vec::new(),
        }
    }

    /// Positive boolean signal.
    pub fn flag(
        name: &'static str,
        category: SignalCategory,
        family: ProbeFamily,
        strength: Strength,
    ) -> Self {
        Self::new(name, category, family, strength, SignalValue::Flag(true))
    }

    pub fn with_evidence<I, S>(mut self, evidence: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.evidence.extend(evidence.into_iter().map(Into::into));
        self
    }

    /// Tags the identifier this signal describes, see [`subjects`].
    pub fn with_subject(mut self, subject: &'static str) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subject(&self) -> Option<&'static str> {
        self.subject
    }

    pub fn category(&self) -> SignalCategory {
        self.category
    }

    pub fn family(&self) -> ProbeFamily {
        self.family
    }

    pub fn strength(&self) -> Strength {
        self.strength
    }

    pub fn is_strong(&self) -> bool {
        self.strength == Strength::Strong
    }

    pub fn value(&self) -> SignalValue {
        self.value
    }

    pub fn is_positive(&self) -> bool {
        self.value.is_positive()
    }

    pub fn evidence(&self) -> &[String] {
        &self.evidence
    }

    /// Evidence rendered for the detail bag; falls back to the signal name.
    pub fn describe(&self) -> Vec<String> {
        if self.evidence.is_empty() {
            vec![self.name.to_string()]
        } else {
            self.evidence
                .iter()
                .map(|item| format!("{}: {}", self.name, item))
                .collect()
        }
    }
}

/// Everything one probe observed: signals for the aggregator plus raw facts
/// copied verbatim into the report detail bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    signals: Vec<RawSignal>,
    facts: Vec<(&'static str, Value)>,
}

impl Observation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signal(mut self, signal: RawSignal) -> Self {
        self.push(signal);
        self
    }

    pub fn push(&mut self, signal: RawSignal) {
        self.signals.push(signal);
    }

    pub fn fact(&mut self, key: &'static str, value: impl Into<Value>) {
        self.facts.push((key, value.into()));
    }

    pub fn signals(&self) -> &[RawSignal] {
        &self.signals
    }

    /// Keeps the signals matching `keep` and returns how many were dropped.
    pub fn retain_signals<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&RawSignal) -> bool,
    {
        let before = self.signals.len();
        self.signals.retain(keep);
        before - self.signals.len()
    }

    pub fn facts(&self) -> &[(&'static str, Value)] {
        &self.facts
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.facts.is_empty()
    }
}

/// Why a single probe could not complete. Always recorded, never escalated.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not available in this environment")]
    Unavailable(&'static str),

    #[error("{probe} exceeded its {bound_ms} ms bound")]
    Timeout { probe: &'static str, bound_ms: u64 },

    #[error("command `{command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    #[error("failed to start probe runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("probe panicked: {0}")]
    Panicked(String),
}

impl ProbeError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
