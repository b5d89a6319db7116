// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Engine configuration, execution-environment capabilities and host facts.

use crate::signal::ProbeError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Loopback ports of well-known instrumentation servers (Frida, IDA debug server).
pub const DEFAULT_INSTRUMENTATION_PORTS: [u16; 3] = [27042, 27043, 23946];

/// Policy constants and probe bounds. Defaults are the tested values.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prefix for every absolute path a probe reads or writes. Only set by
    /// constructing the config directly; `from_env` always keeps `/`.
    pub fs_root: PathBuf,
    pub artifact_cap: usize,
    pub package_cap: usize,
    pub max_map_lines: usize,
    pub rwx_region_cap: usize,
    pub suspicious_module_cap: usize,
    pub loaded_module_match_cap: usize,
    pub max_fd_entries: usize,
    pub port_timeout: Duration,
    pub command_timeout: Duration,
    pub instrumentation_ports: Vec<u16>,
    pub integrity_threshold: usize,
    pub virtualization_weak_threshold: usize,
    pub instrumentation_family_threshold: usize,
    /// Lets a single strong instrumentation signal bypass the family threshold.
    pub strong_instrumentation_override: bool,
    /// Bound enforced by the call boundary, not by the engine.
    pub overall_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fs_root: PathBuf::from("/"),
            artifact_cap: 5,
            package_cap: 5,
            max_map_lines: 10_000,
            rwx_region_cap: 4,
            suspicious_module_cap: 8,
            loaded_module_match_cap: 3,
            max_fd_entries: 100,
            port_timeout: Duration::from_millis(15),
            command_timeout: Duration::from_millis(200),
            instrumentation_ports: DEFAULT_INSTRUMENTATION_PORTS.to_vec(),
            integrity_threshold: 1,
            virtualization_weak_threshold: 2,
            instrumentation_family_threshold: 2,
            strong_instrumentation_override: false,
            overall_timeout: Duration::from_millis(1_500),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `DEVICE_TRUST_*` environment variables. Bounds
    /// and thresholds only; the filesystem root is not overridable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port_timeout: env_millis("DEVICE_TRUST_PORT_TIMEOUT_MS", defaults.port_timeout),
            command_timeout: env_millis(
                "DEVICE_TRUST_COMMAND_TIMEOUT_MS",
                defaults.command_timeout,
            ),
            instrumentation_family_threshold: env_usize(
                "DEVICE_TRUST_INSTRUMENTATION_THRESHOLD",
                defaults.instrumentation_family_threshold,
            ),
            virtualization_weak_threshold: env_usize(
                "DEVICE_TRUST_VIRTUALIZATION_THRESHOLD",
                defaults.virtualization_weak_threshold,
            ),
            rwx_region_cap: env_usize("DEVICE_TRUST_RWX_REGION_CAP", defaults.rwx_region_cap),
            strong_instrumentation_override: env_bool(
                "DEVICE_TRUST_STRONG_OVERRIDE",
                defaults.strong_instrumentation_override,
            ),
            overall_timeout: env_millis(
                "DEVICE_TRUST_OVERALL_TIMEOUT_MS",
                defaults.overall_timeout,
            ),
            ..defaults
        }
    }

    /// Maps an absolute device path beneath `fs_root`.
    pub fn resolve(&self, absolute: &str) -> PathBuf {
        self.fs_root.join(absolute.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Environment {
    Android,
    Ios,
    Linux,
    Unsupported,
}

impl Environment {
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Self::Android
        } else if cfg!(target_os = "ios") {
            Self::Ios
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Unsupported
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Linux => "linux",
            Self::Unsupported => "unsupported",
        }
    }

    /// Whether developer-mode / USB-debugging switches exist at all.
    pub fn has_developer_settings(self) -> bool {
        matches!(self, Self::Android)
    }
}

/// What the current process can introspect. Established once, read-only after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub environment: Environment,
    pub native_scanning: bool,
    pub native_unavailable_reason: Option<String>,
}

impl Capabilities {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            native_scanning: true,
            native_unavailable_reason: None,
        }
    }

    pub fn without_native_scanning(environment: Environment, reason: impl Into<String>) -> Self {
        Self {
            environment,
            native_scanning: false,
            native_unavailable_reason: Some(reason.into()),
        }
    }

    pub fn detect() -> Self {
        let environment = Environment::current();
        match environment {
            Environment::Android | Environment::Linux => {
                let maps = Path::new("/proc/self/maps");
                match File::open(maps) {
                    Ok(_) => Self::new(environment),
                    Err(err) => Self::without_native_scanning(
                        environment,
                        format!("{} unreadable: {}", maps.display(), err),
                    ),
                }
            }
            Environment::Ios => Self::new(environment),
            Environment::Unsupported => {
                Self::without_native_scanning(environment, "no native scanner for this target")
            }
        }
    }
}

/// Build identifiers reported by the host platform API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildIdentifiers {
    pub model: String,
    pub manufacturer: String,
    pub product: String,
    pub device: String,
    pub hardware: String,
    pub brand: String,
    pub fingerprint: String,
}

impl BuildIdentifiers {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Facts only the host application layer can observe (package manager,
/// URL-scheme resolution, settings APIs), shipped across the call boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostFacts {
    pub installed_packages: Vec<String>,
    pub build: BuildIdentifiers,
    pub openable_url_schemes: Vec<String>,
    pub developer_mode: Option<bool>,
    pub adb_enabled: Option<bool>,
}

impl HostFacts {
    pub fn from_json(payload: &str) -> Result<Self, ProbeError> {
        if payload.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(payload).map_err(|err| ProbeError::Malformed {
            what: "host facts payload",
            detail: err.to_string(),
        })
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "enabled" | "on"
        ),
        Err(_) => default,
    }
}
