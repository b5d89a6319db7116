// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Emulator / simulator indicators.

use super::filesystem::find_present;
use super::ProbeContext;
use crate::config::BuildIdentifiers;
use crate::signal::{
    names, subjects, Observation, ProbeError, ProbeFamily, RawSignal, SignalCategory, Strength,
};
use std::fs;
use std::io;

/// Files and devices that only exist inside QEMU-based emulators.
const EMULATOR_FILES: &[&str] = &[
    "/dev/qemu_pipe",
    "/dev/socket/qemud",
    "/dev/socket/genyd",
    "/dev/socket/baseband_genyd",
    "/system/lib/libc_malloc_debug_qemu.so",
    "/system/bin/qemu-props",
    "/sys/qemu_trace",
    "/sys/bus/platform/drivers/qemu_pipe",
    "/system/lib/libqemu.so",
    "/system/lib64/libqemu.so",
    "/system/lib/libhoudini.so",
    "/system/lib64/libhoudini.so",
];

fn virtualization_signal(name: &'static str, family: ProbeFamily, strength: Strength) -> RawSignal {
    RawSignal::flag(name, SignalCategory::Virtualization, family, strength)
}

pub fn emulator_artifacts(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let mut observation = Observation::new();
    for path in find_present(ctx, EMULATOR_FILES, ctx.config.artifact_cap) {
        observation.push(
            virtualization_signal(
                names::EMULATOR_ARTIFACT,
                ProbeFamily::VirtualizationArtifacts,
                Strength::Strong,
            )
            .with_evidence([path]),
        );
    }

    let init_rc = ctx.config.resolve("/init.rc");
    if let Ok(content) = fs::read_to_string(init_rc) {
        if content.to_lowercase().contains("qemu") {
            observation.push(virtualization_signal(
                names::QEMU_INIT_SCRIPT,
                ProbeFamily::VirtualizationArtifacts,
                Strength::Weak,
            ));
        }
    }
    Ok(observation)
}

/// Classifies `/proc/cpuinfo`. The `hypervisor` flag is set by the CPU itself
/// when running under a hypervisor; vendor strings are only weak hints.
pub fn evaluate_cpuinfo(content: &str) -> Observation {
    let mut observation = Observation::new();

    let hypervisor = content.lines().any(|line| {
        let (key, value) = line.split_once(':').unwrap_or((line, ""));
        matches!(key.trim(), "flags" | "Features")
            && value.split_whitespace().any(|flag| flag == "hypervisor")
    });
    if hypervisor {
        observation.push(
            virtualization_signal(
                names::HYPERVISOR_CPU_FLAG,
                ProbeFamily::CpuInfo,
                Strength::Strong,
            )
            .with_evidence(["hypervisor"]),
        );
    }

    // The board name in cpuinfo is the same identifier as ro.hardware.
    let lower = content.to_lowercase();
    if let Some(vendor) = ["goldfish", "ranchu", "qemu", "vbox"]
        .into_iter()
        .find(|vendor| lower.contains(vendor))
    {
        observation.push(
            virtualization_signal(names::EMULATOR_CPU_MODEL, ProbeFamily::CpuInfo, Strength::Weak)
                .with_subject(subjects::HARDWARE)
                .with_evidence([vendor]),
        );
    }
    observation
}

pub fn cpu_info(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let path = ctx.config.resolve("/proc/cpuinfo");
    match fs::read_to_string(&path) {
        Ok(content) => Ok(evaluate_cpuinfo(&content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Observation::new()),
        Err(err) => Err(ProbeError::io(path, err)),
    }
}

/// One weak indicator per build identifier that names a virtualization vendor
/// or an SDK placeholder.
pub fn evaluate_build_identifiers(build: &BuildIdentifiers) -> Observation {
    let checks: [(&str, &str, &str, &[&str]); 7] = [
        (
            "BUILD_MODEL_CHECK",
            subjects::MODEL,
            build.model.as_str(),
            &["sdk", "emulator", "google_sdk", "droid4x", "genymotion", "vbox"],
        ),
        (
            "BUILD_MANUFACTURER_CHECK",
            subjects::MANUFACTURER,
            build.manufacturer.as_str(),
            &["unknown", "generic", "genymotion", "vbox"],
        ),
        (
            "BUILD_PRODUCT_CHECK",
            subjects::PRODUCT,
            build.product.as_str(),
            &["sdk", "emulator", "google_sdk", "vbox", "genymotion"],
        ),
        (
            "BUILD_DEVICE_CHECK",
            subjects::DEVICE,
            build.device.as_str(),
            &["generic", "emulator", "vbox", "genymotion"],
        ),
        (
            "BUILD_HARDWARE_CHECK",
            subjects::HARDWARE,
            build.hardware.as_str(),
            &["goldfish", "ranchu", "vbox"],
        ),
        (
            "BUILD_BRAND_CHECK",
            subjects::BRAND,
            build.brand.as_str(),
            &["generic", "unknown"],
        ),
        (
            "BUILD_FINGERPRINT_CHECK",
            subjects::FINGERPRINT,
            build.fingerprint.as_str(),
            &["generic", "unknown", "vbox"],
        ),
    ];

    let mut observation = Observation::new();
    for (check, subject, value, markers) in checks {
        let lower = value.to_lowercase();
        if markers.iter().any(|marker| lower.contains(marker)) {
            observation.push(
                virtualization_signal(
                    names::EMULATOR_BUILD_IDENTIFIER,
                    ProbeFamily::BuildIdentifiers,
                    Strength::Weak,
                )
                .with_subject(subject)
                .with_evidence([check]),
            );
        }
    }
    observation
}

pub fn build_identifiers(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    Ok(evaluate_build_identifiers(&ctx.host.build))
}

pub fn simulator_target(_ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let compiled_for_simulator = cfg!(any(
        all(target_os = "ios", target_arch = "x86_64"),
        all(target_os = "ios", target_abi = "sim")
    ));
    let simulator_runtime = std::env::var_os("SIMULATOR_DEVICE_NAME").is_some();

    let mut observation = Observation::new();
    if compiled_for_simulator || simulator_runtime {
        observation.push(virtualization_signal(
            names::SIMULATOR_TARGET,
            ProbeFamily::VirtualizationArtifacts,
            Strength::Strong,
        ));
    }
    Ok(observation)
}
