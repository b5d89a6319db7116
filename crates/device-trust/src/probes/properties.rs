// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! System property overrides and emulator property markers.
//!
//! Properties come from one bounded `getprop` dump. When the command is not
//! available the build.prop files are parsed instead.

use super::{bounded, ProbeContext};
use crate::signal::{
    names, subjects, Observation, ProbeError, ProbeFamily, RawSignal, SignalCategory, Strength,
};
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::io;

const BUILD_PROP_FILES: &[&str] = &["/system/build.prop", "/default.prop"];

pub type PropertySnapshot = HashMap<String, String>;

/// Parses `getprop` output: `[ro.build.tags]: [release-keys]`.
pub fn parse_getprop_dump(output: &str) -> PropertySnapshot {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once("]: [")?;
            let key = key.strip_prefix('[')?;
            let value = value.strip_suffix(']')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Parses `key=value` build.prop content. Earlier entries win.
pub fn parse_build_prop(content: &str, snapshot: &mut PropertySnapshot) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            snapshot
                .entry(key.trim().to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }
}

fn load_build_props(ctx: &ProbeContext<'_>) -> Result<PropertySnapshot, ProbeError> {
    let mut snapshot = PropertySnapshot::new();
    let mut readable = false;
    for file in BUILD_PROP_FILES {
        let path = ctx.config.resolve(file);
        match fs::read_to_string(&path) {
            Ok(content) => {
                readable = true;
                parse_build_prop(&content, &mut snapshot);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => debug!("cannot read {}: {}", path.display(), err),
        }
    }
    if readable {
        Ok(snapshot)
    } else {
        Err(ProbeError::Unavailable("system property query"))
    }
}

fn property_signal(
    name: &'static str,
    category: SignalCategory,
    strength: Strength,
    key: &str,
    value: &str,
) -> RawSignal {
    RawSignal::flag(name, category, ProbeFamily::SystemProperties, strength)
        .with_evidence([format!("{}={}", key, value)])
}

fn lookup<'a>(snapshot: &'a PropertySnapshot, key: &str) -> Option<&'a str> {
    snapshot.get(key).map(|value| value.trim())
}

/// Classifies a property snapshot. Build-flavour overrides are weak integrity
/// signals because stock emulator images ship with them.
pub fn evaluate(snapshot: &PropertySnapshot) -> Observation {
    let mut observation = Observation::new();
    let get = |key: &str| lookup(snapshot, key);

    if let Some(tags) = get("ro.build.tags") {
        if tags.contains("test-keys") {
            observation.push(property_signal(
                names::TEST_KEYS_BUILD,
                SignalCategory::Integrity,
                Strength::Weak,
                "ro.build.tags",
                tags,
            ));
        }
    }
    if get("ro.debuggable") == Some("1") {
        observation.push(property_signal(
            names::DEBUGGABLE_BUILD,
            SignalCategory::Integrity,
            Strength::Weak,
            "ro.debuggable",
            "1",
        ));
    }
    if get("ro.secure") == Some("0") {
        observation.push(property_signal(
            names::INSECURE_BUILD,
            SignalCategory::Integrity,
            Strength::Weak,
            "ro.secure",
            "0",
        ));
    }
    if get("ro.kernel.qemu") == Some("1") {
        observation.push(property_signal(
            names::QEMU_KERNEL_PROPERTY,
            SignalCategory::Virtualization,
            Strength::Strong,
            "ro.kernel.qemu",
            "1",
        ));
    }

    let emulator_markers: [(&str, &str, &[&str]); 3] = [
        ("ro.hardware", subjects::HARDWARE, &["goldfish", "ranchu", "vbox"]),
        ("ro.product.model", subjects::MODEL, &["sdk", "emulator", "generic"]),
        ("ro.build.characteristics", subjects::CHARACTERISTICS, &["emulator"]),
    ];
    for (key, subject, markers) in emulator_markers {
        if let Some(value) = get(key) {
            let lower = value.to_lowercase();
            if markers.iter().any(|marker| lower.contains(marker)) {
                observation.push(
                    property_signal(
                        names::EMULATOR_PROPERTY,
                        SignalCategory::Virtualization,
                        Strength::Weak,
                        key,
                        value,
                    )
                    .with_subject(subject),
                );
            }
        }
    }

    observation
}

pub fn system_properties(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let snapshot = match bounded::command("getprop", &[], ctx.config.command_timeout) {
        Ok(Some(output)) => parse_getprop_dump(&output),
        Ok(None) | Err(ProbeError::Unavailable(_)) => load_build_props(ctx)?,
        Err(err) => return Err(err),
    };
    Ok(evaluate(&snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, &str)]) -> PropertySnapshot {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn getprop_dump_is_parsed() {
        let parsed = parse_getprop_dump(
            "[ro.build.tags]: [release-keys]\n[ro.secure]: [1]\ngarbage line\n[empty]: []\n",
        );
        assert_eq!(parsed.get("ro.build.tags").map(String::as_str), Some("release-keys"));
        assert_eq!(parsed.get("ro.secure").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("empty").map(String::as_str), Some(""));
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn build_prop_keeps_first_definition() {
        let mut parsed = PropertySnapshot::new();
        parse_build_prop("# comment\nro.kernel.qemu=1\nro.kernel.qemu=0\n", &mut parsed);
        assert_eq!(parsed.get("ro.kernel.qemu").map(String::as_str), Some("1"));
    }

    #[test]
    fn release_device_is_clean() {
        let props = snapshot(&[
            ("ro.build.tags", "release-keys"),
            ("ro.debuggable", "0"),
            ("ro.secure", "1"),
            ("ro.hardware", "qcom"),
            ("ro.product.model", "Pixel 8"),
        ]);
        assert!(evaluate(&props).signals().is_empty());
    }

    #[test]
    fn dangerous_overrides_are_weak_integrity_signals() {
        let props = snapshot(&[
            ("ro.build.tags", "test-keys"),
            ("ro.debuggable", "1"),
            ("ro.secure", "0"),
        ]);
        let observation = evaluate(&props);
        let fired: Vec<_> = observation.signals().iter().map(RawSignal::name).collect();
        assert_eq!(
            fired,
            vec![names::TEST_KEYS_BUILD, names::DEBUGGABLE_BUILD, names::INSECURE_BUILD]
        );
        assert!(observation
            .signals()
            .iter()
            .all(|signal| !signal.is_strong() && signal.category() == SignalCategory::Integrity));
    }

    #[test]
    fn qemu_kernel_is_strong_and_hardware_is_weak() {
        let props = snapshot(&[("ro.kernel.qemu", "1"), ("ro.hardware", "ranchu")]);
        let observation = evaluate(&props);
        assert_eq!(observation.signals().len(), 2);
        assert!(observation.signals()[0].is_strong());
        assert!(!observation.signals()[1].is_strong());
        assert_eq!(observation.signals()[1].evidence(), ["ro.hardware=ranchu"]);
        assert_eq!(observation.signals()[1].subject(), Some(subjects::HARDWARE));
    }
}
