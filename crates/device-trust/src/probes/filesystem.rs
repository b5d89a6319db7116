// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Filesystem and process probes for root / jailbreak artifacts.

use super::{bounded, ProbeContext};
use crate::config::Environment;
use crate::signal::{names, Observation, ProbeError, ProbeFamily, RawSignal, SignalCategory, Strength};
use log::debug;
use ring::rand::{SecureRandom, SystemRandom};
use std::fs;
use std::io;

/// Android root artifacts: su binaries, Magisk, hook frameworks, Frida server.
const ANDROID_ROOT_ARTIFACTS: &[&str] = &[
    "/system/bin/su",
    "/system/xbin/su",
    "/sbin/su",
    "/su/bin/su",
    "/data/local/su",
    "/data/local/bin/su",
    "/data/local/xbin/su",
    "/system/bin/.ext/su",
    "/system/bin/failsafe/su",
    "/system/sd/xbin/su",
    "/system/usr/we-need-root/su",
    "/cache/su",
    "/data/su",
    "/dev/su",
    "/product/bin/su",
    "/system_ext/bin/su",
    "/vendor/bin/su",
    "/data/adb/magisk",
    "/sbin/.magisk",
    "/sbin/magisk",
    "/system/bin/magisk",
    "/cache/magisk.log",
    "/data/adb/modules/lsposed",
    "/data/adb/modules/edxposed",
    "/data/adb/modules/riru_lsposed",
    "/system/framework/XposedBridge.jar",
    "/system/lib/libxposed_art.so",
    "/system/lib64/libxposed_art.so",
    "/system/lib/libsubstrate.so",
    "/system/lib64/libsubstrate.so",
    "/data/local/tmp/frida-server",
    "/data/local/tmp/re.frida.server",
    "/system/xbin/frida-server",
];

const IOS_JAILBREAK_ARTIFACTS: &[&str] = &[
    "/Applications/Cydia.app",
    "/Applications/Sileo.app",
    "/Applications/Zebra.app",
    "/Library/MobileSubstrate/MobileSubstrate.dylib",
    "/usr/lib/libsubstitute.dylib",
    "/var/jb",
    "/bin/bash",
    "/usr/sbin/sshd",
    "/usr/bin/ssh",
    "/etc/apt",
    "/private/var/lib/apt/",
    "/private/var/stash",
];

/// Root management app packages.
const ROOT_PACKAGES: &[&str] = &[
    "com.noshufou.android.su",
    "com.noshufou.android.su.elite",
    "eu.chainfire.supersu",
    "com.koushikdutta.superuser",
    "com.thirdparty.superuser",
    "com.yellowes.su",
    "com.topjohnwu.magisk",
    "com.topjohnwu.magisk.debug",
    "io.github.huskydg.magisk",
    "me.weishu.kernelsu",
    "com.kingroot.kinguser",
    "com.kingo.root",
    "com.smedialink.oneclickroot",
    "com.zhiqupk.root.global",
    "com.alephzain.framaroot",
];

const JAILBREAK_URL_SCHEMES: &[&str] = &["cydia", "sileo", "zbra", "filza", "undecimus"];

/// Returns the listed paths present beneath the configured root, stopping at `cap`.
pub fn find_present(ctx: &ProbeContext<'_>, paths: &[&str], cap: usize) -> Vec<String> {
    let mut found = Vec::new();
    for path in paths {
        if found.len() >= cap {
            break;
        }
        // Permission errors count as absent.
        if fs::symlink_metadata(ctx.config.resolve(path)).is_ok() {
            found.push((*path).to_string());
        }
    }
    found
}

fn artifact_signal_name(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.contains("frida") {
        names::FRIDA_SERVER_ARTIFACT
    } else if lower.contains("magisk") {
        names::MAGISK_ARTIFACT
    } else if lower.contains("xposed") || lower.contains("substrate") {
        names::HOOK_FRAMEWORK_ARTIFACT
    } else {
        names::SU_BINARY
    }
}

fn artifact_observation(found: Vec<String>, name_for: impl Fn(&str) -> &'static str) -> Observation {
    let mut observation = Observation::new();
    for path in &found {
        observation.push(
            RawSignal::flag(
                name_for(path),
                SignalCategory::Integrity,
                ProbeFamily::FilesystemArtifacts,
                Strength::Strong,
            )
            .with_evidence([path.as_str()]),
        );
    }
    if !found.is_empty() {
        observation.fact("rootArtifacts", found);
    }
    observation
}

pub fn root_artifacts(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let found = find_present(ctx, ANDROID_ROOT_ARTIFACTS, ctx.config.artifact_cap);
    Ok(artifact_observation(found, artifact_signal_name))
}

pub fn jailbreak_artifacts(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let found = find_present(ctx, IOS_JAILBREAK_ARTIFACTS, ctx.config.artifact_cap);
    Ok(artifact_observation(found, |_| names::JAILBREAK_ARTIFACT))
}

/// Matches host-reported package identifiers against known root tooling.
pub fn root_packages(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let matched: Vec<String> = ctx
        .host
        .installed_packages
        .iter()
        .map(|package| package.trim())
        .filter(|package| ROOT_PACKAGES.contains(package))
        .take(ctx.config.package_cap)
        .map(str::to_string)
        .collect();

    let mut observation = Observation::new();
    for package in &matched {
        observation.push(
            RawSignal::flag(
                names::ROOT_PACKAGE,
                SignalCategory::Integrity,
                ProbeFamily::RootPackages,
                Strength::Strong,
            )
            .with_evidence([package.as_str()]),
        );
    }
    if !matched.is_empty() {
        observation.fact("rootPackages", matched);
    }
    Ok(observation)
}

/// Jailbreak store / file-manager URL schemes the host could open.
pub fn url_schemes(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let mut observation = Observation::new();
    for scheme in &ctx.host.openable_url_schemes {
        let normalized = scheme
            .trim()
            .trim_end_matches("://")
            .trim_end_matches(':')
            .to_ascii_lowercase();
        if JAILBREAK_URL_SCHEMES.contains(&normalized.as_str()) {
            observation.push(
                RawSignal::flag(
                    names::JAILBREAK_URL_SCHEME,
                    SignalCategory::Integrity,
                    ProbeFamily::UrlSchemes,
                    Strength::Strong,
                )
                .with_evidence([format!("{}://", normalized)]),
            );
        }
    }
    Ok(observation)
}

fn sandbox_probe_dir(environment: Environment) -> Option<&'static str> {
    match environment {
        Environment::Android => Some("/system"),
        Environment::Ios => Some("/private"),
        Environment::Linux | Environment::Unsupported => None,
    }
}

/// Tries to write outside the application sandbox. The file is always removed
/// afterwards; cleanup failures are ignored.
pub fn sandbox_escape(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let dir = sandbox_probe_dir(ctx.environment())
        .ok_or(ProbeError::Unavailable("sandbox boundary"))?;

    let mut nonce = [0u8; 8];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| ProbeError::Unavailable("secure random source"))?;
    let file_name = format!(".device-trust-{:016x}", u64::from_ne_bytes(nonce));
    let target = ctx.config.resolve(dir).join(file_name);

    let written = fs::write(&target, b"device-trust");
    let _ = fs::remove_file(&target);

    let mut observation = Observation::new();
    match written {
        Ok(()) => observation.push(
            RawSignal::flag(
                names::SANDBOX_ESCAPE,
                SignalCategory::Integrity,
                ProbeFamily::SandboxWrite,
                Strength::Strong,
            )
            .with_evidence([dir]),
        ),
        Err(err) => debug!("sandbox write to {} refused: {}", target.display(), err),
    }
    Ok(observation)
}

/// `which su` succeeding with a path means su is on the PATH.
pub fn privileged_command(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let output = match bounded::command("which", &["su"], ctx.config.command_timeout) {
        Ok(output) => output,
        Err(ProbeError::Unavailable(_)) => None,
        Err(err) => return Err(err),
    };

    let mut observation = Observation::new();
    if let Some(resolved) = output.map(|out| out.trim().to_string()) {
        if !resolved.is_empty() {
            observation.push(
                RawSignal::flag(
                    names::SU_COMMAND,
                    SignalCategory::Integrity,
                    ProbeFamily::PrivilegedCommand,
                    Strength::Strong,
                )
                .with_evidence([resolved]),
            );
        }
    }
    Ok(observation)
}

pub fn selinux_status(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let path = ctx.config.resolve("/sys/fs/selinux/enforce");
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Observation::new()),
        Err(err) => return Err(ProbeError::io(path, err)),
    };

    let mut observation = Observation::new();
    if content.trim() == "0" {
        observation.push(
            RawSignal::flag(
                names::SELINUX_PERMISSIVE,
                SignalCategory::Integrity,
                ProbeFamily::SelinuxStatus,
                Strength::Weak,
            )
            .with_evidence(["enforce=0"]),
        );
    }
    Ok(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Capabilities, EngineConfig, HostFacts};
    use rstest::rstest;
    use std::path::Path;
    use tempfile::TempDir;

    fn touch(root: &Path, absolute: &str) {
        let path = root.join(absolute.trim_start_matches('/'));
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, b"").expect("touch");
    }

    fn config_for(root: &TempDir) -> EngineConfig {
        EngineConfig {
            fs_root: root.path().to_path_buf(),
            ..EngineConfig::default()
        }
    }

    #[rstest]
    #[case("/system/xbin/su", names::SU_BINARY)]
    #[case("/data/adb/magisk", names::MAGISK_ARTIFACT)]
    #[case("/system/framework/XposedBridge.jar", names::HOOK_FRAMEWORK_ARTIFACT)]
    #[case("/data/local/tmp/frida-server", names::FRIDA_SERVER_ARTIFACT)]
    fn artifacts_are_named_by_tooling(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(artifact_signal_name(path), expected);
    }

    #[test]
    fn root_artifacts_stop_at_cap() {
        let root = TempDir::new().expect("tempdir");
        for path in ANDROID_ROOT_ARTIFACTS.iter().take(8) {
            touch(root.path(), path);
        }
        let config = config_for(&root);
        let capabilities = Capabilities::new(Environment::Android);
        let host = HostFacts::default();
        let ctx = ProbeContext {
            config: &config,
            capabilities: &capabilities,
            host: &host,
        };

        let observation = root_artifacts(&ctx).expect("probe");
        assert_eq!(observation.signals().len(), 5);
        assert!(observation
            .signals()
            .iter()
            .all(|signal| signal.is_strong() && signal.category() == SignalCategory::Integrity));
    }

    #[test]
    fn clean_root_produces_nothing() {
        let root = TempDir::new().expect("tempdir");
        let config = config_for(&root);
        let capabilities = Capabilities::new(Environment::Android);
        let host = HostFacts::default();
        let ctx = ProbeContext {
            config: &config,
            capabilities: &capabilities,
            host: &host,
        };

        assert!(root_artifacts(&ctx).expect("probe").is_empty());
        assert!(selinux_status(&ctx).expect("probe").is_empty());
    }

    #[test]
    fn root_packages_match_known_tooling_only() {
        let config = EngineConfig::default();
        let capabilities = Capabilities::new(Environment::Android);
        let host = HostFacts {
            installed_packages: vec![
                "com.example.notes".to_string(),
                "com.topjohnwu.magisk".to_string(),
            ],
            ..HostFacts::default()
        };
        let ctx = ProbeContext {
            config: &config,
            capabilities: &capabilities,
            host: &host,
        };

        let observation = root_packages(&ctx).expect("probe");
        assert_eq!(observation.signals().len(), 1);
        assert_eq!(observation.signals()[0].evidence(), ["com.topjohnwu.magisk"]);
    }

    #[test]
    fn url_schemes_are_normalized() {
        let config = EngineConfig::default();
        let capabilities = Capabilities::new(Environment::Ios);
        let host = HostFacts {
            openable_url_schemes: vec!["Cydia://".to_string(), "https://".to_string()],
            ..HostFacts::default()
        };
        let ctx = ProbeContext {
            config: &config,
            capabilities: &capabilities,
            host: &host,
        };

        let observation = url_schemes(&ctx).expect("probe");
        assert_eq!(observation.signals().len(), 1);
        assert_eq!(observation.signals()[0].evidence(), ["cydia://"]);
    }

    #[test]
    fn sandbox_write_is_detected_and_cleaned_up() {
        let root = TempDir::new().expect("tempdir");
        fs::create_dir_all(root.path().join("private")).expect("mkdir");
        let config = config_for(&root);
        let capabilities = Capabilities::new(Environment::Ios);
        let host = HostFacts::default();
        let ctx = ProbeContext {
            config: &config,
            capabilities: &capabilities,
            host: &host,
        };

        let observation = sandbox_escape(&ctx).expect("probe");
        assert_eq!(observation.signals()[0].name(), names::SANDBOX_ESCAPE);
        let leftovers = fs::read_dir(root.path().join("private")).expect("readdir").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn refused_sandbox_write_is_negative() {
        let root = TempDir::new().expect("tempdir");
        let config = config_for(&root);
        let capabilities = Capabilities::new(Environment::Android);
        let host = HostFacts::default();
        let ctx = ProbeContext {
            config: &config,
            capabilities: &capabilities,
            host: &host,
        };

        // No /system directory under the fake root: the write fails.
        assert!(sandbox_escape(&ctx).expect("probe").signals().is_empty());
    }

    #[test]
    fn permissive_selinux_is_a_weak_signal() {
        let root = TempDir::new().expect("tempdir");
        let enforce = root.path().join("sys/fs/selinux/enforce");
        fs::create_dir_all(enforce.parent().expect("parent")).expect("mkdir");
        fs::write(&enforce, "0\n").expect("write");
        let config = config_for(&root);
        let capabilities = Capabilities::new(Environment::Android);
        let host = HostFacts::default();
        let ctx = ProbeContext {
            config: &config,
            capabilities: &capabilities,
            host: &host,
        };

        let observation = selinux_status(&ctx).expect("probe");
        assert_eq!(observation.signals()[0].strength(), Strength::Weak);
    }
}
