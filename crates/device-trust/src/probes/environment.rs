// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Process environment: loader injection variables and developer settings.

use super::{bounded, ProbeContext};
use crate::config::{Environment, HostFacts};
use crate::signal::{names, Observation, ProbeError, ProbeFamily, RawSignal, SignalCategory, Strength};
use log::{debug, warn};

fn injection_variables(environment: Environment) -> &'static [&'static str] {
    match environment {
        Environment::Ios => &["DYLD_INSERT_LIBRARIES"],
        Environment::Android | Environment::Linux | Environment::Unsupported => &["LD_PRELOAD"],
    }
}

/// Variables from `variables` that `lookup` reports as set and non-empty.
pub fn injection_signals<F>(lookup: F, variables: &[&'static str]) -> Observation
where
    F: Fn(&str) -> Option<String>,
{
    let set: Vec<&'static str> = variables
        .iter()
        .copied()
        .filter(|name| lookup(*name).is_some_and(|value| !value.trim().is_empty()))
        .collect();

    let mut observation = Observation::new();
    for name in &set {
        observation.push(
            RawSignal::flag(
                names::INJECTION_VARIABLE_SET,
                SignalCategory::Instrumentation,
                ProbeFamily::InjectionEnv,
                Strength::Weak,
            )
            .with_evidence([*name]),
        );
    }
    if !set.is_empty() {
        observation.fact("injectionEnv", set);
    }
    observation
}

pub fn injection_env(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    Ok(injection_signals(
        |name| std::env::var(name).ok(),
        injection_variables(ctx.environment()),
    ))
}

/// `settings get global <key>`; a missing `settings` binary or a non-zero
/// exit reads as "not enabled".
fn global_setting(ctx: &ProbeContext<'_>, key: &str) -> Result<bool, ProbeError> {
    match bounded::command("settings", &["get", "global", key], ctx.config.command_timeout) {
        Ok(output) => Ok(output.is_some_and(|value| value.trim() == "1")),
        Err(ProbeError::Unavailable(program)) => {
            debug!("{} unavailable, relying on host flags", program);
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Combines the host-reported switches with the system settings.
pub fn evaluate_developer_settings(developer_mode: bool, usb_debugging: bool) -> Observation {
    let mut observation = Observation::new();
    if developer_mode {
        observation.push(RawSignal::flag(
            names::DEVELOPER_MODE,
            SignalCategory::AuxiliaryMode,
            ProbeFamily::DeveloperSettings,
            Strength::Strong,
        ));
    }
    if usb_debugging {
        observation.push(RawSignal::flag(
            names::USB_DEBUGGING,
            SignalCategory::AuxiliaryMode,
            ProbeFamily::DeveloperSettings,
            Strength::Strong,
        ));
    }
    observation
}

/// Host flags OR-ed with `query` for each switch the host did not already
/// report as on. A failed query reads as off; the first failure is kept as the
/// `settingsQueryError` fact.
pub fn read_developer_settings<Q>(host: &HostFacts, mut query: Q) -> Observation
where
    Q: FnMut(&str) -> Result<bool, ProbeError>,
{
    let mut failure: Option<ProbeError> = None;
    let mut switch = |key: &str| match query(key) {
        Ok(enabled) => enabled,
        Err(err) => {
            warn!("settings query for {} failed: {}", key, err);
            failure.get_or_insert(err);
            false
        }
    };
    let developer_mode =
        host.developer_mode == Some(true) || switch("development_settings_enabled");
    let usb_debugging = host.adb_enabled == Some(true) || switch("adb_enabled");

    let mut observation = evaluate_developer_settings(developer_mode, usb_debugging);
    if let Some(err) = failure {
        observation.fact("settingsQueryError", err.to_string());
    }
    observation
}

pub fn developer_settings(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    if !ctx.environment().has_developer_settings() {
        return Err(ProbeError::Unavailable("developer settings"));
    }
    Ok(read_developer_settings(ctx.host, |key| global_setting(ctx, key)))
}
