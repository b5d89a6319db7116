// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

use device_trust::probes::{properties, trace, virtualization, ProbeFn};
use device_trust::signal::names;
use device_trust::{
    BuildIdentifiers, Capabilities, EngineConfig, Environment, HostFacts, Observation,
    ProbeContext, ProbeDescriptor, ProbeError, ProbeFamily, ProbeRegistry, RawSignal,
    SignalCategory, Strength, TrustEngine, TrustReport,
};
use serde_json::json;

const EVERY_CATEGORY: &[SignalCategory] = &[
    SignalCategory::Integrity,
    SignalCategory::Virtualization,
    SignalCategory::Instrumentation,
    SignalCategory::Debugger,
    SignalCategory::AuxiliaryMode,
];

fn quiet(_ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    Ok(Observation::new())
}

fn traced(_ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    Ok(trace::evaluate_tracer(4242))
}

fn frida_port(_ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    Ok(Observation::new().with_signal(
        RawSignal::flag(
            names::INSTRUMENTATION_PORT_OPEN,
            SignalCategory::Instrumentation,
            ProbeFamily::LoopbackPorts,
            Strength::Weak,
        )
        .with_evidence(["127.0.0.1:27042"]),
    ))
}

fn xposed_module(_ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    Ok(Observation::new().with_signal(
        RawSignal::flag(
            names::SUSPICIOUS_MODULE_LOADED,
            SignalCategory::Instrumentation,
            ProbeFamily::LoadedModules,
            Strength::Weak,
        )
        .with_evidence(["libxposed_art.so"]),
    ))
}

fn emulator_build(_ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let mut observation = Observation::new();
    for check in ["BUILD_MODEL_CHECK", "BUILD_HARDWARE_CHECK"] {
        observation.push(
            RawSignal::flag(
                names::EMULATOR_BUILD_IDENTIFIER,
                SignalCategory::Virtualization,
                ProbeFamily::BuildIdentifiers,
                Strength::Weak,
            )
            .with_evidence([check]),
        );
    }
    Ok(observation)
}

fn one_weak_emulator_hint(_ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    Ok(Observation::new().with_signal(RawSignal::flag(
        names::EMULATOR_CPU_MODEL,
        SignalCategory::Virtualization,
        ProbeFamily::CpuInfo,
        Strength::Weak,
    )))
}

fn ranchu_property(_ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let snapshot = [("ro.hardware".to_string(), "ranchu".to_string())]
        .into_iter()
        .collect();
    Ok(properties::evaluate(&snapshot))
}

fn unavailable(_ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    Err(ProbeError::Unavailable("test facility"))
}

fn probe(name: &'static str, family: ProbeFamily, run: ProbeFn) -> ProbeDescriptor {
    ProbeDescriptor {
        name,
        family,
        feeds: EVERY_CATEGORY,
        requires_native: false,
        run,
    }
}

fn native_probe(name: &'static str, family: ProbeFamily, run: ProbeFn) -> ProbeDescriptor {
    ProbeDescriptor {
        requires_native: true,
        ..probe(name, family, run)
    }
}

fn engine(environment: Environment, descriptors: Vec<ProbeDescriptor>) -> TrustEngine {
    TrustEngine::new(EngineConfig::default())
        .with_capabilities(Capabilities::new(environment))
        .with_registry(ProbeRegistry::new(descriptors))
}

fn flags(engine: &TrustEngine) -> [bool; 6] {
    classification(&engine.collect())
}

fn classification(report: &TrustReport) -> [bool; 6] {
    [
        report.integrity_compromised(),
        report.virtualized(),
        report.instrumentation_suspected(),
        report.debugger_attached(),
        report.developer_mode_enabled(),
        report.usb_debugging_enabled(),
    ]
}

#[test_log::test]
fn nothing_fires_gives_an_empty_report() {
    let report = engine(Environment::Android, Vec::new()).collect();
    assert_eq!(
        serde_json::to_value(&report).expect("serializes"),
        json!({
            "integrityCompromised": false,
            "virtualized": false,
            "instrumentationSuspected": false,
            "debuggerAttached": false,
            "developerModeEnabled": false,
            "usbDebuggingEnabled": false,
            "details": {},
        })
    );
}

#[test_log::test]
fn quiet_probes_only_leave_timings() {
    let report = engine(
        Environment::Android,
        vec![
            probe("quiet-a", ProbeFamily::CpuInfo, quiet),
            probe("quiet-b", ProbeFamily::TraceFlag, quiet),
        ],
    )
    .collect();
    let keys: Vec<&str> = report.details().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["totalTimeMs"]);
}

#[test_log::test]
fn tracer_alone_only_sets_debugger() {
    let engine = engine(
        Environment::Android,
        vec![probe("trace", ProbeFamily::TraceFlag, traced)],
    );
    assert_eq!(flags(&engine), [false, false, false, true, false, false]);
    assert_eq!(engine.collect().detail("tracerPid"), Some(&json!(4242)));
}

#[test_log::test]
fn one_root_package_compromises_integrity() {
    let engine = TrustEngine::new(EngineConfig::default())
        .with_capabilities(Capabilities::new(Environment::Android))
        .with_host_facts(HostFacts {
            installed_packages: vec![
                "com.android.chrome".to_string(),
                "com.topjohnwu.magisk".to_string(),
            ],
            ..HostFacts::default()
        })
        .with_registry(ProbeRegistry::new(vec![probe(
            "root-packages",
            ProbeFamily::RootPackages,
            device_trust::probes::filesystem::root_packages,
        )]));

    let report = engine.collect();
    assert!(report.integrity_compromised());
    assert!(!report.virtualized());
    assert_eq!(report.detail("rootPackages"), Some(&json!(["com.topjohnwu.magisk"])));
}

#[test_log::test]
fn port_and_module_are_two_families() {
    let engine = engine(
        Environment::Android,
        vec![
            probe("ports", ProbeFamily::LoopbackPorts, frida_port),
            probe("modules", ProbeFamily::LoadedModules, xposed_module),
        ],
    );
    let report = engine.collect();
    assert!(report.instrumentation_suspected());
    assert_eq!(report.detail("instrumentation").map(|v| &v["familyCount"]), Some(&json!(2)));
}

#[test_log::test]
fn port_alone_is_below_threshold() {
    let engine = engine(
        Environment::Android,
        vec![probe("ports", ProbeFamily::LoopbackPorts, frida_port)],
    );
    let report = engine.collect();
    assert!(!report.instrumentation_suspected());
    assert_eq!(
        report.detail("instrumentation").map(|v| &v["positive"]),
        Some(&json!(false))
    );
}

#[test_log::test]
fn native_unavailable_still_produces_a_full_report() {
    let engine = TrustEngine::new(EngineConfig::default())
        .with_capabilities(Capabilities::without_native_scanning(
            Environment::Android,
            "linker namespace denied",
        ))
        .with_registry(ProbeRegistry::new(vec![
            native_probe("modules", ProbeFamily::LoadedModules, xposed_module),
            probe("ports", ProbeFamily::LoopbackPorts, frida_port),
            probe("trace", ProbeFamily::TraceFlag, traced),
        ]));

    let report = engine.collect();
    assert_eq!(
        report.detail("nativeUnavailable"),
        Some(&json!("linker namespace denied"))
    );
    assert!(report.debugger_attached());
    // Ports and the trace flag are still two families.
    assert!(report.instrumentation_suspected());
    assert!(report.detail("loadedModulesError").is_none());
}

#[test_log::test]
fn one_weak_virtualization_hint_is_not_enough() {
    let one = engine(
        Environment::Android,
        vec![probe("cpu", ProbeFamily::CpuInfo, one_weak_emulator_hint)],
    );
    assert!(!one.collect().virtualized());

    let two = engine(
        Environment::Android,
        vec![probe("build", ProbeFamily::BuildIdentifiers, emulator_build)],
    );
    assert!(two.collect().virtualized());
}

#[test_log::test]
fn one_hardware_name_seen_twice_is_one_hint() {
    let engine = TrustEngine::new(EngineConfig::default())
        .with_capabilities(Capabilities::new(Environment::Android))
        .with_host_facts(HostFacts {
            build: BuildIdentifiers {
                hardware: "ranchu".to_string(),
                ..BuildIdentifiers::default()
            },
            ..HostFacts::default()
        })
        .with_registry(ProbeRegistry::new(vec![
            probe("properties", ProbeFamily::SystemProperties, ranchu_property),
            probe(
                "build",
                ProbeFamily::BuildIdentifiers,
                virtualization::build_identifiers,
            ),
        ]));

    let report = engine.collect();
    assert!(!report.virtualized());
    let summary = report.detail("virtualization").expect("virtualization entry");
    assert_eq!(summary["weakCount"], json!(2));
    assert_eq!(summary["weakIndicators"], json!(1));
}

#[test_log::test]
fn weak_instrumentation_is_suppressed_on_emulators() {
    let engine = engine(
        Environment::Android,
        vec![
            probe("build", ProbeFamily::BuildIdentifiers, emulator_build),
            probe("ports", ProbeFamily::LoopbackPorts, frida_port),
            probe("modules", ProbeFamily::LoadedModules, xposed_module),
        ],
    );
    let report = engine.collect();
    assert!(report.virtualized());
    assert!(!report.instrumentation_suspected());
    assert_eq!(report.detail("suppressed"), Some(&json!(["instrumentation"])));
}

#[test_log::test]
fn failures_are_recorded_and_fail_soft() {
    let engine = engine(
        Environment::Ios,
        vec![
            probe("symbol", ProbeFamily::SymbolResolution, unavailable),
            probe("ports", ProbeFamily::LoopbackPorts, frida_port),
        ],
    );
    let report = engine.collect();
    assert!(!report.instrumentation_suspected());
    assert_eq!(
        report.detail("symbolResolutionError"),
        Some(&json!("test facility is not available in this environment"))
    );
}

#[test_log::test]
fn malformed_host_payload_is_a_host_facts_failure() {
    let report = engine(Environment::Android, Vec::new())
        .with_host_payload("[1, 2")
        .collect();
    assert!(report
        .detail("hostFactsError")
        .and_then(|value| value.as_str())
        .is_some_and(|message| message.starts_with("malformed host facts payload")));
}

#[test_log::test]
fn repeated_passes_agree() {
    let engine = engine(
        Environment::Android,
        vec![
            probe("trace", ProbeFamily::TraceFlag, traced),
            probe("ports", ProbeFamily::LoopbackPorts, frida_port),
            probe("build", ProbeFamily::BuildIdentifiers, emulator_build),
        ],
    );
    assert_eq!(flags(&engine), flags(&engine));
}

#[cfg(target_os = "linux")]
#[test_log::test]
fn real_linux_registry_agrees_across_passes() {
    let engine = TrustEngine::new(EngineConfig::default())
        .with_capabilities(Capabilities::new(Environment::Linux))
        .with_registry(ProbeRegistry::for_environment(Environment::Linux));

    let keys = |report: &TrustReport| report.details().keys().cloned().collect::<Vec<_>>();
    let first = engine.collect();
    let second = engine.collect();
    assert_eq!(classification(&first), classification(&second));
    assert_eq!(keys(&first), keys(&second));
    assert_eq!(first.detail("libcGetpidSo"), second.detail("libcGetpidSo"));
}
