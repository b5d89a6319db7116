// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Device Trust - native environment assessment
//!
//! Collects many cheap, independent observations about the running process
//! and its device (root / jailbreak artifacts, emulator markers, hooking
//! frameworks, debuggers, developer switches) and classifies them into a
//! small set of stable booleans plus a diagnostic detail bag.
//!
//! The result is a heuristic, not an attestation: it classifies and never
//! enforces.
//!
//! ```no_run
//! let report = device_trust::collect();
//! if report.instrumentation_suspected() {
//!     println!("{:?}", report.details());
//! }
//! ```

pub mod aggregate;
pub mod boundary;
pub mod config;
pub mod engine;
pub mod ffi;
pub mod probes;
pub mod report;
pub mod signal;

pub use aggregate::{Aggregator, Decisions, Thresholds};
pub use boundary::{BoundaryError, CallBoundary};
pub use config::{BuildIdentifiers, Capabilities, EngineConfig, Environment, HostFacts};
pub use engine::{collect, is_supported, SupportError, TrustEngine};
pub use probes::{ProbeContext, ProbeDescriptor, ProbeOutcome, ProbeRegistry, ProbeRun};
pub use report::{Details, Normalizer, TrustReport};
pub use signal::{Observation, ProbeError, ProbeFamily, RawSignal, SignalCategory, SignalValue, Strength};
