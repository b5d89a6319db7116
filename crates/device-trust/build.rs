// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

// Build script for the device trust engine.
// Links liblog when cross-compiling for Android; build scripts run on the host,
// so the target is read from cargo's environment instead of cfg attributes.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("android") {
        println!("cargo:rustc-link-lib=log");
    }
}
