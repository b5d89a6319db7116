// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Native entry points: JNI for the Android host, a C ABI for iOS.
//!
//! Both return the report as JSON. A pass that fails at the boundary never
//! yields a report: JNI throws and returns null, the C ABI returns null.

use crate::boundary::{BoundaryError, CallBoundary};
use crate::config::EngineConfig;
use crate::engine::{is_supported, TrustEngine};
use jni::objects::{JClass, JString};
use jni::sys::{jboolean, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use log::warn;
use std::ffi::{c_char, CStr, CString};

#[cfg(target_os = "android")]
use android_logger::Config;
#[cfg(target_os = "android")]
use log::LevelFilter;

const TIMEOUT_EXCEPTION: &str = "java/util/concurrent/TimeoutException";
const STATE_EXCEPTION: &str = "java/lang/IllegalStateException";

/// One bounded pass of `engine` with the host payload applied.
pub fn collect_json_with(
    engine: TrustEngine,
    host_payload: Option<&str>,
) -> Result<String, BoundaryError> {
    let engine = match host_payload {
        Some(payload) => engine.with_host_payload(payload),
        None => engine,
    };
    CallBoundary::new(engine).invoke_json()
}

/// One bounded pass with `DEVICE_TRUST_*` configuration and the host payload.
pub fn collect_json(host_payload: Option<&str>) -> Result<String, BoundaryError> {
    collect_json_with(TrustEngine::new(EngineConfig::from_env()), host_payload)
}

/// Java exception class a boundary failure is thrown as.
fn exception_class(err: &BoundaryError) -> &'static str {
    match err {
        BoundaryError::Timeout { .. } => TIMEOUT_EXCEPTION,
        _ => STATE_EXCEPTION,
    }
}

/// Owned C string for the caller, or null when there is no report.
fn into_c_json(result: Result<String, BoundaryError>) -> *mut c_char {
    let json = match result {
        Ok(json) => json,
        Err(err) => {
            warn!("no report for C caller: {}", err);
            return std::ptr::null_mut();
        }
    };
    match CString::new(json) {
        Ok(json) => json.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Initialize logging for Android
#[cfg(target_os = "android")]
#[no_mangle]
pub extern "C" fn Java_com_devicetrust_DeviceTrustNative_nativeInit(_env: JNIEnv, _class: JClass) {
    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Info)
            .with_tag("DeviceTrust"),
    );
}

#[cfg(not(target_os = "android"))]
#[no_mangle]
pub extern "C" fn Java_com_devicetrust_DeviceTrustNative_nativeInit(_env: JNIEnv, _class: JClass) {
    // No-op for non-Android platforms
}

/// Collect signals - JNI entry point
///
/// `host_payload` is the host facts JSON and may be null.
#[no_mangle]
pub extern "C" fn Java_com_devicetrust_DeviceTrustNative_collectNativeSignals(
    mut env: JNIEnv,
    _class: JClass,
    host_payload: JString,
) -> jstring {
    let payload: Option<String> = if host_payload.is_null() {
        None
    } else {
        match env.get_string(&host_payload) {
            Ok(java_str) => Some(java_str.to_string_lossy().to_string()),
            Err(_) => None,
        }
    };

    let json = match collect_json(payload.as_deref()) {
        Ok(json) => json,
        Err(err) => {
            warn!("collectNativeSignals failed: {}", err);
            let _ = env.throw_new(exception_class(&err), err.to_string());
            return std::ptr::null_mut();
        }
    };
    match env.new_string(&json) {
        Ok(jstr) => jstr.into_raw(),
        // The failed allocation leaves a pending exception for the caller.
        Err(_) => std::ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn Java_com_devicetrust_DeviceTrustNative_isSupported(
    _env: JNIEnv,
    _class: JClass,
) -> jboolean {
    if is_supported() {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

/// Returns the report JSON, or null when the pass timed out or otherwise
/// failed at the boundary. Release it with [`dtn_string_free`].
///
/// # Safety
///
/// `host_payload` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn dtn_collect_native_signals_json(host_payload: *const c_char) -> *mut c_char {
    let payload = if host_payload.is_null() {
        None
    } else {
        Some(CStr::from_ptr(host_payload).to_string_lossy().into_owned())
    };

    into_c_json(collect_json(payload.as_deref()))
}

/// # Safety
///
/// `value` must be null or a pointer returned by
/// [`dtn_collect_native_signals_json`] that has not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn dtn_string_free(value: *mut c_char) {
    if !value.is_null() {
        drop(CString::from_raw(value));
    }
}

#[no_mangle]
pub extern "C" fn dtn_is_supported() -> bool {
    is_supported()
}
