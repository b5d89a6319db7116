// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Checks that `getpid` still resolves into the system C library. A hook
//! installed by rewriting the import table or PLT shows up as a foreign image.

use super::ProbeContext;
use crate::config::Environment;
use crate::signal::{names, Observation, ProbeError, ProbeFamily, RawSignal, SignalCategory, Strength};

/// Where the system C library may live: the image must sit under one of
/// `dirs` and its file name must start with one of `names`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowList {
    pub dirs: &'static [&'static str],
    pub names: &'static [&'static str],
}

const ANDROID_ALLOW: AllowList = AllowList {
    dirs: &["/system/lib/", "/system/lib64/", "/apex/"],
    names: &["libc.so"],
};

const LINUX_ALLOW: AllowList = AllowList {
    dirs: &["/lib/", "/lib64/", "/usr/lib/", "/usr/lib64/"],
    names: &["libc.so", "libc-", "ld-musl-"],
};

const APPLE_ALLOW: AllowList = AllowList {
    dirs: &["/usr/lib/system/"],
    names: &["libsystem_kernel.dylib", "libsystem_c.dylib"],
};

pub fn allow_list(environment: Environment) -> AllowList {
    match environment {
        Environment::Android => ANDROID_ALLOW,
        Environment::Ios => APPLE_ALLOW,
        Environment::Linux | Environment::Unsupported => LINUX_ALLOW,
    }
}

/// An unresolved symbol is treated the same as a foreign image.
pub fn is_expected_location(image: Option<&str>, allow: AllowList) -> bool {
    let Some(path) = image else {
        return false;
    };
    let (dir, file_name) = match path.rsplit_once('/') {
        Some((dir, file_name)) => (&path[..=dir.len()], file_name),
        None => return false,
    };
    allow.dirs.iter().any(|prefix| dir.starts_with(prefix))
        && allow.names.iter().any(|name| file_name.starts_with(name))
}

/// Path of the image owning the `getpid` the process would call.
#[cfg(unix)]
pub fn resolve_getpid_image() -> Option<String> {
    use std::ffi::CStr;
    use std::mem::MaybeUninit;

    let address = libc::getpid as *const libc::c_void;
    let mut info = MaybeUninit::<libc::Dl_info>::zeroed();
    // SAFETY: `info` is a valid out-pointer; dladdr only writes to it.
    let found = unsafe { libc::dladdr(address, info.as_mut_ptr()) };
    if found == 0 {
        return None;
    }
    // SAFETY: dladdr returned non-zero, so `info` is initialised.
    let info = unsafe { info.assume_init() };
    if info.dli_fname.is_null() {
        return None;
    }
    // SAFETY: dli_fname points at a NUL-terminated string owned by the loader.
    let name = unsafe { CStr::from_ptr(info.dli_fname) };
    Some(name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
pub fn resolve_getpid_image() -> Option<String> {
    None
}

pub fn symbol_resolution(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    if !cfg!(unix) {
        return Err(ProbeError::Unavailable("dladdr"));
    }

    let image = resolve_getpid_image();
    let unexpected = !is_expected_location(image.as_deref(), allow_list(ctx.environment()));

    let mut observation = Observation::new();
    observation.fact("libcGetpidSo", image.clone().unwrap_or_default());
    observation.fact("libcGetpidUnexpected", unexpected);
    if unexpected {
        observation.push(
            RawSignal::flag(
                names::SYMBOL_UNEXPECTED,
                SignalCategory::Instrumentation,
                ProbeFamily::SymbolResolution,
                Strength::Strong,
            )
            .with_evidence([image.unwrap_or_else(|| "unresolved".to_string())]),
        );
    }
    Ok(observation)
}
