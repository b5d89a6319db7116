// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Loaded image enumeration through the dynamic loader's own table.

use super::memory::{is_frida_keyword, suspicious_keyword};
use super::ProbeContext;
use crate::signal::{names, Observation, ProbeError, ProbeFamily, RawSignal, SignalCategory, Strength};
use std::path::Path;

/// Upper bound on images collected from the loader.
const MAX_IMAGES: usize = 4_096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMatch {
    pub name: String,
    pub keyword: &'static str,
}

/// Matches image file names against the suspicious keyword list, stopping
/// after `cap` matches.
pub fn match_images<I, S>(images: I, cap: usize) -> Vec<ImageMatch>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut matches = Vec::new();
    for image in images {
        if matches.len() >= cap {
            break;
        }
        let image = image.as_ref();
        let file_name = Path::new(image)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| image.to_string());
        if let Some(keyword) = suspicious_keyword(&file_name.to_lowercase()) {
            matches.push(ImageMatch {
                name: file_name,
                keyword,
            });
        }
    }
    matches
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn loaded_image_names() -> Result<Vec<String>, ProbeError> {
    use std::ffi::CStr;

    unsafe extern "C" fn collect(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut libc::c_void,
    ) -> libc::c_int {
        // SAFETY: `data` is the `Vec<String>` passed below and `info` is
        // valid for the duration of the callback.
        let names = &mut *(data as *mut Vec<String>);
        let name_ptr = (*info).dlpi_name;
        if !name_ptr.is_null() {
            let name = CStr::from_ptr(name_ptr).to_string_lossy();
            if !name.is_empty() {
                names.push(name.into_owned());
            }
        }
        if names.len() >= MAX_IMAGES {
            1
        } else {
            0
        }
    }

    let mut names: Vec<String> = Vec::new();
    // SAFETY: the callback only touches `names`, which outlives the call.
    unsafe {
        libc::dl_iterate_phdr(
            Some(collect),
            &mut names as *mut Vec<String> as *mut libc::c_void,
        );
    }
    Ok(names)
}

#[cfg(target_vendor = "apple")]
pub fn loaded_image_names() -> Result<Vec<String>, ProbeError> {
    use std::ffi::CStr;

    extern "C" {
        fn _dyld_image_count() -> u32;
        fn _dyld_get_image_name(image_index: u32) -> *const libc::c_char;
    }

    // SAFETY: dyld accessors are thread-safe; a null name means the image
    // was unloaded between the two calls.
    let names = unsafe {
        let count = _dyld_image_count().min(MAX_IMAGES as u32);
        (0..count)
            .filter_map(|index| {
                let name_ptr = _dyld_get_image_name(index);
                (!name_ptr.is_null())
                    .then(|| CStr::from_ptr(name_ptr).to_string_lossy().into_owned())
            })
            .collect()
    };
    Ok(names)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple")))]
pub fn loaded_image_names() -> Result<Vec<String>, ProbeError> {
    Err(ProbeError::Unavailable("loaded image table"))
}

pub fn loaded_modules(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let images = loaded_image_names()?;
    let matches = match_images(&images, ctx.config.loaded_module_match_cap);

    let mut observation = Observation::new();
    observation.fact(
        "loadedModuleMatches",
        matches
            .iter()
            .map(|image| image.name.clone())
            .collect::<Vec<_>>(),
    );
    for image in &matches {
        let strength = if is_frida_keyword(image.keyword) {
            Strength::Strong
        } else {
            Strength::Weak
        };
        observation.push(
            RawSignal::flag(
                names::SUSPICIOUS_MODULE_LOADED,
                SignalCategory::Instrumentation,
                ProbeFamily::LoadedModules,
                strength,
            )
            .with_evidence([image.name.as_str()]),
        );
    }
    Ok(observation)
}
