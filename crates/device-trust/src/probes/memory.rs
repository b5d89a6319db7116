// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Process memory layout scan (`/proc/self/maps`) and open file descriptor scan.

use super::ProbeContext;
use crate::signal::{
    names, Observation, ProbeError, ProbeFamily, RawSignal, SignalCategory, SignalValue, Strength,
};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use walkdir::WalkDir;

/// Hooking / instrumentation framework name fragments, lowercase.
pub const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "frida", "gum-js", "gum_js", "gadget", "substrate", "xposed", "lsposed", "edxposed",
];

/// Fragments naming Frida itself: a match means the framework is loaded.
const FRIDA_KEYWORDS: &[&str] = &["frida", "gum-js", "gum_js", "gadget"];

const FD_KEYWORDS: &[&str] = &["frida", "gadget", "gum-js"];

/// First suspicious keyword contained in `haystack`, which must be lowercase.
pub fn suspicious_keyword(haystack: &str) -> Option<&'static str> {
    SUSPICIOUS_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| haystack.contains(keyword))
}

pub fn is_frida_keyword(keyword: &str) -> bool {
    FRIDA_KEYWORDS.contains(&keyword)
}

#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    pub max_lines: usize,
    pub rwx_cap: usize,
    pub module_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedModule {
    pub name: String,
    pub frida: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapsScan {
    pub lines_scanned: usize,
    pub rwx_segments: usize,
    pub frida_lib_loaded: bool,
    pub modules: Vec<MappedModule>,
}

impl MapsScan {
    pub fn has_rwx(&self) -> bool {
        self.rwx_segments > 0
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|module| module.name.clone()).collect()
    }
}

fn is_writable_executable(perms: &str) -> bool {
    let bytes = perms.as_bytes();
    bytes.len() >= 3 && bytes[1] == b'w' && bytes[2] == b'x'
}

/// Basename of the backing path of a maps line, if it has one.
fn backing_basename(line: &str) -> Option<&str> {
    let path = line.split_whitespace().nth(5)?;
    let (_, name) = path.rsplit_once('/')?;
    Some(name).filter(|name| !name.is_empty())
}

/// Scans maps lines. Stops counting RWX regions at `rwx_cap` and collecting
/// module names at `module_cap`; never reads more than `max_lines`.
pub fn scan_maps<R: BufRead>(reader: R, limits: ScanLimits) -> MapsScan {
    let mut scan = MapsScan::default();

    for line in reader.lines().take(limits.max_lines) {
        let Ok(line) = line else {
            break;
        };
        scan.lines_scanned += 1;

        if scan.rwx_segments < limits.rwx_cap {
            if let Some(perms) = line.split_whitespace().nth(1) {
                if is_writable_executable(perms) {
                    scan.rwx_segments += 1;
                }
            }
        }

        let lower = line.to_lowercase();
        let Some(keyword) = suspicious_keyword(&lower) else {
            continue;
        };
        let frida = is_frida_keyword(keyword);
        scan.frida_lib_loaded |= frida;

        if scan.modules.len() >= limits.module_cap {
            continue;
        }
        if let Some(name) = backing_basename(&line) {
            if !scan.modules.iter().any(|module| module.name == name) {
                scan.modules.push(MappedModule {
                    name: name.to_string(),
                    frida,
                });
            }
        }
    }

    scan
}

pub fn memory_regions(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let path = ctx.config.resolve("/proc/self/maps");
    let file = File::open(&path).map_err(|err| ProbeError::io(&path, err))?;
    let scan = scan_maps(
        BufReader::new(file),
        ScanLimits {
            max_lines: ctx.config.max_map_lines,
            rwx_cap: ctx.config.rwx_region_cap,
            module_cap: ctx.config.suspicious_module_cap,
        },
    );

    let mut observation = Observation::new();
    observation.fact("rwxSegments", scan.rwx_segments);
    observation.fact("hasRwx", scan.has_rwx());
    observation.fact("fridaLibLoaded", scan.frida_lib_loaded);
    observation.fact("suspiciousModules", scan.module_names());

    if scan.has_rwx() {
        observation.push(RawSignal::new(
            names::RWX_REGION,
            SignalCategory::Instrumentation,
            ProbeFamily::MemoryRegions,
            Strength::Weak,
            SignalValue::Count(scan.rwx_segments as u64),
        ));
    }
    for module in &scan.modules {
        let (name, strength) = if module.frida {
            (names::INSTRUMENTATION_LIBRARY_MAPPED, Strength::Strong)
        } else {
            (names::SUSPICIOUS_LIBRARY_MAPPED, Strength::Weak)
        };
        observation.push(
            RawSignal::flag(
                name,
                SignalCategory::Instrumentation,
                ProbeFamily::MemoryRegions,
                strength,
            )
            .with_evidence([module.name.as_str()]),
        );
    }
    // A keyword on an anonymous or unnamed mapping still counts.
    if scan.frida_lib_loaded && !scan.modules.iter().any(|module| module.frida) {
        observation.push(RawSignal::flag(
            names::INSTRUMENTATION_LIBRARY_MAPPED,
            SignalCategory::Instrumentation,
            ProbeFamily::MemoryRegions,
            Strength::Strong,
        ));
    }
    Ok(observation)
}

/// Looks for descriptors pointing at Frida agents, pipes or gadget files.
pub fn file_descriptors(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let dir = ctx.config.resolve("/proc/self/fd");
    if !dir.is_dir() {
        return Err(ProbeError::Unavailable("/proc/self/fd"));
    }

    let hit = WalkDir::new(&dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .take(ctx.config.max_fd_entries)
        .filter_map(Result::ok)
        .filter_map(|entry| fs::read_link(entry.path()).ok())
        .map(|target| target.to_string_lossy().to_lowercase())
        .find(|target| FD_KEYWORDS.iter().any(|keyword| target.contains(keyword)));

    let mut observation = Observation::new();
    observation.fact("fdFrida", hit.is_some());
    if let Some(target) = hit {
        observation.push(
            RawSignal::flag(
                names::INSTRUMENTATION_FD_OPEN,
                SignalCategory::Instrumentation,
                ProbeFamily::FileDescriptors,
                Strength::Strong,
            )
            .with_evidence([target]),
        );
    }
    Ok(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LIMITS: ScanLimits = ScanLimits {
        max_lines: 10_000,
        rwx_cap: 4,
        module_cap: 8,
    };

    const CLEAN_MAPS: &str = "\
5581c000-5581d000 r--p 00000000 fd:01 131 /usr/bin/app
5581d000-5581e000 r-xp 00001000 fd:01 131 /usr/bin/app
7f10a000-7f10c000 r-xp 00000000 fd:01 200 /usr/lib/libc.so.6
7ffd1000-7ffd2000 rw-p 00000000 00:00 0 [stack]
";

    #[test]
    fn clean_maps_have_no_findings() {
        let scan = scan_maps(Cursor::new(CLEAN_MAPS), LIMITS);
        assert_eq!(scan.lines_scanned, 4);
        assert_eq!(scan.rwx_segments, 0);
        assert!(!scan.frida_lib_loaded);
        assert!(scan.modules.is_empty());
    }

    #[test]
    fn frida_agent_is_detected_once() {
        let maps = "\
7f000000-7f100000 r-xp 00000000 fd:01 9 /data/local/tmp/re.frida.server/frida-agent-64.so
7f100000-7f200000 rw-p 00100000 fd:01 9 /data/local/tmp/re.frida.server/frida-agent-64.so
7f300000-7f400000 r-xp 00000000 fd:01 10 /system/lib64/libsubstrate.so
";
        let scan = scan_maps(Cursor::new(maps), LIMITS);
        assert!(scan.frida_lib_loaded);
        assert_eq!(
            scan.modules,
            vec![
                MappedModule {
                    name: "frida-agent-64.so".to_string(),
                    frida: true,
                },
                MappedModule {
                    name: "libsubstrate.so".to_string(),
                    frida: false,
                },
            ]
        );
    }

    #[test]
    fn rwx_counting_stops_at_cap() {
        let maps: String = (0..10)
            .map(|i| format!("{:08x}-{:08x} rwxp 00000000 00:00 0\n", i * 0x1000, (i + 1) * 0x1000))
            .collect();
        let scan = scan_maps(Cursor::new(maps), LIMITS);
        assert_eq!(scan.rwx_segments, 4);
        assert_eq!(scan.lines_scanned, 10);
    }

    #[test]
    fn scan_never_reads_past_line_limit() {
        let maps = "00000000-00001000 r--p 00000000 00:00 0\n".repeat(50);
        let scan = scan_maps(
            Cursor::new(maps),
            ScanLimits {
                max_lines: 10,
                ..LIMITS
            },
        );
        assert_eq!(scan.lines_scanned, 10);
    }

    #[test]
    fn module_list_is_capped() {
        let maps: String = (0..20)
            .map(|i| format!("00000000-00001000 r-xp 00000000 fd:01 {} /data/xposed/libmod{}.so\n", i, i))
            .collect();
        let scan = scan_maps(Cursor::new(maps), LIMITS);
        assert_eq!(scan.modules.len(), 8);
    }

    #[test]
    fn keyword_matching_is_case_insensitive() {
        assert_eq!(suspicious_keyword(&"LIBFRIDA-GADGET.SO".to_lowercase()), Some("frida"));
        assert_eq!(suspicious_keyword("libc.so"), None);
    }
}
