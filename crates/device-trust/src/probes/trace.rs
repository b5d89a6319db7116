// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Trace flag: a non-zero tracer is the one debugger signal.

use super::ProbeContext;
use crate::signal::{names, Observation, ProbeError, ProbeFamily, RawSignal, SignalCategory, Strength};

pub fn parse_tracer_pid(status: &str) -> Option<u32> {
    for line in status.lines() {
        let Some(raw) = line.strip_prefix("TracerPid:") else {
            continue;
        };
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }
        return value.parse::<u32>().ok();
    }
    None
}

/// Tracer pid of the current process; `Some(0)` means untraced.
#[cfg(not(target_vendor = "apple"))]
fn tracer(ctx: &ProbeContext<'_>) -> Result<u32, ProbeError> {
    let path = ctx.config.resolve("/proc/self/status");
    let status = std::fs::read_to_string(&path).map_err(|err| ProbeError::io(&path, err))?;
    parse_tracer_pid(&status).ok_or(ProbeError::Malformed {
        what: "process status",
        detail: "no TracerPid line".to_string(),
    })
}

/// Apple has no tracer pid; P_TRACED is reported as tracer `1`.
#[cfg(target_vendor = "apple")]
fn tracer(_ctx: &ProbeContext<'_>) -> Result<u32, ProbeError> {
    // Raw kinfo_proc bytes; p_flag sits after two list pointers and two
    // more pointers in extern_proc on 64-bit targets.
    const KINFO_PROC_SIZE: usize = 648;
    const P_FLAG_OFFSET: usize = 32;
    const P_TRACED: i32 = 0x0000_0800;

    let mut mib: [libc::c_int; 4] = [
        libc::CTL_KERN,
        libc::KERN_PROC,
        libc::KERN_PROC_PID,
        // SAFETY: getpid has no preconditions.
        unsafe { libc::getpid() },
    ];
    let mut buf = [0u8; KINFO_PROC_SIZE];
    let mut size = KINFO_PROC_SIZE;

    // SAFETY: `buf` and `size` describe a writable buffer of `size` bytes.
    let ret = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            4,
            buf.as_mut_ptr() as *mut libc::c_void,
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        return Err(ProbeError::Runtime(std::io::Error::last_os_error()));
    }
    if size < P_FLAG_OFFSET + 4 {
        return Err(ProbeError::Malformed {
            what: "kinfo_proc",
            detail: format!("{} bytes", size),
        });
    }

    let p_flag = i32::from_ne_bytes([
        buf[P_FLAG_OFFSET],
        buf[P_FLAG_OFFSET + 1],
        buf[P_FLAG_OFFSET + 2],
        buf[P_FLAG_OFFSET + 3],
    ]);
    Ok(u32::from(p_flag & P_TRACED != 0))
}

/// Turns a tracer pid into signals. Debugger gets the strong signal; the
/// same evidence is a weak instrumentation family.
pub fn evaluate_tracer(tracer_pid: u32) -> Observation {
    let mut observation = Observation::new();
    if tracer_pid == 0 {
        return observation;
    }

    let evidence = format!("TracerPid={}", tracer_pid);
    observation.fact("tracerPid", tracer_pid);
    observation.push(
        RawSignal::flag(
            names::TRACER_ATTACHED,
            SignalCategory::Debugger,
            ProbeFamily::TraceFlag,
            Strength::Strong,
        )
        .with_evidence([evidence.as_str()]),
    );
    observation.push(RawSignal::flag(
        names::PROCESS_TRACED,
        SignalCategory::Instrumentation,
        ProbeFamily::TraceFlag,
        Strength::Weak,
    ));
    observation
}

pub fn trace_flag(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    Ok(evaluate_tracer(tracer(ctx)?))
}
