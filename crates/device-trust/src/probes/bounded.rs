// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

// Short-lived runtimes for probes that need sockets or subprocesses.

use crate::signal::ProbeError;
use std::future::Future;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};
use tokio::time::timeout;

/// Drives `future` on a fresh current-thread runtime. When the caller is
/// already inside a runtime the work moves to a scoped thread, since nested
/// `block_on` is not allowed.
pub(crate) fn block_on<F>(future: F) -> Result<F::Output, ProbeError>
where
    F: Future + Send,
    F::Output: Send,
{
    let drive = move || {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ProbeError::Runtime)?;
        Ok(runtime.block_on(future))
    };

    if Handle::try_current().is_err() {
        return drive();
    }

    std::thread::scope(|scope| {
        scope
            .spawn(drive)
            .join()
            .unwrap_or_else(|_| Err(ProbeError::Panicked("probe runtime thread".to_string())))
    })
}

/// Runs `program args..` bounded by `bound`.
///
/// `Ok(Some(stdout))` on a zero exit, `Ok(None)` on a non-zero exit,
/// `Err(Unavailable)` when the program does not exist.
pub(crate) async fn run_command(
    program: &'static str,
    args: &[&str],
    bound: Duration,
) -> Result<Option<String>, ProbeError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match timeout(bound, output).await {
        Ok(Ok(output)) if output.status.success() => {
            Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
        }
        Ok(Ok(_)) => Ok(None),
        Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => Err(ProbeError::Unavailable(program)),
        Ok(Err(err)) => Err(ProbeError::Command {
            command: format!("{} {}", program, args.join(" ")),
            detail: err.to_string(),
        }),
        Err(_) => Err(ProbeError::Timeout {
            probe: program,
            bound_ms: bound.as_millis() as u64,
        }),
    }
}

/// Blocking wrapper around [`run_command`].
pub(crate) fn command(
    program: &'static str,
    args: &[&str],
    bound: Duration,
) -> Result<Option<String>, ProbeError> {
    block_on(run_command(program, args, bound))?
}
