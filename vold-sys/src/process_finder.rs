// SPDX-License-Identifier: GPL-3.0-only

//! Finding and signalling processes that hold files under a path

use std::path::Path;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Pids of processes with an open fd, cwd, root or exe under `path`
pub fn find_processes_using_path(path: &Path) -> Vec<i32> {
    let mut result = Vec::new();

    let all_procs = match procfs::process::all_processes() {
        Ok(procs) => procs,
        Err(e) => {
            tracing::warn!("Failed to enumerate processes: {}", e);
            return result;
        }
    };

    for process in all_procs.flatten() {
        if process_uses_path(&process, path) {
            result.push(process.pid());
        }
    }

    tracing::debug!(path = %path.display(), count = result.len(), "Found path holders");
    result
}

fn process_uses_path(process: &procfs::process::Process, path: &Path) -> bool {
    let linked = [process.cwd().ok(), process.root().ok(), process.exe().ok()];
    if linked.iter().flatten().any(|target| target.starts_with(path)) {
        return true;
    }

    let fds = match process.fd() {
        Ok(fds) => fds,
        Err(_) => return false,
    };

    fds.flatten().any(|fd| match &fd.target {
        procfs::process::FDTarget::Path(target) => target.starts_with(path),
        _ => false,
    })
}

/// Send `signal` to every pid, returning how many were signalled.
///
/// Pids <= 1 are never signalled; vanished processes are skipped.
pub fn signal_processes(pids: &[i32], signal: Signal) -> usize {
    let mut signalled = 0;

    for &pid in pids {
        if pid <= 1 {
            tracing::warn!("Refusing to signal system process with PID {}", pid);
            continue;
        }
        if pid == std::process::id() as i32 {
            continue;
        }

        match kill(Pid::from_raw(pid), signal) {
            Ok(()) => {
                tracing::info!(pid, ?signal, "Signalled process holding path");
                signalled += 1;
            }
            Err(nix::Error::ESRCH) => {
                tracing::debug!("Process {} already terminated", pid);
            }
            Err(e) => {
                tracing::warn!("Failed to signal process {}: {}", pid, e);
            }
        }
    }

    signalled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonexistent_path_has_no_holders() {
        let pids = find_processes_using_path(Path::new("/nonexistent/mount/point/12345"));
        assert!(pids.is_empty());
    }

    #[test]
    fn system_pids_are_never_signalled() {
        assert_eq!(signal_processes(&[0, 1, -1], Signal::SIGTERM), 0);
    }
}
