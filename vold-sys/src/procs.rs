// SPDX-License-Identifier: GPL-3.0-only

//! Process enumeration and per-process storage remounts

use std::ffi::CString;
use std::fs::{self, File};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use vold_contracts::{ProcessEntry, ProcessTable, RemountPlan, StorageError};

use crate::SysError;

#[derive(Debug, Clone)]
pub struct ProcfsProcessTable {
    proc_root: PathBuf,
}

impl ProcfsProcessTable {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }

    fn namespace_of(&self, pid: i32) -> Option<String> {
        fs::read_link(self.proc_root.join(pid.to_string()).join("ns/mnt"))
            .ok()
            .map(|target| target.display().to_string())
    }
}

impl Default for ProcfsProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

fn c_path(path: &Path) -> Result<CString, SysError> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SysError::OperationFailed(format!("{} contains NUL", path.display())))
}

/// Prebuilt arguments so the forked child only issues raw syscalls
struct ChildPlan {
    storage_source: Option<CString>,
    storage_target: CString,
    user_source: CString,
    self_target: CString,
}

impl ChildPlan {
    fn new(plan: &RemountPlan) -> Result<Self, SysError> {
        Ok(Self {
            storage_source: plan.storage_source.as_deref().map(c_path).transpose()?,
            storage_target: c_path(&plan.storage_target)?,
            user_source: c_path(&plan.user_source)?,
            self_target: c_path(&plan.self_target)?,
        })
    }
}

/// Runs in the forked child. Never returns.
fn remount_in_child(ns_fd: i32, plan: &ChildPlan) -> ! {
    unsafe {
        if libc::setns(ns_fd, libc::CLONE_NEWNS) != 0 {
            libc::_exit(1);
        }

        libc::umount2(plan.storage_target.as_ptr(), libc::MNT_DETACH);

        let Some(source) = &plan.storage_source else {
            libc::_exit(0);
        };

        if libc::mount(
            source.as_ptr(),
            plan.storage_target.as_ptr(),
            std::ptr::null(),
            libc::MS_BIND | libc::MS_REC,
            std::ptr::null(),
        ) != 0
        {
            libc::_exit(2);
        }
        if libc::mount(
            std::ptr::null(),
            plan.storage_target.as_ptr(),
            std::ptr::null(),
            libc::MS_REC | libc::MS_SLAVE,
            std::ptr::null(),
        ) != 0
        {
            libc::_exit(3);
        }
        if libc::mount(
            plan.user_source.as_ptr(),
            plan.self_target.as_ptr(),
            std::ptr::null(),
            libc::MS_BIND,
            std::ptr::null(),
        ) != 0
        {
            libc::_exit(4);
        }

        libc::_exit(0)
    }
}

fn remount_blocking(ns_path: PathBuf, plan: ChildPlan) -> Result<(), SysError> {
    let ns = File::open(&ns_path)?;

    // SAFETY: the child only calls async-signal-safe libc functions before _exit.
    match unsafe { fork() }? {
        ForkResult::Child => remount_in_child(ns.as_raw_fd(), &plan),
        ForkResult::Parent { child } => match waitpid(child, None)? {
            WaitStatus::Exited(_, 0) => Ok(()),
            WaitStatus::Exited(_, code) => Err(SysError::OperationFailed(format!(
                "remount child for {} exited with {code}",
                ns_path.display()
            ))),
            other => Err(SysError::OperationFailed(format!(
                "remount child for {} ended with {other:?}",
                ns_path.display()
            ))),
        },
    }
}

#[async_trait]
impl ProcessTable for ProcfsProcessTable {
    async fn root_mount_namespace(&self) -> Result<String, StorageError> {
        self.namespace_of(1)
            .ok_or_else(|| StorageError::internal("cannot read init mount namespace"))
    }

    async fn list_processes(&self) -> Result<Vec<ProcessEntry>, StorageError> {
        let all = procfs::process::all_processes()
            .map_err(|e| StorageError::internal(format!("failed to enumerate processes: {e}")))?;

        let mut entries = Vec::new();
        for process in all.flatten() {
            let Ok(uid) = process.uid() else {
                continue;
            };
            let pid = process.pid();
            entries.push(ProcessEntry {
                pid,
                uid,
                mount_namespace: self.namespace_of(pid),
                exe: process.exe().ok(),
            });
        }
        Ok(entries)
    }

    async fn remount_storage(&self, pid: i32, plan: &RemountPlan) -> Result<(), StorageError> {
        let ns_path = self.proc_root.join(pid.to_string()).join("ns/mnt");
        let child_plan = ChildPlan::new(plan)?;

        tokio::task::spawn_blocking(move || remount_blocking(ns_path, child_plan))
            .await
            .map_err(|e| StorageError::internal(format!("remount task failed: {e}")))??;

        tracing::debug!(pid, "Remounted storage view");
        Ok(())
    }
}
