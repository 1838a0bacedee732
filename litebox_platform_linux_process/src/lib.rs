// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Linux platform implementation of Windows process creation
//!
//! This crate implements the `ProcessApi` of `litebox_shim_process` with
//! fork/exec, plus the pthread-style synchronization primitive bridge.
//! This is the "South" platform layer that translates Windows process
//! creation into host process launches.

pub mod builtin;
pub mod context;
pub mod kernel32;
pub mod launcher;
pub mod registry;
pub mod resolver;
pub mod spawner;
pub mod sync;

use std::thread;
use std::time::{Duration, Instant};

use litebox_shim_process::syscalls::{
    INFINITE, ProcessApi, ProcessHandle, ProcessInformation, ProcessLaunchRequest, STILL_ACTIVE,
    WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use litebox_shim_process::{Environment, Result};

pub use builtin::{BuiltinProgram, BuiltinRegistry};
pub use context::{ProcessContext, ProcessContextBuilder};
pub use launcher::{ForkExecLauncher, HostLauncher};
pub use registry::{InProcessRegistry, ProcessRegistry};
pub use resolver::{ExecutableResolver, ResolvedExecutable};
pub use spawner::ProcessSpawner;

/// Interval between exit checks of a timed wait
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Linux platform for the Windows process APIs
pub struct LinuxProcessPlatform<R: ProcessRegistry = InProcessRegistry, L: HostLauncher = ForkExecLauncher> {
    context: ProcessContext,
    registry: R,
    launcher: L,
}

impl LinuxProcessPlatform {
    /// Create a platform with the in-process registry and fork/exec launcher
    pub fn new(context: ProcessContext) -> Self {
        Self::with_parts(context, InProcessRegistry::new(), ForkExecLauncher)
    }
}

impl<R: ProcessRegistry, L: HostLauncher> LinuxProcessPlatform<R, L> {
    pub fn with_parts(context: ProcessContext, registry: R, launcher: L) -> Self {
        Self {
            context,
            registry,
            launcher,
        }
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Reap the process if it has exited, recording its exit code
    fn poll_exit(&self, handle: ProcessHandle, block: bool) -> Result<Option<u32>> {
        if let Some(code) = self.registry.exit_code(handle)? {
            return Ok(Some(code));
        }
        let pid = self.registry.unix_pid(handle)?;
        match launcher::wait_pid(pid, !block)? {
            Some(code) => {
                log::debug!("host pid {pid} exited with {code}");
                self.registry.set_exit_code(handle, code)?;
                Ok(Some(code))
            }
            None => Ok(None),
        }
    }
}

impl<R: ProcessRegistry, L: HostLauncher> Drop for LinuxProcessPlatform<R, L> {
    fn drop(&mut self) {
        for pid in self.registry.close_all() {
            reap_orphan(pid);
        }
    }
}

/// Reap a child nobody can wait on any more
///
/// An exited child is reaped inline, a running one by a detached thread.
fn reap_orphan(pid: libc::pid_t) {
    match launcher::wait_pid(pid, true) {
        Ok(Some(code)) => {
            log::debug!("reaped unwaited child {pid} ({code})");
            return;
        }
        Ok(None) => {}
        Err(e) => {
            log::warn!("failed to reap child {pid}: {e}");
            return;
        }
    }

    let spawned = thread::Builder::new()
        .name(format!("reap-{pid}"))
        .spawn(move || match launcher::wait_pid(pid, false) {
            Ok(code) => log::debug!("reaped unwaited child {pid} ({code:?})"),
            Err(e) => log::warn!("failed to reap child {pid}: {e}"),
        });
    if let Err(e) = spawned {
        log::warn!("cannot start reaper for child {pid}: {e}");
    }
}

impl<R: ProcessRegistry, L: HostLauncher> ProcessApi for LinuxProcessPlatform<R, L> {
    fn create_process(&mut self, request: &ProcessLaunchRequest) -> Result<ProcessInformation> {
        ProcessSpawner::new(&self.context, &self.registry, &self.launcher).spawn(request)
    }

    fn wait_for_process(&mut self, handle: ProcessHandle, timeout_ms: u32) -> Result<u32> {
        if timeout_ms == INFINITE {
            self.poll_exit(handle, true)?;
            return Ok(WAIT_OBJECT_0);
        }

        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        loop {
            if self.poll_exit(handle, false)?.is_some() {
                return Ok(WAIT_OBJECT_0);
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(WAIT_TIMEOUT);
            };
            if remaining.is_zero() {
                return Ok(WAIT_TIMEOUT);
            }
            thread::sleep(remaining.min(WAIT_POLL_INTERVAL));
        }
    }

    fn get_exit_code_process(&mut self, handle: ProcessHandle) -> Result<u32> {
        Ok(self.poll_exit(handle, false)?.unwrap_or(STILL_ACTIVE))
    }

    fn terminate_process(&mut self, handle: ProcessHandle, exit_code: u32) -> Result<()> {
        if self.registry.exit_code(handle)?.is_some() {
            return Ok(());
        }
        let pid = self.registry.unix_pid(handle)?;
        // The requested code wins over the signal status
        self.registry.set_exit_code(handle, exit_code)?;
        // SAFETY: pid is a child of this process that has not been reaped
        if unsafe { libc::kill(pid, libc::SIGKILL) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        launcher::wait_pid(pid, false)?;
        Ok(())
    }

    fn close_handle(&mut self, handle: u64) -> Result<()> {
        if let Some(pid) = self.registry.close_handle(handle)? {
            reap_orphan(pid);
        }
        Ok(())
    }

    fn get_environment_strings(&self) -> Environment {
        self.context.windows_environment().clone()
    }

    fn search_path(&mut self, name: &str, extension: Option<&str>) -> Result<String> {
        ExecutableResolver::new(&self.context)
            .search_path(name, extension)
            .map(|path| path.display().to_string())
    }
}
