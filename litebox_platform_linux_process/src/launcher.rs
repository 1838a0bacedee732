// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! fork/exec with an exec-status back-channel
//!
//! The parent creates a close-on-exec pipe before forking. The child writes
//! its raw errno to the pipe when anything between `fork` and `execve`
//! fails; a successful `execve` closes the pipe, so the parent reads EOF.
//!
//! Everything the child needs (argument and environment pointer arrays, the
//! `/dev/null` descriptor, the working directory) is prepared before `fork`,
//! the child only makes async-signal-safe calls.

use std::ffi::{CStr, CString};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use libc::c_char;
use litebox_shim_process::{EnvironmentBlock, ProcessError, Result};

/// Exit status of a child whose exec failed
pub const EXEC_FAILED_STATUS: i32 = 127;

/// What a child's standard stream is connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioTarget {
    /// Keep the parent's descriptor
    #[default]
    Inherit,
    /// Duplicate this descriptor into the slot
    Fd(RawFd),
    /// `/dev/null`
    Null,
}

/// Session and process-group placement of the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Inherit,
    /// `setpgid(0, 0)`
    NewProcessGroup,
    /// `setsid()`
    NewSession,
}

fn to_cstring(bytes: &[u8], what: &str) -> Result<CString> {
    CString::new(bytes)
        .map_err(|_| ProcessError::InvalidParameter(format!("{what} contains a NUL byte")))
}

/// Fully prepared exec arguments
#[derive(Debug, Clone)]
pub struct ExecImage {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    cwd: Option<CString>,
    stdio: [StdioTarget; 3],
    session: SessionMode,
}

impl ExecImage {
    /// `argv` should start with the program name as the child should see it
    pub fn new<S: AsRef<str>>(program: &Path, argv: &[S], environment: &EnvironmentBlock) -> Result<Self> {
        let program = to_cstring(program.as_os_str().as_bytes(), "program path")?;

        let mut args = Vec::new();
        args.try_reserve_exact(argv.len())?;
        for arg in argv {
            args.push(to_cstring(arg.as_ref().as_bytes(), "argument")?);
        }

        let mut envp = Vec::new();
        for entry in environment.entries() {
            envp.try_reserve(1)?;
            envp.push(to_cstring(entry.as_bytes(), "environment entry")?);
        }

        Ok(Self {
            program,
            argv: args,
            envp,
            cwd: None,
            stdio: [StdioTarget::Inherit; 3],
            session: SessionMode::Inherit,
        })
    }

    pub fn with_cwd(mut self, dir: &Path) -> Result<Self> {
        self.cwd = Some(to_cstring(dir.as_os_str().as_bytes(), "working directory")?);
        Ok(self)
    }

    #[must_use]
    pub fn with_stdio(mut self, stdio: [StdioTarget; 3]) -> Self {
        self.stdio = stdio;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionMode) -> Self {
        self.session = session;
        self
    }

    pub fn program(&self) -> &CStr {
        &self.program
    }

    pub fn argv(&self) -> impl Iterator<Item = &CStr> {
        self.argv.iter().map(CString::as_c_str)
    }

    pub fn envp(&self) -> impl Iterator<Item = &CStr> {
        self.envp.iter().map(CString::as_c_str)
    }

    pub fn stdio(&self) -> [StdioTarget; 3] {
        self.stdio
    }

    pub fn session(&self) -> SessionMode {
        self.session
    }
}

/// Starts host processes
pub trait HostLauncher {
    /// Fork a child that execs `image`; the exec result is read later with
    /// [`PendingChild::await_exec`]
    fn fork_exec(&self, image: &ExecImage) -> Result<PendingChild>;
}

/// A forked child whose exec result is not known yet
#[derive(Debug)]
pub struct PendingChild {
    pid: libc::pid_t,
    back_channel: OwnedFd,
}

impl PendingChild {
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Read the back-channel until EOF
    ///
    /// Returns the pid once the exec succeeded. On failure the child is
    /// reaped and its errno is translated.
    pub fn await_exec(self) -> Result<libc::pid_t> {
        let pid = self.pid;
        let mut channel = File::from(self.back_channel);
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match channel.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    reap(pid);
                    return Err(e.into());
                }
            }
        }

        match filled {
            0 => Ok(pid),
            4 => {
                let errno = i32::from_ne_bytes(buf);
                log::debug!("child {pid} failed before exec: errno {errno}");
                reap(pid);
                Err(ProcessError::from_errno(errno))
            }
            n => {
                reap(pid);
                Err(ProcessError::Registry(format!("truncated exec status ({n} bytes)")))
            }
        }
    }
}

/// `fork` + `execve` on the running host
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkExecLauncher;

impl HostLauncher for ForkExecLauncher {
    fn fork_exec(&self, image: &ExecImage) -> Result<PendingChild> {
        let argv = pointer_array(&image.argv)?;
        let envp = pointer_array(&image.envp)?;

        let null = if image.stdio.contains(&StdioTarget::Null) {
            Some(OwnedFd::from(File::options().read(true).write(true).open("/dev/null")?))
        } else {
            None
        };
        let stdio = image.stdio.map(|target| match target {
            StdioTarget::Inherit => None,
            StdioTarget::Fd(fd) => Some(fd),
            StdioTarget::Null => null.as_ref().map(AsRawFd::as_raw_fd),
        });

        let mut fds = [0 as RawFd; 2];
        // SAFETY: fds has room for the two descriptors pipe2 writes
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: pipe2 succeeded, both descriptors are fresh and owned here
        let (read_end, write_end) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        // SAFETY: the child only runs `exec_child`, which never returns
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if pid == 0 {
            // SAFETY: in the freshly forked child; all inputs were built above
            unsafe {
                exec_child(
                    image,
                    &argv,
                    &envp,
                    stdio,
                    read_end.as_raw_fd(),
                    write_end.as_raw_fd(),
                )
            }
        }

        drop(write_end);
        log::trace!("forked {pid} for {:?}", image.program);
        Ok(PendingChild {
            pid,
            back_channel: read_end,
        })
    }
}

fn pointer_array(strings: &[CString]) -> Result<Vec<*const c_char>> {
    let mut ptrs = Vec::new();
    ptrs.try_reserve_exact(strings.len() + 1)?;
    ptrs.extend(strings.iter().map(|s| s.as_ptr()));
    ptrs.push(core::ptr::null());
    Ok(ptrs)
}

/// Child side of `fork_exec`
///
/// # Safety
///
/// Must only be called in a newly forked child. Only async-signal-safe
/// functions are used.
unsafe fn exec_child(
    image: &ExecImage,
    argv: &[*const c_char],
    envp: &[*const c_char],
    stdio: [Option<RawFd>; 3],
    read_fd: RawFd,
    write_fd: RawFd,
) -> ! {
    unsafe {
        libc::close(read_fd);

        let placed = match image.session {
            SessionMode::Inherit => true,
            SessionMode::NewProcessGroup => libc::setpgid(0, 0) == 0,
            SessionMode::NewSession => libc::setsid() >= 0,
        };
        if !placed {
            report_errno_and_exit(write_fd);
        }

        for (slot, source) in (0..).zip(stdio) {
            let Some(source) = source else { continue };
            let ok = if source == slot {
                libc::fcntl(slot, libc::F_SETFD, 0) >= 0
            } else {
                libc::dup2(source, slot) >= 0
            };
            if !ok {
                report_errno_and_exit(write_fd);
            }
        }

        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        if let Some(cwd) = &image.cwd {
            if libc::chdir(cwd.as_ptr()) != 0 {
                report_errno_and_exit(write_fd);
            }
        }

        libc::execve(image.program.as_ptr(), argv.as_ptr(), envp.as_ptr());
        report_errno_and_exit(write_fd)
    }
}

/// # Safety
///
/// Child side only; `fd` is the back-channel write end.
unsafe fn report_errno_and_exit(fd: RawFd) -> ! {
    unsafe {
        let bytes = (*libc::__errno_location()).to_ne_bytes();
        libc::write(fd, bytes.as_ptr().cast(), bytes.len());
        libc::_exit(EXEC_FAILED_STATUS)
    }
}

/// Block until `pid` exits, discarding the status
fn reap(pid: libc::pid_t) {
    if let Err(e) = wait_pid(pid, false) {
        log::warn!("failed to reap child {pid}: {e}");
    }
}

/// Windows-style exit code of a wait status; a signal maps to 128 + signo
#[allow(clippy::cast_sign_loss)]
pub fn exit_code_from_status(status: libc::c_int) -> u32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status) as u32
    } else if libc::WIFSIGNALED(status) {
        (128 + libc::WTERMSIG(status)) as u32
    } else {
        0
    }
}

/// `waitpid` with EINTR retry
///
/// Returns the exit code once the child is reaped, `None` if `nohang` and
/// it is still running.
pub fn wait_pid(pid: libc::pid_t, nohang: bool) -> Result<Option<u32>> {
    let options = if nohang { libc::WNOHANG } else { 0 };
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: status is a valid out pointer
        let ret = unsafe { libc::waitpid(pid, &mut status, options) };
        if ret == pid {
            return Ok(Some(exit_code_from_status(status)));
        }
        if ret == 0 {
            return Ok(None);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err.into());
        }
    }
}
