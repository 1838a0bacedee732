// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Process spawner
//!
//! Drives one `CreateProcess` call through
//! `Init -> ParametersBuilt -> Registered -> Forked -> AwaitingChildAck`
//! and ends in `Succeeded` or `Failed`. Once the registry has handed out
//! handles, a failure closes both the process and the thread handle; the
//! ticket is closed exactly once whatever the outcome.

use std::fmt;
use std::path::{Path, PathBuf};

use litebox_shim_process::path::{is_windows_path, translate_windows_path_to_linux};
use litebox_shim_process::syscalls::{
    CreationFlags, ProcessInformation, ProcessLaunchRequest, StartupFlags, StdHandle,
};
use litebox_shim_process::{BinaryType, ProcessError, Result, build_environment_block, parse_command_line};

use crate::builtin::VDM_PROGRAM;
use crate::context::ProcessContext;
use crate::launcher::{ExecImage, HostLauncher, SessionMode, StdioTarget, wait_pid};
use crate::registry::{LaunchOutcome, ProcessDescriptor, ProcessRegistry, Registration};
use crate::resolver::{ExecutableResolver, ResolvedExecutable, is_batch_file, is_com_file};

/// Command interpreter used for batch files when `COMSPEC` is unset
pub const DEFAULT_COMSPEC: &str = "cmd.exe";

/// Limit on batch-file and VDM redirections for a single call
const MAX_REDIRECTS: usize = 4;

/// Where a creation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnStage {
    Init,
    ParametersBuilt,
    Registered,
    Forked,
    AwaitingChildAck,
    Succeeded,
    Failed,
}

impl fmt::Display for SpawnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpawnStage::Init => "init",
            SpawnStage::ParametersBuilt => "parameters-built",
            SpawnStage::Registered => "registered",
            SpawnStage::Forked => "forked",
            SpawnStage::AwaitingChildAck => "awaiting-child-ack",
            SpawnStage::Succeeded => "succeeded",
            SpawnStage::Failed => "failed",
        };
        f.pad(name)
    }
}

struct StageTracker {
    stage: SpawnStage,
}

impl StageTracker {
    fn enter(&mut self, next: SpawnStage) {
        log::debug!("spawn: {} -> {}", self.stage, next);
        self.stage = next;
    }
}

/// What will be exec'd
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Host program passed to `execve`
    pub program: PathBuf,
    pub argv: Vec<String>,
    /// On-disk image behind the launch, `None` for built-ins
    pub image: Option<PathBuf>,
    /// Windows command line after any rewriting
    pub command_line: String,
}

/// The in-flight creation once it holds registry handles
struct ChildProcessRecord<'r, R: ProcessRegistry + ?Sized> {
    registry: &'r R,
    registration: Registration,
    /// Forked child that has not been handed to the caller yet
    host_pid: Option<libc::pid_t>,
    ticket_closed: bool,
    committed: bool,
}

impl<'r, R: ProcessRegistry + ?Sized> ChildProcessRecord<'r, R> {
    fn new(registry: &'r R, registration: Registration) -> Self {
        Self {
            registry,
            registration,
            host_pid: None,
            ticket_closed: false,
            committed: false,
        }
    }

    fn close_ticket(&mut self) {
        if self.ticket_closed {
            return;
        }
        self.ticket_closed = true;
        let ticket = self.registration.ticket.0;
        if let Err(e) = self.registry.close_handle(ticket) {
            log::warn!("failed to close ticket 0x{ticket:X}: {e}");
        }
    }

    /// Hand the handles to the caller
    fn commit(mut self) -> Registration {
        self.committed = true;
        self.close_ticket();
        self.registration
    }
}

impl<R: ProcessRegistry + ?Sized> Drop for ChildProcessRecord<'_, R> {
    fn drop(&mut self) {
        self.close_ticket();
        if self.committed {
            return;
        }

        if let Some(pid) = self.host_pid.take() {
            log::warn!("killing child {pid} of a failed launch");
            // SAFETY: pid is our own unreaped child
            unsafe { libc::kill(pid, libc::SIGKILL) };
            if let Err(e) = wait_pid(pid, false) {
                log::warn!("failed to reap child {pid}: {e}");
            }
        }

        for handle in [self.registration.process.0, self.registration.thread.0] {
            if let Err(e) = self.registry.close_handle(handle) {
                log::warn!("failed to close handle 0x{handle:X}: {e}");
            }
        }
    }
}

/// Runs `CreateProcess` against a context, a registry and a host launcher
pub struct ProcessSpawner<'a, R: ProcessRegistry + ?Sized, L: HostLauncher + ?Sized> {
    context: &'a ProcessContext,
    registry: &'a R,
    launcher: &'a L,
}

impl<'a, R: ProcessRegistry + ?Sized, L: HostLauncher + ?Sized> ProcessSpawner<'a, R, L> {
    pub fn new(context: &'a ProcessContext, registry: &'a R, launcher: &'a L) -> Self {
        Self {
            context,
            registry,
            launcher,
        }
    }

    /// Launch the program described by `request`
    ///
    /// # Errors
    ///
    /// Resolution and parameter errors are returned before anything is
    /// registered. Later failures are returned after the registry handles
    /// of this call have been closed.
    pub fn spawn(&self, request: &ProcessLaunchRequest) -> Result<ProcessInformation> {
        let mut stage = StageTracker {
            stage: SpawnStage::Init,
        };
        let result = self.run(request, &mut stage);
        match &result {
            Ok(info) => {
                stage.enter(SpawnStage::Succeeded);
                log::debug!("launched pid {} (host pid {})", info.process_id, info.host_pid);
            }
            Err(e) => {
                stage.enter(SpawnStage::Failed);
                log::debug!("launch failed: {e}");
            }
        }
        result
    }

    fn run(&self, request: &ProcessLaunchRequest, stage: &mut StageTracker) -> Result<ProcessInformation> {
        request.validate()?;
        warn_ignored(request);

        let plan = self.plan(
            request,
            request.application_name.as_deref(),
            request.command_line.as_deref(),
            0,
        )?;

        let flags = request.creation_flags;
        let environment = request
            .environment
            .resolve(flags, self.context.windows_environment());
        let block = build_environment_block(&environment, self.context.host_environment())?;
        let image = ExecImage::new(&plan.program, &plan.argv, &block)?
            .with_cwd(&self.working_directory(request))?
            .with_stdio(self.stdio_targets(request)?)
            .with_session(session_mode(flags));
        stage.enter(SpawnStage::ParametersBuilt);

        let registration = self.registry.register(&ProcessDescriptor {
            image: plan.image.clone(),
            command_line: plan.command_line.clone(),
            inherit_handles: request.inherit_handles,
        })?;
        stage.enter(SpawnStage::Registered);

        let mut record = ChildProcessRecord::new(self.registry, registration);
        match self.launch(&mut record, &image, stage) {
            Ok(host_pid) => {
                let registration = record.commit();
                Ok(ProcessInformation {
                    process: registration.process,
                    thread: registration.thread,
                    process_id: registration.process_id,
                    thread_id: registration.thread_id,
                    host_pid,
                })
            }
            Err(e) => {
                if let Err(fail_err) = self.registry.fail(registration.ticket, e.win32_code()) {
                    log::warn!("failed to record launch failure: {fail_err}");
                }
                drop(record);
                Err(e)
            }
        }
    }

    fn launch(
        &self,
        record: &mut ChildProcessRecord<'_, R>,
        image: &ExecImage,
        stage: &mut StageTracker,
    ) -> Result<libc::pid_t> {
        let ticket = record.registration.ticket;

        let pending = self.launcher.fork_exec(image)?;
        let pid = pending.pid();
        record.host_pid = Some(pid);
        stage.enter(SpawnStage::Forked);

        self.registry.attach(ticket, pid)?;
        stage.enter(SpawnStage::AwaitingChildAck);

        if let Err(e) = pending.await_exec() {
            // Already reaped
            record.host_pid = None;
            return Err(e);
        }

        self.registry.report_started(ticket)?;
        let info = self.registry.wait_ticket(ticket)?;
        match info.outcome {
            LaunchOutcome::Started => {}
            LaunchOutcome::Failed(code) => {
                return Err(ProcessError::Registry(format!(
                    "launch recorded as failed (error {code})"
                )));
            }
        }

        record.host_pid = None;
        Ok(pid)
    }

    /// Decide what to exec for a command
    pub fn plan(
        &self,
        request: &ProcessLaunchRequest,
        application_name: Option<&str>,
        command_line: Option<&str>,
        depth: usize,
    ) -> Result<LaunchPlan> {
        if depth > MAX_REDIRECTS {
            return Err(ProcessError::BadFormat("too many launch redirections".to_string()));
        }

        let resolver = ExecutableResolver::new(self.context);
        let resolved = resolver.resolve_command_line(application_name, command_line)?;

        if request.creation_flags.intersects(CreationFlags::DEBUG) && resolved.executable.is_builtin() {
            return Err(ProcessError::InvalidParameter(format!(
                "debugging requires an on-disk image, {} is built in",
                resolved.name
            )));
        }

        let parsed = parse_command_line(&resolved.command_line);
        let tail = parsed.get(1..).unwrap_or_default();

        match &resolved.executable {
            ResolvedExecutable::Native { path, binary, .. } => match binary {
                BinaryType::PeExe { .. } => {
                    let loader = self
                        .context
                        .loader()
                        .ok_or_else(|| ProcessError::LoaderUnavailable(path.display().to_string()))?;
                    let mut argv = vec![loader.display().to_string(), path.display().to_string()];
                    argv.extend_from_slice(tail);
                    Ok(LaunchPlan {
                        program: loader.to_path_buf(),
                        argv,
                        image: Some(path.clone()),
                        command_line: resolved.command_line.clone(),
                    })
                }
                b if b.needs_vdm() => {
                    self.vdm_plan(request, path, &resolved.command_line, depth)
                }
                BinaryType::Elf { executable: true } => {
                    Ok(direct_plan(path, tail, &resolved.command_line))
                }
                other => Err(ProcessError::BadFormat(format!(
                    "{} ({other:?}) cannot be started",
                    path.display()
                ))),
            },
            ResolvedExecutable::Unknown { path, .. } if is_batch_file(path) => {
                let comspec = self
                    .context
                    .windows_environment()
                    .get("COMSPEC")
                    .unwrap_or(DEFAULT_COMSPEC);
                let comspec = if comspec.contains([' ', '\t']) {
                    format!("\"{comspec}\"")
                } else {
                    comspec.to_string()
                };
                let command_line = format!("{comspec} /c {}", resolved.command_line);
                log::debug!("running batch file through {comspec}");
                self.plan(request, None, Some(&command_line), depth + 1)
            }
            ResolvedExecutable::Unknown { path, .. } if is_com_file(path) => {
                self.vdm_plan(request, path, &resolved.command_line, depth)
            }
            ResolvedExecutable::Script { path, .. } | ResolvedExecutable::Unknown { path, .. } => {
                Ok(direct_plan(path, tail, &resolved.command_line))
            }
            ResolvedExecutable::Builtin { program, .. } => {
                let mut argv = vec![program.display().to_string()];
                argv.extend_from_slice(tail);
                Ok(LaunchPlan {
                    program: program.clone(),
                    argv,
                    image: None,
                    command_line: resolved.command_line.clone(),
                })
            }
        }
    }

    fn vdm_plan(
        &self,
        request: &ProcessLaunchRequest,
        path: &Path,
        command_line: &str,
        depth: usize,
    ) -> Result<LaunchPlan> {
        if self.context.builtins().lookup(VDM_PROGRAM).is_none() {
            return Err(ProcessError::LoaderUnavailable(format!(
                "{} needs {VDM_PROGRAM}",
                path.display()
            )));
        }
        let command_line = format!(
            "{VDM_PROGRAM} --app-name \"{}\" {command_line}",
            path.display()
        );
        self.plan(request, None, Some(&command_line), depth + 1)
    }

    fn working_directory(&self, request: &ProcessLaunchRequest) -> PathBuf {
        match request.current_directory.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) if is_windows_path(dir) => {
                translate_windows_path_to_linux(dir, self.context.drive_root())
            }
            Some(dir) => self.context.current_dir().join(dir),
            None => self.context.current_dir().to_path_buf(),
        }
    }

    fn stdio_targets(&self, request: &ProcessLaunchRequest) -> Result<[StdioTarget; 3]> {
        let mut handles = if request.startup_info.flags.contains(StartupFlags::USESTDHANDLES) {
            request.startup_info.std_handles
        } else {
            self.context.std_handles()
        };
        if request.creation_flags.detaches_console() {
            handles = handles.without_console();
        }

        let mut targets = [StdioTarget::Inherit; 3];
        for (target, handle) in targets.iter_mut().zip(handles.as_array()) {
            *target = match handle {
                StdHandle::Console => StdioTarget::Inherit,
                StdHandle::Fd(fd) if fd >= 0 => StdioTarget::Fd(fd),
                StdHandle::Fd(_) => return Err(ProcessError::InvalidHandle(u64::MAX)),
                StdHandle::Invalid => StdioTarget::Null,
            };
        }
        Ok(targets)
    }
}

fn direct_plan(path: &Path, tail: &[String], command_line: &str) -> LaunchPlan {
    let mut argv = vec![path.display().to_string()];
    argv.extend_from_slice(tail);
    LaunchPlan {
        program: path.to_path_buf(),
        argv,
        image: Some(path.to_path_buf()),
        command_line: command_line.to_string(),
    }
}

fn session_mode(flags: CreationFlags) -> SessionMode {
    if flags.detaches_console() {
        SessionMode::NewSession
    } else if flags.contains(CreationFlags::CREATE_NEW_PROCESS_GROUP) {
        SessionMode::NewProcessGroup
    } else {
        SessionMode::Inherit
    }
}

fn warn_ignored(request: &ProcessLaunchRequest) {
    let ignored = request.creation_flags.ignored();
    if !ignored.is_empty() {
        log::warn!("ignoring creation flags {ignored:?}");
    }
    let startup = request.startup_info.flags.unsupported();
    if !startup.is_empty() {
        log::warn!("ignoring startup flags {startup:?}");
    }
    if let Some(desktop) = &request.startup_info.desktop {
        log::warn!("ignoring desktop {desktop:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{ForkExecLauncher, PendingChild};
    use crate::registry::{InProcessRegistry, NewProcessInfo};
    use litebox_shim_process::syscalls::{ProcessHandle, StdHandles, TicketHandle};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// Where a [`FailingRegistry`] fails
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum FailAt {
        Register,
        Attach,
        WaitTicket,
    }

    struct FailingRegistry {
        inner: InProcessRegistry,
        fail_at: FailAt,
    }

    impl FailingRegistry {
        fn new(fail_at: FailAt) -> Self {
            Self {
                inner: InProcessRegistry::new(),
                fail_at,
            }
        }

        fn check(&self, at: FailAt) -> Result<()> {
            if self.fail_at == at {
                Err(ProcessError::Registry("injected".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl ProcessRegistry for FailingRegistry {
        fn register(&self, descriptor: &ProcessDescriptor) -> Result<Registration> {
            self.check(FailAt::Register)?;
            self.inner.register(descriptor)
        }
        fn attach(&self, ticket: TicketHandle, host_pid: i32) -> Result<()> {
            self.check(FailAt::Attach)?;
            self.inner.attach(ticket, host_pid)
        }
        fn report_started(&self, ticket: TicketHandle) -> Result<()> {
            self.inner.report_started(ticket)
        }
        fn fail(&self, ticket: TicketHandle, code: u32) -> Result<()> {
            self.inner.fail(ticket, code)
        }
        fn wait_ticket(&self, ticket: TicketHandle) -> Result<NewProcessInfo> {
            self.check(FailAt::WaitTicket)?;
            self.inner.wait_ticket(ticket)
        }
        fn close_handle(&self, handle: u64) -> Result<Option<i32>> {
            self.inner.close_handle(handle)
        }

        fn close_all(&self) -> Vec<i32> {
            self.inner.close_all()
        }
        fn is_valid_handle(&self, handle: u64) -> bool {
            self.inner.is_valid_handle(handle)
        }
        fn unix_pid(&self, handle: ProcessHandle) -> Result<i32> {
            self.inner.unix_pid(handle)
        }
        fn set_exit_code(&self, handle: ProcessHandle, code: u32) -> Result<()> {
            self.inner.set_exit_code(handle, code)
        }
        fn exit_code(&self, handle: ProcessHandle) -> Result<Option<u32>> {
            self.inner.exit_code(handle)
        }
        fn open_handle_count(&self) -> usize {
            self.inner.open_handle_count()
        }
    }

    struct FailingLauncher;

    impl HostLauncher for FailingLauncher {
        fn fork_exec(&self, _image: &ExecImage) -> Result<PendingChild> {
            Err(ProcessError::TooManyOpenFiles)
        }
    }

    fn fake_pe(dll: bool) -> Vec<u8> {
        let mut image = vec![0u8; 0x100];
        image[0..2].copy_from_slice(b"MZ");
        image[0x18..0x1A].copy_from_slice(&0x40u16.to_le_bytes());
        image[0x3C..0x40].copy_from_slice(&0x40u32.to_le_bytes());
        image[0x40..0x44].copy_from_slice(b"PE\0\0");
        image[0x44..0x46].copy_from_slice(&0x8664u16.to_le_bytes());
        let characteristics: u16 = if dll { 0x2002 } else { 0x0002 };
        image[0x56..0x58].copy_from_slice(&characteristics.to_le_bytes());
        image
    }

    fn write_executable(path: &Path, contents: &[u8]) {
        fs::write(path, contents).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn context(dir: &Path) -> ProcessContext {
        ProcessContext::builder()
            .with_current_dir(dir)
            .with_drive_root(dir)
            .with_std_handles(StdHandles::new(StdHandle::Invalid, StdHandle::Invalid, StdHandle::Invalid))
            .build()
    }

    fn assert_no_leak<R: ProcessRegistry>(registry: &R, before: usize) {
        assert_eq!(registry.open_handle_count(), before);
    }

    #[test]
    fn test_spawn_success_keeps_process_and_thread() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        let registry = InProcessRegistry::new();
        let spawner = ProcessSpawner::new(&context, &registry, &ForkExecLauncher);

        let info = spawner
            .spawn(&ProcessLaunchRequest::command_line("/bin/sh -c \"exit 3\""))
            .unwrap();
        assert!(info.host_pid > 0);
        assert!(registry.is_valid_handle(info.process.0));
        assert!(registry.is_valid_handle(info.thread.0));
        // Only the ticket is gone
        assert_eq!(registry.open_handle_count(), 2);
        assert_eq!(registry.unix_pid(info.process).unwrap(), info.host_pid);
        assert_eq!(wait_pid(info.host_pid, false).unwrap(), Some(3));
    }

    #[test]
    fn test_registry_failures_leave_no_handles() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        for fail_at in [FailAt::Register, FailAt::Attach, FailAt::WaitTicket] {
            let registry = FailingRegistry::new(fail_at);
            let spawner = ProcessSpawner::new(&context, &registry, &ForkExecLauncher);
            let err = spawner
                .spawn(&ProcessLaunchRequest::command_line("/bin/sh -c \"sleep 5\""))
                .unwrap_err();
            assert!(matches!(err, ProcessError::Registry(_)));
            assert_no_leak(&registry, 0);
        }
    }

    #[test]
    fn test_fork_failure_leaves_no_handles() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        let registry = InProcessRegistry::new();
        let spawner = ProcessSpawner::new(&context, &registry, &FailingLauncher);

        let before = registry.register(&ProcessDescriptor::default()).unwrap();
        let err = spawner
            .spawn(&ProcessLaunchRequest::command_line("/bin/true"))
            .unwrap_err();
        assert!(matches!(err, ProcessError::TooManyOpenFiles));
        assert_no_leak(&registry, 3);
        assert!(registry.is_valid_handle(before.process.0));
        // The handles of the failed call came right after `before`
        for offset in [12, 16, 20] {
            assert!(!registry.is_valid_handle(before.ticket.0 + offset));
        }
    }

    #[test]
    fn test_exec_failure_is_bad_format() {
        let dir = tempfile::tempdir().unwrap();
        write_executable(&dir.path().join("garbage"), b"\x01\x02\x03 not a program\n");
        let context = context(dir.path());
        let registry = InProcessRegistry::new();
        let spawner = ProcessSpawner::new(&context, &registry, &ForkExecLauncher);

        let err = spawner
            .spawn(&ProcessLaunchRequest::command_line("garbage"))
            .unwrap_err();
        assert!(matches!(err, ProcessError::BadFormat(_)));
        assert_eq!(err.win32_code(), 193);
        assert_no_leak(&registry, 0);
    }

    #[test]
    fn test_debug_flag_rejected_for_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let context = ProcessContext::builder()
            .with_current_dir(dir.path())
            .with_builtin("notepad.exe", "/bin/true")
            .build();
        let registry = InProcessRegistry::new();
        let spawner = ProcessSpawner::new(&context, &registry, &ForkExecLauncher);

        let request = ProcessLaunchRequest::command_line("notepad.exe a.txt")
            .with_creation_flags(CreationFlags::DEBUG_PROCESS);
        assert!(matches!(
            spawner.spawn(&request),
            Err(ProcessError::InvalidParameter(_))
        ));

        let plan = spawner
            .plan(&ProcessLaunchRequest::default(), None, Some("notepad.exe a.txt"), 0)
            .unwrap();
        assert_eq!(plan.argv, vec!["/bin/true", "a.txt"]);
        assert!(plan.image.is_none());
        assert_no_leak(&registry, 0);
    }

    #[test]
    fn test_pe_images_go_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.exe"), fake_pe(false)).unwrap();
        fs::write(dir.path().join("lib.dll"), fake_pe(true)).unwrap();
        let registry = InProcessRegistry::new();

        let without_loader = context(dir.path());
        let spawner = ProcessSpawner::new(&without_loader, &registry, &ForkExecLauncher);
        assert!(matches!(
            spawner.spawn(&ProcessLaunchRequest::command_line("app -x")),
            Err(ProcessError::LoaderUnavailable(_))
        ));
        assert!(matches!(
            spawner.spawn(&ProcessLaunchRequest::command_line("lib.dll")),
            Err(ProcessError::BadFormat(_))
        ));

        let with_loader = ProcessContext::builder()
            .with_current_dir(dir.path())
            .with_loader("/bin/true")
            .build();
        let spawner = ProcessSpawner::new(&with_loader, &registry, &ForkExecLauncher);
        let plan = spawner
            .plan(&ProcessLaunchRequest::default(), None, Some("app -x"), 0)
            .unwrap();
        let image = dir.path().join("app.exe");
        assert_eq!(plan.argv, vec!["/bin/true".to_string(), image.display().to_string(), "-x".to_string()]);
        assert_eq!(plan.image, Some(image));

        let info = spawner.spawn(&ProcessLaunchRequest::command_line("app -x")).unwrap();
        assert_eq!(wait_pid(info.host_pid, false).unwrap(), Some(0));
    }

    #[test]
    fn test_batch_and_com_redirection() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("build.bat"), b"@echo off\r\n").unwrap();
        fs::write(dir.path().join("edit.com"), b"\xB4\x4C\xCD\x21").unwrap();
        let context = ProcessContext::builder()
            .with_current_dir(dir.path())
            .with_builtin("cmd.exe", "/bin/echo")
            .with_builtin(VDM_PROGRAM, "/bin/echo")
            .build();
        let registry = InProcessRegistry::new();
        let spawner = ProcessSpawner::new(&context, &registry, &ForkExecLauncher);
        let request = ProcessLaunchRequest::default();

        let plan = spawner.plan(&request, None, Some("build.bat one"), 0).unwrap();
        assert_eq!(plan.command_line, "cmd.exe /c build.bat one");
        assert_eq!(plan.argv, vec!["/bin/echo", "/c", "build.bat", "one"]);

        let plan = spawner.plan(&request, None, Some("edit.com file.txt"), 0).unwrap();
        let app = dir.path().join("edit.com").display().to_string();
        assert_eq!(plan.argv, vec!["/bin/echo".to_string(), "--app-name".to_string(), app, "edit.com".to_string(), "file.txt".to_string()]);

        let no_vdm = ProcessContext::builder().with_current_dir(dir.path()).build();
        let spawner = ProcessSpawner::new(&no_vdm, &registry, &ForkExecLauncher);
        assert!(matches!(
            spawner.plan(&request, None, Some("edit.com"), 0),
            Err(ProcessError::LoaderUnavailable(_))
        ));
    }

    #[test]
    fn test_parameters_checked_before_registration() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        let registry = InProcessRegistry::new();
        let spawner = ProcessSpawner::new(&context, &registry, &ForkExecLauncher);

        let bad_handle = ProcessLaunchRequest::command_line("/bin/true").with_std_handles(StdHandles::new(
            StdHandle::Fd(-1),
            StdHandle::Console,
            StdHandle::Console,
        ));
        assert!(matches!(spawner.spawn(&bad_handle), Err(ProcessError::InvalidHandle(_))));
        assert!(matches!(
            spawner.spawn(&ProcessLaunchRequest::default()),
            Err(ProcessError::InvalidParameter(_))
        ));
        assert!(matches!(
            spawner.spawn(&ProcessLaunchRequest::command_line("does-not-exist")),
            Err(ProcessError::NotFound(_))
        ));
        assert_no_leak(&registry, 0);
    }

    #[test]
    fn test_stdio_and_session_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let context = ProcessContext::builder().with_current_dir(dir.path()).build();
        let registry = InProcessRegistry::new();
        let spawner = ProcessSpawner::new(&context, &registry, &ForkExecLauncher);

        let request = ProcessLaunchRequest::command_line("/bin/true")
            .with_std_handles(StdHandles::new(StdHandle::Console, StdHandle::Fd(5), StdHandle::Invalid));
        assert_eq!(
            spawner.stdio_targets(&request).unwrap(),
            [StdioTarget::Inherit, StdioTarget::Fd(5), StdioTarget::Null]
        );

        let detached = request.clone().with_creation_flags(CreationFlags::DETACHED_PROCESS);
        assert_eq!(
            spawner.stdio_targets(&detached).unwrap(),
            [StdioTarget::Null, StdioTarget::Fd(5), StdioTarget::Null]
        );
        assert_eq!(session_mode(CreationFlags::CREATE_NEW_CONSOLE), SessionMode::NewSession);
        assert_eq!(
            session_mode(CreationFlags::CREATE_NEW_PROCESS_GROUP),
            SessionMode::NewProcessGroup
        );
        assert_eq!(session_mode(CreationFlags::empty()), SessionMode::Inherit);
    }

    #[test]
    fn test_working_directory_translation() {
        let dir = tempfile::tempdir().unwrap();
        let context = ProcessContext::builder()
            .with_current_dir("/work")
            .with_drive_root(dir.path())
            .build();
        let registry = InProcessRegistry::new();
        let spawner = ProcessSpawner::new(&context, &registry, &ForkExecLauncher);

        let request = ProcessLaunchRequest::command_line("x").with_current_directory("C:\\users\\me");
        assert_eq!(spawner.working_directory(&request), dir.path().join("users/me"));
        let request = ProcessLaunchRequest::command_line("x").with_current_directory("sub");
        assert_eq!(spawner.working_directory(&request), Path::new("/work/sub"));
        assert_eq!(
            spawner.working_directory(&ProcessLaunchRequest::command_line("x")),
            Path::new("/work")
        );
    }
}
