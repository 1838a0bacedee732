// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! KERNEL32 process API interface
//!
//! This module defines the request/response types of `CreateProcess` and the
//! process control calls that have to be implemented by the platform layer
//! (litebox_platform_linux_process).

use bitflags::bitflags;

use crate::environment::Environment;
use crate::{ProcessError, Result};

/// Windows process handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle(pub u64);

/// Windows thread handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle(pub u64);

/// Registry ticket for an in-flight process creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TicketHandle(pub u64);

/// `WaitForSingleObject` result: the object was signaled
pub const WAIT_OBJECT_0: u32 = 0x0000_0000;
/// `WaitForSingleObject` result: the timeout elapsed
pub const WAIT_TIMEOUT: u32 = 0x0000_0102;
/// `WaitForSingleObject` result: the wait failed
pub const WAIT_FAILED: u32 = 0xFFFF_FFFF;
/// Timeout value meaning "wait forever"
pub const INFINITE: u32 = 0xFFFF_FFFF;
/// Exit code reported for a process that is still running
pub const STILL_ACTIVE: u32 = 259;

bitflags! {
    /// `dwCreationFlags` of `CreateProcess`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CreationFlags: u32 {
        const DEBUG_PROCESS = 0x0000_0001;
        const DEBUG_ONLY_THIS_PROCESS = 0x0000_0002;
        const CREATE_SUSPENDED = 0x0000_0004;
        const DETACHED_PROCESS = 0x0000_0008;
        const CREATE_NEW_CONSOLE = 0x0000_0010;
        const NORMAL_PRIORITY_CLASS = 0x0000_0020;
        const IDLE_PRIORITY_CLASS = 0x0000_0040;
        const HIGH_PRIORITY_CLASS = 0x0000_0080;
        const REALTIME_PRIORITY_CLASS = 0x0000_0100;
        const CREATE_NEW_PROCESS_GROUP = 0x0000_0200;
        const CREATE_UNICODE_ENVIRONMENT = 0x0000_0400;
        const CREATE_SEPARATE_WOW_VDM = 0x0000_0800;
        const CREATE_SHARED_WOW_VDM = 0x0000_1000;
        const BELOW_NORMAL_PRIORITY_CLASS = 0x0000_4000;
        const ABOVE_NORMAL_PRIORITY_CLASS = 0x0000_8000;
        const CREATE_DEFAULT_ERROR_MODE = 0x0400_0000;
        const CREATE_NO_WINDOW = 0x0800_0000;
        const PROFILE_USER = 0x1000_0000;
        const PROFILE_KERNEL = 0x2000_0000;
        const PROFILE_SERVER = 0x4000_0000;
    }
}

impl CreationFlags {
    /// Flags that have an effect on the launched process
    pub const HONORED: Self = Self::DETACHED_PROCESS
        .union(Self::CREATE_NEW_CONSOLE)
        .union(Self::CREATE_NEW_PROCESS_GROUP)
        .union(Self::CREATE_UNICODE_ENVIRONMENT);

    /// Debugger attachment flags
    pub const DEBUG: Self = Self::DEBUG_PROCESS.union(Self::DEBUG_ONLY_THIS_PROCESS);

    /// Recognised flags that are accepted but have no effect
    pub fn ignored(self) -> Self {
        self.difference(Self::HONORED).difference(Self::DEBUG)
    }

    /// Does the child lose the caller's console?
    pub fn detaches_console(self) -> bool {
        self.intersects(Self::DETACHED_PROCESS | Self::CREATE_NEW_CONSOLE)
    }
}

bitflags! {
    /// `STARTUPINFO.dwFlags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StartupFlags: u32 {
        const USESHOWWINDOW = 0x0000_0001;
        const USESIZE = 0x0000_0002;
        const USEPOSITION = 0x0000_0004;
        const USECOUNTCHARS = 0x0000_0008;
        const USEFILLATTRIBUTE = 0x0000_0010;
        const RUNFULLSCREEN = 0x0000_0020;
        const FORCEONFEEDBACK = 0x0000_0040;
        const FORCEOFFFEEDBACK = 0x0000_0080;
        const USESTDHANDLES = 0x0000_0100;
        const USEHOTKEY = 0x0000_0200;
    }
}

impl StartupFlags {
    /// Flags with no effect on a host process
    pub fn unsupported(self) -> Self {
        self.difference(Self::USESTDHANDLES)
    }
}

/// One of the three standard handles given to a child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdHandle {
    /// The caller's console stream for this slot
    #[default]
    Console,
    /// A host file descriptor owned by the caller
    Fd(i32),
    /// No handle; the child sees `/dev/null`
    Invalid,
}

impl StdHandle {
    pub fn is_console(self) -> bool {
        matches!(self, StdHandle::Console)
    }
}

/// Standard input, output and error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StdHandles {
    pub input: StdHandle,
    pub output: StdHandle,
    pub error: StdHandle,
}

impl StdHandles {
    pub fn new(input: StdHandle, output: StdHandle, error: StdHandle) -> Self {
        Self {
            input,
            output,
            error,
        }
    }

    /// All three slots, in fd order
    pub fn as_array(&self) -> [StdHandle; 3] {
        [self.input, self.output, self.error]
    }

    /// Replace console handles by invalid ones
    #[must_use]
    pub fn without_console(self) -> Self {
        let strip = |h: StdHandle| if h.is_console() { StdHandle::Invalid } else { h };
        Self {
            input: strip(self.input),
            output: strip(self.output),
            error: strip(self.error),
        }
    }
}

/// The parts of `STARTUPINFO` the launcher looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupInfo {
    pub flags: StartupFlags,
    pub std_handles: StdHandles,
    pub desktop: Option<String>,
    pub title: Option<String>,
    pub show_window: u16,
}

/// Where the child's environment comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EnvironmentSource {
    /// The caller's own Windows-level environment
    #[default]
    Inherit,
    /// Explicit variables
    Pairs(Vec<(String, String)>),
    /// Raw `lpEnvironment` block, UTF-16LE with `CREATE_UNICODE_ENVIRONMENT`
    /// and narrow otherwise
    Block(Vec<u8>),
}

impl EnvironmentSource {
    /// Materialize the environment the child should see
    pub fn resolve(&self, flags: CreationFlags, inherited: &Environment) -> Environment {
        match self {
            EnvironmentSource::Inherit => inherited.clone(),
            EnvironmentSource::Pairs(pairs) => Environment::from_pairs(pairs.iter().cloned()),
            EnvironmentSource::Block(bytes) if flags.contains(CreationFlags::CREATE_UNICODE_ENVIRONMENT) => {
                let wide: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                Environment::parse_wide(&wide)
            }
            EnvironmentSource::Block(bytes) => Environment::parse_narrow(bytes),
        }
    }
}

/// Arguments of a `CreateProcess` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessLaunchRequest {
    pub application_name: Option<String>,
    pub command_line: Option<String>,
    pub environment: EnvironmentSource,
    pub current_directory: Option<String>,
    pub startup_info: StartupInfo,
    pub creation_flags: CreationFlags,
    pub inherit_handles: bool,
}

impl ProcessLaunchRequest {
    /// Launch by command line, the program is its first token
    pub fn command_line(command_line: impl Into<String>) -> Self {
        Self {
            command_line: Some(command_line.into()),
            ..Default::default()
        }
    }

    /// Launch a named application
    pub fn application(application_name: impl Into<String>) -> Self {
        Self {
            application_name: Some(application_name.into()),
            ..Default::default()
        }
    }

    /// Set the command line
    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = Some(command_line.into());
        self
    }

    /// Set the environment source
    pub fn with_environment(mut self, environment: EnvironmentSource) -> Self {
        self.environment = environment;
        self
    }

    /// Set the working directory (Windows or host path)
    pub fn with_current_directory(mut self, dir: impl Into<String>) -> Self {
        self.current_directory = Some(dir.into());
        self
    }

    /// Set the startup info
    pub fn with_startup_info(mut self, startup_info: StartupInfo) -> Self {
        self.startup_info = startup_info;
        self
    }

    /// Use explicit standard handles (sets `STARTF_USESTDHANDLES`)
    pub fn with_std_handles(mut self, handles: StdHandles) -> Self {
        self.startup_info.flags |= StartupFlags::USESTDHANDLES;
        self.startup_info.std_handles = handles;
        self
    }

    /// Set the creation flags
    pub fn with_creation_flags(mut self, flags: CreationFlags) -> Self {
        self.creation_flags = flags;
        self
    }

    /// Set the inherit-handles boolean
    pub fn with_inherit_handles(mut self, inherit: bool) -> Self {
        self.inherit_handles = inherit;
        self
    }

    /// Check the request is well formed
    pub fn validate(&self) -> Result<()> {
        let empty = |s: &Option<String>| s.as_deref().is_none_or(|s| s.trim().is_empty());
        if empty(&self.application_name) && empty(&self.command_line) {
            return Err(ProcessError::InvalidParameter(
                "neither application name nor command line given".to_string(),
            ));
        }
        Ok(())
    }
}

/// `PROCESS_INFORMATION` plus the host pid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInformation {
    pub process: ProcessHandle,
    pub thread: ThreadHandle,
    pub process_id: u32,
    pub thread_id: u32,
    pub host_pid: i32,
}

/// KERNEL32 process API interface
///
/// This trait defines the process creation and control APIs that need to
/// be implemented by the platform layer
pub trait ProcessApi {
    /// CreateProcess - Launch a program
    ///
    /// On failure no handle created for the call remains open
    fn create_process(&mut self, request: &ProcessLaunchRequest) -> Result<ProcessInformation>;

    /// WaitForSingleObject on a process handle
    ///
    /// Returns `WAIT_OBJECT_0` once the process exited or `WAIT_TIMEOUT`
    fn wait_for_process(&mut self, handle: ProcessHandle, timeout_ms: u32) -> Result<u32>;

    /// GetExitCodeProcess - `STILL_ACTIVE` while the process runs
    fn get_exit_code_process(&mut self, handle: ProcessHandle) -> Result<u32>;

    /// TerminateProcess
    fn terminate_process(&mut self, handle: ProcessHandle, exit_code: u32) -> Result<()>;

    /// CloseHandle for process and thread handles
    fn close_handle(&mut self, handle: u64) -> Result<()>;

    /// GetEnvironmentStrings - the caller's Windows-level environment
    fn get_environment_strings(&self) -> Environment;

    /// SearchPath - Locate an executable without opening a process for it
    fn search_path(&mut self, name: &str, extension: Option<&str>) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_flag_values() {
        assert_eq!(CreationFlags::CREATE_NEW_CONSOLE.bits(), 0x10);
        assert_eq!(CreationFlags::CREATE_NEW_PROCESS_GROUP.bits(), 0x200);
        assert_eq!(CreationFlags::CREATE_UNICODE_ENVIRONMENT.bits(), 0x400);
        assert_eq!(CreationFlags::CREATE_NO_WINDOW.bits(), 0x0800_0000);
    }

    #[test]
    fn test_ignored_flags() {
        let flags = CreationFlags::CREATE_NEW_PROCESS_GROUP
            | CreationFlags::HIGH_PRIORITY_CLASS
            | CreationFlags::DEBUG_PROCESS
            | CreationFlags::CREATE_SUSPENDED;
        assert_eq!(
            flags.ignored(),
            CreationFlags::HIGH_PRIORITY_CLASS | CreationFlags::CREATE_SUSPENDED
        );
        assert!(CreationFlags::DETACHED_PROCESS.detaches_console());
        assert!(!CreationFlags::CREATE_NEW_PROCESS_GROUP.detaches_console());
    }

    #[test]
    fn test_std_handles_without_console() {
        let handles = StdHandles::new(StdHandle::Console, StdHandle::Fd(7), StdHandle::Console);
        assert_eq!(
            handles.without_console().as_array(),
            [StdHandle::Invalid, StdHandle::Fd(7), StdHandle::Invalid]
        );
    }

    #[test]
    fn test_environment_source_wide_block() {
        let env = Environment::from_pairs([("A", "1")]);
        let bytes: Vec<u8> = env.to_wide_block().iter().flat_map(|c| c.to_le_bytes()).collect();
        let source = EnvironmentSource::Block(bytes.clone());

        let wide = source.resolve(CreationFlags::CREATE_UNICODE_ENVIRONMENT, &Environment::new());
        assert_eq!(wide.get("A"), Some("1"));

        // Without the flag the same bytes are read as a narrow block
        let narrow = source.resolve(CreationFlags::empty(), &Environment::new());
        assert_ne!(narrow, wide);
    }

    #[test]
    fn test_request_validation() {
        assert!(ProcessLaunchRequest::default().validate().is_err());
        assert!(ProcessLaunchRequest::command_line("  ").validate().is_err());
        assert!(ProcessLaunchRequest::command_line("a.exe").validate().is_ok());

        let request = ProcessLaunchRequest::application("a.exe")
            .with_std_handles(StdHandles::default());
        assert!(request.startup_info.flags.contains(StartupFlags::USESTDHANDLES));
    }
}
