// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Platform-independent layer of the LiteBox Windows process bridge.
//!
//! This crate holds everything about Windows process creation that does not
//! depend on the host:
//! - the command-line codec (`CommandLineToArgvW` rules)
//! - environment blocks and the host/Windows environment split
//! - executable header sniffing (PE, NE, MZ, ELF, scripts)
//! - the `ProcessApi` interface implemented by the platform layer
//! - API tracing
//!
//! The Linux implementation lives in `litebox_platform_linux_process`.

pub mod cmdline;
pub mod environment;
pub mod loader;
pub mod path;
pub mod syscalls;
pub mod tracing;

use thiserror::Error;

// Re-export commonly used types
pub use cmdline::{build_command_line, parse_command_line};
pub use environment::{Environment, EnvironmentBlock, HostEnvironment, build_environment_block};
pub use loader::binary::BinaryType;

/// Win32 error codes surfaced through `GetLastError`
pub mod win32_error {
    pub const ERROR_SUCCESS: u32 = 0;
    pub const ERROR_FILE_NOT_FOUND: u32 = 2;
    pub const ERROR_PATH_NOT_FOUND: u32 = 3;
    pub const ERROR_TOO_MANY_OPEN_FILES: u32 = 4;
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_INVALID_HANDLE: u32 = 6;
    pub const ERROR_NOT_ENOUGH_MEMORY: u32 = 8;
    pub const ERROR_BAD_FORMAT: u32 = 11;
    pub const ERROR_OUTOFMEMORY: u32 = 14;
    pub const ERROR_GEN_FAILURE: u32 = 31;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_BUSY: u32 = 170;
    pub const ERROR_BAD_EXE_FORMAT: u32 = 193;
    pub const ERROR_NOT_OWNER: u32 = 288;
}

/// Errors produced by process creation and the synchronization bridge
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("bad executable format: {0}")]
    BadFormat(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("calling thread does not own the lock")]
    NotOwner,

    #[error("object is busy")]
    Busy,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid handle: 0x{0:X}")]
    InvalidHandle(u64),

    #[error("too many open files")]
    TooManyOpenFiles,

    #[error("no loader available for {0}")]
    LoaderUnavailable(String),

    #[error("process registry error: {0}")]
    Registry(String),

    #[error("host error (errno {0})")]
    Os(i32),
}

pub type Result<T> = core::result::Result<T, ProcessError>;

impl ProcessError {
    /// Translate a raw host errno into the error taxonomy.
    ///
    /// This is the fixed table used for exec failures reported over the
    /// back-channel as well as for any other failing host call.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc_errno::ENOENT | libc_errno::ENOTDIR => {
                ProcessError::NotFound(format!("errno {errno}"))
            }
            libc_errno::EPERM | libc_errno::EACCES | libc_errno::EROFS => {
                ProcessError::AccessDenied(format!("errno {errno}"))
            }
            libc_errno::ENOEXEC | libc_errno::EINVAL | libc_errno::ELIBBAD => {
                ProcessError::BadFormat(format!("errno {errno}"))
            }
            libc_errno::ENOMEM | libc_errno::E2BIG => ProcessError::OutOfMemory,
            libc_errno::EMFILE | libc_errno::ENFILE => ProcessError::TooManyOpenFiles,
            libc_errno::EBUSY | libc_errno::ETXTBSY => ProcessError::Busy,
            libc_errno::EBADF => ProcessError::InvalidHandle(u64::MAX),
            other => ProcessError::Os(other),
        }
    }

    /// The Win32 error code a caller of `CreateProcess` would observe
    pub fn win32_code(&self) -> u32 {
        use win32_error::*;
        match self {
            ProcessError::NotFound(_) => ERROR_FILE_NOT_FOUND,
            ProcessError::AccessDenied(_) => ERROR_ACCESS_DENIED,
            ProcessError::BadFormat(_) | ProcessError::LoaderUnavailable(_) => ERROR_BAD_EXE_FORMAT,
            ProcessError::OutOfMemory => ERROR_OUTOFMEMORY,
            ProcessError::NotOwner => ERROR_NOT_OWNER,
            ProcessError::Busy => ERROR_BUSY,
            ProcessError::InvalidParameter(_) => ERROR_INVALID_PARAMETER,
            ProcessError::InvalidHandle(_) => ERROR_INVALID_HANDLE,
            ProcessError::TooManyOpenFiles => ERROR_TOO_MANY_OPEN_FILES,
            ProcessError::Registry(_) | ProcessError::Os(_) => ERROR_GEN_FAILURE,
        }
    }
}

impl From<std::io::Error> for ProcessError {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => ProcessError::from_errno(errno),
            None => match err.kind() {
                std::io::ErrorKind::NotFound => ProcessError::NotFound(err.to_string()),
                std::io::ErrorKind::PermissionDenied => ProcessError::AccessDenied(err.to_string()),
                std::io::ErrorKind::OutOfMemory => ProcessError::OutOfMemory,
                std::io::ErrorKind::InvalidInput => {
                    ProcessError::InvalidParameter(err.to_string())
                }
                _ => ProcessError::Os(0),
            },
        }
    }
}

impl From<std::collections::TryReserveError> for ProcessError {
    fn from(_: std::collections::TryReserveError) -> Self {
        ProcessError::OutOfMemory
    }
}

/// Linux errno values used by the translation table.
///
/// Kept local so the shim stays free of a libc dependency.
mod libc_errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const E2BIG: i32 = 7;
    pub const ENOEXEC: i32 = 8;
    pub const EBADF: i32 = 9;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EBUSY: i32 = 16;
    pub const ENOTDIR: i32 = 20;
    pub const EINVAL: i32 = 22;
    pub const ENFILE: i32 = 23;
    pub const EMFILE: i32 = 24;
    pub const ETXTBSY: i32 = 26;
    pub const EROFS: i32 = 30;
    pub const ELIBBAD: i32 = 80;
}
