// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! KERNEL32-style process functions
//!
//! Boolean-returning wrappers over a [`ProcessApi`] that report failures
//! through the thread-local last error, the way Windows callers expect.

use std::cell::Cell;

use litebox_shim_process::syscalls::{
    ProcessApi, ProcessHandle, ProcessInformation, ProcessLaunchRequest, StartupFlags, ThreadHandle,
    WAIT_FAILED,
};
use litebox_shim_process::win32_error::{ERROR_BAD_FORMAT, ERROR_SUCCESS};

/// `WinExec` result for a successful launch
pub const WIN_EXEC_SUCCESS: u32 = 33;

thread_local! {
    static LAST_ERROR: Cell<u32> = const { Cell::new(ERROR_SUCCESS) };
}

pub fn set_last_error(code: u32) {
    LAST_ERROR.with(|e| e.set(code));
}

pub fn last_error() -> u32 {
    LAST_ERROR.with(Cell::get)
}

/// Set the calling thread's last error (SetLastError)
///
/// # Safety
/// The function body is safe, but marked `unsafe` because it's part of an FFI boundary
/// with `extern "C"` calling convention. Callers must ensure proper calling convention.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kernel32_SetLastError(code: u32) {
    set_last_error(code);
}

/// Get the calling thread's last error (GetLastError)
///
/// # Safety
/// The function body is safe, but marked `unsafe` because it's part of an FFI boundary
/// with `extern "C"` calling convention. Callers must ensure proper calling convention.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kernel32_GetLastError() -> u32 {
    last_error()
}

const EMPTY_INFORMATION: ProcessInformation = ProcessInformation {
    process: ProcessHandle(0),
    thread: ThreadHandle(0),
    process_id: 0,
    thread_id: 0,
    host_pid: 0,
};

/// CreateProcess
///
/// Fills `information` and returns true on success. On failure
/// `information` is zeroed and the last error is set.
pub fn create_process<P: ProcessApi + ?Sized>(
    api: &mut P,
    request: &ProcessLaunchRequest,
    information: &mut ProcessInformation,
) -> bool {
    match api.create_process(request) {
        Ok(info) => {
            *information = info;
            set_last_error(ERROR_SUCCESS);
            true
        }
        Err(e) => {
            *information = EMPTY_INFORMATION;
            set_last_error(e.win32_code());
            false
        }
    }
}

/// WinExec
///
/// Returns 33 on success. Failures return the Win32 error code when it is
/// below 32 and `ERROR_BAD_FORMAT` otherwise.
pub fn win_exec<P: ProcessApi + ?Sized>(api: &mut P, command_line: &str, show_window: u16) -> u32 {
    let mut request = ProcessLaunchRequest::command_line(command_line);
    request.startup_info.flags |= StartupFlags::USESHOWWINDOW;
    request.startup_info.show_window = show_window;

    let mut info = EMPTY_INFORMATION;
    if !create_process(api, &request, &mut info) {
        let code = last_error();
        return if code < 32 { code } else { ERROR_BAD_FORMAT };
    }

    for handle in [info.thread.0, info.process.0] {
        if let Err(e) = api.close_handle(handle) {
            log::warn!("WinExec: failed to close handle 0x{handle:X}: {e}");
        }
    }
    WIN_EXEC_SUCCESS
}

/// WaitForSingleObject on a process handle; `WAIT_FAILED` sets the last error
pub fn wait_for_single_object<P: ProcessApi + ?Sized>(
    api: &mut P,
    handle: ProcessHandle,
    timeout_ms: u32,
) -> u32 {
    match api.wait_for_process(handle, timeout_ms) {
        Ok(status) => status,
        Err(e) => {
            set_last_error(e.win32_code());
            WAIT_FAILED
        }
    }
}

/// GetExitCodeProcess
pub fn get_exit_code_process<P: ProcessApi + ?Sized>(
    api: &mut P,
    handle: ProcessHandle,
    exit_code: &mut u32,
) -> bool {
    match api.get_exit_code_process(handle) {
        Ok(code) => {
            *exit_code = code;
            true
        }
        Err(e) => {
            set_last_error(e.win32_code());
            false
        }
    }
}

/// CloseHandle
pub fn close_handle<P: ProcessApi + ?Sized>(api: &mut P, handle: u64) -> bool {
    match api.close_handle(handle) {
        Ok(()) => true,
        Err(e) => {
            set_last_error(e.win32_code());
            false
        }
    }
}
