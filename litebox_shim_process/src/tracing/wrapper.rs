// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Tracing wrapper for the process APIs
//!
//! This module provides a wrapper that intercepts `ProcessApi` calls
//! for tracing purposes.

use crate::Result;
use crate::environment::Environment;
use crate::syscalls::kernel32::{ProcessApi, ProcessHandle, ProcessInformation, ProcessLaunchRequest};
use crate::tracing::{ApiCategory, TraceEvent, Tracer};
use std::fmt::Display;
use std::sync::Arc;

/// Wrapper for ProcessApi that adds tracing
pub struct TracedProcessApi<T: ProcessApi> {
    inner: T,
    tracer: Arc<Tracer>,
}

impl<T: ProcessApi> TracedProcessApi<T> {
    /// Create a new traced API wrapper
    pub fn new(inner: T, tracer: Arc<Tracer>) -> Self {
        Self { inner, tracer }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Emit CALL, run `f`, emit RETURN with the formatted result
    fn traced<R>(
        &mut self,
        function: &str,
        category: ApiCategory,
        args: impl FnOnce() -> String,
        ret: impl FnOnce(&R) -> String,
        f: impl FnOnce(&mut T) -> Result<R>,
    ) -> Result<R> {
        if self.tracer.is_enabled() {
            self.tracer
                .trace(TraceEvent::call(function, category).with_args(args()));
        }

        let result = f(&mut self.inner);

        if self.tracer.is_enabled() {
            let ret_str = match &result {
                Ok(value) => format!("Ok({})", ret(value)),
                Err(e) => format_err(e, e.win32_code()),
            };
            self.tracer
                .trace(TraceEvent::return_event(function, category).with_return_value(ret_str));
        }

        result
    }
}

fn format_err(e: &impl Display, code: u32) -> String {
    format!("Err({e}, last_error={code})")
}

fn quoted(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("\"{}\"", v.escape_debug()),
        None => "NULL".to_string(),
    }
}

impl<T: ProcessApi> ProcessApi for TracedProcessApi<T> {
    fn create_process(&mut self, request: &ProcessLaunchRequest) -> Result<ProcessInformation> {
        self.traced(
            "CreateProcess",
            ApiCategory::Process,
            || {
                format!(
                    "application_name={}, command_line={}, current_directory={}, flags=0x{:08X}, startup_flags=0x{:08X}, inherit_handles={}",
                    quoted(request.application_name.as_deref()),
                    quoted(request.command_line.as_deref()),
                    quoted(request.current_directory.as_deref()),
                    request.creation_flags.bits(),
                    request.startup_info.flags.bits(),
                    request.inherit_handles,
                )
            },
            |info: &ProcessInformation| {
                format!(
                    "process=0x{:X}, thread=0x{:X}, pid={}, tid={}, host_pid={}",
                    info.process.0, info.thread.0, info.process_id, info.thread_id, info.host_pid
                )
            },
            |inner| inner.create_process(request),
        )
    }

    fn wait_for_process(&mut self, handle: ProcessHandle, timeout_ms: u32) -> Result<u32> {
        self.traced(
            "WaitForSingleObject",
            ApiCategory::Synchronization,
            || format!("handle=0x{:X}, timeout_ms={timeout_ms}", handle.0),
            |status| format!("0x{status:X}"),
            |inner| inner.wait_for_process(handle, timeout_ms),
        )
    }

    fn get_exit_code_process(&mut self, handle: ProcessHandle) -> Result<u32> {
        self.traced(
            "GetExitCodeProcess",
            ApiCategory::Process,
            || format!("handle=0x{:X}", handle.0),
            |code| format!("exit_code={code}"),
            |inner| inner.get_exit_code_process(handle),
        )
    }

    fn terminate_process(&mut self, handle: ProcessHandle, exit_code: u32) -> Result<()> {
        self.traced(
            "TerminateProcess",
            ApiCategory::Process,
            || format!("handle=0x{:X}, exit_code={exit_code}", handle.0),
            |_| "()".to_string(),
            |inner| inner.terminate_process(handle, exit_code),
        )
    }

    fn close_handle(&mut self, handle: u64) -> Result<()> {
        self.traced(
            "CloseHandle",
            ApiCategory::Process,
            || format!("handle=0x{handle:X}"),
            |_| "()".to_string(),
            |inner| inner.close_handle(handle),
        )
    }

    fn get_environment_strings(&self) -> Environment {
        // CALL only, the environment itself is not dumped
        if self.tracer.is_enabled() {
            self.tracer
                .trace(TraceEvent::call("GetEnvironmentStrings", ApiCategory::Environment));
        }
        self.inner.get_environment_strings()
    }

    fn search_path(&mut self, name: &str, extension: Option<&str>) -> Result<String> {
        self.traced(
            "SearchPath",
            ApiCategory::FileSystem,
            || format!("name={}, extension={}", quoted(Some(name)), quoted(extension)),
            |path: &String| quoted(Some(path.as_str())),
            |inner| inner.search_path(name, extension),
        )
    }
}
