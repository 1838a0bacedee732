// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Windows process API interface
//!
//! This module provides the KERNEL32 process creation and control interface
//! implemented by the platform layer.

pub mod kernel32;

pub use kernel32::{
    CreationFlags, EnvironmentSource, INFINITE, ProcessApi, ProcessHandle, ProcessInformation,
    ProcessLaunchRequest, STILL_ACTIVE, StartupFlags, StartupInfo, StdHandle, StdHandles,
    ThreadHandle, TicketHandle, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
