// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Launches must not leak host descriptors, on success or failure.
//!
//! Kept as the only test of this binary so no other test opens
//! descriptors concurrently.

#![cfg(target_os = "linux")]

use litebox_platform_linux_process::{LinuxProcessPlatform, ProcessContext, ProcessRegistry};
use litebox_shim_process::Environment;
use litebox_shim_process::syscalls::{INFINITE, ProcessApi, ProcessLaunchRequest};
use std::os::unix::fs::PermissionsExt;

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

#[test]
fn test_no_descriptor_leaks() {
    let dir = tempfile::tempdir().unwrap();
    let garbage = dir.path().join("garbage.exe");
    std::fs::write(&garbage, b"not an executable at all").unwrap();
    std::fs::set_permissions(&garbage, std::fs::Permissions::from_mode(0o755)).unwrap();

    let context = ProcessContext::builder()
        .with_current_dir(dir.path())
        .with_windows_environment(Environment::from_pairs([("Path", "C:\\windows")]))
        .build();
    let mut platform = LinuxProcessPlatform::new(context);

    // Warm up lazily opened descriptors such as /dev/null
    let info = platform
        .create_process(&ProcessLaunchRequest::command_line("/bin/true"))
        .unwrap();
    platform.wait_for_process(info.process, INFINITE).unwrap();
    platform.close_handle(info.thread.0).unwrap();
    platform.close_handle(info.process.0).unwrap();

    let before = open_fds();

    for _ in 0..10 {
        assert!(platform
            .create_process(&ProcessLaunchRequest::command_line("/nonexistent/prog"))
            .is_err());
        assert!(platform
            .create_process(&ProcessLaunchRequest::command_line(garbage.to_str().unwrap()))
            .is_err());

        let info = platform
            .create_process(&ProcessLaunchRequest::command_line("/bin/sh -c \"exit 2\""))
            .unwrap();
        platform.wait_for_process(info.process, INFINITE).unwrap();
        assert_eq!(platform.get_exit_code_process(info.process).unwrap(), 2);
        platform.close_handle(info.thread.0).unwrap();
        platform.close_handle(info.process.0).unwrap();
    }

    assert_eq!(open_fds(), before);
    assert_eq!(platform.registry().open_handle_count(), 0);
}
