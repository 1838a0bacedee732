// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Process-wide launch context
//!
//! Everything the resolver and spawner need to know about the calling
//! process is captured once, at entry, and passed by reference.

use std::path::{Path, PathBuf};

use litebox_shim_process::environment::initial_environment;
use litebox_shim_process::syscalls::StdHandles;
use litebox_shim_process::{Environment, HostEnvironment, Result};

use crate::builtin::BuiltinRegistry;

/// The calling process as seen by process creation
#[derive(Debug, Clone)]
pub struct ProcessContext {
    host_environment: HostEnvironment,
    windows_environment: Environment,
    current_dir: PathBuf,
    system_dir: Option<PathBuf>,
    search_dirs: Vec<PathBuf>,
    drive_root: PathBuf,
    loader: Option<PathBuf>,
    builtins: BuiltinRegistry,
    std_handles: StdHandles,
}

impl ProcessContext {
    /// Start building a context
    pub fn builder() -> ProcessContextBuilder {
        ProcessContextBuilder::default()
    }

    /// Snapshot the running process
    ///
    /// The Windows-level environment is reconstructed from the host one, so
    /// values passed under the escape prefix are seen under their own names.
    pub fn from_host() -> Result<Self> {
        let host = HostEnvironment::from_process();
        let windows = initial_environment(&host);
        let current_dir = std::env::current_dir()?;
        Ok(Self::builder()
            .with_windows_environment(windows)
            .with_host_environment(host)
            .with_current_dir(current_dir)
            .build())
    }

    pub fn host_environment(&self) -> &HostEnvironment {
        &self.host_environment
    }

    pub fn windows_environment(&self) -> &Environment {
        &self.windows_environment
    }

    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    pub fn system_dir(&self) -> Option<&Path> {
        self.system_dir.as_deref()
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Host directory backing drive `C:`
    pub fn drive_root(&self) -> &Path {
        &self.drive_root
    }

    /// Host program that runs PE executables
    pub fn loader(&self) -> Option<&Path> {
        self.loader.as_deref()
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        &self.builtins
    }

    /// The caller's own standard handles
    pub fn std_handles(&self) -> StdHandles {
        self.std_handles
    }
}

/// Builder for [`ProcessContext`]
#[derive(Debug, Clone)]
pub struct ProcessContextBuilder {
    context: ProcessContext,
}

impl Default for ProcessContextBuilder {
    fn default() -> Self {
        Self {
            context: ProcessContext {
                host_environment: HostEnvironment::default(),
                windows_environment: Environment::new(),
                current_dir: PathBuf::from("/"),
                system_dir: None,
                search_dirs: Vec::new(),
                drive_root: PathBuf::from("/"),
                loader: None,
                builtins: BuiltinRegistry::new(),
                std_handles: StdHandles::default(),
            },
        }
    }
}

impl ProcessContextBuilder {
    pub fn with_host_environment(mut self, env: HostEnvironment) -> Self {
        self.context.host_environment = env;
        self
    }

    pub fn with_windows_environment(mut self, env: Environment) -> Self {
        self.context.windows_environment = env;
        self
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context.current_dir = dir.into();
        self
    }

    pub fn with_system_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context.system_dir = Some(dir.into());
        self
    }

    /// Add a directory searched after the current one
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context.search_dirs.push(dir.into());
        self
    }

    pub fn with_drive_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.context.drive_root = root.into();
        self
    }

    pub fn with_loader(mut self, loader: impl Into<PathBuf>) -> Self {
        self.context.loader = Some(loader.into());
        self
    }

    pub fn with_builtins(mut self, builtins: BuiltinRegistry) -> Self {
        self.context.builtins = builtins;
        self
    }

    /// Register a single built-in program
    pub fn with_builtin(mut self, name: &str, program: impl Into<PathBuf>) -> Self {
        self.context.builtins.register(name, program);
        self
    }

    pub fn with_std_handles(mut self, handles: StdHandles) -> Self {
        self.context.std_handles = handles;
        self
    }

    pub fn build(self) -> ProcessContext {
        self.context
    }
}
