// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Built-in program registry
//!
//! Well-known Windows program names (`winevdm.exe`, `cmd.exe`, ...) can be
//! satisfied by a host program instead of a file on the Windows side. The
//! registry is consulted by the resolver after the filesystem search fails.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use litebox_shim_process::path::base_name;

/// Name of the built-in hosting DOS and Win16 images
pub const VDM_PROGRAM: &str = "winevdm.exe";

/// A program satisfied without a filesystem entry on the Windows side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinProgram {
    /// Name as registered (e.g., "winevdm.exe")
    pub name: String,
    /// Host program executed in its place
    pub program: PathBuf,
}

/// Built-in programs keyed by lower-cased base name
#[derive(Debug, Clone, Default)]
pub struct BuiltinRegistry {
    programs: BTreeMap<String, BuiltinProgram>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(name: &str) -> String {
        base_name(name).to_lowercase()
    }

    /// Register `name`, replacing any previous entry
    pub fn register(&mut self, name: &str, program: impl Into<PathBuf>) {
        let entry = BuiltinProgram {
            name: name.to_string(),
            program: program.into(),
        };
        self.programs.insert(Self::normalize(name), entry);
    }

    /// Look up a program by name; directories in `name` are ignored
    pub fn lookup(&self, name: &str) -> Option<&BuiltinProgram> {
        self.programs.get(&Self::normalize(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<BuiltinProgram> {
        self.programs.remove(&Self::normalize(name))
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.programs
            .values()
            .map(|p| (p.name.as_str(), p.program.as_path()))
    }
}
