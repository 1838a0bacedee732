// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Executable resolver
//!
//! Maps a program name to something that can be launched. Search order,
//! first match wins:
//! 1. a name with a directory or drive is used as given; otherwise the
//!    current directory, the extra search directories, the system directory
//!    and finally the Windows-level `PATH` (the host `PATH` when unset)
//! 2. a candidate that opens is sniffed and returned with its handle
//! 3. a name without an extension is retried with the default extension
//! 4. the built-in registry
//! 5. `NotFound`
//!
//! A candidate that exists but cannot be opened ends the search with
//! `AccessDenied`.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use litebox_shim_process::loader::{BinaryType, Sniffed, sniff};
use litebox_shim_process::path::{
    base_name, extension, has_path_component, is_windows_path, translate_windows_path_to_linux,
};
use litebox_shim_process::{ProcessError, Result};

use crate::context::ProcessContext;

/// Extension tried for names given without one
pub const DEFAULT_EXTENSION: &str = ".exe";

/// A program ready to be launched
#[derive(Debug)]
pub enum ResolvedExecutable {
    /// Recognised binary image
    Native {
        path: PathBuf,
        binary: BinaryType,
        file: File,
    },
    /// `#!` script
    Script {
        path: PathBuf,
        interpreter: String,
        file: File,
    },
    /// File whose header matched no known format
    Unknown { path: PathBuf, file: File },
    /// Satisfied by the built-in registry; there is no file to open
    Builtin { name: String, program: PathBuf },
}

impl ResolvedExecutable {
    /// Host path of the file, `None` for built-ins
    pub fn path(&self) -> Option<&Path> {
        match self {
            ResolvedExecutable::Native { path, .. }
            | ResolvedExecutable::Script { path, .. }
            | ResolvedExecutable::Unknown { path, .. } => Some(path),
            ResolvedExecutable::Builtin { .. } => None,
        }
    }

    /// The open read handle, `None` for built-ins
    pub fn file(&self) -> Option<&File> {
        match self {
            ResolvedExecutable::Native { file, .. }
            | ResolvedExecutable::Script { file, .. }
            | ResolvedExecutable::Unknown { file, .. } => Some(file),
            ResolvedExecutable::Builtin { .. } => None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, ResolvedExecutable::Builtin { .. })
    }

    /// Short description for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            ResolvedExecutable::Native { .. } => "native",
            ResolvedExecutable::Script { .. } => "script",
            ResolvedExecutable::Unknown { .. } => "unknown",
            ResolvedExecutable::Builtin { .. } => "builtin",
        }
    }
}

/// Resolved program plus the command line to give it
#[derive(Debug)]
pub struct ResolvedCommand {
    pub executable: ResolvedExecutable,
    /// Name that matched, as written by the caller
    pub name: String,
    pub command_line: String,
}

/// Resolves program names against a [`ProcessContext`]
pub struct ExecutableResolver<'a> {
    context: &'a ProcessContext,
}

impl<'a> ExecutableResolver<'a> {
    pub fn new(context: &'a ProcessContext) -> Self {
        Self { context }
    }

    /// Resolve `name`, using `default_extension` (or `.exe`) for a name
    /// without one.
    ///
    /// # Errors
    ///
    /// `NotFound` when no step matches, `AccessDenied` when a candidate
    /// exists but cannot be opened.
    pub fn resolve(&self, name: &str, default_extension: Option<&str>) -> Result<ResolvedExecutable> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProcessError::NotFound(String::new()));
        }

        if let Some(found) = self.probe_name(name)? {
            return Ok(found);
        }

        let with_extension = extension(name)
            .is_none()
            .then(|| format!("{name}{}", default_extension.unwrap_or(DEFAULT_EXTENSION)));

        if let Some(candidate) = &with_extension {
            if let Some(found) = self.probe_name(candidate)? {
                return Ok(found);
            }
        }

        let builtin = self
            .context
            .builtins()
            .lookup(name)
            .or_else(|| with_extension.as_deref().and_then(|n| self.context.builtins().lookup(n)));
        if let Some(entry) = builtin {
            log::debug!("{name} resolved to built-in {}", entry.name);
            return Ok(ResolvedExecutable::Builtin {
                name: entry.name.clone(),
                program: entry.program.clone(),
            });
        }

        Err(ProcessError::NotFound(name.to_string()))
    }

    /// SearchPath: locate `name` on disk without opening it as a program
    pub fn search_path(&self, name: &str, default_extension: Option<&str>) -> Result<PathBuf> {
        let mut names = vec![name.to_string()];
        if extension(name).is_none() {
            names.push(format!("{name}{}", default_extension.unwrap_or(DEFAULT_EXTENSION)));
        }
        for candidate_name in &names {
            if let Some(path) = self
                .candidates(candidate_name)
                .into_iter()
                .find(|p| p.is_file())
            {
                return Ok(path);
            }
        }
        Err(ProcessError::NotFound(name.to_string()))
    }

    /// Extract the program from `CreateProcess` arguments
    ///
    /// An application name is used verbatim; an empty command line then
    /// becomes the quoted application name. Without one, a quoted leading
    /// token is taken as the program, otherwise the command line is tried
    /// word by word with a growing prefix so that unquoted paths with spaces
    /// still resolve. The command line is re-quoted when the matched name
    /// contains a space.
    pub fn resolve_command_line(
        &self,
        application_name: Option<&str>,
        command_line: Option<&str>,
    ) -> Result<ResolvedCommand> {
        let command_line = command_line.filter(|c| !c.trim().is_empty());

        if let Some(app) = application_name.filter(|a| !a.trim().is_empty()) {
            let executable = self.resolve(app, None)?;
            let command_line = match command_line {
                Some(c) => c.to_string(),
                None => format!("\"{app}\""),
            };
            return Ok(ResolvedCommand {
                executable,
                name: app.to_string(),
                command_line,
            });
        }

        let Some(line) = command_line else {
            return Err(ProcessError::InvalidParameter(
                "no application name or command line".to_string(),
            ));
        };
        let line = line.trim_start();

        if let Some(rest) = line.strip_prefix('"') {
            let name = rest.split('"').next().unwrap_or(rest);
            let executable = self.resolve(name, None)?;
            return Ok(ResolvedCommand {
                executable,
                name: name.to_string(),
                command_line: line.to_string(),
            });
        }

        let mut ends: Vec<usize> = line
            .char_indices()
            .filter(|&(_, c)| c == ' ' || c == '\t')
            .map(|(i, _)| i)
            .collect();
        ends.push(line.len());

        for end in ends {
            let name = &line[..end];
            if name.ends_with([' ', '\t']) {
                continue;
            }
            match self.resolve(name, None) {
                Ok(executable) => {
                    let command_line = if name.contains([' ', '\t']) {
                        format!("\"{name}\"{}", &line[end..])
                    } else {
                        line.to_string()
                    };
                    return Ok(ResolvedCommand {
                        executable,
                        name: name.to_string(),
                        command_line,
                    });
                }
                Err(ProcessError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let first = line.split([' ', '\t']).next().unwrap_or(line);
        Err(ProcessError::NotFound(first.to_string()))
    }

    /// Host paths to try for `name`, in search order
    fn candidates(&self, name: &str) -> Vec<PathBuf> {
        if has_path_component(name) {
            let path = if is_windows_path(name) {
                translate_windows_path_to_linux(name, self.context.drive_root())
            } else {
                PathBuf::from(name)
            };
            return vec![self.context.current_dir().join(path)];
        }

        self.search_directories()
            .into_iter()
            .map(|dir| dir.join(name))
            .collect()
    }

    /// Directories searched for a bare name
    pub fn search_directories(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.context.current_dir().to_path_buf()];
        dirs.extend(self.context.search_dirs().iter().cloned());
        if let Some(system) = self.context.system_dir() {
            dirs.push(system.to_path_buf());
        }

        if let Some(path) = self.context.windows_environment().get("PATH") {
            for entry in path.split(';').filter(|e| !e.is_empty()) {
                let dir = if is_windows_path(entry) {
                    translate_windows_path_to_linux(entry, self.context.drive_root())
                } else {
                    PathBuf::from(entry)
                };
                dirs.push(dir);
            }
        } else if let Some(path) = self.context.host_environment().get("PATH") {
            dirs.extend(std::env::split_paths(path).filter(|d| !d.as_os_str().is_empty()));
        }
        dirs
    }

    fn probe_name(&self, name: &str) -> Result<Option<ResolvedExecutable>> {
        for candidate in self.candidates(name) {
            if let Some(found) = probe(&candidate)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

/// Open and sniff a single candidate
fn probe(path: &Path) -> Result<Option<ResolvedExecutable>> {
    log::trace!("probing {}", path.display());
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            open_failure(path, e)?;
            return Ok(None);
        }
    };

    if file.metadata()?.is_dir() {
        return Ok(None);
    }

    let path = path.to_path_buf();
    let resolved = match sniff(&mut file)? {
        Sniffed::Binary(binary) => ResolvedExecutable::Native { path, binary, file },
        Sniffed::Script { interpreter } => ResolvedExecutable::Script {
            path,
            interpreter,
            file,
        },
        Sniffed::Unknown => ResolvedExecutable::Unknown { path, file },
    };
    log::debug!(
        "resolved {} as {}",
        resolved.path().map_or_else(String::new, |p| p.display().to_string()),
        resolved.kind()
    );
    Ok(Some(resolved))
}

/// `Ok` moves on to the next candidate, an error ends the search
fn open_failure(path: &Path, err: io::Error) -> Result<()> {
    match err.kind() {
        io::ErrorKind::PermissionDenied => Err(ProcessError::AccessDenied(path.display().to_string())),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => Ok(()),
        _ => Err(err.into()),
    }
}

/// Is this an MS-DOS batch file?
pub fn is_batch_file(path: &Path) -> bool {
    let name = path.to_string_lossy();
    matches!(
        extension(base_name(&name)).map(str::to_ascii_lowercase).as_deref(),
        Some(".bat" | ".cmd")
    )
}

/// Is this a `.com` image?
pub fn is_com_file(path: &Path) -> bool {
    let name = path.to_string_lossy();
    extension(base_name(&name)).is_some_and(|e| e.eq_ignore_ascii_case(".com"))
}
