// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Environment blocks and the host/Windows environment split
//!
//! Windows code sees its own environment (`PATH=C:\windows;...`) while the
//! host process needs host values for the same names. Each side keeps its
//! own: when a child is launched the host values of the host-sourced
//! variables are put first, and the caller's values of the special variables
//! travel under the `WINE` escape prefix. [`initial_environment`] undoes the
//! escaping on the receiving side.

use crate::{ProcessError, Result};

/// Prefix used to carry the caller's own value of a special variable
pub const ESCAPE_PREFIX: &str = "WINE";

/// Variables whose caller value is passed under [`ESCAPE_PREFIX`]
pub const SPECIAL_VARIABLES: &[&str] = &["PATH", "PWD", "HOME", "TEMP", "TMP"];

/// Variables whose host value always wins in a child's block
pub const HOST_SOURCED_VARIABLES: &[&str] = &["PATH", "TEMP", "TMP", "HOME"];

/// Per-process bootstrap variables set by the launcher itself
pub const DYNAMIC_VARIABLES: &[&str] = &[
    "WINEDLLOVERRIDES",
    "WINEDATADIR",
    "WINEHOMEDIR",
    "WINEBUILDDIR",
    "WINECONFIGDIR",
    "WINEUNIXCP",
    "WINELOCALE",
    "WINEUSERLOCALE",
    "WINEUSERNAME",
    "WINEPRELOADRESERVE",
    "WINELOADERNOEXEC",
    "WINESERVERSOCKET",
];

/// `WINEDLLDIR0`, `WINEDLLDIR1`, ... are all dynamic
const DYNAMIC_PREFIXES: &[&str] = &["WINEDLLDIR"];

/// Is `name` one of the special variables (case-insensitive)?
pub fn is_special_variable(name: &str) -> bool {
    SPECIAL_VARIABLES.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// If `name` is an escaped special variable (`WINEPATH`), return the
/// unescaped name in upper case (`PATH`).
pub fn unescape_special(name: &str) -> Option<&'static str> {
    let prefix = name.get(..ESCAPE_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(ESCAPE_PREFIX) {
        return None;
    }
    let rest = &name[ESCAPE_PREFIX.len()..];
    SPECIAL_VARIABLES
        .iter()
        .copied()
        .find(|s| s.eq_ignore_ascii_case(rest))
}

/// Does `name` collide with a name the launcher reserves for itself?
///
/// Covers the dynamic bootstrap set and the escaped special names. A caller
/// value under one of these names would shadow the real one and is stripped.
pub fn is_internal_variable(name: &str) -> bool {
    DYNAMIC_VARIABLES.iter().any(|s| s.eq_ignore_ascii_case(name))
        || DYNAMIC_PREFIXES.iter().any(|p| {
            name.get(..p.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(p))
        })
        || unescape_special(name).is_some()
}

/// Split a `NAME=value` entry.
///
/// The separator search starts after the first character so that
/// drive-curdir entries such as `=C:=C:\dir` keep their leading `=` in the
/// name.
fn split_entry(entry: &str) -> Option<(&str, &str)> {
    let first = entry.chars().next()?.len_utf8();
    let pos = entry[first..].find('=')? + first;
    Some((&entry[..pos], &entry[pos + 1..]))
}

/// A Windows-level environment: ordered, with case-insensitive names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pairs; later duplicates replace earlier ones
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = Self::new();
        for (k, v) in pairs {
            env.set(k, v);
        }
        env
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a variable, keeping its position if it already exists
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.vars.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            slot.1 = value;
        } else {
            self.vars.push((name, value));
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.vars.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.vars.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Parse a narrow `NAME=value\0...\0\0` block
    pub fn parse_narrow(block: &[u8]) -> Self {
        let mut env = Self::new();
        for raw in block.split(|&b| b == 0).take_while(|e| !e.is_empty()) {
            let entry = String::from_utf8_lossy(raw);
            if let Some((k, v)) = split_entry(&entry) {
                env.set(k, v);
            }
        }
        env
    }

    /// Parse a UTF-16 block, as passed with `CREATE_UNICODE_ENVIRONMENT`
    pub fn parse_wide(block: &[u16]) -> Self {
        let mut env = Self::new();
        for raw in block.split(|&c| c == 0).take_while(|e| !e.is_empty()) {
            let entry = String::from_utf16_lossy(raw);
            if let Some((k, v)) = split_entry(&entry) {
                env.set(k, v);
            }
        }
        env
    }

    pub fn to_narrow_block(&self) -> Vec<u8> {
        let mut block = Vec::new();
        for (k, v) in &self.vars {
            block.extend_from_slice(k.as_bytes());
            block.push(b'=');
            block.extend_from_slice(v.as_bytes());
            block.push(0);
        }
        if block.is_empty() {
            block.push(0);
        }
        block.push(0);
        block
    }

    pub fn to_wide_block(&self) -> Vec<u16> {
        let mut block = Vec::new();
        for (k, v) in &self.vars {
            block.extend(k.encode_utf16());
            block.push(u16::from(b'='));
            block.extend(v.encode_utf16());
            block.push(0);
        }
        if block.is_empty() {
            block.push(0);
        }
        block.push(0);
        block
    }
}

/// Snapshot of the host process environment (case-sensitive names)
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment {
    vars: Vec<(String, String)>,
}

impl HostEnvironment {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Snapshot the environment of the running process.
    ///
    /// Variables that are not valid Unicode are converted lossily.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .map(|(k, v)| {
                    (
                        k.to_string_lossy().into_owned(),
                        v.to_string_lossy().into_owned(),
                    )
                })
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A NUL-delimited, doubly NUL-terminated narrow environment block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentBlock(Vec<u8>);

impl EnvironmentBlock {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `NAME=value` entries in block order
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.0
            .split(|&b| b == 0)
            .take_while(|e| !e.is_empty())
            .filter_map(|e| core::str::from_utf8(e).ok())
    }

    /// Look up a variable by exact name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries()
            .filter_map(split_entry)
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// Convert to the UTF-16 form
    pub fn to_wide(&self) -> Vec<u16> {
        let mut wide = Vec::with_capacity(self.0.len());
        for entry in self.entries() {
            wide.extend(entry.encode_utf16());
            wide.push(0);
        }
        if wide.is_empty() {
            wide.push(0);
        }
        wide.push(0);
        wide
    }
}

/// Build the environment block handed to a child process.
///
/// Host values of the host-sourced variables come first. The caller's
/// values of the special variables follow under the escape prefix, then
/// every other caller variable except drive-curdir entries and names that
/// collide with internal ones.
///
/// # Errors
///
/// `OutOfMemory` if the block cannot be allocated, `InvalidParameter` if an
/// entry contains a NUL character.
pub fn build_environment_block(env: &Environment, host: &HostEnvironment) -> Result<EnvironmentBlock> {
    let mut entries: Vec<(String, &str)> = Vec::new();
    entries.try_reserve(env.len() + HOST_SOURCED_VARIABLES.len())?;

    for &name in HOST_SOURCED_VARIABLES {
        if let Some(value) = host.get(name) {
            entries.push((name.to_string(), value));
        }
    }

    for (name, value) in env.iter() {
        if name.starts_with('=') {
            continue;
        }
        if is_special_variable(name) {
            entries.push((format!("{ESCAPE_PREFIX}{}", name.to_ascii_uppercase()), value));
        } else if is_internal_variable(name) {
            log::trace!("dropping reserved variable {name} from child environment");
        } else {
            entries.push((name.to_string(), value));
        }
    }

    let total = entries
        .iter()
        .map(|(k, v)| k.len() + v.len() + 2)
        .sum::<usize>()
        + 2;
    let mut block = Vec::new();
    block.try_reserve_exact(total)?;

    for (name, value) in &entries {
        if name.contains('\0') || value.contains('\0') {
            return Err(ProcessError::InvalidParameter(format!(
                "environment entry {name} contains NUL"
            )));
        }
        block.extend_from_slice(name.as_bytes());
        block.push(b'=');
        block.extend_from_slice(value.as_bytes());
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    Ok(EnvironmentBlock(block))
}

/// Reconstruct the Windows-level environment on the receiving side.
///
/// Escaped special variables get their original names back. Raw host
/// values of the special variables and the dynamic bootstrap variables are
/// not visible to Windows code.
pub fn initial_environment(host: &HostEnvironment) -> Environment {
    let mut env = Environment::new();
    for (name, value) in host.iter() {
        if let Some(original) = unescape_special(name) {
            env.set(original, value);
        } else if is_special_variable(name) || is_internal_variable(name) {
            continue;
        } else {
            env.set(name, value);
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostEnvironment {
        HostEnvironment::from_pairs([
            ("PATH", "/usr/bin:/bin"),
            ("HOME", "/home/user"),
            ("TMP", "/tmp"),
            ("LANG", "C.UTF-8"),
        ])
    }

    #[test]
    fn test_environment_is_case_insensitive() {
        let mut env = Environment::new();
        env.set("Path", "C:\\windows");
        env.set("PATH", "C:\\other");
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("path"), Some("C:\\other"));
        assert_eq!(env.remove("pAtH").as_deref(), Some("C:\\other"));
        assert!(env.is_empty());
    }

    #[test]
    fn test_parse_narrow_and_wide_blocks() {
        let narrow = b"A=1\0=C:=C:\\dir\0B=x=y\0\0";
        let env = Environment::parse_narrow(narrow);
        assert_eq!(env.get("A"), Some("1"));
        assert_eq!(env.get("=C:"), Some("C:\\dir"));
        assert_eq!(env.get("B"), Some("x=y"));

        let wide = env.to_wide_block();
        assert_eq!(Environment::parse_wide(&wide), env);
        assert_eq!(Environment::parse_narrow(&env.to_narrow_block()), env);
    }

    #[test]
    fn test_non_ascii_names_survive_parsing() {
        let env = Environment::parse_narrow("ÄVAR=1\0B=2\0\0".as_bytes());
        assert_eq!(env.len(), 2);
        assert_eq!(env.get("ÄVAR"), Some("1"));
        assert_eq!(env.get("B"), Some("2"));

        let wide: Vec<u16> = "€=euro\0\0".encode_utf16().collect();
        assert_eq!(Environment::parse_wide(&wide).get("€"), Some("euro"));
    }

    #[test]
    fn test_empty_block_is_double_nul() {
        assert_eq!(Environment::new().to_narrow_block(), vec![0, 0]);
        let block = build_environment_block(&Environment::new(), &HostEnvironment::default()).unwrap();
        assert_eq!(block.as_bytes(), &[0, 0]);
        assert_eq!(block.entries().count(), 0);
    }

    #[test]
    fn test_caller_path_cannot_override_host_path() {
        let env = Environment::from_pairs([("PATH", "/bogus"), ("FOO", "bar")]);
        let block = build_environment_block(&env, &host()).unwrap();

        assert_eq!(block.get("PATH"), Some("/usr/bin:/bin"));
        assert_eq!(block.get("WINEPATH"), Some("/bogus"));
        assert_eq!(block.get("FOO"), Some("bar"));
        // Host-sourced values come first
        assert_eq!(block.entries().next(), Some("PATH=/usr/bin:/bin"));
    }

    #[test]
    fn test_special_names_are_normalized() {
        let env = Environment::from_pairs([("temp", "C:\\Temp"), ("Pwd", "C:\\")]);
        let block = build_environment_block(&env, &host()).unwrap();
        assert_eq!(block.get("WINETEMP"), Some("C:\\Temp"));
        assert_eq!(block.get("WINEPWD"), Some("C:\\"));
        assert_eq!(block.get("temp"), None);
    }

    #[test]
    fn test_internal_and_drive_entries_are_stripped() {
        let env = Environment::from_pairs([
            ("WINESERVERSOCKET", "7"),
            ("WINELOADERNOEXEC", "1"),
            ("WINEDLLDIR0", "/x"),
            ("WINEPATH", "/attack"),
            ("=C:", "C:\\dir"),
            ("KEEP", "yes"),
        ]);
        let block = build_environment_block(&env, &host()).unwrap();
        let entries: Vec<&str> = block.entries().collect();
        assert_eq!(
            entries,
            vec!["PATH=/usr/bin:/bin", "TMP=/tmp", "HOME=/home/user", "KEEP=yes"]
        );
    }

    #[test]
    fn test_nul_in_value_is_rejected() {
        let env = Environment::from_pairs([("BAD", "a\0b")]);
        let err = build_environment_block(&env, &host()).unwrap_err();
        assert!(matches!(err, ProcessError::InvalidParameter(_)));
    }

    #[test]
    fn test_initial_environment_unescapes() {
        let host = HostEnvironment::from_pairs([
            ("PATH", "/usr/bin"),
            ("WINEPATH", "C:\\windows"),
            ("WINEHOME", "C:\\users\\me"),
            ("WINESERVERSOCKET", "4"),
            ("LANG", "C"),
        ]);
        let env = initial_environment(&host);
        assert_eq!(env.get("PATH"), Some("C:\\windows"));
        assert_eq!(env.get("HOME"), Some("C:\\users\\me"));
        assert_eq!(env.get("WINESERVERSOCKET"), None);
        assert_eq!(env.get("LANG"), Some("C"));
        assert_eq!(env.len(), 3);
    }

    #[test]
    fn test_block_survives_initial_environment() {
        let env = Environment::from_pairs([("PATH", "C:\\bin"), ("X", "1")]);
        let block = build_environment_block(&env, &host()).unwrap();
        let received = HostEnvironment::from_pairs(
            block.entries().filter_map(split_entry).collect::<Vec<_>>(),
        );
        let seen = initial_environment(&received);
        assert_eq!(seen.get("PATH"), Some("C:\\bin"));
        assert_eq!(seen.get("X"), Some("1"));
    }

    #[test]
    fn test_block_to_wide() {
        let env = Environment::from_pairs([("A", "é")]);
        let block = build_environment_block(&env, &HostEnvironment::default()).unwrap();
        let wide = block.to_wide();
        assert_eq!(Environment::parse_wide(&wide).get("A"), Some("é"));
        assert_eq!(&wide[wide.len() - 2..], &[0, 0]);
    }
}
