// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Runner for the LiteBox Windows process bridge
//!
//! This crate provides the CLI interface for launching programs through
//! `CreateProcess` semantics on Linux: resolution, environment
//! translation, the fork/exec back-channel and process waiting.

#![cfg(target_os = "linux")]

pub mod logger;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser};
use litebox_platform_linux_process::{LinuxProcessPlatform, ProcessContext};
use litebox_shim_process::environment::initial_environment;
use litebox_shim_process::syscalls::{
    CreationFlags, INFINITE, ProcessApi, ProcessInformation, ProcessLaunchRequest, WAIT_TIMEOUT,
};
use litebox_shim_process::tracing::{
    ApiCategory, FilterRule, TraceConfig, TraceFilter, TraceFormat, TraceOutput, TracedProcessApi,
    Tracer,
};
use litebox_shim_process::{Environment, HostEnvironment, build_command_line};
use std::path::PathBuf;
use std::sync::Arc;

/// Exit code reported when `--timeout-ms` expires
pub const TIMEOUT_EXIT_CODE: u32 = 124;

/// Launch a program through the LiteBox Windows process bridge
#[derive(Parser, Debug)]
#[command(name = "litebox_runner_process_launcher")]
pub struct CliArgs {
    /// Program to launch (Windows or host path, or a name to search for)
    #[arg(required = true, value_hint = clap::ValueHint::CommandName)]
    pub program: String,

    /// Arguments to pass to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub arguments: Vec<String>,

    /// Explicit application name; the command line is then passed untouched
    #[arg(long)]
    pub app_name: Option<String>,

    /// Working directory of the child (Windows or host path)
    #[arg(long)]
    pub cwd: Option<String>,

    /// Set a variable in the child's environment
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub env: Vec<(String, String)>,

    /// Start from an empty Windows environment
    #[arg(long)]
    pub clear_env: bool,

    /// Extra directory searched after the current one (repeatable)
    #[arg(long, value_name = "DIR")]
    pub search_dir: Vec<PathBuf>,

    /// Windows system directory
    #[arg(long, value_name = "DIR")]
    pub system_dir: Option<PathBuf>,

    /// Host directory backing drive C:
    #[arg(long, value_name = "DIR")]
    pub drive_root: Option<PathBuf>,

    /// Host program that runs PE executables
    #[arg(long, value_name = "PROGRAM")]
    pub loader: Option<PathBuf>,

    /// Satisfy a Windows program name with a host program (repeatable)
    #[arg(long = "builtin", value_name = "NAME=PROGRAM", value_parser = parse_assignment)]
    pub builtins: Vec<(String, String)>,

    /// CREATE_NEW_PROCESS_GROUP
    #[arg(long)]
    pub new_process_group: bool,

    /// DETACHED_PROCESS
    #[arg(long)]
    pub detached: bool,

    /// CREATE_NEW_CONSOLE
    #[arg(long)]
    pub new_console: bool,

    /// Do not wait for the program to exit
    #[arg(long)]
    pub no_wait: bool,

    /// Kill the program if it runs longer than this
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u32>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Enable API tracing
    #[arg(long, default_value = "false")]
    pub trace_apis: bool,

    /// Trace output format (text or json)
    #[arg(long, default_value = "text")]
    pub trace_format: TraceFormat,

    /// Trace output file (default: stderr)
    #[arg(long)]
    pub trace_output: Option<PathBuf>,

    /// Filter traced functions by pattern (e.g., "*Process")
    #[arg(long)]
    pub trace_filter: Option<String>,

    /// Filter traced functions by category (process, environment,
    /// synchronization, file_system)
    #[arg(long)]
    pub trace_category: Option<ApiCategory>,
}

fn parse_assignment(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}

impl CliArgs {
    /// Process-wide context for the launch
    pub fn context(&self) -> Result<ProcessContext> {
        let host = HostEnvironment::from_process();
        let mut windows = if self.clear_env {
            Environment::new()
        } else {
            initial_environment(&host)
        };
        for (key, value) in &self.env {
            windows.set(key.as_str(), value.as_str());
        }

        let current_dir = std::env::current_dir().context("cannot determine current directory")?;
        let mut builder = ProcessContext::builder()
            .with_host_environment(host)
            .with_windows_environment(windows)
            .with_current_dir(current_dir);
        for dir in &self.search_dir {
            builder = builder.with_search_dir(dir);
        }
        if let Some(dir) = &self.system_dir {
            builder = builder.with_system_dir(dir);
        }
        if let Some(root) = &self.drive_root {
            builder = builder.with_drive_root(root);
        }
        if let Some(loader) = &self.loader {
            builder = builder.with_loader(loader);
        }
        for (name, program) in &self.builtins {
            builder = builder.with_builtin(name, program);
        }
        Ok(builder.build())
    }

    /// The `CreateProcess` request for the program and its arguments
    pub fn request(&self) -> ProcessLaunchRequest {
        let mut argv = Vec::with_capacity(self.arguments.len() + 1);
        argv.push(self.program.as_str());
        argv.extend(self.arguments.iter().map(String::as_str));

        let mut flags = CreationFlags::empty();
        flags.set(CreationFlags::CREATE_NEW_PROCESS_GROUP, self.new_process_group);
        flags.set(CreationFlags::DETACHED_PROCESS, self.detached);
        flags.set(CreationFlags::CREATE_NEW_CONSOLE, self.new_console);

        let mut request =
            ProcessLaunchRequest::command_line(build_command_line(&argv)).with_creation_flags(flags);
        request.application_name = self.app_name.clone();
        if let Some(cwd) = &self.cwd {
            request = request.with_current_directory(cwd.as_str());
        }
        request
    }

    /// Tracer configured from the trace flags
    pub fn tracer(&self) -> Result<Tracer> {
        let mut config = if self.trace_apis {
            TraceConfig::enabled()
        } else {
            TraceConfig::default()
        };
        config = config.with_format(self.trace_format);
        if let Some(path) = &self.trace_output {
            config = config.with_output(TraceOutput::File(path.clone()));
        }

        let mut filter = TraceFilter::new();
        if let Some(pattern) = &self.trace_filter {
            filter = filter.add_rule(FilterRule::Pattern(pattern.clone()));
        }
        if let Some(category) = self.trace_category {
            filter = filter.add_rule(FilterRule::Category(vec![category]));
        }

        Tracer::new(config, filter).context("failed to open trace output")
    }
}

/// Launch the program and return its exit code
pub fn run(cli_args: &CliArgs) -> Result<u32> {
    let context = cli_args.context()?;
    let tracer = Arc::new(cli_args.tracer()?);
    let platform = LinuxProcessPlatform::new(context);
    let mut api = TracedProcessApi::new(platform, tracer);
    launch(&mut api, &cli_args.request(), !cli_args.no_wait, cli_args.timeout_ms)
}

/// Create the process, optionally wait for it, and release its handles
pub fn launch<P: ProcessApi>(
    api: &mut P,
    request: &ProcessLaunchRequest,
    wait: bool,
    timeout_ms: Option<u32>,
) -> Result<u32> {
    let info = api
        .create_process(request)
        .map_err(|e| anyhow!("failed to launch {}: {e}", describe(request)))?;
    log::info!(
        "started pid {} (host pid {})",
        info.process_id,
        info.host_pid
    );

    let result = if wait {
        wait_for_exit(api, &info, timeout_ms)
    } else {
        Ok(0)
    };

    for handle in [info.thread.0, info.process.0] {
        if let Err(e) = api.close_handle(handle) {
            log::warn!("failed to close handle 0x{handle:X}: {e}");
        }
    }
    result
}

fn wait_for_exit<P: ProcessApi>(
    api: &mut P,
    info: &ProcessInformation,
    timeout_ms: Option<u32>,
) -> Result<u32> {
    let status = api.wait_for_process(info.process, timeout_ms.unwrap_or(INFINITE))?;
    if status == WAIT_TIMEOUT {
        log::warn!("pid {} timed out, terminating", info.process_id);
        api.terminate_process(info.process, TIMEOUT_EXIT_CODE)?;
    }
    let code = api.get_exit_code_process(info.process)?;
    log::info!("pid {} exited with {code}", info.process_id);
    Ok(code)
}

fn describe(request: &ProcessLaunchRequest) -> String {
    request
        .application_name
        .as_deref()
        .or(request.command_line.as_deref())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("runner").chain(args.iter().copied()))
    }

    #[test]
    fn test_request_quotes_arguments() {
        let cli = parse(&["notepad.exe", "my file.txt", "-x"]);
        let request = cli.request();
        assert_eq!(request.command_line.as_deref(), Some("notepad.exe \"my file.txt\" -x"));
        assert!(request.application_name.is_none());
        assert!(request.creation_flags.is_empty());
    }

    #[test]
    fn test_flags_and_environment() {
        let cli = parse(&[
            "--new-process-group",
            "--detached",
            "--clear-env",
            "--env",
            "Greeting=hi",
            "--builtin",
            "cmd.exe=/bin/sh",
            "prog",
        ]);
        let request = cli.request();
        assert!(request.creation_flags.contains(CreationFlags::CREATE_NEW_PROCESS_GROUP));
        assert!(request.creation_flags.contains(CreationFlags::DETACHED_PROCESS));

        let context = cli.context().unwrap();
        assert_eq!(context.windows_environment().len(), 1);
        assert_eq!(context.windows_environment().get("GREETING"), Some("hi"));
        assert!(context.builtins().lookup("CMD.EXE").is_some());
    }

    #[test]
    fn test_bad_assignment_rejected() {
        assert!(CliArgs::try_parse_from(["runner", "--env", "novalue", "prog"]).is_err());
        assert!(CliArgs::try_parse_from(["runner", "--trace-category", "bogus", "prog"]).is_err());
    }

    #[test]
    fn test_trace_options_parse() {
        let cli = parse(&["--trace-format", "json", "--trace-category", "file-system", "prog"]);
        assert_eq!(cli.trace_format, TraceFormat::Json);
        assert_eq!(cli.trace_category, Some(ApiCategory::FileSystem));
    }
}
