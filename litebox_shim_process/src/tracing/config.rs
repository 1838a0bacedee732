// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Tracing configuration
//!
//! Selects whether process API calls are traced, how each event is
//! rendered and where the lines go.

use std::path::PathBuf;
use std::str::FromStr;

/// Trace output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// Human-readable text format
    Text,
    /// JSON lines for machine parsing
    Json,
}

impl FromStr for TraceFormat {
    type Err = String;

    /// Case-insensitive `text` or `json`, as given on the command line
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(TraceFormat::Text),
            "json" => Ok(TraceFormat::Json),
            other => Err(format!("unknown trace format '{other}'")),
        }
    }
}

/// Trace output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutput {
    /// Output to stdout, interleaved with a launched child sharing it
    Stdout,
    /// Output to stderr; keeps stdout free for the launched program
    Stderr,
    /// Output to a file, created or truncated when the tracer opens it
    File(PathBuf),
}

/// Tracing configuration
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Whether process API calls are traced at all
    pub enabled: bool,
    /// Rendering of each CALL/RETURN event
    pub format: TraceFormat,
    /// Where trace lines are written
    pub output: TraceOutput,
    /// Prefix events with seconds since the epoch
    pub include_timestamps: bool,
    /// Tag events with the calling thread, so concurrent launches can be
    /// told apart
    pub include_thread_ids: bool,
}

impl Default for TraceConfig {
    /// Disabled, text to stderr, with timestamps and thread ids
    fn default() -> Self {
        Self {
            enabled: false,
            format: TraceFormat::Text,
            output: TraceOutput::Stderr,
            include_timestamps: true,
            include_thread_ids: true,
        }
    }
}

impl TraceConfig {
    /// Create a new trace configuration with tracing enabled
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// Set the output format
    pub fn with_format(mut self, format: TraceFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the output destination
    pub fn with_output(mut self, output: TraceOutput) -> Self {
        self.output = output;
        self
    }

    /// Enable or disable timestamps
    pub fn with_timestamps(mut self, enable: bool) -> Self {
        self.include_timestamps = enable;
        self
    }

    /// Enable or disable thread ids
    pub fn with_thread_ids(mut self, enable: bool) -> Self {
        self.include_thread_ids = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keeps_stdout_free() {
        let config = TraceConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.output, TraceOutput::Stderr);
        assert!(TraceConfig::enabled().enabled);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<TraceFormat>(), Ok(TraceFormat::Json));
        assert_eq!("text".parse::<TraceFormat>(), Ok(TraceFormat::Text));
        assert!("yaml".parse::<TraceFormat>().is_err());
    }
}
