// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Trace event formatters

use super::config::TraceConfig;
use super::event::{EventType, TraceEvent};
use std::io::{self, Write};
use std::time::SystemTime;

/// Trait for formatting trace events
pub trait TraceFormatter {
    /// Format a trace event to the output
    fn format(
        &self,
        event: &TraceEvent,
        config: &TraceConfig,
        writer: &mut dyn Write,
    ) -> io::Result<()>;
}

/// Text formatter - human-readable output
#[derive(Debug, Default)]
pub struct TextFormatter;

impl TextFormatter {
    pub fn new() -> Self {
        Self
    }
}

/// Seconds since the epoch with the given number of fractional digits
fn format_timestamp(timestamp: SystemTime, digits: usize) -> String {
    match timestamp.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => {
            let fraction = match digits {
                3 => format!("{:03}", duration.subsec_millis()),
                _ => format!("{:09}", duration.subsec_nanos()),
            };
            format!("{}.{fraction}", duration.as_secs())
        }
        Err(_) => format!("0.{}", "0".repeat(digits)),
    }
}

impl TraceFormatter for TextFormatter {
    fn format(
        &self,
        event: &TraceEvent,
        config: &TraceConfig,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        if config.include_timestamps {
            write!(writer, "[{}] ", format_timestamp(event.timestamp, 3))?;
        }

        if config.include_thread_ids {
            match event.thread_id {
                Some(tid) => write!(writer, "[TID:{tid:04}] ")?,
                None => write!(writer, "[TID:main] ")?,
            }
        }

        write!(
            writer,
            "{:<6} [{}] {}({})",
            event.event_type,
            event.category,
            event.function,
            event.args.as_deref().unwrap_or("")
        )?;

        if let Some(ret) = &event.return_value {
            write!(writer, " -> {ret}")?;
        }

        writeln!(writer)
    }
}

/// JSON formatter - one object per line
#[derive(Debug, Default)]
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn new() -> Self {
        Self
    }

    fn escape_json_string(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if u32::from(c) < 0x20 => out.push_str(&format!("\\u{:04x}", u32::from(c))),
                c => out.push(c),
            }
        }
        out
    }
}

impl TraceFormatter for JsonFormatter {
    fn format(
        &self,
        event: &TraceEvent,
        config: &TraceConfig,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        write!(writer, "{{")?;

        if config.include_timestamps {
            write!(writer, "\"timestamp\":{},", format_timestamp(event.timestamp, 9))?;
        }

        if config.include_thread_ids {
            match event.thread_id {
                Some(tid) => write!(writer, "\"thread_id\":{tid},")?,
                None => write!(writer, "\"thread_id\":null,")?,
            }
        }

        let event_type = match event.event_type {
            EventType::Call => "call",
            EventType::Return => "return",
        };
        write!(
            writer,
            "\"event\":\"{event_type}\",\"category\":\"{}\",\"function\":\"{}\"",
            event.category,
            Self::escape_json_string(&event.function)
        )?;

        if let Some(args) = &event.args {
            write!(writer, ",\"args\":\"{}\"", Self::escape_json_string(args))?;
        }

        if let Some(ret) = &event.return_value {
            write!(writer, ",\"return\":\"{}\"", Self::escape_json_string(ret))?;
        }

        writeln!(writer, "}}")
    }
}
