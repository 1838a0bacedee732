// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Trace event definitions

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Category of traced API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCategory {
    /// Process creation and control
    Process,
    /// Environment blocks
    Environment,
    /// Waits and other synchronization
    Synchronization,
    /// Executable lookup
    FileSystem,
    /// Unknown/uncategorized
    Unknown,
}

impl ApiCategory {
    pub const ALL: [ApiCategory; 5] = [
        ApiCategory::Process,
        ApiCategory::Environment,
        ApiCategory::Synchronization,
        ApiCategory::FileSystem,
        ApiCategory::Unknown,
    ];

    fn name(self) -> &'static str {
        match self {
            ApiCategory::Process => "process",
            ApiCategory::Environment => "environment",
            ApiCategory::Synchronization => "synchronization",
            ApiCategory::FileSystem => "file_system",
            ApiCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ApiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for ApiCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| format!("unknown API category '{s}'"))
    }
}

/// Trace event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Function call started
    Call,
    /// Function call returned
    Return,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            EventType::Call => "CALL",
            EventType::Return => "RETURN",
        })
    }
}

/// A traced API call event
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub timestamp: SystemTime,
    /// Host thread id of the caller, when known
    pub thread_id: Option<u64>,
    pub event_type: EventType,
    pub category: ApiCategory,
    pub function: String,
    /// Formatted arguments
    pub args: Option<String>,
    /// Formatted return value
    pub return_value: Option<String>,
}

impl TraceEvent {
    fn new(event_type: EventType, function: &str, category: ApiCategory) -> Self {
        Self {
            timestamp: SystemTime::now(),
            thread_id: None,
            event_type,
            category,
            function: function.to_string(),
            args: None,
            return_value: None,
        }
    }

    /// Create a new call event
    pub fn call(function: &str, category: ApiCategory) -> Self {
        Self::new(EventType::Call, function, category)
    }

    /// Create a new return event
    pub fn return_event(function: &str, category: ApiCategory) -> Self {
        Self::new(EventType::Return, function, category)
    }

    #[must_use]
    pub fn with_args(mut self, args: String) -> Self {
        self.args = Some(args);
        self
    }

    #[must_use]
    pub fn with_return_value(mut self, return_value: String) -> Self {
        self.return_value = Some(return_value);
        self
    }

    #[must_use]
    pub fn with_thread_id(mut self, thread_id: u64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_names() {
        assert_eq!(ApiCategory::FileSystem.to_string(), "file_system");
        assert_eq!("File-System".parse::<ApiCategory>(), Ok(ApiCategory::FileSystem));
        assert_eq!("process".parse::<ApiCategory>(), Ok(ApiCategory::Process));
        assert!("registry".parse::<ApiCategory>().is_err());
    }
}
