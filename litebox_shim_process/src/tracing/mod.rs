// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! API tracing framework for the process APIs
//!
//! This module provides configurable tracing of process creation and
//! control calls for debugging launch failures.

pub mod config;
pub mod event;
pub mod filter;
pub mod formatter;
pub mod tracer;
pub mod wrapper;

pub use config::{TraceConfig, TraceFormat, TraceOutput};
pub use event::{ApiCategory, EventType, TraceEvent};
pub use filter::{FilterRule, TraceFilter};
pub use formatter::{JsonFormatter, TextFormatter, TraceFormatter};
pub use tracer::Tracer;
pub use wrapper::TracedProcessApi;
