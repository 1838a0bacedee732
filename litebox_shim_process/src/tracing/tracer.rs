// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Main tracer component

use super::{
    config::{TraceConfig, TraceFormat, TraceOutput},
    event::TraceEvent,
    filter::TraceFilter,
    formatter::{JsonFormatter, TextFormatter, TraceFormatter},
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Main tracer for API calls
pub struct Tracer {
    config: TraceConfig,
    filter: TraceFilter,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    formatter: Box<dyn TraceFormatter + Send + Sync>,
}

impl Tracer {
    /// Create a new tracer writing to the configured output
    pub fn new(config: TraceConfig, filter: TraceFilter) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = match &config.output {
            TraceOutput::Stdout => Box::new(io::stdout()),
            TraceOutput::Stderr => Box::new(io::stderr()),
            TraceOutput::File(path) => Box::new(BufWriter::new(File::create(path)?)),
        };
        Ok(Self::with_writer(config, filter, writer))
    }

    /// Create a tracer writing to `writer`, ignoring `config.output`
    pub fn with_writer(
        config: TraceConfig,
        filter: TraceFilter,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        let formatter: Box<dyn TraceFormatter + Send + Sync> = match config.format {
            TraceFormat::Text => Box::new(TextFormatter::new()),
            TraceFormat::Json => Box::new(JsonFormatter::new()),
        };

        Self {
            config,
            filter,
            writer: Arc::new(Mutex::new(writer)),
            formatter,
        }
    }

    /// Trace an event
    ///
    /// Write failures are dropped; tracing must not change the outcome of
    /// the traced call
    pub fn trace(&self, mut event: TraceEvent) {
        if !self.config.enabled || !self.filter.should_trace(&event) {
            return;
        }

        if self.config.include_thread_ids && event.thread_id.is_none() {
            event.thread_id = Some(current_thread_id());
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self.formatter.format(&event, &self.config, &mut *writer);
        let _ = writer.flush();
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Host thread id of the caller
fn current_thread_id() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() % 10_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::{ApiCategory, FilterRule};

    /// Writer that appends to a shared buffer
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_tracer_disabled() {
        let buffer = SharedBuffer::default();
        let tracer = Tracer::with_writer(
            TraceConfig::default(),
            TraceFilter::default(),
            Box::new(buffer.clone()),
        );
        assert!(!tracer.is_enabled());
        tracer.trace(TraceEvent::call("CreateProcess", ApiCategory::Process));
        assert!(buffer.contents().is_empty());
    }

    #[test]
    fn test_tracer_writes_filtered_events() {
        let buffer = SharedBuffer::default();
        let filter = TraceFilter::new().add_rule(FilterRule::Category(vec![ApiCategory::Process]));
        let config = TraceConfig::enabled().with_timestamps(false);
        let tracer = Tracer::with_writer(config, filter, Box::new(buffer.clone()));

        tracer.trace(TraceEvent::call("CreateProcess", ApiCategory::Process));
        tracer.trace(TraceEvent::call("WaitForSingleObject", ApiCategory::Synchronization));

        let out = buffer.contents();
        assert!(out.contains("CreateProcess"));
        assert!(out.contains("[TID:"));
        assert!(!out.contains("WaitForSingleObject"));
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn test_tracer_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let config = TraceConfig::enabled().with_output(TraceOutput::File(path.clone()));
        let tracer = Tracer::new(config, TraceFilter::default()).unwrap();
        tracer.trace(TraceEvent::call("SearchPath", ApiCategory::FileSystem));
        drop(tracer);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("SearchPath"));
    }
}
