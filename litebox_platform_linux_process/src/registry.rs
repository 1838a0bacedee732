// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Process registry
//!
//! The broker that owns process, thread and ticket handles. A new process is
//! registered before it is forked; the ticket handle is what the parent waits
//! on until the child reports whether its exec succeeded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use litebox_shim_process::syscalls::{ProcessHandle, ThreadHandle, TicketHandle};
use litebox_shim_process::{ProcessError, Result};

const FIRST_HANDLE: u64 = 0x1000;
const HANDLE_STEP: u64 = 4;
const FIRST_ID: u32 = 0x20;
const ID_STEP: u32 = 4;

/// What the registry is told about a process before it exists
#[derive(Debug, Clone, Default)]
pub struct ProcessDescriptor {
    pub image: Option<PathBuf>,
    pub command_line: String,
    pub inherit_handles: bool,
}

/// Handles and ids allocated for a new process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub ticket: TicketHandle,
    pub process: ProcessHandle,
    pub thread: ThreadHandle,
    pub process_id: u32,
    pub thread_id: u32,
}

/// Outcome of a launch as recorded against its ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Started,
    /// Win32 error code of the failure
    Failed(u32),
}

/// Answer to a ticket wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewProcessInfo {
    pub process_id: u32,
    pub thread_id: u32,
    pub host_pid: Option<i32>,
    pub outcome: LaunchOutcome,
}

/// Broker interface used by the spawner
pub trait ProcessRegistry: Send + Sync {
    /// Allocate the ticket, process and thread handles for a new process
    fn register(&self, descriptor: &ProcessDescriptor) -> Result<Registration>;

    /// Record the host pid of the forked child
    fn attach(&self, ticket: TicketHandle, host_pid: i32) -> Result<()>;

    /// The child's exec succeeded
    fn report_started(&self, ticket: TicketHandle) -> Result<()>;

    /// The launch failed with the given Win32 code
    fn fail(&self, ticket: TicketHandle, code: u32) -> Result<()>;

    /// Block until the launch behind `ticket` has an outcome
    fn wait_ticket(&self, ticket: TicketHandle) -> Result<NewProcessInfo>;

    /// Close a handle
    ///
    /// Returns the host pid of a started child that no process or thread
    /// handle refers to any more and whose exit was never collected. The
    /// caller owns reaping it.
    fn close_handle(&self, handle: u64) -> Result<Option<i32>>;

    /// Close every open handle, returning the children left to reap
    fn close_all(&self) -> Vec<i32>;

    fn is_valid_handle(&self, handle: u64) -> bool;

    /// Host pid behind a process (or thread) handle
    fn unix_pid(&self, handle: ProcessHandle) -> Result<i32>;

    fn set_exit_code(&self, handle: ProcessHandle, code: u32) -> Result<()>;

    /// Recorded exit code, `None` while unknown
    fn exit_code(&self, handle: ProcessHandle) -> Result<Option<u32>>;

    fn open_handle_count(&self) -> usize;
}

#[derive(Debug, Default)]
struct ProcessState {
    host_pid: Option<i32>,
    outcome: Option<LaunchOutcome>,
    exit_code: Option<u32>,
    orphaned: bool,
}

#[derive(Debug)]
struct ProcessObject {
    descriptor: ProcessDescriptor,
    process_id: u32,
    thread_id: u32,
    state: Mutex<ProcessState>,
    changed: Condvar,
}

impl ProcessObject {
    fn state(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_outcome(&self, outcome: LaunchOutcome) {
        let mut state = self.state();
        if state.outcome.is_none() {
            state.outcome = Some(outcome);
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Host pid to reap once nothing can wait on the process any more
    fn orphan(&self) -> Option<i32> {
        let mut state = self.state();
        if state.orphaned
            || state.exit_code.is_some()
            || state.outcome != Some(LaunchOutcome::Started)
        {
            return None;
        }
        state.orphaned = true;
        state.host_pid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    Process,
    Thread,
    Ticket,
}

#[derive(Debug)]
struct HandleEntry {
    kind: HandleKind,
    object: Arc<ProcessObject>,
}

#[derive(Debug)]
struct Table {
    handles: HashMap<u64, HandleEntry>,
    next_handle: u64,
    next_id: u32,
}

impl Table {
    fn allocate_handle(&mut self) -> Result<u64> {
        let handle = self.next_handle;
        self.next_handle = handle
            .checked_add(HANDLE_STEP)
            .ok_or_else(|| ProcessError::Registry("handle space exhausted".to_string()))?;
        Ok(handle)
    }

    fn allocate_id(&mut self) -> Result<u32> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(ID_STEP)
            .ok_or_else(|| ProcessError::Registry("id space exhausted".to_string()))?;
        Ok(id)
    }

    fn object(&self, handle: u64, kinds: &[HandleKind]) -> Result<Arc<ProcessObject>> {
        match self.handles.get(&handle) {
            Some(entry) if kinds.contains(&entry.kind) => Ok(Arc::clone(&entry.object)),
            _ => Err(ProcessError::InvalidHandle(handle)),
        }
    }

    fn release(&mut self, handle: u64) -> Result<Option<i32>> {
        let entry = self
            .handles
            .remove(&handle)
            .ok_or(ProcessError::InvalidHandle(handle))?;
        if entry.kind == HandleKind::Ticket {
            return Ok(None);
        }
        let referenced = self
            .handles
            .values()
            .any(|e| e.kind != HandleKind::Ticket && Arc::ptr_eq(&e.object, &entry.object));
        if referenced {
            return Ok(None);
        }
        Ok(entry.object.orphan())
    }
}

/// Registry living inside the calling process
#[derive(Debug)]
pub struct InProcessRegistry {
    table: Mutex<Table>,
}

impl Default for InProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessRegistry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                handles: HashMap::new(),
                next_handle: FIRST_HANDLE,
                next_id: FIRST_ID,
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn object(&self, handle: u64, kinds: &[HandleKind]) -> Result<Arc<ProcessObject>> {
        self.table().object(handle, kinds)
    }

    fn ticket(&self, ticket: TicketHandle) -> Result<Arc<ProcessObject>> {
        self.object(ticket.0, &[HandleKind::Ticket])
    }

    fn process(&self, handle: ProcessHandle) -> Result<Arc<ProcessObject>> {
        self.object(handle.0, &[HandleKind::Process, HandleKind::Thread])
    }

    /// What was registered for a process (or thread) handle
    pub fn descriptor(&self, handle: ProcessHandle) -> Result<ProcessDescriptor> {
        Ok(self.process(handle)?.descriptor.clone())
    }
}

impl ProcessRegistry for InProcessRegistry {
    fn register(&self, descriptor: &ProcessDescriptor) -> Result<Registration> {
        let mut table = self.table();
        let process_id = table.allocate_id()?;
        let thread_id = table.allocate_id()?;
        let ticket = table.allocate_handle()?;
        let process = table.allocate_handle()?;
        let thread = table.allocate_handle()?;

        table.handles.try_reserve(3)?;
        let object = Arc::new(ProcessObject {
            descriptor: descriptor.clone(),
            process_id,
            thread_id,
            state: Mutex::new(ProcessState::default()),
            changed: Condvar::new(),
        });
        for (handle, kind) in [
            (ticket, HandleKind::Ticket),
            (process, HandleKind::Process),
            (thread, HandleKind::Thread),
        ] {
            table.handles.insert(
                handle,
                HandleEntry {
                    kind,
                    object: Arc::clone(&object),
                },
            );
        }

        log::debug!(
            "registered pid {process_id} (ticket 0x{ticket:X}, process 0x{process:X}, thread 0x{thread:X})"
        );
        Ok(Registration {
            ticket: TicketHandle(ticket),
            process: ProcessHandle(process),
            thread: ThreadHandle(thread),
            process_id,
            thread_id,
        })
    }

    fn attach(&self, ticket: TicketHandle, host_pid: i32) -> Result<()> {
        let object = self.ticket(ticket)?;
        object.state().host_pid = Some(host_pid);
        Ok(())
    }

    fn report_started(&self, ticket: TicketHandle) -> Result<()> {
        self.ticket(ticket)?.set_outcome(LaunchOutcome::Started);
        Ok(())
    }

    fn fail(&self, ticket: TicketHandle, code: u32) -> Result<()> {
        self.ticket(ticket)?.set_outcome(LaunchOutcome::Failed(code));
        Ok(())
    }

    fn wait_ticket(&self, ticket: TicketHandle) -> Result<NewProcessInfo> {
        let object = self.ticket(ticket)?;
        let mut state = object.state();
        let outcome = loop {
            if let Some(outcome) = state.outcome {
                break outcome;
            }
            state = object
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        };
        Ok(NewProcessInfo {
            process_id: object.process_id,
            thread_id: object.thread_id,
            host_pid: state.host_pid,
            outcome,
        })
    }

    fn close_handle(&self, handle: u64) -> Result<Option<i32>> {
        self.table().release(handle)
    }

    fn close_all(&self) -> Vec<i32> {
        let mut table = self.table();
        let handles: Vec<u64> = table.handles.keys().copied().collect();
        handles
            .into_iter()
            .filter_map(|handle| table.release(handle).ok().flatten())
            .collect()
    }

    fn is_valid_handle(&self, handle: u64) -> bool {
        self.table().handles.contains_key(&handle)
    }

    fn unix_pid(&self, handle: ProcessHandle) -> Result<i32> {
        self.process(handle)?
            .state()
            .host_pid
            .ok_or(ProcessError::InvalidHandle(handle.0))
    }

    fn set_exit_code(&self, handle: ProcessHandle, code: u32) -> Result<()> {
        let object = self.process(handle)?;
        let mut state = object.state();
        if state.exit_code.is_none() {
            state.exit_code = Some(code);
        }
        Ok(())
    }

    fn exit_code(&self, handle: ProcessHandle) -> Result<Option<u32>> {
        Ok(self.process(handle)?.state().exit_code)
    }

    fn open_handle_count(&self) -> usize {
        self.table().handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn descriptor() -> ProcessDescriptor {
        ProcessDescriptor {
            image: Some(PathBuf::from("/bin/true")),
            command_line: "true".to_string(),
            inherit_handles: false,
        }
    }

    #[test]
    fn test_register_allocates_distinct_handles() {
        let registry = InProcessRegistry::new();
        let a = registry.register(&descriptor()).unwrap();
        let b = registry.register(&descriptor()).unwrap();

        let handles = [a.ticket.0, a.process.0, a.thread.0, b.ticket.0, b.process.0, b.thread.0];
        for (i, h) in handles.iter().enumerate() {
            assert!(registry.is_valid_handle(*h));
            assert!(!handles[i + 1..].contains(h));
        }
        assert_ne!(a.process_id, b.process_id);
        assert_eq!(registry.open_handle_count(), 6);
        let registered = registry.descriptor(ProcessHandle(a.thread.0)).unwrap();
        assert_eq!(registered.image, Some(PathBuf::from("/bin/true")));
        assert_eq!(registered.command_line, "true");
        assert!(!registered.inherit_handles);
    }

    #[test]
    fn test_wait_ticket_blocks_until_outcome() {
        let registry = Arc::new(InProcessRegistry::new());
        let reg = registry.register(&descriptor()).unwrap();
        registry.attach(reg.ticket, 4242).unwrap();

        let reporter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                registry.report_started(reg.ticket).unwrap();
            })
        };

        let info = registry.wait_ticket(reg.ticket).unwrap();
        reporter.join().unwrap();
        assert_eq!(info.outcome, LaunchOutcome::Started);
        assert_eq!(info.host_pid, Some(4242));
        assert_eq!(info.process_id, reg.process_id);
        assert_eq!(registry.unix_pid(reg.process).unwrap(), 4242);
    }

    #[test]
    fn test_first_outcome_sticks() {
        let registry = InProcessRegistry::new();
        let reg = registry.register(&descriptor()).unwrap();
        registry.fail(reg.ticket, 2).unwrap();
        registry.report_started(reg.ticket).unwrap();
        assert_eq!(
            registry.wait_ticket(reg.ticket).unwrap().outcome,
            LaunchOutcome::Failed(2)
        );
    }

    #[test]
    fn test_close_handle_and_kind_checks() {
        let registry = InProcessRegistry::new();
        let reg = registry.register(&descriptor()).unwrap();

        // A process handle is not a ticket
        assert!(matches!(
            registry.attach(TicketHandle(reg.process.0), 1),
            Err(ProcessError::InvalidHandle(_))
        ));
        // No pid until attached
        assert!(registry.unix_pid(reg.process).is_err());

        registry.close_handle(reg.ticket.0).unwrap();
        assert!(!registry.is_valid_handle(reg.ticket.0));
        assert!(matches!(
            registry.close_handle(reg.ticket.0),
            Err(ProcessError::InvalidHandle(_))
        ));

        // The process object outlives the ticket
        registry.set_exit_code(reg.process, 3).unwrap();
        registry.set_exit_code(reg.process, 4).unwrap();
        assert_eq!(registry.exit_code(ProcessHandle(reg.thread.0)).unwrap(), Some(3));

        registry.close_handle(reg.process.0).unwrap();
        registry.close_handle(reg.thread.0).unwrap();
        assert_eq!(registry.open_handle_count(), 0);
    }

    #[test]
    fn test_last_close_hands_back_unwaited_child() {
        let registry = InProcessRegistry::new();
        let reg = registry.register(&descriptor()).unwrap();
        registry.attach(reg.ticket, 4242).unwrap();
        registry.report_started(reg.ticket).unwrap();

        assert_eq!(registry.close_handle(reg.ticket.0).unwrap(), None);
        assert_eq!(registry.close_handle(reg.thread.0).unwrap(), None);
        assert_eq!(registry.close_handle(reg.process.0).unwrap(), Some(4242));
    }

    #[test]
    fn test_collected_or_failed_children_are_not_handed_back() {
        let registry = InProcessRegistry::new();

        let waited = registry.register(&descriptor()).unwrap();
        registry.attach(waited.ticket, 1).unwrap();
        registry.report_started(waited.ticket).unwrap();
        registry.set_exit_code(waited.process, 0).unwrap();
        registry.close_handle(waited.process.0).unwrap();
        assert_eq!(registry.close_handle(waited.thread.0).unwrap(), None);

        let failed = registry.register(&descriptor()).unwrap();
        registry.attach(failed.ticket, 2).unwrap();
        registry.fail(failed.ticket, 2).unwrap();
        registry.close_handle(failed.process.0).unwrap();
        assert_eq!(registry.close_handle(failed.thread.0).unwrap(), None);
    }

    #[test]
    fn test_close_all() {
        let registry = InProcessRegistry::new();
        let running = registry.register(&descriptor()).unwrap();
        registry.attach(running.ticket, 77).unwrap();
        registry.report_started(running.ticket).unwrap();
        registry.register(&descriptor()).unwrap();

        assert_eq!(registry.close_all(), vec![77]);
        assert_eq!(registry.open_handle_count(), 0);
    }
}
