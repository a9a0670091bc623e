// DBGP debug session
//
// Owns everything one IDE connection shares between the interpreter thread
// and the command workers: the breakpoint registry, the stack of execution
// contexts, transaction correlation, the initialisation handshake, the
// watchpoint write cache and the outbound writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::breakpoints::{Breakpoint, BreakpointRegistry};
use crate::config::SessionConfig;
use crate::encoder::ValueEncoder;
use crate::eventloop::ResponseWriter;
use crate::events;
use crate::hook::DebugHook;
use crate::object::{HostObject, ObjectRef, ScriptHost};
use crate::protocol::{DbgpError, DbgpResult};
use crate::response::Response;
use crate::stackframe::{StackFrame, StackManager};
use crate::types::{ContextId, LineKey, RunStatus, StepMode, StreamKind, StreamMode};

/// Callback fired once when the session terminates
pub type TerminationListener = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy)]
struct Streams {
    stdout: StreamMode,
    stderr: StreamMode,
    stdin: bool,
}

/// Last source location that wrote a watched object, keyed by object identity.
/// Entries die with their object.
#[derive(Default)]
struct WatchWrites {
    entries: HashMap<usize, (Weak<dyn HostObject>, LineKey)>,
}

impl WatchWrites {
    fn identity(object: &ObjectRef) -> usize {
        Arc::as_ptr(object) as *const () as usize
    }

    fn record(&mut self, object: &ObjectRef, key: LineKey) {
        self.entries.retain(|_, (weak, _)| weak.strong_count() > 0);
        self.entries
            .insert(Self::identity(object), (Arc::downgrade(object), key));
    }

    fn last_write(&mut self, object: &ObjectRef) -> Option<LineKey> {
        let identity = Self::identity(object);
        let (weak, key) = self.entries.get(&identity)?;
        match weak.upgrade() {
            Some(live) if Arc::ptr_eq(&live, object) => Some(key.clone()),
            _ => {
                // address reused by a new object
                self.entries.remove(&identity);
                None
            }
        }
    }
}

pub struct Session {
    config: Mutex<SessionConfig>,
    registry: BreakpointRegistry,
    host: Arc<dyn ScriptHost>,
    stacks: Mutex<Vec<Arc<StackManager>>>,
    next_context: AtomicU64,
    transaction: Mutex<Option<String>>,
    initialized: Mutex<bool>,
    init_signal: Condvar,
    pending_entry_step: AtomicBool,
    watch_writes: Mutex<WatchWrites>,
    streams: Mutex<Streams>,
    writer: ResponseWriter,
    closed: AtomicBool,
    listeners: Mutex<Vec<(ListenerId, TerminationListener)>>,
    next_listener: AtomicU64,
}

impl Session {
    pub fn new(config: SessionConfig, host: Arc<dyn ScriptHost>, writer: ResponseWriter) -> Self {
        Self {
            config: Mutex::new(config),
            registry: BreakpointRegistry::new(),
            host,
            stacks: Mutex::new(Vec::new()),
            next_context: AtomicU64::new(1),
            transaction: Mutex::new(None),
            initialized: Mutex::new(false),
            init_signal: Condvar::new(),
            pending_entry_step: AtomicBool::new(false),
            watch_writes: Mutex::new(WatchWrites::default()),
            streams: Mutex::new(Streams {
                stdout: StreamMode::Copy,
                stderr: StreamMode::Copy,
                stdin: false,
            }),
            writer,
            closed: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &BreakpointRegistry {
        &self.registry
    }

    pub fn host(&self) -> &Arc<dyn ScriptHost> {
        &self.host
    }

    pub fn config(&self) -> SessionConfig {
        self.config.lock().clone()
    }

    pub fn update_config<R>(&self, f: impl FnOnce(&mut SessionConfig) -> R) -> R {
        f(&mut self.config.lock())
    }

    /// Encoder reflecting the current depth and size features
    pub fn encoder(&self) -> ValueEncoder {
        ValueEncoder::from_config(&self.config.lock())
    }

    /// Queue a message for the IDE. Returns false once the transport is gone.
    pub fn send(&self, response: Response) -> bool {
        self.writer.send(response.render())
    }

    pub fn send_init(&self, file_uri: &str) -> bool {
        let config = self.config();
        let init = Response::element("init")
            .attr("appid", &config.app_id)
            .attr("idekey", &config.idekey)
            .attr("session", &config.idekey)
            .attr("thread", "main")
            .attr("parent", "")
            .attr("language", &config.language)
            .attr("protocol_version", &config.protocol_version)
            .attr("fileuri", file_uri);
        info!("Sending init for {}", file_uri);
        self.send(init)
    }

    // ---- transaction correlation ----

    /// Adopt the transaction id of a new run/step request. A still pending
    /// transaction is answered with `status="running"` first.
    pub fn set_transaction_id(&self, id: Option<String>) {
        let mut transaction = self.transaction.lock();
        if let Some(stale) = transaction.take() {
            debug!("Releasing stale transaction {}", stale);
            self.send(events::run_status(RunStatus::Running, &stale, None));
        }
        *transaction = id;
    }

    pub fn transaction_id(&self) -> Option<String> {
        self.transaction.lock().clone()
    }

    /// Report a suspension to the pending transaction. Returns whether a
    /// client was told, i.e. whether the debuggee should actually block.
    pub fn send_break(&self, reason: &str) -> bool {
        let Some(id) = self.transaction.lock().take() else {
            warn!("Break without pending transaction: {}", reason);
            return false;
        };
        self.send(events::run_status(RunStatus::Break, &id, Some(reason)))
    }

    /// Report the end of execution to the pending transaction, if any
    pub fn send_end(&self) {
        if let Some(id) = self.transaction.lock().take() {
            self.send(events::run_status(RunStatus::Stopped, &id, None));
        }
    }

    /// The debuggee finished: answer the pending transaction and close
    pub fn notify_end(&self) {
        self.send_end();
        self.close();
    }

    // ---- initialisation handshake ----

    pub fn mark_initialized(&self) {
        let mut initialized = self.initialized.lock();
        if !*initialized {
            info!("Debuggee released by IDE");
        }
        *initialized = true;
        self.init_signal.notify_all();
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    /// Block the interpreter until the IDE issues its first run or step
    pub fn wait_for_run(&self) -> DbgpResult<()> {
        let mut initialized = self.initialized.lock();
        while !*initialized && !self.is_closed() {
            self.init_signal.wait(&mut initialized);
        }
        if self.is_closed() {
            Err(DbgpError::Terminated)
        } else {
            Ok(())
        }
    }

    /// Apply a run (`StepMode::None`) or step request. Before the debuggee
    /// has a live frame the request releases it instead; a step then breaks
    /// on the first executed line.
    pub fn resume_with(&self, mode: StepMode) {
        // A suspended stack always takes the mode, even with no frame pushed
        match self
            .current_stack()
            .filter(|stack| stack.depth() > 0 || stack.is_suspended())
        {
            Some(stack) => {
                self.mark_initialized();
                match mode {
                    StepMode::None => stack.resume(),
                    StepMode::Into => stack.step_into(),
                    StepMode::Over => stack.step_over(),
                    StepMode::Out => stack.step_out(),
                }
            }
            None => {
                if mode != StepMode::None {
                    self.pending_entry_step.store(true, Ordering::SeqCst);
                }
                self.mark_initialized();
            }
        }
    }

    /// Suspend at the next line of the current context
    pub fn request_break(&self) -> bool {
        match self.current_stack() {
            Some(stack) => {
                stack.request_break();
                true
            }
            None => false,
        }
    }

    // ---- stack contexts ----

    pub fn current_stack(&self) -> Option<Arc<StackManager>> {
        self.stacks.lock().last().cloned()
    }

    pub fn context_count(&self) -> usize {
        self.stacks.lock().len()
    }

    fn suspend(&self, stack: &StackManager, reason: &str) -> DbgpResult<()> {
        debug!("Suspending context {}: {}", stack.id(), reason);
        stack.suspend(|| self.send_break(reason))
    }

    fn ensure_open(&self) -> DbgpResult<()> {
        if self.is_closed() {
            Err(DbgpError::Terminated)
        } else {
            Ok(())
        }
    }

    /// Guard expressions must evaluate truthy; evaluation failures count as false
    fn guard_passes(&self, breakpoint: &Breakpoint, stack: &StackManager) -> bool {
        let Some(expression) = breakpoint.guard() else {
            return true;
        };
        match self.host.evaluate(expression, stack.frame(0).as_ref()) {
            Ok(value) => value.is_truthy(),
            Err(e) => {
                warn!(
                    "Guard of breakpoint {} failed to evaluate: {}",
                    breakpoint.id, e
                );
                false
            }
        }
    }

    // ---- streams ----

    pub fn set_stream_mode(&self, kind: StreamKind, mode: StreamMode) {
        let mut streams = self.streams.lock();
        match kind {
            StreamKind::Stdout => streams.stdout = mode,
            StreamKind::Stderr => streams.stderr = mode,
        }
    }

    pub fn stream_mode(&self, kind: StreamKind) -> StreamMode {
        let streams = self.streams.lock();
        match kind {
            StreamKind::Stdout => streams.stdout,
            StreamKind::Stderr => streams.stderr,
        }
    }

    pub fn set_stdin_redirected(&self, redirected: bool) {
        self.streams.lock().stdin = redirected;
    }

    pub fn stdin_redirected(&self) -> bool {
        self.streams.lock().stdin
    }

    /// Forward debuggee stdout. Returns whether the host should also print it locally.
    pub fn write_stdout(&self, text: &str) -> bool {
        self.write_stream(StreamKind::Stdout, text)
    }

    pub fn write_stderr(&self, text: &str) -> bool {
        self.write_stream(StreamKind::Stderr, text)
    }

    fn write_stream(&self, kind: StreamKind, text: &str) -> bool {
        match self.stream_mode(kind) {
            StreamMode::Disable => true,
            StreamMode::Copy => {
                self.send(events::stream(kind, text));
                true
            }
            StreamMode::Redirect => {
                // nothing local even if the IDE is gone
                self.send(events::stream(kind, text));
                false
            }
        }
    }

    // ---- lifecycle ----

    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.writer.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn add_termination_listener(&self, listener: TerminationListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn remove_termination_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Tear the session down. Safe to call any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing debug session");

        self.transaction.lock().take();
        self.registry.clear_all();

        let stacks: Vec<Arc<StackManager>> = self.stacks.lock().drain(..).collect();
        for stack in stacks {
            stack.stop();
        }

        {
            let _initialized = self.initialized.lock();
            self.init_signal.notify_all();
        }

        self.writer.close();

        let listeners: Vec<(ListenerId, TerminationListener)> =
            self.listeners.lock().drain(..).collect();
        for (_, listener) in listeners {
            listener();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("breakpoints", &self.registry.len())
            .field("contexts", &self.context_count())
            .field("transaction", &self.transaction_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DebugHook for Session {
    fn enter_context(&self) -> DbgpResult<Arc<StackManager>> {
        self.ensure_open()?;
        let id: ContextId = self.next_context.fetch_add(1, Ordering::SeqCst);
        let stack = Arc::new(StackManager::new(id));
        self.stacks.lock().push(Arc::clone(&stack));
        debug!("Entered context {}", id);
        Ok(stack)
    }

    fn exit_context(&self, context: ContextId) {
        let mut stacks = self.stacks.lock();
        // normally the top one, but remove the matching context wherever it sits
        if let Some(position) = stacks.iter().rposition(|stack| stack.id() == context) {
            stacks.remove(position);
            debug!("Exited context {}", context);
        }
    }

    fn on_compile(&self, file: &str) -> DbgpResult<()> {
        self.ensure_open()?;
        debug!("Compiled {}", file);
        Ok(())
    }

    fn on_enter(&self, frame: StackFrame) -> DbgpResult<()> {
        self.ensure_open()?;
        let Some(stack) = self.current_stack() else {
            return Ok(());
        };

        let function = frame.function.clone();
        stack.push_frame(frame);

        if let Some(breakpoint) = self.registry.hit_call(&function) {
            if self.guard_passes(&breakpoint, &stack) {
                return self.suspend(&stack, &format!("Break on call: {}", function));
            }
        }
        if self.registry.suspend_flags().on_entry {
            return self.suspend(&stack, &format!("Suspend on entry: {}", function));
        }
        Ok(())
    }

    fn on_line(&self, file: &str, line: u32) -> DbgpResult<()> {
        self.ensure_open()?;
        let Some(stack) = self.current_stack() else {
            return Ok(());
        };

        stack.set_location(file, line);
        let entry_step = self.pending_entry_step.swap(false, Ordering::SeqCst);

        if let Some(breakpoint) = self.registry.hit_line(file, line) {
            if self.guard_passes(&breakpoint, &stack) {
                return self.suspend(
                    &stack,
                    &format!("Breakpoint {} at {}:{}", breakpoint.id, file, line),
                );
            }
        }

        if entry_step || stack.take_pending_stop() {
            return self.suspend(&stack, &format!("Step to {}:{}", file, line));
        }
        Ok(())
    }

    fn on_exit(&self) -> DbgpResult<()> {
        self.ensure_open()?;
        let Some(stack) = self.current_stack() else {
            return Ok(());
        };
        let function = stack
            .frame(0)
            .map(|frame| frame.function)
            .unwrap_or_default();

        let mut result = Ok(());
        let returned = self.registry.hit_return(&function);
        if let Some(breakpoint) = returned.filter(|bp| self.guard_passes(bp, &stack)) {
            debug!("Return breakpoint {} hit", breakpoint.id);
            result = self.suspend(&stack, &format!("Break on return: {}", function));
        } else if self.registry.suspend_flags().on_exit {
            result = self.suspend(&stack, &format!("Suspend on exit: {}", function));
        }

        stack.pop_frame();
        result
    }

    fn on_exception(&self, class_name: &str, message: &str) -> DbgpResult<()> {
        self.ensure_open()?;
        let Some(stack) = self.current_stack() else {
            return Ok(());
        };

        let suspend = match self.registry.hit_exception(class_name) {
            Some(_) => true,
            None => {
                self.registry.suspend_flags().on_exception
                    && !self.registry.has_exception_breakpoints()
            }
        };
        if suspend {
            return self.suspend(&stack, &format!("Exception {}: {}", class_name, message));
        }
        Ok(())
    }

    fn on_property_read(&self, object: &ObjectRef, property: &str) -> DbgpResult<()> {
        self.ensure_open()?;
        let watchers = self.registry.watchers_of(property);
        if watchers.is_empty() {
            return Ok(());
        }
        let Some(stack) = self.current_stack() else {
            return Ok(());
        };

        let last_write = self.watch_writes.lock().last_write(object);
        let Some(last_write) = last_write else {
            return Ok(());
        };

        let triggered = watchers
            .iter()
            .filter(|wp| wp.is_enabled() && wp.break_on_access)
            .any(|wp| wp.line_key() == last_write);
        if triggered {
            return self.suspend(&stack, &format!("Break on access watchpoint: {}", property));
        }
        Ok(())
    }

    fn on_property_write(&self, object: &ObjectRef, property: &str) -> DbgpResult<()> {
        self.ensure_open()?;
        let watchers = self.registry.watchers_of(property);
        if watchers.is_empty() {
            return Ok(());
        }
        let Some(stack) = self.current_stack() else {
            return Ok(());
        };
        let Some(here) = stack.current_location() else {
            return Ok(());
        };

        let mut triggered = false;
        for watchpoint in watchers.iter().filter(|wp| wp.is_enabled()) {
            let key = watchpoint.line_key();
            let mut writes = self.watch_writes.lock();
            if here == key {
                writes.record(object, key.clone());
            }
            if watchpoint.break_on_modification && writes.last_write(object) == Some(key) {
                triggered = true;
                break;
            }
        }

        if triggered {
            return self.suspend(
                &stack,
                &format!("Break on modification watchpoint: {}", property),
            );
        }
        Ok(())
    }
}
