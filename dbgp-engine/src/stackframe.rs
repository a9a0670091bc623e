// Stack contexts
//
// A StackManager tracks the call frames of one interpreter execution context
// together with its run/suspend state and the active step request. The
// interpreter thread blocks inside `suspend` on the manager's condition
// variable until a command worker resumes or steps it.

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::object::ObjectRef;
use crate::protocol::{DbgpError, DbgpResult};
use crate::types::{ContextId, LineKey, RunState, StepMode};

/// One call frame as reported by the interpreter
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    /// Enclosing function name, empty for top-level script code
    pub function: String,
    /// Live activation scope, read through the host capabilities only
    pub scope: Option<ObjectRef>,
    pub this: Option<ObjectRef>,
}

impl StackFrame {
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
            scope: None,
            this: None,
        }
    }

    pub fn with_scope(mut self, scope: ObjectRef) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_this(mut self, this: ObjectRef) -> Self {
        self.this = Some(this);
        self
    }

    pub fn location(&self) -> LineKey {
        LineKey::new(self.file.clone(), self.line)
    }
}

#[derive(Debug)]
struct StackState {
    /// Bottom first; the last entry is the executing frame
    frames: Vec<StackFrame>,
    run_state: RunState,
    step: StepMode,
    step_depth: usize,
    break_requested: bool,
    stopped: bool,
}

#[derive(Debug)]
pub struct StackManager {
    id: ContextId,
    state: Mutex<StackState>,
    resumed: Condvar,
}

impl StackManager {
    pub fn new(id: ContextId) -> Self {
        Self {
            id,
            state: Mutex::new(StackState {
                frames: Vec::new(),
                run_state: RunState::Running,
                step: StepMode::None,
                step_depth: 0,
                break_requested: false,
                stopped: false,
            }),
            resumed: Condvar::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn push_frame(&self, frame: StackFrame) {
        self.state.lock().frames.push(frame);
    }

    pub fn pop_frame(&self) -> Option<StackFrame> {
        self.state.lock().frames.pop()
    }

    /// Move the executing frame to a new line. Top-level code that never
    /// entered a function gets an implicit frame.
    pub fn set_location(&self, file: &str, line: u32) {
        let mut state = self.state.lock();
        match state.frames.last_mut() {
            Some(top) => {
                if top.file != file {
                    top.file = file.to_string();
                }
                top.line = line;
            }
            None => state.frames.push(StackFrame::new(file, line, "")),
        }
    }

    pub fn depth(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Frame at `depth`, 0 being the executing frame
    pub fn frame(&self, depth: usize) -> Option<StackFrame> {
        let state = self.state.lock();
        let len = state.frames.len();
        if depth >= len {
            return None;
        }
        state.frames.get(len - 1 - depth).cloned()
    }

    /// All frames, executing frame first
    pub fn frames(&self) -> Vec<StackFrame> {
        self.state.lock().frames.iter().rev().cloned().collect()
    }

    pub fn current_location(&self) -> Option<LineKey> {
        self.state.lock().frames.last().map(StackFrame::location)
    }

    pub fn run_state(&self) -> RunState {
        self.state.lock().run_state
    }

    pub fn is_suspended(&self) -> bool {
        self.run_state() == RunState::Suspended
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    pub fn step_mode(&self) -> StepMode {
        self.state.lock().step
    }

    pub fn resume(&self) {
        self.transition(StepMode::None);
    }

    pub fn step_into(&self) {
        self.transition(StepMode::Into);
    }

    pub fn step_over(&self) {
        self.transition(StepMode::Over);
    }

    pub fn step_out(&self) {
        self.transition(StepMode::Out);
    }

    /// Suspend at the next line boundary
    pub fn request_break(&self) {
        self.state.lock().break_requested = true;
    }

    fn transition(&self, mode: StepMode) {
        let mut state = self.state.lock();
        state.step = mode;
        state.step_depth = state.frames.len();
        state.run_state = RunState::Running;
        debug!(
            "Context {} resumed with {:?} at depth {}",
            self.id, mode, state.step_depth
        );
        // signalled while holding the lock so a waiter cannot miss it
        self.resumed.notify_all();
    }

    /// Check whether the active step request (or a pending break request)
    /// is satisfied at the current depth. A satisfied request is consumed.
    pub fn take_pending_stop(&self) -> bool {
        let mut state = self.state.lock();
        let depth = state.frames.len();
        let satisfied = state.break_requested
            || match state.step {
                StepMode::None => false,
                StepMode::Into => true,
                StepMode::Over => depth <= state.step_depth,
                StepMode::Out => depth < state.step_depth,
            };

        if satisfied {
            state.step = StepMode::None;
            state.break_requested = false;
        }
        satisfied
    }

    /// Suspend the calling interpreter thread.
    ///
    /// `notify` sends the break notification and reports whether it reached
    /// a client; it runs under the manager lock so a resume cannot slip in
    /// between the notice and the wait. When nobody was notified the thread
    /// keeps running instead of blocking forever.
    pub fn suspend<F>(&self, notify: F) -> DbgpResult<()>
    where
        F: FnOnce() -> bool,
    {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(DbgpError::Terminated);
        }

        state.run_state = RunState::Suspended;
        state.step = StepMode::None;
        state.break_requested = false;

        if !notify() {
            debug!("Context {} not suspended, no client waiting", self.id);
            state.run_state = RunState::Running;
            return Ok(());
        }

        debug!("Context {} suspended", self.id);
        while state.run_state == RunState::Suspended && !state.stopped {
            self.resumed.wait(&mut state);
        }

        if state.stopped {
            Err(DbgpError::Terminated)
        } else {
            Ok(())
        }
    }

    /// Release any waiter for good. Further suspensions fail with `Terminated`.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.run_state = RunState::Running;
        state.step = StepMode::None;
        self.resumed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn manager_at_depth(depth: usize) -> StackManager {
        let manager = StackManager::new(1);
        for level in 0..depth {
            manager.push_frame(StackFrame::new("/a.js", level as u32 + 1, format!("f{}", level)));
        }
        manager
    }

    #[test]
    fn test_frames_are_top_first() {
        let manager = manager_at_depth(3);

        assert_eq!(manager.depth(), 3);
        assert_eq!(manager.frame(0).unwrap().function, "f2");
        assert_eq!(manager.frame(2).unwrap().function, "f0");
        assert!(manager.frame(3).is_none());

        let functions: Vec<String> = manager.frames().into_iter().map(|f| f.function).collect();
        assert_eq!(functions, vec!["f2", "f1", "f0"]);
    }

    #[test]
    fn test_set_location_creates_top_level_frame() {
        let manager = StackManager::new(1);
        manager.set_location("/a.js", 4);

        assert_eq!(manager.depth(), 1);
        assert_eq!(manager.current_location(), Some(LineKey::new("/a.js", 4)));

        manager.set_location("/a.js", 5);
        assert_eq!(manager.depth(), 1);
        assert_eq!(manager.frame(0).unwrap().line, 5);
    }

    #[test]
    fn test_step_over_skips_deeper_frames() {
        let manager = manager_at_depth(5);
        manager.step_over();

        // call into a deeper function: lines at depth 6 and 7 do not stop
        manager.push_frame(StackFrame::new("/b.js", 1, "inner"));
        assert!(!manager.take_pending_stop());
        manager.push_frame(StackFrame::new("/b.js", 10, "innermost"));
        assert!(!manager.take_pending_stop());
        manager.pop_frame();
        assert!(!manager.take_pending_stop());
        manager.pop_frame();

        // back at depth 5
        assert!(manager.take_pending_stop());
        assert_eq!(manager.step_mode(), StepMode::None);
        assert!(!manager.take_pending_stop());
    }

    #[test]
    fn test_step_out_needs_shallower_depth() {
        let manager = manager_at_depth(3);
        manager.step_out();

        assert!(!manager.take_pending_stop());
        manager.pop_frame();
        assert!(manager.take_pending_stop());
    }

    #[test]
    fn test_step_into_stops_anywhere() {
        let manager = manager_at_depth(2);
        manager.step_into();
        manager.push_frame(StackFrame::new("/a.js", 9, "callee"));

        assert!(manager.take_pending_stop());
    }

    #[test]
    fn test_break_request_is_one_shot() {
        let manager = manager_at_depth(1);
        manager.request_break();

        assert!(manager.take_pending_stop());
        assert!(!manager.take_pending_stop());
    }

    #[test]
    fn test_suspend_without_client_does_not_block() {
        let manager = manager_at_depth(1);

        manager.suspend(|| false).unwrap();
        assert!(!manager.is_suspended());
    }

    #[test]
    fn test_suspend_blocks_until_resumed() {
        let manager = Arc::new(manager_at_depth(1));
        let (tx, rx) = mpsc::channel();

        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let result = manager.suspend(|| true);
                tx.send(()).unwrap();
                result
            })
        };

        while !manager.is_suspended() {
            thread::yield_now();
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        manager.step_over();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(manager.step_mode(), StepMode::Over);
    }

    #[test]
    fn test_stop_releases_waiter() {
        let manager = Arc::new(manager_at_depth(1));

        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.suspend(|| true))
        };

        while !manager.is_suspended() {
            thread::yield_now();
        }
        manager.stop();

        assert!(matches!(waiter.join().unwrap(), Err(DbgpError::Terminated)));
        assert!(matches!(manager.suspend(|| true), Err(DbgpError::Terminated)));
    }
}
