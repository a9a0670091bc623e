// Interpreter callback interface
//
// The embedding runtime drives the debugger through this trait at every
// context, frame, line and property boundary. Each call may block while the
// IDE holds the debuggee suspended; `Err(DbgpError::Terminated)` tells the
// runtime the session is gone and it should unwind.

use std::sync::Arc;

use crate::object::ObjectRef;
use crate::protocol::DbgpResult;
use crate::stackframe::{StackFrame, StackManager};
use crate::types::ContextId;

pub trait DebugHook: Send + Sync {
    /// An evaluation begins (top-level script or nested eval). The returned
    /// context shadows the previous one until `exit_context`.
    fn enter_context(&self) -> DbgpResult<Arc<StackManager>>;

    fn exit_context(&self, context: ContextId);

    /// A script or function finished compiling
    fn on_compile(&self, file: &str) -> DbgpResult<()>;

    /// A function frame was entered
    fn on_enter(&self, frame: StackFrame) -> DbgpResult<()>;

    /// The executing frame reached a new line
    fn on_line(&self, file: &str, line: u32) -> DbgpResult<()>;

    /// The executing frame is about to return
    fn on_exit(&self) -> DbgpResult<()>;

    fn on_exception(&self, class_name: &str, message: &str) -> DbgpResult<()>;

    fn on_property_read(&self, object: &ObjectRef, property: &str) -> DbgpResult<()>;

    fn on_property_write(&self, object: &ObjectRef, property: &str) -> DbgpResult<()>;
}
