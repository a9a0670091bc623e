// DBGP debug engine for embedded script interpreters
//
// Implements the debuggee side of the DBGP protocol:
// - Connection management and the init handshake
// - Breakpoint registry (line, conditional, call, return, exception, watch)
// - Per-context call stacks with stepping and suspension
// - Value inspection through host object capabilities
// - Command dispatch for the IDE command set

pub mod breakpoint_commands;
pub mod breakpoints;
pub mod commands;
pub mod config;
pub mod connection;
pub mod encoder;
pub mod eventloop;
pub mod events;
pub mod execution;
pub mod hook;
pub mod inspection;
pub mod object;
pub mod protocol;
pub mod reader;
pub mod response;
pub mod session;
pub mod stackframe;
pub mod types;

pub use breakpoints::{Breakpoint, BreakpointRegistry};
pub use config::SessionConfig;
pub use connection::DbgpConnection;
pub use encoder::{PropertyNode, ValueEncoder};
pub use hook::DebugHook;
pub use object::{HostError, HostObject, HostValue, ObjectRef, PropertyId, ScriptHost};
pub use protocol::{DbgpError, DbgpResult};
pub use session::Session;
pub use stackframe::{StackFrame, StackManager};
