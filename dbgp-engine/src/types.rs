// DBGP type definitions
//
// Common types shared by the registry, the stack managers and the command handlers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::DbgpError;

/// Breakpoint identity, rendered on the wire as `p<n>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakpointId(pub u64);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl FromStr for BreakpointId {
    type Err = DbgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches('p');
        digits
            .parse::<u64>()
            .map(BreakpointId)
            .map_err(|_| DbgpError::BreakpointNotFound(s.to_string()))
    }
}

/// Identity of one interpreter execution context (one StackManager)
pub type ContextId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointKind {
    Line,
    Conditional,
    Call,
    Return,
    Exception,
    Watch,
}

impl BreakpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakpointKind::Line => "line",
            BreakpointKind::Conditional => "conditional",
            BreakpointKind::Call => "call",
            BreakpointKind::Return => "return",
            BreakpointKind::Exception => "exception",
            BreakpointKind::Watch => "watch",
        }
    }

    /// Kinds indexed by (file, line)
    pub fn is_line(self) -> bool {
        matches!(self, BreakpointKind::Line | BreakpointKind::Conditional)
    }
}

impl FromStr for BreakpointKind {
    type Err = DbgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "line" => Ok(BreakpointKind::Line),
            "conditional" => Ok(BreakpointKind::Conditional),
            "call" => Ok(BreakpointKind::Call),
            "return" => Ok(BreakpointKind::Return),
            "exception" => Ok(BreakpointKind::Exception),
            "watch" => Ok(BreakpointKind::Watch),
            other => Err(DbgpError::InvalidOption {
                option: "t",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointState {
    Enabled,
    Disabled,
}

impl BreakpointState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakpointState::Enabled => "enabled",
            BreakpointState::Disabled => "disabled",
        }
    }
}

impl FromStr for BreakpointState {
    type Err = DbgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "enabled" => Ok(BreakpointState::Enabled),
            "disabled" => Ok(BreakpointState::Disabled),
            other => Err(DbgpError::InvalidOption {
                option: "s",
                value: other.to_string(),
            }),
        }
    }
}

/// How the hit counter gates a breakpoint once `hit_value` is positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitCondition {
    /// `>=`: suppressed until the counter reaches the threshold
    AtLeast,
    /// `==`: fires only when the counter equals the threshold
    Equal,
    /// `%`: fires when the counter is a multiple of the threshold
    Multiple,
}

impl HitCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            HitCondition::AtLeast => ">=",
            HitCondition::Equal => "==",
            HitCondition::Multiple => "%",
        }
    }

    /// Check whether a counter value satisfies the condition.
    /// A zero threshold means "no policy" and always fires.
    pub fn is_met(self, hit_value: u32, hits: u32) -> bool {
        if hit_value == 0 {
            return true;
        }
        match self {
            HitCondition::AtLeast => hits >= hit_value,
            HitCondition::Equal => hits == hit_value,
            HitCondition::Multiple => hits % hit_value == 0,
        }
    }
}

impl FromStr for HitCondition {
    type Err = DbgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">=" => Ok(HitCondition::AtLeast),
            "==" => Ok(HitCondition::Equal),
            "%" => Ok(HitCondition::Multiple),
            other => Err(DbgpError::InvalidHitCondition(other.to_string())),
        }
    }
}

/// Source location key used by the line index and the watchpoint write cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineKey {
    pub file: String,
    pub line: u32,
}

impl LineKey {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Step request recorded on a stack context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    None,
    /// Break at the next executed line regardless of depth
    Into,
    /// Break at the next line at or above the recorded depth
    Over,
    /// Break at the next line strictly above the recorded depth
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Suspended,
}

/// Status values carried by `<response command="run" status="...">`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Break,
    Stopped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Break => "break",
            RunStatus::Stopped => "stopped",
        }
    }
}

/// Redirection mode for the debuggee's stdout/stderr (`stdout -c n`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamMode {
    /// Output stays local only
    Disable,
    /// Output is printed locally and copied to the IDE
    Copy,
    /// Output goes to the IDE only
    Redirect,
}

impl FromStr for StreamMode {
    type Err = DbgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(StreamMode::Disable),
            "1" => Ok(StreamMode::Copy),
            "2" => Ok(StreamMode::Redirect),
            other => Err(DbgpError::InvalidOption {
                option: "c",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}
