// Line-walking script host
//
// Each non-blank line of the script is one statement:
//   name = expr        assign into the top-level scope
//   print expr         write the value to stdout
//   throw Class: text  raise an exception
// Expressions are literals (numbers, "strings", true/false) or variable
// names. Every statement passes through the engine hooks, and the script
// itself is visible to the IDE as the global `script` object.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dbgp_engine::object::{ObjectKind, Scalar};
use dbgp_engine::{
    DbgpError, DbgpResult, DebugHook, HostError, HostObject, HostValue, ObjectRef, PropertyId,
    ScriptHost, Session, StackFrame,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign { name: String, expr: String },
    Print(String),
    Throw { class_name: String, message: String },
    Nop,
}

impl Statement {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            return Statement::Nop;
        }
        if let Some(expr) = line.strip_prefix("print ") {
            return Statement::Print(expr.trim().to_string());
        }
        if let Some(rest) = line.strip_prefix("throw ") {
            let (class_name, message) = rest.split_once(':').unwrap_or((rest, ""));
            return Statement::Throw {
                class_name: class_name.trim().to_string(),
                message: message.trim().to_string(),
            };
        }
        match line.split_once('=') {
            Some((name, expr)) if is_identifier(name.trim()) => Statement::Assign {
                name: name.trim().to_string(),
                expr: expr.trim().to_string(),
            },
            _ => Statement::Nop,
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[derive(Debug, Clone)]
pub struct Script {
    pub path: String,
    pub lines: Vec<String>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        let path = fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve script path {}", path.display()))?;

        Ok(Self {
            path: path.display().to_string(),
            lines: text.lines().map(str::to_string).collect(),
        })
    }
}

/// Mutable name/value scope
#[derive(Debug, Default)]
pub struct ScopeObject {
    members: Mutex<Vec<(PropertyId, HostValue)>>,
}

impl ScopeObject {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_members(members: Vec<(&str, HostValue)>) -> Arc<Self> {
        let members = members
            .into_iter()
            .map(|(name, value)| (PropertyId::from(name), value))
            .collect();
        Arc::new(Self {
            members: Mutex::new(members),
        })
    }
}

impl HostObject for ScopeObject {
    fn class_name(&self) -> String {
        "Object".to_string()
    }

    fn ids(&self) -> Result<Vec<PropertyId>, HostError> {
        Ok(self.members.lock().iter().map(|(id, _)| id.clone()).collect())
    }

    fn get(&self, id: &PropertyId) -> Result<HostValue, HostError> {
        let members = self.members.lock();
        Ok(members
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, value)| value.clone())
            .unwrap_or(HostValue::Scalar(Scalar::NotFound)))
    }

    fn set(&self, id: &PropertyId, value: HostValue) -> Result<(), HostError> {
        let mut members = self.members.lock();
        match members.iter_mut().find(|(key, _)| key == id) {
            Some(entry) => entry.1 = value,
            None => members.push((id.clone(), value)),
        }
        Ok(())
    }

    fn display_string(&self) -> Result<String, HostError> {
        Ok("[object Object]".to_string())
    }
}

/// Read-only array of the script's source lines
#[derive(Debug)]
struct LineArray {
    lines: Vec<String>,
}

impl HostObject for LineArray {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Array
    }

    fn class_name(&self) -> String {
        "Array".to_string()
    }

    fn ids(&self) -> Result<Vec<PropertyId>, HostError> {
        let count = u32::try_from(self.lines.len())
            .map_err(|_| HostError::new("RangeError", "script too long"))?;
        Ok((0..count).map(PropertyId::Index).collect())
    }

    fn get(&self, id: &PropertyId) -> Result<HostValue, HostError> {
        let value = match id {
            PropertyId::Index(index) => self
                .lines
                .get(*index as usize)
                .map(|line| HostValue::string(line.as_str())),
            PropertyId::Name(name) if name == "length" => {
                Some(HostValue::number(self.lines.len() as f64))
            }
            PropertyId::Name(_) => None,
        };
        Ok(value.unwrap_or(HostValue::Scalar(Scalar::NotFound)))
    }

    fn set(&self, _id: &PropertyId, _value: HostValue) -> Result<(), HostError> {
        Err(HostError::new("TypeError", "script lines are read-only"))
    }

    fn display_string(&self) -> Result<String, HostError> {
        Ok(self.lines.join(","))
    }
}

/// Evaluator for the walker's expression forms
#[derive(Debug)]
pub struct WalkerHost {
    globals: ObjectRef,
    locals: ObjectRef,
}

impl WalkerHost {
    pub fn new(script: &Script) -> Self {
        let lines: ObjectRef = Arc::new(LineArray {
            lines: script.lines.clone(),
        });
        let info = ScopeObject::with_members(vec![
            ("file", HostValue::string(script.path.as_str())),
            ("lines", HostValue::Object(lines)),
        ]);
        let globals = ScopeObject::with_members(vec![("script", HostValue::Object(info))]);

        Self {
            globals,
            locals: ScopeObject::new(),
        }
    }

    pub fn locals(&self) -> &ObjectRef {
        &self.locals
    }

    fn lookup(&self, name: &str, frame: Option<&StackFrame>) -> Result<Option<HostValue>, HostError> {
        let id = PropertyId::from(name);
        let scopes = frame
            .and_then(|f| f.scope.clone())
            .into_iter()
            .chain(std::iter::once(self.globals.clone()));
        for scope in scopes {
            let value = scope.get(&id)?;
            if !matches!(value, HostValue::Scalar(Scalar::NotFound)) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

impl ScriptHost for WalkerHost {
    fn evaluate(&self, expression: &str, frame: Option<&StackFrame>) -> Result<HostValue, HostError> {
        let expression = expression.trim();
        if let Ok(number) = expression.parse::<f64>() {
            return Ok(HostValue::number(number));
        }
        if let Some(text) = expression
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
        {
            return Ok(HostValue::string(text));
        }
        match expression {
            "true" => return Ok(HostValue::Scalar(Scalar::Boolean(true))),
            "false" => return Ok(HostValue::Scalar(Scalar::Boolean(false))),
            "null" => return Ok(HostValue::Scalar(Scalar::Null)),
            "undefined" => return Ok(HostValue::undefined()),
            _ => {}
        }
        if !is_identifier(expression) {
            return Err(HostError::new(
                "SyntaxError",
                format!("unsupported expression: {}", expression),
            ));
        }
        self.lookup(expression, frame)?.ok_or_else(|| {
            HostError::new("ReferenceError", format!("{} is not defined", expression))
        })
    }

    fn global_scope(&self) -> Option<ObjectRef> {
        Some(self.globals.clone())
    }
}

fn display(value: &HostValue) -> String {
    match value {
        HostValue::Scalar(scalar) => scalar.text(),
        HostValue::Object(object) => object
            .display_string()
            .unwrap_or_else(|e| format!("<{}>", e)),
    }
}

/// Run the script under the debugger. Returns `Err(Terminated)` when the
/// IDE ended the session before the script finished.
pub fn execute(session: &Session, script: &Script, host: &WalkerHost) -> DbgpResult<()> {
    let stack = session.enter_context()?;
    session.on_compile(&script.path)?;

    info!("Waiting for the IDE to start {}", script.path);
    let result = session
        .wait_for_run()
        .and_then(|()| walk(session, script, host));
    session.exit_context(stack.id());

    match result {
        Err(DbgpError::Terminated) => Err(DbgpError::Terminated),
        other => {
            session.notify_end();
            other
        }
    }
}

fn walk(session: &Session, script: &Script, host: &WalkerHost) -> DbgpResult<()> {
    let frame = StackFrame::new(script.path.as_str(), 1, "").with_scope(host.locals.clone());
    session.on_enter(frame.clone())?;

    for (index, source) in script.lines.iter().enumerate() {
        let statement = Statement::parse(source);
        if statement == Statement::Nop {
            continue;
        }
        let line = index as u32 + 1;
        session.on_line(&script.path, line)?;
        run_statement(session, host, &frame, statement)?;
    }

    session.on_exit()
}

fn run_statement(
    session: &Session,
    host: &WalkerHost,
    frame: &StackFrame,
    statement: Statement,
) -> DbgpResult<()> {
    match statement {
        Statement::Assign { name, expr } => {
            let value = match read(session, host, frame, &expr)? {
                Some(value) => value,
                None => return Ok(()),
            };
            host.locals.set(&PropertyId::from(name.as_str()), value)?;
            session.on_property_write(&host.locals, &name)
        }
        Statement::Print(expr) => {
            if let Some(value) = read(session, host, frame, &expr)? {
                let text = format!("{}\n", display(&value));
                if session.write_stdout(&text) {
                    print!("{}", text);
                }
            }
            Ok(())
        }
        Statement::Throw {
            class_name,
            message,
        } => {
            warn!("Script raised {}: {}", class_name, message);
            session.on_exception(&class_name, &message)
        }
        Statement::Nop => Ok(()),
    }
}

/// Evaluate an expression, reporting variable reads to the watchpoint hooks.
/// Evaluation failures are raised as script exceptions and yield `None`.
fn read(
    session: &Session,
    host: &WalkerHost,
    frame: &StackFrame,
    expr: &str,
) -> DbgpResult<Option<HostValue>> {
    match host.evaluate(expr, Some(frame)) {
        Ok(value) => {
            if is_identifier(expr) {
                session.on_property_read(&host.locals, expr)?;
            }
            Ok(Some(value))
        }
        Err(e) => {
            debug!("Evaluation of {:?} failed: {}", expr, e);
            let message = e.message().to_string();
            session.on_exception(e.class_name(), &message)?;
            Ok(None)
        }
    }
}
