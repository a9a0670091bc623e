// Stack and variable inspection commands
//
// stack_depth, stack_get, context_names, context_get, property_get,
// property_set and eval. Values are read through the host capabilities and
// rendered with the session's ValueEncoder.

use tracing::warn;

use crate::commands::Command;
use crate::object::{HostValue, ObjectRef, PropertyId, Scalar};
use crate::protocol::{to_file_uri, DbgpError, DbgpResult};
use crate::response::Response;
use crate::session::Session;
use crate::stackframe::StackFrame;

const LOCALS: u64 = 0;
const GLOBALS: u64 = 1;

/// Send the built response, or the DBGP error it failed with
fn reply(session: &Session, command: &Command, result: DbgpResult<Response>) -> DbgpResult<()> {
    match result {
        Ok(response) => session.send(response),
        Err(e @ (DbgpError::Terminated | DbgpError::Io(_) | DbgpError::ConnectionClosed)) => {
            return Err(e)
        }
        Err(e) => {
            warn!("{} failed: {}", command.name, e);
            session.send(command.error_response(&e))
        }
    };
    Ok(())
}

/// Frame at `depth` of the current context. `None` when nothing executes yet.
fn frame_at(session: &Session, depth: usize) -> DbgpResult<Option<StackFrame>> {
    match session.current_stack() {
        Some(stack) if stack.depth() > 0 => stack
            .frame(depth)
            .map(Some)
            .ok_or(DbgpError::InvalidStackDepth(depth)),
        _ if depth == 0 => Ok(None),
        _ => Err(DbgpError::InvalidStackDepth(depth)),
    }
}

pub fn stack_depth(session: &Session, command: &Command) -> DbgpResult<()> {
    let depth = session
        .current_stack()
        .map(|stack| stack.depth())
        .unwrap_or(0);
    session.send(command.response().attr("depth", depth));
    Ok(())
}

fn stack_element(level: usize, frame: &StackFrame) -> Response {
    let location = if frame.function.is_empty() {
        "{main}"
    } else {
        frame.function.as_str()
    };
    Response::element("stack")
        .attr("level", level)
        .attr("type", "file")
        .attr("filename", to_file_uri(&frame.file))
        .attr("lineno", frame.line)
        .attr("where", location)
}

pub fn stack_get(session: &Session, command: &Command) -> DbgpResult<()> {
    let depth: Option<usize> = command.parse_option("d")?;

    let result = (|| -> DbgpResult<Response> {
        let frames = session
            .current_stack()
            .map(|stack| stack.frames())
            .unwrap_or_default();
        let mut response = command.response();
        match depth {
            Some(level) => {
                let frame = frames
                    .get(level)
                    .ok_or(DbgpError::InvalidStackDepth(level))?;
                response = response.child(stack_element(level, frame));
            }
            None => {
                for (level, frame) in frames.iter().enumerate() {
                    response = response.child(stack_element(level, frame));
                }
            }
        }
        Ok(response)
    })();

    reply(session, command, result)
}

pub fn context_names(session: &Session, command: &Command) -> DbgpResult<()> {
    let response = command
        .response()
        .child(Response::element("context").attr("name", "Locals").attr("id", LOCALS))
        .child(Response::element("context").attr("name", "Globals").attr("id", GLOBALS));
    session.send(response);
    Ok(())
}

pub fn context_get(session: &Session, command: &Command) -> DbgpResult<()> {
    let depth: usize = command.parse_option("d")?.unwrap_or(0);
    let context: u64 = command.parse_option("c")?.unwrap_or(LOCALS);

    let result = (|| -> DbgpResult<Response> {
        let (scope, this) = match context {
            LOCALS => match frame_at(session, depth)? {
                Some(frame) => (frame.scope, frame.this),
                None => (None, None),
            },
            GLOBALS => (session.host().global_scope(), None),
            other => return Err(DbgpError::InvalidContext(other)),
        };

        let encoder = session.encoder();
        let eager = 1 < encoder.max_depth();
        let mut response = command.response().attr("context", context);

        if let Some(scope) = scope {
            let ids = match scope.initialized_ids() {
                Some(ids) => ids,
                None => scope.ids(),
            };
            let ids = ids.unwrap_or_else(|err| {
                warn!("Failed to enumerate context {}: {}", context, err);
                Vec::new()
            });
            for id in ids {
                let name = id.to_string();
                let value = match scope.get(&id) {
                    Ok(value) => value,
                    Err(err) => {
                        let node = encoder.encode_read_error(&name, &name, &err);
                        response = response.child(node.to_response());
                        continue;
                    }
                };
                if matches!(&value, HostValue::Object(object) if object.is_internal()) {
                    continue;
                }
                response = response.child(encoder.encode(&name, &name, &value, 1, eager).to_response());
            }
        }
        if let Some(this) = this {
            let value = HostValue::Object(this);
            response = response.child(encoder.encode("this", "this", &value, 1, eager).to_response());
        }
        Ok(response)
    })();

    reply(session, command, result)
}

pub fn property_get(session: &Session, command: &Command) -> DbgpResult<()> {
    let name = command.required("n")?;
    let depth: usize = command.parse_option("d")?.unwrap_or(0);
    let context: u64 = command.parse_option("c")?.unwrap_or(LOCALS);

    let result = (|| -> DbgpResult<Response> {
        let frame = frame_at(session, depth)?;
        let value = resolve(session, frame.as_ref(), context, name)?;
        let node = session.encoder().encode(name, name, &value, 0, true);
        Ok(command.response().child(node.to_response()))
    })();

    reply(session, command, result)
}

pub fn property_set(session: &Session, command: &Command) -> DbgpResult<()> {
    let name = command.required("n")?;
    let depth: usize = command.parse_option("d")?.unwrap_or(0);
    let context: u64 = command.parse_option("c")?.unwrap_or(LOCALS);
    let expression = command.decoded_data()?.ok_or(DbgpError::MissingOption("-"))?;

    let assigned = frame_at(session, depth).and_then(|frame| {
        let value = session.host().evaluate(&expression, frame.as_ref())?;
        assign(session, frame.as_ref(), context, name, value)
    });

    if let Err(e) = &assigned {
        warn!("property_set {} failed: {}", name, e);
    }
    session.send(command.response().attr("success", u8::from(assigned.is_ok())));
    Ok(())
}

pub fn eval(session: &Session, command: &Command) -> DbgpResult<()> {
    let depth: usize = command.parse_option("d")?.unwrap_or(0);
    let expression = command.decoded_data()?.ok_or(DbgpError::MissingOption("-"))?;

    let result = (|| -> DbgpResult<Response> {
        let frame = frame_at(session, depth)?;
        let value = session.host().evaluate(&expression, frame.as_ref())?;
        let node = session.encoder().encode(&expression, &expression, &value, 0, true);
        Ok(command.response().child(node.to_response()))
    })();

    reply(session, command, result)
}

/// Split `a.b[2]["c"]` into property ids. `None` for anything that is not
/// a plain access path.
pub fn parse_path(path: &str) -> Option<Vec<PropertyId>> {
    let path = path.trim();
    if path.is_empty() || path.ends_with('.') {
        return None;
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if current.is_empty() {
                    return None;
                }
                segments.push(PropertyId::Name(std::mem::take(&mut current)));
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(PropertyId::Name(std::mem::take(&mut current)));
                }
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(ch) => inner.push(ch),
                        None => return None,
                    }
                }
                let inner = inner.trim();
                let id = match inner.parse::<u32>() {
                    Ok(index) => PropertyId::Index(index),
                    Err(_) => PropertyId::Name(inner.trim_matches(|q| q == '"' || q == '\'').to_string()),
                };
                segments.push(id);
                if chars.peek() == Some(&'.') {
                    chars.next();
                }
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => current.push(c),
            _ => return None,
        }
    }
    if !current.is_empty() {
        segments.push(PropertyId::Name(current));
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

fn is_found(value: &HostValue) -> bool {
    !matches!(value, HostValue::Scalar(Scalar::NotFound))
}

/// Scopes searched for the first path segment, innermost first
fn root_scopes(session: &Session, frame: Option<&StackFrame>, context: u64) -> DbgpResult<Vec<ObjectRef>> {
    let mut scopes = Vec::new();
    match context {
        LOCALS => {
            if let Some(scope) = frame.and_then(|f| f.scope.clone()) {
                scopes.push(scope);
            }
        }
        GLOBALS => {}
        other => return Err(DbgpError::InvalidContext(other)),
    }
    if let Some(global) = session.host().global_scope() {
        scopes.push(global);
    }
    Ok(scopes)
}

fn lookup_root(
    session: &Session,
    frame: Option<&StackFrame>,
    context: u64,
    id: &PropertyId,
) -> DbgpResult<Option<HostValue>> {
    if *id == PropertyId::Name("this".to_string()) {
        if let Some(this) = frame.and_then(|f| f.this.clone()) {
            return Ok(Some(HostValue::Object(this)));
        }
    }
    for scope in root_scopes(session, frame, context)? {
        let value = scope.get(id)?;
        if is_found(&value) {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn walk(
    session: &Session,
    frame: Option<&StackFrame>,
    context: u64,
    segments: &[PropertyId],
) -> DbgpResult<Option<HostValue>> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(None);
    };
    let Some(mut value) = lookup_root(session, frame, context, first)? else {
        return Ok(None);
    };
    for segment in rest {
        let Some(object) = value.as_object() else {
            return Ok(None);
        };
        let next = object.get(segment)?;
        if !is_found(&next) {
            return Ok(None);
        }
        value = next;
    }
    Ok(Some(value))
}

/// Resolve a property path, falling back to the host evaluator for
/// anything that is not a plain path
fn resolve(
    session: &Session,
    frame: Option<&StackFrame>,
    context: u64,
    path: &str,
) -> DbgpResult<HostValue> {
    if let Some(segments) = parse_path(path) {
        if let Some(value) = walk(session, frame, context, &segments)? {
            return Ok(value);
        }
    }
    session
        .host()
        .evaluate(path, frame)
        .map_err(|_| DbgpError::PropertyNotFound(path.to_string()))
}

fn assign(
    session: &Session,
    frame: Option<&StackFrame>,
    context: u64,
    path: &str,
    value: HostValue,
) -> DbgpResult<()> {
    let segments = parse_path(path).ok_or_else(|| DbgpError::PropertyNotFound(path.to_string()))?;
    let Some((last, parents)) = segments.split_last() else {
        return Err(DbgpError::PropertyNotFound(path.to_string()));
    };

    if parents.is_empty() {
        let scopes = root_scopes(session, frame, context)?;
        let mut target = None;
        for scope in &scopes {
            if is_found(&scope.get(last)?) {
                target = Some(scope);
                break;
            }
        }
        let scope = target
            .or_else(|| scopes.first())
            .ok_or_else(|| DbgpError::PropertyNotFound(path.to_string()))?;
        scope.set(last, value)?;
        return Ok(());
    }

    let parent = walk(session, frame, context, parents)?
        .ok_or_else(|| DbgpError::PropertyNotFound(path.to_string()))?;
    let object = parent
        .as_object()
        .ok_or_else(|| DbgpError::PropertyNotFound(path.to_string()))?;
    object.set(last, value)?;
    Ok(())
}
