// Breakpoint commands
//
// breakpoint_set / _get / _update / _remove. Watchpoint expressions carry
// two trailing flag characters, `<access><modification>`, each 0 or 1.

use tracing::{debug, info};

use crate::breakpoints::{Breakpoint, BreakpointUpdate};
use crate::commands::Command;
use crate::protocol::{strip_file_uri, to_file_uri, DbgpError, DbgpResult};
use crate::response::Response;
use crate::session::Session;
use crate::types::{BreakpointId, BreakpointKind, BreakpointState, HitCondition};

/// Split `expr` + access flag + modification flag
fn split_watch_expression(expression: &str) -> DbgpResult<(String, bool, bool)> {
    let chars: Vec<char> = expression.chars().collect();
    if chars.len() < 3 {
        return Err(DbgpError::InvalidOption {
            option: "-",
            value: expression.to_string(),
        });
    }
    let split = chars.len() - 2;
    let property: String = chars[..split].iter().collect();
    Ok((property.trim().to_string(), chars[split] == '1', chars[split + 1] == '1'))
}

fn breakpoint_from_command(command: &Command) -> DbgpResult<Breakpoint> {
    let kind: BreakpointKind = command.parse_option("t")?.unwrap_or(BreakpointKind::Line);
    let mut breakpoint = Breakpoint::new(kind);

    if let Some(state) = command.parse_option::<BreakpointState>("s")? {
        breakpoint.state = state;
    }
    if let Some(file) = command.option("f") {
        breakpoint.file = strip_file_uri(file).to_string();
    }
    breakpoint.line = command.parse_option("n")?.unwrap_or(0);
    breakpoint.function = command.option("m").map(|m| m.trim().to_string());
    breakpoint.exception = command.option("x").map(|x| x.trim().to_string());
    breakpoint.temporary = command.option("r").map(|r| r.trim() == "1").unwrap_or(false);

    breakpoint.hit_value = command.parse_option("h")?.unwrap_or(0);
    breakpoint.hit_condition = command.parse_option::<HitCondition>("o")?;
    if breakpoint.hit_value > 0 && breakpoint.hit_condition.is_none() {
        breakpoint.hit_condition = Some(HitCondition::AtLeast);
    }

    match command.decoded_data()? {
        Some(expression) if kind == BreakpointKind::Watch => {
            let (property, access, modification) = split_watch_expression(&expression)?;
            breakpoint.expression = Some(property);
            breakpoint.break_on_access = access;
            breakpoint.break_on_modification = modification;
        }
        Some(expression) => breakpoint.expression = Some(expression),
        None if kind == BreakpointKind::Watch => return Err(DbgpError::MissingOption("-")),
        None => {}
    }

    Ok(breakpoint)
}

pub fn breakpoint_set(session: &Session, command: &Command) -> DbgpResult<()> {
    let breakpoint = breakpoint_from_command(command)?;
    let state = breakpoint.state;

    match session.registry().add(breakpoint) {
        Ok(id) => {
            info!("Breakpoint {} set", id);
            session.send(
                command
                    .response()
                    .attr("id", id)
                    .attr("state", state.as_str()),
            );
        }
        Err(e @ DbgpError::InvalidHitCondition(_)) => {
            session.send(command.error_response(&e));
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

fn breakpoint_element(breakpoint: &Breakpoint) -> Response {
    let mut element = Response::element("breakpoint")
        .attr("id", breakpoint.id)
        .attr("type", breakpoint.kind.as_str())
        .attr("state", breakpoint.state.as_str());
    if !breakpoint.file.is_empty() {
        element = element
            .attr("filename", to_file_uri(&breakpoint.file))
            .attr("lineno", breakpoint.line);
    }
    if let Some(function) = &breakpoint.function {
        element = element.attr("function", function);
    }
    if let Some(exception) = &breakpoint.exception {
        element = element.attr("exception", exception);
    }
    element = element
        .attr("hit_value", breakpoint.hit_value)
        .attr(
            "hit_condition",
            breakpoint.hit_condition.map(HitCondition::as_str).unwrap_or(">="),
        )
        .attr("hit_count", breakpoint.hit_count)
        .attr("temporary", u8::from(breakpoint.temporary));

    if let Some(expression) = &breakpoint.expression {
        let mut text = expression.clone();
        if breakpoint.kind == BreakpointKind::Watch {
            text.push(if breakpoint.break_on_access { '1' } else { '0' });
            text.push(if breakpoint.break_on_modification { '1' } else { '0' });
        }
        element = element.child(Response::element("expression").base64(&text));
    }
    element
}

fn target_id(command: &Command) -> DbgpResult<BreakpointId> {
    command.required("d")?.parse()
}

pub fn breakpoint_get(session: &Session, command: &Command) -> DbgpResult<()> {
    let found = target_id(command).and_then(|id| {
        session
            .registry()
            .get(id)
            .ok_or_else(|| DbgpError::BreakpointNotFound(id.to_string()))
    });

    let response = match found {
        Ok(breakpoint) => command.response().child(breakpoint_element(&breakpoint)),
        Err(e @ DbgpError::BreakpointNotFound(_)) => command.error_response(&e),
        Err(e) => return Err(e),
    };
    session.send(response);
    Ok(())
}

pub fn breakpoint_remove(session: &Session, command: &Command) -> DbgpResult<()> {
    let removed = target_id(command).and_then(|id| session.registry().remove(id));

    let response = match removed {
        Ok(breakpoint) => {
            debug!("Breakpoint {} removed", breakpoint.id);
            command.response().attr("success", 1)
        }
        Err(e @ DbgpError::BreakpointNotFound(_)) => command.error_response(&e),
        Err(e) => return Err(e),
    };
    session.send(response);
    Ok(())
}

pub fn breakpoint_update(session: &Session, command: &Command) -> DbgpResult<()> {
    let updated = target_id(command).and_then(|id| {
        let current = session
            .registry()
            .get(id)
            .ok_or_else(|| DbgpError::BreakpointNotFound(id.to_string()))?;
        let update = update_from_command(command, current.kind)?;
        session.registry().update(id, update)
    });

    let response = match updated {
        Ok(_) => command.response().attr("success", 1),
        Err(e @ (DbgpError::BreakpointNotFound(_) | DbgpError::InvalidHitCondition(_))) => {
            command.error_response(&e)
        }
        Err(e) => return Err(e),
    };
    session.send(response);
    Ok(())
}

fn update_from_command(command: &Command, kind: BreakpointKind) -> DbgpResult<BreakpointUpdate> {
    let mut update = BreakpointUpdate {
        state: command.parse_option("s")?,
        line: command.parse_option("n")?,
        hit_value: command.parse_option("h")?,
        hit_condition: command.parse_option("o")?,
        ..Default::default()
    };

    if let Some(expression) = command.decoded_data()? {
        if kind == BreakpointKind::Watch {
            let (property, access, modification) = split_watch_expression(&expression)?;
            update.expression = Some(property);
            update.watch_flags = Some((access, modification));
        } else {
            update.expression = Some(expression);
        }
    }
    Ok(update)
}
