// Execution control and session feature commands
//
// run / step_* only record the transaction: their answer is the break or
// stopped notice sent later by the interpreter thread.

use tracing::{debug, info};

use crate::commands::Command;
use crate::protocol::DbgpResult;
use crate::session::Session;
use crate::types::{RunStatus, StepMode, StreamKind, StreamMode};

const BREAKPOINT_TYPES: &str = "line conditional call return exception watch";

pub fn run(session: &Session, command: &Command) -> DbgpResult<()> {
    resume(session, command, StepMode::None)
}

pub fn step_into(session: &Session, command: &Command) -> DbgpResult<()> {
    resume(session, command, StepMode::Into)
}

pub fn step_over(session: &Session, command: &Command) -> DbgpResult<()> {
    resume(session, command, StepMode::Over)
}

pub fn step_out(session: &Session, command: &Command) -> DbgpResult<()> {
    resume(session, command, StepMode::Out)
}

fn resume(session: &Session, command: &Command, mode: StepMode) -> DbgpResult<()> {
    session.set_transaction_id(command.transaction_id().map(str::to_string));
    session.resume_with(mode);
    Ok(())
}

pub fn break_now(session: &Session, command: &Command) -> DbgpResult<()> {
    let requested = session.request_break();
    session.send(command.response().attr("success", u8::from(requested)));
    Ok(())
}

pub fn stop(session: &Session, command: &Command) -> DbgpResult<()> {
    info!("IDE requested stop");
    session.send_end();
    session.send(
        command
            .response()
            .attr("status", RunStatus::Stopped.as_str())
            .attr("reason", "ok"),
    );
    session.close();
    Ok(())
}

pub fn feature_get(session: &Session, command: &Command) -> DbgpResult<()> {
    let name = command.required("n")?;
    let response = command.response().attr("feature_name", name);

    let response = match feature_value(session, name) {
        Some(value) => response.attr("supported", 1).text(&value),
        None => response.attr("supported", 0),
    };
    session.send(response);
    Ok(())
}

pub fn feature_set(session: &Session, command: &Command) -> DbgpResult<()> {
    let name = command.required("n")?;
    let value = command.required("v")?.trim();

    let applied = apply_feature(session, name, value);
    debug!("feature_set {}={} applied={}", name, value, applied);
    session.send(
        command
            .response()
            .attr("feature", name)
            .attr("success", u8::from(applied)),
    );
    Ok(())
}

fn feature_value(session: &Session, name: &str) -> Option<String> {
    let config = session.config();
    let flags = session.registry().suspend_flags();
    let value = match name {
        "language_name" => config.language,
        "language_supports_threads" => "0".to_string(),
        "protocol_version" => config.protocol_version,
        "encoding" => "UTF-8".to_string(),
        "data_encoding" => "base64".to_string(),
        "supports_async" => "1".to_string(),
        "multiple_sessions" => "0".to_string(),
        "breakpoint_types" => BREAKPOINT_TYPES.to_string(),
        "max_depth" => config.max_depth.to_string(),
        "max_children" => config.max_children.to_string(),
        "max_data" => config.max_data.to_string(),
        "suspend_on_entry" => flag(flags.on_entry),
        "suspend_on_exit" => flag(flags.on_exit),
        "suspend_on_exception" => flag(flags.on_exception),
        _ => return None,
    };
    Some(value)
}

fn apply_feature(session: &Session, name: &str, value: &str) -> bool {
    match name {
        "max_depth" | "max_children" | "max_data" => {
            let Ok(parsed) = value.parse::<usize>() else {
                return false;
            };
            session.update_config(|config| match name {
                "max_depth" => config.max_depth = parsed,
                "max_children" => config.max_children = parsed,
                _ => config.max_data = parsed,
            });
            true
        }
        "suspend_on_entry" | "suspend_on_exit" | "suspend_on_exception" => {
            let Some(enabled) = parse_flag(value) else {
                return false;
            };
            let registry = session.registry();
            match name {
                "suspend_on_entry" => registry.set_suspend_on_entry(enabled),
                "suspend_on_exit" => registry.set_suspend_on_exit(enabled),
                _ => registry.set_suspend_on_exception(enabled),
            }
            true
        }
        _ => false,
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

pub fn stdout(session: &Session, command: &Command) -> DbgpResult<()> {
    redirect(session, command, StreamKind::Stdout)
}

pub fn stderr(session: &Session, command: &Command) -> DbgpResult<()> {
    redirect(session, command, StreamKind::Stderr)
}

fn redirect(session: &Session, command: &Command, kind: StreamKind) -> DbgpResult<()> {
    let mode: StreamMode = command
        .parse_option("c")?
        .unwrap_or(StreamMode::Copy);
    session.set_stream_mode(kind, mode);
    session.send(command.response().attr("success", 1));
    Ok(())
}

pub fn stdin(session: &Session, command: &Command) -> DbgpResult<()> {
    let redirected = command.option("c").map(|c| c.trim() == "1").unwrap_or(false);
    session.set_stdin_redirected(redirected);
    session.send(command.response().attr("success", 1));
    Ok(())
}
