// DBGP command parsing and dispatch
//
// A command line looks like `name -i 12 -f file:///a.js -- <base64>`.
// Options are found by splitting on " -" boundaries; `--` carries the
// base64 data argument.

use std::collections::HashMap;
use std::str::FromStr;

use tracing::{debug, error, warn};

use crate::breakpoint_commands;
use crate::execution;
use crate::inspection;
use crate::protocol::{decode_base64, DbgpError, DbgpResult};
use crate::response::Response;
use crate::session::Session;

pub mod command_names {
    pub const FEATURE_GET: &str = "feature_get";
    pub const FEATURE_SET: &str = "feature_set";
    pub const STDIN: &str = "stdin";
    pub const STDOUT: &str = "stdout";
    pub const STDERR: &str = "stderr";
    pub const RUN: &str = "run";
    pub const STOP: &str = "stop";
    pub const BREAK: &str = "break";
    pub const STEP_INTO: &str = "step_into";
    pub const STEP_OVER: &str = "step_over";
    pub const STEP_OUT: &str = "step_out";
    pub const BREAKPOINT_GET: &str = "breakpoint_get";
    pub const BREAKPOINT_SET: &str = "breakpoint_set";
    pub const BREAKPOINT_REMOVE: &str = "breakpoint_remove";
    pub const BREAKPOINT_UPDATE: &str = "breakpoint_update";
    pub const STACK_DEPTH: &str = "stack_depth";
    pub const STACK_GET: &str = "stack_get";
    pub const CONTEXT_NAMES: &str = "context_names";
    pub const CONTEXT_GET: &str = "context_get";
    pub const PROPERTY_GET: &str = "property_get";
    pub const PROPERTY_SET: &str = "property_set";
    pub const EVAL: &str = "eval";
}

/// A parsed IDE command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    /// Option values keyed without the leading dash
    pub options: HashMap<String, String>,
    /// Raw base64 argument following `--`
    pub data: Option<String>,
}

impl Command {
    pub fn transaction_id(&self) -> Option<&str> {
        self.option("i")
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn required(&self, key: &'static str) -> DbgpResult<&str> {
        self.option(key).ok_or(DbgpError::MissingOption(key))
    }

    /// Parse an optional option value
    pub fn parse_option<T: FromStr>(&self, key: &'static str) -> DbgpResult<Option<T>> {
        match self.option(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| DbgpError::InvalidOption {
                    option: key,
                    value: raw.to_string(),
                }),
        }
    }

    /// Decoded `--` argument
    pub fn decoded_data(&self) -> DbgpResult<Option<String>> {
        self.data.as_deref().map(decode_base64).transpose()
    }

    /// Plain `<response>` for this command
    pub fn response(&self) -> Response {
        Response::new(&self.name, self.transaction_id())
    }

    /// DBGP `<error>` response for this command
    pub fn error_response(&self, err: &DbgpError) -> Response {
        Response::error(&self.name, self.transaction_id(), err.code(), &err.to_string())
    }
}

/// Split a raw command line into name, options and data
pub fn parse_command(line: &str) -> DbgpResult<Command> {
    let line = line.trim();
    let (name, rest) = match line.find(' ') {
        Some(space) => (&line[..space], &line[space..]),
        None => (line, ""),
    };
    if name.is_empty() || name.starts_with('-') {
        return Err(DbgpError::Protocol(format!("Malformed command: {}", line)));
    }

    let mut options = HashMap::new();
    let mut data = None;

    let mut index = rest.find(" -");
    while let Some(start) = index {
        let key_start = start + 1;
        let (key, value, next) = match rest[start + 2..].find(' ') {
            Some(offset) => {
                let space = start + 2 + offset;
                let next = rest[space + 1..].find(" -").map(|p| space + 1 + p);
                let value = &rest[space + 1..next.unwrap_or(rest.len())];
                (&rest[key_start..space], value, next)
            }
            // flag at the very end without a value
            None => (&rest[key_start..], "", None),
        };

        if key == "--" {
            data = Some(value.trim().to_string());
        } else {
            options.insert(key.trim_start_matches('-').to_string(), value.to_string());
        }
        index = next;
    }

    Ok(Command {
        name: name.to_string(),
        options,
        data,
    })
}

pub type CommandHandler = fn(&Session, &Command) -> DbgpResult<()>;

/// Command name to handler table
pub struct CommandTable {
    handlers: HashMap<&'static str, CommandHandler>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        use command_names::*;

        let entries: [(&'static str, CommandHandler); 22] = [
            (FEATURE_GET, execution::feature_get),
            (FEATURE_SET, execution::feature_set),
            (STDIN, execution::stdin),
            (STDOUT, execution::stdout),
            (STDERR, execution::stderr),
            (RUN, execution::run),
            (STOP, execution::stop),
            (BREAK, execution::break_now),
            (STEP_INTO, execution::step_into),
            (STEP_OVER, execution::step_over),
            (STEP_OUT, execution::step_out),
            (BREAKPOINT_GET, breakpoint_commands::breakpoint_get),
            (BREAKPOINT_SET, breakpoint_commands::breakpoint_set),
            (BREAKPOINT_REMOVE, breakpoint_commands::breakpoint_remove),
            (BREAKPOINT_UPDATE, breakpoint_commands::breakpoint_update),
            (STACK_DEPTH, inspection::stack_depth),
            (STACK_GET, inspection::stack_get),
            (CONTEXT_NAMES, inspection::context_names),
            (CONTEXT_GET, inspection::context_get),
            (PROPERTY_GET, inspection::property_get),
            (PROPERTY_SET, inspection::property_set),
            (EVAL, inspection::eval),
        ];

        Self {
            handlers: entries.into_iter().collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Parse and execute one command line. Faults are logged; a failing
    /// handler sends nothing.
    pub fn dispatch(&self, session: &Session, line: &str) {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("Ignoring command {:?}: {}", line, e);
                return;
            }
        };

        let Some(handler) = self.handlers.get(command.name.as_str()) else {
            warn!("{}", DbgpError::UnknownCommand(command.name));
            return;
        };

        debug!(
            "Dispatching {} (transaction {:?})",
            command.name,
            command.transaction_id()
        );
        if let Err(e) = handler(session, &command) {
            error!("Command {} failed: {}", command.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let command = parse_command("breakpoint_set -i 4 -t line -f file:///a.js -n 3").unwrap();

        assert_eq!(command.name, "breakpoint_set");
        assert_eq!(command.transaction_id(), Some("4"));
        assert_eq!(command.option("t"), Some("line"));
        assert_eq!(command.option("f"), Some("file:///a.js"));
        assert_eq!(command.parse_option::<u32>("n").unwrap(), Some(3));
        assert!(command.data.is_none());
    }

    #[test]
    fn test_parse_data_argument() {
        let command = parse_command("eval -i 9 -- MSArIDE=").unwrap();

        assert_eq!(command.data.as_deref(), Some("MSArIDE="));
        assert_eq!(command.decoded_data().unwrap().as_deref(), Some("1 + 1"));
    }

    #[test]
    fn test_values_may_contain_spaces() {
        let command = parse_command("feature_set -i 1 -n max_depth -v 3").unwrap();
        assert_eq!(command.option("v"), Some("3"));

        let command = parse_command("breakpoint_set -i 1 -m my func -t call").unwrap();
        assert_eq!(command.option("m"), Some("my func"));
    }

    #[test]
    fn test_trailing_flag_without_value() {
        let command = parse_command("breakpoint_set -i 1 -r").unwrap();
        assert_eq!(command.option("r"), Some(""));
    }

    #[test]
    fn test_bare_command() {
        let command = parse_command("stop").unwrap();
        assert_eq!(command.name, "stop");
        assert!(command.options.is_empty());
    }

    #[test]
    fn test_malformed_commands() {
        assert!(parse_command("").is_err());
        assert!(parse_command("-i 3").is_err());
    }

    #[test]
    fn test_invalid_option_value() {
        let command = parse_command("stack_get -i 1 -d deep").unwrap();

        assert!(matches!(
            command.parse_option::<usize>("d"),
            Err(DbgpError::InvalidOption { option: "d", .. })
        ));
        assert!(matches!(command.required("c"), Err(DbgpError::MissingOption("c"))));
    }

    #[test]
    fn test_table_registers_every_command() {
        let table = CommandTable::new();

        assert_eq!(table.len(), 22);
        for name in ["run", "step_over", "breakpoint_update", "eval", "stack_get", "stdin"] {
            assert!(table.contains(name), "{}", name);
        }
        assert!(!table.contains("detach"));
    }
}
