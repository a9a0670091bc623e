// Asynchronous notices
//
// Messages the engine sends without a matching command: run/step completions
// (break, stopped, running) and redirected debuggee output.

use crate::response::Response;
use crate::types::{RunStatus, StreamKind};

/// `<response command="run" status=... reason="ok" transaction_id=...>`
/// closing an outstanding run or step transaction
pub fn run_status(status: RunStatus, transaction_id: &str, message: Option<&str>) -> Response {
    let response = Response::new("run", Some(transaction_id))
        .attr("status", status.as_str())
        .attr("reason", "ok");
    match message {
        Some(message) => response.base64(message),
        None => response,
    }
}

/// `<stream type="stdout|stderr">` carrying base64 output
pub fn stream(kind: StreamKind, text: &str) -> Response {
    Response::element("stream")
        .attr("type", kind.as_str())
        .base64(text)
}
