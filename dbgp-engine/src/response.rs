// Outbound xml message builder
//
// Every message the engine sends is a single xml element, usually a
// <response command="..." transaction_id="..."> carrying attributes, an
// optional base64 text payload and nested child elements.

use std::fmt::Write as _;

use crate::protocol::{encode_base64, escape_xml};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    tag: &'static str,
    attributes: Vec<(&'static str, String)>,
    content: String,
}

impl Response {
    /// Create a `<response>` for the given command, tagged with its transaction id
    pub fn new(command: &str, transaction_id: Option<&str>) -> Self {
        let mut response = Self::element("response").attr("command", command);
        if let Some(id) = transaction_id {
            response = response.attr("transaction_id", id);
        }
        response
    }

    /// Create a DBGP error response
    pub fn error(command: &str, transaction_id: Option<&str>, code: u32, message: &str) -> Self {
        let error = Self::element("error")
            .attr("code", code)
            .child(Self::element("message").text(message));
        Self::new(command, transaction_id).child(error)
    }

    /// Create an arbitrary element
    pub fn element(tag: &'static str) -> Self {
        Self {
            tag,
            attributes: Vec::new(),
            content: String::new(),
        }
    }

    pub fn attr(mut self, name: &'static str, value: impl ToString) -> Self {
        self.attributes.push((name, value.to_string()));
        self
    }

    /// Append escaped text content
    pub fn text(mut self, text: &str) -> Self {
        self.content.push_str(&escape_xml(text));
        self
    }

    /// Append a base64 encoded payload
    pub fn base64(mut self, text: &str) -> Self {
        self.content.push_str(&encode_base64(text));
        self
    }

    pub fn child(mut self, child: Response) -> Self {
        self.content.push_str(&child.render());
        self
    }

    /// Append already rendered xml (property trees)
    pub fn raw(mut self, xml: &str) -> Self {
        self.content.push_str(xml);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(64 + self.content.len());
        out.push('<');
        out.push_str(self.tag);
        for (name, value) in &self.attributes {
            let _ = write!(out, " {}=\"{}\"", name, escape_xml(value));
        }
        if self.content.is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            out.push_str(&self.content);
            let _ = write!(out, "</{}>", self.tag);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_response_with_transaction() {
        let xml = Response::new("breakpoint_set", Some("tx1"))
            .attr("id", "p1")
            .attr("state", "enabled")
            .render();

        assert_eq!(
            xml,
            r#"<response command="breakpoint_set" transaction_id="tx1" id="p1" state="enabled"/>"#
        );
    }

    #[test]
    fn test_render_escapes_attributes() {
        let xml = Response::element("stack")
            .attr("where", "a<b>")
            .render();

        assert_eq!(xml, r#"<stack where="a&lt;b&gt;"/>"#);
    }

    #[test]
    fn test_error_response() {
        let xml = Response::error("breakpoint_get", Some("7"), 205, "no such breakpoint").render();

        assert!(xml.starts_with(r#"<response command="breakpoint_get" transaction_id="7">"#));
        assert!(xml.contains(r#"<error code="205"><message>no such breakpoint</message></error>"#));
    }
}
