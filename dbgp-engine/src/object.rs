// Host object capabilities
//
// The engine never owns interpreter values. The embedding runtime exposes its
// objects through the HostObject trait (enumerate / get / set / prototype) and
// its evaluator through ScriptHost; everything the engine displays or mutates
// goes through these two seams.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::stackframe::StackFrame;

pub type ObjectRef = Arc<dyn HostObject>;

/// Failure raised by the host while reading, writing or evaluating
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HostError {
    class_name: String,
    message: String,
    #[source]
    cause: Option<Box<HostError>>,
}

impl HostError {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: HostError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Class (or kind) of the error as named by the host
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Property key: a named member or an array index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyId {
    Name(String),
    Index(u32),
}

impl PropertyId {
    /// Path of this property below `parent` (`parent.name` or `parent[3]`)
    pub fn child_path(&self, parent: &str) -> String {
        match self {
            PropertyId::Name(name) => format!("{}.{}", parent, name),
            PropertyId::Index(index) => format!("{}[{}]", parent, index),
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyId::Name(name) => f.write_str(name),
            PropertyId::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for PropertyId {
    fn from(name: &str) -> Self {
        PropertyId::Name(name.to_string())
    }
}

impl From<u32> for PropertyId {
    fn from(index: u32) -> Self {
        PropertyId::Index(index)
    }
}

/// Non-composite interpreter values
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Lookup miss sentinel, encoded as an empty payload
    NotFound,
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    /// Date value with its display text
    Date(String),
    /// Any other primitive the host wants to show as text
    Other { class_name: String, text: String },
}

impl Scalar {
    pub fn class_name(&self) -> &str {
        match self {
            Scalar::NotFound | Scalar::Null => "",
            Scalar::Undefined => "Undefined",
            Scalar::Boolean(_) => "Boolean",
            Scalar::Number(_) => "Number",
            Scalar::String(_) => "String",
            Scalar::Date(_) => "Date",
            Scalar::Other { class_name, .. } => class_name,
        }
    }

    pub fn text(&self) -> String {
        match self {
            Scalar::NotFound => String::new(),
            Scalar::Undefined => "Undefined".to_string(),
            Scalar::Null => "null".to_string(),
            Scalar::Boolean(value) => value.to_string(),
            Scalar::Number(value) => format_number(*value),
            Scalar::String(value) | Scalar::Date(value) => value.clone(),
            Scalar::Other { text, .. } => text.clone(),
        }
    }
}

/// Script-style number text: integral values print without a fraction
fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{:.0}", value)
    } else {
        value.to_string()
    }
}

/// A live interpreter value: either a composite reference or a scalar
#[derive(Clone)]
pub enum HostValue {
    Object(ObjectRef),
    Scalar(Scalar),
}

impl HostValue {
    pub fn undefined() -> Self {
        HostValue::Scalar(Scalar::Undefined)
    }

    pub fn string(value: impl Into<String>) -> Self {
        HostValue::Scalar(Scalar::String(value.into()))
    }

    pub fn number(value: f64) -> Self {
        HostValue::Scalar(Scalar::Number(value))
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            HostValue::Object(object) => Some(object),
            HostValue::Scalar(_) => None,
        }
    }

    /// Script truthiness, used for breakpoint guard expressions
    pub fn is_truthy(&self) -> bool {
        match self {
            HostValue::Object(_) => true,
            HostValue::Scalar(scalar) => match scalar {
                Scalar::NotFound | Scalar::Undefined | Scalar::Null => false,
                Scalar::Boolean(value) => *value,
                Scalar::Number(value) => *value != 0.0 && !value.is_nan(),
                Scalar::String(value) => !value.is_empty(),
                Scalar::Date(_) | Scalar::Other { .. } => true,
            },
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Object(object) => write!(f, "Object({})", object.class_name()),
            HostValue::Scalar(scalar) => write!(f, "{:?}", scalar),
        }
    }
}

impl From<Scalar> for HostValue {
    fn from(scalar: Scalar) -> Self {
        HostValue::Scalar(scalar)
    }
}

/// What a host-language wrapper holds
#[derive(Debug, Clone, PartialEq)]
pub enum Wrapped {
    Null,
    Array,
    Value(Scalar),
}

/// Display category of a composite value
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    Object,
    Function,
    /// Script-native array
    Array,
    Xml,
    /// Host-language object instance, labelled by its display string
    HostInstance,
    /// Host-language string wrapped as an object
    HostString(String),
    /// Host-language array
    HostArray,
    /// Host-language class, labelled by its qualified name
    HostClass(String),
    /// Generic wrapper around a non-scriptable value
    Wrapper(Wrapped),
}

/// Capability set the engine needs from an interpreter object
pub trait HostObject: fmt::Debug + Send + Sync {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Object
    }

    fn class_name(&self) -> String;

    /// Enumerable property ids
    fn ids(&self) -> Result<Vec<PropertyId>, HostError>;

    /// All own property ids, including non-enumerable ones
    fn all_ids(&self) -> Result<Vec<PropertyId>, HostError> {
        self.ids()
    }

    /// For lazily initialised scopes: only the ids realised so far.
    /// `None` means the object is not lazy.
    fn initialized_ids(&self) -> Option<Result<Vec<PropertyId>, HostError>> {
        None
    }

    fn get(&self, id: &PropertyId) -> Result<HostValue, HostError>;

    fn set(&self, id: &PropertyId, value: HostValue) -> Result<(), HostError>;

    /// Next level of the prototype / supertype chain
    fn prototype(&self) -> Option<ObjectRef> {
        None
    }

    fn display_string(&self) -> Result<String, HostError>;

    /// Host-internal callables (native method objects) are never listed as children
    fn is_internal(&self) -> bool {
        false
    }

    /// Members the host wants hidden from eager listings (deprecated members)
    fn is_hidden(&self, _id: &PropertyId) -> bool {
        false
    }
}

/// Evaluation capability of the interpreter being debugged
pub trait ScriptHost: Send + Sync {
    /// Evaluate an expression in the scope of `frame` (global scope when `None`)
    fn evaluate(&self, expression: &str, frame: Option<&StackFrame>) -> Result<HostValue, HostError>;

    /// Top-level scope shown as the Globals context
    fn global_scope(&self) -> Option<ObjectRef> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(Scalar::Number(3.0).text(), "3");
        assert_eq!(Scalar::Number(-2.5).text(), "-2.5");
        assert_eq!(Scalar::Number(f64::NAN).text(), "NaN");
        assert_eq!(Scalar::Number(f64::NEG_INFINITY).text(), "-Infinity");
    }

    #[test]
    fn test_truthiness() {
        assert!(!HostValue::undefined().is_truthy());
        assert!(!HostValue::number(0.0).is_truthy());
        assert!(HostValue::number(2.0).is_truthy());
        assert!(!HostValue::string("").is_truthy());
        assert!(HostValue::Scalar(Scalar::Boolean(true)).is_truthy());
    }

    #[test]
    fn test_child_paths() {
        assert_eq!(PropertyId::from("x").child_path("obj"), "obj.x");
        assert_eq!(PropertyId::from(2).child_path("arr"), "arr[2]");
    }

    #[test]
    fn test_error_chain() {
        let err = HostError::new("TypeError", "outer")
            .with_cause(HostError::new("RangeError", "inner"));

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "inner");
        assert_eq!(err.class_name(), "TypeError");
    }
}
