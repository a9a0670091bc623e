// Value encoder
//
// Turns live interpreter values into <property> trees. Composite values get a
// short display label and their children, expanded eagerly while the depth
// budget allows and otherwise only counted. A failure while formatting one
// property never aborts the tree: that property is re-emitted as a string
// describing the error.

use std::collections::HashSet;
use std::error::Error as _;

use tracing::warn;

use crate::config::SessionConfig;
use crate::object::{HostError, HostValue, ObjectKind, ObjectRef, PropertyId, Scalar, Wrapped};
use crate::protocol::encode_base64;
use crate::response::Response;

/// Prototype levels walked before a chain is treated as cyclic
pub const MAX_PROTOTYPE_CHAIN: usize = 64;

/// Wire value of the `type` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Object,
    Function,
    Array,
    HostArray,
    HostObject,
    HostClass,
    String,
    Number,
    Boolean,
    Date,
    Undefined,
    Xml,
}

impl TypeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Object => "Object",
            TypeTag::Function => "function",
            TypeTag::Array => "array",
            TypeTag::HostArray => "javaarray",
            TypeTag::HostObject => "javaobject",
            TypeTag::HostClass => "javaclass",
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Boolean => "boolean",
            TypeTag::Date => "date",
            TypeTag::Undefined => "undefined",
            TypeTag::Xml => "XML",
        }
    }

    fn of_scalar(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::String(_) => TypeTag::String,
            Scalar::Number(_) => TypeTag::Number,
            Scalar::Boolean(_) => TypeTag::Boolean,
            Scalar::Date(_) => TypeTag::Date,
            Scalar::Undefined | Scalar::Null => TypeTag::Undefined,
            Scalar::NotFound | Scalar::Other { .. } => TypeTag::Object,
        }
    }
}

/// One serialized value
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyNode {
    pub name: String,
    pub fullname: String,
    pub type_tag: TypeTag,
    pub class_name: String,
    /// Base64 encoded display text, empty for the not-found sentinel
    pub value: String,
    pub has_children: bool,
    pub num_children: usize,
    /// Eagerly expanded children, empty when left lazy
    pub children: Vec<PropertyNode>,
}

impl PropertyNode {
    pub fn to_response(&self) -> Response {
        let mut element = Response::element("property")
            .attr("name", &self.name)
            .attr("fullname", &self.fullname)
            .attr("type", self.type_tag.as_str())
            .attr("classname", &self.class_name)
            .attr("constant", 0)
            .attr("children", u8::from(self.has_children))
            .attr("encoding", "base64")
            .attr("numchildren", self.num_children)
            .raw(&self.value);
        for child in &self.children {
            element = element.child(child.to_response());
        }
        element
    }

    pub fn render(&self) -> String {
        self.to_response().render()
    }

    /// Number of nested levels that were expanded eagerly
    pub fn expanded_depth(&self) -> usize {
        self.children
            .iter()
            .map(|child| child.expanded_depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueEncoder {
    max_depth: usize,
    max_children: usize,
    max_data: usize,
}

impl ValueEncoder {
    pub fn new(max_depth: usize, max_children: usize, max_data: usize) -> Self {
        Self {
            max_depth,
            max_children,
            max_data,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.max_depth, config.max_children, config.max_data)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Encode `value` as a property. Never fails: a value that cannot be
    /// formatted comes back as a string node describing the failure.
    pub fn encode(
        &self,
        name: &str,
        fullname: &str,
        value: &HostValue,
        level: usize,
        add_children: bool,
    ) -> PropertyNode {
        match self.try_encode(name, fullname, value, level, add_children) {
            Ok(node) => node,
            Err(err) => {
                warn!("Failed to encode property {}: {}", fullname, err);
                self.encode_scalar(name, fullname, &Scalar::String(error_text(value, &err)))
            }
        }
    }

    /// Stand-in node for a property whose value could not be read at all
    pub fn encode_read_error(&self, name: &str, fullname: &str, err: &HostError) -> PropertyNode {
        warn!("Failed to read property {}: {}", fullname, err);
        self.encode_scalar(name, fullname, &Scalar::String(read_error_text(err)))
    }

    fn try_encode(
        &self,
        name: &str,
        fullname: &str,
        value: &HostValue,
        level: usize,
        add_children: bool,
    ) -> Result<PropertyNode, HostError> {
        match value {
            HostValue::Scalar(scalar) => Ok(self.encode_scalar(name, fullname, scalar)),
            HostValue::Object(object) => {
                self.encode_object(name, fullname, object, level, add_children)
            }
        }
    }

    fn encode_scalar(&self, name: &str, fullname: &str, scalar: &Scalar) -> PropertyNode {
        let value = match scalar {
            Scalar::NotFound => String::new(),
            other => self.payload(&other.text()),
        };
        PropertyNode {
            name: name.to_string(),
            fullname: fullname.to_string(),
            type_tag: TypeTag::of_scalar(scalar),
            class_name: scalar.class_name().to_string(),
            value,
            has_children: false,
            num_children: 0,
            children: Vec::new(),
        }
    }

    fn encode_object(
        &self,
        name: &str,
        fullname: &str,
        object: &ObjectRef,
        level: usize,
        add_children: bool,
    ) -> Result<PropertyNode, HostError> {
        let (type_tag, label) = label(object)?;

        let mut node = PropertyNode {
            name: name.to_string(),
            fullname: fullname.to_string(),
            type_tag,
            class_name: object.class_name(),
            value: self.payload(&label),
            has_children: true,
            num_children: 0,
            children: Vec::new(),
        };

        if add_children {
            node.children = self.expand(fullname, object, level)?;
            node.num_children = node.children.len();
        } else {
            node.num_children = self.count_children(object)?;
        }
        Ok(node)
    }

    /// Eager enumeration along the prototype chain. Ids are de-duplicated
    /// within this enumeration only, so the most derived definition wins.
    fn expand(
        &self,
        fullname: &str,
        object: &ObjectRef,
        level: usize,
    ) -> Result<Vec<PropertyNode>, HostError> {
        let mut seen = HashSet::new();
        let mut children = Vec::new();
        let child_level = level + 1;
        let eager = child_level < self.max_depth;

        let mut include_functions = true;
        let mut current = Some(object.clone());
        let mut levels = 0;
        while let Some(scope) = current {
            levels += 1;
            if levels > MAX_PROTOTYPE_CHAIN {
                warn!("Prototype chain of {} exceeds {} levels", fullname, MAX_PROTOTYPE_CHAIN);
                break;
            }
            for id in eager_ids(&scope)? {
                if children.len() >= self.max_children {
                    return Ok(children);
                }
                if !seen.insert(id.clone()) {
                    continue;
                }
                let value = child_value(&scope, &id);
                if !is_listed(&value, include_functions) || scope.is_hidden(&id) {
                    continue;
                }
                let path = id.child_path(fullname);
                children.push(self.encode(&id.to_string(), &path, &value, child_level, eager));
            }
            include_functions = false;
            current = scope.prototype();
        }
        Ok(children)
    }

    /// Lazy variant: only realised ids are looked at and nothing is encoded
    fn count_children(&self, object: &ObjectRef) -> Result<usize, HostError> {
        let mut seen = HashSet::new();
        let mut count = 0;

        let mut include_functions = true;
        let mut current = Some(object.clone());
        let mut levels = 0;
        while let Some(scope) = current {
            levels += 1;
            if levels > MAX_PROTOTYPE_CHAIN {
                break;
            }
            let ids = match scope.initialized_ids() {
                Some(ids) => ids?,
                None => scope.ids()?,
            };
            for id in ids {
                if count >= self.max_children {
                    return Ok(count);
                }
                if !seen.insert(id.clone()) {
                    continue;
                }
                if is_listed(&child_value(&scope, &id), include_functions) {
                    count += 1;
                }
            }
            include_functions = false;
            current = scope.prototype();
        }
        Ok(count)
    }

    fn payload(&self, text: &str) -> String {
        if self.max_data > 0 && text.chars().count() > self.max_data {
            let truncated: String = text.chars().take(self.max_data).collect();
            encode_base64(&truncated)
        } else {
            encode_base64(text)
        }
    }
}

/// Type tag and display label of a composite value
fn label(object: &ObjectRef) -> Result<(TypeTag, String), HostError> {
    let class_name = object.class_name();
    Ok(match object.kind() {
        ObjectKind::Object => (TypeTag::Object, class_name),
        ObjectKind::Function => (TypeTag::Function, class_name),
        ObjectKind::Array => (TypeTag::Array, class_name),
        ObjectKind::Xml => (TypeTag::Xml, object.display_string()?),
        ObjectKind::HostInstance => (TypeTag::HostObject, object.display_string()?),
        ObjectKind::HostString(text) => (TypeTag::HostObject, format!("JavaString \"{}\"", text)),
        ObjectKind::HostArray => (TypeTag::HostArray, "Array".to_string()),
        ObjectKind::HostClass(name) => (TypeTag::HostClass, name),
        ObjectKind::Wrapper(Wrapped::Null) => (TypeTag::Undefined, "Undefined".to_string()),
        ObjectKind::Wrapper(Wrapped::Array) => (TypeTag::Object, class_name),
        ObjectKind::Wrapper(Wrapped::Value(scalar)) => (TypeTag::of_scalar(&scalar), scalar.text()),
    })
}

fn eager_ids(scope: &ObjectRef) -> Result<Vec<PropertyId>, HostError> {
    if let Some(ids) = scope.initialized_ids() {
        return ids;
    }
    match scope.kind() {
        ObjectKind::Object | ObjectKind::Function => scope.all_ids(),
        _ => scope.ids(),
    }
}

fn child_value(scope: &ObjectRef, id: &PropertyId) -> HostValue {
    match scope.get(id) {
        Ok(value) => value,
        Err(err) => {
            warn!("Failed to read property {} of {}: {}", id, scope.class_name(), err);
            HostValue::Scalar(Scalar::Null)
        }
    }
}

/// Host-internal callables never show up; plain functions only on the
/// object's own level
fn is_listed(value: &HostValue, include_functions: bool) -> bool {
    match value {
        HostValue::Object(object) => {
            !object.is_internal() && (include_functions || object.kind() != ObjectKind::Function)
        }
        HostValue::Scalar(_) => true,
    }
}

fn error_text(value: &HostValue, err: &HostError) -> String {
    let (class_name, display) = match value {
        HostValue::Object(object) => {
            let class_name = object.class_name();
            let display = object
                .display_string()
                .unwrap_or_else(|_| format!("[object {}]", class_name));
            (class_name, display)
        }
        HostValue::Scalar(scalar) => (scalar.class_name().to_string(), scalar.text()),
    };

    format!(
        "<error printing evaluated value in debugger:\nvalue class: {}\nvalue.toString() is: {}\n\nException: {}: {}\n{}>",
        class_name,
        display,
        err.class_name(),
        err.message(),
        cause_chain(err)
    )
}

fn read_error_text(err: &HostError) -> String {
    format!(
        "<error reading property in debugger:\nException: {}: {}\n{}>",
        err.class_name(),
        err.message(),
        cause_chain(err)
    )
}

fn cause_chain(err: &HostError) -> String {
    let mut chain = String::new();
    let mut cause: Option<&dyn std::error::Error> = Some(err);
    while let Some(current) = cause {
        chain.push_str(&current.to_string());
        chain.push('\n');
        cause = current.source();
    }
    chain
}
