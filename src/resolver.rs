use crate::scope::{NodeClass, Scope, unwrap_parens};
use crate::shape::{UnresolvedReason, Value};
use tree_sitter::Node;

/// Resolves an expression node to a typed [`Value`] using only the immutable
/// scope snapshot. Never executes code, never folds arithmetic and never
/// follows control flow: anything outside literals, `final` constants with
/// literal initializers, stable locals and enum members becomes
/// `Value::Unresolved` with the reason attached.
pub fn resolve<'a>(node: Node<'a>, scope: &Scope<'a>) -> Value {
    let Some(node) = unwrap_parens(node) else {
        return Value::Unresolved(UnresolvedReason::Unsupported);
    };
    let source = scope.source();

    match node.kind() {
        "string_literal" => Value::String(string_content(node, source)),
        "character_literal" => Value::String(node_text(node, source).trim_matches('\'').to_string()),
        "decimal_integer_literal" | "hex_integer_literal" | "octal_integer_literal"
        | "binary_integer_literal" => parse_integer(&node_text(node, source)),
        "decimal_floating_point_literal" => parse_double(&node_text(node, source)),
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        "null_literal" => Value::Null,
        "unary_expression" => resolve_unary(node, scope),
        "object_creation_expression" => resolve_object_creation(node, scope),
        "method_invocation" => resolve_method_invocation(node, scope),
        "identifier" | "field_access" => match scope.classify(node) {
            NodeClass::Literal => Value::Unresolved(UnresolvedReason::Unsupported),
            NodeClass::ParameterReference => Value::Unresolved(UnresolvedReason::Parameter),
            NodeClass::MutableLocalReference => Value::Unresolved(UnresolvedReason::MutableLocal),
            NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) => {
                resolve(initializer, scope)
            }
            NodeClass::EnumConstant { type_name, member } => Value::Enum { type_name, member },
            NodeClass::OtherCall => Value::Unresolved(UnresolvedReason::MethodCall),
            NodeClass::Unsupported => Value::Unresolved(UnresolvedReason::Unsupported),
        },
        _ => Value::Unresolved(UnresolvedReason::Unsupported),
    }
}

/// Resolves a node expected to name a field. Returns the resolved string, or
/// `None` when the field name itself is not statically determinable.
pub fn resolve_as_string<'a>(node: Node<'a>, scope: &Scope<'a>) -> Option<String> {
    match resolve(node, scope) {
        Value::String(text) => Some(text),
        _ => None,
    }
}

fn resolve_unary<'a>(node: Node<'a>, scope: &Scope<'a>) -> Value {
    let source = scope.source();
    let text = node_text(node, source);
    let Some(operand) = node.child_by_field_name("operand") else {
        return Value::Unresolved(UnresolvedReason::Unsupported);
    };
    if !text.starts_with('-') {
        return Value::Unresolved(UnresolvedReason::Unsupported);
    }
    match resolve(operand, scope) {
        Value::Int(value) => Value::Int(-value),
        Value::Double(value) => Value::Double(-value),
        _ => Value::Unresolved(UnresolvedReason::Unsupported),
    }
}

fn resolve_object_creation<'a>(node: Node<'a>, scope: &Scope<'a>) -> Value {
    let source = scope.source();
    let type_name = node
        .child_by_field_name("type")
        .map(|type_node| node_text(type_node, source))
        .unwrap_or_default();
    let simple = type_name.rsplit('.').next().unwrap_or(&type_name);

    match simple {
        "Date" => Value::Date,
        "ObjectId" => Value::Identifier(first_string_argument(node, source)),
        "UUID" => Value::Identifier(first_string_argument(node, source)),
        _ => Value::Unresolved(UnresolvedReason::MethodCall),
    }
}

/// A handful of well-known factory calls produce values with a known type
/// even though they run at runtime; everything else is an opaque call.
fn resolve_method_invocation<'a>(node: Node<'a>, scope: &Scope<'a>) -> Value {
    let source = scope.source();
    let receiver = node
        .child_by_field_name("object")
        .map(|object| node_text(object, source))
        .unwrap_or_default();
    let method = node
        .child_by_field_name("name")
        .map(|name| node_text(name, source))
        .unwrap_or_default();

    match (receiver.as_str(), method.as_str()) {
        ("Instant" | "LocalDate" | "LocalDateTime", "now") => Value::Date,
        ("UUID", "randomUUID") => Value::Identifier(None),
        ("UUID", "fromString") => Value::Identifier(first_string_argument(node, source)),
        ("List" | "Arrays" | "Set", "of" | "asList") => {
            let Some(arguments) = node.child_by_field_name("arguments") else {
                return Value::List(Vec::new());
            };
            let mut elements = Vec::new();
            let mut cursor = arguments.walk();
            for argument in arguments.named_children(&mut cursor) {
                elements.push(resolve(argument, scope));
            }
            Value::List(elements)
        }
        _ => Value::Unresolved(UnresolvedReason::MethodCall),
    }
}

fn first_string_argument(node: Node<'_>, source: &str) -> Option<String> {
    let arguments = node.child_by_field_name("arguments")?;
    let first = arguments.named_child(0)?;
    if first.kind() == "string_literal" {
        Some(string_content(first, source))
    } else {
        None
    }
}

fn parse_integer(text: &str) -> Value {
    let cleaned = text
        .trim_end_matches(['l', 'L'])
        .replace('_', "");
    let parsed = if let Some(hex) = cleaned.strip_prefix("0x").or(cleaned.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if let Some(bin) = cleaned.strip_prefix("0b").or(cleaned.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2)
    } else {
        cleaned.parse()
    };
    match parsed {
        Ok(value) => Value::Int(value),
        Err(_) => Value::Unresolved(UnresolvedReason::Unsupported),
    }
}

fn parse_double(text: &str) -> Value {
    let cleaned = text
        .trim_end_matches(['d', 'D', 'f', 'F'])
        .replace('_', "");
    match cleaned.parse() {
        Ok(value) => Value::Double(value),
        Err(_) => Value::Unresolved(UnresolvedReason::Unsupported),
    }
}

/// Text of a string literal without the surrounding quotes.
fn string_content(node: Node<'_>, source: &str) -> String {
    let mut content = String::new();
    let mut cursor = node.walk();
    let mut saw_fragment = false;
    for child in node.named_children(&mut cursor) {
        if child.kind() == "string_fragment" || child.kind() == "escape_sequence" {
            saw_fragment = true;
            content.push_str(&node_text(child, source));
        }
    }
    if saw_fragment {
        content
    } else {
        node_text(node, source).trim_matches('"').to_string()
    }
}

fn node_text(node: Node<'_>, source: &str) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
        .to_string()
}
