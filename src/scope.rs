use std::collections::HashMap;
use tree_sitter::Node;

/// Immutable lookup structure over one parsed Java file. Built once per
/// analysis pass and shared by every chain analyzed in that file; it never
/// mutates afterwards, so analyses of separate chains stay independent.
pub struct Scope<'a> {
    source: &'a str,
    /// `final` fields with an initializer, keyed by simple name.
    constants: HashMap<String, Node<'a>>,
    /// Enum type name -> declared member names, in declaration order.
    enums: HashMap<String, Vec<String>>,
    /// Entity class name -> collection name from a `@Document("...")` annotation.
    documents: HashMap<String, String>,
}

/// Classification of a node as seen from the resolver. Mirrors the input
/// boundary contract: literal, parameter reference, mutable local reference,
/// or other call expression; the remaining variants carry the lookup result
/// when the reference is statically bound.
#[derive(Debug, Clone)]
pub enum NodeClass<'a> {
    Literal,
    ParameterReference,
    MutableLocalReference,
    /// Local with an initializer that is never reassigned in the enclosing
    /// method; carries the initializer expression.
    LocalBinding(Node<'a>),
    /// `final` field with an initializer; carries the initializer expression.
    ConstantField(Node<'a>),
    EnumConstant { type_name: String, member: String },
    OtherCall,
    Unsupported,
}

impl<'a> Scope<'a> {
    pub fn build(root: Node<'a>, source: &'a str) -> Self {
        let mut scope = Scope {
            source,
            constants: HashMap::new(),
            enums: HashMap::new(),
            documents: HashMap::new(),
        };
        scope.collect(root);
        scope
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn constant_initializer(&self, name: &str) -> Option<Node<'a>> {
        self.constants.get(name).copied()
    }

    pub fn enum_members(&self, type_name: &str) -> Option<&[String]> {
        self.enums.get(type_name).map(|members| members.as_slice())
    }

    pub fn is_enum_type(&self, name: &str) -> bool {
        self.enums.contains_key(name)
    }

    /// Collection name declared by a `@Document` annotation on the given
    /// entity class, when present in this file.
    pub fn document_collection(&self, class_name: &str) -> Option<&str> {
        self.documents.get(class_name).map(String::as_str)
    }

    fn collect(&mut self, node: Node<'a>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "field_declaration" => self.collect_field(child),
                "enum_declaration" => self.collect_enum(child),
                "class_declaration" => {
                    self.collect_document_annotation(child);
                    self.collect(child);
                }
                _ => self.collect(child),
            }
        }
    }

    fn collect_field(&mut self, node: Node<'a>) {
        if !has_modifier(node, "final", self.source) {
            return;
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != "variable_declarator" {
                continue;
            }
            let Some(name) = child.child_by_field_name("name") else {
                continue;
            };
            let Some(value) = child.child_by_field_name("value") else {
                continue;
            };
            self.constants
                .insert(node_text(name, self.source), value);
        }
    }

    fn collect_enum(&mut self, node: Node<'a>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut members = Vec::new();
        let mut cursor = body.walk();
        for constant in body.named_children(&mut cursor) {
            if constant.kind() == "enum_constant" {
                if let Some(member_name) = constant.child_by_field_name("name") {
                    members.push(node_text(member_name, self.source));
                }
            }
        }
        self.enums.insert(node_text(name, self.source), members);
    }

    fn collect_document_annotation(&mut self, class: Node<'a>) {
        let Some(class_name) = class.child_by_field_name("name") else {
            return;
        };
        let mut cursor = class.walk();
        for child in class.named_children(&mut cursor) {
            if child.kind() != "modifiers" {
                continue;
            }
            let mut modifier_cursor = child.walk();
            for modifier in child.named_children(&mut modifier_cursor) {
                if modifier.kind() != "annotation" {
                    continue;
                }
                let is_document = modifier
                    .child_by_field_name("name")
                    .map(|name| node_text(name, self.source) == "Document")
                    .unwrap_or(false);
                if !is_document {
                    continue;
                }
                let Some(arguments) = modifier.child_by_field_name("arguments") else {
                    continue;
                };
                let collection = first_annotation_string(arguments, self.source);
                if let Some(collection) = collection {
                    self.documents
                        .insert(node_text(class_name, self.source), collection);
                }
            }
        }
    }

    /// Classifies a node without executing anything: literals pass through,
    /// identifier references are looked up against the enclosing method and
    /// the collected constants, calls classify as `OtherCall`.
    pub fn classify(&self, node: Node<'a>) -> NodeClass<'a> {
        match node.kind() {
            "string_literal"
            | "decimal_integer_literal"
            | "hex_integer_literal"
            | "octal_integer_literal"
            | "binary_integer_literal"
            | "decimal_floating_point_literal"
            | "character_literal"
            | "true"
            | "false"
            | "null_literal" => NodeClass::Literal,
            "identifier" => self.classify_identifier(node),
            "field_access" => self.classify_field_access(node),
            "method_invocation" | "object_creation_expression" => NodeClass::OtherCall,
            "parenthesized_expression" => match unwrap_parens(node) {
                Some(inner) => self.classify(inner),
                None => NodeClass::Unsupported,
            },
            "unary_expression" => NodeClass::Literal,
            _ => NodeClass::Unsupported,
        }
    }

    fn classify_identifier(&self, node: Node<'a>) -> NodeClass<'a> {
        let name = node_text(node, self.source);

        if let Some(method) = enclosing_method(node) {
            if is_parameter_of(method, &name, self.source) {
                return NodeClass::ParameterReference;
            }
            if let Some(binding) = find_local_binding(method, node, &name, self.source) {
                return if is_reassigned_in(method, &name, self.source) {
                    NodeClass::MutableLocalReference
                } else {
                    NodeClass::LocalBinding(binding)
                };
            }
        }

        if let Some(initializer) = self.constant_initializer(&name) {
            return NodeClass::ConstantField(initializer);
        }

        NodeClass::Unsupported
    }

    fn classify_field_access(&self, node: Node<'a>) -> NodeClass<'a> {
        let Some(object) = node.child_by_field_name("object") else {
            return NodeClass::Unsupported;
        };
        let Some(field) = node.child_by_field_name("field") else {
            return NodeClass::Unsupported;
        };
        if object.kind() != "identifier" {
            return NodeClass::Unsupported;
        }
        let type_name = node_text(object, self.source);
        let member = node_text(field, self.source);
        if let Some(members) = self.enum_members(&type_name) {
            if members.iter().any(|candidate| candidate == &member) {
                return NodeClass::EnumConstant { type_name, member };
            }
        }
        // Qualified constant like Limits.MAX_REVIEWS.
        if let Some(initializer) = self.constant_initializer(&member) {
            return NodeClass::ConstantField(initializer);
        }
        NodeClass::Unsupported
    }
}

pub fn enclosing_method<'a>(node: Node<'a>) -> Option<Node<'a>> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if parent.kind() == "method_declaration" || parent.kind() == "constructor_declaration" {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

fn is_parameter_of(method: Node<'_>, name: &str, source: &str) -> bool {
    let Some(parameters) = method.child_by_field_name("parameters") else {
        return false;
    };
    let mut cursor = parameters.walk();
    for parameter in parameters.named_children(&mut cursor) {
        if parameter.kind() != "formal_parameter" && parameter.kind() != "spread_parameter" {
            continue;
        }
        if let Some(parameter_name) = parameter.child_by_field_name("name") {
            if node_text(parameter_name, source) == name {
                return true;
            }
        }
    }
    false
}

/// Finds a local declaration of `name` that appears before `reference` in the
/// method body and returns its initializer, if any.
fn find_local_binding<'a>(
    method: Node<'a>,
    reference: Node<'a>,
    name: &str,
    source: &str,
) -> Option<Node<'a>> {
    let body = method.child_by_field_name("body")?;
    let mut found = None;
    walk_declarations(body, &mut |declarator| {
        let Some(declarator_name) = declarator.child_by_field_name("name") else {
            return;
        };
        if node_text(declarator_name, source) != name {
            return;
        }
        if declarator.start_byte() >= reference.start_byte() {
            return;
        }
        found = declarator.child_by_field_name("value");
    });
    found
}

fn walk_declarations<'a>(node: Node<'a>, visit: &mut impl FnMut(Node<'a>)) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "local_variable_declaration" {
            let mut declarator_cursor = child.walk();
            for declarator in child.named_children(&mut declarator_cursor) {
                if declarator.kind() == "variable_declarator" {
                    visit(declarator);
                }
            }
        }
        walk_declarations(child, visit);
    }
}

fn is_reassigned_in(method: Node<'_>, name: &str, source: &str) -> bool {
    let Some(body) = method.child_by_field_name("body") else {
        return false;
    };
    let mut reassigned = false;
    walk_assignments(body, &mut |target| {
        if node_text(target, source) == name {
            reassigned = true;
        }
    });
    reassigned
}

fn walk_assignments<'a>(node: Node<'a>, visit: &mut impl FnMut(Node<'a>)) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "assignment_expression" => {
                if let Some(left) = child.child_by_field_name("left") {
                    if left.kind() == "identifier" {
                        visit(left);
                    }
                }
            }
            "update_expression" => {
                if let Some(operand) = child.named_child(0) {
                    if operand.kind() == "identifier" {
                        visit(operand);
                    }
                }
            }
            _ => {}
        }
        walk_assignments(child, visit);
    }
}

fn has_modifier(declaration: Node<'_>, modifier: &str, source: &str) -> bool {
    let mut cursor = declaration.walk();
    for child in declaration.named_children(&mut cursor) {
        if child.kind() == "modifiers" {
            return node_text(child, source)
                .split_whitespace()
                .any(|word| word == modifier);
        }
    }
    false
}

pub fn unwrap_parens(node: Node<'_>) -> Option<Node<'_>> {
    let mut inner = node;
    while inner.kind() == "parenthesized_expression" {
        inner = inner.named_child(0)?;
    }
    Some(inner)
}

/// Pulls the collection name out of `@Document("name")` or
/// `@Document(collection = "name")`.
fn first_annotation_string(arguments: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = arguments.walk();
    for argument in arguments.named_children(&mut cursor) {
        match argument.kind() {
            "string_literal" => {
                return Some(node_text(argument, source).trim_matches('"').to_string());
            }
            "element_value_pair" => {
                if let Some(value) = argument.child_by_field_name("value") {
                    if value.kind() == "string_literal" {
                        return Some(node_text(value, source).trim_matches('"').to_string());
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn node_text(node: Node<'_>, source: &str) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
        .to_string()
}
