use crate::scope::{NodeClass, Scope};
use crate::shape::{
    AccumulatorFn, CompareOp, Namespace, OperationKind, SortDirection, UnresolvedReason, UpdateOp,
    Value,
};
use tree_sitter::Node;

pub mod criteria;
pub mod driver;

/// Which builder vocabulary a chain was recognized under. Everything past the
/// matcher boundary is dialect-agnostic; this tag only drives per-dialect
/// canonicalization policy (sort replace-vs-append).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Driver,
    Criteria,
}

/// Field position inside an operation: either resolved to a concrete path or
/// carrying the reason it could not be.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRef {
    Known(String),
    Unresolved(UnresolvedReason),
}

/// Operation identity inside the intermediate tree. One tagged union for both
/// dialects so the canonicalizer never special-cases a dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum OpName {
    Compare(CompareOp),
    And,
    Or,
    Nor,
    Not,
    Update(UpdateOp),
    /// `Updates.combine(...)`: carries only children, folded flat in order.
    Combine,
    Stage(StageOp),
    SortKey(SortDirection),
    Include,
    Exclude,
    Accumulate(AccumulatorFn),
    AddedField,
    /// Recognized chain, unrecognized method: matching continued past it.
    Unknown(String),
    /// Known method called with an argument shape outside its known variants:
    /// matching halted here and the remainder is covered by this node.
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOp {
    Match,
    Group,
    Project,
    Sort,
    Unwind,
    Limit,
    Skip,
    Count,
    AddFields,
}

/// One node of the intermediate operation tree emitted by a matcher. Each
/// node exclusively owns its children; nesting mirrors the nested builder
/// arguments in source.
#[derive(Debug, Clone, PartialEq)]
pub struct OpNode {
    pub op: OpName,
    pub field: Option<FieldRef>,
    pub value: Option<Value>,
    pub children: Vec<OpNode>,
    pub line: usize,
}

impl OpNode {
    pub fn new(op: OpName, line: usize) -> Self {
        OpNode {
            op,
            field: None,
            value: None,
            children: Vec::new(),
            line,
        }
    }

    pub fn with_field(mut self, field: FieldRef) -> Self {
        self.field = Some(field);
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_children(mut self, children: Vec<OpNode>) -> Self {
        self.children = children;
        self
    }
}

/// Everything a matcher extracted from one recognized call chain, still in
/// written order and still carrying unresolved markers. Input to the
/// canonicalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainMatch {
    pub dialect: Dialect,
    pub operation: OperationKind,
    pub namespace: Namespace,
    pub filters: Vec<OpNode>,
    pub updates: Vec<OpNode>,
    pub stages: Vec<OpNode>,
    /// One inner vector per sort call site; the per-dialect policy decides
    /// whether sites replace or append.
    pub sorts: Vec<Vec<OpNode>>,
    pub projections: Vec<OpNode>,
    /// Unrecognized chain modifiers with no position inside the shape.
    pub unknowns: Vec<OpNode>,
}

impl ChainMatch {
    pub fn new(dialect: Dialect, operation: OperationKind, namespace: Namespace) -> Self {
        ChainMatch {
            dialect,
            operation,
            namespace,
            filters: Vec::new(),
            updates: Vec::new(),
            stages: Vec::new(),
            sorts: Vec::new(),
            projections: Vec::new(),
            unknowns: Vec::new(),
        }
    }
}

/// One `.name(args)` link of a call chain.
#[derive(Debug, Clone)]
pub struct CallSegment<'a> {
    pub name: String,
    pub node: Node<'a>,
    pub args: Vec<Node<'a>>,
}

impl<'a> CallSegment<'a> {
    pub fn line(&self) -> usize {
        self.node.start_position().row + 1
    }
}

/// Decomposes a method-invocation chain `base.a(x).b(y)` into its base
/// expression (the innermost non-call receiver, if any) and the segments in
/// source order. A static call like `Filters.eq(...)` yields the `Filters`
/// identifier as base and one segment.
pub fn decompose_chain<'a>(
    node: Node<'a>,
    source: &str,
) -> (Option<Node<'a>>, Vec<CallSegment<'a>>) {
    let mut segments = Vec::new();
    let mut current = Some(node);
    let mut base = None;

    while let Some(call) = current {
        if call.kind() != "method_invocation" {
            base = Some(call);
            break;
        }
        let name = call
            .child_by_field_name("name")
            .map(|name| node_text(name, source))
            .unwrap_or_default();
        let args = call
            .child_by_field_name("arguments")
            .map(|arguments| {
                let mut cursor = arguments.walk();
                arguments.named_children(&mut cursor).collect()
            })
            .unwrap_or_default();
        segments.push(CallSegment {
            name,
            node: call,
            args,
        });
        current = call.child_by_field_name("object");
    }

    segments.reverse();
    (base, segments)
}

/// Name of the identifier at the base of a chain, e.g. `Filters` for
/// `Filters.eq(...)` or `collection` for `collection.find(...)`.
pub fn chain_base_name(node: Node<'_>, source: &str) -> Option<String> {
    let (base, _) = decompose_chain(node, source);
    let base = base?;
    match base.kind() {
        "identifier" => Some(node_text(base, source)),
        "field_access" => base
            .child_by_field_name("field")
            .map(|field| node_text(field, source)),
        _ => None,
    }
}

/// Resolves an expression to a builder call rooted at `builder` (for example
/// `Filters`). Follows identifier references through their local or constant
/// initializer, the same way values resolve, but stops at anything that is
/// not statically a builder invocation.
pub fn resolve_builder_call<'a>(
    node: Node<'a>,
    scope: &Scope<'a>,
    builder: &str,
) -> Option<Node<'a>> {
    let node = crate::scope::unwrap_parens(node)?;
    match node.kind() {
        "method_invocation" => {
            let base = chain_base_name(node, scope.source());
            if base.as_deref() == Some(builder) {
                Some(node)
            } else {
                None
            }
        }
        "identifier" => match scope.classify(node) {
            NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) => {
                resolve_builder_call(initializer, scope, builder)
            }
            _ => None,
        },
        _ => None,
    }
}

/// A statically-known list literal (`List.of`, `Arrays.asList`,
/// `Collections.singletonList`) resolved to its element expressions.
pub fn resolve_list_elements<'a>(node: Node<'a>, scope: &Scope<'a>) -> Option<Vec<Node<'a>>> {
    let node = crate::scope::unwrap_parens(node)?;
    match node.kind() {
        "method_invocation" => {
            let source = scope.source();
            let receiver = node
                .child_by_field_name("object")
                .map(|object| node_text(object, source))?;
            let method = node
                .child_by_field_name("name")
                .map(|name| node_text(name, source))?;
            let is_list_factory = matches!(
                (receiver.as_str(), method.as_str()),
                ("List" | "Arrays", "of" | "asList") | ("Collections", "singletonList")
            );
            if !is_list_factory {
                return None;
            }
            let arguments = node.child_by_field_name("arguments")?;
            let mut cursor = arguments.walk();
            Some(arguments.named_children(&mut cursor).collect())
        }
        "identifier" => match scope.classify(node) {
            NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) => {
                resolve_list_elements(initializer, scope)
            }
            _ => None,
        },
        _ => None,
    }
}

pub fn line_of(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

pub fn node_text(node: Node<'_>, source: &str) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
        .to_string()
}
