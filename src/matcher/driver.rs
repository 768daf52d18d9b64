use crate::matcher::{
    CallSegment, ChainMatch, Dialect, FieldRef, OpName, OpNode, StageOp, decompose_chain, line_of,
    resolve_builder_call, resolve_list_elements,
};
use crate::resolver::{resolve, resolve_as_string};
use crate::scope::{NodeClass, Scope};
use crate::shape::{
    AccumulatorFn, CompareOp, NamePart, Namespace, OperationKind, UnresolvedReason, UpdateOp, Value,
};
use tree_sitter::Node;

/// MongoCollection methods that root a recognizable command chain.
fn command_kind(name: &str) -> Option<OperationKind> {
    Some(match name {
        "find" => OperationKind::Find,
        "aggregate" => OperationKind::Aggregate,
        "countDocuments" => OperationKind::Count,
        "distinct" => OperationKind::Distinct,
        "updateOne" => OperationKind::UpdateOne,
        "updateMany" => OperationKind::UpdateMany,
        "deleteOne" => OperationKind::DeleteOne,
        "deleteMany" => OperationKind::DeleteMany,
        "insertOne" => OperationKind::InsertOne,
        "insertMany" => OperationKind::InsertMany,
        "replaceOne" => OperationKind::ReplaceOne,
        "findOneAndUpdate" => OperationKind::FindOneAndUpdate,
        "findOneAndDelete" => OperationKind::FindOneAndDelete,
        _ => return None,
    })
}

/// Chain modifiers that carry no shape information and are not worth a
/// diagnostic (cursor plumbing, hints, terminal operations).
const BENIGN_MODIFIERS: &[&str] = &[
    "first", "into", "iterator", "cursor", "forEach", "map", "batchSize", "maxTime", "hint",
    "hintString", "collation", "allowDiskUse", "explain", "subscribe", "toCollection", "limit",
    "skip",
];

/// Matches a native-driver command chain rooted at `call`. Returns `None`
/// when the chain is not recognizable as a driver query; this is not an
/// error, the statement is simply not ours.
pub fn match_chain<'a>(call: Node<'a>, scope: &Scope<'a>) -> Option<ChainMatch> {
    let source = scope.source();
    let (base, segments) = decompose_chain(call, source);

    let command_index = segments
        .iter()
        .position(|segment| command_kind(&segment.name).is_some())?;
    let command_segment = &segments[command_index];
    let mut operation = command_kind(&command_segment.name).expect("position checked");

    if !looks_like_collection_chain(base, &segments[..command_index], command_segment, scope) {
        return None;
    }

    if operation == OperationKind::Find
        && segments[command_index + 1..]
            .iter()
            .any(|segment| segment.name == "first")
    {
        operation = OperationKind::FindOne;
    }

    let namespace = extract_namespace(base, &segments[..command_index], scope);
    let mut chain = ChainMatch::new(Dialect::Driver, operation, namespace);

    match operation {
        OperationKind::Find
        | OperationKind::FindOne
        | OperationKind::Count
        | OperationKind::DeleteOne
        | OperationKind::DeleteMany
        | OperationKind::ReplaceOne
        | OperationKind::FindOneAndDelete => {
            if let Some(filter_arg) = command_segment.args.first() {
                push_filter_argument(&mut chain, *filter_arg, command_segment, scope);
            }
        }
        OperationKind::UpdateOne | OperationKind::UpdateMany | OperationKind::FindOneAndUpdate => {
            if let Some(filter_arg) = command_segment.args.first() {
                push_filter_argument(&mut chain, *filter_arg, command_segment, scope);
            }
            if let Some(update_arg) = command_segment.args.get(1) {
                match resolve_builder_call(*update_arg, scope, "Updates") {
                    Some(update_call) => chain.updates.push(match_update(update_call, scope)),
                    None => chain.updates.push(OpNode::new(
                        OpName::Malformed(command_segment.name.clone()),
                        line_of(*update_arg),
                    )),
                }
            }
        }
        OperationKind::Distinct => {
            if let Some(field_arg) = command_segment.args.first() {
                let field = field_ref(*field_arg, scope);
                chain
                    .projections
                    .push(OpNode::new(OpName::Include, line_of(*field_arg)).with_field(field));
            }
            if let Some(filter_arg) = command_segment.args.get(1) {
                push_filter_argument(&mut chain, *filter_arg, command_segment, scope);
            }
        }
        OperationKind::Aggregate => {
            if let Some(stage_list) = command_segment.args.first() {
                match_stage_list(&mut chain, *stage_list, scope);
            }
        }
        _ => {}
    }

    for modifier in &segments[command_index + 1..] {
        match modifier.name.as_str() {
            "sort" => {
                let keys = modifier
                    .args
                    .first()
                    .and_then(|argument| resolve_builder_call(*argument, scope, "Sorts"))
                    .map(|sorts_call| match_sorts(sorts_call, scope))
                    .unwrap_or_else(|| {
                        vec![OpNode::new(
                            OpName::Malformed("sort".into()),
                            modifier.line(),
                        )]
                    });
                chain.sorts.push(keys);
            }
            "projection" => {
                match modifier
                    .args
                    .first()
                    .and_then(|argument| resolve_builder_call(*argument, scope, "Projections"))
                {
                    Some(projection_call) => chain
                        .projections
                        .extend(match_projections(projection_call, scope)),
                    None => chain.unknowns.push(OpNode::new(
                        OpName::Malformed("projection".into()),
                        modifier.line(),
                    )),
                }
            }
            name if BENIGN_MODIFIERS.contains(&name) => {}
            name => {
                chain
                    .unknowns
                    .push(OpNode::new(OpName::Unknown(name.to_string()), modifier.line()));
            }
        }
    }

    Some(chain)
}

/// Heuristic standing in for type resolution: a chain is treated as a
/// collection command when its receiver goes through getDatabase or
/// getCollection, when the receiver is named like a collection, or when any
/// argument is a recognizable builder call.
fn looks_like_collection_chain<'a>(
    base: Option<Node<'a>>,
    pre_segments: &[CallSegment<'a>],
    command: &CallSegment<'a>,
    scope: &Scope<'a>,
) -> bool {
    if pre_segments
        .iter()
        .any(|segment| segment.name == "getCollection" || segment.name == "getDatabase")
    {
        return true;
    }
    if let Some(base) = base {
        let name = crate::matcher::node_text(base, scope.source()).to_lowercase();
        if name.contains("collection") || name == "coll" {
            return true;
        }
        if collection_initializer(base, scope).is_some() {
            return true;
        }
    }
    command.args.iter().any(|argument| {
        resolve_builder_call(*argument, scope, "Filters").is_some()
            || resolve_builder_call(*argument, scope, "Updates").is_some()
            || resolve_list_elements(*argument, scope)
                .map(|elements| {
                    elements.iter().any(|element| {
                        resolve_builder_call(*element, scope, "Aggregates").is_some()
                    })
                })
                .unwrap_or(false)
    })
}

/// Follows an identifier receiver to an initializer chain that contains
/// getDatabase/getCollection calls.
fn collection_initializer<'a>(base: Node<'a>, scope: &Scope<'a>) -> Option<Node<'a>> {
    if base.kind() != "identifier" {
        return None;
    }
    match scope.classify(base) {
        NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) => {
            if initializer.kind() != "method_invocation" {
                return None;
            }
            let (_, segments) = decompose_chain(initializer, scope.source());
            segments
                .iter()
                .any(|segment| segment.name == "getCollection")
                .then_some(initializer)
        }
        _ => None,
    }
}

fn extract_namespace<'a>(
    base: Option<Node<'a>>,
    pre_segments: &[CallSegment<'a>],
    scope: &Scope<'a>,
) -> Namespace {
    let mut namespace = namespace_from_segments(pre_segments, scope);
    if namespace.collection != NamePart::Unknown || namespace.database != NamePart::Unknown {
        return namespace;
    }
    if let Some(base) = base {
        if let Some(initializer) = collection_initializer(base, scope) {
            let (_, segments) = decompose_chain(initializer, scope.source());
            namespace = namespace_from_segments(&segments, scope);
        }
    }
    namespace
}

fn namespace_from_segments<'a>(segments: &[CallSegment<'a>], scope: &Scope<'a>) -> Namespace {
    let mut namespace = Namespace::unknown();
    for segment in segments {
        let part = segment
            .args
            .first()
            .and_then(|argument| resolve_as_string(*argument, scope))
            .map(NamePart::Known)
            .unwrap_or(NamePart::Unknown);
        match segment.name.as_str() {
            "getDatabase" => namespace.database = part,
            "getCollection" => namespace.collection = part,
            _ => {}
        }
    }
    namespace
}

fn push_filter_argument<'a>(
    chain: &mut ChainMatch,
    argument: Node<'a>,
    command: &CallSegment<'a>,
    scope: &Scope<'a>,
) {
    match resolve_builder_call(argument, scope, "Filters") {
        Some(filter_call) => chain.filters.push(match_filter(filter_call, scope)),
        None => {
            // Arguments that are plainly not filters (documents for
            // insert/replace, entity classes) stay out of the shape; an
            // unresolvable expression in a filter position is degraded.
            if argument.kind() == "identifier" || argument.kind() == "method_invocation" {
                chain.filters.push(
                    OpNode::new(OpName::Malformed(command.name.clone()), line_of(argument)),
                );
            }
        }
    }
}

fn compare_op(name: &str) -> Option<CompareOp> {
    Some(match name {
        "eq" => CompareOp::Eq,
        "ne" => CompareOp::Ne,
        "gt" => CompareOp::Gt,
        "gte" => CompareOp::Gte,
        "lt" => CompareOp::Lt,
        "lte" => CompareOp::Lte,
        "in" => CompareOp::In,
        "nin" => CompareOp::Nin,
        "exists" => CompareOp::Exists,
        "regex" => CompareOp::Regex,
        "all" => CompareOp::All,
        "size" => CompareOp::Size,
        "elemMatch" => CompareOp::ElemMatch,
        _ => return None,
    })
}

/// Matches one `Filters.<op>(...)` invocation into an operation node,
/// recursing through combinators. Never fails: unknown names become
/// `Unknown` nodes and broken arities become `Malformed` nodes.
pub fn match_filter<'a>(filter_call: Node<'a>, scope: &Scope<'a>) -> OpNode {
    let source = scope.source();
    let (_, segments) = decompose_chain(filter_call, source);
    let Some(segment) = segments.last() else {
        return OpNode::new(OpName::Malformed("filter".into()), line_of(filter_call));
    };
    let line = segment.line();

    match segment.name.as_str() {
        "and" | "or" | "nor" => {
            let op = match segment.name.as_str() {
                "and" => OpName::And,
                "or" => OpName::Or,
                _ => OpName::Nor,
            };
            let mut children = Vec::new();
            for argument in &segment.args {
                match resolve_builder_call(*argument, scope, "Filters") {
                    Some(nested) => children.push(match_filter(nested, scope)),
                    None => {
                        // Wrong element type in the variadic list: halt here,
                        // keep what was already matched.
                        children.push(OpNode::new(
                            OpName::Malformed(segment.name.clone()),
                            line_of(*argument),
                        ));
                        break;
                    }
                }
            }
            OpNode::new(op, line).with_children(children)
        }
        "not" => match segment
            .args
            .first()
            .and_then(|argument| resolve_builder_call(*argument, scope, "Filters"))
        {
            Some(inner) => {
                OpNode::new(OpName::Not, line).with_children(vec![match_filter(inner, scope)])
            }
            None => OpNode::new(OpName::Malformed("not".into()), line),
        },
        "eq" if segment.args.len() == 1 => OpNode::new(OpName::Compare(CompareOp::Eq), line)
            .with_field(FieldRef::Known("_id".into()))
            .with_value(resolve(segment.args[0], scope)),
        "exists" if segment.args.len() == 1 => {
            OpNode::new(OpName::Compare(CompareOp::Exists), line)
                .with_field(field_ref(segment.args[0], scope))
                .with_value(Value::Boolean(true))
        }
        "in" | "nin" => {
            let op = compare_op(&segment.name).expect("in/nin are comparisons");
            if segment.args.len() < 2 {
                return OpNode::new(OpName::Malformed(segment.name.clone()), line);
            }
            let field = field_ref(segment.args[0], scope);
            let value = if segment.args.len() == 2 {
                match resolve(segment.args[1], scope) {
                    Value::List(elements) => Value::List(elements),
                    Value::Unresolved(reason) => Value::Unresolved(reason),
                    // single vararg element becomes a one-element list
                    scalar => Value::List(vec![scalar]),
                }
            } else {
                Value::List(
                    segment.args[1..]
                        .iter()
                        .map(|argument| resolve(*argument, scope))
                        .collect(),
                )
            };
            OpNode::new(OpName::Compare(op), line)
                .with_field(field)
                .with_value(value)
        }
        name => match compare_op(name) {
            Some(op) => {
                if segment.args.len() < 2 {
                    return OpNode::new(OpName::Malformed(name.to_string()), line);
                }
                OpNode::new(OpName::Compare(op), line)
                    .with_field(field_ref(segment.args[0], scope))
                    .with_value(resolve(segment.args[1], scope))
            }
            None => OpNode::new(OpName::Unknown(name.to_string()), line),
        },
    }
}

fn update_op(name: &str) -> Option<UpdateOp> {
    Some(match name {
        "set" => UpdateOp::Set,
        "unset" => UpdateOp::Unset,
        "inc" => UpdateOp::Inc,
        "mul" => UpdateOp::Mul,
        "rename" => UpdateOp::Rename,
        "min" => UpdateOp::Min,
        "max" => UpdateOp::Max,
        "push" => UpdateOp::Push,
        "addToSet" => UpdateOp::AddToSet,
        "pull" => UpdateOp::Pull,
        "pullAll" => UpdateOp::PullAll,
        "popFirst" | "popLast" => UpdateOp::Pop,
        "currentDate" => UpdateOp::CurrentDate,
        _ => return None,
    })
}

/// Matches one `Updates.<op>(...)` invocation, recursing through
/// `Updates.combine`.
pub fn match_update<'a>(update_call: Node<'a>, scope: &Scope<'a>) -> OpNode {
    let source = scope.source();
    let (_, segments) = decompose_chain(update_call, source);
    let Some(segment) = segments.last() else {
        return OpNode::new(OpName::Malformed("update".into()), line_of(update_call));
    };
    let line = segment.line();

    match segment.name.as_str() {
        "combine" => {
            let mut children = Vec::new();
            for argument in &segment.args {
                match resolve_builder_call(*argument, scope, "Updates") {
                    Some(nested) => children.push(match_update(nested, scope)),
                    None => {
                        children.push(OpNode::new(
                            OpName::Malformed("combine".into()),
                            line_of(*argument),
                        ));
                        break;
                    }
                }
            }
            OpNode::new(OpName::Combine, line).with_children(children)
        }
        "pull" if segment.args.len() == 2 => {
            let field = field_ref(segment.args[0], scope);
            match resolve_builder_call(segment.args[1], scope, "Filters") {
                Some(condition) => OpNode::new(OpName::Update(UpdateOp::Pull), line)
                    .with_field(field)
                    .with_children(vec![match_filter(condition, scope)]),
                None => OpNode::new(OpName::Update(UpdateOp::Pull), line)
                    .with_field(field)
                    .with_value(resolve(segment.args[1], scope)),
            }
        }
        name => match update_op(name) {
            Some(op @ (UpdateOp::Unset | UpdateOp::CurrentDate | UpdateOp::Pop)) => {
                if segment.args.is_empty() {
                    return OpNode::new(OpName::Malformed(name.to_string()), line);
                }
                let mut node = OpNode::new(OpName::Update(op), line)
                    .with_field(field_ref(segment.args[0], scope));
                if name == "popFirst" {
                    node = node.with_value(Value::Int(-1));
                } else if name == "popLast" {
                    node = node.with_value(Value::Int(1));
                }
                node
            }
            Some(op) => {
                if segment.args.len() < 2 {
                    return OpNode::new(OpName::Malformed(name.to_string()), line);
                }
                OpNode::new(OpName::Update(op), line)
                    .with_field(field_ref(segment.args[0], scope))
                    .with_value(resolve(segment.args[1], scope))
            }
            None => OpNode::new(OpName::Unknown(name.to_string()), line),
        },
    }
}

/// Matches a `Sorts.<op>(...)` invocation into an ordered run of sort keys.
pub fn match_sorts<'a>(sorts_call: Node<'a>, scope: &Scope<'a>) -> Vec<OpNode> {
    let source = scope.source();
    let (_, segments) = decompose_chain(sorts_call, source);
    let Some(segment) = segments.last() else {
        return vec![OpNode::new(OpName::Malformed("sort".into()), line_of(sorts_call))];
    };
    let line = segment.line();

    match segment.name.as_str() {
        "ascending" | "descending" => {
            let direction = if segment.name == "ascending" {
                crate::shape::SortDirection::Ascending
            } else {
                crate::shape::SortDirection::Descending
            };
            sort_key_arguments(segment, scope)
                .into_iter()
                .map(|field| OpNode::new(OpName::SortKey(direction), line).with_field(field))
                .collect()
        }
        "orderBy" => {
            let mut keys = Vec::new();
            for argument in &segment.args {
                match resolve_builder_call(*argument, scope, "Sorts") {
                    Some(nested) => keys.extend(match_sorts(nested, scope)),
                    None => {
                        keys.push(OpNode::new(
                            OpName::Malformed("orderBy".into()),
                            line_of(*argument),
                        ));
                        break;
                    }
                }
            }
            keys
        }
        name => vec![OpNode::new(OpName::Unknown(name.to_string()), line)],
    }
}

/// ascending/descending accept varargs of field names or a single iterable.
fn sort_key_arguments<'a>(segment: &CallSegment<'a>, scope: &Scope<'a>) -> Vec<FieldRef> {
    if segment.args.len() == 1 {
        if let Some(elements) = resolve_list_elements(segment.args[0], scope) {
            return elements
                .into_iter()
                .map(|element| field_ref(element, scope))
                .collect();
        }
    }
    segment
        .args
        .iter()
        .map(|argument| field_ref(*argument, scope))
        .collect()
}

/// Matches a `Projections.<op>(...)` invocation into include/exclude nodes.
pub fn match_projections<'a>(projection_call: Node<'a>, scope: &Scope<'a>) -> Vec<OpNode> {
    let source = scope.source();
    let (_, segments) = decompose_chain(projection_call, source);
    let Some(segment) = segments.last() else {
        return vec![OpNode::new(
            OpName::Malformed("projection".into()),
            line_of(projection_call),
        )];
    };
    let line = segment.line();

    match segment.name.as_str() {
        "include" | "exclude" => {
            let op = if segment.name == "include" {
                OpName::Include
            } else {
                OpName::Exclude
            };
            sort_key_arguments(segment, scope)
                .into_iter()
                .map(|field| OpNode::new(op.clone(), line).with_field(field))
                .collect()
        }
        "excludeId" => {
            vec![OpNode::new(OpName::Exclude, line).with_field(FieldRef::Known("_id".into()))]
        }
        "fields" => {
            let mut nodes = Vec::new();
            for argument in &segment.args {
                match resolve_builder_call(*argument, scope, "Projections") {
                    Some(nested) => nodes.extend(match_projections(nested, scope)),
                    None => {
                        nodes.push(OpNode::new(
                            OpName::Malformed("fields".into()),
                            line_of(*argument),
                        ));
                        break;
                    }
                }
            }
            nodes
        }
        name => vec![OpNode::new(OpName::Unknown(name.to_string()), line)],
    }
}

fn match_stage_list<'a>(chain: &mut ChainMatch, stage_list: Node<'a>, scope: &Scope<'a>) {
    let Some(elements) = resolve_list_elements(stage_list, scope) else {
        chain.stages.push(OpNode::new(
            OpName::Malformed("aggregate".into()),
            line_of(stage_list),
        ));
        return;
    };
    for element in elements {
        match resolve_builder_call(element, scope, "Aggregates") {
            Some(stage_call) => chain.stages.push(match_stage(stage_call, scope)),
            None => {
                chain.stages.push(OpNode::new(
                    OpName::Malformed("aggregate".into()),
                    line_of(element),
                ));
                break;
            }
        }
    }
}

fn accumulator_fn(name: &str) -> Option<AccumulatorFn> {
    Some(match name {
        "sum" => AccumulatorFn::Sum,
        "avg" => AccumulatorFn::Avg,
        "min" => AccumulatorFn::Min,
        "max" => AccumulatorFn::Max,
        "first" => AccumulatorFn::First,
        "last" => AccumulatorFn::Last,
        "push" => AccumulatorFn::Push,
        "addToSet" => AccumulatorFn::AddToSet,
        "top" => AccumulatorFn::Top,
        "topN" => AccumulatorFn::TopN,
        "bottom" => AccumulatorFn::Bottom,
        "bottomN" => AccumulatorFn::BottomN,
        _ => return None,
    })
}

/// Matches one `Aggregates.<stage>(...)` invocation.
pub fn match_stage<'a>(stage_call: Node<'a>, scope: &Scope<'a>) -> OpNode {
    let source = scope.source();
    let (_, segments) = decompose_chain(stage_call, source);
    let Some(segment) = segments.last() else {
        return OpNode::new(OpName::Malformed("stage".into()), line_of(stage_call));
    };
    let line = segment.line();

    match segment.name.as_str() {
        "match" => {
            let children = match segment.args.first() {
                None => Vec::new(),
                Some(argument) => match resolve_builder_call(*argument, scope, "Filters") {
                    Some(filter_call) => vec![match_filter(filter_call, scope)],
                    None => vec![OpNode::new(
                        OpName::Malformed("match".into()),
                        line_of(*argument),
                    )],
                },
            };
            OpNode::new(OpName::Stage(StageOp::Match), line).with_children(children)
        }
        "group" => {
            let Some(key_argument) = segment.args.first() else {
                return OpNode::new(OpName::Malformed("group".into()), line);
            };
            let key = resolve(*key_argument, scope);
            let mut accumulators = Vec::new();
            for argument in &segment.args[1..] {
                match resolve_builder_call(*argument, scope, "Accumulators") {
                    Some(accumulator_call) => {
                        accumulators.push(match_accumulator(accumulator_call, scope));
                    }
                    None => {
                        accumulators.push(OpNode::new(
                            OpName::Malformed("group".into()),
                            line_of(*argument),
                        ));
                        break;
                    }
                }
            }
            OpNode::new(OpName::Stage(StageOp::Group), line)
                .with_value(key)
                .with_children(accumulators)
        }
        "project" => {
            let children = match segment
                .args
                .first()
                .and_then(|argument| resolve_builder_call(*argument, scope, "Projections"))
            {
                Some(projection_call) => match_projections(projection_call, scope),
                None => vec![OpNode::new(OpName::Malformed("project".into()), line)],
            };
            OpNode::new(OpName::Stage(StageOp::Project), line).with_children(children)
        }
        "sort" => {
            let children = match segment
                .args
                .first()
                .and_then(|argument| resolve_builder_call(*argument, scope, "Sorts"))
            {
                Some(sorts_call) => match_sorts(sorts_call, scope),
                None => vec![OpNode::new(OpName::Malformed("sort".into()), line)],
            };
            OpNode::new(OpName::Stage(StageOp::Sort), line).with_children(children)
        }
        "unwind" => {
            let Some(field_argument) = segment.args.first() else {
                return OpNode::new(OpName::Stage(StageOp::Unwind), line);
            };
            let field = field_ref(*field_argument, scope);
            let mut node = OpNode::new(OpName::Stage(StageOp::Unwind), line).with_field(field);
            if let Some(options) = segment.args.get(1) {
                if let Some(preserve) = unwind_preserve_option(*options, scope) {
                    node = node.with_value(Value::Boolean(preserve));
                }
            }
            node
        }
        "limit" | "skip" => {
            let op = if segment.name == "limit" {
                StageOp::Limit
            } else {
                StageOp::Skip
            };
            let value = segment
                .args
                .first()
                .map(|argument| resolve(*argument, scope))
                .unwrap_or(Value::Unresolved(UnresolvedReason::Unsupported));
            OpNode::new(OpName::Stage(op), line).with_value(value)
        }
        "count" => {
            let mut node = OpNode::new(OpName::Stage(StageOp::Count), line);
            if let Some(argument) = segment.args.first() {
                node = node.with_field(field_ref(*argument, scope));
            }
            node
        }
        "addFields" => {
            let mut added = Vec::new();
            let arguments = match segment.args.len() {
                1 => resolve_list_elements(segment.args[0], scope)
                    .unwrap_or_else(|| segment.args.clone()),
                _ => segment.args.clone(),
            };
            for argument in arguments {
                match match_field_constructor(argument, scope) {
                    Some(node) => added.push(node),
                    None => {
                        added.push(OpNode::new(
                            OpName::Malformed("addFields".into()),
                            line_of(argument),
                        ));
                        break;
                    }
                }
            }
            OpNode::new(OpName::Stage(StageOp::AddFields), line).with_children(added)
        }
        name => OpNode::new(OpName::Unknown(name.to_string()), line),
    }
}

/// `new Field("name", value)` inside Aggregates.addFields.
fn match_field_constructor<'a>(node: Node<'a>, scope: &Scope<'a>) -> Option<OpNode> {
    let node = crate::scope::unwrap_parens(node)?;
    if node.kind() != "object_creation_expression" {
        return None;
    }
    let type_name = node
        .child_by_field_name("type")
        .map(|type_node| crate::matcher::node_text(type_node, scope.source()))?;
    if !type_name.ends_with("Field") {
        return None;
    }
    let arguments = node.child_by_field_name("arguments")?;
    let name_argument = arguments.named_child(0)?;
    let value_argument = arguments.named_child(1)?;
    Some(
        OpNode::new(OpName::AddedField, line_of(node))
            .with_field(field_ref(name_argument, scope))
            .with_value(resolve(value_argument, scope)),
    )
}

fn unwind_preserve_option<'a>(options: Node<'a>, scope: &Scope<'a>) -> Option<bool> {
    // new UnwindOptions().preserveNullAndEmptyArrays(true)
    let (base, segments) = decompose_chain(options, scope.source());
    base?;
    for segment in segments {
        if segment.name == "preserveNullAndEmptyArrays" {
            if let Some(argument) = segment.args.first() {
                if let Value::Boolean(preserve) = resolve(*argument, scope) {
                    return Some(preserve);
                }
            }
        }
    }
    None
}

fn match_accumulator<'a>(accumulator_call: Node<'a>, scope: &Scope<'a>) -> OpNode {
    let source = scope.source();
    let (_, segments) = decompose_chain(accumulator_call, source);
    let Some(segment) = segments.last() else {
        return OpNode::new(OpName::Malformed("accumulator".into()), line_of(accumulator_call));
    };
    let line = segment.line();

    let Some(function) = accumulator_fn(&segment.name) else {
        return OpNode::new(OpName::Unknown(segment.name.clone()), line);
    };

    let source_index = match function {
        AccumulatorFn::Top | AccumulatorFn::Bottom | AccumulatorFn::TopN | AccumulatorFn::BottomN => 2,
        _ => 1,
    };
    if segment.args.len() <= source_index {
        return OpNode::new(OpName::Malformed(segment.name.clone()), line);
    }

    OpNode::new(OpName::Accumulate(function), line)
        .with_field(field_ref(segment.args[0], scope))
        .with_value(resolve(segment.args[source_index], scope))
}

pub(crate) fn field_ref<'a>(node: Node<'a>, scope: &Scope<'a>) -> FieldRef {
    match resolve(node, scope) {
        Value::String(text) => FieldRef::Known(text),
        Value::Unresolved(reason) => FieldRef::Unresolved(reason),
        _ => FieldRef::Unresolved(UnresolvedReason::Unsupported),
    }
}
