use crate::matcher::driver::field_ref;
use crate::matcher::{
    CallSegment, ChainMatch, Dialect, FieldRef, OpName, OpNode, StageOp, decompose_chain, line_of,
    node_text,
};
use crate::resolver::resolve;
use crate::scope::{NodeClass, Scope, unwrap_parens};
use crate::shape::{
    AccumulatorFn, CompareOp, NamePart, Namespace, OperationKind, SortDirection, UpdateOp, Value,
};
use tree_sitter::Node;

/// MongoTemplate/MongoOperations methods that root a recognizable chain.
fn criteria_command(name: &str) -> Option<OperationKind> {
    Some(match name {
        "find" | "findAll" | "stream" | "scroll" => OperationKind::Find,
        "findOne" | "findById" | "exists" => OperationKind::FindOne,
        "count" | "exactCount" => OperationKind::Count,
        "findDistinct" => OperationKind::Distinct,
        "remove" | "findAllAndRemove" => OperationKind::DeleteMany,
        "findAndModify" => OperationKind::FindOneAndUpdate,
        "findAndRemove" => OperationKind::FindOneAndDelete,
        "insert" => OperationKind::InsertOne,
        "insertAll" => OperationKind::InsertMany,
        "replace" => OperationKind::ReplaceOne,
        "updateFirst" | "upsert" => OperationKind::UpdateOne,
        "updateMulti" => OperationKind::UpdateMany,
        "aggregate" | "aggregateStream" => OperationKind::Aggregate,
        _ => return None,
    })
}

const BENIGN_MODIFIERS: &[&str] = &["one", "oneValue", "first", "firstValue", "all"];

/// Matches a Spring-Data-style template operation rooted at `call`. Returns
/// `None` when the chain does not look like a criteria query.
pub fn match_chain<'a>(call: Node<'a>, scope: &Scope<'a>) -> Option<ChainMatch> {
    let source = scope.source();
    let (base, segments) = decompose_chain(call, source);

    let command_index = segments
        .iter()
        .position(|segment| criteria_command(&segment.name).is_some())?;
    let command_segment = &segments[command_index];
    let operation = criteria_command(&command_segment.name).expect("position checked");

    let template_receiver = base
        .map(|base| {
            let name = node_text(base, source).to_lowercase();
            name.contains("template") || name.contains("operations") || name == "mongoops"
        })
        .unwrap_or(false);
    let has_criteria_argument = command_segment
        .args
        .iter()
        .any(|argument| is_criteria_argument(*argument, scope));
    if !template_receiver && !has_criteria_argument {
        return None;
    }

    let namespace = extract_namespace(command_segment, scope);
    let mut chain = ChainMatch::new(Dialect::Criteria, operation, namespace);

    match command_segment.name.as_str() {
        "findById" => {
            if let Some(id_argument) = command_segment.args.first() {
                chain.filters.push(
                    OpNode::new(OpName::Compare(CompareOp::Eq), line_of(*id_argument))
                        .with_field(FieldRef::Known("_id".into()))
                        .with_value(resolve(*id_argument, scope)),
                );
            }
        }
        "updateFirst" | "updateMulti" | "upsert" | "findAndModify" => {
            if let Some(query_argument) = command_segment.args.first() {
                parse_query(&mut chain, *query_argument, scope);
            }
            if let Some(update_argument) = command_segment.args.get(1) {
                chain.updates.extend(parse_update(*update_argument, scope));
            }
        }
        "aggregate" | "aggregateStream" => {
            if let Some(aggregation_argument) = command_segment.args.first() {
                parse_aggregation(&mut chain, *aggregation_argument, scope);
            }
        }
        "insert" | "insertAll" | "replace" => {}
        _ => {
            if let Some(query_argument) = command_segment.args.first() {
                parse_query(&mut chain, *query_argument, scope);
            }
        }
    }

    for modifier in &segments[command_index + 1..] {
        if BENIGN_MODIFIERS.contains(&modifier.name.as_str()) {
            continue;
        }
        chain.unknowns.push(OpNode::new(
            OpName::Unknown(modifier.name.clone()),
            modifier.line(),
        ));
    }

    Some(chain)
}

/// An argument qualifies a chain as criteria-dialect when it is built from
/// the Query/Criteria/Aggregation/Update vocabulary.
fn is_criteria_argument<'a>(node: Node<'a>, scope: &Scope<'a>) -> bool {
    let Some(node) = unwrap_parens(node) else {
        return false;
    };
    match node.kind() {
        "method_invocation" => {
            let (base, segments) = decompose_chain(node, scope.source());
            if segments.iter().any(|segment| {
                matches!(segment.name.as_str(), "query" | "where" | "newAggregation")
            }) {
                return true;
            }
            base.map(|base| {
                matches!(
                    node_text(base, scope.source()).as_str(),
                    "Query" | "Criteria" | "Aggregation" | "Update"
                )
            })
            .unwrap_or(false)
        }
        "object_creation_expression" => {
            let type_name = node
                .child_by_field_name("type")
                .map(|type_node| node_text(type_node, scope.source()))
                .unwrap_or_default();
            matches!(type_name.as_str(), "Query" | "Update" | "BasicQuery")
        }
        "identifier" => match scope.classify(node) {
            NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) => {
                is_criteria_argument(initializer, scope)
            }
            _ => false,
        },
        _ => false,
    }
}

/// The collection is named either by an explicit string argument or through
/// the `@Document` annotation of an entity class argument. The database is
/// configured outside the source under analysis and is always unknown here.
fn extract_namespace<'a>(command: &CallSegment<'a>, scope: &Scope<'a>) -> Namespace {
    let mut collection = NamePart::Unknown;
    for argument in &command.args {
        let Some(argument) = unwrap_parens(*argument) else {
            continue;
        };
        match argument.kind() {
            "string_literal" => {
                if let Value::String(name) = resolve(argument, scope) {
                    collection = NamePart::Known(name);
                }
            }
            "class_literal" => {
                if collection == NamePart::Unknown {
                    let class_name = node_text(argument, scope.source())
                        .trim_end_matches(".class")
                        .to_string();
                    if let Some(document) = scope.document_collection(&class_name) {
                        collection = NamePart::Known(document.to_string());
                    }
                }
            }
            _ => {}
        }
    }
    Namespace {
        database: NamePart::Unknown,
        collection,
    }
}

/// Parses a `query(...)`/`new Query(...)` expression, including chained
/// `.with(Sort)` calls and `.fields().include(...).exclude(...)` blocks.
fn parse_query<'a>(chain: &mut ChainMatch, node: Node<'a>, scope: &Scope<'a>) {
    let Some(node) = unwrap_parens(node) else {
        return;
    };
    match node.kind() {
        "identifier" => {
            if let NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) =
                scope.classify(node)
            {
                parse_query(chain, initializer, scope);
            }
        }
        "object_creation_expression" => {
            if let Some(arguments) = node.child_by_field_name("arguments") {
                if let Some(criteria) = arguments.named_child(0) {
                    chain.filters.extend(parse_criteria(criteria, scope));
                }
            }
        }
        "method_invocation" => {
            let (base, segments) = decompose_chain(node, scope.source());
            if let Some(base) = base {
                if base.kind() == "object_creation_expression" {
                    parse_query(chain, base, scope);
                }
            }
            let mut in_fields_block = false;
            for segment in &segments {
                match segment.name.as_str() {
                    "query" => {
                        if let Some(criteria) = segment.args.first() {
                            chain.filters.extend(parse_criteria(*criteria, scope));
                        }
                    }
                    "of" => {
                        // Query.of(otherQuery) wraps an existing query
                        if let Some(inner) = segment.args.first() {
                            parse_query(chain, *inner, scope);
                        }
                    }
                    "with" => {
                        let keys = segment
                            .args
                            .first()
                            .and_then(|argument| parse_sort(*argument, scope));
                        match keys {
                            Some(keys) => chain.sorts.push(keys),
                            None => chain.unknowns.push(OpNode::new(
                                OpName::Unknown("with".into()),
                                segment.line(),
                            )),
                        }
                    }
                    "fields" => in_fields_block = true,
                    "include" | "exclude" if in_fields_block => {
                        let op = if segment.name == "include" {
                            OpName::Include
                        } else {
                            OpName::Exclude
                        };
                        for argument in &segment.args {
                            chain.projections.push(
                                OpNode::new(op.clone(), segment.line())
                                    .with_field(field_ref(*argument, scope)),
                            );
                        }
                    }
                    "limit" | "skip" | "cursorBatchSize" | "maxTimeMsec" | "allowSecondaryReads" => {}
                    name => chain.unknowns.push(OpNode::new(
                        OpName::Unknown(name.to_string()),
                        segment.line(),
                    )),
                }
            }
        }
        _ => {}
    }
}

fn criteria_compare_op(name: &str) -> Option<CompareOp> {
    Some(match name {
        "is" => CompareOp::Eq,
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

/// Parses a `where("field").is(value).and("other").gt(n)` chain into
/// operation nodes in written order. Combinator segments
/// (`orOperator`/`andOperator`/`norOperator`) recurse into their criteria
/// arguments.
pub fn parse_criteria<'a>(node: Node<'a>, scope: &Scope<'a>) -> Vec<OpNode> {
    let Some(node) = unwrap_parens(node) else {
        return Vec::new();
    };
    if node.kind() == "identifier" {
        return match scope.classify(node) {
            NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) => {
                parse_criteria(initializer, scope)
            }
            _ => Vec::new(),
        };
    }
    if node.kind() != "method_invocation" {
        return Vec::new();
    }

    let (_, segments) = decompose_chain(node, scope.source());
    let mut ops = Vec::new();
    let mut current_field: Option<FieldRef> = None;

    for segment in &segments {
        let line = segment.line();
        match segment.name.as_str() {
            "where" | "and" => match segment.args.first() {
                Some(argument) => current_field = Some(field_ref(*argument, scope)),
                None => {
                    ops.push(OpNode::new(OpName::Malformed(segment.name.clone()), line));
                    break;
                }
            },
            "andOperator" | "orOperator" | "norOperator" => {
                let op = match segment.name.as_str() {
                    "andOperator" => OpName::And,
                    "orOperator" => OpName::Or,
                    _ => OpName::Nor,
                };
                let mut children = Vec::new();
                for argument in &segment.args {
                    let sub_ops = parse_criteria(*argument, scope);
                    match sub_ops.len() {
                        0 => {
                            children.push(OpNode::new(
                                OpName::Malformed(segment.name.clone()),
                                line_of(*argument),
                            ));
                            break;
                        }
                        1 => children.extend(sub_ops),
                        // a sub-chain with several comparisons is an
                        // implicit conjunction
                        _ => children.push(OpNode::new(OpName::And, line).with_children(sub_ops)),
                    }
                }
                ops.push(OpNode::new(op, line).with_children(children));
            }
            name => match criteria_compare_op(name) {
                Some(op) => {
                    let Some(field) = current_field.clone() else {
                        ops.push(OpNode::new(OpName::Malformed(name.to_string()), line));
                        break;
                    };
                    let value = match op {
                        CompareOp::In | CompareOp::Nin => {
                            if segment.args.len() > 1 {
                                Value::List(
                                    segment
                                        .args
                                        .iter()
                                        .map(|argument| resolve(*argument, scope))
                                        .collect(),
                                )
                            } else {
                                match segment
                                    .args
                                    .first()
                                    .map(|argument| resolve(*argument, scope))
                                {
                                    Some(Value::List(elements)) => Value::List(elements),
                                    Some(Value::Unresolved(reason)) => Value::Unresolved(reason),
                                    // single vararg element becomes a one-element list
                                    Some(scalar) => Value::List(vec![scalar]),
                                    None => Value::List(Vec::new()),
                                }
                            }
                        }
                        _ => segment
                            .args
                            .first()
                            .map(|argument| resolve(*argument, scope))
                            .unwrap_or(Value::Boolean(true)),
                    };
                    ops.push(
                        OpNode::new(OpName::Compare(op), line)
                            .with_field(field)
                            .with_value(value),
                    );
                }
                None => ops.push(OpNode::new(OpName::Unknown(name.to_string()), line)),
            },
        }
    }

    ops
}

/// Parses a `new Update().set(...).inc(...)` or `Update.update(...)` chain
/// into update nodes in written order.
pub fn parse_update<'a>(node: Node<'a>, scope: &Scope<'a>) -> Vec<OpNode> {
    let Some(node) = unwrap_parens(node) else {
        return Vec::new();
    };
    match node.kind() {
        "identifier" => match scope.classify(node) {
            NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) => {
                parse_update(initializer, scope)
            }
            _ => Vec::new(),
        },
        "object_creation_expression" => Vec::new(),
        "method_invocation" => {
            let (_, segments) = decompose_chain(node, scope.source());
            let mut ops = Vec::new();
            for segment in &segments {
                let line = segment.line();
                let op = match segment.name.as_str() {
                    // Update.update(field, value) static factory
                    "update" | "set" => UpdateOp::Set,
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
                    "pop" => UpdateOp::Pop,
                    "currentDate" | "currentTimestamp" => UpdateOp::CurrentDate,
                    name => {
                        ops.push(OpNode::new(OpName::Unknown(name.to_string()), line));
                        continue;
                    }
                };
                if segment.args.is_empty() {
                    ops.push(OpNode::new(OpName::Malformed(segment.name.clone()), line));
                    break;
                }
                let mut op_node = OpNode::new(OpName::Update(op), line)
                    .with_field(field_ref(segment.args[0], scope));
                if let Some(value_argument) = segment.args.get(1) {
                    op_node = op_node.with_value(resolve(*value_argument, scope));
                }
                ops.push(op_node);
            }
            ops
        }
        _ => Vec::new(),
    }
}

/// Parses `Sort.by(...)` expressions, including `Order.asc/desc` arguments,
/// a leading `Direction` argument, trailing `.ascending()`/`.descending()`
/// flips and `.and(Sort)` concatenation. Returns `None` when the expression
/// is not a sort construct at all.
pub fn parse_sort<'a>(node: Node<'a>, scope: &Scope<'a>) -> Option<Vec<OpNode>> {
    let node = unwrap_parens(node)?;
    if node.kind() == "identifier" {
        return match scope.classify(node) {
            NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) => {
                parse_sort(initializer, scope)
            }
            _ => None,
        };
    }
    if node.kind() != "method_invocation" {
        return None;
    }

    let (base, segments) = decompose_chain(node, scope.source());
    let base_name = base.map(|base| node_text(base, scope.source()));
    let is_sort_chain = base_name.as_deref() == Some("Sort")
        || segments.iter().any(|segment| segment.name == "by");
    if !is_sort_chain {
        return None;
    }

    let mut keys: Vec<OpNode> = Vec::new();
    for segment in &segments {
        let line = segment.line();
        match segment.name.as_str() {
            "by" => keys.extend(parse_sort_by_arguments(segment, scope)),
            "ascending" | "descending" => {
                let direction = if segment.name == "ascending" {
                    SortDirection::Ascending
                } else {
                    SortDirection::Descending
                };
                for key in &mut keys {
                    if matches!(key.op, OpName::SortKey(_)) {
                        key.op = OpName::SortKey(direction);
                    }
                }
            }
            "and" => {
                if let Some(appended) = segment
                    .args
                    .first()
                    .and_then(|argument| parse_sort(*argument, scope))
                {
                    keys.extend(appended);
                } else {
                    keys.push(OpNode::new(OpName::Malformed("and".into()), line));
                }
            }
            name => keys.push(OpNode::new(OpName::Unknown(name.to_string()), line)),
        }
    }
    Some(keys)
}

fn parse_sort_by_arguments<'a>(segment: &CallSegment<'a>, scope: &Scope<'a>) -> Vec<OpNode> {
    let line = segment.line();
    let mut keys = Vec::new();
    let mut direction = SortDirection::Ascending;
    for (index, argument) in segment.args.iter().enumerate() {
        let Some(argument) = unwrap_parens(*argument) else {
            continue;
        };
        // Sort.by(Direction.DESC, "a", "b")
        if index == 0 {
            if let Some(explicit) = direction_argument(argument, scope.source()) {
                direction = explicit;
                continue;
            }
        }
        // Sort.by(Order.asc("a"), Order.desc("b"))
        if argument.kind() == "method_invocation" {
            let (order_base, order_segments) = decompose_chain(argument, scope.source());
            let order_receiver = order_base
                .map(|base| node_text(base, scope.source()))
                .unwrap_or_default();
            if order_receiver == "Order" || order_receiver == "Sort.Order" {
                for order in &order_segments {
                    let order_direction = match order.name.as_str() {
                        "asc" => SortDirection::Ascending,
                        "desc" => SortDirection::Descending,
                        _ => continue,
                    };
                    if let Some(field_argument) = order.args.first() {
                        keys.push(
                            OpNode::new(OpName::SortKey(order_direction), order.line())
                                .with_field(field_ref(*field_argument, scope)),
                        );
                    }
                }
                continue;
            }
        }
        keys.push(
            OpNode::new(OpName::SortKey(direction), line).with_field(field_ref(argument, scope)),
        );
    }
    keys
}

/// `Direction.ASC` / `Sort.Direction.DESC` leading argument.
fn direction_argument(node: Node<'_>, source: &str) -> Option<SortDirection> {
    if node.kind() != "field_access" {
        return None;
    }
    let text = node_text(node, source);
    if text.ends_with("Direction.ASC") || text.ends_with(".ASC") && text.contains("Direction") {
        Some(SortDirection::Ascending)
    } else if text.ends_with("Direction.DESC") || text.ends_with(".DESC") && text.contains("Direction")
    {
        Some(SortDirection::Descending)
    } else {
        None
    }
}

fn spring_accumulator_fn(name: &str) -> Option<AccumulatorFn> {
    Some(match name {
        "sum" => AccumulatorFn::Sum,
        "avg" => AccumulatorFn::Avg,
        "min" => AccumulatorFn::Min,
        "max" => AccumulatorFn::Max,
        "first" => AccumulatorFn::First,
        "last" => AccumulatorFn::Last,
        "push" => AccumulatorFn::Push,
        "addToSet" => AccumulatorFn::AddToSet,
        "count" => AccumulatorFn::Count,
        _ => return None,
    })
}

/// Parses `newAggregation(stage, stage, ...)` into stage nodes in argument
/// order.
fn parse_aggregation<'a>(chain: &mut ChainMatch, node: Node<'a>, scope: &Scope<'a>) {
    let Some(node) = unwrap_parens(node) else {
        return;
    };
    if node.kind() == "identifier" {
        if let NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) =
            scope.classify(node)
        {
            parse_aggregation(chain, initializer, scope);
        }
        return;
    }
    if node.kind() != "method_invocation" {
        return;
    }
    let (_, segments) = decompose_chain(node, scope.source());
    let Some(new_aggregation) = segments
        .iter()
        .find(|segment| segment.name == "newAggregation")
    else {
        return;
    };
    for argument in &new_aggregation.args {
        if argument.kind() == "class_literal" {
            continue; // typed newAggregation(Movie.class, ...) variant
        }
        chain.stages.push(parse_stage(*argument, scope));
    }
}

/// One stage expression inside `newAggregation(...)`. The stage kind is the
/// innermost call of the chain; suffix calls (`.as(...)`, accumulator
/// chains) refine it.
fn parse_stage<'a>(node: Node<'a>, scope: &Scope<'a>) -> OpNode {
    let Some(node) = unwrap_parens(node) else {
        return OpNode::new(OpName::Malformed("stage".into()), 0);
    };
    if node.kind() == "identifier" {
        if let NodeClass::LocalBinding(initializer) | NodeClass::ConstantField(initializer) =
            scope.classify(node)
        {
            return parse_stage(initializer, scope);
        }
        return OpNode::new(OpName::Malformed("stage".into()), line_of(node));
    }
    if node.kind() != "method_invocation" {
        return OpNode::new(OpName::Malformed("stage".into()), line_of(node));
    }

    let (_, segments) = decompose_chain(node, scope.source());
    let Some(head) = segments.first() else {
        return OpNode::new(OpName::Malformed("stage".into()), line_of(node));
    };
    let line = head.line();

    match head.name.as_str() {
        "match" => {
            let children = head
                .args
                .first()
                .map(|argument| parse_criteria(*argument, scope))
                .unwrap_or_default();
            OpNode::new(OpName::Stage(StageOp::Match), line).with_children(children)
        }
        "group" => parse_group_stage(&segments, scope),
        "project" => {
            let mut children: Vec<OpNode> = head
                .args
                .iter()
                .map(|argument| {
                    OpNode::new(OpName::Include, line).with_field(field_ref(*argument, scope))
                })
                .collect();
            for suffix in &segments[1..] {
                match suffix.name.as_str() {
                    "andExclude" => {
                        for argument in &suffix.args {
                            children.push(
                                OpNode::new(OpName::Exclude, suffix.line())
                                    .with_field(field_ref(*argument, scope)),
                            );
                        }
                    }
                    "andInclude" => {
                        for argument in &suffix.args {
                            children.push(
                                OpNode::new(OpName::Include, suffix.line())
                                    .with_field(field_ref(*argument, scope)),
                            );
                        }
                    }
                    name => children
                        .push(OpNode::new(OpName::Unknown(name.to_string()), suffix.line())),
                }
            }
            OpNode::new(OpName::Stage(StageOp::Project), line).with_children(children)
        }
        "sort" => {
            let children = parse_sort_stage_arguments(head, scope);
            OpNode::new(OpName::Stage(StageOp::Sort), line).with_children(children)
        }
        "unwind" => {
            let field = head
                .args
                .first()
                .map(|argument| field_ref(*argument, scope))
                .unwrap_or(FieldRef::Unresolved(
                    crate::shape::UnresolvedReason::Unsupported,
                ));
            OpNode::new(OpName::Stage(StageOp::Unwind), line).with_field(field)
        }
        "limit" | "skip" => {
            let op = if head.name == "limit" {
                StageOp::Limit
            } else {
                StageOp::Skip
            };
            let value = head
                .args
                .first()
                .map(|argument| resolve(*argument, scope))
                .unwrap_or(Value::Unresolved(crate::shape::UnresolvedReason::Unsupported));
            OpNode::new(OpName::Stage(op), line).with_value(value)
        }
        "count" => {
            let mut node = OpNode::new(OpName::Stage(StageOp::Count), line);
            // count().as("total")
            if let Some(as_segment) = segments.iter().find(|segment| segment.name == "as") {
                if let Some(output) = as_segment.args.first() {
                    node = node.with_field(field_ref(*output, scope));
                }
            }
            node
        }
        "addFields" => {
            // addFields().addField("x").withValue(v).build()
            let mut added = Vec::new();
            let mut pending_field: Option<FieldRef> = None;
            for suffix in &segments[1..] {
                match suffix.name.as_str() {
                    "addField" => {
                        pending_field = suffix
                            .args
                            .first()
                            .map(|argument| field_ref(*argument, scope));
                    }
                    "withValue" | "withValueOf" => {
                        if let (Some(field), Some(argument)) =
                            (pending_field.take(), suffix.args.first())
                        {
                            added.push(
                                OpNode::new(OpName::AddedField, suffix.line())
                                    .with_field(field)
                                    .with_value(resolve(*argument, scope)),
                            );
                        }
                    }
                    "build" => {}
                    name => added
                        .push(OpNode::new(OpName::Unknown(name.to_string()), suffix.line())),
                }
            }
            OpNode::new(OpName::Stage(StageOp::AddFields), line).with_children(added)
        }
        name => OpNode::new(OpName::Unknown(name.to_string()), line),
    }
}

/// `group("year").avg("imdb.rating").as("rating")`: the head call names the
/// key, then accumulator/`as` pairs follow in order.
fn parse_group_stage<'a>(segments: &[CallSegment<'a>], scope: &Scope<'a>) -> OpNode {
    let head = &segments[0];
    let line = head.line();
    let key = match head.args.len() {
        0 => Value::Null,
        1 => resolve(head.args[0], scope),
        _ => Value::List(
            head.args
                .iter()
                .map(|argument| resolve(*argument, scope))
                .collect(),
        ),
    };

    let mut accumulators = Vec::new();
    let mut pending: Option<(AccumulatorFn, Value, usize)> = None;
    for suffix in &segments[1..] {
        match suffix.name.as_str() {
            "as" => match pending.take() {
                Some((function, source, function_line)) => {
                    let output = suffix
                        .args
                        .first()
                        .map(|argument| field_ref(*argument, scope))
                        .unwrap_or(FieldRef::Unresolved(
                            crate::shape::UnresolvedReason::Unsupported,
                        ));
                    accumulators.push(
                        OpNode::new(OpName::Accumulate(function), function_line)
                            .with_field(output)
                            .with_value(source),
                    );
                }
                None => {
                    accumulators
                        .push(OpNode::new(OpName::Malformed("as".into()), suffix.line()));
                    break;
                }
            },
            name => match spring_accumulator_fn(name) {
                Some(function) => {
                    let source = suffix
                        .args
                        .first()
                        .map(|argument| resolve(*argument, scope))
                        .unwrap_or(Value::Null);
                    // bare field names become canonical field paths
                    let source = match source {
                        Value::String(path) if !path.starts_with('$') => {
                            Value::String(format!("${path}"))
                        }
                        other => other,
                    };
                    pending = Some((function, source, suffix.line()));
                }
                None => {
                    accumulators
                        .push(OpNode::new(OpName::Unknown(name.to_string()), suffix.line()));
                }
            },
        }
    }

    OpNode::new(OpName::Stage(StageOp::Group), line)
        .with_value(key)
        .with_children(accumulators)
}

/// `sort(Sort.by(...))` or `sort(Direction.DESC, "a", "b")`.
fn parse_sort_stage_arguments<'a>(head: &CallSegment<'a>, scope: &Scope<'a>) -> Vec<OpNode> {
    let line = head.line();
    let Some(first) = head.args.first() else {
        return Vec::new();
    };
    if let Some(direction) = unwrap_parens(*first)
        .and_then(|argument| direction_argument(argument, scope.source()))
    {
        return head.args[1..]
            .iter()
            .map(|argument| {
                OpNode::new(OpName::SortKey(direction), line)
                    .with_field(field_ref(*argument, scope))
            })
            .collect();
    }
    parse_sort(*first, scope).unwrap_or_else(|| {
        vec![OpNode::new(OpName::Malformed("sort".into()), line)]
    })
}
