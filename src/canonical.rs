use crate::diagnostics::{Diagnostic, ReasonCode, ShapeAnalysis};
use crate::matcher::{ChainMatch, Dialect, FieldRef, OpName, OpNode, StageOp};
use crate::shape::{
    Accumulator, AccumulatorFn, AddedField, Predicate, Projection, QueryShape, SortKey, Stage,
    UnresolvedReason, UpdateOp, UpdateOperation, Value,
};

/// What repeated sort call sites on one chain mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPolicy {
    /// Each site discards the previous one; the last call wins.
    Replace,
    /// Sites concatenate in call order.
    Append,
}

/// `FindIterable.sort` replaces any previously set sort document.
pub const DRIVER_SORT_POLICY: SortPolicy = SortPolicy::Replace;
/// `Query.with(Sort)` adds to the sort already held by the query.
pub const CRITERIA_SORT_POLICY: SortPolicy = SortPolicy::Append;

pub fn sort_policy(dialect: Dialect) -> SortPolicy {
    match dialect {
        Dialect::Driver => DRIVER_SORT_POLICY,
        Dialect::Criteria => CRITERIA_SORT_POLICY,
    }
}

/// Folds one matched chain into its canonical shape. Never fails: every
/// degradation the matcher recorded becomes a located diagnostic, and the
/// shape keeps a placeholder at the degraded position.
pub fn canonicalize(chain: ChainMatch) -> ShapeAnalysis {
    let mut folder = Folder::default();
    let mut shape = QueryShape::new(chain.namespace, chain.operation);

    shape.filter = folder.fold_filters(&chain.filters, "filter");

    for (index, node) in flatten_combines(chain.updates).iter().enumerate() {
        let path = format!("updates[{index}]");
        if let Some(update) = folder.fold_update(node, &path) {
            shape.updates.push(update);
        }
    }

    for (index, node) in chain.stages.iter().enumerate() {
        let path = format!("pipeline[{index}]");
        shape.pipeline.push(folder.fold_stage(node, &path));
    }

    match sort_policy(chain.dialect) {
        SortPolicy::Replace => {
            if let Some(last_site) = chain.sorts.last() {
                shape.sort = folder.fold_sort_keys(last_site, "sort");
            }
        }
        SortPolicy::Append => {
            for site in &chain.sorts {
                shape
                    .sort
                    .extend(folder.fold_sort_keys(site, "sort"));
            }
        }
    }

    for (index, node) in chain.projections.iter().enumerate() {
        let path = format!("projection[{index}]");
        match &node.op {
            OpName::Include => {
                if let Some(field) = folder.known_field(&node.field, &path, node.line) {
                    shape.projection.include.push(field);
                }
            }
            OpName::Exclude => {
                if let Some(field) = folder.known_field(&node.field, &path, node.line) {
                    shape.projection.exclude.push(field);
                }
            }
            OpName::Unknown(method) => folder.diag(
                path,
                ReasonCode::UnrecognizedOperation(method.clone()),
                node.line,
            ),
            OpName::Malformed(method) => {
                folder.diag(path, ReasonCode::MalformedArity(method.clone()), node.line)
            }
            _ => {}
        }
    }

    for node in &chain.unknowns {
        match &node.op {
            OpName::Malformed(method) => folder.diag(
                "chain".to_string(),
                ReasonCode::MalformedArity(method.clone()),
                node.line,
            ),
            OpName::Unknown(method) => folder.diag(
                "chain".to_string(),
                ReasonCode::UnrecognizedOperation(method.clone()),
                node.line,
            ),
            _ => {}
        }
    }

    ShapeAnalysis::new(shape, folder.diagnostics)
}

/// `Updates.combine(...)` carries no semantics of its own; its children take
/// its place, recursively, in written order.
fn flatten_combines(nodes: Vec<OpNode>) -> Vec<OpNode> {
    let mut flat = Vec::new();
    for node in nodes {
        if node.op == OpName::Combine {
            flat.extend(flatten_combines(node.children));
        } else {
            flat.push(node);
        }
    }
    flat
}

const UNRESOLVED_FIELD: &str = "<unresolved>";

#[derive(Default)]
struct Folder {
    diagnostics: Vec<Diagnostic>,
}

impl Folder {
    fn diag(&mut self, path: String, reason: ReasonCode, line: usize) {
        self.diagnostics.push(Diagnostic { path, reason, line });
    }

    /// Field name for positions that keep a placeholder when unresolved.
    fn field_name(&mut self, field: &Option<FieldRef>, path: &str, line: usize) -> String {
        match field {
            Some(FieldRef::Known(name)) => name.clone(),
            Some(FieldRef::Unresolved(reason)) => {
                self.diag(
                    format!("{path}.field"),
                    ReasonCode::UnresolvedValue(*reason),
                    line,
                );
                UNRESOLVED_FIELD.to_string()
            }
            None => {
                self.diag(
                    format!("{path}.field"),
                    ReasonCode::UnresolvedValue(UnresolvedReason::Unsupported),
                    line,
                );
                UNRESOLVED_FIELD.to_string()
            }
        }
    }

    /// Field name for list-of-names positions (sorts, projections) where a
    /// placeholder entry would be misleading; unresolved entries are dropped
    /// and only the diagnostic remains.
    fn known_field(&mut self, field: &Option<FieldRef>, path: &str, line: usize) -> Option<String> {
        match field {
            Some(FieldRef::Known(name)) => Some(name.clone()),
            Some(FieldRef::Unresolved(reason)) => {
                self.diag(
                    format!("{path}.field"),
                    ReasonCode::UnresolvedValue(*reason),
                    line,
                );
                None
            }
            None => None,
        }
    }

    fn note_value(&mut self, value: &Value, path: &str, line: usize) {
        match value {
            Value::Unresolved(reason) => {
                self.diag(path.to_string(), ReasonCode::UnresolvedValue(*reason), line)
            }
            Value::List(elements) => {
                for (index, element) in elements.iter().enumerate() {
                    self.note_value(element, &format!("{path}[{index}]"), line);
                }
            }
            _ => {}
        }
    }

    /// N top-level filter operations fold into one implicit conjunction in
    /// written order; a single operation stays bare.
    fn fold_filters(&mut self, nodes: &[OpNode], path: &str) -> Option<Predicate> {
        match nodes.len() {
            0 => None,
            1 => Some(self.fold_predicate(&nodes[0], path)),
            _ => {
                let children = nodes
                    .iter()
                    .enumerate()
                    .map(|(index, node)| {
                        self.fold_predicate(node, &format!("{path}.and[{index}]"))
                    })
                    .collect();
                Some(Predicate::And(children))
            }
        }
    }

    fn fold_predicate(&mut self, node: &OpNode, path: &str) -> Predicate {
        match &node.op {
            OpName::Compare(op) => {
                let field = self.field_name(&node.field, path, node.line);
                let value = node
                    .value
                    .clone()
                    .unwrap_or(Value::Unresolved(UnresolvedReason::Unsupported));
                self.note_value(&value, &format!("{path}.value"), node.line);
                Predicate::Comparison {
                    field,
                    op: *op,
                    value,
                }
            }
            OpName::And | OpName::Or | OpName::Nor => {
                let label = match &node.op {
                    OpName::And => "and",
                    OpName::Or => "or",
                    _ => "nor",
                };
                if node.children.is_empty() {
                    self.diag(
                        path.to_string(),
                        ReasonCode::MalformedArity(label.to_string()),
                        node.line,
                    );
                    return Predicate::Unknown {
                        method: label.to_string(),
                    };
                }
                let children: Vec<Predicate> = node
                    .children
                    .iter()
                    .enumerate()
                    .map(|(index, child)| {
                        self.fold_predicate(child, &format!("{path}.{label}[{index}]"))
                    })
                    .collect();
                match &node.op {
                    OpName::And => Predicate::And(children),
                    OpName::Or => Predicate::Or(children),
                    _ => Predicate::Nor(children),
                }
            }
            OpName::Not => match node.children.first() {
                Some(child) => Predicate::Not(Box::new(
                    self.fold_predicate(child, &format!("{path}.not")),
                )),
                None => {
                    self.diag(
                        path.to_string(),
                        ReasonCode::MalformedArity("not".to_string()),
                        node.line,
                    );
                    Predicate::Unknown {
                        method: "not".to_string(),
                    }
                }
            },
            OpName::Unknown(method) => {
                self.diag(
                    path.to_string(),
                    ReasonCode::UnrecognizedOperation(method.clone()),
                    node.line,
                );
                Predicate::Unknown {
                    method: method.clone(),
                }
            }
            OpName::Malformed(method) => {
                self.diag(
                    path.to_string(),
                    ReasonCode::MalformedArity(method.clone()),
                    node.line,
                );
                Predicate::Unknown {
                    method: method.clone(),
                }
            }
            _ => {
                self.diag(
                    path.to_string(),
                    ReasonCode::MalformedArity("filter".to_string()),
                    node.line,
                );
                Predicate::Unknown {
                    method: "filter".to_string(),
                }
            }
        }
    }

    fn fold_update(&mut self, node: &OpNode, path: &str) -> Option<UpdateOperation> {
        match &node.op {
            OpName::Update(op) => {
                let field = self.field_name(&node.field, path, node.line);
                let condition = node
                    .children
                    .first()
                    .map(|child| self.fold_predicate(child, &format!("{path}.condition")));
                let value = node.value.clone().unwrap_or(Value::Null);
                self.note_value(&value, &format!("{path}.value"), node.line);
                Some(UpdateOperation {
                    op: op.clone(),
                    field,
                    value,
                    condition,
                })
            }
            OpName::Unknown(method) => {
                self.diag(
                    path.to_string(),
                    ReasonCode::UnrecognizedOperation(method.clone()),
                    node.line,
                );
                let field = match &node.field {
                    Some(FieldRef::Known(name)) => name.clone(),
                    _ => String::new(),
                };
                Some(UpdateOperation {
                    op: UpdateOp::Unknown(method.clone()),
                    field,
                    value: node.value.clone().unwrap_or(Value::Null),
                    condition: None,
                })
            }
            OpName::Malformed(method) => {
                self.diag(
                    path.to_string(),
                    ReasonCode::MalformedArity(method.clone()),
                    node.line,
                );
                None
            }
            _ => None,
        }
    }

    fn fold_stage(&mut self, node: &OpNode, path: &str) -> Stage {
        match &node.op {
            OpName::Stage(StageOp::Match) => {
                if node.children.is_empty() {
                    Stage::Match(None)
                } else {
                    Stage::Match(self.fold_filters(&node.children, &format!("{path}.match")))
                }
            }
            OpName::Stage(StageOp::Group) => {
                let key = strip_field_path(node.value.clone().unwrap_or(Value::Null));
                self.note_value(&key, &format!("{path}.key"), node.line);
                let mut accumulators = Vec::new();
                for (index, child) in node.children.iter().enumerate() {
                    let child_path = format!("{path}.accumulators[{index}]");
                    match &child.op {
                        OpName::Accumulate(function) => {
                            let output = self.field_name(&child.field, &child_path, child.line);
                            let source = child.value.clone().unwrap_or(Value::Null);
                            self.note_value(&source, &format!("{child_path}.source"), child.line);
                            accumulators.push(Accumulator {
                                output,
                                function: function.clone(),
                                source,
                            });
                        }
                        OpName::Unknown(method) => {
                            self.diag(
                                child_path,
                                ReasonCode::UnrecognizedOperation(method.clone()),
                                child.line,
                            );
                            accumulators.push(Accumulator {
                                output: String::new(),
                                function: AccumulatorFn::Unknown(method.clone()),
                                source: Value::Null,
                            });
                        }
                        OpName::Malformed(method) => self.diag(
                            child_path,
                            ReasonCode::MalformedArity(method.clone()),
                            child.line,
                        ),
                        _ => {}
                    }
                }
                Stage::Group { key, accumulators }
            }
            OpName::Stage(StageOp::Project) => {
                let mut projection = Projection::default();
                for (index, child) in node.children.iter().enumerate() {
                    let child_path = format!("{path}.project[{index}]");
                    match &child.op {
                        OpName::Include => {
                            if let Some(field) =
                                self.known_field(&child.field, &child_path, child.line)
                            {
                                projection.include.push(field);
                            }
                        }
                        OpName::Exclude => {
                            if let Some(field) =
                                self.known_field(&child.field, &child_path, child.line)
                            {
                                projection.exclude.push(field);
                            }
                        }
                        OpName::Unknown(method) => self.diag(
                            child_path,
                            ReasonCode::UnrecognizedOperation(method.clone()),
                            child.line,
                        ),
                        OpName::Malformed(method) => self.diag(
                            child_path,
                            ReasonCode::MalformedArity(method.clone()),
                            child.line,
                        ),
                        _ => {}
                    }
                }
                Stage::Project(projection)
            }
            OpName::Stage(StageOp::Sort) => {
                Stage::Sort(self.fold_sort_keys(&node.children, &format!("{path}.sort")))
            }
            OpName::Stage(StageOp::Unwind) => {
                // both dialects accept field-path spellings; canonical form
                // is the bare field name
                let field = self.field_name(&node.field, path, node.line);
                let field = field
                    .strip_prefix('$')
                    .map(str::to_string)
                    .unwrap_or(field);
                let preserve_null_and_empty = match node.value {
                    Some(Value::Boolean(preserve)) => Some(preserve),
                    _ => None,
                };
                Stage::Unwind {
                    field,
                    preserve_null_and_empty,
                }
            }
            OpName::Stage(op @ (StageOp::Limit | StageOp::Skip)) => {
                let count = match &node.value {
                    Some(Value::Int(count)) => Some(*count),
                    Some(value) => {
                        self.note_value(value, path, node.line);
                        None
                    }
                    None => None,
                };
                match op {
                    StageOp::Limit => Stage::Limit(count),
                    _ => Stage::Skip(count),
                }
            }
            OpName::Stage(StageOp::Count) => {
                Stage::Count(self.known_field(&node.field, path, node.line))
            }
            OpName::Stage(StageOp::AddFields) => {
                let mut fields = Vec::new();
                for (index, child) in node.children.iter().enumerate() {
                    let child_path = format!("{path}.fields[{index}]");
                    match &child.op {
                        OpName::AddedField => {
                            let field = self.field_name(&child.field, &child_path, child.line);
                            let value = child.value.clone().unwrap_or(Value::Null);
                            self.note_value(&value, &format!("{child_path}.value"), child.line);
                            fields.push(AddedField { field, value });
                        }
                        OpName::Unknown(method) => self.diag(
                            child_path,
                            ReasonCode::UnrecognizedOperation(method.clone()),
                            child.line,
                        ),
                        OpName::Malformed(method) => self.diag(
                            child_path,
                            ReasonCode::MalformedArity(method.clone()),
                            child.line,
                        ),
                        _ => {}
                    }
                }
                Stage::AddFields(fields)
            }
            OpName::Unknown(method) => {
                self.diag(
                    path.to_string(),
                    ReasonCode::UnrecognizedOperation(method.clone()),
                    node.line,
                );
                Stage::Unknown {
                    method: method.clone(),
                }
            }
            OpName::Malformed(method) => {
                self.diag(
                    path.to_string(),
                    ReasonCode::MalformedArity(method.clone()),
                    node.line,
                );
                Stage::Unknown {
                    method: method.clone(),
                }
            }
            _ => {
                self.diag(
                    path.to_string(),
                    ReasonCode::MalformedArity("stage".to_string()),
                    node.line,
                );
                Stage::Unknown {
                    method: "stage".to_string(),
                }
            }
        }
    }

    fn fold_sort_keys(&mut self, nodes: &[OpNode], path: &str) -> Vec<SortKey> {
        let mut keys = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            let key_path = format!("{path}[{index}]");
            match &node.op {
                OpName::SortKey(direction) => {
                    if let Some(field) = self.known_field(&node.field, &key_path, node.line) {
                        keys.push(SortKey {
                            field,
                            direction: *direction,
                        });
                    }
                }
                OpName::Unknown(method) => self.diag(
                    key_path,
                    ReasonCode::UnrecognizedOperation(method.clone()),
                    node.line,
                ),
                OpName::Malformed(method) => self.diag(
                    key_path,
                    ReasonCode::MalformedArity(method.clone()),
                    node.line,
                ),
                _ => {}
            }
        }
        keys
    }
}

/// Group keys written as field paths (`"$year"`) lose the sigil; the
/// canonical key names the field itself.
fn strip_field_path(value: Value) -> Value {
    match value {
        Value::String(key) => Value::String(key.strip_prefix('$').map(str::to_string).unwrap_or(key)),
        Value::List(elements) => Value::List(elements.into_iter().map(strip_field_path).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{Dialect, FieldRef, OpName, OpNode};
    use crate::shape::{CompareOp, Namespace, OperationKind, SortDirection};

    fn comparison(field: &str, op: CompareOp, value: Value) -> OpNode {
        OpNode::new(OpName::Compare(op), 1)
            .with_field(FieldRef::Known(field.into()))
            .with_value(value)
    }

    fn chain(dialect: Dialect, operation: OperationKind) -> ChainMatch {
        ChainMatch::new(dialect, operation, Namespace::unknown())
    }

    #[test]
    fn single_filter_stays_bare() {
        let mut matched = chain(Dialect::Driver, OperationKind::Find);
        matched
            .filters
            .push(comparison("rated", CompareOp::Eq, Value::String("PG".into())));
        let analysis = canonicalize(matched);
        assert!(analysis.is_clean());
        assert_eq!(
            analysis.shape().filter,
            Some(Predicate::Comparison {
                field: "rated".into(),
                op: CompareOp::Eq,
                value: Value::String("PG".into()),
            })
        );
    }

    #[test]
    fn multiple_filters_fold_to_implicit_and_in_order() {
        let mut matched = chain(Dialect::Driver, OperationKind::Find);
        matched
            .filters
            .push(comparison("year", CompareOp::Gt, Value::Int(2000)));
        matched
            .filters
            .push(comparison("rated", CompareOp::Eq, Value::String("PG".into())));
        let analysis = canonicalize(matched);
        let Some(Predicate::And(children)) = analysis.shape().filter.clone() else {
            panic!("expected implicit And");
        };
        assert_eq!(children.len(), 2);
        assert!(
            matches!(&children[0], Predicate::Comparison { field, .. } if field == "year")
        );
        assert!(
            matches!(&children[1], Predicate::Comparison { field, .. } if field == "rated")
        );
    }

    #[test]
    fn combine_flattens_in_written_order() {
        let mut matched = chain(Dialect::Driver, OperationKind::UpdateMany);
        let set = OpNode::new(OpName::Update(UpdateOp::Set), 1)
            .with_field(FieldRef::Known("rated".into()))
            .with_value(Value::String("PG".into()));
        let inc = OpNode::new(OpName::Update(UpdateOp::Inc), 2)
            .with_field(FieldRef::Known("views".into()))
            .with_value(Value::Int(1));
        matched
            .updates
            .push(OpNode::new(OpName::Combine, 1).with_children(vec![set, inc]));
        let analysis = canonicalize(matched);
        let updates = &analysis.shape().updates;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].op, UpdateOp::Set);
        assert_eq!(updates[1].op, UpdateOp::Inc);
    }

    #[test]
    fn driver_sorts_replace_and_criteria_sorts_append() {
        let first = vec![
            OpNode::new(OpName::SortKey(SortDirection::Ascending), 1)
                .with_field(FieldRef::Known("year".into())),
        ];
        let second = vec![
            OpNode::new(OpName::SortKey(SortDirection::Descending), 2)
                .with_field(FieldRef::Known("title".into())),
        ];

        let mut driver = chain(Dialect::Driver, OperationKind::Find);
        driver.sorts = vec![first.clone(), second.clone()];
        let driver_sort = canonicalize(driver).shape().sort.clone();
        assert_eq!(driver_sort, vec![SortKey::desc("title")]);

        let mut criteria = chain(Dialect::Criteria, OperationKind::Find);
        criteria.sorts = vec![first, second];
        let criteria_sort = canonicalize(criteria).shape().sort.clone();
        assert_eq!(
            criteria_sort,
            vec![SortKey::asc("year"), SortKey::desc("title")]
        );
    }

    #[test]
    fn unresolved_comparison_value_is_embedded_and_reported() {
        let mut matched = chain(Dialect::Driver, OperationKind::Find);
        matched.filters.push(comparison(
            "rated",
            CompareOp::Eq,
            Value::Unresolved(UnresolvedReason::Parameter),
        ));
        let analysis = canonicalize(matched);
        assert!(matches!(
            analysis.shape().filter,
            Some(Predicate::Comparison {
                value: Value::Unresolved(UnresolvedReason::Parameter),
                ..
            })
        ));
        assert_eq!(analysis.diagnostics().len(), 1);
        assert_eq!(analysis.diagnostics()[0].path, "filter.value");
        assert_eq!(
            analysis.diagnostics()[0].reason,
            ReasonCode::UnresolvedValue(UnresolvedReason::Parameter)
        );
    }

    #[test]
    fn nested_diagnostic_paths_index_into_combinators() {
        let mut matched = chain(Dialect::Driver, OperationKind::Find);
        let and = OpNode::new(OpName::And, 1).with_children(vec![
            comparison("year", CompareOp::Gt, Value::Int(2000)),
            comparison(
                "rated",
                CompareOp::Eq,
                Value::Unresolved(UnresolvedReason::MethodCall),
            ),
        ]);
        matched.filters.push(and);
        let analysis = canonicalize(matched);
        assert_eq!(analysis.diagnostics().len(), 1);
        assert_eq!(analysis.diagnostics()[0].path, "filter.and[1].value");
    }

    #[test]
    fn group_key_loses_field_path_sigil() {
        let mut matched = chain(Dialect::Driver, OperationKind::Aggregate);
        matched.stages.push(
            OpNode::new(OpName::Stage(StageOp::Group), 1)
                .with_value(Value::String("$year".into())),
        );
        let analysis = canonicalize(matched);
        assert_eq!(
            analysis.shape().pipeline,
            vec![Stage::Group {
                key: Value::String("year".into()),
                accumulators: Vec::new(),
            }]
        );
    }

    #[test]
    fn malformed_combinator_element_keeps_prior_siblings() {
        let mut matched = chain(Dialect::Driver, OperationKind::Find);
        let and = OpNode::new(OpName::And, 1).with_children(vec![
            comparison("year", CompareOp::Gt, Value::Int(2000)),
            OpNode::new(OpName::Malformed("and".into()), 2),
        ]);
        matched.filters.push(and);
        let analysis = canonicalize(matched);
        let Some(Predicate::And(children)) = analysis.shape().filter.clone() else {
            panic!("expected And");
        };
        assert_eq!(children.len(), 2);
        assert!(matches!(&children[0], Predicate::Comparison { .. }));
        assert!(matches!(&children[1], Predicate::Unknown { .. }));
        assert_eq!(
            analysis.diagnostics(),
            &[Diagnostic {
                path: "filter.and[1]".into(),
                reason: ReasonCode::MalformedArity("and".into()),
                line: 2,
            }]
        );
    }

    #[test]
    fn unknown_stage_is_embedded_and_reported() {
        let mut matched = chain(Dialect::Driver, OperationKind::Aggregate);
        matched
            .stages
            .push(OpNode::new(OpName::Stage(StageOp::Limit), 1).with_value(Value::Int(10)));
        matched
            .stages
            .push(OpNode::new(OpName::Unknown("facet".into()), 2));
        let analysis = canonicalize(matched);
        assert_eq!(analysis.shape().pipeline.len(), 2);
        assert_eq!(analysis.shape().pipeline[0], Stage::Limit(Some(10)));
        assert_eq!(
            analysis.shape().pipeline[1],
            Stage::Unknown {
                method: "facet".into()
            }
        );
        assert_eq!(analysis.diagnostics()[0].path, "pipeline[1]");
    }
}
