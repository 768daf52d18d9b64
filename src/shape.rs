use anyhow::{Result, bail};
use serde::Serialize;

/// Canonical, dialect-agnostic representation of one recognized database
/// operation. Built once per call chain by the canonicalizer and immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryShape {
    pub namespace: Namespace,
    pub operation: OperationKind,
    pub filter: Option<Predicate>,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub updates: Vec<UpdateOperation>,
    pub pipeline: Vec<Stage>,
}

impl QueryShape {
    pub fn new(namespace: Namespace, operation: OperationKind) -> Self {
        QueryShape {
            namespace,
            operation,
            filter: None,
            sort: Vec::new(),
            projection: Projection::default(),
            updates: Vec::new(),
            pipeline: Vec::new(),
        }
    }

    /// Structural invariants that hold for every shape the canonicalizer
    /// emits. A violation here is a bug in the folding logic, not in the
    /// analyzed source.
    pub fn validate(&self) -> Result<()> {
        self.projection.validate()?;
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        for stage in &self.pipeline {
            match stage {
                Stage::Match(Some(predicate)) => predicate.validate()?,
                Stage::Project(projection) => projection.validate()?,
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Namespace {
    pub database: NamePart,
    pub collection: NamePart,
}

impl Namespace {
    pub fn unknown() -> Self {
        Namespace {
            database: NamePart::Unknown,
            collection: NamePart::Unknown,
        }
    }
}

/// A database or collection name is either a string resolved at analysis time
/// or unknown (a runtime expression, e.g. a method parameter).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NamePart {
    Known(String),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationKind {
    Find,
    FindOne,
    Aggregate,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    Count,
    Distinct,
    InsertOne,
    InsertMany,
    ReplaceOne,
    FindOneAndUpdate,
    FindOneAndDelete,
    Unknown,
}

/// Recursive boolean expression tree over field comparisons. Children order
/// is preserved because compound filter ordering affects index field order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Predicate {
    Comparison {
        field: String,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Nor(Vec<Predicate>),
    Not(Box<Predicate>),
    Unknown {
        method: String,
    },
}

impl Predicate {
    fn validate(&self) -> Result<()> {
        match self {
            Predicate::And(children) | Predicate::Or(children) | Predicate::Nor(children) => {
                if children.is_empty() {
                    bail!("empty combinator in predicate tree");
                }
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
            Predicate::Not(child) => child.validate(),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
    Regex,
    All,
    Size,
    ElemMatch,
}

/// Typed value attached to every leaf of a shape. Type information is
/// load-bearing for downstream index-type inference, so a leaf never carries
/// a raw un-typed literal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    String(String),
    Int(i64),
    Double(f64),
    Boolean(bool),
    Date,
    /// ObjectId/UUID-like opaque identifier; the payload is kept when the
    /// source spells it out as a literal.
    Identifier(Option<String>),
    Enum {
        type_name: String,
        member: String,
    },
    List(Vec<Value>),
    Null,
    Unresolved(UnresolvedReason),
}

impl Value {
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Value::Unresolved(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnresolvedReason {
    Parameter,
    MutableLocal,
    MethodCall,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Projection {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Projection {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    fn validate(&self) -> Result<()> {
        for field in &self.include {
            if self.exclude.contains(field) {
                bail!("field {field} both included and excluded in projection");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOperation {
    pub op: UpdateOp,
    pub field: String,
    pub value: Value,
    /// `pull` may take a filter instead of a plain value.
    pub condition: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UpdateOp {
    Set,
    Unset,
    Inc,
    Mul,
    Rename,
    Min,
    Max,
    Push,
    AddToSet,
    Pull,
    PullAll,
    Pop,
    CurrentDate,
    Unknown(String),
}

/// Aggregation pipeline stage. Order within `QueryShape::pipeline` is
/// semantically significant and matches the written source order exactly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stage {
    Match(Option<Predicate>),
    Group {
        key: Value,
        accumulators: Vec<Accumulator>,
    },
    Project(Projection),
    Sort(Vec<SortKey>),
    Unwind {
        field: String,
        preserve_null_and_empty: Option<bool>,
    },
    Limit(Option<i64>),
    Skip(Option<i64>),
    Count(Option<String>),
    AddFields(Vec<AddedField>),
    Unknown {
        method: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddedField {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accumulator {
    pub output: String,
    pub function: AccumulatorFn,
    /// A field-path source is a `Value::String` starting with `$`.
    pub source: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AccumulatorFn {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
    Top,
    TopN,
    Bottom,
    BottomN,
    Count,
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_rejects_overlapping_fields() {
        let projection = Projection {
            include: vec!["year".into(), "title".into()],
            exclude: vec!["title".into()],
        };
        assert!(projection.validate().is_err());
    }

    #[test]
    fn empty_combinator_is_invalid() {
        let mut shape = QueryShape::new(Namespace::unknown(), OperationKind::Find);
        shape.filter = Some(Predicate::And(Vec::new()));
        assert!(shape.validate().is_err());
    }

    #[test]
    fn well_formed_shape_validates() {
        let mut shape = QueryShape::new(Namespace::unknown(), OperationKind::Find);
        shape.filter = Some(Predicate::And(vec![
            Predicate::Comparison {
                field: "rated".into(),
                op: CompareOp::Eq,
                value: Value::String("PG-13".into()),
            },
            Predicate::Comparison {
                field: "year".into(),
                op: CompareOp::Gt,
                value: Value::Int(2000),
            },
        ]));
        shape.sort.push(SortKey::asc("year"));
        assert!(shape.validate().is_ok());
    }
}
