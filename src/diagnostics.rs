use crate::shape::{QueryShape, UnresolvedReason};
use serde::Serialize;

/// One recognition or resolution failure, located within the shape it was
/// embedded into. The engine never fails an analysis outright; everything a
/// consumer needs to know about degraded input lives here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Path within the shape, e.g. `filter.and[1].value` or `pipeline[2]`.
    pub path: String,
    pub reason: ReasonCode,
    /// 1-based source line of the offending expression.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReasonCode {
    UnresolvedValue(UnresolvedReason),
    UnrecognizedOperation(String),
    MalformedArity(String),
}

/// Read-only pairing of a canonical shape with the diagnostics gathered while
/// building it. Rule evaluation on top of this belongs to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeAnalysis {
    shape: QueryShape,
    diagnostics: Vec<Diagnostic>,
}

impl ShapeAnalysis {
    pub fn new(shape: QueryShape, diagnostics: Vec<Diagnostic>) -> Self {
        ShapeAnalysis { shape, diagnostics }
    }

    pub fn shape(&self) -> &QueryShape {
        &self.shape
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}
