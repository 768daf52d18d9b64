pub mod analyzer;
pub mod canonical;
pub mod cli;
pub mod diagnostics;
pub mod matcher;
pub mod resolver;
pub mod scope;
pub mod shape;

pub use analyzer::QueryAnalyzer;
pub use diagnostics::ShapeAnalysis;
pub use shape::QueryShape;
