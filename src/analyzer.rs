use crate::canonical::canonicalize;
use crate::diagnostics::ShapeAnalysis;
use crate::matcher::{criteria, driver};
use crate::scope::Scope;
use anyhow::{Context, Result};
use tree_sitter::{Node, Parser};

/// Front door of the engine: owns the parser and runs the full
/// recognize-then-canonicalize pass over one source file at a time.
pub struct QueryAnalyzer {
    parser: Parser,
}

impl QueryAnalyzer {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_java::LANGUAGE;
        parser
            .set_language(&language.into())
            .context("load java grammar")?;
        Ok(QueryAnalyzer { parser })
    }

    /// Returns one analysis per recognized query chain, in source order.
    /// Unrecognizable statements are skipped silently; degraded chains come
    /// back with diagnostics attached instead of failing the pass.
    pub fn analyze(&mut self, source: &str) -> Result<Vec<ShapeAnalysis>> {
        let tree = self.parser.parse(source, None).context("parse source")?;
        Ok(analyze_tree(tree.root_node(), source))
    }
}

pub fn analyze_tree(root: Node<'_>, source: &str) -> Vec<ShapeAnalysis> {
    let scope = Scope::build(root, source);
    let mut analyses = Vec::new();
    walk(root, &scope, &mut analyses);
    analyses
}

fn walk<'a>(node: Node<'a>, scope: &Scope<'a>, out: &mut Vec<ShapeAnalysis>) {
    if node.kind() == "method_invocation" {
        // Criteria goes first: template.find(query(...), ...) carries a
        // method named find that the driver matcher also accepts.
        let matched = criteria::match_chain(node, scope)
            .or_else(|| driver::match_chain(node, scope));
        if let Some(matched) = matched {
            out.push(canonicalize(matched));
            // nested invocations belong to the chain just matched
            return;
        }
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk(child, scope, out);
    }
}
