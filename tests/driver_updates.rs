use qshape::QueryAnalyzer;
use qshape::diagnostics::{ReasonCode, ShapeAnalysis};
use qshape::shape::{CompareOp, OperationKind, Predicate, UpdateOp, Value};

fn analyze(source: &str) -> Vec<ShapeAnalysis> {
    let mut analyzer = QueryAnalyzer::new().unwrap();
    analyzer.analyze(source).unwrap()
}

#[test]
fn combine_flattens_into_ordered_update_operations() {
    let source = r#"
class MoviesDao {
    void reclassify(MongoCollection<Document> collection) {
        collection.updateMany(
            Filters.eq("year", 1999),
            Updates.combine(
                Updates.set("rated", "PG"),
                Updates.inc("metacritic", 5),
                Updates.unset("tomatoes.viewer")
            ));
    }
}
"#;
    let analyses = analyze(source);
    assert_eq!(analyses.len(), 1);
    let analysis = &analyses[0];
    assert!(analysis.is_clean());

    let shape = analysis.shape();
    assert_eq!(shape.operation, OperationKind::UpdateMany);
    assert_eq!(
        shape.filter,
        Some(Predicate::Comparison {
            field: "year".into(),
            op: CompareOp::Eq,
            value: Value::Int(1999),
        })
    );
    let ops: Vec<_> = shape
        .updates
        .iter()
        .map(|update| (&update.op, update.field.as_str()))
        .collect();
    assert_eq!(
        ops,
        vec![
            (&UpdateOp::Set, "rated"),
            (&UpdateOp::Inc, "metacritic"),
            (&UpdateOp::Unset, "tomatoes.viewer"),
        ]
    );
    assert_eq!(shape.updates[0].value, Value::String("PG".into()));
    assert_eq!(shape.updates[1].value, Value::Int(5));
}

#[test]
fn pull_with_filter_becomes_a_condition() {
    let source = r#"
class MoviesDao {
    void prune(MongoCollection<Document> collection) {
        collection.updateOne(
            Filters.eq("title", "Alien"),
            Updates.pull("genres", Filters.eq("name", "Horror")));
    }
}
"#;
    let analyses = analyze(source);
    let update = &analyses[0].shape().updates[0];
    assert_eq!(update.op, UpdateOp::Pull);
    assert_eq!(update.field, "genres");
    assert_eq!(
        update.condition,
        Some(Predicate::Comparison {
            field: "name".into(),
            op: CompareOp::Eq,
            value: Value::String("Horror".into()),
        })
    );
}

#[test]
fn push_appends_a_value_to_an_array_field() {
    let source = r#"
class MoviesDao {
    void tag(MongoCollection<Document> collection) {
        collection.updateOne(
            Filters.eq("title", "Alien"),
            Updates.combine(Updates.push("genres", "Sci-Fi"), Updates.addToSet("tags", "classic")));
    }
}
"#;
    let analyses = analyze(source);
    let analysis = &analyses[0];
    assert!(analysis.is_clean());
    let updates = &analysis.shape().updates;
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].op, UpdateOp::Push);
    assert_eq!(updates[0].field, "genres");
    assert_eq!(updates[0].value, Value::String("Sci-Fi".into()));
    assert_eq!(updates[1].op, UpdateOp::AddToSet);
}

#[test]
fn pop_variants_carry_their_direction() {
    let source = r#"
class MoviesDao {
    void trim(MongoCollection<Document> collection) {
        collection.updateOne(Filters.eq("title", "Alien"), Updates.popFirst("comments"));
        collection.updateOne(Filters.eq("title", "Alien"), Updates.popLast("comments"));
    }
}
"#;
    let analyses = analyze(source);
    assert_eq!(analyses.len(), 2);
    assert_eq!(analyses[0].shape().updates[0].op, UpdateOp::Pop);
    assert_eq!(analyses[0].shape().updates[0].value, Value::Int(-1));
    assert_eq!(analyses[1].shape().updates[0].value, Value::Int(1));
}

#[test]
fn update_bound_through_a_local_resolves() {
    let source = r#"
class MoviesDao {
    void touch(MongoCollection<Document> collection) {
        Bson change = Updates.currentDate("lastUpdated");
        collection.findOneAndUpdate(Filters.eq("title", "Alien"), change);
    }
}
"#;
    let analyses = analyze(source);
    let shape = analyses[0].shape();
    assert_eq!(shape.operation, OperationKind::FindOneAndUpdate);
    assert_eq!(shape.updates[0].op, UpdateOp::CurrentDate);
    assert_eq!(shape.updates[0].field, "lastUpdated");
}

#[test]
fn wrong_arity_halts_with_a_diagnostic_and_keeps_prior_operations() {
    let source = r#"
class MoviesDao {
    void broken(MongoCollection<Document> collection) {
        collection.updateMany(
            Filters.eq("type", "movie"),
            Updates.combine(
                Updates.set("reviewed", true),
                Updates.inc("views")
            ));
    }
}
"#;
    let analyses = analyze(source);
    let analysis = &analyses[0];
    assert_eq!(analysis.shape().updates.len(), 1);
    assert_eq!(analysis.shape().updates[0].op, UpdateOp::Set);
    assert_eq!(
        analysis.diagnostics(),
        &[qshape::diagnostics::Diagnostic {
            path: "updates[1]".into(),
            reason: ReasonCode::MalformedArity("inc".into()),
            line: 8,
        }]
    );
}

#[test]
fn unknown_update_method_is_embedded_and_matching_continues() {
    let source = r#"
class MoviesDao {
    void bitwise(MongoCollection<Document> collection) {
        collection.updateOne(
            Filters.eq("title", "Alien"),
            Updates.combine(Updates.bitwiseAnd("flags", 6), Updates.set("rated", "R")));
    }
}
"#;
    let analyses = analyze(source);
    let analysis = &analyses[0];
    assert_eq!(analysis.shape().updates.len(), 2);
    assert_eq!(
        analysis.shape().updates[0].op,
        UpdateOp::Unknown("bitwiseAnd".into())
    );
    assert_eq!(analysis.shape().updates[1].op, UpdateOp::Set);
    assert!(matches!(
        &analysis.diagnostics()[0].reason,
        ReasonCode::UnrecognizedOperation(method) if method == "bitwiseAnd"
    ));
}

#[test]
fn delete_operations_carry_only_a_filter() {
    let source = r#"
class MoviesDao {
    void cleanup(MongoCollection<Document> collection) {
        collection.deleteMany(Filters.lt("year", 1920));
    }
}
"#;
    let analyses = analyze(source);
    let shape = analyses[0].shape();
    assert_eq!(shape.operation, OperationKind::DeleteMany);
    assert!(shape.updates.is_empty());
    assert!(matches!(&shape.filter, Some(Predicate::Comparison { field, .. }) if field == "year"));
}
