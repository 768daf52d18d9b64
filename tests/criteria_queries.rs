use qshape::QueryAnalyzer;
use qshape::diagnostics::{ReasonCode, ShapeAnalysis};
use qshape::shape::{
    Accumulator, AccumulatorFn, CompareOp, NamePart, OperationKind, Predicate, SortKey, Stage,
    UnresolvedReason, UpdateOp, Value,
};

fn analyze(source: &str) -> Vec<ShapeAnalysis> {
    let mut analyzer = QueryAnalyzer::new().unwrap();
    analyzer.analyze(source).unwrap()
}

#[test]
fn where_chain_folds_to_an_implicit_and() {
    let source = r#"
@Document("movies")
class Movie {}

class MovieRepository {
    private final MongoTemplate template;

    List<Movie> recent() {
        return template.find(
            query(where("year").gt(2000).and("rated").is("PG-13")),
            Movie.class);
    }
}
"#;
    let analyses = analyze(source);
    assert_eq!(analyses.len(), 1);
    let analysis = &analyses[0];
    assert!(analysis.is_clean());

    let shape = analysis.shape();
    assert_eq!(shape.operation, OperationKind::Find);
    assert_eq!(shape.namespace.database, NamePart::Unknown);
    assert_eq!(shape.namespace.collection, NamePart::Known("movies".into()));
    assert_eq!(
        shape.filter,
        Some(Predicate::And(vec![
            Predicate::Comparison {
                field: "year".into(),
                op: CompareOp::Gt,
                value: Value::Int(2000),
            },
            Predicate::Comparison {
                field: "rated".into(),
                op: CompareOp::Eq,
                value: Value::String("PG-13".into()),
            },
        ]))
    );
}

#[test]
fn or_operator_recurses_into_sub_criteria() {
    let source = r#"
class MovieRepository {
    private final MongoTemplate template;

    List<Movie> either() {
        return template.find(
            query(new Criteria().orOperator(
                where("rated").is("G"),
                where("year").lt(1950).and("type").is("movie"))),
            Movie.class);
    }
}
"#;
    let analyses = analyze(source);
    let Some(Predicate::Or(children)) = analyses[0].shape().filter.clone() else {
        panic!("expected Or, got {:?}", analyses[0].shape().filter);
    };
    assert_eq!(children.len(), 2);
    assert!(matches!(&children[0], Predicate::Comparison { field, .. } if field == "rated"));
    // the multi-comparison branch becomes a nested conjunction
    let Predicate::And(branch) = &children[1] else {
        panic!("expected nested And");
    };
    assert_eq!(branch.len(), 2);
}

#[test]
fn repeated_with_sorts_append_in_call_order() {
    let source = r#"
class MovieRepository {
    private final MongoTemplate template;

    List<Movie> sorted() {
        Query q = query(where("year").gt(2000))
            .with(Sort.by("year"))
            .with(Sort.by("title").descending());
        return template.find(q, Movie.class);
    }
}
"#;
    let analyses = analyze(source);
    assert_eq!(
        analyses[0].shape().sort,
        vec![SortKey::asc("year"), SortKey::desc("title")]
    );
}

#[test]
fn sort_order_and_direction_forms() {
    let source = r#"
class MovieRepository {
    private final MongoTemplate template;

    List<Movie> ordered() {
        return template.find(
            query(where("type").is("movie"))
                .with(Sort.by(Sort.Direction.DESC, "imdb.rating", "year")),
            Movie.class);
    }

    List<Movie> mixed() {
        return template.find(
            query(where("type").is("movie"))
                .with(Sort.by(Order.asc("year"), Order.desc("title"))),
            Movie.class);
    }
}
"#;
    let analyses = analyze(source);
    assert_eq!(
        analyses[0].shape().sort,
        vec![SortKey::desc("imdb.rating"), SortKey::desc("year")]
    );
    assert_eq!(
        analyses[1].shape().sort,
        vec![SortKey::asc("year"), SortKey::desc("title")]
    );
}

#[test]
fn update_multi_with_update_chain() {
    let source = r#"
class MovieRepository {
    private final MongoTemplate template;

    void reclassify() {
        template.updateMulti(
            query(where("year").lt(1950)),
            new Update().set("classic", true).inc("score", 10).push("tags", "restored"),
            Movie.class);
    }
}
"#;
    let analyses = analyze(source);
    let shape = analyses[0].shape();
    assert_eq!(shape.operation, OperationKind::UpdateMany);
    assert_eq!(shape.updates.len(), 3);
    assert_eq!(shape.updates[0].field, "classic");
    assert_eq!(shape.updates[0].value, Value::Boolean(true));
    assert_eq!(shape.updates[1].field, "score");
    assert_eq!(shape.updates[1].value, Value::Int(10));
    assert_eq!(shape.updates[2].op, UpdateOp::Push);
    assert_eq!(shape.updates[2].value, Value::String("restored".into()));
}

#[test]
fn find_by_id_targets_id_with_the_argument() {
    let source = r#"
class MovieRepository {
    private final MongoTemplate template;

    Movie one(String movieId) {
        return template.findById(movieId, Movie.class);
    }
}
"#;
    let analyses = analyze(source);
    let analysis = &analyses[0];
    assert_eq!(analysis.shape().operation, OperationKind::FindOne);
    assert_eq!(
        analysis.shape().filter,
        Some(Predicate::Comparison {
            field: "_id".into(),
            op: CompareOp::Eq,
            value: Value::Unresolved(UnresolvedReason::Parameter),
        })
    );
    assert_eq!(
        analysis.diagnostics()[0].reason,
        ReasonCode::UnresolvedValue(UnresolvedReason::Parameter)
    );
}

#[test]
fn aggregation_with_grouping_and_named_collection() {
    let source = r#"
class MovieRepository {
    private final MongoTemplate template;

    void ratings() {
        template.aggregate(
            newAggregation(
                match(where("rated").is("PG")),
                group("year").avg("imdb.rating").as("avgRating"),
                sort(Sort.by(Sort.Direction.DESC, "avgRating")),
                limit(5L)),
            "movies", RatingRow.class);
    }
}
"#;
    let analyses = analyze(source);
    let analysis = &analyses[0];
    assert!(analysis.is_clean());

    let shape = analysis.shape();
    assert_eq!(shape.operation, OperationKind::Aggregate);
    assert_eq!(shape.namespace.collection, NamePart::Known("movies".into()));
    assert_eq!(
        shape.pipeline,
        vec![
            Stage::Match(Some(Predicate::Comparison {
                field: "rated".into(),
                op: CompareOp::Eq,
                value: Value::String("PG".into()),
            })),
            Stage::Group {
                key: Value::String("year".into()),
                accumulators: vec![Accumulator {
                    output: "avgRating".into(),
                    function: AccumulatorFn::Avg,
                    source: Value::String("$imdb.rating".into()),
                }],
            },
            Stage::Sort(vec![SortKey::desc("avgRating")]),
            Stage::Limit(Some(5)),
        ]
    );
}

#[test]
fn aggregation_unwind_skip_and_count() {
    let source = r#"
class MovieRepository {
    private final MongoTemplate template;

    void genreTotals() {
        template.aggregate(
            newAggregation(
                unwind("genres"),
                skip(2L),
                count().as("total")),
            "movies", Row.class);
    }
}
"#;
    let analyses = analyze(source);
    let analysis = &analyses[0];
    assert!(analysis.is_clean());
    assert_eq!(
        analysis.shape().pipeline,
        vec![
            Stage::Unwind {
                field: "genres".into(),
                preserve_null_and_empty: None,
            },
            Stage::Skip(Some(2)),
            Stage::Count(Some("total".into())),
        ]
    );
}

#[test]
fn command_vocabulary_maps_to_operations() {
    let source = r#"
class MovieRepository {
    private final MongoTemplate template;

    void commands() {
        template.remove(query(where("year").lt(1900)), Movie.class);
        template.count(query(where("type").is("movie")), Movie.class);
        template.exists(query(where("title").is("Alien")), Movie.class);
        template.findAndRemove(query(where("title").is("Alien")), Movie.class);
        template.upsert(query(where("title").is("Alien")), new Update().set("seen", true), Movie.class);
    }
}
"#;
    let analyses = analyze(source);
    let operations: Vec<_> = analyses
        .iter()
        .map(|analysis| analysis.shape().operation)
        .collect();
    assert_eq!(
        operations,
        vec![
            OperationKind::DeleteMany,
            OperationKind::Count,
            OperationKind::FindOne,
            OperationKind::FindOneAndDelete,
            OperationKind::UpdateOne,
        ]
    );
}

#[test]
fn unrecognized_criteria_method_is_embedded() {
    let source = r#"
class MovieRepository {
    private final MongoTemplate template;

    List<Movie> near() {
        return template.find(
            query(where("location").near(point).and("year").gt(2000)),
            Movie.class);
    }
}
"#;
    let analyses = analyze(source);
    let analysis = &analyses[0];
    let Some(Predicate::And(children)) = analysis.shape().filter.clone() else {
        panic!("expected And");
    };
    assert_eq!(
        children[0],
        Predicate::Unknown {
            method: "near".into()
        }
    );
    assert!(matches!(&children[1], Predicate::Comparison { field, .. } if field == "year"));
    assert!(matches!(
        &analysis.diagnostics()[0].reason,
        ReasonCode::UnrecognizedOperation(method) if method == "near"
    ));
}

#[test]
fn query_projection_fields() {
    let source = r#"
class MovieRepository {
    private final MongoTemplate template;

    List<Movie> slim() {
        return template.find(
            query(where("type").is("movie")).fields().include("title").exclude("plot"),
            Movie.class);
    }
}
"#;
    let analyses = analyze(source);
    let shape = analyses[0].shape();
    assert_eq!(shape.projection.include, vec!["title"]);
    assert_eq!(shape.projection.exclude, vec!["plot"]);
}
