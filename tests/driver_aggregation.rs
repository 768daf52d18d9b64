use qshape::QueryAnalyzer;
use qshape::diagnostics::{ReasonCode, ShapeAnalysis};
use qshape::shape::{
    Accumulator, AccumulatorFn, AddedField, CompareOp, OperationKind, Predicate, Projection,
    SortKey, Stage, Value,
};

fn analyze(source: &str) -> Vec<ShapeAnalysis> {
    let mut analyzer = QueryAnalyzer::new().unwrap();
    analyzer.analyze(source).unwrap()
}

#[test]
fn pipeline_preserves_written_stage_order() {
    let source = r#"
class MoviesDao {
    void ratingsByYear(MongoCollection<Document> collection) {
        collection.aggregate(List.of(
            Aggregates.match(Filters.eq("rated", "PG")),
            Aggregates.group("$year", Accumulators.avg("rating", "$imdb.rating")),
            Aggregates.sort(Sorts.ascending("_id")),
            Aggregates.limit(10)
        )).into(new ArrayList<>());
    }
}
"#;
    let analyses = analyze(source);
    assert_eq!(analyses.len(), 1);
    let analysis = &analyses[0];
    assert!(analysis.is_clean());

    let shape = analysis.shape();
    assert_eq!(shape.operation, OperationKind::Aggregate);
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
                    output: "rating".into(),
                    function: AccumulatorFn::Avg,
                    source: Value::String("$imdb.rating".into()),
                }],
            },
            Stage::Sort(vec![SortKey::asc("_id")]),
            Stage::Limit(Some(10)),
        ]
    );
}

#[test]
fn unwind_skip_count_and_added_fields() {
    let source = r#"
class MoviesDao {
    void genreCounts(MongoCollection<Document> collection) {
        collection.aggregate(List.of(
            Aggregates.unwind("$genres", new UnwindOptions().preserveNullAndEmptyArrays(true)),
            Aggregates.addFields(new Field("counted", true)),
            Aggregates.skip(5),
            Aggregates.count("total")
        )).first();
    }
}
"#;
    let analyses = analyze(source);
    let shape = analyses[0].shape();
    assert_eq!(
        shape.pipeline,
        vec![
            Stage::Unwind {
                field: "genres".into(),
                preserve_null_and_empty: Some(true),
            },
            Stage::AddFields(vec![AddedField {
                field: "counted".into(),
                value: Value::Boolean(true),
            }]),
            Stage::Skip(Some(5)),
            Stage::Count(Some("total".into())),
        ]
    );
}

#[test]
fn project_stage_folds_into_a_projection() {
    let source = r#"
class MoviesDao {
    void titles(MongoCollection<Document> collection) {
        collection.aggregate(List.of(
            Aggregates.project(Projections.fields(
                Projections.include("title", "year"),
                Projections.excludeId()))
        )).into(new ArrayList<>());
    }
}
"#;
    let analyses = analyze(source);
    assert_eq!(
        analyses[0].shape().pipeline,
        vec![Stage::Project(Projection {
            include: vec!["title".into(), "year".into()],
            exclude: vec!["_id".into()],
        })]
    );
}

#[test]
fn pipeline_bound_through_a_local_resolves() {
    let source = r#"
class MoviesDao {
    void staged(MongoCollection<Document> collection) {
        List<Bson> pipeline = List.of(
            Aggregates.match(Filters.gt("year", 2010)),
            Aggregates.limit(3));
        collection.aggregate(pipeline).into(new ArrayList<>());
    }
}
"#;
    let analyses = analyze(source);
    let shape = analyses[0].shape();
    assert_eq!(shape.pipeline.len(), 2);
    assert_eq!(shape.pipeline[1], Stage::Limit(Some(3)));
}

#[test]
fn unrecognized_stage_is_embedded_with_a_diagnostic() {
    let source = r#"
class MoviesDao {
    void faceted(MongoCollection<Document> collection) {
        collection.aggregate(List.of(
            Aggregates.limit(10),
            Aggregates.facet(new Facet("a"), new Facet("b"))
        )).into(new ArrayList<>());
    }
}
"#;
    let analyses = analyze(source);
    let analysis = &analyses[0];
    assert_eq!(analysis.shape().pipeline.len(), 2);
    assert_eq!(
        analysis.shape().pipeline[1],
        Stage::Unknown {
            method: "facet".into()
        }
    );
    assert_eq!(analysis.diagnostics().len(), 1);
    assert_eq!(analysis.diagnostics()[0].path, "pipeline[1]");
    assert!(matches!(
        &analysis.diagnostics()[0].reason,
        ReasonCode::UnrecognizedOperation(method) if method == "facet"
    ));
}

#[test]
fn top_accumulator_reads_its_third_argument() {
    let source = r#"
class MoviesDao {
    void best(MongoCollection<Document> collection) {
        collection.aggregate(List.of(
            Aggregates.group("$year",
                Accumulators.top("bestTitle", Sorts.descending("imdb.rating"), "$title"))
        )).into(new ArrayList<>());
    }
}
"#;
    let analyses = analyze(source);
    let Stage::Group { accumulators, .. } = &analyses[0].shape().pipeline[0] else {
        panic!("expected group stage");
    };
    assert_eq!(
        accumulators[0],
        Accumulator {
            output: "bestTitle".into(),
            function: AccumulatorFn::Top,
            source: Value::String("$title".into()),
        }
    );
}
