use anyhow::{Context, Result};
use clap::Parser;
use qshape::shape::{NamePart, Namespace};
use qshape::{QueryAnalyzer, ShapeAnalysis, cli};

fn main() -> Result<()> {
    let args = cli::Args::parse();

    match args.command {
        cli::Command::Analyze { file, json } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("read {}", file.display()))?;
            let mut analyzer = QueryAnalyzer::new()?;
            let analyses = analyzer.analyze(&source)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&analyses)?);
            } else {
                print_summary(&analyses);
            }
            Ok(())
        }
    }
}

fn print_summary(analyses: &[ShapeAnalysis]) {
    if analyses.is_empty() {
        println!("no query chains recognized");
        return;
    }
    for analysis in analyses {
        let shape = analysis.shape();
        println!(
            "{:?} on {} ({} diagnostic{})",
            shape.operation,
            format_namespace(&shape.namespace),
            analysis.diagnostics().len(),
            if analysis.diagnostics().len() == 1 { "" } else { "s" },
        );
        for diagnostic in analysis.diagnostics() {
            println!(
                "  line {}: {} at {}",
                diagnostic.line,
                format_reason(&diagnostic.reason),
                diagnostic.path
            );
        }
    }
}

fn format_namespace(namespace: &Namespace) -> String {
    let part = |part: &NamePart| match part {
        NamePart::Known(name) => name.clone(),
        NamePart::Unknown => "?".to_string(),
    };
    format!("{}.{}", part(&namespace.database), part(&namespace.collection))
}

fn format_reason(reason: &qshape::diagnostics::ReasonCode) -> String {
    use qshape::diagnostics::ReasonCode;
    match reason {
        ReasonCode::UnresolvedValue(why) => format!("unresolved value ({why:?})"),
        ReasonCode::UnrecognizedOperation(method) => format!("unrecognized operation {method}"),
        ReasonCode::MalformedArity(method) => format!("malformed call to {method}"),
    }
}
