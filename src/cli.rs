use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "qshape",
    version,
    about = "Query shape extraction for MongoDB builder code",
    after_help = r#"Examples:
  qshape analyze --file src/main/java/MoviesRepository.java
  qshape analyze --file MoviesDao.java --json
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Analyze one Java source file and print the recognized query shapes.
    Analyze {
        #[arg(long)]
        file: PathBuf,
        /// Emit shapes and diagnostics as pretty-printed JSON.
        #[arg(long)]
        json: bool,
    },
}
