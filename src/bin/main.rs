mod commands;

use clap::Parser;
use commands::{index, query};
use tabkit::error::IndexError;

#[derive(Parser)]
#[command(author, version, about = "Build and query tabix-style genomic indexes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Index a position-sorted, tab-delimited text file.
    Index(index::IndexArgs),
    /// Print the records of an indexed file overlapping a region.
    Query(query::QueryArgs),
}

pub fn run() -> Result<(), IndexError> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Index(args) => index::run(args),
        Commands::Query(args) => query::run(args),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
