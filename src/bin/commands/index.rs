// bin/commands/index.rs

use std::path::PathBuf;

use clap::Args;
use tabkit::error::IndexError;
use tabkit::io::build_to_path;

use crate::commands::config_for_preset;

#[derive(Args)]
pub struct IndexArgs {
    /// Input tab-delimited file, plain or gzip-compressed.
    #[arg(value_name = "sorted.vcf")]
    pub input: PathBuf,

    /// Output index path. Defaults to the input path plus .tbi or .csi.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Input format preset: gff, bed, psltbl, sam, vcf or gaf.
    #[arg(short, long, default_value = "gff")]
    pub preset: String,

    /// Write a CSI index with this leaf shift instead of a TBI index.
    #[arg(long, value_name = "14")]
    pub min_shift: Option<u32>,

    /// Coordinates in the input are 0-based half-open.
    #[arg(short = '0', long)]
    pub zero_based: bool,

    /// Override the 1-based reference name column.
    #[arg(short = 's', long)]
    pub seq_col: Option<i32>,

    /// Override the 1-based begin coordinate column.
    #[arg(short = 'b', long)]
    pub begin_col: Option<i32>,

    /// Override the 1-based end coordinate column (0 for none).
    #[arg(short = 'e', long)]
    pub end_col: Option<i32>,

    /// Header lines start with this character.
    #[arg(short = 'c', long)]
    pub meta_char: Option<char>,

    /// Skip this many leading lines.
    #[arg(short = 'S', long)]
    pub skip: Option<i32>,
}

pub fn run(args: IndexArgs) -> Result<(), IndexError> {
    let mut conf = config_for_preset(&args.preset)?;
    if args.zero_based {
        conf.zero_based = true;
    }
    if let Some(col) = args.seq_col {
        conf.seq_col = col;
    }
    if let Some(col) = args.begin_col {
        conf.begin_col = col;
    }
    if let Some(col) = args.end_col {
        conf.end_col = col;
    }
    if let Some(c) = args.meta_char {
        conf.meta_char = c as u8;
    }
    if let Some(skip) = args.skip {
        conf.line_skip = skip;
    }

    let out = build_to_path(&args.input, args.output.as_deref(), conf, args.min_shift)?;
    eprintln!("Wrote {}", out.display());
    Ok(())
}
