// bin/commands/query.rs

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Args;
use tabkit::error::IndexError;
use tabkit::io::{LineSource, PlainLineSource};
use tabkit::record::{parse_record, Diagnostics};
use tabkit::{Index, Preset, Region, RegionFlags};

#[derive(Args)]
pub struct QueryArgs {
    /// The query region: seqname, seqname:start-end (1-based inclusive),
    /// "." for everything or "*" for records without coordinates.
    #[arg(value_name = "chr17:7661779-7687538")]
    pub region: String,

    /// The indexed data file.
    #[arg(value_name = "sorted.vcf")]
    pub input: PathBuf,

    /// Index path. Defaults to the data path plus .tbi or .csi.
    #[arg(short, long)]
    pub index: Option<PathBuf>,

    /// Treat seqname:N as the single position N instead of N to the end.
    #[arg(long)]
    pub one_coord: bool,
}

pub fn run(args: QueryArgs) -> Result<(), IndexError> {
    let index_path = match args.index {
        Some(p) => p,
        None => default_index_path(&args.input),
    };
    let index = Index::load(&index_path)?;

    let flags = RegionFlags {
        one_coord: args.one_coord,
        ..RegionFlags::default()
    };
    let region = index.parse_region(&args.region, flags)?;
    let chunks = index.query_region(&region)?;
    if chunks.is_empty() {
        return Ok(());
    }

    let conf = index.conf().clone();
    let diags = Diagnostics::default();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    // The plain-text reader cannot seek by virtual offset, so stream the
    // file and keep only lines inside the returned chunks.
    let mut source = PlainLineSource::open(&args.input)?;
    let mut buf = Vec::new();
    let mut lineno = 0u64;
    let mut chunk_idx = 0;
    while let Some(voff) = source.read_line(&mut buf)? {
        lineno += 1;
        while chunk_idx < chunks.len() && chunks[chunk_idx].end <= voff {
            chunk_idx += 1;
        }
        if chunk_idx == chunks.len() {
            break;
        }
        if voff < chunks[chunk_idx].start {
            continue;
        }
        if lineno <= conf.line_skip.max(0) as u64 || buf.first() == Some(&conf.meta_char) {
            continue;
        }

        if let Region::Interval { tid, beg, end } = region {
            let Ok(record) = parse_record(&buf, &conf, &diags) else {
                continue;
            };
            if record.beg >= end || record.end <= beg {
                continue;
            }
            let same_reference = conf.preset == Preset::Gaf
                || std::str::from_utf8(record.name)
                    .ok()
                    .and_then(|name| index.dict().tid(name))
                    == Some(tid);
            if !same_reference {
                continue;
            }
        }

        out.write_all(&buf)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn default_index_path(input: &Path) -> PathBuf {
    let mut tbi = input.as_os_str().to_os_string();
    tbi.push(".tbi");
    let tbi = PathBuf::from(tbi);
    if tbi.exists() {
        return tbi;
    }
    let mut csi = input.as_os_str().to_os_string();
    csi.push(".csi");
    let csi = PathBuf::from(csi);
    if csi.exists() {
        return csi;
    }
    tbi
}
