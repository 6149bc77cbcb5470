// indexer.rs

use tracing::debug;

use crate::dict::ReferenceDictionary;
use crate::error::IndexError;
use crate::index::builder::IndexBuilder;
use crate::index::reference::VirtualOffset;
use crate::index::{Index, IndexFormat};
use crate::io::LineSource;
use crate::record::{self, Config, Diagnostics, Preset};

/// Assumed maximum reference length for CSI builds when the header carries
/// no contig lengths: 100 Gbp.
const DEFAULT_MAX_REF_LEN: i64 = 100 * 1024 * 1024 * 1024;

/// Drives an index build over a stream of text lines.
///
/// Skips header lines, harvests reference-length hints from them to size a
/// CSI hierarchy, interns reference names, parses each record and feeds it
/// to the [`IndexBuilder`]. Feed lines through [`push_line`](Self::push_line)
/// in file order with the virtual offset of each line's first byte, then
/// call [`finish`](Self::finish) with the end-of-data offset.
#[derive(Debug)]
pub struct Indexer {
    conf: Config,
    format: IndexFormat,
    min_shift: u32,
    dict: ReferenceDictionary,
    builder: IndexBuilder,
    diags: Diagnostics,
    lineno: u64,
    max_ref_len: i64,
    started: bool,
}

impl Indexer {
    /// An indexer producing a legacy TBI index.
    pub fn tbi(conf: Config) -> Self {
        Self::with_format(conf, IndexFormat::Tbi, 14)
    }

    /// An indexer producing a CSI index with the given leaf shift.
    pub fn csi(conf: Config, min_shift: u32) -> Self {
        Self::with_format(conf, IndexFormat::Csi, min_shift)
    }

    fn with_format(conf: Config, format: IndexFormat, min_shift: u32) -> Self {
        let builder = match format {
            IndexFormat::Tbi => IndexBuilder::tbi(),
            IndexFormat::Csi => IndexBuilder::csi(min_shift, DEFAULT_MAX_REF_LEN),
        };
        Indexer {
            conf,
            format,
            min_shift,
            dict: ReferenceDictionary::new(),
            builder,
            diags: Diagnostics::default(),
            lineno: 0,
            max_ref_len: 0,
            started: false,
        }
    }

    /// Consumes one line starting at `voff`. Header and skipped lines are
    /// accepted and ignored (beyond hint collection).
    pub fn push_line(&mut self, line: &[u8], voff: VirtualOffset) -> Result<(), IndexError> {
        self.lineno += 1;

        if line.first() == Some(&self.conf.meta_char) {
            if self.format == IndexFormat::Csi && !self.started {
                if let Some(len) = record::max_ref_len_hint(line, &self.conf) {
                    self.max_ref_len = self.max_ref_len.max(len);
                }
            }
            return Ok(());
        }
        if self.lineno <= self.conf.line_skip.max(0) as u64 {
            return Ok(());
        }

        if !self.started {
            self.started = true;
            if self.format == IndexFormat::Csi && self.max_ref_len > 0 {
                self.builder = IndexBuilder::csi(self.min_shift, self.max_ref_len);
                debug!(
                    max_ref_len = self.max_ref_len,
                    depth = self.builder.scheme().depth,
                    "sized binning hierarchy from header hints"
                );
            }
        }

        let parsed = record::parse_record(line, &self.conf, &self.diags).map_err(|e| {
            if record::looks_like_utf16(line) {
                IndexError::Utf16Detected { line: self.lineno }
            } else {
                IndexError::ParseRecord {
                    preset: self.conf.preset.name(),
                    line: self.lineno,
                    reason: e.to_string(),
                }
            }
        })?;

        let tid = if self.conf.preset == Preset::Gaf {
            // GAF records index node-id space on a single synthetic reference
            0
        } else {
            let name = std::str::from_utf8(parsed.name).map_err(|_| IndexError::ParseRecord {
                preset: self.conf.preset.name(),
                line: self.lineno,
                reason: "reference name is not valid UTF-8".to_string(),
            })?;
            self.dict.intern(name)?
        };

        self.builder.push(tid, parsed.beg, parsed.end, voff, true)
    }

    /// Finishes the build; `final_voff` is the offset one past the last
    /// byte of data.
    pub fn finish(mut self, final_voff: VirtualOffset) -> Result<Index, IndexError> {
        self.builder.finish(final_voff, self.conf, self.dict)
    }

    /// Runs the full line loop over a source and finishes.
    pub fn run<S: LineSource>(mut self, source: &mut S) -> Result<Index, IndexError> {
        let mut buf = Vec::new();
        while let Some(voff) = source.read_line(&mut buf)? {
            self.push_line(&buf, voff)?;
        }
        let end = source.voff();
        self.finish(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::PlainLineSource;
    use std::io::BufReader;

    fn index_text(text: &str, indexer: Indexer) -> Result<Index, IndexError> {
        let mut source = PlainLineSource::new(BufReader::new(text.as_bytes()));
        indexer.run(&mut source)
    }

    #[test]
    fn test_vcf_build() {
        let text = "##fileformat=VCFv4.2\n\
                    #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
                    chr1\t100\t.\tA\tT\t.\t.\t.\n\
                    chr1\t250\t.\tG\tC\t.\t.\t.\n\
                    chr2\t7\t.\tT\tA\t.\t.\t.\n";
        let index = index_text(text, Indexer::tbi(Config::vcf())).unwrap();

        assert_eq!(index.seqnames(), vec!["chr1", "chr2"]);
        let chunks = index.query_str("chr1:100-100").unwrap();
        assert!(!chunks.is_empty());
        let stats = index.references()[0].stats().unwrap();
        assert_eq!(stats.n_mapped, 2);
    }

    #[test]
    fn test_header_lines_not_indexed() {
        let text = "#comment\nchr1\t10\t20\n";
        let index = index_text(text, Indexer::tbi(Config::bed())).unwrap();
        // the record chunk starts past the comment line
        let chunks = index.query_str("chr1:11-20").unwrap();
        assert_eq!(chunks[0].start.value(), "#comment\n".len() as u64);
    }

    #[test]
    fn test_line_skip() {
        let mut conf = Config::bed();
        conf.line_skip = 1;
        let text = "track name=x\nchr1\t10\t20\n";
        let index = index_text(text, Indexer::tbi(conf)).unwrap();
        assert_eq!(index.seqnames(), vec!["chr1"]);
    }

    #[test]
    fn test_unsorted_input_fails() {
        let text = "chr1\t500\t600\nchr1\t10\t20\n";
        let err = index_text(text, Indexer::tbi(Config::bed())).unwrap_err();
        assert!(matches!(err, IndexError::UnsortedInput { .. }));
    }

    #[test]
    fn test_parse_error_carries_line_number() {
        let text = "chr1\t10\t20\nchr1\tbogus\t30\n";
        match index_text(text, Indexer::tbi(Config::bed())) {
            Err(IndexError::ParseRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected ParseRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_contig_hint_sizes_csi_depth() {
        let text = "##contig=<ID=big,length=1099511627776>\n\
                    #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
                    big\t1099511000000\t.\tA\tT\t.\t.\t.\n";
        let index = index_text(text, Indexer::csi(Config::vcf(), 14)).unwrap();
        assert!(index.scheme().max_pos() > 1 << 40);
        let chunks = index.query(0, 1099510999999, 1099511000000).unwrap();
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_tbi_overflow_without_hint() {
        // TBI has a fixed 2^29 ceiling; a deeper record must be rejected
        let text = "chr1\t1099511000000\t.\tA\tT\t.\t.\t.\n";
        let err = index_text(text, Indexer::tbi(Config::vcf())).unwrap_err();
        assert!(matches!(err, IndexError::InvalidRecord(_)));
    }

    #[test]
    fn test_gaf_uses_synthetic_reference() {
        let text = "q1\t100\t0\t50\t+\t>12<34>5\t100\t0\t50\t40\t50\t60\n";
        let index = index_text(text, Indexer::tbi(Config::gaf())).unwrap();
        assert!(index.seqnames().is_empty());
        assert_eq!(index.references().len(), 1);
        assert!(!index.query(0, 5, 34).unwrap().is_empty());
    }

    #[test]
    fn test_empty_input() {
        let index = index_text("", Indexer::tbi(Config::bed())).unwrap();
        assert!(index.seqnames().is_empty());
        assert_eq!(index.end_of_data().value(), 0);
    }

    #[test]
    fn test_utf16_input_detected() {
        let text = b"c\x00h\x00r\x001\x00\t\x001\x000\x00\t\x002\x000\x00\n";
        let mut source = PlainLineSource::new(BufReader::new(&text[..]));
        let err = Indexer::tbi(Config::bed()).run(&mut source).unwrap_err();
        assert!(matches!(err, IndexError::Utf16Detected { .. }));
    }
}
