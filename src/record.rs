// record.rs
//
// Preset-driven extraction of (reference name, begin, end) from one
// tab-delimited record line. Columns are 1-based in the configuration; the
// produced interval is 0-based half-open. The parser borrows subslices of
// the input line and never copies or mutates it.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::warn;

use crate::error::IndexError;

/// Record grammar selected by an index configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Coordinates come straight out of the configured columns.
    Generic = 0,
    /// End derived from the CIGAR column.
    Sam = 1,
    /// End derived from REF/ALT/INFO/FORMAT length rules.
    Vcf = 2,
    /// Begin column holds an oriented node-id path; begin/end are the
    /// smallest and largest node ids.
    Gaf = 3,
}

const PRESET_FLAG_UCSC: i32 = 0x10000;

/// Maximum number of alleles examined per VCF record; the rest are ignored.
const MAX_ALLELES: usize = 65536;

impl Preset {
    pub fn name(&self) -> &'static str {
        match self {
            Preset::Generic => "generic",
            Preset::Sam => "SAM",
            Preset::Vcf => "VCF",
            Preset::Gaf => "GAF",
        }
    }
}

/// Column layout and preset for one file format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub preset: Preset,
    /// Begin column is already 0-based half-open (the UCSC convention).
    pub zero_based: bool,
    /// 1-based column of the reference name.
    pub seq_col: i32,
    /// 1-based column of the begin coordinate.
    pub begin_col: i32,
    /// 1-based column of the end coordinate; 0 when the format has none.
    pub end_col: i32,
    /// Lines starting with this byte are headers.
    pub meta_char: u8,
    /// Leading lines skipped unconditionally.
    pub line_skip: i32,
    /// Consult FORMAT/LEN whenever any symbolic ALT is present, not only
    /// for gVCF `<*>`/`<NON_REF>` blocks. Not stored in the index file.
    pub format_len_always: bool,
}

impl Config {
    fn new(preset: Preset, zero_based: bool, sc: i32, bc: i32, ec: i32, meta: u8) -> Self {
        Config {
            preset,
            zero_based,
            seq_col: sc,
            begin_col: bc,
            end_col: ec,
            meta_char: meta,
            line_skip: 0,
            format_len_always: false,
        }
    }

    pub fn gff() -> Self {
        Self::new(Preset::Generic, false, 1, 4, 5, b'#')
    }

    pub fn bed() -> Self {
        Self::new(Preset::Generic, true, 1, 2, 3, b'#')
    }

    pub fn psltbl() -> Self {
        Self::new(Preset::Generic, true, 15, 17, 18, b'#')
    }

    pub fn sam() -> Self {
        Self::new(Preset::Sam, false, 3, 4, 0, b'@')
    }

    pub fn vcf() -> Self {
        Self::new(Preset::Vcf, false, 1, 2, 0, b'#')
    }

    pub fn gaf() -> Self {
        Self::new(Preset::Gaf, false, 1, 6, 0, b'#')
    }

    /// The combined preset/flags word as stored in the index header.
    pub fn raw_preset(&self) -> i32 {
        self.preset as i32 | if self.zero_based { PRESET_FLAG_UCSC } else { 0 }
    }

    /// Rebuilds a configuration from the on-disk header fields.
    pub fn from_raw(
        preset: i32,
        seq_col: i32,
        begin_col: i32,
        end_col: i32,
        meta_char: i32,
        line_skip: i32,
    ) -> Result<Self, IndexError> {
        let kind = match preset & 0xffff {
            0 => Preset::Generic,
            1 => Preset::Sam,
            2 => Preset::Vcf,
            3 => Preset::Gaf,
            other => {
                return Err(IndexError::invalid_index(format!(
                    "unknown preset tag {}",
                    other
                )))
            }
        };
        Ok(Config {
            preset: kind,
            zero_based: preset & PRESET_FLAG_UCSC != 0,
            seq_col,
            begin_col,
            end_col,
            meta_char: (meta_char & 0xff) as u8,
            line_skip,
            format_len_always: false,
        })
    }
}

/// Parsed intent of one record line.
#[derive(Debug, PartialEq, Eq)]
pub struct RecordInterval<'a> {
    pub name: &'a [u8],
    /// 0-based inclusive.
    pub beg: i64,
    /// 0-based exclusive.
    pub end: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("expected an integer in column {0}")]
    ExpectedInt(i32),

    #[error("reference name column {0} missing")]
    MissingName(i32),

    #[error("could not determine a coordinate interval")]
    NoInterval,
}

/// Warn-once latches for non-fatal parse diagnostics.
///
/// One instance rides along with each build, so separate builds warn
/// independently instead of sharing process-global state.
#[derive(Debug, Default)]
pub struct Diagnostics {
    negative_coord: AtomicBool,
    invalid_end: AtomicBool,
}

impl Diagnostics {
    fn warn_negative_coord(&self) {
        if !self.negative_coord.swap(true, Ordering::Relaxed) {
            warn!("coordinate <= 0 detected; did you forget the --zero-based option?");
        }
    }

    fn warn_invalid_end(&self, name: &[u8], pos: i64, end: i64) {
        if !self.invalid_end.swap(true, Ordering::Relaxed) {
            warn!(
                "INFO/END={} is not past POS at {}:{}; the tag is ignored \
                 (only the first invalid END is reported)",
                end,
                String::from_utf8_lossy(name),
                pos + 1
            );
        }
    }
}

/// Extracts the reference name and 0-based half-open interval from `line`.
pub fn parse_record<'a>(
    line: &'a [u8],
    conf: &Config,
    diags: &Diagnostics,
) -> Result<RecordInterval<'a>, RecordParseError> {
    let mut name: Option<&[u8]> = None;
    let mut beg: i64 = -1;
    let mut end: i64 = -1;

    // VCF end-rule accumulators
    let mut reflen: i64 = 0;
    let mut svlen: i64 = 0;
    let mut fmtlen: i64 = 0;
    // allele 0 is REF; alleles[k] marks the k-th ALT as symbolic
    let mut alleles: Vec<bool> = Vec::new();
    let mut use_svlen = false;
    let mut getlen = false;
    let mut lenpos: Option<usize> = None;

    'fields: for (idx, field) in line.split(|&b| b == b'\t').enumerate() {
        let id = (idx + 1) as i32;

        if id == conf.seq_col {
            name = Some(field);
        } else if id == conf.begin_col {
            if conf.preset == Preset::Gaf {
                (beg, end) = parse_gaf_path(field);
            } else {
                let (value, _) =
                    parse_int_prefix(field).ok_or(RecordParseError::ExpectedInt(id))?;
                beg = value;
                if conf.begin_col <= conf.end_col {
                    // tentative; a later end column may overwrite this
                    end = beg;
                }
                if !conf.zero_based {
                    beg -= 1;
                } else if conf.begin_col <= conf.end_col {
                    end += 1;
                }
                if beg < 0 {
                    diags.warn_negative_coord();
                    beg = 0;
                }
                if end < 1 {
                    end = 1;
                }
            }
        } else {
            match conf.preset {
                Preset::Generic if id == conf.end_col => {
                    let (value, _) =
                        parse_int_prefix(field).ok_or(RecordParseError::ExpectedInt(id))?;
                    end = value;
                }
                Preset::Sam if id == 6 => {
                    end = beg + cigar_reference_length(field);
                }
                Preset::Vcf => match id {
                    4 => {
                        if !field.is_empty() {
                            reflen = field.len() as i64;
                            end = beg + reflen;
                        }
                        alleles.push(false);
                    }
                    5 => {
                        for alt in field.split(|&b| b == b',') {
                            if alleles.len() >= MAX_ALLELES {
                                break;
                            }
                            let symbolic = is_symbolic_alt(alt);
                            if symbolic {
                                use_svlen = true;
                            } else if alt == b"<*>" || alt == b"<NON_REF>" {
                                getlen = true;
                            }
                            alleles.push(symbolic);
                        }
                    }
                    8 => {
                        if let Some(value) = find_info_value(field, b"END") {
                            if value.first() != Some(&b'.') {
                                let v = parse_int_lenient(value);
                                if v <= beg {
                                    diags.warn_invalid_end(name.unwrap_or(b""), beg, v);
                                } else {
                                    end = v;
                                }
                            }
                        }
                        if let Some(values) = find_info_value(field, b"SVLEN") {
                            let mut allele = 1;
                            for value in values.split(|&b| b == b',') {
                                if allele >= alleles.len() {
                                    break;
                                }
                                let span = if use_svlen && alleles[allele] {
                                    parse_int_lenient(value).abs()
                                } else {
                                    1
                                };
                                svlen = svlen.max(span);
                                allele += 1;
                            }
                        }
                    }
                    9 if getlen || conf.format_len_always => {
                        lenpos = field
                            .split(|&b| b == b':')
                            .position(|key| key == b"LEN");
                        if lenpos.is_none() {
                            // no per-sample lengths to collect
                            break 'fields;
                        }
                    }
                    _ if id > 9 && (getlen || conf.format_len_always) => {
                        if let Some(pos) = lenpos {
                            if let Some(value) = field.split(|&b| b == b':').nth(pos) {
                                fmtlen = fmtlen.max(parse_int_lenient(value));
                            }
                        }
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }

    if conf.preset == Preset::Vcf {
        let span = reflen.max(svlen).max(fmtlen);
        end = end.max(beg + span);
    }

    let name = name.ok_or(RecordParseError::MissingName(conf.seq_col))?;
    if beg < 0 || end < 0 {
        return Err(RecordParseError::NoInterval);
    }
    Ok(RecordInterval { name, beg, end })
}

/// Smallest and largest node id in an oriented path like `>12<34>5`.
///
/// Node ids are parsed base 10. A single-node path still has to produce a
/// non-empty interval, so `end` is bumped past `beg` in that case.
fn parse_gaf_path(field: &[u8]) -> (i64, i64) {
    let mut beg = -1i64;
    let mut end = -1i64;
    let mut i = 1;
    while i < field.len() {
        match parse_int_prefix(&field[i..]) {
            Some((id, used)) => {
                if beg == -1 {
                    beg = id;
                    end = id;
                } else {
                    beg = beg.min(id);
                    end = end.max(id);
                }
                i += used + 1;
            }
            None => i += 1,
        }
    }
    if beg >= 0 && end == beg {
        end = beg + 1;
    }
    (beg, end)
}

/// Reference-consuming length of a CIGAR string (M/D/N ops), floored at 1.
fn cigar_reference_length(field: &[u8]) -> i64 {
    let mut len = 0i64;
    let mut i = 0;
    while i < field.len() {
        let (count, used) = parse_int_prefix(&field[i..]).unwrap_or((0, 0));
        let op_at = i + used;
        if op_at >= field.len() {
            break;
        }
        match field[op_at].to_ascii_uppercase() {
            b'M' | b'D' | b'N' => len += count,
            _ => {}
        }
        i = op_at + 1;
    }
    len.max(1)
}

/// A symbolic ALT whose SVLEN spans the reference: `<…>` other than the
/// gVCF placeholders.
fn is_symbolic_alt(alt: &[u8]) -> bool {
    alt.len() > 2
        && alt[0] == b'<'
        && alt[alt.len() - 1] == b'>'
        && alt != b"<*>"
        && alt != b"<NON_REF>"
}

/// Value slice of `KEY=` in a semicolon-separated INFO field: either at the
/// start of the field or right after a `;`. The slice runs to the end of the
/// field; numeric parsing stops at the next delimiter on its own.
fn find_info_value<'a>(info: &'a [u8], key: &[u8]) -> Option<&'a [u8]> {
    let n = key.len();
    if info.len() > n && &info[..n] == key && info[n] == b'=' {
        return Some(&info[n + 1..]);
    }
    let mut i = 0;
    while i + n + 1 < info.len() {
        if info[i] == b';' && &info[i + 1..i + 1 + n] == key && info[i + 1 + n] == b'=' {
            return Some(&info[i + n + 2..]);
        }
        i += 1;
    }
    None
}

/// Parses an optionally signed base-10 integer prefix; returns the value and
/// the number of bytes consumed, or None when no digits are present.
fn parse_int_prefix(s: &[u8]) -> Option<(i64, usize)> {
    let mut i = 0;
    while i < s.len() && s[i] == b' ' {
        i += 1;
    }
    let mut negative = false;
    if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
        negative = s[i] == b'-';
        i += 1;
    }
    let start = i;
    let mut value = 0i64;
    while i < s.len() && s[i].is_ascii_digit() {
        value = value.wrapping_mul(10).wrapping_add((s[i] - b'0') as i64);
        i += 1;
    }
    if i == start {
        return None;
    }
    Some((if negative { -value } else { value }, i))
}

/// `atoll`-style parse: 0 when the prefix is not a number.
fn parse_int_lenient(s: &[u8]) -> i64 {
    parse_int_prefix(s).map_or(0, |(v, _)| v)
}

/// Heuristic check for UTF-16 input (BOM or a NUL-dense prefix), used to
/// give a better error than a generic parse failure.
pub fn looks_like_utf16(line: &[u8]) -> bool {
    if line.len() >= 2 && (line[..2] == [0xff, 0xfe] || line[..2] == [0xfe, 0xff]) {
        return true;
    }
    let probe = &line[..line.len().min(100)];
    probe.len() >= 4 && probe.iter().filter(|&&b| b == 0).count() * 4 >= probe.len()
}

/// Reference length announced by a header line, used to size CSI depth.
pub(crate) fn max_ref_len_hint(line: &[u8], conf: &Config) -> Option<i64> {
    match conf.preset {
        Preset::Vcf => contig_length_from_vcf_header(line),
        Preset::Sam => contig_length_from_sam_header(line),
        _ => None,
    }
}

// Best-effort scan of ##contig=<ID=…,length=N> lines.
fn contig_length_from_vcf_header(line: &[u8]) -> Option<i64> {
    if !line.starts_with(b"##contig") {
        return None;
    }
    let mut i = find_subslice(&line[8..], b"length")? + 8 + 6;
    while i < line.len() && (line[i] == b' ' || line[i] == b'=') {
        i += 1;
    }
    parse_int_prefix(&line[i..]).map(|(v, _)| v)
}

// Same for @SQ … LN:N header lines.
fn contig_length_from_sam_header(line: &[u8]) -> Option<i64> {
    if !line.starts_with(b"@SQ") {
        return None;
    }
    let i = find_subslice(&line[3..], b"\tLN:")? + 3 + 4;
    parse_int_prefix(&line[i..]).map(|(v, _)| v)
}

fn find_subslice(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).position(|w| w == needle)
}
