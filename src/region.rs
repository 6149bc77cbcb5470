// region.rs
//
// Parser for query region strings: `name`, `name:beg`, `name:beg-end`,
// `{name}:…`, and comma-separated lists. Input coordinates are 1-based
// inclusive; the parsed interval is 0-based half-open.
//
// Reference names may themselves contain colons (GRCh38 HLA contigs like
// `HLA-DRB1*12:17`), so the whole string is tried as a name before the
// rightmost colon splits it. When both readings resolve the request is
// ambiguous and the caller is told to quote with braces.

use thiserror::Error;
use tracing::warn;

/// Sentinel for "to the end of the reference".
pub const MAX_POS: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionFlags {
    /// The input is a comma-separated list: parse one item and return the
    /// rest. Thousands separators inside numbers are then unavailable.
    pub list: bool,
    /// `name:N` means the single position `[N, N+1)` instead of `[N, end)`.
    pub one_coord: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("unknown reference name {0:?}")]
    NameUnknown(String),

    #[error("{0:?} is ambiguous; quote the reference name with {{…}}")]
    AmbiguousName(String),

    #[error("coordinates must be > 0 in {0:?}")]
    BadNumber(String),

    #[error("unexpected trailing characters {0:?}")]
    TrailingGarbage(String),

    #[error("empty range: begin {beg} is not before end {end}")]
    EmptyRange { beg: i64, end: i64 },

    #[error("mismatched braces in {0:?}")]
    UnmatchedBrace(String),
}

/// A parsed query target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Every record, from the start of the file (the `.` region).
    All,
    /// Records without coordinates (the `*` region).
    Unmapped,
    /// 0-based half-open interval on one reference.
    Interval { tid: usize, beg: i64, end: i64 },
}

/// Parses one region out of `s`, resolving names through `resolve`.
///
/// Returns the region and the unparsed remainder — non-empty only in list
/// mode when another item follows the comma.
pub fn parse_region<'a, F>(
    s: &'a str,
    resolve: F,
    flags: RegionFlags,
) -> Result<(Region, &'a str), RegionError>
where
    F: Fn(&str) -> Option<usize>,
{
    let name: &str;
    let range: Option<&str>;
    let rest: &str;

    if let Some(stripped) = s.strip_prefix('{') {
        let close = stripped
            .find('}')
            .ok_or_else(|| RegionError::UnmatchedBrace(s.to_string()))?;
        name = &stripped[..close];
        let (tail, after) = split_list_item(&stripped[close + 1..], flags);
        rest = after;
        range = if let Some(r) = tail.strip_prefix(':') {
            Some(r)
        } else if tail.is_empty() {
            None
        } else {
            return Err(RegionError::TrailingGarbage(tail.to_string()));
        };
    } else {
        let (item, after) = split_list_item(s, flags);
        rest = after;

        if item == "." {
            return Ok((Region::All, rest));
        }
        if item == "*" {
            return Ok((Region::Unmapped, rest));
        }

        match item.rfind(':') {
            None => {
                let tid = resolve(item)
                    .ok_or_else(|| RegionError::NameUnknown(item.to_string()))?;
                return Ok((
                    Region::Interval {
                        tid,
                        beg: 0,
                        end: MAX_POS,
                    },
                    rest,
                ));
            }
            Some(colon) => {
                // The whole item may itself be a reference name.
                if let Some(tid) = resolve(item) {
                    if resolve(&item[..colon]).is_some() {
                        return Err(RegionError::AmbiguousName(item.to_string()));
                    }
                    return Ok((
                        Region::Interval {
                            tid,
                            beg: 0,
                            end: MAX_POS,
                        },
                        rest,
                    ));
                }
                name = &item[..colon];
                range = Some(&item[colon + 1..]);
            }
        }
    }

    let tid = resolve(name).ok_or_else(|| RegionError::NameUnknown(name.to_string()))?;
    let (beg, end) = match range {
        None => (0, MAX_POS),
        Some(r) => parse_range(r, flags)?,
    };
    Ok((Region::Interval { tid, beg, end }, rest))
}

/// Parses every item of a comma-separated region list.
pub fn parse_region_list<F>(
    s: &str,
    resolve: F,
    mut flags: RegionFlags,
) -> Result<Vec<Region>, RegionError>
where
    F: Fn(&str) -> Option<usize>,
{
    flags.list = true;
    let mut regions = Vec::new();
    let mut rest = s;
    loop {
        let (region, tail) = parse_region(rest, &resolve, flags)?;
        regions.push(region);
        if tail.is_empty() {
            return Ok(regions);
        }
        rest = tail;
    }
}

fn split_list_item(s: &str, flags: RegionFlags) -> (&str, &str) {
    if flags.list {
        match s.find(',') {
            Some(i) => (&s[..i], &s[i + 1..]),
            None => (s, ""),
        }
    } else {
        (s, "")
    }
}

/// Parses the text after the colon into a 0-based half-open interval.
fn parse_range(r: &str, flags: RegionFlags) -> Result<(i64, i64), RegionError> {
    let allow_sep = !flags.list;
    let (value, used) = parse_decimal(r, allow_sep);
    let beg = value - 1;
    let rest = &r[used..];

    if beg < 0 {
        if beg != -1 && rest.starts_with('-') && !r.is_empty() {
            // an explicit zero or negative begin in a 1-based range
            return Err(RegionError::BadNumber(r.to_string()));
        }
        let next = rest.bytes().next();
        if next.map_or(true, |b| b.is_ascii_digit() || b == b',') {
            // "name:-N" is shorthand for "name:1-N"
            let end = if beg == -1 { MAX_POS } else { -(beg + 1) };
            return Ok((0, end));
        } else if beg < -1 {
            return Err(RegionError::TrailingGarbage(rest.to_string()));
        }
    }

    let end = if rest.is_empty() {
        if flags.one_coord {
            beg + 1
        } else {
            MAX_POS
        }
    } else if let Some(tail) = rest.strip_prefix('-') {
        let (value, used) = parse_decimal(tail, allow_sep);
        let after = &tail[used..];
        if !after.is_empty() {
            return Err(RegionError::TrailingGarbage(after.to_string()));
        }
        value
    } else {
        return Err(RegionError::TrailingGarbage(rest.to_string()));
    };

    // "name:N-" runs to the end of the reference
    let end = if end == 0 { MAX_POS } else { end };
    if beg >= end {
        return Err(RegionError::EmptyRange { beg, end });
    }
    Ok((beg.max(0), end))
}

/// Parses a decimal coordinate prefix, returning the value and the number of
/// bytes consumed.
///
/// Accepts an optional sign, thousands separators when `allow_sep`, a
/// fractional part, and the scale suffixes `k`/`M`/`G` or an exponent, so
/// `1,000`, `1.5k` and `2e6` all work. A fraction that does not survive the
/// scaling is discarded with a warning. No digits at all parse as 0 with
/// only whitespace and sign consumed.
pub fn parse_decimal(s: &str, allow_sep: bool) -> (i64, usize) {
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() && b[i].is_ascii_whitespace() {
        i += 1;
    }
    let mut negative = false;
    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        negative = b[i] == b'-';
        i += 1;
    }

    let mut value = 0i64;
    while i < b.len() {
        if b[i].is_ascii_digit() {
            value = value.wrapping_mul(10).wrapping_add((b[i] - b'0') as i64);
        } else if !(allow_sep && b[i] == b',') {
            break;
        }
        i += 1;
    }

    let mut decimals = 0i32;
    if i < b.len() && b[i] == b'.' {
        i += 1;
        while i < b.len() && b[i].is_ascii_digit() {
            value = value.wrapping_mul(10).wrapping_add((b[i] - b'0') as i64);
            decimals += 1;
            i += 1;
        }
    }

    let mut exponent = 0i32;
    if i < b.len() {
        match b[i] {
            b'e' | b'E' => {
                i += 1;
                let mut exp_negative = false;
                if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
                    exp_negative = b[i] == b'-';
                    i += 1;
                }
                let mut e = 0i32;
                while i < b.len() && b[i].is_ascii_digit() {
                    e = e * 10 + (b[i] - b'0') as i32;
                    i += 1;
                }
                exponent = if exp_negative { -e } else { e };
            }
            b'k' | b'K' => {
                exponent = 3;
                i += 1;
            }
            b'm' | b'M' => {
                exponent = 6;
                i += 1;
            }
            b'g' | b'G' => {
                exponent = 9;
                i += 1;
            }
            _ => {}
        }
    }

    exponent -= decimals;
    let mut lost = 0i64;
    while exponent > 0 {
        value = value.wrapping_mul(10);
        exponent -= 1;
    }
    while exponent < 0 {
        lost += value % 10;
        value /= 10;
        exponent += 1;
    }
    if lost > 0 {
        warn!("discarding the fractional part of coordinate {:?}", s);
    }

    (if negative { -value } else { value }, i)
}
