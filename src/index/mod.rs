// index/mod.rs

pub mod binning;
pub mod builder;
pub mod reference;

use crate::dict::ReferenceDictionary;
use crate::error::IndexError;
use crate::record::Config;
use crate::region::{self, Region, RegionError, RegionFlags};
use self::binning::BinningScheme;
use self::reference::{merge_chunks, Chunk, ReferenceIndex, VirtualOffset};

/// On-disk flavor of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    /// Legacy tabix index, fixed 14/5 geometry, linear index on disk.
    Tbi,
    /// Coordinate-sorted index with tunable geometry, per-bin `loff`.
    Csi,
}

/// A finished, immutable binning index over one record file.
///
/// Built once by [`builder::IndexBuilder`] (usually through
/// [`crate::Indexer`]) or loaded from disk; afterwards only queried. Shared
/// references are safe across threads since nothing mutates.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub(crate) format: IndexFormat,
    pub(crate) scheme: BinningScheme,
    pub(crate) conf: Config,
    pub(crate) dict: ReferenceDictionary,
    pub(crate) refs: Vec<ReferenceIndex>,
    pub(crate) n_no_coor: u64,
}

impl Index {
    pub fn format(&self) -> IndexFormat {
        self.format
    }

    pub fn scheme(&self) -> &BinningScheme {
        &self.scheme
    }

    pub fn conf(&self) -> &Config {
        &self.conf
    }

    pub fn dict(&self) -> &ReferenceDictionary {
        &self.dict
    }

    pub fn references(&self) -> &[ReferenceIndex] {
        &self.refs
    }

    /// Reference names in tid order.
    pub fn seqnames(&self) -> Vec<&str> {
        self.dict.iter().collect()
    }

    /// Offset one past the last indexed record, 0 for an empty index.
    ///
    /// Records without coordinates sit after this point in the file.
    pub fn end_of_data(&self) -> VirtualOffset {
        self.refs
            .iter()
            .filter_map(|r| r.stats())
            .map(|s| s.off_end)
            .max()
            .unwrap_or(VirtualOffset::ZERO)
    }

    /// Ordered, merged chunk list for `[beg, end)` on reference `tid`.
    ///
    /// An interval nothing overlaps yields an empty list, not an error.
    pub fn query(&self, tid: usize, beg: i64, end: i64) -> Result<Vec<Chunk>, IndexError> {
        let r = self
            .refs
            .get(tid)
            .ok_or_else(|| IndexError::ReferenceUnknown(format!("tid {}", tid)))?;

        let beg = beg.max(0);
        let end = end.min(self.scheme.max_pos());
        if beg >= end {
            return Ok(Vec::new());
        }

        let min_off = r.min_offset(&self.scheme, beg);

        let mut chunks = Vec::new();
        for bin_id in self.scheme.overlapping_bins(beg, end) {
            if let Some(bin) = r.bins().get(&bin_id) {
                chunks.extend(bin.chunks.iter().filter(|c| c.end > min_off));
            }
        }
        merge_chunks(&mut chunks);
        Ok(chunks)
    }

    /// Chunk list for a parsed region, handling the `.` and `*` targets.
    pub fn query_region(&self, region: &Region) -> Result<Vec<Chunk>, IndexError> {
        match *region {
            Region::All => Ok(vec![Chunk::new(VirtualOffset::ZERO, VirtualOffset::MAX)]),
            Region::Unmapped => Ok(vec![Chunk::new(self.end_of_data(), VirtualOffset::MAX)]),
            Region::Interval { tid, beg, end } => self.query(tid, beg, end),
        }
    }

    /// Parses a region string against this index's dictionary and queries it.
    pub fn query_str(&self, region: &str) -> Result<Vec<Chunk>, IndexError> {
        let parsed = self.parse_region(region, RegionFlags::default())?;
        self.query_region(&parsed)
    }

    /// Parses one region string against this index's dictionary.
    pub fn parse_region(&self, region: &str, flags: RegionFlags) -> Result<Region, IndexError> {
        let (parsed, _) = region::parse_region(region, |name| self.dict.tid(name), flags)
            .map_err(|e| match e {
                RegionError::NameUnknown(name) => IndexError::ReferenceUnknown(name),
                e => IndexError::BadRegion {
                    region: region.to_string(),
                    source: e,
                },
            })?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::builder::IndexBuilder;
    use super::*;

    fn small_index() -> Index {
        let mut dict = ReferenceDictionary::new();
        dict.intern("chr1").unwrap();
        dict.intern("chr2").unwrap();

        let mut b = IndexBuilder::tbi();
        b.push(0, 1_000, 2_000, 100.into(), true).unwrap();
        b.push(0, 1_500, 2_500, 200.into(), true).unwrap();
        b.push(0, 5_000_000, 5_000_100, 300.into(), true).unwrap();
        b.push(1, 10, 20, 400.into(), true).unwrap();
        b.finish(500.into(), Config::bed(), dict).unwrap()
    }

    #[test]
    fn test_query_overlap() {
        let index = small_index();

        let chunks = index.query(0, 1_750, 2_250).unwrap();
        assert!(chunks.iter().any(|c| c.contains(100.into())));
        assert!(chunks.iter().any(|c| c.contains(200.into())));

        // far away: pruned to nothing
        let chunks = index.query(0, 9_000_000, 9_100_000).unwrap();
        assert!(chunks.is_empty());

        let chunks = index.query(1, 0, 100).unwrap();
        assert!(chunks.iter().any(|c| c.contains(400.into())));
    }

    #[test]
    fn test_query_results_merged_and_ordered() {
        let index = small_index();
        let chunks = index.query(0, 0, 6_000_000).unwrap();
        for w in chunks.windows(2) {
            assert!(w[0].end < w[1].start);
        }
    }

    #[test]
    fn test_query_unknown_tid() {
        let index = small_index();
        assert!(matches!(
            index.query(7, 0, 100),
            Err(IndexError::ReferenceUnknown(_))
        ));
    }

    #[test]
    fn test_query_region_targets() {
        let index = small_index();

        let all = index.query_region(&Region::All).unwrap();
        assert_eq!(all, vec![Chunk::new(VirtualOffset::ZERO, VirtualOffset::MAX)]);

        let unmapped = index.query_region(&Region::Unmapped).unwrap();
        assert_eq!(unmapped[0].start, index.end_of_data());
        assert_eq!(index.end_of_data().value(), 500);
    }

    #[test]
    fn test_query_str_resolves_names() {
        let index = small_index();

        let chunks = index.query_str("chr1:1001-2000").unwrap();
        assert!(chunks.iter().any(|c| c.contains(100.into())));

        assert!(matches!(
            index.query_str("chrZ:1-100"),
            Err(IndexError::ReferenceUnknown(_))
        ));
        assert!(matches!(
            index.query_str("chr1:xyz"),
            Err(IndexError::BadRegion { .. })
        ));
    }
}
