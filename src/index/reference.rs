// index/reference.rs

use rustc_hash::FxHashMap;

use super::binning::BinningScheme;

/// Opaque position in the block-compressed byte stream.
///
/// The index never looks inside the value; it only compares, so the
/// coffset/uoffset packing used by the underlying reader is irrelevant here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    pub const ZERO: VirtualOffset = VirtualOffset(0);
    pub const MAX: VirtualOffset = VirtualOffset(u64::MAX);

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for VirtualOffset {
    fn from(v: u64) -> Self {
        VirtualOffset(v)
    }
}

impl From<VirtualOffset> for u64 {
    fn from(v: VirtualOffset) -> Self {
        v.0
    }
}

impl std::fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Half-open span of the compressed stream holding consecutive records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: VirtualOffset,
    pub end: VirtualOffset,
}

impl Chunk {
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Chunk { start, end }
    }

    pub fn contains(&self, voff: VirtualOffset) -> bool {
        self.start <= voff && voff < self.end
    }
}

/// One bin's chunk list plus the lowest offset of its leaf descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bin {
    pub loff: VirtualOffset,
    pub chunks: Vec<Chunk>,
}

/// Payload of the per-reference metadata pseudo-bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefStats {
    pub off_beg: VirtualOffset,
    pub off_end: VirtualOffset,
    pub n_mapped: u64,
    pub n_unmapped: u64,
}

/// Bin table and linear index of a single reference sequence.
///
/// Linear slots still hold `VirtualOffset::MAX` while the builder is running;
/// `finalize` turns the array into a dense monotone prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceIndex {
    pub(crate) bins: FxHashMap<u32, Bin>,
    pub(crate) linear: Vec<VirtualOffset>,
    pub(crate) stats: Option<RefStats>,
}

impl ReferenceIndex {
    pub fn bins(&self) -> &FxHashMap<u32, Bin> {
        &self.bins
    }

    pub fn linear(&self) -> &[VirtualOffset] {
        &self.linear
    }

    pub fn stats(&self) -> Option<&RefStats> {
        self.stats.as_ref()
    }

    pub(crate) fn add_chunk(&mut self, bin_id: u32, chunk: Chunk) {
        self.bins.entry(bin_id).or_default().chunks.push(chunk);
    }

    /// Min-updates every leaf slot in `[first, last]` with `voff`.
    pub(crate) fn add_linear(&mut self, first: usize, last: usize, voff: VirtualOffset) {
        if last >= self.linear.len() {
            self.linear.resize(last + 1, VirtualOffset::MAX);
        }
        for slot in &mut self.linear[first..=last] {
            if voff < *slot {
                *slot = voff;
            }
        }
    }

    /// Finishes the reference: fills linear holes forward so the array is
    /// monotone, sorts and coalesces each bin's chunks, and derives `loff`.
    pub(crate) fn finalize(&mut self, scheme: &BinningScheme) {
        let mut prev = VirtualOffset::ZERO;
        for slot in &mut self.linear {
            if *slot == VirtualOffset::MAX {
                *slot = prev;
            } else {
                prev = *slot;
            }
        }

        for bin in self.bins.values_mut() {
            merge_chunks(&mut bin.chunks);
        }
        self.refresh_loff(scheme);
    }

    /// Recomputes each bin's `loff` from the linear index.
    ///
    /// Once the array is monotone, the leftmost leaf descendant holds the
    /// minimum offset under the bin.
    pub(crate) fn refresh_loff(&mut self, scheme: &BinningScheme) {
        let linear = &self.linear;
        for (&id, bin) in self.bins.iter_mut() {
            let leaf = scheme.leftmost_leaf(id);
            bin.loff = linear.get(leaf).copied().unwrap_or(VirtualOffset::ZERO);
        }
    }

    /// Lowest offset any record overlapping `[beg, ...)` can sit at.
    ///
    /// Uses the linear index when one was materialized (built in memory, or
    /// loaded from a TBI). CSI files carry no linear array, so there we walk
    /// left/up from the query's leaf bin until a populated bin donates its
    /// `loff`, the way CSI readers do.
    pub(crate) fn min_offset(&self, scheme: &BinningScheme, beg: i64) -> VirtualOffset {
        if !self.linear.is_empty() {
            let leaf = scheme.first_leaf(beg).min(self.linear.len() - 1);
            let off = self.linear[leaf];
            return if off == VirtualOffset::MAX {
                VirtualOffset::ZERO
            } else {
                off
            };
        }

        let mut bin = scheme.leaf_bin(beg);
        loop {
            if let Some(b) = self.bins.get(&bin) {
                return b.loff;
            }
            if bin == 0 {
                return VirtualOffset::ZERO;
            }
            let parent = BinningScheme::parent_bin(bin);
            let first_sibling = (parent << 3) + 1;
            bin = if bin > first_sibling { bin - 1 } else { parent };
        }
    }
}

/// Sorts chunks by start and merges overlapping or adjacent neighbors.
pub(crate) fn merge_chunks(chunks: &mut Vec<Chunk>) {
    if chunks.len() < 2 {
        return;
    }
    chunks.sort_unstable_by_key(|c| (c.start, c.end));
    let mut merged = 0;
    for i in 1..chunks.len() {
        if chunks[i].start <= chunks[merged].end {
            chunks[merged].end = chunks[merged].end.max(chunks[i].end);
        } else {
            merged += 1;
            chunks[merged] = chunks[i];
        }
    }
    chunks.truncate(merged + 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: u64, end: u64) -> Chunk {
        Chunk::new(start.into(), end.into())
    }

    #[test]
    fn test_merge_chunks() {
        let mut chunks = vec![chunk(30, 40), chunk(0, 10), chunk(10, 20), chunk(35, 50)];
        merge_chunks(&mut chunks);
        assert_eq!(chunks, vec![chunk(0, 20), chunk(30, 50)]);

        let mut single = vec![chunk(5, 6)];
        merge_chunks(&mut single);
        assert_eq!(single, vec![chunk(5, 6)]);
    }

    #[test]
    fn test_linear_hole_fill_is_monotone() {
        let scheme = BinningScheme::TBI;
        let mut r = ReferenceIndex::default();
        r.add_linear(2, 2, 100.into());
        r.add_linear(5, 6, 200.into());
        r.finalize(&scheme);

        let vals: Vec<u64> = r.linear.iter().map(|v| v.value()).collect();
        assert_eq!(vals, vec![0, 0, 100, 100, 100, 200, 200]);
        for w in vals.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn test_min_offset_prefers_linear() {
        let scheme = BinningScheme::TBI;
        let mut r = ReferenceIndex::default();
        r.add_linear(0, 0, 10.into());
        r.add_linear(3, 3, 40.into());
        r.finalize(&scheme);

        assert_eq!(r.min_offset(&scheme, 0).value(), 10);
        assert_eq!(r.min_offset(&scheme, 3 << 14).value(), 40);
        // past the populated prefix: clamps to the last slot
        assert_eq!(r.min_offset(&scheme, 100 << 14).value(), 40);
    }

    #[test]
    fn test_min_offset_loff_walk() {
        let scheme = BinningScheme::TBI;
        let mut r = ReferenceIndex::default();
        // no linear index, as after loading a CSI
        r.bins.insert(
            4681,
            Bin {
                loff: 25.into(),
                chunks: vec![chunk(25, 60)],
            },
        );

        // query leaf is the populated bin itself
        assert_eq!(r.min_offset(&scheme, 0).value(), 25);
        // query leaf is to the right: walks left to the populated sibling
        assert_eq!(r.min_offset(&scheme, 1 << 14).value(), 25);
        // nothing populated anywhere up the chain
        let empty = ReferenceIndex::default();
        assert_eq!(empty.min_offset(&scheme, 0).value(), 0);
    }
}
