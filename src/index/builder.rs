// index/builder.rs

use super::binning::BinningScheme;
use super::reference::{Chunk, RefStats, ReferenceIndex, VirtualOffset};
use super::{Index, IndexFormat};
use crate::dict::ReferenceDictionary;
use crate::error::IndexError;
use crate::record::Config;

/// The chunk currently accumulating: records landing in the same bin of the
/// same reference extend it instead of opening a new chunk.
#[derive(Debug, Clone, Copy)]
struct Run {
    tid: usize,
    bin: u32,
    off: VirtualOffset,
}

#[derive(Debug, Clone, Copy)]
struct LastRecord {
    tid: usize,
    beg: i64,
    off: VirtualOffset,
}

/// Streams sorted `(tid, beg, end, voff)` records in and produces a frozen
/// [`Index`].
///
/// `push` takes the virtual offset of the record's *start*; the bytes of a
/// record belong to whatever chunk is open when the next record (or
/// `finish`) arrives. Input must be sorted by `(tid, beg)` with
/// nondecreasing offsets, and each reference's records must be contiguous.
#[derive(Debug)]
pub struct IndexBuilder {
    format: IndexFormat,
    scheme: BinningScheme,
    refs: Vec<ReferenceIndex>,
    n_no_coor: u64,
    run: Option<Run>,
    last: Option<LastRecord>,
    finished: bool,
}

impl IndexBuilder {
    /// Builder for a legacy TBI index (fixed 14/5 geometry).
    pub fn tbi() -> Self {
        Self::with_scheme(IndexFormat::Tbi, BinningScheme::TBI)
    }

    /// Builder for a CSI index sized so references of `max_ref_len`
    /// positions fit. Must be chosen before the first record; pushing a
    /// record past the resulting `max_pos` fails.
    pub fn csi(min_shift: u32, max_ref_len: i64) -> Self {
        let base = BinningScheme::csi(min_shift);
        Self::with_scheme(
            IndexFormat::Csi,
            BinningScheme::adjusted_for(base.min_shift, base.depth, max_ref_len),
        )
    }

    pub fn with_scheme(format: IndexFormat, scheme: BinningScheme) -> Self {
        IndexBuilder {
            format,
            scheme,
            refs: Vec::new(),
            n_no_coor: 0,
            run: None,
            last: None,
            finished: false,
        }
    }

    pub fn scheme(&self) -> &BinningScheme {
        &self.scheme
    }

    pub fn push(
        &mut self,
        tid: usize,
        beg: i64,
        end: i64,
        voff: VirtualOffset,
        is_mapped: bool,
    ) -> Result<(), IndexError> {
        if self.finished {
            return Err(IndexError::AlreadyFinished);
        }
        if beg < 0 || beg >= end {
            return Err(IndexError::invalid_record(format!(
                "empty or negative interval [{}, {})",
                beg, end
            )));
        }
        if end > self.scheme.max_pos() {
            return Err(IndexError::invalid_record(format!(
                "interval end {} exceeds the addressable maximum {} ({} levels of shift {})",
                end,
                self.scheme.max_pos(),
                self.scheme.depth,
                self.scheme.min_shift
            )));
        }
        if let Some(last) = self.last {
            if voff < last.off || (tid, beg) < (last.tid, last.beg) {
                return Err(IndexError::UnsortedInput {
                    tid,
                    pos: beg,
                    last_tid: last.tid,
                    last_pos: last.beg,
                });
            }
        }

        if tid >= self.refs.len() {
            self.refs.resize_with(tid + 1, ReferenceIndex::default);
        }

        let bin = self.scheme.bin_for_interval(beg, end);

        match self.run {
            Some(run) if run.tid == tid && run.bin == bin => {}
            Some(run) => {
                self.refs[run.tid].add_chunk(run.bin, Chunk::new(run.off, voff));
                if run.tid != tid {
                    // previous reference's bytes end where this record starts
                    if let Some(stats) = self.refs[run.tid].stats.as_mut() {
                        stats.off_end = voff;
                    }
                }
                self.run = Some(Run { tid, bin, off: voff });
            }
            None => self.run = Some(Run { tid, bin, off: voff }),
        }

        let stats = self.refs[tid].stats.get_or_insert_with(|| RefStats {
            off_beg: voff,
            off_end: voff,
            ..RefStats::default()
        });
        if is_mapped {
            stats.n_mapped += 1;
        } else {
            stats.n_unmapped += 1;
        }

        if is_mapped {
            let first = self.scheme.first_leaf(beg);
            let last_leaf = self.scheme.first_leaf(end - 1);
            self.refs[tid].add_linear(first, last_leaf, voff);
        }

        self.last = Some(LastRecord {
            tid,
            beg,
            off: voff,
        });
        Ok(())
    }

    /// Flushes the open chunk, closes out per-reference metadata, normalizes
    /// every reference table, and freezes the result.
    ///
    /// `final_voff` is the offset one past the last indexed byte.
    pub fn finish(
        &mut self,
        final_voff: VirtualOffset,
        conf: Config,
        dict: ReferenceDictionary,
    ) -> Result<Index, IndexError> {
        if self.finished {
            return Err(IndexError::AlreadyFinished);
        }
        self.finished = true;

        if let Some(run) = self.run.take() {
            if final_voff < run.off {
                return Err(IndexError::invalid_record(format!(
                    "final offset {} precedes the open chunk at {}",
                    final_voff, run.off
                )));
            }
            self.refs[run.tid].add_chunk(run.bin, Chunk::new(run.off, final_voff));
            if let Some(stats) = self.refs[run.tid].stats.as_mut() {
                stats.off_end = final_voff;
            }
        }

        // references named in the dictionary but never pushed still get an
        // (empty) table on disk
        if dict.len() > self.refs.len() {
            self.refs.resize_with(dict.len(), ReferenceIndex::default);
        }

        for r in &mut self.refs {
            r.finalize(&self.scheme);
        }

        Ok(Index {
            format: self.format,
            scheme: self.scheme,
            conf,
            dict,
            refs: std::mem::take(&mut self.refs),
            n_no_coor: self.n_no_coor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn finish(builder: &mut IndexBuilder, final_voff: u64) -> Index {
        builder
            .finish(final_voff.into(), Config::bed(), ReferenceDictionary::new())
            .unwrap()
    }

    #[test]
    fn test_single_record() {
        let mut b = IndexBuilder::tbi();
        b.push(0, 100, 200, 1000.into(), true).unwrap();
        let index = finish(&mut b, 2000);

        let r = &index.refs[0];
        let bin = index.scheme.bin_for_interval(100, 200);
        let chunks = &r.bins[&bin].chunks;
        assert_eq!(chunks, &vec![Chunk::new(1000.into(), 2000.into())]);

        let stats = r.stats.unwrap();
        assert_eq!(stats.off_beg.value(), 1000);
        assert_eq!(stats.off_end.value(), 2000);
        assert_eq!(stats.n_mapped, 1);
        assert_eq!(stats.n_unmapped, 0);
    }

    #[test]
    fn test_same_bin_records_share_a_chunk() {
        let mut b = IndexBuilder::tbi();
        b.push(0, 10, 20, 100.into(), true).unwrap();
        b.push(0, 30, 40, 200.into(), true).unwrap();
        // different leaf bin: closes the run
        b.push(0, 1 << 20, (1 << 20) + 10, 300.into(), true).unwrap();
        let index = finish(&mut b, 400);

        let r = &index.refs[0];
        let first_bin = index.scheme.bin_for_interval(10, 20);
        assert_eq!(
            r.bins[&first_bin].chunks,
            vec![Chunk::new(100.into(), 300.into())]
        );
        let second_bin = index.scheme.bin_for_interval(1 << 20, (1 << 20) + 10);
        assert_eq!(
            r.bins[&second_bin].chunks,
            vec![Chunk::new(300.into(), 400.into())]
        );
    }

    #[test]
    fn test_reference_switch_closes_stats() {
        let mut b = IndexBuilder::tbi();
        b.push(0, 10, 20, 100.into(), true).unwrap();
        b.push(1, 5, 15, 250.into(), true).unwrap();
        let index = finish(&mut b, 400);

        let s0 = index.refs[0].stats.unwrap();
        assert_eq!((s0.off_beg.value(), s0.off_end.value()), (100, 250));
        let s1 = index.refs[1].stats.unwrap();
        assert_eq!((s1.off_beg.value(), s1.off_end.value()), (250, 400));
    }

    #[test]
    fn test_unsorted_rejected() {
        let mut b = IndexBuilder::tbi();
        b.push(0, 2000, 3000, 100.into(), true).unwrap();
        assert!(matches!(
            b.push(0, 1000, 2000, 200.into(), true),
            Err(IndexError::UnsortedInput { .. })
        ));

        // going back to an earlier reference is unsorted too
        let mut b = IndexBuilder::tbi();
        b.push(1, 10, 20, 100.into(), true).unwrap();
        assert!(matches!(
            b.push(0, 10, 20, 200.into(), true),
            Err(IndexError::UnsortedInput { .. })
        ));

        // offsets must not regress
        let mut b = IndexBuilder::tbi();
        b.push(0, 10, 20, 100.into(), true).unwrap();
        assert!(matches!(
            b.push(0, 30, 40, 50.into(), true),
            Err(IndexError::UnsortedInput { .. })
        ));
    }

    #[test]
    fn test_ties_allowed() {
        let mut b = IndexBuilder::tbi();
        b.push(0, 1000, 2000, 100.into(), true).unwrap();
        b.push(0, 1000, 2000, 100.into(), true).unwrap();
        b.push(0, 1000, 2500, 200.into(), true).unwrap();
        b.push(0, 2000, 3000, 300.into(), true).unwrap();
        finish(&mut b, 400);
    }

    #[test]
    fn test_invalid_records_rejected() {
        let mut b = IndexBuilder::tbi();
        assert!(matches!(
            b.push(0, 20, 20, 100.into(), true),
            Err(IndexError::InvalidRecord(_))
        ));
        assert!(matches!(
            b.push(0, 30, 20, 100.into(), true),
            Err(IndexError::InvalidRecord(_))
        ));
        let max = BinningScheme::TBI.max_pos();
        assert!(matches!(
            b.push(0, max - 1, max + 1, 100.into(), true),
            Err(IndexError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_push_after_finish_fails() {
        let mut b = IndexBuilder::tbi();
        b.push(0, 10, 20, 100.into(), true).unwrap();
        finish(&mut b, 200);
        assert!(matches!(
            b.push(0, 30, 40, 300.into(), true),
            Err(IndexError::AlreadyFinished)
        ));
    }

    #[test]
    fn test_empty_finish() {
        let mut b = IndexBuilder::tbi();
        let index = finish(&mut b, 0);
        assert!(index.refs.is_empty());
        assert!(index.seqnames().is_empty());
    }

    #[test]
    fn test_deep_coordinates_with_adjusted_depth() {
        let mut b = IndexBuilder::csi(14, 1 << 40);
        b.push(0, 1 << 40, (1 << 40) + 100, 500.into(), true).unwrap();
        let index = finish(&mut b, 600);
        let chunks = index.query(0, 1 << 40, (1 << 40) + 1).unwrap();
        assert!(chunks.iter().any(|c| c.contains(500.into())));
    }

    proptest! {
        // Every pushed record stays reachable: querying its interval yields a
        // chunk covering its offset.
        #[test]
        fn test_records_reachable(raw in proptest::collection::vec((0usize..3, 0i64..1_000_000, 1i64..50_000), 1..60)) {
            let mut records: Vec<(usize, i64, i64)> = raw;
            records.sort_unstable_by_key(|&(tid, beg, _)| (tid, beg));

            let mut b = IndexBuilder::tbi();
            let mut voff = 100u64;
            let mut placed = Vec::new();
            for &(tid, beg, len) in &records {
                b.push(tid, beg, beg + len, voff.into(), true).unwrap();
                placed.push((tid, beg, beg + len, voff));
                voff += 37;
            }
            let index = finish(&mut b, voff);

            for &(tid, beg, end, off) in &placed {
                let chunks = index.query(tid, beg, end).unwrap();
                prop_assert!(chunks.iter().any(|c| c.contains(off.into())),
                    "record (tid {}, [{}, {})) at {} not covered by {:?}", tid, beg, end, off, chunks);
            }
        }

        // After finish every linear index is monotone over its whole length.
        #[test]
        fn test_linear_monotone(raw in proptest::collection::vec((0i64..2_000_000, 1i64..100_000), 1..40)) {
            let mut records: Vec<(i64, i64)> = raw;
            records.sort_unstable();

            let mut b = IndexBuilder::tbi();
            let mut voff = 1u64;
            for &(beg, len) in &records {
                b.push(0, beg, beg + len, voff.into(), true).unwrap();
                voff += 11;
            }
            let index = finish(&mut b, voff);

            let linear = index.refs[0].linear();
            prop_assert!(linear.windows(2).all(|w| w[0] <= w[1]));
        }

        // No two chunks in one bin overlap or touch after finish.
        #[test]
        fn test_chunks_coalesced(raw in proptest::collection::vec((0i64..200_000, 1i64..5_000), 1..60)) {
            let mut records: Vec<(i64, i64)> = raw;
            records.sort_unstable();

            let mut b = IndexBuilder::tbi();
            let mut voff = 1u64;
            for &(beg, len) in &records {
                b.push(0, beg, beg + len, voff.into(), true).unwrap();
                voff += 13;
            }
            let index = finish(&mut b, voff);

            for bin in index.refs[0].bins().values() {
                for w in bin.chunks.windows(2) {
                    prop_assert!(w[0].end < w[1].start, "chunks {:?} not coalesced", bin.chunks);
                }
            }
        }
    }
}
