//! Total read depth at candidate positions.

use std::collections::HashMap;
use std::ops::ControlFlow;

use log::info;

use crate::bam::CigarShape;
use crate::config::Thresholds;
use crate::error::Result;
use crate::input::{AlignmentRecord, AlignmentSource, FlagFilter};

/// Counts reads covering a sorted set of positions in one coordinate-ordered pass.
pub struct DepthCounter<'a> {
    positions: &'a [u64],
    mapping_quality: u8,
    low: usize,
    depth: HashMap<u64, u32>,
}

impl<'a> DepthCounter<'a> {
    /// `positions` must be sorted and distinct.
    pub fn new(positions: &'a [u64], thresholds: &Thresholds) -> Self {
        Self { positions, mapping_quality: thresholds.mapping_quality, low: 0, depth: HashMap::new() }
    }

    /// Count one record. `Break` once records start past the last position.
    pub fn process(&mut self, record: &AlignmentRecord) -> ControlFlow<()> {
        let (Some(&min), Some(&max)) = (self.positions.first(), self.positions.last()) else {
            return ControlFlow::Break(());
        };
        if record.mapq <= self.mapping_quality || record.has_ambiguous_base() {
            return ControlFlow::Continue(());
        }
        let Some(shape) = CigarShape::classify(&record.cigar) else {
            return ControlFlow::Continue(());
        };
        let start = record.pos;
        let end = start + shape.reference_span() as u64 - 1;
        if end < min {
            return ControlFlow::Continue(());
        }
        if max < start {
            return ControlFlow::Break(());
        }

        while self.low < self.positions.len() && self.positions[self.low] < start {
            self.low += 1;
        }
        for &pos in self.positions[self.low..].iter().take_while(|&&p| p <= end) {
            *self.depth.entry(pos).or_insert(0) += 1;
        }
        ControlFlow::Continue(())
    }

    pub fn finish(self) -> HashMap<u64, u32> {
        self.depth
    }
}

/// Depth at each of `positions` from the chromosome's properly paired reads.
pub fn count_depth(
    source: &mut dyn AlignmentSource,
    chr: &str,
    positions: &[u64],
    thresholds: &Thresholds,
) -> Result<HashMap<u64, u32>> {
    let mut counter = DepthCounter::new(positions, thresholds);
    if !positions.is_empty() {
        source.visit_records(chr, FlagFilter::proper_pairs(), &mut |record| counter.process(record))?;
    }
    let depth = counter.finish();
    info!("Depth counted at {} of {} positions", depth.len(), positions.len());
    Ok(depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::CigarKind;

    fn record(pos: u64, cigar: &[(CigarKind, usize)]) -> AlignmentRecord {
        AlignmentRecord { pos, mapq: 60, seq: b"ACGT".to_vec(), cigar: cigar.to_vec(), ..Default::default() }
    }

    #[test]
    fn test_counts_covering_reads() {
        let t = Thresholds::default();
        let positions = [110, 150, 300];
        let mut counter = DepthCounter::new(&positions, &t);
        let m50 = [(CigarKind::Match, 50)];
        assert!(counter.process(&record(50, &m50)).is_continue()); // 50..99, before all
        assert!(counter.process(&record(100, &m50)).is_continue()); // 100..149
        assert!(counter.process(&record(105, &[(CigarKind::Match, 20), (CigarKind::Deletion, 30), (CigarKind::Match, 10)])).is_continue()); // 105..164
        assert!(counter.process(&record(120, &[(CigarKind::SoftClip, 5), (CigarKind::Match, 40)])).is_continue()); // 120..159
        assert!(counter.process(&record(130, &[(CigarKind::HardClip, 5), (CigarKind::Match, 40)])).is_continue()); // unrecognized
        assert!(counter.process(&record(301, &m50)).is_break());
        let depth = counter.finish();
        assert_eq!(depth.get(&110), Some(&2));
        assert_eq!(depth.get(&150), Some(&2));
        assert_eq!(depth.get(&300), None);
    }

    #[test]
    fn test_interleaved_read_ends() {
        let t = Thresholds::default();
        let positions = [102, 110, 125, 135, 199, 250];
        let mut counter = DepthCounter::new(&positions, &t);
        assert!(counter.process(&record(100, &[(CigarKind::Match, 100)])).is_continue()); // 100..199
        assert!(counter.process(&record(105, &[(CigarKind::Match, 16)])).is_continue()); // 105..120
        assert!(counter.process(&record(130, &[(CigarKind::Match, 11)])).is_continue()); // 130..140
        // ends before the last position but still covers nothing pending
        assert!(counter.process(&record(200, &[(CigarKind::Match, 10)])).is_continue()); // 200..209
        assert!(counter.process(&record(251, &[(CigarKind::Match, 10)])).is_break());
        let depth = counter.finish();
        assert_eq!(depth.get(&102), Some(&1));
        assert_eq!(depth.get(&110), Some(&2));
        assert_eq!(depth.get(&125), Some(&1));
        assert_eq!(depth.get(&135), Some(&2));
        assert_eq!(depth.get(&199), Some(&1));
        assert_eq!(depth.get(&250), None);
    }

    #[test]
    fn test_quality_filters() {
        let t = Thresholds::default();
        let positions = [110];
        let mut counter = DepthCounter::new(&positions, &t);
        let mut low_mapq = record(100, &[(CigarKind::Match, 50)]);
        low_mapq.mapq = 20;
        counter.process(&low_mapq);
        let mut with_n = record(100, &[(CigarKind::Match, 50)]);
        with_n.seq = b"ACNT".to_vec();
        counter.process(&with_n);
        assert!(counter.finish().is_empty());
    }
}
