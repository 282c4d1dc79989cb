//! Evidence extraction: soft-clipped reads, short split-read indels and
//! rescued unmapped mates, plus the insert-size statistics the rescue needs.

use std::collections::HashMap;
use std::ops::ControlFlow;

use log::{debug, info};

use crate::bam::{CigarShape, ClipSide};
use crate::config::Thresholds;
use crate::error::Result;
use crate::input::{
    AlignmentRecord, AlignmentSource, FlagFilter, FLAG_MATE_UNMAPPED, FLAG_REVERSE, FLAG_UNMAPPED,
};

/// Kind of evidence a read contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadKind {
    /// Soft clip after the aligned bases
    BackwardClip,
    /// Soft clip before the aligned bases
    ForwardClip,
    ShortDeletion,
    ShortInsertion,
    /// Unmapped read placed near its mapped mate
    Unmapped,
}

impl ReadKind {
    pub fn label(&self) -> &'static str {
        match self {
            ReadKind::BackwardClip => "B",
            ReadKind::ForwardClip => "F",
            ReadKind::ShortDeletion => "SD",
            ReadKind::ShortInsertion => "SI",
            ReadKind::Unmapped => "U",
        }
    }

    pub fn is_clip(&self) -> bool {
        matches!(self, ReadKind::BackwardClip | ReadKind::ForwardClip)
    }
}

/// One read's worth of evidence. Positions are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRead {
    /// Serial assigned at extraction; identity for cross-orientation merging
    pub id: u32,
    pub kind: ReadKind,
    pub start: u64,
    pub end: u64,
    /// Full read sequence, upper-cased
    pub sequence: String,
    pub clip_length: Option<usize>,
    pub depth: u32,
}

/// Insert-size summary over properly paired reads with positive template length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsertSizeStats {
    pub mean: f64,
    pub sd: f64,
    pub min: i64,
    pub max: i64,
}

impl InsertSizeStats {
    /// Mean and population SD; the accepted range is mean +/- 3 SD.
    pub fn from_sizes(sizes: &[i32]) -> Option<Self> {
        if sizes.is_empty() {
            return None;
        }
        let n = sizes.len() as f64;
        let mean = sizes.iter().map(|&s| s as f64).sum::<f64>() / n;
        let var = sizes.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n;
        let sd = var.sqrt();
        Some(Self {
            mean,
            sd,
            min: (mean - 3.0 * sd) as i64,
            max: (mean + 3.0 * sd) as i64,
        })
    }
}

/// Everything gathered from the clip/split-read scan of one chromosome.
#[derive(Debug, Clone, Default)]
pub struct ClipEvidence {
    pub backward_clips: Vec<EvidenceRead>,
    pub forward_clips: Vec<EvidenceRead>,
    pub short_indels: Vec<EvidenceRead>,
    /// Longest trailing clip sequence per clip position
    pub longest_backward_clip: HashMap<u64, String>,
    /// Longest leading clip sequence per clip position
    pub longest_forward_clip: HashMap<u64, String>,
    /// Longest read aligned without clips or indels
    pub max_read_len: usize,
    /// `None` when no template lengths were seen
    pub insert_sizes: Option<InsertSizeStats>,
}

impl ClipEvidence {
    pub fn read_count(&self) -> usize {
        self.backward_clips.len() + self.forward_clips.len() + self.short_indels.len()
    }
}

fn mean_quality(qual: &[u8]) -> f64 {
    if qual.is_empty() {
        return 0.0;
    }
    qual.iter().map(|&q| q as f64).sum::<f64>() / qual.len() as f64
}

/// Mapped records that pass the mapping quality and ambiguity filters.
fn usable(record: &AlignmentRecord, t: &Thresholds) -> bool {
    record.mapq > t.mapping_quality && !record.has_ambiguous_base()
}

// ============================================================================
// Clip and split-read scan
// ============================================================================

/// Accumulates evidence from records one at a time.
pub struct EvidenceCollector<'a> {
    thresholds: &'a Thresholds,
    next_id: u32,
    insert_sizes: Vec<i32>,
    evidence: ClipEvidence,
}

impl<'a> EvidenceCollector<'a> {
    pub fn new(thresholds: &'a Thresholds) -> Self {
        Self { thresholds, next_id: 0, insert_sizes: Vec::new(), evidence: ClipEvidence::default() }
    }

    fn read(&mut self, kind: ReadKind, start: u64, end: u64, record: &AlignmentRecord, clip: Option<usize>) -> EvidenceRead {
        let id = self.next_id;
        self.next_id += 1;
        if record.tlen > 0 {
            self.insert_sizes.push(record.tlen);
        }
        EvidenceRead {
            id,
            kind,
            start,
            end,
            sequence: String::from_utf8_lossy(&record.seq).to_ascii_uppercase(),
            clip_length: clip,
            depth: 1,
        }
    }

    /// Process a single properly paired, non-duplicate record.
    pub fn process(&mut self, record: &AlignmentRecord) {
        let t = self.thresholds;
        if !usable(record, t) {
            return;
        }
        let Some(shape) = CigarShape::classify(&record.cigar) else {
            return;
        };
        let pos = record.pos;

        if let CigarShape::Match { m } = shape {
            self.evidence.max_read_len = self.evidence.max_read_len.max(m);
            return;
        }

        if let Some((side, clip)) = shape.soft_clip() {
            let len = record.seq.len();
            if clip <= t.clip_length || clip > len || record.qual.len() != len {
                return;
            }
            let range = match side {
                ClipSide::Trailing => len - clip..len,
                ClipSide::Leading => 0..clip,
            };
            if mean_quality(&record.qual[range.clone()]) <= t.base_quality as f64 {
                return;
            }
            let clipped = String::from_utf8_lossy(&record.seq[range]).to_ascii_uppercase();
            match side {
                ClipSide::Trailing => {
                    let clip_pos = pos + shape.reference_span() as u64 - 1;
                    let read = self.read(ReadKind::BackwardClip, clip_pos, clip_pos, record, Some(clip));
                    self.evidence.backward_clips.push(read);
                    keep_longest(&mut self.evidence.longest_backward_clip, clip_pos, clipped);
                }
                ClipSide::Leading => {
                    let read = self.read(ReadKind::ForwardClip, pos, pos, record, Some(clip));
                    self.evidence.forward_clips.push(read);
                    keep_longest(&mut self.evidence.longest_forward_clip, pos, clipped);
                }
            }
            return;
        }

        match shape {
            CigarShape::MatchInsMatch { m1, .. } => {
                let at = pos + m1 as u64 - 1;
                let read = self.read(ReadKind::ShortInsertion, at, at, record, None);
                self.evidence.short_indels.push(read);
            }
            CigarShape::MatchDelMatch { m1, del, .. } => {
                let at = pos + m1 as u64 - 1;
                let read = self.read(ReadKind::ShortDeletion, at, at + del as u64 - 1, record, None);
                self.evidence.short_indels.push(read);
            }
            _ => {}
        }
    }

    pub fn finish(mut self) -> ClipEvidence {
        self.evidence.insert_sizes = InsertSizeStats::from_sizes(&self.insert_sizes);
        self.evidence
    }
}

fn keep_longest(map: &mut HashMap<u64, String>, pos: u64, clipped: String) {
    let entry = map.entry(pos).or_default();
    if clipped.len() > entry.len() {
        *entry = clipped;
    }
}

/// Scan the chromosome for clip and split-read evidence.
pub fn collect_clip_evidence(source: &mut dyn AlignmentSource, chr: &str, thresholds: &Thresholds) -> Result<ClipEvidence> {
    let mut collector = EvidenceCollector::new(thresholds);
    source.visit_records(chr, FlagFilter::proper_pairs(), &mut |record| {
        collector.process(record);
        ControlFlow::Continue(())
    })?;
    let evidence = collector.finish();
    info!(
        "Evidence on {}: {} backward clips, {} forward clips, {} short indels",
        chr,
        evidence.backward_clips.len(),
        evidence.forward_clips.len(),
        evidence.short_indels.len()
    );
    if let Some(stats) = &evidence.insert_sizes {
        debug!("Insert size mean {:.1}, sd {:.1}, range {}..{}", stats.mean, stats.sd, stats.min, stats.max);
    }
    Ok(evidence)
}

// ============================================================================
// Unmapped mate rescue
// ============================================================================

/// Strand of the mapped mate, which decides where its unmapped partner lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MateStrand {
    Forward,
    Reverse,
}

/// Reverse complement after stripping leading/trailing `N`; `None` if an `N` remains.
pub fn reverse_complement(seq: &str) -> Option<String> {
    let trimmed = seq.trim_matches(|c| c == 'N' || c == 'n');
    let mut out = String::with_capacity(trimmed.len());
    for b in trimmed.bytes().rev() {
        let c = match b.to_ascii_uppercase() {
            b'A' => 'T',
            b'T' => 'A',
            b'C' => 'G',
            b'G' => 'C',
            b'N' => return None,
            other => other as char,
        };
        out.push(c);
    }
    Some(out)
}

/// Span an unmapped read is expected to cover, given its mate's strand.
fn place_unmapped(pos: u64, strand: MateStrand, stats: &InsertSizeStats, max_read_len: usize) -> Option<(u64, u64)> {
    let pos = pos as i64;
    let (start, end) = match strand {
        MateStrand::Forward => (pos + max_read_len as i64 - stats.max, pos),
        MateStrand::Reverse => (pos + stats.min, pos + stats.max),
    };
    if start < 1 || end < start {
        return None;
    }
    Some((start as u64, end as u64))
}

/// Collect unmapped reads whose mapped mate sits on this chromosome.
///
/// Reads whose mate was not seen, or whose placement falls before the
/// chromosome start, are dropped.
pub fn collect_unmapped_reads(
    source: &mut dyn AlignmentSource,
    chr: &str,
    thresholds: &Thresholds,
    evidence: &ClipEvidence,
    first_id: u32,
) -> Result<Vec<EvidenceRead>> {
    let Some(stats) = evidence.insert_sizes else {
        return Ok(Vec::new());
    };

    let mut mates: HashMap<String, MateStrand> = HashMap::new();
    source.visit_records(chr, FlagFilter::with_flag(FLAG_MATE_UNMAPPED), &mut |record| {
        if record.mapq > thresholds.mapping_quality
            && let Some(name) = &record.name
        {
            let strand = if record.has_flag(FLAG_REVERSE) { MateStrand::Reverse } else { MateStrand::Forward };
            mates.insert(name.clone(), strand);
        }
        ControlFlow::Continue(())
    })?;

    let mut reads = Vec::new();
    let mut next_id = first_id;
    source.visit_records(chr, FlagFilter::with_flag(FLAG_UNMAPPED), &mut |record| {
        if mean_quality(&record.qual) <= thresholds.base_quality as f64 {
            return ControlFlow::Continue(());
        }
        let Some(strand) = record.name.as_ref().and_then(|n| mates.get(n)).copied() else {
            return ControlFlow::Continue(());
        };
        let Some((start, end)) = place_unmapped(record.pos, strand, &stats, evidence.max_read_len) else {
            return ControlFlow::Continue(());
        };
        let raw = String::from_utf8_lossy(&record.seq).to_ascii_uppercase();
        let sequence = match strand {
            MateStrand::Forward => raw,
            MateStrand::Reverse => match reverse_complement(&raw) {
                Some(rc) => rc,
                None => return ControlFlow::Continue(()),
            },
        };
        reads.push(EvidenceRead {
            id: next_id,
            kind: ReadKind::Unmapped,
            start,
            end,
            sequence,
            clip_length: None,
            depth: 1,
        });
        next_id += 1;
        ControlFlow::Continue(())
    })?;

    reads.sort_by_key(|r| r.start);
    info!("Mate-unmapped names: {}, placed unmapped reads: {}", mates.len(), reads.len());
    Ok(reads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{CigarKind, FLAG_PROPER_PAIR};

    fn record(pos: u64, cigar: &[(CigarKind, usize)], seq: &str, qual: u8) -> AlignmentRecord {
        AlignmentRecord {
            name: Some("r".to_string()),
            pos,
            flag: 0x1 | FLAG_PROPER_PAIR,
            mapq: 60,
            seq: seq.as_bytes().to_vec(),
            qual: vec![qual; seq.len()],
            cigar: cigar.to_vec(),
            tlen: 300,
        }
    }

    #[test]
    fn test_backward_and_forward_clips() {
        let t = Thresholds::default();
        let mut collector = EvidenceCollector::new(&t);
        let seq = "ACGTACGTACGTACGTACGTGGGGGGTTTT";
        collector.process(&record(100, &[(CigarKind::Match, 20), (CigarKind::SoftClip, 10)], seq, 30));
        collector.process(&record(200, &[(CigarKind::SoftClip, 10), (CigarKind::Match, 20)], seq, 30));
        let ev = collector.finish();

        assert_eq!(ev.backward_clips.len(), 1);
        assert_eq!(ev.backward_clips[0].start, 119);
        assert_eq!(ev.backward_clips[0].sequence, seq);
        assert_eq!(ev.longest_backward_clip.get(&119).map(String::as_str), Some("GGGGGGTTTT"));

        assert_eq!(ev.forward_clips.len(), 1);
        assert_eq!(ev.forward_clips[0].start, 200);
        assert_eq!(ev.longest_forward_clip.get(&200).map(String::as_str), Some("ACGTACGTAC"));
        assert_ne!(ev.backward_clips[0].id, ev.forward_clips[0].id);
        assert_eq!(ev.insert_sizes.map(|s| s.mean), Some(300.0));
    }

    #[test]
    fn test_clip_filters() {
        let t = Thresholds::default();
        let mut collector = EvidenceCollector::new(&t);
        let seq = "ACGTACGTACGTACGTACGTGGGGG";
        // clip of 5 is not longer than the minimum
        collector.process(&record(100, &[(CigarKind::Match, 20), (CigarKind::SoftClip, 5)], seq, 30));
        // low quality clip
        collector.process(&record(100, &[(CigarKind::Match, 15), (CigarKind::SoftClip, 10)], seq, 10));
        // ambiguous base
        collector.process(&record(100, &[(CigarKind::Match, 15), (CigarKind::SoftClip, 10)], "NCGTACGTACGTACGTACGTGGGGG", 30));
        let ev = collector.finish();
        assert_eq!(ev.read_count(), 0);
    }

    #[test]
    fn test_short_indels_and_read_length() {
        let t = Thresholds::default();
        let mut collector = EvidenceCollector::new(&t);
        let seq = "ACGTACGTACGTACGTACGT";
        collector.process(&record(
            1000,
            &[(CigarKind::Match, 8), (CigarKind::Insertion, 2), (CigarKind::Match, 10)],
            seq,
            30,
        ));
        collector.process(&record(
            1000,
            &[(CigarKind::Match, 8), (CigarKind::Deletion, 3), (CigarKind::Match, 12)],
            seq,
            30,
        ));
        collector.process(&record(1000, &[(CigarKind::Match, 20)], seq, 30));
        let ev = collector.finish();

        assert_eq!(ev.short_indels.len(), 2);
        let ins = &ev.short_indels[0];
        assert_eq!((ins.kind, ins.start, ins.end), (ReadKind::ShortInsertion, 1007, 1007));
        let del = &ev.short_indels[1];
        assert_eq!((del.kind, del.start, del.end), (ReadKind::ShortDeletion, 1007, 1009));
        assert_eq!(ev.max_read_len, 20);
    }

    #[test]
    fn test_insert_sizes_only_from_evidence_reads() {
        let t = Thresholds::default();
        let mut collector = EvidenceCollector::new(&t);
        let seq = "ACGTACGTACGTACGTACGTGGGGGGTTTT";
        collector.process(&record(100, &[(CigarKind::Match, 30)], seq, 30));
        let mut clipped = record(100, &[(CigarKind::Match, 20), (CigarKind::SoftClip, 10)], seq, 30);
        clipped.tlen = 500;
        collector.process(&clipped);
        let ev = collector.finish();

        assert_eq!(ev.read_count(), 1);
        assert_eq!(ev.insert_sizes.map(|s| s.mean), Some(500.0));
    }

    #[test]
    fn test_match_only_reads_give_no_insert_sizes() {
        let t = Thresholds::default();
        let mut collector = EvidenceCollector::new(&t);
        collector.process(&record(100, &[(CigarKind::Match, 20)], "ACGTACGTACGTACGTACGT", 30));
        let ev = collector.finish();
        assert_eq!(ev.max_read_len, 20);
        assert!(ev.insert_sizes.is_none());
    }

    #[test]
    fn test_insert_size_stats() {
        let stats = InsertSizeStats::from_sizes(&[290, 300, 310]).unwrap();
        assert!((stats.mean - 300.0).abs() < 1e-9);
        assert!((stats.sd - (200.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert_eq!(stats.min, 275);
        assert_eq!(stats.max, 324);
        assert!(InsertSizeStats::from_sizes(&[]).is_none());
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement("NNAAAGGN").as_deref(), Some("CCTTT"));
        assert_eq!(reverse_complement("ACGT").as_deref(), Some("ACGT"));
        assert_eq!(reverse_complement("ACNGT"), None);
    }

    #[test]
    fn test_place_unmapped() {
        let stats = InsertSizeStats { mean: 300.0, sd: 10.0, min: 270, max: 330 };
        assert_eq!(place_unmapped(1000, MateStrand::Reverse, &stats, 100), Some((1270, 1330)));
        assert_eq!(place_unmapped(1000, MateStrand::Forward, &stats, 100), Some((770, 1000)));
        assert_eq!(place_unmapped(100, MateStrand::Forward, &stats, 100), None);
    }
}
