//! Exact breakpoints from candidate-vs-reference alignments.
//!
//! Each candidate consensus is realigned against a reference window. The gap
//! layout of the two aligned strings decides between an insertion (gap in the
//! reference) and a deletion (gaps in the candidate only). Positions are then
//! left-aligned through homopolymers and tandem repeats, so equivalent
//! placements of the same event land on the same `(start, end)` key.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, info};

use crate::align::pairwise::{runs, Run};
use crate::align::{ambiguous_count, PairwiseAligner, PairwiseEngine};
use crate::config::Thresholds;
use crate::error::Result;
use crate::input::ReferenceSource;
use crate::var::consensus::{ConsensusKind, ConsensusRecord, MAX_PAIR_AMBIGUOUS, STRICT_IDENTITY, WORKING_IDENTITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Insertion,
    Deletion,
}

impl VariantKind {
    pub fn label(&self) -> &'static str {
        match self {
            VariantKind::Insertion => "INS",
            VariantKind::Deletion => "DEL",
        }
    }
}

/// One candidate's support for an indel at a breakpoint key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndelObservation {
    pub variant: VariantKind,
    pub origin: ConsensusKind,
    pub depth: u32,
    /// Candidate start before realignment; where total depth is looked up
    pub position: u64,
    pub sequence: String,
}

impl IndelObservation {
    /// `<INS|DEL>_<origin>_<depth>_<position>`
    pub fn trace(&self) -> String {
        format!("{}_{}_{}_{}", self.variant.label(), self.origin.label(), self.depth, self.position)
    }
}

/// Whether a key had been seen earlier in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Novelty {
    New,
    Same,
}

/// Breakpoint key: 1-based inclusive start and end.
pub type BreakpointKey = (u64, u64);

/// Observations accumulated per breakpoint key.
#[derive(Debug, Default)]
pub struct BreakpointBuckets {
    buckets: HashMap<BreakpointKey, Vec<IndelObservation>>,
}

impl BreakpointBuckets {
    pub fn record(&mut self, key: BreakpointKey, observation: IndelObservation) {
        self.buckets.entry(key).or_default().push(observation);
    }

    /// Freeze into a snapshot ordered by key.
    pub fn finalize(self) -> FinalizedBuckets {
        FinalizedBuckets { buckets: self.buckets.into_iter().collect() }
    }
}

/// Read-only buckets, iterated by ascending start then end.
#[derive(Debug, Clone, Default)]
pub struct FinalizedBuckets {
    buckets: BTreeMap<BreakpointKey, Vec<IndelObservation>>,
}

impl FinalizedBuckets {
    pub fn get(&self, key: &BreakpointKey) -> Option<&[IndelObservation]> {
        self.buckets.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BreakpointKey, &[IndelObservation])> {
        self.buckets.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

// ============================================================================
// Alignment patterns
// ============================================================================

/// Indel read from an aligned pair, before bucketing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub variant: VariantKind,
    pub start: u64,
    pub end: u64,
    pub sequence: String,
}

impl Breakpoint {
    pub fn key(&self) -> BreakpointKey {
        (self.start, self.end)
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_ascii_uppercase()
}

fn distinct_chars(bytes: &[u8]) -> usize {
    let mut seen: Vec<u8> = Vec::with_capacity(4);
    for &b in bytes {
        if !seen.contains(&b) {
            seen.push(b);
        }
    }
    seen.len()
}

fn bases(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| b != b'-').count()
}

/// Interpret an aligned candidate/reference pair whose reference window
/// starts at `reference_start`. `None` when the layout is not an indel or
/// the flanks are too short to trust.
pub fn classify_alignment(
    kind: ConsensusKind,
    aligned_candidate: &str,
    aligned_reference: &str,
    reference_start: u64,
    thresholds: &Thresholds,
) -> Option<Breakpoint> {
    let cand = aligned_candidate.as_bytes();
    let refr = aligned_reference.as_bytes();
    let cand_runs = runs(aligned_candidate);
    let single_run_candidate = matches!(cand_runs.as_slice(), [Run::Gap(_), Run::Bases(_), Run::Gap(_)]);

    match runs(aligned_reference).as_slice() {
        &[Run::Bases(r1), Run::Gap(g1), Run::Bases(r2), Run::Gap(g2), Run::Bases(_)] if kind.is_long_insertion() => {
            if !single_run_candidate {
                return None;
            }
            let (from, len, pos) = if g1 > g2 {
                (r1, g1, reference_start + r1 as u64 - 1)
            } else {
                (r1 + g1 + r2, g2, reference_start + (r1 + r2) as u64 - 1)
            };
            Some(Breakpoint {
                variant: VariantKind::Insertion,
                start: pos,
                end: pos,
                sequence: text(cand.get(from..from + len)?),
            })
        }
        &[Run::Bases(r1), Run::Gap(g1), Run::Bases(_)] => {
            if !single_run_candidate {
                return None;
            }
            let before = cand.get(..r1)?;
            let after = cand.get(r1 + g1..)?;
            if distinct_chars(before) == 1 || distinct_chars(after) == 1 {
                debug!("No anchoring overlap around insertion at {}", reference_start + r1 as u64);
                return None;
            }
            let min_flank = thresholds.insertion_min_flank;
            if bases(before) < min_flank || bases(after) < min_flank {
                debug!("Too little overlap around insertion at {}", reference_start + r1 as u64);
                return None;
            }
            let inserted = cand.get(r1..r1 + g1)?.to_ascii_uppercase();
            let prefix = refr.get(..r1)?.to_ascii_uppercase();
            let (start, sequence) = left_align(&prefix, &inserted, reference_start + r1 as u64 - 1);
            Some(Breakpoint { variant: VariantKind::Insertion, start, end: start, sequence: text(&sequence) })
        }
        &[Run::Bases(_)] => {
            let &[Run::Gap(g1), Run::Bases(s1), Run::Gap(g2), Run::Bases(s2), Run::Gap(_)] = cand_runs.as_slice() else {
                return None;
            };
            let min_flank = thresholds.deletion_min_flank;
            if s1 < min_flank || s2 < min_flank {
                debug!("Too little overlap around deletion at {}", reference_start + (g1 + s1) as u64);
                return None;
            }
            let anchor = g1 + s1;
            let deleted = refr.get(anchor..anchor + g2)?.to_ascii_uppercase();
            let prefix = refr.get(..anchor)?.to_ascii_uppercase();
            let (start, sequence) = left_align(&prefix, &deleted, reference_start + anchor as u64);
            let end = start + sequence.len() as u64 - 1;
            Some(Breakpoint { variant: VariantKind::Deletion, start, end, sequence: text(&sequence) })
        }
        _ => None,
    }
}

/// Shift an indel at `position`, preceded by reference bases `prefix`, to its
/// leftmost equivalent placement.
///
/// A monomer moves left through matching bases. Otherwise the sequence moves
/// left by whole copies of itself found at the end of the prefix, then by a
/// partial rotation. Returns the new position and the (possibly rotated)
/// sequence.
pub fn left_align(prefix: &[u8], sequence: &[u8], position: u64) -> (u64, Vec<u8>) {
    let size = sequence.len();
    if size == 0 {
        return (position, Vec::new());
    }
    if distinct_chars(sequence) == 1 {
        let shift = prefix.iter().rev().take_while(|&&b| b == sequence[0]).count();
        return (position.saturating_sub(shift as u64), sequence.to_vec());
    }

    let copies = prefix
        .rchunks_exact(size)
        .take_while(|unit| *unit == sequence)
        .count();
    let mut position = position.saturating_sub((copies * size) as u64);
    let prefix = &prefix[..prefix.len() - copies * size];

    let mut sequence = sequence.to_vec();
    for i in 1..=size {
        let matches = prefix.len() >= i && sequence[size - i..] == prefix[prefix.len() - i..];
        if !matches {
            if i > 1 {
                sequence.rotate_right(i - 1);
                position = position.saturating_sub((i - 1) as u64);
            }
            break;
        }
    }
    (position, sequence)
}

// ============================================================================
// Resolver
// ============================================================================

/// Buckets and depth positions produced by one resolution run.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub buckets: FinalizedBuckets,
    /// Sorted, distinct candidate positions needing total depth
    pub positions: Vec<u64>,
}

/// Realigns candidates and records their breakpoints for one run.
pub struct BreakpointResolver<'a> {
    aligner: PairwiseAligner<'a>,
    thresholds: &'a Thresholds,
    seen: HashSet<BreakpointKey>,
    buckets: BreakpointBuckets,
    positions: BTreeSet<u64>,
}

impl<'a> BreakpointResolver<'a> {
    pub fn new(engine: &'a dyn PairwiseEngine, thresholds: &'a Thresholds) -> Self {
        Self {
            aligner: PairwiseAligner::new(engine),
            thresholds,
            seen: HashSet::new(),
            buckets: BreakpointBuckets::default(),
            positions: BTreeSet::new(),
        }
    }

    /// Record an observation; the first one at a key is `New`.
    pub fn record(&mut self, key: BreakpointKey, observation: IndelObservation) -> Novelty {
        let novelty = if self.seen.insert(key) { Novelty::New } else { Novelty::Same };
        self.positions.insert(observation.position);
        self.buckets.record(key, observation);
        novelty
    }

    pub fn resolve_all(
        &mut self,
        chr: &str,
        candidates: &[ConsensusRecord],
        reference: &mut dyn ReferenceSource,
    ) -> Result<()> {
        let mut resolved = 0usize;
        for candidate in candidates {
            if self.resolve(chr, candidate, reference)?.is_some() {
                resolved += 1;
            }
        }
        info!("Resolved {} of {} candidates into {} breakpoints", resolved, candidates.len(), self.seen.len());
        Ok(())
    }

    /// Resolve one candidate; `None` when it yields no indel.
    pub fn resolve(
        &mut self,
        chr: &str,
        candidate: &ConsensusRecord,
        reference: &mut dyn ReferenceSource,
    ) -> Result<Option<Novelty>> {
        let observation = |variant, sequence: String| IndelObservation {
            variant,
            origin: candidate.kind,
            depth: candidate.depth,
            position: candidate.start,
            sequence,
        };

        if candidate.kind == ConsensusKind::UnpairedLongInsertion {
            let novelty = self.record(
                (candidate.start, candidate.end),
                observation(VariantKind::Insertion, candidate.sequence.clone()),
            );
            return Ok(Some(novelty));
        }

        let half = self.thresholds.max_indel_size / 2;
        let window_start = if candidate.start > half { candidate.start - half } else { 1 };
        let window_end = candidate.end + half;
        let window = reference.fetch(chr, window_start, window_end)?;
        let span = (candidate.start, candidate.end);

        let Some(strict) = self.aligner.align(&candidate.sequence, span, &window, window_start, STRICT_IDENTITY, None)? else {
            return Ok(None);
        };
        if strict.consensus.is_empty() || ambiguous_count(&strict.consensus) > MAX_PAIR_AMBIGUOUS {
            debug!("{} {}-{}: ambiguous realignment", candidate.kind.label(), candidate.start, candidate.end);
            return Ok(None);
        }
        let Some(working) = self.aligner.align(
            &candidate.sequence,
            span,
            &window,
            window_start,
            WORKING_IDENTITY,
            Some(strict.trim),
        )?
        else {
            return Ok(None);
        };

        let Some(breakpoint) = classify_alignment(
            candidate.kind,
            &working.aligned_candidate,
            &working.aligned_reference,
            working.reference_start,
            self.thresholds,
        ) else {
            debug!("{} {}-{}: not an indel", candidate.kind.label(), candidate.start, candidate.end);
            return Ok(None);
        };

        let key = breakpoint.key();
        let novelty = self.record(key, observation(breakpoint.variant, breakpoint.sequence));
        debug!(
            "{} {}-{} -> {} {}-{} ({:?})",
            candidate.kind.label(),
            candidate.start,
            candidate.end,
            breakpoint.variant.label(),
            key.0,
            key.1,
            novelty
        );
        Ok(Some(novelty))
    }

    pub fn finish(self) -> Resolution {
        Resolution { buckets: self.buckets.finalize(), positions: self.positions.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{NamedSequence, ReportMode};

    fn t() -> Thresholds {
        Thresholds::default()
    }

    #[test]
    fn test_single_gap_insertion() {
        let refr = "AACCGTTACGGT--CATGCATTGA";
        let cand = "--CCGTTACGGTTTCATGCATT--";
        let bp = classify_alignment(ConsensusKind::ShortIndel, cand, refr, 950, &t()).unwrap();
        // TT after a single T shifts left by one
        assert_eq!(bp, Breakpoint { variant: VariantKind::Insertion, start: 960, end: 960, sequence: "TT".into() });
    }

    #[test]
    fn test_insertion_flank_checks() {
        // nothing of the candidate overlaps the reference before the gap
        let refr = "AACCGTTACGGT--CATGCATTGA";
        let cand = "------------TTCATGCATT--";
        assert!(classify_alignment(ConsensusKind::ShortIndel, cand, refr, 950, &t()).is_none());

        // only four real bases after the gap
        let cand = "--CCGTTACGGTTTCATG------";
        assert!(classify_alignment(ConsensusKind::ShortIndel, cand, refr, 950, &t()).is_none());

        // candidate not gap/run/gap
        let cand = "ACCCGTTACGGTTTCATGCATT--";
        assert!(classify_alignment(ConsensusKind::ShortIndel, cand, refr, 950, &t()).is_none());
    }

    #[test]
    fn test_double_gap_long_insertion() {
        let refr = "ACGTACGTAC----GGT--------TTACGGACCA";
        let cand = "---TACGTACGGGGGGTACGTACGTATTACG----";
        let bp = classify_alignment(ConsensusKind::PairedLongInsertion, cand, refr, 1000, &t()).unwrap();
        // second gap is larger: position after r1 + r2 reference bases
        assert_eq!(bp.start, 1000 + 10 + 3 - 1);
        assert_eq!(bp.sequence, "ACGTACGT");

        // only long insertion kinds read double gaps
        assert!(classify_alignment(ConsensusKind::ShortIndel, cand, refr, 1000, &t()).is_none());
    }

    #[test]
    fn test_double_gap_first_gap_larger() {
        let refr = "ACGTACGTAC--------GGT----TTACGGACCA";
        let cand = "---TACGTACGGGGCCCCGGTAAAATTACGG----";
        let bp = classify_alignment(ConsensusKind::PairedLongInsertion, cand, refr, 1000, &t()).unwrap();
        // first gap is larger: position after r1 reference bases, sequence under that gap
        assert_eq!(bp, Breakpoint { variant: VariantKind::Insertion, start: 1009, end: 1009, sequence: "GGGGCCCC".into() });
    }

    #[test]
    fn test_deletion() {
        let refr = "GGACGTTGCAATCCCTAGCATGCATGG";
        let cand = "--ACGTTGCAAT---TAGCATGCAT--";
        let bp = classify_alignment(ConsensusKind::LongDeletion, cand, refr, 950, &t()).unwrap();
        assert_eq!(bp, Breakpoint { variant: VariantKind::Deletion, start: 962, end: 964, sequence: "CCC".into() });

        // deletion of a unit repeated just before it moves left by one copy
        let refr = "GGACGTTGCCAGCAGTAGCATGCATGG";
        let bp = classify_alignment(ConsensusKind::LongDeletion, cand, refr, 950, &t()).unwrap();
        assert_eq!((bp.start, bp.end, bp.sequence.as_str()), (959, 961, "CAG"));
    }

    #[test]
    fn test_deletion_needs_long_flanks() {
        let refr = "GGACGTTGCACCCTAGCATGCATGGGG";
        let cand = "--ACGTTGCA---TAGCATGCAT----";
        assert!(classify_alignment(ConsensusKind::LongDeletion, cand, refr, 950, &t()).is_none());
    }

    #[test]
    fn test_homopolymer_left_alignment_is_idempotent() {
        let p = 100;
        let (a, seq_a) = left_align(b"TTTAGGG", b"GGG", p + 7 - 1);
        let (b, seq_b) = left_align(b"TTTAG", b"GGG", p + 5 - 1);
        let (c, _) = left_align(b"TTTA", b"GGG", p + 4 - 1);
        assert_eq!(a, p + 3);
        assert_eq!((a, &seq_a), (b, &seq_b));
        assert_eq!(c, a);
    }

    #[test]
    fn test_tandem_repeat_left_alignment() {
        // two ATA copies precede, then one base of rotation
        let (pos, seq) = left_align(b"TTTAAAAATAATA", b"ATA", 112);
        assert_eq!((pos, seq.as_slice()), (105, b"AAT".as_slice()));

        let (pos, seq) = left_align(b"CCGTA", b"GA", 100);
        assert_eq!((pos, seq.as_slice()), (99, b"AG".as_slice()));

        let (pos, seq) = left_align(b"CCGTC", b"GA", 100);
        assert_eq!((pos, seq.as_slice()), (100, b"GA".as_slice()));
    }

    #[test]
    fn test_record_novelty_keeps_both_observations() {
        let thresholds = t();
        let engine = Fixed { candidate: String::new(), reference: String::new() };
        let mut resolver = BreakpointResolver::new(&engine, &thresholds);
        let obs = |depth| IndelObservation {
            variant: VariantKind::Insertion,
            origin: ConsensusKind::ShortIndel,
            depth,
            position: 500,
            sequence: "AC".to_string(),
        };
        assert_eq!(resolver.record((501, 501), obs(6)), Novelty::New);
        assert_eq!(resolver.record((501, 501), obs(7)), Novelty::Same);
        let resolution = resolver.finish();
        assert_eq!(resolution.buckets.get(&(501, 501)).unwrap().len(), 2);
        assert_eq!(resolution.positions, vec![500]);
    }

    /// Engine answering every query with one fixed alignment block.
    struct Fixed {
        candidate: String,
        reference: String,
    }

    impl PairwiseEngine for Fixed {
        fn report(&self, query: &NamedSequence, reference: &NamedSequence, _mode: ReportMode) -> Result<String> {
            let label = |name: &str| name.chars().take(6).collect::<String>();
            Ok(format!(
                " 1>>>{q}\n>>{r}\nglobal/local score: 50; 100.0% identity (100.0% similar) in 10 nt overlap (1-10:1-10)\n{ql:<7}{c}\n{rl:<7}{s}\n>>><<<\n",
                q = query.name,
                r = reference.name,
                ql = label(&query.name),
                rl = label(&reference.name),
                c = self.candidate,
                s = self.reference,
            ))
        }
    }

    struct Window;

    impl ReferenceSource for Window {
        fn fetch(&mut self, _chr: &str, start: u64, end: u64) -> Result<String> {
            Ok("A".repeat((end - start + 1) as usize))
        }
    }

    #[test]
    fn test_resolve_candidate() {
        let thresholds = t();
        let engine = Fixed {
            candidate: "--CCGTTACGGTTTCATGCATT--".to_string(),
            reference: "AACCGTTACGGT--CATGCATTGA".to_string(),
        };
        let mut resolver = BreakpointResolver::new(&engine, &thresholds);
        let candidate = ConsensusRecord {
            id: 0,
            kind: ConsensusKind::ShortIndel,
            start: 1000,
            end: 1000,
            sequence: "CCGTTACGGTTTCATGCATT".to_string(),
            depth: 6,
        };
        assert_eq!(resolver.resolve("chr1", &candidate, &mut Window).unwrap(), Some(Novelty::New));
        let resolution = resolver.finish();
        // window starts at 1000 - 50
        let bucket = resolution.buckets.get(&(960, 960)).unwrap();
        assert_eq!(bucket[0].sequence, "TT");
        assert_eq!(bucket[0].position, 1000);
        assert_eq!(bucket[0].trace(), "INS_SID_6_1000");
    }

    #[test]
    fn test_unresolved_long_insertion_is_recorded_directly() {
        let thresholds = t();
        let engine = Fixed { candidate: String::new(), reference: String::new() };
        let mut resolver = BreakpointResolver::new(&engine, &thresholds);
        let candidate = ConsensusRecord {
            id: 3,
            kind: ConsensusKind::UnpairedLongInsertion,
            start: 2000,
            end: 2000,
            sequence: "ACGT-----TTGA".to_string(),
            depth: 7,
        };
        resolver.resolve("chr1", &candidate, &mut Window).unwrap();
        let resolution = resolver.finish();
        assert_eq!(resolution.buckets.get(&(2000, 2000)).unwrap()[0].origin, ConsensusKind::UnpairedLongInsertion);
    }
}
