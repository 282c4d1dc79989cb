//! Consensus construction per cluster, run in parallel over slices of clusters.

use log::{debug, info};
use rayon::prelude::*;

use crate::align::msa::msa_consensus;
use crate::align::{ambiguous_count, MultipleAligner, NamedSequence, TrimState};
use crate::config::Thresholds;
use crate::error::Result;
use crate::var::cluster::{Cluster, ClusterSet};
use crate::var::evidence::EvidenceRead;
use crate::var::provenance::{MemberSequence, ProvenanceEntry, ProvenanceTable};

/// Identity for the first, noise-screening pass.
pub const SCREEN_IDENTITY: f64 = 0.8;
/// Identity for the working consensus.
pub const WORKING_IDENTITY: f64 = 0.5;
/// Identity for exact agreement checks between consensus records.
pub const STRICT_IDENTITY: f64 = 1.0;

/// Ambiguous positions tolerated in a trimmed cluster consensus.
const MAX_CLUSTER_AMBIGUOUS: usize = 5;
/// Ambiguous positions tolerated when two consensus records are compared.
pub const MAX_PAIR_AMBIGUOUS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConsensusKind {
    Backward,
    Forward,
    ShortIndel,
    PairedLongInsertion,
    UnpairedLongInsertion,
    LongInsertionWithRescue,
    LongDeletion,
}

impl ConsensusKind {
    pub fn label(&self) -> &'static str {
        match self {
            ConsensusKind::Backward => "B",
            ConsensusKind::Forward => "F",
            ConsensusKind::ShortIndel => "SID",
            ConsensusKind::PairedLongInsertion => "LI",
            ConsensusKind::UnpairedLongInsertion => "ULI",
            ConsensusKind::LongInsertionWithRescue => "LI_wU",
            ConsensusKind::LongDeletion => "LD",
        }
    }

    /// Long insertion kinds that may show two gaps in the reference.
    pub fn is_long_insertion(&self) -> bool {
        matches!(self, ConsensusKind::PairedLongInsertion | ConsensusKind::LongInsertionWithRescue)
    }
}

/// Consensus sequence for a cluster or a group of consensus records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusRecord {
    /// Stable id, assigned once the record is final
    pub id: u32,
    pub kind: ConsensusKind,
    pub start: u64,
    pub end: u64,
    pub sequence: String,
    /// Supporting read count
    pub depth: u32,
}

impl From<&ConsensusRecord> for MemberSequence {
    fn from(record: &ConsensusRecord) -> Self {
        MemberSequence {
            label: record.kind.label().to_string(),
            start: record.start,
            end: record.end,
            sequence: record.sequence.clone(),
        }
    }
}

impl From<&EvidenceRead> for MemberSequence {
    fn from(read: &EvidenceRead) -> Self {
        MemberSequence {
            label: read.kind.label().to_string(),
            start: read.start,
            end: read.end,
            sequence: read.sequence.clone(),
        }
    }
}

/// Consensus record before it receives an id.
#[derive(Debug, Clone)]
pub struct Draft {
    pub kind: ConsensusKind,
    pub start: u64,
    pub end: u64,
    pub sequence: String,
    pub depth: u32,
    pub members: Vec<MemberSequence>,
}

/// Consensus records per cluster collection.
#[derive(Debug, Clone, Default)]
pub struct ConsensusSet {
    pub backward: Vec<ConsensusRecord>,
    pub forward: Vec<ConsensusRecord>,
    pub short_indel: Vec<ConsensusRecord>,
}

fn aligner_input(members: &[MemberSequence]) -> Vec<NamedSequence> {
    members
        .iter()
        .enumerate()
        .map(|(i, m)| NamedSequence::new(m.entry_name(i + 1), m.sequence.to_ascii_uppercase()))
        .collect()
}

/// Builds consensus records and hands out their ids.
pub struct ConsensusBuilder<'a> {
    aligner: &'a dyn MultipleAligner,
    threads: usize,
    alt_read_depth: u32,
    next_id: u32,
    provenance: Option<ProvenanceTable>,
}

impl<'a> ConsensusBuilder<'a> {
    pub fn new(aligner: &'a dyn MultipleAligner, thresholds: &Thresholds, threads: usize) -> Self {
        Self {
            aligner,
            threads: threads.max(1),
            alt_read_depth: thresholds.alt_read_depth,
            next_id: 0,
            provenance: None,
        }
    }

    /// Record aligner inputs per consensus id.
    pub fn with_provenance(mut self, keep: bool) -> Self {
        self.provenance = keep.then(ProvenanceTable::new);
        self
    }

    pub fn aligner(&self) -> &'a dyn MultipleAligner {
        self.aligner
    }

    /// Consensus at `identity` over the given members.
    pub fn consensus(&self, members: &[MemberSequence], identity: f64) -> Result<String> {
        Ok(msa_consensus(self.aligner, &aligner_input(members), identity)?.consensus)
    }

    /// Give a draft its id and record its inputs when provenance is kept.
    pub fn register(&mut self, draft: Draft) -> ConsensusRecord {
        let id = self.next_id;
        self.next_id += 1;
        let record = ConsensusRecord {
            id,
            kind: draft.kind,
            start: draft.start,
            end: draft.end,
            sequence: draft.sequence,
            depth: draft.depth,
        };
        if let Some(table) = self.provenance.as_mut() {
            table.insert(ProvenanceEntry {
                id,
                kind: record.kind.label().to_string(),
                start: record.start,
                end: record.end,
                sequence: record.sequence.clone(),
                depth: record.depth,
                members: draft.members,
            });
        }
        record
    }

    pub fn build_all(&mut self, clusters: &ClusterSet) -> Result<ConsensusSet> {
        let set = ConsensusSet {
            backward: self.build(&clusters.backward, ConsensusKind::Backward)?,
            forward: self.build(&clusters.forward, ConsensusKind::Forward)?,
            short_indel: self.build(&clusters.short_indel, ConsensusKind::ShortIndel)?,
        };
        info!(
            "Consensus records: {} backward, {} forward, {} short indel",
            set.backward.len(),
            set.forward.len(),
            set.short_indel.len()
        );
        Ok(set)
    }

    /// Build one record per surviving cluster.
    ///
    /// Clusters are split into contiguous slices, one per worker. Results are
    /// concatenated in slice order and stably sorted by start, so the output
    /// does not depend on the worker count.
    pub fn build(&mut self, clusters: &[Cluster], kind: ConsensusKind) -> Result<Vec<ConsensusRecord>> {
        if clusters.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.threads.min(clusters.len());
        let chunk_size = clusters.len().div_ceil(workers);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;

        let aligner = self.aligner;
        let alt_read_depth = self.alt_read_depth;
        let slices: Vec<Vec<Draft>> = pool.install(|| {
            clusters
                .par_chunks(chunk_size)
                .map(|slice| {
                    let mut drafts = Vec::with_capacity(slice.len());
                    for cluster in slice {
                        if let Some(draft) = cluster_consensus(aligner, cluster, kind, alt_read_depth)? {
                            drafts.push(draft);
                        }
                    }
                    Ok(drafts)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut drafts: Vec<Draft> = slices.into_iter().flatten().collect();
        drafts.sort_by_key(|d| d.start);
        debug!("{} consensus: {} of {} clusters kept", kind.label(), drafts.len(), clusters.len());
        Ok(drafts.into_iter().map(|d| self.register(d)).collect())
    }

    pub fn into_provenance(self) -> Option<ProvenanceTable> {
        self.provenance
    }
}

/// Two-pass consensus for one cluster; `None` when the cluster is rejected.
fn cluster_consensus(
    aligner: &dyn MultipleAligner,
    cluster: &Cluster,
    kind: ConsensusKind,
    alt_read_depth: u32,
) -> Result<Option<Draft>> {
    let members: Vec<MemberSequence> = cluster.members.iter().map(MemberSequence::from).collect();
    let input = aligner_input(&members);

    let screen = msa_consensus(aligner, &input, SCREEN_IDENTITY)?;
    let (trimmed, trim) = TrimState::trim(&screen.consensus);
    if trimmed.is_empty() || ambiguous_count(&trimmed) > MAX_CLUSTER_AMBIGUOUS {
        return Ok(None);
    }

    let working = msa_consensus(aligner, &input, WORKING_IDENTITY)?;
    let depth = working.read_count as u32;
    if kind == ConsensusKind::ShortIndel && depth < alt_read_depth {
        return Ok(None);
    }

    let (start, end) = cluster.span();
    Ok(Some(Draft { kind, start, end, sequence: trim.apply(&working.consensus), depth, members }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::evidence::ReadKind;

    /// Pads every sequence to the longest with trailing gaps.
    struct PadAligner;

    impl MultipleAligner for PadAligner {
        fn align(&self, sequences: &[NamedSequence]) -> Result<Vec<NamedSequence>> {
            let width = sequences.iter().map(|s| s.sequence.len()).max().unwrap_or(0);
            Ok(sequences
                .iter()
                .map(|s| NamedSequence::new(s.name.clone(), format!("{:-<width$}", s.sequence)))
                .collect())
        }
    }

    fn read(id: u32, kind: ReadKind, start: u64, end: u64, seq: &str) -> EvidenceRead {
        EvidenceRead { id, kind, start, end, sequence: seq.to_string(), clip_length: None, depth: 1 }
    }

    fn cluster(kind: ReadKind, start: u64, seqs: &[&str]) -> Cluster {
        let members = seqs
            .iter()
            .enumerate()
            .map(|(i, s)| read(start as u32 * 10 + i as u32, kind, start + i as u64 % 2, start + 2, s))
            .collect();
        Cluster { members }
    }

    fn thresholds() -> Thresholds {
        Thresholds::default()
    }

    #[test]
    fn test_cluster_consensus_span_and_depth() {
        let c = cluster(ReadKind::BackwardClip, 100, &["ACGTACGTAA", "ACGTACGTAA", "ACGTACGTAA"]);
        let draft = cluster_consensus(&PadAligner, &c, ConsensusKind::Backward, 5).unwrap().unwrap();
        assert_eq!(draft.sequence, "ACGTACGTAA");
        assert_eq!(draft.depth, 3);
        assert_eq!((draft.start, draft.end), (100, 102));
        assert!(draft.depth as usize <= c.len());
        assert_eq!(draft.members[0].entry_name(1), "B_100_102-v1");
    }

    #[test]
    fn test_short_indel_below_alt_depth_is_dropped() {
        let c = cluster(ReadKind::ShortInsertion, 100, &["ACGTACGTAA", "ACGTACGTAA", "ACGTACGTAA"]);
        assert!(cluster_consensus(&PadAligner, &c, ConsensusKind::ShortIndel, 5).unwrap().is_none());
        let draft = cluster_consensus(&PadAligner, &c, ConsensusKind::ShortIndel, 3).unwrap().unwrap();
        assert!(draft.depth >= 3);
    }

    #[test]
    fn test_noisy_cluster_is_dropped() {
        let c = cluster(ReadKind::ForwardClip, 100, &["ACGTACGTACGT", "TGCATGCATGCA"]);
        assert!(cluster_consensus(&PadAligner, &c, ConsensusKind::Forward, 5).unwrap().is_none());
    }

    #[test]
    fn test_screening_trim_is_applied_to_working_consensus() {
        // last column disagrees: '?' at 0.8, majority at 0.5
        let c = cluster(ReadKind::BackwardClip, 100, &["ACGTACGTAC", "ACGTACGTAC", "ACGTACGTAG"]);
        let draft = cluster_consensus(&PadAligner, &c, ConsensusKind::Backward, 5).unwrap().unwrap();
        assert_eq!(draft.sequence, "ACGTACG");
    }

    #[test]
    fn test_build_is_independent_of_worker_count() {
        let clusters: Vec<Cluster> = (0..7)
            .map(|i| cluster(ReadKind::BackwardClip, 1000 - i * 100, &["ACGTACGTAA", "ACGTACGTAA", "ACGTACGTAA"]))
            .collect();
        let t = thresholds();
        let single = ConsensusBuilder::new(&PadAligner, &t, 1).build(&clusters, ConsensusKind::Backward).unwrap();
        let many = ConsensusBuilder::new(&PadAligner, &t, 4).build(&clusters, ConsensusKind::Backward).unwrap();
        assert_eq!(single, many);
        assert_eq!(single.len(), 7);
        assert!(single.windows(2).all(|w| w[0].start <= w[1].start));
        assert_eq!(single.iter().map(|r| r.id).collect::<Vec<_>>(), (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_provenance_records_members() {
        let clusters = vec![cluster(ReadKind::ForwardClip, 100, &["ACGTACGTAA", "ACGTACGTAA", "ACGTACGTAA"])];
        let t = thresholds();
        let mut builder = ConsensusBuilder::new(&PadAligner, &t, 2).with_provenance(true);
        let records = builder.build(&clusters, ConsensusKind::Forward).unwrap();
        let table = builder.into_provenance().unwrap();
        let entry = table.get(records[0].id).unwrap();
        assert_eq!(entry.members.len(), 3);
        assert_eq!(entry.kind, "F");
    }
}
