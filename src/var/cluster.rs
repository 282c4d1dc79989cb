//! Grouping of evidence reads into breakpoint-supported clusters.

use log::info;

use crate::config::Thresholds;
use crate::var::evidence::{ClipEvidence, EvidenceRead, ReadKind};

/// Evidence reads supporting one breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Sorted by start, then kind, end and sequence
    pub members: Vec<EvidenceRead>,
}

impl Cluster {
    fn new(mut members: Vec<EvidenceRead>) -> Self {
        members.sort_by(|a, b| {
            (a.start, a.kind, a.end, &a.sequence).cmp(&(b.start, b.kind, b.end, &b.sequence))
        });
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Min start and max end over all members.
    pub fn span(&self) -> (u64, u64) {
        let start = self.members.iter().map(|r| r.start.min(r.end)).min().unwrap_or(0);
        let end = self.members.iter().map(|r| r.start.max(r.end)).max().unwrap_or(0);
        (start, end)
    }

    fn is_clip_only(&self) -> bool {
        self.members.iter().all(|r| r.kind.is_clip())
    }

    fn shares_read(&self, other: &Cluster) -> bool {
        self.members.iter().any(|a| other.members.iter().any(|b| a.id == b.id))
    }
}

/// Clusters per orientation plus the merged short-indel clusters.
#[derive(Debug, Clone, Default)]
pub struct ClusterSet {
    pub backward: Vec<Cluster>,
    pub forward: Vec<Cluster>,
    pub short_indel: Vec<Cluster>,
}

impl ClusterSet {
    pub fn is_empty(&self) -> bool {
        self.backward.is_empty() && self.forward.is_empty() && self.short_indel.is_empty()
    }
}

pub struct ClusterEngine {
    within: u64,
    support_reads: usize,
}

impl ClusterEngine {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self { within: thresholds.within, support_reads: thresholds.support_reads }
    }

    /// Cluster backward clips and forward clips, each together with the short
    /// indels, then merge the short-indel clusters seen from both sides.
    pub fn cluster(&self, evidence: &ClipEvidence) -> ClusterSet {
        let with_indels = |clips: &[EvidenceRead]| -> Vec<EvidenceRead> {
            clips.iter().chain(evidence.short_indels.iter()).cloned().collect()
        };
        let (backward, backward_indels) = self.split(self.group(with_indels(&evidence.backward_clips)));
        let (forward, forward_indels) = self.split(self.group(with_indels(&evidence.forward_clips)));
        let short_indel = merge_short_indels(backward_indels, forward_indels);

        info!(
            "Clusters: {} backward, {} forward, {} short indel",
            backward.len(),
            forward.len(),
            short_indel.len()
        );
        ClusterSet { backward, forward, short_indel }
    }

    /// Sort by start and extend the open cluster while the next read starts
    /// within `within` of the cluster's furthest end.
    pub fn group(&self, mut reads: Vec<EvidenceRead>) -> Vec<Cluster> {
        reads.sort_by_key(|r| r.start);
        let mut groups: Vec<Vec<EvidenceRead>> = Vec::new();
        let mut reach = 0u64;
        for read in reads {
            match groups.last_mut() {
                Some(open) if read.start <= reach + self.within => {
                    reach = reach.max(read.end);
                    open.push(read);
                }
                _ => {
                    reach = read.end;
                    groups.push(vec![read]);
                }
            }
        }

        groups
            .into_iter()
            .map(keep_majority_indel)
            .filter(|group| group.len() >= self.support_reads)
            .map(Cluster::new)
            .collect()
    }

    fn split(&self, clusters: Vec<Cluster>) -> (Vec<Cluster>, Vec<Cluster>) {
        clusters.into_iter().partition(Cluster::is_clip_only)
    }
}

/// Keep only the majority short-indel kind in a group; ties keep deletions.
fn keep_majority_indel(group: Vec<EvidenceRead>) -> Vec<EvidenceRead> {
    let insertions = group.iter().filter(|r| r.kind == ReadKind::ShortInsertion).count();
    let deletions = group.iter().filter(|r| r.kind == ReadKind::ShortDeletion).count();
    if insertions == 0 && deletions == 0 {
        return group;
    }
    let dropped = if deletions < insertions { ReadKind::ShortDeletion } else { ReadKind::ShortInsertion };
    group.into_iter().filter(|r| r.kind != dropped).collect()
}

/// Union each backward short-indel cluster with the first not yet used
/// forward cluster sharing a read; leftovers pass through.
fn merge_short_indels(backward: Vec<Cluster>, forward: Vec<Cluster>) -> Vec<Cluster> {
    let mut used = vec![false; forward.len()];
    let mut merged = Vec::with_capacity(backward.len() + forward.len());
    for cluster in backward {
        let partner = forward
            .iter()
            .enumerate()
            .find(|(i, f)| !used[*i] && cluster.shares_read(f))
            .map(|(i, _)| i);
        match partner {
            Some(i) => {
                used[i] = true;
                let mut members = cluster.members;
                for read in &forward[i].members {
                    if !members.iter().any(|m| m.id == read.id) {
                        members.push(read.clone());
                    }
                }
                merged.push(Cluster::new(members));
            }
            None => merged.push(cluster),
        }
    }
    merged.extend(forward.into_iter().zip(used).filter(|(_, u)| !u).map(|(f, _)| f));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(id: u32, kind: ReadKind, start: u64, end: u64) -> EvidenceRead {
        EvidenceRead { id, kind, start, end, sequence: format!("ACGT{id}"), clip_length: None, depth: 1 }
    }

    fn engine(within: u64, support: usize) -> ClusterEngine {
        ClusterEngine { within, support_reads: support }
    }

    #[test]
    fn test_group_by_proximity() {
        let reads = vec![
            read(0, ReadKind::BackwardClip, 100, 100),
            read(1, ReadKind::BackwardClip, 103, 103),
            read(2, ReadKind::BackwardClip, 102, 102),
            read(3, ReadKind::BackwardClip, 110, 110),
        ];
        let clusters = engine(3, 1).group(reads);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members.iter().map(|r| r.start).collect::<Vec<_>>(), vec![100, 102, 103]);
        assert_eq!(clusters[1].span(), (110, 110));
    }

    #[test]
    fn test_group_extends_over_cluster_reach() {
        // the deletion reaches 120, so a read at 122 joins even though the
        // last read added ended at 101
        let reads = vec![
            read(0, ReadKind::ShortDeletion, 100, 120),
            read(1, ReadKind::ShortDeletion, 101, 101),
            read(2, ReadKind::ShortDeletion, 122, 130),
        ];
        let clusters = engine(3, 1).group(reads);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].span(), (100, 130));
    }

    #[test]
    fn test_support_threshold() {
        let reads = vec![
            read(0, ReadKind::ForwardClip, 100, 100),
            read(1, ReadKind::ForwardClip, 101, 101),
            read(2, ReadKind::ForwardClip, 500, 500),
        ];
        let clusters = engine(3, 2).group(reads);
        assert_eq!(clusters.len(), 1);
        assert!(clusters.iter().all(|c| c.len() >= 2));
    }

    #[test]
    fn test_majority_short_indel_kind() {
        let reads = vec![
            read(0, ReadKind::ShortInsertion, 100, 100),
            read(1, ReadKind::ShortInsertion, 100, 100),
            read(2, ReadKind::ShortDeletion, 100, 102),
            read(3, ReadKind::BackwardClip, 101, 101),
        ];
        let clusters = engine(3, 1).group(reads);
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].members.iter().all(|r| r.kind != ReadKind::ShortDeletion));
        assert_eq!(clusters[0].len(), 3);

        let tie = vec![read(0, ReadKind::ShortInsertion, 100, 100), read(1, ReadKind::ShortDeletion, 100, 101)];
        let clusters = engine(3, 1).group(tie);
        assert_eq!(clusters[0].members[0].kind, ReadKind::ShortDeletion);
        assert_eq!(clusters[0].len(), 1);
    }

    #[test]
    fn test_cluster_set_merges_short_indels() {
        let mut evidence = ClipEvidence::default();
        evidence.backward_clips = vec![
            read(0, ReadKind::BackwardClip, 100, 100),
            read(1, ReadKind::BackwardClip, 100, 100),
            read(2, ReadKind::BackwardClip, 101, 101),
        ];
        evidence.forward_clips = vec![read(3, ReadKind::ForwardClip, 300, 300)];
        evidence.short_indels = vec![
            read(4, ReadKind::ShortInsertion, 200, 200),
            read(5, ReadKind::ShortInsertion, 200, 200),
            read(6, ReadKind::ShortInsertion, 201, 201),
        ];
        let set = engine(3, 3).cluster(&evidence);
        assert_eq!(set.backward.len(), 1);
        assert!(set.forward.is_empty());
        // seen from both orientations, merged into one
        assert_eq!(set.short_indel.len(), 1);
        assert_eq!(set.short_indel[0].len(), 3);
    }

    #[test]
    fn test_mixed_clip_and_indel_cluster_is_short_indel() {
        let mut evidence = ClipEvidence::default();
        evidence.backward_clips = vec![read(0, ReadKind::BackwardClip, 200, 200)];
        evidence.short_indels = vec![
            read(4, ReadKind::ShortDeletion, 200, 205),
            read(5, ReadKind::ShortDeletion, 200, 205),
        ];
        let set = engine(3, 3).cluster(&evidence);
        assert!(set.backward.is_empty());
        assert_eq!(set.short_indel.len(), 1);
        assert_eq!(set.short_indel[0].len(), 3);
    }
}
