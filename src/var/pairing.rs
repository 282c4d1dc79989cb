//! Long-indel candidates from backward/forward consensus pairs.
//!
//! A backward clip consensus and a forward clip consensus close to each other
//! bracket a long insertion; further apart (up to the maximum indel size)
//! they bracket a long deletion. Records that pair with nothing are kept as
//! single-sided candidates.

use std::collections::HashMap;

use bitvec::prelude::*;
use log::{debug, info};

use crate::align::{ambiguous_count, TrimState};
use crate::config::Thresholds;
use crate::error::Result;
use crate::var::consensus::{
    ConsensusBuilder, ConsensusKind, ConsensusRecord, ConsensusSet, Draft, MAX_PAIR_AMBIGUOUS,
    STRICT_IDENTITY, WORKING_IDENTITY,
};
use crate::var::evidence::{ClipEvidence, EvidenceRead};
use crate::var::provenance::MemberSequence;

/// Joins the two flanking clip sequences of an unresolved insertion.
pub const UNRESOLVED_JOIN: &str = "-----";

/// Indices of (backward, forward) records whose padded spans overlap.
///
/// Both inputs must be sorted by start.
pub fn find_insert_pairs(
    backward: &[ConsensusRecord],
    forward: &[ConsensusRecord],
    pair_within: u64,
) -> Vec<(usize, usize)> {
    let padded = |r: &ConsensusRecord| (r.start.saturating_sub(pair_within), r.end + pair_within);
    let mut pairs = Vec::new();
    let mut low = 0usize;
    for (bi, b) in backward.iter().enumerate() {
        let (b_start, b_end) = padded(b);
        while low < forward.len() && padded(&forward[low]).1 < b_start {
            low += 1;
        }
        for (fi, f) in forward.iter().enumerate().skip(low) {
            let (f_start, f_end) = padded(f);
            if f_start > b_end {
                break;
            }
            if f_end >= b_start {
                pairs.push((bi, fi));
            }
        }
    }
    pairs
}

fn span_of(records: &[&ConsensusRecord]) -> (u64, u64) {
    let start = records.iter().map(|r| r.start.min(r.end)).min().unwrap_or(0);
    let end = records.iter().map(|r| r.start.max(r.end)).max().unwrap_or(0);
    (start, end)
}

/// Strict consensus over `members`, trimmed; `None` when too ambiguous.
fn strict_agreement(builder: &ConsensusBuilder<'_>, members: &[MemberSequence]) -> Result<Option<TrimState>> {
    let strict = builder.consensus(members, STRICT_IDENTITY)?;
    let (trimmed, trim) = TrimState::trim(&strict);
    if trimmed.is_empty() || ambiguous_count(&trimmed) > MAX_PAIR_AMBIGUOUS {
        return Ok(None);
    }
    Ok(Some(trim))
}

/// Resolve each insertion pair into a paired, rescued or unresolved long insertion.
pub fn detect_long_insertions(
    builder: &mut ConsensusBuilder<'_>,
    pairs: &[(usize, usize)],
    consensus: &ConsensusSet,
    evidence: &ClipEvidence,
    unmapped: &[EvidenceRead],
    alt_read_depth: u32,
) -> Result<Vec<ConsensusRecord>> {
    let mut records = Vec::new();
    for &(bi, fi) in pairs {
        let (b, f) = (&consensus.backward[bi], &consensus.forward[fi]);
        let total = b.depth + f.depth;
        let (clip_start, clip_end) = span_of(&[b, f]);
        let members = vec![MemberSequence::from(b), MemberSequence::from(f)];

        if let Some(trim) = strict_agreement(builder, &members)? {
            if total >= alt_read_depth {
                let sequence = trim.apply(&builder.consensus(&members, WORKING_IDENTITY)?);
                records.push(builder.register(Draft {
                    kind: ConsensusKind::PairedLongInsertion,
                    start: clip_start,
                    end: clip_end,
                    sequence,
                    depth: total,
                    members,
                }));
            }
            continue;
        }

        let rescue: Vec<&EvidenceRead> = unmapped
            .iter()
            .filter(|u| {
                (u.start < clip_start && clip_start < u.end) || (u.start < clip_end && clip_end < u.end)
            })
            .collect();
        let mut group = members;
        if !rescue.is_empty() {
            group.extend(rescue.iter().map(|u| MemberSequence::from(*u)));
            if let Some(trim) = strict_agreement(builder, &group)? {
                let depth = total + rescue.iter().map(|u| u.depth).sum::<u32>();
                if depth >= alt_read_depth {
                    let sequence = trim.apply(&builder.consensus(&group, WORKING_IDENTITY)?);
                    records.push(builder.register(Draft {
                        kind: ConsensusKind::LongInsertionWithRescue,
                        start: clip_start,
                        end: clip_end,
                        sequence,
                        depth,
                        members: group,
                    }));
                }
                continue;
            }
        }

        if total >= alt_read_depth {
            let upper = longest_clip(&evidence.longest_backward_clip, b.start);
            let lower = longest_clip(&evidence.longest_forward_clip, f.end);
            records.push(builder.register(Draft {
                kind: ConsensusKind::UnpairedLongInsertion,
                start: b.start,
                end: b.start,
                sequence: format!("{upper}{UNRESOLVED_JOIN}{lower}"),
                depth: total,
                members: group,
            }));
        }
    }
    Ok(records)
}

fn longest_clip(map: &HashMap<u64, String>, pos: u64) -> &str {
    map.get(&pos).map(String::as_str).unwrap_or("")
}

/// Long deletions between backward and forward records, and which of them paired.
pub struct DeletionPairs {
    pub records: Vec<ConsensusRecord>,
    pub backward_paired: BitVec,
    pub forward_paired: BitVec,
}

/// Pair backward records with forward records starting within
/// `max_indel_size` of them. A backward record may pair with several
/// forward records.
pub fn pair_deletions(
    builder: &mut ConsensusBuilder<'_>,
    backward: &[&ConsensusRecord],
    forward: &[&ConsensusRecord],
    max_indel_size: u64,
    alt_read_depth: u32,
) -> Result<DeletionPairs> {
    let mut pairs = DeletionPairs {
        records: Vec::new(),
        backward_paired: bitvec![0; backward.len()],
        forward_paired: bitvec![0; forward.len()],
    };
    let mut low = 0usize;
    for (bi, b) in backward.iter().enumerate() {
        while low < forward.len() && forward[low].end < b.start {
            low += 1;
        }
        for (fi, f) in forward.iter().enumerate().skip(low) {
            if f.end < b.start {
                continue;
            }
            if b.end + max_indel_size < f.start {
                break;
            }
            let members = vec![MemberSequence::from(*b), MemberSequence::from(*f)];
            let Some(trim) = strict_agreement(builder, &members)? else {
                continue;
            };
            let depth = b.depth + f.depth;
            if depth >= alt_read_depth {
                let sequence = trim.apply(&builder.consensus(&members, WORKING_IDENTITY)?);
                let (start, end) = span_of(&[b, f]);
                pairs.records.push(builder.register(Draft {
                    kind: ConsensusKind::LongDeletion,
                    start,
                    end,
                    sequence,
                    depth,
                    members,
                }));
            }
            pairs.backward_paired.set(bi, true);
            pairs.forward_paired.set(fi, true);
        }
    }
    Ok(pairs)
}

/// Candidate list for breakpoint resolution: short indels, paired long
/// indels and unpaired clip records with enough depth, sorted by start.
pub fn candidate_list(
    builder: &mut ConsensusBuilder<'_>,
    consensus: &ConsensusSet,
    evidence: &ClipEvidence,
    unmapped: &[EvidenceRead],
    thresholds: &Thresholds,
) -> Result<Vec<ConsensusRecord>> {
    let alt = thresholds.alt_read_depth;
    let insert_pairs = find_insert_pairs(&consensus.backward, &consensus.forward, thresholds.pair_within);
    let insertions = detect_long_insertions(builder, &insert_pairs, consensus, evidence, unmapped, alt)?;

    let mut used_b = bitvec![0; consensus.backward.len()];
    let mut used_f = bitvec![0; consensus.forward.len()];
    for &(bi, fi) in &insert_pairs {
        used_b.set(bi, true);
        used_f.set(fi, true);
    }
    let rest_b: Vec<&ConsensusRecord> = consensus.backward.iter().zip(used_b.iter()).filter(|(_, u)| !**u).map(|(r, _)| r).collect();
    let rest_f: Vec<&ConsensusRecord> = consensus.forward.iter().zip(used_f.iter()).filter(|(_, u)| !**u).map(|(r, _)| r).collect();

    let deletions = pair_deletions(builder, &rest_b, &rest_f, thresholds.max_indel_size, alt)?;

    let unpaired_b = rest_b.iter().zip(deletions.backward_paired.iter()).filter(|(_, p)| !**p).map(|(r, _)| *r);
    let unpaired_f = rest_f.iter().zip(deletions.forward_paired.iter()).filter(|(_, p)| !**p).map(|(r, _)| *r);
    let unpaired: Vec<ConsensusRecord> = unpaired_b.chain(unpaired_f).filter(|r| r.depth >= alt).cloned().collect();

    info!(
        "Pairing: {} insertion pairs -> {} long insertions, {} long deletions, {} unpaired",
        insert_pairs.len(),
        insertions.len(),
        deletions.records.len(),
        unpaired.len()
    );

    let mut candidates: Vec<ConsensusRecord> = consensus.short_indel.iter().cloned().collect();
    candidates.extend(insertions);
    candidates.extend(deletions.records);
    candidates.extend(unpaired);
    candidates.sort_by_key(|r| r.start);
    debug!("{} indel candidates", candidates.len());
    Ok(candidates)
}
