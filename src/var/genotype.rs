//! Allele frequency, zygosity and confidence per breakpoint.

use std::collections::HashMap;

use indexmap::IndexMap;
use log::{debug, info};

use crate::config::Thresholds;
use crate::var::breakpoint::{BreakpointKey, FinalizedBuckets, IndelObservation, VariantKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zygosity {
    Homo,
    Hete,
}

impl Zygosity {
    pub fn label(&self) -> &'static str {
        match self {
            Zygosity::Homo => "Homo",
            Zygosity::Hete => "Hete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Low,
}

impl Confidence {
    pub fn label(&self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Low => "Low",
        }
    }
}

/// One alternative sequence at a breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct AlleleCall {
    pub variant: VariantKind,
    pub sequence: String,
    /// Supporting reads, max per origin kind summed over kinds
    pub depth: u32,
    /// Reads covering the representative clip position, at least `depth`
    pub total_depth: u32,
    pub frequency: f64,
    /// Observation position the total depth was taken from
    pub clip_position: u64,
    /// Space-joined `<INS|DEL>_<origin>_<depth>_<pos>` per observation
    pub trace: String,
}

impl AlleleCall {
    pub fn length(&self) -> usize {
        self.sequence.len()
    }
}

/// Genotyped call for one breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalCall {
    pub chr: String,
    pub start: u64,
    pub end: u64,
    pub zygosity: Zygosity,
    pub confidence: Confidence,
    pub low_frequency: bool,
    /// More than two qualifying alleles
    pub multi_allelic: bool,
    pub alleles: Vec<AlleleCall>,
}

impl FinalCall {
    /// Confidence column text, with the low-frequency suffix when flagged.
    pub fn confidence_label(&self) -> String {
        let mut label = self.confidence.label().to_string();
        if self.low_frequency {
            label.push_str(",Lowfreq");
        }
        if self.multi_allelic {
            label.push_str(",MultiAllelic");
        }
        label
    }
}

pub struct GenotypeCaller<'a> {
    thresholds: &'a Thresholds,
}

impl<'a> GenotypeCaller<'a> {
    pub fn new(thresholds: &'a Thresholds) -> Self {
        Self { thresholds }
    }

    /// Calls for every bucket with a qualifying sequence, by ascending start.
    pub fn call_all(&self, chr: &str, buckets: &FinalizedBuckets, depth: &HashMap<u64, u32>) -> Vec<FinalCall> {
        let calls: Vec<FinalCall> = buckets
            .iter()
            .filter_map(|(key, observations)| self.call(chr, *key, observations, depth))
            .collect();
        info!("{} calls from {} breakpoints", calls.len(), buckets.len());
        calls
    }

    /// Genotype one bucket; `None` when no sequence reaches the alt depth.
    pub fn call(
        &self,
        chr: &str,
        key: BreakpointKey,
        observations: &[IndelObservation],
        depth: &HashMap<u64, u32>,
    ) -> Option<FinalCall> {
        let t = self.thresholds;
        let mut by_sequence: IndexMap<&str, Vec<&IndelObservation>> = IndexMap::new();
        for obs in observations.iter().filter(|o| o.depth >= t.alt_read_depth) {
            by_sequence.entry(obs.sequence.as_str()).or_default();
        }
        if by_sequence.is_empty() {
            debug!("Breakpoint {}-{}: no sequence reaches alt depth", key.0, key.1);
            return None;
        }
        for obs in observations {
            if let Some(group) = by_sequence.get_mut(obs.sequence.as_str()) {
                group.push(obs);
            }
        }

        let mut alleles: Vec<AlleleCall> = by_sequence
            .into_iter()
            .map(|(sequence, group)| allele(sequence, &group, depth))
            .collect();

        let (zygosity, confidence, low_frequency) = if alleles.len() == 1 {
            let single = &alleles[0];
            let zygosity = if single.frequency >= t.homo_frequency { Zygosity::Homo } else { Zygosity::Hete };
            let confidence = if single.total_depth >= t.high_confidence_depth { Confidence::High } else { Confidence::Low };
            (zygosity, confidence, single.frequency <= t.low_frequency)
        } else {
            // two alleles stay in first-seen order; more are ranked by depth, ties first-seen
            if alleles.len() > 2 {
                alleles.sort_by(|a, b| b.depth.cmp(&a.depth));
            }
            let all_high = alleles.iter().all(|a| a.total_depth >= t.high_confidence_depth);
            (Zygosity::Hete, if all_high { Confidence::High } else { Confidence::Low }, false)
        };

        Some(FinalCall {
            chr: chr.to_string(),
            start: key.0,
            end: key.1,
            zygosity,
            confidence,
            low_frequency,
            multi_allelic: alleles.len() > 2,
            alleles,
        })
    }
}

fn allele(sequence: &str, group: &[&IndelObservation], depth: &HashMap<u64, u32>) -> AlleleCall {
    let mut per_origin: HashMap<_, u32> = HashMap::new();
    for obs in group {
        let best = per_origin.entry(obs.origin).or_insert(0);
        *best = (*best).max(obs.depth);
    }
    let combined: u32 = per_origin.values().sum();

    let mut total = 0u32;
    let mut clip_position = group[0].position;
    for obs in group {
        let at = depth.get(&obs.position).copied().unwrap_or(0);
        if at >= total {
            total = at;
            clip_position = obs.position;
        }
    }
    let total = total.max(combined);
    let frequency = if total == 0 { 0.0 } else { combined as f64 / total as f64 };

    AlleleCall {
        variant: group[group.len() - 1].variant,
        sequence: sequence.to_string(),
        depth: combined,
        total_depth: total,
        frequency,
        clip_position,
        trace: group.iter().map(|o| o.trace()).collect::<Vec<_>>().join(" "),
    }
}
