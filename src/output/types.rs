//! JSON call document
//!
//! Mirrors the TSV rows with typed fields, plus the parameters and per-stage
//! counts of the run that produced them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::var::genotype::{AlleleCall, FinalCall};

/// Top-level document written to `<prefix>.<chr>.calls.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CallDocument {
    /// Caller version
    pub version: String,

    /// Timestamp of analysis (ISO 8601 format)
    pub timestamp: String,

    pub chromosome: String,

    /// Thresholds in effect for the run
    pub parameters: Thresholds,

    pub stages: StageCounts,

    /// Calls by ascending start
    pub calls: Vec<CallOutput>,
}

// ============================================================================
// Stage counts
// ============================================================================

/// Number of items surviving each stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageCounts {
    /// Clip and short-indel reads passing the evidence filters
    pub evidence_reads: usize,
    /// Unmapped reads placed by their mapped mate
    pub unmapped_reads: usize,
    /// Clusters passing the size filter, all orientations
    pub clusters: usize,
    /// Consensus records built from clusters
    pub consensus_records: usize,
    /// Candidates sent to breakpoint resolution
    pub candidates: usize,
    /// Distinct breakpoints after resolution
    pub breakpoints: usize,
    pub calls: usize,
}

// ============================================================================
// Calls
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallOutput {
    pub start: u64,
    pub end: u64,
    /// "Homo" or "Hete"
    pub call_type: String,
    /// "High" or "Low"
    pub confidence: String,
    pub low_frequency: bool,
    pub multi_allelic: bool,
    /// Alleles by descending depth
    pub alleles: Vec<AlleleOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AlleleOutput {
    /// "INS" or "DEL"
    pub indel_type: String,
    pub sequence: String,
    pub length: usize,
    pub alt_depth: u32,
    pub total_depth: u32,
    pub frequency: f64,
    pub clip_position: u64,
    /// Observations as `<INS|DEL>_<origin>_<depth>_<pos>`
    pub observations: Vec<String>,
}

impl From<&AlleleCall> for AlleleOutput {
    fn from(allele: &AlleleCall) -> Self {
        Self {
            indel_type: allele.variant.label().to_string(),
            sequence: allele.sequence.clone(),
            length: allele.length(),
            alt_depth: allele.depth,
            total_depth: allele.total_depth,
            frequency: allele.frequency,
            clip_position: allele.clip_position,
            observations: allele.trace.split(' ').map(str::to_string).collect(),
        }
    }
}

impl From<&FinalCall> for CallOutput {
    fn from(call: &FinalCall) -> Self {
        Self {
            start: call.start,
            end: call.end,
            call_type: call.zygosity.label().to_string(),
            confidence: call.confidence.label().to_string(),
            low_frequency: call.low_frequency,
            multi_allelic: call.multi_allelic,
            alleles: call.alleles.iter().map(AlleleOutput::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::breakpoint::VariantKind;
    use crate::var::genotype::{Confidence, Zygosity};

    #[test]
    fn test_call_conversion() {
        let call = FinalCall {
            chr: "chr2".to_string(),
            start: 500,
            end: 503,
            zygosity: Zygosity::Hete,
            confidence: Confidence::Low,
            low_frequency: true,
            multi_allelic: false,
            alleles: vec![AlleleCall {
                variant: VariantKind::Deletion,
                sequence: "ACG".to_string(),
                depth: 5,
                total_depth: 40,
                frequency: 0.125,
                clip_position: 499,
                trace: "DEL_B_3_499 DEL_F_2_504".to_string(),
            }],
        };
        let out = CallOutput::from(&call);
        assert_eq!(out.call_type, "Hete");
        assert_eq!(out.confidence, "Low");
        assert!(out.low_frequency);
        assert_eq!(out.alleles[0].indel_type, "DEL");
        assert_eq!(out.alleles[0].length, 3);
        assert_eq!(out.alleles[0].observations, vec!["DEL_B_3_499", "DEL_F_2_504"]);
    }
}
