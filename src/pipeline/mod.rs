//! Single-chromosome calling run.
//!
//! `IndelCaller` wires the stages together: evidence, unmapped-mate rescue,
//! clustering, consensus, pairing, breakpoint resolution, depth and
//! genotyping, then writes the call table and the optional JSON documents.

use std::path::PathBuf;

use log::{info, warn};

use crate::align::{MultipleAligner, PairwiseEngine};
use crate::config::{CallerConfig, Thresholds};
use crate::error::Result;
use crate::input::{AlignmentSource, ReferenceSource};
use crate::output::{write_calls_tsv, CallCollector, StageCounts};
use crate::utils::time::StepTimer;
use crate::var::breakpoint::BreakpointResolver;
use crate::var::cluster::ClusterEngine;
use crate::var::consensus::ConsensusBuilder;
use crate::var::depth::count_depth;
use crate::var::evidence::{collect_clip_evidence, collect_unmapped_reads};
use crate::var::genotype::{FinalCall, GenotypeCaller};
use crate::var::pairing::candidate_list;

pub const TSV_SUFFIX: &str = "tsv";
pub const JSON_SUFFIX: &str = "calls.json";
pub const MSA_INPUTS_SUFFIX: &str = "msa_inputs.json";

/// `<prefix>.<chr>.<suffix>`
pub fn output_path(prefix: &str, chr: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}.{}", prefix, chr, suffix))
}

/// Outcome of a run.
#[derive(Debug)]
pub enum RunStatus {
    Completed(CallSummary),
    /// No insert sizes were observed or no breakpoint survived; nothing was written.
    NoEvidence,
}

#[derive(Debug)]
pub struct CallSummary {
    pub chromosome: String,
    pub stages: StageCounts,
    pub calls: Vec<FinalCall>,
    pub tsv: PathBuf,
    pub json: Option<PathBuf>,
    pub msa_inputs: Option<PathBuf>,
}

pub struct IndelCaller<'a> {
    chr: String,
    out_prefix: String,
    aligner: &'a dyn MultipleAligner,
    engine: &'a dyn PairwiseEngine,
    thresholds: Thresholds,
    threads: usize,
    write_json: bool,
    keep_msa_input: bool,
}

impl<'a> IndelCaller<'a> {
    pub fn new(chr: &str, out_prefix: &str, aligner: &'a dyn MultipleAligner, engine: &'a dyn PairwiseEngine) -> Self {
        Self {
            chr: chr.to_string(),
            out_prefix: out_prefix.to_string(),
            aligner,
            engine,
            thresholds: Thresholds::default(),
            threads: 1,
            write_json: false,
            keep_msa_input: false,
        }
    }

    /// Take thresholds and worker count from a loaded configuration.
    pub fn with_config(mut self, config: &CallerConfig) -> Self {
        self.thresholds = config.thresholds.clone();
        self.threads = config.engines.threads;
        self
    }

    pub fn with_json(mut self, enabled: bool) -> Self {
        self.write_json = enabled;
        self
    }

    pub fn with_msa_inputs(mut self, enabled: bool) -> Self {
        self.keep_msa_input = enabled;
        self
    }

    pub fn run(self, alignments: &mut dyn AlignmentSource, reference: &mut dyn ReferenceSource) -> Result<RunStatus> {
        let t = &self.thresholds;
        let chr = self.chr.as_str();
        let mut stages = StageCounts::default();
        let mut timer = StepTimer::new();

        timer.start("Evidence");
        let evidence = collect_clip_evidence(alignments, chr, t)?;
        stages.evidence_reads = evidence.read_count();
        if evidence.insert_sizes.is_none() {
            timer.end();
            warn!("No proper-pair insert sizes on {}; nothing to call", chr);
            return Ok(RunStatus::NoEvidence);
        }
        let unmapped = collect_unmapped_reads(alignments, chr, t, &evidence, evidence.read_count() as u32)?;
        stages.unmapped_reads = unmapped.len();
        info!("{} unmapped reads placed by their mates", unmapped.len());
        timer.end();

        timer.start("Clustering");
        let clusters = ClusterEngine::new(t).cluster(&evidence);
        stages.clusters = clusters.backward.len() + clusters.forward.len() + clusters.short_indel.len();
        timer.end();

        timer.start("Consensus");
        let mut builder = ConsensusBuilder::new(self.aligner, t, self.threads).with_provenance(self.keep_msa_input);
        let consensus = builder.build_all(&clusters)?;
        stages.consensus_records = consensus.backward.len() + consensus.forward.len() + consensus.short_indel.len();
        timer.end();

        timer.start("Pairing");
        let candidates = candidate_list(&mut builder, &consensus, &evidence, &unmapped, t)?;
        stages.candidates = candidates.len();
        timer.end();

        timer.start("Breakpoints");
        let mut resolver = BreakpointResolver::new(self.engine, t);
        resolver.resolve_all(chr, &candidates, reference)?;
        let resolution = resolver.finish();
        stages.breakpoints = resolution.buckets.len();
        timer.end();
        if resolution.buckets.is_empty() {
            warn!("No breakpoint resolved on {}; nothing to call", chr);
            return Ok(RunStatus::NoEvidence);
        }

        timer.start("Genotyping");
        let depth = count_depth(alignments, chr, &resolution.positions, t)?;
        let calls = GenotypeCaller::new(t).call_all(chr, &resolution.buckets, &depth);
        stages.calls = calls.len();
        timer.end();

        timer.start("Output");
        let tsv = output_path(&self.out_prefix, chr, TSV_SUFFIX);
        write_calls_tsv(&tsv, &calls)?;
        info!("{} calls written to {}", calls.len(), tsv.display());

        let json = if self.write_json {
            let path = output_path(&self.out_prefix, chr, JSON_SUFFIX);
            CallCollector::new(chr)
                .with_parameters(t)
                .with_stages(stages)
                .with_calls(&calls)
                .write_json(&path)?;
            info!("Call document written to {}", path.display());
            Some(path)
        } else {
            None
        };

        let msa_inputs = match builder.into_provenance() {
            Some(table) => {
                let path = output_path(&self.out_prefix, chr, MSA_INPUTS_SUFFIX);
                table.write_json(&path)?;
                info!("{} consensus inputs written to {}", table.len(), path.display());
                Some(path)
            }
            None => None,
        };
        timer.end();

        Ok(RunStatus::Completed(CallSummary {
            chromosome: self.chr.clone(),
            stages,
            calls,
            tsv,
            json,
            msa_inputs,
        }))
    }
}
