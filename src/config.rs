//! Caller configuration.
//!
//! This module provides the structs and loading function for:
//! - Evidence, clustering and genotyping thresholds
//! - External aligner commands and worker settings
//!
//! Every field carries a serde default so a partial JSON file (or none at
//! all) yields a usable configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CallerError, Result};

// ============================================================================
// Thresholds
// ============================================================================

/// Numeric thresholds used across the calling stages
#[derive(Deserialize, Serialize, JsonSchema, Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Minimum mean Phred quality of clipped or unmapped bases (exclusive)
    #[serde(default = "default_base_quality")]
    pub base_quality: u8,
    /// Minimum mapping quality (exclusive)
    #[serde(default = "default_mapping_quality")]
    pub mapping_quality: u8,
    /// Maximum distance between a read start and the cluster end to join a cluster
    #[serde(default = "default_within")]
    pub within: u64,
    /// Padding applied to both consensus spans when pairing insertions
    #[serde(default = "default_pair_within")]
    pub pair_within: u64,
    /// Minimum supporting reads for a variant
    #[serde(default = "default_alt_read_depth")]
    pub alt_read_depth: u32,
    /// Minimum cluster size
    #[serde(default = "default_support_reads")]
    pub support_reads: usize,
    /// Minimum soft-clip length (exclusive)
    #[serde(default = "default_clip_length")]
    pub clip_length: usize,
    /// Largest indel searched for; sizes the reference window and deletion pairing distance
    #[serde(default = "default_max_indel_size")]
    pub max_indel_size: u64,
    /// Non-gap bases required on each side of a single-gap insertion
    #[serde(default = "default_insertion_min_flank")]
    pub insertion_min_flank: usize,
    /// Aligned bases required on each side of a deletion
    #[serde(default = "default_deletion_min_flank")]
    pub deletion_min_flank: usize,
    #[serde(default = "default_homo_frequency")]
    pub homo_frequency: f64,
    #[serde(default = "default_low_frequency")]
    pub low_frequency: f64,
    /// Total depth at which a call is reported with high confidence
    #[serde(default = "default_high_confidence_depth")]
    pub high_confidence_depth: u32,
}

fn default_base_quality() -> u8 { 20 }
fn default_mapping_quality() -> u8 { 20 }
fn default_within() -> u64 { 3 }
fn default_pair_within() -> u64 { 5 }
fn default_alt_read_depth() -> u32 { 5 }
fn default_support_reads() -> usize { 3 }
fn default_clip_length() -> usize { 5 }
fn default_max_indel_size() -> u64 { 100 }
fn default_insertion_min_flank() -> usize { 5 }
fn default_deletion_min_flank() -> usize { 10 }
fn default_homo_frequency() -> f64 { 0.70 }
fn default_low_frequency() -> f64 { 0.15 }
fn default_high_confidence_depth() -> u32 { 10 }

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            base_quality: default_base_quality(),
            mapping_quality: default_mapping_quality(),
            within: default_within(),
            pair_within: default_pair_within(),
            alt_read_depth: default_alt_read_depth(),
            support_reads: default_support_reads(),
            clip_length: default_clip_length(),
            max_indel_size: default_max_indel_size(),
            insertion_min_flank: default_insertion_min_flank(),
            deletion_min_flank: default_deletion_min_flank(),
            homo_frequency: default_homo_frequency(),
            low_frequency: default_low_frequency(),
            high_confidence_depth: default_high_confidence_depth(),
        }
    }
}

// ============================================================================
// External engines
// ============================================================================

/// External aligner commands and worker settings
#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_mafft")]
    pub mafft: String,
    #[serde(default = "default_glsearch")]
    pub glsearch: String,
    /// Substitution matrix passed to glsearch with `-s`
    #[serde(default)]
    pub glsearch_matrix: Option<PathBuf>,
    /// Directory that holds per-invocation scratch files
    #[serde(default = "std::env::temp_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_mafft() -> String { "mafft".to_string() }
fn default_glsearch() -> String { "glsearch36".to_string() }
fn default_threads() -> usize { 1 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mafft: default_mafft(),
            glsearch: default_glsearch(),
            glsearch_matrix: None,
            scratch_dir: std::env::temp_dir(),
            threads: default_threads(),
        }
    }
}

// ============================================================================
// Caller configuration
// ============================================================================

/// Main caller configuration
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CallerConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub engines: EngineConfig,
}

impl CallerConfig {
    /// Load caller configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let config: CallerConfig = serde_json::from_reader(reader)?;
        Ok(config)
    }

    /// Reject values that would make a stage meaningless.
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if t.alt_read_depth == 0 {
            return Err(CallerError::config("alt_read_depth", "must be >= 1"));
        }
        if t.support_reads == 0 {
            return Err(CallerError::config("support_reads", "must be >= 1"));
        }
        if t.max_indel_size == 0 {
            return Err(CallerError::config("max_indel_size", "must be >= 1"));
        }
        for (name, value) in [("homo_frequency", t.homo_frequency), ("low_frequency", t.low_frequency)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(CallerError::config(name, format!("{value} is outside (0, 1)")));
            }
        }
        if t.low_frequency >= t.homo_frequency {
            return Err(CallerError::config("low_frequency", "must be below homo_frequency"));
        }
        if self.engines.threads == 0 {
            return Err(CallerError::config("threads", "must be >= 1"));
        }
        Ok(())
    }
}
