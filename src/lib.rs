//! Indel caller driven by soft-clip and split-read evidence.
//!
//! One chromosome of a coordinate-sorted BAM/CRAM is scanned for clipped,
//! indel-bearing and unmapped-mate reads. Reads are clustered, each cluster
//! is collapsed to a consensus with an external MSA engine, consensus records
//! are paired into long insertions and deletions, and every candidate is
//! realigned against the reference to pin its breakpoint. Calls are genotyped
//! from supporting and total depth.

pub mod align;
pub mod bam;
pub mod config;
pub mod error;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod utils;
pub mod var;

pub use error::{CallerError, Result};
