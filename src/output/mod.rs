//! Call outputs
//!
//! This module provides:
//! - the TSV call table (`writer`)
//! - `CallDocument`: the optional JSON document and its schema
//! - `CallCollector`: a builder for the JSON document
//!
//! # Example
//!
//! ```ignore
//! use clipindel::output::CallCollector;
//!
//! CallCollector::new("chr1")
//!     .with_parameters(&thresholds)
//!     .with_stages(stages)
//!     .with_calls(&calls)
//!     .write_json(Path::new("sample.chr1.calls.json"))?;
//! ```

pub mod collector;
pub mod schema;
pub mod types;
pub mod writer;

pub use collector::CallCollector;
pub use types::{AlleleOutput, CallDocument, CallOutput, StageCounts};
pub use writer::{write_calls_tsv, TSV_HEADER};
