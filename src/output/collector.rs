//! Builder for the JSON call document.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::warn;

use crate::config::Thresholds;
use crate::error::{CallerError, Result};
use crate::var::genotype::FinalCall;

use super::types::{CallDocument, CallOutput, StageCounts};

pub struct CallCollector {
    document: CallDocument,
}

impl CallCollector {
    /// Create a new collector stamped with version and timestamp
    pub fn new(chromosome: &str) -> Self {
        Self {
            document: CallDocument {
                version: env!("CARGO_PKG_VERSION").to_string(),
                timestamp: crate::utils::time::utc_now_iso8601(),
                chromosome: chromosome.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn with_parameters(mut self, thresholds: &Thresholds) -> Self {
        self.document.parameters = thresholds.clone();
        self
    }

    pub fn with_stages(mut self, stages: StageCounts) -> Self {
        self.document.stages = stages;
        self
    }

    pub fn with_calls(mut self, calls: &[FinalCall]) -> Self {
        self.document.calls = calls.iter().map(CallOutput::from).collect();
        self
    }

    pub fn build(self) -> CallDocument {
        self.document
    }

    pub fn document(&self) -> &CallDocument {
        &self.document
    }

    /// Write the document, validating it first when enabled.
    ///
    /// A schema violation is fatal in debug builds and a warning otherwise.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if super::schema::should_validate() {
            let value = serde_json::to_value(&self.document)?;
            if let Err(msg) = super::schema::validate(&value) {
                warn!("Schema validation failed for {}: {}", path.display(), msg);
                if cfg!(debug_assertions) {
                    return Err(CallerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)));
                }
            }
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.document)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::breakpoint::VariantKind;
    use crate::var::genotype::{AlleleCall, Confidence, Zygosity};

    fn call() -> FinalCall {
        FinalCall {
            chr: "chr1".to_string(),
            start: 100,
            end: 100,
            zygosity: Zygosity::Homo,
            confidence: Confidence::High,
            low_frequency: false,
            multi_allelic: false,
            alleles: vec![AlleleCall {
                variant: VariantKind::Insertion,
                sequence: "AG".to_string(),
                depth: 12,
                total_depth: 15,
                frequency: 0.8,
                clip_position: 99,
                trace: "INS_SID_12_99".to_string(),
            }],
        }
    }

    #[test]
    fn test_builder_fills_document() {
        let stages = StageCounts { calls: 1, breakpoints: 1, ..Default::default() };
        let document = CallCollector::new("chr1")
            .with_parameters(&Thresholds::default())
            .with_stages(stages)
            .with_calls(&[call()])
            .build();
        assert_eq!(document.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(document.chromosome, "chr1");
        assert_eq!(document.stages.calls, 1);
        assert_eq!(document.calls[0].call_type, "Homo");
        assert_eq!(document.parameters.alt_read_depth, 5);
    }

    #[test]
    fn test_write_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.calls.json");
        let collector = CallCollector::new("chr1").with_calls(&[call()]);
        collector.write_json(&path).unwrap();
        let loaded: CallDocument = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(loaded.calls, collector.document().calls);
    }
}
