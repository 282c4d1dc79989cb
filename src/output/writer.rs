//! Tab-separated call table.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::var::genotype::{AlleleCall, FinalCall};

pub const TSV_HEADER: &str = "indel_type\tcall_type\tchr\tsttpos\tendpos\tindel_length\tindel_str\t#indel_depth\t#ttl_depth\tdetails\tclip_sttpos\tconfidence";

/// One line per call. Per-allele columns are comma-joined in allele order.
pub fn format_call(call: &FinalCall) -> String {
    let join = |field: fn(&AlleleCall) -> String| {
        call.alleles.iter().map(field).collect::<Vec<_>>().join(",")
    };
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        join(|a| a.variant.label().to_string()),
        call.zygosity.label(),
        call.chr,
        call.start,
        call.end,
        join(|a| a.length().to_string()),
        join(|a| a.sequence.clone()),
        join(|a| a.depth.to_string()),
        join(|a| a.total_depth.to_string()),
        join(|a| a.trace.clone()),
        join(|a| a.clip_position.to_string()),
        call.confidence_label(),
    )
}

pub fn write_calls<W: Write>(writer: &mut W, calls: &[FinalCall]) -> std::io::Result<()> {
    writeln!(writer, "{}", TSV_HEADER)?;
    for call in calls {
        writeln!(writer, "{}", format_call(call))?;
    }
    Ok(())
}

pub fn write_calls_tsv(path: &Path, calls: &[FinalCall]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_calls(&mut writer, calls)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::breakpoint::VariantKind;
    use crate::var::genotype::{Confidence, Zygosity};

    fn allele(variant: VariantKind, sequence: &str, depth: u32, total: u32, trace: &str) -> AlleleCall {
        AlleleCall {
            variant,
            sequence: sequence.to_string(),
            depth,
            total_depth: total,
            frequency: depth as f64 / total as f64,
            clip_position: 1000,
            trace: trace.to_string(),
        }
    }

    #[test]
    fn test_single_allele_line() {
        let call = FinalCall {
            chr: "chr1".to_string(),
            start: 1001,
            end: 1001,
            zygosity: Zygosity::Hete,
            confidence: Confidence::High,
            low_frequency: true,
            multi_allelic: false,
            alleles: vec![allele(VariantKind::Insertion, "TTAG", 5, 50, "INS_SID_5_1000")],
        };
        assert_eq!(
            format_call(&call),
            "INS\tHete\tchr1\t1001\t1001\t4\tTTAG\t5\t50\tINS_SID_5_1000\t1000\tHigh,Lowfreq"
        );
    }

    #[test]
    fn test_multi_allele_line() {
        let call = FinalCall {
            chr: "chr1".to_string(),
            start: 200,
            end: 202,
            zygosity: Zygosity::Hete,
            confidence: Confidence::Low,
            low_frequency: false,
            multi_allelic: false,
            alleles: vec![
                allele(VariantKind::Deletion, "AC", 7, 9, "DEL_LD_7_1000"),
                allele(VariantKind::Insertion, "G", 5, 9, "INS_SID_3_1000 INS_B_2_1000"),
            ],
        };
        let line = format_call(&call);
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 12);
        assert_eq!(fields[0], "DEL,INS");
        assert_eq!(fields[5], "2,1");
        assert_eq!(fields[6], "AC,G");
        assert_eq!(fields[9], "DEL_LD_7_1000,INS_SID_3_1000 INS_B_2_1000");
        assert_eq!(fields[11], "Low");
    }

    #[test]
    fn test_multi_allelic_marked_in_confidence() {
        let call = FinalCall {
            chr: "chr2".to_string(),
            start: 500,
            end: 500,
            zygosity: Zygosity::Hete,
            confidence: Confidence::Low,
            low_frequency: false,
            multi_allelic: true,
            alleles: vec![
                allele(VariantKind::Insertion, "AAA", 7, 9, "INS_SID_7_499"),
                allele(VariantKind::Insertion, "A", 6, 9, "INS_SID_6_499"),
                allele(VariantKind::Insertion, "AA", 6, 9, "INS_SID_6_499"),
            ],
        };
        let line = format_call(&call);
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields[6], "AAA,A,AA");
        assert_eq!(fields[11], "Low,MultiAllelic");
    }

    #[test]
    fn test_header_first() {
        let mut buf = Vec::new();
        write_calls(&mut buf, &[]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), format!("{}\n", TSV_HEADER));
    }
}
