//! Multiple sequence alignment through an external engine (MAFFT).

use std::path::PathBuf;
use std::process::{Command, Stdio};

use log::trace;

use super::{column_consensus, parse_fasta, write_fasta, NamedSequence, GAP};
use crate::error::{CallerError, Result};

/// Aligns a set of sequences, returning one gapped row per input.
///
/// Implementations are shared by the consensus workers, hence `Sync`.
pub trait MultipleAligner: Sync {
    fn align(&self, sequences: &[NamedSequence]) -> Result<Vec<NamedSequence>>;
}

/// MAFFT invoked as `--nuc --ep 0.0 --op 1 --genafpair --maxiterate 1000`.
#[derive(Debug, Clone)]
pub struct Mafft {
    command: String,
    scratch_dir: PathBuf,
}

impl Mafft {
    pub fn new(command: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self { command: command.into(), scratch_dir: scratch_dir.into() }
    }
}

const MAFFT_ARGS: [&str; 9] = [
    "--nuc", "--ep", "0.0", "--op", "1", "--genafpair", "--maxiterate", "1000", "--quiet",
];

impl MultipleAligner for Mafft {
    fn align(&self, sequences: &[NamedSequence]) -> Result<Vec<NamedSequence>> {
        let mut input = tempfile::Builder::new()
            .prefix("msa_")
            .suffix(".fa")
            .tempfile_in(&self.scratch_dir)?;
        write_fasta(input.as_file_mut(), sequences)?;

        let command_line = format!("{} {} {}", self.command, MAFFT_ARGS.join(" "), input.path().display());
        trace!("Running {}", command_line);
        let output = Command::new(&self.command)
            .args(MAFFT_ARGS)
            .arg(input.path())
            .env("TMPDIR", &self.scratch_dir)
            .stderr(Stdio::null())
            .output()
            .map_err(|source| CallerError::EngineLaunch { command: command_line.clone(), source })?;

        if !output.status.success() {
            return Err(CallerError::EngineFailed {
                command: command_line,
                status: output.status.code().unwrap_or(-1),
            });
        }
        Ok(parse_fasta(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Consensus over an MSA plus the number of sequences that went in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsaConsensus {
    pub consensus: String,
    pub read_count: usize,
}

/// Align `sequences` and build the column consensus at `identity`.
///
/// With more than two rows, interior columns covered by a single row are
/// dropped before voting.
pub fn msa_consensus(
    aligner: &dyn MultipleAligner,
    sequences: &[NamedSequence],
    identity: f64,
) -> Result<MsaConsensus> {
    if sequences.is_empty() {
        return Ok(MsaConsensus { consensus: String::new(), read_count: 0 });
    }
    let aligned = aligner.align(sequences)?;
    let mut rows: Vec<Vec<u8>> = aligned
        .into_iter()
        .map(|entry| entry.sequence.into_bytes())
        .collect();
    rows.sort();
    if rows.len() > 2 {
        drop_single_coverage_columns(&mut rows);
    }
    Ok(MsaConsensus {
        consensus: column_consensus(&rows, identity),
        read_count: sequences.len(),
    })
}

/// Remove columns holding exactly one residue, except the leading and
/// trailing runs of such columns.
fn drop_single_coverage_columns(rows: &mut [Vec<u8>]) {
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let depth: Vec<usize> = (0..width)
        .map(|col| rows.iter().filter(|r| r.get(col).is_some_and(|&b| b != GAP)).count())
        .collect();
    let covered: Vec<usize> = (0..width).filter(|&col| depth[col] > 0).collect();

    let leading_end = covered.iter().take_while(|&&col| depth[col] == 1).last().copied();
    let trailing_start = covered.iter().rev().take_while(|&&col| depth[col] == 1).last().copied();

    let keep = |col: usize| {
        depth[col] != 1
            || leading_end.is_some_and(|end| col <= end)
            || trailing_start.is_some_and(|start| col >= start)
    };
    for row in rows.iter_mut() {
        let filtered: Vec<u8> = row.iter().enumerate().filter(|&(col, _)| keep(col)).map(|(_, &b)| b).collect();
        *row = filtered;
    }
}
