//! Consensus strings over aligned rows, and the external aligner adapters.
//!
//! Alignment itself is always delegated to an external program; this module
//! only turns aligned rows into consensus strings and trims their ambiguous
//! ends.

pub mod msa;
pub mod pairwise;

use std::io::Write;

pub use msa::{Mafft, MultipleAligner};
pub use pairwise::{AlignedPair, Glsearch, PairwiseAligner, PairwiseEngine, ReportMode};

/// Gap character in aligned rows and consensus strings.
pub const GAP: u8 = b'-';
/// Consensus character for a column without a qualifying majority.
pub const AMBIGUOUS: u8 = b'?';

/// Named sequence handed to an external aligner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSequence {
    pub name: String,
    pub sequence: String,
}

impl NamedSequence {
    pub fn new(name: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self { name: name.into(), sequence: sequence.into() }
    }
}

/// Write sequences as FASTA with 80-column lines.
pub fn write_fasta<W: Write>(writer: &mut W, entries: &[NamedSequence]) -> std::io::Result<()> {
    for entry in entries {
        writeln!(writer, ">{}", entry.name)?;
        for chunk in entry.sequence.as_bytes().chunks(80) {
            writer.write_all(chunk)?;
            writer.write_all(b"\n")?;
        }
    }
    Ok(())
}

/// Parse FASTA text; sequence lines are concatenated per entry.
pub fn parse_fasta(text: &str) -> Vec<NamedSequence> {
    let mut entries: Vec<NamedSequence> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if let Some(name) = line.strip_prefix('>') {
            entries.push(NamedSequence::new(name.trim(), String::new()));
        } else if let Some(last) = entries.last_mut() {
            last.sequence.push_str(line.trim());
        }
    }
    entries
}

/// Per-column consensus over aligned rows.
///
/// Gaps are ignored when voting; a column holding only gaps yields `-`. The
/// most frequent residue (ties go to the one seen first in row order) is
/// emitted when it reaches `identity` of the column's residues, otherwise `?`.
pub fn column_consensus(rows: &[Vec<u8>], identity: f64) -> String {
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut consensus = String::with_capacity(width);
    let mut counts: Vec<(u8, usize)> = Vec::with_capacity(5);
    for col in 0..width {
        counts.clear();
        let mut residues = 0usize;
        for row in rows {
            let base = row.get(col).copied().unwrap_or(GAP).to_ascii_uppercase();
            if base == GAP {
                continue;
            }
            residues += 1;
            match counts.iter_mut().find(|(b, _)| *b == base) {
                Some((_, n)) => *n += 1,
                None => counts.push((base, 1)),
            }
        }
        if residues == 0 {
            consensus.push(GAP as char);
            continue;
        }
        let mut best = counts[0];
        for &(base, n) in &counts[1..] {
            if n > best.1 {
                best = (base, n);
            }
        }
        if best.1 as f64 >= identity * residues as f64 {
            consensus.push(best.0 as char);
        } else {
            consensus.push(AMBIGUOUS as char);
        }
    }
    consensus
}

/// Number of `?` placeholders in a consensus.
pub fn ambiguous_count(consensus: &str) -> usize {
    consensus.bytes().filter(|&b| b == AMBIGUOUS).count()
}

// ============================================================================
// Trimming
// ============================================================================

/// Bases removed from an end that shows ambiguity within its first three positions.
const TRIM_BASES: usize = 3;

/// Which consensus ends were trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimState {
    #[default]
    None,
    Leading,
    Trailing,
    Both,
}

impl TrimState {
    /// Inspect both ends of `consensus`, returning the trimmed string and the state applied.
    pub fn trim(consensus: &str) -> (String, TrimState) {
        let bytes = consensus.as_bytes();
        let head = &bytes[..bytes.len().min(TRIM_BASES)];
        let tail = &bytes[bytes.len().saturating_sub(TRIM_BASES)..];
        let state = match (head.contains(&AMBIGUOUS), tail.contains(&AMBIGUOUS)) {
            (true, true) => TrimState::Both,
            (true, false) => TrimState::Leading,
            (false, true) => TrimState::Trailing,
            (false, false) => TrimState::None,
        };
        (state.apply(consensus), state)
    }

    /// Trim `consensus` the way this state says, regardless of its content.
    pub fn apply(self, consensus: &str) -> String {
        let len = consensus.len();
        let (from, to) = match self {
            TrimState::None => (0, len),
            TrimState::Leading => (TRIM_BASES, len),
            TrimState::Trailing => (0, len.saturating_sub(TRIM_BASES)),
            TrimState::Both => (TRIM_BASES, len.saturating_sub(TRIM_BASES)),
        };
        if from >= to {
            return String::new();
        }
        consensus[from..to].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(list: &[&str]) -> Vec<Vec<u8>> {
        list.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_column_consensus_majority() {
        let aligned = rows(&["ACGTA", "ACGTA", "ACCTA", "acgta"]);
        assert_eq!(column_consensus(&aligned, 0.8), "AC?TA");
        assert_eq!(column_consensus(&aligned, 0.5), "ACGTA");
    }

    #[test]
    fn test_column_consensus_ignores_gaps() {
        let aligned = rows(&["--GTA", "-CGT-", "ACGT-"]);
        assert_eq!(column_consensus(&aligned, 1.0), "ACGTA");
        let aligned = rows(&["A-C", "A-G"]);
        assert_eq!(column_consensus(&aligned, 1.0), "A-?");
    }

    #[test]
    fn test_column_consensus_tie_prefers_first_row() {
        let aligned = rows(&["AT", "CT"]);
        assert_eq!(column_consensus(&aligned, 0.5), "AT");
    }

    #[test]
    fn test_trim_states() {
        assert_eq!(TrimState::trim("A?GTACGTAC"), ("TACGTAC".to_string(), TrimState::Leading));
        assert_eq!(TrimState::trim("ACGTACGT?C"), ("ACGTACG".to_string(), TrimState::Trailing));
        assert_eq!(TrimState::trim("?CGTACGTA?"), ("TACG".to_string(), TrimState::Both));
        assert_eq!(TrimState::trim("ACGT?CGTAC"), ("ACGT?CGTAC".to_string(), TrimState::None));
        assert_eq!(TrimState::trim("?A").0, "");
    }

    #[test]
    fn test_apply_saved_state() {
        assert_eq!(TrimState::Leading.apply("ACGTACGT"), "TACGT");
        assert_eq!(TrimState::Both.apply("ACGTACGT"), "TA");
        assert_eq!(TrimState::None.apply("ACGT"), "ACGT");
    }

    #[test]
    fn test_fasta_round_trip_shape() {
        let entries = vec![NamedSequence::new("B_10_12-v0", "ACGT".repeat(30))];
        let mut buf = Vec::new();
        write_fasta(&mut buf, &entries).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(parse_fasta(&text), entries);
    }
}
