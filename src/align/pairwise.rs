//! Pairwise realignment of a candidate consensus against a reference window.
//!
//! The engine (FASTA36 `glsearch36`) is global in the query and local in the
//! reference. It is run twice, once favouring a single long gap and once with
//! normal gap costs; the gap-priority result is used when its shape is one
//! the breakpoint resolver can interpret.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use log::{debug, trace};

use super::{column_consensus, write_fasta, NamedSequence, TrimState, GAP};
use crate::error::{CallerError, Result};

/// Engine labels are truncated to this many characters in the report.
const LABEL_WIDTH: usize = 6;
/// Column where the sequence starts on an alignment line.
const SEQUENCE_COLUMN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// Gap extension free (`-g0`): prefers one long gap over scattered ones
    GapPriority,
    /// Default gap extension
    Normal,
}

/// Produces the textual alignment report for one query/reference pair.
pub trait PairwiseEngine: Sync {
    fn report(&self, query: &NamedSequence, reference: &NamedSequence, mode: ReportMode) -> Result<String>;
}

/// `glsearch36 -s <matrix> [-g0] -f20 <query> <reference>`
#[derive(Debug, Clone)]
pub struct Glsearch {
    command: String,
    matrix: PathBuf,
    scratch_dir: PathBuf,
}

impl Glsearch {
    pub fn new(command: impl Into<String>, matrix: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self { command: command.into(), matrix: matrix.into(), scratch_dir: scratch_dir.into() }
    }
}

impl PairwiseEngine for Glsearch {
    fn report(&self, query: &NamedSequence, reference: &NamedSequence, mode: ReportMode) -> Result<String> {
        let scratch = |prefix: &str, entry: &NamedSequence| -> Result<tempfile::NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix(prefix)
                .suffix(".fa")
                .tempfile_in(&self.scratch_dir)?;
            write_fasta(file.as_file_mut(), std::slice::from_ref(entry))?;
            Ok(file)
        };
        let query_file = scratch("query_", query)?;
        let reference_file = scratch("ref_", reference)?;

        let mut args: Vec<String> = vec!["-s".to_string(), self.matrix.display().to_string()];
        if mode == ReportMode::GapPriority {
            args.push("-g0".to_string());
        }
        args.push("-f20".to_string());
        args.push(query_file.path().display().to_string());
        args.push(reference_file.path().display().to_string());

        let command_line = format!("{} {}", self.command, args.join(" "));
        trace!("Running {}", command_line);
        let output = Command::new(&self.command)
            .args(&args)
            .stderr(Stdio::null())
            .output()
            .map_err(|source| CallerError::EngineLaunch { command: command_line.clone(), source })?;
        if !output.status.success() {
            return Err(CallerError::EngineFailed {
                command: command_line,
                status: output.status.code().unwrap_or(-1),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ============================================================================
// Aligned string shapes
// ============================================================================

/// Maximal run in an aligned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Run {
    Gap(usize),
    Bases(usize),
}

/// Split an aligned string into alternating gap and base runs.
pub fn runs(aligned: &str) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::new();
    for b in aligned.bytes() {
        let gap = b == GAP;
        match out.last_mut() {
            Some(Run::Gap(n)) if gap => *n += 1,
            Some(Run::Bases(n)) if !gap => *n += 1,
            _ => out.push(if gap { Run::Gap(1) } else { Run::Bases(1) }),
        }
    }
    out
}

/// Shapes the breakpoint resolver can read from a gap-priority alignment.
fn is_interpretable(aligned_candidate: &str, aligned_reference: &str) -> bool {
    let candidate = runs(aligned_candidate);
    match runs(aligned_reference).as_slice() {
        [Run::Bases(_)] => matches!(
            candidate.as_slice(),
            [Run::Gap(_), Run::Bases(_), Run::Gap(_), Run::Bases(_), Run::Gap(_)]
        ),
        [Run::Bases(_), Run::Gap(_), Run::Bases(_)] => {
            matches!(candidate.as_slice(), [Run::Gap(_), Run::Bases(_), Run::Gap(_)])
        }
        _ => false,
    }
}

// ============================================================================
// Report parsing
// ============================================================================

/// Reference start from `global/local score: ... (a-b:c-d)`.
fn parse_score_line(line: &str) -> Option<u64> {
    let line = line.trim();
    if !line.starts_with("global/local score") || !line.ends_with(')') {
        return None;
    }
    let (_, coords) = line.rsplit_once(':')?;
    let (start, end) = coords.split_once('-')?;
    end.trim_end_matches(')').parse::<u64>().ok()?;
    start.trim().parse().ok()
}

/// Rebuild full-length aligned candidate and reference strings from the first
/// alignment block of a report. `None` when the block has no score line or no
/// alignment lines for either label.
pub fn parse_report(
    report: &str,
    query_name: &str,
    reference_name: &str,
    reference: &str,
) -> Option<(String, String)> {
    let query_label: String = query_name.chars().take(LABEL_WIDTH).collect();
    let reference_label: String = reference_name.chars().take(LABEL_WIDTH).collect();

    let mut headers = 0;
    let mut reference_start = None;
    let mut leading_spaces = None;
    let mut query_aln = String::new();
    let mut reference_aln = String::new();

    for line in report.lines() {
        if line.starts_with('>') {
            headers += 1;
            if headers >= 2 {
                break;
            }
            continue;
        }
        if headers != 1 {
            continue;
        }
        if reference_start.is_none()
            && let Some(start) = parse_score_line(line)
        {
            reference_start = Some(start);
            continue;
        }
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        let segment = line.get(SEQUENCE_COLUMN..).unwrap_or("").trim_end();
        if token == query_label {
            if leading_spaces.is_none() {
                leading_spaces = Some(segment.bytes().filter(|&b| b == b' ').count() as u64);
            }
            query_aln.push_str(&segment.replace(' ', "-"));
        } else if token == reference_label {
            reference_aln.push_str(&segment.replace(' ', "-"));
        }
    }

    let reference_start = reference_start?;
    if query_aln.is_empty() || reference_aln.is_empty() {
        return None;
    }
    let hidden = reference_start
        .checked_sub(leading_spaces.unwrap_or(0) + 1)
        .unwrap_or(0) as usize;
    let head = reference.get(..hidden)?;

    let mut aligned_reference = format!("{}{}", head, reference_aln).to_ascii_uppercase();
    let mut aligned_candidate = format!("{}{}", "-".repeat(hidden), query_aln).to_ascii_uppercase();
    let width = aligned_reference.len().max(aligned_candidate.len());
    pad_to(&mut aligned_reference, width);
    pad_to(&mut aligned_candidate, width);
    Some((aligned_candidate, aligned_reference))
}

fn pad_to(s: &mut String, width: usize) {
    while s.len() < width {
        s.push(GAP as char);
    }
}

// ============================================================================
// Aligner
// ============================================================================

/// Candidate-vs-reference alignment and the consensus derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPair {
    pub aligned_candidate: String,
    pub aligned_reference: String,
    pub consensus: String,
    pub trim: TrimState,
    /// 1-based position of the first reference window base
    pub reference_start: u64,
}

/// Drives a [`PairwiseEngine`] and interprets its reports.
pub struct PairwiseAligner<'a> {
    engine: &'a dyn PairwiseEngine,
}

impl<'a> PairwiseAligner<'a> {
    pub fn new(engine: &'a dyn PairwiseEngine) -> Self {
        Self { engine }
    }

    /// Align `candidate` (spanning `span`) against the reference window that
    /// starts at `reference_start`.
    ///
    /// With `trim` set, that state is applied to the consensus; otherwise a
    /// fresh trim is computed and returned in the pair. `Ok(None)` means no
    /// report could be interpreted.
    pub fn align(
        &self,
        candidate: &str,
        span: (u64, u64),
        reference: &str,
        reference_start: u64,
        identity: f64,
        trim: Option<TrimState>,
    ) -> Result<Option<AlignedPair>> {
        if candidate.is_empty() || reference.is_empty() {
            return Ok(None);
        }
        let reference_end = reference_start + reference.len() as u64 - 1;
        let query = NamedSequence::new(format!("Q_{}_{}", span.0, span.1), candidate);
        let target = NamedSequence::new(format!("R_{}_{}", reference_start, reference_end), reference);

        let report = self.engine.report(&query, &target, ReportMode::GapPriority)?;
        let parsed = match parse_report(&report, &query.name, &target.name, reference) {
            Some((cand, refr)) if is_interpretable(&cand, &refr) => Some((cand, refr)),
            _ => {
                let report = self.engine.report(&query, &target, ReportMode::Normal)?;
                parse_report(&report, &query.name, &target.name, reference)
            }
        };
        let Some((aligned_candidate, aligned_reference)) = parsed else {
            debug!("Unresolved alignment for {}", query.name);
            return Ok(None);
        };

        let rows = [aligned_candidate.as_bytes().to_vec(), aligned_reference.as_bytes().to_vec()];
        let raw = column_consensus(&rows, identity);
        let (consensus, trim) = match trim {
            Some(state) => (state.apply(&raw), state),
            None => TrimState::trim(&raw),
        };
        Ok(Some(AlignedPair { aligned_candidate, aligned_reference, consensus, trim, reference_start }))
    }
}
