//! Indexed alignment (BAM/CRAM) and reference (FASTA) inputs via noodles.
//!
//! The calling stages only see the [`AlignmentSource`] and [`ReferenceSource`]
//! traits so they can be driven from memory in tests.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use log::debug;
use noodles::bam;
use noodles::core::Region;
use noodles::cram;
use noodles::fasta;
use noodles::sam;

use crate::error::{CallerError, Result};

pub use noodles::sam::alignment::record::cigar::op::Kind as CigarKind;

pub const FLAG_PROPER_PAIR: u16 = 0x2;
pub const FLAG_UNMAPPED: u16 = 0x4;
pub const FLAG_MATE_UNMAPPED: u16 = 0x8;
pub const FLAG_REVERSE: u16 = 0x10;
pub const FLAG_DUPLICATE: u16 = 0x400;

// ============================================================================
// Records
// ============================================================================

/// Decoded alignment record with the fields the caller reads.
#[derive(Debug, Clone, Default)]
pub struct AlignmentRecord {
    pub name: Option<String>,
    /// 1-based leftmost position; for unmapped reads, the mate's position
    pub pos: u64,
    pub flag: u16,
    pub mapq: u8,
    /// ASCII bases
    pub seq: Vec<u8>,
    /// Raw Phred scores
    pub qual: Vec<u8>,
    pub cigar: Vec<(CigarKind, usize)>,
    pub tlen: i32,
}

impl AlignmentRecord {
    pub fn has_flag(&self, bits: u16) -> bool {
        self.flag & bits == bits
    }

    /// True when the read sequence contains an ambiguous base.
    pub fn has_ambiguous_base(&self) -> bool {
        self.seq.iter().any(|b| b.eq_ignore_ascii_case(&b'N'))
    }
}

/// Required and excluded flag bits for a record stream (`samtools view -f/-F`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagFilter {
    pub required: u16,
    pub excluded: u16,
}

impl FlagFilter {
    /// Non-duplicate properly paired records.
    pub fn proper_pairs() -> Self {
        Self { required: FLAG_PROPER_PAIR, excluded: FLAG_DUPLICATE }
    }

    /// Non-duplicate records carrying `bits`.
    pub fn with_flag(bits: u16) -> Self {
        Self { required: bits, excluded: FLAG_DUPLICATE }
    }

    pub fn accepts(&self, flag: u16) -> bool {
        flag & self.required == self.required && flag & self.excluded == 0
    }
}

/// Streams alignment records of one chromosome in coordinate order.
pub trait AlignmentSource {
    /// Call `visitor` for each record passing `filter`; stops early on `Break`.
    fn visit_records(
        &mut self,
        chr: &str,
        filter: FlagFilter,
        visitor: &mut dyn FnMut(&AlignmentRecord) -> ControlFlow<()>,
    ) -> Result<()>;
}

/// Serves upper-cased reference bases for 1-based inclusive windows.
pub trait ReferenceSource {
    fn fetch(&mut self, chr: &str, start: u64, end: u64) -> Result<String>;
}

// ============================================================================
// BAM / CRAM
// ============================================================================

/// Decode any noodles alignment record into an AlignmentRecord.
fn decode_alignment_record(rec: &dyn sam::alignment::Record) -> std::io::Result<AlignmentRecord> {
    let name = rec.name().map(|n| String::from_utf8_lossy(n.as_ref()).to_string());

    let pos = match rec.alignment_start() {
        Some(p) => p?.get() as u64,
        None => 0,
    };

    let flag = rec.flags()?.bits();
    let mapq = match rec.mapping_quality() {
        Some(q) => q?.get(),
        None => 255,
    };

    let seq: Vec<u8> = rec.sequence().iter().collect();
    let qual = rec.quality_scores().iter().collect::<std::io::Result<Vec<u8>>>()?;

    let mut cigar = Vec::new();
    for op_result in rec.cigar().iter() {
        let op = op_result?;
        cigar.push((op.kind(), op.len()));
    }

    let tlen = rec.template_length()?;

    Ok(AlignmentRecord { name, pos, flag, mapq, seq, qual, cigar, tlen })
}

enum Inner {
    Bam(bam::io::IndexedReader<noodles::bgzf::io::Reader<File>>),
    Cram(cram::io::IndexedReader<File>),
}

/// Indexed BAM or CRAM input.
pub struct AlignmentInput {
    inner: Inner,
    header: sam::Header,
    path: PathBuf,
}

impl AlignmentInput {
    /// Open an indexed alignment file (BAM or CRAM), auto-detected by magic
    /// bytes (falling back to file extension). CRAM needs the reference.
    pub fn open(path: &Path, reference: Option<&Path>) -> Result<Self> {
        if Self::is_cram_file(path) {
            Self::open_cram(path, reference)
        } else {
            Self::open_bam(path)
        }
    }

    fn is_cram_file(path: &Path) -> bool {
        if let Ok(mut f) = File::open(path) {
            let mut magic = [0u8; 4];
            if std::io::Read::read_exact(&mut f, &mut magic).is_ok() {
                return &magic == b"CRAM";
            }
        }
        path.extension().is_some_and(|ext| ext == "cram")
    }

    fn require_index(path: &Path, suffix: &str) -> Result<()> {
        let mut index = path.as_os_str().to_owned();
        index.push(suffix);
        if !Path::new(&index).exists() {
            return Err(CallerError::alignment(
                path,
                format!("index {} not found; create one with 'samtools index'", Path::new(&index).display()),
            ));
        }
        Ok(())
    }

    fn open_bam(path: &Path) -> Result<Self> {
        Self::require_index(path, ".bai")?;
        let mut reader = bam::io::indexed_reader::Builder::default()
            .build_from_path(path)
            .map_err(|e| CallerError::alignment(path, e))?;
        let header = reader.read_header().map_err(|e| CallerError::alignment(path, e))?;
        Ok(AlignmentInput { inner: Inner::Bam(reader), header, path: path.to_path_buf() })
    }

    fn open_cram(path: &Path, reference: Option<&Path>) -> Result<Self> {
        Self::require_index(path, ".crai")?;
        let repository = match reference {
            Some(rp) => {
                let indexed_reader = fasta::io::indexed_reader::Builder::default()
                    .build_from_path(rp)
                    .map_err(|e| CallerError::alignment(path, format!("reference {}: {}", rp.display(), e)))?;
                fasta::Repository::new(fasta::repository::adapters::IndexedReader::new(indexed_reader))
            }
            None => fasta::Repository::default(),
        };
        let mut reader = cram::io::indexed_reader::Builder::default()
            .set_reference_sequence_repository(repository)
            .build_from_path(path)
            .map_err(|e| CallerError::alignment(path, e))?;
        let header = reader.read_header().map_err(|e| CallerError::alignment(path, e))?;
        Ok(AlignmentInput { inner: Inner::Cram(reader), header, path: path.to_path_buf() })
    }

    /// Reference sequence names in header order.
    pub fn reference_names(&self) -> Vec<String> {
        self.header
            .reference_sequences()
            .keys()
            .map(|name| String::from_utf8_lossy(name).to_string())
            .collect()
    }
}

impl AlignmentSource for AlignmentInput {
    fn visit_records(
        &mut self,
        chr: &str,
        filter: FlagFilter,
        visitor: &mut dyn FnMut(&AlignmentRecord) -> ControlFlow<()>,
    ) -> Result<()> {
        let region: Region = chr
            .parse()
            .map_err(|e| CallerError::alignment(&self.path, format!("invalid region '{}': {}", chr, e)))?;
        let path = &self.path;
        let header = &self.header;
        let mut seen = 0u64;

        macro_rules! drive {
            ($records:expr) => {
                for result in $records {
                    let rec = result.map_err(|e| CallerError::alignment(path, e))?;
                    let record = decode_alignment_record(&rec).map_err(|e| CallerError::alignment(path, e))?;
                    seen += 1;
                    if !filter.accepts(record.flag) {
                        continue;
                    }
                    if visitor(&record).is_break() {
                        break;
                    }
                }
            };
        }

        match &mut self.inner {
            Inner::Bam(r) => {
                let query = r.query(header, &region).map_err(|e| CallerError::alignment(path, e))?;
                drive!(query);
            }
            Inner::Cram(r) => {
                let query = r.query(header, &region).map_err(|e| CallerError::alignment(path, e))?;
                drive!(query);
            }
        }
        debug!("Scanned {} records on {}", seen, chr);
        Ok(())
    }
}

// ============================================================================
// FASTA reference
// ============================================================================

/// Indexed FASTA reference.
pub struct ReferenceInput<R> {
    reader: fasta::io::IndexedReader<R>,
    lengths: HashMap<String, u64>,
}

/// Open an indexed FASTA (`<path>.fai` must exist).
pub fn open_reference(path: &Path) -> Result<ReferenceInput<impl BufRead + Seek>> {
    let mut fai = path.as_os_str().to_owned();
    fai.push(".fai");
    let lengths = read_fai_lengths(Path::new(&fai))?;
    let reader = fasta::io::indexed_reader::Builder::default()
        .build_from_path(path)
        .map_err(|e| CallerError::Reference {
            chr: String::new(),
            start: 0,
            end: 0,
            reason: format!("cannot open {}: {}", path.display(), e),
        })?;
    Ok(ReferenceInput { reader, lengths })
}

/// Sequence name -> length from the first two columns of a .fai file.
fn read_fai_lengths(path: &Path) -> Result<HashMap<String, u64>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lengths = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let mut fields = line.split('\t');
        if let (Some(name), Some(len)) = (fields.next(), fields.next())
            && let Ok(len) = len.parse::<u64>()
        {
            lengths.insert(name.to_string(), len);
        }
    }
    Ok(lengths)
}

impl<R: BufRead + Seek> ReferenceSource for ReferenceInput<R> {
    fn fetch(&mut self, chr: &str, start: u64, end: u64) -> Result<String> {
        let lookup_error = |reason: String| CallerError::Reference { chr: chr.to_string(), start, end, reason };
        let length = *self
            .lengths
            .get(chr)
            .ok_or_else(|| lookup_error("sequence not in FASTA index".to_string()))?;
        let start = start.max(1);
        let end = end.min(length);
        if start > end {
            return Ok(String::new());
        }
        let region: Region = format!("{}:{}-{}", chr, start, end)
            .parse()
            .map_err(|e| lookup_error(format!("{e}")))?;
        let record = self.reader.query(&region).map_err(|e| lookup_error(e.to_string()))?;
        Ok(String::from_utf8_lossy(record.sequence().as_ref()).to_ascii_uppercase())
    }
}
