//! Optional side-table recording which sequences went into each consensus.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use schemars::JsonSchema;
use serde::Serialize;

use crate::error::Result;

/// One sequence handed to the multiple aligner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct MemberSequence {
    /// Evidence or consensus kind label (`B`, `F`, `SI`, `SD`, `U`, ...)
    pub label: String,
    pub start: u64,
    pub end: u64,
    pub sequence: String,
}

impl MemberSequence {
    /// Name used for the aligner input, 1-based `index` within the group.
    pub fn entry_name(&self, index: usize) -> String {
        format!("{}_{}_{}-v{}", self.label, self.start, self.end, index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ProvenanceEntry {
    pub id: u32,
    pub kind: String,
    pub start: u64,
    pub end: u64,
    pub sequence: String,
    pub depth: u32,
    pub members: Vec<MemberSequence>,
}

/// Consensus inputs keyed by consensus id.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceTable {
    entries: BTreeMap<u32, ProvenanceEntry>,
}

impl ProvenanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ProvenanceEntry) {
        self.entries.insert(entry.id, entry);
    }

    pub fn get(&self, id: u32) -> Option<&ProvenanceEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write all entries, ordered by id, as a pretty JSON array.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        let entries: Vec<&ProvenanceEntry> = self.entries.values().collect();
        serde_json::to_writer_pretty(writer, &entries)?;
        Ok(())
    }
}
