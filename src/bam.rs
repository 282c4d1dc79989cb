//! CIGAR shape matching for clip and split-read evidence.
//!
//! Only a fixed set of CIGAR layouts is interpreted. Each one is a variant of
//! [`CigarShape`], recognized by slice patterns over the compacted operations;
//! anything else (hard clips, skips, pads, longer layouts) is ignored by the
//! evidence collector and the depth counter alike.

use crate::input::CigarKind;

/// Simplified CIGAR operation: only the four kinds the shapes are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    Match,
    Ins,
    Del,
    SoftClip,
}

impl CigarOp {
    fn from_kind(kind: CigarKind) -> Option<Self> {
        match kind {
            CigarKind::Match => Some(CigarOp::Match),
            CigarKind::Insertion => Some(CigarOp::Ins),
            CigarKind::Deletion => Some(CigarOp::Del),
            CigarKind::SoftClip => Some(CigarOp::SoftClip),
            _ => None,
        }
    }
}

/// Recognized CIGAR layouts. Field names follow the order of operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarShape {
    /// `M`
    Match { m: usize },
    /// `M S`
    MatchClip { m: usize, clip: usize },
    /// `M I M S`
    MatchInsMatchClip { m1: usize, ins: usize, m2: usize, clip: usize },
    /// `M D M S`
    MatchDelMatchClip { m1: usize, del: usize, m2: usize, clip: usize },
    /// `S M`
    ClipMatch { clip: usize, m: usize },
    /// `S M I M`
    ClipMatchInsMatch { clip: usize, m1: usize, ins: usize, m2: usize },
    /// `S M D M`
    ClipMatchDelMatch { clip: usize, m1: usize, del: usize, m2: usize },
    /// `M I M`
    MatchInsMatch { m1: usize, ins: usize, m2: usize },
    /// `M D M`
    MatchDelMatch { m1: usize, del: usize, m2: usize },
    /// `M D M D M`
    DelDel { m1: usize, d1: usize, m2: usize, d2: usize, m3: usize },
    /// `M D M I M`
    DelIns { m1: usize, d1: usize, m2: usize, i2: usize, m3: usize },
    /// `M I M D M`
    InsDel { m1: usize, i1: usize, m2: usize, d2: usize, m3: usize },
    /// `M I M I M`
    InsIns { m1: usize, i1: usize, m2: usize, i2: usize, m3: usize },
}

/// Which side of the aligned bases carries the soft clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipSide {
    /// Clip after the aligned bases; the breakpoint is at the alignment end
    Trailing,
    /// Clip before the aligned bases; the breakpoint is at the alignment start
    Leading,
}

impl CigarShape {
    /// Match a decoded CIGAR against the recognized layouts.
    pub fn classify(ops: &[(CigarKind, usize)]) -> Option<Self> {
        let mut compact = Vec::with_capacity(ops.len());
        for &(kind, len) in ops {
            compact.push((CigarOp::from_kind(kind)?, len));
        }

        use CigarOp::{Del as D, Ins as I, Match as M, SoftClip as S};
        let shape = match compact.as_slice() {
            [(M, m)] => CigarShape::Match { m: *m },
            [(M, m), (S, clip)] => CigarShape::MatchClip { m: *m, clip: *clip },
            [(M, m1), (I, ins), (M, m2), (S, clip)] => CigarShape::MatchInsMatchClip {
                m1: *m1, ins: *ins, m2: *m2, clip: *clip,
            },
            [(M, m1), (D, del), (M, m2), (S, clip)] => CigarShape::MatchDelMatchClip {
                m1: *m1, del: *del, m2: *m2, clip: *clip,
            },
            [(S, clip), (M, m)] => CigarShape::ClipMatch { clip: *clip, m: *m },
            [(S, clip), (M, m1), (I, ins), (M, m2)] => CigarShape::ClipMatchInsMatch {
                clip: *clip, m1: *m1, ins: *ins, m2: *m2,
            },
            [(S, clip), (M, m1), (D, del), (M, m2)] => CigarShape::ClipMatchDelMatch {
                clip: *clip, m1: *m1, del: *del, m2: *m2,
            },
            [(M, m1), (I, ins), (M, m2)] => CigarShape::MatchInsMatch { m1: *m1, ins: *ins, m2: *m2 },
            [(M, m1), (D, del), (M, m2)] => CigarShape::MatchDelMatch { m1: *m1, del: *del, m2: *m2 },
            [(M, m1), (D, d1), (M, m2), (D, d2), (M, m3)] => CigarShape::DelDel {
                m1: *m1, d1: *d1, m2: *m2, d2: *d2, m3: *m3,
            },
            [(M, m1), (D, d1), (M, m2), (I, i2), (M, m3)] => CigarShape::DelIns {
                m1: *m1, d1: *d1, m2: *m2, i2: *i2, m3: *m3,
            },
            [(M, m1), (I, i1), (M, m2), (D, d2), (M, m3)] => CigarShape::InsDel {
                m1: *m1, i1: *i1, m2: *m2, d2: *d2, m3: *m3,
            },
            [(M, m1), (I, i1), (M, m2), (I, i2), (M, m3)] => CigarShape::InsIns {
                m1: *m1, i1: *i1, m2: *m2, i2: *i2, m3: *m3,
            },
            _ => return None,
        };
        Some(shape)
    }

    /// Reference bases covered by the alignment (matches plus deletions).
    pub fn reference_span(&self) -> usize {
        match *self {
            CigarShape::Match { m } => m,
            CigarShape::MatchClip { m, .. } => m,
            CigarShape::MatchInsMatchClip { m1, m2, .. } => m1 + m2,
            CigarShape::MatchDelMatchClip { m1, del, m2, .. } => m1 + del + m2,
            CigarShape::ClipMatch { m, .. } => m,
            CigarShape::ClipMatchInsMatch { m1, m2, .. } => m1 + m2,
            CigarShape::ClipMatchDelMatch { m1, del, m2, .. } => m1 + del + m2,
            CigarShape::MatchInsMatch { m1, m2, .. } => m1 + m2,
            CigarShape::MatchDelMatch { m1, del, m2 } => m1 + del + m2,
            CigarShape::DelDel { m1, d1, m2, d2, m3 } => m1 + d1 + m2 + d2 + m3,
            CigarShape::DelIns { m1, d1, m2, m3, .. } => m1 + d1 + m2 + m3,
            CigarShape::InsDel { m1, m2, d2, m3, .. } => m1 + m2 + d2 + m3,
            CigarShape::InsIns { m1, m2, m3, .. } => m1 + m2 + m3,
        }
    }

    /// Soft clip carried by a clip-evidence layout, as (side, clip length).
    ///
    /// Only the six single-clip layouts qualify; pure matches and split
    /// alignments return `None`.
    pub fn soft_clip(&self) -> Option<(ClipSide, usize)> {
        match *self {
            CigarShape::MatchClip { clip, .. }
            | CigarShape::MatchInsMatchClip { clip, .. }
            | CigarShape::MatchDelMatchClip { clip, .. } => Some((ClipSide::Trailing, clip)),
            CigarShape::ClipMatch { clip, .. }
            | CigarShape::ClipMatchInsMatch { clip, .. }
            | CigarShape::ClipMatchDelMatch { clip, .. } => Some((ClipSide::Leading, clip)),
            _ => None,
        }
    }
}
