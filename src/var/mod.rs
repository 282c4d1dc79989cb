//! Indel calling stages, in pipeline order.

pub mod evidence;
pub mod cluster;
pub mod consensus;
pub mod provenance;
pub mod pairing;
pub mod breakpoint;
pub mod depth;
pub mod genotype;
