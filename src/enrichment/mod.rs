//! Over-representation of molecules among differential edges.
//!
//! Given the pair indices that passed the differential test and the background pair space the
//! test ran over, every molecule with at least one differential edge is tested with an upper-tail
//! hypergeometric probability. The background is the complete graph in exhaustive mode and the
//! candidate list otherwise.

mod hypergeom;

pub use hypergeom::{
    EnrichmentResults, hypergeometric_enrichment, hypergeometric_upper_tail, significant_edges,
};
