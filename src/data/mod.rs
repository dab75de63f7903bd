//! # Data Module
//!
//! In-memory representations of sites, haplotypes and the compressed
//! ancestor store.
//!
//! ## Design Philosophy: Data-Oriented Design
//! - **Structure of Arrays (SoA):** per-site segment tables hold parallel
//!   `start`/`end`/`state` arrays for cache-friendly binary search.
//! - **Zero-cost newtypes:** `SiteIdx`, `AncestorIdx`, `NodeIdx` prevent index
//!   bugs at compile time with no runtime overhead.
//! - **Index handles instead of pointers:** linked records live in a
//!   `SegmentArena` and link to each other through `Option<Handle>`.

pub mod haplotype;
pub mod site;
pub mod storage;

// Re-export commonly used types
pub use haplotype::{
    known_range, Allele, AncestorIdx, NodeIdx, ANCESTRAL_ALLELE, DERIVED_ALLELE, UNKNOWN_ALLELE,
};
pub use site::{validate_positions, Site, SiteIdx, Sites};
pub use storage::{AncestorStore, AncestorStoreBuilder, FlattenedSegments, SegmentArena};
