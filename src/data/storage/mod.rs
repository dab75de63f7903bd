//! # Ancestor Storage
//!
//! Two-phase storage of ancestor haplotypes:
//! - `AncestorStoreBuilder`: mutable, append-only, run-length encodes each
//!   new ancestor against the previous one at every site.
//! - `AncestorStore`: frozen CSR tables answering point queries by binary
//!   search.
//!
//! The builder keeps its per-site chains in a `SegmentArena`, a record pool
//! that grows in fixed blocks and recycles freed records through a free list.

pub mod arena;
pub mod builder;
pub mod store;

pub use arena::{Handle, IndexList, Linked, SegmentArena};
pub use builder::{AncestorStoreBuilder, FlattenedSegments};
pub use store::{AncestorStore, AncestorSummary, SegmentView};
