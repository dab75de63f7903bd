//! # Model Module
//!
//! Matching and genealogy construction.
//!
//! ## Core Algorithms
//! - `Parameters`: Li-Stephens transition and emission probabilities
//! - `Traceback`: sparse per-site record of the switches on the best path
//! - `Matcher`: run-length Viterbi over the frozen ancestor store
//! - `TreeSequence`: grafts decoded paths into nodes, edgesets and mutations
//!
//! ## Matching Order
//! Ancestors are matched epoch by epoch, oldest first, each against the
//! strictly older ancestors only. Samples are matched last against every
//! ancestor. The store never changes during matching, so matchers for the
//! same epoch are independent of each other.

pub mod matcher;
pub mod parameters;
pub mod traceback;
pub mod tree_sequence;

pub use matcher::{AncestorMatcher, MatchResult};
pub use parameters::ModelParams;
pub use traceback::Traceback;
pub use tree_sequence::{
    BlockSizes, EdgesetTable, MutationTable, NodeTable, SiteTable, TreeSequence,
    TreeSequenceBuilder, NODE_IS_SAMPLE,
};
