//! # Treeseq-Infer Library
//!
//! Ancestor storage, Li-Stephens copying-path matching and tree sequence
//! assembly for ancestral recombination graph inference.
//!
//! ## Modules
//! - `config`: Hyperparameters, block sizes and their validation
//! - `data`: Sites, alleles and the compressed ancestor store
//! - `error`: Error types and result aliases
//! - `model`: Matcher, traceback and tree sequence builder
//! - `pipelines`: End-to-end inference orchestration
//! - `utils`: Shared utilities (workspace pattern)
//!
//! ## Module Structure
//! ```text
//! treeseq_infer
//! ├── data        # Sites, alleles, newtype ids
//! │   └── storage # Segment arena, store builder, frozen store
//! ├── model       # Parameters, traceback, matcher, tree sequence builder
//! ├── pipelines   # Epoch-ordered inference driver
//! └── utils       # Workspace buffers
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipelines;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use data::haplotype::{Allele, AncestorIdx, NodeIdx, ANCESTRAL_ALLELE, DERIVED_ALLELE, UNKNOWN_ALLELE};
pub use data::site::SiteIdx;
pub use data::storage::{AncestorStore, AncestorStoreBuilder, SegmentArena};
pub use error::{InferError, Result};
pub use model::{
    AncestorMatcher, MatchResult, ModelParams, Traceback, TreeSequence, TreeSequenceBuilder,
};
pub use pipelines::{AncestorInput, InferenceInput, InferencePipeline};
