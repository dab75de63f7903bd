//! # Pipeline Module
//!
//! High-level orchestration of the inference workflow.
//! Coordinates store construction, matching and tree sequence assembly.

pub mod inference;

pub use inference::{AncestorInput, InferenceInput, InferencePipeline};
