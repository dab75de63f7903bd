//! # Configuration Logic
//!
//! ## Role
//! Inference hyperparameters and table block sizes.
//!
//! `Config` derives `clap::Args`, so any front-end can flatten it into its own
//! parser, and `serde`, so it can be loaded from or saved next to the output.
//! Missing serde fields fall back to the defaults below.
//!
//! ## Defaults
//! - `recombination_rate`: 1e-8 per unit distance
//! - `error_rate`: 1e-3
//! - block sizes: 1024 records
//! - `sequence_length`: last site position + 1 when unset
//!
//! ## Example CLI
//! ```bash
//! infer --recombination-rate 1e-8 --error-rate 1e-3 --sequence-length 1e6
//! ```

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::error::{InferError, Result};
use crate::model::parameters::{validate_error_rate, validate_recombination_rate};
use crate::model::tree_sequence::BlockSizes;

#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recombination rate per unit of site-position distance
    #[arg(long, default_value_t = 1e-8)]
    pub recombination_rate: f64,

    /// Per-site allelic error probability
    #[arg(long, default_value_t = 1e-3)]
    pub error_rate: f64,

    /// Records per block in the ancestor store builder and live-segment arenas
    #[arg(long, default_value_t = 1024)]
    pub segment_block_size: usize,

    /// Records per block in the traceback arena
    #[arg(long, default_value_t = 1024)]
    pub traceback_block_size: usize,

    /// Node table growth increment
    #[arg(long, default_value_t = 1024)]
    pub node_mapping_block_size: usize,

    /// Mutation table growth increment
    #[arg(long, default_value_t = 1024)]
    pub mutation_block_size: usize,

    /// Total sequence length (default: last site position + 1)
    #[arg(long)]
    pub sequence_length: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recombination_rate: 1e-8,
            error_rate: 1e-3,
            segment_block_size: 1024,
            traceback_block_size: 1024,
            node_mapping_block_size: 1024,
            mutation_block_size: 1024,
            sequence_length: None,
        }
    }
}

impl Config {
    /// Check rates and block sizes
    pub fn validate(&self) -> Result<()> {
        validate_recombination_rate(self.recombination_rate)?;
        validate_error_rate(self.error_rate)?;
        let blocks = [
            ("segment_block_size", self.segment_block_size),
            ("traceback_block_size", self.traceback_block_size),
            ("node_mapping_block_size", self.node_mapping_block_size),
            ("mutation_block_size", self.mutation_block_size),
        ];
        if let Some((name, _)) = blocks.iter().find(|(_, size)| *size == 0) {
            return Err(InferError::invalid_parameter(format!("{} must be positive", name)));
        }
        if let Some(length) = self.sequence_length {
            if !length.is_finite() || length <= 0.0 {
                return Err(InferError::invalid_parameter(format!(
                    "sequence length must be finite and positive, got {}",
                    length
                )));
            }
        }
        Ok(())
    }

    /// Block sizes for the tree sequence builder
    pub fn block_sizes(&self) -> BlockSizes {
        BlockSizes {
            segment: self.segment_block_size,
            node: self.node_mapping_block_size,
            mutation: self.mutation_block_size,
        }
    }

    /// Sequence length for sites ending at `last_position`
    pub fn sequence_length_for(&self, last_position: f64) -> f64 {
        self.sequence_length.unwrap_or(last_position + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: Config,
    }

    #[test]
    fn test_cli_defaults_match_default() {
        let cli = Cli::parse_from(["infer"]);
        assert_eq!(cli.config, Config::default());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "infer",
            "--recombination-rate",
            "0.5",
            "--error-rate",
            "0.01",
            "--sequence-length",
            "100",
            "--traceback-block-size",
            "16",
        ]);
        assert_eq!(cli.config.recombination_rate, 0.5);
        assert_eq!(cli.config.error_rate, 0.01);
        assert_eq!(cli.config.sequence_length, Some(100.0));
        assert_eq!(cli.config.traceback_block_size, 16);
        cli.config.validate().unwrap();
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());
        let bad = [
            Config {
                recombination_rate: -1.0,
                ..Config::default()
            },
            Config {
                error_rate: 1.0,
                ..Config::default()
            },
            Config {
                mutation_block_size: 0,
                ..Config::default()
            },
            Config {
                sequence_length: Some(f64::NAN),
                ..Config::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(InferError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn test_sequence_length_default() {
        assert_eq!(Config::default().sequence_length_for(9.0), 10.0);
        let config = Config {
            sequence_length: Some(50.0),
            ..Config::default()
        };
        assert_eq!(config.sequence_length_for(9.0), 50.0);
    }
}
