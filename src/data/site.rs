//! # Site Definitions
//!
//! Variant sites: an immutable position with its id and the number of
//! samples carrying the derived allele.

use crate::data::haplotype::{is_valid_allele, Allele, DERIVED_ALLELE};
use crate::error::{InferError, Result};

/// Zero-cost newtype for site indices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SiteIdx(pub u32);

impl SiteIdx {
    pub fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for SiteIdx {
    fn from(idx: u32) -> Self {
        Self(idx)
    }
}

impl From<usize> for SiteIdx {
    fn from(idx: usize) -> Self {
        Self(idx as u32)
    }
}

impl From<SiteIdx> for usize {
    fn from(idx: SiteIdx) -> usize {
        idx.0 as usize
    }
}

/// A single variant site
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Site {
    pub id: SiteIdx,
    pub position: f64,
    /// Number of samples with the derived allele here
    pub frequency: u32,
}

/// All sites of a panel, in position order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sites {
    sites: Vec<Site>,
}

impl Sites {
    /// Build the site list from positions and sample haplotypes.
    ///
    /// Every sample must carry one valid allele per site.
    pub fn from_samples(positions: &[f64], samples: &[Vec<Allele>]) -> Result<Self> {
        validate_positions(positions)?;
        let mut frequency = vec![0u32; positions.len()];
        for (s, sample) in samples.iter().enumerate() {
            if sample.len() != positions.len() {
                return Err(InferError::invalid_parameter(format!(
                    "sample {} has {} alleles, expected {}",
                    s,
                    sample.len(),
                    positions.len()
                )));
            }
            for (j, &allele) in sample.iter().enumerate() {
                if !is_valid_allele(allele) {
                    return Err(InferError::invalid_parameter(format!(
                        "sample {} has invalid allele {} at site {}",
                        s, allele, j
                    )));
                }
                if allele == DERIVED_ALLELE {
                    frequency[j] += 1;
                }
            }
        }
        let sites = positions
            .iter()
            .zip(frequency)
            .enumerate()
            .map(|(j, (&position, frequency))| Site {
                id: SiteIdx::from(j),
                position,
                frequency,
            })
            .collect();
        Ok(Self { sites })
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn get(&self, site: SiteIdx) -> Option<&Site> {
        self.sites.get(site.as_usize())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter()
    }

    /// Sites carried by exactly one sample
    pub fn num_singletons(&self) -> usize {
        self.sites.iter().filter(|s| s.frequency == 1).count()
    }

    /// Sites where no sample carries the derived allele
    pub fn num_monomorphic(&self) -> usize {
        self.sites.iter().filter(|s| s.frequency == 0).count()
    }
}

/// Check that positions are finite, non-negative and strictly increasing
pub fn validate_positions(positions: &[f64]) -> Result<()> {
    for (j, &x) in positions.iter().enumerate() {
        if !x.is_finite() || x < 0.0 {
            return Err(InferError::invalid_parameter(format!(
                "site {} has invalid position {}",
                j, x
            )));
        }
        if j > 0 && x <= positions[j - 1] {
            return Err(InferError::invalid_parameter(format!(
                "site positions not strictly increasing at site {} ({} <= {})",
                j,
                x,
                positions[j - 1]
            )));
        }
    }
    Ok(())
}
