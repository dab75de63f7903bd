//! # Model Parameters
//!
//! ## Role
//! Li-Stephens hyperparameters for ancestor matching: a per-unit-distance
//! recombination rate and a per-site allelic error probability.
//!
//! ### Transition
//! Between sites `l - 1` and `l`, with `n` candidate ancestors holding a known
//! allele at `l`:
//!
//! ```text
//! rho = recombination_rate * (position[l] - position[l - 1])
//! r   = 1 - exp(-rho / n)
//! switch (to one specific ancestor) = r / n
//! stay   (on the same ancestor)     = 1 - r + r / n
//! ```
//!
//! ### Emission
//! `1 - err` when the haplotype allele matches the ancestor, `err` otherwise.
//! An ancestor with an unknown allele cannot be copied (probability 0). An
//! unknown haplotype allele or a focal site carries no evidence (probability 1).

use crate::data::haplotype::{Allele, UNKNOWN_ALLELE};
use crate::error::{InferError, Result};

/// Transition masses for one site
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    /// Probability of switching to one particular other ancestor
    pub switch: f64,
    /// Probability of continuing on the current ancestor
    pub stay: f64,
}

/// Matching hyperparameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelParams {
    pub recombination_rate: f64,
    pub error_rate: f64,
}

impl ModelParams {
    pub fn new(recombination_rate: f64, error_rate: f64) -> Result<Self> {
        validate_recombination_rate(recombination_rate)?;
        validate_error_rate(error_rate)?;
        Ok(Self {
            recombination_rate,
            error_rate,
        })
    }

    /// Transition masses for a step of `distance` with `n` candidate ancestors
    #[inline]
    pub fn transition(&self, distance: f64, n: usize) -> Transition {
        transition(self.recombination_rate, distance, n)
    }

    /// Emission probability of `observed` given the copied ancestor `state`
    #[inline]
    pub fn emission(&self, observed: Allele, state: Allele, is_focal: bool) -> f64 {
        emission(self.error_rate, observed, state, is_focal)
    }
}

#[inline]
pub fn transition(recombination_rate: f64, distance: f64, n: usize) -> Transition {
    let n = n as f64;
    let rho = recombination_rate * distance;
    // expm1 keeps precision when rho / n is tiny
    let r = -(-rho / n).exp_m1();
    Transition {
        switch: r / n,
        stay: 1.0 - r + r / n,
    }
}

#[inline]
pub fn emission(error_rate: f64, observed: Allele, state: Allele, is_focal: bool) -> f64 {
    if state == UNKNOWN_ALLELE {
        0.0
    } else if is_focal || observed == UNKNOWN_ALLELE {
        1.0
    } else if observed == state {
        1.0 - error_rate
    } else {
        error_rate
    }
}

pub fn validate_recombination_rate(rate: f64) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(InferError::invalid_parameter(format!(
            "recombination rate must be finite and positive, got {}",
            rate
        )));
    }
    Ok(())
}

pub fn validate_error_rate(rate: f64) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 || rate >= 1.0 {
        return Err(InferError::invalid_parameter(format!(
            "error rate must lie in (0, 1), got {}",
            rate
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_sums_to_one() {
        let params = ModelParams::new(1e-2, 1e-3).unwrap();
        for n in [1, 2, 7, 100] {
            let t = params.transition(50.0, n);
            let total = t.stay + (n as f64 - 1.0) * t.switch;
            assert!((total - 1.0).abs() < 1e-12, "n = {}: {}", n, total);
            assert!(t.stay >= t.switch);
        }
    }

    #[test]
    fn test_transition_small_rho_precision() {
        let t = transition(1e-8, 1.0, 10);
        assert!(t.switch > 0.0);
        assert!((t.switch - 1e-10).abs() < 1e-16);
    }

    #[test]
    fn test_emission_cases() {
        let e = 0.01;
        assert_eq!(emission(e, 1, 1, false), 1.0 - e);
        assert_eq!(emission(e, 0, 1, false), e);
        assert_eq!(emission(e, 1, UNKNOWN_ALLELE, false), 0.0);
        assert_eq!(emission(e, 1, UNKNOWN_ALLELE, true), 0.0);
        assert_eq!(emission(e, UNKNOWN_ALLELE, 0, false), 1.0);
        assert_eq!(emission(e, 1, 0, true), 1.0);
    }

    #[test]
    fn test_rate_validation() {
        assert!(ModelParams::new(0.0, 0.1).is_err());
        assert!(ModelParams::new(f64::INFINITY, 0.1).is_err());
        assert!(ModelParams::new(1.0, 0.0).is_err());
        assert!(ModelParams::new(1.0, 1.0).is_err());
        assert!(ModelParams::new(1.0, f64::NAN).is_err());
        assert!(ModelParams::new(1.0, 0.5).is_ok());
    }
}
