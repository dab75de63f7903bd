//! # Ancestor Matcher
//!
//! Li-Stephens Viterbi matching of one haplotype against the frozen store.
//!
//! ## Algorithm
//! Probabilities are kept run-length encoded over ancestor ids
//! (`ProbInterval`s tiling `[0, num_ancestors)`). At every site the current
//! runs are intersected with the store's segments for that site, so the
//! per-site cost is proportional to the number of runs plus segments rather
//! than to the number of ancestors.
//!
//! For each intersected run:
//! 1. continue = `V * stay`, switch = `max(V) * switch` (with `max(V) = 1`
//!    after rescaling); the larger wins, continuation on ties.
//! 2. If switching wins, `[start, end) -> best` is recorded in the traceback.
//! 3. Multiply by the emission probability for the run's allele.
//!
//! The new values are then divided by their maximum and `ln(max)` added to
//! the log-likelihood. `best` is the smallest id holding the maximum.
//!
//! No transition is applied at the first site of the range: every ancestor
//! starts with probability 1.

use std::io::{self, Write};

use tracing::trace;

use crate::data::haplotype::{is_valid_allele, Allele, AncestorIdx};
use crate::data::storage::AncestorStore;
use crate::error::{InferError, Result};
use crate::model::parameters::{validate_recombination_rate, ModelParams, Transition};
use crate::model::traceback::Traceback;
use crate::utils::workspace::MatchWorkspace;

/// Outcome of one `best_path` call
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchResult {
    /// Ancestor copied at the last site of the range
    pub terminal_ancestor: AncestorIdx,
    /// Natural log of the Viterbi path probability
    pub log_likelihood: f64,
}

/// Viterbi matcher over a frozen store
#[derive(Debug)]
pub struct AncestorMatcher<'a> {
    store: &'a AncestorStore,
    recombination_rate: f64,
    workspace: MatchWorkspace,
}

impl<'a> AncestorMatcher<'a> {
    pub fn new(store: &'a AncestorStore, recombination_rate: f64) -> Result<Self> {
        validate_recombination_rate(recombination_rate)?;
        Ok(Self {
            store,
            recombination_rate,
            workspace: MatchWorkspace::new(),
        })
    }

    pub fn store(&self) -> &'a AncestorStore {
        self.store
    }

    pub fn recombination_rate(&self) -> f64 {
        self.recombination_rate
    }

    fn validate(
        &self,
        num_ancestors: usize,
        haplotype: &[Allele],
        start_site: usize,
        end_site: usize,
        focal_sites: &[u32],
        traceback: &Traceback,
    ) -> Result<()> {
        let num_sites = self.store.num_sites();
        if haplotype.len() != num_sites {
            return Err(InferError::invalid_parameter(format!(
                "haplotype has {} sites, expected {}",
                haplotype.len(),
                num_sites
            )));
        }
        if let Some(j) = haplotype.iter().position(|&a| !is_valid_allele(a)) {
            return Err(InferError::invalid_parameter(format!(
                "invalid allele {} at site {}",
                haplotype[j], j
            )));
        }
        if start_site >= end_site || end_site > num_sites {
            return Err(InferError::invalid_parameter(format!(
                "site range [{}, {}) is empty or exceeds {} sites",
                start_site, end_site, num_sites
            )));
        }
        if num_ancestors == 0 || num_ancestors > self.store.num_ancestors() {
            return Err(InferError::invalid_parameter(format!(
                "cannot match against {} ancestors (store holds {})",
                num_ancestors,
                self.store.num_ancestors()
            )));
        }
        if focal_sites.windows(2).any(|w| w[0] >= w[1]) {
            return Err(InferError::invalid_parameter(
                "focal sites must be strictly increasing",
            ));
        }
        if let (Some(&first), Some(&last)) = (focal_sites.first(), focal_sites.last()) {
            if (first as usize) < start_site || last as usize >= end_site {
                return Err(InferError::invalid_parameter(format!(
                    "focal sites {}..={} fall outside [{}, {})",
                    first, last, start_site, end_site
                )));
            }
        }
        if traceback.num_sites() != num_sites {
            return Err(InferError::invalid_parameter(format!(
                "traceback has {} sites, expected {}",
                traceback.num_sites(),
                num_sites
            )));
        }
        Ok(())
    }

    /// Find the most likely copying path of `haplotype` over
    /// `[start_site, end_site)` through ancestors `[0, num_ancestors)`.
    ///
    /// The traceback is reset and then filled with the switches of the best
    /// path; decode it with [`AncestorMatcher::run_traceback`].
    #[allow(clippy::too_many_arguments)]
    pub fn best_path(
        &mut self,
        num_ancestors: usize,
        haplotype: &[Allele],
        start_site: usize,
        end_site: usize,
        focal_sites: &[u32],
        error_rate: f64,
        traceback: &mut Traceback,
    ) -> Result<MatchResult> {
        let params = ModelParams::new(self.recombination_rate, error_rate)?;
        self.validate(num_ancestors, haplotype, start_site, end_site, focal_sites, traceback)?;

        let store = self.store;
        let n = num_ancestors as u32;
        let ws = &mut self.workspace;
        traceback.reset();
        ws.reset_values(n);

        let mut best = 0u32;
        let mut log_likelihood = 0.0;
        let mut focal = focal_sites.iter().peekable();

        for l in start_site..end_site {
            let is_focal = focal.next_if(|&&s| s as usize == l).is_some();
            let observed = haplotype[l];
            let segments = store.segments_unchecked(l);

            let num_known = segments.num_known_below(n);
            if num_known == 0 {
                return Err(InferError::internal(format!(
                    "no ancestor below {} has a known allele at site {}",
                    n, l
                )));
            }
            let step = (l > start_site)
                .then(|| params.transition(store.position(l) - store.position(l - 1), num_known));

            // Merge-walk the probability runs against the site's segments
            let mut i = 0;
            let mut k = 0;
            while i < ws.values.len() && k < segments.len() && segments.start[k] < n {
                let v = ws.values[i];
                let seg_end = segments.end[k].min(n);
                let start = v.start.max(segments.start[k]);
                let end = v.end.min(seg_end);
                let state = segments.state[k];
                if v.end == seg_end {
                    i += 1;
                    k += 1;
                } else if seg_end < v.end {
                    k += 1;
                } else {
                    i += 1;
                }

                let e = params.emission(observed, state, is_focal);
                let z = match step {
                    None => v.value,
                    Some(Transition { switch, stay }) => {
                        let x = v.value * stay;
                        if switch > x {
                            if e > 0.0 {
                                traceback.add_recombination(l, start, end, AncestorIdx(best))?;
                            }
                            switch
                        } else {
                            x
                        }
                    }
                };
                ws.push_next(start, end, z * e);
            }

            // Rescale; the first run holding the maximum gives the oldest best
            let mut max_value = 0.0f64;
            for run in &ws.next_values {
                if run.value > max_value {
                    max_value = run.value;
                    best = run.start;
                }
            }
            if !(max_value > 0.0 && max_value.is_finite()) {
                return Err(InferError::internal(format!(
                    "all path probabilities vanished at site {}",
                    l
                )));
            }
            for run in ws.next_values.iter_mut() {
                run.value /= max_value;
            }
            log_likelihood += max_value.ln();
            ws.swap();
        }

        let result = MatchResult {
            terminal_ancestor: AncestorIdx(best),
            log_likelihood,
        };
        trace!(
            num_ancestors,
            start_site,
            end_site,
            terminal = best,
            log_likelihood,
            num_recombinations = traceback.num_recombinations(),
            "best path"
        );
        Ok(result)
    }

    /// Decode the copying path into `path[start_site..end_site]`.
    ///
    /// Walks backwards from `terminal` at `end_site - 1`: at each site the
    /// predecessor is the traceback entry covering the current ancestor, or
    /// the current ancestor itself when it did not switch.
    pub fn run_traceback(
        traceback: &Traceback,
        start_site: usize,
        end_site: usize,
        terminal: AncestorIdx,
        path: &mut [AncestorIdx],
    ) -> Result<()> {
        if start_site >= end_site || end_site > path.len() || end_site > traceback.num_sites() {
            return Err(InferError::invalid_parameter(format!(
                "cannot decode site range [{}, {}) into a path of {} sites",
                start_site,
                end_site,
                path.len()
            )));
        }
        path[end_site - 1] = terminal;
        for l in (start_site + 1..end_site).rev() {
            let current = path[l];
            path[l - 1] = traceback.lookup(l, current).unwrap_or(current);
        }
        Ok(())
    }

    /// Diagnostic dump; format is not stable
    pub fn print_state<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Ancestor matcher")?;
        writeln!(out, "recombination_rate = {}", self.recombination_rate)?;
        writeln!(out, "num_sites = {}", self.store.num_sites())?;
        writeln!(out, "num_ancestors = {}", self.store.num_ancestors())?;
        writeln!(out, "workspace_bytes = {}", self.workspace.size_bytes())?;
        write!(out, "values = ")?;
        for run in &self.workspace.values {
            write!(out, "({},{}:{:.6})", run.start, run.end, run.value)?;
        }
        writeln!(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::storage::AncestorStoreBuilder;

    fn store_from(haplotypes: &[Vec<Allele>], positions: &[f64]) -> AncestorStore {
        let mut builder = AncestorStoreBuilder::new(positions.len(), 8).unwrap();
        for h in haplotypes {
            builder.add(h).unwrap();
        }
        let ages: Vec<u32> = (1..=haplotypes.len() as u32).rev().collect();
        AncestorStore::new(positions, &ages, &[], &[], &builder.dump().unwrap()).unwrap()
    }

    fn panel() -> AncestorStore {
        store_from(
            &[
                vec![0, 0, 0, 0, 0, 0],
                vec![1, 1, 1, 0, 0, 0],
                vec![0, 0, 0, 1, 1, 1],
                vec![1, 0, 1, 0, 1, 0],
            ],
            &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0],
        )
    }

    #[test]
    fn test_exact_copy_has_no_switches() {
        let store = panel();
        let mut matcher = AncestorMatcher::new(&store, 1e-3).unwrap();
        let mut tb = Traceback::new(6, 4).unwrap();
        let h = vec![1, 0, 1, 0, 1, 0];
        let result = matcher.best_path(4, &h, 0, 6, &[], 1e-6, &mut tb).unwrap();
        assert_eq!(result.terminal_ancestor, AncestorIdx::new(3));

        let mut path = vec![AncestorIdx::default(); 6];
        AncestorMatcher::run_traceback(&tb, 0, 6, result.terminal_ancestor, &mut path).unwrap();
        assert!(path.iter().all(|&a| a == AncestorIdx::new(3)));
        // exact copy: six matching emissions and five stays
        let stay = ModelParams::new(1e-3, 1e-6).unwrap().transition(10.0, 4).stay;
        let expected = 6.0 * (1.0 - 1e-6f64).ln() + 5.0 * stay.ln();
        assert!((result.log_likelihood - expected).abs() < 1e-9);
    }

    #[test]
    fn test_recombinant_path() {
        let store = panel();
        let mut matcher = AncestorMatcher::new(&store, 1e-1).unwrap();
        let mut tb = Traceback::new(6, 4).unwrap();
        // ancestor 1 on the left half, ancestor 2 on the right half
        let h = vec![1, 1, 1, 1, 1, 1];
        let result = matcher.best_path(4, &h, 0, 6, &[], 1e-4, &mut tb).unwrap();
        assert_eq!(result.terminal_ancestor, AncestorIdx::new(2));

        let mut path = vec![AncestorIdx::default(); 6];
        AncestorMatcher::run_traceback(&tb, 0, 6, result.terminal_ancestor, &mut path).unwrap();
        let expected: Vec<AncestorIdx> = [1, 1, 1, 2, 2, 2].iter().map(|&a| AncestorIdx::new(a)).collect();
        assert_eq!(path, expected);
        assert!(tb.num_recombinations() > 0);
    }

    #[test]
    fn test_oldest_wins_ties() {
        let store = store_from(&[vec![0, 1], vec![0, 1], vec![0, 1]], &[1.0, 2.0]);
        let mut matcher = AncestorMatcher::new(&store, 1e-2).unwrap();
        let mut tb = Traceback::new(2, 4).unwrap();
        let result = matcher.best_path(3, &[0, 1], 0, 2, &[], 1e-3, &mut tb).unwrap();
        assert_eq!(result.terminal_ancestor, AncestorIdx::new(0));
    }

    #[test]
    fn test_switch_source_is_oldest_tied_ancestor() {
        // ancestors 1 and 3 are identical and tie on the first two sites;
        // ancestor 2 sits between them so their runs never merge
        let store = store_from(
            &[
                vec![0, 0, 0, 0],
                vec![1, 1, 0, 0],
                vec![0, 0, 1, 1],
                vec![1, 1, 0, 0],
            ],
            &[10.0, 20.0, 30.0, 40.0],
        );
        let mut matcher = AncestorMatcher::new(&store, 1e-1).unwrap();
        let mut tb = Traceback::new(4, 4).unwrap();
        let result = matcher
            .best_path(4, &[1, 1, 1, 1], 0, 4, &[], 1e-4, &mut tb)
            .unwrap();
        assert_eq!(result.terminal_ancestor, AncestorIdx::new(2));

        for l in 1..3 {
            let entries: Vec<_> = tb.site_entries(l).collect();
            assert!(!entries.is_empty(), "site {}", l);
            assert!(
                entries.iter().all(|&(_, _, source)| source == AncestorIdx::new(1)),
                "site {}: {:?}",
                l,
                entries
            );
        }
        assert!(tb
            .site_entries(2)
            .any(|entry| entry == (2, 3, AncestorIdx::new(1))));

        let mut path = vec![AncestorIdx::default(); 4];
        AncestorMatcher::run_traceback(&tb, 0, 4, result.terminal_ancestor, &mut path).unwrap();
        let expected: Vec<AncestorIdx> = [1, 1, 2, 2].iter().map(|&a| AncestorIdx::new(a)).collect();
        assert_eq!(path, expected);
    }

    #[test]
    fn test_restricted_to_older_ancestors() {
        let store = panel();
        let mut matcher = AncestorMatcher::new(&store, 1e-3).unwrap();
        let mut tb = Traceback::new(6, 4).unwrap();
        let h = vec![1, 0, 1, 0, 1, 0];
        let result = matcher.best_path(3, &h, 0, 6, &[], 1e-3, &mut tb).unwrap();
        assert!(result.terminal_ancestor.as_usize() < 3);
    }

    #[test]
    fn test_focal_and_unknown_sites_are_neutral() {
        let store = panel();
        let mut matcher = AncestorMatcher::new(&store, 1e-3).unwrap();
        let mut tb = Traceback::new(6, 4).unwrap();
        // matches ancestor 1 except at the focal site 4 and the unknown site 5
        let h = vec![1, 1, 1, 0, 1, -1];
        let result = matcher.best_path(4, &h, 0, 6, &[4], 1e-3, &mut tb).unwrap();
        assert_eq!(result.terminal_ancestor, AncestorIdx::new(1));
    }

    #[test]
    fn test_deterministic() {
        let store = panel();
        let h = vec![0, 1, 1, 1, 0, 1];
        let mut first = None;
        for _ in 0..3 {
            let mut matcher = AncestorMatcher::new(&store, 1e-2).unwrap();
            let mut tb = Traceback::new(6, 2).unwrap();
            let result = matcher.best_path(4, &h, 1, 6, &[], 1e-2, &mut tb).unwrap();
            let entries: Vec<Vec<_>> = (0..6).map(|l| tb.site_entries(l).collect()).collect();
            match &first {
                None => first = Some((result, entries)),
                Some((r, e)) => {
                    assert_eq!(*r, result);
                    assert_eq!(*e, entries);
                }
            }
        }
    }

    #[test]
    fn test_invalid_arguments() {
        let store = panel();
        let mut matcher = AncestorMatcher::new(&store, 1e-3).unwrap();
        let mut tb = Traceback::new(6, 4).unwrap();
        let h = vec![0; 6];
        let invalid = |r: Result<MatchResult>| matches!(r, Err(InferError::InvalidParameter { .. }));
        assert!(invalid(matcher.best_path(4, &h, 0, 6, &[], 0.0, &mut tb)));
        assert!(invalid(matcher.best_path(4, &h, 0, 6, &[], 1.0, &mut tb)));
        assert!(invalid(matcher.best_path(4, &h[..5], 0, 6, &[], 0.1, &mut tb)));
        assert!(invalid(matcher.best_path(4, &h, 3, 3, &[], 0.1, &mut tb)));
        assert!(invalid(matcher.best_path(4, &h, 0, 7, &[], 0.1, &mut tb)));
        assert!(invalid(matcher.best_path(0, &h, 0, 6, &[], 0.1, &mut tb)));
        assert!(invalid(matcher.best_path(5, &h, 0, 6, &[], 0.1, &mut tb)));
        assert!(invalid(matcher.best_path(4, &h, 0, 6, &[3, 2], 0.1, &mut tb)));
        assert!(invalid(matcher.best_path(4, &h, 1, 6, &[0], 0.1, &mut tb)));
        assert!(AncestorMatcher::new(&store, 0.0).is_err());
    }

    #[test]
    fn test_all_unknown_site_is_inconsistent() {
        let store = store_from(&[vec![0, -1, 0], vec![1, -1, 1]], &[1.0, 2.0, 3.0]);
        let mut matcher = AncestorMatcher::new(&store, 1e-2).unwrap();
        let mut tb = Traceback::new(3, 4).unwrap();
        let err = matcher.best_path(2, &[0, 0, 0], 0, 3, &[], 1e-2, &mut tb).unwrap_err();
        assert!(matches!(err, InferError::InternalConsistency { .. }));
    }
}
