//! # Frozen Ancestor Store
//!
//! Read-only, binary-searchable archive of ancestor haplotypes.
//!
//! Segments are held site-major in one set of parallel arrays (CSR layout):
//! the segments of site `j` occupy `offsets[j]..offsets[j + 1]`, sorted by
//! start and tiling `[0, num_ancestors)`. Ancestor metadata (age, number of
//! strictly older ancestors, focal sites) and epoch boundaries sit alongside.
//!
//! Ancestors are ordered oldest first: ages never increase with id. An epoch
//! is a maximal run of ids sharing one age, so every epoch is a contiguous
//! id range and `num_older_ancestors(a)` is the first id of `a`'s epoch.

use std::io::{self, Write};
use std::ops::Range;

use tracing::debug;

use crate::data::haplotype::{is_valid_allele, Allele, AncestorIdx, UNKNOWN_ALLELE};
use crate::data::site::{validate_positions, SiteIdx};
use crate::data::storage::builder::FlattenedSegments;
use crate::error::{InferError, Result};

/// Segments of one site, as parallel slices
#[derive(Clone, Copy, Debug)]
pub struct SegmentView<'a> {
    pub start: &'a [u32],
    pub end: &'a [u32],
    pub state: &'a [Allele],
}

impl<'a> SegmentView<'a> {
    pub fn len(&self) -> usize {
        self.start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    /// Allele of `ancestor` (binary search over segment starts)
    #[inline]
    pub fn state_of(&self, ancestor: u32) -> Allele {
        let k = self.start.partition_point(|&s| s <= ancestor);
        self.state[k.saturating_sub(1)]
    }

    /// Iterate `(start, end, state)` clipped to ancestors `< limit`
    pub fn iter_below(&self, limit: u32) -> impl Iterator<Item = (u32, u32, Allele)> + 'a {
        let view = *self;
        (0..view.len())
            .take_while(move |&k| view.start[k] < limit)
            .map(move |k| (view.start[k], view.end[k].min(limit), view.state[k]))
    }

    /// Number of ancestors `< limit` holding a known allele
    pub fn num_known_below(&self, limit: u32) -> usize {
        self.iter_below(limit)
            .filter(|&(_, _, state)| state != UNKNOWN_ALLELE)
            .map(|(start, end, _)| (end - start) as usize)
            .sum()
    }
}

/// Metadata returned with a decoded ancestor haplotype
#[derive(Clone, Debug, PartialEq)]
pub struct AncestorSummary<'a> {
    pub start_site: usize,
    pub end_site: usize,
    pub age: u32,
    pub num_older_ancestors: usize,
    pub focal_sites: &'a [u32],
}

/// Frozen ancestor store
#[derive(Clone, Debug)]
pub struct AncestorStore {
    positions: Vec<f64>,

    // --- Segment tables (CSR over sites) ---
    segment_offsets: Vec<usize>,
    segment_start: Vec<u32>,
    segment_end: Vec<u32>,
    segment_state: Vec<Allele>,
    max_num_site_segments: usize,

    // --- Ancestor metadata ---
    age: Vec<u32>,
    num_older_ancestors: Vec<u32>,
    ancestor_epoch: Vec<u32>,
    focal_offsets: Vec<usize>,
    focal_sites: Vec<u32>,

    // --- Epochs: epoch e covers ids epoch_bounds[e]..epoch_bounds[e + 1] ---
    epoch_bounds: Vec<u32>,
}

impl AncestorStore {
    /// Build a store from site positions, ancestor ages, focal-site pairs and
    /// flattened segments (as produced by `AncestorStoreBuilder::dump`).
    ///
    /// Focal sites are given as parallel `(focal_ancestor[i], focal_site[i])`
    /// pairs in any order.
    pub fn new(
        positions: &[f64],
        ages: &[u32],
        focal_ancestor: &[u32],
        focal_site: &[u32],
        segments: &FlattenedSegments,
    ) -> Result<Self> {
        let num_sites = positions.len();
        let num_ancestors = ages.len();
        if num_sites == 0 {
            return Err(InferError::invalid_parameter("store needs at least one site"));
        }
        if num_ancestors == 0 {
            return Err(InferError::invalid_parameter(
                "store needs at least one ancestor",
            ));
        }
        if num_ancestors > u32::MAX as usize {
            return Err(InferError::invalid_parameter("too many ancestors"));
        }
        validate_positions(positions)?;
        if let Some(a) = ages.windows(2).position(|w| w[1] > w[0]) {
            return Err(InferError::invalid_parameter(format!(
                "ancestor ages must not increase with id (ancestor {} has age {} > {})",
                a + 1,
                ages[a + 1],
                ages[a]
            )));
        }

        let (segment_offsets, max_num_site_segments) =
            Self::validate_segments(num_sites, num_ancestors, segments)?;
        let (focal_offsets, focal_sites) =
            Self::group_focal_sites(num_sites, num_ancestors, focal_ancestor, focal_site)?;

        let mut epoch_bounds = vec![0u32];
        let mut ancestor_epoch = Vec::with_capacity(num_ancestors);
        let mut num_older_ancestors = Vec::with_capacity(num_ancestors);
        for a in 0..num_ancestors {
            if a > 0 && ages[a] != ages[a - 1] {
                epoch_bounds.push(a as u32);
            }
            ancestor_epoch.push((epoch_bounds.len() - 1) as u32);
            num_older_ancestors.push(*epoch_bounds.last().unwrap_or(&0));
        }
        epoch_bounds.push(num_ancestors as u32);

        let store = Self {
            positions: positions.to_vec(),
            segment_offsets,
            segment_start: segments.start.clone(),
            segment_end: segments.end.clone(),
            segment_state: segments.state.clone(),
            max_num_site_segments,
            age: ages.to_vec(),
            num_older_ancestors,
            ancestor_epoch,
            focal_offsets,
            focal_sites,
            epoch_bounds,
        };
        debug!(
            num_sites,
            num_ancestors,
            num_epochs = store.num_epochs(),
            total_segments = store.total_segments(),
            total_memory = store.total_memory(),
            "allocated ancestor store"
        );
        Ok(store)
    }

    fn validate_segments(
        num_sites: usize,
        num_ancestors: usize,
        segments: &FlattenedSegments,
    ) -> Result<(Vec<usize>, usize)> {
        let n = segments.site.len();
        if segments.start.len() != n || segments.end.len() != n || segments.state.len() != n {
            return Err(InferError::invalid_parameter(
                "segment arrays must have equal lengths",
            ));
        }

        let mut offsets = Vec::with_capacity(num_sites + 1);
        offsets.push(0);
        let mut k = 0;
        let mut max_per_site = 0;
        for j in 0..num_sites {
            let mut expected = 0u32;
            while k < n && segments.site[k] as usize == j {
                let (start, end, state) = (segments.start[k], segments.end[k], segments.state[k]);
                if start != expected || end <= start || end as usize > num_ancestors {
                    return Err(InferError::invalid_parameter(format!(
                        "site {}: segment [{}, {}) breaks the tiling at {}",
                        j, start, end, expected
                    )));
                }
                if !is_valid_allele(state) {
                    return Err(InferError::invalid_parameter(format!(
                        "site {}: invalid allele {}",
                        j, state
                    )));
                }
                expected = end;
                k += 1;
            }
            if expected as usize != num_ancestors {
                return Err(InferError::invalid_parameter(format!(
                    "site {}: segments cover [0, {}), expected [0, {})",
                    j, expected, num_ancestors
                )));
            }
            max_per_site = max_per_site.max(k - offsets[j]);
            offsets.push(k);
        }
        if k != n {
            return Err(InferError::invalid_parameter(format!(
                "segment {} has site {} out of order or out of range",
                k, segments.site[k]
            )));
        }
        Ok((offsets, max_per_site))
    }

    fn group_focal_sites(
        num_sites: usize,
        num_ancestors: usize,
        focal_ancestor: &[u32],
        focal_site: &[u32],
    ) -> Result<(Vec<usize>, Vec<u32>)> {
        if focal_ancestor.len() != focal_site.len() {
            return Err(InferError::invalid_parameter(
                "focal ancestor and focal site arrays must have equal lengths",
            ));
        }
        let mut counts = vec![0usize; num_ancestors];
        for (&a, &s) in focal_ancestor.iter().zip(focal_site) {
            if a as usize >= num_ancestors {
                return Err(InferError::out_of_range("ancestor", a as usize, num_ancestors));
            }
            if s as usize >= num_sites {
                return Err(InferError::out_of_range("site", s as usize, num_sites));
            }
            counts[a as usize] += 1;
        }
        let mut offsets = Vec::with_capacity(num_ancestors + 1);
        offsets.push(0);
        for c in &counts {
            offsets.push(offsets[offsets.len() - 1] + c);
        }
        let mut cursor = offsets.clone();
        let mut sites = vec![0u32; focal_site.len()];
        for (&a, &s) in focal_ancestor.iter().zip(focal_site) {
            sites[cursor[a as usize]] = s;
            cursor[a as usize] += 1;
        }
        for a in 0..num_ancestors {
            let group = &mut sites[offsets[a]..offsets[a + 1]];
            group.sort_unstable();
            if group.windows(2).any(|w| w[0] == w[1]) {
                return Err(InferError::invalid_parameter(format!(
                    "ancestor {} lists a focal site twice",
                    a
                )));
            }
        }
        Ok((offsets, sites))
    }

    pub fn num_sites(&self) -> usize {
        self.positions.len()
    }

    pub fn num_ancestors(&self) -> usize {
        self.age.len()
    }

    pub fn num_epochs(&self) -> usize {
        self.epoch_bounds.len() - 1
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// Position of a site (caller guarantees `site < num_sites`)
    #[inline]
    pub fn position(&self, site: usize) -> f64 {
        self.positions[site]
    }

    pub fn total_segments(&self) -> usize {
        self.segment_start.len()
    }

    pub fn max_num_site_segments(&self) -> usize {
        self.max_num_site_segments
    }

    /// Approximate heap memory held by the store in bytes
    pub fn total_memory(&self) -> usize {
        use std::mem::size_of;
        self.positions.capacity() * size_of::<f64>()
            + self.segment_offsets.capacity() * size_of::<usize>()
            + self.segment_start.capacity() * size_of::<u32>()
            + self.segment_end.capacity() * size_of::<u32>()
            + self.segment_state.capacity() * size_of::<Allele>()
            + self.age.capacity() * size_of::<u32>()
            + self.num_older_ancestors.capacity() * size_of::<u32>()
            + self.ancestor_epoch.capacity() * size_of::<u32>()
            + self.focal_offsets.capacity() * size_of::<usize>()
            + self.focal_sites.capacity() * size_of::<u32>()
            + self.epoch_bounds.capacity() * size_of::<u32>()
    }

    fn check_site(&self, site: SiteIdx) -> Result<usize> {
        let j = site.as_usize();
        if j >= self.num_sites() {
            return Err(InferError::out_of_range("site", j, self.num_sites()));
        }
        Ok(j)
    }

    fn check_ancestor(&self, ancestor: AncestorIdx) -> Result<usize> {
        let a = ancestor.as_usize();
        if a >= self.num_ancestors() {
            return Err(InferError::out_of_range("ancestor", a, self.num_ancestors()));
        }
        Ok(a)
    }

    /// Segment table of one site
    pub fn site_segments(&self, site: SiteIdx) -> Result<SegmentView<'_>> {
        let j = self.check_site(site)?;
        Ok(self.segments_unchecked(j))
    }

    #[inline]
    pub(crate) fn segments_unchecked(&self, site: usize) -> SegmentView<'_> {
        let range = self.segment_offsets[site]..self.segment_offsets[site + 1];
        SegmentView {
            start: &self.segment_start[range.clone()],
            end: &self.segment_end[range.clone()],
            state: &self.segment_state[range],
        }
    }

    /// Allele carried by `ancestor` at `site`
    pub fn get_state(&self, site: SiteIdx, ancestor: AncestorIdx) -> Result<Allele> {
        let j = self.check_site(site)?;
        let a = self.check_ancestor(ancestor)?;
        Ok(self.segments_unchecked(j).state_of(a as u32))
    }

    /// Decode the full haplotype of `ancestor` into `haplotype`.
    ///
    /// Probes every site, so this is O(num_sites · log segments); it runs once
    /// per match, never inside the matcher's inner loop.
    pub fn get_ancestor(
        &self,
        ancestor: AncestorIdx,
        haplotype: &mut [Allele],
    ) -> Result<AncestorSummary<'_>> {
        let a = self.check_ancestor(ancestor)?;
        if haplotype.len() != self.num_sites() {
            return Err(InferError::invalid_parameter(format!(
                "haplotype buffer has {} sites, expected {}",
                haplotype.len(),
                self.num_sites()
            )));
        }
        let mut start_site = None;
        let mut end_site = 0;
        for (j, slot) in haplotype.iter_mut().enumerate() {
            let state = self.segments_unchecked(j).state_of(a as u32);
            *slot = state;
            if state != UNKNOWN_ALLELE {
                start_site.get_or_insert(j);
                end_site = j + 1;
            }
        }
        let start_site = start_site.ok_or_else(|| {
            InferError::internal(format!("ancestor {} has no known alleles", a))
        })?;
        Ok(AncestorSummary {
            start_site,
            end_site,
            age: self.age[a],
            num_older_ancestors: self.num_older_ancestors[a] as usize,
            focal_sites: self.focal_sites(ancestor)?,
        })
    }

    /// Sorted focal sites of an ancestor
    pub fn focal_sites(&self, ancestor: AncestorIdx) -> Result<&[u32]> {
        let a = self.check_ancestor(ancestor)?;
        Ok(&self.focal_sites[self.focal_offsets[a]..self.focal_offsets[a + 1]])
    }

    pub fn age(&self, ancestor: AncestorIdx) -> Result<u32> {
        let a = self.check_ancestor(ancestor)?;
        Ok(self.age[a])
    }

    /// Number of ancestors strictly older than `ancestor`
    pub fn num_older_ancestors(&self, ancestor: AncestorIdx) -> Result<usize> {
        let a = self.check_ancestor(ancestor)?;
        Ok(self.num_older_ancestors[a] as usize)
    }

    /// Epoch that `ancestor` was inserted in
    pub fn epoch_of(&self, ancestor: AncestorIdx) -> Result<usize> {
        let a = self.check_ancestor(ancestor)?;
        Ok(self.ancestor_epoch[a] as usize)
    }

    /// Contiguous id range of the ancestors created in `epoch`. O(1).
    pub fn get_epoch_ancestors(&self, epoch: usize) -> Result<Range<u32>> {
        if epoch >= self.num_epochs() {
            return Err(InferError::out_of_range("epoch", epoch, self.num_epochs()));
        }
        Ok(self.epoch_bounds[epoch]..self.epoch_bounds[epoch + 1])
    }

    /// Diagnostic dump; format is not stable
    pub fn print_state<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Ancestor store")?;
        writeln!(out, "num_sites = {}", self.num_sites())?;
        writeln!(out, "num_ancestors = {}", self.num_ancestors())?;
        writeln!(out, "num_epochs = {}", self.num_epochs())?;
        writeln!(out, "total_segments = {}", self.total_segments())?;
        writeln!(out, "max_num_site_segments = {}", self.max_num_site_segments)?;
        writeln!(out, "total_memory = {}", self.total_memory())?;
        writeln!(out, "sites = ")?;
        for j in 0..self.num_sites() {
            let view = self.segments_unchecked(j);
            write!(out, "{}\t[{}]\t{}\t:", j, view.len(), self.positions[j])?;
            for k in 0..view.len() {
                write!(out, "({},{}:{})", view.start[k], view.end[k], view.state[k])?;
            }
            writeln!(out)?;
        }
        writeln!(out, "ancestors = ")?;
        for a in 0..self.num_ancestors() {
            let focal = &self.focal_sites[self.focal_offsets[a]..self.focal_offsets[a + 1]];
            writeln!(
                out,
                "{}\tage = {}\tolder = {}\tfocal = {:?}",
                a, self.age[a], self.num_older_ancestors[a], focal
            )?;
        }
        writeln!(out, "epochs = ")?;
        for e in 0..self.num_epochs() {
            writeln!(
                out,
                "{}\tfirst = {}\tnum = {}",
                e,
                self.epoch_bounds[e],
                self.epoch_bounds[e + 1] - self.epoch_bounds[e]
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::storage::builder::AncestorStoreBuilder;

    fn build(haplotypes: &[Vec<Allele>], ages: &[u32]) -> AncestorStore {
        let num_sites = haplotypes[0].len();
        let mut builder = AncestorStoreBuilder::new(num_sites, 4).unwrap();
        for h in haplotypes {
            builder.add(h).unwrap();
        }
        let positions: Vec<f64> = (0..num_sites).map(|j| j as f64 + 1.0).collect();
        // ancestor a (a >= 1) is focal at site a
        let focal: Vec<u32> = (1..haplotypes.len().min(num_sites) as u32).collect();
        AncestorStore::new(&positions, ages, &focal, &focal, &builder.dump().unwrap()).unwrap()
    }

    #[test]
    fn test_get_state_round_trip() {
        let haplotypes = vec![
            vec![0, 0, 0, 0],
            vec![-1, 1, 0, -1],
            vec![0, 1, 1, 0],
            vec![1, 1, 0, 0],
        ];
        let store = build(&haplotypes, &[4, 3, 2, 2]);
        for (a, h) in haplotypes.iter().enumerate() {
            for (j, &allele) in h.iter().enumerate() {
                let got = store.get_state(SiteIdx::from(j), AncestorIdx::from(a)).unwrap();
                assert_eq!(got, allele, "ancestor {} site {}", a, j);
            }
        }
    }

    #[test]
    fn test_out_of_range() {
        let store = build(&[vec![0, 0], vec![1, 0]], &[2, 1]);
        assert!(matches!(
            store.get_state(SiteIdx::new(2), AncestorIdx::new(0)),
            Err(InferError::OutOfRange { .. })
        ));
        assert!(matches!(
            store.get_state(SiteIdx::new(0), AncestorIdx::new(2)),
            Err(InferError::OutOfRange { .. })
        ));
        assert!(store.get_epoch_ancestors(2).is_err());
    }

    #[test]
    fn test_epochs_and_older_counts() {
        let haplotypes = vec![
            vec![0, 0, 0],
            vec![0, 1, 0],
            vec![0, 0, 1],
            vec![1, 1, 0],
            vec![0, 1, 1],
        ];
        let store = build(&haplotypes, &[9, 5, 5, 2, 1]);
        assert_eq!(store.num_epochs(), 4);
        assert_eq!(store.get_epoch_ancestors(0).unwrap(), 0..1);
        assert_eq!(store.get_epoch_ancestors(1).unwrap(), 1..3);
        assert_eq!(store.get_epoch_ancestors(2).unwrap(), 3..4);
        assert_eq!(store.get_epoch_ancestors(3).unwrap(), 4..5);
        assert_eq!(store.num_older_ancestors(AncestorIdx::new(2)).unwrap(), 1);
        assert_eq!(store.num_older_ancestors(AncestorIdx::new(3)).unwrap(), 3);
        assert_eq!(store.epoch_of(AncestorIdx::new(2)).unwrap(), 1);
    }

    #[test]
    fn test_get_ancestor_range_and_focal() {
        let haplotypes = vec![vec![0, 0, 0, 0, 0], vec![-1, 0, 1, 1, -1], vec![0, 0, 1, 0, 0]];
        let store = build(&haplotypes, &[3, 2, 1]);
        let mut buf = vec![0; 5];
        let summary = store.get_ancestor(AncestorIdx::new(1), &mut buf).unwrap();
        assert_eq!(buf, haplotypes[1]);
        assert_eq!(summary.start_site, 1);
        assert_eq!(summary.end_site, 4);
        assert_eq!(summary.num_older_ancestors, 1);
        assert_eq!(summary.focal_sites, &[1]);
        assert_eq!(summary.age, 2);
    }

    #[test]
    fn test_rejects_increasing_age() {
        let mut builder = AncestorStoreBuilder::new(1, 4).unwrap();
        builder.add(&[0]).unwrap();
        builder.add(&[1]).unwrap();
        let flat = builder.dump().unwrap();
        let err = AncestorStore::new(&[1.0], &[1, 2], &[], &[], &flat).unwrap_err();
        assert!(matches!(err, InferError::InvalidParameter { .. }));
    }

    #[test]
    fn test_rejects_gapped_segments() {
        let flat = FlattenedSegments {
            site: vec![0, 0],
            start: vec![0, 2],
            end: vec![1, 3],
            state: vec![0, 1],
        };
        let err = AncestorStore::new(&[1.0], &[3, 2, 1], &[], &[], &flat).unwrap_err();
        assert!(matches!(err, InferError::InvalidParameter { .. }));
    }

    #[test]
    fn test_rejects_non_monotonic_positions() {
        let mut builder = AncestorStoreBuilder::new(2, 4).unwrap();
        builder.add(&[0, 0]).unwrap();
        let flat = builder.dump().unwrap();
        assert!(AncestorStore::new(&[5.0, 1.0], &[1], &[], &[], &flat).is_err());
    }

    #[test]
    fn test_segment_view_below() {
        let haplotypes = vec![vec![0], vec![1], vec![1], vec![-1], vec![0]];
        let store = build_single_site(&haplotypes);
        let view = store.site_segments(SiteIdx::new(0)).unwrap();
        let clipped: Vec<_> = view.iter_below(3).collect();
        assert_eq!(clipped, vec![(0, 1, 0), (1, 3, 1)]);
        assert_eq!(view.num_known_below(5), 4);
        assert_eq!(view.num_known_below(2), 2);
    }

    fn build_single_site(haplotypes: &[Vec<Allele>]) -> AncestorStore {
        let mut builder = AncestorStoreBuilder::new(1, 4).unwrap();
        for h in haplotypes {
            builder.add(h).unwrap();
        }
        let ages: Vec<u32> = (0..haplotypes.len() as u32).rev().map(|a| a + 1).collect();
        AncestorStore::new(&[0.0], &ages, &[], &[], &builder.dump().unwrap()).unwrap()
    }
}
