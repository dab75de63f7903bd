//! # Ancestor Store Builder
//!
//! Incrementally run-length encodes ancestor haplotypes site by site.
//!
//! Each site keeps a linked chain of segments `[start, end) -> allele` over
//! ancestor ids. Adding ancestor `n` either extends the tail segment of a
//! site (when it ends at `n` with the same allele) or appends a new one, so
//! the cost of `add` is O(num_sites) and total memory is proportional to the
//! number of allele changes between consecutive ancestors.

use std::io::{self, Write};

use tracing::debug;

use crate::data::haplotype::{is_valid_allele, Allele};
use crate::data::storage::arena::{Handle, IndexList, Linked, SegmentArena};
use crate::error::{InferError, Result};

#[derive(Clone, Debug)]
struct BuildSegment {
    start: u32,
    end: u32,
    state: Allele,
    next: Option<Handle>,
}

impl Linked for BuildSegment {
    fn next(&self) -> Option<Handle> {
        self.next
    }

    fn set_next(&mut self, next: Option<Handle>) {
        self.next = next;
    }
}

/// Segments flattened into parallel arrays, ordered by site then start
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlattenedSegments {
    pub site: Vec<u32>,
    pub start: Vec<u32>,
    pub end: Vec<u32>,
    pub state: Vec<Allele>,
}

impl FlattenedSegments {
    pub fn len(&self) -> usize {
        self.site.len()
    }

    pub fn is_empty(&self) -> bool {
        self.site.is_empty()
    }
}

/// Incremental builder for the compressed ancestor archive
#[derive(Debug)]
pub struct AncestorStoreBuilder {
    num_sites: usize,
    num_ancestors: usize,
    total_segments: usize,
    sites: Vec<IndexList>,
    arena: SegmentArena<BuildSegment>,
}

impl AncestorStoreBuilder {
    /// Create an empty builder for `num_sites` sites
    pub fn new(num_sites: usize, segment_block_size: usize) -> Result<Self> {
        Ok(Self {
            num_sites,
            num_ancestors: 0,
            total_segments: 0,
            sites: vec![IndexList::new(); num_sites],
            arena: SegmentArena::new(segment_block_size)?,
        })
    }

    pub fn num_sites(&self) -> usize {
        self.num_sites
    }

    pub fn num_ancestors(&self) -> usize {
        self.num_ancestors
    }

    pub fn total_segments(&self) -> usize {
        self.total_segments
    }

    /// Append one ancestor haplotype. Its id is the previous `num_ancestors()`.
    pub fn add(&mut self, haplotype: &[Allele]) -> Result<u32> {
        if haplotype.len() != self.num_sites {
            return Err(InferError::invalid_parameter(format!(
                "ancestor has {} alleles, expected {}",
                haplotype.len(),
                self.num_sites
            )));
        }
        if let Some(j) = haplotype.iter().position(|&a| !is_valid_allele(a)) {
            return Err(InferError::invalid_parameter(format!(
                "invalid allele {} at site {}",
                haplotype[j], j
            )));
        }
        if self.num_ancestors >= u32::MAX as usize {
            return Err(InferError::allocation("ancestor id space exhausted"));
        }
        let x = self.num_ancestors as u32;

        // Count new segments first so the arena can be grown up front and
        // the loop below cannot fail half way through.
        let mut new_segments = 0;
        for (&allele, list) in haplotype.iter().zip(&self.sites) {
            if !self.extends_tail(list, x, allele)? {
                new_segments += 1;
            }
        }
        self.arena.reserve(new_segments)?;

        for (j, &allele) in haplotype.iter().enumerate() {
            let list = &mut self.sites[j];
            if let Some(tail) = list.tail() {
                let seg = self.arena.try_get_mut(tail)?;
                if seg.end == x && seg.state == allele {
                    seg.end += 1;
                    continue;
                }
            }
            list.push_back(
                &mut self.arena,
                BuildSegment {
                    start: x,
                    end: x + 1,
                    state: allele,
                    next: None,
                },
            )?;
        }
        self.total_segments += new_segments;
        self.num_ancestors += 1;
        Ok(x)
    }

    fn extends_tail(&self, list: &IndexList, x: u32, allele: Allele) -> Result<bool> {
        match list.tail() {
            Some(tail) => {
                let seg = self.arena.try_get(tail)?;
                Ok(seg.end == x && seg.state == allele)
            }
            None => Ok(false),
        }
    }

    /// Flatten the per-site chains into parallel arrays
    pub fn dump(&self) -> Result<FlattenedSegments> {
        let mut out = FlattenedSegments::default();
        out.site.try_reserve_exact(self.total_segments)?;
        out.start.try_reserve_exact(self.total_segments)?;
        out.end.try_reserve_exact(self.total_segments)?;
        out.state.try_reserve_exact(self.total_segments)?;
        for (j, list) in self.sites.iter().enumerate() {
            for (_, seg) in list.iter(&self.arena) {
                out.site.push(j as u32);
                out.start.push(seg.start);
                out.end.push(seg.end);
                out.state.push(seg.state);
            }
        }
        debug!(
            num_sites = self.num_sites,
            num_ancestors = self.num_ancestors,
            total_segments = out.len(),
            "dumped ancestor store builder"
        );
        Ok(out)
    }

    /// Verify that every site's segments tile `[0, num_ancestors)`
    pub fn check_state(&self) -> Result<()> {
        for (j, list) in self.sites.iter().enumerate() {
            let mut expected_start = 0u32;
            for (_, seg) in list.iter(&self.arena) {
                if seg.start != expected_start || seg.end <= seg.start {
                    return Err(InferError::internal(format!(
                        "site {}: segment [{}, {}) does not continue from {}",
                        j, seg.start, seg.end, expected_start
                    )));
                }
                expected_start = seg.end;
            }
            if expected_start as usize != self.num_ancestors {
                return Err(InferError::internal(format!(
                    "site {}: segments end at {}, expected {}",
                    j, expected_start, self.num_ancestors
                )));
            }
        }
        Ok(())
    }

    /// Diagnostic dump; format is not stable
    pub fn print_state<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Ancestor store builder")?;
        writeln!(out, "num_sites = {}", self.num_sites)?;
        writeln!(out, "num_ancestors = {}", self.num_ancestors)?;
        writeln!(out, "total_segments = {}", self.total_segments)?;
        writeln!(
            out,
            "arena: len = {}, capacity = {}, blocks = {}",
            self.arena.len(),
            self.arena.capacity(),
            self.arena.num_blocks()
        )?;
        for (j, list) in self.sites.iter().enumerate() {
            write!(out, "{}\t:", j)?;
            for (_, seg) in list.iter(&self.arena) {
                write!(out, "({}-{}:{})", seg.start, seg.end, seg.state)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
