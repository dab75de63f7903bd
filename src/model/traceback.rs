//! # Traceback
//!
//! Per-site record of the switches taken while matching one haplotype.
//!
//! An entry `[start, end) -> best` at site `l` means: an ancestor in
//! `[start, end)` reached site `l` by recombining away from `best` at `l - 1`.
//! Entries at a site are kept sorted by `start` and never overlap, so a
//! lookup can stop at the first entry starting past the queried ancestor.
//!
//! All entries live in one `SegmentArena` that is cleared wholesale by
//! `reset`, so a traceback can be reused across matches without reallocating.

use std::io::{self, Write};

use crate::data::haplotype::AncestorIdx;
use crate::data::storage::{Handle, IndexList, Linked, SegmentArena};
use crate::error::{InferError, Result};

#[derive(Clone, Debug)]
struct Recombination {
    start: u32,
    end: u32,
    ancestor: u32,
    next: Option<Handle>,
}

impl Linked for Recombination {
    fn next(&self) -> Option<Handle> {
        self.next
    }

    fn set_next(&mut self, next: Option<Handle>) {
        self.next = next;
    }
}

/// Sparse per-site switch record
#[derive(Debug)]
pub struct Traceback {
    sites: Vec<IndexList>,
    touched: Vec<u32>,
    arena: SegmentArena<Recombination>,
}

impl Traceback {
    pub fn new(num_sites: usize, segment_block_size: usize) -> Result<Self> {
        Ok(Self {
            sites: vec![IndexList::new(); num_sites],
            touched: Vec::new(),
            arena: SegmentArena::new(segment_block_size)?,
        })
    }

    pub fn num_sites(&self) -> usize {
        self.sites.len()
    }

    /// Total entries across all sites
    pub fn num_recombinations(&self) -> usize {
        self.arena.len()
    }

    /// Drop every entry, keeping allocated capacity
    pub fn reset(&mut self) {
        for &site in &self.touched {
            self.sites[site as usize].forget();
        }
        self.touched.clear();
        self.arena.clear();
    }

    /// Record `[start, end) -> ancestor` at `site`.
    ///
    /// Entries must arrive in increasing `start` order per site. An entry
    /// adjacent to the tail with the same ancestor extends the tail.
    pub fn add_recombination(
        &mut self,
        site: usize,
        start: u32,
        end: u32,
        ancestor: AncestorIdx,
    ) -> Result<()> {
        if site >= self.sites.len() {
            return Err(InferError::out_of_range("site", site, self.sites.len()));
        }
        if start >= end {
            return Err(InferError::invalid_parameter(format!(
                "empty recombination interval [{}, {}) at site {}",
                start, end, site
            )));
        }
        let list = &mut self.sites[site];
        if let Some(tail) = list.tail() {
            let last = self.arena.try_get_mut(tail)?;
            if start < last.end {
                return Err(InferError::invalid_parameter(format!(
                    "recombination [{}, {}) at site {} overlaps or precedes [{}, {})",
                    start, end, site, last.start, last.end
                )));
            }
            if last.end == start && last.ancestor == ancestor.0 {
                last.end = end;
                return Ok(());
            }
        } else {
            self.touched.push(site as u32);
        }
        list.push_back(
            &mut self.arena,
            Recombination {
                start,
                end,
                ancestor: ancestor.0,
                next: None,
            },
        )?;
        Ok(())
    }

    /// Ancestor that `ancestor` switched away from to reach `site`, if any
    #[inline]
    pub fn lookup(&self, site: usize, ancestor: AncestorIdx) -> Option<AncestorIdx> {
        let list = self.sites.get(site)?;
        for (_, rec) in list.iter(&self.arena) {
            if rec.start > ancestor.0 {
                break;
            }
            if ancestor.0 < rec.end {
                return Some(AncestorIdx(rec.ancestor));
            }
        }
        None
    }

    /// Entries at `site` as `(start, end, ancestor)`
    pub fn site_entries(&self, site: usize) -> impl Iterator<Item = (u32, u32, AncestorIdx)> + '_ {
        self.sites
            .get(site)
            .into_iter()
            .flat_map(move |list| list.iter(&self.arena))
            .map(|(_, rec)| (rec.start, rec.end, AncestorIdx(rec.ancestor)))
    }

    /// Diagnostic dump; format is not stable
    pub fn print_state<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Traceback")?;
        writeln!(out, "num_recombinations = {}", self.num_recombinations())?;
        writeln!(
            out,
            "arena: capacity = {}, blocks = {}",
            self.arena.capacity(),
            self.arena.num_blocks()
        )?;
        for (site, list) in self.sites.iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            write!(out, "{}\t:", site)?;
            for (_, rec) in list.iter(&self.arena) {
                write!(out, "({},{}->{})", rec.start, rec.end, rec.ancestor)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
