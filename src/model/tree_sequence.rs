//! # Tree Sequence Builder
//!
//! Grafts matched copying paths into a genealogy of nodes, edgesets and
//! mutations.
//!
//! ## Node ids
//! Internally ancestor `a` is node `a` and sample `s` is node
//! `num_ancestors + s`. Nodes must be added in id order. The output tables
//! renumber nodes so that samples come first and times ascend.
//!
//! ## Live segments
//! `update` turns a child's path into `(left, right, parent)` runs and parks
//! each run on the parent's live list as `(left, right, child)`. `resolve`
//! later drains the runs of a set of children, sweeps each parent's runs
//! into elementary intervals and emits one edgeset per interval and distinct
//! child set, merging neighbours whose child sets are identical.
//!
//! Coordinates are site indices until output, where `left_site == 0` maps
//! to 0, `right_site == num_sites` to the sequence length and any other site
//! to its position.

use std::io::{self, Write};

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::haplotype::{is_valid_allele, Allele, AncestorIdx, NodeIdx, DERIVED_ALLELE, UNKNOWN_ALLELE};
use crate::data::storage::{AncestorStore, Handle, IndexList, Linked, SegmentArena};
use crate::error::{InferError, Result};
use crate::model::matcher::AncestorMatcher;
use crate::model::traceback::Traceback;

/// Node flag marking a sample
pub const NODE_IS_SAMPLE: u32 = 1;

/// Output node table
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTable {
    pub flags: Vec<u32>,
    pub time: Vec<f64>,
}

impl NodeTable {
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Output edgeset table; `children` is flattened, `children_length[i]`
/// entries per edgeset
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgesetTable {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    pub parent: Vec<u32>,
    pub children: Vec<u32>,
    pub children_length: Vec<u32>,
}

impl EdgesetTable {
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Iterate `(left, right, parent, children)`
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64, u32, &[u32])> + '_ {
        let mut offset = 0usize;
        (0..self.len()).map(move |i| {
            let n = self.children_length[i] as usize;
            let children = &self.children[offset..offset + n];
            offset += n;
            (self.left[i], self.right[i], self.parent[i], children)
        })
    }
}

/// Output mutation table
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationTable {
    pub site: Vec<u32>,
    pub node: Vec<u32>,
    pub derived_state: Vec<Allele>,
}

impl MutationTable {
    pub fn len(&self) -> usize {
        self.site.len()
    }

    pub fn is_empty(&self) -> bool {
        self.site.is_empty()
    }
}

/// Output site table
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteTable {
    pub position: Vec<f64>,
}

/// Complete set of output tables
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSequence {
    pub sequence_length: f64,
    pub nodes: NodeTable,
    pub edgesets: EdgesetTable,
    pub mutations: MutationTable,
    pub sites: SiteTable,
}

#[derive(Clone, Debug)]
struct LiveSegment {
    left: u32,
    right: u32,
    child: u32,
    next: Option<Handle>,
}

impl Linked for LiveSegment {
    fn next(&self) -> Option<Handle> {
        self.next
    }

    fn set_next(&mut self, next: Option<Handle>) {
        self.next = next;
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Edgeset {
    left: u32,
    right: u32,
    parent: u32,
    children: Vec<u32>,
}

#[derive(Clone, Copy, Debug)]
struct Mutation {
    site: u32,
    node: u32,
    derived_state: Allele,
}

/// Block sizes for the builder's growable tables
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSizes {
    pub segment: usize,
    pub node: usize,
    pub mutation: usize,
}

impl Default for BlockSizes {
    fn default() -> Self {
        Self {
            segment: 1024,
            node: 1024,
            mutation: 1024,
        }
    }
}

/// Grow `v` in whole blocks so at least `additional` more items fit
fn reserve_blocks<T>(v: &mut Vec<T>, additional: usize, block_size: usize) -> Result<()> {
    if v.capacity() - v.len() < additional {
        let blocks = additional.div_ceil(block_size);
        v.try_reserve_exact(blocks * block_size)?;
    }
    Ok(())
}

/// Incremental genealogy builder
#[derive(Debug)]
pub struct TreeSequenceBuilder<'a> {
    store: &'a AncestorStore,
    num_samples: usize,
    sequence_length: f64,
    blocks: BlockSizes,

    node_flags: Vec<u32>,
    node_time: Vec<f64>,

    live: Vec<IndexList>,
    /// Parents whose live list may be non-empty
    touched: Vec<u32>,
    live_arena: SegmentArena<LiveSegment>,

    edgesets: Vec<Edgeset>,
    mutations: Vec<Mutation>,
    /// One bit per epoch, plus the sample epoch
    resolved: BitVec<u8, Lsb0>,

    path: Vec<AncestorIdx>,
    haplotype: Vec<Allele>,
}

impl<'a> TreeSequenceBuilder<'a> {
    /// Create a builder and the root nodes (the oldest epoch) with their
    /// derived-allele mutations.
    pub fn new(
        store: &'a AncestorStore,
        num_samples: usize,
        sequence_length: f64,
        blocks: BlockSizes,
    ) -> Result<Self> {
        let num_sites = store.num_sites();
        let last_position = store.position(num_sites - 1);
        if !sequence_length.is_finite() || sequence_length <= last_position {
            return Err(InferError::invalid_parameter(format!(
                "sequence length {} must exceed the last site position {}",
                sequence_length, last_position
            )));
        }
        if blocks.node == 0 || blocks.mutation == 0 {
            return Err(InferError::invalid_parameter("block sizes must be positive"));
        }
        let num_ancestors = store.num_ancestors();
        for a in 0..num_ancestors {
            if store.age(AncestorIdx::from(a))? == 0 {
                return Err(InferError::invalid_parameter(format!(
                    "ancestor {} has age 0; ancestors must be older than samples",
                    a
                )));
            }
        }

        let mut builder = Self {
            store,
            num_samples,
            sequence_length,
            blocks,
            node_flags: Vec::new(),
            node_time: Vec::new(),
            live: vec![IndexList::new(); num_ancestors],
            touched: Vec::new(),
            live_arena: SegmentArena::new(blocks.segment)?,
            edgesets: Vec::new(),
            mutations: Vec::new(),
            resolved: bitvec![u8, Lsb0; 0; store.num_epochs() + 1],
            path: vec![AncestorIdx::default(); num_sites],
            haplotype: vec![UNKNOWN_ALLELE; num_sites],
        };

        let roots = store.get_epoch_ancestors(0)?;
        for a in roots.clone() {
            let age = store.age(AncestorIdx(a))?;
            store.get_ancestor(AncestorIdx(a), &mut builder.haplotype)?;
            builder.push_node(0, age as f64)?;
            let derived = builder
                .haplotype
                .iter()
                .filter(|&&x| x == DERIVED_ALLELE)
                .count();
            reserve_blocks(&mut builder.mutations, derived, blocks.mutation)?;
            for (j, &x) in builder.haplotype.iter().enumerate() {
                if x == DERIVED_ALLELE {
                    builder.mutations.push(Mutation {
                        site: j as u32,
                        node: a,
                        derived_state: x,
                    });
                }
            }
        }
        debug!(
            num_roots = roots.len(),
            num_samples,
            sequence_length,
            "created tree sequence builder"
        );
        Ok(builder)
    }

    fn push_node(&mut self, flags: u32, time: f64) -> Result<()> {
        reserve_blocks(&mut self.node_flags, 1, self.blocks.node)?;
        reserve_blocks(&mut self.node_time, 1, self.blocks.node)?;
        self.node_flags.push(flags);
        self.node_time.push(time);
        Ok(())
    }

    pub fn num_nodes(&self) -> usize {
        self.node_flags.len()
    }

    pub fn num_edgesets(&self) -> usize {
        self.edgesets.len()
    }

    pub fn num_mutations(&self) -> usize {
        self.mutations.len()
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Node id of sample `s`
    pub fn sample_node(&self, sample: usize) -> NodeIdx {
        NodeIdx::from(self.store.num_ancestors() + sample)
    }

    /// Whether `epoch` has been resolved
    pub fn is_resolved(&self, epoch: usize) -> bool {
        self.resolved.get(epoch).map(|b| *b).unwrap_or(false)
    }

    /// Graft `child` onto the path decoded from `traceback`, ending at
    /// `terminal_parent` on site `end_site - 1`.
    pub fn update(
        &mut self,
        child: NodeIdx,
        haplotype: &[Allele],
        start_site: usize,
        end_site: usize,
        terminal_parent: AncestorIdx,
        traceback: &Traceback,
    ) -> Result<()> {
        let store = self.store;
        let num_sites = store.num_sites();
        let num_ancestors = store.num_ancestors();
        let total_nodes = num_ancestors + self.num_samples;
        let c = child.as_usize();
        if c >= total_nodes {
            return Err(InferError::out_of_range("node", c, total_nodes));
        }
        if c != self.num_nodes() {
            return Err(InferError::invalid_parameter(format!(
                "nodes must be added in order: got {}, expected {}",
                c,
                self.num_nodes()
            )));
        }
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
        let is_sample = c >= num_ancestors;
        let (parent_limit, time) = if is_sample {
            (num_ancestors, 0.0)
        } else {
            let a = AncestorIdx::from(c);
            (store.num_older_ancestors(a)?, store.age(a)? as f64)
        };

        AncestorMatcher::run_traceback(traceback, start_site, end_site, terminal_parent, &mut self.path)?;
        if let Some(&bad) = self.path[start_site..end_site]
            .iter()
            .find(|p| p.as_usize() >= parent_limit)
        {
            return Err(InferError::invalid_parameter(format!(
                "node {} cannot copy from ancestor {} (only the {} older ancestors are eligible)",
                c, bad.0, parent_limit
            )));
        }

        // Parent runs become live segments on each parent
        let mut left = start_site;
        for l in start_site + 1..=end_site {
            if l == end_site || self.path[l] != self.path[left] {
                let parent = self.path[left].as_usize();
                if self.live[parent].is_empty() {
                    self.touched.push(parent as u32);
                }
                self.live[parent].push_back(
                    &mut self.live_arena,
                    LiveSegment {
                        left: left as u32,
                        right: l as u32,
                        child: c as u32,
                        next: None,
                    },
                )?;
                left = l;
            }
        }

        let flags = if is_sample { NODE_IS_SAMPLE } else { 0 };
        self.push_node(flags, time)?;

        // A mutation marks the first appearance of an allele on the lineage,
        // so focal sites whose allele is inherited get none.
        for l in start_site..end_site {
            let allele = haplotype[l];
            if allele == UNKNOWN_ALLELE {
                continue;
            }
            let parent_state = store.segments_unchecked(l).state_of(self.path[l].0);
            if allele != parent_state {
                reserve_blocks(&mut self.mutations, 1, self.blocks.mutation)?;
                self.mutations.push(Mutation {
                    site: l as u32,
                    node: c as u32,
                    derived_state: allele,
                });
            }
        }
        Ok(())
    }

    /// Flush the live segments of `children` into edgesets and mark `epoch`
    /// resolved. Resolving an epoch twice is a no-op.
    pub fn resolve(&mut self, epoch: usize, children: &[NodeIdx]) -> Result<()> {
        let num_epochs = self.store.num_epochs();
        if epoch > num_epochs {
            return Err(InferError::out_of_range("epoch", epoch, num_epochs + 1));
        }
        if self.resolved[epoch] {
            debug!(epoch, "epoch already resolved");
            return Ok(());
        }
        let mut wanted: Vec<u32> = children.iter().map(|c| c.0).collect();
        wanted.sort_unstable();
        wanted.dedup();
        if let Some(&last) = wanted.last() {
            if last as usize >= self.num_nodes() {
                return Err(InferError::out_of_range("node", last as usize, self.num_nodes()));
            }
        }

        let before = self.edgesets.len();
        let mut events: Vec<(u32, bool, u32)> = Vec::new();
        let mut active: Vec<u32> = Vec::new();
        self.touched.sort_unstable();
        for t in 0..self.touched.len() {
            let parent = self.touched[t] as usize;
            let drained = self.live[parent]
                .drain_where(&mut self.live_arena, |seg| wanted.binary_search(&seg.child).is_ok())?;
            if drained.is_empty() {
                continue;
            }

            // Removals sort before insertions at the same coordinate
            events.clear();
            for seg in &drained {
                events.push((seg.left, true, seg.child));
                events.push((seg.right, false, seg.child));
            }
            events.sort_unstable();

            active.clear();
            let first_edgeset = self.edgesets.len();
            let mut last_pos = events[0].0;
            for &(pos, insert, child) in &events {
                if pos > last_pos && !active.is_empty() {
                    self.emit(first_edgeset, last_pos, pos, parent as u32, &active);
                }
                match (insert, active.binary_search(&child)) {
                    (true, Err(k)) => active.insert(k, child),
                    (false, Ok(k)) => {
                        active.remove(k);
                    }
                    _ => {
                        return Err(InferError::internal(format!(
                            "child {} has overlapping segments under parent {}",
                            child, parent
                        )))
                    }
                }
                last_pos = pos;
            }
        }
        let live = &self.live;
        self.touched.retain(|&p| !live[p as usize].is_empty());
        self.resolved.set(epoch, true);
        debug!(
            epoch,
            num_children = wanted.len(),
            new_edgesets = self.edgesets.len() - before,
            live_segments = self.live_arena.len(),
            "resolved epoch"
        );
        Ok(())
    }

    fn emit(&mut self, first: usize, left: u32, right: u32, parent: u32, children: &[u32]) {
        if self.edgesets.len() > first {
            if let Some(last) = self.edgesets.last_mut() {
                if last.right == left && last.children == children {
                    last.right = right;
                    return;
                }
            }
        }
        self.edgesets.push(Edgeset {
            left,
            right,
            parent,
            children: children.to_vec(),
        });
    }

    /// Pending `(left, right, child)` runs of `parent`, in insertion order
    pub fn live_segments(
        &self,
        parent: AncestorIdx,
    ) -> Result<impl Iterator<Item = (u32, u32, NodeIdx)> + '_> {
        let p = parent.as_usize();
        let list = self
            .live
            .get(p)
            .ok_or_else(|| InferError::out_of_range("ancestor", p, self.live.len()))?;
        Ok(list
            .iter(&self.live_arena)
            .map(|(_, seg)| (seg.left, seg.right, NodeIdx(seg.child))))
    }

    /// Internal node ids in output order, and the inverse mapping
    fn node_order(&self) -> (Vec<u32>, Vec<u32>) {
        let mut order: Vec<u32> = (0..self.num_nodes() as u32).collect();
        order.sort_by(|&a, &b| {
            let sample_a = self.node_flags[a as usize] & NODE_IS_SAMPLE == 0;
            let sample_b = self.node_flags[b as usize] & NODE_IS_SAMPLE == 0;
            sample_a
                .cmp(&sample_b)
                .then(self.node_time[a as usize].total_cmp(&self.node_time[b as usize]))
        });
        let mut output_id = vec![0u32; order.len()];
        for (out, &internal) in order.iter().enumerate() {
            output_id[internal as usize] = out as u32;
        }
        (order, output_id)
    }

    /// Output ids of all internal nodes, indexed by internal id
    pub fn output_node_map(&self) -> Vec<NodeIdx> {
        let (_, output_id) = self.node_order();
        output_id.into_iter().map(NodeIdx).collect()
    }

    /// Output id of one internal node id. Sorts all nodes; use
    /// [`TreeSequenceBuilder::output_node_map`] to map many ids.
    pub fn output_node_id(&self, node: NodeIdx) -> Result<NodeIdx> {
        let n = node.as_usize();
        if n >= self.num_nodes() {
            return Err(InferError::out_of_range("node", n, self.num_nodes()));
        }
        let (_, output_id) = self.node_order();
        Ok(NodeIdx(output_id[n]))
    }

    fn site_coordinate(&self, site: u32, is_right: bool) -> f64 {
        let site = site as usize;
        if is_right && site == self.store.num_sites() {
            self.sequence_length
        } else if !is_right && site == 0 {
            0.0
        } else {
            self.store.position(site)
        }
    }

    pub fn dump_nodes(&self) -> NodeTable {
        let (order, _) = self.node_order();
        self.nodes_in(&order)
    }

    pub fn dump_edgesets(&self) -> EdgesetTable {
        let (_, output_id) = self.node_order();
        self.edgesets_in(&output_id)
    }

    pub fn dump_mutations(&self) -> MutationTable {
        let (_, output_id) = self.node_order();
        self.mutations_in(&output_id)
    }

    fn nodes_in(&self, order: &[u32]) -> NodeTable {
        NodeTable {
            flags: order.iter().map(|&n| self.node_flags[n as usize]).collect(),
            time: order.iter().map(|&n| self.node_time[n as usize]).collect(),
        }
    }

    fn edgesets_in(&self, output_id: &[u32]) -> EdgesetTable {
        let mut order: Vec<usize> = (0..self.edgesets.len()).collect();
        order.sort_by(|&a, &b| {
            let (ea, eb) = (&self.edgesets[a], &self.edgesets[b]);
            self.node_time[ea.parent as usize]
                .total_cmp(&self.node_time[eb.parent as usize])
                .then(ea.left.cmp(&eb.left))
                .then(ea.parent.cmp(&eb.parent))
        });

        let mut table = EdgesetTable::default();
        for i in order {
            let e = &self.edgesets[i];
            table.left.push(self.site_coordinate(e.left, false));
            table.right.push(self.site_coordinate(e.right, true));
            table.parent.push(output_id[e.parent as usize]);
            let start = table.children.len();
            table
                .children
                .extend(e.children.iter().map(|&c| output_id[c as usize]));
            table.children[start..].sort_unstable();
            table.children_length.push(e.children.len() as u32);
        }
        table
    }

    fn mutations_in(&self, output_id: &[u32]) -> MutationTable {
        let mut order: Vec<usize> = (0..self.mutations.len()).collect();
        order.sort_by_key(|&i| self.mutations[i].site);
        MutationTable {
            site: order.iter().map(|&i| self.mutations[i].site).collect(),
            node: order
                .iter()
                .map(|&i| output_id[self.mutations[i].node as usize])
                .collect(),
            derived_state: order.iter().map(|&i| self.mutations[i].derived_state).collect(),
        }
    }

    /// All output tables, sharing one node ordering
    pub fn tables(&self) -> TreeSequence {
        let (order, output_id) = self.node_order();
        TreeSequence {
            sequence_length: self.sequence_length,
            nodes: self.nodes_in(&order),
            edgesets: self.edgesets_in(&output_id),
            mutations: self.mutations_in(&output_id),
            sites: SiteTable {
                position: self.store.positions().to_vec(),
            },
        }
    }

    /// Diagnostic dump; format is not stable
    pub fn print_state<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Tree sequence builder")?;
        writeln!(out, "num_samples = {}", self.num_samples)?;
        writeln!(out, "sequence_length = {}", self.sequence_length)?;
        writeln!(out, "num_nodes = {}", self.num_nodes())?;
        writeln!(out, "num_edgesets = {}", self.num_edgesets())?;
        writeln!(out, "num_mutations = {}", self.num_mutations())?;
        let resolved: String = self
            .resolved
            .iter()
            .map(|b| if *b { '1' } else { '0' })
            .collect();
        writeln!(out, "resolved = {}", resolved)?;
        writeln!(out, "nodes = ")?;
        for (n, (flags, time)) in self.node_flags.iter().zip(&self.node_time).enumerate() {
            writeln!(out, "{}\t{}\t{}", n, flags, time)?;
        }
        writeln!(out, "live segments = ")?;
        for (parent, list) in self.live.iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            write!(out, "{}\t:", parent)?;
            for (_, seg) in list.iter(&self.live_arena) {
                write!(out, "({},{}->{})", seg.left, seg.right, seg.child)?;
            }
            writeln!(out)?;
        }
        writeln!(out, "edgesets = ")?;
        for e in &self.edgesets {
            writeln!(out, "{}\t{}\t{}\t{:?}", e.left, e.right, e.parent, e.children)?;
        }
        writeln!(out, "mutations = ")?;
        for m in &self.mutations {
            writeln!(out, "{}\t{}\t{}", m.site, m.node, m.derived_state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::storage::AncestorStoreBuilder;

    /// Root (all ancestral) plus two ancestors of age 1 focal at sites 0 and 2
    fn small_store() -> AncestorStore {
        let mut builder = AncestorStoreBuilder::new(3, 4).unwrap();
        builder.add(&[0, 0, 0]).unwrap();
        builder.add(&[1, 0, -1]).unwrap();
        builder.add(&[-1, 0, 1]).unwrap();
        AncestorStore::new(
            &[1.0, 2.0, 3.0],
            &[2, 1, 1],
            &[1, 2],
            &[0, 2],
            &builder.dump().unwrap(),
        )
        .unwrap()
    }

    fn graft(
        tsb: &mut TreeSequenceBuilder,
        store: &AncestorStore,
        child: usize,
        num_ancestors: usize,
        h: &[Allele],
        start: usize,
        end: usize,
        focal: &[u32],
    ) {
        let mut matcher = AncestorMatcher::new(store, 1e-2).unwrap();
        let mut tb = Traceback::new(store.num_sites(), 4).unwrap();
        let result = matcher
            .best_path(num_ancestors, h, start, end, focal, 1e-3, &mut tb)
            .unwrap();
        tsb.update(NodeIdx::from(child), h, start, end, result.terminal_ancestor, &tb)
            .unwrap();
    }

    #[test]
    fn test_roots_created_at_construction() {
        let store = small_store();
        let tsb = TreeSequenceBuilder::new(&store, 2, 10.0, BlockSizes::default()).unwrap();
        assert_eq!(tsb.num_nodes(), 1);
        assert_eq!(tsb.num_mutations(), 0);
        assert_eq!(tsb.dump_nodes().time, vec![2.0]);
    }

    #[test]
    fn test_rejects_short_sequence_length() {
        let store = small_store();
        assert!(TreeSequenceBuilder::new(&store, 1, 3.0, BlockSizes::default()).is_err());
    }

    #[test]
    fn test_update_requires_next_node() {
        let store = small_store();
        let mut tsb = TreeSequenceBuilder::new(&store, 1, 10.0, BlockSizes::default()).unwrap();
        let tb = Traceback::new(3, 4).unwrap();
        let err = tsb
            .update(NodeIdx::new(2), &[-1, 0, 1], 1, 3, AncestorIdx::new(0), &tb)
            .unwrap_err();
        assert!(matches!(err, InferError::InvalidParameter { .. }));
        let err = tsb
            .update(NodeIdx::new(1), &[1, 0, -1], 0, 2, AncestorIdx::new(1), &tb)
            .unwrap_err();
        assert!(matches!(err, InferError::InvalidParameter { .. }));
        assert_eq!(tsb.num_nodes(), 1);
    }

    #[test]
    fn test_ancestors_then_samples() {
        let store = small_store();
        let mut tsb = TreeSequenceBuilder::new(&store, 1, 10.0, BlockSizes::default()).unwrap();
        graft(&mut tsb, &store, 1, 1, &[1, 0, -1], 0, 2, &[0]);
        graft(&mut tsb, &store, 2, 1, &[-1, 0, 1], 1, 3, &[2]);
        assert_eq!(tsb.live_segments(AncestorIdx::new(0)).unwrap().count(), 2);
        tsb.resolve(1, &[NodeIdx::new(1), NodeIdx::new(2)]).unwrap();
        assert_eq!(tsb.live_segments(AncestorIdx::new(0)).unwrap().count(), 0);

        // root has children 1 on [0, 2) and 2 on [1, 3): three elementary intervals
        let edges = tsb.dump_edgesets();
        let rows: Vec<(f64, f64, Vec<u32>)> = edges
            .iter()
            .map(|(l, r, _, c)| (l, r, c.to_vec()))
            .collect();
        let one = tsb.output_node_id(NodeIdx::new(1)).unwrap().0;
        let two = tsb.output_node_id(NodeIdx::new(2)).unwrap().0;
        let mut both = vec![one, two];
        both.sort_unstable();
        assert_eq!(
            rows,
            vec![(0.0, 2.0, vec![one]), (2.0, 3.0, both), (3.0, 10.0, vec![two])]
        );

        // both derived focal alleles differ from the root
        let muts = tsb.dump_mutations();
        assert_eq!(muts.site, vec![0, 2]);
        assert_eq!(muts.node, vec![one, two]);

        graft(&mut tsb, &store, 3, 3, &[1, 0, 1], 0, 3, &[]);
        tsb.resolve(store.num_epochs(), &[NodeIdx::new(3)]).unwrap();
        let nodes = tsb.dump_nodes();
        assert_eq!(nodes.flags[0], NODE_IS_SAMPLE);
        assert_eq!(nodes.time, vec![0.0, 1.0, 1.0, 2.0]);
        assert_eq!(tsb.output_node_id(NodeIdx::new(3)).unwrap(), NodeIdx::new(0));
    }

    #[test]
    fn test_inherited_focal_allele_has_no_mutation() {
        let mut builder = AncestorStoreBuilder::new(3, 4).unwrap();
        builder.add(&[0, 0, 0]).unwrap();
        builder.add(&[1, 0, 0]).unwrap();
        builder.add(&[1, 1, 0]).unwrap();
        let store = AncestorStore::new(
            &[1.0, 2.0, 3.0],
            &[3, 2, 1],
            &[1, 2, 2],
            &[0, 0, 1],
            &builder.dump().unwrap(),
        )
        .unwrap();
        let mut tsb = TreeSequenceBuilder::new(&store, 0, 10.0, BlockSizes::default()).unwrap();
        let tb = Traceback::new(3, 4).unwrap();

        tsb.update(NodeIdx::new(1), &[1, 0, 0], 0, 3, AncestorIdx::new(0), &tb)
            .unwrap();
        tsb.resolve(1, &[NodeIdx::new(1)]).unwrap();
        // ancestor 2 copies ancestor 1 everywhere, inheriting the focal allele at site 0
        tsb.update(NodeIdx::new(2), &[1, 1, 0], 0, 3, AncestorIdx::new(1), &tb)
            .unwrap();
        tsb.resolve(2, &[NodeIdx::new(2)]).unwrap();

        let muts = tsb.dump_mutations();
        let one = tsb.output_node_id(NodeIdx::new(1)).unwrap().0;
        let two = tsb.output_node_id(NodeIdx::new(2)).unwrap().0;
        assert_eq!(muts.site, vec![0, 1]);
        assert_eq!(muts.node, vec![one, two]);
        assert_eq!(muts.derived_state, vec![1, 1]);
    }

    #[test]
    fn test_resolve_only_flushes_requested_children() {
        let store = small_store();
        let mut tsb = TreeSequenceBuilder::new(&store, 0, 10.0, BlockSizes::default()).unwrap();
        graft(&mut tsb, &store, 1, 1, &[1, 0, -1], 0, 2, &[0]);
        graft(&mut tsb, &store, 2, 1, &[-1, 0, 1], 1, 3, &[2]);
        assert_eq!(tsb.touched, vec![0]);

        tsb.resolve(1, &[NodeIdx::new(1)]).unwrap();
        let pending: Vec<_> = tsb.live_segments(AncestorIdx::new(0)).unwrap().collect();
        assert_eq!(pending, vec![(1, 3, NodeIdx::new(2))]);
        assert_eq!(tsb.touched, vec![0]);
        assert_eq!(tsb.num_edgesets(), 1);

        tsb.resolve(2, &[NodeIdx::new(2)]).unwrap();
        assert!(tsb.touched.is_empty());
        assert_eq!(tsb.live_segments(AncestorIdx::new(0)).unwrap().count(), 0);
        assert_eq!(tsb.num_edgesets(), 2);
    }

    #[test]
    fn test_tables_share_one_node_order() {
        let store = small_store();
        let mut tsb = TreeSequenceBuilder::new(&store, 1, 10.0, BlockSizes::default()).unwrap();
        graft(&mut tsb, &store, 1, 1, &[1, 0, -1], 0, 2, &[0]);
        graft(&mut tsb, &store, 2, 1, &[-1, 0, 1], 1, 3, &[2]);
        tsb.resolve(1, &[NodeIdx::new(1), NodeIdx::new(2)]).unwrap();
        graft(&mut tsb, &store, 3, 3, &[1, 0, 1], 0, 3, &[]);
        tsb.resolve(store.num_epochs(), &[NodeIdx::new(3)]).unwrap();

        let tables = tsb.tables();
        assert_eq!(tables.nodes, tsb.dump_nodes());
        assert_eq!(tables.edgesets, tsb.dump_edgesets());
        assert_eq!(tables.mutations, tsb.dump_mutations());

        let map = tsb.output_node_map();
        assert_eq!(map.len(), tsb.num_nodes());
        for (internal, &out) in map.iter().enumerate() {
            assert_eq!(tsb.output_node_id(NodeIdx::from(internal)).unwrap(), out);
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let store = small_store();
        let mut tsb = TreeSequenceBuilder::new(&store, 0, 10.0, BlockSizes::default()).unwrap();
        graft(&mut tsb, &store, 1, 1, &[1, 0, -1], 0, 2, &[0]);
        tsb.resolve(1, &[NodeIdx::new(1)]).unwrap();
        let first = tsb.tables();
        tsb.resolve(1, &[NodeIdx::new(1)]).unwrap();
        assert_eq!(tsb.tables(), first);
        assert!(tsb.is_resolved(1));
    }

    #[test]
    fn test_resolve_epoch_out_of_range() {
        let store = small_store();
        let mut tsb = TreeSequenceBuilder::new(&store, 0, 10.0, BlockSizes::default()).unwrap();
        let err = tsb.resolve(store.num_epochs() + 1, &[]).unwrap_err();
        assert!(matches!(err, InferError::OutOfRange { .. }));
    }

    #[test]
    fn test_print_state() {
        let store = small_store();
        let tsb = TreeSequenceBuilder::new(&store, 0, 10.0, BlockSizes::default()).unwrap();
        let mut buf = Vec::new();
        tsb.print_state(&mut buf).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("num_nodes = 1"));
    }
}
