//! # Inference Pipeline
//!
//! ## Role
//! Drive the full build: ancestors into the store, ancestors matched epoch
//! by epoch against older ancestors, samples matched against all ancestors,
//! and the resulting genealogy dumped as tables.
//!
//! ## Algorithm Overview
//! 1. **Validate:** config, positions, haplotype shapes, insertion order
//! 2. **Store:** add ancestors in insertion order (ids follow that order)
//!    and freeze the store
//! 3. **Ancestors:** for each epoch after the roots, match every ancestor
//!    over its known range against the strictly older ancestors, graft it,
//!    then resolve the epoch
//! 4. **Samples:** match each sample over its known range against every
//!    ancestor, graft, and resolve the sample epoch
//! 5. **Output:** node, edgeset, mutation and site tables

use tracing::{debug, info, info_span, instrument};

use crate::config::Config;
use crate::data::haplotype::{is_valid_allele, known_range, Allele, AncestorIdx, NodeIdx, UNKNOWN_ALLELE};
use crate::data::site::{validate_positions, Sites};
use crate::data::storage::{AncestorStore, AncestorStoreBuilder};
use crate::error::{InferError, Result};
use crate::model::matcher::AncestorMatcher;
use crate::model::traceback::Traceback;
use crate::model::tree_sequence::{TreeSequence, TreeSequenceBuilder};

/// One ancestor haplotype with its age and focal sites
#[derive(Clone, Debug, PartialEq)]
pub struct AncestorInput {
    pub haplotype: Vec<Allele>,
    pub age: u32,
    pub focal_sites: Vec<u32>,
}

/// Everything the pipeline consumes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferenceInput {
    pub positions: Vec<f64>,
    pub ancestors: Vec<AncestorInput>,
    /// Order in which `ancestors` are added to the store (identity if unset).
    /// Ages must not increase along this order.
    pub insertion_order: Option<Vec<usize>>,
    pub samples: Vec<Vec<Allele>>,
}

pub struct InferencePipeline {
    config: Config,
}

impl InferencePipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the complete inference
    #[instrument(name = "inference", skip_all, fields(num_sites, num_ancestors, num_samples))]
    pub fn run(&self, input: &InferenceInput) -> Result<TreeSequence> {
        self.config.validate()?;
        let span = tracing::Span::current();
        span.record("num_sites", input.positions.len());
        span.record("num_ancestors", input.ancestors.len());
        span.record("num_samples", input.samples.len());

        let store = info_span!("build_store").in_scope(|| self.build_store(input))?;
        let sites = Sites::from_samples(&input.positions, &input.samples)?;
        debug!(
            num_singletons = sites.num_singletons(),
            num_monomorphic = sites.num_monomorphic(),
            "sample site frequencies"
        );
        let sequence_length = self
            .config
            .sequence_length_for(store.position(store.num_sites() - 1));
        let mut tsb = TreeSequenceBuilder::new(
            &store,
            input.samples.len(),
            sequence_length,
            self.config.block_sizes(),
        )?;
        let mut matcher = AncestorMatcher::new(&store, self.config.recombination_rate)?;
        let mut traceback = Traceback::new(store.num_sites(), self.config.traceback_block_size)?;

        info_span!("match_ancestors").in_scope(|| {
            self.match_ancestors(&store, &mut matcher, &mut traceback, &mut tsb)
        })?;
        info_span!("match_samples").in_scope(|| {
            self.match_samples(&store, &input.samples, &mut matcher, &mut traceback, &mut tsb)
        })?;

        let tables = tsb.tables();
        info!(
            num_nodes = tables.nodes.len(),
            num_edgesets = tables.edgesets.len(),
            num_mutations = tables.mutations.len(),
            "inference complete"
        );
        Ok(tables)
    }

    /// Validate the ancestors and build the frozen store
    pub fn build_store(&self, input: &InferenceInput) -> Result<AncestorStore> {
        validate_positions(&input.positions)?;
        let num_sites = input.positions.len();
        if num_sites == 0 {
            return Err(InferError::invalid_parameter("no sites"));
        }
        let order = insertion_order(input)?;

        let mut builder = AncestorStoreBuilder::new(num_sites, self.config.segment_block_size)?;
        let mut ages = Vec::with_capacity(order.len());
        let mut focal_ancestor = Vec::new();
        let mut focal_site = Vec::new();
        for &i in &order {
            let ancestor = &input.ancestors[i];
            check_haplotype("ancestor", i, &ancestor.haplotype, num_sites)?;
            if known_range(&ancestor.haplotype).is_none() {
                return Err(InferError::invalid_parameter(format!(
                    "ancestor {} has no known alleles",
                    i
                )));
            }
            if let Some(&site) = ancestor.focal_sites.iter().find(|&&s| s as usize >= num_sites) {
                return Err(InferError::out_of_range("site", site as usize, num_sites));
            }
            let id = builder.add(&ancestor.haplotype)?;
            ages.push(ancestor.age);
            for &site in &ancestor.focal_sites {
                focal_ancestor.push(id);
                focal_site.push(site);
            }
        }
        let segments = builder.dump()?;
        let store = AncestorStore::new(&input.positions, &ages, &focal_ancestor, &focal_site, &segments)?;
        debug!(
            num_ancestors = store.num_ancestors(),
            num_epochs = store.num_epochs(),
            total_segments = store.total_segments(),
            max_num_site_segments = store.max_num_site_segments(),
            total_memory = store.total_memory(),
            "froze ancestor store"
        );
        Ok(store)
    }

    fn match_ancestors(
        &self,
        store: &AncestorStore,
        matcher: &mut AncestorMatcher,
        traceback: &mut Traceback,
        tsb: &mut TreeSequenceBuilder,
    ) -> Result<()> {
        let mut haplotype = vec![UNKNOWN_ALLELE; store.num_sites()];
        let mut children = Vec::new();
        for epoch in 1..store.num_epochs() {
            let ids = store.get_epoch_ancestors(epoch)?;
            children.clear();
            for a in ids.clone() {
                let ancestor = AncestorIdx(a);
                let summary = store.get_ancestor(ancestor, &mut haplotype)?;
                let result = matcher.best_path(
                    summary.num_older_ancestors,
                    &haplotype,
                    summary.start_site,
                    summary.end_site,
                    summary.focal_sites,
                    self.config.error_rate,
                    traceback,
                )?;
                tsb.update(
                    NodeIdx::from(ancestor),
                    &haplotype,
                    summary.start_site,
                    summary.end_site,
                    result.terminal_ancestor,
                    traceback,
                )?;
                children.push(NodeIdx::from(ancestor));
            }
            tsb.resolve(epoch, &children)?;
            debug!(
                epoch,
                first = ids.start,
                num_ancestors = ids.len(),
                num_edgesets = tsb.num_edgesets(),
                "matched epoch"
            );
        }
        Ok(())
    }

    fn match_samples(
        &self,
        store: &AncestorStore,
        samples: &[Vec<Allele>],
        matcher: &mut AncestorMatcher,
        traceback: &mut Traceback,
        tsb: &mut TreeSequenceBuilder,
    ) -> Result<()> {
        let mut children = Vec::with_capacity(samples.len());
        for (s, sample) in samples.iter().enumerate() {
            let range = known_range(sample).ok_or_else(|| {
                InferError::invalid_parameter(format!("sample {} has no known alleles", s))
            })?;
            let result = matcher.best_path(
                store.num_ancestors(),
                sample,
                range.start,
                range.end,
                &[],
                self.config.error_rate,
                traceback,
            )?;
            let node = tsb.sample_node(s);
            tsb.update(node, sample, range.start, range.end, result.terminal_ancestor, traceback)?;
            children.push(node);
        }
        tsb.resolve(store.num_epochs(), &children)?;
        debug!(num_samples = samples.len(), "matched samples");
        Ok(())
    }
}

fn check_haplotype(what: &str, index: usize, haplotype: &[Allele], num_sites: usize) -> Result<()> {
    if haplotype.len() != num_sites {
        return Err(InferError::invalid_parameter(format!(
            "{} {} has {} alleles, expected {}",
            what,
            index,
            haplotype.len(),
            num_sites
        )));
    }
    if let Some(j) = haplotype.iter().position(|&a| !is_valid_allele(a)) {
        return Err(InferError::invalid_parameter(format!(
            "{} {} has invalid allele {} at site {}",
            what, index, haplotype[j], j
        )));
    }
    Ok(())
}

fn insertion_order(input: &InferenceInput) -> Result<Vec<usize>> {
    let n = input.ancestors.len();
    let order = match &input.insertion_order {
        None => (0..n).collect(),
        Some(order) => order.clone(),
    };
    let mut seen = vec![false; n];
    if order.len() != n {
        return Err(InferError::invalid_parameter(format!(
            "insertion order has {} entries for {} ancestors",
            order.len(),
            n
        )));
    }
    for &i in &order {
        if i >= n || seen[i] {
            return Err(InferError::invalid_parameter(format!(
                "insertion order is not a permutation (entry {})",
                i
            )));
        }
        seen[i] = true;
    }
    Ok(order)
}
