//! # Haplotype, Ancestor and Node Definitions
//!
//! Allele encoding and the index newtypes used throughout the crate.

use std::ops::Range;

/// Allelic state at one site: `0` ancestral, `1` derived, `-1` unknown
pub type Allele = i8;

/// Ancestral allele
pub const ANCESTRAL_ALLELE: Allele = 0;

/// Derived allele
pub const DERIVED_ALLELE: Allele = 1;

/// Unknown allele (outside an ancestor's valid range, or missing data)
pub const UNKNOWN_ALLELE: Allele = -1;

/// True for the three allele values the store accepts
#[inline]
pub fn is_valid_allele(allele: Allele) -> bool {
    (UNKNOWN_ALLELE..=DERIVED_ALLELE).contains(&allele)
}

/// Zero-cost newtype for ancestor ids
///
/// Ids are assigned in insertion order and never reused. Smaller ids are
/// older (id 0 is among the roots).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AncestorIdx(pub u32);

impl AncestorIdx {
    pub fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for AncestorIdx {
    fn from(idx: u32) -> Self {
        Self(idx)
    }
}

impl From<usize> for AncestorIdx {
    fn from(idx: usize) -> Self {
        Self(idx as u32)
    }
}

impl From<AncestorIdx> for usize {
    fn from(idx: AncestorIdx) -> usize {
        idx.0 as usize
    }
}

/// Zero-cost newtype for tree sequence node ids
///
/// Inside the builder, ancestor `a` is node `a` and sample `s` is node
/// `num_ancestors + s`. Dumped tables use their own output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeIdx(pub u32);

impl NodeIdx {
    pub fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for NodeIdx {
    fn from(idx: u32) -> Self {
        Self(idx)
    }
}

impl From<usize> for NodeIdx {
    fn from(idx: usize) -> Self {
        Self(idx as u32)
    }
}

impl From<AncestorIdx> for NodeIdx {
    fn from(idx: AncestorIdx) -> Self {
        Self(idx.0)
    }
}

impl From<NodeIdx> for usize {
    fn from(idx: NodeIdx) -> usize {
        idx.0 as usize
    }
}

/// Site range covered by the known alleles of a haplotype.
///
/// Returns `first_known..last_known + 1`, or `None` when every allele is
/// unknown. Unknown alleles inside the range are left to the caller.
pub fn known_range(haplotype: &[Allele]) -> Option<Range<usize>> {
    let start = haplotype.iter().position(|&a| a != UNKNOWN_ALLELE)?;
    let end = haplotype.iter().rposition(|&a| a != UNKNOWN_ALLELE)? + 1;
    Some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_alleles() {
        assert!(is_valid_allele(UNKNOWN_ALLELE));
        assert!(is_valid_allele(ANCESTRAL_ALLELE));
        assert!(is_valid_allele(DERIVED_ALLELE));
        assert!(!is_valid_allele(2));
        assert!(!is_valid_allele(-2));
    }

    #[test]
    fn test_known_range() {
        assert_eq!(known_range(&[-1, -1, 0, 1, -1, 1, -1]), Some(2..6));
        assert_eq!(known_range(&[0, 0, 0]), Some(0..3));
        assert_eq!(known_range(&[-1, -1]), None);
        assert_eq!(known_range(&[]), None);
    }

    #[test]
    fn test_node_from_ancestor() {
        let a = AncestorIdx::new(4);
        assert_eq!(NodeIdx::from(a), NodeIdx::new(4));
        assert_eq!(usize::from(a), 4);
    }
}
