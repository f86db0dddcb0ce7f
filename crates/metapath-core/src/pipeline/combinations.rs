//! Lazy cross product of sources × targets × metapaths.
//!
//! Sources vary slowest and metapaths fastest, so the triple at flattened
//! index `a*|G|*|M| + b*|M| + c` is `(sources[a], targets[b], metapaths[c])`.

use std::iter::FusedIterator;

use crate::models::CombinationTriple;

/// Iterator over every (source, target, metapath) combination.
///
/// Materialises one triple per call to `next`; cloning the borrowed
/// collections is the only allocation.
#[derive(Clone, Debug)]
pub struct Combinations<'a> {
    sources: &'a [String],
    targets: &'a [String],
    metapaths: &'a [String],
    next_index: u128,
    total: u128,
}

impl<'a> Combinations<'a> {
    pub fn new(sources: &'a [String], targets: &'a [String], metapaths: &'a [String]) -> Self {
        let total = sources.len() as u128 * targets.len() as u128 * metapaths.len() as u128;
        Self {
            sources,
            targets,
            metapaths,
            next_index: 0,
            total,
        }
    }

    /// Total number of triples in the full product, regardless of progress.
    pub fn total(&self) -> u128 {
        self.total
    }

    /// Triple at a flattened position without iterating.
    pub fn triple_at(&self, index: u128) -> Option<CombinationTriple> {
        if index >= self.total {
            return None;
        }
        let per_source = self.targets.len() as u128 * self.metapaths.len() as u128;
        let per_target = self.metapaths.len() as u128;
        let a = (index / per_source) as usize;
        let b = ((index % per_source) / per_target) as usize;
        let c = (index % per_target) as usize;
        Some(CombinationTriple::new(
            self.sources[a].clone(),
            self.targets[b].clone(),
            self.metapaths[c].clone(),
        ))
    }

    fn remaining(&self) -> u128 {
        self.total - self.next_index
    }
}

impl Iterator for Combinations<'_> {
    type Item = CombinationTriple;

    fn next(&mut self) -> Option<Self::Item> {
        let triple = self.triple_at(self.next_index)?;
        self.next_index += 1;
        Some(triple)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        self.next_index = self.next_index.saturating_add(n as u128).min(self.total);
        self.next()
    }
}

impl FusedIterator for Combinations<'_> {}

/// Lazily enumerate the full cross product of the three collections.
pub fn generate_combinations<'a>(
    sources: &'a [String],
    targets: &'a [String],
    metapaths: &'a [String],
) -> Combinations<'a> {
    Combinations::new(sources, targets, metapaths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn strings(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_element_inputs() {
        let (b, g, m) = (owned(&["bio1"]), owned(&["gene1"]), owned(&["meta1"]));
        let all: Vec<_> = generate_combinations(&b, &g, &m).collect();
        assert_eq!(all, vec![CombinationTriple::new("bio1", "gene1", "meta1")]);
    }

    #[test]
    fn nested_order_varies_metapath_fastest() {
        let b = owned(&["bio1", "bio2"]);
        let g = owned(&["gene1", "gene2"]);
        let m = owned(&["meta1", "meta2"]);
        let all: Vec<(String, String, String)> = generate_combinations(&b, &g, &m)
            .map(|t| (t.source_id, t.target_id, t.metapath))
            .collect();
        let expected = [
            ("bio1", "gene1", "meta1"),
            ("bio1", "gene1", "meta2"),
            ("bio1", "gene2", "meta1"),
            ("bio1", "gene2", "meta2"),
            ("bio2", "gene1", "meta1"),
            ("bio2", "gene1", "meta2"),
            ("bio2", "gene2", "meta1"),
            ("bio2", "gene2", "meta2"),
        ];
        assert_eq!(all.len(), expected.len());
        for (got, want) in all.iter().zip(expected.iter()) {
            assert_eq!((got.0.as_str(), got.1.as_str(), got.2.as_str()), *want);
        }
    }

    #[test]
    fn any_empty_collection_yields_nothing() {
        let full = owned(&["x"]);
        let empty: Vec<String> = Vec::new();
        assert_eq!(generate_combinations(&full, &empty, &full).count(), 0);
        assert_eq!(generate_combinations(&empty, &full, &full).count(), 0);
        assert_eq!(generate_combinations(&full, &full, &empty).count(), 0);
        assert_eq!(generate_combinations(&full, &empty, &empty).count(), 0);
    }

    #[test]
    fn duplicates_in_inputs_produce_duplicate_triples() {
        let b = owned(&["bio1", "bio1"]);
        let g = owned(&["gene1"]);
        let m = owned(&["meta1"]);
        let all: Vec<_> = generate_combinations(&b, &g, &m).collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], all[1]);
    }

    #[test]
    fn fresh_iterator_restarts_from_the_beginning() {
        let (b, g, m) = (strings("b", 2), strings("g", 3), strings("m", 2));
        let mut first = generate_combinations(&b, &g, &m);
        first.nth(4);
        let again: Vec<_> = generate_combinations(&b, &g, &m).take(1).collect();
        assert_eq!(again[0], CombinationTriple::new("b0", "g0", "m0"));
    }

    #[test]
    fn size_hint_tracks_progress_and_nth_skips() {
        let (b, g, m) = (strings("b", 2), strings("g", 3), strings("m", 4));
        let mut iter = generate_combinations(&b, &g, &m);
        assert_eq!(iter.size_hint(), (24, Some(24)));
        let t = iter.nth(13).unwrap();
        assert_eq!(t, CombinationTriple::new("b1", "g0", "m1"));
        assert_eq!(iter.size_hint(), (10, Some(10)));
        assert!(iter.nth(100).is_none());
        assert!(iter.next().is_none());
    }

    proptest! {
        #[test]
        fn product_size_and_flattened_index(m in 1usize..6, n in 1usize..6, k in 1usize..6) {
            let (b, g, mp) = (strings("b", m), strings("g", n), strings("m", k));
            let all: Vec<_> = generate_combinations(&b, &g, &mp).collect();
            prop_assert_eq!(all.len(), m * n * k);
            for a in 0..m {
                for bi in 0..n {
                    for c in 0..k {
                        let i = a * n * k + bi * k + c;
                        prop_assert_eq!(
                            &all[i],
                            &CombinationTriple::new(b[a].clone(), g[bi].clone(), mp[c].clone())
                        );
                    }
                }
            }
        }

        #[test]
        fn empty_side_yields_zero(m in 0usize..4, n in 0usize..4, k in 0usize..4) {
            prop_assume!(m == 0 || n == 0 || k == 0);
            let (b, g, mp) = (strings("b", m), strings("g", n), strings("m", k));
            prop_assert_eq!(generate_combinations(&b, &g, &mp).count(), 0);
        }
    }
}
