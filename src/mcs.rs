//! Isomorphism adapter: candidate atom-to-atom correspondences.
//!
//! Topological matching is the first stage of geometry alignment: given a
//! reference and a query structure, produce the set of plausible atom maps
//! the rigid-alignment engine can score. The solver itself sits behind the
//! [`McsSolver`] trait so an external maximum-common-substructure engine can
//! be swapped in; the bundled [`CommonSubgraphSolver`] performs a
//! backtracking connectivity search that enumerates complete embeddings of
//! the reference into the query, falling back to the largest common
//! substructure mappings found when no complete embedding exists.
//!
//! Matching reasons over topology alone: callers normalize away bond order
//! and stereo labels first (see `Structure::normalize_bond_orders`), because
//! resonance or aromaticity notation must never block a topological match.
//!
//! Degenerate correspondences (fewer than three atoms) cannot constrain a 3D
//! superposition and are discarded.

use crate::structure::Structure;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Partial injective mapping from reference atom index to query atom index.
///
/// A `BTreeMap` keeps key iteration deterministic, which the refinement
/// engine relies on for reproducible seed selection.
pub type AtomMapping = BTreeMap<usize, usize>;

/// Options controlling candidate generation.
#[derive(Debug, Clone)]
pub struct McsOptions {
    /// Mappings smaller than this are discarded as degenerate.
    pub min_mapping_size: usize,
    /// Upper bound on the number of candidate mappings collected; symmetric
    /// structures can otherwise produce factorially many equivalent maps.
    pub max_candidates: usize,
}

impl Default for McsOptions {
    fn default() -> Self {
        Self {
            min_mapping_size: 3,
            max_candidates: 64,
        }
    }
}

/// Error type for candidate-mapping generation.
#[derive(Error, Debug)]
pub enum McsError {
    /// The solver found no correspondence at all; nothing can be aligned.
    #[error("no isomorphism found between '{0}' and '{1}'")]
    NoIsomorphismFound(String, String),
    /// Mappings exist but none can constrain a 3D alignment.
    #[error("no usable atom mapping: {0}")]
    NoUsableMapping(String),
}

/// Solver seam: anything able to enumerate atom correspondences between two
/// structures.
pub trait McsSolver {
    /// All atom mappings from `reference` into `query`, largest first, at
    /// most `max_candidates` of them.
    fn all_atom_mappings(
        &self,
        reference: &Structure,
        query: &Structure,
        max_candidates: usize,
    ) -> Vec<AtomMapping>;
}

/// Bundled backtracking common-subgraph solver.
///
/// Enumerates label-preserving, connectivity-preserving injective maps of the
/// reference atoms into the query. Atoms are matched in a connectivity-guided
/// order (each atom after the first prefers to extend an already-mapped
/// neighborhood) so the candidate set for each atom stays small. A reference
/// atom with no matchable counterpart is skipped and the search continues
/// over the remaining atoms. When the reference embeds completely, all
/// complete embeddings are returned; when it does not, the deepest partial
/// mappings reached are returned instead.
#[derive(Debug, Default)]
pub struct CommonSubgraphSolver;

impl McsSolver for CommonSubgraphSolver {
    fn all_atom_mappings(
        &self,
        reference: &Structure,
        query: &Structure,
        max_candidates: usize,
    ) -> Vec<AtomMapping> {
        let mut search = Search {
            reference,
            query,
            ref_adj: reference.adjacency(),
            query_adj: query.adjacency(),
            map: vec![None; reference.num_atoms()],
            skipped: vec![false; reference.num_atoms()],
            used: vec![false; query.num_atoms()],
            complete: Vec::new(),
            partial: Vec::new(),
            best_partial_size: 0,
            seen_partials: HashSet::new(),
            max_candidates,
        };
        if reference.num_atoms() > 0 && query.num_atoms() > 0 {
            search.run();
        }
        if search.complete.is_empty() {
            search.partial
        } else {
            search.complete
        }
    }
}

struct Search<'a> {
    reference: &'a Structure,
    query: &'a Structure,
    ref_adj: Vec<Vec<usize>>,
    query_adj: Vec<Vec<usize>>,
    map: Vec<Option<usize>>,
    skipped: Vec<bool>,
    used: Vec<bool>,
    complete: Vec<AtomMapping>,
    partial: Vec<AtomMapping>,
    best_partial_size: usize,
    seen_partials: HashSet<Vec<(usize, usize)>>,
    max_candidates: usize,
}

impl Search<'_> {
    fn run(&mut self) {
        if self.complete.len() >= self.max_candidates {
            return;
        }
        let Some(r) = self.next_ref_atom() else {
            if self.skipped.iter().any(|&s| s) {
                self.record_partial();
            } else {
                self.record_complete();
            }
            return;
        };
        let candidates = self.candidates_for(r);
        if candidates.is_empty() {
            // Unmatchable atom: skip it and keep searching, so a common
            // substructure elsewhere in the reference is still found.
            self.skipped[r] = true;
            self.run();
            self.skipped[r] = false;
            return;
        }
        for q in candidates {
            self.map[r] = Some(q);
            self.used[q] = true;
            self.run();
            self.map[r] = None;
            self.used[q] = false;
            if self.complete.len() >= self.max_candidates {
                return;
            }
        }
    }

    /// Next unmapped, unskipped reference atom, preferring one adjacent to
    /// the mapped set so candidate filtering can use connectivity.
    fn next_ref_atom(&self) -> Option<usize> {
        let unmapped: Vec<usize> = (0..self.map.len())
            .filter(|&i| self.map[i].is_none() && !self.skipped[i])
            .collect();
        unmapped
            .iter()
            .copied()
            .find(|&i| self.ref_adj[i].iter().any(|&n| self.map[n].is_some()))
            .or_else(|| unmapped.first().copied())
    }

    /// Query atoms that atom `r` may map to: same label, unused, and adjacent
    /// to the images of all already-mapped neighbors of `r`.
    fn candidates_for(&self, r: usize) -> Vec<usize> {
        let label = &self.reference.atoms()[r].label;
        (0..self.query.num_atoms())
            .filter(|&q| !self.used[q])
            .filter(|&q| &self.query.atoms()[q].label == label)
            .filter(|&q| {
                self.ref_adj[r].iter().all(|&n| match self.map[n] {
                    Some(qn) => self.query_adj[q].contains(&qn),
                    None => true,
                })
            })
            .collect()
    }

    fn current_pairs(&self) -> Vec<(usize, usize)> {
        self.map
            .iter()
            .enumerate()
            .filter_map(|(r, q)| q.map(|q| (r, q)))
            .collect()
    }

    fn record_complete(&mut self) {
        self.complete.push(self.current_pairs().into_iter().collect());
    }

    fn record_partial(&mut self) {
        let pairs = self.current_pairs();
        if pairs.len() < self.best_partial_size || pairs.is_empty() {
            return;
        }
        if pairs.len() > self.best_partial_size {
            self.best_partial_size = pairs.len();
            self.partial.clear();
            self.seen_partials.clear();
        }
        if self.partial.len() < self.max_candidates && self.seen_partials.insert(pairs.clone()) {
            self.partial.push(pairs.into_iter().collect());
        }
    }
}

/// Generates the filtered candidate mapping set for an alignment run.
///
/// Fails with [`McsError::NoUsableMapping`] when the reference is larger than
/// the query (alignment requires reference atoms to be a subset of the query)
/// or when every mapping found is degenerate, and with
/// [`McsError::NoIsomorphismFound`] when the solver returns nothing at all.
pub fn candidate_mappings(
    solver: &dyn McsSolver,
    reference: &Structure,
    query: &Structure,
    options: &McsOptions,
) -> Result<Vec<AtomMapping>, McsError> {
    if reference.num_atoms() > query.num_atoms() {
        return Err(McsError::NoUsableMapping(format!(
            "reference '{}' has {} atoms but query '{}' has only {}",
            reference.title,
            reference.num_atoms(),
            query.title,
            query.num_atoms()
        )));
    }

    let mut mappings = solver.all_atom_mappings(reference, query, options.max_candidates);
    if mappings.is_empty() {
        return Err(McsError::NoIsomorphismFound(
            reference.title.clone(),
            query.title.clone(),
        ));
    }

    let found = mappings.len();
    mappings.retain(|m| m.len() >= options.min_mapping_size);
    if mappings.is_empty() {
        return Err(McsError::NoUsableMapping(format!(
            "all {} mappings are smaller than {} atoms",
            found, options.min_mapping_size
        )));
    }

    log::trace!(
        "candidate mappings for '{}' vs '{}': {} usable of {} found",
        reference.title,
        query.title,
        mappings.len(),
        found
    );
    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::Atom;

    fn water() -> Structure {
        let mut s = Structure::new("water");
        s.add_atom(Atom::new("O", 0.0, 0.0, 0.0));
        s.add_atom(Atom::new("H", 0.757, 0.586, 0.0));
        s.add_atom(Atom::new("H", -0.757, 0.586, 0.0));
        s.add_bond(0, 1, None).unwrap();
        s.add_bond(0, 2, None).unwrap();
        s
    }

    fn methanol() -> Structure {
        let mut s = Structure::new("methanol");
        s.add_atom(Atom::new("C", 0.0, 0.0, 0.0));
        s.add_atom(Atom::new("O", 1.43, 0.0, 0.0));
        s.add_atom(Atom::new("H", -0.5, 0.9, 0.0));
        s.add_atom(Atom::new("H", -0.5, -0.9, 0.3));
        s.add_atom(Atom::new("H", -0.5, 0.0, -1.0));
        s.add_atom(Atom::new("H", 1.8, 0.9, 0.0));
        s.add_bond(0, 1, None).unwrap();
        s.add_bond(0, 2, None).unwrap();
        s.add_bond(0, 3, None).unwrap();
        s.add_bond(0, 4, None).unwrap();
        s.add_bond(1, 5, None).unwrap();
        s
    }

    #[test]
    fn test_self_match_contains_identity() {
        let s = water();
        let maps =
            candidate_mappings(&CommonSubgraphSolver, &s, &s, &McsOptions::default()).unwrap();
        let identity: AtomMapping = (0..3).map(|i| (i, i)).collect();
        assert!(maps.contains(&identity));
        // The two hydrogens are symmetry-equivalent: both assignments appear.
        assert_eq!(maps.len(), 2);
    }

    #[test]
    fn test_partial_substructure_match() {
        // Water's O with two hydrogens does not embed completely into
        // methanol, whose O carries a single hydrogen; the solver falls back
        // to the largest common substructure (O-H, 2 atoms).
        let s = water();
        let q = methanol();
        let opts = McsOptions {
            min_mapping_size: 2,
            ..McsOptions::default()
        };
        let maps = candidate_mappings(&CommonSubgraphSolver, &s, &q, &opts).unwrap();
        assert!(maps.iter().all(|m| m.len() == 2));
        assert!(maps.iter().all(|m| m.get(&0) == Some(&1)));
    }

    #[test]
    fn test_unmatchable_reference_atom_is_skipped() {
        // N-C-C-C has no complete embedding into C-C-C-C, but its carbon
        // chain does; the nitrogen must not sink the whole search.
        let mut reference = Structure::new("amine chain");
        reference.add_atom(Atom::new("N", 0.0, 0.0, 0.0));
        for x in 1..4 {
            reference.add_atom(Atom::new("C", x as f64 * 1.5, 0.0, 0.0));
        }
        for i in 0..3 {
            reference.add_bond(i, i + 1, None).unwrap();
        }

        let mut query = Structure::new("carbon chain");
        for x in 0..4 {
            query.add_atom(Atom::new("C", x as f64 * 1.5, 0.0, 0.0));
        }
        for i in 0..3 {
            query.add_bond(i, i + 1, None).unwrap();
        }

        let maps = candidate_mappings(
            &CommonSubgraphSolver,
            &reference,
            &query,
            &McsOptions::default(),
        )
        .unwrap();
        assert!(!maps.is_empty());
        for m in &maps {
            assert_eq!(m.len(), 3);
            assert!(!m.contains_key(&0));
        }
    }

    #[test]
    fn test_reference_larger_than_query_is_unusable() {
        let err = candidate_mappings(
            &CommonSubgraphSolver,
            &methanol(),
            &water(),
            &McsOptions::default(),
        );
        assert!(matches!(err, Err(McsError::NoUsableMapping(_))));
    }

    #[test]
    fn test_disjoint_elements_find_no_isomorphism() {
        let mut a = Structure::new("a");
        a.add_atom(Atom::new("C", 0.0, 0.0, 0.0));
        let mut b = Structure::new("b");
        b.add_atom(Atom::new("N", 0.0, 0.0, 0.0));
        let err = candidate_mappings(&CommonSubgraphSolver, &a, &b, &McsOptions::default());
        assert!(matches!(err, Err(McsError::NoIsomorphismFound(_, _))));
    }

    #[test]
    fn test_degenerate_mappings_are_filtered() {
        // Single common atom: a mapping exists but is below the threshold.
        let mut a = Structure::new("a");
        a.add_atom(Atom::new("C", 0.0, 0.0, 0.0));
        let mut b = Structure::new("b");
        b.add_atom(Atom::new("C", 0.0, 0.0, 0.0));
        b.add_atom(Atom::new("N", 1.0, 0.0, 0.0));
        let err = candidate_mappings(&CommonSubgraphSolver, &a, &b, &McsOptions::default());
        assert!(matches!(err, Err(McsError::NoUsableMapping(_))));
    }

    #[test]
    fn test_mappings_are_injective() {
        let s = methanol();
        let maps =
            candidate_mappings(&CommonSubgraphSolver, &s, &s, &McsOptions::default()).unwrap();
        for m in &maps {
            let values: HashSet<usize> = m.values().copied().collect();
            assert_eq!(values.len(), m.len());
        }
    }
}
