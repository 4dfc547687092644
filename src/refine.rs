//! Mapping refinement: 3D disambiguation of symmetry-equivalent atom maps.
//!
//! A maximum-common-substructure search reasons over topology alone, so
//! symmetric substructures (equivalent methyl hydrogens, mirror branches)
//! yield several equally valid topological maps that diverge in 3D. After an
//! initial best alignment has been chosen, this engine grows a single
//! locally-consistent map by connectivity-guided nearest-neighbor
//! propagation through the already-aligned frame.
//!
//! Refinement is best-effort: when no unambiguous seed exists or the
//! traversal collapses, the caller keeps the previous best mapping. Failure
//! here is never fatal.

use crate::geometry::distance;
use crate::mcs::AtomMapping;
use crate::structure::Structure;

/// Attempts to build a refined atom mapping from the candidate pool.
///
/// `aligned` must already be in the reference frame (the orchestrator aligns
/// it with the current best mapping first). Returns `None` when refinement
/// cannot improve on the candidates:
///
/// - no seed pair exists (no reference atom is mapped to the same fit atom
///   across *every* candidate), or
/// - the propagation visits nothing, or visits differently-sized sets on the
///   two sides.
pub fn refine_mapping(
    reference: &Structure,
    aligned: &Structure,
    candidates: &[AtomMapping],
) -> Option<AtomMapping> {
    let (seed_ref, seed_fit) = match find_seed(candidates) {
        Some(seed) => seed,
        None => {
            log::trace!("refinement: no unambiguous seed pair; keeping current mapping");
            return None;
        }
    };
    log::trace!("refinement seed pair: {} -> {}", seed_ref, seed_fit);

    let ref_adj = reference.adjacency();
    let fit_adj = aligned.adjacency();

    let mut visited_ref = vec![false; reference.num_atoms()];
    let mut visited_fit = vec![false; aligned.num_atoms()];
    let mut mapping = AtomMapping::new();

    // Depth-first propagation with an explicit stack; the visited sets keep
    // the traversal finite and acyclic.
    let mut stack = vec![(seed_ref, seed_fit)];
    visited_ref[seed_ref] = true;
    visited_fit[seed_fit] = true;
    mapping.insert(seed_ref, seed_fit);

    while let Some((r, q)) = stack.pop() {
        for &neighbor in &ref_adj[r] {
            if visited_ref[neighbor] {
                continue;
            }
            // Proposals: every candidate's image of this neighbor that is
            // still free on the fit side and adjacent to the current fit
            // atom; the 3D-closest proposal in the aligned frame wins.
            let mut best: Option<(f64, usize)> = None;
            let target = reference.atoms()[neighbor].position_vector();
            for candidate in candidates {
                let Some(&proposal) = candidate.get(&neighbor) else {
                    continue;
                };
                if visited_fit[proposal] || !fit_adj[q].contains(&proposal) {
                    continue;
                }
                let d = distance(target, aligned.atoms()[proposal].position_vector());
                let closer = match best {
                    Some((best_d, best_q)) => d < best_d || (d == best_d && proposal < best_q),
                    None => true,
                };
                if closer {
                    best = Some((d, proposal));
                }
            }
            if let Some((_, chosen)) = best {
                visited_ref[neighbor] = true;
                visited_fit[chosen] = true;
                mapping.insert(neighbor, chosen);
                stack.push((neighbor, chosen));
            }
        }
    }

    let n_ref = visited_ref.iter().filter(|&&v| v).count();
    let n_fit = visited_fit.iter().filter(|&&v| v).count();
    if mapping.is_empty() || n_ref != n_fit {
        log::warn!(
            "refinement abandoned: visited {} reference atoms vs {} fit atoms",
            n_ref,
            n_fit
        );
        return None;
    }

    Some(mapping)
}

/// A seed pair is a reference atom mapped to the same fit atom across every
/// candidate; such an atom is topologically unambiguous. The lowest-index
/// one is chosen for determinism.
fn find_seed(candidates: &[AtomMapping]) -> Option<(usize, usize)> {
    let first = candidates.first()?;
    first.iter().find_map(|(&r, &q)| {
        let unanimous = candidates[1..]
            .iter()
            .all(|c| c.get(&r) == Some(&q));
        unanimous.then_some((r, q))
    })
}
