//! Alignment orchestrator: best atom mapping between two structures.
//!
//! Drives the full candidate-generation, superposition, scoring, and
//! refinement loop:
//!
//! 1. clone both inputs and strip bond order/stereo labels (matching must
//!    never be blocked by resonance notation; cloning keeps the caller's
//!    structures intact),
//! 2. collect candidate correspondences from the isomorphism adapter,
//! 3. superpose and score every candidate, keeping the strictly best one
//!    (ties keep the earliest-found mapping),
//! 4. refine the winner's mapping in 3D and re-score, for a fixed number of
//!    cycles or until no further improvement.
//!
//! Inputs are never mutated; the returned [`AlignmentResult`] owns aligned
//! snapshots of both structures.

use crate::geometry::{rms_dev_intramolecular_distances, GeometryError};
use crate::kabsch::{superpose, KabschError};
use crate::mcs::{candidate_mappings, AtomMapping, CommonSubgraphSolver, McsError, McsOptions};
use crate::refine::refine_mapping;
use crate::structure::Structure;
use thiserror::Error;

/// Error type for alignment runs.
#[derive(Error, Debug)]
pub enum AlignError {
    /// The reference holds more atoms than the structure to align; the
    /// engine requires reference atoms to be a subset of the query.
    #[error(
        "reference has {reference} atoms but the structure to align has only {query}; \
         the reference must not be larger"
    )]
    SizeMismatch {
        /// Atom count of the reference structure.
        reference: usize,
        /// Atom count of the structure to align.
        query: usize,
    },
    /// Candidate-mapping generation failed.
    #[error(transparent)]
    Mcs(#[from] McsError),
    /// Rigid superposition failed.
    #[error(transparent)]
    Kabsch(#[from] KabschError),
    /// Score computation failed.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Which scalar decides between candidate mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMode {
    /// Superposition RMSD over the mapped subset.
    Rmsd,
    /// RMS deviation of intramolecular distances; insensitive to reflection
    /// ambiguities that RMSD reacts to.
    IntramolecularDistances,
}

/// Options for an alignment run.
#[derive(Debug, Clone)]
pub struct AlignOptions {
    /// Scoring rule applied to initial and refined candidates alike.
    pub scoring: ScoringMode,
    /// Refinement cycle budget; each cycle is bounded by
    /// O(atoms x candidates).
    pub refinement_cycles: usize,
    /// Candidate-generation options.
    pub mcs: McsOptions,
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self {
            scoring: ScoringMode::Rmsd,
            refinement_cycles: 2,
            mcs: McsOptions::default(),
        }
    }
}

/// Immutable outcome of one alignment run.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// Snapshot of the (normalized) reference structure.
    pub reference: Structure,
    /// Snapshot of the fitted structure, rotated/translated into the
    /// reference frame.
    pub aligned: Structure,
    /// The atom correspondence used for the superposition.
    pub mapping: AtomMapping,
    /// Superposition RMSD over the mapped subset.
    pub rmsd: f64,
    /// RMS deviation of intramolecular distances over the mapped subset.
    pub rms_intramolecular: f64,
}

impl AlignmentResult {
    fn score(&self, mode: ScoringMode) -> f64 {
        match mode {
            ScoringMode::Rmsd => self.rmsd,
            ScoringMode::IntramolecularDistances => self.rms_intramolecular,
        }
    }
}

/// Aligns `structure` onto `reference` and returns the best result found.
///
/// The reference must not hold more atoms than `structure`
/// ([`AlignError::SizeMismatch`] otherwise). Inputs are cloned before the
/// destructive bond-order normalization, so callers keep their originals.
pub fn align_geometries(
    reference: &Structure,
    structure: &Structure,
    options: &AlignOptions,
) -> Result<AlignmentResult, AlignError> {
    if reference.num_atoms() > structure.num_atoms() {
        return Err(AlignError::SizeMismatch {
            reference: reference.num_atoms(),
            query: structure.num_atoms(),
        });
    }

    let mut reference = reference.clone();
    reference.normalize_bond_orders();
    let mut fitted = structure.clone();
    fitted.normalize_bond_orders();

    let solver = CommonSubgraphSolver;
    let mut pool = candidate_mappings(&solver, &reference, &fitted, &options.mcs)?;

    let mut best = evaluate(&reference, &fitted, &pool[0], options)?;
    for mapping in &pool[1..] {
        let result = evaluate(&reference, &fitted, mapping, options)?;
        if result.score(options.scoring) < best.score(options.scoring) {
            best = result;
        }
    }

    for cycle in 0..options.refinement_cycles {
        let Some(refined) = refine_mapping(&reference, &best.aligned, &pool) else {
            break;
        };
        if pool.contains(&refined) {
            log::trace!("refinement cycle {} reproduced a known mapping", cycle);
            break;
        }
        let result = evaluate(&reference, &fitted, &refined, options)?;
        pool.push(refined);
        if result.score(options.scoring) < best.score(options.scoring) {
            best = result;
        } else {
            break;
        }
    }

    log::debug!(
        "alignment '{}' vs '{}': best mapping of {} atoms, rmsd {:.6}, intramolecular dev {:.6}",
        best.reference.title,
        best.aligned.title,
        best.mapping.len(),
        best.rmsd,
        best.rms_intramolecular
    );
    Ok(best)
}

/// Best atom-index mapping from `a` onto `b`, using default options.
///
/// Keys are atom indices in `a`, values atom indices in `b`.
pub fn best_atom_mapping(a: &Structure, b: &Structure) -> Result<AtomMapping, AlignError> {
    let result = align_geometries(a, b, &AlignOptions::default())?;
    Ok(result.mapping)
}

fn evaluate(
    reference: &Structure,
    fitted: &Structure,
    mapping: &AtomMapping,
    options: &AlignOptions,
) -> Result<AlignmentResult, AlignError> {
    let (aligned, superposition) = superpose(reference, fitted, mapping)?;

    let ref_pts: Vec<_> = mapping
        .keys()
        .map(|&r| reference.atoms()[r].position_vector())
        .collect();
    let fit_pts: Vec<_> = mapping
        .values()
        .map(|&q| aligned.atoms()[q].position_vector())
        .collect();
    let rms_intramolecular = rms_dev_intramolecular_distances(&ref_pts, &fit_pts)?;

    log::trace!(
        "candidate mapping of {} atoms: rmsd {:.6}, intramolecular dev {:.6}",
        mapping.len(),
        superposition.rmsd,
        rms_intramolecular
    );

    Ok(AlignmentResult {
        reference: reference.clone(),
        aligned,
        mapping: mapping.clone(),
        rmsd: superposition.rmsd,
        rms_intramolecular,
    })
}
