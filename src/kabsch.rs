//! Rigid alignment engine: least-squares superposition of mapped atom sets.
//!
//! Given a reference structure, a structure to fit, and one atom
//! correspondence, computes the classic Kabsch superposition: both mapped
//! point sets are centered on their centroids, the optimal rotation comes
//! from the SVD of the 3x3 cross-covariance matrix (with the usual
//! determinant correction so a reflection is never returned), and the
//! resulting rotation and translation are applied to the *whole* fitted
//! structure, not just the mapped atoms. The reported RMSD covers the mapped
//! subset only.
//!
//! The computation is deterministic for a given ordered correspondence.

use crate::mcs::AtomMapping;
use crate::structure::Structure;
use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

/// Error type for rigid superposition.
#[derive(Error, Debug)]
pub enum KabschError {
    /// A well-defined rotation needs at least three point pairs.
    #[error("mapping has {0} atom pairs; at least 3 are required")]
    TooFewPoints(usize),
    /// The mapping referenced an atom outside one of the structures.
    #[error("mapping references atom {index} outside structure with {num_atoms} atoms")]
    IndexOutOfRange {
        /// Offending atom index.
        index: usize,
        /// Number of atoms in the referenced structure.
        num_atoms: usize,
    },
    /// The SVD of the cross-covariance matrix did not converge.
    #[error("SVD of the cross-covariance matrix did not converge")]
    SvdFailed,
}

/// Rigid transform and score produced by a superposition.
#[derive(Debug, Clone)]
pub struct Superposition {
    /// Optimal rotation; `x' = R x + t`.
    pub rotation: Matrix3<f64>,
    /// Translation applied after rotation.
    pub translation: Vector3<f64>,
    /// RMSD over the mapped atom subset after superposition.
    pub rmsd: f64,
}

impl Superposition {
    /// Applies the transform to a single point.
    pub fn apply(&self, p: Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }
}

/// Superposes `fitted` onto `reference` using the given atom correspondence.
///
/// Returns the transformed copy of `fitted` (all atoms moved into the
/// reference frame) together with the transform and its RMSD. Neither input
/// is mutated.
pub fn superpose(
    reference: &Structure,
    fitted: &Structure,
    mapping: &AtomMapping,
) -> Result<(Structure, Superposition), KabschError> {
    if mapping.len() < 3 {
        return Err(KabschError::TooFewPoints(mapping.len()));
    }

    let mut ref_pts = Vec::with_capacity(mapping.len());
    let mut fit_pts = Vec::with_capacity(mapping.len());
    for (&r, &q) in mapping {
        ref_pts.push(checked_position(reference, r)?);
        fit_pts.push(checked_position(fitted, q)?);
    }

    let n = mapping.len() as f64;
    let centroid_ref: Vector3<f64> = ref_pts.iter().sum::<Vector3<f64>>() / n;
    let centroid_fit: Vector3<f64> = fit_pts.iter().sum::<Vector3<f64>>() / n;

    // Cross-covariance H = sum over pairs of (fit - cf)(ref - cr)^T.
    let mut h = Matrix3::zeros();
    for (rp, fp) in ref_pts.iter().zip(&fit_pts) {
        h += (fp - centroid_fit) * (rp - centroid_ref).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.ok_or(KabschError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(KabschError::SvdFailed)?;
    let mut v = v_t.transpose();

    // Reflection correction: flip the axis of the smallest singular value
    // when det(V U^T) is negative, so R stays a proper rotation.
    if (v * u.transpose()).determinant() < 0.0 {
        let flipped = -v.column(2);
        v.set_column(2, &flipped);
    }
    let rotation = v * u.transpose();
    let translation = centroid_ref - rotation * centroid_fit;

    let superposition = Superposition {
        rotation,
        translation,
        rmsd: 0.0,
    };

    let mut sum_sq = 0.0;
    for (rp, fp) in ref_pts.iter().zip(&fit_pts) {
        let moved = superposition.apply(*fp);
        sum_sq += (moved - rp).norm_squared();
    }
    let superposition = Superposition {
        rmsd: (sum_sq / n).sqrt(),
        ..superposition
    };

    let mut aligned = fitted.clone();
    for atom in aligned.atoms_mut() {
        let moved = superposition.apply(atom.position_vector());
        atom.set_position_vector(&moved);
    }

    Ok((aligned, superposition))
}

fn checked_position(structure: &Structure, index: usize) -> Result<Vector3<f64>, KabschError> {
    structure
        .atoms()
        .get(index)
        .map(|a| a.position_vector())
        .ok_or(KabschError::IndexOutOfRange {
            index,
            num_atoms: structure.num_atoms(),
        })
}
