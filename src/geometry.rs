//! Geometric primitives over 3D points.
//!
//! Pure numeric functions shared by the alignment engines and the constraint
//! renderers: interatomic distance, angle, dihedral, and the RMS deviation of
//! intramolecular distances used as a chirality-insensitive alignment score.
//!
//! Angles and dihedrals are returned in radians. The cosine argument is
//! clamped to [-1, 1] before `acos` so that floating-point overshoot near
//! linear configurations cannot produce NaN.

use nalgebra::Vector3;
use thiserror::Error;

/// Error type for geometric computations.
#[derive(Error, Debug)]
pub enum GeometryError {
    /// Two point lists that must have equal length did not.
    #[error("dimension mismatch: first list has {0} points, second has {1}")]
    DimensionMismatch(usize, usize),
}

/// Distance between two points.
pub fn distance(a: Vector3<f64>, b: Vector3<f64>) -> f64 {
    (b - a).norm()
}

/// Angle at `b` formed by `a-b-c`, in radians.
pub fn angle(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> f64 {
    let ba = a - b;
    let bc = c - b;
    let cos = ba.dot(&bc) / (ba.norm() * bc.norm());
    cos.clamp(-1.0, 1.0).acos()
}

/// Signed dihedral angle along `b-c` for the chain `a-b-c-d`, in radians.
///
/// The magnitude comes from the angle between the `a-b-c` and `b-c-d` plane
/// normals; the sign is the sign of the dot product of the first connecting
/// vector with the second plane normal.
pub fn dihedral(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>, d: Vector3<f64>) -> f64 {
    let b1 = b - a;
    let b2 = c - b;
    let b3 = d - c;

    let n1 = b1.cross(&b2);
    let n2 = b2.cross(&b3);

    let cos = n1.dot(&n2) / (n1.norm() * n2.norm());
    let phi = cos.clamp(-1.0, 1.0).acos();

    if b1.dot(&n2) < 0.0 {
        -phi
    } else {
        phi
    }
}

/// RMS deviation of intramolecular distances between two equal-length point
/// lists.
///
/// Computes `sum_{i<j} (d_a(i,j) - d_b(i,j))^2`, normalized by `2/(n(n-1))`,
/// square-rooted. Unlike a positional RMSD this metric compares only internal
/// distances, so it is invariant to rigid motion and to reflection; it is the
/// tie-breaker used when symmetry-equivalent atom mappings produce similar
/// superposition RMSDs.
///
/// Fails with [`GeometryError::DimensionMismatch`] when the lists differ in
/// length. Lists with fewer than two points have no internal distances and
/// score exactly zero.
pub fn rms_dev_intramolecular_distances(
    a: &[Vector3<f64>],
    b: &[Vector3<f64>],
) -> Result<f64, GeometryError> {
    if a.len() != b.len() {
        return Err(GeometryError::DimensionMismatch(a.len(), b.len()));
    }
    let n = a.len();
    if n < 2 {
        return Ok(0.0);
    }

    let mut sum = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            let da = distance(a[i], a[j]);
            let db = distance(b[i], b[j]);
            sum += (da - db) * (da - db);
        }
    }

    let norm = 2.0 / (n as f64 * (n - 1) as f64);
    Ok((sum * norm).sqrt())
}
