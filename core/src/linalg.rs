//! Linear algebra helpers for fixed-capacity covariance matrices.
//!
//! Public API:
//!     pub fn matrix_square_root(matrix: &Matrix, dim: usize) -> Option<Matrix>
//!     pub fn spd_inverse(matrix: &Matrix, dim: usize) -> Option<Matrix>
//!     pub fn psd_floor(matrix: &Matrix, dim: usize) -> Option<Matrix>
//!
//! Internal pipeline (each step isolated for testing):
//!     - symmetrize()
//!     - padded()
//!     - chol_sqrt()
//!     - semidefinite_chol_sqrt()
//!
//! Strategy for the square root:
//! 1) Symmetrize P ← 0.5 (P + Pᵀ)
//! 2) Pad the inactive block with identity so the full-size decomposition is defined
//! 3) Cholesky
//! 4) Semidefinite Cholesky, clamping pivots that are zero up to round-off
//! 5) Give up: the matrix is indefinite or not finite
//!
//! Every matrix here is a [Matrix] of side [MAX_LENGTH] whose leading `dim×dim` block is the active matrix.
//! Results keep the inactive block at zero. Nothing in this module allocates.

use crate::error::{EstimatorError, Result};
use crate::{MAX_LENGTH, Matrix};

use nalgebra::linalg::{Cholesky, SymmetricEigen};

/// Size, relative to its own diagonal entry, below which a Cholesky pivot is treated as zero.
const PIVOT_TOLERANCE: f64 = 1e-12;
/// Size, relative to its own diagonal entry, below which a factored pivot marks a matrix as singular.
const SINGULAR_TOLERANCE: f64 = 1e-13;

/// Compute a square root `S` of the leading `dim×dim` block such that `matrix ≈ S * Sᵀ`.
///
/// Attempts a plain Cholesky decomposition first. If that fails (the matrix is only positive semi-definite, or
/// round-off pushed a pivot just below zero) a semidefinite Cholesky is tried that zeroes such pivots instead of
/// failing. The result is lower triangular in both cases.
///
/// # Arguments
/// * `matrix` - the matrix to find the square root of. It's assumed to be symmetric.
/// * `dim` - size of the active block
///
/// # Returns
/// * `Some(Matrix)` containing the lower triangular square root.
/// * `None` if the matrix is indefinite beyond round-off or contains non-finite entries.
pub fn matrix_square_root(matrix: &Matrix, dim: usize) -> Option<Matrix> {
    debug_assert!(dim <= MAX_LENGTH, "matrix_square_root: dim exceeds capacity");
    let p = padded(&symmetrize(matrix), dim);
    if !is_finite(&p) {
        return None;
    }
    if let Some(s) = chol_sqrt(&p, dim) {
        return Some(s);
    }
    semidefinite_chol_sqrt(&p, dim, PIVOT_TOLERANCE)
}

/// Invert the leading `dim×dim` block of a symmetric matrix.
///
/// Uses a Cholesky inverse when the matrix is positive definite and falls back to an LU inverse for symmetric
/// indefinite matrices. A positive semi-definite matrix with a pivot that vanishes relative to its own diagonal
/// entry is reported as singular, so matrices mixing large and small variances invert normally.
///
/// # Returns
/// * `Some(Matrix)` with the inverse in the active block and zeros elsewhere.
/// * `None` if the matrix is singular or the inverse is not finite.
pub fn spd_inverse(matrix: &Matrix, dim: usize) -> Option<Matrix> {
    debug_assert!(dim <= MAX_LENGTH, "spd_inverse: dim exceeds capacity");
    let a = padded(&symmetrize(matrix), dim);
    if !is_finite(&a) {
        return None;
    }
    let scale = max_diagonal(&a, dim);
    if scale == 0.0 {
        return None;
    }
    let inverse = match Cholesky::new(a) {
        Some(ch) => {
            let l = ch.l();
            if (0..dim).any(|i| l[(i, i)] * l[(i, i)] < SINGULAR_TOLERANCE * a[(i, i)]) {
                return None;
            }
            ch.inverse()
        }
        None => a.try_inverse()?,
    };
    if !is_finite(&inverse) {
        return None;
    }
    Some(truncate(inverse, dim))
}

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Simple matrix symmetrization function that reduces round-off errors associated
/// with floating point arithmetic.
#[inline]
pub fn symmetrize(m: &Matrix) -> Matrix {
    0.5 * (m + m.transpose())
}

/// Load a row-major `dim×dim` slice into the active block of a zeroed [Matrix].
///
/// The caller guarantees `values.len() == dim * dim`.
pub fn from_row_major(values: &[f64], dim: usize) -> Matrix {
    debug_assert_eq!(values.len(), dim * dim);
    let mut m = Matrix::zeros();
    for i in 0..dim {
        for j in 0..dim {
            m[(i, j)] = values[i * dim + j];
        }
    }
    m
}

/// Write a row-major diagonal matrix with the given variances into `out`.
///
/// Returns the number of values written (`variances.len()²`). Entries of `out` past that are left untouched.
pub fn diagonal(variances: &[f64], out: &mut [f64]) -> Result<usize> {
    let dim = variances.len();
    let len = dim * dim;
    if out.len() < len {
        return Err(EstimatorError::Dimension {
            what: "diagonal output buffer",
            expected: len,
            actual: out.len(),
        });
    }
    out[..len].fill(0.0);
    for (i, v) in variances.iter().enumerate() {
        out[i * dim + i] = *v;
    }
    Ok(len)
}

/// Repair a symmetric matrix that has lost positive semi-definiteness.
///
/// Eigenvalues of the active block below zero are floored at zero and the matrix is rebuilt:
/// P ← U max(Λ, 0) Uᵀ
///
/// # Returns
/// * `Some(Matrix)` with the repaired active block and zeros elsewhere.
/// * `None` if the matrix contains non-finite entries.
pub fn psd_floor(matrix: &Matrix, dim: usize) -> Option<Matrix> {
    let p = padded(&symmetrize(matrix), dim);
    if !is_finite(&p) {
        return None;
    }
    let se = SymmetricEigen::new(p);
    let lambdas = se.eigenvalues.map(|l| l.max(0.0));
    let u = se.eigenvectors;
    let repaired = u * Matrix::from_diagonal(&lambdas) * u.transpose();
    Some(truncate(symmetrize(&repaired), dim))
}

/// Copy the active block and place ones on the inactive diagonal.
fn padded(m: &Matrix, dim: usize) -> Matrix {
    let mut p = Matrix::identity();
    p.view_mut((0, 0), (dim, dim))
        .copy_from(&m.view((0, 0), (dim, dim)));
    p
}

/// Zero everything outside the active block.
fn truncate(mut m: Matrix, dim: usize) -> Matrix {
    for i in 0..MAX_LENGTH {
        for j in 0..MAX_LENGTH {
            if i >= dim || j >= dim {
                m[(i, j)] = 0.0;
            }
        }
    }
    m
}

fn is_finite(m: &Matrix) -> bool {
    m.iter().all(|v| v.is_finite())
}

fn max_diagonal(m: &Matrix, dim: usize) -> f64 {
    (0..dim).map(|i| m[(i, i)].abs()).fold(0.0, f64::max)
}

/// Plain Cholesky square root
///
/// Cholesky factorization that returns L such that P ≈ L Lᵀ, or None if it fails.
/// This is a quick way to initially attempt to calculate a matrix square root.
fn chol_sqrt(p: &Matrix, dim: usize) -> Option<Matrix> {
    Cholesky::new(*p).map(|ch| truncate(ch.l(), dim))
}

/// Cholesky factorization that tolerates zero pivots.
///
/// A pivot within `tolerance` of zero, relative to its own diagonal entry, produces a zero column, which is
/// exact for positive semi-definite matrices. The remaining entries of that column must then vanish as well,
/// relative to the geometric mean of the two diagonal entries; otherwise, or when a pivot is clearly negative, the
/// matrix is indefinite and None is returned. A floor of `tolerance²` times the largest diagonal entry absorbs
/// round-off on rows that are exactly zero.
fn semidefinite_chol_sqrt(p: &Matrix, dim: usize, tolerance: f64) -> Option<Matrix> {
    let absolute = tolerance * tolerance * max_diagonal(p, dim);
    let mut l = Matrix::zeros();
    for j in 0..dim {
        let floor = tolerance * p[(j, j)].abs() + absolute;
        let mut pivot = p[(j, j)];
        for k in 0..j {
            pivot -= l[(j, k)] * l[(j, k)];
        }
        if pivot < -floor {
            return None;
        }
        if pivot <= floor {
            for i in (j + 1)..dim {
                let mut r = p[(i, j)];
                for k in 0..j {
                    r -= l[(i, k)] * l[(j, k)];
                }
                let scale = (p[(i, i)].abs() * p[(j, j)].abs()).sqrt();
                if r.abs() > tolerance.sqrt() * scale + absolute {
                    return None;
                }
            }
            continue;
        }
        let root = pivot.sqrt();
        l[(j, j)] = root;
        for i in (j + 1)..dim {
            let mut r = p[(i, j)];
            for k in 0..j {
                r -= l[(i, k)] * l[(j, k)];
            }
            l[(i, j)] = r / root;
        }
    }
    Some(l)
}

/* =============================== Tests ==================================== */
