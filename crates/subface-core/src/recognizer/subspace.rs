//! Shared subspace math for the recognition strategies.
//!
//! PCA uses the snapshot (Gram-matrix) method: for N training images of
//! dimension D with N << D, the N x N Gram eigendecomposition yields the
//! same principal directions as the D x D covariance at a fraction of the
//! cost. LDA reduces the generalized scatter eigenproblem to a symmetric
//! one through the Cholesky factor of the within-class scatter.

use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};
use std::collections::BTreeSet;

/// Eigenvalues below this fraction of the largest are treated as noise.
const EIGENVALUE_FLOOR: f64 = 1e-10;

/// Stack flattened samples into an N x D row matrix.
pub fn to_row_matrix(samples: &[DVector<f64>]) -> DMatrix<f64> {
    let n = samples.len();
    let d = samples.first().map_or(0, |s| s.len());
    DMatrix::from_fn(n, d, |i, j| samples[i][j])
}

/// Number of distinct labels in a training set.
pub fn class_count(labels: &[i32]) -> usize {
    labels.iter().collect::<BTreeSet<_>>().len()
}

/// Result of a principal component analysis: per-column basis vectors in
/// sample space, the sample mean, and descending eigenvalues.
pub struct Pca {
    /// D x k matrix, one principal direction per column, unit length.
    pub basis: DMatrix<f64>,
    pub mean: DVector<f64>,
    pub eigenvalues: DVector<f64>,
}

/// Snapshot PCA over an N x D row matrix, retaining at most
/// `num_components` directions (further limited by the number of
/// non-degenerate eigenvalues).
pub fn pca(data: &DMatrix<f64>, num_components: usize) -> Pca {
    let n = data.nrows();
    let d = data.ncols();
    if n == 0 || d == 0 {
        return Pca {
            basis: DMatrix::zeros(d, 0),
            mean: DVector::zeros(d),
            eigenvalues: DVector::zeros(0),
        };
    }

    let mut mean = DVector::zeros(d);
    for j in 0..d {
        mean[j] = data.column(j).sum() / n as f64;
    }

    let mut centered = data.clone();
    for i in 0..n {
        for j in 0..d {
            centered[(i, j)] -= mean[j];
        }
    }

    // N x N Gram matrix; its eigenvectors map back to sample space as
    // centered^T * v.
    let gram = &centered * centered.transpose();
    let eig = SymmetricEigen::new(gram);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .partial_cmp(&eig.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let floor = eig.eigenvalues[order[0]].abs().max(1.0) * EIGENVALUE_FLOOR;
    let k = num_components.min(n);

    let mut columns = Vec::with_capacity(k);
    let mut eigenvalues = Vec::with_capacity(k);
    for &idx in order.iter().take(k) {
        let lambda = eig.eigenvalues[idx];
        if lambda <= floor {
            break;
        }
        let v = eig.eigenvectors.column(idx);
        let mut direction: DVector<f64> = centered.transpose() * v;
        let norm = direction.norm();
        if norm <= f64::EPSILON {
            continue;
        }
        direction /= norm;
        columns.push(direction);
        eigenvalues.push(lambda);
    }

    let basis = if columns.is_empty() {
        DMatrix::zeros(d, 0)
    } else {
        DMatrix::from_columns(&columns)
    };

    Pca {
        basis,
        mean,
        eigenvalues: DVector::from_vec(eigenvalues),
    }
}

/// Project a sample into the subspace spanned by `basis` after removing
/// the mean.
pub fn project(basis: &DMatrix<f64>, mean: &DVector<f64>, sample: &DVector<f64>) -> DVector<f64> {
    basis.transpose() * (sample - mean)
}

/// Result of a linear discriminant analysis in an already-reduced space.
pub struct Lda {
    /// p x k matrix of discriminant directions, one per column.
    pub basis: DMatrix<f64>,
    pub eigenvalues: DVector<f64>,
}

/// Fisher LDA over an N x p row matrix with one label per row, retaining
/// at most `num_components` discriminants (bounded by C - 1).
///
/// Returns `None` when the within-class scatter cannot be factored even
/// after regularization, which only happens for degenerate inputs.
pub fn lda(data: &DMatrix<f64>, labels: &[i32], num_components: usize) -> Option<Lda> {
    let n = data.nrows();
    let p = data.ncols();
    debug_assert_eq!(n, labels.len());

    let classes: BTreeSet<i32> = labels.iter().copied().collect();
    let c = classes.len();
    if c < 2 || n == 0 {
        return None;
    }

    let mut total_mean = DVector::zeros(p);
    for i in 0..n {
        total_mean += data.row(i).transpose();
    }
    total_mean /= n as f64;

    let mut sw = DMatrix::<f64>::zeros(p, p);
    let mut sb = DMatrix::<f64>::zeros(p, p);

    for &class in &classes {
        let members: Vec<usize> = (0..n).filter(|&i| labels[i] == class).collect();
        let count = members.len() as f64;

        let mut class_mean = DVector::zeros(p);
        for &i in &members {
            class_mean += data.row(i).transpose();
        }
        class_mean /= count;

        for &i in &members {
            let diff = data.row(i).transpose() - &class_mean;
            sw += &diff * diff.transpose();
        }

        let between = &class_mean - &total_mean;
        sb += count * (&between * between.transpose());
    }

    // Regularize Sw just enough to make the Cholesky factorization
    // succeed when a class has near-zero scatter.
    let mut ridge = 0.0;
    let chol = loop {
        let candidate = &sw + DMatrix::identity(p, p) * ridge;
        match Cholesky::new(candidate) {
            Some(c) => break c,
            None if ridge < 1e-3 => {
                ridge = if ridge == 0.0 { 1e-12 } else { ridge * 10.0 };
            }
            None => return None,
        }
    };

    // Sb w = lambda Sw w  <=>  (L^-1 Sb L^-T) u = lambda u,  w = L^-T u.
    let l = chol.l();
    let identity = DMatrix::identity(p, p);
    let l_inv = l.solve_lower_triangular(&identity)?;
    let mut reduced = &l_inv * &sb * l_inv.transpose();
    // Force exact symmetry before the symmetric solver.
    reduced = (&reduced + reduced.transpose()) * 0.5;

    let eig = SymmetricEigen::new(reduced);
    let mut order: Vec<usize> = (0..p).collect();
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .partial_cmp(&eig.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let k = num_components.min(c - 1).min(p);
    let mut columns = Vec::with_capacity(k);
    let mut eigenvalues = Vec::with_capacity(k);
    for &idx in order.iter().take(k) {
        let u = eig.eigenvectors.column(idx).into_owned();
        let mut w = l.transpose().solve_upper_triangular(&u)?;
        let norm = w.norm();
        if norm <= f64::EPSILON {
            continue;
        }
        w /= norm;
        columns.push(w);
        eigenvalues.push(eig.eigenvalues[idx]);
    }

    if columns.is_empty() {
        return None;
    }

    Some(Lda {
        basis: DMatrix::from_columns(&columns),
        eigenvalues: DVector::from_vec(eigenvalues),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_of(values: &[f64]) -> DVector<f64> {
        DVector::from_row_slice(values)
    }

    #[test]
    fn test_row_matrix_layout() {
        let m = to_row_matrix(&[vec_of(&[1.0, 2.0, 3.0]), vec_of(&[4.0, 5.0, 6.0])]);
        assert_eq!(m.nrows(), 2);
        assert_eq!(m.ncols(), 3);
        assert_eq!(m[(0, 1)], 2.0);
        assert_eq!(m[(1, 2)], 6.0);
    }

    #[test]
    fn test_class_count() {
        assert_eq!(class_count(&[0, 1, 0, 2, 1]), 3);
        assert_eq!(class_count(&[]), 0);
        assert_eq!(class_count(&[7, 7, 7]), 1);
    }

    #[test]
    fn test_pca_two_samples_single_direction() {
        // Two points span one direction; the basis must align with their
        // difference vector.
        let data = to_row_matrix(&[vec_of(&[0.0, 0.0, 0.0]), vec_of(&[2.0, 0.0, 0.0])]);
        let result = pca(&data, 2);

        assert_eq!(result.basis.ncols(), 1);
        assert!((result.mean[0] - 1.0).abs() < 1e-12);
        let direction = result.basis.column(0);
        assert!((direction[0].abs() - 1.0).abs() < 1e-9);
        assert!(direction[1].abs() < 1e-9);
    }

    #[test]
    fn test_pca_projection_preserves_pairwise_distance() {
        // Points in a 2-D affine subspace of a 5-D space keep their
        // geometry under a full-rank PCA projection.
        let a = vec_of(&[1.0, 0.0, 0.0, 2.0, 1.0]);
        let b = vec_of(&[0.0, 1.0, 0.0, 2.0, 1.0]);
        let c = vec_of(&[1.0, 1.0, 0.0, 2.0, 1.0]);
        let data = to_row_matrix(&[a.clone(), b.clone(), c.clone()]);
        let result = pca(&data, 3);

        let pa = project(&result.basis, &result.mean, &a);
        let pb = project(&result.basis, &result.mean, &b);
        let original = (&a - &b).norm();
        let projected = (&pa - &pb).norm();
        assert!(
            (original - projected).abs() < 1e-9,
            "distance {original} became {projected}"
        );
    }

    #[test]
    fn test_pca_component_clamp() {
        let data = to_row_matrix(&[
            vec_of(&[1.0, 0.0]),
            vec_of(&[0.0, 1.0]),
            vec_of(&[1.0, 1.0]),
        ]);
        let result = pca(&data, 100);
        // At most N components and at most the rank of the centered data.
        assert!(result.basis.ncols() <= 3);
        assert_eq!(result.basis.ncols(), result.eigenvalues.len());
    }

    #[test]
    fn test_pca_eigenvalues_descending() {
        let data = to_row_matrix(&[
            vec_of(&[10.0, 0.1, 0.0]),
            vec_of(&[-10.0, -0.1, 0.0]),
            vec_of(&[9.0, 0.2, 0.0]),
            vec_of(&[-9.0, -0.2, 0.0]),
        ]);
        let result = pca(&data, 4);
        for i in 1..result.eigenvalues.len() {
            assert!(result.eigenvalues[i] <= result.eigenvalues[i - 1]);
        }
    }

    #[test]
    fn test_lda_separates_two_clusters() {
        // Two classes separated along the first axis, with noise in the
        // second; the discriminant must be dominated by the first axis.
        let data = to_row_matrix(&[
            vec_of(&[0.0, 0.3]),
            vec_of(&[0.1, -0.2]),
            vec_of(&[-0.1, 0.1]),
            vec_of(&[5.0, 0.2]),
            vec_of(&[5.1, -0.3]),
            vec_of(&[4.9, 0.1]),
        ]);
        let labels = [0, 0, 0, 1, 1, 1];
        let result = lda(&data, &labels, 1).expect("lda should succeed");

        assert_eq!(result.basis.ncols(), 1);
        let w = result.basis.column(0);
        assert!(
            w[0].abs() > 10.0 * w[1].abs(),
            "discriminant not axis-aligned: {w:?}"
        );

        // Projections of the two classes must be well separated.
        let project_row = |i: usize| {
            let x = data.row(i).transpose();
            (result.basis.transpose() * x)[0]
        };
        let m0 = (project_row(0) + project_row(1) + project_row(2)) / 3.0;
        let m1 = (project_row(3) + project_row(4) + project_row(5)) / 3.0;
        assert!((m0 - m1).abs() > 1.0);
    }

    #[test]
    fn test_lda_single_class_rejected() {
        let data = to_row_matrix(&[vec_of(&[0.0, 1.0]), vec_of(&[1.0, 0.0])]);
        assert!(lda(&data, &[3, 3], 1).is_none());
    }

    #[test]
    fn test_lda_component_bound() {
        // Three classes allow at most two discriminants.
        let data = to_row_matrix(&[
            vec_of(&[0.0, 0.0, 0.1]),
            vec_of(&[0.1, 0.0, 0.0]),
            vec_of(&[5.0, 0.0, 0.0]),
            vec_of(&[5.1, 0.1, 0.0]),
            vec_of(&[0.0, 5.0, 0.0]),
            vec_of(&[0.1, 5.1, 0.1]),
        ]);
        let labels = [0, 0, 1, 1, 2, 2];
        let result = lda(&data, &labels, 10).expect("lda should succeed");
        assert!(result.basis.ncols() <= 2);
    }
}
