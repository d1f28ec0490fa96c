use faer::prelude::*;
use faer::sparse::solvers::{Lu, SymbolicLu};
use faer::sparse::{LuError, SparseColMatRef, SymbolicSparseColMatRef};
use sprs::CsMat;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinearSolveError {
    #[error("matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("rhs length ({actual}) does not match matrix dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("singular matrix (pivot {0})")]
    Singular(usize),

    #[error("solution contains non-finite values")]
    NonFinite,

    #[error("factorization failed: {0}")]
    Backend(String),
}

/// Factorized matrix, reusable across right-hand sides.
pub trait Factorization: Send + Sync {
    fn dim(&self) -> usize;

    fn solve_in_place(&self, rhs: &mut [f64]) -> Result<(), LinearSolveError>;

    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, LinearSolveError> {
        let mut x = rhs.to_vec();
        self.solve_in_place(&mut x)?;
        Ok(x)
    }
}

/// Injected sparse linear-solve capability.
///
/// Implementations hold no state between calls, so one instance can be shared
/// by threads solving different network components.
pub trait LinearSolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn factorize(&self, matrix: &CsMat<f64>) -> Result<Box<dyn Factorization>, LinearSolveError>;

    /// Solve `A x = b` once.
    fn solve(&self, matrix: &CsMat<f64>, rhs: &[f64]) -> Result<Vec<f64>, LinearSolveError> {
        self.factorize(matrix)?.solve(rhs)
    }
}

fn check_square(matrix: &CsMat<f64>) -> Result<usize, LinearSolveError> {
    let (rows, cols) = matrix.shape();
    if rows != cols {
        return Err(LinearSolveError::NotSquare { rows, cols });
    }
    Ok(rows)
}

fn check_rhs(n: usize, rhs: &[f64]) -> Result<(), LinearSolveError> {
    if rhs.len() != n {
        return Err(LinearSolveError::DimensionMismatch {
            expected: n,
            actual: rhs.len(),
        });
    }
    Ok(())
}

/// Row-major dense copy of a sparse matrix.
fn to_dense(matrix: &CsMat<f64>, n: usize) -> Vec<f64> {
    let mut dense = vec![0.0; n * n];
    for (&value, (row, col)) in matrix.iter() {
        dense[row * n + col] += value;
    }
    dense
}

/// Dense LU with partial pivoting, written out by hand.
#[derive(Debug, Clone, Default)]
pub struct GaussSolver;

#[derive(Debug, Clone)]
struct GaussLu {
    n: usize,
    lu: Vec<f64>,
    perm: Vec<usize>,
}

impl LinearSolver for GaussSolver {
    fn name(&self) -> &'static str {
        "gauss"
    }

    fn factorize(&self, matrix: &CsMat<f64>) -> Result<Box<dyn Factorization>, LinearSolveError> {
        let n = check_square(matrix)?;
        let mut a = to_dense(matrix, n);
        let mut perm: Vec<usize> = (0..n).collect();

        for k in 0..n {
            let mut pivot = k;
            for row in k + 1..n {
                if a[row * n + k].abs() > a[pivot * n + k].abs() {
                    pivot = row;
                }
            }
            if a[pivot * n + k].abs() < 1e-12 {
                return Err(LinearSolveError::Singular(k));
            }
            if pivot != k {
                for col in 0..n {
                    a.swap(k * n + col, pivot * n + col);
                }
                perm.swap(k, pivot);
            }
            let diag = a[k * n + k];
            for row in k + 1..n {
                let factor = a[row * n + k] / diag;
                a[row * n + k] = factor;
                if factor == 0.0 {
                    continue;
                }
                for col in k + 1..n {
                    a[row * n + col] -= factor * a[k * n + col];
                }
            }
        }

        Ok(Box::new(GaussLu { n, lu: a, perm }))
    }
}

impl Factorization for GaussLu {
    fn dim(&self) -> usize {
        self.n
    }

    fn solve_in_place(&self, rhs: &mut [f64]) -> Result<(), LinearSolveError> {
        let n = self.n;
        check_rhs(n, rhs)?;
        let mut y: Vec<f64> = self.perm.iter().map(|&p| rhs[p]).collect();
        for i in 0..n {
            let mut sum = y[i];
            for j in 0..i {
                sum -= self.lu[i * n + j] * y[j];
            }
            y[i] = sum;
        }
        for i in (0..n).rev() {
            let mut sum = y[i];
            for j in i + 1..n {
                sum -= self.lu[i * n + j] * y[j];
            }
            y[i] = sum / self.lu[i * n + i];
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(LinearSolveError::NonFinite);
        }
        rhs.copy_from_slice(&y);
        Ok(())
    }
}

/// First row or column without a non-zero entry.
fn empty_line(matrix: &CsMat<f64>, n: usize) -> Option<usize> {
    let mut rows = vec![false; n];
    let mut cols = vec![false; n];
    for (&value, (row, col)) in matrix.iter() {
        if value != 0.0 {
            rows[row] = true;
            cols[col] = true;
        }
    }
    (0..n).find(|&i| !rows[i] || !cols[i])
}

/// Sparse LU with partial pivoting from `faer`. Works on the compressed
/// columns directly, never on a dense copy.
#[derive(Debug, Clone, Default)]
pub struct FaerSolver;

struct FaerLu {
    n: usize,
    /// `None` for an empty system.
    lu: Option<Lu<usize, f64>>,
}

impl LinearSolver for FaerSolver {
    fn name(&self) -> &'static str {
        "faer"
    }

    fn factorize(&self, matrix: &CsMat<f64>) -> Result<Box<dyn Factorization>, LinearSolveError> {
        let n = check_square(matrix)?;
        if n == 0 {
            return Ok(Box::new(FaerLu { n, lu: None }));
        }
        if let Some(i) = empty_line(matrix, n) {
            return Err(LinearSolveError::Singular(i));
        }
        let owned;
        let csc = if matrix.is_csc() {
            matrix
        } else {
            owned = matrix.to_csc();
            &owned
        };
        let indptr = csc.indptr();
        let col_ptrs = indptr.to_proper();
        let symbolic = SymbolicSparseColMatRef::new_checked(n, n, &col_ptrs, None, csc.indices());
        let mat = SparseColMatRef::<usize, f64>::new(symbolic, csc.data());
        let symbolic_lu =
            SymbolicLu::try_new(symbolic).map_err(|err| LinearSolveError::Backend(format!("{err:?}")))?;
        let lu = Lu::try_new_with_symbolic(symbolic_lu, mat).map_err(|err| match err {
            LuError::SymbolicSingular(i) => LinearSolveError::Singular(i),
            LuError::Generic(err) => LinearSolveError::Backend(format!("{err:?}")),
        })?;
        Ok(Box::new(FaerLu { n, lu: Some(lu) }))
    }
}

impl Factorization for FaerLu {
    fn dim(&self) -> usize {
        self.n
    }

    fn solve_in_place(&self, rhs: &mut [f64]) -> Result<(), LinearSolveError> {
        check_rhs(self.n, rhs)?;
        let Some(lu) = &self.lu else {
            return Ok(());
        };
        lu.solve_in_place(faer::mat::from_column_major_slice_mut::<f64>(rhs, self.n, 1));
        // a zero pivot shows up as inf or NaN in the solution
        if rhs.iter().any(|v| !v.is_finite()) {
            return Err(LinearSolveError::NonFinite);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn matrix(entries: &[(usize, usize, f64)], n: usize) -> CsMat<f64> {
        let mut tri = TriMat::new((n, n));
        for &(i, j, v) in entries {
            tri.add_triplet(i, j, v);
        }
        tri.to_csc()
    }

    #[test]
    fn both_backends_solve_pivoting_system() {
        // first pivot is zero, forces a row swap
        let a = matrix(&[(0, 1, 1.0), (1, 0, 2.0), (1, 1, 1.0)], 2);
        let rhs = [3.0, 5.0];
        for solver in [&GaussSolver as &dyn LinearSolver, &FaerSolver] {
            let x = solver.solve(&a, &rhs).unwrap();
            assert!((x[0] - 1.0).abs() < 1e-12, "{}", solver.name());
            assert!((x[1] - 3.0).abs() < 1e-12, "{}", solver.name());
        }
    }

    #[test]
    fn factorization_is_reusable() {
        let a = matrix(&[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)], 2);
        for solver in [&GaussSolver as &dyn LinearSolver, &FaerSolver] {
            let lu = solver.factorize(&a).unwrap();
            let x1 = lu.solve(&[1.0, 2.0]).unwrap();
            let x2 = lu.solve(&[0.0, 1.0]).unwrap();
            assert!((4.0 * x1[0] + x1[1] - 1.0).abs() < 1e-12, "{}", solver.name());
            assert!((x2[0] + 3.0 * x2[1] - 1.0).abs() < 1e-12, "{}", solver.name());
        }
    }

    #[test]
    fn singular_matrix_is_reported() {
        let a = matrix(&[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0)], 2);
        assert!(matches!(
            GaussSolver.factorize(&a),
            Err(LinearSolveError::Singular(_))
        ));
        let b = matrix(&[(0, 0, 1.0)], 2);
        assert!(matches!(FaerSolver.factorize(&b), Err(LinearSolveError::Singular(1))));
        assert!(FaerSolver.solve(&a, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn faer_reads_row_major_input() {
        let mut tri = TriMat::new((3, 3));
        for &(i, j, v) in &[(0, 0, 2.0), (0, 2, 1.0), (1, 1, 3.0), (2, 0, 1.0), (2, 2, 4.0)] {
            tri.add_triplet(i, j, v);
        }
        let csr: CsMat<f64> = tri.to_csr();
        let x = FaerSolver.solve(&csr, &[3.0, 3.0, 5.0]).unwrap();
        for (xi, expected) in x.iter().zip([1.0, 1.0, 1.0]) {
            assert!((xi - expected).abs() < 1e-12, "{x:?}");
        }
        let empty = TriMat::<f64>::new((0, 0)).to_csc();
        assert!(FaerSolver.solve(&empty, &[]).unwrap().is_empty());
    }

    #[test]
    fn dimension_checks() {
        let a = matrix(&[(0, 0, 1.0), (1, 1, 1.0)], 2);
        let lu = GaussSolver.factorize(&a).unwrap();
        assert!(matches!(
            lu.solve(&[1.0]),
            Err(LinearSolveError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        let mut tri = TriMat::new((2, 3));
        tri.add_triplet(0, 0, 1.0);
        let rect: CsMat<f64> = tri.to_csr();
        assert!(matches!(
            FaerSolver.factorize(&rect),
            Err(LinearSolveError::NotSquare { rows: 2, cols: 3 })
        ));
    }
}
