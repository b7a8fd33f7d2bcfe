//! Sparse/dense symmetric linear solver wrapper (§4.2).
//!
//! Phase separation mirrors the original interface exactly: `set_pattern`
//! builds the symbolic sparsity (fixed vertices get an identity row so the
//! solve pins those DoFs), `update_a` accumulates numeric triplets into that
//! pattern, `analyze_pattern`/`factorize` split symbolic from numeric work,
//! and `solve` is a single triangular solve. Two implementations share the
//! trait (Design Note "Dense-vs-sparse solver"); `Optimizer` picks one via a
//! config flag, not a compile-time switch.

use std::collections::{BTreeSet, HashMap};

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use nalgebra_sparse::factorization::CscCholesky;

use crate::error::UvgamiError;

pub trait LinSysSolver {
    fn set_pattern(&mut self, v_neighbor: &[BTreeSet<usize>], fixed_vert: &BTreeSet<usize>);
    fn update_a(&mut self, triplets: &[(usize, usize, f64)]);
    fn analyze_pattern(&mut self) -> Result<(), UvgamiError>;
    fn factorize(&mut self) -> Result<(), UvgamiError>;
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, UvgamiError>;
}

/// Sparse simplicial Cholesky over `nalgebra_sparse`'s CSC format. The
/// "pattern" is just the vertex adjacency (doubled for 2 DoFs/vertex);
/// numeric values accumulate into a dense triplet buffer and get folded
/// into a fresh `CooMatrix` at `analyze_pattern`/`factorize` time, since
/// `nalgebra_sparse` doesn't expose an incremental update into an existing
/// factorization.
pub struct SparseSolver {
    dim: usize,
    fixed_dofs: BTreeSet<usize>,
    pattern: Vec<(usize, usize)>,
    values: HashMap<(usize, usize), f64>,
    chol: Option<CscCholesky<f64>>,
}

impl SparseSolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dim: 0,
            fixed_dofs: BTreeSet::new(),
            pattern: Vec::new(),
            values: HashMap::new(),
            chol: None,
        }
    }

    fn build_coo(&self) -> CooMatrix<f64> {
        let mut coo = CooMatrix::new(self.dim, self.dim);
        for &(i, j) in &self.pattern {
            if self.fixed_dofs.contains(&i) {
                if i == j {
                    coo.push(i, j, 1.0);
                }
                continue;
            }
            let v = self.values.get(&(i, j)).copied().unwrap_or(0.0);
            if v != 0.0 || i == j {
                coo.push(i, j, if i == j && v == 0.0 { 1e-10 } else { v });
            }
        }
        coo
    }
}

impl Default for SparseSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinSysSolver for SparseSolver {
    fn set_pattern(&mut self, v_neighbor: &[BTreeSet<usize>], fixed_vert: &BTreeSet<usize>) {
        let n = v_neighbor.len();
        self.dim = 2 * n;
        self.fixed_dofs = fixed_vert.iter().flat_map(|&v| [2 * v, 2 * v + 1]).collect();
        self.values.clear();

        let mut pairs = BTreeSet::new();
        for i in 0..n {
            for d0 in 0..2 {
                for d1 in 0..2 {
                    pairs.insert((2 * i + d0, 2 * i + d1));
                }
            }
            for &j in &v_neighbor[i] {
                for d0 in 0..2 {
                    for d1 in 0..2 {
                        pairs.insert((2 * i + d0, 2 * j + d1));
                    }
                }
            }
        }
        self.pattern = pairs.into_iter().collect();
    }

    fn update_a(&mut self, triplets: &[(usize, usize, f64)]) {
        for &(i, j, v) in triplets {
            if self.fixed_dofs.contains(&i) || self.fixed_dofs.contains(&j) {
                continue;
            }
            *self.values.entry((i, j)).or_insert(0.0) += v;
        }
    }

    fn analyze_pattern(&mut self) -> Result<(), UvgamiError> {
        // Symbolic-only analysis is folded into `factorize` for this
        // backend; nothing to precompute separately here.
        Ok(())
    }

    fn factorize(&mut self) -> Result<(), UvgamiError> {
        let coo = self.build_coo();
        let csc = CscMatrix::from(&coo);
        self.chol = Some(
            CscCholesky::factor(&csc)
                .map_err(|e| UvgamiError::FactorizationFailure(format!("{e:?}")))?,
        );
        Ok(())
    }

    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, UvgamiError> {
        let chol = self.chol.as_ref().ok_or(UvgamiError::PatternNotAnalyzed)?;
        let mut b = DMatrix::from_column_slice(self.dim, 1, rhs);
        for &i in &self.fixed_dofs {
            b[(i, 0)] = 0.0;
        }
        let x = chol.solve(&b);
        Ok(x.column(0).iter().copied().collect())
    }
}

/// Dense LDLᵀ fallback via `nalgebra`'s Cholesky, selected by `useDense`.
pub struct DenseSolver {
    dim: usize,
    fixed_dofs: BTreeSet<usize>,
    a: DMatrix<f64>,
    chol: Option<nalgebra::Cholesky<f64, nalgebra::Dyn>>,
}

impl DenseSolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dim: 0,
            fixed_dofs: BTreeSet::new(),
            a: DMatrix::zeros(0, 0),
            chol: None,
        }
    }
}

impl Default for DenseSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinSysSolver for DenseSolver {
    fn set_pattern(&mut self, v_neighbor: &[BTreeSet<usize>], fixed_vert: &BTreeSet<usize>) {
        let n = v_neighbor.len();
        self.dim = 2 * n;
        self.fixed_dofs = fixed_vert.iter().flat_map(|&v| [2 * v, 2 * v + 1]).collect();
        self.a = DMatrix::zeros(self.dim, self.dim);
    }

    fn update_a(&mut self, triplets: &[(usize, usize, f64)]) {
        for &(i, j, v) in triplets {
            if self.fixed_dofs.contains(&i) || self.fixed_dofs.contains(&j) {
                continue;
            }
            self.a[(i, j)] += v;
        }
    }

    fn analyze_pattern(&mut self) -> Result<(), UvgamiError> {
        Ok(())
    }

    fn factorize(&mut self) -> Result<(), UvgamiError> {
        let mut a = self.a.clone();
        for &i in &self.fixed_dofs {
            for j in 0..self.dim {
                a[(i, j)] = 0.0;
                a[(j, i)] = 0.0;
            }
            a[(i, i)] = 1.0;
        }
        for i in 0..self.dim {
            if a[(i, i)] == 0.0 && !self.fixed_dofs.contains(&i) {
                a[(i, i)] = 1e-10;
            }
        }
        self.chol = nalgebra::Cholesky::new(a);
        if self.chol.is_none() {
            return Err(UvgamiError::FactorizationFailure(
                "dense Cholesky factorization failed; matrix not SPD".into(),
            ));
        }
        Ok(())
    }

    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, UvgamiError> {
        let chol = self.chol.as_ref().ok_or(UvgamiError::PatternNotAnalyzed)?;
        let mut b = nalgebra::DVector::from_column_slice(rhs);
        for &i in &self.fixed_dofs {
            b[i] = 0.0;
        }
        let x = chol.solve(&b);
        Ok(x.iter().copied().collect())
    }
}
