//! Low-rank compensation of removed equation terms.
//!
//! Removing a branch (or a shunt, or an emulated HVDC link) from a component
//! drops a handful of terms from the equations. Each term `t` enters the rows
//! listed by `u_t` with a gradient `w_t`, so the post-outage Jacobian is
//!
//! ```text
//! J' = J - U Wᵀ
//! ```
//!
//! and the Woodbury identity gives its inverse from the base factorization:
//!
//! ```text
//! J'⁻¹ b = y + Z (I - Wᵀ Z)⁻¹ Wᵀ y,   y = J⁻¹ b,   Z = J⁻¹ U
//! ```
//!
//! `I - Wᵀ Z` is small (one row per removed term) and is factorized once per
//! state through the same [`LinearSolver`].

use crate::equations::{EquationSystem, Term};
use crate::network::LfNetwork;
use flowsens_core::{Factorization, LinearSolveError, LinearSolver};
use sprs::TriMat;

pub struct Compensation {
    /// Gradient of each removed term, by column.
    w: Vec<Vec<(usize, f64)>>,
    /// `J⁻¹ u_t`, dense.
    z: Vec<Vec<f64>>,
    m: Option<Box<dyn Factorization>>,
}

impl std::fmt::Debug for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compensation").field("rank", &self.rank()).finish()
    }
}

impl Compensation {
    /// Prepare the compensation of `terms` at the current network state.
    /// Terms absent from the system are ignored.
    pub fn new(
        system: &EquationSystem,
        net: &LfNetwork,
        lu: &dyn Factorization,
        solver: &dyn LinearSolver,
        terms: &[Term],
    ) -> Result<Self, LinearSolveError> {
        let n = system.len();
        let mut w = Vec::with_capacity(terms.len());
        let mut z = Vec::with_capacity(terms.len());
        for term in terms {
            let rows = system.term_rows(term);
            if rows.is_empty() {
                continue;
            }
            let mut u = vec![0.0; n];
            for &(row, coefficient) in rows {
                u[row] += coefficient;
            }
            lu.solve_in_place(&mut u)?;
            z.push(u);
            w.push(system.term_gradient(net, term));
        }

        let k = w.len();
        if k == 0 {
            return Ok(Self { w, z, m: None });
        }
        let mut tri = TriMat::new((k, k));
        for (i, wi) in w.iter().enumerate() {
            tri.add_triplet(i, i, 1.0);
            for (j, zj) in z.iter().enumerate() {
                let dot: f64 = wi.iter().map(|&(col, d)| d * zj[col]).sum();
                if dot != 0.0 {
                    tri.add_triplet(i, j, -dot);
                }
            }
        }
        let m = solver.factorize(&tri.to_csc())?;
        Ok(Self { w, z, m: Some(m) })
    }

    /// Number of compensated terms.
    pub fn rank(&self) -> usize {
        self.w.len()
    }

    /// Turn `y = J⁻¹ b` into `J'⁻¹ b` in place.
    pub fn apply(&self, y: &mut [f64]) -> Result<(), LinearSolveError> {
        let Some(m) = &self.m else {
            return Ok(());
        };
        let mut c: Vec<f64> = self
            .w
            .iter()
            .map(|wi| wi.iter().map(|&(col, d)| d * y[col]).sum())
            .collect();
        m.solve_in_place(&mut c)?;
        for (zj, cj) in self.z.iter().zip(c) {
            if cj == 0.0 {
                continue;
            }
            for (yi, zji) in y.iter_mut().zip(zj) {
                *yi += zji * cj;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equations::TermContext;
    use crate::test_utils::meshed_network;
    use flowsens_core::GaussSolver;

    fn dc_network() -> LfNetwork {
        let mut net = meshed_network();
        net.buses[0].slack = true;
        net.buses[0].reference = true;
        net.slack_buses = vec![0];
        net.reference_bus = Some(0);
        net.slack_weights = vec![1.0];
        net
    }

    fn solve(net: &LfNetwork) -> Vec<f64> {
        let system = EquationSystem::build_dc(net, TermContext::default()).unwrap();
        GaussSolver
            .solve(&system.jacobian(net), &system.targets(net))
            .unwrap()
    }

    #[test]
    fn compensated_solve_matches_rebuilt_system() {
        let net = dc_network();
        let system = EquationSystem::build_dc(&net, TermContext::default()).unwrap();
        let lu = GaussSolver.factorize(&system.jacobian(&net)).unwrap();
        // L12 sits on the 1-2-3 cycle
        let removed = system.branch_terms(1);
        assert_eq!(removed.len(), 2);
        let comp = Compensation::new(&system, &net, lu.as_ref(), &GaussSolver, &removed).unwrap();
        assert_eq!(comp.rank(), 2);

        let mut x = system.targets(&net);
        lu.solve_in_place(&mut x).unwrap();
        comp.apply(&mut x).unwrap();

        let mut outage = dc_network();
        outage.branches[1].disabled = true;
        let expected = solve(&outage);
        for (a, b) in x.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-10, "{a} vs {b}");
        }
    }

    #[test]
    fn no_terms_is_identity() {
        let net = dc_network();
        let system = EquationSystem::build_dc(&net, TermContext::default()).unwrap();
        let lu = GaussSolver.factorize(&system.jacobian(&net)).unwrap();
        let comp = Compensation::new(&system, &net, lu.as_ref(), &GaussSolver, &[]).unwrap();
        let mut y = vec![1.0, 2.0, 3.0, 4.0];
        comp.apply(&mut y).unwrap();
        assert_eq!(y, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn bridge_removal_is_singular() {
        let net = dc_network();
        let system = EquationSystem::build_dc(&net, TermContext::default()).unwrap();
        let lu = GaussSolver.factorize(&system.jacobian(&net)).unwrap();
        let removed = system.branch_terms(0);
        assert!(Compensation::new(&system, &net, lu.as_ref(), &GaussSolver, &removed).is_err());
    }
}
