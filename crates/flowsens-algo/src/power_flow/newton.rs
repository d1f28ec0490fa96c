//! Newton-Raphson iterations on an [`EquationSystem`].

use super::SolverStatus;
use crate::config::NewtonRaphsonParameters;
use crate::equations::{EquationSystem, Term};
use crate::network::LfNetwork;
use flowsens_core::LinearSolver;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonRaphsonResult {
    pub status: SolverStatus,
    pub iterations: usize,
    /// Largest absolute equation mismatch at exit, per-unit.
    pub max_mismatch: f64,
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0f64, |acc, v| {
        if v.is_nan() {
            f64::NAN
        } else {
            acc.max(v.abs())
        }
    })
}

/// Iterate `J dx = -mismatch` until the largest mismatch drops below the
/// tolerance. The network state holds the last iterate on exit.
pub fn newton_raphson(
    net: &mut LfNetwork,
    system: &EquationSystem,
    solver: &dyn LinearSolver,
    params: &NewtonRaphsonParameters,
) -> NewtonRaphsonResult {
    newton_raphson_without(net, system, solver, params, &[])
}

/// Newton-Raphson on `system` as if the `removed` terms were not in it.
///
/// Post-contingency states iterate this way on the base system instead of
/// building a new one.
pub fn newton_raphson_without(
    net: &mut LfNetwork,
    system: &EquationSystem,
    solver: &dyn LinearSolver,
    params: &NewtonRaphsonParameters,
    removed: &[Term],
) -> NewtonRaphsonResult {
    let mut iterations = 0;
    loop {
        let mut mismatch = system.mismatch_without(net, removed);
        let max_mismatch = max_abs(&mismatch);
        tracing::debug!(
            component = net.num_sc,
            iteration = iterations,
            max_mismatch,
            "Newton-Raphson iteration"
        );
        if max_mismatch.is_nan() {
            tracing::warn!(component = net.num_sc, iterations, "non-finite mismatch");
            return NewtonRaphsonResult {
                status: SolverStatus::SolverFailed,
                iterations,
                max_mismatch,
            };
        }
        if max_mismatch < params.tolerance {
            return NewtonRaphsonResult {
                status: SolverStatus::Converged,
                iterations,
                max_mismatch,
            };
        }
        if iterations >= params.max_iterations {
            return NewtonRaphsonResult {
                status: SolverStatus::MaxIterationReached,
                iterations,
                max_mismatch,
            };
        }

        let jacobian = system.jacobian_without(net, removed);
        for m in mismatch.iter_mut() {
            *m = -*m;
        }
        let solved = solver
            .factorize(&jacobian)
            .and_then(|lu| lu.solve_in_place(&mut mismatch));
        if let Err(err) = solved {
            tracing::warn!(component = net.num_sc, iterations, error = %err, "Jacobian solve failed");
            return NewtonRaphsonResult {
                status: SolverStatus::SolverFailed,
                iterations,
                max_mismatch,
            };
        }
        system.apply_increment(net, &mismatch);
        iterations += 1;
    }
}
