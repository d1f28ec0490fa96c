//! Load flow on the per-unit networks.
//!
//! - [`newton`]: Newton-Raphson iterations on an equation system
//! - [`outer_loop`]: slack distribution, reactive limits and discrete controls
//!   checked between Newton-Raphson runs
//! - [`ac`] / [`dc`]: one component solve, AC or linear DC
//! - [`update`]: write-back of a converged component into the grid
//!
//! [`LoadFlow`] ties them together: it builds one network per synchronous
//! component, solves the components in parallel and writes the converged ones
//! back through [`StateSink`](flowsens_core::StateSink).

pub mod ac;
pub mod dc;
pub mod newton;
pub mod outer_loop;
pub mod result;
pub mod update;

pub use ac::solve_ac;
pub use dc::solve_dc;
pub use newton::{newton_raphson, newton_raphson_without, NewtonRaphsonResult};
pub use outer_loop::{OuterLoop, OuterLoopStatus};
pub use result::{BranchFlow, BranchResult, BusResult, ComponentResult, LoadFlowResult};
pub use update::update_state;

use crate::config::LoadFlowParameters;
use crate::network::{build_networks, LfNetwork, NetworkPostProcessor};
use flowsens_core::{Grid, GridResult, LinearSolver};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolverStatus {
    Converged,
    MaxIterationReached,
    SolverFailed,
    /// Nothing to solve: no enabled bus or no reference bus.
    NoCalculation,
}

/// Configured load flow runner.
pub struct LoadFlow {
    params: LoadFlowParameters,
    solver: Arc<dyn LinearSolver>,
    processors: Vec<Box<dyn NetworkPostProcessor>>,
}

impl LoadFlow {
    pub fn new(params: LoadFlowParameters) -> Self {
        let solver = params.linear_solver.build_solver();
        Self {
            params,
            solver,
            processors: Vec::new(),
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn LinearSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_post_processor(mut self, processor: Box<dyn NetworkPostProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn parameters(&self) -> &LoadFlowParameters {
        &self.params
    }

    pub fn solver(&self) -> &Arc<dyn LinearSolver> {
        &self.solver
    }

    pub fn build(&self, grid: &Grid) -> GridResult<Vec<LfNetwork>> {
        build_networks(grid, &self.params, &self.processors)
    }

    /// Solve one network in place.
    pub fn solve(&self, net: &mut LfNetwork) -> GridResult<ComponentResult> {
        if self.params.dc {
            solve_dc(net, &self.params, self.solver.as_ref())
        } else {
            solve_ac(net, &self.params, self.solver.as_ref())
        }
    }

    /// Solve every network, in parallel. Results keep the network order.
    pub fn run_on(&self, networks: &mut [LfNetwork]) -> GridResult<LoadFlowResult> {
        let components = networks
            .par_iter_mut()
            .map(|net| self.solve(net))
            .collect::<GridResult<Vec<_>>>()?;
        Ok(LoadFlowResult { components })
    }

    /// Build, solve and write converged components back into `grid`.
    pub fn run(&self, grid: &mut Grid) -> GridResult<LoadFlowResult> {
        let mut networks = self.build(grid)?;
        tracing::info!(
            grid = %grid.id,
            components = networks.len(),
            dc = self.params.dc,
            "running load flow"
        );
        let result = self.run_on(&mut networks)?;
        for (net, component) in networks.iter().zip(&result.components) {
            update_state(net, component, grid, net.is_main())?;
        }
        Ok(result)
    }
}

/// One-shot load flow with the solver named in the parameters.
pub fn run_load_flow(grid: &mut Grid, params: &LoadFlowParameters) -> GridResult<LoadFlowResult> {
    LoadFlow::new(params.clone()).run(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectedComponentMode;
    use crate::test_utils::{two_bus_grid, two_island_grid};
    use flowsens_core::Side;

    #[test]
    fn two_bus_grid_state_is_written() {
        let mut grid = two_bus_grid();
        let result = run_load_flow(&mut grid, &LoadFlowParameters::default()).unwrap();
        assert!(result.is_ok());
        let flow = grid.state.flow("L12", Side::One).unwrap();
        assert!(flow.p > 199.0 && flow.p < 201.0);
        assert!(grid.state.buses.values().all(|b| b.v.0 > 0.0));
    }

    #[test]
    fn islands_are_solved_separately() {
        let mut grid = two_island_grid();
        let params = LoadFlowParameters::default()
            .with_dc(true)
            .with_connected_component_mode(ConnectedComponentMode::All);
        let result = run_load_flow(&mut grid, &params).unwrap();
        assert_eq!(result.components.len(), 2);
        assert!(result
            .components
            .iter()
            .all(|c| c.status == SolverStatus::Converged));
        assert_eq!(result.components[0].num_sc, 0);
    }
}
