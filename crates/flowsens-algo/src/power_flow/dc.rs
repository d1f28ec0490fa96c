//! DC load flow: one linear solve on the angle system.

use super::ac::distributed_active_power;
use super::outer_loop::{slack_mismatch, OuterLoop, OuterLoopStatus, PhaseControl};
use super::result::{collect_results, ComponentResult};
use super::SolverStatus;
use crate::config::LoadFlowParameters;
use crate::equations::{EquationSystem, TermContext};
use crate::network::LfNetwork;
use flowsens_core::{GridResult, LinearSolver};

/// Active power imbalance of a lossless component: what the slack would have
/// to produce, per-unit.
pub fn dc_imbalance(net: &LfNetwork) -> f64 {
    -net.enabled_buses().map(|b| net.bus_target_p(b.num)).sum::<f64>()
}

/// Solve the DC system in place, starting from flat angles.
pub(crate) fn solve_dc_state(
    net: &mut LfNetwork,
    system: &EquationSystem,
    solver: &dyn LinearSolver,
) -> SolverStatus {
    for bus in &mut net.buses {
        bus.angle = 0.0;
    }
    for branch in &mut net.branches {
        branch.dummy_p = 0.0;
    }
    let mut rhs: Vec<f64> = system.mismatch(net).into_iter().map(|m| -m).collect();
    let solved = solver
        .factorize(&system.jacobian(net))
        .and_then(|lu| lu.solve_in_place(&mut rhs));
    match solved {
        Ok(()) => {
            system.apply_increment(net, &rhs);
            SolverStatus::Converged
        }
        Err(err) => {
            tracing::warn!(component = net.num_sc, error = %err, "DC system solve failed");
            SolverStatus::SolverFailed
        }
    }
}

pub fn solve_dc(
    net: &mut LfNetwork,
    params: &LoadFlowParameters,
    solver: &dyn LinearSolver,
) -> GridResult<ComponentResult> {
    if net.enabled_bus_count() == 0 || net.reference_bus.is_none() {
        tracing::debug!(component = net.num_sc, "nothing to calculate");
        return Ok(ComponentResult::no_calculation(net));
    }
    let ctx = TermContext {
        dc_use_transformer_ratio: params.dc_use_transformer_ratio,
    };
    if params.distributed_slack {
        let outcome = net.distribute_active_power(params.balance_type, dc_imbalance(net));
        if outcome.remaining.abs() * net.base_power > params.slack_bus_p_max_mismatch {
            tracing::warn!(
                component = net.num_sc,
                remaining_mw = outcome.remaining * net.base_power,
                "imbalance left on the slack bus"
            );
        }
    }
    let system = EquationSystem::build_dc(net, ctx)?;
    let mut status = solve_dc_state(net, &system, solver);
    let mut outer_iterations = 0;
    // regulating phase shifters land on their closest tap, then the angles
    // are solved again with the shifts fixed
    if params.phase_shifter_regulation_on
        && status == SolverStatus::Converged
        && PhaseControl.check(net, params) == OuterLoopStatus::Unstable
    {
        let system = EquationSystem::build_dc(net, ctx)?;
        status = solve_dc_state(net, &system, solver);
        outer_iterations = 1;
    }

    let (buses, branches) = collect_results(net, true, ctx, params.dc_power_factor);
    let result = ComponentResult {
        num_cc: net.num_cc,
        num_sc: net.num_sc,
        status,
        iterations: usize::from(status == SolverStatus::Converged),
        outer_iterations,
        reference_bus_id: net.reference_bus.map(|b| net.buses[b].id.clone()),
        slack_bus_active_power_mismatch: slack_mismatch(net, true, ctx) * net.base_power,
        distributed_active_power: distributed_active_power(net) * net.base_power,
        buses,
        branches,
    };
    tracing::info!(
        component = net.num_sc,
        status = ?result.status,
        slack_mismatch_mw = result.slack_bus_active_power_mismatch,
        "DC load flow done"
    );
    Ok(result)
}
