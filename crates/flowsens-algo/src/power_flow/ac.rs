//! AC load flow of one component: Newton-Raphson inside outer loops.

use super::newton::newton_raphson;
use super::outer_loop::{outer_loops, slack_mismatch, OuterLoopStatus};
use super::result::{collect_results, ComponentResult};
use super::SolverStatus;
use crate::config::{LoadFlowParameters, VoltageInitMode};
use crate::equations::{bus_power, EquationSystem, TermContext};
use crate::network::LfNetwork;
use flowsens_core::{GridResult, LinearSolver};

/// Flat start: angles at 0, controlled buses at their target, others at 1 pu.
pub fn initialize_voltages(net: &mut LfNetwork, mode: VoltageInitMode) {
    if mode == VoltageInitMode::PreviousValues {
        return;
    }
    for bus in &mut net.buses {
        bus.v = 1.0;
        bus.angle = 0.0;
    }
    for vc in &net.voltage_controls {
        net.buses[vc.controlled_bus].v = vc.target_v;
    }
    for branch in &mut net.branches {
        branch.dummy_p = 0.0;
        branch.dummy_q = 0.0;
    }
}

/// Active power moved onto participating injections since the build, per-unit.
pub fn distributed_active_power(net: &LfNetwork) -> f64 {
    let generation: f64 = net
        .generators
        .iter()
        .filter(|g| !g.is_converter())
        .map(|g| g.target_p - g.initial_target_p)
        .sum();
    let consumption: f64 = net
        .loads
        .iter()
        .filter(|l| l.participates_in_balance())
        .map(|l| l.initial_target_p - l.target_p)
        .sum();
    generation + consumption
}

/// Share the reactive power produced at each controller bus between its
/// regulating generators.
fn update_generator_reactive_power(net: &mut LfNetwork) {
    let ctx = TermContext::default();
    for bus in 0..net.buses.len() {
        if net.buses[bus].disabled {
            continue;
        }
        let regulating: Vec<usize> = net.regulating_generators(bus).collect();
        if regulating.is_empty() {
            continue;
        }
        if !net.buses[bus].voltage_control_enabled {
            for g in regulating {
                net.generators[g].calculated_q = net.generators[g].target_q;
            }
            continue;
        }
        let produced = bus_power(net, bus, false, true, ctx) - net.bus_fixed_q(bus);
        let share = produced / regulating.len() as f64;
        for g in regulating {
            net.generators[g].calculated_q = share;
        }
    }
}

pub fn solve_ac(
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
    initialize_voltages(net, params.voltage_init_mode);

    let mut loops = outer_loops(params);
    let mut iterations = 0;
    let mut outer_iterations = 0;
    let status = loop {
        let system = EquationSystem::build_ac(net, ctx)?;
        let nr = newton_raphson(net, &system, solver, &params.newton_raphson);
        iterations += nr.iterations;
        if nr.status != SolverStatus::Converged {
            break nr.status;
        }
        let mut unstable = None;
        for outer in loops.iter_mut() {
            if outer.check(net, params) == OuterLoopStatus::Unstable {
                unstable = Some(outer.name());
                break;
            }
        }
        let Some(name) = unstable else {
            break SolverStatus::Converged;
        };
        outer_iterations += 1;
        tracing::debug!(component = net.num_sc, outer_loop = name, outer_iterations, "outer loop unstable");
        if outer_iterations >= params.newton_raphson.max_outer_loop_iterations {
            tracing::warn!(component = net.num_sc, outer_iterations, "outer loops did not stabilize");
            break SolverStatus::MaxIterationReached;
        }
    };

    update_generator_reactive_power(net);
    let (buses, branches) = collect_results(net, false, ctx, params.dc_power_factor);
    let result = ComponentResult {
        num_cc: net.num_cc,
        num_sc: net.num_sc,
        status,
        iterations,
        outer_iterations,
        reference_bus_id: net.reference_bus.map(|b| net.buses[b].id.clone()),
        slack_bus_active_power_mismatch: slack_mismatch(net, false, ctx) * net.base_power,
        distributed_active_power: distributed_active_power(net) * net.base_power,
        buses,
        branches,
    };
    tracing::info!(
        component = net.num_sc,
        status = ?result.status,
        iterations,
        outer_iterations,
        slack_mismatch_mw = result.slack_bus_active_power_mismatch,
        "AC load flow done"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::two_bus_network;
    use flowsens_core::GaussSolver;

    #[test]
    fn slack_absorbs_losses_without_distribution() {
        let mut net = two_bus_network();
        let params = LoadFlowParameters::default().with_distributed_slack(false);
        let result = solve_ac(&mut net, &params, &GaussSolver).unwrap();
        assert_eq!(result.status, SolverStatus::Converged);
        assert!(result.iterations <= 10);
        let flow = result.branch("L12").unwrap();
        // lossless line: the slack produces exactly the load
        assert!((flow.p1 - 200.0).abs() < 1e-3);
        assert!((flow.p2 + 200.0).abs() < 1e-3);
        assert!(result.slack_bus_active_power_mismatch.abs() < 1e-3);
        assert_eq!(result.reference_bus_id.as_deref(), Some("VL1_0"));
    }

    #[test]
    fn empty_component_is_not_calculated() {
        let mut net = two_bus_network();
        net.reference_bus = None;
        let result = solve_ac(&mut net, &LoadFlowParameters::default(), &GaussSolver).unwrap();
        assert_eq!(result.status, SolverStatus::NoCalculation);
    }
}
