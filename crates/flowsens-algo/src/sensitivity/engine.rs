//! Sensitivity driver: per network, the contingency engine produces the states
//! and the visitor below solves one right-hand side per variable and state.

use super::factor::{resolve_function, validate_factors, FunctionTarget, NetworkFactor, NetworkFactors};
use super::function::{linearize, Linearized};
use super::result::{SensitivityAnalysisResult, SensitivityStateStatus, SensitivityValue};
use super::variable::{Effect, VariableContext};
use super::{SensitivityFactor, SensitivityVariableSet};
use crate::arena::{ArenaContext, ArenaMap, ArenaVec};
use crate::cancel::CancellationToken;
use crate::config::{LoadFlowParameters, SensitivityParameters};
use crate::contingency::{
    validate_contingencies, Contingency, ContingencyEngine, OperatorStrategy, PropagatedContingency, StateStatus,
    StateView,
};
use crate::equations::{EquationSystem, TermContext, Variable};
use crate::network::{build_networks, LfNetwork};
use crate::power_flow::SolverStatus;
use flowsens_core::{Grid, GridError, GridResult, LinearSolver};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sensitivity analysis over the base case, contingencies and operator
/// strategies.
pub struct SensitivityAnalysis {
    params: SensitivityParameters,
    solver: Arc<dyn LinearSolver>,
    cancel: CancellationToken,
}

/// Solved variable at one state.
enum VariableState<'b> {
    Unreachable,
    Absent,
    /// The sensitivity solve failed; every value against it is NaN.
    Failed,
    Solved {
        dx: ArenaVec<'b, f64>,
        direct: Vec<(Variable, f64)>,
    },
}

/// Values and statuses produced on one network.
struct NetworkOutcome {
    status: SolverStatus,
    values: Vec<SensitivityValue>,
    statuses: Vec<SensitivityStateStatus>,
}

/// What the per-state visitor needs besides the view.
struct StateInputs<'r> {
    resolved: &'r NetworkFactors,
    params: &'r LoadFlowParameters,
    ctx: TermContext,
}

impl SensitivityAnalysis {
    pub fn new(params: SensitivityParameters) -> Self {
        let solver = params.load_flow.linear_solver.build_solver();
        Self {
            params,
            solver,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn LinearSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Compute every factor in every state it selects.
    ///
    /// Unknown ids abort the run before anything is solved. Each factor is
    /// computed on the network hosting its function (the main one when the
    /// function is nowhere); networks without factors other than the main one
    /// are not solved.
    pub fn run(
        &self,
        grid: &Grid,
        factors: &[SensitivityFactor],
        contingencies: &[Contingency],
        variable_sets: &[SensitivityVariableSet],
        operator_strategies: &[OperatorStrategy],
    ) -> GridResult<SensitivityAnalysisResult> {
        self.params.validate()?;
        // phase shifters stay at their tap so that their angle is a variable
        let load_flow = self.params.load_flow.clone().with_phase_shifter_regulation(false);
        let mut networks = build_networks(grid, &load_flow, &[])?;
        if networks.is_empty() {
            return Err(GridError::Structural(format!("grid '{}' has no bus", grid.id)));
        }
        let index = grid.element_index();
        validate_contingencies(&index, &networks, contingencies)?;
        for strategy in operator_strategies {
            strategy.validate(contingencies, &networks)?;
        }
        validate_factors(&index, &networks, factors, variable_sets, contingencies, load_flow.dc)?;

        let mut hosted: Vec<Vec<usize>> = vec![Vec::new(); networks.len()];
        for (i, factor) in factors.iter().enumerate() {
            let home = networks
                .iter()
                .position(|net| {
                    resolve_function(net, factor.function_type, &factor.function_id) != FunctionTarget::Missing
                })
                .unwrap_or(0);
            hosted[home].push(i);
        }
        tracing::info!(
            grid = %grid.id,
            factors = factors.len(),
            contingencies = contingencies.len(),
            operator_strategies = operator_strategies.len(),
            networks = networks.len(),
            dc = load_flow.dc,
            "running sensitivity analysis"
        );

        let outcomes: Vec<GridResult<NetworkOutcome>> = networks
            .par_iter_mut()
            .zip(hosted.par_iter())
            .enumerate()
            .filter(|(i, (_, hosted))| *i == 0 || !hosted.is_empty())
            .map(|(_, (net, hosted))| {
                self.run_network(
                    net,
                    &load_flow,
                    factors,
                    hosted,
                    variable_sets,
                    contingencies,
                    operator_strategies,
                )
            })
            .collect();

        let mut load_flow_status = SolverStatus::NoCalculation;
        let mut values = Vec::new();
        let mut merged: BTreeMap<(Option<usize>, Option<usize>), StateStatus> = BTreeMap::new();
        for (n, outcome) in outcomes.into_iter().enumerate() {
            let outcome = outcome?;
            if n == 0 {
                load_flow_status = outcome.status;
            }
            values.extend(outcome.values);
            for s in outcome.statuses {
                merged
                    .entry((s.contingency_index, s.operator_strategy_index))
                    .and_modify(|status| *status = worst(*status, s.status))
                    .or_insert(s.status);
            }
        }
        values.sort_by_key(|v| (v.factor_index, v.contingency_index, v.operator_strategy_index));

        Ok(SensitivityAnalysisResult {
            load_flow_status,
            values,
            statuses: merged
                .into_iter()
                .map(|((contingency_index, operator_strategy_index), status)| SensitivityStateStatus {
                    contingency_index,
                    operator_strategy_index,
                    status,
                })
                .collect(),
            contingency_ids: contingencies.iter().map(|c| c.id.clone()).collect(),
            operator_strategy_ids: operator_strategies.iter().map(|s| s.id.clone()).collect(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_network(
        &self,
        net: &mut LfNetwork,
        load_flow: &LoadFlowParameters,
        factors: &[SensitivityFactor],
        hosted: &[usize],
        variable_sets: &[SensitivityVariableSet],
        contingencies: &[Contingency],
        strategies: &[OperatorStrategy],
    ) -> GridResult<NetworkOutcome> {
        let resolved = NetworkFactors::resolve(net, factors, hosted, variable_sets, &self.params);
        let propagated: Vec<PropagatedContingency> = contingencies
            .iter()
            .enumerate()
            .map(|(i, c)| PropagatedContingency::propagate(net, i, c))
            .collect();
        tracing::debug!(
            component = net.num_sc,
            factors = resolved.factors.len(),
            functions = resolved.functions.len(),
            variables = resolved.variables.len(),
            "resolved factors"
        );

        let inputs = StateInputs {
            resolved: &resolved,
            params: load_flow,
            ctx: TermContext {
                dc_use_transformer_ratio: load_flow.dc_use_transformer_ratio,
            },
        };
        let mut arena = ArenaContext::new();
        let mut values = Vec::new();
        let mut statuses = Vec::new();
        let engine = ContingencyEngine::new(load_flow, self.solver.as_ref()).with_cancellation(&self.cancel);
        let status = engine.run(net, &propagated, strategies, |view| {
            let contingency_id = view.contingency.map(|c| contingencies[c].id.as_str());
            let selected: Vec<&NetworkFactor> = resolved
                .factors
                .iter()
                .filter(|f| factors[f.index].contingency_context.includes(contingency_id))
                .collect();
            let mut status = view.status;
            if let (Some(system), false) = (view.system(), selected.is_empty()) {
                arena.reset();
                let solved = compute_state(&arena, view, system, &inputs, &selected, &mut values);
                if !solved {
                    status = StateStatus::Failed;
                }
            }
            if view.contingency.is_some() {
                statuses.push(SensitivityStateStatus {
                    contingency_index: view.contingency,
                    operator_strategy_index: view.operator_strategy,
                    status,
                });
            }
            Ok(())
        })?;
        Ok(NetworkOutcome {
            status,
            values,
            statuses,
        })
    }
}

/// Compute the selected factors at a solved state. Returns false when a
/// sensitivity solve failed.
fn compute_state(
    arena: &ArenaContext,
    view: &StateView<'_>,
    system: &EquationSystem,
    inputs: &StateInputs<'_>,
    selected: &[&NetworkFactor],
    values: &mut Vec<SensitivityValue>,
) -> bool {
    let net = view.net;
    let resolved = inputs.resolved;
    let dc = system.is_dc();
    let variables = VariableContext::new(net, system, inputs.params);
    let mut functions: ArenaMap<'_, usize, Linearized> = arena.alloc_hashmap();
    let mut solved: ArenaMap<'_, usize, VariableState<'_>> = arena.alloc_hashmap();
    let mut ok = true;

    for factor in selected {
        let function = functions.entry(factor.function).or_insert_with(|| {
            linearize(
                net,
                &resolved.functions[factor.function],
                dc,
                inputs.ctx,
                inputs.params.dc_power_factor,
            )
        });
        let variable = solved.entry(factor.variable).or_insert_with(|| {
            match variables.effect(&resolved.variables[factor.variable]) {
                Effect::Unreachable => VariableState::Unreachable,
                Effect::Absent => VariableState::Absent,
                Effect::Rows { rhs, direct } => {
                    let mut dx = arena.alloc_vec_filled(system.len(), 0.0);
                    for (row, c) in rhs {
                        dx[row] += c;
                    }
                    match view.solve(&mut dx) {
                        Ok(()) => VariableState::Solved { dx, direct },
                        Err(err) => {
                            tracing::warn!(
                                contingency = ?view.contingency,
                                operator_strategy = ?view.operator_strategy,
                                error = %err,
                                "sensitivity solve failed"
                            );
                            VariableState::Failed
                        }
                    }
                }
            }
        });
        if matches!(variable, VariableState::Failed) {
            ok = false;
        }
        let mut value = sensitivity(system, function, variable);
        if value.abs() < factor.threshold {
            value = 0.0;
        }
        values.push(SensitivityValue {
            factor_index: factor.index,
            contingency_index: view.contingency,
            operator_strategy_index: view.operator_strategy,
            value,
            function_reference: function.reference(),
        });
    }
    tracing::debug!(
        contingency = ?view.contingency,
        operator_strategy = ?view.operator_strategy,
        factors = selected.len(),
        solves = solved.len(),
        "state computed"
    );
    ok
}

/// `∇f · dx`, reading parameters the system does not own from the variable's
/// direct shifts.
fn sensitivity(system: &EquationSystem, function: &Linearized, variable: &VariableState<'_>) -> f64 {
    match (function, variable) {
        (Linearized::Unreachable, _) | (_, VariableState::Unreachable | VariableState::Failed) => f64::NAN,
        (Linearized::Zero, _) | (_, VariableState::Absent) => 0.0,
        (Linearized::Value { gradient, .. }, VariableState::Solved { dx, direct }) => gradient
            .iter()
            .map(|(var, d)| match system.column(var) {
                Some(col) => d * dx[col],
                None => direct
                    .iter()
                    .filter(|(shifted, _)| shifted == var)
                    .map(|(_, shift)| d * shift)
                    .sum(),
            })
            .sum(),
    }
}

fn worst(a: StateStatus, b: StateStatus) -> StateStatus {
    let rank = |s: StateStatus| match s {
        StateStatus::NoImpact => 0,
        StateStatus::Success => 1,
        StateStatus::Failed => 2,
    };
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensitivity::{SensitivityFunctionType, SensitivityVariableType};
    use crate::test_utils::{bridge_grid, two_island_grid};

    fn dc_params() -> LoadFlowParameters {
        LoadFlowParameters::default()
            .with_dc(true)
            .with_distributed_slack(false)
            .with_slack_bus_ids(&["VL1", "VL4"])
    }

    fn dc() -> SensitivityParameters {
        SensitivityParameters::new(dc_params())
    }

    fn p1(branch: &str, injection: &str) -> SensitivityFactor {
        SensitivityFactor::new(
            SensitivityFunctionType::BranchActivePower1,
            branch,
            SensitivityVariableType::InjectionActivePower,
            injection,
        )
    }

    #[test]
    fn parallel_lines_share_an_injection() {
        let grid = bridge_grid();
        let result = SensitivityAnalysis::new(dc())
            .run(&grid, &[p1("L12A", "LD2")], &[Contingency::branch("L12B")], &[], &[])
            .unwrap();
        assert_eq!(result.load_flow_status, SolverStatus::Converged);
        // a load at VL2 is fed from the slack at VL1 through two equal lines
        let base = result.value(0, None).unwrap();
        assert!((base + 0.5).abs() < 1e-9, "{base}");
        let post = result.value(0, Some("L12B")).unwrap();
        assert!((post + 1.0).abs() < 1e-9, "{post}");
        assert_eq!(result.status("L12B", None), Some(StateStatus::Success));
    }

    #[test]
    fn each_island_hosts_its_own_factors() {
        let grid = two_island_grid();
        let params = SensitivityParameters::new(
            dc_params().with_connected_component_mode(crate::config::ConnectedComponentMode::All),
        );
        let factors = [p1("L12", "LD3"), p1("L45", "LD5")];
        let result = SensitivityAnalysis::new(params).run(&grid, &factors, &[], &[], &[]).unwrap();
        assert!((result.value(0, None).unwrap() + 1.0).abs() < 1e-9);
        assert!((result.value(1, None).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn thresholds_zero_out_small_values() {
        let grid = bridge_grid();
        let params = dc().with_flow_flow_threshold(0.6);
        let result = SensitivityAnalysis::new(params)
            .run(&grid, &[p1("L12A", "LD2")], &[], &[], &[])
            .unwrap();
        assert_eq!(result.value(0, None), Some(0.0));
        assert!(result.function_reference(0, None).unwrap().is_finite());
    }

    #[test]
    fn status_merge_keeps_the_worst() {
        assert_eq!(worst(StateStatus::NoImpact, StateStatus::Success), StateStatus::Success);
        assert_eq!(worst(StateStatus::Failed, StateStatus::Success), StateStatus::Failed);
        assert_eq!(worst(StateStatus::NoImpact, StateStatus::NoImpact), StateStatus::NoImpact);
    }
}
