//! Post-contingency states of one network.
//!
//! [`ContingencyEngine`] solves the base case once, then walks every
//! contingency and triggered operator strategy:
//!
//! 1. contingencies are grouped by the buses they cut off from the slack;
//! 2. a group losing buses gets its own reduced system, solved and factorized
//!    once for all its members;
//! 3. the remaining removals of each state are compensated on the group
//!    factorization, unless they change the structure of the equations (a
//!    regulated branch, a regulating generator, a zero-impedance tree edge),
//!    in which case that state is rebuilt on its own;
//! 4. the state is handed to a visitor as a [`StateView`] and the network is
//!    restored from its snapshot.
//!
//! Removal sets are sorted and every state of a group starts from the same
//! snapshot, so two requests removing the same elements produce identical
//! values whatever path led to them.

use super::compensation::Compensation;
use super::operator_strategy::OperatorStrategy;
use super::propagated::{analyse_connectivity, validate_contingencies, PropagatedContingency};
use super::{Contingency, StateStatus};
use crate::cancel::CancellationToken;
use crate::config::LoadFlowParameters;
use crate::equations::{EquationSystem, EquationType, Term, TermContext, Variable, VariableType};
use crate::network::{build_networks, LfNetwork, NetworkState};
use crate::power_flow::dc::{dc_imbalance, solve_dc_state};
use crate::power_flow::result::{collect_results, BranchFlow, BranchResult, BusResult};
use crate::power_flow::{newton_raphson, newton_raphson_without, solve_ac, solve_dc, SolverStatus};
use flowsens_core::{Factorization, Grid, GridError, GridResult, LinearSolveError, LinearSolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Removals applied on top of a group's lost buses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChanges {
    pub branches: BTreeSet<usize>,
    pub generators: BTreeSet<usize>,
    pub loads: BTreeSet<usize>,
    pub shunts: BTreeSet<usize>,
    pub hvdcs: BTreeSet<usize>,
}

impl StateChanges {
    /// What is left of `removal` once `lost` buses are cut off: branches with
    /// both ends on the slack side and injections on connected buses.
    pub fn new(net: &LfNetwork, removal: &PropagatedContingency, lost: &BTreeSet<usize>) -> Self {
        let alive = |bus: Option<usize>| bus.map_or(true, |b| !lost.contains(&b));
        Self {
            branches: removal
                .branches
                .iter()
                .copied()
                .filter(|&br| alive(net.branches[br].bus1) && alive(net.branches[br].bus2))
                .collect(),
            generators: removal
                .generators
                .iter()
                .copied()
                .filter(|&g| alive(Some(net.generators[g].bus)))
                .collect(),
            loads: removal
                .loads
                .iter()
                .copied()
                .filter(|&l| alive(Some(net.loads[l].bus)))
                .collect(),
            shunts: removal
                .shunts
                .iter()
                .copied()
                .filter(|&s| alive(Some(net.shunts[s].bus)))
                .collect(),
            hvdcs: removal
                .hvdcs
                .iter()
                .copied()
                .filter(|&h| alive(net.hvdcs[h].bus1) && alive(net.hvdcs[h].bus2))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
            && self.generators.is_empty()
            && self.loads.is_empty()
            && self.shunts.is_empty()
            && self.hvdcs.is_empty()
    }

    fn disable(&self, net: &mut LfNetwork) {
        for &br in &self.branches {
            net.branches[br].disabled = true;
        }
        for &g in &self.generators {
            net.generators[g].disabled = true;
        }
        for &l in &self.loads {
            net.loads[l].disabled = true;
        }
        for &s in &self.shunts {
            net.shunts[s].disabled = true;
        }
        for &h in &self.hvdcs {
            net.hvdcs[h].disabled = true;
        }
    }

    /// Whether the removals touch a row or a column of `system` rather than
    /// terms only.
    fn changes_structure(&self, net: &LfNetwork, system: &EquationSystem) -> bool {
        let branch_structure = self.branches.iter().any(|&br| {
            !system.term_rows(&Term::DummyP(br)).is_empty()
                || !system.term_rows(&Term::DummyQ(br)).is_empty()
                || system.row(EquationType::BranchTargetP, br).is_some()
                || system.column(&Variable::new(br, VariableType::BranchRho1)).is_some()
                || system.column(&Variable::new(br, VariableType::BranchAlpha1)).is_some()
        });
        let shunt_structure = self
            .shunts
            .iter()
            .any(|&s| system.column(&Variable::new(s, VariableType::ShuntB)).is_some());
        let generator_structure =
            !system.is_dc() && self.generators.iter().any(|&g| net.is_regulating_generator(g));
        branch_structure || shunt_structure || generator_structure
    }

    /// Terms dropped from the equations, in a fixed order.
    fn removed_terms(&self, system: &EquationSystem) -> Vec<Term> {
        let mut terms: Vec<Term> = self
            .branches
            .iter()
            .flat_map(|&br| system.branch_terms(br))
            .collect();
        for &s in &self.shunts {
            terms.extend([Term::ShuntP(s), Term::ShuntQ(s)]);
        }
        for &h in &self.hvdcs {
            terms.extend([Term::HvdcP1(h), Term::HvdcP2(h)]);
        }
        terms.retain(|t| !system.term_rows(t).is_empty());
        terms
    }
}

/// Equation system solved at a state, with its Jacobian factorized.
struct SolvedState {
    system: EquationSystem,
    lu: Box<dyn Factorization>,
}

/// One state as seen by a visitor.
///
/// `net` holds the state's operating point. A view without a system carries no
/// values: its status is `Failed`, or `NoImpact` for an operator strategy
/// whose condition did not hold.
pub struct StateView<'a> {
    pub net: &'a LfNetwork,
    system: Option<&'a EquationSystem>,
    lu: Option<&'a dyn Factorization>,
    compensation: Option<&'a Compensation>,
    /// Buses cut off from the slack side, disabled in `net`.
    pub lost_buses: &'a BTreeSet<usize>,
    pub changes: &'a StateChanges,
    /// Request index of the contingency, `None` for the base case.
    pub contingency: Option<usize>,
    pub operator_strategy: Option<usize>,
    pub status: StateStatus,
}

impl<'a> StateView<'a> {
    #[allow(clippy::too_many_arguments)]
    fn solved(
        net: &'a LfNetwork,
        solved: &'a SolvedState,
        compensation: Option<&'a Compensation>,
        lost_buses: &'a BTreeSet<usize>,
        changes: &'a StateChanges,
        contingency: Option<usize>,
        operator_strategy: Option<usize>,
        status: StateStatus,
    ) -> Self {
        Self {
            net,
            system: Some(&solved.system),
            lu: Some(solved.lu.as_ref()),
            compensation,
            lost_buses,
            changes,
            contingency,
            operator_strategy,
            status,
        }
    }

    pub fn system(&self) -> Option<&'a EquationSystem> {
        self.system
    }

    pub fn has_values(&self) -> bool {
        self.system.is_some()
    }

    pub fn is_lost(&self, bus: usize) -> bool {
        self.lost_buses.contains(&bus)
    }

    /// Solve `J' x = rhs` in place with the state's Jacobian.
    pub fn solve(&self, rhs: &mut [f64]) -> Result<(), LinearSolveError> {
        let lu = self.lu.ok_or(LinearSolveError::Singular(0))?;
        lu.solve_in_place(rhs)?;
        if let Some(compensation) = self.compensation {
            compensation.apply(rhs)?;
        }
        Ok(())
    }
}

/// A state to compute: a contingency, optionally with a strategy on top.
struct StateRequest {
    /// Position in the propagated contingency list.
    source: usize,
    strategy: Option<usize>,
    removal: PropagatedContingency,
}

/// Disable/solve/visit/restore cycle over the states of one network.
pub struct ContingencyEngine<'a> {
    params: &'a LoadFlowParameters,
    solver: &'a dyn LinearSolver,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> ContingencyEngine<'a> {
    pub fn new(params: &'a LoadFlowParameters, solver: &'a dyn LinearSolver) -> Self {
        Self {
            params,
            solver,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn context(&self) -> TermContext {
        TermContext {
            dc_use_transformer_ratio: self.params.dc_use_transformer_ratio,
        }
    }

    fn check_cancelled(&self) -> GridResult<()> {
        self.cancel.map_or(Ok(()), CancellationToken::check)
    }

    /// Solve the base case, then visit it and every post-contingency and
    /// operator strategy state. The network is back at the base solution on
    /// return. Returns the base load flow status.
    pub fn run<F>(
        &self,
        net: &mut LfNetwork,
        contingencies: &[PropagatedContingency],
        strategies: &[OperatorStrategy],
        mut visit: F,
    ) -> GridResult<SolverStatus>
    where
        F: FnMut(&StateView<'_>) -> GridResult<()>,
    {
        let base_result = if self.params.dc {
            solve_dc(net, self.params, self.solver)?
        } else {
            solve_ac(net, self.params, self.solver)?
        };
        let base = if base_result.status == SolverStatus::Converged {
            self.build_and_factorize(net)
        } else {
            None
        };
        let Some(base) = base else {
            tracing::warn!(
                component = net.num_sc,
                status = ?base_result.status,
                "base case failed, every state fails"
            );
            visit_status(net, None, None, StateStatus::Failed, &mut visit)?;
            for pc in contingencies {
                self.check_cancelled()?;
                visit_status(net, Some(pc.index), None, StateStatus::Failed, &mut visit)?;
                for (s, _) in strategies_of(strategies, pc) {
                    visit_status(net, Some(pc.index), Some(s), StateStatus::Failed, &mut visit)?;
                }
            }
            return Ok(base_result.status);
        };

        let no_lost = BTreeSet::new();
        let no_changes = StateChanges::default();
        visit(&StateView::solved(
            net,
            &base,
            None,
            &no_lost,
            &no_changes,
            None,
            None,
            StateStatus::Success,
        ))?;
        let snapshot = net.snapshot();

        let mut requests = Vec::new();
        let mut pending = Vec::new();
        for (source, pc) in contingencies.iter().enumerate() {
            if !pc.is_empty() {
                requests.push(StateRequest {
                    source,
                    strategy: None,
                    removal: pc.clone(),
                });
                continue;
            }
            self.check_cancelled()?;
            tracing::debug!(contingency = %pc.id, "no impact on this network");
            visit(&StateView::solved(
                net,
                &base,
                None,
                &no_lost,
                &no_changes,
                Some(pc.index),
                None,
                StateStatus::NoImpact,
            ))?;
            let request = StateRequest {
                source,
                strategy: None,
                removal: pc.clone(),
            };
            self.queue_strategies(net, &snapshot, &request, contingencies, strategies, StateStatus::NoImpact, &mut pending, &mut visit)?;
        }

        self.run_requests(net, &base, &snapshot, &requests, contingencies, strategies, Some(&mut pending), &mut visit)?;
        self.run_requests(net, &base, &snapshot, &pending, contingencies, strategies, None, &mut visit)?;
        net.restore(&snapshot);
        Ok(base_result.status)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_requests<F>(
        &self,
        net: &mut LfNetwork,
        base: &SolvedState,
        snapshot: &NetworkState,
        requests: &[StateRequest],
        contingencies: &[PropagatedContingency],
        strategies: &[OperatorStrategy],
        mut pending: Option<&mut Vec<StateRequest>>,
        visit: &mut F,
    ) -> GridResult<()>
    where
        F: FnMut(&StateView<'_>) -> GridResult<()>,
    {
        let groups = analyse_connectivity(net, requests.iter().map(|r| &r.removal));
        for group in &groups {
            if !group.breaks_connectivity() {
                for &i in &group.contingencies {
                    self.check_cancelled()?;
                    self.process(
                        net,
                        base,
                        snapshot,
                        &group.lost_buses,
                        &requests[i],
                        contingencies,
                        strategies,
                        pending.as_deref_mut(),
                        visit,
                    )?;
                }
                continue;
            }

            let reduced = self.rebuild(net, &group.lost_buses, &StateChanges::default());
            let group_snapshot = net.snapshot();
            for &i in &group.contingencies {
                self.check_cancelled()?;
                let request = &requests[i];
                match &reduced {
                    Some(reduced) => self.process(
                        net,
                        reduced,
                        &group_snapshot,
                        &group.lost_buses,
                        request,
                        contingencies,
                        strategies,
                        pending.as_deref_mut(),
                        visit,
                    )?,
                    None => {
                        let pc = &contingencies[request.source];
                        visit_status(net, Some(pc.index), request.strategy, StateStatus::Failed, visit)?;
                        if let Some(pending) = pending.as_deref_mut() {
                            self.queue_strategies(
                                net,
                                &group_snapshot,
                                request,
                                contingencies,
                                strategies,
                                StateStatus::Failed,
                                pending,
                                visit,
                            )?;
                        }
                    }
                }
            }
            net.restore(snapshot);
        }
        Ok(())
    }

    /// Compute one state from the group snapshot, visit it, queue its
    /// strategies and restore the snapshot.
    #[allow(clippy::too_many_arguments)]
    fn process<F>(
        &self,
        net: &mut LfNetwork,
        solved: &SolvedState,
        snapshot: &NetworkState,
        lost: &BTreeSet<usize>,
        request: &StateRequest,
        contingencies: &[PropagatedContingency],
        strategies: &[OperatorStrategy],
        pending: Option<&mut Vec<StateRequest>>,
        visit: &mut F,
    ) -> GridResult<()>
    where
        F: FnMut(&StateView<'_>) -> GridResult<()>,
    {
        let index = contingencies[request.source].index;
        let changes = StateChanges::new(net, &request.removal, lost);
        let status = if changes.is_empty() {
            visit(&StateView::solved(
                net,
                solved,
                None,
                lost,
                &changes,
                Some(index),
                request.strategy,
                StateStatus::Success,
            ))?;
            StateStatus::Success
        } else if changes.changes_structure(net, &solved.system) {
            tracing::debug!(contingency = %request.removal.id, "structural change, rebuilding the state");
            match self.rebuild(net, &BTreeSet::new(), &changes) {
                Some(own) => {
                    visit(&StateView::solved(
                        net,
                        &own,
                        None,
                        lost,
                        &changes,
                        Some(index),
                        request.strategy,
                        StateStatus::Success,
                    ))?;
                    StateStatus::Success
                }
                None => {
                    visit_status(net, Some(index), request.strategy, StateStatus::Failed, visit)?;
                    StateStatus::Failed
                }
            }
        } else {
            let compensated = self.compensate(net, solved, &changes);
            let converged = compensated.is_ok() && self.converge(net, solved, &changes, &request.removal.id);
            match compensated {
                Ok(compensation) if converged => {
                    visit(&StateView::solved(
                        net,
                        solved,
                        Some(&compensation),
                        lost,
                        &changes,
                        Some(index),
                        request.strategy,
                        StateStatus::Success,
                    ))?;
                    StateStatus::Success
                }
                Ok(_) => {
                    visit_status(net, Some(index), request.strategy, StateStatus::Failed, visit)?;
                    StateStatus::Failed
                }
                Err(err) => {
                    tracing::warn!(contingency = %request.removal.id, error = %err, "compensated solve failed");
                    visit_status(net, Some(index), request.strategy, StateStatus::Failed, visit)?;
                    StateStatus::Failed
                }
            }
        };
        tracing::debug!(
            contingency = %request.removal.id,
            operator_strategy = ?request.strategy.map(|s| strategies[s].id.as_str()),
            ?status,
            "state done"
        );

        match pending {
            Some(pending) => self.queue_strategies(
                net,
                snapshot,
                request,
                contingencies,
                strategies,
                status,
                pending,
                visit,
            ),
            None => {
                net.restore(snapshot);
                Ok(())
            }
        }
    }

    /// Judge the strategies of a contingency on its post-contingency state,
    /// then restore `snapshot`. Triggered ones are queued as new states; the
    /// others are visited without values.
    #[allow(clippy::too_many_arguments)]
    fn queue_strategies<F>(
        &self,
        net: &mut LfNetwork,
        snapshot: &NetworkState,
        request: &StateRequest,
        contingencies: &[PropagatedContingency],
        strategies: &[OperatorStrategy],
        status: StateStatus,
        pending: &mut Vec<StateRequest>,
        visit: &mut F,
    ) -> GridResult<()>
    where
        F: FnMut(&StateView<'_>) -> GridResult<()>,
    {
        let pc = &contingencies[request.source];
        let ctx = self.context();
        let judged: Vec<(usize, bool)> = strategies_of(strategies, pc)
            .map(|(s, strategy)| {
                let fired = status != StateStatus::Failed
                    && strategy.is_triggered(net, self.params.dc, ctx, self.params.dc_power_factor);
                (s, fired)
            })
            .collect();
        net.restore(snapshot);
        for (s, fired) in judged {
            if status == StateStatus::Failed {
                visit_status(net, Some(pc.index), Some(s), StateStatus::Failed, visit)?;
            } else if fired {
                pending.push(StateRequest {
                    source: request.source,
                    strategy: Some(s),
                    removal: strategies[s].apply(net, pc),
                });
            } else {
                visit_status(net, Some(pc.index), Some(s), StateStatus::NoImpact, visit)?;
            }
        }
        Ok(())
    }

    fn build_and_factorize(&self, net: &mut LfNetwork) -> Option<SolvedState> {
        let ctx = self.context();
        let system = if self.params.dc {
            EquationSystem::build_dc(net, ctx)
        } else {
            EquationSystem::build_ac(net, ctx)
        };
        let system = match system {
            Ok(system) => system,
            Err(err) => {
                tracing::warn!(component = net.num_sc, error = %err, "equation system build failed");
                return None;
            }
        };
        match self.solver.factorize(&system.jacobian(net)) {
            Ok(lu) => Some(SolvedState { system, lu }),
            Err(err) => {
                tracing::warn!(component = net.num_sc, error = %err, "Jacobian factorization failed");
                None
            }
        }
    }

    /// Cut off `lost`, apply `changes`, and solve the resulting system from the
    /// current state.
    fn rebuild(&self, net: &mut LfNetwork, lost: &BTreeSet<usize>, changes: &StateChanges) -> Option<SolvedState> {
        let before = dc_imbalance(net);
        for &bus in lost {
            net.buses[bus].disabled = true;
        }
        changes.disable(net);
        if net.slack_buses.iter().any(|&s| net.buses[s].disabled) {
            net.select_slack_buses(self.params);
            tracing::debug!(
                component = net.num_sc,
                reference = ?net.reference_bus.map(|b| net.buses[b].id.as_str()),
                "slack bus lost, selected a new one"
            );
        }
        if self.params.distributed_slack {
            net.distribute_active_power(self.params.balance_type, dc_imbalance(net) - before);
        }

        let ctx = self.context();
        let system = if self.params.dc {
            EquationSystem::build_dc(net, ctx)
        } else {
            EquationSystem::build_ac(net, ctx)
        };
        let system = match system {
            Ok(system) => system,
            Err(err) => {
                tracing::warn!(component = net.num_sc, error = %err, "reduced system build failed");
                return None;
            }
        };
        let status = if self.params.dc {
            solve_dc_state(net, &system, self.solver)
        } else {
            newton_raphson(net, &system, self.solver, &self.params.newton_raphson).status
        };
        if status != SolverStatus::Converged {
            tracing::warn!(component = net.num_sc, ?status, "reduced system did not converge");
            return None;
        }
        match self.solver.factorize(&system.jacobian(net)) {
            Ok(lu) => Some(SolvedState { system, lu }),
            Err(err) => {
                tracing::warn!(component = net.num_sc, error = %err, "reduced Jacobian factorization failed");
                None
            }
        }
    }

    /// Apply `changes` and move the state by one step through the compensated
    /// Jacobian.
    fn compensate(
        &self,
        net: &mut LfNetwork,
        solved: &SolvedState,
        changes: &StateChanges,
    ) -> Result<Compensation, LinearSolveError> {
        let before = dc_imbalance(net);
        changes.disable(net);
        if self.params.distributed_slack {
            net.distribute_active_power(self.params.balance_type, dc_imbalance(net) - before);
        }
        let system = &solved.system;
        let terms = changes.removed_terms(system);
        let compensation = Compensation::new(system, net, solved.lu.as_ref(), self.solver, &terms)?;

        let mut step = system.mismatch_without(net, &terms);
        for m in step.iter_mut() {
            *m = -*m;
        }
        solved.lu.solve_in_place(&mut step)?;
        compensation.apply(&mut step)?;
        if step.iter().any(|v| !v.is_finite()) {
            return Err(LinearSolveError::NonFinite);
        }
        system.apply_increment(net, &step);
        Ok(compensation)
    }

    /// Iterate an AC state from its compensated step to the Newton tolerance,
    /// with the removed terms dropped. DC states are exact after one step.
    fn converge(&self, net: &mut LfNetwork, solved: &SolvedState, changes: &StateChanges, id: &str) -> bool {
        if self.params.dc {
            return true;
        }
        let removed = changes.removed_terms(&solved.system);
        let result = newton_raphson_without(
            net,
            &solved.system,
            self.solver,
            &self.params.newton_raphson,
            &removed,
        );
        if result.status != SolverStatus::Converged {
            tracing::warn!(contingency = %id, status = ?result.status, "post-contingency state did not converge");
            return false;
        }
        tracing::debug!(contingency = %id, iterations = result.iterations, "post-contingency state converged");
        true
    }
}

fn strategies_of<'s>(
    strategies: &'s [OperatorStrategy],
    pc: &'s PropagatedContingency,
) -> impl Iterator<Item = (usize, &'s OperatorStrategy)> + 's {
    strategies
        .iter()
        .enumerate()
        .filter(move |(_, s)| s.contingency_id == pc.id)
}

fn visit_status<F>(
    net: &LfNetwork,
    contingency: Option<usize>,
    operator_strategy: Option<usize>,
    status: StateStatus,
    visit: &mut F,
) -> GridResult<()>
where
    F: FnMut(&StateView<'_>) -> GridResult<()>,
{
    let lost = BTreeSet::new();
    let changes = StateChanges::default();
    visit(&StateView {
        net,
        system: None,
        lu: None,
        compensation: None,
        lost_buses: &lost,
        changes: &changes,
        contingency,
        operator_strategy,
        status,
    })
}

/// Load flow values of one state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostContingencyResult {
    /// `None` for the base case.
    pub contingency_id: Option<String>,
    pub operator_strategy_id: Option<String>,
    pub status: StateStatus,
    /// Empty for states without values.
    pub buses: Vec<BusResult>,
    pub branches: Vec<BranchResult>,
}

impl PostContingencyResult {
    pub fn branch(&self, id: &str) -> Option<&BranchFlow> {
        self.branches.iter().find(|b| b.id == id).map(|b| &b.flow)
    }

    pub fn bus(&self, id: &str) -> Option<&BusResult> {
        self.buses.iter().find(|b| b.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyAnalysisResult {
    pub load_flow_status: SolverStatus,
    pub pre_contingency: PostContingencyResult,
    /// In contingency order.
    pub post_contingency: Vec<PostContingencyResult>,
    /// In contingency order, then strategy order.
    pub operator_strategies: Vec<PostContingencyResult>,
}

impl ContingencyAnalysisResult {
    pub fn contingency(&self, id: &str) -> Option<&PostContingencyResult> {
        self.post_contingency
            .iter()
            .find(|r| r.contingency_id.as_deref() == Some(id))
    }

    pub fn operator_strategy(&self, id: &str) -> Option<&PostContingencyResult> {
        self.operator_strategies
            .iter()
            .find(|r| r.operator_strategy_id.as_deref() == Some(id))
    }
}

/// Load flow under contingencies on the main component.
pub struct ContingencyAnalysis {
    params: LoadFlowParameters,
    solver: Arc<dyn LinearSolver>,
    cancel: CancellationToken,
}

impl ContingencyAnalysis {
    pub fn new(params: LoadFlowParameters) -> Self {
        let solver = params.linear_solver.build_solver();
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

    pub fn run(
        &self,
        grid: &Grid,
        contingencies: &[Contingency],
        strategies: &[OperatorStrategy],
    ) -> GridResult<ContingencyAnalysisResult> {
        self.params.validate()?;
        let mut networks = build_networks(grid, &self.params, &[])?;
        validate_contingencies(&grid.element_index(), &networks, contingencies)?;
        for strategy in strategies {
            strategy.validate(contingencies, &networks)?;
        }
        let net = networks
            .first_mut()
            .ok_or_else(|| GridError::Structural(format!("grid '{}' has no bus", grid.id)))?;
        let propagated: Vec<PropagatedContingency> = contingencies
            .iter()
            .enumerate()
            .map(|(i, c)| PropagatedContingency::propagate(net, i, c))
            .collect();
        tracing::info!(
            grid = %grid.id,
            contingencies = contingencies.len(),
            operator_strategies = strategies.len(),
            dc = self.params.dc,
            "running contingency analysis"
        );

        let dc = self.params.dc;
        let ctx = TermContext {
            dc_use_transformer_ratio: self.params.dc_use_transformer_ratio,
        };
        let power_factor = self.params.dc_power_factor;
        let mut pre = None;
        let mut post: Vec<(usize, PostContingencyResult)> = Vec::new();
        let mut remedial: Vec<(usize, usize, PostContingencyResult)> = Vec::new();
        let engine = ContingencyEngine::new(&self.params, self.solver.as_ref()).with_cancellation(&self.cancel);
        let status = engine.run(net, &propagated, strategies, |view| {
            let (buses, branches) = if view.has_values() {
                collect_results(view.net, dc, ctx, power_factor)
            } else {
                (Vec::new(), Vec::new())
            };
            let result = PostContingencyResult {
                contingency_id: view.contingency.map(|c| contingencies[c].id.clone()),
                operator_strategy_id: view.operator_strategy.map(|s| strategies[s].id.clone()),
                status: view.status,
                buses,
                branches,
            };
            match (view.contingency, view.operator_strategy) {
                (None, _) => pre = Some(result),
                (Some(c), None) => post.push((c, result)),
                (Some(c), Some(s)) => remedial.push((c, s, result)),
            }
            Ok(())
        })?;
        post.sort_by_key(|(c, _)| *c);
        remedial.sort_by_key(|(c, s, _)| (*c, *s));

        let pre_contingency = pre.ok_or_else(|| GridError::Structural("base case was not visited".into()))?;
        Ok(ContingencyAnalysisResult {
            load_flow_status: status,
            pre_contingency,
            post_contingency: post.into_iter().map(|(_, r)| r).collect(),
            operator_strategies: remedial.into_iter().map(|(_, _, r)| r).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contingency::{Action, Condition, ContingencyElement};
    use crate::power_flow::LoadFlow;
    use crate::test_utils::{bridge_grid, phase_shifter_grid};

    fn dc_params() -> LoadFlowParameters {
        LoadFlowParameters::default().with_dc(true)
    }

    fn reference_flow(grid: &Grid, params: &LoadFlowParameters, branch: &str) -> f64 {
        let load_flow = LoadFlow::new(params.clone());
        let mut networks = load_flow.build(grid).unwrap();
        load_flow.run_on(&mut networks).unwrap().branch(branch).unwrap().p1
    }

    #[test]
    fn compensated_outage_matches_a_grid_without_the_line() {
        let grid = bridge_grid();
        let params = dc_params();
        let result = ContingencyAnalysis::new(params.clone())
            .run(&grid, &[Contingency::branch("L12A")], &[])
            .unwrap();
        let state = result.contingency("L12A").unwrap();
        assert_eq!(state.status, StateStatus::Success);
        assert!(state.branch("L12A").unwrap().p1.is_nan());

        let mut outaged = bridge_grid();
        outaged.lines.retain(|l| l.id != "L12A");
        let expected = reference_flow(&outaged, &params, "L12B");
        assert!((state.branch("L12B").unwrap().p1 - expected).abs() < 1e-6);
    }

    #[test]
    fn lost_buses_report_nan_and_slack_side_rebalances() {
        let grid = bridge_grid();
        let result = ContingencyAnalysis::new(dc_params())
            .run(&grid, &[Contingency::branch("L23")], &[])
            .unwrap();
        let state = result.contingency("L23").unwrap();
        assert_eq!(state.status, StateStatus::Success);
        assert!(state.bus("VL3_0").unwrap().angle.is_nan());
        assert!(state.branch("L23").unwrap().p1.is_nan());
        // 250 MW of load left on the slack side, carried by both lines
        let total = state.branch("L12A").unwrap().p1 + state.branch("L12B").unwrap().p1;
        assert!((total - 250.0).abs() < 1e-6, "{total}");
        // the base case is untouched
        assert!(result.pre_contingency.branch("L23").unwrap().p1.is_finite());
    }

    #[test]
    fn reclosing_reproduces_the_base_case_exactly() {
        let grid = bridge_grid();
        let contingencies = [Contingency::branch("L12A"), Contingency::branch("L12B")];
        let strategies = [
            OperatorStrategy::new("reclose", "L12A", Condition::Always, vec![Action::CloseBranch("L12A".into())]),
            OperatorStrategy::new(
                "swap",
                "L12A",
                Condition::Always,
                vec![Action::CloseBranch("L12A".into()), Action::OpenBranch("L12B".into())],
            ),
        ];
        for params in [dc_params(), LoadFlowParameters::default()] {
            let result = ContingencyAnalysis::new(params)
                .run(&grid, &contingencies, &strategies)
                .unwrap();
            let reclosed = result.operator_strategy("reclose").unwrap();
            assert_eq!(reclosed.status, StateStatus::Success);
            assert_bitwise_equal(reclosed, &result.pre_contingency);
            let swapped = result.operator_strategy("swap").unwrap();
            assert_bitwise_equal(swapped, result.contingency("L12B").unwrap());
        }
    }

    /// Same ids and bit-identical values; DC reactive fields are NaN on both sides.
    fn assert_bitwise_equal(a: &PostContingencyResult, b: &PostContingencyResult) {
        let bits = |values: &[f64]| values.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(a.branches.len(), b.branches.len());
        for (x, y) in a.branches.iter().zip(&b.branches) {
            assert_eq!(x.id, y.id);
            let (f, g) = (&x.flow, &y.flow);
            assert_eq!(
                bits(&[f.p1, f.q1, f.i1, f.p2, f.q2, f.i2]),
                bits(&[g.p1, g.q1, g.i1, g.p2, g.q2, g.i2]),
                "{}: {f:?} vs {g:?}",
                x.id
            );
        }
        assert_eq!(a.buses.len(), b.buses.len());
        for (x, y) in a.buses.iter().zip(&b.buses) {
            assert_eq!(x.id, y.id);
            assert_eq!(bits(&[x.v, x.angle]), bits(&[y.v, y.angle]), "{}", x.id);
        }
    }

    #[test]
    fn untriggered_strategy_has_no_values() {
        let grid = bridge_grid();
        let strategies = [OperatorStrategy::new(
            "relieve",
            "L12A",
            Condition::BranchFlowAbove {
                branch_id: "L12B".into(),
                threshold_mw: 10_000.0,
            },
            vec![Action::OpenBranch("L23".into())],
        )];
        let result = ContingencyAnalysis::new(dc_params())
            .run(&grid, &[Contingency::branch("L12A")], &strategies)
            .unwrap();
        let state = result.operator_strategy("relieve").unwrap();
        assert_eq!(state.status, StateStatus::NoImpact);
        assert!(state.branches.is_empty());
    }

    #[test]
    fn ac_outage_matches_a_full_solve() {
        let params = LoadFlowParameters::default()
            .with_distributed_slack(false)
            .with_slack_bus_ids(&["VL1"]);
        let mut bridge = bridge_grid();
        bridge.lines.retain(|l| l.id != "L12A");
        let mut pst = phase_shifter_grid();
        pst.two_windings_transformers.retain(|t| t.id != "PS13");
        let cases = [
            (bridge_grid(), "L12A", bridge, ["L12B", "L23"], "VL2_0"),
            (phase_shifter_grid(), "PS13", pst, ["L23", "L41"], "VL3_0"),
        ];
        for (grid, outage, outaged, monitored, bus) in cases {
            let result = ContingencyAnalysis::new(params.clone())
                .run(&grid, &[Contingency::branch(outage)], &[])
                .unwrap();
            let state = result.contingency(outage).unwrap();
            assert_eq!(state.status, StateStatus::Success);

            let load_flow = LoadFlow::new(params.clone());
            let mut networks = load_flow.build(&outaged).unwrap();
            let expected = load_flow.run_on(&mut networks).unwrap();
            // within the Newton tolerance of 1e-6 pu on both sides
            for id in monitored {
                let (got, want) = (state.branch(id).unwrap(), expected.branch(id).unwrap());
                assert!((got.p1 - want.p1).abs() < 1e-2, "{outage}/{id}: p1 {} vs {}", got.p1, want.p1);
                assert!((got.q1 - want.q1).abs() < 1e-2, "{outage}/{id}: q1 {} vs {}", got.q1, want.q1);
            }
            let (v, v_ref) = (state.bus(bus).unwrap().v, expected.bus(bus).unwrap().v);
            assert!((v - v_ref).abs() < 1e-2, "{outage}: {v} vs {v_ref}");
        }
    }

    #[test]
    fn bus_contingency_on_the_slack_selects_a_new_one() {
        let grid = bridge_grid();
        let contingency = Contingency::new("bus1", vec![ContingencyElement::Bus("VL1_0".into())]);
        let result = ContingencyAnalysis::new(dc_params())
            .run(&grid, &[contingency], &[])
            .unwrap();
        let state = result.contingency("bus1").unwrap();
        assert_eq!(state.status, StateStatus::Success);
        assert!(state.bus("VL1_0").unwrap().angle.is_nan());
        assert!(state.bus("VL2_0").unwrap().angle.is_finite());
        assert!(state.branch("L23").unwrap().p1.is_finite());
    }

    #[test]
    fn cancelled_analysis_stops() {
        let grid = bridge_grid();
        let token = CancellationToken::new();
        token.cancel();
        let err = ContingencyAnalysis::new(dc_params())
            .with_cancellation(token)
            .run(&grid, &[Contingency::branch("L12A")], &[])
            .unwrap_err();
        assert!(matches!(err, GridError::Cancelled));
    }
}
