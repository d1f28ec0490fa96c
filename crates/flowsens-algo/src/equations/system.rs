//! Equation system of one network: rows, columns and the sparse Jacobian.

use super::equation::{Equation, EquationType, TargetRef};
use super::terms::{Term, TermContext};
use super::variable::{Variable, VariableSet, VariableType};
use crate::network::{BranchConnection, LfNetwork, MergeStatus, VoltageControlKind};
use flowsens_core::{GridError, GridResult};
use sprs::{CsMat, TriMat};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct EquationSystem {
    dc: bool,
    ctx: TermContext,
    variables: VariableSet,
    equations: Vec<Equation>,
    rows: HashMap<(EquationType, usize), usize>,
    /// Rows each term appears in, with its coefficient there.
    term_rows: HashMap<Term, Vec<(usize, f64)>>,
}

/// Power leaving `bus` through its branches, shunts and emulated HVDC links.
pub(crate) fn bus_power_terms(net: &LfNetwork, bus: usize, dc: bool, tree: &[bool], reactive: bool) -> Vec<(f64, Term)> {
    let mut terms = Vec::new();
    for &br in &net.buses[bus].branches {
        let connection = net.branch_connection(br);
        if connection == BranchConnection::None {
            continue;
        }
        let branch = &net.branches[br];
        let side1 = branch.bus1 == Some(bus);
        if net.is_zero_impedance(br, dc) {
            if tree[br] && connection == BranchConnection::Both {
                let sign = if side1 { 1.0 } else { -1.0 };
                terms.push((sign, if reactive { Term::DummyQ(br) } else { Term::DummyP(br) }));
            }
            continue;
        }
        if dc {
            if connection == BranchConnection::Both {
                terms.push((1.0, if side1 { Term::DcP1(br) } else { Term::DcP2(br) }));
            }
            continue;
        }
        let term = match (connection, side1, reactive) {
            (BranchConnection::Both, true, false) => Term::ClosedP1(br),
            (BranchConnection::Both, true, true) => Term::ClosedQ1(br),
            (BranchConnection::Both, false, false) => Term::ClosedP2(br),
            (BranchConnection::Both, false, true) => Term::ClosedQ2(br),
            (BranchConnection::Side1Only, _, false) => Term::OpenP1(br),
            (BranchConnection::Side1Only, _, true) => Term::OpenQ1(br),
            (BranchConnection::Side2Only, _, false) => Term::OpenP2(br),
            (BranchConnection::Side2Only, _, true) => Term::OpenQ2(br),
            (BranchConnection::None, _, _) => continue,
        };
        terms.push((1.0, term));
    }
    if !dc {
        for &sh in &net.buses[bus].shunts {
            if !net.shunts[sh].disabled {
                terms.push((1.0, if reactive { Term::ShuntQ(sh) } else { Term::ShuntP(sh) }));
            }
        }
    }
    if !reactive {
        for &h in &net.buses[bus].hvdcs {
            let hvdc = &net.hvdcs[h];
            let ends_enabled = [hvdc.bus1, hvdc.bus2]
                .into_iter()
                .flatten()
                .all(|b| !net.buses[b].disabled);
            if hvdc.emulation_active() && ends_enabled {
                terms.push((1.0, if hvdc.bus1 == Some(bus) { Term::HvdcP1(h) } else { Term::HvdcP2(h) }));
            }
        }
    }
    terms
}

/// Power leaving a bus at the current network state, per-unit.
pub fn bus_power(net: &LfNetwork, bus: usize, dc: bool, reactive: bool, ctx: TermContext) -> f64 {
    let tree = net.zero_impedance_spanning_tree(dc);
    bus_power_terms(net, bus, dc, &tree, reactive)
        .iter()
        .map(|(c, t)| c * t.value(net, ctx))
        .sum()
}

/// Share of the slack mismatch of a slack bus, never zero.
fn slack_weight(net: &LfNetwork, bus: usize) -> f64 {
    net.slack_buses
        .iter()
        .position(|&b| b == bus)
        .and_then(|i| net.slack_weights.get(i))
        .copied()
        .filter(|w| *w > 0.0)
        .unwrap_or(1.0)
}

/// Reactive sharing key of a controller bus.
fn reactive_key(net: &LfNetwork, bus: usize) -> f64 {
    let key: f64 = net
        .regulating_generators(bus)
        .map(|g| net.generators[g].q_range(net.base_power))
        .sum();
    if key.is_finite() && key > 0.0 {
        key
    } else {
        1.0
    }
}

fn variable_value(net: &LfNetwork, var: &Variable) -> f64 {
    match var.kind {
        VariableType::BusV => net.buses[var.element].v,
        VariableType::BusPhi => net.buses[var.element].angle,
        VariableType::BranchAlpha1 => net.branches[var.element].pi.a1(),
        VariableType::BranchRho1 => net.branches[var.element].pi.r1(),
        VariableType::ShuntB => net.shunts[var.element].b,
        VariableType::DummyP => net.branches[var.element].dummy_p,
        VariableType::DummyQ => net.branches[var.element].dummy_q,
    }
}

fn set_variable(net: &mut LfNetwork, var: &Variable, value: f64) {
    match var.kind {
        VariableType::BusV => net.buses[var.element].v = value,
        VariableType::BusPhi => net.buses[var.element].angle = value,
        VariableType::BranchAlpha1 => net.branches[var.element].pi.set_a1(value),
        VariableType::BranchRho1 => net.branches[var.element].pi.set_r1(value),
        VariableType::ShuntB => net.shunts[var.element].b = value,
        VariableType::DummyP => net.branches[var.element].dummy_p = value,
        VariableType::DummyQ => net.branches[var.element].dummy_q = value,
    }
}

/// Accumulates equations, enforcing one row per `(kind, element)`.
struct SystemBuilder {
    variables: VariableSet,
    equations: Vec<Equation>,
    rows: HashMap<(EquationType, usize), usize>,
}

impl SystemBuilder {
    fn new() -> Self {
        Self {
            variables: VariableSet::new(),
            equations: Vec::new(),
            rows: HashMap::new(),
        }
    }

    fn push(&mut self, equation: Equation) -> GridResult<()> {
        let key = (equation.kind, equation.element);
        if self.rows.contains_key(&key) {
            return Err(GridError::Structural(format!(
                "duplicate {:?} equation on element {}",
                equation.kind, equation.element
            )));
        }
        self.rows.insert(key, self.equations.len());
        self.equations.push(equation);
        Ok(())
    }

    fn finish(self, net: &LfNetwork, dc: bool, ctx: TermContext) -> GridResult<EquationSystem> {
        if self.equations.len() != self.variables.len() {
            return Err(GridError::Structural(format!(
                "component {}: {} equations for {} variables",
                net.num_sc,
                self.equations.len(),
                self.variables.len()
            )));
        }
        let mut term_rows: HashMap<Term, Vec<(usize, f64)>> = HashMap::new();
        for (row, eq) in self.equations.iter().enumerate() {
            for &(coefficient, term) in &eq.terms {
                term_rows.entry(term).or_default().push((row, coefficient));
            }
        }
        tracing::debug!(
            component = net.num_sc,
            dc,
            size = self.equations.len(),
            "equation system built"
        );
        Ok(EquationSystem {
            dc,
            ctx,
            variables: self.variables,
            equations: self.equations,
            rows: self.rows,
            term_rows,
        })
    }
}

impl EquationSystem {
    /// Active power rows: angle reference, slack sharing and balances.
    fn add_active_balances(
        builder: &mut SystemBuilder,
        net: &LfNetwork,
        dc: bool,
        tree: &[bool],
    ) -> GridResult<()> {
        let reference = net.reference_bus.ok_or_else(|| {
            GridError::Structural(format!("component {} has no reference bus", net.num_sc))
        })?;
        if net.buses[reference].disabled {
            return Err(GridError::Structural(format!(
                "reference bus '{}' is disabled",
                net.buses[reference].id
            )));
        }
        let w_ref = slack_weight(net, reference);
        for bus in net.enabled_buses().map(|b| b.num) {
            let equation = if bus == reference {
                Equation::new(bus, EquationType::BusTargetPhi)
                    .with_term(1.0, Term::BusPhi(bus))
                    .with_target(1.0, TargetRef::Constant(0.0))
            } else if net.buses[bus].slack {
                let w = slack_weight(net, bus);
                Equation::new(bus, EquationType::BusDistrSlackP)
                    .with_terms(1.0 / w, bus_power_terms(net, bus, dc, tree, false))
                    .with_terms(-1.0 / w_ref, bus_power_terms(net, reference, dc, tree, false))
                    .with_target(1.0 / w, TargetRef::BusP(bus))
                    .with_target(-1.0 / w_ref, TargetRef::BusP(reference))
            } else {
                Equation::new(bus, EquationType::BusTargetP)
                    .with_terms(1.0, bus_power_terms(net, bus, dc, tree, false))
                    .with_target(1.0, TargetRef::BusP(bus))
            };
            builder.push(equation)?;
        }
        Ok(())
    }

    fn add_phase_controls(builder: &mut SystemBuilder, net: &LfNetwork, dc: bool) -> GridResult<()> {
        for (br, branch) in net.branches.iter().enumerate() {
            if !branch.has_active_phase_control()
                || net.branch_connection(br) != BranchConnection::Both
                || !branch.pi.is_tap_dependent()
                || net.is_zero_impedance(br, dc)
            {
                continue;
            }
            builder
                .variables
                .add(Variable::new(br, VariableType::BranchAlpha1));
            let flow = if dc { Term::DcP1(br) } else { Term::ClosedP1(br) };
            builder.push(
                Equation::new(br, EquationType::BranchTargetP)
                    .with_term(1.0, flow)
                    .with_target(1.0, TargetRef::PhaseTarget(br)),
            )?;
        }
        Ok(())
    }

    /// Build the Newton-Raphson system. Refreshes voltage control merging
    /// first, so the structure follows the current topology.
    pub fn build_ac(net: &mut LfNetwork, ctx: TermContext) -> GridResult<Self> {
        net.update_voltage_control_status();
        let net = &*net;
        let tree = net.zero_impedance_spanning_tree(false);
        let mut builder = SystemBuilder::new();

        for bus in net.enabled_buses() {
            builder.variables.add(Variable::v(bus.num));
            builder.variables.add(Variable::phi(bus.num));
        }
        Self::add_active_balances(&mut builder, net, false, &tree)?;

        let mut q_controllers: HashSet<usize> = HashSet::new();
        for (c, vc) in net.voltage_controls.iter().enumerate() {
            if vc.kind == VoltageControlKind::Generator && vc.merge_status == MergeStatus::Main {
                q_controllers.extend(net.active_controllers(c));
            }
        }
        for bus in net.enabled_buses().map(|b| b.num) {
            if q_controllers.contains(&bus) {
                continue;
            }
            builder.push(
                Equation::new(bus, EquationType::BusTargetQ)
                    .with_terms(1.0, bus_power_terms(net, bus, false, &tree, true))
                    .with_target(1.0, TargetRef::BusQ(bus)),
            )?;
        }

        for (c, vc) in net.voltage_controls.iter().enumerate() {
            if vc.merge_status != MergeStatus::Main {
                continue;
            }
            let active = net.active_controllers(c);
            let Some(&first) = active.first() else {
                continue;
            };
            let target_v = Equation::new(vc.controlled_bus, EquationType::BusTargetV)
                .with_term(1.0, Term::BusV(vc.controlled_bus))
                .with_target(1.0, TargetRef::ControlV(c));
            match vc.kind {
                VoltageControlKind::Generator => {
                    builder.push(target_v)?;
                    let k0 = reactive_key(net, first);
                    for &bus in &active[1..] {
                        let k = reactive_key(net, bus);
                        builder.push(
                            Equation::new(bus, EquationType::DistrQ)
                                .with_terms(1.0 / k, bus_power_terms(net, bus, false, &tree, true))
                                .with_terms(-1.0 / k0, bus_power_terms(net, first, false, &tree, true))
                                .with_target(1.0 / k, TargetRef::BusFixedQ(bus))
                                .with_target(-1.0 / k0, TargetRef::BusFixedQ(first)),
                        )?;
                    }
                }
                VoltageControlKind::Transformer => {
                    for &br in &active {
                        builder
                            .variables
                            .add(Variable::new(br, VariableType::BranchRho1));
                    }
                    builder.push(target_v)?;
                    let r0 = net.branches[first].pi.r1();
                    for &br in &active[1..] {
                        builder.push(
                            Equation::new(br, EquationType::DistrRho)
                                .with_term(1.0, Term::BranchRho1(br))
                                .with_term(-1.0, Term::BranchRho1(first))
                                .with_target(1.0, TargetRef::Constant(net.branches[br].pi.r1() - r0)),
                        )?;
                    }
                }
                VoltageControlKind::Shunt => {
                    for &sh in &active {
                        builder
                            .variables
                            .add(Variable::new(sh, VariableType::ShuntB));
                    }
                    builder.push(target_v)?;
                    let b_max = |sh: usize| {
                        let b = net.shunts[sh].b_max();
                        if b.abs() > 0.0 {
                            b
                        } else {
                            1.0
                        }
                    };
                    for &sh in &active[1..] {
                        builder.push(
                            Equation::new(sh, EquationType::DistrShuntB)
                                .with_term(1.0 / b_max(sh), Term::ShuntB(sh))
                                .with_term(-1.0 / b_max(first), Term::ShuntB(first))
                                .with_target(1.0, TargetRef::Constant(0.0)),
                        )?;
                    }
                }
            }
        }

        Self::add_phase_controls(&mut builder, net, false)?;

        for (br, in_tree) in tree.iter().enumerate() {
            if !in_tree {
                continue;
            }
            let branch = &net.branches[br];
            let (Some(b1), Some(b2)) = (branch.bus1, branch.bus2) else {
                continue;
            };
            builder.variables.add(Variable::new(br, VariableType::DummyP));
            builder.variables.add(Variable::new(br, VariableType::DummyQ));
            builder.push(
                Equation::new(br, EquationType::ZeroV)
                    .with_term(1.0, Term::BusV(b1))
                    .with_term(-1.0, Term::BusV(b2))
                    .with_target(1.0, TargetRef::Constant(0.0)),
            )?;
            builder.push(
                Equation::new(br, EquationType::ZeroPhi)
                    .with_term(1.0, Term::BusPhi(b1))
                    .with_term(-1.0, Term::BusPhi(b2))
                    .with_target(1.0, TargetRef::Constant(0.0)),
            )?;
        }

        builder.finish(net, false, ctx)
    }

    /// Build the linear DC system: angles only, lossless branches.
    pub fn build_dc(net: &LfNetwork, ctx: TermContext) -> GridResult<Self> {
        let tree = net.zero_impedance_spanning_tree(true);
        let mut builder = SystemBuilder::new();
        for bus in net.enabled_buses() {
            builder.variables.add(Variable::phi(bus.num));
        }
        Self::add_active_balances(&mut builder, net, true, &tree)?;
        Self::add_phase_controls(&mut builder, net, true)?;
        for (br, in_tree) in tree.iter().enumerate() {
            if !in_tree {
                continue;
            }
            let branch = &net.branches[br];
            let (Some(b1), Some(b2)) = (branch.bus1, branch.bus2) else {
                continue;
            };
            builder.variables.add(Variable::new(br, VariableType::DummyP));
            builder.push(
                Equation::new(br, EquationType::ZeroPhi)
                    .with_term(1.0, Term::BusPhi(b1))
                    .with_term(-1.0, Term::BusPhi(b2))
                    .with_target(1.0, TargetRef::Constant(0.0)),
            )?;
        }
        builder.finish(net, true, ctx)
    }

    pub fn is_dc(&self) -> bool {
        self.dc
    }

    pub fn context(&self) -> TermContext {
        self.ctx
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub fn row(&self, kind: EquationType, element: usize) -> Option<usize> {
        self.rows.get(&(kind, element)).copied()
    }

    pub fn column(&self, variable: &Variable) -> Option<usize> {
        self.variables.column(variable)
    }

    pub fn state_vector(&self, net: &LfNetwork) -> Vec<f64> {
        self.variables.iter().map(|v| variable_value(net, v)).collect()
    }

    pub fn apply_state(&self, net: &mut LfNetwork, x: &[f64]) {
        for (var, &value) in self.variables.iter().zip(x) {
            set_variable(net, var, value);
        }
    }

    /// `x += dx` on the network state.
    pub fn apply_increment(&self, net: &mut LfNetwork, dx: &[f64]) {
        for (var, &delta) in self.variables.iter().zip(dx) {
            let value = variable_value(net, var) + delta;
            set_variable(net, var, value);
        }
    }

    pub fn evaluate(&self, net: &LfNetwork) -> Vec<f64> {
        self.equations
            .iter()
            .map(|eq| eq.evaluate(net, self.ctx))
            .collect()
    }

    pub fn targets(&self, net: &LfNetwork) -> Vec<f64> {
        self.equations.iter().map(|eq| eq.target(net)).collect()
    }

    /// `f(x) - target`
    pub fn mismatch(&self, net: &LfNetwork) -> Vec<f64> {
        self.equations
            .iter()
            .map(|eq| eq.evaluate(net, self.ctx) - eq.target(net))
            .collect()
    }

    /// [`mismatch`](Self::mismatch) with the contribution of `removed` taken out.
    pub fn mismatch_without(&self, net: &LfNetwork, removed: &[Term]) -> Vec<f64> {
        let mut mismatch = self.mismatch(net);
        for term in removed {
            let value = term.value(net, self.ctx);
            for &(row, coefficient) in self.term_rows(term) {
                mismatch[row] -= coefficient * value;
            }
        }
        mismatch
    }

    pub fn jacobian(&self, net: &LfNetwork) -> CsMat<f64> {
        self.jacobian_without(net, &[])
    }

    /// Jacobian of [`mismatch_without`](Self::mismatch_without).
    pub fn jacobian_without(&self, net: &LfNetwork, removed: &[Term]) -> CsMat<f64> {
        let n = self.equations.len();
        let mut tri = TriMat::new((n, self.variables.len()));
        let mut scratch = Vec::new();
        for (row, eq) in self.equations.iter().enumerate() {
            for &(coefficient, term) in &eq.terms {
                if removed.contains(&term) {
                    continue;
                }
                scratch.clear();
                term.derivatives(net, self.ctx, &mut scratch);
                for (var, d) in &scratch {
                    if let Some(col) = self.variables.column(var) {
                        tri.add_triplet(row, col, coefficient * d);
                    }
                }
            }
        }
        tri.to_csc()
    }

    /// Rows a term contributes to, with coefficients. Empty when the term is
    /// not part of the system.
    pub fn term_rows(&self, term: &Term) -> &[(usize, f64)] {
        self.term_rows.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Gradient of any term against the system variables, by column.
    pub fn term_gradient(&self, net: &LfNetwork, term: &Term) -> Vec<(usize, f64)> {
        let mut derivatives = Vec::new();
        term.derivatives(net, self.ctx, &mut derivatives);
        let mut gradient: Vec<(usize, f64)> = Vec::with_capacity(derivatives.len());
        for (var, d) in derivatives {
            let Some(col) = self.variables.column(&var) else {
                continue;
            };
            match gradient.iter_mut().find(|(c, _)| *c == col) {
                Some(entry) => entry.1 += d,
                None => gradient.push((col, d)),
            }
        }
        gradient
    }

    /// Terms of a branch that appear in the equations, in a fixed order.
    pub fn branch_terms(&self, branch: usize) -> Vec<Term> {
        [
            Term::ClosedP1(branch),
            Term::ClosedQ1(branch),
            Term::ClosedP2(branch),
            Term::ClosedQ2(branch),
            Term::OpenP1(branch),
            Term::OpenQ1(branch),
            Term::OpenP2(branch),
            Term::OpenQ2(branch),
            Term::DcP1(branch),
            Term::DcP2(branch),
            Term::DummyP(branch),
            Term::DummyQ(branch),
        ]
        .into_iter()
        .filter(|t| self.term_rows.contains_key(t))
        .collect()
    }

    /// Rows whose right-hand side reads a target matched by `select`, with the
    /// target coefficient: the derivative of the right-hand side against it.
    pub fn target_rows(&self, select: impl Fn(&TargetRef) -> bool) -> Vec<(usize, f64)> {
        let mut rows = Vec::new();
        for (row, eq) in self.equations.iter().enumerate() {
            let coefficient: f64 = eq
                .targets
                .iter()
                .filter(|(_, t)| select(t))
                .map(|(c, _)| c)
                .sum();
            if coefficient != 0.0 {
                rows.push((row, coefficient));
            }
        }
        rows
    }
}
