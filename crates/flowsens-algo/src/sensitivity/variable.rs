//! Right-hand sides of the sensitivity variables at a state.
//!
//! A target variable (injection, voltage target, HVDC setpoint) moves the
//! right-hand side of the rows reading it. A term parameter (phase shift,
//! emulation offset) moves the terms depending on it, which is the same as
//! moving the right-hand side by the opposite amount. Either way `J dx = rhs`
//! gives the state change per engineering unit of the variable.

use super::factor::{NetworkVariable, VariableTarget};
use super::SensitivityVariableType;
use crate::config::LoadFlowParameters;
use crate::equations::{EquationSystem, TargetRef, Term, Variable, VariableType};
use crate::network::LfNetwork;

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Variable outside the slack component.
    Unreachable,
    /// Variable not in the network, disconnected, or without any row.
    Absent,
    Rows {
        /// Sparse right-hand side per engineering unit, entries may repeat.
        rhs: Vec<(usize, f64)>,
        /// Parameters shifted directly, read by function gradients that
        /// depend on them.
        direct: Vec<(Variable, f64)>,
    },
}

/// Per-state data shared by all variables.
pub struct VariableContext<'a> {
    net: &'a LfNetwork,
    system: &'a EquationSystem,
    /// Rows absorbing a unit injection through distributed slack.
    slack_rows: Vec<(usize, f64)>,
}

impl<'a> VariableContext<'a> {
    pub fn new(net: &'a LfNetwork, system: &'a EquationSystem, params: &LoadFlowParameters) -> Self {
        let mut slack_rows = Vec::new();
        if params.distributed_slack {
            for (bus, weight) in net.participation_weights(params.balance_type) {
                slack_rows.extend(
                    system
                        .target_rows(|t| *t == TargetRef::BusP(bus))
                        .into_iter()
                        .map(|(row, c)| (row, weight * c)),
                );
            }
        }
        Self {
            net,
            system,
            slack_rows,
        }
    }

    /// Effect of a variable, set members weighted and normalised over the
    /// members present in this state.
    pub fn effect(&self, variable: &NetworkVariable) -> Effect {
        if let [(target, _)] = variable.members.as_slice() {
            return self.member_effect(variable.variable_type, *target);
        }
        let mut unreachable = false;
        let mut present: Vec<(Vec<(usize, f64)>, Vec<(Variable, f64)>, f64)> = Vec::new();
        for &(target, weight) in &variable.members {
            match self.member_effect(variable.variable_type, target) {
                Effect::Unreachable => unreachable = true,
                Effect::Absent => {}
                Effect::Rows { rhs, direct } => present.push((rhs, direct, weight)),
            }
        }
        let total: f64 = present.iter().map(|(_, _, w)| w).sum();
        if present.is_empty() || total == 0.0 {
            return if unreachable { Effect::Unreachable } else { Effect::Absent };
        }
        let mut rhs = Vec::new();
        let mut direct = Vec::new();
        for (member_rhs, member_direct, weight) in present {
            let share = weight / total;
            rhs.extend(member_rhs.into_iter().map(|(row, c)| (row, share * c)));
            direct.extend(member_direct.into_iter().map(|(var, c)| (var, share * c)));
        }
        Effect::Rows { rhs, direct }
    }

    /// Unit injection at `bus`, active or reactive.
    fn injection_effect(&self, variable_type: SensitivityVariableType, bus: usize, disabled: bool) -> Effect {
        if self.net.buses[bus].disabled {
            return Effect::Unreachable;
        }
        if disabled {
            return Effect::Absent;
        }
        let rhs = if variable_type == SensitivityVariableType::InjectionReactivePower {
            self.system
                .target_rows(|t| matches!(t, TargetRef::BusQ(b) | TargetRef::BusFixedQ(b) if *b == bus))
        } else {
            self.injection_rows(bus, 1.0)
        };
        rows(scale(rhs, 1.0 / self.net.base_power), Vec::new())
    }

    fn member_effect(&self, variable_type: SensitivityVariableType, target: VariableTarget) -> Effect {
        let net = self.net;
        let sb = net.base_power;
        match target {
            VariableTarget::Generator(g) => {
                let generator = &net.generators[g];
                self.injection_effect(variable_type, generator.bus, generator.disabled)
            }
            VariableTarget::Load(l) => {
                let load = &net.loads[l];
                self.injection_effect(variable_type, load.bus, load.disabled)
            }
            VariableTarget::Phase(branch) => {
                let b = &net.branches[branch];
                let lost = |bus: Option<usize>| bus.is_some_and(|i| net.buses[i].disabled);
                if lost(b.bus1) || lost(b.bus2) {
                    return Effect::Unreachable;
                }
                if b.disabled {
                    return Effect::Absent;
                }
                let alpha = Variable::new(branch, VariableType::BranchAlpha1);
                let per_degree = std::f64::consts::PI / 180.0;
                let mut rhs = Vec::new();
                let mut derivatives = Vec::new();
                for term in self.system.branch_terms(branch) {
                    derivatives.clear();
                    term.derivatives(net, self.system.context(), &mut derivatives);
                    let d: f64 = derivatives.iter().filter(|(v, _)| *v == alpha).map(|(_, d)| d).sum();
                    if d == 0.0 {
                        continue;
                    }
                    rhs.extend(
                        self.system
                            .term_rows(&term)
                            .iter()
                            .map(|&(row, c)| (row, -c * d * per_degree)),
                    );
                }
                rows(rhs, vec![(alpha, per_degree)])
            }
            VariableTarget::TargetVoltage(bus) => {
                if net.buses[bus].disabled {
                    return Effect::Unreachable;
                }
                let controls: Vec<usize> = net
                    .voltage_controls
                    .iter()
                    .filter(|vc| vc.controlled_bus == bus)
                    .map(|vc| vc.num)
                    .collect();
                let rhs = self
                    .system
                    .target_rows(|t| matches!(t, TargetRef::ControlV(c) if controls.contains(c)));
                rows(scale(rhs, 1.0 / net.buses[bus].nominal_v), Vec::new())
            }
            VariableTarget::Hvdc(h) => {
                let hvdc = &net.hvdcs[h];
                if hvdc.disabled {
                    return Effect::Absent;
                }
                let ends = [hvdc.bus1, hvdc.bus2];
                if ends.iter().flatten().any(|&b| net.buses[b].disabled) {
                    return Effect::Unreachable;
                }
                if hvdc.emulation_active() {
                    let mut rhs = Vec::new();
                    for term in [Term::HvdcP1(h), Term::HvdcP2(h)] {
                        let d = term.emulation_offset_derivative(net);
                        rhs.extend(
                            self.system
                                .term_rows(&term)
                                .iter()
                                .map(|&(row, c)| (row, -c * d / sb)),
                        );
                    }
                    return rows(rhs, Vec::new());
                }
                let (d1, d2) = hvdc.setpoint_injection_derivatives(sb);
                let mut rhs = Vec::new();
                for (bus, d) in [(hvdc.bus1, d1), (hvdc.bus2, d2)] {
                    if let Some(bus) = bus {
                        rhs.extend(self.injection_rows(bus, d / sb));
                    }
                }
                rows(rhs, Vec::new())
            }
        }
    }

    /// Rows of a unit active injection at `bus`, net of what distributed
    /// slack takes back.
    fn injection_rows(&self, bus: usize, amount: f64) -> Vec<(usize, f64)> {
        let mut rhs = scale(self.system.target_rows(|t| *t == TargetRef::BusP(bus)), amount);
        rhs.extend(self.slack_rows.iter().map(|&(row, c)| (row, -amount * c)));
        rhs
    }
}

fn scale(mut rhs: Vec<(usize, f64)>, factor: f64) -> Vec<(usize, f64)> {
    for (_, c) in &mut rhs {
        *c *= factor;
    }
    rhs
}

fn rows(rhs: Vec<(usize, f64)>, direct: Vec<(Variable, f64)>) -> Effect {
    if rhs.iter().all(|(_, c)| *c == 0.0) && direct.is_empty() {
        Effect::Absent
    } else {
        Effect::Rows { rhs, direct }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equations::{EquationType, TermContext};
    use crate::test_utils::meshed_network;

    fn dc_network() -> LfNetwork {
        let mut net = meshed_network();
        net.buses[0].slack = true;
        net.buses[0].reference = true;
        net.slack_buses = vec![0];
        net.reference_bus = Some(0);
        net.slack_weights = vec![1.0];
        net
    }

    fn injection(net: &LfNetwork, load: &str) -> NetworkVariable {
        NetworkVariable {
            variable_type: SensitivityVariableType::InjectionActivePower,
            members: vec![(VariableTarget::Load(net.load_by_id(load).unwrap()), 1.0)],
        }
    }

    fn dense(system: &EquationSystem, effect: &Effect) -> Vec<f64> {
        let mut b = vec![0.0; system.len()];
        if let Effect::Rows { rhs, .. } = effect {
            for &(row, c) in rhs {
                b[row] += c;
            }
        }
        b
    }

    #[test]
    fn distributed_slack_takes_back_the_injection() {
        let net = dc_network();
        let system = EquationSystem::build_dc(&net, TermContext::default()).unwrap();
        let p = |bus| system.row(EquationType::BusTargetP, bus).unwrap();

        let params = LoadFlowParameters::default().with_distributed_slack(false);
        let ctx = VariableContext::new(&net, &system, &params);
        let b = dense(&system, &ctx.effect(&injection(&net, "LD3")));
        assert!((b[p(3)] - 0.01).abs() < 1e-15);
        assert_eq!(b[p(2)], 0.0);

        // G0 and G2 share by max P, 10 and 5 pu
        let params = LoadFlowParameters::default().with_distributed_slack(true);
        let ctx = VariableContext::new(&net, &system, &params);
        let b = dense(&system, &ctx.effect(&injection(&net, "LD3")));
        assert!((b[p(3)] - 0.01).abs() < 1e-15);
        assert!((b[p(2)] + 0.01 / 3.0).abs() < 1e-15);
    }

    #[test]
    fn set_weights_are_normalised_over_present_members() {
        let mut net = dc_network();
        let system = EquationSystem::build_dc(&net, TermContext::default()).unwrap();
        let params = LoadFlowParameters::default().with_distributed_slack(false);
        let g2 = net.generator_by_id("G2").unwrap();
        let ld3 = net.load_by_id("LD3").unwrap();
        let set = NetworkVariable {
            variable_type: SensitivityVariableType::InjectionActivePower,
            members: vec![(VariableTarget::Generator(g2), 3.0), (VariableTarget::Load(ld3), 1.0)],
        };
        let p = |bus| system.row(EquationType::BusTargetP, bus).unwrap();
        let b = dense(&system, &VariableContext::new(&net, &system, &params).effect(&set));
        assert!((b[p(2)] - 0.0075).abs() < 1e-15);
        assert!((b[p(3)] - 0.0025).abs() < 1e-15);

        net.generators[g2].disabled = true;
        let b = dense(&system, &VariableContext::new(&net, &system, &params).effect(&set));
        assert_eq!(b[p(2)], 0.0);
        assert!((b[p(3)] - 0.01).abs() < 1e-15);

        net.buses[3].disabled = true;
        assert_eq!(VariableContext::new(&net, &system, &params).effect(&set), Effect::Unreachable);
    }
}
