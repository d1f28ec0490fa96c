use super::terms::{Term, TermContext};
use crate::network::LfNetwork;

/// Row kinds. Together with an element index they identify a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EquationType {
    BusTargetP,
    BusTargetQ,
    BusTargetV,
    BusTargetPhi,
    /// Slack share of a secondary slack bus against the reference bus.
    BusDistrSlackP,
    /// Reactive sharing between the controllers of a generator control.
    DistrQ,
    /// Ratio sharing between the transformers of a voltage control.
    DistrRho,
    /// Susceptance sharing between the shunts of a voltage control.
    DistrShuntB,
    BranchTargetP,
    /// Voltage equality across a zero-impedance tree edge.
    ZeroV,
    ZeroPhi,
}

/// Right-hand side contribution, read from the network on each evaluation so
/// that target updates by outer loops are picked up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetRef {
    BusP(usize),
    BusQ(usize),
    /// Reactive target excluding the regulating generators of the bus.
    BusFixedQ(usize),
    ControlV(usize),
    PhaseTarget(usize),
    Constant(f64),
}

impl TargetRef {
    pub fn value(&self, net: &LfNetwork) -> f64 {
        match *self {
            TargetRef::BusP(bus) => net.bus_target_p(bus),
            TargetRef::BusQ(bus) => net.bus_target_q(bus),
            TargetRef::BusFixedQ(bus) => net.bus_fixed_q(bus),
            TargetRef::ControlV(c) => net.voltage_controls[c].target_v,
            TargetRef::PhaseTarget(branch) => net.branches[branch]
                .phase_control
                .as_ref()
                .map_or(0.0, |pc| pc.target_p),
            TargetRef::Constant(value) => value,
        }
    }
}

/// `sum(coef * term) = sum(coef * target)`
#[derive(Debug, Clone)]
pub struct Equation {
    pub element: usize,
    pub kind: EquationType,
    pub terms: Vec<(f64, Term)>,
    pub targets: Vec<(f64, TargetRef)>,
}

impl Equation {
    pub fn new(element: usize, kind: EquationType) -> Self {
        Self {
            element,
            kind,
            terms: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn with_terms(mut self, coefficient: f64, terms: impl IntoIterator<Item = (f64, Term)>) -> Self {
        self.terms
            .extend(terms.into_iter().map(|(c, t)| (coefficient * c, t)));
        self
    }

    pub fn with_term(mut self, coefficient: f64, term: Term) -> Self {
        self.terms.push((coefficient, term));
        self
    }

    pub fn with_target(mut self, coefficient: f64, target: TargetRef) -> Self {
        self.targets.push((coefficient, target));
        self
    }

    pub fn evaluate(&self, net: &LfNetwork, ctx: TermContext) -> f64 {
        self.terms
            .iter()
            .map(|(c, t)| c * t.value(net, ctx))
            .sum()
    }

    pub fn target(&self, net: &LfNetwork) -> f64 {
        self.targets.iter().map(|(c, t)| c * t.value(net)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::two_bus_network;

    #[test]
    fn targets_follow_network_updates() {
        let mut net = two_bus_network();
        let eq = Equation::new(1, EquationType::BusTargetP).with_target(1.0, TargetRef::BusP(1));
        assert!((eq.target(&net) + 2.0).abs() < 1e-12);
        net.loads[0].target_p = 3.0;
        assert!((eq.target(&net) + 3.0).abs() < 1e-12);
    }

    #[test]
    fn scaled_terms_are_summed() {
        let net = two_bus_network();
        let eq = Equation::new(0, EquationType::ZeroV)
            .with_terms(2.0, [(1.0, Term::BusV(0)), (-0.5, Term::BusV(1))]);
        assert!((eq.evaluate(&net, TermContext::default()) - 1.0).abs() < 1e-12);
    }
}
