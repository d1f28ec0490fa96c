//! Monitored functions linearized at a state, in engineering units.
//!
//! A function is a flow term (or a dummy flow variable for a zero-impedance
//! tree edge) read at the current operating point, together with its gradient
//! against the equation variables. Gradients may also name variables the
//! system does not own, such as the phase shift of a branch; the caller
//! decides what those mean.

use super::factor::{FunctionTarget, NetworkFunction};
use super::Quantity;
use crate::equations::{Term, TermContext, Variable, VariableType};
use crate::network::{BranchConnection, LfNetwork};
use flowsens_core::Side;

#[derive(Debug, Clone, PartialEq)]
pub enum Linearized {
    /// Monitored element outside the slack component, or outside the network.
    Unreachable,
    /// Monitored side carries no flow: opened branch, open side, or a
    /// zero-impedance branch closing a loop.
    Zero,
    Value { value: f64, gradient: Vec<(Variable, f64)> },
}

impl Linearized {
    /// Function value reported next to the sensitivities.
    pub fn reference(&self) -> f64 {
        match self {
            Linearized::Unreachable => f64::NAN,
            Linearized::Zero => 0.0,
            Linearized::Value { value, .. } => *value,
        }
    }
}

/// Value and gradient of one per-unit quantity.
#[derive(Debug, Clone, Default)]
struct Affine {
    value: f64,
    gradient: Vec<(Variable, f64)>,
}

impl Affine {
    fn term(net: &LfNetwork, ctx: TermContext, term: Term) -> Self {
        let mut gradient = Vec::new();
        term.derivatives(net, ctx, &mut gradient);
        Self {
            value: term.value(net, ctx),
            gradient,
        }
    }

    fn scaled(mut self, factor: f64) -> Self {
        self.value *= factor;
        for (_, d) in &mut self.gradient {
            *d *= factor;
        }
        self
    }
}

enum SideFlow {
    Unreachable,
    Zero,
    At { bus: usize, p: Affine, q: Affine },
}

fn side_flow(net: &LfNetwork, branch: usize, side: Side, dc: bool, ctx: TermContext) -> SideFlow {
    let b = &net.branches[branch];
    let lost = |bus: Option<usize>| bus.is_some_and(|i| net.buses[i].disabled);
    if lost(b.bus1) || lost(b.bus2) {
        return SideFlow::Unreachable;
    }
    if b.disabled {
        return SideFlow::Zero;
    }
    let bus = if side == Side::One { b.bus1 } else { b.bus2 };
    let Some(bus) = bus else {
        return SideFlow::Zero;
    };
    let connection = net.branch_connection(branch);

    if net.is_zero_impedance(branch, dc) {
        if connection != BranchConnection::Both || !net.zero_impedance_spanning_tree(dc)[branch] {
            return SideFlow::Zero;
        }
        let sign = if side == Side::One { 1.0 } else { -1.0 };
        let dummy = |kind: VariableType, value: f64| Affine {
            value: sign * value,
            gradient: vec![(Variable::new(branch, kind), sign)],
        };
        let p = dummy(VariableType::DummyP, b.dummy_p);
        let q = if dc {
            Affine::default()
        } else {
            dummy(VariableType::DummyQ, b.dummy_q)
        };
        return SideFlow::At { bus, p, q };
    }

    let terms = match (dc, connection, side) {
        (true, BranchConnection::Both, Side::One) => (Term::DcP1(branch), None),
        (true, BranchConnection::Both, _) => (Term::DcP2(branch), None),
        (false, BranchConnection::Both, Side::One) => (Term::ClosedP1(branch), Some(Term::ClosedQ1(branch))),
        (false, BranchConnection::Both, _) => (Term::ClosedP2(branch), Some(Term::ClosedQ2(branch))),
        (false, BranchConnection::Side1Only, Side::One) => (Term::OpenP1(branch), Some(Term::OpenQ1(branch))),
        (false, BranchConnection::Side2Only, Side::Two) => (Term::OpenP2(branch), Some(Term::OpenQ2(branch))),
        _ => return SideFlow::Zero,
    };
    SideFlow::At {
        bus,
        p: Affine::term(net, ctx, terms.0),
        q: terms.1.map(|t| Affine::term(net, ctx, t)).unwrap_or_default(),
    }
}

/// Linearize `function` at the current state of `net`.
pub fn linearize(
    net: &LfNetwork,
    function: &NetworkFunction,
    dc: bool,
    ctx: TermContext,
    dc_power_factor: f64,
) -> Linearized {
    let sb = net.base_power;
    let quantity = function.function_type.quantity();
    match function.target {
        FunctionTarget::Missing => Linearized::Unreachable,
        FunctionTarget::Bus(bus) => {
            let b = &net.buses[bus];
            if b.disabled {
                return Linearized::Unreachable;
            }
            Linearized::Value {
                value: b.v * b.nominal_v,
                gradient: vec![(Variable::v(bus), b.nominal_v)],
            }
        }
        FunctionTarget::Branch { branch, side } => {
            let (bus, p, q) = match side_flow(net, branch, side, dc, ctx) {
                SideFlow::Unreachable => return Linearized::Unreachable,
                SideFlow::Zero => return Linearized::Zero,
                SideFlow::At { bus, p, q } => (bus, p, q),
            };
            let out = match quantity {
                Quantity::ActivePower => p.scaled(sb),
                Quantity::ReactivePower | Quantity::Voltage => q.scaled(sb),
                Quantity::Current if dc => {
                    let u = net.buses[bus].nominal_v;
                    let factor = sb * 1000.0 / (3f64.sqrt() * u * dc_power_factor);
                    let sign = if p.value < 0.0 { -1.0 } else { 1.0 };
                    let value = p.value.abs() * factor;
                    let mut grad = p.scaled(sign * factor);
                    grad.value = value;
                    grad
                }
                Quantity::Current => current(net, bus, &p, &q),
            };
            Linearized::Value {
                value: out.value,
                gradient: out.gradient,
            }
        }
    }
}

/// `i = |s| / v * Ib`; zero flow or voltage has no gradient.
fn current(net: &LfNetwork, bus: usize, p: &Affine, q: &Affine) -> Affine {
    let v = net.buses[bus].v;
    let s = p.value.hypot(q.value);
    if v <= 0.0 || s == 0.0 {
        return Affine::default();
    }
    let ib = net.current_base(bus);
    let mut gradient: Vec<(Variable, f64)> = Vec::with_capacity(p.gradient.len() + q.gradient.len() + 1);
    gradient.extend(p.gradient.iter().map(|&(var, d)| (var, ib * p.value * d / (s * v))));
    gradient.extend(q.gradient.iter().map(|&(var, d)| (var, ib * q.value * d / (s * v))));
    gradient.push((Variable::v(bus), -ib * s / (v * v)));
    Affine {
        value: s / v * ib,
        gradient,
    }
}
