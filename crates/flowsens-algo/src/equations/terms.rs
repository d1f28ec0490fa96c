//! Closed-form equation terms and their analytic derivatives.
//!
//! Every power term is the power leaving a bus through one element, in
//! per-unit. A bus balance equation sums the terms of its elements and equals
//! the net injection target of the bus.
//!
//! Branch model, ideal transformer `r1 e^{j a1}` on side 1:
//!
//! ```text
//! y = 1/|z|, ksi = atan2(r, x)
//! theta1 = ksi - a1 - ph1 + ph2
//! theta2 = ksi + a1 + ph1 - ph2
//! p1 = r1 v1 (g1 r1 v1 + y r1 v1 sin(ksi) - y v2 sin(theta1))
//! q1 = r1 v1 (-b1 r1 v1 + y r1 v1 cos(ksi) - y v2 cos(theta1))
//! p2 = v2 (g2 v2 - y r1 v1 sin(theta2) + y v2 sin(ksi))
//! q2 = v2 (-b2 v2 - y r1 v1 cos(theta2) + y v2 cos(ksi))
//! ```

use super::variable::{Variable, VariableType};
use crate::network::LfNetwork;
use num_complex::Complex64;

/// Evaluation options shared by all terms of a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TermContext {
    /// DC branch susceptance scaled by the transformer ratio.
    pub dc_use_transformer_ratio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Term {
    ClosedP1(usize),
    ClosedQ1(usize),
    ClosedP2(usize),
    ClosedQ2(usize),
    /// Side 1 of a branch open at side 2.
    OpenP1(usize),
    OpenQ1(usize),
    /// Side 2 of a branch open at side 1.
    OpenP2(usize),
    OpenQ2(usize),
    DcP1(usize),
    DcP2(usize),
    ShuntP(usize),
    ShuntQ(usize),
    DummyP(usize),
    DummyQ(usize),
    HvdcP1(usize),
    HvdcP2(usize),
    BusV(usize),
    BusPhi(usize),
    BranchRho1(usize),
    ShuntB(usize),
}

/// Snapshot of the quantities a closed branch term depends on.
struct ClosedBranch {
    y: f64,
    ksi: f64,
    g1: f64,
    b1: f64,
    g2: f64,
    b2: f64,
    r1: f64,
    a1: f64,
    v1: f64,
    v2: f64,
    ph1: f64,
    ph2: f64,
}

fn branch_buses(net: &LfNetwork, branch: usize) -> (usize, usize) {
    match (net.branches[branch].bus1, net.branches[branch].bus2) {
        (Some(b1), Some(b2)) => (b1, b2),
        _ => panic!("closed term on branch '{}' with a missing bus", net.branches[branch].id),
    }
}

impl ClosedBranch {
    fn new(net: &LfNetwork, branch: usize) -> Self {
        let (bus1, bus2) = branch_buses(net, branch);
        let pi = &net.branches[branch].pi;
        Self {
            y: pi.y(),
            ksi: pi.ksi(),
            g1: pi.g1(),
            b1: pi.b1(),
            g2: pi.g2(),
            b2: pi.b2(),
            r1: pi.r1(),
            a1: pi.a1(),
            v1: net.buses[bus1].v,
            v2: net.buses[bus2].v,
            ph1: net.buses[bus1].angle,
            ph2: net.buses[bus2].angle,
        }
    }

    fn theta1(&self) -> f64 {
        self.ksi - self.a1 - self.ph1 + self.ph2
    }

    fn theta2(&self) -> f64 {
        self.ksi + self.a1 + self.ph1 - self.ph2
    }

    fn p1(&self) -> f64 {
        let (y, r1, v1) = (self.y, self.r1, self.v1);
        r1 * v1 * (self.g1 * r1 * v1 + y * r1 * v1 * self.ksi.sin() - y * self.v2 * self.theta1().sin())
    }

    fn q1(&self) -> f64 {
        let (y, r1, v1) = (self.y, self.r1, self.v1);
        r1 * v1 * (-self.b1 * r1 * v1 + y * r1 * v1 * self.ksi.cos() - y * self.v2 * self.theta1().cos())
    }

    fn p2(&self) -> f64 {
        let (y, r1, v2) = (self.y, self.r1, self.v2);
        v2 * (self.g2 * v2 - y * r1 * self.v1 * self.theta2().sin() + y * v2 * self.ksi.sin())
    }

    fn q2(&self) -> f64 {
        let (y, r1, v2) = (self.y, self.r1, self.v2);
        v2 * (-self.b2 * v2 - y * r1 * self.v1 * self.theta2().cos() + y * v2 * self.ksi.cos())
    }

    /// `[dv1, dv2, dph1, dph2, da1, dr1]`
    fn dp1(&self) -> [f64; 6] {
        let (y, r1, v1, v2) = (self.y, self.r1, self.v1, self.v2);
        let (sin_t, cos_t) = self.theta1().sin_cos();
        let inner = 2.0 * self.g1 * r1 * v1 + 2.0 * y * r1 * v1 * self.ksi.sin() - y * v2 * sin_t;
        let dph1 = y * r1 * v1 * v2 * cos_t;
        [r1 * inner, -y * r1 * v1 * sin_t, dph1, -dph1, dph1, v1 * inner]
    }

    fn dq1(&self) -> [f64; 6] {
        let (y, r1, v1, v2) = (self.y, self.r1, self.v1, self.v2);
        let (sin_t, cos_t) = self.theta1().sin_cos();
        let inner = -2.0 * self.b1 * r1 * v1 + 2.0 * y * r1 * v1 * self.ksi.cos() - y * v2 * cos_t;
        let dph1 = -y * r1 * v1 * v2 * sin_t;
        [r1 * inner, -y * r1 * v1 * cos_t, dph1, -dph1, dph1, v1 * inner]
    }

    fn dp2(&self) -> [f64; 6] {
        let (y, r1, v1, v2) = (self.y, self.r1, self.v1, self.v2);
        let (sin_t, cos_t) = self.theta2().sin_cos();
        let dph1 = -y * r1 * v1 * v2 * cos_t;
        [
            -y * r1 * v2 * sin_t,
            2.0 * self.g2 * v2 - y * r1 * v1 * sin_t + 2.0 * y * v2 * self.ksi.sin(),
            dph1,
            -dph1,
            dph1,
            -y * v1 * v2 * sin_t,
        ]
    }

    fn dq2(&self) -> [f64; 6] {
        let (y, r1, v1, v2) = (self.y, self.r1, self.v1, self.v2);
        let (sin_t, cos_t) = self.theta2().sin_cos();
        let dph1 = y * r1 * v1 * v2 * sin_t;
        [
            -y * r1 * v2 * cos_t,
            -2.0 * self.b2 * v2 - y * r1 * v1 * cos_t + 2.0 * y * v2 * self.ksi.cos(),
            dph1,
            -dph1,
            dph1,
            -y * v1 * v2 * cos_t,
        ]
    }
}

/// Admittance seen from the connected side of a branch open at the other side.
fn open_side_admittance(net: &LfNetwork, branch: usize, connected_side1: bool) -> Complex64 {
    let pi = &net.branches[branch].pi;
    let ys = Complex64::new(pi.r(), pi.x()).inv();
    let y1 = Complex64::new(pi.g1(), pi.b1());
    let y2 = Complex64::new(pi.g2(), pi.b2());
    let (near, far) = if connected_side1 { (y1, y2) } else { (y2, y1) };
    let series = ys + far;
    if series.norm() == 0.0 {
        near
    } else {
        near + ys * far / series
    }
}

fn dc_susceptance(net: &LfNetwork, branch: usize, ctx: TermContext) -> f64 {
    let pi = &net.branches[branch].pi;
    let b = 1.0 / pi.x();
    if ctx.dc_use_transformer_ratio {
        b * pi.r1()
    } else {
        b
    }
}

/// Emulated transfer leaving side 1 and its derivative along `ph1 - ph2`.
fn hvdc_transfer(net: &LfNetwork, hvdc: usize) -> (f64, f64) {
    let h = &net.hvdcs[hvdc];
    let (Some(e), Some(b1), Some(b2)) = (h.ac_emulation, h.bus1, h.bus2) else {
        panic!("emulation term on HVDC line '{}' without emulation", h.id);
    };
    let raw = e.p0 + e.k * (net.buses[b1].angle - net.buses[b2].angle);
    if raw > e.p_max {
        (e.p_max, 0.0)
    } else if raw < -e.p_max {
        (-e.p_max, 0.0)
    } else {
        (raw, e.k)
    }
}

impl Term {
    /// Branch the term belongs to, for flow terms.
    pub fn branch(&self) -> Option<usize> {
        match *self {
            Term::ClosedP1(b)
            | Term::ClosedQ1(b)
            | Term::ClosedP2(b)
            | Term::ClosedQ2(b)
            | Term::OpenP1(b)
            | Term::OpenQ1(b)
            | Term::OpenP2(b)
            | Term::OpenQ2(b)
            | Term::DcP1(b)
            | Term::DcP2(b)
            | Term::DummyP(b)
            | Term::DummyQ(b) => Some(b),
            _ => None,
        }
    }

    pub fn value(&self, net: &LfNetwork, ctx: TermContext) -> f64 {
        match *self {
            Term::ClosedP1(b) => ClosedBranch::new(net, b).p1(),
            Term::ClosedQ1(b) => ClosedBranch::new(net, b).q1(),
            Term::ClosedP2(b) => ClosedBranch::new(net, b).p2(),
            Term::ClosedQ2(b) => ClosedBranch::new(net, b).q2(),
            Term::OpenP1(b) | Term::OpenQ1(b) => {
                let bus = net.branches[b].bus1.unwrap_or_else(|| panic!("open term without bus 1"));
                let r1 = net.branches[b].pi.r1();
                let scale = r1 * r1 * net.buses[bus].v * net.buses[bus].v;
                let yeq = open_side_admittance(net, b, true);
                if matches!(self, Term::OpenP1(_)) {
                    scale * yeq.re
                } else {
                    -scale * yeq.im
                }
            }
            Term::OpenP2(b) | Term::OpenQ2(b) => {
                let bus = net.branches[b].bus2.unwrap_or_else(|| panic!("open term without bus 2"));
                let scale = net.buses[bus].v * net.buses[bus].v;
                let yeq = open_side_admittance(net, b, false);
                if matches!(self, Term::OpenP2(_)) {
                    scale * yeq.re
                } else {
                    -scale * yeq.im
                }
            }
            Term::DcP1(b) | Term::DcP2(b) => {
                let (bus1, bus2) = branch_buses(net, b);
                let p1 = dc_susceptance(net, b, ctx)
                    * (net.buses[bus1].angle - net.buses[bus2].angle + net.branches[b].pi.a1());
                if matches!(self, Term::DcP1(_)) {
                    p1
                } else {
                    -p1
                }
            }
            Term::ShuntP(s) => {
                let sh = &net.shunts[s];
                sh.g * net.buses[sh.bus].v.powi(2)
            }
            Term::ShuntQ(s) => {
                let sh = &net.shunts[s];
                -sh.b * net.buses[sh.bus].v.powi(2)
            }
            Term::DummyP(b) => net.branches[b].dummy_p,
            Term::DummyQ(b) => net.branches[b].dummy_q,
            Term::HvdcP1(h) => hvdc_transfer(net, h).0,
            Term::HvdcP2(h) => {
                let (p1, _) = hvdc_transfer(net, h);
                let eff = net.hvdcs[h].efficiency();
                if p1 >= 0.0 {
                    -p1 * eff
                } else {
                    -p1 / eff
                }
            }
            Term::BusV(bus) => net.buses[bus].v,
            Term::BusPhi(bus) => net.buses[bus].angle,
            Term::BranchRho1(b) => net.branches[b].pi.r1(),
            Term::ShuntB(s) => net.shunts[s].b,
        }
    }

    /// Partial derivatives, pushed as `(variable, value)`. Variables the
    /// system does not own are dropped by the caller.
    pub fn derivatives(&self, net: &LfNetwork, ctx: TermContext, out: &mut Vec<(Variable, f64)>) {
        match *self {
            Term::ClosedP1(b) | Term::ClosedQ1(b) | Term::ClosedP2(b) | Term::ClosedQ2(b) => {
                let cb = ClosedBranch::new(net, b);
                let d = match self {
                    Term::ClosedP1(_) => cb.dp1(),
                    Term::ClosedQ1(_) => cb.dq1(),
                    Term::ClosedP2(_) => cb.dp2(),
                    _ => cb.dq2(),
                };
                let (bus1, bus2) = branch_buses(net, b);
                out.push((Variable::v(bus1), d[0]));
                out.push((Variable::v(bus2), d[1]));
                out.push((Variable::phi(bus1), d[2]));
                out.push((Variable::phi(bus2), d[3]));
                out.push((Variable::new(b, VariableType::BranchAlpha1), d[4]));
                out.push((Variable::new(b, VariableType::BranchRho1), d[5]));
            }
            Term::OpenP1(b) | Term::OpenQ1(b) => {
                let bus = net.branches[b].bus1.unwrap_or_else(|| panic!("open term without bus 1"));
                let r1 = net.branches[b].pi.r1();
                let v = net.buses[bus].v;
                let yeq = open_side_admittance(net, b, true);
                let g = if matches!(self, Term::OpenP1(_)) { yeq.re } else { -yeq.im };
                out.push((Variable::v(bus), 2.0 * r1 * r1 * v * g));
                out.push((Variable::new(b, VariableType::BranchRho1), 2.0 * r1 * v * v * g));
            }
            Term::OpenP2(b) | Term::OpenQ2(b) => {
                let bus = net.branches[b].bus2.unwrap_or_else(|| panic!("open term without bus 2"));
                let v = net.buses[bus].v;
                let yeq = open_side_admittance(net, b, false);
                let g = if matches!(self, Term::OpenP2(_)) { yeq.re } else { -yeq.im };
                out.push((Variable::v(bus), 2.0 * v * g));
            }
            Term::DcP1(b) | Term::DcP2(b) => {
                let (bus1, bus2) = branch_buses(net, b);
                let sign = if matches!(self, Term::DcP1(_)) { 1.0 } else { -1.0 };
                let bsus = sign * dc_susceptance(net, b, ctx);
                out.push((Variable::phi(bus1), bsus));
                out.push((Variable::phi(bus2), -bsus));
                out.push((Variable::new(b, VariableType::BranchAlpha1), bsus));
            }
            Term::ShuntP(s) => {
                let sh = &net.shunts[s];
                out.push((Variable::v(sh.bus), 2.0 * sh.g * net.buses[sh.bus].v));
            }
            Term::ShuntQ(s) => {
                let sh = &net.shunts[s];
                let v = net.buses[sh.bus].v;
                out.push((Variable::v(sh.bus), -2.0 * sh.b * v));
                out.push((Variable::new(s, VariableType::ShuntB), -v * v));
            }
            Term::DummyP(b) => out.push((Variable::new(b, VariableType::DummyP), 1.0)),
            Term::DummyQ(b) => out.push((Variable::new(b, VariableType::DummyQ), 1.0)),
            Term::HvdcP1(h) | Term::HvdcP2(h) => {
                let (p1, dp1) = hvdc_transfer(net, h);
                let hvdc = &net.hvdcs[h];
                let factor = match self {
                    Term::HvdcP1(_) => 1.0,
                    _ if p1 >= 0.0 => -hvdc.efficiency(),
                    _ => -1.0 / hvdc.efficiency(),
                };
                if let (Some(b1), Some(b2)) = (hvdc.bus1, hvdc.bus2) {
                    out.push((Variable::phi(b1), factor * dp1));
                    out.push((Variable::phi(b2), -factor * dp1));
                }
            }
            Term::BusV(bus) => out.push((Variable::v(bus), 1.0)),
            Term::BusPhi(bus) => out.push((Variable::phi(bus), 1.0)),
            Term::BranchRho1(b) => out.push((Variable::new(b, VariableType::BranchRho1), 1.0)),
            Term::ShuntB(s) => out.push((Variable::new(s, VariableType::ShuntB), 1.0)),
        }
    }

    /// Derivative against the AC emulation offset `p0` of an HVDC link. Zero
    /// for other terms and while the transfer sits at its limit.
    pub fn emulation_offset_derivative(&self, net: &LfNetwork) -> f64 {
        let (Term::HvdcP1(h) | Term::HvdcP2(h)) = *self else {
            return 0.0;
        };
        let hvdc = &net.hvdcs[h];
        let (Some(e), Some(b1), Some(b2)) = (hvdc.ac_emulation, hvdc.bus1, hvdc.bus2) else {
            return 0.0;
        };
        let raw = e.p0 + e.k * (net.buses[b1].angle - net.buses[b2].angle);
        if raw.abs() > e.p_max {
            return 0.0;
        }
        match self {
            Term::HvdcP1(_) => 1.0,
            _ if raw >= 0.0 => -hvdc.efficiency(),
            _ => -1.0 / hvdc.efficiency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::two_bus_network;

    /// Central difference of a term along one variable.
    fn numeric(net: &mut crate::network::LfNetwork, term: Term, var: Variable) -> f64 {
        let h = 1e-7;
        let read = |net: &crate::network::LfNetwork| term.value(net, TermContext::default());
        let set = |net: &mut crate::network::LfNetwork, delta: f64| match var.kind {
            VariableType::BusV => net.buses[var.element].v += delta,
            VariableType::BusPhi => net.buses[var.element].angle += delta,
            VariableType::BranchAlpha1 => {
                let a1 = net.branches[var.element].pi.a1();
                net.branches[var.element].pi.set_a1(a1 + delta)
            }
            VariableType::BranchRho1 => {
                let r1 = net.branches[var.element].pi.r1();
                net.branches[var.element].pi.set_r1(r1 + delta)
            }
            _ => unreachable!(),
        };
        set(net, h);
        let plus = read(&*net);
        set(net, -2.0 * h);
        let minus = read(&*net);
        set(net, h);
        (plus - minus) / (2.0 * h)
    }

    fn lossy_two_bus() -> crate::network::LfNetwork {
        let mut net = two_bus_network();
        net.branches[0].pi = crate::network::PiModel::Simple(crate::network::SimplePiModel::new(
            0.02, 0.1, 0.01, 0.05, 0.02, 0.04, 1.05, 0.1,
        ));
        net.buses[0].v = 1.02;
        net.buses[1].v = 0.97;
        net.buses[1].angle = -0.08;
        net
    }

    #[test]
    fn analytic_derivatives_match_finite_differences() {
        let mut net = lossy_two_bus();
        for term in [Term::ClosedP1(0), Term::ClosedQ1(0), Term::ClosedP2(0), Term::ClosedQ2(0)] {
            let mut analytic = Vec::new();
            term.derivatives(&net, TermContext::default(), &mut analytic);
            for (var, d) in analytic {
                let fd = numeric(&mut net, term, var);
                assert!((d - fd).abs() < 1e-5, "{term:?} {var:?}: {d} vs {fd}");
            }
        }
    }

    #[test]
    fn lossless_branch_flows_are_opposite() {
        let mut net = two_bus_network();
        net.buses[1].angle = -0.1;
        let p1 = Term::ClosedP1(0).value(&net, TermContext::default());
        let p2 = Term::ClosedP2(0).value(&net, TermContext::default());
        assert!((p1 - 10.0 * 0.1f64.sin()).abs() < 1e-12);
        assert!((p1 + p2).abs() < 1e-12);
        let dc = Term::DcP1(0).value(&net, TermContext::default());
        assert!((dc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn open_side_sees_shunts_only() {
        let mut net = lossy_two_bus();
        net.branches[0].bus2 = None;
        let p = Term::OpenP1(0).value(&net, TermContext::default());
        let q = Term::OpenQ1(0).value(&net, TermContext::default());
        // g2, b2 behind the series impedance plus g1, b1 directly
        assert!(p > 0.0);
        assert!(q < 0.0);
        let mut d = Vec::new();
        Term::OpenP1(0).derivatives(&net, TermContext::default(), &mut d);
        assert!((d[0].1 - 2.0 * p / net.buses[0].v).abs() < 1e-12);
    }
}
