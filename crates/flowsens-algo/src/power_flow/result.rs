//! Load flow results in engineering units.

use super::SolverStatus;
use crate::equations::{Term, TermContext};
use crate::network::{BranchConnection, LfNetwork};
use serde::{Deserialize, Serialize};

/// Flow at both network sides of a branch: MW, Mvar, A.
///
/// A branch with no connected side reports NaN everywhere; the open side of a
/// branch connected on one side only reports 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchFlow {
    pub p1: f64,
    pub q1: f64,
    pub i1: f64,
    pub p2: f64,
    pub q2: f64,
    pub i2: f64,
}

impl BranchFlow {
    pub const NAN: BranchFlow = BranchFlow {
        p1: f64::NAN,
        q1: f64::NAN,
        i1: f64::NAN,
        p2: f64::NAN,
        q2: f64::NAN,
        i2: f64::NAN,
    };

    pub const ZERO: BranchFlow = BranchFlow {
        p1: 0.0,
        q1: 0.0,
        i1: 0.0,
        p2: 0.0,
        q2: 0.0,
        i2: 0.0,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchResult {
    pub id: String,
    pub flow: BranchFlow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusResult {
    pub id: String,
    /// kV
    pub v: f64,
    /// Degrees
    pub angle: f64,
}

/// Outcome of one component solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub num_cc: usize,
    pub num_sc: usize,
    pub status: SolverStatus,
    /// Newton-Raphson iterations over all outer loop rounds.
    pub iterations: usize,
    pub outer_iterations: usize,
    pub reference_bus_id: Option<String>,
    /// Active power left on the slack buses, MW.
    pub slack_bus_active_power_mismatch: f64,
    /// Active power spread over participating injections, MW.
    pub distributed_active_power: f64,
    pub buses: Vec<BusResult>,
    pub branches: Vec<BranchResult>,
}

impl ComponentResult {
    pub fn no_calculation(net: &LfNetwork) -> Self {
        Self {
            num_cc: net.num_cc,
            num_sc: net.num_sc,
            status: SolverStatus::NoCalculation,
            iterations: 0,
            outer_iterations: 0,
            reference_bus_id: None,
            slack_bus_active_power_mismatch: 0.0,
            distributed_active_power: 0.0,
            buses: Vec::new(),
            branches: Vec::new(),
        }
    }

    pub fn branch(&self, id: &str) -> Option<&BranchFlow> {
        self.branches.iter().find(|b| b.id == id).map(|b| &b.flow)
    }

    pub fn bus(&self, id: &str) -> Option<&BusResult> {
        self.buses.iter().find(|b| b.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadFlowResult {
    /// Main component first.
    pub components: Vec<ComponentResult>,
}

impl LoadFlowResult {
    pub fn is_ok(&self) -> bool {
        self.components
            .first()
            .is_some_and(|c| c.status == SolverStatus::Converged)
    }

    pub fn main(&self) -> Option<&ComponentResult> {
        self.components.first()
    }

    /// Flow of a branch in whichever component holds it.
    pub fn branch(&self, id: &str) -> Option<&BranchFlow> {
        self.components.iter().find_map(|c| c.branch(id))
    }

    pub fn bus(&self, id: &str) -> Option<&BusResult> {
        self.components.iter().find_map(|c| c.bus(id))
    }
}

/// Flow on a branch at the current network state.
pub fn branch_flow(net: &LfNetwork, branch: usize, dc: bool, ctx: TermContext, dc_power_factor: f64) -> BranchFlow {
    let sb = net.base_power;
    let b = &net.branches[branch];
    let connection = net.branch_connection(branch);
    if connection == BranchConnection::None {
        return BranchFlow::NAN;
    }
    let current = |p: f64, q: f64, bus: usize| -> f64 {
        if dc {
            let u = net.buses[bus].nominal_v;
            (p * sb).abs() * 1000.0 / (3f64.sqrt() * u * dc_power_factor)
        } else {
            let v = net.buses[bus].v;
            if v > 0.0 {
                p.hypot(q) / v * net.current_base(bus)
            } else {
                0.0
            }
        }
    };
    if net.is_zero_impedance(branch, dc) {
        if connection != BranchConnection::Both {
            return BranchFlow::ZERO;
        }
        let tree = net.zero_impedance_spanning_tree(dc);
        if !tree[branch] {
            return BranchFlow::ZERO;
        }
        let (Some(bus1), Some(bus2)) = (b.bus1, b.bus2) else {
            return BranchFlow::ZERO;
        };
        let (p, q) = (b.dummy_p, if dc { 0.0 } else { b.dummy_q });
        return BranchFlow {
            p1: p * sb,
            q1: q * sb,
            i1: current(p, q, bus1),
            p2: -p * sb,
            q2: -q * sb,
            i2: current(p, q, bus2),
        };
    }
    if dc {
        let (Some(bus1), Some(bus2)) = (b.bus1, b.bus2) else {
            return BranchFlow::ZERO;
        };
        if connection != BranchConnection::Both {
            return BranchFlow::ZERO;
        }
        let p1 = Term::DcP1(branch).value(net, ctx);
        return BranchFlow {
            p1: p1 * sb,
            q1: f64::NAN,
            i1: current(p1, 0.0, bus1),
            p2: -p1 * sb,
            q2: f64::NAN,
            i2: current(p1, 0.0, bus2),
        };
    }
    let side = |p: Term, q: Term, bus: usize| {
        let (p, q) = (p.value(net, ctx), q.value(net, ctx));
        (p * sb, q * sb, current(p, q, bus))
    };
    let mut flow = BranchFlow::ZERO;
    match (connection, b.bus1, b.bus2) {
        (BranchConnection::Both, Some(bus1), Some(bus2)) => {
            (flow.p1, flow.q1, flow.i1) = side(Term::ClosedP1(branch), Term::ClosedQ1(branch), bus1);
            (flow.p2, flow.q2, flow.i2) = side(Term::ClosedP2(branch), Term::ClosedQ2(branch), bus2);
        }
        (BranchConnection::Side1Only, Some(bus1), _) => {
            (flow.p1, flow.q1, flow.i1) = side(Term::OpenP1(branch), Term::OpenQ1(branch), bus1);
        }
        (BranchConnection::Side2Only, _, Some(bus2)) => {
            (flow.p2, flow.q2, flow.i2) = side(Term::OpenP2(branch), Term::OpenQ2(branch), bus2);
        }
        _ => {}
    }
    flow
}

/// Bus and branch values of a solved network.
pub fn collect_results(
    net: &LfNetwork,
    dc: bool,
    ctx: TermContext,
    dc_power_factor: f64,
) -> (Vec<BusResult>, Vec<BranchResult>) {
    let buses = net
        .buses
        .iter()
        .map(|b| {
            if b.disabled {
                BusResult {
                    id: b.id.clone(),
                    v: f64::NAN,
                    angle: f64::NAN,
                }
            } else {
                BusResult {
                    id: b.id.clone(),
                    v: b.v_kv(),
                    angle: b.angle_degrees(),
                }
            }
        })
        .collect();
    let branches = (0..net.branches.len())
        .map(|br| BranchResult {
            id: net.branches[br].id.clone(),
            flow: branch_flow(net, br, dc, ctx, dc_power_factor),
        })
        .collect();
    (buses, branches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::two_bus_network;

    #[test]
    fn disconnected_sides_are_nan_or_zero() {
        let mut net = two_bus_network();
        net.buses[1].angle = -0.1;
        let ctx = TermContext::default();
        let closed = branch_flow(&net, 0, false, ctx, 1.0);
        assert!((closed.p1 + closed.p2).abs() < 1e-9);

        net.branches[0].bus2 = None;
        let open = branch_flow(&net, 0, false, ctx, 1.0);
        assert_eq!(open.p2, 0.0);
        assert_eq!(open.q2, 0.0);
        assert_eq!(open.i2, 0.0);
        // no shunt admittance, nothing flows into the open line
        assert_eq!(open.p1, 0.0);

        net.branches[0].bus1 = None;
        let isolated = branch_flow(&net, 0, false, ctx, 1.0);
        assert!(isolated.p1.is_nan() && isolated.p2.is_nan());
        let isolated_dc = branch_flow(&net, 0, true, ctx, 1.0);
        assert!(isolated_dc.p1.is_nan() && isolated_dc.i2.is_nan());
    }

    #[test]
    fn dc_current_uses_power_factor() {
        let mut net = two_bus_network();
        net.buses[1].angle = -0.1;
        let flow = branch_flow(&net, 0, true, TermContext::default(), 0.8);
        // 100 MW at 400 kV and cos(phi) 0.8
        assert!((flow.p1 - 100.0).abs() < 1e-9);
        let expected = 100.0 * 1000.0 / (3f64.sqrt() * 400.0 * 0.8);
        assert!((flow.i1 - expected).abs() < 1e-9);
        assert!(flow.q1.is_nan());
    }
}
