//! Checks run after each converged Newton-Raphson solve.
//!
//! An outer loop inspects the solved state and may change targets or the
//! equation structure (a generator dropping out of voltage control, a tap
//! rounded to its closest position). Any change sends the solve back through
//! Newton-Raphson with a rebuilt system.

use crate::config::LoadFlowParameters;
use crate::equations::{bus_power, TermContext};
use crate::network::{LfNetwork, MergeStatus, QLimit, VoltageControlKind};

/// PQ to PV switches allowed per bus over one solve.
pub const MAX_PQ_PV_SWITCHES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuterLoopStatus {
    Stable,
    Unstable,
}

pub trait OuterLoop: Send {
    fn name(&self) -> &'static str;

    fn check(&mut self, net: &mut LfNetwork, params: &LoadFlowParameters) -> OuterLoopStatus;
}

/// Outer loops enabled by the parameters, in run order.
pub fn outer_loops(params: &LoadFlowParameters) -> Vec<Box<dyn OuterLoop>> {
    let mut loops: Vec<Box<dyn OuterLoop>> = Vec::new();
    if params.distributed_slack {
        loops.push(Box::new(DistributedSlack));
    }
    if params.use_reactive_limits {
        loops.push(Box::new(ReactiveLimits));
    }
    if params.transformer_voltage_control_on {
        loops.push(Box::new(TransformerVoltageControl));
    }
    if params.phase_shifter_regulation_on {
        loops.push(Box::new(PhaseControl));
    }
    if params.shunt_compensator_voltage_control_on {
        loops.push(Box::new(ShuntVoltageControl));
    }
    loops
}

/// Extra active power the slack buses produce above their targets, per-unit.
pub fn slack_mismatch(net: &LfNetwork, dc: bool, ctx: TermContext) -> f64 {
    net.slack_buses
        .iter()
        .filter(|&&b| !net.buses[b].disabled)
        .map(|&b| bus_power(net, b, dc, false, ctx) - net.bus_target_p(b))
        .sum()
}

/// Spreads the slack mismatch over participating injections.
#[derive(Debug, Default)]
pub struct DistributedSlack;

impl OuterLoop for DistributedSlack {
    fn name(&self) -> &'static str {
        "distributed slack"
    }

    fn check(&mut self, net: &mut LfNetwork, params: &LoadFlowParameters) -> OuterLoopStatus {
        let ctx = TermContext {
            dc_use_transformer_ratio: params.dc_use_transformer_ratio,
        };
        let mismatch = slack_mismatch(net, false, ctx);
        if (mismatch * net.base_power).abs() <= params.slack_bus_p_max_mismatch {
            return OuterLoopStatus::Stable;
        }
        let outcome = net.distribute_active_power(params.balance_type, mismatch);
        tracing::debug!(
            component = net.num_sc,
            mismatch_mw = mismatch * net.base_power,
            distributed_mw = outcome.distributed * net.base_power,
            "slack mismatch distributed"
        );
        if outcome.distributed.abs() > 0.0 {
            OuterLoopStatus::Unstable
        } else {
            OuterLoopStatus::Stable
        }
    }
}

/// Generator reactive limits: PV to PQ on a violated limit, back to PV when
/// the voltage allows it.
#[derive(Debug, Default)]
pub struct ReactiveLimits;

impl ReactiveLimits {
    fn limits(net: &LfNetwork, bus: usize) -> (f64, f64) {
        net.regulating_generators(bus).fold((0.0, 0.0), |(lo, hi), g| {
            let gen = &net.generators[g];
            (lo + gen.min_q(net.base_power), hi + gen.max_q(net.base_power))
        })
    }

    fn clamp_generators(net: &mut LfNetwork, bus: usize, limit: QLimit) {
        let base = net.base_power;
        let gens: Vec<usize> = net.regulating_generators(bus).collect();
        for g in gens {
            let gen = &mut net.generators[g];
            gen.target_q = match limit {
                QLimit::Min => gen.min_q(base),
                QLimit::Max => gen.max_q(base),
            };
        }
    }
}

impl OuterLoop for ReactiveLimits {
    fn name(&self) -> &'static str {
        "reactive limits"
    }

    fn check(&mut self, net: &mut LfNetwork, _params: &LoadFlowParameters) -> OuterLoopStatus {
        let mut status = OuterLoopStatus::Stable;
        let ctx = TermContext::default();
        for bus in 0..net.buses.len() {
            let Some(control) = net.buses[bus].controller_of else {
                continue;
            };
            if net.buses[bus].disabled || net.regulating_generators(bus).next().is_none() {
                continue;
            }
            let (min_q, max_q) = Self::limits(net, bus);
            if net.buses[bus].voltage_control_enabled {
                let produced = bus_power(net, bus, false, true, ctx) - net.bus_fixed_q(bus);
                let violated = if produced > max_q {
                    Some(QLimit::Max)
                } else if produced < min_q {
                    Some(QLimit::Min)
                } else {
                    None
                };
                if let Some(limit) = violated {
                    Self::clamp_generators(net, bus, limit);
                    let b = &mut net.buses[bus];
                    b.voltage_control_enabled = false;
                    b.q_limit = Some(limit);
                    tracing::debug!(
                        bus = %b.id,
                        q_mvar = produced * net.base_power,
                        ?limit,
                        "PV to PQ"
                    );
                    status = OuterLoopStatus::Unstable;
                }
            } else if let Some(limit) = net.buses[bus].q_limit {
                if net.buses[bus].pv_pq_switches >= MAX_PQ_PV_SWITCHES {
                    continue;
                }
                let vc = &net.voltage_controls[control];
                let v = net.buses[vc.controlled_bus].v;
                let back = match limit {
                    QLimit::Max => v > vc.target_v,
                    QLimit::Min => v < vc.target_v,
                };
                if back {
                    let b = &mut net.buses[bus];
                    b.voltage_control_enabled = true;
                    b.q_limit = None;
                    b.pv_pq_switches += 1;
                    tracing::debug!(bus = %b.id, switches = b.pv_pq_switches, "PQ to PV");
                    status = OuterLoopStatus::Unstable;
                }
            }
        }
        status
    }
}

/// Rounds continuous transformer ratios to the closest tap, once.
#[derive(Debug, Default)]
pub struct TransformerVoltageControl;

impl OuterLoop for TransformerVoltageControl {
    fn name(&self) -> &'static str {
        "transformer voltage control"
    }

    fn check(&mut self, net: &mut LfNetwork, _params: &LoadFlowParameters) -> OuterLoopStatus {
        round_voltage_controls(net, VoltageControlKind::Transformer)
    }
}

/// Rounds continuous shunt susceptances to the closest section, once.
#[derive(Debug, Default)]
pub struct ShuntVoltageControl;

impl OuterLoop for ShuntVoltageControl {
    fn name(&self) -> &'static str {
        "shunt voltage control"
    }

    fn check(&mut self, net: &mut LfNetwork, _params: &LoadFlowParameters) -> OuterLoopStatus {
        round_voltage_controls(net, VoltageControlKind::Shunt)
    }
}

fn round_voltage_controls(net: &mut LfNetwork, kind: VoltageControlKind) -> OuterLoopStatus {
    let mut status = OuterLoopStatus::Stable;
    for c in 0..net.voltage_controls.len() {
        let vc = &net.voltage_controls[c];
        if vc.kind != kind || vc.discretized || vc.merge_status != MergeStatus::Main {
            continue;
        }
        let controllers = net.active_controllers(c);
        for &controller in &controllers {
            let changed = match kind {
                VoltageControlKind::Transformer => {
                    let branch = &mut net.branches[controller];
                    match branch.pi.round_r1_to_closest_tap() {
                        Ok(changed) => changed,
                        Err(err) => {
                            tracing::warn!(branch = %branch.id, error = %err, "ratio rounding skipped");
                            false
                        }
                    }
                }
                VoltageControlKind::Shunt => net.shunts[controller].round_to_closest_section(),
                VoltageControlKind::Generator => false,
            };
            tracing::debug!(control = c, controller, changed, ?kind, "discrete control rounded");
        }
        let merged = net.voltage_controls[c].merged.clone();
        for member in std::iter::once(c).chain(merged) {
            net.voltage_controls[member].discretized = true;
        }
        status = OuterLoopStatus::Unstable;
    }
    status
}

/// Rounds continuous phase shifts to the closest tap, once.
#[derive(Debug, Default)]
pub struct PhaseControl;

impl OuterLoop for PhaseControl {
    fn name(&self) -> &'static str {
        "phase control"
    }

    fn check(&mut self, net: &mut LfNetwork, _params: &LoadFlowParameters) -> OuterLoopStatus {
        let mut status = OuterLoopStatus::Stable;
        for branch in net.branches.iter_mut() {
            if !branch.has_active_phase_control() {
                continue;
            }
            match branch.pi.round_a1_to_closest_tap() {
                Ok(changed) => {
                    tracing::debug!(branch = %branch.id, changed, "phase shift rounded");
                }
                Err(err) => {
                    tracing::warn!(branch = %branch.id, error = %err, "phase rounding skipped");
                }
            }
            if let Some(pc) = branch.phase_control.as_mut() {
                pc.enabled = false;
            }
            status = OuterLoopStatus::Unstable;
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::two_bus_network;
    use flowsens_core::ReactiveLimits as GridReactiveLimits;

    #[test]
    fn loops_follow_parameters() {
        let params = LoadFlowParameters::default()
            .with_distributed_slack(false)
            .with_phase_shifter_regulation(true);
        let names: Vec<&str> = outer_loops(&params).iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["reactive limits", "phase control"]);
    }

    #[test]
    fn exceeded_max_q_switches_to_pq() {
        let mut net = two_bus_network();
        net.generators[0].reactive_limits = GridReactiveLimits::MinMax {
            min_q: -10.0,
            max_q: 10.0,
        };
        // the generator covers 0.5 pu of reactive load at flat voltage
        net.buses[1].angle = -0.2;
        net.buses[1].v = 0.9;
        let mut rl = ReactiveLimits;
        let status = rl.check(&mut net, &LoadFlowParameters::default());
        assert_eq!(status, OuterLoopStatus::Unstable);
        assert!(!net.buses[0].voltage_control_enabled);
        assert_eq!(net.buses[0].q_limit, Some(QLimit::Max));
        assert!((net.generators[0].target_q - 0.1).abs() < 1e-12);
    }

    #[test]
    fn pq_to_pv_is_bounded() {
        let mut net = two_bus_network();
        net.buses[0].voltage_control_enabled = false;
        net.buses[0].q_limit = Some(QLimit::Max);
        net.buses[0].v = 1.05;
        net.buses[0].pv_pq_switches = MAX_PQ_PV_SWITCHES;
        let mut rl = ReactiveLimits;
        assert_eq!(rl.check(&mut net, &LoadFlowParameters::default()), OuterLoopStatus::Stable);
        net.buses[0].pv_pq_switches = 0;
        assert_eq!(rl.check(&mut net, &LoadFlowParameters::default()), OuterLoopStatus::Unstable);
        assert!(net.buses[0].voltage_control_enabled);
        assert_eq!(net.buses[0].pv_pq_switches, 1);
    }
}
