//! Copy of every mutable field of a network.
//!
//! Contingency simulation disables elements, moves targets and re-solves in
//! place. Taking a [`NetworkState`] before and restoring it afterwards puts the
//! network back bit for bit, solved voltages included.

use super::bus::QLimit;
use super::pi_model::PiModelState;
use super::{LfNetwork, MergeStatus};

#[derive(Debug, Clone, Copy)]
struct BusState {
    v: f64,
    angle: f64,
    disabled: bool,
    slack: bool,
    reference: bool,
    voltage_control_enabled: bool,
    q_limit: Option<QLimit>,
    pv_pq_switches: u32,
}

#[derive(Debug, Clone, Copy)]
struct BranchState {
    disabled: bool,
    pi: PiModelState,
    dummy_p: f64,
    dummy_q: f64,
    phase_control_enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy)]
struct GeneratorState {
    target_p: f64,
    target_q: f64,
    disabled: bool,
    voltage_control: bool,
    calculated_q: f64,
}

#[derive(Debug, Clone, Copy)]
struct LoadState {
    target_p: f64,
    target_q: f64,
    disabled: bool,
}

#[derive(Debug, Clone, Copy)]
struct ShuntState {
    b: f64,
    g: f64,
    section_count: u32,
    disabled: bool,
}

#[derive(Debug, Clone)]
pub struct NetworkState {
    buses: Vec<BusState>,
    branches: Vec<BranchState>,
    generators: Vec<GeneratorState>,
    loads: Vec<LoadState>,
    shunts: Vec<ShuntState>,
    hvdcs: Vec<(bool, f64)>,
    controls: Vec<(MergeStatus, Option<usize>, Vec<usize>, bool)>,
    slack_buses: Vec<usize>,
    reference_bus: Option<usize>,
    slack_weights: Vec<f64>,
}

impl LfNetwork {
    pub fn snapshot(&self) -> NetworkState {
        NetworkState {
            buses: self
                .buses
                .iter()
                .map(|b| BusState {
                    v: b.v,
                    angle: b.angle,
                    disabled: b.disabled,
                    slack: b.slack,
                    reference: b.reference,
                    voltage_control_enabled: b.voltage_control_enabled,
                    q_limit: b.q_limit,
                    pv_pq_switches: b.pv_pq_switches,
                })
                .collect(),
            branches: self
                .branches
                .iter()
                .map(|b| BranchState {
                    disabled: b.disabled,
                    pi: b.pi.state(),
                    dummy_p: b.dummy_p,
                    dummy_q: b.dummy_q,
                    phase_control_enabled: b.phase_control.as_ref().map(|pc| pc.enabled),
                })
                .collect(),
            generators: self
                .generators
                .iter()
                .map(|g| GeneratorState {
                    target_p: g.target_p,
                    target_q: g.target_q,
                    disabled: g.disabled,
                    voltage_control: g.voltage_control,
                    calculated_q: g.calculated_q,
                })
                .collect(),
            loads: self
                .loads
                .iter()
                .map(|l| LoadState {
                    target_p: l.target_p,
                    target_q: l.target_q,
                    disabled: l.disabled,
                })
                .collect(),
            shunts: self
                .shunts
                .iter()
                .map(|s| ShuntState {
                    b: s.b,
                    g: s.g,
                    section_count: s.section_count,
                    disabled: s.disabled,
                })
                .collect(),
            hvdcs: self.hvdcs.iter().map(|h| (h.disabled, h.setpoint)).collect(),
            controls: self
                .voltage_controls
                .iter()
                .map(|c| (c.merge_status, c.main, c.merged.clone(), c.discretized))
                .collect(),
            slack_buses: self.slack_buses.clone(),
            reference_bus: self.reference_bus,
            slack_weights: self.slack_weights.clone(),
        }
    }

    /// Put back a state taken from this same network.
    pub fn restore(&mut self, state: &NetworkState) {
        debug_assert_eq!(state.buses.len(), self.buses.len());
        debug_assert_eq!(state.branches.len(), self.branches.len());
        for (bus, s) in self.buses.iter_mut().zip(&state.buses) {
            bus.v = s.v;
            bus.angle = s.angle;
            bus.disabled = s.disabled;
            bus.slack = s.slack;
            bus.reference = s.reference;
            bus.voltage_control_enabled = s.voltage_control_enabled;
            bus.q_limit = s.q_limit;
            bus.pv_pq_switches = s.pv_pq_switches;
        }
        for (branch, s) in self.branches.iter_mut().zip(&state.branches) {
            branch.disabled = s.disabled;
            branch.pi.restore(&s.pi);
            branch.dummy_p = s.dummy_p;
            branch.dummy_q = s.dummy_q;
            if let (Some(pc), Some(enabled)) = (branch.phase_control.as_mut(), s.phase_control_enabled) {
                pc.enabled = enabled;
            }
        }
        for (g, s) in self.generators.iter_mut().zip(&state.generators) {
            g.target_p = s.target_p;
            g.target_q = s.target_q;
            g.disabled = s.disabled;
            g.voltage_control = s.voltage_control;
            g.calculated_q = s.calculated_q;
        }
        for (l, s) in self.loads.iter_mut().zip(&state.loads) {
            l.target_p = s.target_p;
            l.target_q = s.target_q;
            l.disabled = s.disabled;
        }
        for (sh, s) in self.shunts.iter_mut().zip(&state.shunts) {
            sh.b = s.b;
            sh.g = s.g;
            sh.section_count = s.section_count;
            sh.disabled = s.disabled;
        }
        for (h, &(disabled, setpoint)) in self.hvdcs.iter_mut().zip(&state.hvdcs) {
            h.disabled = disabled;
            h.setpoint = setpoint;
        }
        for (c, (status, main, merged, discretized)) in
            self.voltage_controls.iter_mut().zip(&state.controls)
        {
            c.merge_status = *status;
            c.main = *main;
            c.merged.clone_from(merged);
            c.discretized = *discretized;
        }
        self.slack_buses.clone_from(&state.slack_buses);
        self.reference_bus = state.reference_bus;
        self.slack_weights.clone_from(&state.slack_weights);
    }
}
