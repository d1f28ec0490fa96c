//! Per-unit calculation network.
//!
//! An [`LfNetwork`] holds one synchronous component of the reduced grid in
//! per-unit on the system base power. Buses, branches and injections are plain
//! vectors addressed by index; ids are resolved once through a private index.
//! Every element has a `disabled` flag so contingencies can be simulated in
//! place and undone through [`NetworkState`] snapshots.
//!
//! Equation terms read the network state directly: a term on a disabled element
//! is a programming error, while a branch touching a disabled bus simply drops
//! out of the equations.

pub mod branch;
pub mod builder;
pub mod bus;
pub mod distribution;
pub mod hvdc;
pub mod injection;
pub mod nominal_voltage;
pub mod pi_model;
pub mod post_processor;
pub mod slack;
pub mod snapshot;
pub mod voltage_control;

pub use branch::{
    BranchConnection, BranchType, LfBranch, PhaseControl, PhaseControlMode, TapChangerKind,
};
pub use builder::build_networks;
pub use bus::{LfBus, QLimit};
pub use hvdc::{ConverterRef, LfAcEmulation, LfHvdc};
pub use injection::{GeneratorKind, LfGenerator, LfLoad, LfShunt, LoadKind};
pub use pi_model::{PiModel, PiModelArray, SimplePiModel};
pub use post_processor::{LoadingPolicy, NetworkPostProcessor, SourceBranch, SourceGenerator};
pub use snapshot::NetworkState;
pub use voltage_control::{MergeStatus, VoltageControl, VoltageControlKind, VoltageControlRole};

use flowsens_core::{Diagnostics, Side};
use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, HashMap};

/// Free-form properties attached by post-processors.
pub type PropertyBag = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default)]
struct NetworkIndex {
    buses: HashMap<String, usize>,
    branches: HashMap<String, usize>,
    /// Grid element id to its branches: one for 2-terminal elements, three legs
    /// for a 3-winding transformer.
    sources: HashMap<String, Vec<usize>>,
    generators: HashMap<String, usize>,
    loads: HashMap<String, usize>,
    shunts: HashMap<String, usize>,
    hvdcs: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct LfNetwork {
    /// Connected component number, HVDC links included. 0 is the main one.
    pub num_cc: usize,
    /// Synchronous component number. 0 is the main one.
    pub num_sc: usize,
    pub base_power: f64,
    pub low_impedance_threshold: f64,
    pub buses: Vec<LfBus>,
    pub branches: Vec<LfBranch>,
    pub generators: Vec<LfGenerator>,
    pub loads: Vec<LfLoad>,
    pub shunts: Vec<LfShunt>,
    pub hvdcs: Vec<LfHvdc>,
    pub voltage_controls: Vec<VoltageControl>,
    pub slack_buses: Vec<usize>,
    pub reference_bus: Option<usize>,
    /// Share of the slack mismatch taken by each slack bus, sums to 1.
    pub slack_weights: Vec<f64>,
    pub diagnostics: Diagnostics,
    index: NetworkIndex,
}

impl LfNetwork {
    pub fn new(num_cc: usize, num_sc: usize, base_power: f64, low_impedance_threshold: f64) -> Self {
        Self {
            num_cc,
            num_sc,
            base_power,
            low_impedance_threshold,
            buses: Vec::new(),
            branches: Vec::new(),
            generators: Vec::new(),
            loads: Vec::new(),
            shunts: Vec::new(),
            hvdcs: Vec::new(),
            voltage_controls: Vec::new(),
            slack_buses: Vec::new(),
            reference_bus: None,
            slack_weights: Vec::new(),
            diagnostics: Diagnostics::new(),
            index: NetworkIndex::default(),
        }
    }

    pub fn is_main(&self) -> bool {
        self.num_cc == 0 && self.num_sc == 0
    }

    pub fn add_bus(&mut self, mut bus: LfBus) -> usize {
        let num = self.buses.len();
        bus.num = num;
        self.index.buses.insert(bus.id.clone(), num);
        for source in &bus.source_ids {
            self.index.buses.insert(source.clone(), num);
        }
        self.buses.push(bus);
        num
    }

    pub fn add_branch(&mut self, mut branch: LfBranch) -> usize {
        let num = self.branches.len();
        branch.num = num;
        for bus in [branch.bus1, branch.bus2].into_iter().flatten() {
            self.buses[bus].branches.push(num);
        }
        self.index.branches.insert(branch.id.clone(), num);
        self.index
            .sources
            .entry(branch.source_id.clone())
            .or_default()
            .push(num);
        self.branches.push(branch);
        num
    }

    pub fn add_generator(&mut self, mut generator: LfGenerator) -> usize {
        let num = self.generators.len();
        generator.num = num;
        self.buses[generator.bus].generators.push(num);
        self.index.generators.insert(generator.id.clone(), num);
        self.generators.push(generator);
        num
    }

    pub fn add_load(&mut self, mut load: LfLoad) -> usize {
        let num = self.loads.len();
        load.num = num;
        self.buses[load.bus].loads.push(num);
        self.index.loads.insert(load.id.clone(), num);
        self.loads.push(load);
        num
    }

    pub fn add_shunt(&mut self, mut shunt: LfShunt) -> usize {
        let num = self.shunts.len();
        shunt.num = num;
        self.buses[shunt.bus].shunts.push(num);
        self.index.shunts.insert(shunt.id.clone(), num);
        self.shunts.push(shunt);
        num
    }

    pub fn add_hvdc(&mut self, mut hvdc: LfHvdc) -> usize {
        let num = self.hvdcs.len();
        hvdc.num = num;
        for bus in [hvdc.bus1, hvdc.bus2].into_iter().flatten() {
            self.buses[bus].hvdcs.push(num);
        }
        self.index.hvdcs.insert(hvdc.id.clone(), num);
        self.hvdcs.push(hvdc);
        num
    }

    pub fn bus_by_id(&self, id: &str) -> Option<usize> {
        self.index.buses.get(id).copied()
    }

    pub fn branch_by_id(&self, id: &str) -> Option<usize> {
        self.index.branches.get(id).copied()
    }

    /// Branches standing for a grid element, in leg order.
    pub fn branches_of_source(&self, source_id: &str) -> &[usize] {
        self.index
            .sources
            .get(source_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Network branch and network side carrying a given side of a grid element.
    pub fn branch_terminal(&self, source_id: &str, side: Side) -> Option<(usize, Side)> {
        let branches = self.branches_of_source(source_id);
        let first = *branches.first()?;
        match self.branches[first].branch_type {
            BranchType::TransformerLeg(_) => branches
                .iter()
                .copied()
                .find(|&b| self.branches[b].branch_type == BranchType::TransformerLeg(side))
                .map(|b| (b, Side::One)),
            BranchType::DanglingLine => (side == Side::One).then_some((first, Side::One)),
            _ => match side {
                Side::Three => None,
                side => Some((first, side)),
            },
        }
    }

    pub fn generator_by_id(&self, id: &str) -> Option<usize> {
        self.index.generators.get(id).copied()
    }

    pub fn load_by_id(&self, id: &str) -> Option<usize> {
        self.index.loads.get(id).copied()
    }

    pub fn shunt_by_id(&self, id: &str) -> Option<usize> {
        self.index.shunts.get(id).copied()
    }

    pub fn hvdc_by_id(&self, id: &str) -> Option<usize> {
        self.index.hvdcs.get(id).copied()
    }

    pub fn enabled_buses(&self) -> impl Iterator<Item = &LfBus> {
        self.buses.iter().filter(|b| !b.disabled)
    }

    pub fn enabled_bus_count(&self) -> usize {
        self.enabled_buses().count()
    }

    /// Produced active power of enabled generators at a bus, per-unit.
    pub fn bus_generation_p(&self, bus: usize) -> f64 {
        self.buses[bus]
            .generators
            .iter()
            .map(|&g| &self.generators[g])
            .filter(|g| !g.disabled)
            .map(|g| g.target_p)
            .sum()
    }

    pub fn bus_load_p(&self, bus: usize) -> f64 {
        self.buses[bus]
            .loads
            .iter()
            .map(|&l| &self.loads[l])
            .filter(|l| !l.disabled)
            .map(|l| l.target_p)
            .sum()
    }

    pub fn bus_load_q(&self, bus: usize) -> f64 {
        self.buses[bus]
            .loads
            .iter()
            .map(|&l| &self.loads[l])
            .filter(|l| !l.disabled)
            .map(|l| l.target_q)
            .sum()
    }

    /// Net active injection target, generation minus consumption.
    pub fn bus_target_p(&self, bus: usize) -> f64 {
        self.bus_generation_p(bus) - self.bus_load_p(bus)
    }

    pub fn bus_target_q(&self, bus: usize) -> f64 {
        let generation: f64 = self.buses[bus]
            .generators
            .iter()
            .map(|&g| &self.generators[g])
            .filter(|g| !g.disabled)
            .map(|g| g.target_q)
            .sum();
        generation - self.bus_load_q(bus)
    }

    /// Net reactive injection excluding the generators regulating voltage.
    pub fn bus_fixed_q(&self, bus: usize) -> f64 {
        let generation: f64 = self.buses[bus]
            .generators
            .iter()
            .filter(|&&g| !self.is_regulating_generator(g))
            .map(|&g| &self.generators[g])
            .filter(|g| !g.disabled)
            .map(|g| g.target_q)
            .sum();
        generation - self.bus_load_q(bus)
    }

    pub fn is_regulating_generator(&self, generator: usize) -> bool {
        let g = &self.generators[generator];
        !g.disabled && g.voltage_control && self.buses[g.bus].controller_of.is_some()
    }

    pub fn regulating_generators(&self, bus: usize) -> impl Iterator<Item = usize> + '_ {
        self.buses[bus]
            .generators
            .iter()
            .copied()
            .filter(move |&g| self.is_regulating_generator(g))
    }

    pub fn branch_connection(&self, branch: usize) -> BranchConnection {
        let b = &self.branches[branch];
        if b.disabled {
            return BranchConnection::None;
        }
        let lost = |bus: Option<usize>| bus.is_some_and(|i| self.buses[i].disabled);
        if lost(b.bus1) || lost(b.bus2) {
            return BranchConnection::None;
        }
        match (b.bus1, b.bus2) {
            (Some(_), Some(_)) => BranchConnection::Both,
            (Some(_), None) => BranchConnection::Side1Only,
            (None, Some(_)) => BranchConnection::Side2Only,
            (None, None) => BranchConnection::None,
        }
    }

    pub fn is_zero_impedance(&self, branch: usize, dc: bool) -> bool {
        let b = &self.branches[branch];
        if dc {
            b.pi.x().abs() < self.low_impedance_threshold && !b.pi.is_tap_dependent()
        } else {
            b.zero_impedance
        }
    }

    /// Spanning forest of the enabled zero-impedance branches.
    ///
    /// Tree edges carry dummy flow variables; the other zero-impedance branches
    /// close loops and carry no flow.
    pub fn zero_impedance_spanning_tree(&self, dc: bool) -> Vec<bool> {
        let mut uf = UnionFind::<usize>::new(self.buses.len());
        let mut tree = vec![false; self.branches.len()];
        for (num, branch) in self.branches.iter().enumerate() {
            if !self.is_zero_impedance(num, dc) || self.branch_connection(num) != BranchConnection::Both {
                continue;
            }
            if let (Some(b1), Some(b2)) = (branch.bus1, branch.bus2) {
                if uf.union(b1, b2) {
                    tree[num] = true;
                }
            }
        }
        tree
    }

    /// Label per bus; buses joined by zero-impedance branches share a label.
    pub fn zero_impedance_labels(&self, dc: bool) -> Vec<usize> {
        let mut uf = UnionFind::<usize>::new(self.buses.len());
        for (num, branch) in self.branches.iter().enumerate() {
            if !self.is_zero_impedance(num, dc) || self.branch_connection(num) != BranchConnection::Both {
                continue;
            }
            if let (Some(b1), Some(b2)) = (branch.bus1, branch.bus2) {
                uf.union(b1, b2);
            }
        }
        uf.into_labeling()
    }

    /// Controller bus currently able to regulate.
    pub fn is_controller_bus_active(&self, bus: usize) -> bool {
        let b = &self.buses[bus];
        !b.disabled && b.voltage_control_enabled && self.regulating_generators(bus).next().is_some()
    }

    pub fn is_voltage_control_operative(&self, control: usize) -> bool {
        let vc = &self.voltage_controls[control];
        if vc.discretized || self.buses[vc.controlled_bus].disabled {
            return false;
        }
        match vc.kind {
            VoltageControlKind::Generator => vc
                .controllers
                .iter()
                .any(|&bus| self.is_controller_bus_active(bus)),
            VoltageControlKind::Transformer => vc
                .controllers
                .iter()
                .any(|&br| self.branch_connection(br) == BranchConnection::Both),
            VoltageControlKind::Shunt => vc.controllers.iter().any(|&sh| {
                let s = &self.shunts[sh];
                !s.disabled && !self.buses[s.bus].disabled
            }),
        }
    }

    /// Recompute merge statuses from the current zero-impedance topology.
    ///
    /// Operative controls whose controlled buses are joined by zero-impedance
    /// branches are merged: only the highest priority kind keeps regulating,
    /// and among those the control on the smallest bus number becomes main.
    pub fn update_voltage_control_status(&mut self) {
        let labels = self.zero_impedance_labels(false);
        let operative: Vec<bool> = (0..self.voltage_controls.len())
            .map(|c| self.is_voltage_control_operative(c))
            .collect();
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (c, vc) in self.voltage_controls.iter_mut().enumerate() {
            vc.main = None;
            vc.merged.clear();
            if operative[c] {
                groups.entry(labels[vc.controlled_bus]).or_default().push(c);
            } else {
                vc.merge_status = MergeStatus::Disabled;
            }
        }
        for members in groups.into_values() {
            let Some(top) = members.iter().map(|&c| self.voltage_controls[c].kind).min() else {
                continue;
            };
            let mut leaders: Vec<usize> = members
                .iter()
                .copied()
                .filter(|&c| self.voltage_controls[c].kind == top)
                .collect();
            leaders.sort_by_key(|&c| self.voltage_controls[c].controlled_bus);
            let main = leaders[0];
            for &c in &members {
                let vc = &mut self.voltage_controls[c];
                if vc.kind != top {
                    vc.merge_status = MergeStatus::Hidden;
                } else if c == main {
                    vc.merge_status = MergeStatus::Main;
                } else {
                    vc.merge_status = MergeStatus::Dependent;
                    vc.main = Some(main);
                }
            }
            let dependents = leaders[1..].to_vec();
            if !dependents.is_empty() {
                tracing::debug!(
                    main = main,
                    merged = dependents.len(),
                    "merged voltage controls across zero-impedance branches"
                );
            }
            self.voltage_controls[main].merged = dependents;
        }
    }

    /// Controllers of a main control and its dependents that can regulate now.
    pub fn active_controllers(&self, control: usize) -> Vec<usize> {
        let vc = &self.voltage_controls[control];
        let mut all: Vec<usize> = Vec::new();
        for c in std::iter::once(control).chain(vc.merged.iter().copied()) {
            let member = &self.voltage_controls[c];
            for &controller in &member.controllers {
                let active = match member.kind {
                    VoltageControlKind::Generator => self.is_controller_bus_active(controller),
                    VoltageControlKind::Transformer => {
                        self.branch_connection(controller) == BranchConnection::Both
                    }
                    VoltageControlKind::Shunt => {
                        let s = &self.shunts[controller];
                        !s.disabled && !self.buses[s.bus].disabled
                    }
                };
                if active && !all.contains(&controller) {
                    all.push(controller);
                }
            }
        }
        all
    }

    pub fn generator_voltage_control_role(&self, bus: usize) -> VoltageControlRole {
        let b = &self.buses[bus];
        if b.controller_of.is_some() {
            return VoltageControlRole::Controller;
        }
        match b.generator_voltage_control {
            Some(c) if self.voltage_controls[c].merge_status == MergeStatus::Dependent => {
                VoltageControlRole::Follower
            }
            Some(_) => VoltageControlRole::Controlled,
            None => VoltageControlRole::None,
        }
    }

    /// Rated voltage used to turn per-unit currents into amperes.
    pub fn current_base(&self, bus: usize) -> f64 {
        self.base_power * 1000.0 / (3f64.sqrt() * self.buses[bus].nominal_v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{two_bus_network, zero_impedance_pair_network};

    #[test]
    fn ids_resolve_to_indices() {
        let net = two_bus_network();
        assert_eq!(net.bus_by_id("VL1_0"), Some(0));
        assert_eq!(net.branch_by_id("L12"), Some(0));
        assert_eq!(net.generator_by_id("G1"), Some(0));
        assert_eq!(net.load_by_id("LD2"), Some(0));
        assert_eq!(net.branch_terminal("L12", Side::Two), Some((0, Side::Two)));
        assert_eq!(net.branch_terminal("L12", Side::Three), None);
    }

    #[test]
    fn targets_sum_enabled_injections() {
        let mut net = two_bus_network();
        assert!((net.bus_target_p(0) - 2.0).abs() < 1e-12);
        assert!((net.bus_target_p(1) + 2.0).abs() < 1e-12);
        assert!((net.bus_target_q(1) + 1.0).abs() < 1e-12);
        net.loads[0].disabled = true;
        assert_eq!(net.bus_target_p(1), 0.0);
    }

    #[test]
    fn disabled_bus_drops_branch() {
        let mut net = two_bus_network();
        assert_eq!(net.branch_connection(0), BranchConnection::Both);
        net.buses[1].disabled = true;
        assert_eq!(net.branch_connection(0), BranchConnection::None);
        net.buses[1].disabled = false;
        net.branches[0].bus2 = None;
        assert_eq!(net.branch_connection(0), BranchConnection::Side1Only);
    }

    #[test]
    fn zero_impedance_loops_keep_one_tree() {
        let net = zero_impedance_pair_network();
        let tree = net.zero_impedance_spanning_tree(false);
        // two parallel couplers between the same buses: one tree edge
        assert_eq!(tree.iter().filter(|t| **t).count(), 1);
        let labels = net.zero_impedance_labels(false);
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn merged_generator_controls_pick_smallest_bus() {
        let mut net = zero_impedance_pair_network();
        net.update_voltage_control_status();
        let statuses: Vec<MergeStatus> = net.voltage_controls.iter().map(|c| c.merge_status).collect();
        assert_eq!(statuses, vec![MergeStatus::Main, MergeStatus::Dependent]);
        assert_eq!(net.voltage_controls[1].main, Some(0));
        assert_eq!(net.active_controllers(0), vec![0, 1]);
        assert_eq!(net.generator_voltage_control_role(0), VoltageControlRole::Controller);
    }

    #[test]
    fn all_controllers_disabled_disables_control() {
        let mut net = zero_impedance_pair_network();
        for bus in &mut net.buses {
            bus.voltage_control_enabled = false;
        }
        net.update_voltage_control_status();
        assert!(net
            .voltage_controls
            .iter()
            .all(|c| c.merge_status == MergeStatus::Disabled));
    }
}
