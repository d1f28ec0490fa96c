//! Topology reduction: node-breaker graph to calculation buses.
//!
//! Within each voltage level, nodes joined by closed, non-retained switches are
//! merged with a union-find into one calculation bus. Retained switches are not
//! merged; they come out as [`RetainedSwitch`] entries and become explicit
//! zero-impedance branches in the calculation model. Open switches are simply
//! absorbed.
//!
//! A bus is created for every merged node set that holds a connected terminal,
//! a busbar section or a retained switch end. Bus numbers are contiguous and
//! follow the voltage level order, then the smallest node of each set.
//!
//! Any terminal or switch pointing at a missing voltage level or an out of
//! range node is a structural error and aborts the reduction.

use crate::diagnostics::Diagnostics;
use crate::error::{GridError, GridResult};
use crate::grid::{Grid, Terminal, VoltageLevel};
use crate::units::Kilovolts;
use petgraph::unionfind::UnionFind;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedBus {
    pub num: usize,
    /// `<voltage level>_<index within level>`
    pub id: String,
    pub voltage_level: String,
    pub nominal_v: Kilovolts,
    pub nodes: Vec<usize>,
    /// Busbar section ids merged into this bus.
    pub source_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetainedSwitch {
    pub id: String,
    pub bus1: usize,
    pub bus2: usize,
    pub open: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BusTopology {
    pub buses: Vec<CalculatedBus>,
    pub retained_switches: Vec<RetainedSwitch>,
    node_to_bus: HashMap<String, Vec<Option<usize>>>,
    bus_by_id: HashMap<String, usize>,
}

fn check_node(vl: &VoltageLevel, node: usize, owner: &str) -> GridResult<()> {
    if node >= vl.node_count {
        return Err(GridError::Structural(format!(
            "'{}' references node {} of voltage level '{}' which has {} nodes",
            owner, node, vl.id, vl.node_count
        )));
    }
    Ok(())
}

fn lookup<'g>(
    index: &HashMap<&str, &'g VoltageLevel>,
    vl_id: &str,
    owner: &str,
) -> GridResult<&'g VoltageLevel> {
    index.get(vl_id).copied().ok_or_else(|| {
        GridError::Structural(format!(
            "'{}' references unknown voltage level '{}'",
            owner, vl_id
        ))
    })
}

impl BusTopology {
    pub fn reduce(grid: &Grid, diagnostics: &mut Diagnostics) -> GridResult<Self> {
        let mut vl_index: HashMap<&str, &VoltageLevel> = HashMap::new();
        for vl in &grid.voltage_levels {
            if vl_index.insert(vl.id.as_str(), vl).is_some() {
                return Err(GridError::Structural(format!(
                    "duplicate voltage level '{}'",
                    vl.id
                )));
            }
        }

        // significant[vl][node]: node must end up in a bus
        let mut significant: HashMap<&str, Vec<bool>> = grid
            .voltage_levels
            .iter()
            .map(|vl| (vl.id.as_str(), vec![false; vl.node_count]))
            .collect();

        for (owner, _, terminal) in grid.terminals() {
            let vl = lookup(&vl_index, &terminal.voltage_level, owner)?;
            check_node(vl, terminal.node, owner)?;
            if terminal.connected {
                if let Some(flags) = significant.get_mut(vl.id.as_str()) {
                    flags[terminal.node] = true;
                }
            }
        }
        for vl in &grid.voltage_levels {
            for bbs in &vl.busbar_sections {
                check_node(vl, bbs.node, &bbs.id)?;
                if let Some(flags) = significant.get_mut(vl.id.as_str()) {
                    flags[bbs.node] = true;
                }
            }
        }

        let mut unions: HashMap<&str, UnionFind<usize>> = grid
            .voltage_levels
            .iter()
            .map(|vl| (vl.id.as_str(), UnionFind::new(vl.node_count)))
            .collect();
        for sw in &grid.switches {
            let vl = lookup(&vl_index, &sw.voltage_level, &sw.id)?;
            check_node(vl, sw.node1, &sw.id)?;
            check_node(vl, sw.node2, &sw.id)?;
            if sw.retained {
                if let Some(flags) = significant.get_mut(vl.id.as_str()) {
                    flags[sw.node1] = true;
                    flags[sw.node2] = true;
                }
            } else if !sw.open {
                if let Some(uf) = unions.get_mut(vl.id.as_str()) {
                    uf.union(sw.node1, sw.node2);
                }
            }
        }

        let mut topology = BusTopology::default();
        for vl in &grid.voltage_levels {
            let uf = &unions[vl.id.as_str()];
            let flags = &significant[vl.id.as_str()];
            let mut root_to_bus: HashMap<usize, usize> = HashMap::new();
            let mut node_map = vec![None; vl.node_count];
            let mut local_index = 0;

            // a set gets a bus if any of its nodes is significant
            let mut root_is_significant = vec![false; vl.node_count];
            for node in 0..vl.node_count {
                if flags[node] {
                    root_is_significant[uf.find(node)] = true;
                }
            }

            for node in 0..vl.node_count {
                let root = uf.find(node);
                if !root_is_significant[root] {
                    continue;
                }
                let num = *root_to_bus.entry(root).or_insert_with(|| {
                    let num = topology.buses.len();
                    topology.buses.push(CalculatedBus {
                        num,
                        id: format!("{}_{}", vl.id, local_index),
                        voltage_level: vl.id.clone(),
                        nominal_v: vl.nominal_v,
                        nodes: Vec::new(),
                        source_ids: Vec::new(),
                    });
                    local_index += 1;
                    num
                });
                topology.buses[num].nodes.push(node);
                node_map[node] = Some(num);
            }

            for bbs in &vl.busbar_sections {
                if let Some(num) = node_map[bbs.node] {
                    topology.buses[num].source_ids.push(bbs.id.clone());
                    topology.bus_by_id.insert(bbs.id.clone(), num);
                }
            }
            topology.node_to_bus.insert(vl.id.clone(), node_map);
        }

        for bus in &topology.buses {
            topology.bus_by_id.insert(bus.id.clone(), bus.num);
        }

        for sw in grid.switches.iter().filter(|s| s.retained) {
            let bus1 = topology.node_bus(&sw.voltage_level, sw.node1);
            let bus2 = topology.node_bus(&sw.voltage_level, sw.node2);
            match (bus1, bus2) {
                (Some(b1), Some(b2)) if b1 != b2 => topology.retained_switches.push(RetainedSwitch {
                    id: sw.id.clone(),
                    bus1: b1,
                    bus2: b2,
                    open: sw.open,
                }),
                _ => diagnostics.add_warning_with_entity(
                    "topology",
                    "retained switch has both ends on the same bus and is ignored",
                    &sw.id,
                ),
            }
        }

        tracing::debug!(
            buses = topology.buses.len(),
            retained_switches = topology.retained_switches.len(),
            "topology reduced"
        );
        Ok(topology)
    }

    pub fn node_bus(&self, voltage_level: &str, node: usize) -> Option<usize> {
        self.node_to_bus
            .get(voltage_level)
            .and_then(|nodes| nodes.get(node).copied().flatten())
    }

    /// Calculation bus of a terminal, `None` when the terminal is disconnected.
    pub fn bus_of(&self, terminal: &Terminal) -> Option<usize> {
        if !terminal.connected {
            return None;
        }
        self.node_bus(&terminal.voltage_level, terminal.node)
    }

    /// Lookup by calculated bus id or by busbar section id.
    pub fn bus_index(&self, id: &str) -> Option<usize> {
        self.bus_by_id.get(id).copied()
    }

    pub fn bus(&self, num: usize) -> &CalculatedBus {
        &self.buses[num]
    }
}
