//! Contingencies resolved onto one network, and their connectivity outcome.

use super::{Contingency, ContingencyElement};
use crate::graph::GraphConnectivity;
use crate::network::{BranchType, ConverterRef, LfNetwork};
use flowsens_core::{ElementKind, GridError, GridResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Network elements a contingency removes. Sets are sorted so that two
/// contingencies removing the same elements are processed identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagatedContingency {
    /// Position in the request.
    pub index: usize,
    pub id: String,
    pub branches: BTreeSet<usize>,
    pub buses: BTreeSet<usize>,
    pub generators: BTreeSet<usize>,
    pub loads: BTreeSet<usize>,
    pub shunts: BTreeSet<usize>,
    pub hvdcs: BTreeSet<usize>,
}

/// Check every contingency element against the grid before anything is
/// solved.
pub fn validate_contingencies(
    index: &HashMap<&str, ElementKind>,
    networks: &[LfNetwork],
    contingencies: &[Contingency],
) -> GridResult<()> {
    for contingency in contingencies {
        for element in &contingency.elements {
            let kind = index.get(element.id()).copied();
            let known = match element {
                ContingencyElement::Branch(_) => matches!(
                    kind,
                    Some(
                        ElementKind::Line
                            | ElementKind::TwoWindingsTransformer
                            | ElementKind::ThreeWindingsTransformer
                            | ElementKind::DanglingLine
                    )
                ),
                ContingencyElement::Switch(_) => kind == Some(ElementKind::Switch),
                ContingencyElement::Generator(_) => matches!(
                    kind,
                    Some(ElementKind::Generator | ElementKind::VscConverterStation)
                ),
                ContingencyElement::Load(_) => matches!(
                    kind,
                    Some(ElementKind::Load | ElementKind::LccConverterStation)
                ),
                ContingencyElement::Shunt(_) => kind == Some(ElementKind::Shunt),
                ContingencyElement::HvdcLine(_) => kind == Some(ElementKind::HvdcLine),
                ContingencyElement::Bus(id) => {
                    kind == Some(ElementKind::BusbarSection)
                        || networks.iter().any(|n| n.bus_by_id(id).is_some())
                }
            };
            if !known {
                return Err(GridError::ContingencyElementNotFound(element.id().to_string()));
            }
        }
    }
    Ok(())
}

impl PropagatedContingency {
    /// Resolve `contingency` onto `net`. Elements outside the network, or
    /// already disabled, are skipped.
    pub fn propagate(net: &LfNetwork, index: usize, contingency: &Contingency) -> Self {
        let mut pc = Self {
            index,
            id: contingency.id.clone(),
            ..Self::default()
        };
        for element in &contingency.elements {
            match element {
                ContingencyElement::Branch(id) => {
                    pc.branches.extend(
                        net.branches_of_source(id)
                            .iter()
                            .copied()
                            .filter(|&b| !net.branches[b].disabled),
                    );
                }
                ContingencyElement::Switch(id) => {
                    if let Some(b) = net.branch_by_id(id) {
                        let branch = &net.branches[b];
                        // absorbed switches have no branch and no impact
                        if branch.branch_type == BranchType::Switch && !branch.disabled {
                            pc.branches.insert(b);
                        }
                    }
                }
                ContingencyElement::Bus(id) => {
                    if let Some(bus) = net.bus_by_id(id).filter(|&b| !net.buses[b].disabled) {
                        pc.buses.insert(bus);
                        pc.branches.extend(
                            net.buses[bus]
                                .branches
                                .iter()
                                .copied()
                                .filter(|&b| !net.branches[b].disabled),
                        );
                    }
                }
                ContingencyElement::Generator(id) | ContingencyElement::Load(id) => {
                    if let Some(g) = net.generator_by_id(id) {
                        if !net.generators[g].disabled {
                            pc.generators.insert(g);
                        }
                    } else if let Some(l) = net.load_by_id(id) {
                        if !net.loads[l].disabled {
                            pc.loads.insert(l);
                        }
                    }
                }
                ContingencyElement::Shunt(id) => {
                    if let Some(s) = net.shunt_by_id(id).filter(|&s| !net.shunts[s].disabled) {
                        pc.shunts.insert(s);
                    }
                }
                ContingencyElement::HvdcLine(id) => {
                    if let Some(h) = net.hvdc_by_id(id).filter(|&h| !net.hvdcs[h].disabled) {
                        pc.hvdcs.insert(h);
                        let hvdc = &net.hvdcs[h];
                        for converter in [hvdc.converter1, hvdc.converter2].into_iter().flatten() {
                            match converter {
                                ConverterRef::Generator(g) => pc.generators.insert(g),
                                ConverterRef::Load(l) => pc.loads.insert(l),
                            };
                        }
                    }
                }
            }
        }
        pc
    }

    /// Nothing in this network is touched.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
            && self.buses.is_empty()
            && self.generators.is_empty()
            && self.loads.is_empty()
            && self.shunts.is_empty()
            && self.hvdcs.is_empty()
    }
}

/// Connectivity of one network, answering which buses a removal cuts off.
pub struct ConnectivityAnalyzer {
    graph: GraphConnectivity,
    reference: Option<usize>,
    /// Buses already outside the slack side before any removal.
    base_lost: BTreeSet<usize>,
}

impl ConnectivityAnalyzer {
    pub fn new(net: &LfNetwork) -> Self {
        let mut graph = GraphConnectivity::new(net);
        let base_lost = graph.lost_buses(net.reference_bus);
        Self {
            graph,
            reference: net.reference_bus,
            base_lost,
        }
    }

    /// Buses cut off from the slack side once `branches` and `buses` are
    /// removed, removed buses included.
    ///
    /// The slack side is the component of the reference bus; when the
    /// reference bus itself is removed it is the largest remaining component.
    pub fn lost_buses(&mut self, branches: &BTreeSet<usize>, buses: &BTreeSet<usize>) -> BTreeSet<usize> {
        self.graph.start_temporary_changes();
        for &br in branches {
            self.graph.remove_edge(br);
        }
        for &bus in buses {
            self.graph.remove_vertex(bus);
        }
        let mut lost = self.graph.lost_buses(self.reference);
        self.graph.undo_temporary_changes();
        lost.retain(|b| !self.base_lost.contains(b));
        lost
    }
}

/// Contingencies sharing one connectivity outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityGroup {
    /// Buses outside the slack side, empty when connectivity is unchanged.
    pub lost_buses: BTreeSet<usize>,
    /// Indices into the propagated contingency list, in request order.
    pub contingencies: Vec<usize>,
}

impl ConnectivityGroup {
    pub fn breaks_connectivity(&self) -> bool {
        !self.lost_buses.is_empty()
    }
}

/// Group contingencies by the set of buses they cut off.
///
/// The group keeping connectivity comes first, then groups in order of their
/// lost bus sets. Group members are positions in `contingencies`.
pub fn analyse_connectivity<'a>(
    net: &LfNetwork,
    contingencies: impl IntoIterator<Item = &'a PropagatedContingency>,
) -> Vec<ConnectivityGroup> {
    let mut analyzer = ConnectivityAnalyzer::new(net);
    let mut groups: BTreeMap<BTreeSet<usize>, Vec<usize>> = BTreeMap::new();
    let mut count = 0;
    for (i, pc) in contingencies.into_iter().enumerate() {
        let lost = analyzer.lost_buses(&pc.branches, &pc.buses);
        groups.entry(lost).or_default().push(i);
        count += 1;
    }
    let groups: Vec<ConnectivityGroup> = groups
        .into_iter()
        .map(|(lost_buses, contingencies)| ConnectivityGroup {
            lost_buses,
            contingencies,
        })
        .collect();
    tracing::debug!(
        component = net.num_sc,
        contingencies = count,
        groups = groups.len(),
        breaking = groups.iter().filter(|g| g.breaks_connectivity()).count(),
        "connectivity analysis done"
    );
    groups
}
