//! Factor validation and resolution onto calculation networks.

use super::{
    Quantity, SensitivityFactor, SensitivityFunctionType, SensitivityVariableSet, SensitivityVariableType,
};
use crate::config::SensitivityParameters;
use crate::contingency::{Contingency, ContingencyContext};
use crate::network::LfNetwork;
use flowsens_core::{ElementKind, GridError, GridResult, Side};
use std::collections::HashMap;

/// Check every factor against the grid and the request before anything is
/// solved. The first unknown id aborts the run.
pub fn validate_factors(
    index: &HashMap<&str, ElementKind>,
    networks: &[LfNetwork],
    factors: &[SensitivityFactor],
    variable_sets: &[SensitivityVariableSet],
    contingencies: &[Contingency],
    dc: bool,
) -> GridResult<()> {
    let known_bus = |id: &str| {
        index.get(id) == Some(&ElementKind::BusbarSection) || networks.iter().any(|n| n.bus_by_id(id).is_some())
    };
    for factor in factors {
        let kind = index.get(factor.function_id.as_str()).copied();
        match factor.function_type.side() {
            Some(side) => {
                let found = match kind {
                    Some(ElementKind::ThreeWindingsTransformer) => true,
                    Some(ElementKind::DanglingLine) => side == Side::One,
                    Some(ElementKind::Line | ElementKind::TwoWindingsTransformer | ElementKind::Switch) => {
                        side != Side::Three
                    }
                    _ => false,
                };
                if !found {
                    return Err(GridError::BranchNotFound(factor.function_id.clone()));
                }
            }
            None => {
                if !known_bus(&factor.function_id) {
                    return Err(GridError::BusNotFound(factor.function_id.clone()));
                }
            }
        }
        if dc {
            let quantity = factor.function_type.quantity();
            if matches!(quantity, Quantity::ReactivePower | Quantity::Voltage)
                || !factor.variable_type.is_dc_compatible()
            {
                return Err(GridError::InvalidParameter(format!(
                    "factor {:?} on '{}' against {:?} needs an AC calculation",
                    factor.function_type, factor.function_id, factor.variable_type
                )));
            }
        }

        if factor.variable_set {
            let set = variable_sets
                .iter()
                .find(|s| s.id == factor.variable_id)
                .ok_or_else(|| GridError::VariableSetNotFound(factor.variable_id.clone()))?;
            for member in &set.variables {
                validate_variable(index, &known_bus, factor.variable_type, &member.id)?;
                if !member.weight.is_finite() {
                    return Err(GridError::InvalidParameter(format!(
                        "variable set '{}' has a non-finite weight for '{}'",
                        set.id, member.id
                    )));
                }
            }
        } else {
            validate_variable(index, &known_bus, factor.variable_type, &factor.variable_id)?;
        }

        if let ContingencyContext::Specific(id) = &factor.contingency_context {
            if !contingencies.iter().any(|c| &c.id == id) {
                return Err(GridError::InvalidParameter(format!(
                    "factor on '{}' refers to unknown contingency '{id}'",
                    factor.function_id
                )));
            }
        }
    }
    Ok(())
}

fn validate_variable(
    index: &HashMap<&str, ElementKind>,
    known_bus: &impl Fn(&str) -> bool,
    variable_type: SensitivityVariableType,
    id: &str,
) -> GridResult<()> {
    let kind = index.get(id).copied();
    match variable_type {
        SensitivityVariableType::InjectionActivePower | SensitivityVariableType::InjectionReactivePower => {
            let injection = matches!(
                kind,
                Some(
                    ElementKind::Generator
                        | ElementKind::Load
                        | ElementKind::VscConverterStation
                        | ElementKind::LccConverterStation
                )
            );
            if !injection {
                return Err(GridError::InjectionNotFound(id.to_string()));
            }
        }
        SensitivityVariableType::TransformerPhase => {
            if kind != Some(ElementKind::TwoWindingsTransformer) {
                return Err(GridError::PhaseShifterNotFound(id.to_string()));
            }
        }
        SensitivityVariableType::TransformerPhase1
        | SensitivityVariableType::TransformerPhase2
        | SensitivityVariableType::TransformerPhase3 => {
            if kind != Some(ElementKind::ThreeWindingsTransformer) {
                return Err(GridError::PhaseShifterNotFound(id.to_string()));
            }
        }
        SensitivityVariableType::BusTargetVoltage => {
            if !known_bus(id) && kind != Some(ElementKind::Generator) && kind != Some(ElementKind::VscConverterStation)
            {
                return Err(GridError::BusNotFound(id.to_string()));
            }
        }
        SensitivityVariableType::HvdcLineActivePower => {
            if kind != Some(ElementKind::HvdcLine) {
                return Err(GridError::HvdcNotFound(id.to_string()));
            }
        }
    }
    Ok(())
}

/// Monitored element on one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionTarget {
    /// Network branch and the network side carrying the monitored side.
    Branch { branch: usize, side: Side },
    Bus(usize),
    /// Not part of this network.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkFunction {
    pub function_type: SensitivityFunctionType,
    pub target: FunctionTarget,
}

/// A variable element on one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableTarget {
    Generator(usize),
    Load(usize),
    /// Phase shifting branch.
    Phase(usize),
    /// Controlled bus.
    TargetVoltage(usize),
    Hvdc(usize),
}

/// Variable of a factor on one network: a single member with weight 1, or the
/// members of a variable set found in the network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkVariable {
    pub variable_type: SensitivityVariableType,
    pub members: Vec<(VariableTarget, f64)>,
}

/// Factor computed on one network, as indices into the deduplicated function
/// and variable lists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkFactor {
    /// Position in the request.
    pub index: usize,
    pub function: usize,
    pub variable: usize,
    /// Values below this magnitude are reported as 0.
    pub threshold: f64,
}

/// Factors hosted by one network.
#[derive(Debug, Clone, Default)]
pub struct NetworkFactors {
    pub functions: Vec<NetworkFunction>,
    pub variables: Vec<NetworkVariable>,
    pub factors: Vec<NetworkFactor>,
}

impl NetworkFactors {
    /// Resolve the factors listed in `hosted` onto `net`. Functions and
    /// variables used by several factors are resolved once.
    pub fn resolve(
        net: &LfNetwork,
        factors: &[SensitivityFactor],
        hosted: &[usize],
        variable_sets: &[SensitivityVariableSet],
        params: &SensitivityParameters,
    ) -> Self {
        let mut resolved = Self::default();
        let mut function_keys: HashMap<(SensitivityFunctionType, &str), usize> = HashMap::new();
        let mut variable_keys: HashMap<(SensitivityVariableType, &str, bool), usize> = HashMap::new();
        for &index in hosted {
            let factor = &factors[index];
            let function = *function_keys
                .entry((factor.function_type, factor.function_id.as_str()))
                .or_insert_with(|| {
                    resolved.functions.push(NetworkFunction {
                        function_type: factor.function_type,
                        target: resolve_function(net, factor.function_type, &factor.function_id),
                    });
                    resolved.functions.len() - 1
                });
            let variable = *variable_keys
                .entry((factor.variable_type, factor.variable_id.as_str(), factor.variable_set))
                .or_insert_with(|| {
                    let members = if factor.variable_set {
                        variable_sets
                            .iter()
                            .find(|s| s.id == factor.variable_id)
                            .map(|set| {
                                set.variables
                                    .iter()
                                    .filter_map(|m| {
                                        resolve_variable(net, factor.variable_type, &m.id).map(|t| (t, m.weight))
                                    })
                                    .collect()
                            })
                            .unwrap_or_default()
                    } else {
                        resolve_variable(net, factor.variable_type, &factor.variable_id)
                            .map(|t| vec![(t, 1.0)])
                            .unwrap_or_default()
                    };
                    resolved.variables.push(NetworkVariable {
                        variable_type: factor.variable_type,
                        members,
                    });
                    resolved.variables.len() - 1
                });
            resolved.factors.push(NetworkFactor {
                index,
                function,
                variable,
                threshold: threshold(params, factor.function_type, factor.variable_type),
            });
        }
        resolved
    }
}

pub fn resolve_function(net: &LfNetwork, function_type: SensitivityFunctionType, id: &str) -> FunctionTarget {
    match function_type.side() {
        Some(side) => net
            .branch_terminal(id, side)
            .map_or(FunctionTarget::Missing, |(branch, side)| FunctionTarget::Branch { branch, side }),
        None => net.bus_by_id(id).map_or(FunctionTarget::Missing, FunctionTarget::Bus),
    }
}

fn resolve_variable(net: &LfNetwork, variable_type: SensitivityVariableType, id: &str) -> Option<VariableTarget> {
    match variable_type {
        SensitivityVariableType::InjectionActivePower | SensitivityVariableType::InjectionReactivePower => net
            .generator_by_id(id)
            .map(VariableTarget::Generator)
            .or_else(|| net.load_by_id(id).map(VariableTarget::Load)),
        SensitivityVariableType::TransformerPhase => {
            let branches = net.branches_of_source(id);
            (branches.len() == 1).then(|| VariableTarget::Phase(branches[0]))
        }
        SensitivityVariableType::TransformerPhase1
        | SensitivityVariableType::TransformerPhase2
        | SensitivityVariableType::TransformerPhase3 => {
            let leg = variable_type.leg()?;
            net.branch_terminal(id, leg).map(|(b, _)| VariableTarget::Phase(b))
        }
        SensitivityVariableType::BusTargetVoltage => net
            .bus_by_id(id)
            .or_else(|| net.generator_by_id(id).and_then(|g| net.generators[g].controlled_bus))
            .map(VariableTarget::TargetVoltage),
        SensitivityVariableType::HvdcLineActivePower => net.hvdc_by_id(id).map(VariableTarget::Hvdc),
    }
}

fn threshold(
    params: &SensitivityParameters,
    function_type: SensitivityFunctionType,
    variable_type: SensitivityVariableType,
) -> f64 {
    let voltage_function = function_type.quantity() == Quantity::Voltage;
    match variable_type {
        SensitivityVariableType::BusTargetVoltage if voltage_function => params.voltage_voltage_threshold,
        SensitivityVariableType::BusTargetVoltage => params.flow_voltage_threshold,
        _ if voltage_function => 0.0,
        v if v.is_phase() => params.angle_flow_threshold,
        _ => params.flow_flow_threshold,
    }
}
