//! Grid to per-unit networks.
//!
//! The build runs in two stages. First every grid element is converted once
//! to per-unit against a global bus numbering (calculated buses followed by
//! fictitious star and boundary buses). Then buses are split into synchronous
//! components, each becoming one [`LfNetwork`] with local numbering, voltage
//! controls and slack buses. Networks come out sorted by decreasing size, the
//! main component first.

use super::hvdc::{ConverterRef, LfAcEmulation, LfHvdc};
use super::nominal_voltage::NominalVoltageMapping;
use super::pi_model::{PiModel, PiModelArray, SimplePiModel};
use super::post_processor::{active_post_processors, NetworkPostProcessor, SourceBranch, SourceGenerator};
use super::{
    BranchType, GeneratorKind, LfBranch, LfBus, LfGenerator, LfLoad, LfNetwork, LfShunt,
    LoadKind, PhaseControl, PhaseControlMode, PropertyBag, TapChangerKind, VoltageControl,
    VoltageControlKind,
};
use crate::config::{ConnectedComponentMode, LoadFlowParameters};
use flowsens_core::{
    BusTopology, ConvertersMode, Diagnostics, Grid, GridResult, Kilovolts, PhaseRegulationMode,
    PhaseTapChanger, RatioTapChanger, RegulatedTerminal, Side, TapStep,
};
use petgraph::unionfind::UnionFind;
use std::collections::BTreeMap;

const MIN_PLAUSIBLE_TARGET_V: f64 = 0.5;
const MAX_PLAUSIBLE_TARGET_V: f64 = 1.5;

#[derive(Debug, Clone, Copy)]
enum BranchSource {
    Line(usize),
    Transformer(usize),
    Leg(usize, Side),
    DanglingLine(usize),
    Switch(usize),
}

#[derive(Debug, Clone, Copy)]
enum GeneratorSource {
    Generator(usize),
    Vsc(usize),
}

struct ProtoBus {
    bus: LfBus,
    topology_bus: Option<usize>,
}

struct ProtoBranch {
    branch: LfBranch,
    source: BranchSource,
    /// Controlled bus and per-unit target of a regulating ratio tap changer.
    ratio_control: Option<(usize, f64)>,
}

struct ProtoGenerator {
    generator: LfGenerator,
    source: GeneratorSource,
}

struct ProtoLoad {
    load: LfLoad,
    power_factor: Option<f64>,
}

struct ProtoHvdc {
    hvdc: LfHvdc,
    converter1: Option<ConverterRef>,
    converter2: Option<ConverterRef>,
}

struct Component {
    num_sc: usize,
    num_cc: usize,
    buses: Vec<usize>,
}

/// Every element in per-unit, on global bus numbers.
struct GlobalModel {
    buses: Vec<ProtoBus>,
    branches: Vec<ProtoBranch>,
    generators: Vec<ProtoGenerator>,
    loads: Vec<ProtoLoad>,
    shunts: Vec<LfShunt>,
    hvdcs: Vec<ProtoHvdc>,
}

/// Build one network per synchronous component of `grid`.
///
/// With [`ConnectedComponentMode::Main`] only the components of the main
/// connected component (HVDC links included) are returned.
pub fn build_networks(
    grid: &Grid,
    params: &LoadFlowParameters,
    processors: &[Box<dyn NetworkPostProcessor>],
) -> GridResult<Vec<LfNetwork>> {
    params.validate()?;
    grid.validate()?;
    let mut diagnostics = Diagnostics::new();
    let topology = BusTopology::reduce(grid, &mut diagnostics)?;
    let mapping = NominalVoltageMapping::new(
        topology.buses.iter().map(|b| b.nominal_v.0),
        params.nominal_voltage_resolution,
    );
    let model = GlobalModel::create(grid, &topology, &mapping, params, &mut diagnostics)?;
    let active = active_post_processors(processors, &params.post_processors);

    let mut networks = Vec::new();
    for component in model.components() {
        if params.connected_component_mode == ConnectedComponentMode::Main && component.num_cc != 0 {
            continue;
        }
        networks.push(model.network(&component, grid, &topology, params, &active)?);
    }
    if let Some(main) = networks.first_mut() {
        main.diagnostics.merge(diagnostics);
    }
    tracing::info!(
        grid = %grid.id,
        networks = networks.len(),
        buses = networks.iter().map(|n| n.buses.len()).sum::<usize>(),
        "calculation networks built"
    );
    Ok(networks)
}

fn regulated_bus(
    grid: &Grid,
    topology: &BusTopology,
    regulated: Option<&RegulatedTerminal>,
    default: Option<usize>,
) -> Option<usize> {
    match regulated {
        Some(rt) => grid
            .terminal_of(&rt.element_id, rt.side)
            .and_then(|t| topology.bus_of(t)),
        None => default,
    }
}

/// Per-unit model of a transformer at given ratio and phase steps.
///
/// Impedances are at side 2, magnetizing admittance on the internal side 1.
#[allow(clippy::too_many_arguments)]
fn transformer_pi(
    r: f64,
    x: f64,
    g: f64,
    b: f64,
    rated_ratio: f64,
    steps: [Option<&TapStep>; 2],
    u1: f64,
    u2: f64,
    base_power: f64,
) -> SimplePiModel {
    let mut rho = rated_ratio;
    let mut alpha = 0.0;
    let (mut dr, mut dx, mut dg, mut db) = (0.0, 0.0, 0.0, 0.0);
    for step in steps.into_iter().flatten() {
        rho *= step.rho;
        alpha += step.alpha.0;
        dr += step.r;
        dx += step.x;
        dg += step.g;
        db += step.b;
    }
    let zb = u2 * u2 / base_power;
    SimplePiModel::new(
        r * (1.0 + dr / 100.0) / zb,
        x * (1.0 + dx / 100.0) / zb,
        g * (1.0 + dg / 100.0) * zb,
        b * (1.0 + db / 100.0) * zb,
        0.0,
        0.0,
        rho * u1 / u2,
        alpha.to_radians(),
    )
}

/// Pick the tap changer driving the model and build one step model per tap.
fn tap_model(
    rtc: Option<&RatioTapChanger>,
    ptc: Option<&PhaseTapChanger>,
    step_model: impl Fn([Option<&TapStep>; 2]) -> SimplePiModel,
) -> GridResult<(PiModel, Option<TapChangerKind>)> {
    let ratio_array = |r: &RatioTapChanger, fixed: Option<&TapStep>| -> GridResult<(PiModel, Option<TapChangerKind>)> {
        let steps = r.steps.iter().map(|s| step_model([Some(s), fixed])).collect();
        Ok((
            PiModel::Array(PiModelArray::new(steps, r.low_tap, r.tap_position)?),
            Some(TapChangerKind::Ratio),
        ))
    };
    match (rtc, ptc) {
        (None, None) => Ok((PiModel::Simple(step_model([None, None])), None)),
        (Some(r), Some(p)) if r.regulating && !p.regulating => ratio_array(r, p.current_step()),
        (Some(r), None) => ratio_array(r, None),
        (r, Some(p)) => {
            let fixed = r.and_then(|r| r.current_step());
            let steps = p.steps.iter().map(|s| step_model([fixed, Some(s)])).collect();
            Ok((
                PiModel::Array(PiModelArray::new(steps, p.low_tap, p.tap_position)?),
                Some(TapChangerKind::Phase),
            ))
        }
    }
}

fn phase_control(ptc: Option<&PhaseTapChanger>, params: &LoadFlowParameters) -> Option<PhaseControl> {
    let p = ptc?;
    (params.phase_shifter_regulation_on
        && p.regulating
        && p.regulation_mode == PhaseRegulationMode::ActivePowerControl)
        .then(|| PhaseControl {
            mode: PhaseControlMode::ActivePowerControl,
            target_p: p.regulation_value / params.base_power,
            enabled: true,
        })
}

impl GlobalModel {
    fn create(
        grid: &Grid,
        topology: &BusTopology,
        mapping: &NominalVoltageMapping,
        params: &LoadFlowParameters,
        diagnostics: &mut Diagnostics,
    ) -> GridResult<Self> {
        let sb = params.base_power;
        let mut model = GlobalModel {
            buses: Vec::new(),
            branches: Vec::new(),
            generators: Vec::new(),
            loads: Vec::new(),
            shunts: Vec::new(),
            hvdcs: Vec::new(),
        };

        for calc in &topology.buses {
            let mut bus = LfBus::new(0, calc.id.clone(), calc.voltage_level.clone(), mapping.resolve(calc.nominal_v.0));
            bus.source_ids = calc.source_ids.clone();
            model.buses.push(ProtoBus {
                bus,
                topology_bus: Some(calc.num),
            });
        }

        for (i, line) in grid.lines.iter().enumerate() {
            let b1 = topology.bus_of(&line.terminal1);
            let b2 = topology.bus_of(&line.terminal2);
            if b1.is_none() && b2.is_none() {
                continue;
            }
            let (u1, u2) = model.nominal_pair(b1, b2);
            let zb = u2 * u2 / sb;
            let pi = SimplePiModel::new(
                line.r / zb,
                line.x / zb,
                line.g1 * zb,
                line.b1 * zb,
                line.g2 * zb,
                line.b2 * zb,
                u1 / u2,
                0.0,
            );
            let branch = LfBranch::new(0, &line.id, &line.id, BranchType::Line, b1, b2, PiModel::Simple(pi));
            model.push_branch(branch, BranchSource::Line(i), None, params, diagnostics);
        }

        for (i, t) in grid.two_windings_transformers.iter().enumerate() {
            let b1 = topology.bus_of(&t.terminal1);
            let b2 = topology.bus_of(&t.terminal2);
            if b1.is_none() && b2.is_none() {
                continue;
            }
            let (u1, u2) = model.nominal_pair(b1, b2);
            let rated_ratio = t.rated_u2.0 / t.rated_u1.0;
            let (pi, kind) = tap_model(t.ratio_tap_changer.as_ref(), t.phase_tap_changer.as_ref(), |steps| {
                transformer_pi(t.r, t.x, t.g, t.b, rated_ratio, steps, u1, u2, sb)
            })?;
            let mut branch = LfBranch::new(0, &t.id, &t.id, BranchType::Transformer, b1, b2, pi);
            branch.tap_changer = kind;
            if kind == Some(TapChangerKind::Phase) {
                branch.phase_control = phase_control(t.phase_tap_changer.as_ref(), params);
            }
            let ratio_control = model.ratio_control(grid, topology, t.ratio_tap_changer.as_ref(), kind, b2, params);
            model.push_branch(branch, BranchSource::Transformer(i), ratio_control, params, diagnostics);
        }

        for (i, t) in grid.three_windings_transformers.iter().enumerate() {
            let legs: Vec<(Side, Option<usize>)> = [Side::One, Side::Two, Side::Three]
                .into_iter()
                .map(|side| (side, topology.bus_of(&t.leg(side).terminal)))
                .collect();
            if legs.iter().all(|(_, b)| b.is_none()) {
                continue;
            }
            let u0 = t.rated_u0.0;
            let mut star = LfBus::new(0, format!("{}_star", t.id), t.id.clone(), u0);
            star.fictitious = true;
            let star_num = model.buses.len();
            model.buses.push(ProtoBus {
                bus: star,
                topology_bus: None,
            });
            for (side, bus) in legs {
                let leg = t.leg(side);
                let ui = bus.map(|b| model.buses[b].bus.nominal_v).unwrap_or(leg.rated_u.0);
                let rated_ratio = u0 / leg.rated_u.0;
                let (pi, kind) = tap_model(leg.ratio_tap_changer.as_ref(), leg.phase_tap_changer.as_ref(), |steps| {
                    transformer_pi(leg.r, leg.x, leg.g, leg.b, rated_ratio, steps, ui, u0, sb)
                })?;
                let mut branch = LfBranch::new(
                    0,
                    format!("{}_leg_{}", t.id, side.as_str()),
                    &t.id,
                    BranchType::TransformerLeg(side),
                    bus,
                    Some(star_num),
                    pi,
                );
                branch.tap_changer = kind;
                if kind == Some(TapChangerKind::Phase) {
                    branch.phase_control = phase_control(leg.phase_tap_changer.as_ref(), params);
                }
                let ratio_control = model.ratio_control(grid, topology, leg.ratio_tap_changer.as_ref(), kind, bus, params);
                model.push_branch(branch, BranchSource::Leg(i, side), ratio_control, params, diagnostics);
            }
        }

        for (i, d) in grid.dangling_lines.iter().enumerate() {
            let Some(b1) = topology.bus_of(&d.terminal) else {
                continue;
            };
            let u = model.buses[b1].bus.nominal_v;
            let mut boundary = LfBus::new(0, format!("{}_boundary", d.id), d.terminal.voltage_level.clone(), u);
            boundary.fictitious = true;
            let boundary_num = model.buses.len();
            model.buses.push(ProtoBus {
                bus: boundary,
                topology_bus: None,
            });
            let zb = u * u / sb;
            let pi = SimplePiModel::new(
                d.r / zb,
                d.x / zb,
                d.g / 2.0 * zb,
                d.b / 2.0 * zb,
                d.g / 2.0 * zb,
                d.b / 2.0 * zb,
                1.0,
                0.0,
            );
            let branch = LfBranch::new(0, &d.id, &d.id, BranchType::DanglingLine, Some(b1), Some(boundary_num), PiModel::Simple(pi));
            model.push_branch(branch, BranchSource::DanglingLine(i), None, params, diagnostics);
            model.loads.push(ProtoLoad {
                load: LfLoad {
                    num: 0,
                    id: d.id.clone(),
                    bus: boundary_num,
                    kind: LoadKind::DanglingLineBoundary,
                    target_p: d.p0.to_per_unit(sb),
                    initial_target_p: d.p0.to_per_unit(sb),
                    target_q: d.q0.to_per_unit(sb),
                    disabled: false,
                    properties: PropertyBag::new(),
                },
                power_factor: None,
            });
        }

        for (i, sw) in topology.retained_switches.iter().enumerate() {
            if sw.open {
                continue;
            }
            let pi = SimplePiModel::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0);
            let branch = LfBranch::new(0, &sw.id, &sw.id, BranchType::Switch, Some(sw.bus1), Some(sw.bus2), PiModel::Simple(pi));
            model.push_branch(branch, BranchSource::Switch(i), None, params, diagnostics);
        }

        for (i, g) in grid.generators.iter().enumerate() {
            let Some(bus) = topology.bus_of(&g.terminal) else {
                continue;
            };
            let controlled = match regulated_bus(grid, topology, g.regulated.as_ref(), Some(bus)) {
                Some(c) => c,
                None => {
                    diagnostics.add_warning_with_entity(
                        "voltage_control",
                        "regulated terminal is disconnected, regulating locally",
                        &g.id,
                    );
                    bus
                }
            };
            if g.target_p.0 < g.min_p.0 || g.target_p.0 > g.max_p.0 {
                diagnostics.add_info_with_entity("generator", "target P outside active power limits", &g.id);
            }
            let target_v = g.target_v.to_per_unit(Kilovolts(model.buses[controlled].bus.nominal_v));
            model.generators.push(ProtoGenerator {
                generator: LfGenerator {
                    num: 0,
                    id: g.id.clone(),
                    bus,
                    kind: GeneratorKind::Generator,
                    target_p: g.target_p.to_per_unit(sb),
                    initial_target_p: g.target_p.to_per_unit(sb),
                    min_p: g.min_p.to_per_unit(sb),
                    max_p: g.max_p.to_per_unit(sb),
                    target_q: g.target_q.to_per_unit(sb),
                    initial_target_q: g.target_q.to_per_unit(sb),
                    target_v,
                    voltage_control: g.voltage_regulator_on && g.target_v.0 > 0.0,
                    controlled_bus: Some(controlled),
                    reactive_limits: g.reactive_limits.clone(),
                    participating: g.participate,
                    participation_factor: g.participation_factor,
                    disabled: false,
                    calculated_q: 0.0,
                    properties: PropertyBag::new(),
                },
                source: GeneratorSource::Generator(i),
            });
        }

        for (i, c) in grid.vsc_converter_stations.iter().enumerate() {
            let Some(bus) = topology.bus_of(&c.terminal) else {
                continue;
            };
            let nominal = Kilovolts(model.buses[bus].bus.nominal_v);
            model.generators.push(ProtoGenerator {
                generator: LfGenerator {
                    num: 0,
                    id: c.id.clone(),
                    bus,
                    kind: GeneratorKind::VscConverter { hvdc: None },
                    target_p: 0.0,
                    initial_target_p: 0.0,
                    min_p: -f64::MAX,
                    max_p: f64::MAX,
                    target_q: c.reactive_power_setpoint.to_per_unit(sb),
                    initial_target_q: c.reactive_power_setpoint.to_per_unit(sb),
                    target_v: c.voltage_setpoint.to_per_unit(nominal),
                    voltage_control: c.voltage_regulator_on && c.voltage_setpoint.0 > 0.0,
                    controlled_bus: Some(bus),
                    reactive_limits: c.reactive_limits.clone(),
                    participating: false,
                    participation_factor: 0.0,
                    disabled: false,
                    calculated_q: 0.0,
                    properties: PropertyBag::new(),
                },
                source: GeneratorSource::Vsc(i),
            });
        }

        for l in &grid.loads {
            let Some(bus) = topology.bus_of(&l.terminal) else {
                continue;
            };
            model.loads.push(ProtoLoad {
                load: LfLoad {
                    num: 0,
                    id: l.id.clone(),
                    bus,
                    kind: LoadKind::Load,
                    target_p: l.p0.to_per_unit(sb),
                    initial_target_p: l.p0.to_per_unit(sb),
                    target_q: l.q0.to_per_unit(sb),
                    disabled: false,
                    properties: PropertyBag::new(),
                },
                power_factor: None,
            });
        }

        for c in &grid.lcc_converter_stations {
            let Some(bus) = topology.bus_of(&c.terminal) else {
                continue;
            };
            model.loads.push(ProtoLoad {
                load: LfLoad {
                    num: 0,
                    id: c.id.clone(),
                    bus,
                    kind: LoadKind::LccConverter { hvdc: None },
                    target_p: 0.0,
                    initial_target_p: 0.0,
                    target_q: 0.0,
                    disabled: false,
                    properties: PropertyBag::new(),
                },
                power_factor: Some(c.power_factor),
            });
        }

        for s in &grid.shunts {
            let Some(bus) = topology.bus_of(&s.terminal) else {
                continue;
            };
            let u = model.buses[bus].bus.nominal_v;
            let scale = u * u / sb;
            let controlled = regulated_bus(grid, topology, s.regulated.as_ref(), Some(bus)).unwrap_or(bus);
            let target_v = s
                .target_v
                .map(|v| v.to_per_unit(Kilovolts(model.buses[controlled].bus.nominal_v)))
                .unwrap_or(0.0);
            model.shunts.push(LfShunt {
                num: 0,
                id: s.id.clone(),
                bus,
                g: s.g_per_section * scale * s.section_count as f64,
                b: s.b_per_section * scale * s.section_count as f64,
                g_per_section: s.g_per_section * scale,
                b_per_section: s.b_per_section * scale,
                section_count: s.section_count,
                max_section_count: s.max_section_count,
                voltage_control: s.voltage_regulator_on && target_v > 0.0,
                target_v,
                controlled_bus: Some(controlled),
                voltage_control_num: None,
                disabled: false,
            });
        }

        for h in &grid.hvdc_lines {
            let converter1 = model.converter(&h.converter_station1);
            let converter2 = model.converter(&h.converter_station2);
            let station_loss = |id: &str| -> f64 {
                grid.vsc_converter_stations
                    .iter()
                    .find(|c| c.id == id)
                    .map(|c| c.loss_factor)
                    .or_else(|| grid.lcc_converter_stations.iter().find(|c| c.id == id).map(|c| c.loss_factor))
                    .unwrap_or(0.0)
                    / 100.0
            };
            let ac_emulation = h.ac_emulation.as_ref().filter(|e| e.enabled).map(|e| LfAcEmulation {
                k: e.droop * 180.0 / std::f64::consts::PI / sb,
                p0: e.p0.to_per_unit(sb),
                p_max: h.max_p.to_per_unit(sb),
            });
            let hvdc = LfHvdc {
                num: 0,
                id: h.id.clone(),
                bus1: converter1.map(|c| model.converter_bus(c)),
                bus2: converter2.map(|c| model.converter_bus(c)),
                converter1,
                converter2,
                setpoint: h.active_power_setpoint.to_per_unit(sb),
                max_p: h.max_p.to_per_unit(sb),
                r: h.r,
                nominal_v: h.nominal_v.0,
                loss_factor1: station_loss(&h.converter_station1),
                loss_factor2: station_loss(&h.converter_station2),
                rectifier_side: match h.converters_mode {
                    ConvertersMode::Side1RectifierSide2Inverter => Side::One,
                    ConvertersMode::Side1InverterSide2Rectifier => Side::Two,
                },
                ac_emulation,
                disabled: false,
            };
            model.hvdcs.push(ProtoHvdc {
                hvdc,
                converter1,
                converter2,
            });
        }

        Ok(model)
    }

    fn nominal_pair(&self, b1: Option<usize>, b2: Option<usize>) -> (f64, f64) {
        let n1 = b1.map(|b| self.buses[b].bus.nominal_v);
        let n2 = b2.map(|b| self.buses[b].bus.nominal_v);
        match (n1, n2) {
            (Some(u1), Some(u2)) => (u1, u2),
            (Some(u), None) | (None, Some(u)) => (u, u),
            (None, None) => (1.0, 1.0),
        }
    }

    fn ratio_control(
        &self,
        grid: &Grid,
        topology: &BusTopology,
        rtc: Option<&RatioTapChanger>,
        kind: Option<TapChangerKind>,
        default_bus: Option<usize>,
        params: &LoadFlowParameters,
    ) -> Option<(usize, f64)> {
        let r = rtc?;
        if !params.transformer_voltage_control_on || !r.regulating || kind != Some(TapChangerKind::Ratio) {
            return None;
        }
        let target = r.target_v?;
        let controlled = regulated_bus(grid, topology, r.regulated.as_ref(), default_bus)?;
        let nominal = self.buses[controlled].bus.nominal_v;
        Some((controlled, target.0 / nominal))
    }

    fn push_branch(
        &mut self,
        mut branch: LfBranch,
        source: BranchSource,
        ratio_control: Option<(usize, f64)>,
        params: &LoadFlowParameters,
        diagnostics: &mut Diagnostics,
    ) {
        let threshold = params.low_impedance_threshold;
        if branch.pi.z() < threshold {
            let eligible = !branch.pi.is_tap_dependent()
                && (branch.pi.r1() - 1.0).abs() < 1e-9
                && branch.pi.a1() == 0.0;
            if eligible {
                branch.zero_impedance = true;
            } else if let PiModel::Simple(m) = &branch.pi {
                diagnostics.add_warning_with_entity(
                    "impedance",
                    "zero impedance branch with ratio or shift, using minimal reactance",
                    &branch.id,
                );
                branch.pi = PiModel::Simple(SimplePiModel::new(
                    m.r, threshold, m.g1, m.b1, m.g2, m.b2, m.r1, m.a1,
                ));
            }
        }
        self.branches.push(ProtoBranch {
            branch,
            source,
            ratio_control,
        });
    }

    fn converter(&self, station_id: &str) -> Option<ConverterRef> {
        if let Some(g) = self.generators.iter().position(|g| g.generator.id == station_id && g.generator.is_converter()) {
            return Some(ConverterRef::Generator(g));
        }
        self.loads
            .iter()
            .position(|l| l.load.id == station_id && matches!(l.load.kind, LoadKind::LccConverter { .. }))
            .map(ConverterRef::Load)
    }

    fn converter_bus(&self, converter: ConverterRef) -> usize {
        match converter {
            ConverterRef::Generator(g) => self.generators[g].generator.bus,
            ConverterRef::Load(l) => self.loads[l].load.bus,
        }
    }

    /// Synchronous components ordered by decreasing bus count, tagged with the
    /// rank of their connected component.
    fn components(&self) -> Vec<Component> {
        let n = self.buses.len();
        let mut sync = UnionFind::<usize>::new(n);
        let mut connected = UnionFind::<usize>::new(n);
        for pb in &self.branches {
            if let (Some(b1), Some(b2)) = (pb.branch.bus1, pb.branch.bus2) {
                sync.union(b1, b2);
                connected.union(b1, b2);
            }
        }
        for ph in &self.hvdcs {
            if let (Some(b1), Some(b2)) = (ph.hvdc.bus1, ph.hvdc.bus2) {
                connected.union(b1, b2);
            }
        }
        let ranked = |labels: Vec<usize>| -> (Vec<Vec<usize>>, Vec<usize>) {
            let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for (bus, label) in labels.iter().enumerate() {
                groups.entry(*label).or_default().push(bus);
            }
            let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
            groups.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
            let mut rank = vec![0; labels.len()];
            for (r, group) in groups.iter().enumerate() {
                for &bus in group {
                    rank[bus] = r;
                }
            }
            (groups, rank)
        };
        let (sync_groups, _) = ranked(sync.into_labeling());
        let (_, cc_rank) = ranked(connected.into_labeling());
        sync_groups
            .into_iter()
            .enumerate()
            .map(|(num_sc, buses)| Component {
                num_sc,
                num_cc: cc_rank[buses[0]],
                buses,
            })
            .collect()
    }

    fn network(
        &self,
        component: &Component,
        grid: &Grid,
        topology: &BusTopology,
        params: &LoadFlowParameters,
        processors: &[&dyn NetworkPostProcessor],
    ) -> GridResult<LfNetwork> {
        let mut net = LfNetwork::new(
            component.num_cc,
            component.num_sc,
            params.base_power,
            params.low_impedance_threshold,
        );
        let mut local: Vec<Option<usize>> = vec![None; self.buses.len()];
        for &global in &component.buses {
            let proto = &self.buses[global];
            let num = net.add_bus(proto.bus.clone());
            local[global] = Some(num);
            let source = proto.topology_bus.map(|b| topology.bus(b));
            for p in processors {
                p.on_bus_added(source, &mut net.buses[num]);
            }
        }
        let map = |bus: Option<usize>| bus.and_then(|b| local[b]);

        let mut ratio_controls: Vec<(usize, usize, f64)> = Vec::new();
        for pb in &self.branches {
            let (b1, b2) = (map(pb.branch.bus1), map(pb.branch.bus2));
            if b1.is_none() && b2.is_none() {
                continue;
            }
            let mut branch = pb.branch.clone();
            branch.bus1 = b1;
            branch.bus2 = b2;
            let num = net.add_branch(branch);
            let source = match pb.source {
                BranchSource::Line(i) => SourceBranch::Line(&grid.lines[i]),
                BranchSource::Transformer(i) => SourceBranch::Transformer(&grid.two_windings_transformers[i]),
                BranchSource::Leg(i, side) => SourceBranch::TransformerLeg(&grid.three_windings_transformers[i], side),
                BranchSource::DanglingLine(i) => SourceBranch::DanglingLine(&grid.dangling_lines[i]),
                BranchSource::Switch(i) => SourceBranch::Switch(&topology.retained_switches[i]),
            };
            for p in processors {
                p.on_branch_added(source, &mut net.branches[num]);
            }
            if let Some((controlled, target)) = pb.ratio_control {
                match local[controlled] {
                    Some(c) => ratio_controls.push((num, c, target)),
                    None => net.diagnostics.add_warning_with_entity(
                        "voltage_control",
                        "regulated bus outside the component, tap fixed",
                        &net.branches[num].id,
                    ),
                }
            }
        }

        let mut generator_nums: Vec<Option<usize>> = vec![None; self.generators.len()];
        for (i, pg) in self.generators.iter().enumerate() {
            let Some(bus) = local[pg.generator.bus] else {
                continue;
            };
            let mut generator = pg.generator.clone();
            generator.bus = bus;
            generator.controlled_bus = match map(generator.controlled_bus) {
                Some(c) => Some(c),
                None => {
                    net.diagnostics.add_warning_with_entity(
                        "voltage_control",
                        "remote regulated bus outside the component, regulating locally",
                        &generator.id,
                    );
                    Some(bus)
                }
            };
            let num = net.add_generator(generator);
            generator_nums[i] = Some(num);
            let source = match pg.source {
                GeneratorSource::Generator(g) => SourceGenerator::Generator(&grid.generators[g]),
                GeneratorSource::Vsc(c) => SourceGenerator::VscConverter(&grid.vsc_converter_stations[c]),
            };
            for p in processors {
                p.on_generator_added(source, &mut net.generators[num]);
            }
        }

        let mut load_nums: Vec<Option<usize>> = vec![None; self.loads.len()];
        for (i, pl) in self.loads.iter().enumerate() {
            let Some(bus) = local[pl.load.bus] else {
                continue;
            };
            let mut load = pl.load.clone();
            load.bus = bus;
            load_nums[i] = Some(net.add_load(load));
        }

        for shunt in &self.shunts {
            let Some(bus) = local[shunt.bus] else {
                continue;
            };
            let mut shunt = shunt.clone();
            shunt.bus = bus;
            shunt.controlled_bus = map(shunt.controlled_bus).or(Some(bus));
            net.add_shunt(shunt);
        }

        for ph in &self.hvdcs {
            let (b1, b2) = (map(ph.hvdc.bus1), map(ph.hvdc.bus2));
            if b1.is_none() && b2.is_none() {
                continue;
            }
            let local_converter = |c: Option<ConverterRef>| -> Option<ConverterRef> {
                match c? {
                    ConverterRef::Generator(g) => generator_nums[g].map(ConverterRef::Generator),
                    ConverterRef::Load(l) => load_nums[l].map(ConverterRef::Load),
                }
            };
            let mut hvdc = ph.hvdc.clone();
            hvdc.bus1 = b1;
            hvdc.bus2 = b2;
            hvdc.converter1 = local_converter(ph.converter1);
            hvdc.converter2 = local_converter(ph.converter2);
            let num = net.add_hvdc(hvdc);
            for converter in [net.hvdcs[num].converter1, net.hvdcs[num].converter2].into_iter().flatten() {
                match converter {
                    ConverterRef::Generator(g) => {
                        net.generators[g].kind = GeneratorKind::VscConverter { hvdc: Some(num) }
                    }
                    ConverterRef::Load(l) => net.loads[l].kind = LoadKind::LccConverter { hvdc: Some(num) },
                }
            }
        }
        let power_factors: Vec<(usize, f64)> = self
            .loads
            .iter()
            .zip(&load_nums)
            .filter_map(|(pl, num)| Some(((*num)?, pl.power_factor?)))
            .collect();
        update_converter_targets(&mut net, &power_factors);

        create_generator_controls(&mut net);
        if params.transformer_voltage_control_on {
            create_transformer_controls(&mut net, &ratio_controls);
        }
        if params.shunt_compensator_voltage_control_on {
            create_shunt_controls(&mut net);
        }
        for bus in 0..net.buses.len() {
            if let Some(c) = net.buses[bus].generator_voltage_control {
                net.buses[bus].v = net.voltage_controls[c].target_v;
            }
        }
        net.select_slack_buses(params);
        tracing::debug!(
            num_cc = net.num_cc,
            num_sc = net.num_sc,
            buses = net.buses.len(),
            branches = net.branches.len(),
            generators = net.generators.len(),
            controls = net.voltage_controls.len(),
            "network created"
        );
        Ok(net)
    }
}

/// Converter injections from the HVDC setpoints. Converters of an emulated
/// link inject nothing by themselves; the emulation terms carry the transfer.
fn update_converter_targets(net: &mut LfNetwork, power_factors: &[(usize, f64)]) {
    let base = net.base_power;
    for h in 0..net.hvdcs.len() {
        let hvdc = &net.hvdcs[h];
        let (p1, p2) = if hvdc.emulation_active() {
            (0.0, 0.0)
        } else {
            hvdc.setpoint_injections(base)
        };
        for (converter, p) in [(hvdc.converter1, p1), (hvdc.converter2, p2)] {
            match converter {
                Some(ConverterRef::Generator(g)) => {
                    net.generators[g].target_p = p;
                    net.generators[g].initial_target_p = p;
                }
                Some(ConverterRef::Load(l)) => {
                    net.loads[l].target_p = -p;
                    net.loads[l].initial_target_p = -p;
                }
                None => {}
            }
        }
    }
    for &(l, pf) in power_factors {
        let load = &mut net.loads[l];
        let pf = pf.clamp(1e-6, 1.0);
        load.target_q = load.target_p.abs() * pf.acos().tan();
    }
}

fn create_generator_controls(net: &mut LfNetwork) {
    let mut by_controlled: BTreeMap<usize, usize> = BTreeMap::new();
    for bus in 0..net.buses.len() {
        let regulating: Vec<usize> = net.buses[bus]
            .generators
            .iter()
            .copied()
            .filter(|&g| net.generators[g].voltage_control)
            .collect();
        let Some(&first) = regulating.first() else {
            continue;
        };
        let controlled = net.generators[first].controlled_bus.unwrap_or(bus);
        let target = net.generators[first].target_v;
        for &g in &regulating[1..] {
            if net.generators[g].controlled_bus != Some(controlled) {
                let id = net.generators[g].id.clone();
                net.diagnostics.add_warning_with_entity(
                    "voltage_control",
                    "generators of one bus regulate different buses, keeping the first",
                    &id,
                );
                net.generators[g].voltage_control = false;
            }
        }
        if !(MIN_PLAUSIBLE_TARGET_V..=MAX_PLAUSIBLE_TARGET_V).contains(&target) {
            for &g in &regulating {
                net.generators[g].voltage_control = false;
            }
            let id = net.generators[first].id.clone();
            net.diagnostics.add_warning_with_entity(
                "voltage_control",
                &format!("implausible voltage target {target:.3} pu, regulation disabled"),
                &id,
            );
            continue;
        }
        let control = match by_controlled.get(&controlled) {
            Some(&c) => {
                if (net.voltage_controls[c].target_v - target).abs() > 1e-6 {
                    let id = net.buses[controlled].id.clone();
                    net.diagnostics.add_warning_with_entity(
                        "voltage_control",
                        "controllers disagree on the voltage target, keeping the first",
                        &id,
                    );
                }
                c
            }
            None => {
                let c = net.voltage_controls.len();
                net.voltage_controls
                    .push(VoltageControl::new(c, VoltageControlKind::Generator, controlled, target));
                by_controlled.insert(controlled, c);
                net.buses[controlled].generator_voltage_control = Some(c);
                c
            }
        };
        net.voltage_controls[control].controllers.push(bus);
        net.buses[bus].controller_of = Some(control);
        net.buses[bus].voltage_control_enabled = true;
    }
}

fn create_transformer_controls(net: &mut LfNetwork, ratio_controls: &[(usize, usize, f64)]) {
    let mut by_controlled: BTreeMap<usize, usize> = BTreeMap::new();
    for &(branch, controlled, target) in ratio_controls {
        let control = match by_controlled.get(&controlled) {
            Some(&c) => c,
            None => {
                let c = net.voltage_controls.len();
                net.voltage_controls
                    .push(VoltageControl::new(c, VoltageControlKind::Transformer, controlled, target));
                by_controlled.insert(controlled, c);
                net.buses[controlled].transformer_voltage_control = Some(c);
                c
            }
        };
        net.voltage_controls[control].controllers.push(branch);
        net.branches[branch].voltage_control = Some(control);
    }
}

fn create_shunt_controls(net: &mut LfNetwork) {
    let mut by_controlled: BTreeMap<usize, usize> = BTreeMap::new();
    for sh in 0..net.shunts.len() {
        let shunt = &net.shunts[sh];
        if !shunt.voltage_control || shunt.max_section_count == 0 || shunt.b_per_section == 0.0 {
            continue;
        }
        let controlled = shunt.controlled_bus.unwrap_or(shunt.bus);
        let target = shunt.target_v;
        let control = match by_controlled.get(&controlled) {
            Some(&c) => c,
            None => {
                let c = net.voltage_controls.len();
                net.voltage_controls
                    .push(VoltageControl::new(c, VoltageControlKind::Shunt, controlled, target));
                by_controlled.insert(controlled, c);
                net.buses[controlled].shunt_voltage_control = Some(c);
                c
            }
        };
        net.voltage_controls[control].controllers.push(sh);
        net.shunts[sh].voltage_control_num = Some(control);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{three_winding_grid, two_bus_grid, two_island_grid};

    #[test]
    fn two_bus_grid_in_per_unit() {
        let grid = two_bus_grid();
        let networks = build_networks(&grid, &LoadFlowParameters::default(), &[]).unwrap();
        assert_eq!(networks.len(), 1);
        let net = &networks[0];
        assert_eq!(net.buses.len(), 2);
        assert!((net.branches[0].pi.x() - 0.1).abs() < 1e-12);
        assert!((net.branches[0].pi.r1() - 1.0).abs() < 1e-12);
        assert!((net.generators[0].target_p - 2.0).abs() < 1e-12);
        assert!((net.generators[0].target_v - 1.0).abs() < 1e-12);
        assert_eq!(net.voltage_controls.len(), 1);
        assert_eq!(net.buses[0].controller_of, Some(0));
        assert_eq!(net.reference_bus, Some(0));
    }

    #[test]
    fn three_winding_transformer_gets_star_bus() {
        let grid = three_winding_grid();
        let networks = build_networks(&grid, &LoadFlowParameters::default(), &[]).unwrap();
        let net = &networks[0];
        let star = net.bus_by_id("T3_star").unwrap();
        assert!(net.buses[star].fictitious);
        assert_eq!(net.branches_of_source("T3").len(), 3);
        let (leg3, side) = net.branch_terminal("T3", Side::Three).unwrap();
        assert_eq!(side, Side::One);
        assert_eq!(net.branches[leg3].bus2, Some(star));
    }

    #[test]
    fn islands_are_sorted_and_filtered() {
        let grid = two_island_grid();
        let all = build_networks(
            &grid,
            &LoadFlowParameters::default().with_connected_component_mode(ConnectedComponentMode::All),
            &[],
        )
        .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].buses.len() >= all[1].buses.len());
        assert_eq!(all[0].num_sc, 0);
        assert_eq!(all[1].num_sc, 1);

        let main = build_networks(&grid, &LoadFlowParameters::default(), &[]).unwrap();
        assert_eq!(main.len(), 1);
        assert!(main[0].is_main());
    }

    #[test]
    fn post_processor_tags_buses() {
        struct Tagger;
        impl NetworkPostProcessor for Tagger {
            fn name(&self) -> &str {
                "tagger"
            }
            fn on_bus_added(&self, source: Option<&flowsens_core::CalculatedBus>, bus: &mut LfBus) {
                bus.properties
                    .insert("calculated".into(), serde_json::json!(source.is_some()));
            }
        }
        let processors: Vec<Box<dyn NetworkPostProcessor>> = vec![Box::new(Tagger)];
        let grid = two_bus_grid();
        let untouched = build_networks(&grid, &LoadFlowParameters::default(), &processors).unwrap();
        assert!(untouched[0].buses[0].properties.is_empty());

        let params = LoadFlowParameters::default().with_post_processors(&["tagger"]);
        let tagged = build_networks(&grid, &params, &processors).unwrap();
        assert_eq!(
            tagged[0].buses[0].properties.get("calculated"),
            Some(&serde_json::json!(true))
        );
    }
}
