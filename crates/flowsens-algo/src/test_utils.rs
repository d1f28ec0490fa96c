//! Small grids and networks shared by unit tests, integration tests and benches.
//!
//! Grid factories go through the whole build (topology reduction, per-unit
//! conversion); network factories skip it and assemble an [`LfNetwork`] by hand
//! for tests that only care about the calculation model.

use crate::network::{
    GeneratorKind, LfBranch, LfBus, LfGenerator, LfLoad, LfNetwork, LoadKind, PiModel,
    PropertyBag, SimplePiModel, VoltageControl, VoltageControlKind, BranchType,
};
use flowsens_core::{
    AcEmulation, BusbarSection, Degrees, Generator, Grid, HvdcLine, Kilovolts, Line, Load,
    Megavars, Megawatts, PhaseTapChanger, RatioTapChanger, ReactiveLimits, ShuntCompensator,
    Switch, TapStep, Terminal, ThreeWindingsTransformer, TransformerLeg, TwoWindingsTransformer,
    VoltageLevel, VscConverterStation,
};

const BASE_POWER: f64 = 100.0;

fn generator(id: &str, bus: usize, target_p: f64, max_p: f64) -> LfGenerator {
    LfGenerator {
        num: 0,
        id: id.into(),
        bus,
        kind: GeneratorKind::Generator,
        target_p,
        initial_target_p: target_p,
        min_p: 0.0,
        max_p,
        target_q: 0.0,
        initial_target_q: 0.0,
        target_v: 1.0,
        voltage_control: false,
        controlled_bus: Some(bus),
        reactive_limits: ReactiveLimits::default(),
        participating: true,
        participation_factor: 0.0,
        disabled: false,
        calculated_q: 0.0,
        properties: PropertyBag::new(),
    }
}

fn load(id: &str, bus: usize, target_p: f64, target_q: f64) -> LfLoad {
    LfLoad {
        num: 0,
        id: id.into(),
        bus,
        kind: LoadKind::Load,
        target_p,
        initial_target_p: target_p,
        target_q,
        disabled: false,
        properties: PropertyBag::new(),
    }
}

fn line(id: &str, bus1: usize, bus2: usize, r: f64, x: f64) -> LfBranch {
    let pi = SimplePiModel::new(r, x, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0);
    LfBranch::new(0, id, id, BranchType::Line, Some(bus1), Some(bus2), PiModel::Simple(pi))
}

/// Generator voltage control on its own bus.
fn local_control(net: &mut LfNetwork, generator: usize, target_v: f64) {
    let bus = net.generators[generator].bus;
    let c = net.voltage_controls.len();
    let mut control = VoltageControl::new(c, VoltageControlKind::Generator, bus, target_v);
    control.controllers.push(bus);
    net.voltage_controls.push(control);
    net.generators[generator].voltage_control = true;
    net.generators[generator].target_v = target_v;
    net.buses[bus].controller_of = Some(c);
    net.buses[bus].generator_voltage_control = Some(c);
    net.buses[bus].voltage_control_enabled = true;
}

/// Two 400 kV buses joined by a 0.1 pu reactance, 2 pu generated at bus 0 and
/// 2 + j1 pu consumed at bus 1. Bus 0 is the slack.
pub fn two_bus_network() -> LfNetwork {
    let mut net = LfNetwork::new(0, 0, BASE_POWER, 1e-8);
    net.add_bus(LfBus::new(0, "VL1_0", "VL1", 400.0));
    net.add_bus(LfBus::new(0, "VL2_0", "VL2", 400.0));
    net.add_branch(line("L12", 0, 1, 0.0, 0.1));
    let g = net.add_generator(generator("G1", 0, 2.0, 10.0));
    local_control(&mut net, g, 1.0);
    net.add_load(load("LD2", 1, 2.0, 1.0));
    net.buses[0].slack = true;
    net.buses[0].reference = true;
    net.slack_buses = vec![0];
    net.reference_bus = Some(0);
    net.slack_weights = vec![1.0];
    net
}

/// Buses 0 and 1 joined by two parallel zero-impedance couplers, a line to bus
/// 2. Both coupled buses host a generator regulating its own bus.
pub fn zero_impedance_pair_network() -> LfNetwork {
    let mut net = LfNetwork::new(0, 0, BASE_POWER, 1e-8);
    for i in 0..3 {
        net.add_bus(LfBus::new(0, format!("VL{i}_0"), format!("VL{i}"), 400.0));
    }
    for id in ["CPL_A", "CPL_B"] {
        let mut coupler = line(id, 0, 1, 0.0, 0.0);
        coupler.branch_type = BranchType::Switch;
        coupler.zero_impedance = true;
        net.add_branch(coupler);
    }
    net.add_branch(line("L12", 1, 2, 0.0, 0.1));
    let g0 = net.add_generator(generator("G0", 0, 1.0, 10.0));
    let g1 = net.add_generator(generator("G1", 1, 1.0, 10.0));
    local_control(&mut net, g0, 1.0);
    local_control(&mut net, g1, 1.0);
    net.add_load(load("LD2", 2, 2.0, 0.5));
    net.buses[0].slack = true;
    net.buses[0].reference = true;
    net.slack_buses = vec![0];
    net.reference_bus = Some(0);
    net.slack_weights = vec![1.0];
    net
}

/// Four 400 kV buses, branches 0-1, 1-2, 1-3 and 2-3. Generators at buses 0
/// (max 10 pu) and 2 (max 5 pu), a 1.5 pu load at bus 3. No slack selected.
pub fn meshed_network() -> LfNetwork {
    let mut net = LfNetwork::new(0, 0, BASE_POWER, 1e-8);
    for i in 0..4 {
        net.add_bus(LfBus::new(0, format!("VL{i}_0"), format!("VL{i}"), 400.0));
    }
    for (id, b1, b2) in [("L01", 0, 1), ("L12", 1, 2), ("L13", 1, 3), ("L23", 2, 3)] {
        net.add_branch(line(id, b1, b2, 0.01, 0.1));
    }
    net.add_generator(generator("G0", 0, 1.0, 10.0));
    net.add_generator(generator("G2", 2, 0.5, 5.0));
    net.add_load(load("LD3", 3, 1.5, 0.2));
    net
}

fn voltage_level(id: &str, nominal_v: f64, node_count: usize) -> VoltageLevel {
    VoltageLevel {
        id: id.into(),
        nominal_v: Kilovolts(nominal_v),
        node_count,
        ..VoltageLevel::default()
    }
}

fn grid_line(id: &str, vl1: &str, vl2: &str, r: f64, x: f64) -> Line {
    Line {
        id: id.into(),
        terminal1: Terminal::new(vl1, 0),
        terminal2: Terminal::new(vl2, 0),
        r,
        x,
        ..Line::default()
    }
}

fn grid_generator(id: &str, vl: &str, target_p: f64) -> Generator {
    Generator {
        id: id.into(),
        terminal: Terminal::new(vl, 0),
        target_p: Megawatts(target_p),
        ..Generator::default()
    }
    .with_p_limits(0.0, 1000.0)
}

fn grid_load(id: &str, vl: &str, p0: f64, q0: f64) -> Load {
    Load {
        id: id.into(),
        terminal: Terminal::new(vl, 0),
        p0: Megawatts(p0),
        q0: Megavars(q0),
    }
}

/// Grid version of [`two_bus_network`]: 160 ohm is 0.1 pu at 400 kV and 100 MVA.
pub fn two_bus_grid() -> Grid {
    let mut grid = Grid::new("two-bus");
    grid.voltage_levels.push(voltage_level("VL1", 400.0, 1));
    grid.voltage_levels.push(voltage_level("VL2", 400.0, 1));
    grid.lines.push(grid_line("L12", "VL1", "VL2", 0.0, 160.0));
    grid.generators
        .push(grid_generator("G1", "VL1", 200.0).with_voltage_regulation(400.0));
    grid.loads.push(grid_load("LD2", "VL2", 200.0, 100.0));
    grid
}

/// Square loop VL1-VL2-VL3-VL4 plus a phase shifter PS13 across the diagonal.
///
/// The phase shifter has 21 fixed taps from -10 to +10 degrees, at 0.
pub fn phase_shifter_grid() -> Grid {
    let mut grid = Grid::new("four-bus-pst");
    for vl in ["VL1", "VL2", "VL3", "VL4"] {
        grid.voltage_levels.push(voltage_level(vl, 400.0, 1));
    }
    grid.lines.push(grid_line("L12", "VL1", "VL2", 1.6, 16.0));
    grid.lines.push(grid_line("L23", "VL2", "VL3", 1.6, 24.0));
    grid.lines.push(grid_line("L34", "VL3", "VL4", 1.6, 16.0));
    grid.lines.push(grid_line("L41", "VL4", "VL1", 1.6, 32.0));
    grid.two_windings_transformers.push(TwoWindingsTransformer {
        id: "PS13".into(),
        terminal1: Terminal::new("VL1", 0),
        terminal2: Terminal::new("VL3", 0),
        r: 0.8,
        x: 20.0,
        rated_u1: Kilovolts(400.0),
        rated_u2: Kilovolts(400.0),
        phase_tap_changer: Some(PhaseTapChanger {
            low_tap: -10,
            tap_position: 0,
            steps: (-10..=10)
                .map(|a| TapStep::with_alpha(Degrees(a as f64)))
                .collect(),
            ..PhaseTapChanger::default()
        }),
        ..TwoWindingsTransformer::default()
    });
    grid.generators
        .push(grid_generator("G1", "VL1", 300.0).with_voltage_regulation(400.0));
    grid.generators
        .push(grid_generator("G2", "VL2", 100.0).with_voltage_regulation(400.0));
    grid.loads.push(grid_load("LD3", "VL3", 250.0, 50.0));
    grid.loads.push(grid_load("LD4", "VL4", 150.0, 30.0));
    grid
}

/// VL1 and VL2 joined by two parallel lines, VL3 hanging off VL2 through the
/// single line L23. Removing L23 islands VL3 with its generator and load.
pub fn bridge_grid() -> Grid {
    let mut grid = Grid::new("bridge");
    for vl in ["VL1", "VL2", "VL3"] {
        grid.voltage_levels.push(voltage_level(vl, 400.0, 1));
    }
    grid.lines.push(grid_line("L12A", "VL1", "VL2", 1.6, 16.0));
    grid.lines.push(grid_line("L12B", "VL1", "VL2", 1.6, 16.0));
    grid.lines.push(grid_line("L23", "VL2", "VL3", 1.6, 24.0));
    grid.generators
        .push(grid_generator("G1", "VL1", 300.0).with_voltage_regulation(400.0));
    grid.generators.push(grid_generator("G3", "VL3", 50.0));
    grid.loads.push(grid_load("LD2", "VL2", 250.0, 40.0));
    grid.loads.push(grid_load("LD3", "VL3", 100.0, 10.0));
    grid
}

/// Node-breaker substation VL1 with two busbars joined by the retained
/// coupler COUPLER, each feeding one line towards VL2.
pub fn retained_switch_grid() -> Grid {
    let mut grid = Grid::new("substation");
    grid.voltage_levels.push(VoltageLevel {
        busbar_sections: vec![
            BusbarSection { id: "BBS1".into(), node: 0 },
            BusbarSection { id: "BBS2".into(), node: 1 },
        ],
        ..voltage_level("VL1", 400.0, 4)
    });
    grid.voltage_levels.push(voltage_level("VL2", 400.0, 1));
    grid.switches.push(Switch {
        id: "COUPLER".into(),
        voltage_level: "VL1".into(),
        node1: 0,
        node2: 1,
        retained: true,
        ..Switch::default()
    });
    grid.switches.push(Switch {
        id: "BRK_G1".into(),
        voltage_level: "VL1".into(),
        node1: 0,
        node2: 2,
        ..Switch::default()
    });
    grid.switches.push(Switch {
        id: "BRK_LD1".into(),
        voltage_level: "VL1".into(),
        node1: 1,
        node2: 3,
        ..Switch::default()
    });
    grid.lines.push(Line {
        terminal1: Terminal::new("VL1", 0),
        ..grid_line("L1", "VL1", "VL2", 1.6, 16.0)
    });
    grid.lines.push(Line {
        terminal1: Terminal::new("VL1", 1),
        ..grid_line("L2", "VL1", "VL2", 1.6, 24.0)
    });
    grid.generators.push(Generator {
        terminal: Terminal::new("VL1", 2),
        ..grid_generator("G1", "VL1", 200.0).with_voltage_regulation(400.0)
    });
    grid.loads.push(Load {
        terminal: Terminal::new("VL1", 3),
        ..grid_load("LD1", "VL1", 80.0, 10.0)
    });
    grid.loads.push(grid_load("LD2", "VL2", 120.0, 20.0));
    grid
}

/// 400/225/20 kV three-winding transformer T3, generation at 400 kV.
pub fn three_winding_grid() -> Grid {
    let mut grid = Grid::new("three-winding");
    grid.voltage_levels.push(voltage_level("VL1", 400.0, 1));
    grid.voltage_levels.push(voltage_level("VL2", 225.0, 1));
    grid.voltage_levels.push(voltage_level("VL3", 20.0, 1));
    let leg = |vl: &str, rated_u: f64, x: f64| TransformerLeg {
        terminal: Terminal::new(vl, 0),
        r: x / 20.0,
        x,
        rated_u: Kilovolts(rated_u),
        ..TransformerLeg::default()
    };
    grid.three_windings_transformers.push(ThreeWindingsTransformer {
        id: "T3".into(),
        rated_u0: Kilovolts(400.0),
        leg1: leg("VL1", 400.0, 16.0),
        leg2: leg("VL2", 225.0, 16.0),
        leg3: leg("VL3", 20.0, 32.0),
    });
    grid.generators
        .push(grid_generator("G1", "VL1", 150.0).with_voltage_regulation(400.0));
    grid.loads.push(grid_load("LD2", "VL2", 100.0, 20.0));
    grid.loads.push(grid_load("LD3", "VL3", 40.0, 5.0));
    grid
}

/// VL1 and VL2 joined by line L12 and, in parallel, the VSC link HVDC12
/// transferring 50 MW from VL1 to VL2.
pub fn hvdc_grid() -> Grid {
    let mut grid = Grid::new("hvdc");
    grid.voltage_levels.push(voltage_level("VL1", 400.0, 1));
    grid.voltage_levels.push(voltage_level("VL2", 400.0, 1));
    grid.lines.push(grid_line("L12", "VL1", "VL2", 1.6, 32.0));
    grid.generators
        .push(grid_generator("G1", "VL1", 250.0).with_voltage_regulation(400.0));
    grid.generators.push(grid_generator("G2", "VL2", 50.0));
    grid.loads.push(grid_load("LD1", "VL1", 100.0, 10.0));
    grid.loads.push(grid_load("LD2", "VL2", 200.0, 30.0));
    for (id, vl) in [("CS1", "VL1"), ("CS2", "VL2")] {
        grid.vsc_converter_stations.push(VscConverterStation {
            id: id.into(),
            terminal: Terminal::new(vl, 0),
            loss_factor: 1.0,
            ..VscConverterStation::default()
        });
    }
    grid.hvdc_lines.push(HvdcLine {
        id: "HVDC12".into(),
        converter_station1: "CS1".into(),
        converter_station2: "CS2".into(),
        r: 1.0,
        nominal_v: Kilovolts(320.0),
        active_power_setpoint: Megawatts(50.0),
        max_p: Megawatts(300.0),
        ..HvdcLine::default()
    });
    grid
}

/// [`hvdc_grid`] with the link in AC emulation (droop 100 MW/degree around
/// 50 MW).
pub fn hvdc_emulation_grid() -> Grid {
    let mut grid = hvdc_grid();
    grid.hvdc_lines[0].ac_emulation = Some(AcEmulation {
        droop: 100.0,
        p0: Megawatts(50.0),
        enabled: true,
    });
    grid
}

/// A three-bus island with generation and load, and a separate two-bus island.
pub fn two_island_grid() -> Grid {
    let mut grid = Grid::new("two-islands");
    for vl in ["VL1", "VL2", "VL3", "VL4", "VL5"] {
        grid.voltage_levels.push(voltage_level(vl, 225.0, 1));
    }
    grid.lines.push(grid_line("L12", "VL1", "VL2", 0.5, 5.0));
    grid.lines.push(grid_line("L23", "VL2", "VL3", 0.5, 5.0));
    grid.lines.push(grid_line("L45", "VL4", "VL5", 0.5, 5.0));
    grid.generators
        .push(grid_generator("G1", "VL1", 100.0).with_voltage_regulation(225.0));
    grid.generators
        .push(grid_generator("G4", "VL4", 30.0).with_voltage_regulation(225.0));
    grid.loads.push(grid_load("LD3", "VL3", 90.0, 10.0));
    grid.loads.push(grid_load("LD5", "VL5", 30.0, 5.0));
    grid
}

/// Ladder of `rungs` pairs of buses: two parallel corridors tied at every rung.
///
/// Generation sits at the first rung, loads are spread over the others.
/// Used by the benches to scale the contingency count.
pub fn ladder_grid(rungs: usize) -> Grid {
    let mut grid = Grid::new("ladder");
    let name = |side: char, i: usize| format!("VL{side}{i}");
    for i in 0..rungs {
        for side in ['A', 'B'] {
            grid.voltage_levels.push(voltage_level(&name(side, i), 400.0, 1));
        }
        grid.lines.push(grid_line(&format!("R{i}"), &name('A', i), &name('B', i), 1.6, 20.0));
        if i > 0 {
            for side in ['A', 'B'] {
                grid.lines.push(grid_line(
                    &format!("L{side}{i}"),
                    &name(side, i - 1),
                    &name(side, i),
                    1.6,
                    16.0,
                ));
            }
            grid.loads.push(grid_load(&format!("LD{i}"), &name('B', i), 20.0, 5.0));
        }
    }
    let total = 20.0 * rungs.saturating_sub(1) as f64;
    grid.generators.push(
        grid_generator("GA", &name('A', 0), total / 2.0).with_voltage_regulation(400.0),
    );
    grid.generators.push(
        grid_generator("GB", &name('B', 0), total / 2.0).with_voltage_regulation(400.0),
    );
    grid
}

/// 400/225 kV step-down transformer T12 feeding a load, its ratio tap changer
/// regulating the 225 kV side to 230 kV.
///
/// Eleven taps from 0.95 to 1.05, at the neutral tap 0. Without regulation the
/// 225 kV bus sits near 222 kV.
pub fn ratio_tap_grid() -> Grid {
    let mut grid = Grid::new("ratio-tap");
    grid.voltage_levels.push(voltage_level("VL1", 400.0, 1));
    grid.voltage_levels.push(voltage_level("VL2", 225.0, 1));
    grid.two_windings_transformers.push(TwoWindingsTransformer {
        id: "T12".into(),
        terminal1: Terminal::new("VL1", 0),
        terminal2: Terminal::new("VL2", 0),
        r: 0.5,
        x: 10.0,
        rated_u1: Kilovolts(400.0),
        rated_u2: Kilovolts(225.0),
        ratio_tap_changer: Some(RatioTapChanger {
            low_tap: -5,
            tap_position: 0,
            steps: (-5..=5)
                .map(|k| TapStep::with_rho(1.0 + k as f64 / 100.0))
                .collect(),
            regulating: true,
            target_v: Some(Kilovolts(230.0)),
            regulated: None,
        }),
        ..TwoWindingsTransformer::default()
    });
    grid.generators
        .push(grid_generator("G1", "VL1", 150.0).with_voltage_regulation(400.0));
    grid.loads.push(grid_load("LD2", "VL2", 150.0, 60.0));
    grid
}

/// [`two_bus_grid`] with a capacitor bank at VL2 regulating it to 370 kV.
///
/// Thirty sections of 2.5e-5 S each, all off at start.
pub fn regulating_shunt_grid() -> Grid {
    let mut grid = two_bus_grid();
    grid.shunts.push(ShuntCompensator {
        id: "SH2".into(),
        terminal: Terminal::new("VL2", 0),
        b_per_section: 2.5e-5,
        g_per_section: 0.0,
        section_count: 0,
        max_section_count: 30,
        voltage_regulator_on: true,
        target_v: Some(Kilovolts(370.0)),
        regulated: None,
    });
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadFlowParameters;
    use crate::network::build_networks;

    #[test]
    fn grid_factories_build() {
        for grid in [
            two_bus_grid(),
            phase_shifter_grid(),
            bridge_grid(),
            retained_switch_grid(),
            three_winding_grid(),
            hvdc_grid(),
            two_island_grid(),
            ladder_grid(4),
            ratio_tap_grid(),
            regulating_shunt_grid(),
        ] {
            let networks = build_networks(&grid, &LoadFlowParameters::default(), &[]).unwrap();
            assert!(!networks.is_empty(), "{}", grid.id);
            assert!(networks[0].reference_bus.is_some(), "{}", grid.id);
        }
    }

    #[test]
    fn retained_coupler_is_a_branch() {
        let networks =
            build_networks(&retained_switch_grid(), &LoadFlowParameters::default(), &[]).unwrap();
        let net = &networks[0];
        let coupler = net.branch_by_id("COUPLER").unwrap();
        assert!(net.branches[coupler].zero_impedance);
        assert_eq!(net.bus_by_id("BBS1"), net.branches[coupler].bus1);
    }
}
