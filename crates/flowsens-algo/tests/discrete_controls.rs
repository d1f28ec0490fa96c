//! Tap changers, shunt sections and phase shifters regulating in a load flow:
//! the continuous solution is rounded to a tap or section, and the final state
//! is the one a fixed-tap solve at that position gives.

use flowsens_algo::config::LoadFlowParameters;
use flowsens_algo::network::{MergeStatus, VoltageControlKind};
use flowsens_algo::power_flow::{run_load_flow, LoadFlow};
use flowsens_algo::test_utils::{phase_shifter_grid, ratio_tap_grid, regulating_shunt_grid};
use flowsens_core::{Generator, Grid, PhaseRegulationMode, Side, Terminal};

fn params(dc: bool) -> LoadFlowParameters {
    LoadFlowParameters::default()
        .with_dc(dc)
        .with_distributed_slack(false)
        .with_slack_bus_ids(&["VL1"])
}

fn bus_v(grid: &mut Grid, params: &LoadFlowParameters, bus: &str) -> f64 {
    let result = run_load_flow(grid, params).unwrap();
    assert!(result.is_ok());
    result.bus(bus).unwrap().v
}

fn ratio_tap(grid: &Grid) -> i32 {
    grid.two_windings_transformers[0]
        .ratio_tap_changer
        .as_ref()
        .unwrap()
        .tap_position
}

#[test]
fn ratio_tap_changer_lands_on_the_tap_closest_to_its_target() {
    let target = 230.0;
    let free = bus_v(&mut ratio_tap_grid(), &params(false), "VL2_0");

    let mut grid = ratio_tap_grid();
    let regulated = bus_v(&mut grid, &params(false).with_transformer_voltage_control(true), "VL2_0");
    assert!((regulated - target).abs() < (free - target).abs(), "{free} -> {regulated}");
    // taps are 1 % apart, about 2.25 kV
    assert!((regulated - target).abs() < 2.0, "{regulated}");
    let tap = ratio_tap(&grid);
    assert!(tap > 0, "{tap}");

    // the written tap reproduces the regulated state without regulation
    let fixed = bus_v(&mut grid, &params(false), "VL2_0");
    assert_eq!(ratio_tap(&grid), tap);
    assert!((fixed - regulated).abs() < 1e-3, "{fixed} vs {regulated}");

    // neither neighbouring tap does better
    for neighbour in [tap - 1, tap + 1] {
        if !(-5..=5).contains(&neighbour) {
            continue;
        }
        let mut other = ratio_tap_grid();
        other.two_windings_transformers[0]
            .ratio_tap_changer
            .as_mut()
            .unwrap()
            .tap_position = neighbour;
        let v = bus_v(&mut other, &params(false), "VL2_0");
        assert!((regulated - target).abs() <= (v - target).abs() + 1e-6, "tap {neighbour}: {v}");
    }
}

#[test]
fn shunt_sections_move_the_voltage_toward_the_target() {
    let target = 370.0;
    let free = bus_v(&mut regulating_shunt_grid(), &params(false), "VL2_0");

    let mut grid = regulating_shunt_grid();
    let regulated = bus_v(&mut grid, &params(false).with_shunt_voltage_control(true), "VL2_0");
    assert!((regulated - target).abs() < (free - target).abs(), "{free} -> {regulated}");
    assert!((regulated - target).abs() < 1.5, "{regulated}");
    let sections = grid.shunts[0].section_count;
    assert!(sections > 0 && sections < 30, "{sections}");

    let fixed = bus_v(&mut grid, &params(false), "VL2_0");
    assert_eq!(grid.shunts[0].section_count, sections);
    assert!((fixed - regulated).abs() < 1e-3, "{fixed} vs {regulated}");
}

fn regulating_phase_shifter_grid(target_p: f64) -> Grid {
    let mut grid = phase_shifter_grid();
    let ptc = grid.two_windings_transformers[0]
        .phase_tap_changer
        .as_mut()
        .unwrap();
    ptc.regulating = true;
    ptc.regulation_mode = PhaseRegulationMode::ActivePowerControl;
    ptc.regulation_value = target_p;
    grid
}

fn phase_tap(grid: &Grid) -> i32 {
    grid.two_windings_transformers[0]
        .phase_tap_changer
        .as_ref()
        .unwrap()
        .tap_position
}

fn ps13_flow(grid: &mut Grid, params: &LoadFlowParameters) -> f64 {
    let result = run_load_flow(grid, params).unwrap();
    assert!(result.is_ok());
    grid.state.flow("PS13", Side::One).unwrap().p
}

#[test]
fn phase_shifter_flow_lands_on_the_closest_tap() {
    for dc in [true, false] {
        for target in [100.0, 150.0, 200.0] {
            let mut grid = regulating_phase_shifter_grid(target);
            let regulated = ps13_flow(&mut grid, &params(dc).with_phase_shifter_regulation(true));
            let tap = phase_tap(&grid);

            // same tap, regulation off: same flow
            let fixed = ps13_flow(&mut grid, &params(dc));
            assert!((fixed - regulated).abs() < 1e-3, "dc={dc} {target}: {fixed} vs {regulated}");

            for neighbour in [tap - 1, tap + 1] {
                if !(-10..=10).contains(&neighbour) {
                    continue;
                }
                let mut other = phase_shifter_grid();
                other.two_windings_transformers[0]
                    .phase_tap_changer
                    .as_mut()
                    .unwrap()
                    .tap_position = neighbour;
                let p = ps13_flow(&mut other, &params(dc));
                assert!(
                    (regulated - target).abs() <= (p - target).abs() + 1e-3,
                    "dc={dc} {target}: tap {tap} gives {regulated}, tap {neighbour} gives {p}"
                );
            }
        }
    }
}

#[test]
fn generator_hides_transformer_control_on_the_same_bus() {
    let mut grid = ratio_tap_grid();
    grid.generators.push(
        Generator {
            id: "G2".into(),
            terminal: Terminal::new("VL2", 0),
            ..Generator::default()
        }
        .with_p_limits(0.0, 100.0)
        .with_voltage_regulation(228.0),
    );
    let params = params(false).with_transformer_voltage_control(true);
    let mut networks = LoadFlow::new(params.clone()).build(&grid).unwrap();
    let net = &mut networks[0];
    net.update_voltage_control_status();
    let bus = net.bus_by_id("VL2_0").unwrap();
    let status = |kind| {
        net.voltage_controls
            .iter()
            .find(|c| c.kind == kind && c.controlled_bus == bus)
            .map(|c| c.merge_status)
    };
    assert_eq!(status(VoltageControlKind::Generator), Some(MergeStatus::Main));
    assert_eq!(status(VoltageControlKind::Transformer), Some(MergeStatus::Hidden));

    // the generator holds the bus, the tap stays where it was
    let v = bus_v(&mut grid, &params, "VL2_0");
    assert!((v - 228.0).abs() < 1e-3, "{v}");
    assert_eq!(ratio_tap(&grid), 0);
}
