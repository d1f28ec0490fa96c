//! Load flow tests on small grids, AC and DC

use flowsens_algo::config::LoadFlowParameters;
use flowsens_algo::power_flow::{run_load_flow, LoadFlow};
use flowsens_algo::test_utils::{bridge_grid, three_winding_grid, two_bus_grid};
use flowsens_algo::SolverStatus;
use flowsens_core::{Grid, Line, Side, Terminal};

fn params(dc: bool) -> LoadFlowParameters {
    LoadFlowParameters::default()
        .with_dc(dc)
        .with_distributed_slack(false)
        .with_slack_bus_ids(&["VL1"])
}

/// [`bridge_grid`] plus a spare line to VL3 whose far end is open.
fn grid_with_open_line() -> Grid {
    let mut grid = bridge_grid();
    grid.lines.push(Line {
        id: "L23B".into(),
        terminal1: Terminal::new("VL2", 0),
        terminal2: Terminal::new("VL3", 0).disconnected(),
        r: 1.6,
        x: 24.0,
        ..Line::default()
    });
    grid
}

#[test]
fn two_bus_ac_converges_and_writes_back() {
    let mut grid = two_bus_grid();
    let result = run_load_flow(&mut grid, &params(false)).unwrap();
    let main = result.main().unwrap();
    assert_eq!(main.status, SolverStatus::Converged);
    assert!(main.iterations <= 5);

    let flow = grid.state.flow("L12", Side::One).unwrap();
    assert!((flow.p - 200.0).abs() < 1e-3);
    // reactive losses of the line come from the generator side
    assert!(flow.q > 100.0);
    let v2 = result.bus("VL2_0").unwrap().v;
    assert!(v2 > 330.0 && v2 < 355.0, "{v2}");
}

#[test]
fn dc_flows_split_over_parallel_lines() {
    let load_flow = LoadFlow::new(params(true));
    let mut networks = load_flow.build(&bridge_grid()).unwrap();
    let result = load_flow.run_on(&mut networks).unwrap();
    assert!(result.is_ok());
    // VL3 imports 50 MW, VL2 consumes 250 MW
    let l23 = result.branch("L23").unwrap();
    assert!((l23.p1 - 50.0).abs() < 1e-9);
    assert!((l23.p1 + l23.p2).abs() < 1e-12);
    for id in ["L12A", "L12B"] {
        assert!((result.branch(id).unwrap().p1 - 150.0).abs() < 1e-9);
    }
}

#[test]
fn open_line_end_carries_no_flow() {
    for dc in [true, false] {
        let load_flow = LoadFlow::new(params(dc));
        let mut networks = load_flow.build(&grid_with_open_line()).unwrap();
        let result = load_flow.run_on(&mut networks).unwrap();
        let open = result.branch("L23B").unwrap();
        assert_eq!(open.p2, 0.0, "dc={dc}");
        assert_eq!(open.q2, 0.0);
        assert_eq!(open.i2, 0.0);
        // no shunt admittance on the line
        assert!(open.p1.abs() < 1e-9, "dc={dc}: {}", open.p1);
    }
}

#[test]
fn three_winding_transformer_feeds_both_windings() {
    let mut grid = three_winding_grid();
    let result = run_load_flow(&mut grid, &params(false)).unwrap();
    assert!(result.is_ok());
    let p = |side| grid.state.flow("T3", side).unwrap().p;
    // 140 MW of load behind the transformer, a little more enters it
    assert!(p(Side::One) > 140.0 && p(Side::One) < 145.0, "{}", p(Side::One));
    assert!((p(Side::Two) + 100.0).abs() < 1e-3);
    assert!((p(Side::Three) + 40.0).abs() < 1e-3);
}
