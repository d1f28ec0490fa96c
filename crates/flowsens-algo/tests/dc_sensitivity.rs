//! DC sensitivity tests against load flows and network laws

use flowsens_algo::config::{LoadFlowParameters, SensitivityParameters};
use flowsens_algo::contingency::{Action, Condition, Contingency, ContingencyElement, OperatorStrategy};
use flowsens_algo::power_flow::LoadFlow;
use flowsens_algo::sensitivity::{
    SensitivityAnalysis, SensitivityAnalysisResult, SensitivityFactor, SensitivityFunctionType,
    SensitivityVariableSet, SensitivityVariableType,
};
use flowsens_algo::test_utils::{bridge_grid, phase_shifter_grid, retained_switch_grid};
use flowsens_algo::StateStatus;
use flowsens_core::{Grid, GridError, Kilovolts, Megawatts};

fn dc_load_flow(slack: &str, distributed: bool) -> LoadFlowParameters {
    LoadFlowParameters::default()
        .with_dc(true)
        .with_distributed_slack(distributed)
        .with_slack_bus_ids(&[slack])
}

fn p1(branch: &str, variable_type: SensitivityVariableType, variable: &str) -> SensitivityFactor {
    SensitivityFactor::new(SensitivityFunctionType::BranchActivePower1, branch, variable_type, variable)
}

fn injection(branch: &str, injection: &str) -> SensitivityFactor {
    p1(branch, SensitivityVariableType::InjectionActivePower, injection)
}

/// Engine events go to the test output when RUST_LOG is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn run(
    grid: &Grid,
    load_flow: LoadFlowParameters,
    factors: &[SensitivityFactor],
    contingencies: &[Contingency],
) -> SensitivityAnalysisResult {
    init_tracing();
    SensitivityAnalysis::new(SensitivityParameters::new(load_flow))
        .run(grid, factors, contingencies, &[], &[])
        .unwrap()
}

fn flow(grid: &Grid, load_flow: &LoadFlowParameters, branch: &str) -> f64 {
    let load_flow = LoadFlow::new(load_flow.clone());
    let mut networks = load_flow.build(grid).unwrap();
    load_flow.run_on(&mut networks).unwrap().branch(branch).unwrap().p1
}

#[test]
fn bridge_outage_makes_island_variables_nan() {
    let grid = bridge_grid();
    let factors = [injection("L12A", "G3"), injection("L12A", "LD2"), injection("L23", "LD2")];
    let result = run(&grid, dc_load_flow("VL1", false), &factors, &[Contingency::branch("L23")]);

    // G3 feeds VL2 through L23, the slack at VL1 takes the surplus back
    assert!((result.value(0, None).unwrap() + 0.5).abs() < 1e-9);
    assert!(result.value(0, Some("L23")).unwrap().is_nan());
    // LD2 stays on the slack side
    let post = result.value(1, Some("L23")).unwrap();
    assert!((post + 0.5).abs() < 1e-9, "{post}");
    assert_eq!(result.status("L23", None), Some(StateStatus::Success));
    // reference flows of the lost line are unreachable too
    assert!(result.function_reference(2, Some("L23")).unwrap().is_nan());
}

#[test]
fn injection_sensitivity_predicts_a_redispatch() {
    let grid = phase_shifter_grid();
    for distributed in [false, true] {
        let load_flow = dc_load_flow("VL1", distributed);
        let branches = ["L12", "L23", "L34", "L41", "PS13"];
        let factors: Vec<_> = branches.iter().map(|b| injection(b, "G2")).collect();
        let result = run(&grid, load_flow.clone(), &factors, &[]);

        let mut redispatched = grid.clone();
        redispatched.generators[1].target_p = Megawatts(110.0);
        for (i, branch) in branches.iter().enumerate() {
            let expected = (flow(&redispatched, &load_flow, branch) - flow(&grid, &load_flow, branch)) / 10.0;
            let value = result.value(i, None).unwrap();
            assert!(
                (value - expected).abs() < 1e-6,
                "{branch} distributed={distributed}: {value} vs {expected}"
            );
        }
    }
}

#[test]
fn phase_shift_predicts_a_tap_change_and_keeps_balance() {
    let grid = phase_shifter_grid();
    let load_flow = dc_load_flow("VL1", false);
    let phase = SensitivityVariableType::TransformerPhase;
    let factors = [
        p1("PS13", phase, "PS13"),
        p1("L12", phase, "PS13"),
        p1("L23", phase, "PS13"),
        p1("L34", phase, "PS13"),
        p1("L41", phase, "PS13"),
    ];
    let result = run(&grid, load_flow.clone(), &factors, &[]);
    let s = |i: usize| result.value(i, None).unwrap();
    assert!(s(0).abs() > 1.0, "a degree moves several MW: {}", s(0));

    // lossless: what the shifter pushes from VL1 to VL3 comes back around the loop
    assert!((s(0) + s(1) - s(4)).abs() < 1e-9);
    assert!((s(0) + s(2) - s(3)).abs() < 1e-9);

    // one tap is one degree
    let mut shifted = grid.clone();
    if let Some(ptc) = shifted.two_windings_transformers[0].phase_tap_changer.as_mut() {
        ptc.tap_position = 1;
    }
    let expected = flow(&shifted, &load_flow, "PS13") - flow(&grid, &load_flow, "PS13");
    assert!((s(0) - expected).abs() < 1e-6, "{} vs {expected}", s(0));
}

#[test]
fn participating_generators_shift_nothing() {
    let grid = phase_shifter_grid();
    let sets = [SensitivityVariableSet::new("GLSK", [("G1", 1.0), ("G2", 1.0)])];
    let factors = [injection("L12", "GLSK").on_variable_set(), injection("L34", "GLSK").on_variable_set()];
    let result = SensitivityAnalysis::new(SensitivityParameters::new(dc_load_flow("VL1", true)))
        .run(&grid, &factors, &[], &sets, &[])
        .unwrap();
    // both generators have the same max P, so the set matches the slack distribution
    for i in 0..2 {
        assert!(result.value(i, None).unwrap().abs() < 1e-12);
    }
}

#[test]
fn variable_set_is_renormalised_when_members_are_lost() {
    let grid = bridge_grid();
    let sets = [SensitivityVariableSet::new("GLSK", [("LD2", 1.0), ("G3", 3.0)])];
    let factors = [
        injection("L12A", "GLSK").on_variable_set(),
        injection("L12A", "LD2"),
        injection("L12A", "G3"),
    ];
    let result = SensitivityAnalysis::new(SensitivityParameters::new(dc_load_flow("VL1", false)))
        .run(&grid, &factors, &[Contingency::branch("L23")], &sets, &[])
        .unwrap();
    let v = |i: usize, c: Option<&str>| result.value(i, c).unwrap();
    assert!((v(0, None) - (0.25 * v(1, None) + 0.75 * v(2, None))).abs() < 1e-12);
    // G3 is islanded, LD2 carries the whole set
    assert!((v(0, Some("L23")) - v(1, Some("L23"))).abs() < 1e-12);
}

fn rescaled(grid: &Grid, nominal_v: f64) -> Grid {
    let mut grid = grid.clone();
    let k = (nominal_v / 400.0).powi(2);
    for vl in &mut grid.voltage_levels {
        vl.nominal_v = Kilovolts(nominal_v);
    }
    for line in &mut grid.lines {
        line.r *= k;
        line.x *= k;
    }
    for t in &mut grid.two_windings_transformers {
        t.r *= k;
        t.x *= k;
        t.rated_u1 = Kilovolts(nominal_v);
        t.rated_u2 = Kilovolts(nominal_v);
    }
    grid
}

#[test]
fn same_per_unit_grid_gives_same_sensitivities_at_any_voltage() {
    let grid = phase_shifter_grid();
    let factors = [
        injection("L12", "LD3"),
        injection("L23", "G2"),
        p1("L34", SensitivityVariableType::TransformerPhase, "PS13"),
    ];
    let at_400 = run(&grid, dc_load_flow("VL1", false), &factors, &[]);
    let at_225 = run(&rescaled(&grid, 225.0), dc_load_flow("VL1", false), &factors, &[]);
    for i in 0..factors.len() {
        let (a, b) = (at_400.value(i, None).unwrap(), at_225.value(i, None).unwrap());
        assert!((a - b).abs() < 1e-9, "factor {i}: {a} vs {b}");
    }
}

#[test]
fn retained_coupler_carries_the_busbar_injection() {
    let grid = retained_switch_grid();
    let factors = [injection("COUPLER", "LD1"), injection("L2", "LD1")];
    let opening = Contingency::new("COUPLER_OPEN", vec![ContingencyElement::Switch("COUPLER".into())]);
    let result = run(&grid, dc_load_flow("BBS1", false), &factors, &[opening]);

    // the slack sits on BBS1, the coupler short-circuits both busbars
    assert!((result.value(0, None).unwrap() + 1.0).abs() < 1e-9);
    assert!(result.value(1, None).unwrap().abs() < 1e-9);

    // opened coupler: the injection goes round through VL2
    assert_eq!(result.value(0, Some("COUPLER_OPEN")), Some(0.0));
    assert_eq!(result.function_reference(0, Some("COUPLER_OPEN")), Some(0.0));
    assert!((result.value(1, Some("COUPLER_OPEN")).unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn reclosing_strategy_reproduces_the_base_case_bit_for_bit() {
    let grid = bridge_grid();
    let factors = [injection("L12A", "LD2"), injection("L23", "G3")];
    let strategy = OperatorStrategy::new(
        "RECLOSE",
        "L12B",
        Condition::Always,
        vec![Action::CloseBranch("L12B".into())],
    );
    let result = SensitivityAnalysis::new(SensitivityParameters::new(dc_load_flow("VL1", false)))
        .run(&grid, &factors, &[Contingency::branch("L12B")], &[], &[strategy])
        .unwrap();
    assert_eq!(result.status("L12B", Some("RECLOSE")), Some(StateStatus::Success));
    for factor in 0..factors.len() {
        let remedial = result.operator_strategy_value(factor, "RECLOSE").unwrap();
        assert_eq!(remedial.value.to_bits(), result.value(factor, None).unwrap().to_bits());
        assert_eq!(
            remedial.function_reference.to_bits(),
            result.function_reference(factor, None).unwrap().to_bits()
        );
    }
    // the outage itself does change the sensitivity
    assert!((result.value(0, Some("L12B")).unwrap() + 1.0).abs() < 1e-9);
}

#[test]
fn unknown_ids_abort_the_run() {
    let grid = bridge_grid();
    let analysis = SensitivityAnalysis::new(SensitivityParameters::new(dc_load_flow("VL1", false)));

    let err = analysis.run(&grid, &[injection("L12A", "G9")], &[], &[], &[]).unwrap_err();
    assert!(matches!(err, GridError::InjectionNotFound(_)));
    assert_eq!(err.to_string(), "Injection 'G9' not found");

    let err = analysis.run(&grid, &[injection("L99", "G3")], &[], &[], &[]).unwrap_err();
    assert_eq!(err.to_string(), "Branch 'L99' not found");

    let hvdc = p1("L12A", SensitivityVariableType::HvdcLineActivePower, "HVDC1");
    let err = analysis.run(&grid, &[hvdc], &[], &[], &[]).unwrap_err();
    assert_eq!(err.to_string(), "HVDC line 'HVDC1' not found");

    let err = analysis
        .run(&grid, &[injection("L12A", "GLSK").on_variable_set()], &[], &[], &[])
        .unwrap_err();
    assert!(matches!(err, GridError::VariableSetNotFound(_)));
}

#[test]
fn factors_read_from_json() {
    let json = r#"[
        {"function_type": "BRANCH_ACTIVE_POWER_1", "function_id": "L12A",
         "variable_type": "INJECTION_ACTIVE_POWER", "variable_id": "LD2"},
        {"function_type": "BRANCH_CURRENT_1", "function_id": "L12A",
         "variable_type": "INJECTION_ACTIVE_POWER", "variable_id": "LD2",
         "contingency_context": {"type": "specific", "contingency_id": "L12B"}}
    ]"#;
    let factors: Vec<SensitivityFactor> = serde_json::from_str(json).unwrap();
    let result = run(&bridge_grid(), dc_load_flow("VL1", false), &factors, &[Contingency::branch("L12B")]);
    assert!(result.value(0, Some("L12B")).is_some());
    // the current factor only lives in its contingency
    assert!(result.value(1, None).is_none());
    let amps = result.value(1, Some("L12B")).unwrap();
    // -1 MW per MW at 400 kV and cos(phi) 1
    let expected = -1000.0 / (3f64.sqrt() * 400.0);
    assert!((amps - expected).abs() < 1e-6, "{amps} vs {expected}");
}
