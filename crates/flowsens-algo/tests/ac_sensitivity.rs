//! AC sensitivity tests: linearization at the Newton-Raphson solution

use flowsens_algo::config::{LoadFlowParameters, SensitivityParameters};
use flowsens_algo::power_flow::LoadFlow;
use flowsens_algo::sensitivity::{
    SensitivityAnalysis, SensitivityAnalysisResult, SensitivityFactor, SensitivityFunctionType,
    SensitivityVariableType,
};
use flowsens_algo::test_utils::{hvdc_emulation_grid, hvdc_grid, phase_shifter_grid, two_bus_grid};
use flowsens_algo::SolverStatus;
use flowsens_core::{Grid, Megawatts};

fn ac_load_flow(slack: &str) -> LoadFlowParameters {
    LoadFlowParameters::default()
        .with_distributed_slack(false)
        .with_slack_bus_ids(&[slack])
}

fn run(grid: &Grid, load_flow: LoadFlowParameters, factors: &[SensitivityFactor]) -> SensitivityAnalysisResult {
    let result = SensitivityAnalysis::new(SensitivityParameters::new(load_flow))
        .run(grid, factors, &[], &[], &[])
        .unwrap();
    assert_eq!(result.load_flow_status, SolverStatus::Converged);
    result
}

fn factor(
    function_type: SensitivityFunctionType,
    function: &str,
    variable_type: SensitivityVariableType,
    variable: &str,
) -> SensitivityFactor {
    SensitivityFactor::new(function_type, function, variable_type, variable)
}

#[test]
fn lossless_line_passes_the_whole_injection() {
    let grid = two_bus_grid();
    let factors = [
        factor(
            SensitivityFunctionType::BranchActivePower1,
            "L12",
            SensitivityVariableType::InjectionActivePower,
            "LD2",
        ),
        factor(
            SensitivityFunctionType::BranchActivePower2,
            "L12",
            SensitivityVariableType::InjectionActivePower,
            "LD2",
        ),
        factor(
            SensitivityFunctionType::BranchReactivePower2,
            "L12",
            SensitivityVariableType::InjectionReactivePower,
            "LD2",
        ),
    ];
    let result = run(&grid, ac_load_flow("VL1"), &factors);
    assert!((result.value(0, None).unwrap() + 1.0).abs() < 1e-6);
    // VL2 has only the line and the load: whatever is injected leaves through the line
    assert!((result.value(1, None).unwrap() - 1.0).abs() < 1e-9);
    assert!((result.value(2, None).unwrap() - 1.0).abs() < 1e-9);
    // reference flow is the 200 MW load
    assert!((result.function_reference(0, None).unwrap() - 200.0).abs() < 0.05);
}

#[test]
fn voltage_target_moves_the_regulated_bus_one_for_one() {
    let grid = two_bus_grid();
    let target = SensitivityVariableType::BusTargetVoltage;
    let factors = [
        factor(SensitivityFunctionType::BusVoltage, "VL1_0", target, "G1"),
        factor(SensitivityFunctionType::BusVoltage, "VL2_0", target, "VL1_0"),
    ];
    let result = run(&grid, ac_load_flow("VL1"), &factors);
    assert!((result.value(0, None).unwrap() - 1.0).abs() < 1e-9);
    let remote = result.value(1, None).unwrap();
    assert!(remote > 0.8 && remote < 1.3, "{remote}");
    assert!(result.function_reference(0, None).unwrap() > 399.0);
}

#[test]
fn current_sensitivity_matches_finite_differences() {
    let grid = two_bus_grid();
    let load_flow = ac_load_flow("VL1");
    let factors = [factor(
        SensitivityFunctionType::BranchCurrent1,
        "L12",
        SensitivityVariableType::InjectionActivePower,
        "LD2",
    )];
    let value = run(&grid, load_flow.clone(), &factors).value(0, None).unwrap();

    let current = |p0: f64| {
        let mut grid = grid.clone();
        grid.loads[0].p0 = Megawatts(p0);
        let load_flow = LoadFlow::new(load_flow.clone());
        let mut networks = load_flow.build(&grid).unwrap();
        load_flow.run_on(&mut networks).unwrap().branch("L12").unwrap().i1
    };
    // one more MW injected is one less MW consumed
    let fd = (current(199.0) - current(201.0)) / 2.0;
    assert!((value - fd).abs() < 1e-3 * fd.abs(), "{value} vs {fd}");
}

#[test]
fn ac_and_dc_agree_on_a_low_loss_loop() {
    let grid = phase_shifter_grid();
    let factors: Vec<_> = ["L12", "L23", "L34", "L41", "PS13"]
        .iter()
        .map(|b| {
            factor(
                SensitivityFunctionType::BranchActivePower1,
                b,
                SensitivityVariableType::InjectionActivePower,
                "LD3",
            )
        })
        .collect();
    let ac = run(&grid, ac_load_flow("VL1"), &factors);
    let dc = run(&grid, ac_load_flow("VL1").with_dc(true), &factors);
    for i in 0..factors.len() {
        let (a, d) = (ac.value(i, None).unwrap(), dc.value(i, None).unwrap());
        assert!((a - d).abs() < 0.05, "{}: ac {a} dc {d}", factors[i].function_id);
    }
}

#[test]
fn hvdc_setpoint_relieves_the_parallel_line() {
    let grid = hvdc_grid();
    let factors = [factor(
        SensitivityFunctionType::BranchActivePower1,
        "L12",
        SensitivityVariableType::HvdcLineActivePower,
        "HVDC12",
    )];
    for dc in [false, true] {
        let value = run(&grid, ac_load_flow("VL1").with_dc(dc), &factors).value(0, None).unwrap();
        // what reaches VL2 is the setpoint minus converter and cable losses
        assert!(value < -0.95 && value > -1.0, "dc={dc}: {value}");
    }
}

#[test]
fn emulated_hvdc_offset_is_shared_with_the_line() {
    let grid = hvdc_emulation_grid();
    let factors = [factor(
        SensitivityFunctionType::BranchActivePower1,
        "L12",
        SensitivityVariableType::HvdcLineActivePower,
        "HVDC12",
    )];
    let value = run(&grid, ac_load_flow("VL1"), &factors).value(0, None).unwrap();
    // the droop pulls part of the offset back through the angle difference
    assert!(value < 0.0 && value > -1.0, "{value}");
}
