//! Contingency connectivity and operator strategy tests

use flowsens_algo::config::{LoadFlowParameters, SensitivityParameters};
use flowsens_algo::contingency::{
    analyse_connectivity, Action, Condition, Contingency, ContingencyAnalysis, ContingencyContext,
    ContingencyElement, OperatorStrategy, PropagatedContingency, StateStatus,
};
use flowsens_algo::network::build_networks;
use flowsens_algo::sensitivity::{
    SensitivityAnalysis, SensitivityFactor, SensitivityFunctionType, SensitivityVariableType,
};
use flowsens_algo::test_utils::bridge_grid;

fn dc_params() -> LoadFlowParameters {
    LoadFlowParameters::default()
        .with_dc(true)
        .with_distributed_slack(false)
        .with_slack_bus_ids(&["VL1"])
}

fn p1(branch: &str, injection: &str) -> SensitivityFactor {
    SensitivityFactor::new(
        SensitivityFunctionType::BranchActivePower1,
        branch,
        SensitivityVariableType::InjectionActivePower,
        injection,
    )
}

fn l23_with_load() -> Contingency {
    Contingency::new(
        "L23+LD3",
        vec![
            ContingencyElement::Branch("L23".into()),
            ContingencyElement::Load("LD3".into()),
        ],
    )
}

#[test]
fn contingencies_are_grouped_by_what_they_cut_off() {
    let grid = bridge_grid();
    let net = build_networks(&grid, &dc_params(), &[]).unwrap().remove(0);
    let contingencies = [
        Contingency::branch("L23"),
        Contingency::branch("L12A"),
        Contingency::branch("L12B"),
        l23_with_load(),
        Contingency::new(
            "L12AB",
            vec![
                ContingencyElement::Branch("L12A".into()),
                ContingencyElement::Branch("L12B".into()),
            ],
        ),
    ];
    let propagated: Vec<_> = contingencies
        .iter()
        .enumerate()
        .map(|(i, c)| PropagatedContingency::propagate(&net, i, c))
        .collect();
    let groups = analyse_connectivity(&net, &propagated);

    assert_eq!(groups.len(), 3);
    assert!(!groups[0].breaks_connectivity());
    assert_eq!(groups[0].contingencies, vec![1, 2]);
    let island = groups.iter().find(|g| g.contingencies.contains(&0)).unwrap();
    assert_eq!(island.contingencies, vec![0, 3]);
    assert_eq!(island.lost_buses.len(), 1);
    let both = groups.iter().find(|g| g.contingencies == vec![4]).unwrap();
    assert_eq!(both.lost_buses.len(), 2);
}

#[test]
fn same_partition_gives_the_same_sensitivities() {
    let grid = bridge_grid();
    let factors = [p1("L12A", "LD2"), p1("L12A", "G3"), p1("L23", "LD2")];
    let result = SensitivityAnalysis::new(SensitivityParameters::new(dc_params()))
        .run(&grid, &factors, &[Contingency::branch("L23"), l23_with_load()], &[], &[])
        .unwrap();

    for factor in 0..factors.len() {
        let a = result.value(factor, Some("L23")).unwrap();
        let b = result.value(factor, Some("L23+LD3")).unwrap();
        assert!(a.is_nan() == b.is_nan(), "factor {factor}: {a} vs {b}");
        if !a.is_nan() {
            assert!((a - b).abs() < 1e-12, "factor {factor}: {a} vs {b}");
        }
    }
    assert!((result.value(0, Some("L23")).unwrap() + 0.5).abs() < 1e-9);
    // G3 is on the island
    assert!(result.value(1, Some("L23")).unwrap().is_nan());
    // the opened branch ends on the island too
    assert!(result.value(2, Some("L23")).unwrap().is_nan());
}

#[test]
fn specific_context_only_reaches_its_contingency() {
    let grid = bridge_grid();
    let factors = [p1("L12B", "LD2").with_context(ContingencyContext::Specific("L12A".into()))];
    let contingencies = [Contingency::branch("L12A"), Contingency::branch("L12B")];
    let result = SensitivityAnalysis::new(SensitivityParameters::new(dc_params()))
        .run(&grid, &factors, &contingencies, &[], &[])
        .unwrap();
    assert!((result.value(0, Some("L12A")).unwrap() + 1.0).abs() < 1e-9);
    assert!(result.value(0, Some("L12B")).is_none());
    assert!(result.value(0, None).is_none());
}

fn overload_strategies() -> [OperatorStrategy; 2] {
    let shed = |id: &str, threshold_mw: f64| {
        OperatorStrategy::new(
            id,
            "L12A",
            Condition::BranchFlowAbove {
                branch_id: "L12B".into(),
                threshold_mw,
            },
            vec![Action::OpenBranch("L23".into())],
        )
    };
    [shed("shed", 200.0), shed("never", 400.0)]
}

#[test]
fn overloaded_branch_triggers_the_strategy() {
    let grid = bridge_grid();
    let result = ContingencyAnalysis::new(dc_params())
        .run(&grid, &[Contingency::branch("L12A")], &overload_strategies())
        .unwrap();

    // L12B alone carries the 250 MW of LD2 and the 50 MW exported to VL3
    let outage = result.contingency("L12A").unwrap();
    assert!((outage.branch("L12B").unwrap().p1 - 300.0).abs() < 1e-9);

    let shed = result.operator_strategy("shed").unwrap();
    assert_eq!(shed.status, StateStatus::Success);
    assert!((shed.branch("L12B").unwrap().p1 - 250.0).abs() < 1e-9);
    assert!(shed.bus("VL3_0").unwrap().angle.is_nan());

    let never = result.operator_strategy("never").unwrap();
    assert_eq!(never.status, StateStatus::NoImpact);
    assert!(never.branches.is_empty());
}

#[test]
fn strategy_state_has_its_own_sensitivities() {
    let grid = bridge_grid();
    let factors = [p1("L12B", "G3")];
    let result = SensitivityAnalysis::new(SensitivityParameters::new(dc_params()))
        .run(&grid, &factors, &[Contingency::branch("L12A")], &[], &overload_strategies())
        .unwrap();

    // G3 exports through L23 then L12B back towards the slack
    assert!((result.value(0, Some("L12A")).unwrap() + 1.0).abs() < 1e-9);
    let shed = result.operator_strategy_value(0, "shed").unwrap();
    assert!(shed.value.is_nan());
    assert!(result.operator_strategy_value(0, "never").is_none());
}
