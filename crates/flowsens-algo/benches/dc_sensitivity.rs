//! DC sensitivity benchmarks.
//!
//! Every line of a ladder grid is both a monitored function and an N-1
//! contingency, with one injection variable per load, so the work grows as
//! (lines x loads x contingencies).
//!
//! ```bash
//! cargo bench -p flowsens-algo --bench dc_sensitivity
//! cargo bench -p flowsens-algo --bench dc_sensitivity -- load_flow
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flowsens_algo::config::{LoadFlowParameters, SensitivityParameters};
use flowsens_algo::power_flow::LoadFlow;
use flowsens_algo::sensitivity::{
    SensitivityAnalysis, SensitivityFactor, SensitivityFunctionType, SensitivityVariableType,
};
use flowsens_algo::test_utils::ladder_grid;
use flowsens_algo::Contingency;

const RUNGS: &[usize] = &[5, 20, 50];

fn dc_params() -> LoadFlowParameters {
    LoadFlowParameters::default()
        .with_dc(true)
        .with_distributed_slack(false)
        .with_slack_bus_ids(&["VLA0"])
}

fn bench_load_flow(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_flow");
    for &rungs in RUNGS {
        let grid = ladder_grid(rungs);
        for (label, params) in [("dc", dc_params()), ("ac", dc_params().with_dc(false))] {
            let load_flow = LoadFlow::new(params);
            group.bench_with_input(BenchmarkId::new(label, rungs), &grid, |b, grid| {
                b.iter(|| {
                    let mut networks = load_flow.build(grid).unwrap();
                    black_box(load_flow.run_on(&mut networks).unwrap())
                })
            });
        }
    }
    group.finish();
}

fn bench_n_minus_one(c: &mut Criterion) {
    let mut group = c.benchmark_group("n_minus_one");
    group.sample_size(10);
    for &rungs in RUNGS {
        let grid = ladder_grid(rungs);
        let factors: Vec<_> = grid
            .lines
            .iter()
            .flat_map(|line| {
                grid.loads.iter().map(|load| {
                    SensitivityFactor::new(
                        SensitivityFunctionType::BranchActivePower1,
                        line.id.as_str(),
                        SensitivityVariableType::InjectionActivePower,
                        load.id.as_str(),
                    )
                })
            })
            .collect();
        let contingencies: Vec<_> = grid.lines.iter().map(|l| Contingency::branch(&l.id)).collect();
        let analysis = SensitivityAnalysis::new(SensitivityParameters::new(dc_params()));
        group.bench_with_input(BenchmarkId::from_parameter(rungs), &grid, |b, grid| {
            b.iter(|| black_box(analysis.run(grid, &factors, &contingencies, &[], &[]).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_load_flow, bench_n_minus_one);
criterion_main!(benches);
