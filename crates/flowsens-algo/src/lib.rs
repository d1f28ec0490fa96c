//! # flowsens-algo: Load Flow, Contingencies and Sensitivities
//!
//! Calculation side of the flowsens engine. A [`Grid`](flowsens_core::Grid) is
//! reduced to calculation buses by `flowsens-core`, then turned into one
//! per-unit [`LfNetwork`](network::LfNetwork) per synchronous component.
//! Everything below works on those networks.
//!
//! | Module | Role |
//! |--------|------|
//! | [`network`] | Per-unit buses, branches, injections, controls and slack selection |
//! | [`equations`] | Equation system, terms and the sparse Jacobian |
//! | [`power_flow`] | Newton-Raphson with outer loops, linear DC |
//! | [`contingency`] | Connectivity analysis, post-contingency states, operator strategies |
//! | [`sensitivity`] | Flow and voltage sensitivities in every state |
//!
//! ### Architecture
//!
//! - **[`equations::EquationSystem`]**: which equation owns which row, which
//!   variable owns which column. Terms read the network on each evaluation,
//!   so outer loops change targets without rebuilding the system.
//! - **[`contingency::ContingencyEngine`]**: the disable/solve/visit/restore
//!   cycle. Load flow and sensitivity analyses are two visitors of it.
//! - **Linear solver**: injected as [`flowsens_core::LinearSolver`], one
//!   factorization reused across right-hand sides.
//!
//! ## Example
//!
//! ```no_run
//! use flowsens_algo::config::LoadFlowParameters;
//! use flowsens_algo::power_flow::LoadFlow;
//!
//! let mut grid = flowsens_algo::test_utils::two_bus_grid();
//! let result = LoadFlow::new(LoadFlowParameters::default()).run(&mut grid).unwrap();
//! println!("{:?}", result.components[0].status);
//! ```

pub mod arena;
pub mod cancel;
pub mod config;
pub mod contingency;
pub mod equations;
pub mod graph;
pub mod network;
pub mod power_flow;
pub mod sensitivity;
pub mod test_utils;

pub use arena::ArenaContext;
pub use cancel::CancellationToken;
pub use config::{LoadFlowParameters, SensitivityParameters};
pub use contingency::{Contingency, ContingencyAnalysis, ContingencyContext, OperatorStrategy, StateStatus};
pub use power_flow::{LoadFlow, LoadFlowResult, SolverStatus};
pub use sensitivity::{
    SensitivityAnalysis, SensitivityAnalysisResult, SensitivityFactor, SensitivityFunctionType,
    SensitivityVariableSet, SensitivityVariableType,
};
