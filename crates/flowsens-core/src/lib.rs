//! # flowsens-core: Grid Model and Topology Core
//!
//! Source-side data structures for the flowsens power flow and sensitivity
//! engine.
//!
//! ## Design Philosophy
//!
//! The detailed grid is a node-breaker model: every voltage level owns a set of
//! numbered nodes, switches join nodes, and every element terminal sits on a
//! node. The calculation engine never works on that graph directly. It first
//! reduces it to calculation buses ([`topology::BusTopology`]), then builds a
//! per-unit network in `flowsens-algo`.
//!
//! - **[`grid`]**: the detailed model ([`Grid`]) and the [`StateSink`]
//!   write-back interface for solved values
//! - **[`topology`]**: node merging across closed switches, retained switches
//! - **[`solver`]**: the injected linear-solve capability
//! - **[`error`]**: the request-level error taxonomy
//!
//! ## Quick Start
//!
//! ```rust
//! use flowsens_core::*;
//!
//! let mut grid = Grid::new("demo");
//! grid.voltage_levels.push(VoltageLevel {
//!     id: "VL1".into(),
//!     nominal_v: Kilovolts(400.0),
//!     node_count: 3,
//!     ..VoltageLevel::default()
//! });
//! grid.switches.push(Switch {
//!     id: "BRK".into(),
//!     voltage_level: "VL1".into(),
//!     node1: 0,
//!     node2: 1,
//!     ..Switch::default()
//! });
//! grid.loads.push(Load {
//!     id: "LD".into(),
//!     terminal: Terminal::new("VL1", 1),
//!     p0: Megawatts(50.0),
//!     ..Load::default()
//! });
//! grid.generators.push(Generator {
//!     id: "G".into(),
//!     terminal: Terminal::new("VL1", 0),
//!     target_p: Megawatts(50.0),
//!     ..Generator::default()
//! });
//!
//! let topology = BusTopology::reduce(&grid, &mut Diagnostics::new()).unwrap();
//! // the closed breaker merges nodes 0 and 1
//! assert_eq!(topology.buses.len(), 1);
//! ```

pub mod diagnostics;
pub mod error;
pub mod grid;
pub mod solver;
pub mod topology;
pub mod units;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{GridError, GridResult};
pub use grid::{
    AcEmulation, BusState, BusbarSection, ConvertersMode, CurvePoint, DanglingLine, ElementKind,
    Generator, Grid, GridState, HvdcLine, LccConverterStation, Line, Load, PhaseRegulationMode,
    PhaseTapChanger, RatioTapChanger, ReactiveLimits, RegulatedTerminal, ShuntCompensator, Side,
    StateSink, Switch, SwitchKind, TapStep, Terminal, TerminalFlow, ThreeWindingsTransformer,
    TransformerLeg, TwoWindingsTransformer, VoltageLevel, VscConverterStation,
};
pub use solver::*;
pub use topology::{BusTopology, CalculatedBus, RetainedSwitch};
pub use units::{Degrees, Kilovolts, Megavars, Megawatts, Radians};
