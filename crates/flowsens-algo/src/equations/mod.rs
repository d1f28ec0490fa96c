//! Unknowns, equations and the Jacobian of a calculation network.
//!
//! Each unknown ([`Variable`]) is attached to one network element and gets a
//! column; each [`Equation`] gets a row keyed by its [`EquationType`] and
//! element. Equations are sums of closed-form [`Term`]s with analytic
//! derivatives, so the Jacobian is assembled exactly rather than by finite
//! differences. The same machinery serves the Newton-Raphson solve, the DC
//! solve and the sensitivity engine, which reuses term gradients and the rows
//! a term appears in.

pub mod equation;
pub mod system;
pub mod terms;
pub mod variable;

pub use equation::{Equation, EquationType, TargetRef};
pub use system::{bus_power, EquationSystem};
pub use terms::{Term, TermContext};
pub use variable::{Variable, VariableSet, VariableType};
