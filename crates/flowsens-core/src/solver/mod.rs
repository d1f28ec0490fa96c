//! Injected linear-solve capability.
//!
//! The calculation engine never factorizes matrices itself: it asks a
//! [`LinearSolver`] for a [`Factorization`] and reuses it across right-hand
//! sides. A singular matrix comes back as [`LinearSolveError`], which callers
//! turn into a solver status rather than a request error.

pub mod backend;
pub mod registry;

pub use backend::{FaerSolver, Factorization, GaussSolver, LinearSolveError, LinearSolver};
pub use registry::SolverKind;
