//! Contingencies, their propagation onto a network, and post-contingency
//! states.
//!
//! ## Key Concepts
//!
//! - **Contingency:** a named set of grid elements removed together.
//! - **Propagation:** resolving those elements onto the branches, buses and
//!   injections of one [`LfNetwork`](crate::network::LfNetwork). Elements
//!   outside the network are ignored; a contingency that touches nothing has
//!   no impact.
//! - **Connectivity analysis:** the buses cut off from the slack by a
//!   contingency. Contingencies losing the same buses share one reduced
//!   system.
//! - **Compensation:** removing branches inside the slack component is a
//!   low-rank change of the Jacobian. The base factorization is reused through
//!   the Woodbury identity instead of refactorizing per state.
//! - **Operator strategy:** remedial actions applied after a contingency when
//!   their condition holds, solved as one more state.

pub mod analysis;
pub mod compensation;
pub mod operator_strategy;
pub mod propagated;

pub use analysis::{
    ContingencyAnalysis, ContingencyAnalysisResult, ContingencyEngine, PostContingencyResult,
    StateChanges, StateView,
};
pub use compensation::Compensation;
pub use operator_strategy::{Action, Condition, OperatorStrategy};
pub use propagated::{
    analyse_connectivity, validate_contingencies, ConnectivityAnalyzer, ConnectivityGroup,
    PropagatedContingency,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ContingencyElement {
    /// Line, two- or three-winding transformer, or dangling line.
    Branch(String),
    /// Calculation bus or busbar section: every terminal on it is disconnected.
    Bus(String),
    Generator(String),
    Load(String),
    Shunt(String),
    HvdcLine(String),
    /// Retained switch, opened.
    Switch(String),
}

impl ContingencyElement {
    pub fn id(&self) -> &str {
        match self {
            ContingencyElement::Branch(id)
            | ContingencyElement::Bus(id)
            | ContingencyElement::Generator(id)
            | ContingencyElement::Load(id)
            | ContingencyElement::Shunt(id)
            | ContingencyElement::HvdcLine(id)
            | ContingencyElement::Switch(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contingency {
    pub id: String,
    pub elements: Vec<ContingencyElement>,
}

impl Contingency {
    pub fn new(id: impl Into<String>, elements: Vec<ContingencyElement>) -> Self {
        Self {
            id: id.into(),
            elements,
        }
    }

    pub fn branch(id: &str) -> Self {
        Self::new(id, vec![ContingencyElement::Branch(id.to_string())])
    }
}

/// States a sensitivity factor is computed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "contingency_id", rename_all = "snake_case")]
pub enum ContingencyContext {
    PreContingency,
    /// Pre-contingency and every post-contingency state.
    #[default]
    All,
    Specific(String),
}

impl ContingencyContext {
    /// Whether a state belongs to this context; `None` is the base case.
    pub fn includes(&self, contingency_id: Option<&str>) -> bool {
        match (self, contingency_id) {
            (ContingencyContext::All, _) => true,
            (ContingencyContext::PreContingency, None) => true,
            (ContingencyContext::Specific(id), Some(c)) => id == c,
            _ => false,
        }
    }
}

/// Outcome of one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateStatus {
    Success,
    /// Nothing in the network was touched; values equal the base case.
    NoImpact,
    Failed,
}
