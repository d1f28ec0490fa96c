//! Sensitivities of branch flows and bus voltages.
//!
//! ## Key Concepts
//!
//! - **Factor:** a monitored function (flow or current at one side of a
//!   branch, bus voltage) against a variable (injection, phase shifter angle,
//!   voltage target, HVDC setpoint), computed in the states selected by its
//!   [`ContingencyContext`].
//! - **Linearization:** at a solved state `J dx = db` relates a change `db` of
//!   the right-hand side (or of a term parameter) to the change of the state.
//!   The sensitivity is `∇f · dx`, rescaled to engineering units.
//! - **States:** the base case, every contingency and every triggered operator
//!   strategy, as produced by the
//!   [`ContingencyEngine`](crate::contingency::ContingencyEngine). Post-outage
//!   Jacobians come from the compensated base factorization or from the
//!   reduced system of a connectivity group.
//! - **Variable set:** a weighted combination of variables of one type
//!   (a generation shift key). Weights are normalised over the members that
//!   are present in each state.
//!
//! ```no_run
//! use flowsens_algo::config::SensitivityParameters;
//! use flowsens_algo::contingency::Contingency;
//! use flowsens_algo::sensitivity::{
//!     SensitivityAnalysis, SensitivityFactor, SensitivityFunctionType, SensitivityVariableType,
//! };
//!
//! let grid = flowsens_algo::test_utils::bridge_grid();
//! let factors = [SensitivityFactor::new(
//!     SensitivityFunctionType::BranchActivePower1,
//!     "L12A",
//!     SensitivityVariableType::InjectionActivePower,
//!     "G3",
//! )];
//! let result = SensitivityAnalysis::new(SensitivityParameters::default())
//!     .run(&grid, &factors, &[Contingency::branch("L12B")], &[], &[])
//!     .unwrap();
//! println!("{:?}", result.value(0, Some("L12B")));
//! ```

pub mod engine;
pub mod factor;
pub mod function;
pub mod result;
pub mod variable;

pub use engine::SensitivityAnalysis;
pub use factor::{validate_factors, NetworkFactors};
pub use result::{SensitivityAnalysisResult, SensitivityStateStatus, SensitivityValue};

use crate::contingency::ContingencyContext;
use flowsens_core::Side;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensitivityFunctionType {
    /// MW
    #[serde(rename = "BRANCH_ACTIVE_POWER_1")]
    BranchActivePower1,
    #[serde(rename = "BRANCH_ACTIVE_POWER_2")]
    BranchActivePower2,
    #[serde(rename = "BRANCH_ACTIVE_POWER_3")]
    BranchActivePower3,
    /// Mvar, AC only.
    #[serde(rename = "BRANCH_REACTIVE_POWER_1")]
    BranchReactivePower1,
    #[serde(rename = "BRANCH_REACTIVE_POWER_2")]
    BranchReactivePower2,
    #[serde(rename = "BRANCH_REACTIVE_POWER_3")]
    BranchReactivePower3,
    /// A
    #[serde(rename = "BRANCH_CURRENT_1")]
    BranchCurrent1,
    #[serde(rename = "BRANCH_CURRENT_2")]
    BranchCurrent2,
    #[serde(rename = "BRANCH_CURRENT_3")]
    BranchCurrent3,
    /// kV, AC only.
    BusVoltage,
}

/// Monitored quantity of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    ActivePower,
    ReactivePower,
    Current,
    Voltage,
}

impl SensitivityFunctionType {
    /// Side of the monitored branch, `None` for bus functions.
    pub fn side(&self) -> Option<Side> {
        use SensitivityFunctionType::*;
        match self {
            BranchActivePower1 | BranchReactivePower1 | BranchCurrent1 => Some(Side::One),
            BranchActivePower2 | BranchReactivePower2 | BranchCurrent2 => Some(Side::Two),
            BranchActivePower3 | BranchReactivePower3 | BranchCurrent3 => Some(Side::Three),
            BusVoltage => None,
        }
    }

    pub fn quantity(&self) -> Quantity {
        use SensitivityFunctionType::*;
        match self {
            BranchActivePower1 | BranchActivePower2 | BranchActivePower3 => Quantity::ActivePower,
            BranchReactivePower1 | BranchReactivePower2 | BranchReactivePower3 => Quantity::ReactivePower,
            BranchCurrent1 | BranchCurrent2 | BranchCurrent3 => Quantity::Current,
            BusVoltage => Quantity::Voltage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensitivityVariableType {
    /// Generator, load or converter station, MW injected.
    InjectionActivePower,
    /// Mvar injected, AC only.
    InjectionReactivePower,
    /// Two-winding transformer angle, degrees.
    TransformerPhase,
    /// Angle of one leg of a three-winding transformer, degrees.
    #[serde(rename = "TRANSFORMER_PHASE_1")]
    TransformerPhase1,
    #[serde(rename = "TRANSFORMER_PHASE_2")]
    TransformerPhase2,
    #[serde(rename = "TRANSFORMER_PHASE_3")]
    TransformerPhase3,
    /// Voltage target of the controls of a bus, kV. AC only.
    BusTargetVoltage,
    /// Setpoint of an HVDC line, or its emulation offset, MW.
    HvdcLineActivePower,
}

impl SensitivityVariableType {
    pub fn is_phase(&self) -> bool {
        use SensitivityVariableType::*;
        matches!(self, TransformerPhase | TransformerPhase1 | TransformerPhase2 | TransformerPhase3)
    }

    /// Leg of a three-winding transformer for the leg variants.
    pub fn leg(&self) -> Option<Side> {
        match self {
            SensitivityVariableType::TransformerPhase1 => Some(Side::One),
            SensitivityVariableType::TransformerPhase2 => Some(Side::Two),
            SensitivityVariableType::TransformerPhase3 => Some(Side::Three),
            _ => None,
        }
    }

    /// Meaningful in a DC calculation.
    pub fn is_dc_compatible(&self) -> bool {
        !matches!(
            self,
            SensitivityVariableType::InjectionReactivePower | SensitivityVariableType::BusTargetVoltage
        )
    }
}

/// Function of one element against one variable, in the states selected by
/// `contingency_context`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityFactor {
    pub function_type: SensitivityFunctionType,
    pub function_id: String,
    pub variable_type: SensitivityVariableType,
    /// Element id, or variable set id when `variable_set` is set.
    pub variable_id: String,
    #[serde(default)]
    pub variable_set: bool,
    #[serde(default)]
    pub contingency_context: ContingencyContext,
}

impl SensitivityFactor {
    pub fn new(
        function_type: SensitivityFunctionType,
        function_id: impl Into<String>,
        variable_type: SensitivityVariableType,
        variable_id: impl Into<String>,
    ) -> Self {
        Self {
            function_type,
            function_id: function_id.into(),
            variable_type,
            variable_id: variable_id.into(),
            variable_set: false,
            contingency_context: ContingencyContext::All,
        }
    }

    pub fn with_context(mut self, context: ContingencyContext) -> Self {
        self.contingency_context = context;
        self
    }

    /// Read `variable_id` as the id of a [`SensitivityVariableSet`].
    pub fn on_variable_set(mut self) -> Self {
        self.variable_set = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedVariable {
    pub id: String,
    pub weight: f64,
}

/// Generation shift key: members share the variable type of the factors
/// using the set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityVariableSet {
    pub id: String,
    pub variables: Vec<WeightedVariable>,
}

impl SensitivityVariableSet {
    pub fn new<'a>(id: impl Into<String>, variables: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self {
            id: id.into(),
            variables: variables
                .into_iter()
                .map(|(id, weight)| WeightedVariable { id: id.into(), weight })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_reads_json_with_defaults() {
        let json = r#"{
            "function_type": "BRANCH_ACTIVE_POWER_2",
            "function_id": "L12",
            "variable_type": "INJECTION_ACTIVE_POWER",
            "variable_id": "G1"
        }"#;
        let factor: SensitivityFactor = serde_json::from_str(json).unwrap();
        assert_eq!(factor.function_type.side(), Some(Side::Two));
        assert!(!factor.variable_set);
        assert_eq!(factor.contingency_context, ContingencyContext::All);
    }

    #[test]
    fn phase_variables_name_their_leg() {
        assert!(SensitivityVariableType::TransformerPhase.is_phase());
        assert_eq!(SensitivityVariableType::TransformerPhase.leg(), None);
        assert_eq!(SensitivityVariableType::TransformerPhase3.leg(), Some(Side::Three));
        assert!(!SensitivityVariableType::BusTargetVoltage.is_dc_compatible());
    }
}
