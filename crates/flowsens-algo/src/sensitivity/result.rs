use crate::contingency::StateStatus;
use crate::power_flow::SolverStatus;
use serde::{Deserialize, Serialize};

/// One sensitivity in one state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityValue {
    pub factor_index: usize,
    /// `None` for the base case.
    pub contingency_index: Option<usize>,
    pub operator_strategy_index: Option<usize>,
    /// Function change per unit of the variable. NaN when the function or the
    /// variable is cut off from the slack side.
    pub value: f64,
    /// Function value at the state.
    pub function_reference: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitivityStateStatus {
    pub contingency_index: Option<usize>,
    pub operator_strategy_index: Option<usize>,
    pub status: StateStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityAnalysisResult {
    /// Base case status of the main network.
    pub load_flow_status: SolverStatus,
    /// Sorted by factor, then contingency (base case first), then strategy.
    pub values: Vec<SensitivityValue>,
    /// Every post-contingency and operator strategy state, in request order.
    pub statuses: Vec<SensitivityStateStatus>,
    pub contingency_ids: Vec<String>,
    pub operator_strategy_ids: Vec<String>,
}

impl SensitivityAnalysisResult {
    fn contingency_index(&self, contingency_id: Option<&str>) -> Option<Option<usize>> {
        match contingency_id {
            None => Some(None),
            Some(id) => self.contingency_ids.iter().position(|c| c == id).map(Some),
        }
    }

    fn find(&self, factor: usize, contingency: Option<usize>, strategy: Option<usize>) -> Option<&SensitivityValue> {
        let key = (factor, contingency, strategy);
        self.values
            .binary_search_by(|v| (v.factor_index, v.contingency_index, v.operator_strategy_index).cmp(&key))
            .ok()
            .map(|i| &self.values[i])
    }

    /// Sensitivity of `factor` in the base case (`None`) or after a contingency.
    pub fn value(&self, factor: usize, contingency_id: Option<&str>) -> Option<f64> {
        let contingency = self.contingency_index(contingency_id)?;
        self.find(factor, contingency, None).map(|v| v.value)
    }

    pub fn function_reference(&self, factor: usize, contingency_id: Option<&str>) -> Option<f64> {
        let contingency = self.contingency_index(contingency_id)?;
        self.find(factor, contingency, None).map(|v| v.function_reference)
    }

    /// Sensitivity of `factor` once operator strategy `strategy_id` is applied.
    pub fn operator_strategy_value(&self, factor: usize, strategy_id: &str) -> Option<&SensitivityValue> {
        let strategy = self.operator_strategy_ids.iter().position(|s| s == strategy_id)?;
        self.values
            .iter()
            .find(|v| v.factor_index == factor && v.operator_strategy_index == Some(strategy))
    }

    /// Status of a post-contingency state, or of an operator strategy state
    /// when `strategy_id` is given.
    pub fn status(&self, contingency_id: &str, strategy_id: Option<&str>) -> Option<StateStatus> {
        let contingency = self.contingency_ids.iter().position(|c| c == contingency_id)?;
        let strategy = match strategy_id {
            None => None,
            Some(id) => Some(self.operator_strategy_ids.iter().position(|s| s == id)?),
        };
        self.statuses
            .iter()
            .find(|s| s.contingency_index == Some(contingency) && s.operator_strategy_index == strategy)
            .map(|s| s.status)
    }

    /// All values of one state, in factor order.
    pub fn state_values(
        &self,
        contingency_index: Option<usize>,
        operator_strategy_index: Option<usize>,
    ) -> impl Iterator<Item = &SensitivityValue> + '_ {
        self.values.iter().filter(move |v| {
            v.contingency_index == contingency_index && v.operator_strategy_index == operator_strategy_index
        })
    }
}
