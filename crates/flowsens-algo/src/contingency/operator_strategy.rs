//! Remedial actions applied after a contingency.

use super::propagated::PropagatedContingency;
use super::Contingency;
use crate::equations::TermContext;
use crate::network::{BranchType, LfNetwork};
use crate::power_flow::result::branch_flow;
use flowsens_core::{GridError, GridResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// When a strategy is applied, judged on the post-contingency state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    /// Absolute active power at side 1 above `threshold_mw`.
    BranchFlowAbove { branch_id: String, threshold_mw: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Action {
    OpenBranch(String),
    /// Only branches present in the base network can be closed.
    CloseBranch(String),
    OpenSwitch(String),
    CloseSwitch(String),
}

impl Action {
    pub fn id(&self) -> &str {
        match self {
            Action::OpenBranch(id)
            | Action::CloseBranch(id)
            | Action::OpenSwitch(id)
            | Action::CloseSwitch(id) => id,
        }
    }

    fn opens(&self) -> bool {
        matches!(self, Action::OpenBranch(_) | Action::OpenSwitch(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorStrategy {
    pub id: String,
    pub contingency_id: String,
    #[serde(default)]
    pub condition: Condition,
    pub actions: Vec<Action>,
}

impl OperatorStrategy {
    pub fn new(
        id: impl Into<String>,
        contingency_id: impl Into<String>,
        condition: Condition,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            id: id.into(),
            contingency_id: contingency_id.into(),
            condition,
            actions,
        }
    }

    /// Check contingency and element references against the request.
    pub fn validate(&self, contingencies: &[Contingency], networks: &[LfNetwork]) -> GridResult<()> {
        if !contingencies.iter().any(|c| c.id == self.contingency_id) {
            return Err(GridError::InvalidParameter(format!(
                "operator strategy '{}' refers to unknown contingency '{}'",
                self.id, self.contingency_id
            )));
        }
        for action in &self.actions {
            let found = networks.iter().any(|net| match action {
                Action::OpenBranch(id) | Action::CloseBranch(id) => !net.branches_of_source(id).is_empty(),
                Action::OpenSwitch(id) | Action::CloseSwitch(id) => net
                    .branch_by_id(id)
                    .is_some_and(|b| net.branches[b].branch_type == BranchType::Switch),
            });
            if !found {
                return Err(GridError::BranchNotFound(action.id().to_string()));
            }
        }
        if let Condition::BranchFlowAbove { branch_id, .. } = &self.condition {
            if !networks.iter().any(|net| !net.branches_of_source(branch_id).is_empty()) {
                return Err(GridError::BranchNotFound(branch_id.clone()));
            }
        }
        Ok(())
    }

    /// Whether the strategy triggers on the current (post-contingency) state
    /// of `net`. A monitored branch outside the network or without a flow does
    /// not trigger.
    pub fn is_triggered(&self, net: &LfNetwork, dc: bool, ctx: TermContext, dc_power_factor: f64) -> bool {
        match &self.condition {
            Condition::Always => true,
            Condition::BranchFlowAbove { branch_id, threshold_mw } => net
                .branch_terminal(branch_id, flowsens_core::Side::One)
                .map(|(br, _)| branch_flow(net, br, dc, ctx, dc_power_factor).p1.abs())
                .is_some_and(|p| !p.is_nan() && p > *threshold_mw),
        }
    }

    /// Elements removed once the contingency and the actions are combined:
    /// opened branches are added, closed ones taken back.
    pub fn apply(&self, net: &LfNetwork, contingency: &PropagatedContingency) -> PropagatedContingency {
        let mut opened = BTreeSet::new();
        let mut closed = BTreeSet::new();
        for action in &self.actions {
            let branches: Vec<usize> = match action {
                Action::OpenBranch(id) | Action::CloseBranch(id) => net.branches_of_source(id).to_vec(),
                Action::OpenSwitch(id) | Action::CloseSwitch(id) => net
                    .branch_by_id(id)
                    .filter(|&b| net.branches[b].branch_type == BranchType::Switch)
                    .into_iter()
                    .collect(),
            };
            if action.opens() {
                opened.extend(branches.into_iter().filter(|&b| !net.branches[b].disabled));
            } else {
                closed.extend(branches);
            }
        }
        let mut effective = contingency.clone();
        effective.branches.extend(opened);
        effective.branches.retain(|b| !closed.contains(b));
        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadFlowParameters;
    use crate::network::build_networks;
    use crate::test_utils::bridge_grid;

    #[test]
    fn closing_the_outaged_branch_cancels_it() {
        let grid = bridge_grid();
        let net = build_networks(&grid, &LoadFlowParameters::default(), &[])
            .unwrap()
            .remove(0);
        let contingency = Contingency::branch("L12A");
        let pc = PropagatedContingency::propagate(&net, 0, &contingency);
        let strategy = OperatorStrategy::new(
            "reclose",
            "L12A",
            Condition::Always,
            vec![Action::CloseBranch("L12A".into()), Action::OpenBranch("L12B".into())],
        );
        let effective = strategy.apply(&net, &pc);
        assert_eq!(effective.branches.len(), 1);
        assert_eq!(effective.branches, net.branches_of_source("L12B").iter().copied().collect());
    }

    #[test]
    fn validation_names_the_missing_element() {
        let grid = bridge_grid();
        let networks = build_networks(&grid, &LoadFlowParameters::default(), &[]).unwrap();
        let contingencies = [Contingency::branch("L23")];
        let unknown_contingency =
            OperatorStrategy::new("s", "L99", Condition::Always, vec![Action::OpenBranch("L23".into())]);
        assert!(matches!(
            unknown_contingency.validate(&contingencies, &networks),
            Err(GridError::InvalidParameter(_))
        ));
        let unknown_branch =
            OperatorStrategy::new("s", "L23", Condition::Always, vec![Action::OpenBranch("L99".into())]);
        assert_eq!(
            unknown_branch.validate(&contingencies, &networks).unwrap_err().to_string(),
            "Branch 'L99' not found"
        );
    }

    #[test]
    fn condition_reads_tagged_json() {
        let json = r#"{"type":"branch_flow_above","branch_id":"L23","threshold_mw":50.0}"#;
        let condition: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(
            condition,
            Condition::BranchFlowAbove {
                branch_id: "L23".into(),
                threshold_mw: 50.0
            }
        );
    }
}
