//! Slack and reference bus selection.

use super::{BranchConnection, LfNetwork};
use crate::config::{LoadFlowParameters, SlackBusSelectionMode, SlackDistributionKey};

impl LfNetwork {
    /// Choose slack buses among the enabled buses; the first one is the angle
    /// reference. Clears previous slack flags.
    pub fn select_slack_buses(&mut self, params: &LoadFlowParameters) {
        for bus in &mut self.buses {
            bus.slack = false;
            bus.reference = false;
        }
        self.slack_buses.clear();
        self.slack_weights.clear();
        self.reference_bus = None;

        let candidates: Vec<usize> = self.enabled_buses().map(|b| b.num).collect();
        if candidates.is_empty() {
            return;
        }
        let count = params.max_slack_bus_count.max(1);
        let selected = match params.slack_bus_selection {
            SlackBusSelectionMode::MostMeshed => self.most_meshed(
                &candidates,
                params.most_meshed_max_nominal_voltage_percentile,
                count,
            ),
            SlackBusSelectionMode::Name => {
                let named = self.named(&candidates, &params.slack_bus_ids, count);
                if named.is_empty() {
                    self.diagnostics.add_warning_with_entity(
                        "slack",
                        "none of the requested slack buses is in this component, using most meshed",
                        &format!("component {}", self.num_sc),
                    );
                    self.most_meshed(
                        &candidates,
                        params.most_meshed_max_nominal_voltage_percentile,
                        count,
                    )
                } else {
                    named
                }
            }
            SlackBusSelectionMode::LargestGenerator => self.largest_generator(&candidates, count),
            SlackBusSelectionMode::First => candidates.iter().copied().take(count).collect(),
        };

        self.slack_weights = self.slack_weights_for(&selected, params.slack_distribution_key);
        for (i, &bus) in selected.iter().enumerate() {
            self.buses[bus].slack = true;
            self.buses[bus].reference = i == 0;
        }
        self.reference_bus = selected.first().copied();
        tracing::debug!(
            component = self.num_sc,
            slack = ?selected.iter().map(|&b| self.buses[b].id.as_str()).collect::<Vec<_>>(),
            "slack buses selected"
        );
        self.slack_buses = selected;
    }

    /// Number of enabled branches reaching another enabled bus.
    fn mesh_degree(&self, bus: usize) -> usize {
        self.buses[bus]
            .branches
            .iter()
            .filter(|&&br| self.branch_connection(br) == BranchConnection::Both)
            .count()
    }

    fn most_meshed(&self, candidates: &[usize], percentile: f64, count: usize) -> Vec<usize> {
        let mut nominals: Vec<f64> = candidates.iter().map(|&b| self.buses[b].nominal_v).collect();
        nominals.sort_by(f64::total_cmp);
        let rank = ((percentile / 100.0) * (nominals.len() - 1) as f64).round() as usize;
        let threshold = nominals[rank.min(nominals.len() - 1)];
        let mut eligible: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&b| self.buses[b].nominal_v >= threshold && !self.buses[b].fictitious)
            .collect();
        if eligible.is_empty() {
            eligible = candidates.to_vec();
        }
        eligible.sort_by(|&a, &b| {
            self.mesh_degree(b)
                .cmp(&self.mesh_degree(a))
                .then_with(|| self.buses[b].nominal_v.total_cmp(&self.buses[a].nominal_v))
                .then(a.cmp(&b))
        });
        eligible.truncate(count);
        eligible
    }

    fn named(&self, candidates: &[usize], ids: &[String], count: usize) -> Vec<usize> {
        let mut selected = Vec::new();
        for id in ids {
            let matches = candidates.iter().copied().filter(|&b| {
                let bus = &self.buses[b];
                bus.id == *id || bus.voltage_level == *id || bus.source_ids.iter().any(|s| s == id)
            });
            for bus in matches {
                if !selected.contains(&bus) && selected.len() < count {
                    selected.push(bus);
                }
            }
        }
        selected
    }

    fn largest_generator(&self, candidates: &[usize], count: usize) -> Vec<usize> {
        let capacity = |bus: usize| -> f64 {
            self.buses[bus]
                .generators
                .iter()
                .map(|&g| &self.generators[g])
                .filter(|g| !g.disabled)
                .map(|g| g.max_p)
                .sum()
        };
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|&a, &b| capacity(b).total_cmp(&capacity(a)).then(a.cmp(&b)));
        sorted.truncate(count);
        sorted
    }

    fn slack_weights_for(&mut self, selected: &[usize], key: SlackDistributionKey) -> Vec<f64> {
        let n = selected.len();
        let equal = vec![1.0 / n as f64; n];
        let raw: Vec<f64> = match key {
            SlackDistributionKey::Equal => return equal,
            SlackDistributionKey::MaxGeneration => selected
                .iter()
                .map(|&b| {
                    self.buses[b]
                        .generators
                        .iter()
                        .map(|&g| &self.generators[g])
                        .filter(|g| !g.disabled)
                        .map(|g| g.max_p.max(0.0))
                        .sum()
                })
                .collect(),
            SlackDistributionKey::Load => selected.iter().map(|&b| self.bus_load_p(b).max(0.0)).collect(),
        };
        let total: f64 = raw.iter().sum();
        if raw.iter().any(|w| *w <= 0.0) || total <= 0.0 {
            if n > 1 {
                self.diagnostics.add_warning_with_entity(
                    "slack",
                    "a slack bus has a zero distribution key, sharing equally",
                    &format!("component {}", self.num_sc),
                );
            }
            return equal;
        }
        raw.iter().map(|w| w / total).collect()
    }
}
