//! Distribution of an active power mismatch over participating injections.

use super::{GeneratorKind, LfNetwork, LoadKind};
use crate::config::BalanceType;

const MAX_ITERATIONS: usize = 10;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    Generator(usize),
    Load(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistributionOutcome {
    pub distributed: f64,
    pub remaining: f64,
    pub iterations: usize,
}

impl LfNetwork {
    fn participants(&self, balance: BalanceType, mismatch: f64) -> Vec<(Participant, f64)> {
        if balance.is_load_based() {
            return self
                .loads
                .iter()
                .filter(|l| {
                    l.kind == LoadKind::Load && !l.disabled && !self.buses[l.bus].disabled
                })
                .map(|l| (Participant::Load(l.num), l.target_p.abs()))
                .filter(|(_, key)| *key > 0.0)
                .collect();
        }
        self.generators
            .iter()
            .filter(|g| {
                g.kind == GeneratorKind::Generator
                    && g.participating
                    && !g.disabled
                    && !self.buses[g.bus].disabled
            })
            .map(|g| {
                let key = match balance {
                    BalanceType::ProportionalToGenerationPMax => g.max_p,
                    BalanceType::ProportionalToGenerationP => g.target_p,
                    BalanceType::ProportionalToGenerationParticipationFactor => g.participation_factor,
                    BalanceType::ProportionalToGenerationRemainingMargin => {
                        if mismatch >= 0.0 {
                            g.max_p - g.target_p
                        } else {
                            g.target_p - g.min_p
                        }
                    }
                    BalanceType::ProportionalToLoad => 0.0,
                };
                (Participant::Generator(g.num), key.max(0.0))
            })
            .filter(|(_, key)| *key > 0.0)
            .collect()
    }

    /// Normalized participation of each bus, summing to 1.
    ///
    /// Empty when nothing participates.
    pub fn participation_weights(&self, balance: BalanceType) -> Vec<(usize, f64)> {
        let participants = self.participants(balance, 1.0);
        let total: f64 = participants.iter().map(|(_, k)| k).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        let mut by_bus: Vec<(usize, f64)> = Vec::new();
        for (p, key) in participants {
            let bus = match p {
                Participant::Generator(g) => self.generators[g].bus,
                Participant::Load(l) => self.loads[l].bus,
            };
            match by_bus.iter_mut().find(|(b, _)| *b == bus) {
                Some((_, w)) => *w += key / total,
                None => by_bus.push((bus, key / total)),
            }
        }
        by_bus
    }

    /// Spread `mismatch` (per-unit, extra power the slack would have to
    /// produce) over participating injections, respecting generator limits.
    pub fn distribute_active_power(&mut self, balance: BalanceType, mismatch: f64) -> DistributionOutcome {
        let mut remaining = mismatch;
        let mut distributed = 0.0;
        let mut iterations = 0;
        let mut saturated: Vec<Participant> = Vec::new();

        while remaining.abs() > EPS && iterations < MAX_ITERATIONS {
            let participants: Vec<(Participant, f64)> = self
                .participants(balance, remaining)
                .into_iter()
                .filter(|(p, _)| !saturated.contains(p))
                .collect();
            let total: f64 = participants.iter().map(|(_, k)| k).sum();
            if participants.is_empty() || total <= 0.0 {
                break;
            }
            iterations += 1;
            let to_share = remaining;
            for (p, key) in participants {
                let share = to_share * key / total;
                match p {
                    Participant::Generator(g) => {
                        let gen = &mut self.generators[g];
                        let wanted = gen.target_p + share;
                        let applied = wanted.clamp(gen.min_p, gen.max_p);
                        if applied != wanted {
                            saturated.push(p);
                        }
                        let delta = applied - gen.target_p;
                        gen.target_p = applied;
                        distributed += delta;
                        remaining -= delta;
                    }
                    Participant::Load(l) => {
                        self.loads[l].target_p -= share;
                        distributed += share;
                        remaining -= share;
                    }
                }
            }
        }

        if remaining.abs() > EPS {
            tracing::warn!(
                component = self.num_sc,
                remaining = remaining * self.base_power,
                "active power mismatch could not be fully distributed"
            );
        }
        DistributionOutcome {
            distributed,
            remaining,
            iterations,
        }
    }
}
