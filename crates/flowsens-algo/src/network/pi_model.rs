//! Per-unit π-model of a branch.
//!
//! Series impedance `r + jx`, shunt admittances `g1 + jb1` and `g2 + jb2`, and
//! an ideal transformer on side 1 with ratio `r1` and phase shift `a1` (rad).
//! Transformers with a tap changer carry one precomputed model per tap step.

use flowsens_core::{GridError, GridResult};
use std::ops::RangeInclusive;

#[derive(Debug, Clone, PartialEq)]
pub struct SimplePiModel {
    pub r: f64,
    pub x: f64,
    pub g1: f64,
    pub b1: f64,
    pub g2: f64,
    pub b2: f64,
    pub r1: f64,
    pub a1: f64,
    y: f64,
    ksi: f64,
}

impl SimplePiModel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(r: f64, x: f64, g1: f64, b1: f64, g2: f64, b2: f64, r1: f64, a1: f64) -> Self {
        let z = r.hypot(x);
        Self {
            r,
            x,
            g1,
            b1,
            g2,
            b2,
            r1,
            a1,
            y: if z > 0.0 { 1.0 / z } else { f64::INFINITY },
            ksi: r.atan2(x),
        }
    }

    pub fn z(&self) -> f64 {
        self.r.hypot(self.x)
    }
}

/// Tap-dependent models, one per step, starting at `low_tap`.
#[derive(Debug, Clone, PartialEq)]
pub struct PiModelArray {
    steps: Vec<SimplePiModel>,
    low_tap: i32,
    tap_position: i32,
    /// Continuous ratio set by a voltage control, overrides the step value.
    r1_override: Option<f64>,
    /// Continuous shift set by a phase control, overrides the step value.
    a1_override: Option<f64>,
}

impl PiModelArray {
    pub fn new(steps: Vec<SimplePiModel>, low_tap: i32, tap_position: i32) -> GridResult<Self> {
        if steps.is_empty() {
            return Err(GridError::InvalidParameter(
                "tap-dependent model needs at least one step".to_string(),
            ));
        }
        let mut array = Self {
            steps,
            low_tap,
            tap_position: low_tap,
            r1_override: None,
            a1_override: None,
        };
        array.set_tap_position(tap_position)?;
        Ok(array)
    }

    fn range(&self) -> RangeInclusive<i32> {
        self.low_tap..=self.low_tap + self.steps.len() as i32 - 1
    }

    fn current(&self) -> &SimplePiModel {
        &self.steps[(self.tap_position - self.low_tap) as usize]
    }

    fn set_tap_position(&mut self, position: i32) -> GridResult<()> {
        let range = self.range();
        if !range.contains(&position) {
            return Err(GridError::InvalidParameter(format!(
                "tap position {} outside [{}, {}]",
                position,
                range.start(),
                range.end()
            )));
        }
        self.tap_position = position;
        self.r1_override = None;
        self.a1_override = None;
        Ok(())
    }

    fn closest_tap(&self, value: f64, pick: impl Fn(&SimplePiModel) -> f64) -> i32 {
        let mut best = self.low_tap;
        let mut best_distance = f64::INFINITY;
        for (i, step) in self.steps.iter().enumerate() {
            let distance = (pick(step) - value).abs();
            if distance < best_distance {
                best_distance = distance;
                best = self.low_tap + i as i32;
            }
        }
        best
    }
}

/// Tap state of a model, captured by network snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiModelState {
    pub tap_position: Option<i32>,
    pub r1: f64,
    pub a1: f64,
    r1_override: Option<f64>,
    a1_override: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PiModel {
    Simple(SimplePiModel),
    Array(PiModelArray),
}

impl PiModel {
    fn current(&self) -> &SimplePiModel {
        match self {
            PiModel::Simple(m) => m,
            PiModel::Array(a) => a.current(),
        }
    }

    pub fn r(&self) -> f64 {
        self.current().r
    }

    pub fn x(&self) -> f64 {
        self.current().x
    }

    pub fn g1(&self) -> f64 {
        self.current().g1
    }

    pub fn b1(&self) -> f64 {
        self.current().b1
    }

    pub fn g2(&self) -> f64 {
        self.current().g2
    }

    pub fn b2(&self) -> f64 {
        self.current().b2
    }

    /// Series admittance magnitude `1 / |z|`.
    pub fn y(&self) -> f64 {
        self.current().y
    }

    /// `atan2(r, x)`
    pub fn ksi(&self) -> f64 {
        self.current().ksi
    }

    pub fn z(&self) -> f64 {
        self.current().z()
    }

    pub fn r1(&self) -> f64 {
        match self {
            PiModel::Simple(m) => m.r1,
            PiModel::Array(a) => a.r1_override.unwrap_or(a.current().r1),
        }
    }

    pub fn a1(&self) -> f64 {
        match self {
            PiModel::Simple(m) => m.a1,
            PiModel::Array(a) => a.a1_override.unwrap_or(a.current().a1),
        }
    }

    /// Continuous ratio written by the Newton-Raphson state update.
    pub fn set_r1(&mut self, r1: f64) {
        match self {
            PiModel::Simple(m) => m.r1 = r1,
            PiModel::Array(a) => a.r1_override = Some(r1),
        }
    }

    /// Continuous phase shift written by the Newton-Raphson state update.
    pub fn set_a1(&mut self, a1: f64) {
        match self {
            PiModel::Simple(m) => m.a1 = a1,
            PiModel::Array(a) => a.a1_override = Some(a1),
        }
    }

    pub fn is_tap_dependent(&self) -> bool {
        matches!(self, PiModel::Array(_))
    }

    pub fn tap_position(&self) -> GridResult<i32> {
        match self {
            PiModel::Simple(_) => Err(fixed_model_error()),
            PiModel::Array(a) => Ok(a.tap_position),
        }
    }

    pub fn tap_position_range(&self) -> GridResult<RangeInclusive<i32>> {
        match self {
            PiModel::Simple(_) => Err(fixed_model_error()),
            PiModel::Array(a) => Ok(a.range()),
        }
    }

    /// Move to another step, dropping any continuous override.
    pub fn set_tap_position(&mut self, position: i32) -> GridResult<()> {
        match self {
            PiModel::Simple(_) => Err(fixed_model_error()),
            PiModel::Array(a) => a.set_tap_position(position),
        }
    }

    /// Snap a continuous ratio to the step with the closest `r1`.
    ///
    /// Returns true when the tap position changed.
    pub fn round_r1_to_closest_tap(&mut self) -> GridResult<bool> {
        match self {
            PiModel::Simple(_) => Err(fixed_model_error()),
            PiModel::Array(a) => {
                let Some(r1) = a.r1_override else {
                    return Ok(false);
                };
                let tap = a.closest_tap(r1, |s| s.r1);
                let changed = tap != a.tap_position;
                a.set_tap_position(tap)?;
                Ok(changed)
            }
        }
    }

    /// Snap a continuous phase shift to the step with the closest `a1`.
    pub fn round_a1_to_closest_tap(&mut self) -> GridResult<bool> {
        match self {
            PiModel::Simple(_) => Err(fixed_model_error()),
            PiModel::Array(a) => {
                let Some(a1) = a.a1_override else {
                    return Ok(false);
                };
                let tap = a.closest_tap(a1, |s| s.a1);
                let changed = tap != a.tap_position;
                a.set_tap_position(tap)?;
                Ok(changed)
            }
        }
    }

    pub fn state(&self) -> PiModelState {
        match self {
            PiModel::Simple(m) => PiModelState {
                tap_position: None,
                r1: m.r1,
                a1: m.a1,
                r1_override: None,
                a1_override: None,
            },
            PiModel::Array(a) => PiModelState {
                tap_position: Some(a.tap_position),
                r1: self.r1(),
                a1: self.a1(),
                r1_override: a.r1_override,
                a1_override: a.a1_override,
            },
        }
    }

    pub fn restore(&mut self, state: &PiModelState) {
        match self {
            PiModel::Simple(m) => {
                m.r1 = state.r1;
                m.a1 = state.a1;
            }
            PiModel::Array(a) => {
                if let Some(tap) = state.tap_position {
                    a.tap_position = tap;
                }
                a.r1_override = state.r1_override;
                a.a1_override = state.a1_override;
            }
        }
    }
}

fn fixed_model_error() -> GridError {
    GridError::Unsupported("tap operation on a branch without tap changer".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(r1: f64, a1: f64, x: f64) -> SimplePiModel {
        SimplePiModel::new(0.0, x, 0.0, 0.0, 0.0, 0.0, r1, a1)
    }

    fn array() -> PiModel {
        PiModel::Array(
            PiModelArray::new(
                vec![step(0.9, -0.1, 0.1), step(1.0, 0.0, 0.1), step(1.1, 0.1, 0.12)],
                -1,
                0,
            )
            .unwrap(),
        )
    }

    #[test]
    fn derived_admittance_follows_tap() {
        let mut pi = array();
        assert!((pi.y() - 10.0).abs() < 1e-12);
        pi.set_tap_position(1).unwrap();
        assert!((pi.y() - 1.0 / 0.12).abs() < 1e-12);
        assert!((pi.r1() - 1.1).abs() < 1e-15);
    }

    #[test]
    fn tap_range_is_checked() {
        let mut pi = array();
        assert_eq!(pi.tap_position_range().unwrap(), -1..=1);
        let err = pi.set_tap_position(2).unwrap_err();
        assert!(matches!(err, GridError::InvalidParameter(_)));
        assert_eq!(pi.tap_position().unwrap(), 0);
    }

    #[test]
    fn fixed_model_rejects_tap_operations() {
        let mut pi = PiModel::Simple(step(1.0, 0.0, 0.1));
        assert!(matches!(pi.tap_position(), Err(GridError::Unsupported(_))));
        assert!(matches!(pi.set_tap_position(0), Err(GridError::Unsupported(_))));
        assert!(matches!(
            pi.round_r1_to_closest_tap(),
            Err(GridError::Unsupported(_))
        ));
    }

    #[test]
    fn continuous_ratio_rounds_to_closest_step() {
        let mut pi = array();
        pi.set_r1(1.07);
        assert!((pi.r1() - 1.07).abs() < 1e-15);
        assert!(pi.round_r1_to_closest_tap().unwrap());
        assert_eq!(pi.tap_position().unwrap(), 1);
        assert!((pi.r1() - 1.1).abs() < 1e-15);
        // nothing left to round
        assert!(!pi.round_r1_to_closest_tap().unwrap());
    }

    #[test]
    fn continuous_shift_rounds_to_closest_step() {
        let mut pi = array();
        pi.set_a1(-0.06);
        assert!(pi.round_a1_to_closest_tap().unwrap());
        assert_eq!(pi.tap_position().unwrap(), -1);
    }

    #[test]
    fn state_restores_tap_and_override() {
        let mut pi = array();
        pi.set_r1(0.97);
        let saved = pi.state();
        pi.set_tap_position(1).unwrap();
        pi.restore(&saved);
        assert_eq!(pi.tap_position().unwrap(), 0);
        assert!((pi.r1() - 0.97).abs() < 1e-15);
    }

    #[test]
    fn zero_impedance_has_infinite_admittance() {
        let pi = PiModel::Simple(SimplePiModel::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0));
        assert!(pi.y().is_infinite());
        assert_eq!(pi.z(), 0.0);
    }
}
