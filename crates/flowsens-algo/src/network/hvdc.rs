//! HVDC links between two AC buses.
//!
//! Converters are plain injections: a VSC station is a generator, an LCC
//! station a load whose reactive consumption follows its power factor. In
//! setpoint mode the rectifier withdraws the setpoint and the inverter injects
//! what is left after converter and cable losses. With AC emulation the
//! transfer follows the angle difference between both ends instead.

use flowsens_core::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterRef {
    Generator(usize),
    Load(usize),
}

/// Angle droop, per-unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LfAcEmulation {
    /// Per-unit power per radian.
    pub k: f64,
    pub p0: f64,
    pub p_max: f64,
}

#[derive(Debug, Clone)]
pub struct LfHvdc {
    pub num: usize,
    pub id: String,
    /// `None` when the converter sits outside this synchronous component.
    pub bus1: Option<usize>,
    pub bus2: Option<usize>,
    pub converter1: Option<ConverterRef>,
    pub converter2: Option<ConverterRef>,
    /// Active power setpoint at the rectifier, per-unit.
    pub setpoint: f64,
    pub max_p: f64,
    /// Cable resistance, ohm.
    pub r: f64,
    /// DC nominal voltage, kV.
    pub nominal_v: f64,
    pub loss_factor1: f64,
    pub loss_factor2: f64,
    pub rectifier_side: Side,
    pub ac_emulation: Option<LfAcEmulation>,
    pub disabled: bool,
}

impl LfHvdc {
    /// AC emulation needs both ends in the same network.
    pub fn emulation_active(&self) -> bool {
        self.ac_emulation.is_some() && self.bus1.is_some() && self.bus2.is_some() && !self.disabled
    }

    fn loss_factors(&self) -> (f64, f64) {
        match self.rectifier_side {
            Side::Two => (self.loss_factor2, self.loss_factor1),
            _ => (self.loss_factor1, self.loss_factor2),
        }
    }

    /// Inverter AC power for a rectifier AC power, per-unit.
    ///
    /// `p_dc = p_rect (1 - lf_rect)`, cable loss `r (p_dc / U)^2`, then the
    /// inverter loss factor.
    pub fn inverter_power(&self, p_rect: f64, base_power: f64) -> f64 {
        let (lf_rect, lf_inv) = self.loss_factors();
        let p_dc = p_rect * (1.0 - lf_rect);
        let cable_loss = if self.nominal_v > 0.0 {
            self.r * (p_dc * base_power / self.nominal_v).powi(2) / base_power
        } else {
            0.0
        };
        (p_dc - cable_loss) * (1.0 - lf_inv)
    }

    pub fn inverter_power_derivative(&self, p_rect: f64, base_power: f64) -> f64 {
        let (lf_rect, lf_inv) = self.loss_factors();
        let p_dc = p_rect * (1.0 - lf_rect);
        let dloss = if self.nominal_v > 0.0 {
            2.0 * self.r * p_dc * base_power / (self.nominal_v * self.nominal_v)
        } else {
            0.0
        };
        (1.0 - lf_rect) * (1.0 - dloss) * (1.0 - lf_inv)
    }

    /// Active injections at side 1 and side 2 in setpoint mode, per-unit.
    pub fn setpoint_injections(&self, base_power: f64) -> (f64, f64) {
        let rect = -self.setpoint;
        let inv = self.inverter_power(self.setpoint, base_power);
        match self.rectifier_side {
            Side::Two => (inv, rect),
            _ => (rect, inv),
        }
    }

    /// Derivatives of [`setpoint_injections`](Self::setpoint_injections) with
    /// respect to the setpoint.
    pub fn setpoint_injection_derivatives(&self, base_power: f64) -> (f64, f64) {
        let inv = self.inverter_power_derivative(self.setpoint, base_power);
        match self.rectifier_side {
            Side::Two => (inv, -1.0),
            _ => (-1.0, inv),
        }
    }

    /// Efficiency of the whole link, applied to the receiving side under AC
    /// emulation.
    pub fn efficiency(&self) -> f64 {
        (1.0 - self.loss_factor1) * (1.0 - self.loss_factor2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(r: f64, lf: f64) -> LfHvdc {
        LfHvdc {
            num: 0,
            id: "HVDC".into(),
            bus1: Some(0),
            bus2: Some(1),
            converter1: None,
            converter2: None,
            setpoint: 2.0,
            max_p: 5.0,
            r,
            nominal_v: 400.0,
            loss_factor1: lf,
            loss_factor2: lf,
            rectifier_side: Side::One,
            ac_emulation: None,
            disabled: false,
        }
    }

    #[test]
    fn lossless_link_transfers_setpoint() {
        let h = link(0.0, 0.0);
        let (p1, p2) = h.setpoint_injections(100.0);
        assert_eq!(p1, -2.0);
        assert_eq!(p2, 2.0);
    }

    #[test]
    fn losses_reduce_inverter_power() {
        let h = link(1.0, 0.01);
        // p_dc = 1.98 pu = 198 MW, I = 0.495 kA, loss = 0.245 MW
        let p_inv = h.inverter_power(2.0, 100.0);
        let expected = (1.98 - 0.245025 / 100.0) * 0.99;
        assert!((p_inv - expected).abs() < 1e-9);
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let h = link(5.0, 0.02);
        let eps = 1e-6;
        let fd = (h.inverter_power(2.0 + eps, 100.0) - h.inverter_power(2.0 - eps, 100.0)) / (2.0 * eps);
        assert!((fd - h.inverter_power_derivative(2.0, 100.0)).abs() < 1e-6);
    }

    #[test]
    fn rectifier_on_side_two_swaps_injections() {
        let mut h = link(0.0, 0.0);
        h.rectifier_side = Side::Two;
        assert_eq!(h.setpoint_injections(100.0), (2.0, -2.0));
    }
}
