//! Unit newtypes for grid model quantities.
//!
//! The detailed grid model is expressed in engineering units (MW, Mvar, kV,
//! degrees). The calculation model works in per-unit and radians. Keeping the
//! grid-side values in newtypes makes the conversion points explicit.
//!
//! ```
//! use flowsens_core::units::{Degrees, Kilovolts, Megawatts};
//!
//! let p = Megawatts(100.0) + Megawatts(20.0);
//! assert_eq!(p.value(), 120.0);
//! assert!((Degrees(180.0).to_radians().value() - std::f64::consts::PI).abs() < 1e-12);
//! assert_eq!(Kilovolts(400.0).value(), 400.0);
//! ```

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{} {}", self.0, $unit_name)
            }
        }

        impl $type {
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            #[inline]
            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }
        }

        impl std::iter::Sum for $type {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|v| v.0).sum())
            }
        }
    };
}

/// Active power in megawatts.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Megawatts(pub f64);
impl_unit_ops!(Megawatts, "MW");

/// Reactive power in megavars.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Megavars(pub f64);
impl_unit_ops!(Megavars, "Mvar");

/// Voltage in kilovolts.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Kilovolts(pub f64);
impl_unit_ops!(Kilovolts, "kV");

/// Angle in degrees (grid side).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Degrees(pub f64);
impl_unit_ops!(Degrees, "°");

/// Angle in radians (calculation side).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Radians(pub f64);
impl_unit_ops!(Radians, "rad");

impl Megawatts {
    /// Per-unit value on the given base power (MVA).
    #[inline]
    pub fn to_per_unit(self, base_mva: f64) -> f64 {
        self.0 / base_mva
    }
}

impl Megavars {
    #[inline]
    pub fn to_per_unit(self, base_mva: f64) -> f64 {
        self.0 / base_mva
    }
}

impl Kilovolts {
    /// Per-unit value against a nominal voltage.
    #[inline]
    pub fn to_per_unit(self, nominal: Kilovolts) -> f64 {
        self.0 / nominal.0
    }
}

impl Degrees {
    #[inline]
    pub fn to_radians(self) -> Radians {
        Radians(self.0.to_radians())
    }
}

impl Radians {
    #[inline]
    pub fn to_degrees(self) -> Degrees {
        Degrees(self.0.to_degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_unit_conversions() {
        assert!((Megawatts(50.0).to_per_unit(100.0) - 0.5).abs() < 1e-12);
        assert!((Megavars(-25.0).to_per_unit(100.0) + 0.25).abs() < 1e-12);
        assert!((Kilovolts(231.0).to_per_unit(Kilovolts(220.0)) - 1.05).abs() < 1e-12);
    }

    #[test]
    fn angle_round_trip() {
        let deg = Degrees(30.0);
        assert!((deg.to_radians().to_degrees().value() - 30.0).abs() < 1e-12);
    }

    #[test]
    fn sum_of_units() {
        let total: Megawatts = vec![Megawatts(1.0), Megawatts(2.5)].into_iter().sum();
        assert_eq!(total, Megawatts(3.5));
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&Kilovolts(400.0)).unwrap();
        assert_eq!(json, "400.0");
    }
}
