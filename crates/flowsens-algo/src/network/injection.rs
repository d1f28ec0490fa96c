use super::PropertyBag;
use flowsens_core::ReactiveLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    Generator,
    /// VSC station seen from the AC side; `hvdc` is set when its line is known.
    VscConverter { hvdc: Option<usize> },
}

/// Generator or VSC converter. Powers are per-unit, positive when produced.
#[derive(Debug, Clone)]
pub struct LfGenerator {
    pub num: usize,
    pub id: String,
    pub bus: usize,
    pub kind: GeneratorKind,
    pub target_p: f64,
    pub initial_target_p: f64,
    pub min_p: f64,
    pub max_p: f64,
    pub target_q: f64,
    pub initial_target_q: f64,
    /// Voltage target, per-unit of the controlled bus nominal voltage.
    pub target_v: f64,
    /// Regulating voltage; cleared when the target is rejected.
    pub voltage_control: bool,
    pub controlled_bus: Option<usize>,
    /// Limits in Mvar, functions of the active power in MW.
    pub reactive_limits: ReactiveLimits,
    pub participating: bool,
    pub participation_factor: f64,
    pub disabled: bool,
    /// Reactive power produced at the last solve, per-unit.
    pub calculated_q: f64,
    pub properties: PropertyBag,
}

impl LfGenerator {
    pub fn min_q(&self, base_power: f64) -> f64 {
        self.reactive_limits.min_q(self.target_p * base_power) / base_power
    }

    pub fn max_q(&self, base_power: f64) -> f64 {
        self.reactive_limits.max_q(self.target_p * base_power) / base_power
    }

    /// Width of the reactive range, used as the reactive sharing key.
    pub fn q_range(&self, base_power: f64) -> f64 {
        self.max_q(base_power) - self.min_q(base_power)
    }

    pub fn is_converter(&self) -> bool {
        matches!(self.kind, GeneratorKind::VscConverter { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Load,
    /// `p0`/`q0` of a dangling line, on its boundary bus.
    DanglingLineBoundary,
    LccConverter { hvdc: Option<usize> },
}

/// Load-like injection. Powers are per-unit, positive when consumed.
#[derive(Debug, Clone)]
pub struct LfLoad {
    pub num: usize,
    pub id: String,
    pub bus: usize,
    pub kind: LoadKind,
    pub target_p: f64,
    pub initial_target_p: f64,
    pub target_q: f64,
    pub disabled: bool,
    pub properties: PropertyBag,
}

impl LfLoad {
    pub fn participates_in_balance(&self) -> bool {
        self.kind == LoadKind::Load && !self.disabled
    }
}

/// Shunt compensator, admittances per-unit at nominal voltage.
#[derive(Debug, Clone)]
pub struct LfShunt {
    pub num: usize,
    pub id: String,
    pub bus: usize,
    pub g: f64,
    pub b: f64,
    pub g_per_section: f64,
    pub b_per_section: f64,
    pub section_count: u32,
    pub max_section_count: u32,
    pub voltage_control: bool,
    pub target_v: f64,
    pub controlled_bus: Option<usize>,
    /// Shunt voltage control this shunt acts on as a controller.
    pub voltage_control_num: Option<usize>,
    pub disabled: bool,
}

impl LfShunt {
    /// Susceptance at maximum sections, used to weigh shared controls.
    pub fn b_max(&self) -> f64 {
        self.b_per_section * self.max_section_count as f64
    }

    /// Snap a continuous susceptance to the closest section count.
    ///
    /// Returns true when the section count changed.
    pub fn round_to_closest_section(&mut self) -> bool {
        let sections = if self.b_per_section.abs() > 0.0 {
            (self.b / self.b_per_section)
                .round()
                .clamp(0.0, self.max_section_count as f64) as u32
        } else {
            self.section_count
        };
        let changed = sections != self.section_count;
        self.section_count = sections;
        self.b = self.b_per_section * sections as f64;
        self.g = self.g_per_section * sections as f64;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shunt(b_per_section: f64, sections: u32) -> LfShunt {
        LfShunt {
            num: 0,
            id: "SH".into(),
            bus: 0,
            g: 0.0,
            b: b_per_section * sections as f64,
            g_per_section: 0.0,
            b_per_section,
            section_count: sections,
            max_section_count: 4,
            voltage_control: true,
            target_v: 1.0,
            controlled_bus: Some(0),
            voltage_control_num: None,
            disabled: false,
        }
    }

    #[test]
    fn shunt_rounding_clamps_to_available_sections() {
        let mut sh = shunt(0.1, 1);
        sh.b = 0.27;
        assert!(sh.round_to_closest_section());
        assert_eq!(sh.section_count, 3);
        assert!((sh.b - 0.3).abs() < 1e-12);

        sh.b = 0.9;
        sh.round_to_closest_section();
        assert_eq!(sh.section_count, 4);
        assert!(!sh.round_to_closest_section());
    }

    #[test]
    fn reactive_limits_are_per_unit() {
        let g = LfGenerator {
            num: 0,
            id: "G".into(),
            bus: 0,
            kind: GeneratorKind::Generator,
            target_p: 1.0,
            initial_target_p: 1.0,
            min_p: 0.0,
            max_p: 2.0,
            target_q: 0.0,
            initial_target_q: 0.0,
            target_v: 1.0,
            voltage_control: true,
            controlled_bus: Some(0),
            reactive_limits: ReactiveLimits::MinMax {
                min_q: -50.0,
                max_q: 80.0,
            },
            participating: true,
            participation_factor: 0.0,
            disabled: false,
            calculated_q: 0.0,
            properties: PropertyBag::new(),
        };
        assert!((g.min_q(100.0) + 0.5).abs() < 1e-12);
        assert!((g.max_q(100.0) - 0.8).abs() < 1e-12);
        assert!((g.q_range(100.0) - 1.3).abs() < 1e-12);
    }
}
