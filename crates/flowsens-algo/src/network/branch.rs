use super::pi_model::PiModel;
use super::PropertyBag;
use flowsens_core::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchType {
    Line,
    Transformer,
    /// One leg of a 3-winding transformer, side 1 at the leg terminal and side 2
    /// at the star bus.
    TransformerLeg(Side),
    DanglingLine,
    Switch,
}

/// Tap changer whose steps make up a tap-dependent pi-model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapChangerKind {
    Ratio,
    Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseControlMode {
    ActivePowerControl,
}

/// Phase shifter regulating the active power flow at side 1.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseControl {
    pub mode: PhaseControlMode,
    /// Target active power at side 1, per-unit.
    pub target_p: f64,
    /// Cleared once the shift has been rounded to a tap.
    pub enabled: bool,
}

/// Which sides of a branch currently reach an enabled bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchConnection {
    Both,
    Side1Only,
    Side2Only,
    None,
}

#[derive(Debug, Clone)]
pub struct LfBranch {
    pub num: usize,
    pub id: String,
    /// Id of the grid element, the transformer id for a leg.
    pub source_id: String,
    pub branch_type: BranchType,
    pub bus1: Option<usize>,
    pub bus2: Option<usize>,
    pub pi: PiModel,
    pub tap_changer: Option<TapChangerKind>,
    pub disabled: bool,
    /// Impedance below the low impedance threshold, solved through dummy flows.
    pub zero_impedance: bool,
    pub phase_control: Option<PhaseControl>,
    /// Transformer voltage control this branch acts on as a controller.
    pub voltage_control: Option<usize>,
    /// Flow carried by a zero-impedance tree edge, per-unit.
    pub dummy_p: f64,
    pub dummy_q: f64,
    pub properties: PropertyBag,
}

impl LfBranch {
    pub fn new(
        num: usize,
        id: impl Into<String>,
        source_id: impl Into<String>,
        branch_type: BranchType,
        bus1: Option<usize>,
        bus2: Option<usize>,
        pi: PiModel,
    ) -> Self {
        Self {
            num,
            id: id.into(),
            source_id: source_id.into(),
            branch_type,
            bus1,
            bus2,
            pi,
            tap_changer: None,
            disabled: false,
            zero_impedance: false,
            phase_control: None,
            voltage_control: None,
            dummy_p: 0.0,
            dummy_q: 0.0,
            properties: PropertyBag::new(),
        }
    }

    /// Side of the grid element that network side 1 of this branch stands for.
    pub fn source_side(&self) -> Side {
        match self.branch_type {
            BranchType::TransformerLeg(side) => side,
            _ => Side::One,
        }
    }

    pub fn other_bus(&self, bus: usize) -> Option<usize> {
        if self.bus1 == Some(bus) {
            self.bus2
        } else {
            self.bus1
        }
    }

    pub fn has_active_phase_control(&self) -> bool {
        self.phase_control.as_ref().is_some_and(|pc| pc.enabled)
    }
}
