/// Kinds ordered by priority: a generator control hides transformer and shunt
/// controls on the same bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VoltageControlKind {
    Generator,
    Transformer,
    Shunt,
}

/// Outcome of merging controls whose controlled buses are joined by
/// zero-impedance branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    Main,
    Dependent,
    Hidden,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageControlRole {
    None,
    Controller,
    Controlled,
    /// Controlled bus of a dependent control, follows the main one.
    Follower,
}

#[derive(Debug, Clone)]
pub struct VoltageControl {
    pub num: usize,
    pub kind: VoltageControlKind,
    pub controlled_bus: usize,
    /// Buses for generator controls, branches for transformer controls,
    /// shunts for shunt controls.
    pub controllers: Vec<usize>,
    /// Per-unit of the controlled bus nominal voltage.
    pub target_v: f64,
    pub merge_status: MergeStatus,
    pub main: Option<usize>,
    pub merged: Vec<usize>,
    /// Discrete controls stop regulating once their taps or sections are rounded.
    pub discretized: bool,
}

impl VoltageControl {
    pub fn new(num: usize, kind: VoltageControlKind, controlled_bus: usize, target_v: f64) -> Self {
        Self {
            num,
            kind,
            controlled_bus,
            controllers: Vec::new(),
            target_v,
            merge_status: MergeStatus::Main,
            main: None,
            merged: Vec::new(),
            discretized: false,
        }
    }

    pub fn is_main(&self) -> bool {
        self.merge_status == MergeStatus::Main
    }
}
