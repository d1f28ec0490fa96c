use super::PropertyBag;

/// Reactive limit a controller bus was clamped to after a PV to PQ switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QLimit {
    Min,
    Max,
}

/// Calculation bus of an [`LfNetwork`](super::LfNetwork).
///
/// Voltage magnitude `v` is per-unit of the (resolved) nominal voltage, `angle`
/// in radians. Element lists hold indices into the network vectors.
#[derive(Debug, Clone)]
pub struct LfBus {
    pub num: usize,
    pub id: String,
    pub voltage_level: String,
    /// Nominal voltage in kV, after nominal voltage resolution.
    pub nominal_v: f64,
    /// Star bus of a 3-winding transformer or boundary bus of a dangling line.
    pub fictitious: bool,
    pub source_ids: Vec<String>,
    pub v: f64,
    pub angle: f64,
    pub disabled: bool,
    pub slack: bool,
    pub reference: bool,
    pub branches: Vec<usize>,
    pub generators: Vec<usize>,
    pub loads: Vec<usize>,
    pub shunts: Vec<usize>,
    pub hvdcs: Vec<usize>,
    /// Generator voltage control regulating this bus.
    pub generator_voltage_control: Option<usize>,
    pub transformer_voltage_control: Option<usize>,
    pub shunt_voltage_control: Option<usize>,
    /// Generator voltage control this bus takes part in as a controller.
    pub controller_of: Option<usize>,
    /// Controller currently regulating (PV); false once switched to PQ.
    pub voltage_control_enabled: bool,
    pub q_limit: Option<QLimit>,
    pub pv_pq_switches: u32,
    pub properties: PropertyBag,
}

impl LfBus {
    pub fn new(num: usize, id: impl Into<String>, voltage_level: impl Into<String>, nominal_v: f64) -> Self {
        Self {
            num,
            id: id.into(),
            voltage_level: voltage_level.into(),
            nominal_v,
            fictitious: false,
            source_ids: Vec::new(),
            v: 1.0,
            angle: 0.0,
            disabled: false,
            slack: false,
            reference: false,
            branches: Vec::new(),
            generators: Vec::new(),
            loads: Vec::new(),
            shunts: Vec::new(),
            hvdcs: Vec::new(),
            generator_voltage_control: None,
            transformer_voltage_control: None,
            shunt_voltage_control: None,
            controller_of: None,
            voltage_control_enabled: false,
            q_limit: None,
            pv_pq_switches: 0,
            properties: PropertyBag::new(),
        }
    }

    pub fn v_kv(&self) -> f64 {
        self.v * self.nominal_v
    }

    pub fn angle_degrees(&self) -> f64 {
        self.angle.to_degrees()
    }

    pub fn is_generator_controller(&self) -> bool {
        self.controller_of.is_some()
    }
}
