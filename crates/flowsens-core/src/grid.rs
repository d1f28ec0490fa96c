//! Detailed grid model.
//!
//! This is the source side of the engine: voltage levels with node-breaker
//! topology, switches, branches, injections and HVDC links, all addressed by
//! string ids. Electrical values are in engineering units (ohm, siemens, kV,
//! MW, Mvar, degrees). The calculation model is derived from it by
//! [`crate::topology::BusTopology::reduce`] and the network builder, and the
//! solved values come back through the [`StateSink`] trait.

use crate::error::{GridError, GridResult};
use crate::units::{Degrees, Kilovolts, Megavars, Megawatts};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

/// Branch or transformer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    One,
    Two,
    Three,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::One => "1",
            Side::Two => "2",
            Side::Three => "3",
        }
    }
}

/// Connection point of an element: a node of a voltage level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Terminal {
    pub voltage_level: String,
    pub node: usize,
    #[serde(default = "default_true")]
    pub connected: bool,
}

impl Terminal {
    pub fn new(voltage_level: impl Into<String>, node: usize) -> Self {
        Self {
            voltage_level: voltage_level.into(),
            node,
            connected: true,
        }
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new("", 0)
    }
}

/// Reference to the terminal whose voltage a control regulates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatedTerminal {
    pub element_id: String,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusbarSection {
    pub id: String,
    pub node: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageLevel {
    pub id: String,
    pub nominal_v: Kilovolts,
    /// Number of nodes; valid node indices are `0..node_count`.
    pub node_count: usize,
    #[serde(default)]
    pub busbar_sections: Vec<BusbarSection>,
    /// Element holding the slack terminal, written back after a solve.
    #[serde(default)]
    pub slack_terminal: Option<String>,
}

impl Default for VoltageLevel {
    fn default() -> Self {
        Self {
            id: String::new(),
            nominal_v: Kilovolts(1.0),
            node_count: 0,
            busbar_sections: Vec::new(),
            slack_terminal: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SwitchKind {
    #[default]
    Breaker,
    Disconnector,
    LoadBreakSwitch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Switch {
    pub id: String,
    pub voltage_level: String,
    pub node1: usize,
    pub node2: usize,
    #[serde(default)]
    pub kind: SwitchKind,
    #[serde(default)]
    pub open: bool,
    /// Retained switches survive topology reduction as explicit branches.
    #[serde(default)]
    pub retained: bool,
}

/// AC line. Impedances in ohm, admittances in siemens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Line {
    pub id: String,
    pub terminal1: Terminal,
    pub terminal2: Terminal,
    pub r: f64,
    pub x: f64,
    #[serde(default)]
    pub g1: f64,
    #[serde(default)]
    pub b1: f64,
    #[serde(default)]
    pub g2: f64,
    #[serde(default)]
    pub b2: f64,
}

/// One step of a tap changer. `r`, `x`, `g`, `b` are percent corrections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapStep {
    #[serde(default = "default_one")]
    pub rho: f64,
    #[serde(default)]
    pub alpha: Degrees,
    #[serde(default)]
    pub r: f64,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub g: f64,
    #[serde(default)]
    pub b: f64,
}

impl Default for TapStep {
    fn default() -> Self {
        Self {
            rho: 1.0,
            alpha: Degrees(0.0),
            r: 0.0,
            x: 0.0,
            g: 0.0,
            b: 0.0,
        }
    }
}

impl TapStep {
    pub fn with_rho(rho: f64) -> Self {
        Self {
            rho,
            ..Self::default()
        }
    }

    pub fn with_alpha(alpha: Degrees) -> Self {
        Self {
            alpha,
            ..Self::default()
        }
    }
}

fn check_tap_range(owner: &str, low_tap: i32, steps: usize, position: i32) -> GridResult<()> {
    let high_tap = low_tap + steps as i32 - 1;
    if steps == 0 {
        return Err(GridError::InvalidParameter(format!(
            "tap changer of '{owner}' has no step"
        )));
    }
    if position < low_tap || position > high_tap {
        return Err(GridError::InvalidParameter(format!(
            "tap position {position} of '{owner}' outside [{low_tap}, {high_tap}]"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RatioTapChanger {
    pub low_tap: i32,
    pub tap_position: i32,
    pub steps: Vec<TapStep>,
    #[serde(default)]
    pub regulating: bool,
    #[serde(default)]
    pub target_v: Option<Kilovolts>,
    /// Defaults to side 2 of the owning transformer.
    #[serde(default)]
    pub regulated: Option<RegulatedTerminal>,
}

impl RatioTapChanger {
    pub fn validate(&self, owner: &str) -> GridResult<()> {
        check_tap_range(owner, self.low_tap, self.steps.len(), self.tap_position)
    }

    pub fn current_step(&self) -> Option<&TapStep> {
        self.steps.get((self.tap_position - self.low_tap) as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PhaseRegulationMode {
    /// Tap stays where it is.
    #[default]
    FixedTap,
    /// Regulate active power flowing at side 1 to `regulation_value` MW.
    ActivePowerControl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PhaseTapChanger {
    pub low_tap: i32,
    pub tap_position: i32,
    pub steps: Vec<TapStep>,
    #[serde(default)]
    pub regulation_mode: PhaseRegulationMode,
    #[serde(default)]
    pub regulation_value: f64,
    #[serde(default)]
    pub regulating: bool,
}

impl PhaseTapChanger {
    pub fn validate(&self, owner: &str) -> GridResult<()> {
        check_tap_range(owner, self.low_tap, self.steps.len(), self.tap_position)
    }

    pub fn current_step(&self) -> Option<&TapStep> {
        self.steps.get((self.tap_position - self.low_tap) as usize)
    }
}

/// Two-winding transformer; impedances are expressed at side 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TwoWindingsTransformer {
    pub id: String,
    pub terminal1: Terminal,
    pub terminal2: Terminal,
    pub r: f64,
    pub x: f64,
    #[serde(default)]
    pub g: f64,
    #[serde(default)]
    pub b: f64,
    pub rated_u1: Kilovolts,
    pub rated_u2: Kilovolts,
    #[serde(default)]
    pub ratio_tap_changer: Option<RatioTapChanger>,
    #[serde(default)]
    pub phase_tap_changer: Option<PhaseTapChanger>,
}

/// One leg of a three-winding transformer; impedances at the star voltage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TransformerLeg {
    pub terminal: Terminal,
    pub r: f64,
    pub x: f64,
    #[serde(default)]
    pub g: f64,
    #[serde(default)]
    pub b: f64,
    pub rated_u: Kilovolts,
    #[serde(default)]
    pub ratio_tap_changer: Option<RatioTapChanger>,
    #[serde(default)]
    pub phase_tap_changer: Option<PhaseTapChanger>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ThreeWindingsTransformer {
    pub id: String,
    /// Rated voltage of the fictitious star point.
    pub rated_u0: Kilovolts,
    pub leg1: TransformerLeg,
    pub leg2: TransformerLeg,
    pub leg3: TransformerLeg,
}

impl ThreeWindingsTransformer {
    pub fn leg(&self, side: Side) -> &TransformerLeg {
        match side {
            Side::One => &self.leg1,
            Side::Two => &self.leg2,
            Side::Three => &self.leg3,
        }
    }

    pub fn leg_mut(&mut self, side: Side) -> &mut TransformerLeg {
        match side {
            Side::One => &mut self.leg1,
            Side::Two => &mut self.leg2,
            Side::Three => &mut self.leg3,
        }
    }
}

/// Line to the network boundary. The boundary injection `p0`/`q0` is consumed
/// at a fictitious boundary bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DanglingLine {
    pub id: String,
    pub terminal: Terminal,
    pub r: f64,
    pub x: f64,
    #[serde(default)]
    pub g: f64,
    #[serde(default)]
    pub b: f64,
    #[serde(default)]
    pub p0: Megawatts,
    #[serde(default)]
    pub q0: Megavars,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub p: f64,
    pub min_q: f64,
    pub max_q: f64,
}

/// Reactive power limits of a generator or converter, in Mvar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReactiveLimits {
    MinMax { min_q: f64, max_q: f64 },
    /// Capability curve, points sorted by increasing `p`.
    Curve { points: Vec<CurvePoint> },
}

impl Default for ReactiveLimits {
    fn default() -> Self {
        ReactiveLimits::MinMax {
            min_q: -f64::MAX,
            max_q: f64::MAX,
        }
    }
}

impl ReactiveLimits {
    fn interpolate(points: &[CurvePoint], p: f64, pick: impl Fn(&CurvePoint) -> f64) -> f64 {
        match points {
            [] => 0.0,
            [only] => pick(only),
            _ => {
                let first = &points[0];
                let last = &points[points.len() - 1];
                if p <= first.p {
                    return pick(first);
                }
                if p >= last.p {
                    return pick(last);
                }
                for pair in points.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    if p >= a.p && p <= b.p {
                        let span = b.p - a.p;
                        if span.abs() < f64::EPSILON {
                            return pick(a);
                        }
                        let t = (p - a.p) / span;
                        return pick(a) + t * (pick(b) - pick(a));
                    }
                }
                pick(last)
            }
        }
    }

    pub fn min_q(&self, p: f64) -> f64 {
        match self {
            ReactiveLimits::MinMax { min_q, .. } => *min_q,
            ReactiveLimits::Curve { points } => Self::interpolate(points, p, |c| c.min_q),
        }
    }

    pub fn max_q(&self, p: f64) -> f64 {
        match self {
            ReactiveLimits::MinMax { max_q, .. } => *max_q,
            ReactiveLimits::Curve { points } => Self::interpolate(points, p, |c| c.max_q),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub id: String,
    pub terminal: Terminal,
    #[serde(default)]
    pub min_p: Megawatts,
    pub max_p: Megawatts,
    pub target_p: Megawatts,
    #[serde(default)]
    pub target_q: Megavars,
    #[serde(default)]
    pub target_v: Kilovolts,
    #[serde(default)]
    pub voltage_regulator_on: bool,
    /// Remote regulated terminal; local regulation when absent.
    #[serde(default)]
    pub regulated: Option<RegulatedTerminal>,
    #[serde(default)]
    pub reactive_limits: ReactiveLimits,
    #[serde(default = "default_true")]
    pub participate: bool,
    #[serde(default)]
    pub participation_factor: f64,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            id: String::new(),
            terminal: Terminal::default(),
            min_p: Megawatts(0.0),
            max_p: Megawatts(9999.0),
            target_p: Megawatts(0.0),
            target_q: Megavars(0.0),
            target_v: Kilovolts(0.0),
            voltage_regulator_on: false,
            regulated: None,
            reactive_limits: ReactiveLimits::default(),
            participate: true,
            participation_factor: 0.0,
        }
    }
}

impl Generator {
    pub fn with_p_limits(mut self, min_p: f64, max_p: f64) -> Self {
        self.min_p = Megawatts(min_p);
        self.max_p = Megawatts(max_p);
        self
    }

    pub fn with_q_limits(mut self, min_q: f64, max_q: f64) -> Self {
        self.reactive_limits = ReactiveLimits::MinMax { min_q, max_q };
        self
    }

    pub fn with_voltage_regulation(mut self, target_v: f64) -> Self {
        self.voltage_regulator_on = true;
        self.target_v = Kilovolts(target_v);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Load {
    pub id: String,
    pub terminal: Terminal,
    pub p0: Megawatts,
    #[serde(default)]
    pub q0: Megavars,
}

/// Linear shunt compensator: susceptance and conductance per section, in siemens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ShuntCompensator {
    pub id: String,
    pub terminal: Terminal,
    pub b_per_section: f64,
    #[serde(default)]
    pub g_per_section: f64,
    pub section_count: u32,
    pub max_section_count: u32,
    #[serde(default)]
    pub voltage_regulator_on: bool,
    #[serde(default)]
    pub target_v: Option<Kilovolts>,
    #[serde(default)]
    pub regulated: Option<RegulatedTerminal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VscConverterStation {
    pub id: String,
    pub terminal: Terminal,
    /// Losses in percent of the transmitted power.
    #[serde(default)]
    pub loss_factor: f64,
    #[serde(default)]
    pub voltage_regulator_on: bool,
    #[serde(default)]
    pub voltage_setpoint: Kilovolts,
    #[serde(default)]
    pub reactive_power_setpoint: Megavars,
    #[serde(default)]
    pub reactive_limits: ReactiveLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LccConverterStation {
    pub id: String,
    pub terminal: Terminal,
    #[serde(default)]
    pub loss_factor: f64,
    pub power_factor: f64,
}

impl Default for LccConverterStation {
    fn default() -> Self {
        Self {
            id: String::new(),
            terminal: Terminal::default(),
            loss_factor: 0.0,
            power_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConvertersMode {
    #[default]
    Side1RectifierSide2Inverter,
    Side1InverterSide2Rectifier,
}

/// Angle droop: `P = p0 + droop * (ph1 - ph2)`, droop in MW per degree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcEmulation {
    pub droop: f64,
    pub p0: Megawatts,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HvdcLine {
    pub id: String,
    pub converter_station1: String,
    pub converter_station2: String,
    /// DC cable resistance in ohm.
    #[serde(default)]
    pub r: f64,
    pub nominal_v: Kilovolts,
    pub active_power_setpoint: Megawatts,
    pub max_p: Megawatts,
    #[serde(default)]
    pub converters_mode: ConvertersMode,
    #[serde(default)]
    pub ac_emulation: Option<AcEmulation>,
}

/// Kind of a grid element, as resolved by [`Grid::element_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Line,
    TwoWindingsTransformer,
    ThreeWindingsTransformer,
    DanglingLine,
    Switch,
    Generator,
    Load,
    Shunt,
    VscConverterStation,
    LccConverterStation,
    HvdcLine,
    BusbarSection,
}

impl ElementKind {
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            ElementKind::Line
                | ElementKind::TwoWindingsTransformer
                | ElementKind::DanglingLine
                | ElementKind::Switch
        )
    }

    pub fn is_injection(&self) -> bool {
        matches!(
            self,
            ElementKind::Generator
                | ElementKind::Load
                | ElementKind::Shunt
                | ElementKind::VscConverterStation
                | ElementKind::LccConverterStation
                | ElementKind::DanglingLine
        )
    }
}

/// Flow written back on a terminal after a solve: MW, Mvar, A.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerminalFlow {
    pub p: f64,
    pub q: f64,
    pub i: f64,
}

impl TerminalFlow {
    pub const NAN: TerminalFlow = TerminalFlow {
        p: f64::NAN,
        q: f64::NAN,
        i: f64::NAN,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusState {
    pub v: Kilovolts,
    pub angle: Degrees,
    pub source_ids: Vec<String>,
}

/// Results written back by [`StateSink`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct GridState {
    pub buses: BTreeMap<String, BusState>,
    pub flows: BTreeMap<String, TerminalFlow>,
}

impl GridState {
    fn flow_key(element_id: &str, side: Side) -> String {
        format!("{}:{}", element_id, side.as_str())
    }

    pub fn flow(&self, element_id: &str, side: Side) -> Option<&TerminalFlow> {
        self.flows.get(&Self::flow_key(element_id, side))
    }
}

/// Write-back interface for solved values.
pub trait StateSink {
    fn set_bus_state(&mut self, bus_id: &str, source_ids: &[String], v: Kilovolts, angle: Degrees);

    fn set_terminal_flow(&mut self, element_id: &str, side: Side, flow: TerminalFlow);

    fn set_ratio_tap_position(
        &mut self,
        transformer_id: &str,
        leg: Option<Side>,
        position: i32,
    ) -> GridResult<()>;

    fn set_phase_tap_position(
        &mut self,
        transformer_id: &str,
        leg: Option<Side>,
        position: i32,
    ) -> GridResult<()>;

    fn set_shunt_section_count(&mut self, shunt_id: &str, sections: u32) -> GridResult<()>;

    fn set_slack_terminal(&mut self, voltage_level: &str, element_id: &str);
}

/// The detailed grid model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Grid {
    pub id: String,
    #[serde(default)]
    pub voltage_levels: Vec<VoltageLevel>,
    #[serde(default)]
    pub switches: Vec<Switch>,
    #[serde(default)]
    pub lines: Vec<Line>,
    #[serde(default)]
    pub two_windings_transformers: Vec<TwoWindingsTransformer>,
    #[serde(default)]
    pub three_windings_transformers: Vec<ThreeWindingsTransformer>,
    #[serde(default)]
    pub dangling_lines: Vec<DanglingLine>,
    #[serde(default)]
    pub generators: Vec<Generator>,
    #[serde(default)]
    pub loads: Vec<Load>,
    #[serde(default)]
    pub shunts: Vec<ShuntCompensator>,
    #[serde(default)]
    pub vsc_converter_stations: Vec<VscConverterStation>,
    #[serde(default)]
    pub lcc_converter_stations: Vec<LccConverterStation>,
    #[serde(default)]
    pub hvdc_lines: Vec<HvdcLine>,
    #[serde(skip)]
    pub state: GridState,
}

impl Grid {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> GridResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn voltage_level(&self, id: &str) -> Option<&VoltageLevel> {
        self.voltage_levels.iter().find(|vl| vl.id == id)
    }

    /// Every terminal of the grid with its owning element id and side.
    pub fn terminals(&self) -> Vec<(&str, Side, &Terminal)> {
        let mut out = Vec::new();
        for l in &self.lines {
            out.push((l.id.as_str(), Side::One, &l.terminal1));
            out.push((l.id.as_str(), Side::Two, &l.terminal2));
        }
        for t in &self.two_windings_transformers {
            out.push((t.id.as_str(), Side::One, &t.terminal1));
            out.push((t.id.as_str(), Side::Two, &t.terminal2));
        }
        for t in &self.three_windings_transformers {
            out.push((t.id.as_str(), Side::One, &t.leg1.terminal));
            out.push((t.id.as_str(), Side::Two, &t.leg2.terminal));
            out.push((t.id.as_str(), Side::Three, &t.leg3.terminal));
        }
        for d in &self.dangling_lines {
            out.push((d.id.as_str(), Side::One, &d.terminal));
        }
        for g in &self.generators {
            out.push((g.id.as_str(), Side::One, &g.terminal));
        }
        for l in &self.loads {
            out.push((l.id.as_str(), Side::One, &l.terminal));
        }
        for s in &self.shunts {
            out.push((s.id.as_str(), Side::One, &s.terminal));
        }
        for c in &self.vsc_converter_stations {
            out.push((c.id.as_str(), Side::One, &c.terminal));
        }
        for c in &self.lcc_converter_stations {
            out.push((c.id.as_str(), Side::One, &c.terminal));
        }
        out
    }

    pub fn terminal_of(&self, element_id: &str, side: Side) -> Option<&Terminal> {
        self.terminals()
            .into_iter()
            .find(|(id, s, _)| *id == element_id && *s == side)
            .map(|(_, _, t)| t)
    }

    /// Index of element ids to their kind, built once per lookup-heavy caller.
    pub fn element_index(&self) -> HashMap<&str, ElementKind> {
        let mut index = HashMap::new();
        for vl in &self.voltage_levels {
            for bbs in &vl.busbar_sections {
                index.insert(bbs.id.as_str(), ElementKind::BusbarSection);
            }
        }
        for s in &self.switches {
            index.insert(s.id.as_str(), ElementKind::Switch);
        }
        for l in &self.lines {
            index.insert(l.id.as_str(), ElementKind::Line);
        }
        for t in &self.two_windings_transformers {
            index.insert(t.id.as_str(), ElementKind::TwoWindingsTransformer);
        }
        for t in &self.three_windings_transformers {
            index.insert(t.id.as_str(), ElementKind::ThreeWindingsTransformer);
        }
        for d in &self.dangling_lines {
            index.insert(d.id.as_str(), ElementKind::DanglingLine);
        }
        for g in &self.generators {
            index.insert(g.id.as_str(), ElementKind::Generator);
        }
        for l in &self.loads {
            index.insert(l.id.as_str(), ElementKind::Load);
        }
        for s in &self.shunts {
            index.insert(s.id.as_str(), ElementKind::Shunt);
        }
        for c in &self.vsc_converter_stations {
            index.insert(c.id.as_str(), ElementKind::VscConverterStation);
        }
        for c in &self.lcc_converter_stations {
            index.insert(c.id.as_str(), ElementKind::LccConverterStation);
        }
        for h in &self.hvdc_lines {
            index.insert(h.id.as_str(), ElementKind::HvdcLine);
        }
        index
    }

    pub fn element_kind(&self, id: &str) -> Option<ElementKind> {
        self.element_index().get(id).copied()
    }

    pub fn hvdc_line(&self, id: &str) -> Option<&HvdcLine> {
        self.hvdc_lines.iter().find(|h| h.id == id)
    }

    /// Attribute checks that do not depend on topology: tap positions,
    /// shunt sections, HVDC converter references.
    pub fn validate(&self) -> GridResult<()> {
        for t in &self.two_windings_transformers {
            if let Some(rtc) = &t.ratio_tap_changer {
                rtc.validate(&t.id)?;
            }
            if let Some(ptc) = &t.phase_tap_changer {
                ptc.validate(&t.id)?;
            }
        }
        for t in &self.three_windings_transformers {
            for leg in [&t.leg1, &t.leg2, &t.leg3] {
                if let Some(rtc) = &leg.ratio_tap_changer {
                    rtc.validate(&t.id)?;
                }
                if let Some(ptc) = &leg.phase_tap_changer {
                    ptc.validate(&t.id)?;
                }
            }
        }
        for s in &self.shunts {
            if s.section_count > s.max_section_count {
                return Err(GridError::InvalidParameter(format!(
                    "shunt '{}' section count {} above maximum {}",
                    s.id, s.section_count, s.max_section_count
                )));
            }
        }
        let index = self.element_index();
        for h in &self.hvdc_lines {
            for station in [&h.converter_station1, &h.converter_station2] {
                match index.get(station.as_str()) {
                    Some(ElementKind::VscConverterStation) | Some(ElementKind::LccConverterStation) => {}
                    _ => {
                        return Err(GridError::Structural(format!(
                            "HVDC line '{}' references unknown converter station '{}'",
                            h.id, station
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    fn two_or_three_winding_tap<'a>(
        &'a mut self,
        transformer_id: &str,
        leg: Option<Side>,
    ) -> GridResult<(Option<&'a mut RatioTapChanger>, Option<&'a mut PhaseTapChanger>)> {
        if let Some(pos) = self
            .two_windings_transformers
            .iter()
            .position(|t| t.id == transformer_id)
        {
            let t = &mut self.two_windings_transformers[pos];
            return Ok((t.ratio_tap_changer.as_mut(), t.phase_tap_changer.as_mut()));
        }
        if let Some(pos) = self
            .three_windings_transformers
            .iter()
            .position(|t| t.id == transformer_id)
        {
            let leg = self.three_windings_transformers[pos].leg_mut(leg.unwrap_or(Side::One));
            return Ok((leg.ratio_tap_changer.as_mut(), leg.phase_tap_changer.as_mut()));
        }
        Err(GridError::BranchNotFound(transformer_id.to_string()))
    }
}

impl StateSink for Grid {
    fn set_bus_state(&mut self, bus_id: &str, source_ids: &[String], v: Kilovolts, angle: Degrees) {
        self.state.buses.insert(
            bus_id.to_string(),
            BusState {
                v,
                angle,
                source_ids: source_ids.to_vec(),
            },
        );
    }

    fn set_terminal_flow(&mut self, element_id: &str, side: Side, flow: TerminalFlow) {
        self.state
            .flows
            .insert(GridState::flow_key(element_id, side), flow);
    }

    fn set_ratio_tap_position(
        &mut self,
        transformer_id: &str,
        leg: Option<Side>,
        position: i32,
    ) -> GridResult<()> {
        let (rtc, _) = self.two_or_three_winding_tap(transformer_id, leg)?;
        let rtc = rtc.ok_or_else(|| {
            GridError::Unsupported(format!("'{transformer_id}' has no ratio tap changer"))
        })?;
        check_tap_range(transformer_id, rtc.low_tap, rtc.steps.len(), position)?;
        rtc.tap_position = position;
        Ok(())
    }

    fn set_phase_tap_position(
        &mut self,
        transformer_id: &str,
        leg: Option<Side>,
        position: i32,
    ) -> GridResult<()> {
        let (_, ptc) = self.two_or_three_winding_tap(transformer_id, leg)?;
        let ptc = ptc.ok_or_else(|| {
            GridError::PhaseShifterNotFound(transformer_id.to_string())
        })?;
        check_tap_range(transformer_id, ptc.low_tap, ptc.steps.len(), position)?;
        ptc.tap_position = position;
        Ok(())
    }

    fn set_shunt_section_count(&mut self, shunt_id: &str, sections: u32) -> GridResult<()> {
        let shunt = self
            .shunts
            .iter_mut()
            .find(|s| s.id == shunt_id)
            .ok_or_else(|| GridError::InjectionNotFound(shunt_id.to_string()))?;
        if sections > shunt.max_section_count {
            return Err(GridError::InvalidParameter(format!(
                "shunt '{shunt_id}' section count {sections} above maximum {}",
                shunt.max_section_count
            )));
        }
        shunt.section_count = sections;
        Ok(())
    }

    fn set_slack_terminal(&mut self, voltage_level: &str, element_id: &str) {
        if let Some(vl) = self
            .voltage_levels
            .iter_mut()
            .find(|vl| vl.id == voltage_level)
        {
            vl.slack_terminal = Some(element_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bus_grid() -> Grid {
        let mut grid = Grid::new("g");
        for (id, kv) in [("VL1", 400.0), ("VL2", 400.0)] {
            grid.voltage_levels.push(VoltageLevel {
                id: id.into(),
                nominal_v: Kilovolts(kv),
                node_count: 2,
                ..VoltageLevel::default()
            });
        }
        grid.lines.push(Line {
            id: "L".into(),
            terminal1: Terminal::new("VL1", 0),
            terminal2: Terminal::new("VL2", 0),
            r: 0.0,
            x: 10.0,
            ..Line::default()
        });
        grid.generators.push(Generator {
            id: "G".into(),
            terminal: Terminal::new("VL1", 1),
            target_p: Megawatts(100.0),
            ..Generator::default()
        });
        grid
    }

    #[test]
    fn element_kinds_are_indexed() {
        let grid = two_bus_grid();
        assert_eq!(grid.element_kind("L"), Some(ElementKind::Line));
        assert_eq!(grid.element_kind("G"), Some(ElementKind::Generator));
        assert_eq!(grid.element_kind("nope"), None);
        assert!(ElementKind::Line.is_branch());
        assert!(ElementKind::Generator.is_injection());
    }

    #[test]
    fn terminal_lookup_by_side() {
        let grid = two_bus_grid();
        assert_eq!(grid.terminal_of("L", Side::Two).map(|t| t.node), Some(0));
        assert_eq!(
            grid.terminal_of("L", Side::Two).map(|t| t.voltage_level.as_str()),
            Some("VL2")
        );
        assert!(grid.terminal_of("L", Side::Three).is_none());
    }

    #[test]
    fn out_of_range_tap_position_is_rejected() {
        let mut grid = two_bus_grid();
        grid.two_windings_transformers.push(TwoWindingsTransformer {
            id: "T".into(),
            terminal1: Terminal::new("VL1", 0),
            terminal2: Terminal::new("VL2", 0),
            x: 1.0,
            rated_u1: Kilovolts(400.0),
            rated_u2: Kilovolts(400.0),
            ratio_tap_changer: Some(RatioTapChanger {
                low_tap: 0,
                tap_position: 3,
                steps: vec![TapStep::default(); 3],
                ..RatioTapChanger::default()
            }),
            ..TwoWindingsTransformer::default()
        });
        assert!(matches!(grid.validate(), Err(GridError::InvalidParameter(_))));

        grid.two_windings_transformers[0]
            .ratio_tap_changer
            .as_mut()
            .unwrap()
            .tap_position = 2;
        assert!(grid.validate().is_ok());
        assert!(grid.set_ratio_tap_position("T", None, 5).is_err());
        grid.set_ratio_tap_position("T", None, 0).unwrap();
        assert!(grid.set_phase_tap_position("T", None, 0).is_err());
    }

    #[test]
    fn capability_curve_interpolates() {
        let limits = ReactiveLimits::Curve {
            points: vec![
                CurvePoint { p: 0.0, min_q: -100.0, max_q: 100.0 },
                CurvePoint { p: 100.0, min_q: -50.0, max_q: 50.0 },
            ],
        };
        assert!((limits.max_q(50.0) - 75.0).abs() < 1e-12);
        assert!((limits.min_q(200.0) + 50.0).abs() < 1e-12);
        assert!((limits.min_q(-10.0) + 100.0).abs() < 1e-12);
    }

    #[test]
    fn state_sink_records_flows_and_slack() {
        let mut grid = two_bus_grid();
        grid.set_terminal_flow("L", Side::One, TerminalFlow { p: 1.0, q: 2.0, i: 3.0 });
        grid.set_slack_terminal("VL1", "G");
        assert_eq!(grid.state.flow("L", Side::One).map(|f| f.q), Some(2.0));
        assert_eq!(grid.voltage_levels[0].slack_terminal.as_deref(), Some("G"));
    }

    #[test]
    fn json_round_trip_keeps_elements() {
        let grid = two_bus_grid();
        let json = serde_json::to_string(&grid).unwrap();
        let back = Grid::from_json(&json).unwrap();
        assert_eq!(back.lines.len(), 1);
        assert_eq!(back.generators[0].target_p, Megawatts(100.0));
    }
}
