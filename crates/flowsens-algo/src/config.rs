//! Immutable parameter structs passed explicitly to the solvers.
//!
//! Every struct has a `Default`, `with_*` builders and a `validate()` that
//! raises [`GridError::InvalidParameter`] before any solve starts. Parameter
//! files are plain TOML:
//!
//! ```
//! use flowsens_algo::config::LoadFlowParameters;
//!
//! let params = LoadFlowParameters::from_toml_str(r#"
//!     dc = true
//!     distributed_slack = false
//!     [newton_raphson]
//!     tolerance = 1e-8
//! "#).unwrap();
//! assert!(params.dc);
//! assert_eq!(params.newton_raphson.max_iterations, 15);
//! ```

use flowsens_core::{GridError, GridResult, SolverKind};
use serde::{Deserialize, Serialize};

/// How the slack mismatch is spread over injections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceType {
    #[default]
    ProportionalToGenerationPMax,
    ProportionalToGenerationP,
    ProportionalToGenerationParticipationFactor,
    ProportionalToGenerationRemainingMargin,
    ProportionalToLoad,
}

impl BalanceType {
    pub fn is_load_based(&self) -> bool {
        matches!(self, BalanceType::ProportionalToLoad)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlackBusSelectionMode {
    #[default]
    MostMeshed,
    /// Buses (or voltage levels) listed in `slack_bus_ids`.
    Name,
    LargestGenerator,
    First,
}

/// Split of the slack mismatch between several slack buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlackDistributionKey {
    #[default]
    Equal,
    MaxGeneration,
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectedComponentMode {
    #[default]
    Main,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoltageInitMode {
    #[default]
    UniformValues,
    PreviousValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonRaphsonParameters {
    pub max_iterations: usize,
    /// Max absolute mismatch per equation, per-unit.
    pub tolerance: f64,
    pub max_outer_loop_iterations: usize,
}

impl Default for NewtonRaphsonParameters {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            tolerance: 1e-6,
            max_outer_loop_iterations: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadFlowParameters {
    /// System base power `Sb` in MVA.
    pub base_power: f64,
    pub dc: bool,
    pub distributed_slack: bool,
    pub balance_type: BalanceType,
    pub slack_bus_selection: SlackBusSelectionMode,
    pub slack_bus_ids: Vec<String>,
    /// Nominal voltage percentile restricting most-meshed candidates, in [0, 100].
    pub most_meshed_max_nominal_voltage_percentile: f64,
    pub max_slack_bus_count: usize,
    pub slack_distribution_key: SlackDistributionKey,
    /// Slack mismatch below which the distribution outer loop is stable, MW.
    pub slack_bus_p_max_mismatch: f64,
    pub newton_raphson: NewtonRaphsonParameters,
    pub use_reactive_limits: bool,
    pub transformer_voltage_control_on: bool,
    pub phase_shifter_regulation_on: bool,
    pub shunt_compensator_voltage_control_on: bool,
    pub dc_use_transformer_ratio: bool,
    /// Power factor used to derive DC currents.
    pub dc_power_factor: f64,
    /// Per-unit impedance below which a branch is zero-impedance.
    pub low_impedance_threshold: f64,
    /// Relative tolerance for snapping close nominal voltages together.
    pub nominal_voltage_resolution: Option<f64>,
    pub connected_component_mode: ConnectedComponentMode,
    pub voltage_init_mode: VoltageInitMode,
    /// Names of `Selection` post-processors to run.
    pub post_processors: Vec<String>,
    pub linear_solver: SolverKind,
}

impl Default for LoadFlowParameters {
    fn default() -> Self {
        Self {
            base_power: 100.0,
            dc: false,
            distributed_slack: true,
            balance_type: BalanceType::default(),
            slack_bus_selection: SlackBusSelectionMode::default(),
            slack_bus_ids: Vec::new(),
            most_meshed_max_nominal_voltage_percentile: 95.0,
            max_slack_bus_count: 1,
            slack_distribution_key: SlackDistributionKey::default(),
            slack_bus_p_max_mismatch: 1.0,
            newton_raphson: NewtonRaphsonParameters::default(),
            use_reactive_limits: true,
            transformer_voltage_control_on: false,
            phase_shifter_regulation_on: false,
            shunt_compensator_voltage_control_on: false,
            dc_use_transformer_ratio: true,
            dc_power_factor: 1.0,
            low_impedance_threshold: 1e-8,
            nominal_voltage_resolution: None,
            connected_component_mode: ConnectedComponentMode::default(),
            voltage_init_mode: VoltageInitMode::default(),
            post_processors: Vec::new(),
            linear_solver: SolverKind::default(),
        }
    }
}

impl LoadFlowParameters {
    pub fn from_toml_str(text: &str) -> GridResult<Self> {
        let params: Self = toml::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> GridResult<()> {
        let invalid = |msg: String| Err(GridError::InvalidParameter(msg));
        if !(self.base_power > 0.0) {
            return invalid(format!("base power must be positive, got {}", self.base_power));
        }
        if !(0.0..=100.0).contains(&self.most_meshed_max_nominal_voltage_percentile) {
            return invalid(format!(
                "most meshed nominal voltage percentile must be in [0, 100], got {}",
                self.most_meshed_max_nominal_voltage_percentile
            ));
        }
        if self.max_slack_bus_count == 0 {
            return invalid("max slack bus count must be at least 1".to_string());
        }
        if !(self.newton_raphson.tolerance > 0.0) {
            return invalid(format!(
                "Newton-Raphson tolerance must be positive, got {}",
                self.newton_raphson.tolerance
            ));
        }
        if self.newton_raphson.max_iterations == 0 {
            return invalid("Newton-Raphson max iterations must be at least 1".to_string());
        }
        if !(self.dc_power_factor > 0.0 && self.dc_power_factor <= 1.0) {
            return invalid(format!(
                "DC power factor must be in (0, 1], got {}",
                self.dc_power_factor
            ));
        }
        if self.low_impedance_threshold < 0.0 {
            return invalid("low impedance threshold must not be negative".to_string());
        }
        if let Some(tol) = self.nominal_voltage_resolution {
            if !(0.0..0.5).contains(&tol) {
                return invalid(format!(
                    "nominal voltage resolution must be in [0, 0.5), got {tol}"
                ));
            }
        }
        if self.slack_bus_p_max_mismatch < 0.0 {
            return invalid("slack bus max mismatch must not be negative".to_string());
        }
        if self.slack_bus_selection == SlackBusSelectionMode::Name && self.slack_bus_ids.is_empty()
        {
            return invalid("slack selection by name needs at least one id".to_string());
        }
        Ok(())
    }

    pub fn with_dc(mut self, dc: bool) -> Self {
        self.dc = dc;
        self
    }

    pub fn with_distributed_slack(mut self, distributed_slack: bool) -> Self {
        self.distributed_slack = distributed_slack;
        self
    }

    pub fn with_balance_type(mut self, balance_type: BalanceType) -> Self {
        self.balance_type = balance_type;
        self
    }

    pub fn with_slack_bus_selection(mut self, mode: SlackBusSelectionMode) -> Self {
        self.slack_bus_selection = mode;
        self
    }

    pub fn with_slack_bus_ids(mut self, ids: &[&str]) -> Self {
        self.slack_bus_selection = SlackBusSelectionMode::Name;
        self.slack_bus_ids = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_max_slack_bus_count(mut self, count: usize, key: SlackDistributionKey) -> Self {
        self.max_slack_bus_count = count;
        self.slack_distribution_key = key;
        self
    }

    pub fn with_reactive_limits(mut self, on: bool) -> Self {
        self.use_reactive_limits = on;
        self
    }

    pub fn with_transformer_voltage_control(mut self, on: bool) -> Self {
        self.transformer_voltage_control_on = on;
        self
    }

    pub fn with_phase_shifter_regulation(mut self, on: bool) -> Self {
        self.phase_shifter_regulation_on = on;
        self
    }

    pub fn with_shunt_voltage_control(mut self, on: bool) -> Self {
        self.shunt_compensator_voltage_control_on = on;
        self
    }

    pub fn with_dc_use_transformer_ratio(mut self, on: bool) -> Self {
        self.dc_use_transformer_ratio = on;
        self
    }

    pub fn with_nominal_voltage_resolution(mut self, tolerance: Option<f64>) -> Self {
        self.nominal_voltage_resolution = tolerance;
        self
    }

    pub fn with_connected_component_mode(mut self, mode: ConnectedComponentMode) -> Self {
        self.connected_component_mode = mode;
        self
    }

    pub fn with_voltage_init_mode(mut self, mode: VoltageInitMode) -> Self {
        self.voltage_init_mode = mode;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.newton_raphson.tolerance = tolerance;
        self
    }

    pub fn with_post_processors(mut self, names: &[&str]) -> Self {
        self.post_processors = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_linear_solver(mut self, kind: SolverKind) -> Self {
        self.linear_solver = kind;
        self
    }
}

/// Parameters of a sensitivity run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SensitivityParameters {
    pub load_flow: LoadFlowParameters,
    /// Flow functions against injection and HVDC variables.
    pub flow_flow_threshold: f64,
    /// Voltage functions against voltage targets.
    pub voltage_voltage_threshold: f64,
    /// Flow functions against voltage targets.
    pub flow_voltage_threshold: f64,
    /// Flow functions against phase shifter angles.
    pub angle_flow_threshold: f64,
}

impl SensitivityParameters {
    pub fn new(load_flow: LoadFlowParameters) -> Self {
        Self {
            load_flow,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> GridResult<Self> {
        let params: Self = toml::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> GridResult<()> {
        self.load_flow.validate()?;
        for (name, value) in [
            ("flow-flow", self.flow_flow_threshold),
            ("voltage-voltage", self.voltage_voltage_threshold),
            ("flow-voltage", self.flow_voltage_threshold),
            ("angle-flow", self.angle_flow_threshold),
        ] {
            if !(value >= 0.0) {
                return Err(GridError::InvalidParameter(format!(
                    "{name} sensitivity threshold must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn with_flow_flow_threshold(mut self, threshold: f64) -> Self {
        self.flow_flow_threshold = threshold;
        self
    }

    pub fn with_angle_flow_threshold(mut self, threshold: f64) -> Self {
        self.angle_flow_threshold = threshold;
        self
    }

    pub fn with_voltage_thresholds(mut self, voltage_voltage: f64, flow_voltage: f64) -> Self {
        self.voltage_voltage_threshold = voltage_voltage;
        self.flow_voltage_threshold = flow_voltage;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(LoadFlowParameters::default().validate().is_ok());
        assert!(SensitivityParameters::default().validate().is_ok());
    }

    #[test]
    fn invalid_percentile_is_rejected() {
        let mut params = LoadFlowParameters::default();
        params.most_meshed_max_nominal_voltage_percentile = 120.0;
        let err = params.validate().unwrap_err();
        assert!(matches!(err, GridError::InvalidParameter(_)));
        assert!(err.to_string().contains("percentile"));
    }

    #[test]
    fn invalid_power_factor_and_tolerance_are_rejected() {
        let mut params = LoadFlowParameters::default();
        params.dc_power_factor = 0.0;
        assert!(params.validate().is_err());
        let params = LoadFlowParameters::default().with_tolerance(-1.0);
        assert!(params.validate().is_err());
    }

    #[test]
    fn name_selection_needs_ids() {
        let params = LoadFlowParameters::default()
            .with_slack_bus_selection(SlackBusSelectionMode::Name);
        assert!(params.validate().is_err());
        let params = LoadFlowParameters::default().with_slack_bus_ids(&["VL1_0"]);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn toml_overrides_nested_sections() {
        let params = LoadFlowParameters::from_toml_str(
            r#"
            balance_type = "proportional_to_load"
            linear_solver = "gauss"
            [newton_raphson]
            max_iterations = 30
            "#,
        )
        .unwrap();
        assert_eq!(params.balance_type, BalanceType::ProportionalToLoad);
        assert_eq!(params.linear_solver, SolverKind::Gauss);
        assert_eq!(params.newton_raphson.max_iterations, 30);
        assert!((params.newton_raphson.tolerance - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn toml_with_invalid_value_fails_validation() {
        let err = LoadFlowParameters::from_toml_str("base_power = 0.0").unwrap_err();
        assert!(matches!(err, GridError::InvalidParameter(_)));
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let params = SensitivityParameters::default().with_flow_flow_threshold(-1e-3);
        assert!(params.validate().is_err());
    }

    #[test]
    fn json_round_trip() {
        let params = SensitivityParameters::new(LoadFlowParameters::default().with_dc(true))
            .with_angle_flow_threshold(1e-4);
        let json = serde_json::to_string(&params).unwrap();
        let back: SensitivityParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
