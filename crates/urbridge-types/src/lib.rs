use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A controller field the state monitor can watch for changes.
///
/// The serialized form is the field's name in the controller's output recipe
/// (e.g. `"actual_TCP_pose"`), which is also the key used in `/state` and in
/// every pushed [`StateMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StateField {
    /// Tool centre point pose `[x, y, z, rx, ry, rz]`.
    #[serde(rename = "actual_TCP_pose")]
    ActualTcpPose,
    /// Joint positions in radians.
    #[serde(rename = "actual_q")]
    ActualQ,
    #[serde(rename = "robot_mode")]
    RobotMode,
    /// General purpose integer output register 0.
    #[serde(rename = "output_int_register_0")]
    OutputIntRegister0,
    #[serde(rename = "runtime_state")]
    RuntimeState,
    #[serde(rename = "safety_status")]
    SafetyStatus,
    /// Combined standard + configurable + tool digital inputs.
    #[serde(rename = "actual_digital_input_bits")]
    DigitalInputBits,
    /// Combined standard + configurable + tool digital outputs.
    #[serde(rename = "actual_digital_output_bits")]
    DigitalOutputBits,
}

impl StateField {
    /// Every monitorable field, in wire order.
    pub const ALL: [StateField; 8] = [
        StateField::ActualTcpPose,
        StateField::ActualQ,
        StateField::RobotMode,
        StateField::OutputIntRegister0,
        StateField::RuntimeState,
        StateField::SafetyStatus,
        StateField::DigitalInputBits,
        StateField::DigitalOutputBits,
    ];

    /// The recipe name of this field.
    pub const fn name(self) -> &'static str {
        match self {
            StateField::ActualTcpPose => "actual_TCP_pose",
            StateField::ActualQ => "actual_q",
            StateField::RobotMode => "robot_mode",
            StateField::OutputIntRegister0 => "output_int_register_0",
            StateField::RuntimeState => "runtime_state",
            StateField::SafetyStatus => "safety_status",
            StateField::DigitalInputBits => "actual_digital_input_bits",
            StateField::DigitalOutputBits => "actual_digital_output_bits",
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StateField {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateField::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| BridgeError::Config(format!("unknown state field '{s}'")))
    }
}

/// The value of one [`StateField`] in a snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Vector(Vec<f64>),
    Integer(i64),
    Bits(u64),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Vector(a), FieldValue::Vector(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
            }
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
            (FieldValue::Bits(a), FieldValue::Bits(b)) => a == b,
            _ => false,
        }
    }
}

/// Merged view of monitored fields, keyed and ordered by field.
pub type StateMap = BTreeMap<StateField, FieldValue>;

/// One controller cycle's worth of state.
///
/// Fields the link's output recipe does not declare are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RobotState {
    /// Controller time in seconds since controller start.
    pub timestamp: f64,
    #[serde(rename = "actual_TCP_pose")]
    pub actual_tcp_pose: Option<[f64; 6]>,
    pub actual_q: Option<[f64; 6]>,
    pub robot_mode: Option<i32>,
    pub runtime_state: Option<u32>,
    pub safety_status: Option<i32>,
    pub output_int_register_0: Option<i32>,
    pub actual_digital_input_bits: Option<u64>,
    pub actual_digital_output_bits: Option<u64>,
}

impl RobotState {
    /// Look up a field by its typed name. `None` when the snapshot does not
    /// carry it.
    pub fn field(&self, field: StateField) -> Option<FieldValue> {
        match field {
            StateField::ActualTcpPose => self.actual_tcp_pose.map(|v| FieldValue::Vector(v.to_vec())),
            StateField::ActualQ => self.actual_q.map(|v| FieldValue::Vector(v.to_vec())),
            StateField::RobotMode => self.robot_mode.map(|v| FieldValue::Integer(v.into())),
            StateField::OutputIntRegister0 => {
                self.output_int_register_0.map(|v| FieldValue::Integer(v.into()))
            }
            StateField::RuntimeState => self.runtime_state.map(|v| FieldValue::Integer(v.into())),
            StateField::SafetyStatus => self.safety_status.map(|v| FieldValue::Integer(v.into())),
            StateField::DigitalInputBits => self.actual_digital_input_bits.map(FieldValue::Bits),
            StateField::DigitalOutputBits => self.actual_digital_output_bits.map(FieldValue::Bits),
        }
    }
}

/// Message pushed to every WebSocket subscriber after a state change.
///
/// Serialises flat: `{"sequence":…, "timestamp":…, "changed":[…],
/// "actual_TCP_pose":[…], "runtime_state":…, …}`.
#[derive(Debug, Clone, Serialize)]
pub struct StateMessage {
    /// Number of merges into the last-known state so far, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Fields whose value changed in this update.
    pub changed: Vec<StateField>,
    /// Full merged state after applying the update.
    #[serde(flatten)]
    pub state: StateMap,
}

/// Body of `POST /set-digital-output`.
///
/// Fields are deliberately wide signed integers so that out-of-range input
/// reaches validation instead of failing deserialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalOutputRequest {
    /// Channel within the bank, `0..=7`.
    pub digital_output: i64,
    /// `0` or `1`.
    pub value: i64,
    /// Bank bit offset: `0` for standard outputs, `8` for configurable ones.
    #[serde(default)]
    pub offset: i64,
}

/// One 8-bit bank of the combined digital output register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputBank {
    Standard,
    Configurable,
}

impl OutputBank {
    /// Resolve a bank from its bit offset in the 64-bit register.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidCommand`] for any offset other than `0`
    /// or `8`.
    pub fn from_offset(offset: i64) -> Result<Self, BridgeError> {
        match offset {
            0 => Ok(OutputBank::Standard),
            8 => Ok(OutputBank::Configurable),
            other => Err(BridgeError::InvalidCommand(format!(
                "unknown output bank offset {other}; expected 0 (standard) or 8 (configurable)"
            ))),
        }
    }

    pub const fn offset(self) -> u32 {
        match self {
            OutputBank::Standard => 0,
            OutputBank::Configurable => 8,
        }
    }

    /// Input recipe group the masked write is sent through.
    pub const fn group(self) -> &'static str {
        match self {
            OutputBank::Standard => "standard_outputs",
            OutputBank::Configurable => "configurable_outputs",
        }
    }

    pub const fn mask_field(self) -> &'static str {
        match self {
            OutputBank::Standard => "standard_digital_output_mask",
            OutputBank::Configurable => "configurable_digital_output_mask",
        }
    }

    pub const fn value_field(self) -> &'static str {
        match self {
            OutputBank::Standard => "standard_digital_output",
            OutputBank::Configurable => "configurable_digital_output",
        }
    }
}

/// Error type shared by every urbridge crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("controller connection lost")]
    ConnectionLost,

    #[error("field '{0}' is missing from the controller snapshot")]
    FieldMissing(StateField),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("controller link error: {0}")]
    LinkError(String),

    #[error("monitoring is not running")]
    NotRunning,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> RobotState {
        RobotState {
            timestamp: 12.5,
            actual_tcp_pose: Some([0.1, 0.2, 0.3, 0.0, 3.14, 0.0]),
            actual_q: Some([0.0, -1.57, 1.57, -1.57, -1.57, 0.0]),
            robot_mode: Some(7),
            runtime_state: Some(1),
            safety_status: Some(1),
            output_int_register_0: Some(42),
            actual_digital_input_bits: Some(0b1010),
            actual_digital_output_bits: Some(0b0001_0000_0001),
        }
    }

    #[test]
    fn state_field_names_match_recipe() {
        let json = serde_json::to_string(&StateField::ActualTcpPose).unwrap();
        assert_eq!(json, "\"actual_TCP_pose\"");
        for field in StateField::ALL {
            let json = serde_json::to_string(&field).unwrap();
            assert_eq!(json, format!("\"{}\"", field.name()));
        }
    }

    #[test]
    fn state_field_from_str() {
        assert_eq!("safety_status".parse::<StateField>().unwrap(), StateField::SafetyStatus);
        assert!(matches!(
            "actual_tcp_pose".parse::<StateField>(),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn field_lookup_returns_values() {
        let state = sample_state();
        assert_eq!(
            state.field(StateField::RobotMode),
            Some(FieldValue::Integer(7))
        );
        assert_eq!(
            state.field(StateField::DigitalOutputBits),
            Some(FieldValue::Bits(0b0001_0000_0001))
        );
        assert_eq!(
            state.field(StateField::ActualQ),
            Some(FieldValue::Vector(vec![0.0, -1.57, 1.57, -1.57, -1.57, 0.0]))
        );
    }

    #[test]
    fn field_lookup_reports_absent_field() {
        let state = RobotState {
            safety_status: None,
            ..sample_state()
        };
        assert!(state.field(StateField::SafetyStatus).is_none());
    }

    #[test]
    fn vector_equality_is_by_value() {
        let a = FieldValue::Vector(vec![1.0, 2.0, 3.0]);
        let b = FieldValue::Vector(vec![1.0, 2.0, 3.0]);
        let c = FieldValue::Vector(vec![1.0, 2.0, 3.5]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, FieldValue::Vector(vec![1.0, 2.0]));
    }

    #[test]
    fn nan_components_compare_equal() {
        let a = FieldValue::Vector(vec![f64::NAN, 1.0]);
        let b = FieldValue::Vector(vec![f64::NAN, 1.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_kinds_never_equal() {
        assert_ne!(FieldValue::Integer(1), FieldValue::Bits(1));
    }

    #[test]
    fn state_message_serialises_flat() {
        let mut state = StateMap::new();
        state.insert(StateField::SafetyStatus, FieldValue::Integer(3));
        state.insert(StateField::ActualQ, FieldValue::Vector(vec![0.5; 6]));
        let msg = StateMessage {
            sequence: 4,
            timestamp: Utc::now(),
            changed: vec![StateField::SafetyStatus],
            state,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sequence"], 4);
        assert_eq!(json["safety_status"], 3);
        assert_eq!(json["actual_q"].as_array().unwrap().len(), 6);
        assert_eq!(json["changed"][0], "safety_status");
    }

    #[test]
    fn output_bank_from_offset() {
        assert_eq!(OutputBank::from_offset(0).unwrap(), OutputBank::Standard);
        assert_eq!(OutputBank::from_offset(8).unwrap(), OutputBank::Configurable);
        for bad in [-8, 1, 4, 16, 64] {
            assert!(matches!(
                OutputBank::from_offset(bad),
                Err(BridgeError::InvalidCommand(_))
            ));
        }
    }

    #[test]
    fn output_bank_recipe_names() {
        assert_eq!(OutputBank::Standard.group(), "standard_outputs");
        assert_eq!(OutputBank::Configurable.mask_field(), "configurable_digital_output_mask");
        assert_eq!(OutputBank::Configurable.value_field(), "configurable_digital_output");
        assert_eq!(OutputBank::Configurable.offset(), 8);
    }

    #[test]
    fn digital_output_request_offset_defaults_to_standard() {
        let req: DigitalOutputRequest =
            serde_json::from_str(r#"{"digital_output":3,"value":1}"#).unwrap();
        assert_eq!(req.offset, 0);
        assert_eq!(req.digital_output, 3);
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::FieldMissing(StateField::SafetyStatus);
        assert!(err.to_string().contains("safety_status"));
        assert!(BridgeError::ConnectionLost.to_string().contains("connection lost"));
    }
}
