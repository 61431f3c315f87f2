//! Notification decoding.
//!
//! Notifications carry a numeric opcode (or a string tag) in `m` and an
//! opcode-specific payload in `p`. Only the opcodes the console renders get
//! a structured decode; the rest pass through as raw JSON.

use serde_json::Value;
use thiserror::Error;

use crate::message::decode_base64_text;

/// A payload that did not match the layout its opcode promises.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("bad {0} payload")]
    Payload(&'static str),
}

/// Battery charging state, third element of the battery triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingState {
    Idle,
    Charging,
    Unknown,
}

impl From<i64> for ChargingState {
    fn from(value: i64) -> Self {
        match value {
            0 => ChargingState::Idle,
            1 => ChargingState::Charging,
            _ => ChargingState::Unknown,
        }
    }
}

/// Decoded battery notification (`m` = 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    pub voltage_mv: i64,
    pub charge_pct: i64,
    pub charging: ChargingState,
}

/// Gadget attached to a hub port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gadget {
    Disconnected,
    ColorSensor,
    DistanceSensor,
    MediumMotor,
    Other(i64),
}

impl From<i64> for Gadget {
    fn from(id: i64) -> Self {
        match id {
            0 => Gadget::Disconnected,
            61 => Gadget::ColorSensor,
            62 => Gadget::DistanceSensor,
            75 => Gadget::MediumMotor,
            other => Gadget::Other(other),
        }
    }
}

/// One `[gadget_id, values]` port entry of a sensor notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PortReading {
    pub gadget: Gadget,
    pub values: Value,
}

/// Decoded sensor notification (`m` = 0).
#[derive(Debug, Clone, PartialEq)]
pub struct SensorState {
    pub ports: Vec<PortReading>,
    pub accelerometer: [i64; 3],
    pub gyroscope: [i64; 3],
    pub position: [i64; 3],
    pub display: Value,
    pub time: Value,
}

/// A decoded notification, one variant per recognised opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Sensor(SensorState),
    Storage(Value),
    Battery(BatteryStatus),
    Button { button: i64, duration_ms: i64 },
    Gesture(Value),
    Display(Value),
    Firmware(Value),
    Program(Value),
    RuntimeError(Vec<Value>),
    Unknown { opcode: Value, params: Value },
}

/// Decode a notification from its `m` and `p` fields.
pub fn decode(method: Value, params: Value) -> Result<Notification, NotificationError> {
    match method {
        Value::Number(ref n) => match n.as_i64() {
            Some(0) => decode_sensor(params).map(Notification::Sensor),
            Some(1) => Ok(Notification::Storage(params)),
            Some(2) => decode_battery(params).map(Notification::Battery),
            Some(3) => decode_button(params),
            Some(4) => Ok(Notification::Gesture(params)),
            Some(5) => Ok(Notification::Display(params)),
            Some(6) => Ok(Notification::Firmware(params)),
            Some(12) => Ok(Notification::Program(params)),
            _ => Ok(Notification::Unknown {
                opcode: method,
                params,
            }),
        },
        Value::String(ref tag) if tag == "runtime_error" => Ok(decode_runtime_error(params)),
        _ => Ok(Notification::Unknown {
            opcode: method,
            params,
        }),
    }
}

fn int_triple(value: &Value, what: &'static str) -> Result<[i64; 3], NotificationError> {
    let items = value
        .as_array()
        .ok_or(NotificationError::Payload(what))?;
    if items.len() != 3 {
        return Err(NotificationError::Payload(what));
    }
    let mut out = [0i64; 3];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = item.as_i64().ok_or(NotificationError::Payload(what))?;
    }
    Ok(out)
}

fn decode_sensor(params: Value) -> Result<SensorState, NotificationError> {
    let Value::Array(mut items) = params else {
        return Err(NotificationError::Payload("sensor"));
    };
    if items.len() != 11 {
        return Err(NotificationError::Payload("sensor"));
    }
    let time = items.pop().unwrap_or(Value::Null);
    let display = items.pop().unwrap_or(Value::Null);
    let position = int_triple(&items.pop().unwrap_or(Value::Null), "sensor position")?;
    let gyroscope = int_triple(&items.pop().unwrap_or(Value::Null), "sensor gyroscope")?;
    let accelerometer =
        int_triple(&items.pop().unwrap_or(Value::Null), "sensor accelerometer")?;

    let mut ports = Vec::with_capacity(items.len());
    for entry in items {
        let Value::Array(mut pair) = entry else {
            return Err(NotificationError::Payload("sensor port"));
        };
        if pair.len() != 2 {
            return Err(NotificationError::Payload("sensor port"));
        }
        let values = pair.pop().unwrap_or(Value::Null);
        let gadget = pair
            .pop()
            .and_then(|v| v.as_i64())
            .ok_or(NotificationError::Payload("sensor port"))?;
        ports.push(PortReading {
            gadget: Gadget::from(gadget),
            values,
        });
    }

    Ok(SensorState {
        ports,
        accelerometer,
        gyroscope,
        position,
        display,
        time,
    })
}

fn decode_battery(params: Value) -> Result<BatteryStatus, NotificationError> {
    let triple = int_triple(&params, "battery")?;
    Ok(BatteryStatus {
        voltage_mv: triple[0],
        charge_pct: triple[1],
        charging: ChargingState::from(triple[2]),
    })
}

fn decode_button(params: Value) -> Result<Notification, NotificationError> {
    let items = params
        .as_array()
        .ok_or(NotificationError::Payload("button"))?;
    let button = items
        .first()
        .and_then(Value::as_i64)
        .ok_or(NotificationError::Payload("button"))?;
    let duration_ms = items
        .get(1)
        .and_then(Value::as_i64)
        .ok_or(NotificationError::Payload("button"))?;
    Ok(Notification::Button {
        button,
        duration_ms,
    })
}

/// Runtime error payloads are arrays whose string elements may be base64
/// wrapped; decodable ones are replaced in place, the rest pass through.
fn decode_runtime_error(params: Value) -> Notification {
    let items = match params {
        Value::Array(items) => items,
        other => vec![other],
    };
    let decoded = items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => match decode_base64_text(&s) {
                Ok(text) => Value::String(text),
                Err(_) => Value::String(s),
            },
            other => other,
        })
        .collect();
    Notification::RuntimeError(decoded)
}
