// hub-protocol: line framing and JSON message model for the hub session.
//
// Everything in this crate is transport-free: bytes in, typed messages out.
// The gateway and the RPC client both build on it.

pub mod framer;
pub mod message;
pub mod notification;

pub use framer::{Line, LineFramer};
pub use message::{HubMessage, classify, decode_base64_text};
pub use notification::{
    BatteryStatus, ChargingState, Gadget, Notification, NotificationError, PortReading,
    SensorState,
};
