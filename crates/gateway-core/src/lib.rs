// gateway-core: transports, trace log, and the worker set of the gateway.
//
// The gateway is a bundle of cooperating workers joined by mpsc buses: one
// hub connection, one client pool, and one listener per client transport.
// This crate holds all of them; the service crate only wires and runs them.

pub mod bus;
pub mod clients;
pub mod connector;
pub mod hub;
pub mod render;
pub mod trace;
pub mod transport;
pub mod util;

pub use bus::Message;
