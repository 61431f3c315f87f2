//! The hub side of the session.
//!
//! One worker owns the hub transport. Inbound bytes are framed, traced,
//! classified and rendered, and the raw line is relayed to the client pool.
//! Client lines arrive on `input_rx` and are written back to the transport.
//! Hub I/O errors are fatal; every decode failure is rendered and survived.

use hub_protocol::message::USER_PROGRAM_PRINT;
use hub_protocol::{
    ChargingState, HubMessage, Line, LineFramer, Notification, classify, decode_base64_text,
    notification,
};
use serde_json::Value;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, error};

use crate::bus::Message;
use crate::render;
use crate::trace::SharedTraceLog;
use crate::transport::HubTransport;

pub struct HubConnection {
    transport: HubTransport,
    framer: LineFramer,
    trace: SharedTraceLog,
    bus: Sender<Message>,
    input_rx: Receiver<Vec<u8>>,
    charged: i64,
    charging: ChargingState,
}

impl HubConnection {
    pub fn new(
        transport: HubTransport,
        trace: SharedTraceLog,
        bus: Sender<Message>,
        input_rx: Receiver<Vec<u8>>,
    ) -> Self {
        HubConnection {
            transport,
            framer: LineFramer::new(),
            trace,
            bus,
            input_rx,
            charged: 0,
            charging: ChargingState::Idle,
        }
    }

    /// Battery level and charging state, from the last battery notification.
    pub fn battery(&self) -> (i64, ChargingState) {
        (self.charged, self.charging)
    }

    /// Run the hub session. Returns when the hub side fails or ends, which
    /// ends the gateway.
    pub async fn begin(mut self) {
        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                read = self.transport.read(&mut buf) => match read {
                    Ok(0) => {
                        println!("\nEOF");
                        return;
                    }
                    Ok(n) => {
                        self.framer.push(&buf[..n]);
                        while let Some(line) = self.framer.next_line() {
                            self.handle_line(line).await;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "hub read failed");
                        return;
                    }
                },
                line = self.input_rx.recv() => match line {
                    Some(data) => {
                        if let Err(e) = self.transport.write_all(&data).await {
                            error!(error = %e, "hub write failed");
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    }

    async fn handle_line(&mut self, line: Line) {
        self.trace.lock().unwrap().input(&line.payload);
        self.parse_line(&String::from_utf8_lossy(&line.payload));
        if self.bus.send(Message::HUB_LINE(line.raw())).await.is_err() {
            debug!("client pool gone, relay dropped");
        }
    }

    pub(crate) fn parse_line(&mut self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                render::print_line(&render::json_error(text));
                return;
            }
        };
        match classify(value) {
            HubMessage::Request { id, method, params } => {
                self.handle_request(&id, &method, &params);
            }
            HubMessage::Response { id, result } => {
                render::print_line(&render::response(&id, &result));
            }
            HubMessage::Error { id, payload } => self.handle_error(&id, &payload, text),
            HubMessage::Notification { method, params } => {
                self.handle_notification(method, params, text);
            }
            HubMessage::Unknown(value) => render::print_line(&render::unknown(&value)),
        }
    }

    /// `userProgram.print` shares the request shape; the method name routes
    /// it to the output renderer.
    fn handle_request(&mut self, id: &Value, method: &str, params: &Value) {
        if method == USER_PROGRAM_PRINT {
            let value = params
                .get("value")
                .and_then(Value::as_str)
                .unwrap_or_default();
            match decode_base64_text(value) {
                Ok(text) => render::print_line(&render::program_output(id, &text)),
                Err(e) => render::print_line(&render::failed(&e.to_string(), value)),
            }
            return;
        }
        render::print_line(&render::hub_request(id, method, params));
    }

    fn handle_error(&mut self, id: &Value, payload: &str, raw: &str) {
        match decode_base64_text(payload) {
            Ok(text) => render::print_line(&render::error_reply(id, &text)),
            Err(e) => render::print_line(&render::failed(&e.to_string(), raw)),
        }
    }

    fn handle_notification(&mut self, method: Value, params: Value, raw: &str) {
        match notification::decode(method, params) {
            Ok(Notification::Sensor(state)) => {
                render::print_status(&render::sensor_status(&state, self.charged));
            }
            Ok(Notification::Battery(status)) => {
                self.charged = status.charge_pct;
                self.charging = status.charging;
            }
            Ok(other) => {
                if let Some(line) = render::notification(&other) {
                    render::print_line(&line);
                }
            }
            Err(e) => render::print_line(&render::failed(&e.to_string(), raw)),
        }
    }
}
