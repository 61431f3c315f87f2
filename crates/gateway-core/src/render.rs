//! Console rendering for the live session view.
//!
//! One tagged line per event. Every line clears to end-of-line so the
//! in-place sensor status line (terminated by `\r`) never leaves residue
//! behind when a full line overwrites it.

use std::io::Write;

use hub_protocol::{Gadget, Notification, SensorState};
use serde_json::Value;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const CLEAR_EOL: &str = "\x1b[K";
const WRAP_OFF: &str = "\x1b[?7l";
const WRAP_ON: &str = "\x1b[?7h";

/// Print a finished line.
pub fn print_line(line: &str) {
    emit(line, '\n');
}

/// Print a status line that the next output overwrites.
pub fn print_status(line: &str) {
    emit(line, '\r');
}

fn emit(line: &str, end: char) {
    print!("{line}{CLEAR_EOL}{RESET}{end}");
    let _ = std::io::stdout().flush();
}

/// Strings render bare, everything else as JSON.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tagged(tag: &str, color: &str, id: Option<&Value>, body: &str, wrap: bool) -> String {
    let body = if wrap {
        body.to_owned()
    } else {
        format!("{WRAP_OFF}{body}{WRAP_ON}")
    };
    let body = match id {
        Some(id) => format!("{DIM}{}{RESET} {body}", plain(id)),
        None => body,
    };
    format!("{:<17}{RESET}{body}", format!("{color}{tag}"))
}

/// An RPC call arriving from the hub.
pub fn hub_request(id: &Value, method: &str, params: &Value) -> String {
    tagged(
        "REQUEST:",
        YELLOW,
        Some(id),
        &format!("{method}: {params}"),
        false,
    )
}

/// A line a client sent towards the hub. Unlike the hub-side lines this is
/// a bare tag: no column padding, no wrap toggling.
pub fn client_request(payload: &str) -> String {
    format!("{YELLOW}REQUEST:{RESET}  {payload}")
}

/// A reply to an earlier outbound request.
pub fn response(id: &Value, result: &Value) -> String {
    tagged("RESPONSE:", YELLOW, Some(id), &plain(result), false)
}

/// Decoded `userProgram.print` output.
pub fn program_output(id: &Value, text: &str) -> String {
    tagged("OUTPUT:", GREEN, Some(id), text, true)
}

/// A decoded error reply.
pub fn error_reply(id: &Value, text: &str) -> String {
    tagged("ERROR:", RED, Some(id), text, true)
}

/// A line that did not parse as JSON.
pub fn json_error(line: &str) -> String {
    tagged("JSON ERROR:", RED, None, line, true)
}

/// A line that parsed but blew up during decoding.
pub fn failed(error: &str, line: &str) -> String {
    tagged(
        "FAILED:",
        RED,
        None,
        &format!("{DIM}{error}{RESET}: {line}"),
        false,
    )
}

/// A JSON object that matched no known shape.
pub fn unknown(value: &Value) -> String {
    tagged("UNKNOWN:", BLUE, None, &value.to_string(), false)
}

/// Render the tagged-line notifications. Sensor and battery notifications
/// have dedicated handling in the hub worker and return `None` here.
pub fn notification(event: &Notification) -> Option<String> {
    match event {
        Notification::Sensor(_) | Notification::Battery(_) => None,
        Notification::Storage(p) => Some(tagged("STORAGE:", BLUE, None, &plain(p), false)),
        Notification::Button {
            button,
            duration_ms,
        } => Some(tagged(
            "INFO:",
            BLUE,
            None,
            &format!("Button pressed: {button} {duration_ms:4}"),
            false,
        )),
        Notification::Gesture(p) => Some(tagged(
            "INFO:",
            BLUE,
            None,
            &format!("Interaction: {}", plain(p)),
            false,
        )),
        Notification::Display(p) => Some(tagged("DISPLAY:", BLUE, None, &plain(p), false)),
        Notification::Firmware(p) => Some(tagged("FIRMWARE:", BLUE, None, &plain(p), false)),
        Notification::Program(p) => Some(tagged("PROGRAM:", BLUE, None, &plain(p), false)),
        Notification::RuntimeError(items) => Some(tagged(
            "RUNTIME:",
            RED,
            None,
            &Value::Array(items.clone()).to_string(),
            true,
        )),
        Notification::Unknown { opcode, params } => Some(format!(
            "{DIM}{:<17}{RESET}{}",
            plain(opcode),
            plain(params)
        )),
    }
}

/// The in-place sensor status line: ports A-F, motion vectors, battery,
/// display and hub time.
pub fn sensor_status(state: &SensorState, charged: i64) -> String {
    let sep = format!("{RESET}{DIM}| {RESET}{BOLD}");
    let mut buf = format!("{BOLD} ");
    for (i, port) in state.ports.iter().enumerate().take(6) {
        buf.push((b'A' + i as u8) as char);
        buf.push(':');
        match port.gadget {
            Gadget::Disconnected => buf.push('-'),
            Gadget::MediumMotor => match port.values.as_array() {
                // [speed, diff, pos, ?]
                Some(v) if v.len() == 4 => {
                    let pos = v[2].as_i64().unwrap_or(0);
                    let speed = v[0].as_i64().unwrap_or(0);
                    buf.push_str(&format!("{pos:4}°{speed:3}%"));
                }
                _ => buf.push('?'),
            },
            Gadget::ColorSensor => {
                let color = port.values.get(0).cloned().unwrap_or(Value::Null);
                buf.push_str(&format!("C{}", plain(&color)));
            }
            Gadget::DistanceSensor => match port.values.get(0).and_then(Value::as_i64) {
                Some(d) if d != 0 => buf.push_str(&format!("{d:3}cm ")),
                _ => buf.push_str("  cm "),
            },
            Gadget::Other(_) => buf.push_str(&plain(&port.values)),
        }
        buf.push_str(&sep);
    }

    let [ax, ay, az] = state.accelerometer;
    let [gx, gy, gz] = state.gyroscope;
    let [px, py, pz] = state.position;
    buf.push_str(&format!("a=({ax:5}{ay:5}{az:5}) "));
    buf.push_str(&format!("v=({gx:5}{gy:5}{gz:5}) "));
    buf.push_str(&format!("p=({px:5}{py:5}{pz:5}) "));
    buf.push_str(&format!("Bat:{charged:3}%{sep}"));
    buf.push_str(&format!("Display:{}{sep}", plain(&state.display)));
    buf.push_str(&format!("Time:{}", plain(&state.time)));
    buf
}
