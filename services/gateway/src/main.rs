use clap::{Arg, ArgAction, ArgGroup, Command};
use gateway::{GatewayConfig, HubChoice, default_trace_path};
use gateway_core::util::{is_bdaddr, is_file, is_port, is_tty};
use tracing::info;

fn validate_port_value(value: &str) -> Result<u16, String> {
    is_port(value.to_owned())?;
    value
        .parse::<u16>()
        .map_err(|_| "Invalid port number".to_owned())
}

fn validate_tty_value(value: &str) -> Result<String, String> {
    is_tty(value.to_owned())?;
    Ok(value.to_owned())
}

fn validate_bdaddr_value(value: &str) -> Result<String, String> {
    is_bdaddr(value.to_owned())?;
    Ok(value.to_owned())
}

fn validate_file_value(value: &str) -> Result<String, String> {
    is_file(value.to_owned())?;
    Ok(value.to_owned())
}

#[tokio::main]
async fn main() {
    let matches = Command::new("Hub Gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Monitors a LEGO hub session and multiplexes client connections onto it")
        .arg(
            Arg::new("debug")
                .help("Enable debug output")
                .long("debug")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("port")
                .help("Port to listen on localhost for replication")
                .short('p')
                .long("port")
                .value_name("port")
                .value_parser(validate_port_value)
                .default_value("8888"),
        )
        .arg(
            Arg::new("bluetooth")
                .help("Also accept clients over Bluetooth RFCOMM")
                .short('b')
                .long("bluetooth")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log")
                .help("Trace log file (default: trace-Ymd-HMS.log)")
                .short('l')
                .long("log")
                .value_name("path"),
        )
        .arg(
            Arg::new("nolog")
                .help("Don't create a trace log")
                .short('n')
                .long("nolog")
                .action(ArgAction::SetTrue),
        )
        .group(ArgGroup::new("logging").args(["log", "nolog"]))
        .arg(
            Arg::new("tty")
                .help("Hub serial device path")
                .short('t')
                .long("tty")
                .value_name("path")
                .value_parser(validate_tty_value),
        )
        .arg(
            Arg::new("device")
                .help("Hub bluetooth device address")
                .short('d')
                .long("device")
                .value_name("bdaddr")
                .value_parser(validate_bdaddr_value),
        )
        .arg(
            Arg::new("file")
                .help("Replay a captured trace file")
                .short('f')
                .long("file")
                .value_name("path")
                .value_parser(validate_file_value),
        )
        .group(ArgGroup::new("hub").args(["tty", "device", "file"]).required(true))
        .get_matches();

    let default_filter = if matches.get_flag("debug") {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "gateway starting");

    let hub = if let Some(path) = matches.get_one::<String>("tty") {
        HubChoice::Tty(path.clone())
    } else if let Some(addr) = matches.get_one::<String>("device") {
        HubChoice::Device(addr.clone())
    } else if let Some(path) = matches.get_one::<String>("file") {
        HubChoice::File(path.clone())
    } else {
        unreachable!("the hub transport group is required")
    };

    let trace_path = if matches.get_flag("nolog") {
        None
    } else {
        Some(
            matches
                .get_one::<String>("log")
                .cloned()
                .unwrap_or_else(default_trace_path),
        )
    };

    let config = GatewayConfig {
        bind_port: *matches.get_one::<u16>("port").expect("port has a default"),
        bluetooth: matches.get_flag("bluetooth"),
        trace_path,
        hub,
    };

    if let Err(e) = gateway::run(config).await {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    }
}
