use std::io::Write;

use clap::{Arg, ArgAction, ArgMatches, Command};
use hub_protocol::decode_base64_text;
use rpc::{RpcClient, RpcError, upload_program};
use serde_json::Value;

fn validate_port_value(value: &str) -> Result<u16, String> {
    value
        .parse::<u16>()
        .map_err(|_| "Invalid port number".to_owned())
}

fn validate_slot_value(value: &str) -> Result<u8, String> {
    match value.parse::<u8>() {
        Ok(slot) if slot < 20 => Ok(slot),
        _ => Err("Slot must be in range 0-19".to_owned()),
    }
}

fn validate_coord_value(value: &str) -> Result<u8, String> {
    match value.parse::<u8>() {
        Ok(coord) if coord < 5 => Ok(coord),
        _ => Err("Coordinate must be in range 0-4".to_owned()),
    }
}

fn validate_brightness_value(value: &str) -> Result<u8, String> {
    match value.parse::<u8>() {
        Ok(brightness) if brightness <= 9 => Ok(brightness),
        _ => Err("Brightness must be in range 0-9".to_owned()),
    }
}

fn validate_image_value(value: &str) -> Result<String, String> {
    let rows: Vec<&str> = value.split(':').collect();
    let valid = rows.len() == 5
        && rows
            .iter()
            .all(|row| row.len() == 5 && row.chars().all(|c| c.is_ascii_digit()));
    if valid {
        Ok(value.to_owned())
    } else {
        Err("Image format is xxxxx:xxxxx:xxxxx:xxxxx:xxxxx with brightness digits 0-9".to_owned())
    }
}

fn validate_file_value(value: &str) -> Result<String, String> {
    if std::path::Path::new(value).is_file() {
        Ok(value.to_owned())
    } else {
        Err("File doesn't exists on file system! Use a different file".to_owned())
    }
}

fn cli() -> Command {
    Command::new("Hub RPC")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Tools for the hub RPC protocol via a running gateway")
        .arg(
            Arg::new("debug")
                .help("Enable debug output")
                .long("debug")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("port")
                .help("Gateway port on localhost")
                .short('p')
                .long("port")
                .value_parser(validate_port_value)
                .default_value("8888"),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("list")
                .visible_alias("ls")
                .about("List stored programs"),
        )
        .subcommand(Command::new("fwinfo").about("Show firmware version"))
        .subcommand(Command::new("time").about("Get time"))
        .subcommand(
            Command::new("mv")
                .about("Changes program slot")
                .arg(Arg::new("from_slot").required(true).value_parser(validate_slot_value))
                .arg(Arg::new("to_slot").required(true).value_parser(validate_slot_value)),
        )
        .subcommand(
            Command::new("upload")
                .visible_alias("cp")
                .about("Uploads a program")
                .arg(Arg::new("file").required(true).value_parser(validate_file_value))
                .arg(Arg::new("to_slot").required(true).value_parser(validate_slot_value))
                .arg(Arg::new("name"))
                .arg(
                    Arg::new("start")
                        .help("Start after upload")
                        .short('s')
                        .long("start")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("rm")
                .about("Removes the program at a given slot")
                .arg(Arg::new("from_slot").required(true).value_parser(validate_slot_value)),
        )
        .subcommand(
            Command::new("start")
                .about("Starts a program")
                .arg(Arg::new("slot").required(true).value_parser(validate_slot_value)),
        )
        .subcommand(Command::new("stop").about("Stop program execution"))
        .subcommand(
            Command::new("display")
                .about("Controls the 5x5 LED matrix display")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("image")
                        .about("Displays an image on the LED matrix")
                        .arg(
                            Arg::new("image")
                                .help("format xxxxx:xxxxx:xxxxx:xxxxx:xxxxx, where x is the pixel brightness in range 0-9")
                                .required(true)
                                .value_parser(validate_image_value),
                        ),
                )
                .subcommand(
                    Command::new("text")
                        .about("Displays scrolling text on the LED matrix")
                        .arg(Arg::new("text").required(true)),
                )
                .subcommand(Command::new("clear").about("Clears the display"))
                .subcommand(
                    Command::new("setpixel")
                        .about("Sets individual LED brightness")
                        .arg(Arg::new("x").required(true).value_parser(validate_coord_value))
                        .arg(Arg::new("y").required(true).value_parser(validate_coord_value))
                        .arg(
                            Arg::new("brightness")
                                .help("pixel brightness 0-9")
                                .value_parser(validate_brightness_value)
                                .default_value("9"),
                        ),
                ),
        )
}

/// Strings render bare, everything else as JSON.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Join a JSON array with dots: `[1,5,60]` -> `"1.5.60"`.
fn dotted(value: &Value) -> String {
    value
        .as_array()
        .map(|items| items.iter().map(plain).collect::<Vec<_>>().join("."))
        .unwrap_or_else(|| plain(value))
}

fn format_timestamp_ms(ms: i64) -> Option<String> {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

async fn handle_list(client: &mut RpcClient) -> Result<(), RpcError> {
    let info = client.get_storage_status().await?;
    let storage = &info["storage"];
    let slots = &info["slots"];
    println!(
        "{:>4} {:<40} {:>6} {:<20} {:<12} {:<10}",
        "Slot", "Decoded Name", "Size", "Last Modified", "Project_id", "Type"
    );
    for i in 0..20 {
        let slot = &slots[i.to_string()];
        if slot.is_null() {
            continue;
        }
        let name = slot["name"].as_str().unwrap_or("");
        let decoded_name = decode_base64_text(name).unwrap_or_else(|_| name.to_owned());
        let size = slot["size"].as_u64().unwrap_or(0);
        let modified = slot["modified"]
            .as_i64()
            .and_then(format_timestamp_ms)
            .unwrap_or_default();
        let project = slot["project_id"].as_str().unwrap_or(" ");
        let kind = slot["type"].as_str().unwrap_or(" ");
        println!("{i:>4} {decoded_name:<40} {size:>5}b {modified:<20} {project:<12} {kind:<10}");
    }
    println!(
        "Storage free {}{} of total {}{}",
        plain(&storage["free"]),
        plain(&storage["unit"]),
        plain(&storage["total"]),
        plain(&storage["unit"]),
    );
    Ok(())
}

async fn handle_fwinfo(client: &mut RpcClient) -> Result<(), RpcError> {
    let info = client.get_hub_info().await?;
    println!(
        "Firmware version: {}; Runtime version: {}",
        dotted(&info["version"]),
        dotted(&info["runtime"]),
    );
    Ok(())
}

async fn handle_upload(client: &mut RpcClient, sub: &ArgMatches) -> Result<(), RpcError> {
    let path = sub.get_one::<String>("file").expect("file is required");
    let slot = *sub.get_one::<u8>("to_slot").expect("to_slot is required");
    let name = sub.get_one::<String>("name").cloned().unwrap_or_else(|| path.clone());
    let data = std::fs::read(path)?;

    upload_program(client, &name, &data, slot, |sent, total| {
        print!("\r\x1b[2K{sent}/{total} bytes");
        let _ = std::io::stdout().flush();
    })
    .await?;
    println!();

    if sub.get_flag("start") {
        client.program_execute(slot).await?;
    }
    Ok(())
}

async fn dispatch(client: &mut RpcClient, matches: &ArgMatches) -> Result<(), RpcError> {
    match matches.subcommand() {
        Some(("list", _)) => handle_list(client).await,
        Some(("fwinfo", _)) => handle_fwinfo(client).await,
        Some(("time", _)) => {
            // The probe's reply carries nothing worth showing; errors still
            // surface through the usual path.
            client.storage_status().await?;
            Ok(())
        }
        Some(("mv", sub)) => {
            let from = *sub.get_one::<u8>("from_slot").expect("from_slot is required");
            let to = *sub.get_one::<u8>("to_slot").expect("to_slot is required");
            client.move_project(from, to).await?;
            Ok(())
        }
        Some(("upload", sub)) => handle_upload(client, sub).await,
        Some(("rm", sub)) => {
            let slot = *sub.get_one::<u8>("from_slot").expect("from_slot is required");
            client.remove_project(slot).await?;
            Ok(())
        }
        Some(("start", sub)) => {
            let slot = *sub.get_one::<u8>("slot").expect("slot is required");
            client.program_execute(slot).await?;
            Ok(())
        }
        Some(("stop", _)) => {
            client.program_terminate().await?;
            Ok(())
        }
        Some(("display", sub)) => match sub.subcommand() {
            Some(("image", args)) => {
                let image = args.get_one::<String>("image").expect("image is required");
                client.display_image(image).await?;
                Ok(())
            }
            Some(("text", args)) => {
                let text = args.get_one::<String>("text").expect("text is required");
                client.display_text(text).await?;
                Ok(())
            }
            Some(("clear", _)) => {
                client.display_clear().await?;
                Ok(())
            }
            Some(("setpixel", args)) => {
                let x = *args.get_one::<u8>("x").expect("x is required");
                let y = *args.get_one::<u8>("y").expect("y is required");
                let brightness = *args
                    .get_one::<u8>("brightness")
                    .expect("brightness has a default");
                client.display_set_pixel(x, y, brightness).await?;
                Ok(())
            }
            _ => unreachable!("a display subcommand is required"),
        },
        _ => unreachable!("a subcommand is required"),
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

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

    let port = *matches.get_one::<u16>("port").expect("port has a default");
    let mut client = match RpcClient::connect(port).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("FATAL: cannot reach the gateway: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = dispatch(&mut client, &matches).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_all_subcommands() {
        cli().debug_assert();

        // Cargo runs tests from the package directory, so the manifest is a
        // handy regular file for the upload path validator.
        let m = cli().get_matches_from(["rpc", "upload", "Cargo.toml", "3", "--start"]);
        let (name, sub) = m.subcommand().unwrap();
        assert_eq!(name, "upload");
        assert!(sub.get_flag("start"));

        let m = cli().get_matches_from(["rpc", "display", "setpixel", "2", "3"]);
        let (_, display) = m.subcommand().unwrap();
        let (name, args) = display.subcommand().unwrap();
        assert_eq!(name, "setpixel");
        assert_eq!(*args.get_one::<u8>("brightness").unwrap(), 9);
    }

    #[test]
    fn image_validator_accepts_the_documented_format() {
        assert!(validate_image_value("90009:09090:00900:09090:90009").is_ok());

        assert!(validate_image_value("").is_err());
        assert!(validate_image_value("90009:09090:00900:09090").is_err());
        assert!(validate_image_value("9000a:09090:00900:09090:90009").is_err());
        assert!(validate_image_value("900090:9090:00900:09090:90009").is_err());
    }

    #[test]
    fn slot_and_brightness_ranges() {
        assert!(validate_slot_value("0").is_ok());
        assert!(validate_slot_value("19").is_ok());
        assert!(validate_slot_value("20").is_err());
        assert!(validate_slot_value("x").is_err());

        assert!(validate_brightness_value("9").is_ok());
        assert!(validate_brightness_value("10").is_err());

        assert!(validate_coord_value("4").is_ok());
        assert!(validate_coord_value("5").is_err());
    }

    #[test]
    fn dotted_joins_version_arrays() {
        assert_eq!(dotted(&serde_json::json!([1, 5, 60])), "1.5.60");
        assert_eq!(dotted(&serde_json::json!("1.5")), "1.5");
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(
            format_timestamp_ms(0).unwrap(),
            "1970-01-01 00:00:00"
        );
        assert_eq!(
            format_timestamp_ms(1_700_000_000_000).unwrap(),
            "2023-11-14 22:13:20"
        );
    }
}
