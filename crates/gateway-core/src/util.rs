//! CLI argument validators.

use std::path::Path;

/// Check if the string is a valid port
pub fn is_port(port: String) -> Result<(), String> {
    match port.parse::<u16>() {
        Ok(_) => Ok(()),
        Err(_) => Err("Invalid port number".to_owned()),
    }
}

/// Check that the file exists
pub fn is_file(file_str: String) -> Result<(), String> {
    let path = Path::new(&file_str);
    match path.is_file() {
        true => Ok(()),
        false => Err("File doesn't exists on file system! Use a different file".to_owned()),
    }
}

/// Check that the path exists (serial TTYs are character devices, not files)
pub fn is_tty(path_str: String) -> Result<(), String> {
    let path = Path::new(&path_str);
    match path.exists() {
        true => Ok(()),
        false => Err("Device path doesn't exist on file system".to_owned()),
    }
}

/// Check that the string is a Bluetooth device address (AA:BB:CC:DD:EE:FF)
pub fn is_bdaddr(addr: String) -> Result<(), String> {
    let octets: Vec<&str> = addr.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    match valid {
        true => Ok(()),
        false => Err("Invalid Bluetooth address".to_owned()),
    }
}
