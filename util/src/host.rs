//! Host platform (linux for example) utility functions

use std::path::{Path, PathBuf};

/// Environment variable giving the root of the software installation.
pub const SW_ROOT_ENV_VAR: &str = "RADIOM_SW_ROOT";

/// Directory which udev populates with stable serial device names.
const SERIAL_BY_ID_DIR: &str = "/dev/serial/by-id";

/// Get the root directory of the software.
///
/// This is the value of `RADIOM_SW_ROOT` if set, otherwise the current working directory.
pub fn get_sw_root() -> std::io::Result<PathBuf> {
    match std::env::var_os(SW_ROOT_ENV_VAR) {
        Some(r) => Ok(PathBuf::from(r)),
        None => std::env::current_dir(),
    }
}

/// Find a serial port whose stable name contains `id_string`.
///
/// Returns `None` if the by-id directory can't be read or no entry matches.
pub fn find_serial_port(id_string: &str) -> Option<PathBuf> {
    find_port_in(Path::new(SERIAL_BY_ID_DIR), id_string)
}

/// Resolve the port to use for a device.
///
/// The fixed `port` path is used if it exists, otherwise the by-id directory is searched for
/// `id_string`.
pub fn resolve_serial_port(port: &str, id_string: Option<&str>) -> Option<PathBuf> {
    let fixed = PathBuf::from(port);

    if !port.is_empty() && fixed.exists() {
        return Some(fixed);
    }

    id_string.and_then(find_serial_port)
}

fn find_port_in(dir: &Path, id_string: &str) -> Option<PathBuf> {
    if id_string.is_empty() {
        return None;
    }

    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.contains(id_string))
                .unwrap_or(false)
        })
        .collect();

    // Stable choice when several interfaces of one device match
    matches.sort();
    matches.into_iter().next()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_find_port_in() {
        let dir = std::env::temp_dir().join(format!("radiom_by_id_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("usb-Prolific_GPS_A-if00-port0"), b"").unwrap();
        std::fs::write(dir.join("usb-FTDI_Motor_B-if00-port0"), b"").unwrap();

        assert_eq!(
            find_port_in(&dir, "Motor"),
            Some(dir.join("usb-FTDI_Motor_B-if00-port0"))
        );
        assert_eq!(find_port_in(&dir, "Radiometer"), None);
        assert_eq!(find_port_in(&dir, ""), None);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
