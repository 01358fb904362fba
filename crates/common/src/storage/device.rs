use std::path::Path;

/// Environment variable that overrides the machine identifier
pub const DEVICE_ID_ENV: &str = "TETHER_DEVICE_ID";

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[derive(Debug, thiserror::Error)]
pub enum DeviceKeyError {
    #[error("no machine id found, set {DEVICE_ID_ENV}")]
    NotFound,
    #[error("machine id at {path} is empty")]
    Empty { path: String },
}

/// Default at-rest key: a stable identifier for this machine
///
/// Uses `TETHER_DEVICE_ID` when set, otherwise the systemd/dbus machine id
/// (32 hex characters, so the key selects AES-256).
pub fn device_key() -> Result<String, DeviceKeyError> {
    if let Ok(id) = std::env::var(DEVICE_ID_ENV) {
        let id = id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }
    device_key_from(MACHINE_ID_PATHS.iter().map(Path::new))
}

fn device_key_from<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Result<String, DeviceKeyError> {
    for path in paths {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        let id = contents.trim();
        if id.is_empty() {
            return Err(DeviceKeyError::Empty {
                path: path.display().to_string(),
            });
        }
        tracing::debug!(path = %path.display(), "using machine id as device key");
        return Ok(id.to_string());
    }
    Err(DeviceKeyError::NotFound)
}
