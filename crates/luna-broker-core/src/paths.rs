use anyhow::Result;
use std::path::PathBuf;

const BROKER_DIR_NAME: &str = "luna-broker";
const CONFIG_FILE: &str = "config.toml";
const POLICY_FILE: &str = "policy.toml";
const LOGS_DIR: &str = "logs";
const SCREENSHOTS_DIR: &str = "screenshots";
const FILES_DIR: &str = "files";

/// Environment variable to override the broker data directory.
pub const BROKER_DIR_ENV: &str = "LUNA_BROKER_DIR";

/// Logical name of the broker endpoint.
pub const PIPE_NAME: &str = "LunaPrivilegeBroker";

#[cfg(unix)]
const SOCKET_FILE: &str = "broker.sock";

/// Resolve the broker data directory.
/// Priority: LUNA_BROKER_DIR env var > platform data directory.
///
/// On Windows the default is `%ProgramData%\Luna` so the service account and
/// interactive users agree on the location.
pub fn resolve_broker_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(BROKER_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    default_broker_dir()
}

#[cfg(windows)]
fn default_broker_dir() -> Result<PathBuf> {
    let program_data = std::env::var_os("ProgramData")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
    Ok(program_data.join("Luna"))
}

#[cfg(not(windows))]
fn default_broker_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|d| d.join(BROKER_DIR_NAME))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine data directory"))
}

/// Ensure the broker directory exists and return its path.
pub fn ensure_broker_dir() -> Result<PathBuf> {
    let dir = resolve_broker_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the logs directory: <data>/logs/
pub fn logs_dir() -> Result<PathBuf> {
    let dir = resolve_broker_dir()?.join(LOGS_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the screenshots directory: <data>/screenshots/
pub fn screenshots_dir() -> Result<PathBuf> {
    Ok(resolve_broker_dir()?.join(SCREENSHOTS_DIR))
}

/// Get the file workspace: <data>/files/
pub fn files_dir() -> Result<PathBuf> {
    Ok(resolve_broker_dir()?.join(FILES_DIR))
}

/// Get the config file path: <config dir>/luna-broker/config.toml
pub fn config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join(BROKER_DIR_NAME).join(CONFIG_FILE))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine config directory"))
}

/// Get the default policy path: <config dir>/luna-broker/policy.toml
pub fn policy_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join(BROKER_DIR_NAME).join(POLICY_FILE))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine config directory"))
}

/// Default endpoint: a named pipe on Windows, a socket in the data directory elsewhere.
#[cfg(windows)]
pub fn default_endpoint() -> Result<String> {
    Ok(format!(r"\\.\pipe\{PIPE_NAME}"))
}

#[cfg(unix)]
pub fn default_endpoint() -> Result<String> {
    Ok(resolve_broker_dir()?
        .join(SOCKET_FILE)
        .to_string_lossy()
        .into_owned())
}

#[cfg(not(any(unix, windows)))]
pub fn default_endpoint() -> Result<String> {
    anyhow::bail!("No local IPC endpoint on this platform")
}

/// Directories file operations may target when no policy overrides them.
///
/// Empty when the data directory cannot be resolved, which denies every file
/// operation.
pub fn default_file_roots() -> Vec<String> {
    let Ok(dir) = resolve_broker_dir() else {
        return Vec::new();
    };
    [FILES_DIR, SCREENSHOTS_DIR]
        .into_iter()
        .map(|sub| dir.join(sub).to_string_lossy().into_owned())
        .collect()
}
