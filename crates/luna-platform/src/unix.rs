//! Unix backend.
//!
//! There is no system registry, synthetic input facility or screen grabber
//! the broker can rely on here, so the registry is emulated by a JSON document
//! in the state directory and the input/screen capabilities report
//! [`PlatformError::Unsupported`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::types::registry_key;
use crate::{
    DisplayBounds, InputInjector, MouseButton, NativeOptions, Platform, PlatformError,
    ProcessController, ProcessEntry, ProcessLaunch, RegistryStore, RegistryValue, Result,
    ScreenCapturer, StdFileStore, WindowInfo,
};

const REGISTRY_FILE: &str = "registry.json";

pub(crate) fn native_platform(options: &NativeOptions) -> Result<Platform> {
    let registry = JsonRegistry::open(options.state_dir.join(REGISTRY_FILE))?;
    Ok(Platform {
        input: Arc::new(HeadlessInput),
        registry: Arc::new(registry),
        processes: Arc::new(SystemProcesses),
        files: Arc::new(StdFileStore),
        screen: Arc::new(HeadlessScreen {
            display: options.fallback_display,
        }),
    })
}

// ─── Input ──────────────────────────────────────────────────────────────

struct HeadlessInput;

impl InputInjector for HeadlessInput {
    fn click(&self, _x: i32, _y: i32, _button: MouseButton) -> Result<()> {
        Err(PlatformError::Unsupported("input injection"))
    }

    fn send_keys(&self, _keys: &str, _target_window: Option<&str>) -> Result<()> {
        Err(PlatformError::Unsupported("input injection"))
    }

    fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        Err(PlatformError::Unsupported("window enumeration"))
    }
}

// ─── Registry ───────────────────────────────────────────────────────────

type Hive = BTreeMap<String, BTreeMap<String, RegistryValue>>;

/// Registry emulation persisted as `{ "<key path>": { "<value name>": value } }`.
///
/// Key paths and value names are compared case-insensitively, like the
/// Windows registry.
pub(crate) struct JsonRegistry {
    path: PathBuf,
    keys: Mutex<Hive>,
}

impl JsonRegistry {
    pub fn open(path: PathBuf) -> Result<Self> {
        let keys = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                PlatformError::os("registry load", format!("{}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Hive::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            keys: Mutex::new(keys),
        })
    }

    fn persist(&self, keys: &Hive) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(keys)
            .map_err(|err| PlatformError::os("registry save", err.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RegistryStore for JsonRegistry {
    fn read(&self, key_path: &str, value_name: &str) -> Result<Option<RegistryValue>> {
        let keys = self.keys.lock();
        Ok(keys
            .get(&registry_key(key_path))
            .and_then(|values| values.get(&value_name.to_lowercase()))
            .cloned())
    }

    fn write(&self, key_path: &str, value_name: &str, value: &RegistryValue) -> Result<()> {
        let mut keys = self.keys.lock();
        keys.entry(registry_key(key_path))
            .or_default()
            .insert(value_name.to_lowercase(), value.clone());
        self.persist(&keys)
    }
}

// ─── Processes ──────────────────────────────────────────────────────────

struct SystemProcesses;

fn to_pid(pid: u32) -> Result<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(PlatformError::InvalidArgument(format!("invalid pid {pid}"))),
    }
}

fn process_name(pid: u32) -> String {
    std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

impl ProcessController for SystemProcesses {
    fn start(&self, launch: &ProcessLaunch) -> Result<u32> {
        use std::os::unix::process::CommandExt;

        let mut cmd = Command::new(&launch.file_name);
        cmd.args(&launch.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        if let Some(dir) = &launch.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        // Reap the child so it does not linger as a zombie.
        std::thread::spawn(move || match child.wait() {
            Ok(status) => debug!(pid, %status, "Launched process exited"),
            Err(err) => warn!(pid, error = %err, "Failed to wait for launched process"),
        });
        Ok(pid)
    }

    fn terminate(&self, target: &ProcessEntry) -> Result<()> {
        let pid = target.pid;
        let raw = to_pid(pid)?;
        // Checked immediately before the signal; a different name means the
        // pid now belongs to another process.
        if process_name(pid) != target.name {
            return Err(PlatformError::NotFound(format!("process {pid}")));
        }
        match kill(raw, Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(PlatformError::NotFound(format!("process {pid}"))),
            Err(err) => Err(PlatformError::os("kill", err.to_string())),
        }
    }

    fn lookup(&self, pid: u32) -> Result<Option<ProcessEntry>> {
        let Ok(target) = to_pid(pid) else {
            return Ok(None);
        };
        match kill(target, None) {
            Ok(()) | Err(Errno::EPERM) => Ok(Some(ProcessEntry {
                pid,
                name: process_name(pid),
            })),
            Err(Errno::ESRCH) => Ok(None),
            Err(err) => Err(PlatformError::os("kill", err.to_string())),
        }
    }
}

// ─── Screen ─────────────────────────────────────────────────────────────

struct HeadlessScreen {
    display: DisplayBounds,
}

impl ScreenCapturer for HeadlessScreen {
    fn primary_display(&self) -> Result<DisplayBounds> {
        Ok(self.display)
    }

    fn capture_primary(&self, _destination: &Path) -> Result<()> {
        Err(PlatformError::Unsupported("screen capture"))
    }
}
