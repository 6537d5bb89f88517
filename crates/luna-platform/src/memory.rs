//! In-memory backend.
//!
//! Records input, keeps registry values, files and a fake process table in
//! memory and never touches the OS. Used for dry runs and as the test double
//! for everything above the platform layer.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::types::registry_key;
use crate::{
    DisplayBounds, FileStore, InputInjector, MouseButton, Platform, PlatformError,
    ProcessController, ProcessEntry, ProcessLaunch, RegistryStore, RegistryValue, Result,
    ScreenCapturer, TextEncoding, WindowInfo,
};

const FIRST_PID: u32 = 10_000;

/// One synthetic input event as it would have been injected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Click {
        x: i32,
        y: i32,
        button: MouseButton,
    },
    Keys {
        keys: String,
        target_window: Option<String>,
    },
}

#[derive(Default)]
struct State {
    events: Vec<InputEvent>,
    windows: Vec<WindowInfo>,
    registry: BTreeMap<String, BTreeMap<String, RegistryValue>>,
    processes: BTreeMap<u32, ProcessEntry>,
    launches: Vec<ProcessLaunch>,
    next_pid: u32,
    files: BTreeMap<PathBuf, Vec<u8>>,
    captures: Vec<PathBuf>,
}

/// Every capability backed by plain data.
pub struct MemoryBackend {
    display: DisplayBounds,
    latency: Mutex<Option<Duration>>,
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new(display: DisplayBounds) -> Arc<Self> {
        Arc::new(Self {
            display,
            latency: Mutex::new(None),
            state: Mutex::new(State {
                next_pid: FIRST_PID,
                ..State::default()
            }),
        })
    }

    /// A [`Platform`] whose capabilities all point at this backend.
    pub fn platform(self: &Arc<Self>) -> Platform {
        Platform {
            input: self.clone(),
            registry: self.clone(),
            processes: self.clone(),
            files: self.clone(),
            screen: self.clone(),
        }
    }

    /// Make every call block for `latency` first.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn input_events(&self) -> Vec<InputEvent> {
        self.state.lock().events.clone()
    }

    pub fn add_window(&self, window: WindowInfo) {
        self.state.lock().windows.push(window);
    }

    /// Register a running process that was not launched through the backend.
    pub fn add_process(&self, pid: u32, name: impl Into<String>) {
        self.state.lock().processes.insert(
            pid,
            ProcessEntry {
                pid,
                name: name.into(),
            },
        );
    }

    pub fn launches(&self) -> Vec<ProcessLaunch> {
        self.state.lock().launches.clone()
    }

    pub fn file(&self, path: &Path) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    pub fn captures(&self) -> Vec<PathBuf> {
        self.state.lock().captures.clone()
    }

    fn wait(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
    }
}

impl InputInjector for MemoryBackend {
    fn click(&self, x: i32, y: i32, button: MouseButton) -> Result<()> {
        self.wait();
        self.state
            .lock()
            .events
            .push(InputEvent::Click { x, y, button });
        Ok(())
    }

    fn send_keys(&self, keys: &str, target_window: Option<&str>) -> Result<()> {
        self.wait();
        let mut state = self.state.lock();
        if let Some(title) = target_window
            && !state.windows.iter().any(|w| w.title == title)
        {
            return Err(PlatformError::NotFound(format!("window '{title}'")));
        }
        state.events.push(InputEvent::Keys {
            keys: keys.to_string(),
            target_window: target_window.map(str::to_string),
        });
        Ok(())
    }

    fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        self.wait();
        Ok(self.state.lock().windows.clone())
    }
}

impl RegistryStore for MemoryBackend {
    fn read(&self, key_path: &str, value_name: &str) -> Result<Option<RegistryValue>> {
        self.wait();
        Ok(self
            .state
            .lock()
            .registry
            .get(&registry_key(key_path))
            .and_then(|values| values.get(&value_name.to_lowercase()))
            .cloned())
    }

    fn write(&self, key_path: &str, value_name: &str, value: &RegistryValue) -> Result<()> {
        self.wait();
        self.state
            .lock()
            .registry
            .entry(registry_key(key_path))
            .or_default()
            .insert(value_name.to_lowercase(), value.clone());
        Ok(())
    }
}

impl ProcessController for MemoryBackend {
    fn start(&self, launch: &ProcessLaunch) -> Result<u32> {
        self.wait();
        let mut state = self.state.lock();
        let pid = state.next_pid;
        state.next_pid += 1;
        let name = launch
            .file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&launch.file_name)
            .to_string();
        state.processes.insert(pid, ProcessEntry { pid, name });
        state.launches.push(launch.clone());
        Ok(pid)
    }

    fn terminate(&self, target: &ProcessEntry) -> Result<()> {
        self.wait();
        let mut state = self.state.lock();
        match state.processes.get(&target.pid) {
            Some(entry) if entry.name.eq_ignore_ascii_case(&target.name) => {
                state.processes.remove(&target.pid);
                Ok(())
            }
            _ => Err(PlatformError::NotFound(format!("process {}", target.pid))),
        }
    }

    fn lookup(&self, pid: u32) -> Result<Option<ProcessEntry>> {
        self.wait();
        Ok(self.state.lock().processes.get(&pid).cloned())
    }
}

impl FileStore for MemoryBackend {
    fn read_text(&self, path: &Path, encoding: TextEncoding) -> Result<String> {
        self.wait();
        let bytes = self
            .state
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| PlatformError::Io(io::Error::from(io::ErrorKind::NotFound)))?;
        encoding.decode(&bytes)
    }

    fn write_text(&self, path: &Path, content: &str, encoding: TextEncoding) -> Result<u64> {
        self.wait();
        let bytes = encoding.encode(content);
        let len = bytes.len() as u64;
        self.state.lock().files.insert(path.to_path_buf(), bytes);
        Ok(len)
    }
}

impl ScreenCapturer for MemoryBackend {
    fn primary_display(&self) -> Result<DisplayBounds> {
        Ok(self.display)
    }

    fn capture_primary(&self, destination: &Path) -> Result<()> {
        self.wait();
        self.state.lock().captures.push(destination.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_table() {
        let backend = MemoryBackend::new(DisplayBounds::new(800, 600));
        let pid = backend
            .start(&ProcessLaunch {
                file_name: r"C:\Windows\notepad.exe".to_string(),
                arguments: vec![],
                working_directory: None,
            })
            .unwrap();
        let entry = backend.lookup(pid).unwrap().unwrap();
        assert_eq!(entry.name, "notepad.exe");
        backend.terminate(&entry).unwrap();
        assert!(backend.lookup(pid).unwrap().is_none());
        assert!(matches!(
            backend.terminate(&entry),
            Err(PlatformError::NotFound(_))
        ));
    }

    #[test]
    fn test_terminate_checks_the_name_still_matches() {
        let backend = MemoryBackend::new(DisplayBounds::new(800, 600));
        backend.add_process(900, "lsass.exe");
        let stale = ProcessEntry {
            pid: 900,
            name: "notepad.exe".to_string(),
        };
        assert!(matches!(
            backend.terminate(&stale),
            Err(PlatformError::NotFound(_))
        ));
        assert!(backend.lookup(900).unwrap().is_some());
    }

    #[test]
    fn test_send_keys_to_missing_window() {
        let backend = MemoryBackend::new(DisplayBounds::new(800, 600));
        let err = backend.send_keys("abc", Some("Untitled - Notepad")).unwrap_err();
        assert_eq!(err.to_string(), "window 'Untitled - Notepad' not found");
        assert!(backend.input_events().is_empty());
    }

    #[test]
    fn test_platform_shares_state() {
        let backend = MemoryBackend::new(DisplayBounds::new(800, 600));
        let platform = backend.platform();
        platform
            .registry
            .write(r"HKCU\Software\Luna", "Mode", &RegistryValue::DWord(2))
            .unwrap();
        assert_eq!(
            backend.read(r"hkcu\software\luna\", "mode").unwrap(),
            Some(RegistryValue::DWord(2))
        );
        platform.input.click(1, 2, MouseButton::Right).unwrap();
        assert_eq!(
            backend.input_events(),
            vec![InputEvent::Click {
                x: 1,
                y: 2,
                button: MouseButton::Right
            }]
        );
    }
}
