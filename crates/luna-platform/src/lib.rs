//! Platform capabilities for the Luna privilege broker.
//!
//! Every OS effect the broker can perform goes through one of five traits:
//!
//! - [`InputInjector`]: synthetic mouse/keyboard input and window enumeration
//! - [`RegistryStore`]: read and write named values under a key path
//! - [`ProcessController`]: launch, look up and terminate processes
//! - [`FileStore`]: text file reads and writes with an explicit encoding
//! - [`ScreenCapturer`]: primary display size and screenshots
//!
//! [`Platform::native`] wires up the backend for the current OS.
//! [`MemoryBackend`] keeps everything in memory for dry runs and tests; other
//! doubles can be assembled into a [`Platform`] field by field.

pub mod error;
pub mod keys;
pub mod memory;

mod encoding;
mod files;
mod types;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use encoding::TextEncoding;
pub use error::{PlatformError, Result};
pub use files::StdFileStore;
pub use memory::{InputEvent, MemoryBackend};
pub use types::{
    DisplayBounds, MouseButton, ProcessEntry, ProcessLaunch, RegistryValue, WindowBounds,
    WindowInfo,
};

pub trait InputInjector: Send + Sync {
    /// Move the pointer to `(x, y)` and press/release `button`.
    fn click(&self, x: i32, y: i32, button: MouseButton) -> Result<()>;

    /// Type `keys`, optionally after focusing the window whose title matches `target_window`.
    fn send_keys(&self, keys: &str, target_window: Option<&str>) -> Result<()>;

    /// Visible top-level windows.
    fn list_windows(&self) -> Result<Vec<WindowInfo>>;
}

pub trait RegistryStore: Send + Sync {
    /// Returns `None` when the key or the value does not exist.
    fn read(&self, key_path: &str, value_name: &str) -> Result<Option<RegistryValue>>;

    /// Creates the key when missing.
    fn write(&self, key_path: &str, value_name: &str, value: &RegistryValue) -> Result<()>;
}

pub trait ProcessController: Send + Sync {
    /// Launch without a console window and without shell expansion. Returns the pid.
    fn start(&self, launch: &ProcessLaunch) -> Result<u32>;

    /// Terminate `target`, provided its pid still belongs to a process of the
    /// same name. A reused pid is reported as `NotFound`.
    fn terminate(&self, target: &ProcessEntry) -> Result<()>;

    /// Returns `None` when no process with `pid` exists.
    fn lookup(&self, pid: u32) -> Result<Option<ProcessEntry>>;
}

/// Implementations refuse to follow a link in the final path component.
pub trait FileStore: Send + Sync {
    fn read_text(&self, path: &Path, encoding: TextEncoding) -> Result<String>;

    /// Returns the number of bytes written.
    fn write_text(&self, path: &Path, content: &str, encoding: TextEncoding) -> Result<u64>;
}

pub trait ScreenCapturer: Send + Sync {
    fn primary_display(&self) -> Result<DisplayBounds>;

    /// Capture the primary display as PNG into `destination`.
    fn capture_primary(&self, destination: &Path) -> Result<()>;
}

/// Options for the native backend.
#[derive(Debug, Clone)]
pub struct NativeOptions {
    /// Directory for backend state that has no OS home (the emulated registry on Unix).
    pub state_dir: PathBuf,
    /// Display size reported where the OS cannot be asked.
    pub fallback_display: DisplayBounds,
}

/// One implementation of every capability.
#[derive(Clone)]
pub struct Platform {
    pub input: Arc<dyn InputInjector>,
    pub registry: Arc<dyn RegistryStore>,
    pub processes: Arc<dyn ProcessController>,
    pub files: Arc<dyn FileStore>,
    pub screen: Arc<dyn ScreenCapturer>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

impl Platform {
    /// Backend for the current operating system.
    pub fn native(options: &NativeOptions) -> Result<Self> {
        platform_native(options)
    }
}

// ─── Platform dispatch ──────────────────────────────────────────────────

#[cfg(windows)]
fn platform_native(_options: &NativeOptions) -> Result<Platform> {
    Ok(windows::native_platform())
}

#[cfg(unix)]
fn platform_native(options: &NativeOptions) -> Result<Platform> {
    unix::native_platform(options)
}

#[cfg(not(any(unix, windows)))]
fn platform_native(_options: &NativeOptions) -> Result<Platform> {
    Err(PlatformError::Unsupported("native platform backend"))
}
