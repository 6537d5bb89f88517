//! Value types shared between the broker and the platform backends.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        }
    }
}

/// Size of the primary display in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBounds {
    pub width: i32,
    pub height: i32,
}

impl DisplayBounds {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Whether `(x, y)` lies in `[0, width) x [0, height)`.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        (0..self.width).contains(&x) && (0..self.height).contains(&y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A top-level window as seen during enumeration.
///
/// `handle` is an opaque OS reference; the broker never takes ownership of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub handle: i64,
    pub title: String,
    pub class_name: String,
    pub process_id: u32,
    pub process_name: String,
    pub is_visible: bool,
    pub bounds: WindowBounds,
}

/// A running process as reported by the process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

/// Everything needed to launch a process. No shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessLaunch {
    pub file_name: String,
    pub arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
}

/// A registry value.
///
/// JSON strings map to `REG_SZ`, integers that fit in 32 bits to `REG_DWORD`,
/// larger integers to `REG_QWORD` and string arrays to `REG_MULTI_SZ`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistryValue {
    String(String),
    DWord(u32),
    QWord(u64),
    MultiString(Vec<String>),
}

impl RegistryValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "REG_SZ",
            Self::DWord(_) => "REG_DWORD",
            Self::QWord(_) => "REG_QWORD",
            Self::MultiString(_) => "REG_MULTI_SZ",
        }
    }
}

/// Case-folded, separator-normalized form of a key path used as a map key by
/// the backends that emulate the registry.
pub(crate) fn registry_key(key_path: &str) -> String {
    key_path
        .split(['\\', '/'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\\")
        .to_lowercase()
}
