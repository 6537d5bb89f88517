//! The closed operation catalog and its typed parameter records.

use std::fmt;

use luna_platform::{MouseButton, RegistryValue, TextEncoding};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// Every opcode the broker accepts. Nothing outside this enum is executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Click,
    SendKeys,
    GetWindows,
    RegistryRead,
    RegistryWrite,
    ProcessStart,
    ProcessTerminate,
    FileRead,
    FileWrite,
    Screenshot,
}

impl OperationKind {
    pub const ALL: [OperationKind; 10] = [
        Self::Click,
        Self::SendKeys,
        Self::GetWindows,
        Self::RegistryRead,
        Self::RegistryWrite,
        Self::ProcessStart,
        Self::ProcessTerminate,
        Self::FileRead,
        Self::FileWrite,
        Self::Screenshot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "uiautomation.click",
            Self::SendKeys => "uiautomation.sendkeys",
            Self::GetWindows => "uiautomation.getwindows",
            Self::RegistryRead => "registry.read",
            Self::RegistryWrite => "registry.write",
            Self::ProcessStart => "process.start",
            Self::ProcessTerminate => "process.terminate",
            Self::FileRead => "file.read",
            Self::FileWrite => "file.write",
            Self::Screenshot => "system.screenshot",
        }
    }

    /// Exact, case-sensitive lookup in the catalog.
    pub fn parse(operation: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == operation)
    }

    pub fn mutates_state(self) -> bool {
        !matches!(
            self,
            Self::GetWindows | Self::RegistryRead | Self::FileRead
        )
    }

    /// Operations that drive the shared input queue.
    pub fn affects_input(self) -> bool {
        matches!(self, Self::Click | Self::SendKeys)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickParams {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub button: MouseButton,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendKeysParams {
    pub keys: String,
    #[serde(default)]
    pub target_window: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryReadParams {
    pub key_path: String,
    /// Empty selects the key's default value.
    #[serde(default)]
    pub value_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryWriteParams {
    pub key_path: String,
    #[serde(default)]
    pub value_name: String,
    pub value: RegistryValue,
}

/// Process arguments as a single command line or as an argv list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessArguments {
    Line(String),
    List(Vec<String>),
}

impl ProcessArguments {
    /// Split into argv without any shell expansion.
    pub fn to_argv(&self) -> Result<Vec<String>, BrokerError> {
        match self {
            Self::Line(line) => shell_words::split(line)
                .map_err(|err| BrokerError::Protocol(format!("Invalid arguments: {err}"))),
            Self::List(list) => Ok(list.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStartParams {
    pub file_name: String,
    #[serde(default)]
    pub arguments: Option<ProcessArguments>,
    #[serde(default)]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTerminateParams {
    pub process_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReadParams {
    pub file_path: String,
    #[serde(default)]
    pub encoding: TextEncoding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWriteParams {
    pub file_path: String,
    pub content: String,
    #[serde(default)]
    pub encoding: TextEncoding,
}

/// A catalog operation with its parsed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Click(ClickParams),
    SendKeys(SendKeysParams),
    GetWindows,
    RegistryRead(RegistryReadParams),
    RegistryWrite(RegistryWriteParams),
    ProcessStart(ProcessStartParams),
    ProcessTerminate(ProcessTerminateParams),
    FileRead(FileReadParams),
    FileWrite(FileWriteParams),
    Screenshot,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Click(_) => OperationKind::Click,
            Self::SendKeys(_) => OperationKind::SendKeys,
            Self::GetWindows => OperationKind::GetWindows,
            Self::RegistryRead(_) => OperationKind::RegistryRead,
            Self::RegistryWrite(_) => OperationKind::RegistryWrite,
            Self::ProcessStart(_) => OperationKind::ProcessStart,
            Self::ProcessTerminate(_) => OperationKind::ProcessTerminate,
            Self::FileRead(_) => OperationKind::FileRead,
            Self::FileWrite(_) => OperationKind::FileWrite,
            Self::Screenshot => OperationKind::Screenshot,
        }
    }

    /// Parse the payload for an already catalog-checked opcode.
    ///
    /// Parameterless operations ignore whatever payload was sent.
    pub fn from_parts(
        kind: OperationKind,
        parameters: Option<&serde_json::Value>,
    ) -> Result<Self, BrokerError> {
        let operation = match kind {
            OperationKind::GetWindows => Self::GetWindows,
            OperationKind::Screenshot => Self::Screenshot,
            OperationKind::Click => Self::Click(params(kind, parameters)?),
            OperationKind::SendKeys => Self::SendKeys(params(kind, parameters)?),
            OperationKind::RegistryRead => Self::RegistryRead(params(kind, parameters)?),
            OperationKind::RegistryWrite => Self::RegistryWrite(params(kind, parameters)?),
            OperationKind::ProcessStart => Self::ProcessStart(params(kind, parameters)?),
            OperationKind::ProcessTerminate => Self::ProcessTerminate(params(kind, parameters)?),
            OperationKind::FileRead => Self::FileRead(params(kind, parameters)?),
            OperationKind::FileWrite => Self::FileWrite(params(kind, parameters)?),
        };
        Ok(operation)
    }
}

fn params<T: DeserializeOwned>(
    kind: OperationKind,
    parameters: Option<&serde_json::Value>,
) -> Result<T, BrokerError> {
    let value = match parameters {
        Some(value) if !value.is_null() => value,
        _ => {
            return Err(BrokerError::Protocol(format!(
                "Missing parameters for '{kind}'"
            )));
        }
    };
    T::deserialize(value)
        .map_err(|err| BrokerError::Protocol(format!("Invalid parameters for '{kind}': {err}")))
}
