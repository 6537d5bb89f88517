//! Broker service configuration.
//!
//! Loaded from `<config_dir>/luna-broker/config.toml`. Every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use luna_platform::{DisplayBounds, NativeOptions};
use serde::{Deserialize, Serialize};

use crate::executor::{DEFAULT_REQUEST_TIMEOUT, ExecutorOptions};
use crate::models::SecurityPolicy;
use crate::paths;
use crate::replay::ReplayGuard;
use crate::transport::{
    DEFAULT_ACCEPT_RETRY_DELAY, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_LINE_BYTES,
    DEFAULT_SOCKET_MODE, TransportConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Pipe or socket path. Defaults to the platform endpoint.
    pub endpoint: Option<String>,
    pub max_connections: usize,
    pub max_line_bytes: usize,
    pub request_timeout_secs: u64,
    pub accept_retry_delay_ms: u64,
    /// Run clicks and keystrokes one at a time across connections.
    pub serialize_input: bool,
    /// Reject reused request ids seen within this many seconds.
    pub replay_window_secs: Option<u64>,
    /// Security policy file. Defaults to `policy.toml` next to this file.
    pub policy_path: Option<PathBuf>,
    pub screenshots_dir: Option<PathBuf>,
    /// Display reported by backends that cannot query one.
    pub display_width: i32,
    pub display_height: i32,
    pub socket_mode: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            accept_retry_delay_ms: DEFAULT_ACCEPT_RETRY_DELAY.as_millis() as u64,
            serialize_input: true,
            replay_window_secs: None,
            policy_path: None,
            screenshots_dir: None,
            display_width: 1920,
            display_height: 1080,
            socket_mode: DEFAULT_SOCKET_MODE,
        }
    }
}

impl BrokerConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse broker config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read broker config {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, else defaults. A present but broken file is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn endpoint(&self) -> Result<String> {
        match &self.endpoint {
            Some(endpoint) if !endpoint.trim().is_empty() => Ok(endpoint.clone()),
            _ => paths::default_endpoint(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn display(&self) -> DisplayBounds {
        DisplayBounds::new(self.display_width, self.display_height)
    }

    pub fn transport(&self) -> Result<TransportConfig> {
        Ok(TransportConfig {
            endpoint: self.endpoint()?,
            max_connections: self.max_connections.max(1),
            max_line_bytes: self.max_line_bytes.max(1),
            accept_retry_delay: Duration::from_millis(self.accept_retry_delay_ms),
            socket_mode: self.socket_mode,
        })
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        let mut options = ExecutorOptions {
            request_timeout: self.request_timeout(),
            serialize_input: self.serialize_input,
            ..ExecutorOptions::default()
        };
        if let Some(dir) = &self.screenshots_dir {
            options.screenshots_dir = dir.clone();
        }
        options
    }

    pub fn native_options(&self) -> Result<NativeOptions> {
        Ok(NativeOptions {
            state_dir: paths::ensure_broker_dir()?,
            fallback_display: self.display(),
        })
    }

    pub fn replay_guard(&self) -> Option<ReplayGuard> {
        self.replay_window_secs
            .filter(|secs| *secs > 0)
            .map(|secs| ReplayGuard::new(Duration::from_secs(secs)))
    }

    pub fn policy_path(&self) -> Result<PathBuf> {
        match &self.policy_path {
            Some(path) => Ok(path.clone()),
            None => paths::policy_path(),
        }
    }

    /// The configured policy file, or built-in defaults when it does not exist.
    pub fn load_policy(&self) -> Result<SecurityPolicy> {
        let path = self.policy_path()?;
        if path.exists() {
            SecurityPolicy::load(&path)
        } else {
            Ok(SecurityPolicy::default())
        }
    }
}
