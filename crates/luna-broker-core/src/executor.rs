//! Operation executor: the only place the broker changes OS state.
//!
//! Every call runs on the blocking pool under a deadline. When the deadline
//! passes the caller gets a timeout error and the OS call is left to finish
//! in the background; it cannot be preempted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use luna_platform::{Platform, PlatformError, ProcessEntry, ProcessLaunch};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{BrokerError, Result};
use crate::models::Operation;
use crate::security::ValidationContext;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub request_timeout: Duration,
    /// Run clicks and keystrokes from all connections one at a time.
    pub serialize_input: bool,
    pub screenshots_dir: PathBuf,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            serialize_input: true,
            screenshots_dir: crate::paths::screenshots_dir()
                .unwrap_or_else(|_| std::env::temp_dir().join("luna-broker").join("screenshots")),
        }
    }
}

/// What the validator actually approved. The executor acts on these rather
/// than resolving the caller's strings a second time.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTargets {
    pub executable: Option<PathBuf>,
    pub file: Option<PathBuf>,
    pub process: Option<ProcessEntry>,
}

impl From<&ValidationContext> for ResolvedTargets {
    fn from(ctx: &ValidationContext) -> Self {
        Self {
            executable: ctx
                .executable
                .as_ref()
                .and_then(|resolution| resolution.resolved_path.clone()),
            file: ctx.file_target.clone(),
            process: ctx.target_process.clone(),
        }
    }
}

pub struct OperationExecutor {
    platform: Platform,
    options: ExecutorOptions,
    input_lock: Arc<Mutex<()>>,
}

impl OperationExecutor {
    pub fn new(platform: Platform, options: ExecutorOptions) -> Self {
        Self {
            platform,
            options,
            input_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Perform a validated operation and describe what happened.
    pub async fn execute(&self, operation: Operation) -> Result<Value> {
        self.execute_resolved(operation, ResolvedTargets::default()).await
    }

    /// Like [`execute`](Self::execute), launching and opening exactly what
    /// validation resolved.
    pub async fn execute_resolved(
        &self,
        operation: Operation,
        targets: ResolvedTargets,
    ) -> Result<Value> {
        let kind = operation.kind();

        // The guard moves into the blocking task so a timed-out click still
        // holds the input queue until it really finishes.
        let input_guard = if kind.affects_input() && self.options.serialize_input {
            Some(self.input_lock.clone().lock_owned().await)
        } else {
            None
        };

        let platform = self.platform.clone();
        let screenshots_dir = self.options.screenshots_dir.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _input_guard = input_guard;
            run(&platform, operation, targets, &screenshots_dir)
        });

        match tokio::time::timeout(self.options.request_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(BrokerError::Internal(format!(
                "{kind} task failed: {join_err}"
            ))),
            Err(_) => Err(BrokerError::Timeout(
                self.options.request_timeout.as_secs_f64().ceil() as u64,
            )),
        }
    }
}

fn run(
    platform: &Platform,
    operation: Operation,
    targets: ResolvedTargets,
    screenshots_dir: &Path,
) -> Result<Value> {
    let kind = operation.kind();
    debug!(operation = %kind, "Executing operation");

    let data = match operation {
        Operation::Click(params) => {
            platform.input.click(params.x, params.y, params.button)?;
            json!({
                "x": params.x,
                "y": params.y,
                "button": params.button.as_str(),
            })
        }
        Operation::SendKeys(params) => {
            platform
                .input
                .send_keys(&params.keys, params.target_window.as_deref())?;
            json!({
                "keys": params.keys,
                "targetWindow": params.target_window,
            })
        }
        Operation::GetWindows => {
            let windows: Vec<_> = platform
                .input
                .list_windows()?
                .into_iter()
                .filter(|window| window.is_visible)
                .collect();
            json!({
                "count": windows.len(),
                "windows": windows,
            })
        }
        Operation::RegistryRead(params) => {
            let value = platform.registry.read(&params.key_path, &params.value_name)?;
            json!({
                "keyPath": params.key_path,
                "valueName": params.value_name,
                "value": value,
            })
        }
        Operation::RegistryWrite(params) => {
            platform
                .registry
                .write(&params.key_path, &params.value_name, &params.value)?;
            json!({
                "keyPath": params.key_path,
                "valueName": params.value_name,
                "written": true,
            })
        }
        Operation::ProcessStart(params) => {
            let arguments = match &params.arguments {
                Some(arguments) => arguments.to_argv()?,
                None => Vec::new(),
            };
            let launch = ProcessLaunch {
                file_name: targets
                    .executable
                    .map(|path| path.to_string_lossy().into_owned())
                    .unwrap_or_else(|| params.file_name.clone()),
                arguments,
                working_directory: params.working_directory.as_ref().map(PathBuf::from),
            };
            let pid = platform.processes.start(&launch)?;
            json!({
                "processId": pid,
                "fileName": params.file_name,
            })
        }
        Operation::ProcessTerminate(params) => {
            let target = match targets.process {
                Some(entry) if entry.pid == params.process_id => entry,
                _ => {
                    let pid = params.process_id;
                    platform
                        .processes
                        .lookup(pid)?
                        .ok_or_else(|| PlatformError::NotFound(format!("process {pid}")))?
                }
            };
            platform.processes.terminate(&target)?;
            json!({
                "processId": params.process_id,
                "terminated": true,
            })
        }
        Operation::FileRead(params) => {
            let path = targets.file.unwrap_or_else(|| PathBuf::from(&params.file_path));
            let content = platform.files.read_text(&path, params.encoding)?;
            json!({
                "filePath": params.file_path,
                "content": content,
                "encoding": params.encoding.as_str(),
            })
        }
        Operation::FileWrite(params) => {
            let path = targets.file.unwrap_or_else(|| PathBuf::from(&params.file_path));
            let bytes_written = platform
                .files
                .write_text(&path, &params.content, params.encoding)?;
            json!({
                "filePath": params.file_path,
                "bytesWritten": bytes_written,
            })
        }
        Operation::Screenshot => {
            std::fs::create_dir_all(screenshots_dir).map_err(PlatformError::from)?;
            let path = screenshots_dir.join(screenshot_file_name());
            platform.screen.capture_primary(&path)?;
            json!({ "filePath": path.to_string_lossy() })
        }
    };
    Ok(data)
}

fn screenshot_file_name() -> String {
    format!("screenshot_{}.png", Local::now().format("%Y%m%d_%H%M%S_%3f"))
}
